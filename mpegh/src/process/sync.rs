use std::collections::VecDeque;
use std::io;

use anyhow::{Result, anyhow};
use log::{debug, trace, warn};

use crate::callbacks::TransportCallbacks;
use crate::process::cfg_change::CfgChangeControl;
use crate::process::mhas::{MhasState, PacketOutcome};
use crate::process::params::{TransportParam, TransportParams, TransportType};
use crate::process::{MAX_SUBSTREAMS, SubstreamIndex};
use crate::structs::asi::AudioSceneInfo;
use crate::structs::config::AudioSpecificConfig;
use crate::structs::packet::{MHAS_SYNC_PACKET, PacketType, PacketWalker};
use crate::utils::errors::{ErrorCode, ParamError, SyncError, TransportError, classify};

/// Size of the input buffer. No access unit may be larger.
pub const BUFFER_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessUnitKind {
    /// Packets of one access unit were consumed and frames delivered.
    #[default]
    Frame,
    /// The decoder should flush. Input was not consumed; packets ahead of
    /// the configuration change are not handled again.
    Flush,
}

/// Result of one successful [`TransportDecoder::read_access_unit`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessUnitInfo {
    pub kind: AccessUnitKind,
    /// Bytes consumed from the input buffer.
    pub bytes: usize,
    /// Frames handed to [`TransportCallbacks::decode_frame`].
    pub frames: usize,
    /// A structural configuration change was applied.
    pub config_changed: bool,
    /// Access units estimated lost while resynchronising ahead of this one.
    pub lost_access_units: u32,
}

/// Snapshot of the packet state, taken before looking ahead in the buffer.
///
/// Restoring it rewinds the parser to the snapshot position. Buffered bytes
/// are never consumed while looking ahead, so nothing else needs rewinding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    state: MhasState,
    consumed_bytes: u64,
}

/// MPEG-H transport decoder.
///
/// Bytes are buffered with [`fill_data`](Self::fill_data) and parsed one
/// access unit at a time with [`read_access_unit`](Self::read_access_unit).
/// Configurations, frames and metadata are handed to the
/// [`TransportCallbacks`] implementation.
///
/// # Example
///
/// ```rust
/// use mpegh::callbacks::{ConfigMode, TransportCallbacks};
/// use mpegh::process::EXAMPLE_DATA;
/// use mpegh::process::params::TransportType;
/// use mpegh::process::sync::TransportDecoder;
/// use mpegh::process::SubstreamIndex;
/// use mpegh::structs::config::AudioSpecificConfig;
///
/// struct Channels(usize);
///
/// impl TransportCallbacks for Channels {
///     fn update_config(
///         &mut self,
///         config: &AudioSpecificConfig,
///         _mode: ConfigMode,
///         _substream: SubstreamIndex,
///     ) -> anyhow::Result<bool> {
///         self.0 = config.num_channels();
///         Ok(false)
///     }
///
///     fn free_mem(&mut self, _: &AudioSpecificConfig, _: SubstreamIndex) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
///
/// let mut decoder = TransportDecoder::new(TransportType::Mhas, Channels(0));
/// decoder.fill_data(EXAMPLE_DATA);
///
/// let mut frames = 0;
/// while let Ok(info) = decoder.read_access_unit() {
///     frames += info.frames;
/// }
///
/// assert_eq!(frames, 2);
/// assert_eq!(decoder.callbacks().0, 1);
/// ```
#[derive(Debug)]
pub struct TransportDecoder<C: TransportCallbacks> {
    pub(crate) transport_type: TransportType,
    pub(crate) params: TransportParams,
    pub(crate) buffer: VecDeque<u8>,
    pub(crate) state: MhasState,
    /// MHAS label owning each substream slot.
    pub(crate) labels: [Option<u32>; MAX_SUBSTREAMS],
    pub(crate) cfg_change: [CfgChangeControl; MAX_SUBSTREAMS],
    pub(crate) configs: [Option<AudioSpecificConfig>; MAX_SUBSTREAMS],
    /// Raw payload of the last accepted configuration.
    pub(crate) raw_configs: [Vec<u8>; MAX_SUBSTREAMS],
    pub(crate) asi: Option<AudioSceneInfo>,
    pub(crate) callbacks: C,
    consumed_bytes: u64,
    skipped_bytes: u64,
    lost_access_units: u32,
    synced_once: bool,
}

impl<C: TransportCallbacks> TransportDecoder<C> {
    pub fn new(transport_type: TransportType, callbacks: C) -> Self {
        Self {
            transport_type,
            params: TransportParams::default(),
            buffer: VecDeque::with_capacity(BUFFER_CAPACITY),
            state: MhasState::default(),
            labels: [None; MAX_SUBSTREAMS],
            cfg_change: [CfgChangeControl::default(); MAX_SUBSTREAMS],
            configs: Default::default(),
            raw_configs: Default::default(),
            asi: None,
            callbacks,
            consumed_bytes: 0,
            skipped_bytes: 0,
            lost_access_units: 0,
            synced_once: false,
        }
    }

    /// Enables parsing of audio scene information.
    pub fn with_scene_info(mut self) -> Self {
        self.asi = Some(AudioSceneInfo::default());
        self
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn params(&self) -> &TransportParams {
        &self.params
    }

    pub fn config(&self, substream: SubstreamIndex) -> Option<&AudioSpecificConfig> {
        self.configs[substream.index()].as_ref()
    }

    pub fn label(&self, substream: SubstreamIndex) -> Option<u32> {
        self.labels[substream.index()]
    }

    pub fn cfg_change(&self, substream: SubstreamIndex) -> &CfgChangeControl {
        &self.cfg_change[substream.index()]
    }

    pub fn scene_info(&self) -> Option<&AudioSceneInfo> {
        self.asi.as_ref()
    }

    pub fn scene_info_mut(&mut self) -> Option<&mut AudioSceneInfo> {
        self.asi.as_mut()
    }

    pub fn state(&self) -> &MhasState {
        &self.state
    }

    pub fn consumed_bytes(&self) -> u64 {
        self.consumed_bytes
    }

    /// Bytes discarded while searching for sync packets.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_synced(&self) -> bool {
        self.state.synced
    }

    /// Appends input bytes. Returns the number of bytes that did not fit and
    /// have to be offered again after the next access unit.
    pub fn fill_data(&mut self, data: &[u8]) -> usize {
        let free = BUFFER_CAPACITY.saturating_sub(self.buffer.len());
        let accepted = free.min(data.len());
        self.buffer.extend(&data[..accepted]);

        data.len() - accepted
    }

    pub fn set_param(&mut self, param: TransportParam) -> Result<(), TransportError> {
        match param {
            TransportParam::Reset => self.reset(),
            TransportParam::ForceConfigChange => {
                for control in self.cfg_change.iter_mut() {
                    control.force_cfg_change = true;
                }
            }
            TransportParam::ActiveDownmixId(id) => {
                if id > 0x7F {
                    return Err(anyhow!(ParamError::InvalidValue {
                        param: "ActiveDownmixId",
                        value: id as i64
                    })
                    .into());
                }
                let Some(asi) = self.asi.as_mut() else {
                    return Err(anyhow!(ParamError::UnsupportedOperation(
                        "ActiveDownmixId without scene information"
                    ))
                    .into());
                };
                asi.set_active_downmix_id(Some(id));
            }
            param => self.params.apply(param)?,
        }

        Ok(())
    }

    /// Applies a configuration delivered outside the stream, e.g. from a
    /// container sample entry. The change takes effect immediately.
    pub fn out_of_band_config(&mut self, data: &[u8], label: u32) -> Result<(), TransportError> {
        self.apply_config_packet(label, data, false)?;

        Ok(())
    }

    /// Drops buffered input and packet state. Accepted configurations and
    /// their labels are kept.
    pub fn reset(&mut self) {
        debug!("transport reset");

        self.buffer.clear();
        self.state = MhasState::default();
        for control in self.cfg_change.iter_mut() {
            control.reset();
        }
        self.lost_access_units = 0;
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            state: self.state.clone(),
            consumed_bytes: self.consumed_bytes,
        }
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.state = checkpoint.state;
        self.consumed_bytes = checkpoint.consumed_bytes;
    }

    /// Parses one access unit from the buffered input.
    ///
    /// `NotEnoughBits` means more input is needed; the call can be repeated
    /// after [`fill_data`](Self::fill_data) without losing buffered bytes.
    /// After any other sync error the decoder searches for the next sync
    /// packet. Decode errors drop the offending access unit.
    pub fn read_access_unit(&mut self) -> Result<AccessUnitInfo, TransportError> {
        match self.decode_access_unit() {
            Ok(info) => Ok(info),
            Err(e) => {
                let err = TransportError::from(e);
                self.recover(err.code);
                Err(err)
            }
        }
    }

    fn decode_access_unit(&mut self) -> Result<AccessUnitInfo> {
        if self.step_flush()? {
            return Ok(AccessUnitInfo {
                kind: AccessUnitKind::Flush,
                ..Default::default()
            });
        }

        if !self.state.synced {
            self.synchronize()?;
        }

        if self.params.early_config_discovery && self.configs.iter().all(Option::is_none) {
            self.discover_config();
        }

        self.buffer.make_contiguous();
        let (buf, _) = self.buffer.as_slices();
        let len = match self.access_unit_len(buf) {
            Ok(len) => len,
            Err(e) if self.buffer.len() >= BUFFER_CAPACITY && classify(&e) == ErrorCode::NotEnoughBits => {
                return Err(e.context(SyncError::BufferFull));
            }
            Err(e) => return Err(e),
        };

        let au = self.buffer.range(..len).copied().collect::<Vec<_>>();

        match self.parse_access_unit(&au) {
            Ok((PacketOutcome::Flush, _)) => {
                Ok(AccessUnitInfo {
                    kind: AccessUnitKind::Flush,
                    ..Default::default()
                })
            }
            Ok((PacketOutcome::Continue, summary)) => {
                self.consume(len);
                self.state.access_units += 1;
                // a completed flush only covers the unit that requested it
                for control in self.cfg_change.iter_mut() {
                    control.flush_done = false;
                }

                Ok(AccessUnitInfo {
                    kind: AccessUnitKind::Frame,
                    bytes: len,
                    frames: summary.frames,
                    config_changed: summary.config_changed,
                    lost_access_units: std::mem::take(&mut self.lost_access_units),
                })
            }
            Err(e) => {
                if !classify(&e).is_sync_error() {
                    self.consume(len);
                }
                Err(e)
            }
        }
    }

    /// Counts one flushed call for every flushing substream. Returns `true`
    /// while a flush is still in progress.
    fn step_flush(&mut self) -> Result<bool> {
        let mut flushing = false;

        for substream in SubstreamIndex::all() {
            let index = substream.index();
            if !self.cfg_change[index].is_flushing() {
                continue;
            }

            // listeners only hear about the end of a flush
            if self.cfg_change[index].step_flush() {
                self.notify_cfg_change(substream)?;
            } else {
                flushing = true;
            }
        }

        Ok(flushing)
    }

    /// Moves the buffer start to the next sync packet.
    fn synchronize(&mut self) -> Result<()> {
        if self.transport_type == TransportType::MhasRaw {
            self.state.synced = true;
            return Ok(());
        }

        let found = self
            .buffer
            .make_contiguous()
            .windows(MHAS_SYNC_PACKET.len())
            .position(|w| w == MHAS_SYNC_PACKET);

        let Some(skip) = found else {
            let keep = self.buffer.len().min(MHAS_SYNC_PACKET.len() - 1);
            let skip = self.buffer.len() - keep;
            self.skip(skip);

            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                SyncError::NoSyncWord(skip + keep),
            )
            .into());
        };

        if skip > 0 {
            self.skip(skip);
            if self.synced_once {
                let lost = self.estimate_lost_access_units(skip);
                warn!("resynchronised after {skip} bytes, {lost} access units lost");
                self.lost_access_units += lost;
            } else {
                debug!("skipped {skip} bytes ahead of the first sync packet");
            }
        }

        self.state.synced = true;
        self.synced_once = true;

        Ok(())
    }

    /// Number of access units covered by `skipped` bytes: from the average
    /// bitrate if known, else from the burst period, else one.
    fn estimate_lost_access_units(&self, skipped: usize) -> u32 {
        let Some(config) = &self.configs[SubstreamIndex::MAIN.index()] else {
            return 0;
        };

        let fs = config.sampling_frequency as u64;
        let frame_length = config.output_frame_length as u64;
        if fs == 0 || frame_length == 0 {
            return 0;
        }

        let lost = if self.params.average_bitrate > 0 {
            let au_bits = (self.params.average_bitrate as u64 * frame_length).div_ceil(fs);
            ((skipped as u64) << 3).div_ceil(au_bits.max(1))
        } else if self.params.burst_period > 0 {
            (self.params.burst_period as u64 * fs).div_ceil(1000 * frame_length)
        } else {
            1
        };

        lost.min(u32::MAX as u64) as u32
    }

    /// Applies the first configuration found in the buffered input so frames
    /// preceding it can be decoded. The packet state is left untouched.
    fn discover_config(&mut self) {
        let checkpoint = self.checkpoint();
        let data = self.buffer.iter().copied().collect::<Vec<_>>();

        for packet in PacketWalker::new(&data) {
            let Ok(packet) = packet else {
                break;
            };

            if let Err(e) = self.check_pending_crc(&packet) {
                debug!("config discovery stopped: {e:#}");
                break;
            }

            let result = match packet.header.packet_type {
                PacketType::Config => {
                    let result = self.apply_config_packet(packet.header.label, packet.payload, false);
                    if result.is_ok() {
                        trace!("discovered configuration at offset {}", packet.offset);
                        break;
                    }
                    result.map(|_| ())
                }
                PacketType::Crc16 | PacketType::Crc32 | PacketType::SyncGap | PacketType::BufferInfo => {
                    let mut summary = Default::default();
                    self.handle_packet(&packet, &mut summary).map(|_| ())
                }
                _ => Ok(()),
            };

            if let Err(e) = result {
                debug!("config discovery stopped: {e:#}");
                break;
            }
        }

        self.restore(checkpoint);
    }

    fn recover(&mut self, code: ErrorCode) {
        self.state.pending_crc = None;

        if code == ErrorCode::NotEnoughBits {
            return;
        }
        self.state.resume = None;

        if code.is_decode_error() {
            // a dropped unit leaves no flush or build-up behind
            for control in self.cfg_change.iter_mut() {
                control.reset();
            }
            return;
        }
        if !code.is_sync_error() {
            return;
        }

        match self.transport_type {
            TransportType::Mhas => {
                self.state.synced = false;
                if !self.buffer.is_empty() {
                    self.skip(1);
                }
            }
            TransportType::MhasRaw => {
                self.skipped_bytes += self.buffer.len() as u64;
                self.buffer.clear();
            }
        }
    }

    fn consume(&mut self, count: usize) {
        self.buffer.drain(..count);
        self.consumed_bytes += count as u64;
    }

    fn skip(&mut self, count: usize) {
        self.buffer.drain(..count);
        self.skipped_bytes += count as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{ConfigMode, DrcPayloadKind, FramePayload, UniDrcPayload};
    use crate::process::EXAMPLE_DATA;
    use crate::process::cfg_change::{BuildUpStatus, FlushStatus};
    use crate::structs::config::tests::{mono_config, mono_config_with_loudness};
    use crate::utils::bitstream_io::BsIoSliceReader;
    use crate::utils::crc::MHAS_CRC16;
    use crate::utils::errors::PacketError;
    use crate::utils::test_stream::{TestStream, mhas_packet};

    #[derive(Debug, Default)]
    struct Recorder {
        updates: Vec<ConfigMode>,
        freed: usize,
        realloc: bool,
        frames: Vec<Vec<u8>>,
        controls: Vec<CfgChangeControl>,
        drc: Vec<(DrcPayloadKind, u32)>,
        markers: Vec<Vec<u8>>,
    }

    impl TransportCallbacks for Recorder {
        fn update_config(
            &mut self,
            _config: &AudioSpecificConfig,
            mode: ConfigMode,
            _substream: SubstreamIndex,
        ) -> Result<bool> {
            self.updates.push(mode);
            Ok(self.realloc)
        }

        fn free_mem(&mut self, _config: &AudioSpecificConfig, _substream: SubstreamIndex) -> Result<()> {
            self.freed += 1;
            Ok(())
        }

        fn decode_frame(&mut self, frame: &FramePayload) -> Result<()> {
            self.frames.push(frame.data.to_vec());
            Ok(())
        }

        fn control_cfg_change(
            &mut self,
            control: &CfgChangeControl,
            _substream: SubstreamIndex,
        ) -> Result<()> {
            self.controls.push(*control);
            Ok(())
        }

        fn uni_drc(&mut self, _reader: &mut BsIoSliceReader, payload: &UniDrcPayload) -> Result<()> {
            self.drc.push((payload.kind, payload.byte_len));
            Ok(())
        }

        fn marker(&mut self, data: &[u8], _label: u32) -> Result<()> {
            self.markers.push(data.to_vec());
            Ok(())
        }
    }

    fn mhas_decoder() -> TransportDecoder<Recorder> {
        TransportDecoder::new(TransportType::Mhas, Recorder::default())
    }

    fn mono() -> Vec<u8> {
        EXAMPLE_DATA[5..12].to_vec()
    }

    fn loudness(values: &[u8]) -> Result<Vec<u8>> {
        let mut ts = TestStream::new();
        mono_config_with_loudness(&mut ts, values)?;
        Ok(ts.finish()?)
    }

    /// Sync packet, optional configuration and one frame on label 1.
    fn access_unit(config: Option<&[u8]>, frame: &[u8]) -> Result<Vec<u8>> {
        let mut au = MHAS_SYNC_PACKET.to_vec();
        if let Some(config) = config {
            au.extend(mhas_packet(1, 1, config)?);
        }
        au.extend(mhas_packet(2, 1, frame)?);

        Ok(au)
    }

    #[test]
    fn mono_round_trip() -> Result<()> {
        let mut ts = TestStream::new();
        mono_config(&mut ts)?;
        assert_eq!(ts.finish()?, mono());

        let mut decoder = mhas_decoder();
        assert_eq!(decoder.fill_data(EXAMPLE_DATA), 0);

        let info = decoder.read_access_unit()?;
        assert_eq!(info.kind, AccessUnitKind::Frame);
        assert_eq!(info.frames, 1);
        assert_eq!(info.bytes, 18);

        let config = decoder.config(SubstreamIndex::MAIN).unwrap();
        assert_eq!(config.num_channels(), 1);
        assert_eq!(config.sampling_frequency, 48000);
        assert_eq!(decoder.label(SubstreamIndex::MAIN), Some(1));
        assert_eq!(decoder.callbacks().updates, vec![ConfigMode::Alloc]);

        let info = decoder.read_access_unit()?;
        assert_eq!(info.bytes, 9);

        let err = decoder.read_access_unit().unwrap_err();
        assert!(err.is_not_enough_bits());

        assert_eq!(
            decoder.callbacks().frames,
            vec![vec![0x11, 0x22, 0x33, 0x44], vec![0x55, 0x66, 0x77, 0x88]]
        );
        assert_eq!(decoder.consumed_bytes(), EXAMPLE_DATA.len() as u64);

        Ok(())
    }

    #[test]
    fn unchanged_config_not_reparsed() -> Result<()> {
        let mut decoder = mhas_decoder();
        decoder.fill_data(&access_unit(Some(&mono()), &[1])?);
        decoder.fill_data(&access_unit(Some(&mono()), &[2])?);

        decoder.read_access_unit()?;
        let drc_calls = decoder.callbacks().drc.len();
        let info = decoder.read_access_unit()?;

        assert!(!info.config_changed);
        let recorder = decoder.callbacks();
        assert_eq!(recorder.updates, vec![ConfigMode::Alloc]);
        assert_eq!(recorder.freed, 0);
        assert_eq!(recorder.drc.len(), drc_calls);
        assert_eq!(recorder.frames.len(), 2);

        Ok(())
    }

    #[test]
    fn loudness_only_change_is_redelivered() -> Result<()> {
        let first = loudness(&[0x10, 0x20])?;
        let second = loudness(&[0x10, 0x21])?;
        assert_ne!(first, second);

        let mut decoder = mhas_decoder();
        decoder.fill_data(&access_unit(Some(&first), &[1])?);
        decoder.fill_data(&access_unit(Some(&second), &[2])?);

        decoder.read_access_unit()?;
        let drc_calls = decoder.callbacks().drc.len();
        decoder.read_access_unit()?;

        let recorder = decoder.callbacks();
        assert_eq!(recorder.updates, vec![ConfigMode::Alloc]);
        assert_eq!(recorder.drc.len(), drc_calls + 1);
        assert_eq!(recorder.drc.last(), Some(&(DrcPayloadKind::LoudnessInfoSet, 2)));

        Ok(())
    }

    #[test]
    fn content_change_applied_without_flush() -> Result<()> {
        let mut decoder = mhas_decoder();
        decoder.fill_data(&access_unit(Some(&mono()), &[1])?);
        decoder.fill_data(&access_unit(Some(&loudness(&[0x10, 0x20])?), &[2])?);

        decoder.read_access_unit()?;
        let info = decoder.read_access_unit()?;

        assert_eq!(info.kind, AccessUnitKind::Frame);
        assert!(!info.config_changed);
        assert_eq!(
            decoder.callbacks().updates,
            vec![ConfigMode::Alloc, ConfigMode::Detect]
        );
        assert!(decoder.config(SubstreamIndex::MAIN).unwrap().loudness_region().is_some());

        // reported to the decoder, then cleared by the frame that follows
        assert!(decoder.callbacks().controls.last().unwrap().content_change);
        assert!(!decoder.cfg_change(SubstreamIndex::MAIN).content_change);

        Ok(())
    }

    #[test]
    fn repeated_config_after_truncation_is_content_change() -> Result<()> {
        let mut truncation = TestStream::new();
        truncation.put(1, 1)?.put(1, 0)?.put(1, 0)?.put(13, 100)?;

        let mut stream = access_unit(Some(&mono()), &[1])?;
        stream.extend(MHAS_SYNC_PACKET);
        stream.extend(mhas_packet(17, 1, &truncation.finish()?)?);
        stream.extend(mhas_packet(2, 1, &[2])?);
        stream.extend(access_unit(Some(&mono()), &[3])?);

        let mut decoder = mhas_decoder();
        decoder.fill_data(&stream);

        decoder.read_access_unit()?;
        decoder.read_access_unit()?;
        assert!(decoder.cfg_change(SubstreamIndex::MAIN).truncation_in_progress);
        let notified = decoder.callbacks().controls.len();

        let info = decoder.read_access_unit()?;
        assert!(!info.config_changed);

        let control = decoder.cfg_change(SubstreamIndex::MAIN);
        assert!(!control.truncation_in_progress);
        assert!(!control.content_change);
        assert!(decoder.callbacks().controls[notified..].iter().any(|c| c.content_change));
        assert_eq!(decoder.callbacks().updates, vec![ConfigMode::Alloc]);

        Ok(())
    }

    #[test]
    fn parse_error_resets_cfg_change() -> Result<()> {
        let mut stream = access_unit(Some(&mono()), &[1])?;
        stream.extend(MHAS_SYNC_PACKET);
        stream.extend(mhas_packet(2, 7, &[2])?);
        stream.extend(mhas_packet(2, 1, &[2])?);
        stream.extend(access_unit(None, &[3])?);

        let mut decoder = mhas_decoder();
        decoder.fill_data(&stream);

        decoder.read_access_unit()?;
        assert_eq!(decoder.cfg_change(SubstreamIndex::MAIN).build_up, BuildUpStatus::On);

        let err = decoder.read_access_unit().unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
        assert_eq!(*decoder.cfg_change(SubstreamIndex::MAIN), CfgChangeControl::default());

        assert_eq!(decoder.read_access_unit()?.frames, 1);

        Ok(())
    }

    #[test]
    fn truncated_input_resumes() -> Result<()> {
        let mut decoder = mhas_decoder();
        decoder.fill_data(&EXAMPLE_DATA[..10]);

        let err = decoder.read_access_unit().unwrap_err();
        assert!(err.is_not_enough_bits());
        assert_eq!(decoder.buffered(), 10);

        decoder.fill_data(&EXAMPLE_DATA[10..]);
        let info = decoder.read_access_unit()?;
        assert_eq!(info.frames, 1);
        assert_eq!(decoder.callbacks().updates, vec![ConfigMode::Alloc]);

        Ok(())
    }

    #[test]
    fn crc_covers_next_payload() -> Result<()> {
        let frame = [0x11, 0x22, 0x33, 0x44];
        let crc = MHAS_CRC16.checksum(&frame);

        let mut stream = MHAS_SYNC_PACKET.to_vec();
        stream.extend(mhas_packet(1, 1, &mono())?);
        stream.extend(mhas_packet(9, 0, &crc.to_be_bytes())?);
        stream.extend(mhas_packet(2, 1, &frame)?);
        stream.extend(MHAS_SYNC_PACKET);
        stream.extend(mhas_packet(9, 0, &(!crc).to_be_bytes())?);
        stream.extend(mhas_packet(2, 1, &frame)?);
        stream.extend(access_unit(None, &[5])?);

        let mut decoder = mhas_decoder();
        decoder.fill_data(&stream);

        assert_eq!(decoder.read_access_unit()?.frames, 1);

        let err = decoder.read_access_unit().unwrap_err();
        assert_eq!(err.code, ErrorCode::CrcError);
        assert!(matches!(
            err.cause().downcast_ref::<PacketError>(),
            Some(PacketError::CrcMismatch { packet_type: 2, .. })
        ));

        // the damaged unit is dropped, the next one decodes
        assert_eq!(decoder.read_access_unit()?.frames, 1);
        assert_eq!(decoder.callbacks().frames.len(), 2);

        Ok(())
    }

    #[test]
    fn config_change_flushes_then_builds_up() -> Result<()> {
        let mut other = mono();
        // sampling frequency index 4 (44.1 kHz)
        other[1] = 0x21;

        let mut decoder = mhas_decoder();
        decoder.fill_data(&access_unit(Some(&mono()), &[1])?);
        decoder.fill_data(&access_unit(Some(&other), &[2])?);
        decoder.fill_data(&access_unit(None, &[3])?);
        decoder.fill_data(&access_unit(None, &[4])?);

        assert_eq!(decoder.read_access_unit()?.kind, AccessUnitKind::Frame);
        assert_eq!(decoder.read_access_unit()?.kind, AccessUnitKind::Flush);
        assert_eq!(decoder.cfg_change(SubstreamIndex::MAIN).flushing, FlushStatus::On);
        assert_eq!(decoder.read_access_unit()?.kind, AccessUnitKind::Flush);

        let info = decoder.read_access_unit()?;
        assert_eq!(info.kind, AccessUnitKind::Frame);
        assert!(info.config_changed);
        assert_eq!(decoder.config(SubstreamIndex::MAIN).unwrap().sampling_frequency, 44100);
        assert_eq!(decoder.cfg_change(SubstreamIndex::MAIN).build_up, BuildUpStatus::On);

        decoder.read_access_unit()?;
        decoder.read_access_unit()?;
        assert_eq!(decoder.cfg_change(SubstreamIndex::MAIN).build_up, BuildUpStatus::Off);

        let recorder = decoder.callbacks();
        assert_eq!(recorder.frames, vec![vec![1], vec![2], vec![3], vec![4]]);
        assert_eq!(recorder.updates, vec![ConfigMode::Alloc, ConfigMode::Detect]);

        let states = recorder
            .controls
            .iter()
            .map(|c| (c.flushing, c.build_up))
            .collect::<Vec<_>>();
        assert_eq!(
            states,
            vec![
                (FlushStatus::Off, BuildUpStatus::Idle),
                (FlushStatus::Off, BuildUpStatus::On),
                (FlushStatus::On, BuildUpStatus::Off),
                (FlushStatus::Off, BuildUpStatus::Off),
                (FlushStatus::Off, BuildUpStatus::Idle),
                (FlushStatus::Off, BuildUpStatus::On),
                (FlushStatus::Off, BuildUpStatus::Off),
            ]
        );

        Ok(())
    }

    #[test]
    fn flush_resumes_at_config_packet() -> Result<()> {
        let mut other = mono();
        other[1] = 0x21;

        let first = access_unit(Some(&mono()), &[1])?;
        let mut stream = first.clone();
        stream.extend(MHAS_SYNC_PACKET);
        stream.extend(mhas_packet(8, 0, &[0xAB])?);
        stream.extend(mhas_packet(1, 1, &other)?);
        stream.extend(mhas_packet(2, 1, &[2])?);

        let mut decoder = mhas_decoder();
        decoder.fill_data(&stream);

        decoder.read_access_unit()?;
        assert_eq!(decoder.read_access_unit()?.kind, AccessUnitKind::Flush);
        assert_eq!(decoder.read_access_unit()?.kind, AccessUnitKind::Flush);
        assert_eq!(decoder.callbacks().markers, vec![vec![0xAB]]);

        let info = decoder.read_access_unit()?;
        assert_eq!(info.kind, AccessUnitKind::Frame);
        assert!(info.config_changed);
        assert_eq!(info.bytes, stream.len() - first.len());

        let recorder = decoder.callbacks();
        assert_eq!(recorder.markers, vec![vec![0xAB]]);
        assert_eq!(recorder.frames, vec![vec![1], vec![2]]);
        assert_eq!(decoder.state().resume, None);

        Ok(())
    }

    #[test]
    fn resync_estimates_lost_units() -> Result<()> {
        let mut stream = vec![0x00, 0x00, 0x00];
        stream.extend(access_unit(Some(&mono()), &[1])?);
        // sync packet carrying the wrong byte
        stream.extend([0xC0, 0x01, 0x00]);
        stream.extend(access_unit(None, &[2])?);

        let mut decoder = mhas_decoder();
        decoder.set_param(TransportParam::BurstPeriod(100))?;
        decoder.fill_data(&stream);

        let info = decoder.read_access_unit()?;
        assert_eq!(info.lost_access_units, 0);
        assert_eq!(decoder.skipped_bytes(), 3);

        let err = decoder.read_access_unit().unwrap_err();
        assert_eq!(err.code, ErrorCode::SyncError);
        assert!(!decoder.is_synced());

        // 100 ms at 48 kHz with 1024 sample frames
        let info = decoder.read_access_unit()?;
        assert_eq!(info.lost_access_units, 5);
        assert_eq!(decoder.skipped_bytes(), 6);
        assert_eq!(decoder.callbacks().frames, vec![vec![1], vec![2]]);

        Ok(())
    }

    #[test]
    fn missing_sync_needs_more_data() -> Result<()> {
        let mut decoder = mhas_decoder();
        decoder.fill_data(&[0x12; 16]);

        let err = decoder.read_access_unit().unwrap_err();
        assert!(err.is_not_enough_bits());
        assert_eq!(decoder.buffered(), 2);
        assert_eq!(decoder.skipped_bytes(), 14);

        Ok(())
    }

    #[test]
    fn oversized_input() -> Result<()> {
        let mut stream = MHAS_SYNC_PACKET.to_vec();
        stream.extend(mhas_packet(0, 0, &vec![0; BUFFER_CAPACITY - 8])?);
        assert_eq!(stream.len(), BUFFER_CAPACITY);

        let mut decoder = mhas_decoder();
        assert_eq!(decoder.fill_data(&stream), 0);
        assert_eq!(decoder.fill_data(&[0]), 1);

        let err = decoder.read_access_unit().unwrap_err();
        assert_eq!(err.code, ErrorCode::SyncError);
        assert!(matches!(
            err.cause().downcast_ref::<SyncError>(),
            Some(SyncError::BufferFull)
        ));

        let mut decoder = mhas_decoder();
        let mut stream = MHAS_SYNC_PACKET.to_vec();
        stream.extend(mhas_packet(0, 0, &vec![0; BUFFER_CAPACITY])?);
        decoder.fill_data(&stream[..64]);

        let err = decoder.read_access_unit().unwrap_err();
        assert!(matches!(
            err.cause().downcast_ref::<SyncError>(),
            Some(SyncError::PacketTooLong { .. })
        ));

        Ok(())
    }

    #[test]
    fn raw_transport_with_out_of_band_config() -> Result<()> {
        let mut decoder = TransportDecoder::new(TransportType::MhasRaw, Recorder::default());
        decoder.out_of_band_config(&mono(), 1)?;
        assert_eq!(decoder.callbacks().updates, vec![ConfigMode::Alloc]);

        decoder.fill_data(&mhas_packet(2, 1, &[9, 9])?);
        let info = decoder.read_access_unit()?;
        assert_eq!(info.frames, 1);

        let mut stream = mhas_packet(2, 7, &[9])?;
        stream.extend(mhas_packet(2, 1, &[9])?);
        decoder.fill_data(&stream);
        let err = decoder.read_access_unit().unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
        assert_eq!(decoder.buffered(), 0);

        Ok(())
    }

    #[test]
    fn scene_info_for_unknown_label() -> Result<()> {
        let mut stream = MHAS_SYNC_PACKET.to_vec();
        stream.extend(mhas_packet(1, 1, &mono())?);
        stream.extend(mhas_packet(3, 4, &[0x00])?);
        stream.extend(mhas_packet(2, 1, &[1])?);

        let mut decoder = mhas_decoder().with_scene_info();
        decoder.fill_data(&stream);

        let err = decoder.read_access_unit().unwrap_err();
        assert!(matches!(
            err.cause().downcast_ref::<SyncError>(),
            Some(SyncError::AsiForUnknownLabel(4))
        ));
        assert!(!decoder.is_synced());

        Ok(())
    }

    #[test]
    fn scene_info_spans_substreams() -> Result<()> {
        use crate::structs::asi::AsiDiffFlags;
        use crate::structs::asi::tests::scene;

        // group 0 takes element 0 from label 1 and element 1 from label 2
        let asi = scene(&[(0, &[0, 1])], 1)?;

        let mut stream = MHAS_SYNC_PACKET.to_vec();
        stream.extend(mhas_packet(1, 1, &mono())?);
        stream.extend(mhas_packet(1, 2, &mono())?);
        stream.extend(mhas_packet(3, 1, &asi)?);
        stream.extend(mhas_packet(2, 1, &[1])?);
        stream.extend(mhas_packet(2, 2, &[2])?);
        stream.extend(MHAS_SYNC_PACKET);
        stream.extend(mhas_packet(3, 2, &asi)?);
        stream.extend(mhas_packet(2, 1, &[3])?);
        stream.extend(mhas_packet(2, 2, &[4])?);

        let mut decoder = mhas_decoder().with_scene_info();
        decoder.fill_data(&stream);

        assert_eq!(decoder.read_access_unit()?.frames, 2);
        let scene_info = decoder.scene_info_mut().unwrap();
        assert_eq!(scene_info.groups.len(), 1);
        assert!(scene_info.take_diff_flags().contains(AsiDiffFlags::STRUCTURE));

        // the same scene repeated on label 2 changes nothing
        assert_eq!(decoder.read_access_unit()?.frames, 2);
        let scene_info = decoder.scene_info_mut().unwrap();
        assert!(scene_info.is_duplicate(SubstreamIndex::new(1)?));
        assert!(scene_info.take_diff_flags().is_empty());

        Ok(())
    }

    #[test]
    fn params_and_reset() -> Result<()> {
        let mut decoder = mhas_decoder();
        let err = decoder.set_param(TransportParam::TargetLayout(0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);

        let err = decoder.set_param(TransportParam::ActiveDownmixId(3)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);

        let mut decoder = decoder.with_scene_info();
        decoder.set_param(TransportParam::ActiveDownmixId(3))?;
        assert_eq!(decoder.scene_info().unwrap().active_downmix_id, Some(3));
        assert!(decoder.set_param(TransportParam::ActiveDownmixId(0x80)).is_err());

        decoder.fill_data(EXAMPLE_DATA);
        decoder.read_access_unit()?;
        decoder.set_param(TransportParam::Reset)?;

        assert_eq!(decoder.buffered(), 0);
        assert!(!decoder.is_synced());
        assert!(decoder.config(SubstreamIndex::MAIN).is_some());

        decoder.set_param(TransportParam::ForceConfigChange)?;
        assert!(decoder.cfg_change(SubstreamIndex::MAIN).force_cfg_change);

        Ok(())
    }

    #[test]
    fn checkpoint_restores_state() -> Result<()> {
        let mut decoder = mhas_decoder();
        decoder.fill_data(EXAMPLE_DATA);
        let checkpoint = decoder.checkpoint();

        decoder.read_access_unit()?;
        assert_eq!(decoder.state().access_units, 1);

        decoder.restore(checkpoint.clone());
        assert_eq!(decoder.state().access_units, 0);
        assert_eq!(decoder.checkpoint(), checkpoint);

        Ok(())
    }
}
