use anyhow::{Result, anyhow, bail};
use log::{debug, trace, warn};

use crate::callbacks::{
    ConfigMode, DrcPayloadKind, FramePayload, TransportCallbacks, UniDrcPayload,
};
use crate::process::cfg_change::{BuildUpStatus, FlushStatus, RawCompare, compare_raw};
use crate::process::params::TransportType;
use crate::process::sync::{BUFFER_CAPACITY, TransportDecoder};
use crate::process::{MAX_SUBSTREAMS, SubstreamIndex};
use crate::structs::asi::{AsiContext, AsiDiffFlags};
use crate::structs::config::{AudioSpecificConfig, ConfigContext, ConfigDiff};
use crate::structs::ext_element::AOT_MPEGH3DA;
use crate::structs::packet::{Packet, PacketHeader, PacketType, PacketWalker};
use crate::structs::truncation::AudioTruncation;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::crc::{MHAS_CRC16, MHAS_CRC32};
use crate::utils::errors::{
    CallbackError, ErrorCode, PacketError, SyncError, classify,
};

/// CRC announced by a `PACTYP_CRC16` or `PACTYP_CRC32` packet for the
/// payload of the packet that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCrc {
    Crc16(u16),
    Crc32(u32),
}

/// Packet level state carried from one access unit to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MhasState {
    pub synced: bool,
    pub pending_crc: Option<PendingCrc>,
    /// Truncation waiting for the next frame of each substream.
    pub truncation: [Option<AudioTruncation>; MAX_SUBSTREAMS],
    pub access_units: u64,
    pub packets: u64,
    /// Distance between sync packets in bytes, from `PACTYP_SYNCGAP`.
    pub sync_gap: Option<u32>,
    /// Decoder buffer fullness in bits, from `PACTYP_BUFFERINFO`.
    pub buffer_fullness: Option<u32>,
    /// Offset of the packet that started a flush within the buffered access
    /// unit, with what the packets before it delivered. Parsing resumes
    /// there once the flush is done.
    pub(crate) resume: Option<(usize, AuSummary)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigOutcome {
    Unchanged,
    Applied { structural: bool },
    FlushStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PacketOutcome {
    Continue,
    Flush,
}

/// What one access unit delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AuSummary {
    pub frames: usize,
    pub config_changed: bool,
}

pub(crate) fn failed(callback: &'static str) -> impl FnOnce(anyhow::Error) -> CallbackError {
    move |e| CallbackError::Failed {
        callback,
        reason: format!("{e:#}"),
    }
}

fn read_buffer_fullness(payload: &[u8]) -> Result<Option<u32>> {
    let mut reader = BsIoSliceReader::from_slice(payload);
    if !reader.get()? {
        return Ok(None);
    }

    Ok(Some(reader.get_escaped(15, 24, 32)?))
}

impl<C: TransportCallbacks> TransportDecoder<C> {
    /// Byte length of the access unit at the start of `buf`.
    ///
    /// The unit ends with the frame that completes the set of known labels,
    /// or with the main substream frame when delay is minimised. Fails with
    /// an `UnexpectedEof` error while the unit is incomplete.
    pub(crate) fn access_unit_len(&self, buf: &[u8]) -> Result<usize> {
        let mut known: Vec<u32> = self.labels.iter().flatten().copied().collect();
        let mut seen: Vec<u32> = Vec::with_capacity(MAX_SUBSTREAMS);
        let mut offset = 0;

        loop {
            let data = &buf[offset..];
            if data.is_empty() {
                bail!(insufficient("access unit"));
            }

            let header = PacketHeader::read(&mut BsIoSliceReader::from_slice(data))?;
            if header.packet_len() > BUFFER_CAPACITY {
                bail!(SyncError::PacketTooLong {
                    length: header.length,
                    capacity: BUFFER_CAPACITY
                });
            }
            if header.packet_len() > data.len() {
                bail!(insufficient("packet payload"));
            }

            let payload = &data[header.header_len..header.packet_len()];
            offset += header.packet_len();

            match header.packet_type {
                PacketType::Sync if self.transport_type == TransportType::Mhas => {
                    header.validate_sync(payload)?;
                }
                PacketType::Config => {
                    if !known.contains(&header.label) {
                        known.push(header.label);
                    }
                }
                PacketType::BufferInfo => {
                    let fullness = read_buffer_fullness(payload)?.unwrap_or(0) as u64;
                    let waiting = self.state.access_units == 0
                        && !self.params.ignore_buffer_fullness
                        && buf.len() < BUFFER_CAPACITY;
                    if waiting && ((buf.len() as u64) << 3) < fullness {
                        trace!("waiting for buffer fullness of {fullness} bits");
                        bail!(insufficient("buffer fullness"));
                    }
                }
                PacketType::Frame => {
                    if !seen.contains(&header.label) {
                        seen.push(header.label);
                    }

                    let main = self.labels[SubstreamIndex::MAIN.index()];
                    if self.params.minimize_delay && main == Some(header.label) {
                        return Ok(offset);
                    }
                    if known.iter().all(|label| seen.contains(label)) {
                        return Ok(offset);
                    }
                }
                _ => (),
            }
        }
    }

    /// Runs the packets of one complete access unit, starting after the
    /// packets handled before a flush.
    pub(crate) fn parse_access_unit(&mut self, au: &[u8]) -> Result<(PacketOutcome, AuSummary)> {
        let resume = self.state.resume.take();
        let resumed = resume.is_some();
        let (start, mut summary) = resume.unwrap_or_default();

        for (index, packet) in PacketWalker::new(&au[start..]).enumerate() {
            let packet = packet?;
            if !(resumed && index == 0) {
                self.state.packets += 1;
            }

            let outcome = self
                .check_pending_crc(&packet)
                .and_then(|_| self.handle_packet(&packet, &mut summary))
                .map_err(|e| truncated_payload(e, &packet.header))?;

            if outcome == PacketOutcome::Flush {
                self.state.resume = Some((start + packet.offset, summary));
                return Ok((PacketOutcome::Flush, summary));
            }
        }

        Ok((PacketOutcome::Continue, summary))
    }

    pub(crate) fn check_pending_crc(&mut self, packet: &Packet) -> Result<()> {
        let Some(pending) = self.state.pending_crc.take() else {
            return Ok(());
        };

        let (stored, computed) = match pending {
            PendingCrc::Crc16(stored) => (stored as u32, MHAS_CRC16.checksum(packet.payload) as u32),
            PendingCrc::Crc32(stored) => (stored, MHAS_CRC32.checksum(packet.payload)),
        };

        if stored != computed {
            bail!(PacketError::CrcMismatch {
                packet_type: packet.header.packet_type.value(),
                stored,
                computed
            });
        }

        Ok(())
    }

    pub(crate) fn handle_packet(
        &mut self,
        packet: &Packet,
        summary: &mut AuSummary,
    ) -> Result<PacketOutcome> {
        let header = &packet.header;
        let payload = packet.payload;
        let mut reader = BsIoSliceReader::from_slice(payload);

        trace!(
            "{} label {} length {} at {}",
            header.packet_type, header.label, header.length, packet.offset
        );

        match header.packet_type {
            PacketType::Sync => {
                header.validate_sync(payload)?;
            }
            PacketType::Config => {
                match self.apply_config_packet(header.label, payload, true)? {
                    ConfigOutcome::FlushStarted => return Ok(PacketOutcome::Flush),
                    ConfigOutcome::Applied { structural } => {
                        summary.config_changed |= structural;
                    }
                    ConfigOutcome::Unchanged => (),
                }
            }
            PacketType::SceneInfo => return self.handle_scene_info(header.label, &mut reader),
            PacketType::Frame => {
                self.handle_frame(header.label, payload)?;
                summary.frames += 1;
            }
            PacketType::AudioTruncation => {
                let Some(substream) = self.substream_of(header.label) else {
                    debug!("truncation for unknown label {}", header.label);
                    return Ok(PacketOutcome::Continue);
                };

                let truncation = AudioTruncation::read(&mut reader)?;
                if let Some(config) = &self.configs[substream.index()] {
                    truncation.validate(config.output_frame_length)?;
                }
                if truncation.is_active && !truncation.from_begin {
                    self.cfg_change[substream.index()].truncation_in_progress = true;
                }
                self.state.truncation[substream.index()] = Some(truncation);
            }
            PacketType::Crc16 => {
                if header.length != 2 {
                    bail!(PacketError::InvalidCrcLength {
                        packet_type: header.packet_type.value(),
                        length: header.length
                    });
                }
                self.state.pending_crc = Some(PendingCrc::Crc16(reader.get_n(16)?));
            }
            PacketType::Crc32 => {
                if header.length != 4 {
                    bail!(PacketError::InvalidCrcLength {
                        packet_type: header.packet_type.value(),
                        length: header.length
                    });
                }
                self.state.pending_crc = Some(PendingCrc::Crc32(reader.get_n(32)?));
            }
            PacketType::SyncGap => {
                self.state.sync_gap = Some(reader.get_escaped(16, 24, 24)?);
            }
            PacketType::BufferInfo => {
                self.state.buffer_fullness = read_buffer_fullness(payload)?;
            }
            PacketType::Marker => {
                self.callbacks
                    .marker(payload, header.label)
                    .map_err(failed("marker"))?;
            }
            PacketType::UserInteraction | PacketType::LoudnessDrc => {
                self.callbacks
                    .user_interaction(&mut reader, header.packet_type, header.length)
                    .map_err(failed("user_interaction"))?;
            }
            PacketType::Loudness => {
                let Some(substream) = self.substream_of(header.label) else {
                    debug!("loudness for unknown label {}", header.label);
                    return Ok(PacketOutcome::Continue);
                };

                let drc = UniDrcPayload {
                    kind: DrcPayloadKind::LoudnessInfoSet,
                    byte_len: header.length,
                    substream,
                    start_bit: 0,
                    audio_object_type: AOT_MPEGH3DA,
                };
                self.callbacks
                    .uni_drc(&mut reader, &drc)
                    .map_err(failed("uni_drc"))?;
            }
            PacketType::Earcon | PacketType::PcmConfig | PacketType::PcmData => {
                self.callbacks
                    .earcon(&mut reader, header.packet_type, header.length)
                    .map_err(failed("earcon"))?;
            }
            PacketType::FillData
            | PacketType::Descriptor
            | PacketType::GlobalCrc16
            | PacketType::GlobalCrc32
            | PacketType::GenData => (),
            PacketType::Unknown(value) => debug!("skipping unknown packet type {value}"),
        }

        Ok(PacketOutcome::Continue)
    }

    pub(crate) fn substream_of(&self, label: u32) -> Option<SubstreamIndex> {
        self.labels
            .iter()
            .position(|&l| l == Some(label))
            .and_then(|i| SubstreamIndex::new(i).ok())
    }

    /// Substream slot for a configuration label: its current slot or the
    /// first free one.
    fn slot_for_label(&self, label: u32) -> Result<SubstreamIndex> {
        if let Some(substream) = self.substream_of(label) {
            return Ok(substream);
        }

        match self.labels.iter().position(Option::is_none) {
            Some(index) => SubstreamIndex::new(index),
            None => bail!(PacketError::TooManySubstreams(MAX_SUBSTREAMS)),
        }
    }

    pub(crate) fn apply_config_packet(
        &mut self,
        label: u32,
        raw: &[u8],
        allow_flush: bool,
    ) -> Result<ConfigOutcome> {
        let substream = self.slot_for_label(label)?;
        let outcome = self.accept_config(substream, raw, allow_flush)?;

        if outcome != ConfigOutcome::FlushStarted {
            self.labels[substream.index()] = Some(label);
        }

        Ok(outcome)
    }

    /// Accepts a configuration payload for `substream`.
    ///
    /// A payload identical to the stored one is not parsed again. A payload
    /// that only differs in its loudness information is handed to the DRC
    /// callback. Anything else is parsed once without side effects to
    /// classify the change, then parsed again with callbacks and scene
    /// information attached.
    pub(crate) fn accept_config(
        &mut self,
        substream: SubstreamIndex,
        raw: &[u8],
        allow_flush: bool,
    ) -> Result<ConfigOutcome> {
        let index = substream.index();
        let force = self.cfg_change[index].force_cfg_change;

        let stored = self.configs[index].as_ref().filter(|_| !force);
        if let Some(current) = stored {
            let loudness = current.loudness_region();
            match compare_raw(&self.raw_configs[index], raw, loudness) {
                RawCompare::Identical => {
                    self.unchanged_config(substream)?;
                    return Ok(ConfigOutcome::Unchanged);
                }
                RawCompare::LoudnessOnly => {
                    if let Some(region) = loudness {
                        self.redeliver_loudness(substream, raw, region)?;
                    }
                    self.raw_configs[index] = raw.to_vec();
                    self.unchanged_config(substream)?;
                    return Ok(ConfigOutcome::Unchanged);
                }
                RawCompare::Different => (),
            }
        }

        let candidate = {
            let mut ctx = ConfigContext::new(substream, self.params.fail_level);
            ctx.target_layout = self.params.target_layout;
            AudioSpecificConfig::read(&mut ctx, &mut BsIoSliceReader::from_slice(raw))?
        };

        let diff = match &self.configs[index] {
            Some(_) if force => ConfigDiff::ConfigChanged,
            Some(current) => candidate.diff(current),
            None => ConfigDiff::ConfigChanged,
        };
        let first = self.configs[index].is_none();

        if !first && diff == ConfigDiff::Identical {
            self.raw_configs[index] = raw.to_vec();
            self.unchanged_config(substream)?;
            return Ok(ConfigOutcome::Unchanged);
        }

        if allow_flush
            && !first
            && diff == ConfigDiff::ConfigChanged
            && !self.cfg_change[index].flush_done
        {
            debug!("{substream}: configuration changed, flushing");
            self.start_flush(substream, FlushStatus::On)?;
            return Ok(ConfigOutcome::FlushStarted);
        }

        let config = {
            let mut ctx = ConfigContext::new(substream, self.params.fail_level)
                .with_callbacks(&mut self.callbacks)
                .with_asi(self.asi.as_mut());
            ctx.target_layout = self.params.target_layout;
            AudioSpecificConfig::read(&mut ctx, &mut BsIoSliceReader::from_slice(raw))?
        };

        match &self.configs[index] {
            None => {
                self.callbacks
                    .update_config(&config, ConfigMode::Alloc, substream)
                    .map_err(failed("update_config"))?;
            }
            Some(old) => {
                let realloc = self
                    .callbacks
                    .update_config(&config, ConfigMode::Detect, substream)
                    .map_err(failed("update_config"))?;
                if realloc {
                    self.callbacks
                        .free_mem(old, substream)
                        .map_err(failed("free_mem"))?;
                    self.callbacks
                        .update_config(&config, ConfigMode::Alloc, substream)
                        .map_err(failed("update_config"))?;
                }
            }
        }

        let structural = diff == ConfigDiff::ConfigChanged;
        if structural {
            self.cfg_change[index].config_applied(config.has_audio_preroll());
        } else {
            self.cfg_change[index].content_change = true;
            self.cfg_change[index].truncation_in_progress = false;
        }
        self.notify_cfg_change(substream)?;

        debug!(
            "{substream}: configuration {} ({} Hz, {} channels)",
            if first { "applied" } else { "updated" },
            config.sampling_frequency,
            config.num_channels()
        );

        self.configs[index] = Some(config);
        self.raw_configs[index] = raw.to_vec();

        Ok(ConfigOutcome::Applied { structural })
    }

    /// A configuration following an active truncation counts as a content
    /// change even when it repeats the stored one.
    fn unchanged_config(&mut self, substream: SubstreamIndex) -> Result<()> {
        let control = &mut self.cfg_change[substream.index()];
        if !control.truncation_in_progress {
            return Ok(());
        }

        debug!("{substream}: configuration after truncation, content change");
        control.truncation_in_progress = false;
        control.content_change = true;
        self.notify_cfg_change(substream)
    }

    fn redeliver_loudness(
        &mut self,
        substream: SubstreamIndex,
        raw: &[u8],
        (offset, length): (u64, u64),
    ) -> Result<()> {
        trace!("{substream}: loudness information changed");

        let mut reader = BsIoSliceReader::from_slice(raw);
        reader.seek_to(offset)?;

        let payload = UniDrcPayload {
            kind: DrcPayloadKind::LoudnessInfoSet,
            byte_len: (length >> 3) as u32,
            substream,
            start_bit: offset,
            audio_object_type: AOT_MPEGH3DA,
        };

        self.callbacks
            .uni_drc(&mut reader, &payload)
            .map_err(failed("uni_drc"))?;

        Ok(())
    }

    pub(crate) fn start_flush(&mut self, substream: SubstreamIndex, status: FlushStatus) -> Result<()> {
        let index = substream.index();
        self.cfg_change[index].start_flush(status);

        if !self.cfg_change[index].truncation_notified {
            if let Some(truncation) = self.state.truncation[index].filter(|t| t.is_active) {
                self.callbacks
                    .truncation(truncation.samples, truncation.from_begin, substream)
                    .map_err(failed("truncation"))?;
            }
            self.cfg_change[index].truncation_notified = true;
        }

        self.notify_cfg_change(substream)
    }

    pub(crate) fn notify_cfg_change(&mut self, substream: SubstreamIndex) -> Result<()> {
        let control = self.cfg_change[substream.index()];
        self.callbacks
            .control_cfg_change(&control, substream)
            .map_err(failed("control_cfg_change"))?;

        Ok(())
    }

    fn handle_scene_info(
        &mut self,
        label: u32,
        reader: &mut BsIoSliceReader,
    ) -> Result<PacketOutcome> {
        let substream = self
            .substream_of(label)
            .ok_or(SyncError::AsiForUnknownLabel(label))?;
        let index = substream.index();

        let Some(asi) = self.asi.as_mut() else {
            return Ok(PacketOutcome::Continue);
        };
        let Some(config) = &self.configs[index] else {
            bail!(SyncError::AsiForUnknownLabel(label));
        };

        // groups of the main stream may refer to elements of any substream
        // whose configuration is known
        let ctx = AsiContext {
            substream,
            max_element_ids: self
                .configs
                .iter()
                .flatten()
                .map(AudioSpecificConfig::max_element_ids)
                .sum(),
            fail_level: self.params.fail_level,
        };

        let was_received = asi.substreams[index].received;
        let prior = asi.take_diff_flags();
        let result = asi.read(&ctx, reader);
        let fresh = asi.diff_flags;
        asi.diff_flags |= prior;
        result?;

        if let Err(group) = asi.check(&config.signals.groups) {
            asi.reset();
            bail!(SyncError::InconsistentAsi(group));
        }

        if asi.is_duplicate(substream) {
            trace!("{substream}: scene information duplicates another substream");
            asi.diff_flags = prior;
            return Ok(PacketOutcome::Continue);
        }

        let skip = self.params.element_skipping
            && was_received
            && fresh.contains(AsiDiffFlags::ELEMENT_ID);
        if skip && !self.cfg_change[index].flush_done {
            debug!("{substream}: element IDs remapped, flushing");
            self.start_flush(substream, FlushStatus::ElementSkip)?;
            return Ok(PacketOutcome::Flush);
        }

        Ok(PacketOutcome::Continue)
    }

    fn handle_frame(&mut self, label: u32, payload: &[u8]) -> Result<()> {
        let Some(substream) = self.substream_of(label) else {
            bail!(PacketError::UnknownLabel(label));
        };
        let index = substream.index();

        let truncation = self.state.truncation[index].take();
        let from_begin = truncation.is_some_and(|t| t.is_active && t.from_begin);
        if from_begin && self.cfg_change[index].build_up == BuildUpStatus::Idle {
            self.cfg_change[index].build_up = BuildUpStatus::IdleInBand;
        }

        if self.cfg_change[index].step_build_up() {
            self.notify_cfg_change(substream)?;
        }

        let frame = FramePayload {
            substream,
            label,
            data: payload,
            truncation,
        };
        self.callbacks
            .decode_frame(&frame)
            .map_err(failed("decode_frame"))?;
        self.cfg_change[index].content_change = false;

        Ok(())
    }
}

fn insufficient(what: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("{what}: more data needed"),
    )
}

/// A complete packet cannot run out of bits. Reports such failures against
/// the packet instead of asking for more data.
fn truncated_payload(e: anyhow::Error, header: &PacketHeader) -> anyhow::Error {
    if classify(&e) != ErrorCode::NotEnoughBits {
        return e;
    }

    warn!("{} payload too short: {e:#}", header.packet_type);
    anyhow!(PacketError::PayloadTruncated {
        packet_type: header.packet_type.value(),
        length: header.length
    })
}
