//! Decoder configuration (`mpegh3daConfig()`).
//!
//! ## Layout
//!
//! - **Header**: profile/level, sampling frequency, core frame length.
//! - **Reference layout**: the production loudspeaker layout.
//! - **Signals**: signal groups (channels, objects, SAOC, HOA).
//! - **Decoder configuration**: per-element core coder setup.
//! - **Extensions**: downmix, loudness, scene information and friends.
//!
//! Only the non-SBR core frame lengths of 768 and 1024 samples are supported.

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::callbacks::{DrcPayloadKind, TransportCallbacks, UniDrcPayload};
use crate::process::SubstreamIndex;
use crate::structs::asi::AudioSceneInfo;
use crate::structs::config_extension::ConfigExtension;
use crate::structs::decoder_config::DecoderConfig;
use crate::structs::ext_element::AOT_MPEGH3DA;
use crate::structs::speaker::SpeakerLayout;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::{CallbackError, ConfigError};

/// Escape index announcing an explicit 24-bit sampling frequency.
pub const SAMPLING_FREQUENCY_ESCAPE: u8 = 0x1F;

/// Maximum number of coded signals over all signal groups.
pub const MAX_SIGNALS: usize = 64;

/// `bsNumSignalGroups` is a 5-bit field plus one.
pub const MAX_SIGNAL_GROUPS: usize = 32;

#[rustfmt::skip]
const SAMPLING_FREQUENCIES: [u32; 31] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050,
    16000, 12000, 11025, 8000, 7350, 0, 0, 57600,
    51200, 40000, 38400, 34150, 28800, 25600, 20000, 19200,
    17075, 14400, 12800, 9600, 0, 0, 0,
];

/// Resolves a sampling frequency index to Hz; reserved indices yield `None`.
pub fn sampling_frequency_from_index(index: u8) -> Option<u32> {
    SAMPLING_FREQUENCIES
        .get(index as usize)
        .copied()
        .filter(|&f| f != 0)
}

/// State shared by all parsers of one configuration.
///
/// In detection passes `callbacks` and `asi` are `None` and payloads that
/// would be delegated are skipped instead.
pub struct ConfigContext<'a> {
    pub fail_level: log::Level,
    pub substream: SubstreamIndex,
    pub callbacks: Option<&'a mut dyn TransportCallbacks>,
    pub asi: Option<&'a mut AudioSceneInfo>,
    pub target_layout: Option<u8>,
    pub uni_drc_seen: bool,
    pub loudness_seen: bool,
    pub downmix_seen: bool,
    /// Bit position of the first configuration bit in the reader.
    pub config_start: u64,
}

impl<'a> ConfigContext<'a> {
    pub fn new(substream: SubstreamIndex, fail_level: log::Level) -> Self {
        Self {
            fail_level,
            substream,
            callbacks: None,
            asi: None,
            target_layout: None,
            uni_drc_seen: false,
            loudness_seen: false,
            downmix_seen: false,
            config_start: 0,
        }
    }

    pub fn with_callbacks(mut self, callbacks: &'a mut dyn TransportCallbacks) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn with_asi(mut self, asi: Option<&'a mut AudioSceneInfo>) -> Self {
        self.asi = asi;
        self
    }

    pub fn is_detection(&self) -> bool {
        self.callbacks.is_none()
    }

    /// Hands a DRC related payload starting at the reader position to the
    /// DRC callback. Does nothing during detection.
    pub fn notify_drc(
        &mut self,
        reader: &mut BsIoSliceReader,
        kind: DrcPayloadKind,
        byte_len: u32,
    ) -> Result<()> {
        let Some(callbacks) = self.callbacks.as_deref_mut() else {
            return Ok(());
        };

        let payload = UniDrcPayload {
            kind,
            byte_len,
            substream: self.substream,
            start_bit: reader.position()?,
            audio_object_type: AOT_MPEGH3DA,
        };

        callbacks
            .uni_drc(reader, &payload)
            .map_err(|e| CallbackError::Failed {
                callback: "uni_drc",
                reason: format!("{e:#}"),
            })?;

        Ok(())
    }
}

/// Signal group types, in the order groups must appear in `Signals3d()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SignalGroupType {
    Channels,
    Object,
    Saoc,
    Hoa,
}

impl SignalGroupType {
    fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        Ok(match reader.get_n::<u8>(3)? {
            0 => Self::Channels,
            1 => Self::Object,
            2 => Self::Saoc,
            3 => Self::Hoa,
            reserved => bail!(ConfigError::ReservedSignalGroupType(reserved)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupLayout {
    /// The group uses the reference layout.
    Reference,
    Explicit(SpeakerLayout),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalGroup {
    pub group_type: SignalGroupType,
    pub first_signal: usize,
    pub num_signals: usize,
    /// Only channel groups carry a layout.
    pub layout: Option<GroupLayout>,
}

impl SignalGroup {
    pub fn signals(&self) -> std::ops::Range<usize> {
        self.first_signal..self.first_signal + self.num_signals
    }
}

/// Decoded `Signals3d()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signals3d {
    pub groups: Vec<SignalGroup>,
    pub num_audio_channels: usize,
    pub num_audio_objects: usize,
    pub num_saoc_transport_channels: usize,
    pub num_hoa_transport_channels: usize,
}

impl Signals3d {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let num_groups = reader.get_n::<u32>(5)? as usize + 1;
        let mut signals = Self::default();
        let mut first_signal = 0;

        for index in 0..num_groups {
            let group_type = SignalGroupType::read(reader)?;
            if signals
                .groups
                .last()
                .is_some_and(|previous| previous.group_type > group_type)
            {
                bail!(ConfigError::SignalGroupOrder(index));
            }
            let num_signals = reader.get_escaped(5, 8, 16)? as usize + 1;

            let layout = if group_type == SignalGroupType::Channels {
                if reader.get()? {
                    Some(GroupLayout::Explicit(SpeakerLayout::read(reader)?))
                } else {
                    Some(GroupLayout::Reference)
                }
            } else {
                None
            };

            match group_type {
                SignalGroupType::Channels => signals.num_audio_channels += num_signals,
                SignalGroupType::Object => signals.num_audio_objects += num_signals,
                SignalGroupType::Saoc => signals.num_saoc_transport_channels += num_signals,
                SignalGroupType::Hoa => signals.num_hoa_transport_channels += num_signals,
            }

            signals.groups.push(SignalGroup {
                group_type,
                first_signal,
                num_signals,
                layout,
            });

            first_signal += num_signals;
            if first_signal > MAX_SIGNALS {
                bail!(ConfigError::TooManySignals {
                    count: first_signal,
                    max: MAX_SIGNALS
                });
            }
        }

        trace!(
            "signals: {} groups, {} channels, {} objects, {} saoc, {} hoa",
            signals.groups.len(),
            signals.num_audio_channels,
            signals.num_audio_objects,
            signals.num_saoc_transport_channels,
            signals.num_hoa_transport_channels
        );

        Ok(signals)
    }

    pub fn total_signals(&self) -> usize {
        self.groups.iter().map(|g| g.num_signals).sum()
    }

    pub fn groups_of(&self, group_type: SignalGroupType) -> impl Iterator<Item = &SignalGroup> {
        self.groups.iter().filter(move |g| g.group_type == group_type)
    }

    /// Signal group holding the given signal index.
    pub fn group_of_signal(&self, signal: usize) -> Option<usize> {
        self.groups.iter().position(|g| g.signals().contains(&signal))
    }
}

/// Result of comparing a configuration against the one in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDiff {
    Identical,
    /// Only the extensions changed; no reallocation is implied.
    ContentChanged,
    /// The decoder has to be flushed and reconfigured.
    ConfigChanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub profile_level_indication: u8,
    pub sampling_frequency_index: u8,
    pub sampling_frequency: u32,
    pub core_sbr_frame_length_index: u8,
    pub output_frame_length: usize,
    pub core_frame_length: usize,
    pub receiver_delay_compensation: bool,
    pub reference_layout: SpeakerLayout,
    pub signals: Signals3d,
    pub decoder_config: DecoderConfig,
    pub config_extension: Option<ConfigExtension>,
}

impl AudioSpecificConfig {
    pub fn read(ctx: &mut ConfigContext, reader: &mut BsIoSliceReader) -> Result<Self> {
        ctx.config_start = reader.position()?;

        let mut asc = Self {
            profile_level_indication: reader.get_n(8)?,
            sampling_frequency_index: reader.get_n(5)?,
            ..Default::default()
        };

        asc.sampling_frequency = if asc.sampling_frequency_index == SAMPLING_FREQUENCY_ESCAPE {
            let frequency = reader.get_n(24)?;
            if frequency == 0 {
                bail!(ConfigError::ZeroSamplingFrequency);
            }
            frequency
        } else {
            match sampling_frequency_from_index(asc.sampling_frequency_index) {
                Some(frequency) => frequency,
                None => bail!(ConfigError::ReservedSamplingFrequencyIndex(
                    asc.sampling_frequency_index
                )),
            }
        };

        asc.core_sbr_frame_length_index = reader.get_n(3)?;
        asc.output_frame_length = match asc.core_sbr_frame_length_index {
            0 => 768,
            1 => 1024,
            index => bail!(ConfigError::UnsupportedCoreSbrFrameLength(index)),
        };
        asc.core_frame_length = asc.output_frame_length;

        // cfg_reserved
        reader.skip_n(1)?;
        asc.receiver_delay_compensation = reader.get()?;

        asc.reference_layout = SpeakerLayout::read(reader)?;
        asc.signals = Signals3d::read(reader)?;
        asc.decoder_config =
            DecoderConfig::read(ctx, reader, &asc.signals, asc.core_frame_length)?;

        if reader.get()? {
            asc.config_extension = Some(ConfigExtension::read(ctx, reader, &asc.signals)?);
        }

        if !ctx.uni_drc_seen {
            ctx.notify_drc(reader, DrcPayloadKind::UniDrcConfig, 0)?;
        }
        if !ctx.loudness_seen {
            ctx.notify_drc(reader, DrcPayloadKind::LoudnessInfoSet, 0)?;
        }
        if !ctx.downmix_seen {
            ctx.notify_drc(reader, DrcPayloadKind::DownmixClear, 0)?;
        }

        debug!(
            "config: profile {:#04x}, {} Hz, frame {}, {} signals in {} groups, {} elements",
            asc.profile_level_indication,
            asc.sampling_frequency,
            asc.output_frame_length,
            asc.signals.total_signals(),
            asc.signals.groups.len(),
            asc.decoder_config.elements.len()
        );

        Ok(asc)
    }

    /// Compares `self` (the candidate) with the configuration in use.
    pub fn diff(&self, current: &Self) -> ConfigDiff {
        let structural = self.profile_level_indication != current.profile_level_indication
            || self.sampling_frequency != current.sampling_frequency
            || self.core_sbr_frame_length_index != current.core_sbr_frame_length_index
            || self.receiver_delay_compensation != current.receiver_delay_compensation
            || self.reference_layout != current.reference_layout
            || self.signals != current.signals
            || self.decoder_config != current.decoder_config;

        if structural {
            ConfigDiff::ConfigChanged
        } else if self.config_extension != current.config_extension {
            ConfigDiff::ContentChanged
        } else {
            ConfigDiff::Identical
        }
    }

    pub fn num_channels(&self) -> usize {
        self.signals.total_signals()
    }

    /// Number of metadata element IDs addressable by the scene information.
    pub fn max_element_ids(&self) -> usize {
        self.signals.total_signals()
    }

    /// Bit region of the loudness information set, relative to the start of
    /// the configuration.
    pub fn loudness_region(&self) -> Option<(u64, u64)> {
        self.config_extension
            .as_ref()
            .and_then(|ext| ext.loudness_region)
    }

    pub fn has_audio_preroll(&self) -> bool {
        self.decoder_config.has_audio_preroll()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::test_stream::TestStream;

    /// Minimal mono configuration: 48 kHz, 1024 samples, one SCE.
    pub fn mono_config(ts: &mut TestStream) -> std::io::Result<()> {
        mono_core(ts)?;
        ts.flag(false)?; // no config extension

        Ok(())
    }

    /// Mono configuration carrying a loudness information extension.
    pub fn mono_config_with_loudness(ts: &mut TestStream, loudness: &[u8]) -> std::io::Result<()> {
        mono_core(ts)?;
        ts.flag(true)?.escaped(2, 4, 8, 0)?;
        ts.escaped(4, 8, 16, 2)?
            .escaped(4, 8, 16, loudness.len() as u32)?
            .bytes(loudness)?;

        Ok(())
    }

    fn mono_core(ts: &mut TestStream) -> std::io::Result<()> {
        ts.put(8, 0x0B)?; // profile/level
        ts.put(5, 3)?; // 48 kHz
        ts.put(3, 1)?; // 1024, no SBR
        ts.put(1, 0)?.put(1, 0)?;
        ts.put(2, 0)?.put(6, 1)?; // reference layout: CICP 1
        ts.put(5, 0)?; // one signal group
        ts.put(3, 0)?.escaped(5, 8, 16, 0)?.flag(false)?; // one channel, reference layout
        ts.escaped(4, 8, 16, 0)?; // one element
        ts.flag(false)?; // no element lengths
        ts.put(2, 0)?; // SCE
        ts.put(4, 0)?; // tw_mdct, fullband_lpd, noise_filling, enhanced_noise_filling

        Ok(())
    }

    #[test]
    fn mono() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        mono_config(&mut ts)?;
        let buf = ts.finish()?;

        let mut ctx = ConfigContext::new(SubstreamIndex::MAIN, log::Level::Error);
        let asc = AudioSpecificConfig::read(&mut ctx, &mut BsIoSliceReader::from_slice(&buf))?;

        assert_eq!(asc.sampling_frequency, 48000);
        assert_eq!(asc.output_frame_length, 1024);
        assert_eq!(asc.num_channels(), 1);
        assert_eq!(asc.reference_layout.cicp_layout_index, Some(1));
        assert_eq!(asc.decoder_config.elements.len(), 1);
        assert_eq!(asc.diff(&asc.clone()), ConfigDiff::Identical);

        Ok(())
    }

    #[test]
    fn explicit_sampling_frequency() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.put(8, 0x0B)?.put(5, 0x1F)?.put(24, 0)?;
        let buf = ts.finish()?;

        let mut ctx = ConfigContext::new(SubstreamIndex::MAIN, log::Level::Error);
        let err =
            AudioSpecificConfig::read(&mut ctx, &mut BsIoSliceReader::from_slice(&buf)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ZeroSamplingFrequency)
        ));

        Ok(())
    }

    #[test]
    fn sbr_frame_length_unsupported() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.put(8, 0x0B)?.put(5, 3)?.put(3, 2)?;
        ts.put(16, 0)?;
        let buf = ts.finish()?;

        let mut ctx = ConfigContext::new(SubstreamIndex::MAIN, log::Level::Error);
        let err =
            AudioSpecificConfig::read(&mut ctx, &mut BsIoSliceReader::from_slice(&buf)).unwrap_err();
        assert_eq!(
            crate::utils::errors::classify(&err),
            crate::utils::errors::ErrorCode::UnsupportedFormat
        );

        Ok(())
    }

    #[test]
    fn signal_groups_in_type_order() -> anyhow::Result<()> {
        let read = |types: &[u32]| -> anyhow::Result<anyhow::Result<Signals3d>> {
            let mut ts = TestStream::new();
            ts.put(5, types.len() as u32 - 1)?;
            for &group_type in types {
                ts.put(3, group_type)?.escaped(5, 8, 16, 1)?;
                if group_type == 0 {
                    ts.flag(false)?;
                }
            }
            let buf = ts.finish()?;
            Ok(Signals3d::read(&mut BsIoSliceReader::from_slice(&buf)))
        };

        let signals = read(&[0, 0, 1, 3])??;
        assert_eq!(signals.num_audio_channels, 4);
        assert_eq!(signals.num_audio_objects, 2);
        assert_eq!(signals.num_hoa_transport_channels, 2);
        assert_eq!(signals.group_of_signal(4), Some(2));

        let err = read(&[1, 0])?.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::SignalGroupOrder(1))
        ));

        Ok(())
    }

    #[test]
    fn sampling_frequency_table() {
        assert_eq!(sampling_frequency_from_index(3), Some(48000));
        assert_eq!(sampling_frequency_from_index(15), Some(57600));
        assert_eq!(sampling_frequency_from_index(13), None);
        assert_eq!(sampling_frequency_from_index(28), None);
    }
}
