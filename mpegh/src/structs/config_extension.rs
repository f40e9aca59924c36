//! Configuration extensions (`mpegh3daConfigExtension()`).
//!
//! Each extension carries its own byte length. Payloads for the downmix
//! matrix and the loudness information are delegated to the consumer; the
//! scene information goes into the externally owned [`AudioSceneInfo`].
//!
//! [`AudioSceneInfo`]: crate::structs::asi::AudioSceneInfo

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::callbacks::{DownmixContext, DrcPayloadKind};
use crate::structs::asi::AsiContext;
use crate::structs::config::{ConfigContext, Signals3d};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::crc::MHAS_CRC16;
use crate::utils::errors::{AsiError, CallbackError, ConfigExtensionError};

pub const FILL_BYTE: u8 = 0xA5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigExtType {
    Fill,
    Downmix,
    LoudnessInfo,
    AudioSceneInfo,
    HoaMatrix,
    Icg,
    SignalGroupInfo,
    CompatibleProfileLevelSet,
    Unknown(u32),
}

impl From<u32> for ConfigExtType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Fill,
            1 => Self::Downmix,
            2 => Self::LoudnessInfo,
            3 => Self::AudioSceneInfo,
            4 => Self::HoaMatrix,
            5 => Self::Icg,
            6 => Self::SignalGroupInfo,
            7 => Self::CompatibleProfileLevelSet,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownmixConfig {
    pub downmix_config_type: u8,
    pub passive_downmix: Option<bool>,
    pub phase_align_strength: u8,
    pub immersive_downmix: bool,
}

impl DownmixConfig {
    fn read(ctx: &mut ConfigContext, reader: &mut BsIoSliceReader, end: u64) -> Result<Self> {
        let mut dmx = Self {
            downmix_config_type: reader.get_n(2)?,
            ..Default::default()
        };

        if matches!(dmx.downmix_config_type, 0 | 2) {
            let passive = reader.get()?;
            if !passive {
                dmx.phase_align_strength = reader.get_n(3)?;
            }
            dmx.passive_downmix = Some(passive);
            dmx.immersive_downmix = reader.get()?;
        }

        if matches!(dmx.downmix_config_type, 1 | 2) {
            let remaining = end.saturating_sub(reader.position()?);
            let context = DownmixContext {
                substream: ctx.substream,
                downmix_config_type: dmx.downmix_config_type,
                byte_len: (remaining >> 3) as u32,
                target_layout: ctx.target_layout,
            };

            if let Some(callbacks) = ctx.callbacks.as_deref_mut() {
                callbacks
                    .downmix_matrix(reader, &context)
                    .map_err(|e| CallbackError::Failed {
                        callback: "downmix_matrix",
                        reason: format!("{e:#}"),
                    })?;
            }
        }

        Ok(dmx)
    }
}

/// Fingerprint of one extension payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigExtEntry {
    pub ext_type: ConfigExtType,
    pub length: u32,
    pub crc: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigExtension {
    pub entries: Vec<ConfigExtEntry>,
    pub downmix: Option<DownmixConfig>,
    /// (offset, length) in bits relative to the configuration start.
    pub loudness_region: Option<(u64, u64)>,
    pub has_scene_info: bool,
    pub compatible_profile_levels: Vec<u8>,
}

impl ConfigExtension {
    pub fn read(
        ctx: &mut ConfigContext,
        reader: &mut BsIoSliceReader,
        signals: &Signals3d,
    ) -> Result<Self> {
        let num_extensions = reader.get_escaped(2, 4, 8)? + 1;
        let mut ext = Self::default();
        let mut seen = 0u32;

        for _ in 0..num_extensions {
            let ext_type = ConfigExtType::from(reader.get_escaped(4, 8, 16)?);
            let length = reader.get_escaped(4, 8, 16)?;

            if let Some(bit) = seen_bit(ext_type) {
                if seen & bit != 0 {
                    bail!(ConfigExtensionError::Duplicate(type_value(ext_type)));
                }
                seen |= bit;
            }

            let declared = (length as u64) << 3;
            let available = reader.available()?;
            if declared > available {
                bail!(ConfigExtensionError::NotEnoughBits {
                    needed: declared,
                    available
                });
            }

            let start = reader.position()?;
            let end = start + declared;
            let crc = reader.crc16_check(&MHAS_CRC16, start, declared)?;

            match ext_type {
                ConfigExtType::Fill => {
                    for _ in 0..length {
                        let byte = reader.get_n::<u8>(8)?;
                        if byte != FILL_BYTE {
                            bail!(ConfigExtensionError::InvalidFill(byte));
                        }
                    }
                }
                ConfigExtType::Downmix => {
                    ctx.downmix_seen = true;
                    ext.downmix = Some(DownmixConfig::read(ctx, reader, end)?);
                }
                ConfigExtType::LoudnessInfo => {
                    ctx.loudness_seen = true;
                    ext.loudness_region = Some((start - ctx.config_start, declared));
                    ctx.notify_drc(reader, DrcPayloadKind::LoudnessInfoSet, length)?;
                }
                ConfigExtType::AudioSceneInfo => {
                    ext.has_scene_info = true;
                    let asi_ctx = AsiContext {
                        substream: ctx.substream,
                        max_element_ids: signals.total_signals(),
                        fail_level: ctx.fail_level,
                    };

                    if let Some(asi) = ctx.asi.as_deref_mut() {
                        asi.read(&asi_ctx, reader)?;
                        if let Err(group) = asi.check(&signals.groups) {
                            asi.reset();
                            bail!(AsiError::Inconsistent(group));
                        }
                    }
                }
                ConfigExtType::HoaMatrix | ConfigExtType::Icg => (),
                ConfigExtType::SignalGroupInfo => {
                    for (index, _) in signals.groups.iter().enumerate() {
                        let priority = reader.get_n::<u8>(3)?;
                        let fixed_position = reader.get()?;
                        trace!(
                            "signal group {index}: priority {priority}, fixed position {fixed_position}"
                        );
                    }
                }
                ConfigExtType::CompatibleProfileLevelSet => {
                    let num_sets = reader.get_n::<u32>(4)? as usize + 1;
                    // reserved
                    reader.skip_n(4)?;
                    for _ in 0..num_sets {
                        ext.compatible_profile_levels.push(reader.get_n(8)?);
                    }
                }
                ConfigExtType::Unknown(value) => {
                    debug!("skipping unknown config extension type {value}");
                }
            }

            let consumed = reader.position()? - start;
            if consumed > declared {
                bail!(ConfigExtensionError::Overread {
                    ext_type: type_value(ext_type),
                    declared,
                    consumed
                });
            }
            reader.seek((declared - consumed) as i64)?;

            ext.entries.push(ConfigExtEntry {
                ext_type,
                length,
                crc,
            });
        }

        trace!("config extension: {:?}", ext.entries);

        Ok(ext)
    }

    pub fn has(&self, ext_type: ConfigExtType) -> bool {
        self.entries.iter().any(|e| e.ext_type == ext_type)
    }
}

fn type_value(ext_type: ConfigExtType) -> u32 {
    match ext_type {
        ConfigExtType::Fill => 0,
        ConfigExtType::Downmix => 1,
        ConfigExtType::LoudnessInfo => 2,
        ConfigExtType::AudioSceneInfo => 3,
        ConfigExtType::HoaMatrix => 4,
        ConfigExtType::Icg => 5,
        ConfigExtType::SignalGroupInfo => 6,
        ConfigExtType::CompatibleProfileLevelSet => 7,
        ConfigExtType::Unknown(other) => other,
    }
}

fn seen_bit(ext_type: ConfigExtType) -> Option<u32> {
    match type_value(ext_type) {
        0 => None,
        value if value < 32 => Some(1 << value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::SubstreamIndex;
    use crate::utils::test_stream::TestStream;

    fn read(buf: &[u8]) -> anyhow::Result<ConfigExtension> {
        let mut ctx = ConfigContext::new(SubstreamIndex::MAIN, log::Level::Error);
        ConfigExtension::read(
            &mut ctx,
            &mut BsIoSliceReader::from_slice(buf),
            &Signals3d::default(),
        )
    }

    #[test]
    fn fill_and_profile_levels() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.escaped(2, 4, 8, 1)?; // two extensions
        ts.escaped(4, 8, 16, 0)?.escaped(4, 8, 16, 2)?.bytes(&[0xA5, 0xA5])?;
        ts.escaped(4, 8, 16, 7)?.escaped(4, 8, 16, 3)?;
        ts.put(4, 1)?.put(4, 0)?.put(8, 0x0B)?.put(8, 0x0C)?;
        let buf = ts.finish()?;

        let ext = read(&buf)?;
        assert_eq!(ext.entries.len(), 2);
        assert_eq!(ext.compatible_profile_levels, vec![0x0B, 0x0C]);

        Ok(())
    }

    #[test]
    fn invalid_fill() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.escaped(2, 4, 8, 0)?;
        ts.escaped(4, 8, 16, 0)?.escaped(4, 8, 16, 1)?.bytes(&[0x00])?;
        let buf = ts.finish()?;

        let err = read(&buf).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigExtensionError>(),
            Some(ConfigExtensionError::InvalidFill(0))
        ));

        Ok(())
    }

    #[test]
    fn duplicate_extension() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.escaped(2, 4, 8, 1)?;
        for _ in 0..2 {
            ts.escaped(4, 8, 16, 5)?.escaped(4, 8, 16, 1)?.bytes(&[0])?;
        }
        let buf = ts.finish()?;

        let err = read(&buf).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigExtensionError>(),
            Some(ConfigExtensionError::Duplicate(5))
        ));

        Ok(())
    }

    #[test]
    fn length_beyond_payload() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.escaped(2, 4, 8, 0)?;
        ts.escaped(4, 8, 16, 9)?.escaped(4, 8, 16, 12)?.bytes(&[0; 4])?;
        let buf = ts.finish()?;

        let err = read(&buf).unwrap_err();
        assert_eq!(
            crate::utils::errors::classify(&err),
            crate::utils::errors::ErrorCode::NotEnoughBits
        );

        Ok(())
    }
}
