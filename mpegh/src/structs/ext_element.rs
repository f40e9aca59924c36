//! Extension element configurations (`mpegh3daExtElementConfig()`).
//!
//! Every extension element carries an explicit byte length. Known types are
//! parsed, unknown types are skipped, and any body that reads fewer bits than
//! declared is padded out to the declared end. Reading past it is an error.

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::callbacks::DrcPayloadKind;
use crate::structs::config::{ConfigContext, SignalGroupType, Signals3d};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::{ConfigError, ExtElementError};

/// Audio object type reported to the DRC callback for MPEG-H 3D audio.
pub const AOT_MPEGH3DA: u8 = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtElementType {
    Fill,
    Mpegs,
    Saoc,
    AudioPreRoll,
    UniDrc,
    ObjectMetadata,
    Saoc3d,
    Hoa,
    FormatConverter,
    Mct,
    Tcc,
    HoaEnhancementLayer,
    Hrep,
    EnhancedObjectMetadata,
    ProductionMetadata,
    Unknown(u32),
}

impl From<u32> for ExtElementType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Fill,
            1 => Self::Mpegs,
            2 => Self::Saoc,
            3 => Self::AudioPreRoll,
            4 => Self::UniDrc,
            5 => Self::ObjectMetadata,
            6 => Self::Saoc3d,
            7 => Self::Hoa,
            8 => Self::FormatConverter,
            9 => Self::Mct,
            10 => Self::Tcc,
            11 => Self::HoaEnhancementLayer,
            12 => Self::Hrep,
            13 => Self::EnhancedObjectMetadata,
            14 => Self::ProductionMetadata,
            other => Self::Unknown(other),
        }
    }
}

impl ExtElementType {
    pub fn value(self) -> u32 {
        match self {
            Self::Fill => 0,
            Self::Mpegs => 1,
            Self::Saoc => 2,
            Self::AudioPreRoll => 3,
            Self::UniDrc => 4,
            Self::ObjectMetadata => 5,
            Self::Saoc3d => 6,
            Self::Hoa => 7,
            Self::FormatConverter => 8,
            Self::Mct => 9,
            Self::Tcc => 10,
            Self::HoaEnhancementLayer => 11,
            Self::Hrep => 12,
            Self::EnhancedObjectMetadata => 13,
            Self::ProductionMetadata => 14,
            Self::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadataConfig {
    pub low_delay_metadata_coding: bool,
    pub has_core_length: bool,
    pub frame_length: usize,
    pub num_objects: usize,
    pub screen_relative_objects: Option<Vec<bool>>,
    pub has_dynamic_object_priority: bool,
    pub has_uniform_spread: bool,
}

impl ObjectMetadataConfig {
    fn read(
        reader: &mut BsIoSliceReader,
        num_objects: usize,
        core_frame_length: usize,
    ) -> Result<Self> {
        let mut oam = Self {
            low_delay_metadata_coding: reader.get()?,
            has_core_length: reader.get()?,
            num_objects,
            ..Default::default()
        };

        oam.frame_length = if oam.has_core_length {
            core_frame_length
        } else {
            (reader.get_n::<u32>(6)? as usize + 1) << 6
        };

        if ![1, 2, 4]
            .iter()
            .any(|div| core_frame_length / div == oam.frame_length)
        {
            bail!(ExtElementError::InvalidObjectFrameLength {
                oam: oam.frame_length,
                core: core_frame_length
            });
        }

        if reader.get()? {
            let mut screen_relative = Vec::with_capacity(num_objects);
            for _ in 0..num_objects {
                screen_relative.push(reader.get()?);
            }
            oam.screen_relative_objects = Some(screen_relative);
        }

        oam.has_dynamic_object_priority = reader.get()?;
        oam.has_uniform_spread = reader.get()?;

        Ok(oam)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MctConfig {
    pub signal_group: usize,
    pub channel_mask: Vec<bool>,
}

impl MctConfig {
    fn read(reader: &mut BsIoSliceReader, signal_group: usize, num_channels: usize) -> Result<Self> {
        let mut channel_mask = Vec::with_capacity(num_channels);
        for _ in 0..num_channels {
            channel_mask.push(reader.get()?);
        }

        Ok(Self {
            signal_group,
            channel_mask,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductionMetadataConfig {
    pub reference_distance: Option<u8>,
    pub has_object_distance: Vec<bool>,
    pub direct_headphone: Vec<bool>,
}

impl ProductionMetadataConfig {
    fn read(reader: &mut BsIoSliceReader, signals: &Signals3d) -> Result<Self> {
        let mut pmc = Self::default();

        if reader.get()? {
            pmc.reference_distance = Some(reader.get_n(7)?);
        }

        for _ in signals.groups_of(SignalGroupType::Object) {
            pmc.has_object_distance.push(reader.get()?);
        }

        for _ in signals.groups_of(SignalGroupType::Channels) {
            pmc.direct_headphone.push(reader.get()?);
        }

        Ok(pmc)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExtElementPayload {
    #[default]
    None,
    AudioPreRoll,
    UniDrc,
    ObjectMetadata(ObjectMetadataConfig),
    Mct(MctConfig),
    ProductionMetadata(ProductionMetadataConfig),
    Skipped,
}

/// Signal group context an extension element is parsed against.
pub struct ExtElementBinding<'s> {
    pub signals: &'s Signals3d,
    pub core_frame_length: usize,
    pub object_group: Option<usize>,
    pub channel_group: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtElementConfig {
    pub ext_type: ExtElementType,
    pub config_length: u32,
    pub default_length: Option<u32>,
    pub payload_frag: bool,
    pub payload: ExtElementPayload,
}

impl ExtElementConfig {
    pub fn read(
        ctx: &mut ConfigContext,
        reader: &mut BsIoSliceReader,
        binding: &ExtElementBinding,
    ) -> Result<Self> {
        let ext_type = ExtElementType::from(reader.get_escaped(4, 8, 16)?);
        let config_length = reader.get_escaped(4, 8, 16)?;

        let default_length = if reader.get()? {
            Some(reader.get_escaped(8, 16, 0)? + 1)
        } else {
            None
        };

        let payload_frag = reader.get()?;

        let declared = (config_length as u64) << 3;
        let available = reader.available()?;
        if declared > available {
            bail!(ExtElementError::NotEnoughBits {
                needed: declared,
                available
            });
        }

        let start = reader.position()?;

        let payload = match ext_type {
            ExtElementType::Fill => ExtElementPayload::None,
            ExtElementType::AudioPreRoll => ExtElementPayload::AudioPreRoll,
            ExtElementType::Hoa | ExtElementType::HoaEnhancementLayer => {
                bail!(ExtElementError::HoaUnsupported)
            }
            ExtElementType::ObjectMetadata => {
                let Some(group) = binding.object_group else {
                    bail!(ConfigError::ObjectMetadataWithoutGroup);
                };
                ExtElementPayload::ObjectMetadata(ObjectMetadataConfig::read(
                    reader,
                    binding.signals.groups[group].num_signals,
                    binding.core_frame_length,
                )?)
            }
            ExtElementType::Mct => match binding.channel_group {
                Some(group) => ExtElementPayload::Mct(MctConfig::read(
                    reader,
                    group,
                    binding.signals.groups[group].num_signals,
                )?),
                None => ExtElementPayload::Skipped,
            },
            ExtElementType::ProductionMetadata => ExtElementPayload::ProductionMetadata(
                ProductionMetadataConfig::read(reader, binding.signals)?,
            ),
            ExtElementType::UniDrc => {
                ctx.uni_drc_seen = true;
                ctx.notify_drc(reader, DrcPayloadKind::UniDrcConfig, config_length)?;
                ExtElementPayload::UniDrc
            }
            other => {
                debug!("skipping extension element config type {}", other.value());
                ExtElementPayload::Skipped
            }
        };

        let consumed = reader.position()? - start;
        if consumed > declared {
            bail!(ExtElementError::Overread {
                ext_type: ext_type.value(),
                declared,
                consumed
            });
        }
        reader.seek((declared - consumed) as i64)?;

        trace!(
            "ext element {:?}: {} bytes, default length {:?}, frag {}",
            ext_type, config_length, default_length, payload_frag
        );

        Ok(Self {
            ext_type,
            config_length,
            default_length,
            payload_frag,
            payload,
        })
    }
}
