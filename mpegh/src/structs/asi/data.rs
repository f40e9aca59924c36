//! Scene data blocks carried in `mae_Data()`.
//!
//! Each block is introduced by a 4-bit type and a 16-bit byte length.

use anyhow::{Result, bail};
use log::debug;

use crate::structs::asi::group::{GroupPreset, PresetCondition};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::AsiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    GroupDescription,
    SwitchGroupDescription,
    ContentData,
    CompositePair,
    ScreenSize,
    PresetDescription,
    DrcUserInterfaceInfo,
    ScreenSizeExtension,
    PresetExtension,
    LoudnessCompensation,
    Reserved(u8),
}

impl From<u8> for DataType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::GroupDescription,
            1 => Self::SwitchGroupDescription,
            2 => Self::ContentData,
            3 => Self::CompositePair,
            4 => Self::ScreenSize,
            5 => Self::PresetDescription,
            6 => Self::DrcUserInterfaceInfo,
            7 => Self::ScreenSizeExtension,
            8 => Self::PresetExtension,
            9 => Self::LoudnessCompensation,
            other => Self::Reserved(other),
        }
    }
}

pub type Language = [u8; 3];

fn read_language(reader: &mut BsIoSliceReader) -> Result<Language> {
    Ok([reader.get_n(8)?, reader.get_n(8)?, reader.get_n(8)?])
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Description {
    pub language: Language,
    pub text: Vec<u8>,
}

/// All language variants of one entity's description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptionSet {
    pub id: u8,
    pub descriptions: Vec<Description>,
}

impl DescriptionSet {
    /// Picks the description in the most preferred language, falling back to
    /// the first one transmitted.
    pub fn select(&self, preferred: &[Language]) -> Option<&Description> {
        preferred
            .iter()
            .find_map(|lang| self.descriptions.iter().find(|d| &d.language == lang))
            .or_else(|| self.descriptions.first())
    }

    /// Reads `mae_Description()` with `count_bits` for the block count and
    /// `id_bits` for the entity ID.
    pub fn read_all(
        reader: &mut BsIoSliceReader,
        count_bits: u32,
        id_bits: u32,
    ) -> Result<Vec<Self>> {
        let num_blocks = reader.get_n::<u32>(count_bits)? as usize + 1;
        let mut sets = Vec::with_capacity(num_blocks);

        for _ in 0..num_blocks {
            let id = reader.get_n(id_bits)?;
            let num_languages = reader.get_n::<u32>(4)? as usize + 1;
            let mut descriptions = Vec::with_capacity(num_languages);

            for _ in 0..num_languages {
                let language = read_language(reader)?;
                let length = reader.get_n::<u32>(8)? as usize + 1;
                let mut text = vec![0; length];
                reader.get_bytes(&mut text)?;
                descriptions.push(Description { language, text });
            }

            sets.push(Self { id, descriptions });
        }

        Ok(sets)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentInfo {
    pub group_id: u8,
    pub kind: u8,
    pub language: Option<Language>,
}

impl ContentInfo {
    pub fn read_all(reader: &mut BsIoSliceReader) -> Result<Vec<Self>> {
        let num = reader.get_n::<u32>(7)? as usize + 1;
        let mut content = Vec::with_capacity(num);

        for _ in 0..num {
            let group_id = reader.get_n(7)?;
            let kind = reader.get_n(4)?;
            let language = if reader.get()? {
                Some(read_language(reader)?)
            } else {
                None
            };
            content.push(Self {
                group_id,
                kind,
                language,
            });
        }

        Ok(content)
    }
}

pub fn read_composite_pairs(reader: &mut BsIoSliceReader) -> Result<Vec<(u8, u8)>> {
    let num = reader.get_n::<u32>(7)? as usize + 1;
    let mut pairs = Vec::with_capacity(num);
    for _ in 0..num {
        pairs.push((reader.get_n(7)?, reader.get_n(7)?));
    }

    Ok(pairs)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenSize {
    pub azimuth: u16,
    pub top_elevation: u16,
    pub bottom_elevation: u16,
}

impl ScreenSize {
    /// Returns `None` for the standard screen size.
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Option<Self>> {
        if !reader.get()? {
            return Ok(None);
        }

        Ok(Some(Self {
            azimuth: reader.get_n(9)?,
            top_elevation: reader.get_n(9)?,
            bottom_elevation: reader.get_n(9)?,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenAzimuth {
    Centered(u16),
    Edges { left: u16, right: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetScreenSize {
    pub azimuth: ScreenAzimuth,
    pub top_elevation: u16,
    pub bottom_elevation: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetScreen {
    pub preset_id: u8,
    pub size: Option<PresetScreenSize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenSizeExtension {
    /// Default screen left and right azimuth when overwritten.
    pub overwrite: Option<(u16, u16)>,
    pub preset_screens: Vec<PresetScreen>,
}

impl ScreenSizeExtension {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let mut ext = Self::default();

        if reader.get()? {
            ext.overwrite = Some((reader.get_n(10)?, reader.get_n(10)?));
        }

        let num_screens = reader.get_n::<u32>(5)? as usize;
        for _ in 0..num_screens {
            let preset_id = reader.get_n(5)?;
            let size = if reader.get()? {
                let azimuth = if reader.get()? {
                    ScreenAzimuth::Centered(reader.get_n(9)?)
                } else {
                    ScreenAzimuth::Edges {
                        left: reader.get_n(10)?,
                        right: reader.get_n(10)?,
                    }
                };
                Some(PresetScreenSize {
                    azimuth,
                    top_elevation: reader.get_n(9)?,
                    bottom_elevation: reader.get_n(9)?,
                })
            } else {
                None
            };
            ext.preset_screens.push(PresetScreen { preset_id, size });
        }

        Ok(ext)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetLoudnessCondition {
    pub upper_value: u8,
    pub drc_set_effects: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrcUserInterfaceInfo {
    pub version: u8,
    pub conditions: Vec<TargetLoudnessCondition>,
}

impl DrcUserInterfaceInfo {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let mut info = Self {
            version: reader.get_n(2)?,
            ..Default::default()
        };

        // later versions are skipped through the block length
        if info.version == 0 {
            let num = reader.get_n::<u32>(3)? as usize;
            for _ in 0..num {
                info.conditions.push(TargetLoudnessCondition {
                    upper_value: reader.get_n(6)?,
                    drc_set_effects: reader.get_n(16)?,
                });
            }
        }

        Ok(info)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownmixIdConditions {
    pub downmix_id: u8,
    pub conditions: Vec<PresetCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetExtension {
    /// One flag per preset condition, set when it refers to a switch group.
    pub switch_group_conditions: Option<Vec<bool>>,
    pub downmix_id_conditions: Vec<DownmixIdConditions>,
}

impl PresetExtension {
    pub fn read_all(reader: &mut BsIoSliceReader, presets: &[GroupPreset]) -> Result<Vec<Self>> {
        let mut exts = Vec::with_capacity(presets.len());

        for preset in presets {
            let mut ext = Self::default();

            if reader.get()? {
                let mut flags = Vec::with_capacity(preset.conditions.len());
                for _ in &preset.conditions {
                    flags.push(reader.get()?);
                }
                ext.switch_group_conditions = Some(flags);
            }

            if reader.get()? {
                let num = reader.get_n::<u32>(5)? as usize + 1;
                for _ in 0..num {
                    let downmix_id = reader.get_n(7)?;
                    ext.downmix_id_conditions.push(DownmixIdConditions {
                        downmix_id,
                        conditions: PresetCondition::read_extended_list(reader)?,
                    });
                }
            }

            exts.push(ext);
        }

        Ok(exts)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompensationGains {
    pub min_gain: u8,
    pub max_gain: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationParams {
    pub include_group: Vec<bool>,
    pub gains: Option<CompensationGains>,
}

impl CompensationParams {
    fn read(reader: &mut BsIoSliceReader, num_groups: usize) -> Result<Self> {
        let mut params = Self::default();
        for _ in 0..num_groups {
            params.include_group.push(reader.get()?);
        }

        if reader.get()? {
            params.gains = Some(CompensationGains {
                min_gain: reader.get_n(5)?,
                max_gain: reader.get_n(6)?,
            });
        }

        Ok(params)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoudnessCompensation {
    pub group_loudness: Option<Vec<u8>>,
    pub default_params: Option<CompensationParams>,
    pub preset_params: Vec<Option<CompensationParams>>,
}

impl LoudnessCompensation {
    pub fn read(reader: &mut BsIoSliceReader, num_groups: usize, num_presets: usize) -> Result<Self> {
        let mut comp = Self::default();

        if reader.get()? {
            let mut loudness = Vec::with_capacity(num_groups);
            for _ in 0..num_groups {
                loudness.push(reader.get_n(8)?);
            }
            comp.group_loudness = Some(loudness);
        }

        if reader.get()? {
            comp.default_params = Some(CompensationParams::read(reader, num_groups)?);
        }

        for _ in 0..num_presets {
            comp.preset_params.push(if reader.get()? {
                Some(CompensationParams::read(reader, num_groups)?)
            } else {
                None
            });
        }

        Ok(comp)
    }
}

/// Descriptive side tables of one scene. Blocks absent from the current
/// `mae_Data()` stay at their default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneData {
    pub group_descriptions: Vec<DescriptionSet>,
    pub switch_group_descriptions: Vec<DescriptionSet>,
    pub preset_descriptions: Vec<DescriptionSet>,
    pub content: Vec<ContentInfo>,
    pub composite_pairs: Vec<(u8, u8)>,
    pub screen_size: Option<ScreenSize>,
    pub screen_size_extension: Option<ScreenSizeExtension>,
    pub drc_ui: Option<DrcUserInterfaceInfo>,
    pub preset_extensions: Vec<PresetExtension>,
    pub loudness_compensation: Option<LoudnessCompensation>,
}

impl SceneData {
    pub fn read(
        reader: &mut BsIoSliceReader,
        num_groups: usize,
        presets: &[GroupPreset],
    ) -> Result<Self> {
        let num_data_sets = reader.get_n::<u32>(4)? as usize;
        let mut data = Self::default();

        for _ in 0..num_data_sets {
            let raw_type = reader.get_n::<u8>(4)?;
            let length = reader.get_n::<u32>(16)?;
            let declared = (length as u64) << 3;
            let start = reader.position()?;

            match DataType::from(raw_type) {
                DataType::GroupDescription => {
                    data.group_descriptions = DescriptionSet::read_all(reader, 7, 7)?
                }
                DataType::SwitchGroupDescription => {
                    data.switch_group_descriptions = DescriptionSet::read_all(reader, 5, 5)?
                }
                DataType::PresetDescription => {
                    data.preset_descriptions = DescriptionSet::read_all(reader, 5, 5)?
                }
                DataType::ContentData => data.content = ContentInfo::read_all(reader)?,
                DataType::CompositePair => data.composite_pairs = read_composite_pairs(reader)?,
                DataType::ScreenSize => data.screen_size = ScreenSize::read(reader)?,
                DataType::ScreenSizeExtension => {
                    data.screen_size_extension = Some(ScreenSizeExtension::read(reader)?)
                }
                DataType::DrcUserInterfaceInfo => {
                    data.drc_ui = Some(DrcUserInterfaceInfo::read(reader)?)
                }
                DataType::PresetExtension => {
                    data.preset_extensions = PresetExtension::read_all(reader, presets)?
                }
                DataType::LoudnessCompensation => {
                    data.loudness_compensation = Some(LoudnessCompensation::read(
                        reader,
                        num_groups,
                        presets.len(),
                    )?)
                }
                DataType::Reserved(value) => debug!("skipping scene data block type {value}"),
            }

            let consumed = reader.position()? - start;
            if consumed > declared {
                bail!(AsiError::Overread {
                    data_type: raw_type,
                    declared,
                    consumed
                });
            }
            reader.seek((declared - consumed) as i64)?;
        }

        Ok(data)
    }
}
