//! Group, switch group and group preset definitions.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::AsiError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionInteractivity {
    pub azimuth_offset_min: u8,
    pub azimuth_offset_max: u8,
    pub elevation_offset_min: u8,
    pub elevation_offset_max: u8,
    pub distance_factor_min: u8,
    pub distance_factor_max: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GainInteractivity {
    pub min: u8,
    pub max: u8,
}

/// `mae_GroupDefinition()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub id: u8,
    pub allow_on_off: bool,
    pub default_on_off: bool,
    pub position_interactivity: Option<PositionInteractivity>,
    pub gain_interactivity: Option<GainInteractivity>,
    pub members: Vec<u8>,
    /// Switch group this group belongs to, filled in after the switch
    /// group definitions are read.
    pub switch_group: Option<u8>,
}

impl Group {
    pub fn read(reader: &mut BsIoSliceReader, max_element_ids: usize) -> Result<Self> {
        let mut group = Self {
            id: reader.get_n(7)?,
            allow_on_off: reader.get()?,
            default_on_off: reader.get()?,
            ..Default::default()
        };

        if reader.get()? {
            group.position_interactivity = Some(PositionInteractivity {
                azimuth_offset_min: reader.get_n(7)?,
                azimuth_offset_max: reader.get_n(7)?,
                elevation_offset_min: reader.get_n(5)?,
                elevation_offset_max: reader.get_n(5)?,
                distance_factor_min: reader.get_n(4)?,
                distance_factor_max: reader.get_n(4)?,
            });
        }

        if reader.get()? {
            group.gain_interactivity = Some(GainInteractivity {
                min: reader.get_n(6)?,
                max: reader.get_n(5)?,
            });
        }

        let num_members = reader.get_n::<u32>(7)? as usize + 1;

        if reader.get()? {
            let start = reader.get_n::<u32>(7)? as usize;
            if start + num_members > max_element_ids {
                bail!(AsiError::ConjunctMembersOutOfRange {
                    group: group.id,
                    max: max_element_ids
                });
            }
            group.members = (start..start + num_members).map(|id| id as u8).collect();
        } else {
            group.members.reserve(num_members);
            for _ in 0..num_members {
                let member = reader.get_n::<u8>(7)?;
                if member as usize >= max_element_ids {
                    bail!(AsiError::MemberOutOfRange {
                        group: group.id,
                        member,
                        max: max_element_ids
                    });
                }
                group.members.push(member);
            }
        }

        Ok(group)
    }

    pub fn contains(&self, element_id: usize) -> bool {
        self.members.iter().any(|&m| m as usize == element_id)
    }
}

/// `mae_SwitchGroupDefinition()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchGroup {
    pub id: u8,
    pub allow_on_off: bool,
    pub default_on_off: bool,
    pub members: Vec<u8>,
    pub default_group_id: u8,
}

impl SwitchGroup {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let mut switch_group = Self {
            id: reader.get_n(5)?,
            allow_on_off: reader.get()?,
            ..Default::default()
        };

        if switch_group.allow_on_off {
            switch_group.default_on_off = reader.get()?;
        }

        let num_members = reader.get_n::<u32>(5)? as usize + 1;
        switch_group.members.reserve(num_members);
        for _ in 0..num_members {
            switch_group.members.push(reader.get_n(7)?);
        }

        switch_group.default_group_id = reader.get_n(7)?;

        Ok(switch_group)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresetPosition {
    pub azimuth_offset: u8,
    pub elevation_offset: u8,
    pub distance_factor: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresetCondition {
    /// Group ID, or switch group ID when `is_switch_group` is set.
    pub reference_id: u8,
    pub is_switch_group: bool,
    pub on_off: bool,
    pub disable_gain_interactivity: bool,
    pub gain: Option<u8>,
    pub disable_position_interactivity: bool,
    pub position: Option<PresetPosition>,
}

impl PresetCondition {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let reference_id = reader.get_n(7)?;
        Self::read_settings(reader, reference_id, false)
    }

    /// Condition of a downmix ID preset extension, which may refer to a
    /// switch group instead of a group.
    pub fn read_extended(reader: &mut BsIoSliceReader) -> Result<Self> {
        if reader.get()? {
            let switch_group_id = reader.get_n(5)?;
            Self::read_settings(reader, switch_group_id, true)
        } else {
            let group_id = reader.get_n(7)?;
            Self::read_settings(reader, group_id, false)
        }
    }

    fn read_settings(
        reader: &mut BsIoSliceReader,
        reference_id: u8,
        is_switch_group: bool,
    ) -> Result<Self> {
        let mut condition = Self {
            reference_id,
            is_switch_group,
            on_off: reader.get()?,
            ..Default::default()
        };

        if condition.on_off {
            condition.disable_gain_interactivity = reader.get()?;
            if reader.get()? {
                condition.gain = Some(reader.get_n(8)?);
            }

            condition.disable_position_interactivity = reader.get()?;
            if reader.get()? {
                condition.position = Some(PresetPosition {
                    azimuth_offset: reader.get_n(8)?,
                    elevation_offset: reader.get_n(6)?,
                    distance_factor: reader.get_n(4)?,
                });
            }
        }

        Ok(condition)
    }

    pub fn read_list(reader: &mut BsIoSliceReader) -> Result<Vec<Self>> {
        let num_conditions = reader.get_n::<u32>(4)? as usize + 1;
        (0..num_conditions).map(|_| Self::read(reader)).collect()
    }

    pub fn read_extended_list(reader: &mut BsIoSliceReader) -> Result<Vec<Self>> {
        let num_conditions = reader.get_n::<u32>(4)? as usize + 1;
        (0..num_conditions).map(|_| Self::read_extended(reader)).collect()
    }
}

/// `mae_GroupPresetDefinition()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPreset {
    pub id: u8,
    pub kind: u8,
    pub conditions: Vec<PresetCondition>,
}

impl GroupPreset {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        Ok(Self {
            id: reader.get_n(5)?,
            kind: reader.get_n(5)?,
            conditions: PresetCondition::read_list(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::{ErrorCode, classify};
    use crate::utils::test_stream::TestStream;

    #[test]
    fn conjunct_members() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.put(7, 3)?.flag(true)?.flag(true)?;
        ts.flag(false)?.flag(true)?.put(6, 10)?.put(5, 4)?;
        ts.put(7, 1)?.flag(true)?.put(7, 4)?; // two members from 4
        let buf = ts.finish()?;

        let group = Group::read(&mut BsIoSliceReader::from_slice(&buf), 6)?;
        assert_eq!(group.id, 3);
        assert_eq!(group.members, vec![4, 5]);
        assert_eq!(group.gain_interactivity, Some(GainInteractivity { min: 10, max: 4 }));

        let err = Group::read(&mut BsIoSliceReader::from_slice(&buf), 5).unwrap_err();
        assert_eq!(classify(&err), ErrorCode::UnsupportedFormat);

        Ok(())
    }

    #[test]
    fn preset_conditions() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.put(5, 2)?.put(5, 1)?.put(4, 1)?;
        ts.put(7, 0)?.flag(true)?.flag(false)?.flag(true)?.put(8, 0x80)?;
        ts.flag(false)?.flag(false)?;
        ts.put(7, 1)?.flag(false)?;
        let buf = ts.finish()?;

        let preset = GroupPreset::read(&mut BsIoSliceReader::from_slice(&buf))?;
        assert_eq!(preset.conditions.len(), 2);
        assert_eq!(preset.conditions[0].gain, Some(0x80));
        assert!(!preset.conditions[1].on_off);

        Ok(())
    }
}
