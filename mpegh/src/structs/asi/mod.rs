//! Audio scene information (`mae_AudioSceneInfo()`).
//!
//! [`AudioSceneInfo`] is owned by the caller and updated in place on every
//! configuration or ASI packet. Each write goes through
//! [`assign`](crate::utils::diff::assign), so after a parse the diff flags
//! tell which parts of the scene actually changed.

pub mod data;
pub mod group;

use anyhow::{Result, anyhow, bail};
use bitflags::bitflags;
use log::Level::Warn;
use log::{debug, trace};

use crate::log_or_err;
use crate::process::{MAX_SUBSTREAMS, SubstreamIndex};
use crate::structs::asi::data::{DescriptionSet, Language, SceneData};
use crate::structs::asi::group::{Group, GroupPreset, SwitchGroup};
use crate::structs::config::SignalGroup;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::crc::MHAS_CRC16;
use crate::utils::diff::assign;
use crate::utils::errors::AsiError;

pub const MAX_GROUPS: usize = 32;
pub const MAX_SWITCH_GROUPS: usize = 16;
pub const MAX_PRESETS: usize = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AsiDiffFlags: u32 {
        const SCENE_ID = 1 << 0;
        const GROUP = 1 << 1;
        const SWITCH_GROUP = 1 << 2;
        const GROUP_PRESET = 1 << 3;
        const GROUP_PRESET_EXT = 1 << 4;
        const DESCRIPTION = 1 << 5;
        const CONTENT = 1 << 6;
        const COMPOSITE = 1 << 7;
        const SCREEN_SIZE = 1 << 8;
        const SCREEN_SIZE_EXT = 1 << 9;
        const DRC_UI = 1 << 10;
        const LOUDNESS_COMP = 1 << 11;
        const ELEMENT_ID = 1 << 12;
        const AVAILABILITY = 1 << 13;
        const NEEDS_RESET = 1 << 31;

        /// Changes that alter the element ID mapping of the scene.
        const STRUCTURE = Self::GROUP.bits()
            | Self::SWITCH_GROUP.bits()
            | Self::GROUP_PRESET.bits()
            | Self::ELEMENT_ID.bits();
    }
}

/// Per-call parameters for [`AudioSceneInfo::read`].
#[derive(Debug, Clone, Copy)]
pub struct AsiContext {
    pub substream: SubstreamIndex,
    /// Number of element IDs the current configuration provides.
    pub max_element_ids: usize,
    pub fail_level: log::Level,
}

/// Element ID range announced by one substream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubstreamScene {
    pub received: bool,
    pub is_main_stream: bool,
    pub element_id_offset: usize,
    pub element_id_max_avail: usize,
    pub structure_crc: Option<u16>,
}

impl SubstreamScene {
    pub fn provides(&self, element_id: usize) -> bool {
        self.received
            && element_id >= self.element_id_offset
            && element_id <= self.element_id_offset + self.element_id_max_avail
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSceneInfo {
    pub diff_flags: AsiDiffFlags,
    /// A main stream scene was parsed since the last reset.
    pub valid: bool,
    pub scene_id: Option<u8>,
    pub groups: Vec<Group>,
    pub switch_groups: Vec<SwitchGroup>,
    pub presets: Vec<GroupPreset>,
    pub data: SceneData,
    /// One entry per group, set when every member is provided by a received
    /// substream.
    pub group_available: Vec<bool>,
    pub substreams: [SubstreamScene; MAX_SUBSTREAMS],

    // kept across resets
    pub preferred_languages: Vec<Language>,
    pub active_downmix_id: Option<u8>,
}

impl Default for AudioSceneInfo {
    fn default() -> Self {
        Self {
            diff_flags: AsiDiffFlags::empty(),
            valid: false,
            scene_id: None,
            groups: Vec::new(),
            switch_groups: Vec::new(),
            presets: Vec::new(),
            data: SceneData::default(),
            group_available: Vec::new(),
            substreams: [SubstreamScene::default(); MAX_SUBSTREAMS],
            preferred_languages: Vec::new(),
            active_downmix_id: None,
        }
    }
}

impl AudioSceneInfo {
    /// Parses one ASI payload into `self`.
    ///
    /// Any error leaves the scene reset with only the sticky fields kept.
    pub fn read(&mut self, ctx: &AsiContext, reader: &mut BsIoSliceReader) -> Result<()> {
        match self.read_scene(ctx, reader) {
            Ok(()) => {
                trace!(
                    "ASI substream {}: {} groups, {} switch groups, {} presets, diff {:?}",
                    ctx.substream.index(),
                    self.groups.len(),
                    self.switch_groups.len(),
                    self.presets.len(),
                    self.diff_flags
                );
                Ok(())
            }
            Err(e) => {
                debug!("ASI reset after parse failure: {e:#}");
                self.reset();
                Err(e)
            }
        }
    }

    fn read_scene(&mut self, ctx: &AsiContext, reader: &mut BsIoSliceReader) -> Result<()> {
        let index = ctx.substream.index();
        let flags = &mut self.diff_flags;

        let is_main_stream = reader.get()?;

        let (offset, max_avail) = if is_main_stream {
            let scene_id = if reader.get()? {
                Some(reader.get_n::<u8>(8)?)
            } else {
                None
            };
            assign(flags, AsiDiffFlags::SCENE_ID, &mut self.scene_id, scene_id);

            let crc_start = reader.position()?;

            let num_groups = reader.get_n::<u32>(7)? as usize;
            if num_groups > MAX_GROUPS {
                bail!(AsiError::TooManyGroups {
                    count: num_groups,
                    max: MAX_GROUPS
                });
            }
            let mut groups = Vec::with_capacity(num_groups);
            for _ in 0..num_groups {
                groups.push(Group::read(reader, ctx.max_element_ids)?);
            }

            let num_switch_groups = reader.get_n::<u32>(5)? as usize;
            if num_switch_groups > MAX_SWITCH_GROUPS {
                bail!(AsiError::TooManySwitchGroups {
                    count: num_switch_groups,
                    max: MAX_SWITCH_GROUPS
                });
            }
            let mut switch_groups = Vec::with_capacity(num_switch_groups);
            for _ in 0..num_switch_groups {
                let switch_group = SwitchGroup::read(reader)?;
                for &member in &switch_group.members {
                    let Some(group) = groups.iter_mut().find(|g| g.id == member) else {
                        bail!(AsiError::UnknownSwitchGroupMember {
                            switch_group: switch_group.id,
                            group: member
                        });
                    };
                    group.switch_group = Some(switch_group.id);
                }
                switch_groups.push(switch_group);
            }

            let num_presets = reader.get_n::<u32>(5)? as usize;
            if num_presets > MAX_PRESETS {
                bail!(AsiError::TooManyPresets {
                    count: num_presets,
                    max: MAX_PRESETS
                });
            }
            let mut presets = Vec::with_capacity(num_presets);
            for _ in 0..num_presets {
                let preset = GroupPreset::read(reader)?;
                for condition in &preset.conditions {
                    let known = groups.iter().any(|g| g.id == condition.reference_id)
                        || switch_groups.iter().any(|s| s.id == condition.reference_id);
                    if !known {
                        log_or_err!(
                            ctx,
                            Warn,
                            anyhow!(AsiError::UnknownPresetGroup {
                                preset: preset.id,
                                group: condition.reference_id
                            })
                        );
                    }
                }
                presets.push(preset);
            }

            let crc_len = reader.position()? - crc_start;
            let crc = reader.crc16_check(&MHAS_CRC16, crc_start, crc_len)?;
            self.substreams[index].structure_crc = Some(crc);

            let data = SceneData::read(reader, groups.len(), &presets)?;

            assign(flags, AsiDiffFlags::GROUP, &mut self.groups, groups);
            assign(flags, AsiDiffFlags::SWITCH_GROUP, &mut self.switch_groups, switch_groups);
            assign(flags, AsiDiffFlags::GROUP_PRESET, &mut self.presets, presets);
            self.assign_data(data);

            if !self.valid {
                self.diff_flags |= AsiDiffFlags::SCENE_ID | AsiDiffFlags::STRUCTURE;
                self.valid = true;
            }

            (0, reader.get_n::<u32>(7)? as usize)
        } else {
            let offset = reader.get_n::<u32>(7)? as usize + 1;
            (offset, reader.get_n::<u32>(7)? as usize)
        };

        let scene = &mut self.substreams[index];
        scene.received = true;
        scene.is_main_stream = is_main_stream;
        assign(
            &mut self.diff_flags,
            AsiDiffFlags::ELEMENT_ID,
            &mut scene.element_id_offset,
            offset,
        );
        assign(
            &mut self.diff_flags,
            AsiDiffFlags::ELEMENT_ID,
            &mut scene.element_id_max_avail,
            max_avail,
        );

        self.update_availability();

        Ok(())
    }

    fn assign_data(&mut self, data: SceneData) {
        let SceneData {
            group_descriptions,
            switch_group_descriptions,
            preset_descriptions,
            content,
            composite_pairs,
            screen_size,
            screen_size_extension,
            drc_ui,
            preset_extensions,
            loudness_compensation,
        } = data;

        let flags = &mut self.diff_flags;
        let current = &mut self.data;

        assign(
            flags,
            AsiDiffFlags::DESCRIPTION,
            &mut current.group_descriptions,
            group_descriptions,
        );
        assign(
            flags,
            AsiDiffFlags::DESCRIPTION,
            &mut current.switch_group_descriptions,
            switch_group_descriptions,
        );
        assign(
            flags,
            AsiDiffFlags::DESCRIPTION,
            &mut current.preset_descriptions,
            preset_descriptions,
        );
        assign(flags, AsiDiffFlags::CONTENT, &mut current.content, content);
        assign(
            flags,
            AsiDiffFlags::COMPOSITE,
            &mut current.composite_pairs,
            composite_pairs,
        );
        assign(flags, AsiDiffFlags::SCREEN_SIZE, &mut current.screen_size, screen_size);
        assign(
            flags,
            AsiDiffFlags::SCREEN_SIZE_EXT,
            &mut current.screen_size_extension,
            screen_size_extension,
        );
        assign(flags, AsiDiffFlags::DRC_UI, &mut current.drc_ui, drc_ui);
        assign(
            flags,
            AsiDiffFlags::GROUP_PRESET_EXT,
            &mut current.preset_extensions,
            preset_extensions,
        );
        assign(
            flags,
            AsiDiffFlags::LOUDNESS_COMP,
            &mut current.loudness_compensation,
            loudness_compensation,
        );
    }

    fn update_availability(&mut self) {
        let available = self
            .groups
            .iter()
            .map(|group| {
                group.members.iter().all(|&member| {
                    self.substreams
                        .iter()
                        .any(|scene| scene.provides(member as usize))
                })
            })
            .collect();

        assign(
            &mut self.diff_flags,
            AsiDiffFlags::AVAILABILITY,
            &mut self.group_available,
            available,
        );
    }

    /// Verifies that no signal group is split by a switch group member while
    /// also feeding a group outside that switch group. Returns the index of
    /// the first offending signal group.
    pub fn check(&self, signal_groups: &[SignalGroup]) -> Result<(), usize> {
        for (index, signal_group) in signal_groups.iter().enumerate() {
            let range = signal_group.signals();

            for switch_group in &self.switch_groups {
                for member in switch_group.members.iter().filter_map(|&id| self.group(id)) {
                    if !range.clone().any(|e| member.contains(e))
                        || range.clone().all(|e| member.contains(e))
                    {
                        continue;
                    }

                    let outside = self
                        .groups
                        .iter()
                        .filter(|g| g.switch_group != Some(switch_group.id))
                        .any(|g| range.clone().any(|e| g.contains(e)));
                    if outside {
                        return Err(index);
                    }
                }
            }
        }

        Ok(())
    }

    /// Clears the scene, keeping the preferred languages and the active
    /// downmix ID.
    pub fn reset(&mut self) {
        let preferred_languages = std::mem::take(&mut self.preferred_languages);
        let active_downmix_id = self.active_downmix_id;

        *self = Self {
            diff_flags: AsiDiffFlags::NEEDS_RESET,
            preferred_languages,
            active_downmix_id,
            ..Default::default()
        };
    }

    /// Returns and clears the accumulated diff flags.
    pub fn take_diff_flags(&mut self) -> AsiDiffFlags {
        std::mem::replace(&mut self.diff_flags, AsiDiffFlags::empty())
    }

    pub fn structure_crc(&self, substream: SubstreamIndex) -> Option<u16> {
        self.substreams[substream.index()].structure_crc
    }

    /// True when another substream already delivered an identical structure.
    pub fn is_duplicate(&self, substream: SubstreamIndex) -> bool {
        let Some(crc) = self.structure_crc(substream) else {
            return false;
        };

        self.substreams
            .iter()
            .enumerate()
            .any(|(i, scene)| i != substream.index() && scene.structure_crc == Some(crc))
    }

    pub fn group(&self, id: u8) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn set_preferred_languages(&mut self, languages: Vec<Language>) {
        self.preferred_languages = languages;
    }

    pub fn set_active_downmix_id(&mut self, id: Option<u8>) {
        self.active_downmix_id = id;
    }

    /// Description text of a group in the preferred language.
    pub fn group_description(&self, id: u8) -> Option<&[u8]> {
        select(&self.data.group_descriptions, id, &self.preferred_languages)
    }

    pub fn preset_description(&self, id: u8) -> Option<&[u8]> {
        select(&self.data.preset_descriptions, id, &self.preferred_languages)
    }
}

fn select<'a>(sets: &'a [DescriptionSet], id: u8, preferred: &[Language]) -> Option<&'a [u8]> {
    sets.iter()
        .find(|set| set.id == id)
        .and_then(|set| set.select(preferred))
        .map(|d| d.text.as_slice())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::structs::config::SignalGroupType;
    use crate::utils::errors::{ErrorCode, classify};
    use crate::utils::test_stream::TestStream;

    fn ctx(substream: usize, max_element_ids: usize) -> anyhow::Result<AsiContext> {
        Ok(AsiContext {
            substream: SubstreamIndex::new(substream)?,
            max_element_ids,
            fail_level: log::Level::Error,
        })
    }

    /// Main stream scene with plain groups, no switch groups or presets.
    pub(crate) fn scene(groups: &[(u32, &[u32])], max_avail: u32) -> std::io::Result<Vec<u8>> {
        let mut ts = TestStream::new();
        ts.flag(true)?.flag(false)?;
        ts.put(7, groups.len() as u32)?;
        for (id, members) in groups {
            ts.put(7, *id)?.flag(true)?.flag(true)?.flag(false)?.flag(false)?;
            ts.put(7, members.len() as u32 - 1)?.flag(false)?;
            for member in *members {
                ts.put(7, *member)?;
            }
        }
        ts.put(5, 0)?.put(5, 0)?;
        ts.put(4, 0)?; // no data blocks
        ts.put(7, max_avail)?;
        ts.finish()
    }

    #[test]
    fn unchanged_scene_sets_no_flags() -> anyhow::Result<()> {
        let buf = scene(&[(0, &[0, 1]), (1, &[2])], 2)?;
        let mut asi = AudioSceneInfo::default();

        asi.read(&ctx(0, 3)?, &mut BsIoSliceReader::from_slice(&buf))?;
        let flags = asi.take_diff_flags();
        assert!(flags.contains(AsiDiffFlags::STRUCTURE | AsiDiffFlags::SCENE_ID));
        assert!(asi.valid);
        assert_eq!(asi.group_available, vec![true, true]);

        asi.read(&ctx(0, 3)?, &mut BsIoSliceReader::from_slice(&buf))?;
        assert!(asi.take_diff_flags().is_empty());

        Ok(())
    }

    #[test]
    fn structure_crc_across_substreams() -> anyhow::Result<()> {
        let buf = scene(&[(0, &[0, 1]), (1, &[2])], 2)?;
        let mut asi = AudioSceneInfo::default();

        asi.read(&ctx(0, 3)?, &mut BsIoSliceReader::from_slice(&buf))?;
        asi.read(&ctx(1, 3)?, &mut BsIoSliceReader::from_slice(&buf))?;

        let main = asi.structure_crc(SubstreamIndex::MAIN);
        assert!(main.is_some());
        assert_eq!(main, asi.structure_crc(SubstreamIndex::new(1)?));
        assert!(asi.is_duplicate(SubstreamIndex::new(1)?));

        let flipped = scene(&[(0, &[0, 1]), (1, &[0])], 2)?;
        let mut other = AudioSceneInfo::default();
        other.read(&ctx(0, 3)?, &mut BsIoSliceReader::from_slice(&flipped))?;
        assert_ne!(other.structure_crc(SubstreamIndex::MAIN), main);

        Ok(())
    }

    #[test]
    fn member_out_of_range_resets() -> anyhow::Result<()> {
        let mut asi = AudioSceneInfo::default();
        asi.set_preferred_languages(vec![*b"eng"]);
        asi.set_active_downmix_id(Some(4));

        let good = scene(&[(0, &[0])], 0)?;
        asi.read(&ctx(0, 4)?, &mut BsIoSliceReader::from_slice(&good))?;
        assert_eq!(asi.groups.len(), 1);

        let bad = scene(&[(0, &[0]), (1, &[10])], 0)?;
        let err = asi
            .read(&ctx(0, 4)?, &mut BsIoSliceReader::from_slice(&bad))
            .unwrap_err();
        assert_eq!(classify(&err), ErrorCode::UnsupportedFormat);

        assert!(asi.groups.is_empty());
        assert!(!asi.valid);
        assert_eq!(asi.diff_flags, AsiDiffFlags::NEEDS_RESET);
        assert_eq!(asi.structure_crc(SubstreamIndex::MAIN), None);
        assert_eq!(asi.preferred_languages, vec![*b"eng"]);
        assert_eq!(asi.active_downmix_id, Some(4));

        Ok(())
    }

    #[test]
    fn availability_from_secondary_substream() -> anyhow::Result<()> {
        let mut asi = AudioSceneInfo::default();

        // main stream provides IDs 0..=1, group 1 needs ID 3
        let buf = scene(&[(0, &[0, 1]), (1, &[3])], 1)?;
        asi.read(&ctx(0, 4)?, &mut BsIoSliceReader::from_slice(&buf))?;
        assert_eq!(asi.group_available, vec![true, false]);
        asi.take_diff_flags();

        let mut ts = TestStream::new();
        ts.flag(false)?.put(7, 1)?.put(7, 1)?; // IDs 2..=3
        let secondary = ts.finish()?;
        asi.read(&ctx(1, 4)?, &mut BsIoSliceReader::from_slice(&secondary))?;

        assert_eq!(asi.group_available, vec![true, true]);
        let flags = asi.take_diff_flags();
        assert!(flags.contains(AsiDiffFlags::AVAILABILITY | AsiDiffFlags::ELEMENT_ID));
        assert!(!flags.contains(AsiDiffFlags::GROUP));

        Ok(())
    }

    #[test]
    fn signal_group_straddles_switch_group() {
        let mut asi = AudioSceneInfo::default();
        asi.groups = vec![
            Group {
                id: 0,
                members: vec![0],
                switch_group: Some(0),
                ..Default::default()
            },
            Group {
                id: 1,
                members: vec![1],
                ..Default::default()
            },
        ];
        asi.switch_groups = vec![SwitchGroup {
            id: 0,
            members: vec![0],
            ..Default::default()
        }];

        let split = SignalGroup {
            group_type: SignalGroupType::Object,
            first_signal: 0,
            num_signals: 2,
            layout: None,
        };
        assert_eq!(asi.check(&[split.clone()]), Err(0));

        let whole = SignalGroup {
            num_signals: 1,
            ..split
        };
        assert_eq!(asi.check(&[whole]), Ok(()));
    }
}
