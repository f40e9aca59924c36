//! Loudspeaker layout descriptions.
//!
//! A layout is signalled in one of three ways:
//!
//! - **CICP layout index**: one of the predefined channel configurations.
//! - **CICP speaker list**: an explicit list of predefined speaker positions.
//! - **Flexible**: per-speaker azimuth/elevation with optional symmetric pairs.
//!
//! Layout type 3 is a contribution-mode placeholder that carries no speakers.

use anyhow::{Result, bail};
use log::trace;

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::SpeakerConfigError;

/// Maximum number of speakers in one layout.
pub const MAX_SPEAKERS: usize = 32;

/// Number of defined CICP layout indices (0..=20).
pub const CICP_LAYOUT_COUNT: usize = 21;

/// Number of defined CICP speaker positions.
pub const CICP_SPEAKER_COUNT: usize = 43;

const ELEVATION_CLASS_ANGLES: [i16; 3] = [0, 35, -15];

/// (azimuth, elevation, is_lfe) for each CICP speaker index.
#[rustfmt::skip]
const CICP_SPEAKERS: [(i16, i16, bool); CICP_SPEAKER_COUNT] = [
    (30, 0, false),     // L
    (-30, 0, false),    // R
    (0, 0, false),      // C
    (45, -15, true),    // LFE1
    (110, 0, false),    // Ls
    (-110, 0, false),   // Rs
    (22, 0, false),     // Lc
    (-22, 0, false),    // Rc
    (135, 0, false),    // Lsr
    (-135, 0, false),   // Rsr
    (180, 0, false),    // Cs
    (90, 0, false),     // Lsd
    (-90, 0, false),    // Rsd
    (90, 0, false),     // Lss
    (-90, 0, false),    // Rss
    (60, 0, false),     // Lw
    (-60, 0, false),    // Rw
    (30, 35, false),    // Lv
    (-30, 35, false),   // Rv
    (0, 35, false),     // Cv
    (135, 35, false),   // Lvr
    (-135, 35, false),  // Rvr
    (180, 35, false),   // Cvr
    (90, 35, false),    // Lvss
    (-90, 35, false),   // Rvss
    (0, 90, false),     // Ts
    (-45, -15, true),   // LFE2
    (45, -15, false),   // Lb
    (-45, -15, false),  // Rb
    (0, -15, false),    // Cb
    (110, 35, false),   // Lvs
    (-110, 35, false),  // Rvs
    (45, 35, false),    // Lv2
    (-45, 35, false),   // Rv2
    (110, -15, false),  // Lbs
    (-110, -15, false), // Rbs
    (135, -15, false),  // Lbr
    (-135, -15, false), // Rbr
    (180, -15, false),  // Cbr
    (60, 35, false),    // Lvw
    (-60, 35, false),   // Rvw
    (0, 0, true),       // LFE3
    (180, 90, false),   // Tsb
];

/// Main speakers followed by LFE speakers for each CICP layout index.
#[rustfmt::skip]
const CICP_LAYOUTS: [(&[u8], &[u8]); CICP_LAYOUT_COUNT] = [
    (&[], &[]),
    (&[2], &[]),
    (&[0, 1], &[]),
    (&[0, 1, 2], &[]),
    (&[0, 1, 2, 10], &[]),
    (&[0, 1, 2, 4, 5], &[]),
    (&[0, 1, 2, 4, 5], &[3]),
    (&[2, 6, 7, 0, 1, 4, 5], &[3]),
    (&[0, 1], &[]),
    (&[0, 1, 10], &[]),
    (&[0, 1, 4, 5], &[]),
    (&[0, 1, 2, 4, 5, 10], &[3]),
    (&[0, 1, 2, 4, 5, 8, 9], &[3]),
    (
        &[0, 1, 2, 6, 7, 8, 9, 10, 13, 14, 17, 18, 19, 20, 21, 22, 23, 24, 25, 27, 28, 29],
        &[3, 26],
    ),
    (&[0, 1, 2, 4, 5, 17, 18], &[3]),
    (&[0, 1, 2, 4, 5, 13, 14, 17, 18, 22], &[3, 26]),
    (&[0, 1, 2, 4, 5, 17, 18, 30, 31], &[3]),
    (&[0, 1, 2, 4, 5, 17, 18, 19, 30, 31, 25], &[3]),
    (&[0, 1, 2, 4, 5, 8, 9, 17, 18, 19, 30, 31, 25], &[3]),
    (&[0, 1, 2, 13, 14, 8, 9, 17, 18, 20, 21], &[3]),
    (&[0, 1, 2, 13, 14, 8, 9, 15, 16, 17, 18, 20, 21], &[3]),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeakerPosition {
    pub azimuth: i16,
    pub elevation: i16,
    pub is_lfe: bool,
    pub cicp_speaker_index: Option<u8>,
}

impl SpeakerPosition {
    pub fn from_cicp(index: u8) -> Result<Self> {
        let Some(&(azimuth, elevation, is_lfe)) = CICP_SPEAKERS.get(index as usize) else {
            bail!(SpeakerConfigError::InvalidCicpSpeaker(index));
        };

        Ok(Self {
            azimuth,
            elevation,
            is_lfe,
            cicp_speaker_index: Some(index),
        })
    }

    fn is_on_median_plane(&self) -> bool {
        self.azimuth == 0 || self.azimuth.abs() == 180
    }

    fn mirrored(&self) -> Self {
        Self {
            azimuth: -self.azimuth,
            is_lfe: false,
            cicp_speaker_index: None,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LayoutType {
    #[default]
    CicpLayout,
    CicpSpeakers,
    Flexible,
    Contribution,
}

impl From<u8> for LayoutType {
    fn from(value: u8) -> Self {
        match value & 3 {
            0 => Self::CicpLayout,
            1 => Self::CicpSpeakers,
            2 => Self::Flexible,
            _ => Self::Contribution,
        }
    }
}

/// Decoded `SpeakerConfig3d()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeakerLayout {
    pub layout_type: LayoutType,
    pub cicp_layout_index: Option<u8>,
    pub angular_precision: bool,
    pub speakers: Vec<SpeakerPosition>,
}

impl SpeakerLayout {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let layout_type = LayoutType::from(reader.get_n::<u8>(2)?);

        let layout = match layout_type {
            LayoutType::CicpLayout => Self::from_cicp_layout(reader.get_n(6)?)?,
            LayoutType::CicpSpeakers => {
                let count = Self::read_speaker_count(reader)?;
                let mut speakers = Vec::with_capacity(count);
                for _ in 0..count {
                    speakers.push(SpeakerPosition::from_cicp(reader.get_n(7)?)?);
                }

                Self {
                    layout_type,
                    speakers,
                    ..Default::default()
                }
            }
            LayoutType::Flexible => {
                let count = Self::read_speaker_count(reader)?;
                Self::read_flexible(reader, count)?
            }
            LayoutType::Contribution => Self {
                layout_type,
                ..Default::default()
            },
        };

        trace!(
            "speaker layout {:?}: cicp {:?}, {} speakers",
            layout.layout_type,
            layout.cicp_layout_index,
            layout.speakers.len()
        );

        Ok(layout)
    }

    /// Expands a CICP layout index into its speaker list, LFEs last.
    pub fn from_cicp_layout(index: u8) -> Result<Self> {
        let Some((main, lfe)) = CICP_LAYOUTS.get(index as usize) else {
            bail!(SpeakerConfigError::InvalidCicpLayout(index));
        };

        let speakers = main
            .iter()
            .chain(lfe.iter())
            .map(|&i| SpeakerPosition::from_cicp(i))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            layout_type: LayoutType::CicpLayout,
            cicp_layout_index: Some(index),
            speakers,
            ..Default::default()
        })
    }

    fn read_speaker_count(reader: &mut BsIoSliceReader) -> Result<usize> {
        let count = reader.get_escaped(5, 8, 16)? as usize + 1;
        if count > MAX_SPEAKERS {
            bail!(SpeakerConfigError::TooManySpeakers {
                count,
                max: MAX_SPEAKERS
            });
        }

        Ok(count)
    }

    fn read_flexible(reader: &mut BsIoSliceReader, count: usize) -> Result<Self> {
        let angular_precision = reader.get()?;
        let mut speakers = Vec::with_capacity(count);

        while speakers.len() < count {
            let speaker = Self::read_speaker_description(reader, angular_precision)?;
            speakers.push(speaker);

            if !speaker.is_on_median_plane() && reader.get()? {
                if speakers.len() == count {
                    bail!(SpeakerConfigError::SymmetricPairOverflow(count));
                }
                speakers.push(speaker.mirrored());
            }
        }

        Ok(Self {
            layout_type: LayoutType::Flexible,
            angular_precision,
            speakers,
            ..Default::default()
        })
    }

    fn read_speaker_description(
        reader: &mut BsIoSliceReader,
        angular_precision: bool,
    ) -> Result<SpeakerPosition> {
        if reader.get()? {
            return SpeakerPosition::from_cicp(reader.get_n(7)?);
        }

        let (step, elevation_bits, azimuth_bits) = if angular_precision {
            (1, 7, 8)
        } else {
            (5, 5, 6)
        };

        let elevation_class = reader.get_n::<u8>(2)?;
        let elevation = match ELEVATION_CLASS_ANGLES.get(elevation_class as usize) {
            Some(&angle) => angle,
            None => {
                let angle = reader.get_n::<u16>(elevation_bits)? as i16 * step;
                if angle != 0 && reader.get()? {
                    -angle
                } else {
                    angle
                }
            }
        };

        let mut azimuth = reader.get_n::<u16>(azimuth_bits)? as i16 * step;
        if azimuth != 0 && azimuth != 180 && reader.get()? {
            azimuth = -azimuth;
        }

        Ok(SpeakerPosition {
            azimuth,
            elevation,
            is_lfe: reader.get()?,
            cicp_speaker_index: None,
        })
    }

    pub fn num_speakers(&self) -> usize {
        self.speakers.len()
    }

    pub fn num_lfe(&self) -> usize {
        self.speakers.iter().filter(|s| s.is_lfe).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_stream::TestStream;

    const PLANNED_SPEAKER_COUNTS: [usize; CICP_LAYOUT_COUNT] = [
        0, 1, 2, 3, 4, 5, 6, 8, 2, 3, 4, 7, 8, 24, 8, 12, 10, 12, 14, 12, 14,
    ];

    #[test]
    fn cicp_layouts() -> anyhow::Result<()> {
        for (index, &planned) in PLANNED_SPEAKER_COUNTS.iter().enumerate() {
            let mut ts = TestStream::new();
            ts.put(2, 0)?.put(6, index as u32)?;
            let buf = ts.finish()?;

            let layout = SpeakerLayout::read(&mut BsIoSliceReader::from_slice(&buf))?;
            assert_eq!(layout.cicp_layout_index, Some(index as u8));
            assert_eq!(layout.num_speakers(), planned, "layout {index}");

            // LFEs are always listed after the main speakers
            let first_lfe = layout.speakers.iter().position(|s| s.is_lfe);
            if let Some(first_lfe) = first_lfe {
                assert!(layout.speakers[first_lfe..].iter().all(|s| s.is_lfe));
            }
        }

        let mut ts = TestStream::new();
        ts.put(2, 0)?.put(6, 21)?;
        let buf = ts.finish()?;
        let err = SpeakerLayout::read(&mut BsIoSliceReader::from_slice(&buf)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpeakerConfigError>(),
            Some(SpeakerConfigError::InvalidCicpLayout(21))
        ));

        Ok(())
    }

    #[test]
    fn flexible_symmetric_pair() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.put(2, 2)?.escaped(5, 8, 16, 2)?; // 3 speakers
        ts.flag(false)?; // 5 degree precision

        // +30/0 with a mirrored partner
        ts.flag(false)?.put(2, 0)?.put(6, 6)?.flag(false)?.flag(false)?;
        ts.flag(true)?;

        // centre at +35 elevation, no direction or pair bits
        ts.flag(false)?.put(2, 1)?.put(6, 0)?.flag(false)?;

        let buf = ts.finish()?;
        let layout = SpeakerLayout::read(&mut BsIoSliceReader::from_slice(&buf))?;

        assert_eq!(layout.layout_type, LayoutType::Flexible);
        assert_eq!(layout.cicp_layout_index, None);
        assert_eq!(layout.num_speakers(), 3);
        assert_eq!(layout.speakers[0].azimuth, 30);
        assert_eq!(layout.speakers[1].azimuth, -30);
        assert!(!layout.speakers[1].is_lfe);
        assert_eq!(layout.speakers[2].elevation, 35);

        Ok(())
    }

    #[test]
    fn explicit_elevation() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.put(2, 2)?.escaped(5, 8, 16, 0)?;
        ts.flag(true)?; // 1 degree precision
        ts.flag(false)?.put(2, 3)?.put(7, 20)?.flag(true)?; // -20
        ts.put(8, 180)?; // no direction bit at 180
        ts.flag(true)?; // lfe
        let buf = ts.finish()?;

        let layout = SpeakerLayout::read(&mut BsIoSliceReader::from_slice(&buf))?;
        assert_eq!(
            layout.speakers,
            vec![SpeakerPosition {
                azimuth: 180,
                elevation: -20,
                is_lfe: true,
                cicp_speaker_index: None,
            }]
        );

        Ok(())
    }
}
