//! Per-element core coder configuration (`mpegh3daDecoderConfig()`).
//!
//! Channel elements consume coded signals in order, filling the signal
//! groups one after another. Extension elements that describe the following
//! channel elements (object metadata, multichannel coding) must be followed
//! by at least one channel element.

use anyhow::{Result, bail};
use log::trace;

use crate::structs::config::{ConfigContext, SignalGroupType, Signals3d};
use crate::structs::ext_element::{
    ExtElementBinding, ExtElementConfig, ExtElementPayload, ExtElementType, MctConfig,
};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::{ConfigError, ExtElementError};

pub const MAX_ELEMENTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Sce,
    Cpe,
    Lfe,
    Ext,
}

impl From<u8> for ElementType {
    fn from(value: u8) -> Self {
        match value & 3 {
            0 => Self::Sce,
            1 => Self::Cpe,
            2 => Self::Lfe,
            _ => Self::Ext,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IgfConfig {
    pub use_enf: bool,
    pub use_high_res: bool,
    pub use_whitening: bool,
    pub after_tns_synth: bool,
    pub start_index: u8,
    pub stop_index: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreConfig {
    pub full_band_lpd: bool,
    pub noise_filling: bool,
    pub enhanced_noise_filling: bool,
    pub igf: Option<IgfConfig>,
}

impl CoreConfig {
    fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        if reader.get()? {
            bail!(ConfigError::TimeWarpedMdct);
        }

        let mut core = Self {
            full_band_lpd: reader.get()?,
            noise_filling: reader.get()?,
            enhanced_noise_filling: reader.get()?,
            ..Default::default()
        };

        if core.enhanced_noise_filling {
            core.igf = Some(IgfConfig {
                use_enf: reader.get()?,
                use_high_res: reader.get()?,
                use_whitening: reader.get()?,
                after_tns_synth: reader.get()?,
                start_index: reader.get_n(5)?,
                stop_index: reader.get_n(4)?,
            });
        }

        Ok(core)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpeConfig {
    pub core: CoreConfig,
    pub igf_independent_tiling: Option<bool>,
    pub qce_index: u8,
    pub shift_channel0: Option<u32>,
    pub shift_channel1: Option<u32>,
    pub lpd_stereo_index: bool,
}

impl CpeConfig {
    fn read(reader: &mut BsIoSliceReader, num_channels: usize) -> Result<Self> {
        let mut cpe = Self {
            core: CoreConfig::read(reader)?,
            ..Default::default()
        };

        if cpe.core.enhanced_noise_filling {
            cpe.igf_independent_tiling = Some(reader.get()?);
        }

        let shift_bits = shift_channel_bits(num_channels);

        cpe.qce_index = reader.get_n(2)?;
        if cpe.qce_index > 0 && reader.get()? {
            cpe.shift_channel0 = Some(reader.get_n(shift_bits)?);
        }

        if reader.get()? {
            cpe.shift_channel1 = Some(reader.get_n(shift_bits)?);
        }

        if cpe.qce_index == 0 {
            cpe.lpd_stereo_index = reader.get()?;
        } else {
            bail!(ConfigError::QuadChannelElement(cpe.qce_index));
        }

        Ok(cpe)
    }
}

/// Width of a shift channel index for `num_channels` coded channels,
/// `ceil(log2(num_channels - 1)) + 1`.
pub fn shift_channel_bits(num_channels: usize) -> u32 {
    let n = num_channels.saturating_sub(1).max(1);
    n.next_power_of_two().trailing_zeros() + 1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementConfig {
    Sce(CoreConfig),
    Cpe(CpeConfig),
    Lfe,
    Ext(ExtElementConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub config: ElementConfig,
    /// Signal group and first coded signal of a channel element.
    pub signal_group: Option<usize>,
    pub first_signal: Option<usize>,
}

impl Element {
    pub fn element_type(&self) -> ElementType {
        match self.config {
            ElementConfig::Sce(_) => ElementType::Sce,
            ElementConfig::Cpe(_) => ElementType::Cpe,
            ElementConfig::Lfe => ElementType::Lfe,
            ElementConfig::Ext(_) => ElementType::Ext,
        }
    }

    pub fn num_channels(&self) -> usize {
        match self.config {
            ElementConfig::Sce(_) | ElementConfig::Lfe => 1,
            ElementConfig::Cpe(_) => 2,
            ElementConfig::Ext(_) => 0,
        }
    }

    pub fn ext(&self) -> Option<&ExtElementConfig> {
        match &self.config {
            ElementConfig::Ext(ext) => Some(ext),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderConfig {
    pub element_length_present: bool,
    pub elements: Vec<Element>,
}

impl DecoderConfig {
    pub fn read(
        ctx: &mut ConfigContext,
        reader: &mut BsIoSliceReader,
        signals: &Signals3d,
        core_frame_length: usize,
    ) -> Result<Self> {
        let num_elements = reader.get_escaped(4, 8, 16)? as usize + 1;
        if num_elements > MAX_ELEMENTS {
            bail!(ConfigError::TooManyElements {
                count: num_elements,
                max: MAX_ELEMENTS
            });
        }

        let mut dc = Self {
            element_length_present: reader.get()?,
            elements: Vec::with_capacity(num_elements),
        };

        let total_signals = signals.total_signals();
        let mut signal = 0;
        let mut trailing_ext: Option<ExtElementType> = None;
        let mut production_metadata_seen = false;
        let mut mct_masks: Vec<MctConfig> = Vec::new();

        for _ in 0..num_elements {
            let element_type = ElementType::from(reader.get_n::<u8>(2)?);

            if element_type == ElementType::Ext {
                let binding = ExtElementBinding {
                    signals,
                    core_frame_length,
                    object_group: signals.groups.iter().position(|g| {
                        g.group_type == SignalGroupType::Object && g.first_signal >= signal
                    }),
                    channel_group: signals.group_of_signal(signal),
                };

                let ext = ExtElementConfig::read(ctx, reader, &binding)?;

                match &ext.payload {
                    ExtElementPayload::ProductionMetadata(_) => {
                        if signal > 0 {
                            bail!(ExtElementError::ProductionMetadataAfterChannels);
                        }
                        if production_metadata_seen {
                            bail!(ExtElementError::DuplicateProductionMetadata);
                        }
                        production_metadata_seen = true;
                    }
                    ExtElementPayload::Mct(mct) => mct_masks.push(mct.clone()),
                    _ => (),
                }

                if ext.ext_type != ExtElementType::Fill {
                    trailing_ext = Some(ext.ext_type);
                }

                dc.elements.push(Element {
                    config: ElementConfig::Ext(ext),
                    signal_group: None,
                    first_signal: None,
                });
                continue;
            }

            let Some(group) = signals.group_of_signal(signal) else {
                bail!(ConfigError::NoSignalGroupLeft);
            };

            let width = if element_type == ElementType::Cpe { 2 } else { 1 };
            if signal + width > signals.groups[group].signals().end {
                bail!(ConfigError::ElementCrossesGroup { signal });
            }

            let config = match element_type {
                ElementType::Sce => ElementConfig::Sce(CoreConfig::read(reader)?),
                ElementType::Cpe => ElementConfig::Cpe(CpeConfig::read(reader, total_signals)?),
                _ => {
                    let offset = signal - signals.groups[group].first_signal;
                    let masked = mct_masks.iter().any(|mct| {
                        mct.signal_group == group
                            && mct.channel_mask.get(offset).copied().unwrap_or(false)
                    });
                    if masked {
                        bail!(ConfigError::LfeInMctMask(signal));
                    }
                    ElementConfig::Lfe
                }
            };

            dc.elements.push(Element {
                config,
                signal_group: Some(group),
                first_signal: Some(signal),
            });

            signal += width;
            trailing_ext = None;
        }

        // only fill elements may follow the last channel element
        if let Some(ext_type) = trailing_ext {
            bail!(ConfigError::TrailingExtension(ext_type.value()));
        }

        if signal != total_signals {
            bail!(ConfigError::SignalCountMismatch {
                coded: signal,
                declared: total_signals
            });
        }

        trace!(
            "decoder config: {} elements, {} coded signals",
            dc.elements.len(),
            signal
        );

        Ok(dc)
    }

    pub fn has_audio_preroll(&self) -> bool {
        self.elements
            .iter()
            .filter_map(Element::ext)
            .any(|ext| ext.ext_type == ExtElementType::AudioPreRoll)
    }

    pub fn count(&self, element_type: ElementType) -> usize {
        self.elements
            .iter()
            .filter(|e| e.element_type() == element_type)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::SubstreamIndex;
    use crate::structs::config::{GroupLayout, SignalGroup};
    use crate::utils::errors::{ErrorCode, classify};
    use crate::utils::test_stream::TestStream;

    fn channel_signals(num_signals: usize) -> Signals3d {
        Signals3d {
            groups: vec![SignalGroup {
                group_type: SignalGroupType::Channels,
                first_signal: 0,
                num_signals,
                layout: Some(GroupLayout::Reference),
            }],
            num_audio_channels: num_signals,
            ..Default::default()
        }
    }

    fn read(buf: &[u8], signals: &Signals3d) -> anyhow::Result<DecoderConfig> {
        let mut ctx = ConfigContext::new(SubstreamIndex::MAIN, log::Level::Error);
        DecoderConfig::read(&mut ctx, &mut BsIoSliceReader::from_slice(buf), signals, 1024)
    }

    fn mct_ext(ts: &mut TestStream, mask: &[bool]) -> std::io::Result<()> {
        ts.put(2, 3)?;
        ts.escaped(4, 8, 16, 9)?; // MCT
        ts.escaped(4, 8, 16, 1)?; // one byte
        ts.flag(false)?.flag(false)?;
        for &bit in mask {
            ts.flag(bit)?;
        }
        ts.put(8 - mask.len() as u32, 0)?;

        Ok(())
    }

    #[test]
    fn shift_bits() {
        assert_eq!(shift_channel_bits(2), 1);
        assert_eq!(shift_channel_bits(3), 2);
        assert_eq!(shift_channel_bits(5), 3);
        assert_eq!(shift_channel_bits(6), 4);
    }

    #[test]
    fn stereo_with_lfe() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.escaped(4, 8, 16, 2)?.flag(false)?;
        mct_ext(&mut ts, &[true, true, false])?;
        ts.put(2, 1)?.put(4, 0)?.put(2, 0)?.flag(false)?.flag(false)?; // CPE
        ts.put(2, 2)?; // LFE
        let buf = ts.finish()?;

        let dc = read(&buf, &channel_signals(3))?;
        assert_eq!(dc.count(ElementType::Cpe), 1);
        assert_eq!(dc.count(ElementType::Lfe), 1);
        assert_eq!(dc.elements[2].first_signal, Some(2));

        Ok(())
    }

    #[test]
    fn lfe_covered_by_mct() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.escaped(4, 8, 16, 2)?.flag(false)?;
        mct_ext(&mut ts, &[true, true, true])?;
        ts.put(2, 1)?.put(4, 0)?.put(2, 0)?.flag(false)?.flag(false)?;
        ts.put(2, 2)?;
        let buf = ts.finish()?;

        let err = read(&buf, &channel_signals(3)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::LfeInMctMask(2))
        ));

        Ok(())
    }

    #[test]
    fn trailing_extension() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.escaped(4, 8, 16, 1)?.flag(false)?;
        ts.put(2, 0)?.put(4, 0)?; // SCE
        mct_ext(&mut ts, &[true])?;
        let buf = ts.finish()?;

        let err = read(&buf, &channel_signals(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::TrailingExtension(9))
        ));

        // pre-roll after the only channel element
        let mut ts = TestStream::new();
        ts.escaped(4, 8, 16, 1)?.flag(false)?;
        ts.put(2, 0)?.put(4, 0)?;
        ts.put(2, 3)?.escaped(4, 8, 16, 3)?.escaped(4, 8, 16, 0)?;
        ts.flag(false)?.flag(false)?;
        let buf = ts.finish()?;

        let err = read(&buf, &channel_signals(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::TrailingExtension(3))
        ));

        // trailing fill is allowed
        let mut ts = TestStream::new();
        ts.escaped(4, 8, 16, 1)?.flag(false)?;
        ts.put(2, 0)?.put(4, 0)?;
        ts.put(2, 3)?.escaped(4, 8, 16, 0)?.escaped(4, 8, 16, 0)?;
        ts.flag(false)?.flag(false)?;
        let buf = ts.finish()?;

        let dc = read(&buf, &channel_signals(1))?;
        assert_eq!(dc.count(ElementType::Ext), 1);

        Ok(())
    }

    #[test]
    fn element_crossing_group() -> anyhow::Result<()> {
        let mut signals = channel_signals(1);
        signals.groups.push(SignalGroup {
            group_type: SignalGroupType::Object,
            first_signal: 1,
            num_signals: 1,
            layout: None,
        });
        signals.num_audio_objects = 1;

        let mut ts = TestStream::new();
        ts.escaped(4, 8, 16, 0)?.flag(false)?;
        ts.put(2, 1)?.put(4, 0)?.put(2, 0)?.flag(false)?.flag(false)?;
        let buf = ts.finish()?;

        let err = read(&buf, &signals).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ElementCrossesGroup { signal: 0 })
        ));

        Ok(())
    }

    #[test]
    fn time_warped_mdct() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.escaped(4, 8, 16, 0)?.flag(false)?;
        ts.put(2, 0)?.flag(true)?.put(3, 0)?;
        let buf = ts.finish()?;

        let err = read(&buf, &channel_signals(1)).unwrap_err();
        assert_eq!(classify(&err), ErrorCode::UnsupportedFormat);

        Ok(())
    }
}
