//! Hooks the transport decoder calls into the audio decoder.
//!
//! Only [`TransportCallbacks::update_config`] and
//! [`TransportCallbacks::free_mem`] must be provided. The remaining hooks
//! default to no-ops so a consumer only implements what it handles.
//!
//! Hooks that receive a reader get it positioned at the start of the payload
//! they are responsible for. Reading less than the announced length is fine;
//! the transport layer skips the remainder. Reading more is a parse error.

use anyhow::Result;

use crate::process::SubstreamIndex;
use crate::process::cfg_change::CfgChangeControl;
use crate::structs::config::AudioSpecificConfig;
use crate::structs::packet::PacketType;
use crate::structs::truncation::AudioTruncation;
use crate::utils::bitstream_io::BsIoSliceReader;

/// Pass of a configuration update.
///
/// `Detect` asks whether the new configuration needs memory to be
/// reallocated. `Alloc` applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    Detect,
    Alloc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrcPayloadKind {
    /// `mpegh3daUniDrcConfig()` from an extension element. Empty payload clears.
    UniDrcConfig,
    /// `mpegh3daLoudnessInfoSet()`. Empty payload clears.
    LoudnessInfoSet,
    /// No downmix configuration is present any longer.
    DownmixClear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniDrcPayload {
    pub kind: DrcPayloadKind,
    pub byte_len: u32,
    pub substream: SubstreamIndex,
    /// Bit position of the payload within the reader.
    pub start_bit: u64,
    pub audio_object_type: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownmixContext {
    pub substream: SubstreamIndex,
    pub downmix_config_type: u8,
    /// Bytes left in the downmix configuration extension.
    pub byte_len: u32,
    pub target_layout: Option<u8>,
}

/// One audio frame handed to the decoder.
#[derive(Debug, Clone, Copy)]
pub struct FramePayload<'a> {
    pub substream: SubstreamIndex,
    pub label: u32,
    pub data: &'a [u8],
    pub truncation: Option<AudioTruncation>,
}

pub trait TransportCallbacks {
    /// Announces a configuration.
    ///
    /// In `Detect` mode the return value tells whether memory has to be
    /// reallocated. In `Alloc` mode it is ignored.
    fn update_config(
        &mut self,
        config: &AudioSpecificConfig,
        mode: ConfigMode,
        substream: SubstreamIndex,
    ) -> Result<bool>;

    /// Releases memory held for the configuration about to be replaced.
    fn free_mem(&mut self, config: &AudioSpecificConfig, substream: SubstreamIndex) -> Result<()>;

    fn decode_frame(&mut self, _frame: &FramePayload) -> Result<()> {
        Ok(())
    }

    /// Reports a flush or build-up transition.
    fn control_cfg_change(
        &mut self,
        _control: &CfgChangeControl,
        _substream: SubstreamIndex,
    ) -> Result<()> {
        Ok(())
    }

    fn truncation(
        &mut self,
        _samples: u16,
        _from_begin: bool,
        _substream: SubstreamIndex,
    ) -> Result<()> {
        Ok(())
    }

    fn uni_drc(&mut self, _reader: &mut BsIoSliceReader, _payload: &UniDrcPayload) -> Result<()> {
        Ok(())
    }

    fn downmix_matrix(
        &mut self,
        _reader: &mut BsIoSliceReader,
        _context: &DownmixContext,
    ) -> Result<()> {
        Ok(())
    }

    /// `PACTYP_USERINTERACTION` and `PACTYP_LOUDNESS_DRC` payloads.
    fn user_interaction(
        &mut self,
        _reader: &mut BsIoSliceReader,
        _packet_type: PacketType,
        _byte_len: u32,
    ) -> Result<()> {
        Ok(())
    }

    /// `PACTYP_EARCON`, `PACTYP_PCMCONFIG` and `PACTYP_PCMDATA` payloads.
    fn earcon(
        &mut self,
        _reader: &mut BsIoSliceReader,
        _packet_type: PacketType,
        _byte_len: u32,
    ) -> Result<()> {
        Ok(())
    }

    fn marker(&mut self, _data: &[u8], _label: u32) -> Result<()> {
        Ok(())
    }
}
