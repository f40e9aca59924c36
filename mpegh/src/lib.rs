#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Transport layer for MPEG-H 3D Audio (ISO/IEC 23008-3) streams carried in
//! MHAS packets.
//!
//! ### Stream Organization
//!
//! **Packets**: every MHAS packet starts with an escape coded type, label and
//! length. The label ties configuration, scene information and frame packets
//! of one substream together.
//! **Access Units**: packets up to and including the frame that completes the
//! set of configured labels.
//!
//! ### Configuration Changes
//!
//! A configuration identical to the one in use is skipped without parsing.
//! A configuration that only changes the loudness information is handed to
//! the DRC callback. Structural changes are preceded by a flush and followed
//! by a build-up phase, both reported through
//! [`callbacks::TransportCallbacks::control_cfg_change`].
//!
//! ## Quick Start
//!
//! 1. Implement [`callbacks::TransportCallbacks`] for the audio decoder
//! 2. Feed bytes to a [`process::sync::TransportDecoder`]
//! 3. Call [`process::sync::TransportDecoder::read_access_unit`] until it asks
//!    for more data
//!
//! ```rust
//! use mpegh::callbacks::{ConfigMode, FramePayload, TransportCallbacks};
//! use mpegh::process::params::TransportType;
//! use mpegh::process::sync::TransportDecoder;
//! use mpegh::process::{EXAMPLE_DATA, SubstreamIndex};
//! use mpegh::structs::config::AudioSpecificConfig;
//!
//! #[derive(Default)]
//! struct Decoder {
//!     frames: Vec<Vec<u8>>,
//! }
//!
//! impl TransportCallbacks for Decoder {
//!     fn update_config(
//!         &mut self,
//!         config: &AudioSpecificConfig,
//!         mode: ConfigMode,
//!         _substream: SubstreamIndex,
//!     ) -> anyhow::Result<bool> {
//!         println!("{mode:?}: {} Hz", config.sampling_frequency);
//!         Ok(false)
//!     }
//!
//!     fn free_mem(&mut self, _: &AudioSpecificConfig, _: SubstreamIndex) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn decode_frame(&mut self, frame: &FramePayload) -> anyhow::Result<()> {
//!         self.frames.push(frame.data.to_vec());
//!         Ok(())
//!     }
//! }
//!
//! let mut decoder = TransportDecoder::new(TransportType::Mhas, Decoder::default());
//! decoder.fill_data(EXAMPLE_DATA);
//!
//! loop {
//!     match decoder.read_access_unit() {
//!         Ok(info) => println!("{} bytes, {} frames", info.bytes, info.frames),
//!         Err(e) if e.is_not_enough_bits() => break,
//!         Err(e) if e.code.is_fatal() => return Err(e.into()),
//!         Err(e) => eprintln!("Access unit error: {e}"),
//!     }
//! }
//!
//! assert_eq!(decoder.callbacks().frames.len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Hooks into the consuming audio decoder.
pub mod callbacks;

/// Stream level processing.
///
/// 1. **Synchronisation** ([`process::sync`]): Input buffering, sync packet
///    search and access unit delimiting.
///
/// 2. **Packet Handling** ([`process::mhas`]): Dispatch of configuration,
///    scene information, frame and metadata packets.
///
/// 3. **Configuration Changes** ([`process::cfg_change`]): Flush and build-up
///    sequencing.
pub mod process;

/// Data structures representing MPEG-H bitstream syntax.
///
/// - **Packets** ([`structs::packet`]): MHAS packet headers and walking
/// - **Configuration** ([`structs::config`]): `mpegh3daConfig()`
/// - **Decoder Configuration** ([`structs::decoder_config`]): Element list
/// - **Extension Elements** ([`structs::ext_element`]): Element extensions
/// - **Configuration Extensions** ([`structs::config_extension`]): Trailing extensions
/// - **Speaker Layouts** ([`structs::speaker`]): CICP and flexible layouts
/// - **Scene Information** ([`structs::asi`]): Groups, switch groups and presets
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading
/// - **CRC Validation** ([`utils::crc`]): Error detection
/// - **Error Handling** ([`utils::errors`]): Error types and codes
/// - **Change Tracking** ([`utils::diff`]): Compare and assign with flags
pub mod utils;
