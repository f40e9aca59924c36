//! Data structures representing MPEG-H 3D Audio bitstream syntax.
//!
//! Each structure is read from a [`BsIoSliceReader`] by its own `read`
//! constructor. Structures that can change between access units are compared
//! with the previously accepted value by the [`process`] layer.
//!
//! [`BsIoSliceReader`]: crate::utils::bitstream_io::BsIoSliceReader
//! [`process`]: crate::process

pub mod asi;
pub mod config;
pub mod config_extension;
pub mod decoder_config;
pub mod ext_element;
pub mod packet;
pub mod speaker;
pub mod truncation;

