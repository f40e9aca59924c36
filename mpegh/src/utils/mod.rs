//! Utility functions and supporting infrastructure.
//!
//! Provides bitstream I/O, CRC validation, error handling and change
//! tracking for the MPEG-H parsers.

pub mod bitstream_io;
pub mod crc;
pub mod diff;
pub mod errors;

#[cfg(test)]
pub mod test_stream;
