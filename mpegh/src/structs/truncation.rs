//! `audioTruncationInfo()` carried in `PACTYP_AUDIOTRUNCATION` packets.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::PacketError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioTruncation {
    pub is_active: bool,
    /// Samples are removed from the start of the frame instead of the end.
    pub from_begin: bool,
    pub samples: u16,
}

impl AudioTruncation {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let is_active = reader.get()?;
        // ati_reserved
        reader.skip_n(1)?;

        Ok(Self {
            is_active,
            from_begin: reader.get()?,
            samples: reader.get_n(13)?,
        })
    }

    /// Rejects truncations longer than the output frame.
    pub fn validate(&self, frame_length: usize) -> Result<()> {
        if self.is_active && self.samples as usize > frame_length {
            bail!(PacketError::TruncationTooLong {
                samples: self.samples,
                frame_length
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_stream::TestStream;

    #[test]
    fn truncation_info() -> anyhow::Result<()> {
        let mut ts = TestStream::new();
        ts.flag(true)?.flag(false)?.flag(true)?.put(13, 512)?;
        let buf = ts.finish()?;

        let truncation = AudioTruncation::read(&mut BsIoSliceReader::from_slice(&buf))?;
        assert!(truncation.is_active && truncation.from_begin);
        assert_eq!(truncation.samples, 512);

        truncation.validate(1024)?;
        assert!(truncation.validate(256).is_err());

        Ok(())
    }
}
