//! Bitstream I/O utilities for MPEG-H parsing.
//!
//! Provides MSB-first bit reading, escaped value decoding, bounded seeking
//! and CRC computation over arbitrary bit regions.

use std::io;
use std::io::SeekFrom;

use bitstream_io::{BigEndian, BitRead, BitReader, UnsignedInteger};

use crate::utils::crc::{Crc16, Crc32};

const STACK_BUF_SIZE: usize = 256;

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

fn out_of_bounds(what: &str, at: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("{what}: out of bounds bits at {at}"),
    )
}

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        if n <= 32 {
            match self.bs.read_unsigned_var(n) {
                Ok(val) => Ok(val),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(out_of_bounds(
                    &format!("get_n({n})"),
                    self.bs.position_in_bits().unwrap_or(0),
                )),
                Err(e) => Err(e),
            }
        } else {
            self.available().and_then(|avail| {
                if n as u64 > avail {
                    Err(out_of_bounds(
                        &format!("get_n({n})"),
                        self.bs.position_in_bits().unwrap_or(0),
                    ))
                } else {
                    self.bs.read_unsigned_var(n)
                }
            })
        }
    }

    /// Reads an escaped value with the three field widths `n1`, `n2`, `n3`.
    ///
    /// Each stage is read only when the previous field was all ones; the
    /// stage values are summed. A zero width ends the escape chain.
    #[inline(always)]
    pub fn get_escaped(&mut self, n1: u32, n2: u32, n3: u32) -> io::Result<u32> {
        let mut value = 0u32;
        let mut escape = true;

        for n in [n1, n2, n3] {
            if !escape || n == 0 {
                break;
            }

            let field: u32 = self.get_n(n)?;
            value = value.checked_add(field).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("get_escaped({n1}, {n2}, {n3}): value overflow"),
                )
            })?;

            escape = n < 32 && field == (1u32 << n) - 1;
        }

        Ok(value)
    }

    #[inline(always)]
    pub fn seek(&mut self, offset: i64) -> io::Result<u64> {
        if (offset < 0 && self.position()? as i64 + offset >= 0)
            || (offset >= 0 && self.available()? as i64 >= offset)
        {
            return self.bs.seek_bits(SeekFrom::Current(offset));
        }

        Err(out_of_bounds(&format!("seek({offset})"), self.position()?))
    }

    /// Moves the cursor to an absolute bit position.
    #[inline(always)]
    pub fn seek_to(&mut self, position: u64) -> io::Result<u64> {
        if position > self.len {
            return Err(out_of_bounds(&format!("seek_to({position})"), self.position()?));
        }

        self.bs.seek_bits(SeekFrom::Start(position))
    }

    #[inline(always)]
    pub fn crc16_check(&mut self, crc: &Crc16, start: u64, len: u64) -> io::Result<u16> {
        let position = self.position()?;

        if start + len > self.len {
            return Err(out_of_bounds("crc16_check", start + len));
        }

        self.bs.seek_bits(SeekFrom::Start(start))?;

        let mut checksum = crc.init;

        let prefix_len = ((8 - (start & 7)) & 7).min(len);
        let suffix_len = (len - prefix_len) & 7;
        let middle_len = (len - prefix_len - suffix_len) as usize;

        if prefix_len != 0 {
            let prefix: u16 = self.bs.read_var(prefix_len as u32)?;
            checksum = crc.update_bits(checksum, prefix, prefix_len as u32);
        }

        let bytes_len = middle_len >> 3;
        if bytes_len <= STACK_BUF_SIZE {
            let mut stack_buf = [0u8; STACK_BUF_SIZE];
            let buf = &mut stack_buf[..bytes_len];
            self.bs.read_bytes(buf)?;
            checksum = crc.update(checksum, buf);
        } else {
            let mut heap_buf = vec![0; bytes_len];
            self.bs.read_bytes(&mut heap_buf)?;
            checksum = crc.update(checksum, &heap_buf);
        };

        if suffix_len != 0 {
            let suffix: u16 = self.bs.read_var(suffix_len as u32)?;
            checksum = crc.update_bits(checksum, suffix, suffix_len as u32);
        }

        self.bs.seek_bits(SeekFrom::Start(position))?;

        Ok(checksum)
    }

    #[inline(always)]
    pub fn crc32_check(&mut self, crc: &Crc32, start: u64, len: u64) -> io::Result<u32> {
        let position = self.position()?;

        if start + len > self.len {
            return Err(out_of_bounds("crc32_check", start + len));
        }

        self.bs.seek_bits(SeekFrom::Start(start))?;

        let mut checksum = crc.init;

        let prefix_len = ((8 - (start & 7)) & 7).min(len);
        let suffix_len = (len - prefix_len) & 7;
        let middle_len = (len - prefix_len - suffix_len) as usize;

        if prefix_len != 0 {
            let prefix: u32 = self.bs.read_var(prefix_len as u32)?;
            checksum = crc.update_bits(checksum, prefix, prefix_len as u32);
        }

        let bytes_len = middle_len >> 3;
        if bytes_len <= STACK_BUF_SIZE {
            let mut stack_buf = [0u8; STACK_BUF_SIZE];
            let buf = &mut stack_buf[..bytes_len];
            self.bs.read_bytes(buf)?;
            checksum = crc.update(checksum, buf);
        } else {
            let mut heap_buf = vec![0; bytes_len];
            self.bs.read_bytes(&mut heap_buf)?;
            checksum = crc.update(checksum, &heap_buf);
        };

        if suffix_len != 0 {
            let suffix: u32 = self.bs.read_var(suffix_len as u32)?;
            checksum = crc.update_bits(checksum, suffix, suffix_len as u32);
        }

        self.bs.seek_bits(SeekFrom::Start(position))?;

        Ok(checksum)
    }

    /// Copies whole bytes from the current (byte aligned or not) position.
    pub fn get_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if (buf.len() as u64) << 3 > self.available()? {
            return Err(out_of_bounds(
                &format!("get_bytes({})", buf.len()),
                self.position()?,
            ));
        }

        self.bs.read_bytes(buf)
    }

    #[inline(always)]
    pub fn byte_align(&mut self) {
        self.bs.byte_align();
    }

    #[inline(always)]
    pub fn is_byte_aligned(&self) -> bool {
        self.bs.byte_aligned()
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits().map(|pos| self.len - pos)
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        if n <= 64 {
            self.bs.skip(n)
        } else {
            self.available().and_then(|avail| {
                if n as u64 > avail {
                    Err(out_of_bounds(&format!("skip_n({n})"), self.len - avail))
                } else {
                    self.bs.skip(n)
                }
            })
        }
    }

    /// Skips a byte count taken from a length field.
    #[inline(always)]
    pub fn skip_bytes(&mut self, n: u32) -> io::Result<()> {
        let bits = (n as u64) << 3;
        if bits > self.available()? {
            return Err(out_of_bounds(&format!("skip_bytes({n})"), self.position()?));
        }

        self.bs.seek_bits(SeekFrom::Current(bits as i64)).map(|_| ())
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }

    /// Total length of the underlying buffer in bits.
    #[inline(always)]
    pub fn len_bits(&self) -> u64 {
        self.len
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

impl Default for BsIoSliceReader<'_> {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crc::CRC16_MHAS_ALG;
    use crate::utils::test_stream::TestStream;

    #[test]
    fn escaped_value_boundaries() -> anyhow::Result<()> {
        // n1 field short of all ones
        let mut ts = TestStream::new();
        ts.put(3, 6)?;
        let buf = ts.finish()?;
        assert_eq!(BsIoSliceReader::from_slice(&buf).get_escaped(3, 8, 8)?, 6);

        // n1 all ones, n2 zero
        let mut ts = TestStream::new();
        ts.put(3, 7)?.put(8, 0)?;
        let buf = ts.finish()?;
        assert_eq!(BsIoSliceReader::from_slice(&buf).get_escaped(3, 8, 8)?, 7);

        // n1 and n2 all ones, n3 carries the rest
        let mut ts = TestStream::new();
        ts.put(3, 7)?.put(8, 255)?.put(8, 10)?;
        let buf = ts.finish()?;
        assert_eq!(
            BsIoSliceReader::from_slice(&buf).get_escaped(3, 8, 8)?,
            7 + 255 + 10
        );

        // no third stage
        let mut ts = TestStream::new();
        ts.put(8, 255)?.put(16, 0xFFFF)?.put(8, 0xAB)?;
        let buf = ts.finish()?;
        let mut reader = BsIoSliceReader::from_slice(&buf);
        assert_eq!(reader.get_escaped(8, 16, 0)?, 255 + 0xFFFF);
        assert_eq!(reader.get_n::<u8>(8)?, 0xAB);

        Ok(())
    }

    #[test]
    fn escaped_value_truncated() -> anyhow::Result<()> {
        let buf = [0xFFu8];
        let err = BsIoSliceReader::from_slice(&buf)
            .get_escaped(3, 8, 8)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        Ok(())
    }

    #[test]
    fn unaligned_crc_region() -> anyhow::Result<()> {
        let crc = Crc16::new(&CRC16_MHAS_ALG);
        let data = [0x12u8, 0x34, 0x56, 0x78];

        // the same bytes shifted by three bits
        let mut ts = TestStream::new();
        ts.put(3, 0b101)?;
        for byte in data {
            ts.put(8, byte as u32)?;
        }
        let buf = ts.finish()?;

        let mut reader = BsIoSliceReader::from_slice(&buf);
        reader.skip_n(1)?;
        assert_eq!(reader.crc16_check(&crc, 3, 32)?, crc.checksum(&data));
        assert_eq!(reader.position()?, 1);

        Ok(())
    }
}
