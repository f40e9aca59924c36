//! Bit writer helpers for building synthetic bitstreams in tests.

use std::io;

use bitstream_io::{BigEndian, BitWrite, BitWriter};

pub struct TestStream {
    bw: BitWriter<Vec<u8>, BigEndian>,
    bits: u64,
}

impl TestStream {
    pub fn new() -> Self {
        Self {
            bw: BitWriter::endian(Vec::new(), BigEndian),
            bits: 0,
        }
    }

    pub fn put(&mut self, n: u32, value: u32) -> io::Result<&mut Self> {
        if n > 0 {
            self.bw.write_var::<u32>(n, value)?;
            self.bits += n as u64;
        }

        Ok(self)
    }

    pub fn flag(&mut self, value: bool) -> io::Result<&mut Self> {
        self.bw.write_bit(value)?;
        self.bits += 1;

        Ok(self)
    }

    pub fn escaped(&mut self, n1: u32, n2: u32, n3: u32, value: u32) -> io::Result<&mut Self> {
        let max1 = (1u32 << n1) - 1;
        if value < max1 {
            return self.put(n1, value);
        }
        self.put(n1, max1)?;

        let rest = value - max1;
        let max2 = (1u32 << n2) - 1;
        if rest < max2 || n3 == 0 {
            return self.put(n2, rest);
        }
        self.put(n2, max2)?;

        self.put(n3, rest - max2)
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> io::Result<&mut Self> {
        for &byte in bytes {
            self.put(8, byte as u32)?;
        }

        Ok(self)
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn finish(mut self) -> io::Result<Vec<u8>> {
        self.bw.byte_align()?;
        Ok(self.bw.into_writer())
    }
}

/// Serializes one MHAS packet with the given type, label and payload.
pub fn mhas_packet(packet_type: u32, label: u32, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut ts = TestStream::new();
    ts.escaped(3, 8, 8, packet_type)?
        .escaped(2, 8, 32, label)?
        .escaped(11, 24, 24, payload.len() as u32)?
        .bytes(payload)?;

    ts.finish()
}
