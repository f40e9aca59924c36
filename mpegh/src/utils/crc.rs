//! CRC utilities for MHAS packet protection.
//!
//! Provides MSB-first CRC-16 and CRC-32 implementations with the algorithms
//! used by the MHAS `PACTYP_CRC16`/`PACTYP_CRC32` packets. The same CRC-16
//! is used to fingerprint the structural part of the audio scene information.

/// CRC algorithm parameters: polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
}

/// CRC-16 algorithm for `PACTYP_CRC16` protected packets.
pub const CRC16_MHAS_ALG: Algorithm<u16> = Algorithm {
    poly: 0x8005,
    init: 0xFFFF,
};

/// CRC-32 algorithm for `PACTYP_CRC32` protected packets.
pub const CRC32_MHAS_ALG: Algorithm<u32> = Algorithm {
    poly: 0x04C1_1DB7,
    init: 0xFFFF_FFFF,
};

/// Shared CRC-16 instance for packet checks and payload fingerprints.
pub static MHAS_CRC16: Crc16 = Crc16::new(&CRC16_MHAS_ALG);

/// Shared CRC-32 instance for packet checks.
pub static MHAS_CRC32: Crc32 = Crc32::new(&CRC32_MHAS_ALG);

/// Shifts `len` zero bits through a CRC-16 register.
#[inline(always)]
pub const fn crc16(poly: u16, mut value: u16, len: usize) -> u16 {
    let mut i = 0;
    while i < len {
        value = (value << 1) ^ (((value >> 15) & 1) * poly);
        i += 1;
    }

    value
}

/// Shifts `len` zero bits through a CRC-32 register.
#[inline(always)]
pub const fn crc32(poly: u32, mut value: u32, len: usize) -> u32 {
    let mut i = 0;
    while i < len {
        value = (value << 1) ^ (((value >> 31) & 1) * poly);
        i += 1;
    }

    value
}

#[inline(always)]
const fn crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc16(poly, (i as u16) << 8, 8);
        i += 1;
    }

    table
}

#[inline(always)]
const fn crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc32(poly, (i as u32) << 24, 8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc16 {
    pub poly: u16,
    pub init: u16,
    table: [u16; 256],
}

#[derive(Debug)]
pub struct Crc32 {
    pub poly: u32,
    pub init: u32,
    table: [u32; 256],
}

impl Crc16 {
    pub const fn new(algorithm: &Algorithm<u16>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc16_table(algorithm.poly),
        }
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u16, bytes: &[u8]) -> u16 {
        let mut i = 0;

        while i < bytes.len() {
            crc = (crc << 8) ^ self.table[((crc >> 8) as u8 ^ bytes[i]) as usize];
            i += 1;
        }

        crc
    }

    /// Feeds the `len` least significant bits of `value`, MSB first.
    #[inline(always)]
    pub const fn update_bits(&self, mut crc: u16, value: u16, len: u32) -> u16 {
        let mut i = len;
        while i > 0 {
            i -= 1;
            let bit = (value >> i) & 1;
            let top = (crc >> 15) & 1;
            crc = (crc << 1) ^ ((top ^ bit) * self.poly);
        }

        crc
    }

    pub const fn checksum(&self, bytes: &[u8]) -> u16 {
        self.update(self.init, bytes)
    }
}

impl Crc32 {
    pub const fn new(algorithm: &Algorithm<u32>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc32_table(algorithm.poly),
        }
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u32, bytes: &[u8]) -> u32 {
        let mut i = 0;

        while i < bytes.len() {
            crc = (crc << 8) ^ self.table[((crc >> 24) as u8 ^ bytes[i]) as usize];
            i += 1;
        }

        crc
    }

    /// Feeds the `len` least significant bits of `value`, MSB first.
    #[inline(always)]
    pub const fn update_bits(&self, mut crc: u32, value: u32, len: u32) -> u32 {
        let mut i = len;
        while i > 0 {
            i -= 1;
            let bit = (value >> i) & 1;
            let top = (crc >> 31) & 1;
            crc = (crc << 1) ^ ((top ^ bit) * self.poly);
        }

        crc
    }

    pub const fn checksum(&self, bytes: &[u8]) -> u32 {
        self.update(self.init, bytes)
    }
}
