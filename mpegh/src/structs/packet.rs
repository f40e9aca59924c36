//! MHAS packet framing.
//!
//! Every packet starts with three escaped fields: type, label and payload
//! length in bytes. Their widths always add up to whole bytes, so packets
//! stay byte aligned.
//!
//! ## Sync Packet
//!
//! `PACTYP_SYNC` with label 0 and a single `0xA5` payload byte encodes as
//! `C0 01 A5`. Sync search looks for exactly this pattern.

use std::fmt;
use std::io;

use anyhow::{Result, bail};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::SyncError;

pub const MHAS_SYNC_BYTE: u8 = 0xA5;

/// Encoded `PACTYP_SYNC` packet.
pub const MHAS_SYNC_PACKET: [u8; 3] = [0xC0, 0x01, MHAS_SYNC_BYTE];

/// Longest possible header: 19 + 42 + 59 bits.
pub const MAX_HEADER_BYTES: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    FillData,
    Config,
    Frame,
    SceneInfo,
    Sync,
    SyncGap,
    Marker,
    Crc16,
    Crc32,
    Descriptor,
    UserInteraction,
    LoudnessDrc,
    BufferInfo,
    GlobalCrc16,
    GlobalCrc32,
    AudioTruncation,
    GenData,
    Earcon,
    PcmConfig,
    PcmData,
    Loudness,
    Unknown(u32),
}

impl From<u32> for PacketType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::FillData,
            1 => Self::Config,
            2 => Self::Frame,
            3 => Self::SceneInfo,
            6 => Self::Sync,
            7 => Self::SyncGap,
            8 => Self::Marker,
            9 => Self::Crc16,
            10 => Self::Crc32,
            11 => Self::Descriptor,
            12 => Self::UserInteraction,
            13 => Self::LoudnessDrc,
            14 => Self::BufferInfo,
            15 => Self::GlobalCrc16,
            16 => Self::GlobalCrc32,
            17 => Self::AudioTruncation,
            18 => Self::GenData,
            19 => Self::Earcon,
            20 => Self::PcmConfig,
            21 => Self::PcmData,
            22 => Self::Loudness,
            other => Self::Unknown(other),
        }
    }
}

impl PacketType {
    pub fn value(self) -> u32 {
        match self {
            Self::FillData => 0,
            Self::Config => 1,
            Self::Frame => 2,
            Self::SceneInfo => 3,
            Self::Sync => 6,
            Self::SyncGap => 7,
            Self::Marker => 8,
            Self::Crc16 => 9,
            Self::Crc32 => 10,
            Self::Descriptor => 11,
            Self::UserInteraction => 12,
            Self::LoudnessDrc => 13,
            Self::BufferInfo => 14,
            Self::GlobalCrc16 => 15,
            Self::GlobalCrc32 => 16,
            Self::AudioTruncation => 17,
            Self::GenData => 18,
            Self::Earcon => 19,
            Self::PcmConfig => 20,
            Self::PcmData => 21,
            Self::Loudness => 22,
            Self::Unknown(other) => other,
        }
    }

    /// Packets whose label selects a substream.
    pub fn is_labelled(self) -> bool {
        matches!(
            self,
            Self::Config
                | Self::Frame
                | Self::SceneInfo
                | Self::AudioTruncation
                | Self::UserInteraction
                | Self::LoudnessDrc
                | Self::Loudness
                | Self::Earcon
                | Self::PcmConfig
                | Self::PcmData
        )
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FillData => "FILLDATA",
            Self::Config => "MPEGH3DACFG",
            Self::Frame => "MPEGH3DAFRAME",
            Self::SceneInfo => "AUDIOSCENEINFO",
            Self::Sync => "SYNC",
            Self::SyncGap => "SYNCGAP",
            Self::Marker => "MARKER",
            Self::Crc16 => "CRC16",
            Self::Crc32 => "CRC32",
            Self::Descriptor => "DESCRIPTOR",
            Self::UserInteraction => "USERINTERACTION",
            Self::LoudnessDrc => "LOUDNESS_DRC",
            Self::BufferInfo => "BUFFERINFO",
            Self::GlobalCrc16 => "GLOBAL_CRC16",
            Self::GlobalCrc32 => "GLOBAL_CRC32",
            Self::AudioTruncation => "AUDIOTRUNCATION",
            Self::GenData => "GENDATA",
            Self::Earcon => "EARCON",
            Self::PcmConfig => "PCMCONFIG",
            Self::PcmData => "PCMDATA",
            Self::Loudness => "LOUDNESS",
            Self::Unknown(value) => return write!(f, "UNKNOWN({value})"),
        };

        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub label: u32,
    /// Payload length in bytes.
    pub length: u32,
    /// Header length in bytes.
    pub header_len: usize,
}

impl PacketHeader {
    /// Reads a header at a byte aligned position.
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let start = reader.position()?;

        let packet_type = PacketType::from(reader.get_escaped(3, 8, 8)?);
        let label = reader.get_escaped(2, 8, 32)?;
        let length = reader.get_escaped(11, 24, 24)?;

        let header_len = ((reader.position()? - start) >> 3) as usize;

        Ok(Self {
            packet_type,
            label,
            length,
            header_len,
        })
    }

    /// Total packet size in bytes.
    pub fn packet_len(&self) -> usize {
        self.header_len + self.length as usize
    }

    /// Checks that a sync packet has the expected shape.
    pub fn validate_sync(&self, payload: &[u8]) -> Result<()> {
        if self.length != 1 {
            bail!(SyncError::InvalidSyncPacketLength(self.length));
        }

        match payload.first() {
            Some(&MHAS_SYNC_BYTE) => Ok(()),
            Some(&other) => bail!(SyncError::InvalidSyncPacket(other)),
            None => Err(insufficient("sync payload").into()),
        }
    }
}

fn insufficient(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, format!("{what}: packet incomplete"))
}

/// One complete packet within a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub header: PacketHeader,
    /// Byte offset of the header within the walked slice.
    pub offset: usize,
    pub payload: &'a [u8],
}

impl Packet<'_> {
    /// Byte offset just past this packet.
    pub fn end(&self) -> usize {
        self.offset + self.header.packet_len()
    }
}

/// Reads the header at the start of `buf` and returns the full packet.
///
/// Fails with an `UnexpectedEof` I/O error if either the header or the
/// payload is cut short.
pub fn read_packet(buf: &[u8], offset: usize) -> Result<Packet<'_>> {
    let Some(data) = buf.get(offset..) else {
        return Err(insufficient("packet header").into());
    };

    let mut reader = BsIoSliceReader::from_slice(data);
    let header = PacketHeader::read(&mut reader)?;

    let Some(payload) = data.get(header.header_len..header.packet_len()) else {
        return Err(insufficient("packet payload").into());
    };

    Ok(Packet {
        header,
        offset,
        payload,
    })
}

/// Iterates over the packets in a byte slice without interpreting them.
///
/// Iteration ends after the last complete packet. A truncated trailing
/// packet is reported once as an error.
///
/// # Example
///
/// ```rust
/// use mpegh::structs::packet::{PacketType, PacketWalker, MHAS_SYNC_PACKET};
///
/// let packets = PacketWalker::new(&MHAS_SYNC_PACKET)
///     .collect::<anyhow::Result<Vec<_>>>()?;
/// assert_eq!(packets[0].header.packet_type, PacketType::Sync);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct PacketWalker<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> PacketWalker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            done: false,
        }
    }

    /// Byte offset of the next packet.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for PacketWalker<'a> {
    type Item = Result<Packet<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.buf.len() {
            return None;
        }

        match read_packet(self.buf, self.offset) {
            Ok(packet) => {
                self.offset = packet.end();
                Some(Ok(packet))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::{ErrorCode, classify};
    use crate::utils::test_stream::mhas_packet;

    #[test]
    fn sync_packet_encoding() -> anyhow::Result<()> {
        assert_eq!(mhas_packet(6, 0, &[MHAS_SYNC_BYTE])?, MHAS_SYNC_PACKET.to_vec());

        let packet = read_packet(&MHAS_SYNC_PACKET, 0)?;
        assert_eq!(packet.header.header_len, 2);
        packet.header.validate_sync(packet.payload)?;

        Ok(())
    }

    #[test]
    fn escaped_header_fields() -> anyhow::Result<()> {
        let payload = vec![0u8; 3000];
        let buf = mhas_packet(17, 5, &payload)?;

        let packet = read_packet(&buf, 0)?;
        assert_eq!(packet.header.packet_type, PacketType::AudioTruncation);
        assert_eq!(packet.header.label, 5);
        assert_eq!(packet.header.length, 3000);
        assert_eq!(packet.header.header_len, 7);
        assert_eq!(packet.end(), buf.len());

        Ok(())
    }

    #[test]
    fn walker_stops_at_truncated_packet() -> anyhow::Result<()> {
        let mut buf = MHAS_SYNC_PACKET.to_vec();
        buf.extend(mhas_packet(2, 1, &[1, 2, 3, 4])?);
        buf.truncate(buf.len() - 1);

        let mut walker = PacketWalker::new(&buf);
        assert_eq!(walker.next().transpose()?.map(|p| p.offset), Some(0));

        let err = walker.next().and_then(|r| r.err());
        assert_eq!(err.map(|e| classify(&e)), Some(ErrorCode::NotEnoughBits));
        assert!(walker.next().is_none());

        Ok(())
    }

    #[test]
    fn unknown_type_roundtrips_value() {
        let packet_type = PacketType::from(42);
        assert_eq!(packet_type, PacketType::Unknown(42));
        assert_eq!(packet_type.value(), 42);
        assert_eq!(PacketType::from(22).to_string(), "LOUDNESS");
    }
}
