use std::fmt::Display;

use anyhow::{Result, bail};

use crate::utils::errors::PacketError;

/// Configuration change control: flush and build-up sequencing.
pub mod cfg_change;

/// MHAS packet state machine.
///
/// Dispatches the packets of one access unit to the configuration, scene
/// information and frame handlers of a [`TransportDecoder`](sync::TransportDecoder).
pub mod mhas;

/// Runtime parameters of the transport decoder.
pub mod params;

/// Input buffering and synchronisation.
///
/// Provides the [`TransportDecoder`](sync::TransportDecoder), which searches
/// for MHAS sync packets and hands complete access units to the packet state
/// machine.
pub mod sync;

/// One synchronisation packet, one mono 48 kHz configuration on label 1 and
/// two frames with a sync packet in between.
pub const EXAMPLE_DATA: &[u8] = &[
    0xC0, 0x01, 0xA5, 0x28, 0x07, 0x0B, 0x19, 0x00, 0x40, 0x00, 0x00, 0x00, 0x48, 0x04, 0x11, 0x22,
    0x33, 0x44, 0xC0, 0x01, 0xA5, 0x48, 0x04, 0x55, 0x66, 0x77, 0x88,
];

/// Number of substreams (MHAS labels) decoded in parallel.
pub const MAX_SUBSTREAMS: usize = 3;

/// Index of a substream slot. Slot 0 is the main substream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubstreamIndex(u8);

impl SubstreamIndex {
    pub const MAIN: Self = Self(0);

    pub fn new(index: usize) -> Result<Self> {
        if index >= MAX_SUBSTREAMS {
            bail!(PacketError::InvalidSubstreamIndex(index, MAX_SUBSTREAMS - 1));
        }

        Ok(Self(index as u8))
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_main(self) -> bool {
        self == Self::MAIN
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..MAX_SUBSTREAMS as u8).map(Self)
    }
}

impl Display for SubstreamIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "substream {}", self.0)
    }
}

#[test]
fn test_substream_index() -> anyhow::Result<()> {
    assert_eq!(SubstreamIndex::new(2)?.index(), 2);
    assert!(SubstreamIndex::new(MAX_SUBSTREAMS).is_err());
    assert_eq!(SubstreamIndex::all().count(), MAX_SUBSTREAMS);
    assert!(SubstreamIndex::MAIN.is_main());
    Ok(())
}
