use std::fmt;
use std::io;

#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

pub const FATAL_ERROR_START: u16 = 0x100;
pub const FATAL_ERROR_END: u16 = 0x1FF;
pub const SYNC_ERROR_START: u16 = 0x200;
pub const SYNC_ERROR_END: u16 = 0x3FF;
pub const DECODE_ERROR_START: u16 = 0x400;
pub const DECODE_ERROR_END: u16 = 0x7FF;

/// Numeric transport error code.
///
/// Codes fall into three ranges so callers can pick a recovery strategy
/// without matching every variant: fatal errors need a new decoder, sync
/// errors need a resync, and decode errors only cost the current unit.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    OutOfMemory = 0x101,
    InvalidParameter = 0x102,
    NeedToRestart = 0x103,
    TooManyBits = 0x104,
    Unknown = 0x1FF,

    SyncError = 0x201,
    NotEnoughBits = 0x202,

    ParseError = 0x401,
    UnsupportedFormat = 0x402,
    DecodeError = 0x403,
    CrcError = 0x404,
    UnsupportedExtension = 0x405,
}

impl ErrorCode {
    pub const fn value(self) -> u16 {
        self as u16
    }

    pub const fn is_fatal(self) -> bool {
        let v = self.value();
        v >= FATAL_ERROR_START && v <= FATAL_ERROR_END
    }

    pub const fn is_sync_error(self) -> bool {
        let v = self.value();
        v >= SYNC_ERROR_START && v <= SYNC_ERROR_END
    }

    pub const fn is_decode_error(self) -> bool {
        let v = self.value();
        v >= DECODE_ERROR_START && v <= DECODE_ERROR_END
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#05x})", self, self.value())
    }
}

/// Error surfaced by the transport decoder: a numeric code plus the
/// underlying cause chain.
#[derive(thiserror::Error, Debug)]
#[error("{code}: {cause:#}")]
pub struct TransportError {
    pub code: ErrorCode,
    cause: anyhow::Error,
}

impl TransportError {
    pub fn new(code: ErrorCode, cause: anyhow::Error) -> Self {
        Self { code, cause }
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    pub fn is_not_enough_bits(&self) -> bool {
        self.code == ErrorCode::NotEnoughBits
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(cause: anyhow::Error) -> Self {
        Self {
            code: classify(&cause),
            cause,
        }
    }
}

/// Maps an error chain onto its transport error code.
pub fn classify(err: &anyhow::Error) -> ErrorCode {
    if let Some(e) = err.downcast_ref::<CallbackError>() {
        return e.code();
    }
    if let Some(e) = err.downcast_ref::<ParamError>() {
        return e.code();
    }
    if let Some(e) = err.downcast_ref::<SyncError>() {
        return e.code();
    }
    if let Some(e) = err.downcast_ref::<PacketError>() {
        return e.code();
    }
    if let Some(e) = err.downcast_ref::<ConfigError>() {
        return e.code();
    }
    if let Some(e) = err.downcast_ref::<SpeakerConfigError>() {
        return e.code();
    }
    if let Some(e) = err.downcast_ref::<ExtElementError>() {
        return e.code();
    }
    if let Some(e) = err.downcast_ref::<ConfigExtensionError>() {
        return e.code();
    }
    if let Some(e) = err.downcast_ref::<AsiError>() {
        return e.code();
    }

    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<io::Error>() {
            return match e.kind() {
                io::ErrorKind::UnexpectedEof => ErrorCode::NotEnoughBits,
                io::ErrorKind::OutOfMemory => ErrorCode::OutOfMemory,
                _ => ErrorCode::ParseError,
            };
        }
    }

    ErrorCode::Unknown
}

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("No MHAS sync packet found in {0} buffered bytes")]
    NoSyncWord(usize),

    #[error("Packet length {length} exceeds the input buffer capacity {capacity}")]
    PacketTooLong { length: u32, capacity: usize },

    #[error("Sync packet carries {0:#04x} instead of 0xA5")]
    InvalidSyncPacket(u8),

    #[error("Sync packet length must be 1, got {0}")]
    InvalidSyncPacketLength(u32),

    #[error("Input buffer full without a complete access unit")]
    BufferFull,

    #[error("Audio scene information for substream {0} failed the consistency check")]
    InconsistentAsi(usize),

    #[error("Audio scene information packet for unknown label {0}")]
    AsiForUnknownLabel(u32),
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::SyncError
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PacketError {
    #[error("CRC mismatch for packet type {packet_type}: stored {stored:#x}, computed {computed:#x}")]
    CrcMismatch {
        packet_type: u32,
        stored: u32,
        computed: u32,
    },

    #[error("More than {0} substreams in one stream")]
    TooManySubstreams(usize),

    #[error("Packet label {0} is not associated with any configuration")]
    UnknownLabel(u32),

    #[error("Truncation of {samples} samples exceeds the frame length {frame_length}")]
    TruncationTooLong { samples: u16, frame_length: usize },

    #[error("Packet type {packet_type} ends inside its {length} byte payload")]
    PayloadTruncated { packet_type: u32, length: u32 },

    #[error("CRC packet type {packet_type} carries {length} bytes")]
    InvalidCrcLength { packet_type: u32, length: u32 },

    #[error("Invalid substream index {0} (maximum {1})")]
    InvalidSubstreamIndex(usize, usize),
}

impl PacketError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CrcMismatch { .. } => ErrorCode::CrcError,
            Self::TooManySubstreams(_) => ErrorCode::UnsupportedFormat,
            Self::InvalidSubstreamIndex(..) => ErrorCode::InvalidParameter,
            _ => ErrorCode::ParseError,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Reserved sampling frequency index {0}")]
    ReservedSamplingFrequencyIndex(u8),

    #[error("Explicit sampling frequency must not be zero")]
    ZeroSamplingFrequency,

    #[error("coreSbrFrameLengthIndex {0} is not supported")]
    UnsupportedCoreSbrFrameLength(u8),

    #[error("Reserved signal group type {0}")]
    ReservedSignalGroupType(u8),

    #[error("Signal group {0} has a lower type than the group before it")]
    SignalGroupOrder(usize),

    #[error("{count} signals exceed the maximum of {max}")]
    TooManySignals { count: usize, max: usize },

    #[error("{count} elements exceed the maximum of {max}")]
    TooManyElements { count: usize, max: usize },

    #[error("Time-warped MDCT is not supported")]
    TimeWarpedMdct,

    #[error("Quad channel element index {0} is not supported")]
    QuadChannelElement(u8),

    #[error("Channel element for signal {signal} crosses the signal group boundary")]
    ElementCrossesGroup { signal: usize },

    #[error("Channel element has no signal group left to fill")]
    NoSignalGroupLeft,

    #[error("Coded signal count {coded} does not match the declared {declared}")]
    SignalCountMismatch { coded: usize, declared: usize },

    #[error("Extension element of type {0} follows the last channel element")]
    TrailingExtension(u32),

    #[error("Object metadata element without an object signal group")]
    ObjectMetadataWithoutGroup,

    #[error("LFE element at signal {0} is covered by the multichannel coding mask")]
    LfeInMctMask(usize),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedCoreSbrFrameLength(_)
            | Self::TimeWarpedMdct
            | Self::QuadChannelElement(_)
            | Self::TooManySignals { .. }
            | Self::TooManyElements { .. } => ErrorCode::UnsupportedFormat,
            _ => ErrorCode::ParseError,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SpeakerConfigError {
    #[error("Invalid CICP speaker layout index {0}")]
    InvalidCicpLayout(u8),

    #[error("Invalid CICP speaker index {0}")]
    InvalidCicpSpeaker(u8),

    #[error("{count} speakers exceed the maximum of {max}")]
    TooManySpeakers { count: usize, max: usize },

    #[error("Symmetric speaker pair overflows the declared speaker count {0}")]
    SymmetricPairOverflow(usize),
}

impl SpeakerConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TooManySpeakers { .. } => ErrorCode::UnsupportedFormat,
            _ => ErrorCode::ParseError,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExtElementError {
    #[error("Extension payload declares {needed} bits but only {available} are available")]
    NotEnoughBits { needed: u64, available: u64 },

    #[error("Extension element type {ext_type} read {consumed} bits beyond its {declared} bit length")]
    Overread {
        ext_type: u32,
        declared: u64,
        consumed: u64,
    },

    #[error("HOA extension elements are not supported")]
    HoaUnsupported,

    #[error("Object metadata frame length {oam} is not a legal fraction of {core}")]
    InvalidObjectFrameLength { oam: usize, core: usize },

    #[error("Production metadata extension must precede all channel elements")]
    ProductionMetadataAfterChannels,

    #[error("Production metadata extension occurs more than once")]
    DuplicateProductionMetadata,
}

impl ExtElementError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotEnoughBits { .. } => ErrorCode::NotEnoughBits,
            Self::HoaUnsupported => ErrorCode::UnsupportedFormat,
            _ => ErrorCode::ParseError,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigExtensionError {
    #[error("Configuration extension type {0} occurs more than once")]
    Duplicate(u32),

    #[error("Fill extension byte {0:#04x} is not 0xA5")]
    InvalidFill(u8),

    #[error("Configuration extension type {ext_type} read {consumed} bits beyond its {declared} bit length")]
    Overread {
        ext_type: u32,
        declared: u64,
        consumed: u64,
    },

    #[error("Configuration extension payload declares {needed} bits but only {available} are available")]
    NotEnoughBits { needed: u64, available: u64 },
}

impl ConfigExtensionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotEnoughBits { .. } => ErrorCode::NotEnoughBits,
            _ => ErrorCode::ParseError,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AsiError {
    #[error("{count} groups exceed the maximum of {max}")]
    TooManyGroups { count: usize, max: usize },

    #[error("{count} switch groups exceed the maximum of {max}")]
    TooManySwitchGroups { count: usize, max: usize },

    #[error("{count} group presets exceed the maximum of {max}")]
    TooManyPresets { count: usize, max: usize },

    #[error("Group {group} member {member} is outside the {max} available element IDs")]
    MemberOutOfRange { group: u8, member: u8, max: usize },

    #[error("Group {group} conjunct members run past element ID {max}")]
    ConjunctMembersOutOfRange { group: u8, max: usize },

    #[error("Switch group {switch_group} references unknown group {group}")]
    UnknownSwitchGroupMember { switch_group: u8, group: u8 },

    #[error("Preset {preset} references unknown group {group}")]
    UnknownPresetGroup { preset: u8, group: u8 },

    #[error("Scene data block type {data_type} read {consumed} bits beyond its {declared} bit length")]
    Overread {
        data_type: u8,
        declared: u64,
        consumed: u64,
    },

    #[error("Signal group {0} straddles a switch group boundary")]
    Inconsistent(usize),
}

impl AsiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TooManyGroups { .. }
            | Self::TooManySwitchGroups { .. }
            | Self::TooManyPresets { .. }
            | Self::MemberOutOfRange { .. }
            | Self::ConjunctMembersOutOfRange { .. } => ErrorCode::UnsupportedFormat,
            _ => ErrorCode::ParseError,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ParamError {
    #[error("Invalid value {value} for parameter {param}")]
    InvalidValue { param: &'static str, value: i64 },

    #[error("{0} is not supported in this context")]
    UnsupportedOperation(&'static str),
}

impl ParamError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidParameter
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CallbackError {
    #[error("Callback {callback} failed: {reason}")]
    Failed {
        callback: &'static str,
        reason: String,
    },
}

impl CallbackError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::DecodeError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn error_code_ranges() {
        assert!(ErrorCode::OutOfMemory.is_fatal());
        assert!(ErrorCode::Unknown.is_fatal());
        assert!(ErrorCode::NotEnoughBits.is_sync_error());
        assert!(!ErrorCode::NotEnoughBits.is_fatal());
        assert!(ErrorCode::CrcError.is_decode_error());
        assert!(!ErrorCode::CrcError.is_sync_error());
    }

    #[test]
    fn classify_chain() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "short");
        assert_eq!(classify(&anyhow::Error::from(eof)), ErrorCode::NotEnoughBits);

        let err = anyhow!(ConfigError::TimeWarpedMdct);
        assert_eq!(classify(&err), ErrorCode::UnsupportedFormat);

        let err = anyhow!(ExtElementError::NotEnoughBits {
            needed: 64,
            available: 8
        });
        assert_eq!(classify(&err), ErrorCode::NotEnoughBits);

        assert_eq!(classify(&anyhow!("opaque")), ErrorCode::Unknown);
    }
}
