use anyhow::{Result, bail};

use crate::structs::speaker::CICP_LAYOUT_COUNT;
use crate::utils::errors::ParamError;

/// How input bytes are framed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportType {
    /// MHAS byte stream. Packets are located by searching for sync packets.
    #[default]
    Mhas,
    /// MHAS packets delivered aligned, e.g. one container sample per call.
    MhasRaw,
}

/// Runtime knobs of the transport decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportParam {
    /// End an access unit at the main substream frame.
    MinimizeDelay(bool),
    /// Look ahead for a configuration before the first frame.
    EarlyConfigDiscovery(bool),
    /// Start decoding without waiting for the announced buffer fullness.
    IgnoreBufferFullness(bool),
    /// Average bitrate in bit/s, used to estimate lost access units.
    AverageBitrate(u32),
    /// Burst period in milliseconds, used when no bitrate is known.
    BurstPeriod(u32),
    /// Drop buffered data and parser state. Configurations are kept.
    Reset,
    /// CICP layout index of the rendering target.
    TargetLayout(u8),
    /// Treat the next configuration as changed even if it is identical.
    ForceConfigChange,
    /// Flush when the scene information remaps element IDs.
    ElementSkipping(bool),
    /// Lowest log level that is raised as an error.
    FailLevel(log::Level),
    /// Downmix ID selected by the user, kept across scene resets.
    ActiveDownmixId(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportParams {
    pub minimize_delay: bool,
    pub early_config_discovery: bool,
    pub ignore_buffer_fullness: bool,
    pub average_bitrate: u32,
    pub burst_period: u32,
    pub target_layout: Option<u8>,
    pub element_skipping: bool,
    pub fail_level: log::Level,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            minimize_delay: false,
            early_config_discovery: true,
            ignore_buffer_fullness: false,
            average_bitrate: 0,
            burst_period: 0,
            target_layout: None,
            element_skipping: false,
            fail_level: log::Level::Error,
        }
    }
}

impl TransportParams {
    /// Stores a value parameter. Action parameters are handled by the
    /// decoder and rejected here.
    pub fn apply(&mut self, param: TransportParam) -> Result<()> {
        match param {
            TransportParam::MinimizeDelay(value) => self.minimize_delay = value,
            TransportParam::EarlyConfigDiscovery(value) => self.early_config_discovery = value,
            TransportParam::IgnoreBufferFullness(value) => self.ignore_buffer_fullness = value,
            TransportParam::AverageBitrate(value) => self.average_bitrate = value,
            TransportParam::BurstPeriod(value) => self.burst_period = value,
            TransportParam::TargetLayout(value) => {
                if value as usize >= CICP_LAYOUT_COUNT || value == 0 {
                    bail!(ParamError::InvalidValue {
                        param: "TargetLayout",
                        value: value as i64
                    });
                }
                self.target_layout = Some(value);
            }
            TransportParam::ElementSkipping(value) => self.element_skipping = value,
            TransportParam::FailLevel(level) => self.fail_level = level,
            TransportParam::Reset
            | TransportParam::ForceConfigChange
            | TransportParam::ActiveDownmixId(_) => {
                bail!(ParamError::UnsupportedOperation("storing an action parameter"))
            }
        }

        Ok(())
    }
}
