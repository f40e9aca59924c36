//! Configuration change sequencing.
//!
//! A structural configuration change is not applied immediately. The decoder
//! is first flushed for [`FLUSH_FRAMES`] calls without consuming input, then
//! the new configuration is applied and the following [`BUILD_UP_FRAMES`]
//! frames are marked as build-up so the decoder can fill its delay lines.
//!
//! ```text
//! flush:    Off -> On (ElementSkip) -> ... -> Off
//! build-up: Off -> Idle (IdleInBand) -> On -> ... -> Off
//! ```

use log::debug;

pub const FLUSH_FRAMES: u8 = 2;
pub const BUILD_UP_FRAMES: u8 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushStatus {
    #[default]
    Off,
    /// Flushing ahead of a configuration change.
    On,
    /// Flushing because the scene information remapped element IDs.
    ElementSkip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildUpStatus {
    #[default]
    Off,
    On,
    /// A configuration was applied. Build-up starts with the next frame.
    Idle,
    /// As `Idle`, but the stream carries its own pre-roll.
    IdleInBand,
}

/// Per-substream configuration change state, reported through
/// [`TransportCallbacks::control_cfg_change`].
///
/// [`TransportCallbacks::control_cfg_change`]: crate::callbacks::TransportCallbacks::control_cfg_change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CfgChangeControl {
    pub flushing: FlushStatus,
    pub flush_count: u8,
    /// The flush preceding the pending configuration has completed.
    pub flush_done: bool,
    pub build_up: BuildUpStatus,
    pub build_up_count: u8,
    pub force_cfg_change: bool,
    /// A configuration with changed content but unchanged structure was
    /// accepted and its next frame has not been decoded yet.
    pub content_change: bool,
    /// An active truncation ended the previous frame. The next configuration
    /// is reported as a content change even when it is unchanged.
    pub truncation_in_progress: bool,
    /// The truncation callback already ran for the current flush.
    pub truncation_notified: bool,
}

impl CfgChangeControl {
    pub fn is_flushing(&self) -> bool {
        self.flushing != FlushStatus::Off
    }

    pub fn start_flush(&mut self, status: FlushStatus) {
        debug!("flush start: {status:?}");
        self.flushing = status;
        self.flush_count = FLUSH_FRAMES;
        self.flush_done = false;
        self.truncation_notified = false;
        // build-up of the outgoing configuration is abandoned
        self.build_up = BuildUpStatus::Off;
        self.build_up_count = 0;
    }

    /// Counts one flushed call. Returns `true` once the flush has completed.
    pub fn step_flush(&mut self) -> bool {
        self.flush_count = self.flush_count.saturating_sub(1);
        if self.flush_count > 0 {
            return false;
        }

        debug!("flush done");
        self.flushing = FlushStatus::Off;
        self.flush_done = true;

        true
    }

    /// Marks a freshly applied configuration.
    pub fn config_applied(&mut self, in_band_preroll: bool) {
        self.flush_done = false;
        self.force_cfg_change = false;
        self.content_change = false;
        self.truncation_in_progress = false;
        self.build_up = if in_band_preroll {
            BuildUpStatus::IdleInBand
        } else {
            BuildUpStatus::Idle
        };
        self.build_up_count = 0;
    }

    /// Advances build-up for one decoded frame. Returns `true` if the status
    /// changed.
    pub fn step_build_up(&mut self) -> bool {
        match self.build_up {
            BuildUpStatus::Off => false,
            BuildUpStatus::Idle | BuildUpStatus::IdleInBand => {
                self.build_up = BuildUpStatus::On;
                self.build_up_count = BUILD_UP_FRAMES;
                true
            }
            BuildUpStatus::On => {
                self.build_up_count = self.build_up_count.saturating_sub(1);
                if self.build_up_count == 0 {
                    self.build_up = BuildUpStatus::Off;
                    return true;
                }
                false
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Outcome of comparing two raw configuration payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawCompare {
    Identical,
    /// Only the loudness information set differs.
    LoudnessOnly,
    Different,
}

fn bit(buf: &[u8], index: u64) -> u8 {
    (buf[(index >> 3) as usize] >> (7 - (index & 7))) & 1
}

fn bits_equal(a: &[u8], b: &[u8], start: u64, end: u64) -> bool {
    (start..end).all(|i| bit(a, i) == bit(b, i))
}

/// Compares a new configuration payload with the stored one, masking the
/// loudness region `(offset, length)` in bits of the stored configuration.
pub fn compare_raw(current: &[u8], new: &[u8], loudness: Option<(u64, u64)>) -> RawCompare {
    if current == new {
        return RawCompare::Identical;
    }

    let Some((offset, length)) = loudness else {
        return RawCompare::Different;
    };

    let total = (current.len() as u64) << 3;
    if current.len() != new.len() || offset + length > total {
        return RawCompare::Different;
    }

    if bits_equal(current, new, 0, offset) && bits_equal(current, new, offset + length, total) {
        RawCompare::LoudnessOnly
    } else {
        RawCompare::Different
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_then_build_up() {
        let mut control = CfgChangeControl::default();
        control.config_applied(false);
        assert!(control.step_build_up());

        control.start_flush(FlushStatus::On);
        assert_eq!(control.build_up, BuildUpStatus::Off);
        assert!(control.is_flushing());
        assert!(!control.step_flush());
        assert!(control.step_flush());
        assert!(control.flush_done && !control.is_flushing());

        control.config_applied(false);
        assert_eq!(control.build_up, BuildUpStatus::Idle);
        assert!(!control.flush_done);

        assert!(control.step_build_up());
        assert_eq!(control.build_up, BuildUpStatus::On);
        assert!(!control.step_build_up());
        assert!(control.step_build_up());
        assert_eq!(control.build_up, BuildUpStatus::Off);
        assert!(!control.step_build_up());
    }

    #[test]
    fn loudness_mask() {
        let current = [0x12, 0x34, 0x56, 0x78];
        let mut new = current;
        new[1] = 0x35;
        new[2] = 0x50;

        assert_eq!(compare_raw(&current, &current, None), RawCompare::Identical);
        assert_eq!(compare_raw(&current, &new, None), RawCompare::Different);
        // bits 12..23 cover the change
        assert_eq!(compare_raw(&current, &new, Some((12, 11))), RawCompare::LoudnessOnly);
        assert_eq!(compare_raw(&current, &new, Some((16, 8))), RawCompare::Different);
        assert_eq!(compare_raw(&current, &new[..3], Some((12, 11))), RawCompare::Different);
    }
}
