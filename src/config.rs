//! Link configuration as read by the engine at boot.

use crate::channels::ChannelOrder;
use crate::stats::LQ_PERIOD_MAX;

/// Which antennas participate in this build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Diversity {
    /// Antenna 1 only.
    Antenna1,
    /// Antenna 2 only.
    Antenna2,
    /// Both antennas, receive diversity active.
    Both,
}

impl Diversity {
    #[inline]
    #[must_use]
    pub const fn use_antenna1(self) -> bool {
        matches!(self, Self::Antenna1 | Self::Both)
    }

    #[inline]
    #[must_use]
    pub const fn use_antenna2(self) -> bool {
        matches!(self, Self::Antenna2 | Self::Both)
    }
}

/// How bytes behind the serial port are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialLinkMode {
    /// Raw byte tunnel.
    Transparent,
    /// A MAVLink parser/router mediates the port. The engine additionally
    /// flushes the port while disconnected so the parser cannot back up.
    Mavlink,
}

/// Rejected configurations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `fhss_num` is zero.
    FhssChannels,
    /// `lq_averaging_period` outside `1..=LQ_PERIOD_MAX`.
    AveragingPeriod,
    /// `frame_rate_ms` is zero.
    FramePeriod,
    /// `frame_rate_ms` and `frame_rate_hz` disagree.
    FrameRateMismatch,
    /// The configured channel order has no defined stick map.
    ChannelOrderUnsupported,
    /// Antenna selection does not match the radio ports supplied.
    DiversityPorts,
}

/// Boot-time configuration of the link engine.
#[derive(Clone, Copy, Debug)]
pub struct LinkConfig {
    /// Number of FHSS channels.
    pub fhss_num: u8,
    /// Shared hop-sequence seed; equal on both ends of the link.
    pub fhss_seed: u32,
    /// Frame sync word, derived from the bind value.
    pub frame_sync_word: u16,
    /// LQ sliding-window length in cycles.
    pub lq_averaging_period: u8,
    /// Cycle period in milliseconds (= system ticks).
    pub frame_rate_ms: u16,
    /// Cycles per second; must be commensurate with `frame_rate_ms`.
    pub frame_rate_hz: u16,
    /// Ticks without a valid frame before a connected link is lost.
    pub connect_tmo_systicks: u16,
    /// Valid frames needed in SYNC before declaring the link connected.
    pub connect_sync_cnt: u8,
    /// Active antenna set.
    pub diversity: Diversity,
    /// Stick order delivered by the channel source.
    pub channel_order: ChannelOrder,
    /// Serial payload interpretation.
    pub serial_link_mode: SerialLinkMode,
    /// Whether a receive timeout on one antenna also clears the other
    /// antenna's receive state.
    pub timeout_aborts_both: bool,
    /// Whether an IRQ that contradicts the link state is fatal, or is
    /// recovered from by resetting the cycle.
    pub halt_on_impossible_irq: bool,
}

impl LinkConfig {
    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fhss_num == 0 {
            return Err(ConfigError::FhssChannels);
        }
        if self.lq_averaging_period == 0 || self.lq_averaging_period > LQ_PERIOD_MAX {
            return Err(ConfigError::AveragingPeriod);
        }
        if self.frame_rate_ms == 0 {
            return Err(ConfigError::FramePeriod);
        }
        // ms * Hz must land near 1000 (integer frame rates round, e.g.
        // 53 ms <-> 19 Hz).
        let product = u32::from(self.frame_rate_ms) * u32::from(self.frame_rate_hz);
        if !(950..=1060).contains(&product) {
            return Err(ConfigError::FrameRateMismatch);
        }
        if self.channel_order.map().is_none() {
            return Err(ConfigError::ChannelOrderUnsupported);
        }
        Ok(())
    }
}

impl Default for LinkConfig {
    /// 50 Hz single-antenna defaults; sync word and seed come from binding
    /// in a real setup.
    fn default() -> Self {
        Self {
            fhss_num: 24,
            fhss_seed: 0x1234_5678,
            frame_sync_word: 0xA55A,
            lq_averaging_period: 100,
            frame_rate_ms: 20,
            frame_rate_hz: 50,
            connect_tmo_systicks: 500,
            connect_sync_cnt: 5,
            diversity: Diversity::Antenna1,
            channel_order: ChannelOrder::Aetr,
            serial_link_mode: SerialLinkMode::Transparent,
            timeout_aborts_both: true,
            halt_on_impossible_irq: true,
        }
    }
}
