//! RC channel ingest: source trait and stick-order remapping.
//!
//! The host transmitter delivers stick data through some bus protocol; the
//! engine only sees [`ChannelSource::update`]. Whatever order the host uses
//! for the first four channels, the wire wants AETR, so a fresh snapshot is
//! remapped right after ingest.

use hoplink_proto::RcData;

/// Provider of fresh RC channel data.
pub trait ChannelSource {
    /// Overwrite `rc` when new stick data is available; report whether it
    /// was.
    fn update(&mut self, rc: &mut RcData) -> bool;
}

/// A source that never produces data (bench setups without a handset).
#[derive(Default)]
pub struct NoChannelSource;

impl ChannelSource for NoChannelSource {
    fn update(&mut self, _rc: &mut RcData) -> bool {
        false
    }
}

/// Order of the four stick channels as delivered by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelOrder {
    /// Aileron, elevator, throttle, rudder — the wire order; no remap.
    Aetr,
    /// Elevator, throttle, aileron, rudder.
    Etar,
    /// Throttle, aileron, elevator, rudder. Not yet defined; configurations
    /// selecting it are rejected rather than silently treated as AETR.
    Taer,
}

impl ChannelOrder {
    /// Index map from wire position to host position, or `None` when the
    /// order is not supported.
    #[must_use]
    pub const fn map(self) -> Option<[usize; 4]> {
        match self {
            Self::Aetr => Some([0, 1, 2, 3]),
            Self::Etar => Some([2, 0, 1, 3]),
            Self::Taer => None,
        }
    }
}

/// Apply a stick-order map to channels 0..=3 in place.
pub fn apply_channel_map(rc: &mut RcData, map: [usize; 4]) {
    let sticks = [rc.ch[0], rc.ch[1], rc.ch[2], rc.ch[3]];
    for (n, &src) in map.iter().enumerate() {
        rc.ch[n] = sticks[src];
    }
}
