//! Connection supervisor.
//!
//! Tracks whether a receiver is actually out there, based purely on the
//! stream of valid frames. Fresh links pass through SYNC so a couple of
//! stray decodes can't flip the transmitter straight into connected
//! behavior (serial payload draining, slow LED).

/// Supervisor state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectState {
    /// No recent valid frame.
    Listen,
    /// Valid frames arriving; counting up to the connect threshold.
    Sync,
    /// Link established.
    Connected,
}

/// Valid-frame driven LISTEN / SYNC / CONNECTED supervisor.
pub struct ConnectSupervisor {
    state: ConnectState,
    tmo_cnt: u16,
    sync_cnt: u8,
    tmo_systicks: u16,
    sync_target: u8,
}

impl ConnectSupervisor {
    /// `tmo_systicks`: how long without a valid frame until a connected
    /// link is declared lost, in system ticks. `sync_target`: consecutive
    /// valid frames needed in SYNC before connecting.
    #[must_use]
    pub fn new(tmo_systicks: u16, sync_target: u8) -> Self {
        Self {
            state: ConnectState::Listen,
            tmo_cnt: 0,
            sync_cnt: 0,
            tmo_systicks,
            sync_target,
        }
    }

    /// Called once per system tick.
    pub fn systick(&mut self) {
        if self.tmo_cnt > 0 {
            self.tmo_cnt -= 1;
        }
    }

    /// Called once per cycle, in the pre-transmit phase.
    pub fn cycle(&mut self, valid_frame_received: bool) {
        if valid_frame_received {
            match self.state {
                ConnectState::Listen => {
                    self.state = ConnectState::Sync;
                    self.sync_cnt = 0;
                }
                ConnectState::Sync => {
                    self.sync_cnt += 1;
                    if self.sync_cnt >= self.sync_target {
                        self.state = ConnectState::Connected;
                    }
                }
                ConnectState::Connected => {}
            }
            self.tmo_cnt = self.tmo_systicks;
        }

        if self.is_connected() && self.tmo_cnt == 0 {
            self.state = ConnectState::Listen;
        }

        if self.is_connected() && !valid_frame_received {
            self.sync_cnt = 0;
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectState::Connected
    }
}
