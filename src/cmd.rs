//! Command channel: which kind of frame the next transmit carries.
//!
//! A tiny state machine folded into the transmit path. At power-up every
//! downlink frame asks for the receiver's setup snapshot until the reply
//! arrives; after that, parameter pushes and store requests borrow single
//! cycles from normal traffic. Only one command kind is outstanding at a
//! time, and an unanswered command is simply re-sent next cycle because the
//! state persists.

/// Kind of frame the next transmit will carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitFrameType {
    /// RC channels plus tunneled serial payload.
    Normal,
    /// Request the receiver's setup snapshot.
    CmdGetRxSetupData,
    /// Push edited receiver parameters.
    CmdSetRxParams,
    /// Ask the receiver to persist its parameters.
    CmdStoreRxParams,
}

/// The command-channel state machine.
pub struct CmdChannel {
    transmit_frame_type: TransmitFrameType,
    rx_param_changed: bool,
}

impl CmdChannel {
    /// Power-up state: fetch the receiver setup snapshot first.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transmit_frame_type: TransmitFrameType::CmdGetRxSetupData,
            rx_param_changed: false,
        }
    }

    /// Resolve the frame type for the cycle about to be packed.
    ///
    /// A pending parameter edit claims the next normal cycle.
    pub fn pre_pack(&mut self) -> TransmitFrameType {
        if self.rx_param_changed && self.transmit_frame_type == TransmitFrameType::Normal {
            self.rx_param_changed = false;
            self.transmit_frame_type = TransmitFrameType::CmdSetRxParams;
        }
        self.transmit_frame_type
    }

    /// A receiver parameter was edited; push it at the next opportunity.
    pub fn notify_param_changed(&mut self) {
        self.rx_param_changed = true;
    }

    /// The host asked for the receiver to persist its parameters.
    pub fn request_store(&mut self) {
        self.transmit_frame_type = TransmitFrameType::CmdStoreRxParams;
    }

    /// The store command left in a frame; normal traffic resumes.
    pub fn store_sent(&mut self) {
        if self.transmit_frame_type == TransmitFrameType::CmdStoreRxParams {
            self.transmit_frame_type = TransmitFrameType::Normal;
        }
    }

    /// `RX_SETUPDATA` arrived.
    pub fn rx_setupdata_received(&mut self) {
        self.transmit_frame_type = TransmitFrameType::Normal;
    }

    /// `RX_ACK` arrived.
    pub fn rx_ack_received(&mut self) {
        self.transmit_frame_type = TransmitFrameType::Normal;
    }

    #[must_use]
    pub fn transmit_frame_type(&self) -> TransmitFrameType {
        self.transmit_frame_type
    }
}

impl Default for CmdChannel {
    fn default() -> Self {
        Self::new()
    }
}
