//! In-band command sub-protocol payloads.
//!
//! Command frames reuse the normal frame layout; the first payload byte is a
//! command code, followed by a command-specific body. The transmitter issues
//! `GET_RX_SETUPDATA`, `SET_RX_PARAMS` and `STORE_RX_PARAMS`; the receiver
//! answers with `RX_SETUPDATA` or `RX_ACK`.

/// Transmitter → receiver: request the receiver's setup snapshot.
pub const CMD_GET_RX_SETUPDATA: u8 = 0x01;

/// Transmitter → receiver: apply the parameter block in the payload.
pub const CMD_SET_RX_PARAMS: u8 = 0x02;

/// Transmitter → receiver: persist the currently applied parameters.
pub const CMD_STORE_RX_PARAMS: u8 = 0x03;

/// Receiver → transmitter: full setup snapshot.
pub const CMD_RX_SETUPDATA: u8 = 0x81;

/// Receiver → transmitter: acknowledge the last SET or STORE.
pub const CMD_RX_ACK: u8 = 0x82;

/// Errors produced while decoding a command body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CmdError {
    /// Payload shorter than the command body requires.
    Truncated,
    /// First payload byte is not a known command code.
    UnknownCode,
}

/// A decoded receiver → transmitter command reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxCmd {
    /// The receiver's setup snapshot.
    SetupData(RxSetupData),
    /// Acknowledge of the last SET or STORE.
    Ack,
}

/// Decode the payload of an uplink command frame.
pub fn decode_rx_cmd(payload: &[u8]) -> Result<RxCmd, CmdError> {
    match payload.first() {
        Some(&CMD_RX_SETUPDATA) => {
            Ok(RxCmd::SetupData(RxSetupData::unpack_from(&payload[1..])?))
        }
        Some(&CMD_RX_ACK) => Ok(RxCmd::Ack),
        _ => Err(CmdError::UnknownCode),
    }
}

/// Receiver setup snapshot as reported by `RX_SETUPDATA`.
///
/// This is the read side of the command channel: the transmitter keeps a
/// local shadow of it and refuses to expose receiver parameters in its UI
/// until the snapshot has arrived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxSetupData {
    /// Receiver firmware version, `major << 8 | minor`.
    pub firmware_version: u16,
    /// Setup layout revision; both sides must agree before `SET_RX_PARAMS`.
    pub setup_layout: u8,
    /// Transmit power in dBm.
    pub power_dbm: i8,
    /// Receiver diversity configuration.
    pub diversity: u8,
    /// Channel output configuration (receiver-side pin mux).
    pub channel_output: u8,
    /// Failsafe mode.
    pub failsafe_mode: u8,
    /// Serial baud-rate table index.
    pub serial_baud_index: u8,
    /// LQ averaging period the receiver uses, in cycles.
    pub lq_averaging_period: u8,
}

/// Wire size of [`RxSetupData`], including reserved space.
pub const RX_SETUPDATA_LEN: usize = 12;

impl RxSetupData {
    /// Serialize into `out`, which must hold [`RX_SETUPDATA_LEN`] bytes.
    pub fn pack_into(&self, out: &mut [u8]) {
        out[..RX_SETUPDATA_LEN].fill(0);
        out[0..2].copy_from_slice(&self.firmware_version.to_le_bytes());
        out[2] = self.setup_layout;
        out[3] = self.power_dbm as u8;
        out[4] = self.diversity;
        out[5] = self.channel_output;
        out[6] = self.failsafe_mode;
        out[7] = self.serial_baud_index;
        out[8] = self.lq_averaging_period;
        // bytes 9..12 reserved
    }

    /// Deserialize from a command body.
    pub fn unpack_from(data: &[u8]) -> Result<Self, CmdError> {
        if data.len() < RX_SETUPDATA_LEN {
            return Err(CmdError::Truncated);
        }
        Ok(Self {
            firmware_version: u16::from_le_bytes([data[0], data[1]]),
            setup_layout: data[2],
            power_dbm: data[3] as i8,
            diversity: data[4],
            channel_output: data[5],
            failsafe_mode: data[6],
            serial_baud_index: data[7],
            lq_averaging_period: data[8],
        })
    }
}

/// Writable receiver parameter block carried by `SET_RX_PARAMS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxParams {
    pub power_dbm: i8,
    pub diversity: u8,
    pub failsafe_mode: u8,
    pub serial_baud_index: u8,
}

/// Wire size of [`RxParams`].
pub const RX_PARAMS_LEN: usize = 4;

impl RxParams {
    /// Serialize into `out`, which must hold [`RX_PARAMS_LEN`] bytes.
    pub fn pack_into(&self, out: &mut [u8]) {
        out[0] = self.power_dbm as u8;
        out[1] = self.diversity;
        out[2] = self.failsafe_mode;
        out[3] = self.serial_baud_index;
    }

    /// Deserialize from a command body.
    pub fn unpack_from(data: &[u8]) -> Result<Self, CmdError> {
        if data.len() < RX_PARAMS_LEN {
            return Err(CmdError::Truncated);
        }
        Ok(Self {
            power_dbm: data[0] as i8,
            diversity: data[1],
            failsafe_mode: data[2],
            serial_baud_index: data[3],
        })
    }
}
