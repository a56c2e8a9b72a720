//! Fixed-length air frames: layout, packing and validation.
//!
//! Both link directions use the same [`FRAME_LEN`]-byte frame so the radio
//! can be configured once with a fixed payload length:
//!
//! ```text
//! offset  0  sync_word (u16 LE)    weak network identifier
//! offset  2  seq_no    (u8)        monotone mod 256
//! offset  3  flags     (u8)        bit0 ack, bit1 antenna,
//!                                  bit2 transmit_antenna, bits3-4 frame type
//! offset  4  rssi_u7   (u8)        7-bit RSSI encoding, bit7 reserved
//! offset  5  lq        (u8)        0-100
//! offset  6  lq_serial (u8)        0-100
//! offset  7  payload_len (u8)
//! offset  8  body                  downlink: 16 bytes packed RC channels
//!                                  followed by 64 payload bytes;
//!                                  uplink: 80 payload bytes
//! offset 88  crc       (u16 LE)    CRC-16/MCRF4XX over bytes 2..88
//! ```
//!
//! The sync word is deliberately excluded from the CRC: a frame that fails
//! the sync-word comparison belongs to another link and is treated as if it
//! had never arrived, before any other field is looked at.

use crate::cmd::{
    RxParams, RxSetupData, CMD_GET_RX_SETUPDATA, CMD_RX_ACK, CMD_RX_SETUPDATA,
    CMD_SET_RX_PARAMS, CMD_STORE_RX_PARAMS, RX_PARAMS_LEN, RX_SETUPDATA_LEN,
};
use crate::crc::frame_crc;
use crate::rc::{pack_rc_channels, unpack_rc_channels, RcData, RC_PACKED_LEN};

/// Total frame length on the air, identical in both directions.
pub const FRAME_LEN: usize = 90;

/// Serial payload capacity of a downlink (transmitter → receiver) frame.
pub const FRAME_TX_PAYLOAD_LEN: usize = 64;

/// Serial payload capacity of an uplink (receiver → transmitter) frame.
pub const FRAME_RX_PAYLOAD_LEN: usize = FRAME_TX_PAYLOAD_LEN + RC_PACKED_LEN;

/// A raw frame buffer.
pub type FrameBuf = [u8; FRAME_LEN];

const SEQ_NO_OFF: usize = 2;
const FLAGS_OFF: usize = 3;
const RSSI_OFF: usize = 4;
const LQ_OFF: usize = 5;
const LQ_SERIAL_OFF: usize = 6;
const PAYLOAD_LEN_OFF: usize = 7;
const RC_OFF: usize = 8;
const TX_PAYLOAD_OFF: usize = RC_OFF + RC_PACKED_LEN;
const RX_PAYLOAD_OFF: usize = 8;
const CRC_OFF: usize = FRAME_LEN - 2;

const FLAG_ACK: u8 = 1 << 0;
const FLAG_ANTENNA: u8 = 1 << 1;
const FLAG_TRANSMIT_ANTENNA: u8 = 1 << 2;
const FRAME_TYPE_SHIFT: u8 = 3;
const FRAME_TYPE_MASK: u8 = 0x03;

/// What a frame carries, encoded in two flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameType {
    /// Uplink frame with telemetry serial payload.
    RxNormal = 0,
    /// Downlink frame with RC channels and serial payload.
    TxNormal = 1,
    /// Downlink command frame; the payload is a command descriptor.
    TxCmd = 2,
    /// Uplink command reply.
    RxCmd = 3,
}

impl FrameType {
    /// Decode from the two frame-type bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & FRAME_TYPE_MASK {
            0 => Self::RxNormal,
            1 => Self::TxNormal,
            2 => Self::TxCmd,
            _ => Self::RxCmd,
        }
    }
}

/// Per-frame status fields supplied by the sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameStats {
    /// Sequence number, monotone mod 256.
    pub seq_no: u8,
    /// Acknowledge flag for the command sub-protocol.
    pub ack: bool,
    /// Antenna on which the sender last received (0 or 1).
    pub antenna: u8,
    /// Antenna used to transmit this frame (0 or 1).
    pub transmit_antenna: u8,
    /// RSSI of the sender's last reception, dBm.
    pub rssi: i8,
    /// Sender's link quality, 0-100.
    pub lq: u8,
    /// Sender's serial-data link quality, 0-100.
    pub lq_serial: u8,
}

/// Decoded header of a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameStatus {
    pub seq_no: u8,
    pub ack: bool,
    pub antenna: u8,
    pub transmit_antenna: u8,
    pub frame_type: FrameType,
    pub rssi: i8,
    pub lq: u8,
    pub lq_serial: u8,
    pub payload_len: u8,
}

/// Frame validation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// The first two bytes are not this link's sync word.
    SyncWord,
    /// Checksum mismatch.
    Crc,
    /// The payload length field exceeds the frame's capacity.
    Payload,
}

/// Downlink command descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxCmd {
    /// Request the receiver's setup snapshot.
    GetRxSetupData,
    /// Push the writable parameter block.
    SetRxParams(RxParams),
    /// Ask the receiver to persist its parameters.
    StoreRxParams,
}

/// Encode an RSSI value into the 7-bit wire form.
///
/// RSSI is reported in dBm and is non-positive in practice; values below
/// -127 dBm saturate.
#[inline]
#[must_use]
pub const fn rssi_u7_from_i8(rssi: i8) -> u8 {
    if rssi >= 0 {
        0
    } else if rssi == i8::MIN {
        127
    } else {
        (-rssi) as u8 & 0x7F
    }
}

/// Decode the 7-bit wire form back to dBm.
#[inline]
#[must_use]
pub const fn rssi_i8_from_u7(rssi_u7: u8) -> i8 {
    -((rssi_u7 & 0x7F) as i8)
}

fn pack_header(frame: &mut FrameBuf, sync_word: u16, stats: &FrameStats, frame_type: FrameType) {
    frame[0..2].copy_from_slice(&sync_word.to_le_bytes());
    frame[SEQ_NO_OFF] = stats.seq_no;
    let mut flags = (frame_type as u8) << FRAME_TYPE_SHIFT;
    if stats.ack {
        flags |= FLAG_ACK;
    }
    if stats.antenna != 0 {
        flags |= FLAG_ANTENNA;
    }
    if stats.transmit_antenna != 0 {
        flags |= FLAG_TRANSMIT_ANTENNA;
    }
    frame[FLAGS_OFF] = flags;
    frame[RSSI_OFF] = rssi_u7_from_i8(stats.rssi);
    frame[LQ_OFF] = stats.lq;
    frame[LQ_SERIAL_OFF] = stats.lq_serial;
}

fn seal(frame: &mut FrameBuf) {
    let crc = frame_crc(&frame[SEQ_NO_OFF..CRC_OFF]);
    frame[CRC_OFF..].copy_from_slice(&crc.to_le_bytes());
}

/// Pack a normal downlink frame: RC channels plus up to
/// [`FRAME_TX_PAYLOAD_LEN`] serial bytes.
pub fn pack_tx_frame(
    frame: &mut FrameBuf,
    sync_word: u16,
    stats: &FrameStats,
    rc: &RcData,
    payload: &[u8],
) {
    let len = payload.len().min(FRAME_TX_PAYLOAD_LEN);
    pack_header(frame, sync_word, stats, FrameType::TxNormal);
    frame[PAYLOAD_LEN_OFF] = len as u8;
    let rc_block: &mut [u8; RC_PACKED_LEN] =
        (&mut frame[RC_OFF..RC_OFF + RC_PACKED_LEN]).try_into().unwrap();
    pack_rc_channels(rc, rc_block);
    frame[TX_PAYLOAD_OFF..TX_PAYLOAD_OFF + len].copy_from_slice(&payload[..len]);
    frame[TX_PAYLOAD_OFF + len..CRC_OFF].fill(0);
    seal(frame);
}

/// Pack a downlink command frame.
///
/// The command descriptor displaces the serial payload for this cycle; RC
/// channels are still carried so stick control never stalls on commands.
pub fn pack_tx_cmd_frame(
    frame: &mut FrameBuf,
    sync_word: u16,
    stats: &FrameStats,
    rc: &RcData,
    cmd: &TxCmd,
) {
    pack_header(frame, sync_word, stats, FrameType::TxCmd);
    let rc_block: &mut [u8; RC_PACKED_LEN] =
        (&mut frame[RC_OFF..RC_OFF + RC_PACKED_LEN]).try_into().unwrap();
    pack_rc_channels(rc, rc_block);
    frame[TX_PAYLOAD_OFF..CRC_OFF].fill(0);
    let len = match cmd {
        TxCmd::GetRxSetupData => {
            frame[TX_PAYLOAD_OFF] = CMD_GET_RX_SETUPDATA;
            1
        }
        TxCmd::SetRxParams(params) => {
            frame[TX_PAYLOAD_OFF] = CMD_SET_RX_PARAMS;
            params.pack_into(&mut frame[TX_PAYLOAD_OFF + 1..TX_PAYLOAD_OFF + 1 + RX_PARAMS_LEN]);
            1 + RX_PARAMS_LEN
        }
        TxCmd::StoreRxParams => {
            frame[TX_PAYLOAD_OFF] = CMD_STORE_RX_PARAMS;
            1
        }
    };
    frame[PAYLOAD_LEN_OFF] = len as u8;
    seal(frame);
}

/// Pack a normal uplink frame (receiver side; also used as a test vector
/// source on the transmitter).
pub fn pack_rx_frame(frame: &mut FrameBuf, sync_word: u16, stats: &FrameStats, payload: &[u8]) {
    let len = payload.len().min(FRAME_RX_PAYLOAD_LEN);
    pack_header(frame, sync_word, stats, FrameType::RxNormal);
    frame[PAYLOAD_LEN_OFF] = len as u8;
    frame[RX_PAYLOAD_OFF..RX_PAYLOAD_OFF + len].copy_from_slice(&payload[..len]);
    frame[RX_PAYLOAD_OFF + len..CRC_OFF].fill(0);
    seal(frame);
}

/// Pack an uplink `RX_SETUPDATA` command reply.
pub fn pack_rx_cmd_setupdata(
    frame: &mut FrameBuf,
    sync_word: u16,
    stats: &FrameStats,
    setup: &RxSetupData,
) {
    pack_header(frame, sync_word, stats, FrameType::RxCmd);
    frame[RX_PAYLOAD_OFF..CRC_OFF].fill(0);
    frame[RX_PAYLOAD_OFF] = CMD_RX_SETUPDATA;
    setup.pack_into(&mut frame[RX_PAYLOAD_OFF + 1..RX_PAYLOAD_OFF + 1 + RX_SETUPDATA_LEN]);
    frame[PAYLOAD_LEN_OFF] = (1 + RX_SETUPDATA_LEN) as u8;
    seal(frame);
}

/// Pack an uplink `RX_ACK` command reply.
pub fn pack_rx_cmd_ack(frame: &mut FrameBuf, sync_word: u16, stats: &FrameStats) {
    pack_header(frame, sync_word, stats, FrameType::RxCmd);
    frame[RX_PAYLOAD_OFF..CRC_OFF].fill(0);
    frame[RX_PAYLOAD_OFF] = CMD_RX_ACK;
    frame[PAYLOAD_LEN_OFF] = 1;
    seal(frame);
}

/// Validate a received frame.
///
/// The sync word is compared first: a mismatch means the frame belongs to a
/// different link and must never be accounted anywhere. Only then is the
/// checksum verified, and finally the payload length field is bounded.
pub fn check_rx_frame(frame: &FrameBuf, sync_word: u16) -> Result<(), FrameError> {
    if u16::from_le_bytes([frame[0], frame[1]]) != sync_word {
        return Err(FrameError::SyncWord);
    }
    let crc = u16::from_le_bytes([frame[CRC_OFF], frame[CRC_OFF + 1]]);
    if crc != frame_crc(&frame[SEQ_NO_OFF..CRC_OFF]) {
        return Err(FrameError::Crc);
    }
    if frame[PAYLOAD_LEN_OFF] as usize > FRAME_RX_PAYLOAD_LEN {
        return Err(FrameError::Payload);
    }
    Ok(())
}

/// Decode the status header of a frame.
#[must_use]
pub fn unpack_frame_status(frame: &FrameBuf) -> FrameStatus {
    let flags = frame[FLAGS_OFF];
    FrameStatus {
        seq_no: frame[SEQ_NO_OFF],
        ack: flags & FLAG_ACK != 0,
        antenna: u8::from(flags & FLAG_ANTENNA != 0),
        transmit_antenna: u8::from(flags & FLAG_TRANSMIT_ANTENNA != 0),
        frame_type: FrameType::from_bits(flags >> FRAME_TYPE_SHIFT),
        rssi: rssi_i8_from_u7(frame[RSSI_OFF]),
        lq: frame[LQ_OFF],
        lq_serial: frame[LQ_SERIAL_OFF],
        payload_len: frame[PAYLOAD_LEN_OFF],
    }
}

/// Payload bytes of a validated uplink frame.
#[must_use]
pub fn rx_payload(frame: &FrameBuf) -> &[u8] {
    let len = (frame[PAYLOAD_LEN_OFF] as usize).min(FRAME_RX_PAYLOAD_LEN);
    &frame[RX_PAYLOAD_OFF..RX_PAYLOAD_OFF + len]
}

/// Payload bytes of a validated downlink frame (receiver side).
#[must_use]
pub fn tx_payload(frame: &FrameBuf) -> &[u8] {
    let len = (frame[PAYLOAD_LEN_OFF] as usize).min(FRAME_TX_PAYLOAD_LEN);
    &frame[TX_PAYLOAD_OFF..TX_PAYLOAD_OFF + len]
}

/// RC channel block of a downlink frame (receiver side).
#[must_use]
pub fn unpack_tx_rc_channels(frame: &FrameBuf) -> RcData {
    let rc_block: &[u8; RC_PACKED_LEN] =
        (&frame[RC_OFF..RC_OFF + RC_PACKED_LEN]).try_into().unwrap();
    unpack_rc_channels(rc_block)
}
