//! Wire protocol for the hoplink RC link: frame layout, packing, parsing and
//! validation.
//!
//! This crate is the shared wire knowledge of the link. It knows nothing
//! about radios, timing or state machines; it turns structured data into
//! fixed-length air frames and back:
//!
//! - [`frame`]: the [`FRAME_LEN`](frame::FRAME_LEN)-byte frame layout,
//!   [`pack_tx_frame`](frame::pack_tx_frame) /
//!   [`check_rx_frame`](frame::check_rx_frame) and friends
//! - [`rc`]: RC channel snapshots and their 128-bit packed representation
//! - [`cmd`]: the in-band command sub-protocol payloads
//! - [`crc`]: the CRC-16 the frames are sealed with
//!
//! # Frame directions
//!
//! Downlink (transmitter → receiver) frames carry RC channels plus tunneled
//! serial bytes; uplink frames carry telemetry serial bytes in the space the
//! channels would occupy. Both are exactly the same length so the radios can
//! run with a fixed packet size and hardware CRC.
//!
//! # Example
//!
//! ```
//! use hoplink_proto::{
//!     check_rx_frame, pack_tx_frame, tx_payload, FrameStats, RcData, FRAME_LEN,
//! };
//!
//! let mut frame = [0u8; FRAME_LEN];
//! let stats = FrameStats { seq_no: 1, rssi: -70, ..Default::default() };
//! pack_tx_frame(&mut frame, 0xA55A, &stats, &RcData::centered(), b"hello");
//!
//! assert!(check_rx_frame(&frame, 0xA55A).is_ok());
//! assert_eq!(tx_payload(&frame), b"hello");
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)
//!
//! # No-std Support
//!
//! This crate is `#![no_std]` by default and uses no heap allocations.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod cmd;
pub mod crc;
pub mod frame;
pub mod rc;

// Re-export the working set at the crate root.
pub use cmd::{
    decode_rx_cmd, CmdError, RxCmd, RxParams, RxSetupData, CMD_GET_RX_SETUPDATA, CMD_RX_ACK,
    CMD_RX_SETUPDATA, CMD_SET_RX_PARAMS, CMD_STORE_RX_PARAMS,
};
pub use crc::frame_crc;
pub use frame::{
    check_rx_frame, pack_rx_cmd_ack, pack_rx_cmd_setupdata, pack_rx_frame, pack_tx_cmd_frame,
    pack_tx_frame, rssi_i8_from_u7, rssi_u7_from_i8, rx_payload, tx_payload, unpack_frame_status,
    unpack_tx_rc_channels, FrameBuf, FrameError, FrameStats, FrameStatus, FrameType, TxCmd,
    FRAME_LEN, FRAME_RX_PAYLOAD_LEN, FRAME_TX_PAYLOAD_LEN,
};
pub use rc::{RcData, RC_CHANNEL_CENTER, RC_CHANNEL_COUNT, RC_CHANNEL_MAX};
