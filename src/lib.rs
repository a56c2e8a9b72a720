//! Transmit-side engine for a frequency-hopping bidirectional RC link.
//!
//! This crate is the radio link engine of the transmitter: every frame
//! period it hops to the next channel, sends one downlink frame carrying RC
//! channels plus tunneled serial bytes, then listens on one or two antennas
//! for the receiver's reply until the next period begins. On top of that
//! cycle sit the connection supervisor, the receive-diversity policy, the
//! in-band command channel used to configure the receiver, and the
//! link-quality accounting reported in telemetry.
//!
//! The hardware specifics stay outside: a chip driver implements
//! [`RadioDriver`], the host-side byte stream hides behind [`SerialPort`],
//! stick data arrives through [`ChannelSource`]. Interrupt handlers only
//! latch flags ([`IrqLatch`], [`SysTickFlag`]); the engine consumes them
//! from a cooperative main loop that calls [`LinkEngine::poll`] and never
//! blocks. That keeps the whole engine runnable — and tested — on a host
//! against mock collaborators.
//!
//! # Modules
//!
//! - [`engine`]: the cycle state machine and [`LinkEngine`] itself
//! - [`fhss`]: the shared deterministic hop schedule
//! - [`radio`]: the driver trait, IRQ latching, per-antenna ports
//! - [`diversity`]: per-antenna receive status and antenna arbitration
//! - [`connect`]: LISTEN / SYNC / CONNECTED supervision
//! - [`cmd`]: which frame kind the next transmit carries
//! - [`serial`]: the tunneled byte stream
//! - [`channels`]: RC channel ingest and stick-order remapping
//! - [`stats`]: sliding-window LQ counters and the per-cycle snapshot
//! - [`tasks`]: deferred work in the post-transmit dead time
//! - [`tick`]: 1 kHz tick plumbing
//! - [`config`]: boot-time configuration
//!
//! Wire frames live in the companion crate [`hoplink_proto`], re-exported
//! here as [`proto`].
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)
//!
//! # No-std Support
//!
//! This crate is `#![no_std]` by default and uses no heap allocations,
//! no blocking waits and no panicking paths outside of tests.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod channels;
pub mod cmd;
pub mod config;
pub mod connect;
pub mod diversity;
pub mod engine;
pub mod fhss;
pub mod radio;
pub mod serial;
pub mod stats;
pub mod tasks;
pub mod tick;

/// The wire protocol crate.
pub use hoplink_proto as proto;

// The working set, re-exported at the crate root.
pub use channels::{apply_channel_map, ChannelOrder, ChannelSource, NoChannelSource};
pub use cmd::{CmdChannel, TransmitFrameType};
pub use config::{ConfigError, Diversity, LinkConfig, SerialLinkMode};
pub use connect::{ConnectState, ConnectSupervisor};
pub use diversity::{select_receive_antenna, RxStatus};
pub use engine::{LinkEngine, LinkFault, LinkState, SEND_FRAME_TMO_US};
pub use fhss::Fhss;
pub use hoplink_proto::{RcData, RxParams, RxSetupData};
pub use radio::{Antenna, IrqLatch, IrqMask, PacketStatus, RadioDriver, RadioPort};
pub use serial::{FifoPort, NullPort, SerialPort};
pub use stats::{Stats, TxStats};
pub use tasks::{TaskMask, WhileTransmit};
pub use tick::SysTickFlag;
