//! The link engine: one TX/listen cycle per frame period, forever.
//!
//! [`LinkEngine`] binds the hop schedule, the radio ports, the serial
//! bridge, the channel source and all the bookkeeping into a cooperative
//! loop. The owner calls [`LinkEngine::poll`] from its main loop as fast as
//! it can; interrupts only latch flags ([`SysTickFlag`], [`IrqLatch`]) that
//! `poll` consumes.
//!
//! # Cycle anatomy
//!
//! ```text
//!  tick ──> pre-transmit ──> TRANSMIT ─> TRANSMIT_WAIT ─> RECEIVE ─> RECEIVE_WAIT ─┐
//!  (1 kHz)  (previous          hop,        TX_DONE          arm RX     RX_DONE /   │
//!            cycle's rx        pack,                                   timeout     │
//!            is judged)        send                                                │
//!       ^                                                                          │
//!       └──────────────────────── next frame tick ─────────────────────────────────┘
//! ```
//!
//! The hop, the retune and the transmit handoff all happen in a single
//! `poll` iteration, strictly before any `TX_DONE` can be observed. A
//! receive result is judged at the *next* cycle boundary so both antennas
//! get the full listen window.

use hoplink_proto::{
    check_rx_frame, decode_rx_cmd, pack_tx_cmd_frame, pack_tx_frame, rx_payload,
    unpack_frame_status, FrameBuf, FrameError, FrameStats, FrameType, RcData, RxCmd, RxParams,
    RxSetupData, TxCmd, FRAME_RX_PAYLOAD_LEN, FRAME_TX_PAYLOAD_LEN,
};

use crate::channels::{apply_channel_map, ChannelSource};
use crate::cmd::{CmdChannel, TransmitFrameType};
use crate::config::{ConfigError, Diversity, LinkConfig, SerialLinkMode};
use crate::connect::{ConnectState, ConnectSupervisor};
use crate::diversity::{select_receive_antenna, RxStatus};
use crate::fhss::Fhss;
use crate::radio::{Antenna, IrqMask, RadioDriver, RadioPort};
use crate::serial::SerialPort;
use crate::stats::{Stats, TxStats, SEQ_NO_INVALID};
use crate::tasks::{TaskMask, WhileTransmit};
use crate::tick::{SysTickFlag, TickDown};

/// TX arming timeout handed to the radio; generous against a wedged PA.
pub const SEND_FRAME_TMO_US: u16 = 10_000;

/// Where the engine is within the current cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    /// Between cycles; nothing armed.
    Idle,
    /// Transmit entry pending: hop, pack, hand off.
    Transmit,
    /// Waiting for `TX_DONE`.
    TransmitWait,
    /// Receive entry pending: arm the active antennas.
    Receive,
    /// Listening.
    ReceiveWait,
    /// At least one antenna has concluded its reception; in a diversity
    /// build the other antenna may still deliver until the cycle boundary.
    ReceiveDone,
}

/// Conditions the engine cannot recover from by protocol means.
///
/// A fault is sticky: every subsequent `poll` reports it again. What to do
/// with one — halt with an LED cadence, log and reboot — is the owner's
/// call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkFault {
    /// A radio did not come up at boot.
    RadioInit,
    /// The hardware reported an IRQ the link state rules out: the chip and
    /// the engine have diverged.
    ImpossibleIrq,
}

/// The transmit-side link engine.
///
/// Generic over the radio driver `R`, the serial port `S` and the RC
/// channel source `C`, so the whole engine runs against mocks on a host.
pub struct LinkEngine<R: RadioDriver, S: SerialPort, C: ChannelSource> {
    cfg: LinkConfig,
    channel_map: [usize; 4],

    fhss: Fhss,
    sx1: Option<RadioPort<R>>,
    sx2: Option<RadioPort<R>>,
    serial: S,
    channels: C,
    tick: &'static SysTickFlag,

    rc: RcData,
    link_state: LinkState,
    connect: ConnectSupervisor,
    cmd: CmdChannel,
    tasks: WhileTransmit,
    stats: Stats,
    txstats: TxStats,

    tx_tick: TickDown,
    tick_1hz_commensurate: TickDown,
    do_pre_transmit: bool,

    rx1_status: RxStatus,
    rx2_status: RxStatus,

    tx_frame: FrameBuf,
    rx_frame1: FrameBuf,
    rx_frame2: FrameBuf,

    rx_setup: Option<RxSetupData>,
    pending_params: RxParams,
    store_params_request: bool,

    fault: Option<LinkFault>,
}

impl<R: RadioDriver, S: SerialPort, C: ChannelSource> LinkEngine<R, S, C> {
    /// Bind the collaborators.
    ///
    /// The supplied ports must match `cfg.diversity`: a port for every
    /// active antenna slot and none for an inactive one.
    pub fn new(
        cfg: LinkConfig,
        sx1: Option<RadioPort<R>>,
        sx2: Option<RadioPort<R>>,
        serial: S,
        channels: C,
        tick: &'static SysTickFlag,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let ports_match = match cfg.diversity {
            Diversity::Antenna1 => sx1.is_some() && sx2.is_none(),
            Diversity::Antenna2 => sx1.is_none() && sx2.is_some(),
            Diversity::Both => sx1.is_some() && sx2.is_some(),
        };
        if !ports_match {
            return Err(ConfigError::DiversityPorts);
        }

        let channel_map = cfg
            .channel_order
            .map()
            .ok_or(ConfigError::ChannelOrderUnsupported)?;

        Ok(Self {
            channel_map,
            fhss: Fhss::new(cfg.fhss_num, cfg.fhss_seed),
            sx1,
            sx2,
            serial,
            channels,
            tick,
            rc: RcData::centered(),
            link_state: LinkState::Idle,
            connect: ConnectSupervisor::new(cfg.connect_tmo_systicks, cfg.connect_sync_cnt),
            cmd: CmdChannel::new(),
            tasks: WhileTransmit::new(),
            stats: Stats::new(),
            txstats: TxStats::new(cfg.lq_averaging_period),
            tx_tick: TickDown::new(),
            tick_1hz_commensurate: TickDown::new(),
            do_pre_transmit: false,
            rx1_status: RxStatus::None,
            rx2_status: RxStatus::None,
            tx_frame: [0; hoplink_proto::FRAME_LEN],
            rx_frame1: [0; hoplink_proto::FRAME_LEN],
            rx_frame2: [0; hoplink_proto::FRAME_LEN],
            rx_setup: None,
            pending_params: RxParams::default(),
            store_params_request: false,
            cfg,
            fault: None,
        })
    }

    /// Bring the radios up and park at the first hop.
    ///
    /// The first frame tick after this starts the first cycle.
    pub fn start(&mut self) -> Result<(), LinkFault> {
        if let Some(port) = self.sx1.as_mut() {
            port.init();
        }
        if let Some(port) = self.sx2.as_mut() {
            port.init();
        }
        let ok1 = self.sx1.as_mut().is_none_or(|p| p.is_ok());
        let ok2 = self.sx2.as_mut().is_none_or(|p| p.is_ok());
        if !ok1 || !ok2 {
            self.fault = Some(LinkFault::RadioInit);
            return Err(LinkFault::RadioInit);
        }
        if let Some(port) = self.sx1.as_mut() {
            port.start_up();
        }
        if let Some(port) = self.sx2.as_mut() {
            port.start_up();
        }

        self.fhss.start_tx();
        let freq = self.fhss.curr_freq();
        if let Some(port) = self.sx1.as_mut() {
            port.set_rf_frequency(freq);
        }
        if let Some(port) = self.sx2.as_mut() {
            port.set_rf_frequency(freq);
        }

        self.link_state = LinkState::Idle;
        self.do_pre_transmit = false;
        self.rx1_status = RxStatus::None;
        self.rx2_status = RxStatus::None;
        if let Some(port) = self.sx1.as_ref() {
            port.clear_irq();
        }
        if let Some(port) = self.sx2.as_ref() {
            port.clear_irq();
        }
        Ok(())
    }

    /// One cooperative loop iteration.
    ///
    /// Never blocks; the caller runs this back-to-back (or interleaved with
    /// its own non-blocking work) and every iteration finishes well within
    /// a system tick.
    pub fn poll(&mut self) -> Result<(), LinkFault> {
        if let Some(fault) = self.fault {
            return Err(fault);
        }

        if self.tick.take() {
            self.sys_task();
        }

        match self.link_state {
            LinkState::Transmit => self.enter_transmit(),
            LinkState::Receive => self.enter_receive(),
            _ => {}
        }

        if let Err(fault) = self.service_irq(Antenna::One) {
            self.fault = Some(fault);
            return Err(fault);
        }
        if let Err(fault) = self.service_irq(Antenna::Two) {
            self.fault = Some(fault);
            return Err(fault);
        }

        if self.do_pre_transmit {
            self.do_pre_transmit = false;
            self.pre_transmit();
        }

        if self.channels.update(&mut self.rc) {
            apply_channel_map(&mut self.rc, self.channel_map);
        }

        if let Some(task) = self.tasks.run() {
            if task.contains(TaskMask::STORE_PARAMS) {
                self.store_params_request = true;
            }
        }

        Ok(())
    }

    /// 1 kHz housekeeping.
    fn sys_task(&mut self) {
        self.connect.systick();
        if self.tx_tick.tick(self.cfg.frame_rate_ms) {
            self.do_pre_transmit = true;
        }
    }

    /// TRANSMIT entry: hop, retune, pack, hand off.
    fn enter_transmit(&mut self) {
        self.fhss.hop_to_next();
        let freq = self.fhss.curr_freq();
        if let Some(port) = self.sx1.as_mut() {
            port.set_rf_frequency(freq);
        }
        if let Some(port) = self.sx2.as_mut() {
            port.set_rf_frequency(freq);
        }

        let antenna = if self.cfg.diversity.use_antenna1() {
            Antenna::One
        } else {
            Antenna::Two
        };
        self.do_transmit(antenna);

        self.link_state = LinkState::TransmitWait;
        if let Some(port) = self.sx1.as_ref() {
            port.clear_irq();
        }
        if let Some(port) = self.sx2.as_ref() {
            port.clear_irq();
        }
        self.tasks.trigger();
    }

    /// RECEIVE entry: arm every active antenna with an unbounded window;
    /// the next cycle's pre-transmit acts as the de-facto timeout.
    fn enter_receive(&mut self) {
        if let Some(port) = self.sx1.as_mut() {
            port.set_to_rx(0);
        }
        if let Some(port) = self.sx2.as_mut() {
            port.set_to_rx(0);
        }
        self.link_state = LinkState::ReceiveWait;
        if let Some(port) = self.sx1.as_ref() {
            port.clear_irq();
        }
        if let Some(port) = self.sx2.as_ref() {
            port.clear_irq();
        }
    }

    fn do_transmit(&mut self, antenna: Antenna) {
        self.stats.transmit_seq_no = self.stats.transmit_seq_no.wrapping_add(1);
        self.process_transmit_frame(antenna, true);
    }

    fn process_transmit_frame(&mut self, antenna: Antenna, ack: bool) {
        let frame_type = self.cmd.pre_pack();

        let mut payload = [0u8; FRAME_TX_PAYLOAD_LEN];
        let mut payload_len = 0usize;

        if frame_type == TransmitFrameType::Normal {
            if self.connect.is_connected() {
                while payload_len < FRAME_TX_PAYLOAD_LEN {
                    match self.serial.get() {
                        Some(b) => {
                            payload[payload_len] = b;
                            payload_len += 1;
                        }
                        None => break,
                    }
                }
                self.stats.bytes_transmitted.add(payload_len);
                if payload_len > 0 {
                    self.txstats.serial_data_transmitted();
                }
            } else if self.cfg.serial_link_mode == SerialLinkMode::Mavlink {
                // Don't let the parser back up while nobody is listening.
                self.serial.flush();
            }
        }

        let frame_stats = FrameStats {
            seq_no: self.stats.transmit_seq_no,
            ack,
            antenna: self.stats.last_rx_antenna.bit(),
            transmit_antenna: antenna.bit(),
            rssi: self.stats.last_rx_rssi(),
            lq: self.txstats.lq(),
            lq_serial: self.txstats.lq_serial_data(),
        };

        match frame_type {
            TransmitFrameType::Normal => pack_tx_frame(
                &mut self.tx_frame,
                self.cfg.frame_sync_word,
                &frame_stats,
                &self.rc,
                &payload[..payload_len],
            ),
            TransmitFrameType::CmdGetRxSetupData => pack_tx_cmd_frame(
                &mut self.tx_frame,
                self.cfg.frame_sync_word,
                &frame_stats,
                &self.rc,
                &TxCmd::GetRxSetupData,
            ),
            TransmitFrameType::CmdSetRxParams => pack_tx_cmd_frame(
                &mut self.tx_frame,
                self.cfg.frame_sync_word,
                &frame_stats,
                &self.rc,
                &TxCmd::SetRxParams(self.pending_params),
            ),
            TransmitFrameType::CmdStoreRxParams => {
                pack_tx_cmd_frame(
                    &mut self.tx_frame,
                    self.cfg.frame_sync_word,
                    &frame_stats,
                    &self.rc,
                    &TxCmd::StoreRxParams,
                );
                // Single-shot: the receiver's ACK is informational.
                self.cmd.store_sent();
            }
        }

        let port = match antenna {
            Antenna::One => self.sx1.as_mut(),
            Antenna::Two => self.sx2.as_mut(),
        };
        if let Some(port) = port {
            port.send_frame(&self.tx_frame, SEND_FRAME_TMO_US);
        }
        self.stats.last_tx_antenna = antenna;
    }

    /// Handle one antenna's latched IRQ flags.
    fn service_irq(&mut self, antenna: Antenna) -> Result<(), LinkFault> {
        let latched = match antenna {
            Antenna::One => self.sx1.as_ref().map(|p| p.take_irq()),
            Antenna::Two => self.sx2.as_ref().map(|p| p.take_irq()),
        };
        let Some(mut irq) = latched else {
            return Ok(());
        };
        if irq.is_empty() {
            return Ok(());
        }

        let receiving = self.link_state == LinkState::ReceiveWait
            || self.link_state == LinkState::ReceiveDone;

        if self.link_state == LinkState::TransmitWait && irq.contains(IrqMask::TX_DONE) {
            irq.remove(IrqMask::TX_DONE);
            self.link_state = LinkState::Receive;
        } else if receiving && irq.contains(IrqMask::RX_DONE) {
            irq.remove(IrqMask::RX_DONE);
            let status = self.do_receive(antenna);
            self.set_rx_status(antenna, status);
            self.link_state = LinkState::ReceiveDone;
        }

        if irq.contains(IrqMask::TIMEOUT) {
            irq = IrqMask::NONE;
            self.link_state = LinkState::Idle;
            if self.cfg.timeout_aborts_both {
                self.rx1_status = RxStatus::None;
                self.rx2_status = RxStatus::None;
            } else {
                self.set_rx_status(antenna, RxStatus::None);
            }
        }

        if irq.intersects(IrqMask::TX_DONE | IrqMask::RX_DONE) {
            // A completion we cannot be waiting for: chip and engine state
            // have diverged.
            if self.cfg.halt_on_impossible_irq {
                return Err(LinkFault::ImpossibleIrq);
            }
            self.link_state = LinkState::Idle;
            self.rx1_status = RxStatus::None;
            self.rx2_status = RxStatus::None;
            if let Some(port) = self.sx1.as_ref() {
                port.clear_irq();
            }
            if let Some(port) = self.sx2.as_ref() {
                port.clear_irq();
            }
        }

        Ok(())
    }

    /// Read and validate one antenna's frame.
    fn do_receive(&mut self, antenna: Antenna) -> RxStatus {
        let (port, frame) = match antenna {
            Antenna::One => (self.sx1.as_mut(), &mut self.rx_frame1),
            Antenna::Two => (self.sx2.as_mut(), &mut self.rx_frame2),
        };
        let Some(port) = port else {
            return RxStatus::None;
        };

        port.read_frame(frame);

        let status = match check_rx_frame(frame, self.cfg.frame_sync_word) {
            Ok(()) => RxStatus::Valid,
            // The ISR peek already filtered foreign frames; seeing one here
            // means it slipped through a race. Treat as no frame at all,
            // without touching the packet status.
            Err(FrameError::SyncWord) => return RxStatus::None,
            Err(_) => RxStatus::Invalid,
        };

        // Wanted even for a bad packet: the diversity choice runs on it.
        let packet_status = port.get_packet_status();
        self.stats.set_packet_status(antenna, packet_status);

        status
    }

    fn set_rx_status(&mut self, antenna: Antenna, status: RxStatus) {
        match antenna {
            Antenna::One => self.rx1_status = status,
            Antenna::Two => self.rx2_status = status,
        }
    }

    fn rx_status(&self, antenna: Antenna) -> RxStatus {
        match antenna {
            Antenna::One => self.rx1_status,
            Antenna::Two => self.rx2_status,
        }
    }

    /// Cycle boundary: judge the receive window that just closed, update
    /// the supervisor and the counters, arm the next transmit.
    fn pre_transmit(&mut self) {
        let use1 = self.cfg.diversity.use_antenna1();
        let use2 = self.cfg.diversity.use_antenna2();

        let (frame_received, valid_frame_received) = if use1 && use2 {
            (
                self.rx1_status > RxStatus::None || self.rx2_status > RxStatus::None,
                self.rx1_status > RxStatus::Invalid || self.rx2_status > RxStatus::Invalid,
            )
        } else if use1 {
            (
                self.rx1_status > RxStatus::None,
                self.rx1_status > RxStatus::Invalid,
            )
        } else {
            (
                self.rx2_status > RxStatus::None,
                self.rx2_status > RxStatus::Invalid,
            )
        };

        if frame_received {
            let antenna = if use1 && use2 {
                select_receive_antenna(
                    self.rx1_status,
                    self.rx2_status,
                    self.stats.last_rx_rssi1,
                    self.stats.last_rx_rssi2,
                )
            } else if use2 {
                Antenna::Two
            } else {
                Antenna::One
            };
            self.handle_receive(antenna);
        } else {
            self.stats.received_seq_no_last = SEQ_NO_INVALID;
            self.stats.received_ack_last = false;
        }

        self.connect.cycle(valid_frame_received);

        self.link_state = LinkState::Transmit;
        self.rx1_status = RxStatus::None;
        self.rx2_status = RxStatus::None;

        if self.tick_1hz_commensurate.tick(self.cfg.frame_rate_hz) {
            self.stats.update_1hz();
        }

        if !self.connect.is_connected() {
            self.stats.clear();
        }
        self.txstats.next();
    }

    /// Account the chosen antenna's result and, if usable, consume it.
    fn handle_receive(&mut self, antenna: Antenna) {
        if self.rx_status(antenna) == RxStatus::Valid {
            self.process_received_frame(antenna);
            self.txstats.valid_frame_received();
        } else {
            self.stats.received_seq_no_last = SEQ_NO_INVALID;
            self.stats.received_ack_last = false;
        }

        // Set for every reception, valid or not.
        self.stats.last_rx_antenna = antenna;
        self.txstats.frame_received();
    }

    fn process_received_frame(&mut self, antenna: Antenna) {
        let frame = match antenna {
            Antenna::One => &self.rx_frame1,
            Antenna::Two => &self.rx_frame2,
        };
        let status = unpack_frame_status(frame);

        let mut payload = [0u8; FRAME_RX_PAYLOAD_LEN];
        let payload_len = rx_payload(frame).len();
        payload[..payload_len].copy_from_slice(rx_payload(frame));

        self.stats.received_antenna = status.antenna;
        self.stats.received_transmit_antenna = status.transmit_antenna;
        self.stats.received_rssi = status.rssi;
        self.stats.received_lq = status.lq;
        self.stats.received_lq_serial = status.lq_serial;
        self.stats.received_seq_no_last = status.seq_no;
        self.stats.received_ack_last = status.ack;

        if status.frame_type != FrameType::RxNormal {
            self.process_received_cmd(&payload[..payload_len]);
            return;
        }

        for &b in &payload[..payload_len] {
            self.serial.put(b);
        }
        self.stats.bytes_received.add(payload_len);
        if payload_len > 0 {
            self.txstats.serial_data_received();
        }
    }

    fn process_received_cmd(&mut self, payload: &[u8]) {
        match decode_rx_cmd(payload) {
            Ok(RxCmd::SetupData(setup)) => {
                self.rx_setup = Some(setup);
                self.cmd.rx_setupdata_received();
            }
            Ok(RxCmd::Ack) => self.cmd.rx_ack_received(),
            // Unknown or malformed replies leave the command outstanding;
            // it is re-sent next cycle.
            Err(_) => {}
        }
    }

    // --- host-facing control surface ---

    /// Stage edited receiver parameters; pushed at the next opportunity and
    /// re-sent until acknowledged.
    pub fn set_rx_params(&mut self, params: RxParams) {
        self.pending_params = params;
        self.cmd.notify_param_changed();
    }

    /// Ask the receiver to persist its parameters, and schedule the local
    /// persistence as a deferred task.
    pub fn store_rx_params(&mut self) {
        self.cmd.request_store();
        self.tasks.set_task(TaskMask::STORE_PARAMS);
    }

    /// Whether the deferred store task has run since last asked. The owner
    /// performs the actual persistence.
    #[must_use]
    pub fn take_store_params_request(&mut self) -> bool {
        core::mem::take(&mut self.store_params_request)
    }

    // --- observers ---

    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    #[must_use]
    pub fn connect_state(&self) -> ConnectState {
        self.connect.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connect.is_connected()
    }

    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    #[must_use]
    pub fn txstats(&self) -> &TxStats {
        &self.txstats
    }

    /// Frame kind the next transmit will carry.
    #[must_use]
    pub fn transmit_frame_type(&self) -> TransmitFrameType {
        self.cmd.transmit_frame_type()
    }

    /// The receiver's setup snapshot, once it has answered.
    #[must_use]
    pub fn rx_setup(&self) -> Option<&RxSetupData> {
        self.rx_setup.as_ref()
    }

    /// Current hop slot, for telemetry displays.
    #[must_use]
    pub fn hop_index(&self) -> u8 {
        self.fhss.curr_i()
    }

    /// The channel snapshot frames are packed from.
    #[must_use]
    pub fn rc_data(&self) -> &RcData {
        &self.rc
    }

    /// Antenna 1's port, if that antenna is active.
    pub fn antenna1_mut(&mut self) -> Option<&mut RadioPort<R>> {
        self.sx1.as_mut()
    }

    /// Antenna 2's port, if that antenna is active.
    pub fn antenna2_mut(&mut self) -> Option<&mut RadioPort<R>> {
        self.sx2.as_mut()
    }

    /// The bound serial port.
    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::channels::ChannelOrder;
    use crate::radio::{IrqLatch, PacketStatus};
    use hoplink_proto::{
        pack_rx_cmd_ack, pack_rx_cmd_setupdata, pack_rx_frame, tx_payload, unpack_tx_rc_channels,
        CMD_GET_RX_SETUPDATA, CMD_SET_RX_PARAMS, CMD_STORE_RX_PARAMS, FRAME_LEN,
    };
    use std::boxed::Box;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::vec;
    use std::vec::Vec;

    const SYNC: u16 = 0xA55A;
    const FRAME_MS: u16 = 20;

    fn leak<T>(value: T) -> &'static T {
        Box::leak(Box::new(value))
    }

    // --- mock radio ---

    #[derive(Default)]
    struct RadioState {
        ok: bool,
        freq: u32,
        sent: Vec<Vec<u8>>,
        rx_buf: Vec<u8>,
        irq: u16,
        packet: PacketStatus,
        rx_armed: u32,
    }

    #[derive(Clone)]
    struct MockRadio(Rc<RefCell<RadioState>>);

    impl MockRadio {
        fn new() -> Self {
            Self(Rc::new(RefCell::new(RadioState {
                ok: true,
                rx_buf: vec![0; FRAME_LEN],
                ..Default::default()
            })))
        }

        fn raise_irq(&self, irq: IrqMask) {
            self.0.borrow_mut().irq = irq.bits();
        }

        fn load_rx(&self, frame: &FrameBuf, rssi: i8, snr: i8) {
            let mut state = self.0.borrow_mut();
            state.rx_buf = frame.to_vec();
            state.packet = PacketStatus { rssi, snr };
        }

        fn last_sent(&self) -> FrameBuf {
            let state = self.0.borrow();
            let bytes = state.sent.last().expect("no frame sent");
            let mut frame = [0u8; FRAME_LEN];
            frame.copy_from_slice(bytes);
            frame
        }
    }

    impl RadioDriver for MockRadio {
        fn init(&mut self) {}

        fn is_ok(&mut self) -> bool {
            self.0.borrow().ok
        }

        fn start_up(&mut self) {}

        fn set_rf_frequency(&mut self, freq_hz: u32) {
            self.0.borrow_mut().freq = freq_hz;
        }

        fn send_frame(&mut self, frame: &[u8], _tmo_us: u16) {
            self.0.borrow_mut().sent.push(frame.to_vec());
        }

        fn set_to_rx(&mut self, _tmo_us: u16) {
            self.0.borrow_mut().rx_armed += 1;
        }

        fn read_frame(&mut self, frame: &mut [u8]) {
            let state = self.0.borrow();
            frame.copy_from_slice(&state.rx_buf[..frame.len()]);
        }

        fn read_buffer(&mut self, offset: u8, dst: &mut [u8]) {
            let state = self.0.borrow();
            let start = offset as usize;
            dst.copy_from_slice(&state.rx_buf[start..start + dst.len()]);
        }

        fn get_packet_status(&mut self) -> PacketStatus {
            self.0.borrow().packet
        }

        fn get_and_clear_irq_status(&mut self, mask: IrqMask) -> IrqMask {
            let mut state = self.0.borrow_mut();
            let taken = state.irq & mask.bits();
            state.irq &= !mask.bits();
            IrqMask(taken)
        }
    }

    // --- mock serial ---

    #[derive(Default)]
    struct SerialState {
        to_air: VecDeque<u8>,
        to_host: Vec<u8>,
        flushes: u32,
    }

    #[derive(Clone, Default)]
    struct MockSerial(Rc<RefCell<SerialState>>);

    impl MockSerial {
        fn feed(&self, bytes: &[u8]) {
            self.0.borrow_mut().to_air.extend(bytes.iter().copied());
        }

        fn to_host(&self) -> Vec<u8> {
            self.0.borrow().to_host.clone()
        }

        fn flushes(&self) -> u32 {
            self.0.borrow().flushes
        }

        fn to_air_len(&self) -> usize {
            self.0.borrow().to_air.len()
        }
    }

    impl SerialPort for MockSerial {
        fn available(&self) -> bool {
            !self.0.borrow().to_air.is_empty()
        }

        fn get(&mut self) -> Option<u8> {
            self.0.borrow_mut().to_air.pop_front()
        }

        fn put(&mut self, c: u8) {
            self.0.borrow_mut().to_host.push(c);
        }

        fn flush(&mut self) {
            let mut state = self.0.borrow_mut();
            state.to_air.clear();
            state.flushes += 1;
        }
    }

    // --- mock channel source ---

    #[derive(Clone, Default)]
    struct MockChannels(Rc<RefCell<Option<RcData>>>);

    impl MockChannels {
        fn push(&self, rc: RcData) {
            *self.0.borrow_mut() = Some(rc);
        }
    }

    impl ChannelSource for MockChannels {
        fn update(&mut self, rc: &mut RcData) -> bool {
            match self.0.borrow_mut().take() {
                Some(fresh) => {
                    *rc = fresh;
                    true
                }
                None => false,
            }
        }
    }

    // --- harness ---

    struct Harness {
        engine: LinkEngine<MockRadio, MockSerial, MockChannels>,
        r1: MockRadio,
        r2: MockRadio,
        serial: MockSerial,
        channels: MockChannels,
        tick: &'static SysTickFlag,
    }

    fn config() -> LinkConfig {
        LinkConfig {
            frame_sync_word: SYNC,
            frame_rate_ms: FRAME_MS,
            frame_rate_hz: 50,
            connect_sync_cnt: 3,
            connect_tmo_systicks: 100,
            lq_averaging_period: 100,
            ..Default::default()
        }
    }

    fn harness(cfg: LinkConfig) -> Harness {
        let tick = leak(SysTickFlag::new());
        let r1 = MockRadio::new();
        let r2 = MockRadio::new();
        let serial = MockSerial::default();
        let channels = MockChannels::default();

        let sx1 = cfg
            .diversity
            .use_antenna1()
            .then(|| RadioPort::new(Antenna::One, r1.clone(), leak(IrqLatch::new())));
        let sx2 = cfg
            .diversity
            .use_antenna2()
            .then(|| RadioPort::new(Antenna::Two, r2.clone(), leak(IrqLatch::new())));

        let mut engine =
            LinkEngine::new(cfg, sx1, sx2, serial.clone(), channels.clone(), tick).unwrap();
        engine.start().unwrap();

        Harness {
            engine,
            r1,
            r2,
            serial,
            channels,
            tick,
        }
    }

    impl Harness {
        fn poll(&mut self) {
            self.engine.poll().unwrap();
        }

        /// Run the frame-period worth of ticks (which executes the
        /// pre-transmit phase) plus the transmit entry.
        fn start_cycle(&mut self) {
            for _ in 0..FRAME_MS {
                self.tick.set();
                self.poll();
            }
            self.poll(); // TRANSMIT entry
        }

        /// Complete the transmit on the given antenna and arm reception.
        fn tx_done(&mut self, antenna: Antenna) {
            let radio = match antenna {
                Antenna::One => &self.r1,
                Antenna::Two => &self.r2,
            };
            radio.raise_irq(IrqMask::TX_DONE);
            self.service_dio(antenna);
            self.poll(); // TX_DONE -> RECEIVE
            self.poll(); // RECEIVE entry -> RECEIVE_WAIT
        }

        /// Deliver a frame on an antenna, through the ISR path.
        fn rx_frame(&mut self, antenna: Antenna, frame: &FrameBuf, rssi: i8, snr: i8) {
            let radio = match antenna {
                Antenna::One => &self.r1,
                Antenna::Two => &self.r2,
            };
            radio.load_rx(frame, rssi, snr);
            radio.raise_irq(IrqMask::RX_DONE);
            self.service_dio(antenna);
            self.poll(); // RX_DONE -> read + validate
        }

        fn service_dio(&mut self, antenna: Antenna) {
            let port = match antenna {
                Antenna::One => self.engine.antenna1_mut(),
                Antenna::Two => self.engine.antenna2_mut(),
            };
            port.expect("antenna not active").service_dio_irq(SYNC);
        }

        /// One full cycle with a valid normal uplink frame on antenna 1.
        fn cycle_with_valid_rx(&mut self, payload: &[u8]) {
            self.start_cycle();
            self.tx_done(Antenna::One);
            let frame = uplink_frame(payload);
            self.rx_frame(Antenna::One, &frame, -70, 8);
        }
    }

    fn uplink_frame(payload: &[u8]) -> FrameBuf {
        let stats = FrameStats {
            seq_no: 9,
            ack: false,
            antenna: 0,
            transmit_antenna: 0,
            rssi: -66,
            lq: 95,
            lq_serial: 80,
        };
        let mut frame = [0u8; FRAME_LEN];
        pack_rx_frame(&mut frame, SYNC, &stats, payload);
        frame
    }

    fn setupdata_frame(setup: &RxSetupData) -> FrameBuf {
        let mut frame = [0u8; FRAME_LEN];
        pack_rx_cmd_setupdata(&mut frame, SYNC, &FrameStats::default(), setup);
        frame
    }

    fn ack_frame() -> FrameBuf {
        let mut frame = [0u8; FRAME_LEN];
        pack_rx_cmd_ack(&mut frame, SYNC, &FrameStats::default());
        frame
    }

    // --- scenarios ---

    /// Cold connect: SYNC after the first valid frame, CONNECTED after the
    /// configured count, LQ ramping while the window fills.
    #[test]
    fn test_cold_connect_ramp() {
        let mut h = harness(config());
        assert_eq!(h.engine.connect_state(), ConnectState::Listen);

        let mut last_lq = 0;
        for cycle in 1..=4 {
            h.cycle_with_valid_rx(b"");
            h.start_cycle(); // boundary: judge this cycle's reception

            match cycle {
                1 => assert_eq!(h.engine.connect_state(), ConnectState::Sync),
                2 | 3 => assert_eq!(h.engine.connect_state(), ConnectState::Sync),
                _ => assert_eq!(h.engine.connect_state(), ConnectState::Connected),
            }

            let lq = h.engine.txstats().lq();
            assert!(lq > last_lq, "LQ must ramp, got {lq} after {cycle}");
            last_lq = lq;
        }

        // Connected now, so the snapshot survives the boundary.
        assert_eq!(h.engine.stats().received_seq_no_last, 9);
        assert_eq!(h.engine.stats().received_rssi, -66);
    }

    /// Diversity: both antennas valid, antenna 2 stronger; its frame wins.
    #[test]
    fn test_diversity_picks_stronger_valid_antenna() {
        let cfg = LinkConfig {
            diversity: Diversity::Both,
            ..config()
        };
        let mut h = harness(cfg);

        h.start_cycle();
        h.tx_done(Antenna::One);
        h.rx_frame(Antenna::One, &uplink_frame(b"from antenna one"), -90, 5);
        h.rx_frame(Antenna::Two, &uplink_frame(b"from antenna two"), -80, 9);
        h.start_cycle();

        assert_eq!(h.engine.stats().last_rx_antenna, Antenna::Two);
        assert_eq!(h.serial.to_host(), b"from antenna two");
    }

    /// Sync-word rejection: the ISR peek converts a foreign frame into "no
    /// frame" and nothing is accounted.
    #[test]
    fn test_foreign_sync_word_counts_as_nothing() {
        let mut h = harness(config());

        h.start_cycle();
        h.tx_done(Antenna::One);

        // Frame with sync word 0x0000 against configured 0xA55A.
        let mut foreign = [0u8; FRAME_LEN];
        pack_rx_frame(&mut foreign, 0x0000, &FrameStats::default(), b"not ours");
        h.rx_frame(Antenna::One, &foreign, -40, 10);

        h.start_cycle();

        assert_eq!(h.engine.txstats().lq(), 0);
        assert_eq!(h.engine.stats().received_seq_no_last, SEQ_NO_INVALID);
        assert!(h.serial.to_host().is_empty());
    }

    /// Command handshake: setup-data request until the reply, then normal
    /// frames and flowing serial bytes.
    #[test]
    fn test_setupdata_handshake_then_serial_flow() {
        let cfg = LinkConfig {
            connect_sync_cnt: 1,
            ..config()
        };
        let mut h = harness(cfg);

        // Cycle 1: the command frame goes out.
        h.start_cycle();
        let sent = h.r1.last_sent();
        let status = unpack_frame_status(&sent);
        assert_eq!(status.frame_type, FrameType::TxCmd);
        assert_eq!(tx_payload(&sent)[0], CMD_GET_RX_SETUPDATA);

        h.tx_done(Antenna::One);
        let setup = RxSetupData {
            firmware_version: 0x0105,
            lq_averaging_period: 100,
            ..Default::default()
        };
        h.rx_frame(Antenna::One, &setupdata_frame(&setup), -60, 10);

        h.serial.feed(b"ground to air");

        // Cycle 2: reply processed, traffic back to normal.
        h.start_cycle();
        assert_eq!(h.engine.transmit_frame_type(), TransmitFrameType::Normal);
        assert_eq!(h.engine.rx_setup(), Some(&setup));
        let status = unpack_frame_status(&h.r1.last_sent());
        assert_eq!(status.frame_type, FrameType::TxNormal);
        // Not yet connected: no payload drained.
        assert_eq!(status.payload_len, 0);

        h.tx_done(Antenna::One);
        h.rx_frame(Antenna::One, &uplink_frame(b""), -60, 10);

        // Cycle 3: connected now; the serial bytes ride along.
        h.start_cycle();
        assert!(h.engine.is_connected());
        assert_eq!(tx_payload(&h.r1.last_sent()), b"ground to air");

        // Cycle 4: the transmit-direction serial LQ reflects that drain and
        // is what the next header broadcasts.
        h.tx_done(Antenna::One);
        h.rx_frame(Antenna::One, &uplink_frame(b""), -60, 10);
        h.start_cycle();
        assert_eq!(h.engine.txstats().lq_serial_data(), 1);
        assert_eq!(unpack_frame_status(&h.r1.last_sent()).lq_serial, 1);
    }

    /// Param store: exactly one store command frame, then normal resumes,
    /// and the deferred task fires after its postponement.
    #[test]
    fn test_param_store_single_shot_and_deferred_task() {
        let mut h = harness(config());

        // Get past the boot-time setup-data handshake first.
        h.start_cycle();
        h.tx_done(Antenna::One);
        h.rx_frame(
            Antenna::One,
            &setupdata_frame(&RxSetupData::default()),
            -60,
            10,
        );
        h.start_cycle(); // reply processed; traffic is normal now
        h.tx_done(Antenna::One);

        h.engine.store_rx_params();
        assert!(!h.engine.take_store_params_request());

        h.start_cycle();
        let sent = h.r1.last_sent();
        assert_eq!(unpack_frame_status(&sent).frame_type, FrameType::TxCmd);
        assert_eq!(tx_payload(&sent), &[CMD_STORE_RX_PARAMS]);

        // The store frame is single-shot.
        assert_eq!(h.engine.transmit_frame_type(), TransmitFrameType::Normal);

        // The deferred task runs a few loop iterations after the handoff.
        for _ in 0..6 {
            h.poll();
        }
        assert!(h.engine.take_store_params_request());
        assert!(!h.engine.take_store_params_request());

        h.tx_done(Antenna::One);
        h.start_cycle();
        assert_eq!(
            unpack_frame_status(&h.r1.last_sent()).frame_type,
            FrameType::TxNormal
        );
    }

    /// Impossible IRQ: RX_DONE while waiting for TX_DONE is fatal.
    #[test]
    fn test_impossible_irq_faults() {
        let mut h = harness(config());

        h.start_cycle(); // now in TRANSMIT_WAIT
        assert_eq!(h.engine.link_state(), LinkState::TransmitWait);

        // A frame with our sync word so the ISR keeps the RX_DONE.
        h.r1.load_rx(&uplink_frame(b""), -50, 10);
        h.r1.raise_irq(IrqMask::RX_DONE);
        h.service_dio(Antenna::One);

        assert_eq!(h.engine.poll(), Err(LinkFault::ImpossibleIrq));
        // The fault is sticky.
        assert_eq!(h.engine.poll(), Err(LinkFault::ImpossibleIrq));
    }

    /// With halting disabled, the same anomaly resets the cycle instead.
    #[test]
    fn test_impossible_irq_recovers_when_configured() {
        let cfg = LinkConfig {
            halt_on_impossible_irq: false,
            ..config()
        };
        let mut h = harness(cfg);

        h.start_cycle();
        h.r1.load_rx(&uplink_frame(b""), -50, 10);
        h.r1.raise_irq(IrqMask::RX_DONE);
        h.service_dio(Antenna::One);

        assert_eq!(h.engine.poll(), Ok(()));
        assert_eq!(h.engine.link_state(), LinkState::Idle);

        // The next cycle proceeds normally.
        h.start_cycle();
        assert_eq!(h.engine.link_state(), LinkState::TransmitWait);
    }

    /// A radio timeout abandons the cycle without any fault.
    #[test]
    fn test_timeout_returns_to_idle() {
        let mut h = harness(config());

        h.start_cycle();
        h.tx_done(Antenna::One);
        assert_eq!(h.engine.link_state(), LinkState::ReceiveWait);
        assert!(h.r1.0.borrow().rx_armed >= 1);

        h.r1.raise_irq(IrqMask::TIMEOUT);
        h.service_dio(Antenna::One);
        h.poll();

        assert_eq!(h.engine.link_state(), LinkState::Idle);

        // Next cycle is unaffected.
        h.start_cycle();
        assert_eq!(h.engine.link_state(), LinkState::TransmitWait);
    }

    /// The hop advances exactly once per cycle and not at all in between.
    #[test]
    fn test_hop_advances_once_per_cycle() {
        let mut h = harness(config());
        let start = h.engine.hop_index();

        h.start_cycle();
        let after_one = h.engine.hop_index();
        assert_eq!(after_one, (start + 1) % 24);

        // Arbitrary polling without a frame tick must not hop.
        for _ in 0..100 {
            h.poll();
        }
        assert_eq!(h.engine.hop_index(), after_one);

        h.tx_done(Antenna::One);
        h.start_cycle();
        assert_eq!(h.engine.hop_index(), (after_one + 1) % 24);
    }

    /// An invalid (CRC-failed) frame counts as received but not valid, and
    /// no payload is delivered.
    #[test]
    fn test_invalid_frame_counts_but_delivers_nothing() {
        let mut h = harness(config());

        h.start_cycle();
        h.tx_done(Antenna::One);

        let mut damaged = uplink_frame(b"should never arrive");
        damaged[40] ^= 0xFF;
        h.rx_frame(Antenna::One, &damaged, -70, 3);
        h.start_cycle();

        assert_eq!(h.engine.txstats().lq(), 1); // frame seen
        assert_eq!(h.engine.txstats().lq_valid(), 0); // but not valid
        assert!(h.serial.to_host().is_empty());
        assert_eq!(h.engine.stats().received_seq_no_last, SEQ_NO_INVALID);
    }

    /// Connected link goes back to LISTEN once the timeout budget runs dry.
    #[test]
    fn test_link_lost_after_timeout() {
        let mut h = harness(config());
        for _ in 0..4 {
            h.cycle_with_valid_rx(b"");
        }
        h.start_cycle();
        assert!(h.engine.is_connected());

        // connect_tmo_systicks = 100 -> five silent 20 ms cycles.
        for _ in 0..5 {
            h.start_cycle();
            h.tx_done(Antenna::One);
        }
        assert_eq!(h.engine.connect_state(), ConnectState::Listen);
        // The snapshot was cleared with the connection.
        assert_eq!(h.engine.stats().received_rssi, crate::stats::RSSI_INVALID);
    }

    /// Channel data is remapped to wire order and lands in the next frame.
    #[test]
    fn test_channels_remapped_and_packed() {
        let cfg = LinkConfig {
            channel_order: ChannelOrder::Etar,
            ..config()
        };
        let mut h = harness(cfg);

        // Host stick order ETAR: E=600, T=700, A=500, R=800.
        let mut rc = RcData::centered();
        rc.ch[..4].copy_from_slice(&[600, 700, 500, 800]);
        h.channels.push(rc);
        h.poll();

        assert_eq!(&h.engine.rc_data().ch[..4], &[500, 600, 700, 800]);

        h.start_cycle();
        let packed = unpack_tx_rc_channels(&h.r1.last_sent());
        assert_eq!(&packed.ch[..4], &[500, 600, 700, 800]);
    }

    /// While disconnected in MAVLink mode, the serial source is flushed
    /// instead of drained.
    #[test]
    fn test_mavlink_mode_flushes_while_disconnected() {
        let cfg = LinkConfig {
            serial_link_mode: SerialLinkMode::Mavlink,
            connect_sync_cnt: 1,
            ..config()
        };
        let mut h = harness(cfg);

        // Skip the setup-data handshake so normal frames are packed.
        h.start_cycle();
        h.tx_done(Antenna::One);
        h.rx_frame(
            Antenna::One,
            &setupdata_frame(&RxSetupData::default()),
            -60,
            10,
        );

        h.serial.feed(b"stale parser bytes");
        h.start_cycle();

        assert!(h.serial.flushes() > 0);
        assert_eq!(h.serial.to_air_len(), 0);
        assert_eq!(unpack_frame_status(&h.r1.last_sent()).payload_len, 0);
    }

    /// Set-params push persists until the receiver acknowledges.
    #[test]
    fn test_set_params_until_ack() {
        let mut h = harness(config());

        // Finish the boot handshake.
        h.start_cycle();
        h.tx_done(Antenna::One);
        h.rx_frame(
            Antenna::One,
            &setupdata_frame(&RxSetupData::default()),
            -60,
            10,
        );

        let params = RxParams {
            power_dbm: 14,
            diversity: 1,
            failsafe_mode: 0,
            serial_baud_index: 3,
        };
        h.engine.set_rx_params(params);

        // Two cycles without an ACK: the push repeats.
        for _ in 0..2 {
            h.start_cycle();
            let sent = h.r1.last_sent();
            let payload = tx_payload(&sent);
            assert_eq!(payload[0], CMD_SET_RX_PARAMS);
            assert_eq!(RxParams::unpack_from(&payload[1..]), Ok(params));
            h.tx_done(Antenna::One);
        }

        h.rx_frame(Antenna::One, &ack_frame(), -60, 10);
        h.start_cycle();
        assert_eq!(
            unpack_frame_status(&h.r1.last_sent()).frame_type,
            FrameType::TxNormal
        );
    }

    /// Both radios are retuned to the same hop frequency at each transmit
    /// entry.
    #[test]
    fn test_both_radios_follow_the_hop() {
        let cfg = LinkConfig {
            diversity: Diversity::Both,
            ..config()
        };
        let mut h = harness(cfg);

        h.start_cycle();
        let f1 = h.r1.0.borrow().freq;
        let f2 = h.r2.0.borrow().freq;
        assert_eq!(f1, f2);
        assert_ne!(f1, 0);
    }

    /// A dead radio at boot is a RadioInit fault.
    #[test]
    fn test_radio_init_failure() {
        let tick = leak(SysTickFlag::new());
        let r1 = MockRadio::new();
        r1.0.borrow_mut().ok = false;
        let sx1 = Some(RadioPort::new(
            Antenna::One,
            r1.clone(),
            leak(IrqLatch::new()),
        ));

        let mut engine = LinkEngine::new(
            config(),
            sx1,
            None,
            MockSerial::default(),
            MockChannels::default(),
            tick,
        )
        .unwrap();

        assert_eq!(engine.start(), Err(LinkFault::RadioInit));
        assert_eq!(engine.poll(), Err(LinkFault::RadioInit));
    }

    /// Port set must match the diversity selection.
    #[test]
    fn test_mismatched_ports_rejected() {
        let tick = leak(SysTickFlag::new());
        let result = LinkEngine::<MockRadio, _, _>::new(
            LinkConfig {
                diversity: Diversity::Both,
                ..config()
            },
            Some(RadioPort::new(
                Antenna::One,
                MockRadio::new(),
                leak(IrqLatch::new()),
            )),
            None,
            MockSerial::default(),
            MockChannels::default(),
            tick,
        );
        assert!(matches!(result, Err(ConfigError::DiversityPorts)));
    }

    /// Received uplink payload is delivered to the serial sink and counted
    /// in the receive direction only; the broadcast serial LQ tracks what
    /// we transmit, not what we hear.
    #[test]
    fn test_uplink_payload_delivered() {
        let mut h = harness(config());

        h.cycle_with_valid_rx(b"telemetry!");
        h.start_cycle();

        assert_eq!(h.serial.to_host(), b"telemetry!");
        assert_eq!(h.engine.txstats().lq_serial_data_received(), 1);
        assert_eq!(h.engine.txstats().lq_serial_data(), 0);
    }
}
