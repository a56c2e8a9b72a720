//! Link-quality accounting.
//!
//! Two layers: [`TxStats`] keeps the sliding-window LQ counters the adaptive
//! behavior and the telemetry report both read, and [`Stats`] is the
//! per-cycle snapshot of what the last frames looked like. The snapshot is
//! cleared whenever the link is not connected; the windows keep running so
//! the LQ figure honestly reflects the dropout.

use crate::radio::{Antenna, PacketStatus};

/// Sentinel for "no RSSI measured yet".
pub const RSSI_INVALID: i8 = i8::MIN;

/// Sentinel for "no sequence number received".
pub const SEQ_NO_INVALID: u8 = u8::MAX;

/// Largest supported LQ averaging window, in cycles.
pub const LQ_PERIOD_MAX: u8 = 128;

/// Sliding-window event counter over the last `period` cycles.
///
/// One bit per cycle in a shift register; [`LqCounter::next`] advances the
/// window at the cycle boundary. The percentage is taken over the full
/// window, so after a cold start it ramps up one cycle at a time.
#[derive(Clone, Copy)]
pub struct LqCounter {
    period: u8,
    window: u128,
    curr: bool,
}

impl LqCounter {
    /// Window of `period` cycles, clamped to `1..=`[`LQ_PERIOD_MAX`].
    #[must_use]
    pub fn new(period: u8) -> Self {
        Self {
            period: period.clamp(1, LQ_PERIOD_MAX),
            window: 0,
            curr: false,
        }
    }

    /// Mark the event as having happened this cycle.
    pub fn set(&mut self) {
        self.curr = true;
    }

    /// Advance the window by one cycle.
    pub fn next(&mut self) {
        self.window = (self.window << 1) | u128::from(self.curr);
        self.curr = false;
    }

    /// Event rate over the window, 0–100.
    #[must_use]
    pub fn lq(&self) -> u8 {
        let mask = if self.period as u32 == 128 {
            u128::MAX
        } else {
            (1u128 << self.period) - 1
        };
        let hits = (self.window & mask).count_ones();
        (hits * 100 / u32::from(self.period)) as u8
    }
}

/// Byte throughput accumulator with a 1 Hz rate snapshot.
#[derive(Clone, Copy, Default)]
pub struct BytesPerSec {
    cnt: u32,
    last: u32,
    rate: u32,
}

impl BytesPerSec {
    /// Account `n` bytes moved.
    pub fn add(&mut self, n: usize) {
        self.cnt = self.cnt.wrapping_add(n as u32);
    }

    /// Snapshot the rate; call once per second.
    pub fn update_1hz(&mut self) {
        self.rate = self.cnt.wrapping_sub(self.last);
        self.last = self.cnt;
    }

    /// Bytes per second as of the last snapshot.
    #[must_use]
    pub fn bytes_per_sec(&self) -> u32 {
        self.rate
    }
}

/// The sliding-window counters: any reception, valid reception, and cycles
/// in which serial payload moved, per direction.
pub struct TxStats {
    frames: LqCounter,
    valid_frames: LqCounter,
    serial_tx_frames: LqCounter,
    serial_rx_frames: LqCounter,
}

impl TxStats {
    #[must_use]
    pub fn new(lq_averaging_period: u8) -> Self {
        Self {
            frames: LqCounter::new(lq_averaging_period),
            valid_frames: LqCounter::new(lq_averaging_period),
            serial_tx_frames: LqCounter::new(lq_averaging_period),
            serial_rx_frames: LqCounter::new(lq_averaging_period),
        }
    }

    /// A frame was detected this cycle, valid or not.
    pub fn frame_received(&mut self) {
        self.frames.set();
    }

    /// A valid frame was received this cycle.
    pub fn valid_frame_received(&mut self) {
        self.valid_frames.set();
    }

    /// This cycle's outbound frame carried serial payload.
    pub fn serial_data_transmitted(&mut self) {
        self.serial_tx_frames.set();
    }

    /// A valid received frame carried serial payload this cycle.
    pub fn serial_data_received(&mut self) {
        self.serial_rx_frames.set();
    }

    /// Percentage of recent cycles with any reception.
    #[must_use]
    pub fn lq(&self) -> u8 {
        self.frames.lq()
    }

    /// Percentage of recent cycles with a valid reception.
    #[must_use]
    pub fn lq_valid(&self) -> u8 {
        self.valid_frames.lq()
    }

    /// Percentage of recent cycles in which we sent serial payload.
    ///
    /// This is the figure broadcast in the outbound frame header; the
    /// receiver reads it as the health of the downlink serial stream.
    #[must_use]
    pub fn lq_serial_data(&self) -> u8 {
        self.serial_tx_frames.lq()
    }

    /// Percentage of recent cycles in which serial payload arrived.
    #[must_use]
    pub fn lq_serial_data_received(&self) -> u8 {
        self.serial_rx_frames.lq()
    }

    /// Advance all windows by one cycle.
    pub fn next(&mut self) {
        self.frames.next();
        self.valid_frames.next();
        self.serial_tx_frames.next();
        self.serial_rx_frames.next();
    }
}

/// Per-cycle snapshot of the link as seen from the transmitter.
pub struct Stats {
    /// Antenna the last TX frame left on.
    pub last_tx_antenna: Antenna,
    /// Antenna the last RX frame was taken from.
    pub last_rx_antenna: Antenna,
    pub last_rx_rssi1: i8,
    pub last_rx_rssi2: i8,
    pub last_rx_snr1: i8,
    pub last_rx_snr2: i8,
    /// Fields mirrored out of the last valid RX frame header.
    pub received_antenna: u8,
    pub received_transmit_antenna: u8,
    pub received_rssi: i8,
    pub received_lq: u8,
    pub received_lq_serial: u8,
    pub received_seq_no_last: u8,
    pub received_ack_last: bool,
    /// Our own frame sequence counter, monotone mod 256.
    pub transmit_seq_no: u8,
    pub bytes_transmitted: BytesPerSec,
    pub bytes_received: BytesPerSec,
}

impl Stats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_tx_antenna: Antenna::One,
            last_rx_antenna: Antenna::One,
            last_rx_rssi1: RSSI_INVALID,
            last_rx_rssi2: RSSI_INVALID,
            last_rx_snr1: 0,
            last_rx_snr2: 0,
            received_antenna: 0,
            received_transmit_antenna: 0,
            received_rssi: RSSI_INVALID,
            received_lq: 0,
            received_lq_serial: 0,
            received_seq_no_last: SEQ_NO_INVALID,
            received_ack_last: false,
            transmit_seq_no: 0,
            bytes_transmitted: BytesPerSec::default(),
            bytes_received: BytesPerSec::default(),
        }
    }

    /// Record the packet status of one antenna's reception.
    pub fn set_packet_status(&mut self, antenna: Antenna, status: PacketStatus) {
        match antenna {
            Antenna::One => {
                self.last_rx_rssi1 = status.rssi;
                self.last_rx_snr1 = status.snr;
            }
            Antenna::Two => {
                self.last_rx_rssi2 = status.rssi;
                self.last_rx_snr2 = status.snr;
            }
        }
    }

    /// RSSI measured on the given antenna this cycle.
    #[must_use]
    pub fn rx_rssi(&self, antenna: Antenna) -> i8 {
        match antenna {
            Antenna::One => self.last_rx_rssi1,
            Antenna::Two => self.last_rx_rssi2,
        }
    }

    /// RSSI of the antenna the last frame was taken from.
    #[must_use]
    pub fn last_rx_rssi(&self) -> i8 {
        self.rx_rssi(self.last_rx_antenna)
    }

    /// Advance the 1 Hz throughput snapshots.
    pub fn update_1hz(&mut self) {
        self.bytes_transmitted.update_1hz();
        self.bytes_received.update_1hz();
    }

    /// Reset the snapshot; the transmit sequence and byte accumulators
    /// survive.
    pub fn clear(&mut self) {
        self.last_rx_rssi1 = RSSI_INVALID;
        self.last_rx_rssi2 = RSSI_INVALID;
        self.last_rx_snr1 = 0;
        self.last_rx_snr2 = 0;
        self.received_antenna = 0;
        self.received_transmit_antenna = 0;
        self.received_rssi = RSSI_INVALID;
        self.received_lq = 0;
        self.received_lq_serial = 0;
        self.received_seq_no_last = SEQ_NO_INVALID;
        self.received_ack_last = false;
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
