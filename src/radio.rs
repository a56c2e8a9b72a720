//! Radio driver abstraction, IRQ flags and the per-antenna port.
//!
//! The register-level transceiver driver lives outside this crate; the link
//! engine only sees the [`RadioDriver`] trait. A [`RadioPort`] couples one
//! driver instance with its [`IrqLatch`] and antenna identity, so diversity
//! builds simply instantiate two ports.
//!
//! # IRQ discipline
//!
//! Each transceiver raises a DIO line serviced by an external interrupt. The
//! handler calls [`IrqLatch::latch`], which reads and clears the chip's IRQ
//! status and stores it in the latch word. The main loop is the only reader
//! and consumes the word with [`IrqLatch::take`]. Single writer (the ISR),
//! single reader (the loop), Release/Acquire pairing on the word.
//!
//! On `RX_DONE` the handler peeks the first two buffer bytes; if they are
//! not this link's sync word the whole latch is normalized to empty, so the
//! main loop never learns that a foreign frame arrived.

use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};
use core::sync::atomic::{AtomicU16, Ordering};

/// Antenna identity, also used as the wire encoding (0 or 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Antenna {
    One,
    Two,
}

impl Antenna {
    /// Wire encoding of the antenna flag bit.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }
}

/// Transceiver IRQ flags as a bitfield.
///
/// The values mirror what the DIO interrupt reports; `ALL` is the mask used
/// to read-and-clear every pending flag in one bus transaction.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqMask(pub u16);

impl IrqMask {
    pub const NONE: Self = Self(0);
    pub const TX_DONE: Self = Self(1 << 0);
    pub const RX_DONE: Self = Self(1 << 1);
    pub const TIMEOUT: Self = Self(1 << 2);
    pub const ALL: Self = Self(0xFFFF);

    /// Check that all flags in `other` are set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: IrqMask) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check whether any flag of `other` is set.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: IrqMask) -> bool {
        (self.0 & other.0) != 0
    }

    /// Clear the flags in `other`.
    #[inline]
    pub fn remove(&mut self, other: IrqMask) {
        self.0 &= !other.0;
    }

    /// Raw flag word.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Check that no flag is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for IrqMask {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for IrqMask {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for IrqMask {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for IrqMask {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for IrqMask {
    type Output = Self;

    #[inline]
    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

/// RSSI and SNR of the most recent packet, valid even when its CRC failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketStatus {
    /// Received signal strength, dBm.
    pub rssi: i8,
    /// Signal-to-noise ratio, dB.
    pub snr: i8,
}

/// Capability set of one transceiver, as consumed by the link engine.
///
/// One implementation exists per chip family; the engine is generic over it.
/// All methods are called from thread context except
/// `get_and_clear_irq_status` and `read_buffer`, which the DIO interrupt
/// handler also uses via [`IrqLatch::latch`] — implementations shared with
/// an ISR must serialize their bus access accordingly.
pub trait RadioDriver {
    /// One-time bring-up at boot (reset, bus init). Called before `is_ok`.
    fn init(&mut self);

    /// Report whether the chip answered bring-up sanely.
    fn is_ok(&mut self) -> bool;

    /// Configure modulation/packet parameters and enable the DIO interrupt.
    fn start_up(&mut self);

    /// Program the RF carrier frequency in Hz.
    fn set_rf_frequency(&mut self, freq_hz: u32);

    /// Switch the power amplifier to transmit, write the buffer and arm TX
    /// with the given timeout.
    fn send_frame(&mut self, frame: &[u8], tmo_us: u16);

    /// Switch the LNA to receive and arm RX; a timeout of 0 arms forever.
    fn set_to_rx(&mut self, tmo_us: u16);

    /// Read the receive buffer into `frame`.
    fn read_frame(&mut self, frame: &mut [u8]);

    /// Read `dst.len()` bytes of the receive buffer starting at `offset`.
    fn read_buffer(&mut self, offset: u8, dst: &mut [u8]);

    /// RSSI/SNR of the last packet. Valid even for a CRC-failed packet.
    fn get_packet_status(&mut self) -> PacketStatus;

    /// Atomically read and clear the chip IRQ flags selected by `mask`.
    fn get_and_clear_irq_status(&mut self, mask: IrqMask) -> IrqMask;
}

/// ISR-written, loop-read latch of one transceiver's IRQ status.
pub struct IrqLatch(AtomicU16);

impl IrqLatch {
    /// An empty latch.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    /// ISR entry point: read-and-clear the chip status into the latch.
    ///
    /// On `RX_DONE` the first two buffer bytes are compared against
    /// `sync_word`; a mismatch stores an empty latch, so a foreign frame is
    /// indistinguishable from no frame at all.
    pub fn latch<R: RadioDriver>(&self, radio: &mut R, sync_word: u16) {
        let mut irq = radio.get_and_clear_irq_status(IrqMask::ALL);
        if irq.contains(IrqMask::RX_DONE) {
            // The receive buffer base is pinned to 0, so the sync word sits
            // at the start of the buffer.
            let mut peek = [0u8; 2];
            radio.read_buffer(0, &mut peek);
            if u16::from_le_bytes(peek) != sync_word {
                irq = IrqMask::NONE;
            }
        }
        self.0.store(irq.bits(), Ordering::Release);
    }

    /// Consume the latched flags, leaving the latch empty.
    #[must_use]
    pub fn take(&self) -> IrqMask {
        IrqMask(self.0.swap(0, Ordering::Acquire))
    }

    /// Drop whatever is latched.
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

impl Default for IrqLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// One antenna's radio: driver instance plus IRQ latch.
pub struct RadioPort<R> {
    antenna: Antenna,
    radio: R,
    irq: &'static IrqLatch,
}

impl<R: RadioDriver> RadioPort<R> {
    /// Bind a driver instance and its latch to an antenna slot.
    pub fn new(antenna: Antenna, radio: R, irq: &'static IrqLatch) -> Self {
        Self { antenna, radio, irq }
    }

    /// Which antenna this port serves.
    #[must_use]
    pub fn antenna(&self) -> Antenna {
        self.antenna
    }

    /// Run the DIO interrupt work against this port's own driver and latch.
    ///
    /// Firmware calls [`IrqLatch::latch`] directly from the handler; this
    /// method exists for contexts (tests, polled bring-up) that own the port.
    pub fn service_dio_irq(&mut self, sync_word: u16) {
        self.irq.latch(&mut self.radio, sync_word);
    }

    /// Consume the latched IRQ flags.
    #[must_use]
    pub fn take_irq(&self) -> IrqMask {
        self.irq.take()
    }

    /// Drop any latched IRQ flags.
    pub fn clear_irq(&self) {
        self.irq.clear();
    }

    pub fn init(&mut self) {
        self.radio.init();
    }

    pub fn is_ok(&mut self) -> bool {
        self.radio.is_ok()
    }

    pub fn start_up(&mut self) {
        self.radio.start_up();
    }

    pub fn set_rf_frequency(&mut self, freq_hz: u32) {
        self.radio.set_rf_frequency(freq_hz);
    }

    pub fn send_frame(&mut self, frame: &[u8], tmo_us: u16) {
        self.radio.send_frame(frame, tmo_us);
    }

    pub fn set_to_rx(&mut self, tmo_us: u16) {
        self.radio.set_to_rx(tmo_us);
    }

    pub fn read_frame(&mut self, frame: &mut [u8]) {
        self.radio.read_frame(frame);
    }

    pub fn get_packet_status(&mut self) -> PacketStatus {
        self.radio.get_packet_status()
    }
}
