//! Serial bridge: the byte stream tunneled over the link.
//!
//! The engine pulls bytes from the active source into outbound frame
//! payloads and pushes received payload bytes to the active sink. What sits
//! behind the port — a host bridge, a plain UART, a MAVLink parser/router —
//! is decided at startup and is invisible to the engine.

use heapless::Deque;

/// Byte source/sink bound to the link.
///
/// Implementations must be non-blocking: `get` returns `None` instead of
/// waiting, `put` drops the byte when the far side is saturated.
pub trait SerialPort {
    /// Whether at least one byte is waiting to be sent over the air.
    fn available(&self) -> bool;

    /// Pull the next byte bound for the air, if any.
    fn get(&mut self) -> Option<u8>;

    /// Push one received byte toward the host.
    fn put(&mut self, c: u8);

    /// Discard bytes waiting to be sent over the air.
    ///
    /// Used while the link is down so a parser sitting behind the port does
    /// not back up.
    fn flush(&mut self);
}

/// A port that never produces and silently swallows everything.
#[derive(Default)]
pub struct NullPort;

impl SerialPort for NullPort {
    fn available(&self) -> bool {
        false
    }

    fn get(&mut self) -> Option<u8> {
        None
    }

    fn put(&mut self, _c: u8) {}

    fn flush(&mut self) {}
}

/// In-memory port backed by two fixed-capacity rings.
///
/// The "host" side feeds [`FifoPort::feed`] and drains
/// [`FifoPort::read_to_host`]; the engine side sees the [`SerialPort`]
/// trait. Firmware UART glue and tests both use this.
pub struct FifoPort<const N: usize = 256> {
    to_air: Deque<u8, N>,
    to_host: Deque<u8, N>,
}

impl<const N: usize> FifoPort<N> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            to_air: Deque::new(),
            to_host: Deque::new(),
        }
    }

    /// Host side: enqueue bytes to be tunneled over the air.
    ///
    /// Returns how many bytes fit.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let mut n = 0;
        for &b in bytes {
            if self.to_air.push_back(b).is_err() {
                break;
            }
            n += 1;
        }
        n
    }

    /// Host side: drain received bytes into `out`, returning the count.
    pub fn read_to_host(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.to_host.pop_front() {
                Some(b) => {
                    out[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Bytes currently queued toward the host.
    #[must_use]
    pub fn to_host_len(&self) -> usize {
        self.to_host.len()
    }
}

impl<const N: usize> Default for FifoPort<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SerialPort for FifoPort<N> {
    fn available(&self) -> bool {
        !self.to_air.is_empty()
    }

    fn get(&mut self) -> Option<u8> {
        self.to_air.pop_front()
    }

    fn put(&mut self, c: u8) {
        // Oldest-first overflow: the freshest telemetry matters most.
        if self.to_host.push_back(c).is_err() {
            self.to_host.pop_front();
            let _ = self.to_host.push_back(c);
        }
    }

    fn flush(&mut self) {
        self.to_air.clear();
    }
}
