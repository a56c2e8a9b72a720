//! System tick plumbing.
//!
//! A 1 kHz tick drives every piece of link timing. The tick interrupt only
//! sets [`SysTickFlag`]; all real work happens in the cooperative loop when
//! it consumes the flag. Same single-writer/single-reader discipline as the
//! radio IRQ latches.

use core::sync::atomic::{AtomicBool, Ordering};

/// ISR-set, loop-consumed "a tick elapsed" flag.
pub struct SysTickFlag(AtomicBool);

impl SysTickFlag {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Called from the tick interrupt.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Consume the flag; returns whether a tick had been raised.
    #[must_use]
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::Acquire)
    }
}

impl Default for SysTickFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapping countdown, one step per tick.
///
/// `tick(period)` decrements and reloads at zero; it reports `true` on the
/// steps where the counter lands on zero, i.e. once every `period` calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickDown {
    cnt: u16,
}

impl TickDown {
    #[must_use]
    pub const fn new() -> Self {
        Self { cnt: 0 }
    }

    /// Advance one step; `true` once every `period` steps.
    pub fn tick(&mut self, period: u16) -> bool {
        if self.cnt > 0 {
            self.cnt -= 1;
        } else {
            self.cnt = period.saturating_sub(1);
        }
        self.cnt == 0
    }

    /// Restart the countdown from the top.
    pub fn reset(&mut self) {
        self.cnt = 0;
    }
}
