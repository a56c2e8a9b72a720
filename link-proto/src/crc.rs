//! Frame CRC for the air protocol.
//!
//! Uses CRC-16/MCRF4XX with a lookup table. The checksum covers every frame
//! byte after the sync word, so a frame that passes the sync-word check can
//! still be rejected here when it was damaged in flight.

use crc::{Crc, CRC_16_MCRF4XX};

/// CRC-16/MCRF4XX calculator with lookup table.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

/// Calculate the frame checksum of a byte slice.
#[inline]
#[must_use]
pub fn frame_crc(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// CRC-16 digest for incremental calculation.
///
/// Use this when a frame is assembled in sections and buffering the whole
/// span is inconvenient.
pub struct FrameCrcDigest {
    digest: crc::Digest<'static, u16>,
}

impl FrameCrcDigest {
    /// Create a new frame CRC digest.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            digest: CRC16.digest(),
        }
    }

    /// Update the digest with a byte slice.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Finalize and return the checksum value.
    #[inline]
    #[must_use]
    pub fn finalize(self) -> u16 {
        self.digest.finalize()
    }
}

impl Default for FrameCrcDigest {
    fn default() -> Self {
        Self::new()
    }
}
