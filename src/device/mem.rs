//! RAM-backed device
//!
//! `MemDevice` keeps its bytes in a const-generic array, which makes it
//! usable on bare metal as well as in host tests. Transfers touching bytes
//! past the capacity are clamped, so out-of-range access shows up as a short
//! transfer exactly like it would on real media.

use crate::Device;

/// A device of `N` bytes of ordinary memory
///
/// # Examples
///
/// ```
/// use nvheap::prelude::*;
///
/// let mut dev = MemDevice::<64>::new();
/// assert_eq!(dev.write(60, b"abcdef"), 4); // clamped at capacity
/// ```
#[derive(Debug)]
pub struct MemDevice<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> MemDevice<N> {
    /// Creates a zero-filled device
    pub const fn new() -> Self {
        Self { bytes: [0u8; N] }
    }

    /// Returns the whole backing buffer
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl<const N: usize> Default for MemDevice<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Device for MemDevice<N> {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> usize {
        let start = (offset as usize).min(N);
        let count = buf.len().min(N - start);
        buf[..count].copy_from_slice(&self.bytes[start..start + count]);
        count
    }

    fn write(&mut self, offset: u32, buf: &[u8]) -> usize {
        let start = (offset as usize).min(N);
        let count = buf.len().min(N - start);
        self.bytes[start..start + count].copy_from_slice(&buf[..count]);
        count
    }
}
