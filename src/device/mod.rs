//! Device implementations backing the heap
//!
//! This module contains concrete [`crate::Device`] implementations.

/// RAM-backed device for tests, examples and host-side use
#[cfg(any(test, feature = "mem-device"))]
pub mod mem;

#[cfg(test)]
pub mod flaky;
