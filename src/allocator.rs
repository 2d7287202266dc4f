//! # NvHeap - A no_std Block Heap for Byte-Addressable Storage
//!
//! NvHeap manages variable-length blocks inside an arbitrary byte-addressable
//! backing store such as a dataflash, EEPROM or NVRAM device. It features:
//!
//! - **Device agnostic** - All access goes through a two-method [`Device`] trait
//! - **Self-describing layout** - Every block carries its own on-device header
//! - **Stateless core** - Headers are re-read on demand; the medium is the
//!   single source of truth
//! - **First-fit with coalescing** - Splits on allocation, merges free
//!   neighbors on release
//! - **Opaque addresses** - Allocations are identified by [`Addr`] handles,
//!   never by raw pointers
//!
//! ## Quick Start
//!
//! ```rust
//! use nvheap::prelude::*;
//!
//! // A 4 KiB RAM-backed device; the heap manages bytes [16, 16 + 4080).
//! let dev = MemDevice::<4096>::new();
//! let mut heap = BlockHeap::bind(dev, 16, 4080).unwrap();
//! heap.reset().unwrap();
//!
//! // Allocate a block, write into it and read it back.
//! let addr = heap.alloc_with(b"hello flash").unwrap();
//! let mut buf = [0u8; 11];
//! heap.read_data(addr, 0, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello flash");
//!
//! heap.free(addr).unwrap();
//! ```
//!
//! ## Features
//!
//! - `mem-device` (default) - Const-generic RAM-backed [`Device`] for tests,
//!   examples and host-side tooling
//!
//! ## Architecture
//!
//! ### The Device Trait
//!
//! The [`Device`] trait is the only way the heap touches storage:
//!
//! - `read(offset, buf)` / `write(offset, buf)` - Synchronous byte-range
//!   transfers returning the number of bytes actually moved
//!
//! A short transfer is reported to the caller as [`HeapError::Io`]. The heap
//! never retries and never rolls back; whatever a partial write left on the
//! device is what a later read will see.
//!
//! ### Block Layout
//!
//! The heap imposes an implicit singly-linked list of blocks on the configured
//! range `[base, base + extent)`:
//!
//! ```text
//! +--------+-----------------+--------+--------------+--------+-----+
//! | header |    payload      | header |   payload    | header | ... |
//! +--------+-----------------+--------+--------------+--------+-----+
//! ^ base                                                 base + extent ^
//! ```
//!
//! Each header is a single little-endian `i32`. The magnitude is the payload
//! length in bytes; the sign is the state tag (negative means free,
//! non-negative means allocated). Blocks are contiguous with no gaps, so the
//! end of one payload is the next header. Walking headers from `base` lands
//! exactly on `base + extent`.
//!
//! Reusing the sign bit as the state tag halves the representable block
//! length: no block payload (and no heap extent minus one header) may exceed
//! [`MAX_BLOCK_LEN`] bytes.
//!
//! ### Addresses
//!
//! [`BlockHeap::alloc`] returns an [`Addr`], the device offset of the block's
//! header wrapped in an opaque handle. Addresses stay valid until the block is
//! freed and are the token for every later call ([`BlockHeap::free`],
//! [`BlockHeap::alloc_size`], [`BlockHeap::read_data`], ...). They are offsets
//! into an external store, not pointers, and cannot be dereferenced.
//!
//! ## Iterating Live Allocations
//!
//! ```rust
//! use nvheap::prelude::*;
//!
//! let mut heap = BlockHeap::bind(MemDevice::<512>::new(), 8, 500).unwrap();
//! heap.reset().unwrap();
//!
//! let a = heap.alloc(24).unwrap();
//! let b = heap.alloc(32).unwrap();
//!
//! let mut cursor = heap.alloc_first().unwrap();
//! assert_eq!(cursor, Some(a));
//! cursor = heap.alloc_next(cursor).unwrap();
//! assert_eq!(cursor, Some(b));
//! assert_eq!(heap.alloc_next(cursor).unwrap(), None);
//! ```
//!
//! ## Performance Characteristics
//!
//! | Operation | Cost | Notes |
//! |-----------|------|-------|
//! | alloc() | O(blocks) | First-fit linear scan |
//! | free() | O(blocks) | Forward walk finds the predecessor |
//! | alloc_size() | O(1) | Single header read |
//! | stats() | O(blocks) | Full walk |
//!
//! Every header access is a device transfer. On slow media the dominating
//! cost is I/O, not the scan itself.
//!
//! ## Guarantees
//!
//! - **No unsafe code** - The crate is `#![forbid(unsafe_code)]`
//! - **No panics** - Every fallible operation returns `Result`
//! - **Double-free detection** - Freeing a free block fails and changes
//!   nothing
//! - **Coalescing invariant** - No two adjacent free blocks persist after any
//!   successful operation
//! - **Single-threaded** - One heap handle must not be shared between
//!   execution contexts without external serialization
//!
//! ## no_std Support
//!
//! NvHeap is fully `no_std` compatible. The only dependencies are `log` and
//! `thiserror`, both with default features disabled. No allocator is
//! required; the crate itself never allocates.
//!
//! ## Testing
//!
//! ```bash
//! cargo test --all-features
//! ```
//!
//! ## License
//!
//! This project is licensed under your chosen license.

#![no_std]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![doc(html_root_url = "https://docs.rs/nvheap/0.1.0")]

// Internal modules - use prelude for public API
mod block;
mod device;
mod heap;

/// Convenient re-exports for common use - this is the public API
///
/// Users should import from prelude:
/// ```
/// use nvheap::prelude::*;
/// ```
pub mod prelude;

pub use block::{HEADER_LEN, MAX_BLOCK_LEN};
pub use heap::{Allocations, BlockHeap, HeapError, HeapStats};

/// Returns the version string of the nvheap crate
///
/// # Examples
///
/// ```
/// use nvheap::version;
/// assert_eq!(version(), "0.1.0");
/// ```
pub fn version() -> &'static str {
    "0.1.0"
}

/// The device offset of a block's header, wrapped as an opaque handle
///
/// An `Addr` identifies one block for the lifetime of its allocation. It is
/// handed out by [`BlockHeap::alloc`] and presented back to
/// [`BlockHeap::free`], [`BlockHeap::alloc_size`] and the payload accessors.
/// Blocks never move, so an address stays stable until the block is freed.
///
/// # Examples
///
/// ```
/// use nvheap::Addr;
///
/// let addr = Addr::new(0x40);
/// assert_eq!(addr.raw(), 0x40);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Addr(u32);

impl Addr {
    /// Rebuilds an address from a raw header offset
    ///
    /// Useful for addresses persisted across runs. The offset must have been
    /// obtained from [`Addr::raw`] on the same heap layout; anything else is
    /// rejected by the operation it is passed to, not here.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw device offset of the block header
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Byte-range access to the backing store
///
/// This is the single seam between the heap and the medium. Implementations
/// exist for RAM buffers (see `MemDevice` with the `mem-device` feature) and
/// are expected for SPI dataflash, EEPROM and similar parts.
///
/// Both methods are synchronous and may block on the medium. They return the
/// number of bytes actually transferred; anything short of the requested
/// length is treated by the heap as a hard failure of the current operation.
/// The heap never retries a short transfer.
pub trait Device {
    /// Reads `buf.len()` bytes starting at `offset` into `buf`
    ///
    /// Returns the number of bytes actually read.
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> usize;

    /// Writes all of `buf` starting at `offset`
    ///
    /// Returns the number of bytes actually written.
    fn write(&mut self, offset: u32, buf: &[u8]) -> usize;
}

impl<D: Device + ?Sized> Device for &mut D {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> usize {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: u32, buf: &[u8]) -> usize {
        (**self).write(offset, buf)
    }
}
