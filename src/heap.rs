//! The coalescing block heap
//!
//! One [`BlockHeap`] owns a configured sub-range of a device's address space
//! and lays a contiguous chain of self-describing blocks over it. The heap
//! keeps no block metadata in RAM; every operation re-reads headers from the
//! device, so the medium is always the authoritative record. The only cached
//! state is an advisory hint to the most recent allocation.

use log::{debug, trace, warn};

use crate::block::{HEADER_LEN, Header, MAX_BLOCK_LEN};
use crate::{Addr, Device};

/// Errors reported by heap operations
///
/// No operation retries internally; every failure propagates to the caller
/// as soon as it is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    /// The device moved fewer bytes than requested
    ///
    /// The device is left in whatever state the partial transfer produced.
    /// A failed header write can leave the block chain inconsistent; the
    /// heap performs no rollback.
    #[error("device transfer came up short at offset {0:#x}")]
    Io(u32),
    /// No free block can satisfy the request
    #[error("no free block can hold {0} bytes")]
    NoSpace(u32),
    /// The request exceeds the representable block length
    #[error("request of {0} bytes exceeds the maximum block length")]
    TooLarge(u32),
    /// The address does not name an allocated block of this heap
    #[error("address {0:#x} does not name an allocated block")]
    BadAddress(u32),
    /// The block is already free
    #[error("block at {0:#x} is already free")]
    AlreadyFree(u32),
    /// The base/extent configuration was rejected
    #[error("invalid heap geometry")]
    BadGeometry,
    /// A payload range extends past the end of the block
    #[error("range extends past the end of the block")]
    OutOfRange,
}

/// Point-in-time census of every block in the heap
///
/// Produced by [`BlockHeap::stats`]. Totals count payload bytes only; add
/// one [`HEADER_LEN`] per block to account for the full extent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of allocated blocks
    pub alloc_blocks: u32,
    /// Total payload bytes of allocated blocks
    pub alloc_bytes: u32,
    /// Number of free blocks
    pub free_blocks: u32,
    /// Total payload bytes of free blocks
    pub free_bytes: u32,
}

/// A heap of variable-length blocks stored on a [`Device`]
///
/// The handle is cheap: a device, the `[base, base + extent)` range it
/// manages, and the last-allocation hint. Multiple independent heaps may
/// coexist on one device as long as their ranges do not overlap.
///
/// A fresh range must be formatted once with [`BlockHeap::reset`] before any
/// other operation; binding alone never touches the device.
#[derive(Debug)]
pub struct BlockHeap<D: Device> {
    device: D,
    base: u32,
    extent: u32,
    last: Option<Addr>,
}

impl<D: Device> BlockHeap<D> {
    /// Binds a heap to `[base, base + extent)` of `device`
    ///
    /// The device is not touched. `base` must be non-zero, the range must
    /// not wrap the address space, and the extent must leave room for one
    /// header plus at least one payload byte without exceeding
    /// [`MAX_BLOCK_LEN`]. Violations are rejected as
    /// [`HeapError::BadGeometry`].
    pub fn bind(device: D, base: u32, extent: u32) -> Result<Self, HeapError> {
        if base == 0
            || extent <= HEADER_LEN
            || extent - HEADER_LEN > MAX_BLOCK_LEN
            || base.checked_add(extent).is_none()
        {
            return Err(HeapError::BadGeometry);
        }
        Ok(Self {
            device,
            base,
            extent,
            last: None,
        })
    }

    /// First device offset past the managed range.
    fn end(&self) -> u32 {
        self.base + self.extent
    }

    /// Formats the heap as one free block spanning the whole extent
    ///
    /// Existing contents are forgotten, not erased; only the single header
    /// at `base` is written. This is the only way to initialize or wipe a
    /// heap.
    pub fn reset(&mut self) -> Result<(), HeapError> {
        self.last = None;
        self.write_header(self.base, Header::Free(self.extent - HEADER_LEN))?;
        debug!(
            "heap reset: one free block of {} bytes at {:#x}",
            self.extent - HEADER_LEN,
            self.base
        );
        Ok(())
    }

    /// Allocates a block of exactly `len` payload bytes
    ///
    /// First fit: the scan from `base` stops at the first free block that
    /// either matches `len` exactly or is large enough to be split into the
    /// allocation and a free remainder carrying its own header. Free blocks
    /// in between those two sizes stay untouched, because their remainder
    /// has no representable header; the scan skips them.
    ///
    /// `len` may be zero; a zero-length block occupies one header and can be
    /// freed like any other.
    pub fn alloc(&mut self, len: u32) -> Result<Addr, HeapError> {
        if len > MAX_BLOCK_LEN {
            return Err(HeapError::TooLarge(len));
        }
        let mut offset = self.base;
        while offset < self.end() {
            let header = self.read_header(offset)?;
            if let Header::Free(avail) = header {
                if avail == len {
                    self.write_header(offset, Header::Allocated(len))?;
                } else if avail > len + HEADER_LEN {
                    // Split: the remainder keeps the tail of the free block.
                    let rest = offset + HEADER_LEN + len;
                    self.write_header(rest, Header::Free(avail - len - HEADER_LEN))?;
                    self.write_header(offset, Header::Allocated(len))?;
                } else {
                    offset += header.span();
                    continue;
                }
                self.last = Some(Addr::new(offset));
                trace!("alloc {} bytes at {:#x}", len, offset);
                return Ok(Addr::new(offset));
            }
            offset += header.span();
        }
        Err(HeapError::NoSpace(len))
    }

    /// Allocates a block and fills it with `data`
    ///
    /// Combines [`BlockHeap::alloc`] and [`BlockHeap::write_data`]. If the
    /// payload write fails the block stays allocated with undefined
    /// contents.
    pub fn alloc_with(&mut self, data: &[u8]) -> Result<Addr, HeapError> {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let addr = self.alloc(len)?;
        self.write_data(addr, 0, data)?;
        Ok(addr)
    }

    /// Releases the block at `addr` and coalesces with free neighbors
    ///
    /// The chain has no backward links, so the predecessor is remembered
    /// during the forward walk that locates `addr`. Whichever of the two
    /// neighbors are free get absorbed, headers included, into the one free
    /// block written back; no two adjacent free blocks survive a successful
    /// call.
    ///
    /// An address that is not a block boundary fails with
    /// [`HeapError::BadAddress`]; a block that is already free fails with
    /// [`HeapError::AlreadyFree`]. Neither failure changes the device.
    pub fn free(&mut self, addr: Addr) -> Result<(), HeapError> {
        let target = addr.raw();
        let mut prev: Option<(u32, Header)> = None;
        let mut offset = self.base;
        let header = loop {
            if offset >= self.end() {
                return Err(HeapError::BadAddress(target));
            }
            let header = self.read_header(offset)?;
            if offset == target {
                break header;
            }
            prev = Some((offset, header));
            offset += header.span();
        };
        let len = match header {
            Header::Free(_) => return Err(HeapError::AlreadyFree(target)),
            Header::Allocated(len) => len,
        };

        let mut start = target;
        let mut reclaimed = len;
        let next_offset = target + HEADER_LEN + len;
        // The final block has no successor; never read past the extent.
        if next_offset < self.end() {
            if let Header::Free(avail) = self.read_header(next_offset)? {
                reclaimed += HEADER_LEN + avail;
            }
        }
        if let Some((prev_offset, Header::Free(avail))) = prev {
            start = prev_offset;
            reclaimed += HEADER_LEN + avail;
        }
        self.write_header(start, Header::Free(reclaimed))?;
        if self.last == Some(addr) {
            self.last = None;
        }
        trace!(
            "freed {} bytes at {:#x}, now a {} byte free block at {:#x}",
            len, target, reclaimed, start
        );
        Ok(())
    }

    /// Returns the first allocated block, or `None` on an empty heap
    pub fn alloc_first(&mut self) -> Result<Option<Addr>, HeapError> {
        self.scan_allocated(self.base)
    }

    /// Returns the allocated block following `after`
    ///
    /// `after` itself is skipped; free blocks in between are skipped too.
    /// `alloc_next(None)` behaves like [`BlockHeap::alloc_first`]. Each call
    /// re-scans from the resume point, so interleaving with `alloc`/`free`
    /// is safe, though blocks mutated between calls may be skipped or
    /// repeated relative to a snapshot view.
    pub fn alloc_next(&mut self, after: Option<Addr>) -> Result<Option<Addr>, HeapError> {
        let Some(after) = after else {
            return self.alloc_first();
        };
        let header = self.read_header(after.raw())?;
        self.scan_allocated(after.raw() + header.span())
    }

    fn scan_allocated(&mut self, mut offset: u32) -> Result<Option<Addr>, HeapError> {
        while offset < self.end() {
            let header = self.read_header(offset)?;
            if !header.is_free() {
                return Ok(Some(Addr::new(offset)));
            }
            offset += header.span();
        }
        Ok(None)
    }

    /// Iterates over all allocated blocks in address order
    ///
    /// A convenience wrapper around [`BlockHeap::alloc_first`] and
    /// [`BlockHeap::alloc_next`] with the same one-shot walk semantics. The
    /// iterator yields `Err` once and ends if a header read fails.
    pub fn allocations(&mut self) -> Allocations<'_, D> {
        Allocations {
            heap: self,
            cursor: None,
            done: false,
        }
    }

    /// Returns the payload length of the allocated block at `addr`
    ///
    /// Fails with [`HeapError::BadAddress`] if the header at `addr` does not
    /// describe an allocated block.
    pub fn alloc_size(&mut self, addr: Addr) -> Result<u32, HeapError> {
        match self.read_header(addr.raw())? {
            Header::Allocated(len) => Ok(len),
            Header::Free(_) => Err(HeapError::BadAddress(addr.raw())),
        }
    }

    /// Walks the whole heap and counts blocks and payload bytes per state
    ///
    /// A walk that cannot complete reports [`HeapError::Io`]; totals from a
    /// torn walk are never returned. For every consistent heap
    /// `alloc_bytes + free_bytes + HEADER_LEN * (alloc_blocks + free_blocks)`
    /// equals the extent.
    pub fn stats(&mut self) -> Result<HeapStats, HeapError> {
        let mut stats = HeapStats::default();
        let mut offset = self.base;
        while offset < self.end() {
            let header = self.read_header(offset)?;
            match header {
                Header::Allocated(len) => {
                    stats.alloc_blocks += 1;
                    stats.alloc_bytes += len;
                }
                Header::Free(len) => {
                    stats.free_blocks += 1;
                    stats.free_bytes += len;
                }
            }
            offset += header.span();
        }
        Ok(stats)
    }

    /// Reads from the payload of the allocated block at `addr`
    ///
    /// `offset` is relative to the start of the payload. The whole range
    /// must lie inside the block or the call fails with
    /// [`HeapError::OutOfRange`] before touching the device.
    pub fn read_data(&mut self, addr: Addr, offset: u32, buf: &mut [u8]) -> Result<(), HeapError> {
        let pos = self.data_offset(addr, offset, buf.len())?;
        if self.device.read(pos, buf) != buf.len() {
            return Err(HeapError::Io(pos));
        }
        Ok(())
    }

    /// Writes into the payload of the allocated block at `addr`
    ///
    /// Same addressing and range rules as [`BlockHeap::read_data`].
    pub fn write_data(&mut self, addr: Addr, offset: u32, data: &[u8]) -> Result<(), HeapError> {
        let pos = self.data_offset(addr, offset, data.len())?;
        if self.device.write(pos, data) != data.len() {
            return Err(HeapError::Io(pos));
        }
        Ok(())
    }

    /// Resolves a payload range to a device offset, validating bounds.
    fn data_offset(&mut self, addr: Addr, offset: u32, len: usize) -> Result<u32, HeapError> {
        let size = self.alloc_size(addr)?;
        let len = u32::try_from(len).map_err(|_| HeapError::OutOfRange)?;
        let end = offset.checked_add(len).ok_or(HeapError::OutOfRange)?;
        if end > size {
            return Err(HeapError::OutOfRange);
        }
        Ok(addr.raw() + HEADER_LEN + offset)
    }

    /// Returns the most recently allocated address, if still meaningful
    ///
    /// Advisory only: updated by [`BlockHeap::alloc`], cleared by
    /// [`BlockHeap::reset`] and by a [`BlockHeap::free`] of the hinted
    /// block. Correctness of no operation depends on it.
    pub fn last_alloc(&self) -> Option<Addr> {
        self.last
    }

    /// Base address of the managed range
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Length in bytes of the managed range
    pub fn extent(&self) -> u32 {
        self.extent
    }

    /// Borrows the underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutably borrows the underlying device
    ///
    /// Writing into the managed range through this borrow can corrupt the
    /// block chain; it exists so callers can reach the rest of the medium
    /// without a second handle.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Consumes the heap and returns the device
    pub fn into_device(self) -> D {
        self.device
    }

    fn read_header(&mut self, offset: u32) -> Result<Header, HeapError> {
        let mut raw = [0u8; HEADER_LEN as usize];
        if self.device.read(offset, &mut raw) != raw.len() {
            return Err(HeapError::Io(offset));
        }
        Ok(Header::decode(raw))
    }

    fn write_header(&mut self, offset: u32, header: Header) -> Result<(), HeapError> {
        let raw = header.encode();
        if self.device.write(offset, &raw) != raw.len() {
            warn!("short header write at {:#x}, heap may be inconsistent", offset);
            return Err(HeapError::Io(offset));
        }
        Ok(())
    }
}

/// Forward iterator over allocated blocks
///
/// Created by [`BlockHeap::allocations`]. Holds no snapshot; every step is a
/// fresh scan from the previous address.
pub struct Allocations<'a, D: Device> {
    heap: &'a mut BlockHeap<D>,
    cursor: Option<Addr>,
    done: bool,
}

impl<D: Device> Iterator for Allocations<'_, D> {
    type Item = Result<Addr, HeapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.heap.alloc_next(self.cursor) {
            Ok(Some(addr)) => {
                self.cursor = Some(addr);
                Some(Ok(addr))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::flaky::FlakyDevice;
    use crate::device::mem::MemDevice;

    const BASE: u32 = 8;
    const EXTENT: u32 = 1000;

    // Heap of extent 1000 starting at offset 8, freshly formatted.
    fn small_heap() -> BlockHeap<MemDevice<1008>> {
        let mut heap = BlockHeap::bind(MemDevice::new(), BASE, EXTENT).unwrap();
        heap.reset().unwrap();
        heap
    }

    // Walk the chain: it must land exactly on base + extent and must never
    // hold two adjacent free blocks.
    fn check_layout<D: Device>(heap: &mut BlockHeap<D>) {
        let mut offset = heap.base;
        let mut prev_free = false;
        while offset < heap.end() {
            let header = heap.read_header(offset).unwrap();
            assert!(
                !(prev_free && header.is_free()),
                "adjacent free blocks at {offset:#x}"
            );
            prev_free = header.is_free();
            offset += header.span();
        }
        assert_eq!(offset, heap.end(), "walk does not land on base + extent");
    }

    fn check_conservation<D: Device>(heap: &mut BlockHeap<D>) {
        let stats = heap.stats().unwrap();
        let blocks = stats.alloc_blocks + stats.free_blocks;
        assert_eq!(
            stats.alloc_bytes + stats.free_bytes + HEADER_LEN * blocks,
            heap.extent()
        );
    }

    #[test]
    fn test_bind_rejects_bad_geometry() {
        assert_eq!(
            BlockHeap::bind(MemDevice::<64>::new(), 0, 32).unwrap_err(),
            HeapError::BadGeometry
        );
        // No room for a header plus one payload byte.
        assert_eq!(
            BlockHeap::bind(MemDevice::<64>::new(), 8, HEADER_LEN).unwrap_err(),
            HeapError::BadGeometry
        );
        // Range wraps the address space.
        assert_eq!(
            BlockHeap::bind(MemDevice::<64>::new(), u32::MAX - 10, 32).unwrap_err(),
            HeapError::BadGeometry
        );
        // Usable payload would exceed the header magnitude.
        assert_eq!(
            BlockHeap::bind(MemDevice::<64>::new(), 8, MAX_BLOCK_LEN + HEADER_LEN + 1).unwrap_err(),
            HeapError::BadGeometry
        );
        assert!(BlockHeap::bind(MemDevice::<64>::new(), 8, 32).is_ok());
    }

    #[test]
    fn test_bind_leaves_device_untouched() {
        let heap = BlockHeap::bind(MemDevice::<64>::new(), 8, 32).unwrap();
        assert!(heap.device().bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reset_creates_single_free_block() {
        let mut heap = small_heap();
        let stats = heap.stats().unwrap();
        assert_eq!(stats.alloc_blocks, 0);
        assert_eq!(stats.alloc_bytes, 0);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, EXTENT - HEADER_LEN);
        check_layout(&mut heap);
    }

    #[test]
    fn test_alloc_roundtrips_size() {
        let mut heap = small_heap();
        let addr = heap.alloc(100).unwrap();
        assert_eq!(addr.raw(), BASE);
        assert_eq!(heap.alloc_size(addr).unwrap(), 100);
        check_layout(&mut heap);
        check_conservation(&mut heap);
    }

    #[test]
    fn test_alloc_zero_length_block() {
        let mut heap = small_heap();
        let addr = heap.alloc(0).unwrap();
        assert_eq!(heap.alloc_size(addr).unwrap(), 0);
        let stats = heap.stats().unwrap();
        assert_eq!(stats.alloc_blocks, 1);
        assert_eq!(stats.alloc_bytes, 0);
        check_conservation(&mut heap);
        heap.free(addr).unwrap();
        assert_eq!(heap.stats().unwrap().free_blocks, 1);
    }

    #[test]
    fn test_alloc_rejects_unrepresentable_length() {
        let mut heap = small_heap();
        assert_eq!(
            heap.alloc(MAX_BLOCK_LEN + 1).unwrap_err(),
            HeapError::TooLarge(MAX_BLOCK_LEN + 1)
        );
    }

    #[test]
    fn test_first_fit_reuses_freed_block() {
        let mut heap = small_heap();
        let first = heap.alloc(100).unwrap();
        assert_eq!(first.raw(), BASE);
        assert_eq!(heap.alloc_size(first).unwrap(), 100);

        let second = heap.alloc(200).unwrap();
        assert_eq!(second.raw(), BASE + HEADER_LEN + 100);
        assert_eq!(heap.alloc_size(second).unwrap(), 200);

        heap.free(first).unwrap();
        let stats = heap.stats().unwrap();
        assert_eq!(stats.alloc_blocks, 1);
        // The hole at base plus the free tail after the second block.
        assert_eq!(stats.free_blocks, 2);

        // First fit lands in the hole, not past the second block.
        let third = heap.alloc(50).unwrap();
        assert_eq!(third.raw(), BASE);
        let stats = heap.stats().unwrap();
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.alloc_blocks, 2);
        check_layout(&mut heap);
        check_conservation(&mut heap);
    }

    #[test]
    fn test_free_coalesces_with_next() {
        let mut heap = small_heap();
        let a = heap.alloc(100).unwrap();
        let b = heap.alloc(100).unwrap();
        // b sits between a and the free tail; freeing it must merge right.
        heap.free(b).unwrap();
        let stats = heap.stats().unwrap();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, EXTENT - HEADER_LEN - 100 - HEADER_LEN);
        assert_eq!(heap.alloc_size(a).unwrap(), 100);
        check_layout(&mut heap);
        check_conservation(&mut heap);
    }

    #[test]
    fn test_free_coalesces_with_both_neighbors() {
        let mut heap = small_heap();
        let a = heap.alloc(100).unwrap();
        let b = heap.alloc(100).unwrap();
        heap.free(a).unwrap();
        // a is a hole, the tail is free; freeing b joins all three.
        heap.free(b).unwrap();
        let stats = heap.stats().unwrap();
        assert_eq!(stats.alloc_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, EXTENT - HEADER_LEN);
        check_layout(&mut heap);
    }

    #[test]
    fn test_free_all_coalesces_to_one() {
        // Three blocks filling the extent exactly, no tail.
        let mut heap = BlockHeap::bind(MemDevice::<620>::new(), BASE, 612).unwrap();
        heap.reset().unwrap();
        let a = heap.alloc(100).unwrap();
        let b = heap.alloc(200).unwrap();
        let c = heap.alloc(300).unwrap();
        assert_eq!(heap.stats().unwrap().free_blocks, 0);

        heap.free(a).unwrap();
        assert_eq!(heap.stats().unwrap().free_blocks, 1);
        // b merges into the hole on its left; c stays allocated.
        heap.free(b).unwrap();
        let stats = heap.stats().unwrap();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, 100 + HEADER_LEN + 200);
        // c has no successor; it merges left into one block spanning all
        // three payloads plus the two reclaimed headers.
        heap.free(c).unwrap();
        let stats = heap.stats().unwrap();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, 100 + 200 + 300 + 2 * HEADER_LEN);
        check_layout(&mut heap);
    }

    #[test]
    fn test_double_free_rejected() {
        let mut heap = small_heap();
        let a = heap.alloc(100).unwrap();
        let b = heap.alloc(100).unwrap();
        heap.free(a).unwrap();
        let before = heap.stats().unwrap();
        assert_eq!(heap.free(a).unwrap_err(), HeapError::AlreadyFree(a.raw()));
        assert_eq!(heap.stats().unwrap(), before);
        assert_eq!(heap.alloc_size(b).unwrap(), 100);
    }

    #[test]
    fn test_free_unknown_address_rejected() {
        let mut heap = small_heap();
        heap.alloc(100).unwrap();
        let before = heap.stats().unwrap();
        // Not a block boundary.
        assert_eq!(
            heap.free(Addr::new(BASE + 1)).unwrap_err(),
            HeapError::BadAddress(BASE + 1)
        );
        // Before and past the managed range.
        assert_eq!(
            heap.free(Addr::new(0)).unwrap_err(),
            HeapError::BadAddress(0)
        );
        assert_eq!(
            heap.free(Addr::new(BASE + EXTENT)).unwrap_err(),
            HeapError::BadAddress(BASE + EXTENT)
        );
        assert_eq!(heap.stats().unwrap(), before);
    }

    #[test]
    fn test_alloc_size_of_free_block_fails() {
        let mut heap = small_heap();
        let a = heap.alloc(100).unwrap();
        heap.alloc(10).unwrap();
        heap.free(a).unwrap();
        assert_eq!(
            heap.alloc_size(a).unwrap_err(),
            HeapError::BadAddress(a.raw())
        );
    }

    #[test]
    fn test_unsplittable_free_block_is_skipped() {
        let mut heap = small_heap();
        let a = heap.alloc(100).unwrap();
        let _b = heap.alloc(10).unwrap();
        heap.free(a).unwrap();

        // The 100-byte hole cannot hold 98 bytes plus a remainder header,
        // so the allocation must land past the second block instead.
        let c = heap.alloc(98).unwrap();
        assert_ne!(c.raw(), BASE);
        assert_eq!(heap.stats().unwrap().free_blocks, 2);
        check_layout(&mut heap);
        heap.free(c).unwrap();

        // 96 bytes would leave a zero-length remainder, which has no
        // representable header either.
        let c = heap.alloc(96).unwrap();
        assert_ne!(c.raw(), BASE);
        heap.free(c).unwrap();

        // 95 bytes leave a one-byte remainder and may take the hole.
        let c = heap.alloc(95).unwrap();
        assert_eq!(c.raw(), BASE);
        check_layout(&mut heap);
        check_conservation(&mut heap);
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let mut heap = small_heap();
        let mut count = 0u32;
        let mut first = None;
        while let Ok(addr) = heap.alloc(100) {
            if first.is_none() {
                first = Some(addr);
            }
            count += 1;
        }
        // 9 blocks of 104 bytes fit into 1000 bytes of extent.
        assert_eq!(count, 9);
        assert_eq!(heap.alloc(100).unwrap_err(), HeapError::NoSpace(100));

        // Freeing one block makes exactly one more allocation possible.
        heap.free(first.unwrap()).unwrap();
        let again = heap.alloc(100).unwrap();
        assert_eq!(again, first.unwrap());
        assert_eq!(heap.alloc(100).unwrap_err(), HeapError::NoSpace(100));
        check_layout(&mut heap);
        check_conservation(&mut heap);
    }

    #[test]
    fn test_alloc_first_next_skip_free_blocks() {
        let mut heap = small_heap();
        let a = heap.alloc(20).unwrap();
        let b = heap.alloc(30).unwrap();
        let c = heap.alloc(40).unwrap();
        heap.free(b).unwrap();

        assert_eq!(heap.alloc_first().unwrap(), Some(a));
        assert_eq!(heap.alloc_next(Some(a)).unwrap(), Some(c));
        assert_eq!(heap.alloc_next(Some(c)).unwrap(), None);
        // None resumes from the start.
        assert_eq!(heap.alloc_next(None).unwrap(), Some(a));
    }

    #[test]
    fn test_alloc_first_on_empty_heap() {
        let mut heap = small_heap();
        assert_eq!(heap.alloc_first().unwrap(), None);
    }

    #[test]
    fn test_allocations_iterator() {
        let mut heap = small_heap();
        let a = heap.alloc(20).unwrap();
        let b = heap.alloc(30).unwrap();
        let c = heap.alloc(40).unwrap();
        heap.free(b).unwrap();

        let mut seen = [None; 4];
        let mut n = 0;
        for addr in heap.allocations() {
            seen[n] = Some(addr.unwrap());
            n += 1;
        }
        assert_eq!(n, 2);
        assert_eq!(seen[0], Some(a));
        assert_eq!(seen[1], Some(c));
    }

    #[test]
    fn test_data_roundtrip() {
        let mut heap = small_heap();
        let addr = heap.alloc_with(b"block payload").unwrap();
        assert_eq!(heap.alloc_size(addr).unwrap(), 13);

        let mut buf = [0u8; 13];
        heap.read_data(addr, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"block payload");

        // Offset write followed by an offset read.
        heap.write_data(addr, 6, b"PAY").unwrap();
        let mut tail = [0u8; 7];
        heap.read_data(addr, 6, &mut tail).unwrap();
        assert_eq!(&tail, b"PAYload");
    }

    #[test]
    fn test_data_range_checks() {
        let mut heap = small_heap();
        let addr = heap.alloc(8).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            heap.read_data(addr, 6, &mut buf).unwrap_err(),
            HeapError::OutOfRange
        );
        assert_eq!(
            heap.write_data(addr, u32::MAX, b"x").unwrap_err(),
            HeapError::OutOfRange
        );
        heap.read_data(addr, 4, &mut buf).unwrap();

        heap.free(addr).unwrap();
        assert_eq!(
            heap.read_data(addr, 0, &mut buf).unwrap_err(),
            HeapError::BadAddress(addr.raw())
        );
    }

    #[test]
    fn test_last_alloc_hint() {
        let mut heap = small_heap();
        assert_eq!(heap.last_alloc(), None);
        let a = heap.alloc(10).unwrap();
        assert_eq!(heap.last_alloc(), Some(a));
        let b = heap.alloc(10).unwrap();
        assert_eq!(heap.last_alloc(), Some(b));
        // Freeing an unrelated block keeps the hint.
        heap.free(a).unwrap();
        assert_eq!(heap.last_alloc(), Some(b));
        heap.free(b).unwrap();
        assert_eq!(heap.last_alloc(), None);
        heap.alloc(10).unwrap();
        heap.reset().unwrap();
        assert_eq!(heap.last_alloc(), None);
    }

    #[test]
    fn test_read_failure_aborts_operations() {
        let device = FlakyDevice::<256>::failing_after(0);
        let mut heap = BlockHeap::bind(device, BASE, 200).unwrap();
        assert_eq!(heap.reset().unwrap_err(), HeapError::Io(BASE));
        assert_eq!(heap.alloc(10).unwrap_err(), HeapError::Io(BASE));
        assert_eq!(
            heap.free(Addr::new(BASE)).unwrap_err(),
            HeapError::Io(BASE)
        );
        assert_eq!(heap.stats().unwrap_err(), HeapError::Io(BASE));
        assert_eq!(heap.alloc_first().unwrap_err(), HeapError::Io(BASE));
    }

    #[test]
    fn test_write_failure_mid_split_surfaces() {
        let device = FlakyDevice::<256>::failing_after(2);
        let mut heap = BlockHeap::bind(device, BASE, 200).unwrap();
        heap.reset().unwrap();
        // The header read succeeds, then the remainder write fails short.
        let err = heap.alloc(10).unwrap_err();
        assert_eq!(err, HeapError::Io(BASE + HEADER_LEN + 10));
    }

    #[test]
    fn test_geometry_accessors() {
        let heap = small_heap();
        assert_eq!(heap.base(), BASE);
        assert_eq!(heap.extent(), EXTENT);
    }
}
