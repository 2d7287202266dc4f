//! Prelude module for convenient imports
//!
//! This is the **only public API** for NvHeap. All items should be accessed
//! through:
//! ```
//! use nvheap::prelude::*;
//! ```

pub use crate::Addr;
pub use crate::Device;
pub use crate::{HEADER_LEN, MAX_BLOCK_LEN};
pub use crate::{Allocations, BlockHeap, HeapError, HeapStats};

#[cfg(feature = "mem-device")]
pub use crate::device::mem::MemDevice;
