//! # rallocator - A Boundary-Tag Heap Allocator
//!
//! This crate implements a general-purpose `malloc`/`free`/`realloc`/`calloc`
//! style allocator over a single growable heap region, with three
//! interchangeable strategies for finding free blocks.
//!
//! ## Overview
//!
//! The heap is a sequence of blocks. Each block starts with a one-word header
//! holding its size and two state bits; free blocks repeat the header in a
//! footer so their successor can find them:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌─────┬──────────┬────────────┬──────────┬────────────┬─────┬──────────┐
//!   │ pad │ prologue │   used     │   free   │   used     │ ... │ epilogue │
//!   │     │  16 a/p  │ hdr  data  │ hdr  ftr │ hdr  data  │     │   0 a    │
//!   └─────┴──────────┴────────────┴──────────┴────────────┴─────┴──────────┘
//!                         ▲                                          ▲
//!                         └── payload, 16-byte aligned                └── break
//!
//!   When no free block fits, the heap grows by at least one chunk and the
//!   old epilogue becomes the header of the new space.
//! ```
//!
//! Freed blocks are merged with free neighbours immediately, so two free
//! blocks are never adjacent.
//!
//! ## Crate Structure
//!
//! ```text
//!   rallocator
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Header codec and typed block handles
//!   ├── region     - Growable backing memory (HeapRegion, MemRegion)
//!   ├── heap       - Block-level access to a region
//!   ├── freelist   - Implicit, explicit and segregated free lists
//!   ├── allocator  - allocate / free / reallocate / zero_allocate
//!   └── checker    - Heap consistency checker and report
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rallocator::{Config, SegregatedAllocator};
//!
//! let mut allocator = SegregatedAllocator::new(Config::default()).unwrap();
//!
//! let p = allocator.allocate(24).unwrap();
//! allocator.bytes_mut(p).unwrap()[..5].copy_from_slice(b"hello");
//!
//! let p = allocator.reallocate(Some(p), 1000).unwrap();
//! assert_eq!(&allocator.bytes(p).unwrap()[..5], b"hello");
//!
//! allocator.free(Some(p)).unwrap();
//! assert!(allocator.check().is_ok());
//! ```
//!
//! ## Strategies
//!
//! | allocator              | search                           | min block |
//! |------------------------|----------------------------------|-----------|
//! | [`ImplicitAllocator`]  | every block, first or next fit   | 16 bytes  |
//! | [`ExplicitAllocator`]  | one LIFO list of free blocks     | 32 bytes  |
//! | [`SegregatedAllocator`]| eight sorted lists by size class | 32 bytes  |
//!
//! ## Limitations
//!
//! - **Single-threaded**: every operation takes `&mut self`
//! - **Grow only**: the heap never shrinks back
//! - **Offsets, not pointers**: payloads are [`Payload`] handles into the
//!   allocator's own region; use [`Allocator::bytes`] to reach the memory
//!
//! ## Logging
//!
//! Diagnostics go through the `log` facade and are off by default. Call
//! [`enable_logging`] and install any logger to see them.

use std::sync::atomic::{AtomicBool, Ordering};

#[macro_use]
mod alog;

pub mod align;
mod allocator;
pub mod block;
mod checker;
mod config;
pub mod error;
pub mod freelist;
pub mod heap;
pub mod region;

pub use allocator::{Allocator, ExplicitAllocator, ImplicitAllocator, SegregatedAllocator};
pub use block::{BlockInfo, Payload};
pub use checker::HeapReport;
pub use config::{Config, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_HEAP};
pub use error::{AllocError, Violation};
pub use freelist::{ExplicitList, Fit, FreeList, ImplicitList, SegregatedList};
pub use region::{HeapRegion, MemRegion};

static ALLOC_LOG: AtomicBool = AtomicBool::new(false);

/// Turns on allocator logging for the whole process.
pub fn enable_logging() {
  ALLOC_LOG.store(true, Ordering::Relaxed);
}

/// Turns allocator logging back off. The logger itself stays installed.
pub fn disable_logging() {
  ALLOC_LOG.store(false, Ordering::Relaxed);
}

#[inline]
pub(crate) fn should_log() -> bool {
  ALLOC_LOG.load(Ordering::Relaxed)
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_logging_switch() {
    disable_logging();
    assert!(!should_log());

    enable_logging();
    assert!(should_log());
  }
}
