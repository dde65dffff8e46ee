//! Boundary tag codec.
//!
//! Every block starts with a one-word header. Free blocks repeat the header in
//! their last word (the footer) so the next block can find its start in O(1).
//! Allocated blocks skip the footer; instead every header records whether the
//! previous block is allocated.
//!
//! ```text
//!   63                                   4   3   2   1   0
//!   ┌──────────────────────────────────────┬───┬───┬───┬───┐
//!   │           size (multiple of 16)      │ 0 │ 0 │ p │ a │
//!   └──────────────────────────────────────┴───┴───┴───┴───┘
//!                                                  │   └── this block allocated
//!                                                  └────── previous block allocated
//! ```

use std::{fmt, num::NonZeroUsize};

/// Header, footer and link word.
pub type Word = u64;

/// Size of a header, footer or free list link in bytes.
pub const WSIZE: usize = std::mem::size_of::<Word>();

/// Alignment of every payload and every block size.
pub const ALIGNMENT: usize = 2 * WSIZE;

const ALLOC_BIT: Word = 0x1;
const PREV_ALLOC_BIT: Word = 0x2;
const SIZE_MASK: Word = !(ALIGNMENT as Word - 1);

const HEADER_SIZE: NonZeroUsize = match NonZeroUsize::new(WSIZE) {
  Some(size) => size,
  None => panic!("word size is zero"),
};

/// Packs a block size and its two state bits into a single word.
#[inline]
pub const fn pack(
  size: usize,
  prev_allocated: bool,
  allocated: bool,
) -> Word {
  let mut word = size as Word & SIZE_MASK;
  if prev_allocated {
    word |= PREV_ALLOC_BIT;
  }
  if allocated {
    word |= ALLOC_BIT;
  }
  word
}

#[inline]
pub const fn extract_size(word: Word) -> usize {
  (word & SIZE_MASK) as usize
}

#[inline]
pub const fn extract_allocated(word: Word) -> bool {
  word & ALLOC_BIT != 0
}

#[inline]
pub const fn extract_prev_allocated(word: Word) -> bool {
  word & PREV_ALLOC_BIT != 0
}

/// Payload offset of the block whose header sits at `header`.
#[inline]
pub const fn header_to_payload(header: usize) -> usize {
  header + WSIZE
}

/// Header offset of the block owning the payload at `payload`.
#[inline]
pub const fn payload_to_header(payload: usize) -> usize {
  payload - WSIZE
}

/// Opaque handle to an allocation, returned by the allocating operations and
/// accepted by `free` and `reallocate`.
///
/// The value is the payload's offset from the start of the heap region. The
/// prologue occupies the start of the region, so a payload is never at offset
/// zero and `Option<Payload>` is the size of a `usize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(NonZeroUsize);

impl Payload {
  /// Rebuilds a handle from a raw offset. Handles that were not returned by
  /// the allocator are rejected by `free` and `reallocate` on a best-effort
  /// basis.
  pub fn from_offset(offset: usize) -> Option<Self> {
    NonZeroUsize::new(offset).map(Self)
  }

  /// Offset of the payload from the lowest address of the heap region.
  #[inline]
  pub fn offset(self) -> usize {
    self.0.get()
  }

  /// Header offset of the block that owns this payload.
  #[inline]
  pub(crate) fn header(self) -> usize {
    payload_to_header(self.offset())
  }
}

/// A block that is currently on the free list. Only free blocks expose their
/// link words, see [`crate::heap::Heap::next_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FreeBlock(usize);

/// A block handed out to a caller. Its payload belongs to the caller, so it
/// has no link accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsedBlock(usize);

impl FreeBlock {
  pub(crate) const fn at(header: usize) -> Self {
    Self(header)
  }

  /// Header offset.
  #[inline]
  pub const fn offset(self) -> usize {
    self.0
  }
}

impl UsedBlock {
  pub(crate) const fn at(header: usize) -> Self {
    Self(header)
  }

  /// Header offset.
  #[inline]
  pub const fn offset(self) -> usize {
    self.0
  }

  /// Payload handle for this block.
  #[inline]
  pub fn payload(self) -> Payload {
    Payload(HEADER_SIZE.saturating_add(self.0))
  }
}

/// A decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
  Free(FreeBlock),
  Used(UsedBlock),
}

impl Block {
  /// Tags the block at `header` according to its header word.
  #[inline]
  pub fn decode(
    header: usize,
    word: Word,
  ) -> Self {
    if extract_allocated(word) {
      Self::Used(UsedBlock(header))
    } else {
      Self::Free(FreeBlock(header))
    }
  }
}

/// Address-order view of one block, used by diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Header offset.
  pub offset: usize,
  /// Total size including metadata.
  pub size: usize,
  pub allocated: bool,
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let state = if self.allocated { "used" } else { "free" };
    write!(f, "{:#08x}: {state} {:>8} bytes", self.offset, self.size)
  }
}
