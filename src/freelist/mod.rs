//! Free block indexing.
//!
//! All three strategies share the same block layout and only differ in how
//! they find a block for a request:
//!
//! - [`ImplicitList`]: no structure, scan every block in address order.
//! - [`ExplicitList`]: one doubly-linked list threaded through free blocks.
//! - [`SegregatedList`]: one such list per size class.

use std::{collections::HashSet, fmt};

use crate::{
  block::FreeBlock,
  error::Violation,
  heap::Heap,
  region::HeapRegion,
};

mod explicit;
mod implicit;
mod segregated;

pub use explicit::ExplicitList;
pub use implicit::{Fit, ImplicitList};
pub use segregated::{SIZE_CLASSES, SegregatedList};

/// A free block as seen from the list, tagged with the size class it is
/// filed under (always 0 for unsegregated lists).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
  pub block: FreeBlock,
  pub class: usize,
}

/// Set of free blocks plus the search strategy over them.
///
/// `insert` and `remove` are called with blocks whose header already says
/// free; `remove` is always called before the block's header is rewritten.
pub trait FreeList: fmt::Debug {
  /// Smallest block this strategy can manage. Blocks smaller than this are
  /// never split off.
  const MIN_BLOCK_SIZE: usize;

  /// Whether each class is kept sorted by ascending size.
  const SORTED: bool = false;

  fn insert<R: HeapRegion>(
    &mut self,
    heap: &mut Heap<R>,
    block: FreeBlock,
  );

  fn remove<R: HeapRegion>(
    &mut self,
    heap: &mut Heap<R>,
    block: FreeBlock,
  );

  /// First fit: the first free block of at least `min_size` bytes.
  fn find<R: HeapRegion>(
    &mut self,
    heap: &Heap<R>,
    min_size: usize,
  ) -> Option<FreeBlock>;

  /// Called after a merge produced the block `[start, start + size)`, whose
  /// interior may have swallowed other block headers.
  fn merged(
    &mut self,
    _start: usize,
    _size: usize,
  ) {
  }

  /// Size class a free block of `size` bytes belongs to.
  fn class_of(
    &self,
    _size: usize,
  ) -> usize {
    0
  }

  /// Every listed block in list order. Does not trust the links: a link out
  /// of bounds, a broken back link or a cycle is reported instead of
  /// followed.
  fn entries<R: HeapRegion>(
    &self,
    heap: &Heap<R>,
  ) -> Result<Vec<Entry>, Violation>;
}

/// Walks one linked class starting at `head`, checking bounds and back links.
pub(crate) fn walk_chain<R: HeapRegion>(
  heap: &Heap<R>,
  head: Option<FreeBlock>,
  class: usize,
  out: &mut Vec<Entry>,
) -> Result<(), Violation> {
  let mut visited = HashSet::new();
  let mut prev: Option<FreeBlock> = None;
  let mut cursor = head;

  while let Some(block) = cursor {
    if !heap.contains_block(block.offset()) {
      return Err(Violation::LinkOutOfBounds {
        from: prev.map_or(0, FreeBlock::offset),
        link: block.offset(),
      });
    }

    // Ahead of the back link check, which a loop would also trip.
    if !visited.insert(block.offset()) {
      return Err(Violation::Cycle { class });
    }

    let (back, next) = heap.try_links(block).ok_or(Violation::LinkOutOfBounds {
      from: prev.map_or(0, FreeBlock::offset),
      link: block.offset(),
    })?;

    if back != prev {
      return Err(Violation::BackLink {
        offset: block.offset(),
        expected: prev.map(FreeBlock::offset),
        found: back.map(FreeBlock::offset),
      });
    }

    out.push(Entry { block, class });
    prev = Some(block);
    cursor = next;
  }

  Ok(())
}
