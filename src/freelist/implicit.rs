use crate::{
  block::{ALIGNMENT, Block, FreeBlock},
  error::Violation,
  heap::{FIRST_BLOCK, Heap},
  region::HeapRegion,
};

use super::{Entry, FreeList};

/// Where an implicit scan starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fit {
  /// Always from the first block. Best space utilisation of the two.
  #[default]
  First,
  /// From the block the previous search returned, wrapping around once.
  /// Faster on workloads that allocate in address order, at some cost in
  /// fragmentation.
  Next,
}

/// No index at all: a block is free if its header says so, and finding one
/// means walking the heap block by block.
///
/// Free blocks only need a header and a footer here, so the minimum block is
/// 16 bytes instead of 32.
#[derive(Debug, Default)]
pub struct ImplicitList {
  fit: Fit,
  rover: Option<usize>,
}

impl ImplicitList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn next_fit() -> Self {
    Self {
      fit: Fit::Next,
      rover: None,
    }
  }

  pub fn fit(&self) -> Fit {
    self.fit
  }

  /// Scans `[from, to)` in address order.
  fn scan<R: HeapRegion>(
    heap: &Heap<R>,
    from: usize,
    to: usize,
    min_size: usize,
  ) -> Option<FreeBlock> {
    let mut cursor = from;
    while cursor < to {
      if let Block::Free(block) = heap.block(cursor) {
        if heap.size_of(cursor) >= min_size {
          return Some(block);
        }
      }
      cursor = heap.next_block(cursor);
    }
    None
  }
}

impl FreeList for ImplicitList {
  const MIN_BLOCK_SIZE: usize = ALIGNMENT;

  fn insert<R: HeapRegion>(
    &mut self,
    _heap: &mut Heap<R>,
    _block: FreeBlock,
  ) {
  }

  fn remove<R: HeapRegion>(
    &mut self,
    _heap: &mut Heap<R>,
    _block: FreeBlock,
  ) {
  }

  fn find<R: HeapRegion>(
    &mut self,
    heap: &Heap<R>,
    min_size: usize,
  ) -> Option<FreeBlock> {
    let end = heap.epilogue();

    match self.fit {
      Fit::First => Self::scan(heap, FIRST_BLOCK, end, min_size),
      Fit::Next => {
        let start = self
          .rover
          .filter(|&rover| heap.contains_block(rover))
          .unwrap_or(FIRST_BLOCK);

        let found = Self::scan(heap, start, end, min_size)
          .or_else(|| Self::scan(heap, FIRST_BLOCK, start, min_size));
        if let Some(block) = found {
          self.rover = Some(block.offset());
        }
        found
      }
    }
  }

  fn merged(
    &mut self,
    start: usize,
    size: usize,
  ) {
    // The rover must stay on a block boundary.
    if let Some(rover) = self.rover {
      if rover > start && rover < start + size {
        self.rover = Some(start);
      }
    }
  }

  fn entries<R: HeapRegion>(
    &self,
    heap: &Heap<R>,
  ) -> Result<Vec<Entry>, Violation> {
    Ok(
      heap
        .blocks()
        .filter(|info| !info.allocated)
        .map(|info| Entry {
          block: FreeBlock::at(info.offset),
          class: 0,
        })
        .collect(),
    )
  }
}
