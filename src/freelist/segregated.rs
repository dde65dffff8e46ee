use crate::{
  block::{ALIGNMENT, FreeBlock},
  error::Violation,
  heap::Heap,
  region::HeapRegion,
};

use super::{Entry, FreeList, walk_chain};

/// Inclusive upper bound of each size class but the last, which takes
/// everything above 4096.
const CLASS_LIMITS: [usize; SIZE_CLASSES - 1] = [32, 64, 128, 256, 512, 2048, 4096];

/// Number of size classes.
pub const SIZE_CLASSES: usize = 8;

/// Segregated fits: one explicit list per size class.
///
/// ```text
///   class  ≤32   ──▶ [32] ──▶ [32]
///   class  ≤64   ──▶ [48] ──▶ [64]
///   class  ≤128  ──▶ none
///   ...
///   class  >4096 ──▶ [8192] ──▶ [20480]
/// ```
///
/// Each class is kept sorted by ascending size, so the first block that fits
/// inside a class is also the smallest one that fits there. Searching starts
/// at the request's own class and moves up, which approximates best fit for
/// the price of a short walk.
#[derive(Debug, Default)]
pub struct SegregatedList {
  heads: [Option<FreeBlock>; SIZE_CLASSES],
}

impl SegregatedList {
  pub fn new() -> Self {
    Self::default()
  }

  /// Class index for a block of `size` bytes.
  pub fn class_for(size: usize) -> usize {
    CLASS_LIMITS
      .iter()
      .position(|&limit| size <= limit)
      .unwrap_or(SIZE_CLASSES - 1)
  }

  pub fn head(
    &self,
    class: usize,
  ) -> Option<FreeBlock> {
    self.heads[class]
  }
}

impl FreeList for SegregatedList {
  const MIN_BLOCK_SIZE: usize = 2 * ALIGNMENT;
  const SORTED: bool = true;

  fn insert<R: HeapRegion>(
    &mut self,
    heap: &mut Heap<R>,
    block: FreeBlock,
  ) {
    let size = heap.size_of(block.offset());
    let class = Self::class_for(size);

    // Find the first entry at least as large and link in front of it.
    let mut prev = None;
    let mut cursor = self.heads[class];
    while let Some(current) = cursor {
      if heap.size_of(current.offset()) >= size {
        break;
      }
      prev = Some(current);
      cursor = heap.next_link(current);
    }

    heap.set_links(block, prev, cursor);
    match prev {
      Some(prev) => heap.set_next_link(prev, Some(block)),
      None => self.heads[class] = Some(block),
    }
    if let Some(next) = cursor {
      heap.set_prev_link(next, Some(block));
    }
  }

  fn remove<R: HeapRegion>(
    &mut self,
    heap: &mut Heap<R>,
    block: FreeBlock,
  ) {
    let prev = heap.prev_link(block);
    let next = heap.next_link(block);

    match prev {
      Some(prev) => heap.set_next_link(prev, next),
      None => {
        let class = Self::class_for(heap.size_of(block.offset()));
        self.heads[class] = next;
      }
    }
    if let Some(next) = next {
      heap.set_prev_link(next, prev);
    }
  }

  fn find<R: HeapRegion>(
    &mut self,
    heap: &Heap<R>,
    min_size: usize,
  ) -> Option<FreeBlock> {
    for class in Self::class_for(min_size)..SIZE_CLASSES {
      let mut cursor = self.heads[class];
      while let Some(block) = cursor {
        if heap.size_of(block.offset()) >= min_size {
          return Some(block);
        }
        cursor = heap.next_link(block);
      }
    }
    None
  }

  fn class_of(
    &self,
    size: usize,
  ) -> usize {
    Self::class_for(size)
  }

  fn entries<R: HeapRegion>(
    &self,
    heap: &Heap<R>,
  ) -> Result<Vec<Entry>, Violation> {
    let mut entries = Vec::new();
    for (class, &head) in self.heads.iter().enumerate() {
      walk_chain(heap, head, class, &mut entries)?;
    }
    Ok(entries)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{heap::FIRST_BLOCK, region::MemRegion};

  fn heap_with(sizes: &[usize]) -> (Heap<MemRegion>, Vec<FreeBlock>) {
    let mut heap = Heap::init(MemRegion::reserve(1 << 16).unwrap()).unwrap();
    heap.extend(sizes.iter().sum()).unwrap();

    let mut blocks = Vec::new();
    let mut offset = FIRST_BLOCK;
    for &size in sizes {
      blocks.push(heap.write_free(offset, size, true));
      offset += size;
    }
    (heap, blocks)
  }

  fn class_sizes(
    list: &SegregatedList,
    heap: &Heap<MemRegion>,
    class: usize,
  ) -> Vec<usize> {
    list
      .entries(heap)
      .unwrap()
      .into_iter()
      .filter(|entry| entry.class == class)
      .map(|entry| heap.size_of(entry.block.offset()))
      .collect()
  }

  #[test]
  fn test_class_boundaries() {
    assert_eq!(SegregatedList::class_for(16), 0);
    assert_eq!(SegregatedList::class_for(32), 0);
    assert_eq!(SegregatedList::class_for(48), 1);
    assert_eq!(SegregatedList::class_for(64), 1);
    assert_eq!(SegregatedList::class_for(128), 2);
    assert_eq!(SegregatedList::class_for(256), 3);
    assert_eq!(SegregatedList::class_for(512), 4);
    assert_eq!(SegregatedList::class_for(528), 5);
    assert_eq!(SegregatedList::class_for(2048), 5);
    assert_eq!(SegregatedList::class_for(4096), 6);
    assert_eq!(SegregatedList::class_for(4112), 7);
    assert_eq!(SegregatedList::class_for(usize::MAX), 7);
  }

  #[test]
  fn test_insert_keeps_class_sorted() {
    let (mut heap, blocks) = heap_with(&[1024, 640, 1536, 576, 2048]);
    let mut list = SegregatedList::new();
    for &block in &blocks {
      list.insert(&mut heap, block);
    }

    assert_eq!(class_sizes(&list, &heap, 5), vec![576, 640, 1024, 1536, 2048]);
  }

  #[test]
  fn test_blocks_filed_by_class() {
    let (mut heap, blocks) = heap_with(&[32, 96, 4112]);
    let mut list = SegregatedList::new();
    for &block in &blocks {
      list.insert(&mut heap, block);
    }

    assert_eq!(list.head(0), Some(blocks[0]));
    assert_eq!(list.head(2), Some(blocks[1]));
    assert_eq!(list.head(7), Some(blocks[2]));
    assert_eq!(list.head(1), None);
  }

  #[test]
  fn test_find_moves_to_larger_classes() {
    let (mut heap, blocks) = heap_with(&[32, 96, 4112]);
    let mut list = SegregatedList::new();
    for &block in &blocks {
      list.insert(&mut heap, block);
    }

    assert_eq!(list.find(&heap, 32), Some(blocks[0]));
    // Class 1 is empty, the search continues in class 2.
    assert_eq!(list.find(&heap, 48), Some(blocks[1]));
    // 112 shares class 2 with the 96-byte block but doesn't fit in it.
    assert_eq!(list.find(&heap, 112), Some(blocks[2]));
    assert_eq!(list.find(&heap, 8192), None);
  }

  #[test]
  fn test_find_returns_smallest_fit_in_class() {
    let (mut heap, blocks) = heap_with(&[1024, 640, 1536]);
    let mut list = SegregatedList::new();
    for &block in &blocks {
      list.insert(&mut heap, block);
    }

    assert_eq!(list.find(&heap, 600), Some(blocks[1]));
    assert_eq!(list.find(&heap, 700), Some(blocks[0]));
  }

  #[test]
  fn test_remove_head_updates_class() {
    let (mut heap, blocks) = heap_with(&[576, 640]);
    let mut list = SegregatedList::new();
    list.insert(&mut heap, blocks[0]);
    list.insert(&mut heap, blocks[1]);

    list.remove(&mut heap, blocks[0]);
    assert_eq!(list.head(5), Some(blocks[1]));
    assert_eq!(heap.prev_link(blocks[1]), None);

    list.remove(&mut heap, blocks[1]);
    assert_eq!(list.head(5), None);
  }
}
