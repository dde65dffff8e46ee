//! Block-level view of a heap region.
//!
//! [`Heap`] is the only place that turns block offsets into word offsets.
//! Everything above it talks in blocks: sizes, neighbours, links.
//!
//! ```text
//!   offset 0     8            16           24
//!   ┌──────────┬────────────┬────────────┬──────────────────────┬──────────┐
//!   │ padding  │ prologue   │ prologue   │  blocks ...          │ epilogue │
//!   │          │ hdr 16/a/p │ ftr 16/a/p │                      │ hdr 0/a  │
//!   └──────────┴────────────┴────────────┴──────────────────────┴──────────┘
//!                                        ▲                      ▲
//!                                   FIRST_BLOCK            len - WSIZE
//! ```
//!
//! A free block keeps its list links in the first two payload words:
//!
//! ```text
//!   ┌────────┬───────────┬───────────┬─────────────────┬────────┐
//!   │ header │ prev link │ next link │       ...       │ footer │
//!   └────────┴───────────┴───────────┴─────────────────┴────────┘
//! ```
//!
//! Links are header offsets, zero meaning none (offset zero is padding, never
//! a block). Only the explicit and segregated lists use them; a 16-byte
//! implicit free block has no room for links.

use std::ops::Range;

use crate::{
  block::{
    ALIGNMENT, Block, BlockInfo, FreeBlock, UsedBlock, WSIZE, Word, extract_allocated,
    extract_prev_allocated, extract_size, header_to_payload, pack,
  },
  error::AllocError,
  region::HeapRegion,
};

/// Padding word, prologue header and footer, epilogue header.
pub const HEAP_OVERHEAD: usize = 4 * WSIZE;

/// Header offset of the prologue block.
pub const PROLOGUE: usize = WSIZE;

/// Header offset of the first real block.
pub const FIRST_BLOCK: usize = 3 * WSIZE;

const PROLOGUE_SIZE: usize = 2 * WSIZE;

const PREV_LINK: usize = WSIZE;
const NEXT_LINK: usize = 2 * WSIZE;

/// A heap region formatted into blocks.
#[derive(Debug)]
pub struct Heap<R: HeapRegion> {
  region: R,
}

impl<R: HeapRegion> Heap<R> {
  /// Writes the padding word, the prologue and the epilogue into an empty
  /// region. The heap has no usable block until [`Heap::extend`] is called.
  pub fn init(mut region: R) -> Result<Self, AllocError> {
    let start = region.grow(HEAP_OVERHEAD)?;
    if start != 0 {
      return Err(AllocError::Config(format!(
        "heap region must start empty, it already holds {start} bytes"
      )));
    }

    let mut heap = Self { region };
    let prologue = pack(PROLOGUE_SIZE, true, true);
    heap.set_word(0, 0);
    heap.set_word(PROLOGUE, prologue);
    heap.set_word(PROLOGUE + WSIZE, prologue);
    heap.set_word(FIRST_BLOCK, pack(0, true, true));

    Ok(heap)
  }

  pub fn region(&self) -> &R {
    &self.region
  }

  /// Heap size in bytes, metadata included.
  #[inline]
  pub fn len(&self) -> usize {
    self.region.size()
  }

  /// Header offset of the epilogue.
  #[inline]
  pub fn epilogue(&self) -> usize {
    self.len() - WSIZE
  }

  /// Numeric address of `offset`.
  #[inline]
  pub fn address(
    &self,
    offset: usize,
  ) -> usize {
    self.region.lowest_address() as usize + offset
  }

  #[inline]
  fn word(
    &self,
    at: usize,
  ) -> Word {
    let mut buf = [0u8; WSIZE];
    buf.copy_from_slice(&self.region.bytes()[at..at + WSIZE]);
    Word::from_ne_bytes(buf)
  }

  #[inline]
  fn set_word(
    &mut self,
    at: usize,
    word: Word,
  ) {
    self.region.bytes_mut()[at..at + WSIZE].copy_from_slice(&word.to_ne_bytes());
  }

  /// Reads a word without trusting `at`. Used by the checker, which must not
  /// panic on a corrupted heap.
  pub fn try_word(
    &self,
    at: usize,
  ) -> Option<Word> {
    let bytes = self.region.bytes().get(at..at.checked_add(WSIZE)?)?;
    let mut buf = [0u8; WSIZE];
    buf.copy_from_slice(bytes);
    Some(Word::from_ne_bytes(buf))
  }

  /// Raw header word of the block at `block`.
  #[inline]
  pub fn header(
    &self,
    block: usize,
  ) -> Word {
    self.word(block)
  }

  #[inline]
  pub fn size_of(
    &self,
    block: usize,
  ) -> usize {
    extract_size(self.word(block))
  }

  #[inline]
  pub fn is_allocated(
    &self,
    block: usize,
  ) -> bool {
    extract_allocated(self.word(block))
  }

  #[inline]
  pub fn prev_allocated(
    &self,
    block: usize,
  ) -> bool {
    extract_prev_allocated(self.word(block))
  }

  #[inline]
  pub fn block(
    &self,
    header: usize,
  ) -> Block {
    Block::decode(header, self.word(header))
  }

  /// Offset of the last word of `block`, where a free block keeps its footer.
  #[inline]
  pub fn footer_of(
    &self,
    block: usize,
  ) -> usize {
    block + self.size_of(block) - WSIZE
  }

  /// Physical successor. For the last block this is the epilogue.
  #[inline]
  pub fn next_block(
    &self,
    block: usize,
  ) -> usize {
    block + self.size_of(block)
  }

  /// Physical predecessor if it is free. Allocated blocks keep no footer, so
  /// an allocated predecessor can't be located and isn't needed.
  #[inline]
  pub fn prev_free(
    &self,
    block: usize,
  ) -> Option<FreeBlock> {
    if self.prev_allocated(block) {
      return None;
    }

    let size = extract_size(self.word(block - WSIZE));
    Some(FreeBlock::at(block - size))
  }

  /// Marks `block` allocated. Allocated blocks only carry a header.
  pub fn write_used(
    &mut self,
    block: usize,
    size: usize,
    prev_allocated: bool,
  ) -> UsedBlock {
    self.set_word(block, pack(size, prev_allocated, true));
    UsedBlock::at(block)
  }

  /// Marks `block` free, writing both header and footer.
  pub fn write_free(
    &mut self,
    block: usize,
    size: usize,
    prev_allocated: bool,
  ) -> FreeBlock {
    let word = pack(size, prev_allocated, false);
    self.set_word(block, word);
    self.set_word(block + size - WSIZE, word);
    FreeBlock::at(block)
  }

  /// Updates the previous-allocated bit of `block`, footer included when the
  /// block is free. Works on the epilogue too.
  pub fn set_prev_allocated(
    &mut self,
    block: usize,
    prev_allocated: bool,
  ) {
    let word = self.word(block);
    let allocated = extract_allocated(word);
    let size = extract_size(word);
    let updated = pack(size, prev_allocated, allocated);

    self.set_word(block, updated);
    if !allocated {
      self.set_word(block + size - WSIZE, updated);
    }
  }

  #[inline]
  pub fn prev_link(
    &self,
    block: FreeBlock,
  ) -> Option<FreeBlock> {
    decode_link(self.word(block.offset() + PREV_LINK))
  }

  #[inline]
  pub fn next_link(
    &self,
    block: FreeBlock,
  ) -> Option<FreeBlock> {
    decode_link(self.word(block.offset() + NEXT_LINK))
  }

  /// Link reads for the checker: `None` when the link word itself lies
  /// outside the heap.
  pub fn try_links(
    &self,
    block: FreeBlock,
  ) -> Option<(Option<FreeBlock>, Option<FreeBlock>)> {
    let prev = self.try_word(block.offset().checked_add(PREV_LINK)?)?;
    let next = self.try_word(block.offset().checked_add(NEXT_LINK)?)?;
    Some((decode_link(prev), decode_link(next)))
  }

  #[inline]
  pub fn set_prev_link(
    &mut self,
    block: FreeBlock,
    prev: Option<FreeBlock>,
  ) {
    self.set_word(block.offset() + PREV_LINK, encode_link(prev));
  }

  #[inline]
  pub fn set_next_link(
    &mut self,
    block: FreeBlock,
    next: Option<FreeBlock>,
  ) {
    self.set_word(block.offset() + NEXT_LINK, encode_link(next));
  }

  pub fn set_links(
    &mut self,
    block: FreeBlock,
    prev: Option<FreeBlock>,
    next: Option<FreeBlock>,
  ) {
    self.set_prev_link(block, prev);
    self.set_next_link(block, next);
  }

  /// Grows the region by `size` bytes. The old epilogue header becomes the
  /// header of a new free block spanning the growth, and a new epilogue is
  /// written after it. The block is not coalesced or listed.
  pub fn extend(
    &mut self,
    size: usize,
  ) -> Result<FreeBlock, AllocError> {
    debug_assert_eq!(size % ALIGNMENT, 0);

    let old_brk = self.region.grow(size)?;
    let block = old_brk - WSIZE;
    let prev_allocated = self.prev_allocated(block);
    let free = self.write_free(block, size, prev_allocated);
    self.set_word(block + size, pack(0, false, true));

    Ok(free)
  }

  /// True if `offset` could be the header of a real block.
  #[inline]
  pub fn contains_block(
    &self,
    offset: usize,
  ) -> bool {
    offset >= FIRST_BLOCK && offset < self.epilogue() && offset % ALIGNMENT == WSIZE
  }

  /// Payload bytes of an allocated block.
  pub fn payload(
    &self,
    block: UsedBlock,
  ) -> &[u8] {
    let range = self.payload_range(block);
    &self.region.bytes()[range]
  }

  pub fn payload_mut(
    &mut self,
    block: UsedBlock,
  ) -> &mut [u8] {
    let range = self.payload_range(block);
    &mut self.region.bytes_mut()[range]
  }

  fn payload_range(
    &self,
    block: UsedBlock,
  ) -> Range<usize> {
    header_to_payload(block.offset())..self.next_block(block.offset())
  }

  /// `memmove` inside the heap.
  pub fn copy_within(
    &mut self,
    src: Range<usize>,
    dest: usize,
  ) {
    self.region.bytes_mut().copy_within(src, dest);
  }

  pub fn fill(
    &mut self,
    range: Range<usize>,
    value: u8,
  ) {
    self.region.bytes_mut()[range].fill(value);
  }

  /// Address-order walk from the first block up to, not including, the
  /// epilogue. Stops early on a zero or out-of-range size.
  pub fn blocks(&self) -> Blocks<'_, R> {
    Blocks {
      heap: self,
      cursor: FIRST_BLOCK,
    }
  }
}

#[inline]
fn decode_link(word: Word) -> Option<FreeBlock> {
  match word {
    0 => None,
    offset => Some(FreeBlock::at(offset as usize)),
  }
}

#[inline]
fn encode_link(link: Option<FreeBlock>) -> Word {
  link.map_or(0, |block| block.offset() as Word)
}

/// Iterator returned by [`Heap::blocks`].
#[derive(Debug)]
pub struct Blocks<'h, R: HeapRegion> {
  heap: &'h Heap<R>,
  cursor: usize,
}

impl<R: HeapRegion> Iterator for Blocks<'_, R> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let word = self.heap.try_word(self.cursor)?;
    let size = extract_size(word);
    let end = self.cursor.checked_add(size)?;
    if size == 0 || end > self.heap.epilogue() {
      return None;
    }

    let info = BlockInfo {
      offset: self.cursor,
      size,
      allocated: extract_allocated(word),
    };
    self.cursor = end;
    Some(info)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::MemRegion;

  fn heap() -> Heap<MemRegion> {
    Heap::init(MemRegion::reserve(1 << 16).unwrap()).unwrap()
  }

  #[test]
  fn test_init_layout() {
    let heap = heap();

    assert_eq!(heap.len(), HEAP_OVERHEAD);
    assert_eq!(heap.epilogue(), FIRST_BLOCK);
    assert_eq!(heap.header(PROLOGUE), pack(16, true, true));
    assert_eq!(heap.header(PROLOGUE + WSIZE), pack(16, true, true));
    assert_eq!(heap.header(FIRST_BLOCK), pack(0, true, true));
    assert_eq!(heap.blocks().count(), 0);
  }

  #[test]
  fn test_init_rejects_used_region() {
    let mut region = MemRegion::reserve(1 << 16).unwrap();
    region.grow(64).unwrap();

    assert!(matches!(Heap::init(region), Err(AllocError::Config(_))));
  }

  #[test]
  fn test_extend_turns_epilogue_into_free_block() {
    let mut heap = heap();
    let block = heap.extend(4096).unwrap();

    assert_eq!(block.offset(), FIRST_BLOCK);
    assert_eq!(heap.size_of(FIRST_BLOCK), 4096);
    assert!(!heap.is_allocated(FIRST_BLOCK));
    assert!(heap.prev_allocated(FIRST_BLOCK));
    assert_eq!(heap.header(heap.footer_of(FIRST_BLOCK)), heap.header(FIRST_BLOCK));

    let epilogue = heap.epilogue();
    assert_eq!(epilogue, FIRST_BLOCK + 4096);
    assert_eq!(heap.header(epilogue), pack(0, false, true));
    assert_eq!(heap.next_block(FIRST_BLOCK), epilogue);
  }

  #[test]
  fn test_prev_free_uses_footer() {
    let mut heap = heap();
    heap.extend(256).unwrap();
    heap.write_free(FIRST_BLOCK, 64, true);
    heap.write_used(FIRST_BLOCK + 64, 192, false);

    assert_eq!(heap.prev_free(FIRST_BLOCK + 64), Some(FreeBlock::at(FIRST_BLOCK)));
    assert_eq!(heap.prev_free(FIRST_BLOCK), None);
  }

  #[test]
  fn test_set_prev_allocated_keeps_footer_in_sync() {
    let mut heap = heap();
    heap.extend(128).unwrap();

    heap.set_prev_allocated(FIRST_BLOCK, false);

    assert!(!heap.prev_allocated(FIRST_BLOCK));
    assert_eq!(heap.header(heap.footer_of(FIRST_BLOCK)), pack(128, false, false));
    assert_eq!(heap.size_of(FIRST_BLOCK), 128);
  }

  #[test]
  fn test_links_roundtrip() {
    let mut heap = heap();
    heap.extend(128).unwrap();
    heap.write_free(FIRST_BLOCK, 64, true);
    heap.write_free(FIRST_BLOCK + 64, 64, false);
    let a = FreeBlock::at(FIRST_BLOCK);
    let b = FreeBlock::at(FIRST_BLOCK + 64);

    heap.set_links(a, None, Some(b));
    heap.set_links(b, Some(a), None);

    assert_eq!(heap.next_link(a), Some(b));
    assert_eq!(heap.prev_link(a), None);
    assert_eq!(heap.prev_link(b), Some(a));
    assert_eq!(heap.try_links(b), Some((Some(a), None)));
  }

  #[test]
  fn test_blocks_walk_in_address_order() {
    let mut heap = heap();
    heap.extend(256).unwrap();
    heap.write_used(FIRST_BLOCK, 32, true);
    heap.write_free(FIRST_BLOCK + 32, 224, true);

    let blocks: Vec<_> = heap.blocks().collect();
    assert_eq!(
      blocks,
      vec![
        BlockInfo {
          offset: FIRST_BLOCK,
          size: 32,
          allocated: true,
        },
        BlockInfo {
          offset: FIRST_BLOCK + 32,
          size: 224,
          allocated: false,
        },
      ]
    );
  }

  #[test]
  fn test_payload_covers_block_after_header() {
    let mut heap = heap();
    heap.extend(64).unwrap();
    let block = heap.write_used(FIRST_BLOCK, 64, true);

    heap.payload_mut(block).fill(0x5A);

    assert_eq!(heap.payload(block).len(), 64 - WSIZE);
    assert!(heap.payload(block).iter().all(|&b| b == 0x5A));
    // The header survived.
    assert_eq!(heap.size_of(FIRST_BLOCK), 64);
    assert!(heap.address(block.payload().offset()) % ALIGNMENT == 0);
  }

  #[test]
  fn test_try_word_out_of_bounds() {
    let heap = heap();

    assert!(heap.try_word(0).is_some());
    assert!(heap.try_word(heap.len()).is_none());
    assert!(heap.try_word(usize::MAX).is_none());
  }
}
