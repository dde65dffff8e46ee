use crate::{
  align::checked_align,
  block::{Block, BlockInfo, FreeBlock, Payload, UsedBlock, WSIZE, header_to_payload},
  config::Config,
  error::AllocError,
  freelist::{ExplicitList, FreeList, ImplicitList, SegregatedList},
  heap::{FIRST_BLOCK, Heap},
  region::{HeapRegion, MemRegion},
};

/// Allocator over an implicit free list.
pub type ImplicitAllocator = Allocator<ImplicitList>;
/// Allocator over a single explicit free list.
pub type ExplicitAllocator = Allocator<ExplicitList>;
/// Allocator over segregated free lists.
pub type SegregatedAllocator = Allocator<SegregatedList>;

/// First payload offset a heap can hand out.
const FIRST_PAYLOAD: usize = header_to_payload(FIRST_BLOCK);

/// Boundary-tag allocator over one growable heap region.
///
/// `F` decides how free blocks are found, `R` where the heap lives. Each
/// instance owns its region; dropping the allocator releases it.
#[derive(Debug)]
pub struct Allocator<F: FreeList = SegregatedList, R: HeapRegion = MemRegion> {
  pub(crate) heap: Heap<R>,
  pub(crate) free_list: F,
  config: Config,
}

impl<F: FreeList + Default> Allocator<F, MemRegion> {
  /// Reserves `config.max_heap` bytes of address space and formats the first
  /// chunk of the heap.
  pub fn new(config: Config) -> Result<Self, AllocError> {
    config.validate()?;
    let region = MemRegion::reserve(config.max_heap)?;
    Self::with_region(region, F::default(), config)
  }
}

impl<F: FreeList, R: HeapRegion> Allocator<F, R> {
  /// Builds an allocator on an empty region. Fails if the region can't hold
  /// the prologue, the epilogue and one chunk.
  pub fn with_region(
    region: R,
    free_list: F,
    config: Config,
  ) -> Result<Self, AllocError> {
    config.validate()?;

    let mut allocator = Self {
      heap: Heap::init(region)?,
      free_list,
      config,
    };
    allocator.extend_heap(config.chunk_size)?;

    ainfo!(
      "heap initialised: {} bytes, chunk {} bytes, limit {} bytes",
      allocator.heap.len(),
      config.chunk_size,
      allocator.heap.region().capacity()
    );
    Ok(allocator)
  }

  /// The configuration this allocator was built with.
  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn free_list(&self) -> &F {
    &self.free_list
  }

  /// Current heap size, metadata included.
  pub fn heap_size(&self) -> usize {
    self.heap.len()
  }

  /// Allocates a block with room for at least `size` bytes.
  ///
  /// Returns `None` for `size == 0` and when the heap can't grow any further.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<Payload> {
    if size == 0 {
      return None;
    }

    let Some(real_size) = Self::adjust(size) else {
      awarn!("allocate({size}): size overflows");
      return None;
    };

    let block = match self.free_list.find(&self.heap, real_size) {
      Some(block) => block,
      None => match self.extend_heap(real_size.max(self.config.chunk_size)) {
        Ok(block) => block,
        Err(err) => {
          awarn!("allocate({size}) failed: {err}");
          return None;
        }
      },
    };

    let used = self.place(block, real_size);
    atrace!(
      "allocate({size}) -> {:#x} ({} byte block)",
      used.payload().offset(),
      self.heap.size_of(used.offset())
    );
    self.debug_check();

    Some(used.payload())
  }

  /// Releases the block behind `payload`. `None` is a no-op.
  ///
  /// Misuse is detected on a best-effort basis: an unaligned or out-of-heap
  /// payload, or one whose block is already free, is rejected without
  /// touching the heap. A forged payload that happens to land on something
  /// that looks like an allocated header is not caught.
  pub fn free(
    &mut self,
    payload: Option<Payload>,
  ) -> Result<(), AllocError> {
    let Some(payload) = payload else {
      return Ok(());
    };

    let block = self.used_block(payload).inspect_err(|err| {
      awarn!("free({:#x}) rejected: {err}", payload.offset());
    })?;
    self.release(block);

    atrace!("free({:#x})", payload.offset());
    self.debug_check();
    Ok(())
  }

  /// Resizes the allocation behind `payload` to at least `size` bytes.
  ///
  /// - `None` behaves as [`Allocator::allocate`].
  /// - `size == 0` frees the block and returns `None`.
  /// - A block that is already large enough is shrunk in place.
  /// - A block followed by enough free space grows in place.
  /// - A block preceded by enough free space slides down into it; the
  ///   payload moves and the new handle is returned.
  /// - Otherwise the contents move to a fresh block.
  ///
  /// The first `min(old usable size, size)` bytes are preserved. On failure
  /// `None` is returned and the old allocation is left as it was.
  pub fn reallocate(
    &mut self,
    payload: Option<Payload>,
    size: usize,
  ) -> Option<Payload> {
    let Some(payload) = payload else {
      return self.allocate(size);
    };

    if size == 0 {
      if let Err(err) = self.free(Some(payload)) {
        awarn!("reallocate({:#x}, 0): {err}", payload.offset());
      }
      return None;
    }

    let block = match self.used_block(payload) {
      Ok(block) => block,
      Err(err) => {
        awarn!("reallocate({:#x}, {size}) rejected: {err}", payload.offset());
        return None;
      }
    };

    let Some(real_size) = Self::adjust(size) else {
      awarn!("reallocate({:#x}, {size}): size overflows", payload.offset());
      return None;
    };

    let resized = self.resize(block, real_size).or_else(|| self.relocate(block, size));
    if let Some(new) = resized {
      atrace!(
        "reallocate({:#x}, {size}) -> {:#x}",
        payload.offset(),
        new.offset()
      );
    }
    self.debug_check();

    resized
  }

  /// Allocates `count * size` zeroed bytes. Returns `None` if the product
  /// overflows or is zero.
  pub fn zero_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> Option<Payload> {
    let Some(bytes) = count.checked_mul(size) else {
      awarn!("zero_allocate({count}, {size}): size overflows");
      return None;
    };

    let payload = self.allocate(bytes)?;
    let start = payload.offset();
    self.heap.fill(start..start + bytes, 0);

    Some(payload)
  }

  /// The caller-visible bytes of a live allocation.
  pub fn bytes(
    &self,
    payload: Payload,
  ) -> Option<&[u8]> {
    let block = self.used_block(payload).ok()?;
    Some(self.heap.payload(block))
  }

  pub fn bytes_mut(
    &mut self,
    payload: Payload,
  ) -> Option<&mut [u8]> {
    let block = self.used_block(payload).ok()?;
    Some(self.heap.payload_mut(block))
  }

  /// Usable bytes of a live allocation, at least what was asked for.
  pub fn usable_size(
    &self,
    payload: Payload,
  ) -> Option<usize> {
    self.bytes(payload).map(<[u8]>::len)
  }

  /// Numeric address of a payload. Always a multiple of
  /// [`crate::block::ALIGNMENT`].
  pub fn address(
    &self,
    payload: Payload,
  ) -> usize {
    self.heap.address(payload.offset())
  }

  /// Every block in address order, prologue and epilogue excluded.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.heap.blocks()
  }

  /// Block size for a request: payload plus header, aligned, and never
  /// smaller than what the free list needs to track a free block.
  fn adjust(size: usize) -> Option<usize> {
    let size = checked_align(size.checked_add(WSIZE)?)?;
    Some(size.max(F::MIN_BLOCK_SIZE))
  }

  /// Validates a caller's payload and returns its block.
  fn used_block(
    &self,
    payload: Payload,
  ) -> Result<UsedBlock, AllocError> {
    let offset = payload.offset();
    let invalid = AllocError::InvalidPointer { offset };

    if offset % crate::block::ALIGNMENT != 0 || offset < FIRST_PAYLOAD {
      return Err(invalid);
    }

    let header = payload.header();
    if !self.heap.contains_block(header) {
      return Err(invalid);
    }

    match self.heap.block(header) {
      Block::Free(_) => Err(AllocError::DoubleFree { offset }),
      Block::Used(block) => {
        let size = self.heap.size_of(header);
        let fits = header
          .checked_add(size)
          .is_some_and(|end| end <= self.heap.epilogue());
        if size < F::MIN_BLOCK_SIZE || !fits {
          return Err(invalid);
        }
        Ok(block)
      }
    }
  }

  /// Grows the heap by `size` bytes and returns the (coalesced, listed) free
  /// block covering the new space.
  fn extend_heap(
    &mut self,
    size: usize,
  ) -> Result<FreeBlock, AllocError> {
    let block = self.heap.extend(size)?;
    adebug!("heap grown by {size} bytes to {} bytes", self.heap.len());
    Ok(self.coalesce(block))
  }

  /// Merges `block` with its free neighbours and lists the result.
  ///
  /// ```text
  ///   prev  block  next        result
  ///   used  free   used   ->   [block]
  ///   used  free   free   ->   [block + next]
  ///   free  free   used   ->   [prev + block]
  ///   free  free   free   ->   [prev + block + next]
  /// ```
  fn coalesce(
    &mut self,
    block: FreeBlock,
  ) -> FreeBlock {
    let mut start = block.offset();
    let mut size = self.heap.size_of(start);

    let next = self.heap.next_block(start);
    if let Block::Free(next) = self.heap.block(next) {
      self.free_list.remove(&mut self.heap, next);
      size += self.heap.size_of(next.offset());
    }

    if let Some(prev) = self.heap.prev_free(start) {
      self.free_list.remove(&mut self.heap, prev);
      size += self.heap.size_of(prev.offset());
      start = prev.offset();
    }

    let prev_allocated = self.heap.prev_allocated(start);
    let merged = self.heap.write_free(start, size, prev_allocated);
    let successor = self.heap.next_block(start);
    self.heap.set_prev_allocated(successor, false);

    self.free_list.merged(start, size);
    self.free_list.insert(&mut self.heap, merged);
    merged
  }

  /// Hands out the front `real_size` bytes of a listed free block. The rest
  /// is split off as a new free block unless it would be too small to track.
  fn place(
    &mut self,
    block: FreeBlock,
    real_size: usize,
  ) -> UsedBlock {
    self.free_list.remove(&mut self.heap, block);

    let offset = block.offset();
    let size = self.heap.size_of(offset);
    let prev_allocated = self.heap.prev_allocated(offset);
    debug_assert!(size >= real_size);

    if size - real_size >= F::MIN_BLOCK_SIZE {
      let used = self.heap.write_used(offset, real_size, prev_allocated);
      // The successor already records a free predecessor.
      let rest = self.heap.write_free(offset + real_size, size - real_size, true);
      self.free_list.insert(&mut self.heap, rest);
      used
    } else {
      let used = self.heap.write_used(offset, size, prev_allocated);
      let successor = self.heap.next_block(offset);
      self.heap.set_prev_allocated(successor, true);
      used
    }
  }

  /// Marks an allocated block free and coalesces it.
  fn release(
    &mut self,
    block: UsedBlock,
  ) {
    let offset = block.offset();
    let size = self.heap.size_of(offset);
    let prev_allocated = self.heap.prev_allocated(offset);
    let freed = self.heap.write_free(offset, size, prev_allocated);
    self.coalesce(freed);
  }

  /// Trims an allocated block down to `real_size`, returning the tail to the
  /// free list when it is big enough to be a block of its own.
  fn shrink(
    &mut self,
    block: UsedBlock,
    real_size: usize,
  ) {
    let offset = block.offset();
    let size = self.heap.size_of(offset);
    if size - real_size < F::MIN_BLOCK_SIZE {
      return;
    }

    let prev_allocated = self.heap.prev_allocated(offset);
    self.heap.write_used(offset, real_size, prev_allocated);
    let rest = self.heap.write_free(offset + real_size, size - real_size, true);
    self.coalesce(rest);
  }

  /// Resizes without copying to a fresh block: shrink, absorb the next
  /// block, or slide down into the previous one. `None` if the neighbours
  /// don't add up to `real_size`.
  fn resize(
    &mut self,
    block: UsedBlock,
    real_size: usize,
  ) -> Option<Payload> {
    let offset = block.offset();
    let current = self.heap.size_of(offset);

    if current >= real_size {
      self.shrink(block, real_size);
      return Some(block.payload());
    }

    let next_free = match self.heap.block(self.heap.next_block(offset)) {
      Block::Free(next) => Some(next),
      Block::Used(_) => None,
    };
    let next_size = next_free.map_or(0, |next| self.heap.size_of(next.offset()));
    let prev_free = self.heap.prev_free(offset);
    let prev_size = prev_free.map_or(0, |prev| self.heap.size_of(prev.offset()));

    if current + next_size >= real_size {
      if let Some(next) = next_free {
        self.free_list.remove(&mut self.heap, next);
      }
      let total = current + next_size;
      let prev_allocated = self.heap.prev_allocated(offset);
      let grown = self.heap.write_used(offset, total, prev_allocated);
      let successor = self.heap.next_block(offset);
      self.heap.set_prev_allocated(successor, true);
      self.free_list.merged(offset, total);

      self.shrink(grown, real_size);
      return Some(grown.payload());
    }

    let prev = prev_free?;
    let total = prev_size + current + next_size;
    if total < real_size {
      return None;
    }

    self.free_list.remove(&mut self.heap, prev);
    if let Some(next) = next_free {
      self.free_list.remove(&mut self.heap, next);
    }

    let start = prev.offset();
    let prev_allocated = self.heap.prev_allocated(start);
    let moved = self.heap.write_used(start, total, prev_allocated);
    let old_payload = header_to_payload(offset);
    self
      .heap
      .copy_within(old_payload..old_payload + (current - WSIZE), header_to_payload(start));
    let successor = self.heap.next_block(start);
    self.heap.set_prev_allocated(successor, true);
    self.free_list.merged(start, total);

    self.shrink(moved, real_size);
    Some(moved.payload())
  }

  /// Moves the contents of `block` to a new allocation of `size` bytes and
  /// frees `block`. Leaves `block` alone if the allocation fails.
  fn relocate(
    &mut self,
    block: UsedBlock,
    size: usize,
  ) -> Option<Payload> {
    let usable = self.heap.size_of(block.offset()) - WSIZE;
    let new = self.allocate(size)?;

    let old_payload = block.payload().offset();
    let count = usable.min(size);
    self
      .heap
      .copy_within(old_payload..old_payload + count, new.offset());
    self.release(block);

    Some(new)
  }

  /// Full heap check after every operation when built with `paranoid`.
  #[inline]
  fn debug_check(&self) {
    if cfg!(feature = "paranoid") {
      if let Err(violations) = self.check() {
        panic!("heap corrupted: {violations:?}");
      }
    }
  }
}
