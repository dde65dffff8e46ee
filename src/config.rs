//! Allocator tuning knobs.

use crate::{block::ALIGNMENT, error::AllocError, heap::HEAP_OVERHEAD};

/// Bytes requested from the region whenever no free block fits.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Address space reserved for one heap: 20 MiB.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// Smallest chunk that still holds a linked free block.
pub const MIN_CHUNK_SIZE: usize = 2 * ALIGNMENT;

/// Allocator configuration.
///
/// ```rust
/// use rallocator::Config;
///
/// let config = Config::new().with_chunk_size(8192).with_max_heap(1 << 20);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Minimum heap growth. Growth requests are `max(block size, chunk_size)`,
  /// which amortizes the cost of calling into the region.
  pub chunk_size: usize,
  /// Hard limit on the heap size. Allocations fail once it is reached.
  pub max_heap: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      chunk_size: DEFAULT_CHUNK_SIZE,
      max_heap: DEFAULT_MAX_HEAP,
    }
  }
}

impl Config {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_max_heap(
    mut self,
    max_heap: usize,
  ) -> Self {
    self.max_heap = max_heap;
    self
  }

  /// Checks that the heap can be initialised with this configuration.
  pub fn validate(&self) -> Result<(), AllocError> {
    if self.chunk_size < MIN_CHUNK_SIZE || self.chunk_size % ALIGNMENT != 0 {
      return Err(AllocError::Config(format!(
        "chunk size {} must be a multiple of {ALIGNMENT} and at least {MIN_CHUNK_SIZE}",
        self.chunk_size
      )));
    }

    let needed = HEAP_OVERHEAD + self.chunk_size;
    if self.max_heap < needed {
      return Err(AllocError::Config(format!(
        "max heap {} cannot fit the first chunk ({needed} bytes)",
        self.max_heap
      )));
    }

    Ok(())
  }
}
