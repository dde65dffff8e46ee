//! The memory the heap lives in.
//!
//! The allocator only ever asks its region to grow at the top, the same way a
//! C allocator calls `sbrk`. [`MemRegion`] reserves the whole address range up
//! front with `mmap` and then moves a break offset forward inside it, so the
//! base address never changes and payload offsets map to stable addresses.
//!
//! ```text
//!   base                        break                         base + capacity
//!   ┌──────────────────────────────┬─────────────────────────────────┐
//!   │        heap (in use)         │       reserved, untouched       │
//!   └──────────────────────────────┴─────────────────────────────────┘
//!                                  ──▶ grow(n)
//! ```

use std::{
  io,
  ptr::{self, NonNull},
  slice,
};

use crate::error::AllocError;

/// Monotonically growable byte array backing a heap.
pub trait HeapRegion {
  /// Extends the region by `increment` bytes and returns the offset of the
  /// first new byte (the old break). Never shrinks.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<usize, AllocError>;

  /// Current size in bytes.
  fn size(&self) -> usize;

  /// Upper bound for [`HeapRegion::size`].
  fn capacity(&self) -> usize;

  /// The in-use bytes, `[0, size)`.
  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  fn lowest_address(&self) -> *const u8;

  /// Address of the last in-use byte, or the lowest address while empty.
  fn highest_address(&self) -> *const u8 {
    self
      .lowest_address()
      .wrapping_add(self.size().saturating_sub(1))
  }
}

/// Anonymous `mmap` reservation with an `sbrk`-like break.
#[derive(Debug)]
pub struct MemRegion {
  base: NonNull<u8>,
  mapped: usize,
  capacity: usize,
  brk: usize,
}

// SAFETY: the mapping is owned exclusively by this value and only reachable
// through `&self`/`&mut self`, so moving it to another thread is fine.
unsafe impl Send for MemRegion {}

impl MemRegion {
  /// Reserves `capacity` bytes of address space. Nothing is in use until the
  /// first [`HeapRegion::grow`].
  pub fn reserve(capacity: usize) -> Result<Self, AllocError> {
    let page = page_size();
    let mapped = capacity
      .max(1)
      .checked_next_multiple_of(page)
      .ok_or(AllocError::Reserve {
        size: capacity,
        errno: libc::ENOMEM,
      })?;

    // SAFETY: anonymous private mapping, no file descriptor involved. The
    // result is checked against MAP_FAILED before use.
    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        mapped,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(AllocError::Reserve {
        size: mapped,
        errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
      });
    }

    let base = NonNull::new(address.cast::<u8>()).ok_or(AllocError::Reserve {
      size: mapped,
      errno: libc::ENOMEM,
    })?;

    Ok(Self {
      base,
      mapped,
      capacity,
      brk: 0,
    })
  }
}

impl HeapRegion for MemRegion {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<usize, AllocError> {
    let available = self.capacity - self.brk;
    if increment > available {
      return Err(AllocError::Exhausted {
        requested: increment,
        available,
      });
    }

    let old = self.brk;
    self.brk += increment;
    Ok(old)
  }

  fn size(&self) -> usize {
    self.brk
  }

  fn capacity(&self) -> usize {
    self.capacity
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: `[base, base + brk)` lies inside the mapping, anonymous pages
    // are zero initialised and the mapping lives as long as `self`.
    unsafe { slice::from_raw_parts(self.base.as_ptr(), self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: same as `bytes`, and `&mut self` guarantees exclusivity.
    unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
  }

  fn lowest_address(&self) -> *const u8 {
    self.base.as_ptr()
  }
}

impl Drop for MemRegion {
  fn drop(&mut self) {
    // SAFETY: `base` and `mapped` are exactly what mmap returned and took.
    let result = unsafe { libc::munmap(self.base.as_ptr().cast(), self.mapped) };
    if result != 0 {
      awarn!(
        "munmap of {:p} ({} bytes) failed: {}",
        self.base,
        self.mapped,
        io::Error::last_os_error()
      );
    }
  }
}

/// Virtual memory page size, 4096 when the platform won't say.
fn page_size() -> usize {
  // SAFETY: sysconf has no preconditions.
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  if size <= 0 { 4096 } else { size as usize }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reserve_starts_empty() {
    let region = MemRegion::reserve(1 << 16).unwrap();

    assert_eq!(region.size(), 0);
    assert_eq!(region.capacity(), 1 << 16);
    assert!(region.bytes().is_empty());
    assert_eq!(region.highest_address(), region.lowest_address());
  }

  #[test]
  fn test_grow_returns_old_break() {
    let mut region = MemRegion::reserve(1 << 16).unwrap();

    assert_eq!(region.grow(32).unwrap(), 0);
    assert_eq!(region.grow(4096).unwrap(), 32);
    assert_eq!(region.size(), 4128);
    assert_eq!(
      region.highest_address() as usize - region.lowest_address() as usize,
      4127
    );
  }

  #[test]
  fn test_grown_bytes_are_zeroed_and_writable() {
    let mut region = MemRegion::reserve(8192).unwrap();
    region.grow(4096).unwrap();

    assert!(region.bytes().iter().all(|&b| b == 0));

    region.bytes_mut()[4095] = 0xAB;
    assert_eq!(region.bytes()[4095], 0xAB);
  }

  #[test]
  fn test_grow_past_capacity_fails() {
    let mut region = MemRegion::reserve(4096).unwrap();
    region.grow(4000).unwrap();

    assert_eq!(
      region.grow(100),
      Err(AllocError::Exhausted {
        requested: 100,
        available: 96,
      })
    );
    // A failed grow leaves the break alone.
    assert_eq!(region.size(), 4000);
    assert_eq!(region.grow(96).unwrap(), 4000);
  }

  #[test]
  fn test_base_is_page_aligned() {
    let region = MemRegion::reserve(100).unwrap();

    assert_eq!(region.lowest_address() as usize % page_size(), 0);
  }
}
