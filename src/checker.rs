//! Heap consistency checker.
//!
//! Walks the heap twice: once in address order through the boundary tags,
//! once through the free list. Neither walk trusts what it reads; anything
//! out of place is collected as a [`Violation`] instead of followed.

use std::{collections::HashSet, fmt};

use crate::{
  allocator::Allocator,
  block::{ALIGNMENT, WSIZE, extract_allocated, extract_prev_allocated, extract_size, pack},
  error::Violation,
  freelist::FreeList,
  heap::{FIRST_BLOCK, PROLOGUE},
  region::HeapRegion,
};

/// Summary of a consistent heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapReport {
  /// Heap size including prologue and epilogue.
  pub heap_size: usize,
  pub blocks: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

impl fmt::Display for HeapReport {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "heap {} bytes, {} blocks: {} used ({} bytes), {} free ({} bytes, largest {})",
      self.heap_size,
      self.blocks,
      self.allocated_blocks,
      self.allocated_bytes,
      self.free_blocks,
      self.free_bytes,
      self.largest_free
    )
  }
}

impl<F: FreeList, R: HeapRegion> Allocator<F, R> {
  /// Verifies every heap invariant.
  ///
  /// - the prologue is intact and the epilogue sits at the heap end
  /// - block sizes are aligned, at least the minimum, and inside the heap
  /// - free headers match their footers
  /// - every `prev_allocated` bit matches the previous block
  /// - no two free blocks are adjacent
  /// - the free list holds exactly the free blocks, once each, with sound
  ///   links, in the right class and order
  ///
  /// Costs a full heap walk. Not meant for the hot path.
  pub fn check(&self) -> Result<HeapReport, Vec<Violation>> {
    let mut violations = Vec::new();
    let mut report = HeapReport {
      heap_size: self.heap.len(),
      ..HeapReport::default()
    };

    let prologue = pack(2 * WSIZE, true, true);
    for offset in [PROLOGUE, PROLOGUE + WSIZE] {
      if self.heap.try_word(offset) != Some(prologue) {
        violations.push(Violation::Prologue { offset });
      }
    }

    let free = self.check_blocks(&mut report, &mut violations);
    if let Some(free) = free {
      self.check_free_list(&free, &mut violations);
    }

    if violations.is_empty() {
      Ok(report)
    } else {
      Err(violations)
    }
  }

  /// Runs [`Allocator::check`] and prints the outcome: the summary from
  /// `verbosity >= 1`, every block from `verbosity >= 2`.
  ///
  /// Debug builds panic when the heap is inconsistent.
  pub fn check_heap(
    &self,
    verbosity: u8,
  ) -> bool {
    let result = self.check();

    if verbosity >= 1 {
      match &result {
        Ok(report) => println!("{report}"),
        Err(violations) => {
          for violation in violations {
            println!("heap check: {violation}");
          }
        }
      }
    }
    if verbosity >= 2 {
      for info in self.blocks() {
        println!("  {info}");
      }
    }

    if let Err(violations) = &result {
      aerror!("heap check found {} violations", violations.len());
      debug_assert!(violations.is_empty(), "heap corrupted: {violations:?}");
    }
    result.is_ok()
  }

  /// Address-order walk. Returns the free block offsets, or `None` if the
  /// walk couldn't reach the epilogue.
  fn check_blocks(
    &self,
    report: &mut HeapReport,
    violations: &mut Vec<Violation>,
  ) -> Option<Vec<usize>> {
    let epilogue = self.heap.epilogue();
    let mut free = Vec::new();
    let mut cursor = FIRST_BLOCK;
    let mut prev_allocated = true;
    let mut prev_free = None;

    while cursor < epilogue {
      let word = self.heap.try_word(cursor)?;
      let size = extract_size(word);

      if size == 0 || size % ALIGNMENT != 0 || size < F::MIN_BLOCK_SIZE {
        violations.push(Violation::BadSize {
          offset: cursor,
          size,
        });
        return None;
      }
      if cursor.checked_add(size).is_none_or(|end| end > epilogue) {
        violations.push(Violation::OutOfBounds {
          offset: cursor,
          size,
          heap_end: epilogue,
        });
        return None;
      }

      let recorded = extract_prev_allocated(word);
      if recorded != prev_allocated {
        violations.push(Violation::PrevAllocatedBit {
          offset: cursor,
          recorded,
          actual: prev_allocated,
        });
      }

      let allocated = extract_allocated(word);
      report.blocks += 1;
      if allocated {
        report.allocated_blocks += 1;
        report.allocated_bytes += size;
        prev_free = None;
      } else {
        let Some(footer) = self.heap.try_word(cursor + size - WSIZE) else {
          violations.push(Violation::OutOfBounds {
            offset: cursor,
            size,
            heap_end: epilogue,
          });
          return None;
        };
        if footer != word {
          violations.push(Violation::FooterMismatch {
            offset: cursor,
            header: word,
            footer,
          });
        }
        if let Some(first) = prev_free {
          violations.push(Violation::Uncoalesced {
            first,
            second: cursor,
          });
        }

        report.free_blocks += 1;
        report.free_bytes += size;
        report.largest_free = report.largest_free.max(size);
        free.push(cursor);
        prev_free = Some(cursor);
      }

      prev_allocated = allocated;
      cursor += size;
    }

    // Every block ends at or before the epilogue, so the walk lands on it.
    let word = self.heap.try_word(epilogue)?;
    if extract_size(word) != 0 || !extract_allocated(word) {
      violations.push(Violation::Epilogue {
        offset: epilogue,
        header: word,
      });
    }
    let recorded = extract_prev_allocated(word);
    if recorded != prev_allocated {
      violations.push(Violation::PrevAllocatedBit {
        offset: epilogue,
        recorded,
        actual: prev_allocated,
      });
    }

    Some(free)
  }

  /// Compares the free list against the free blocks found by the scan.
  fn check_free_list(
    &self,
    free: &[usize],
    violations: &mut Vec<Violation>,
  ) {
    let entries = match self.free_list.entries(&self.heap) {
      Ok(entries) => entries,
      Err(violation) => {
        violations.push(violation);
        return;
      }
    };

    let free: HashSet<usize> = free.iter().copied().collect();
    let mut listed = HashSet::with_capacity(entries.len());
    let mut previous: Option<(usize, usize)> = None;

    for entry in &entries {
      let offset = entry.block.offset();

      if !listed.insert(offset) {
        violations.push(Violation::Duplicate { offset });
        continue;
      }
      if !free.contains(&offset) {
        violations.push(Violation::NotFree { offset });
        previous = None;
        continue;
      }

      let size = self.heap.size_of(offset);
      let expected = self.free_list.class_of(size);
      if expected != entry.class {
        violations.push(Violation::WrongClass {
          offset,
          size,
          class: entry.class,
          expected,
        });
      }

      if F::SORTED {
        if let Some((class, prev_size)) = previous {
          if class == entry.class && size < prev_size {
            violations.push(Violation::Unsorted {
              class,
              offset,
            });
          }
        }
      }
      previous = Some((entry.class, size));
    }

    let mut missing: Vec<_> = free.difference(&listed).copied().collect();
    missing.sort_unstable();
    violations.extend(missing.into_iter().map(|offset| Violation::NotListed { offset }));
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::{
    block::FreeBlock,
    config::Config,
    freelist::{ExplicitList, ImplicitList, SegregatedList},
  };

  fn explicit() -> Allocator<ExplicitList> {
    Allocator::new(Config::default()).unwrap()
  }

  fn violations<F: FreeList, R: HeapRegion>(
    allocator: &Allocator<F, R>,
  ) -> Vec<Violation> {
    allocator.check().unwrap_err()
  }

  #[test]
  fn test_fresh_heap_report() {
    let allocator = explicit();

    assert_eq!(
      allocator.check(),
      Ok(HeapReport {
        heap_size: 4128,
        blocks: 1,
        allocated_blocks: 0,
        allocated_bytes: 0,
        free_blocks: 1,
        free_bytes: 4096,
        largest_free: 4096,
      })
    );
  }

  #[test]
  fn test_report_counts_blocks() {
    let mut allocator: Allocator<SegregatedList> = Allocator::new(Config::default()).unwrap();
    let a = allocator.allocate(100).unwrap();
    let _b = allocator.allocate(200).unwrap();
    let _c = allocator.allocate(300).unwrap();
    allocator.free(Some(a)).unwrap();

    let report = allocator.check().unwrap();

    assert_eq!(report.blocks, 4);
    assert_eq!(report.allocated_blocks, 2);
    assert_eq!(report.allocated_bytes, 208 + 320);
    assert_eq!(report.free_blocks, 2);
    assert_eq!(report.free_bytes, 4096 - 208 - 320);
    assert_eq!(report.largest_free, 4096 - 112 - 208 - 320);
  }

  #[test]
  fn test_report_display() {
    let allocator = explicit();

    assert_eq!(
      allocator.check().unwrap().to_string(),
      "heap 4128 bytes, 1 blocks: 0 used (0 bytes), 1 free (4096 bytes, largest 4096)"
    );
  }

  #[test]
  fn test_damaged_prologue() {
    let mut allocator = explicit();
    allocator.heap.fill(PROLOGUE..PROLOGUE + WSIZE, 0);

    assert_eq!(violations(&allocator), vec![Violation::Prologue { offset: PROLOGUE }]);
  }

  #[test]
  fn test_zero_size_stops_walk() {
    let mut allocator = explicit();
    allocator.heap.fill(FIRST_BLOCK..FIRST_BLOCK + WSIZE, 0);

    assert_eq!(
      violations(&allocator),
      vec![Violation::BadSize {
        offset: FIRST_BLOCK,
        size: 0,
      }]
    );
  }

  #[test]
  fn test_footer_mismatch() {
    let mut allocator = explicit();
    let _p = allocator.allocate(100).unwrap();
    let footer = allocator.heap.epilogue() - WSIZE;
    allocator.heap.fill(footer..footer + WSIZE, 0);

    assert_eq!(
      violations(&allocator),
      vec![Violation::FooterMismatch {
        offset: 136,
        header: pack(3984, true, false),
        footer: 0,
      }]
    );
  }

  #[test]
  fn test_block_past_epilogue() {
    let mut allocator = explicit();
    let _p = allocator.allocate(100).unwrap();
    allocator.heap.write_used(136, 8192, true);

    assert_eq!(
      violations(&allocator),
      vec![Violation::OutOfBounds {
        offset: 136,
        size: 8192,
        heap_end: 4120,
      }]
    );
  }

  #[test]
  fn test_size_overflowing_address_space() {
    let mut allocator = explicit();
    let _p = allocator.allocate(100).unwrap();
    let size = usize::MAX & !(ALIGNMENT - 1);
    allocator.heap.write_used(136, size, true);

    assert_eq!(
      violations(&allocator),
      vec![Violation::OutOfBounds {
        offset: 136,
        size,
        heap_end: 4120,
      }]
    );
  }

  #[test]
  fn test_damaged_epilogue() {
    let mut allocator = explicit();
    let epilogue = allocator.heap.epilogue();
    allocator.heap.fill(epilogue..epilogue + WSIZE, 0);

    assert_eq!(
      violations(&allocator),
      vec![Violation::Epilogue {
        offset: epilogue,
        header: 0,
      }]
    );
  }

  #[test]
  fn test_link_outside_heap() {
    let mut allocator = explicit();
    let link = allocator.heap.len() + WSIZE;
    allocator
      .heap
      .set_next_link(FreeBlock::at(FIRST_BLOCK), Some(FreeBlock::at(link)));

    assert_eq!(
      violations(&allocator),
      vec![Violation::LinkOutOfBounds {
        from: FIRST_BLOCK,
        link,
      }]
    );
  }

  #[test]
  fn test_free_list_loop() {
    let mut allocator = explicit();
    let p: Vec<_> = (0..4).map(|_| allocator.allocate(100).unwrap()).collect();
    // 24 a | 136 b | 248 c | 360 d | 472 free
    allocator.free(Some(p[0])).unwrap();
    allocator.free(Some(p[2])).unwrap();
    // list: 248 -> 24 -> 472, now back to 24
    allocator
      .heap
      .set_next_link(FreeBlock::at(472), Some(FreeBlock::at(FIRST_BLOCK)));

    assert_eq!(violations(&allocator), vec![Violation::Cycle { class: 0 }]);
  }

  #[test]
  fn test_segregated_class_out_of_order() {
    let mut allocator: Allocator<SegregatedList> = Allocator::new(Config::default()).unwrap();
    let a = allocator.allocate(600).unwrap();
    let _guard = allocator.allocate(100).unwrap();
    let b = allocator.allocate(700).unwrap();
    let _guard = allocator.allocate(100).unwrap();
    allocator.free(Some(a)).unwrap();
    allocator.free(Some(b)).unwrap();

    // Class 5 holds 608 then 720; relink it as 720 then 608.
    let small = FreeBlock::at(FIRST_BLOCK);
    let large = FreeBlock::at(FIRST_BLOCK + 608 + 112);
    allocator.free_list.remove(&mut allocator.heap, small);
    allocator.free_list.remove(&mut allocator.heap, large);
    allocator.free_list.insert(&mut allocator.heap, large);
    allocator.heap.set_next_link(large, Some(small));
    allocator.heap.set_links(small, Some(large), None);

    assert_eq!(
      violations(&allocator),
      vec![Violation::Unsorted {
        class: 5,
        offset: FIRST_BLOCK,
      }]
    );
  }

  #[test]
  fn test_block_filed_in_two_classes() {
    let mut allocator: Allocator<SegregatedList> = Allocator::new(Config::default()).unwrap();
    // The 4096-byte block stays filed under class 6 while it shrinks to
    // 2048 bytes and gets filed again under class 5.
    allocator.heap.write_free(FIRST_BLOCK, 2048, true);
    allocator.heap.write_used(FIRST_BLOCK + 2048, 2048, false);
    allocator.heap.set_prev_allocated(allocator.heap.epilogue(), true);
    allocator
      .free_list
      .insert(&mut allocator.heap, FreeBlock::at(FIRST_BLOCK));

    assert_eq!(
      violations(&allocator),
      vec![Violation::Duplicate {
        offset: FIRST_BLOCK
      }]
    );
  }

  #[test]
  fn test_stale_prev_allocated_bit() {
    let mut allocator = explicit();
    let _p = allocator.allocate(100).unwrap();
    allocator.heap.set_prev_allocated(136, false);

    assert_eq!(
      violations(&allocator),
      vec![Violation::PrevAllocatedBit {
        offset: 136,
        recorded: false,
        actual: true,
      }]
    );
  }

  #[test]
  fn test_adjacent_free_blocks() {
    let mut allocator = explicit();
    allocator.heap.write_free(FIRST_BLOCK, 2048, true);
    allocator.heap.write_free(FIRST_BLOCK + 2048, 2048, false);

    let found = violations(&allocator);

    assert!(found.contains(&Violation::Uncoalesced {
      first: FIRST_BLOCK,
      second: FIRST_BLOCK + 2048,
    }));
    assert!(found.contains(&Violation::NotListed {
      offset: FIRST_BLOCK + 2048
    }));
  }

  #[test]
  fn test_listed_block_marked_allocated() {
    let mut allocator = explicit();
    let _p = allocator.allocate(100).unwrap();
    allocator.heap.write_used(136, 3984, true);

    let found = violations(&allocator);

    assert!(found.contains(&Violation::NotFree { offset: 136 }));
  }

  #[test]
  fn test_segregated_block_in_wrong_class() {
    let mut allocator: Allocator<SegregatedList> = Allocator::new(Config::default()).unwrap();
    // Shrink the listed 4096-byte block behind the list's back.
    allocator.heap.write_free(FIRST_BLOCK, 2048, true);
    allocator.heap.write_used(FIRST_BLOCK + 2048, 2048, false);
    allocator.heap.set_prev_allocated(allocator.heap.epilogue(), true);

    assert_eq!(
      violations(&allocator),
      vec![Violation::WrongClass {
        offset: FIRST_BLOCK,
        size: 2048,
        class: 6,
        expected: 5,
      }]
    );
  }

  #[test]
  fn test_implicit_heap_checks_clean() {
    let mut allocator: Allocator<ImplicitList> = Allocator::new(Config::default()).unwrap();
    let ptrs: Vec<_> = (1..40).map(|size| allocator.allocate(size * 7).unwrap()).collect();
    for p in ptrs.into_iter().step_by(2) {
      allocator.free(Some(p)).unwrap();
    }

    assert!(allocator.check_heap(0));
  }
}
