//! Error types.
//!
//! Exhaustion and misuse are [`AllocError`]s. Heap corruption found by the
//! checker is a [`Violation`]; those are programming faults, not something a
//! caller is expected to recover from.

use thiserror::Error;

/// Allocation and region errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
  #[error("heap region exhausted (requested {requested} bytes, {available} available)")]
  Exhausted { requested: usize, available: usize },

  #[error("failed to reserve {size} bytes for the heap region (errno {errno})")]
  Reserve { size: usize, errno: i32 },

  #[error("pointer {offset:#x} was not returned by this allocator")]
  InvalidPointer { offset: usize },

  #[error("double free of payload {offset:#x}")]
  DoubleFree { offset: usize },

  #[error("invalid configuration: {0}")]
  Config(String),
}

/// One broken heap invariant, reported by [`crate::Allocator::check`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
  #[error("prologue block at {offset:#x} is damaged")]
  Prologue { offset: usize },

  #[error("epilogue at {offset:#x} is damaged (header {header:#x})")]
  Epilogue { offset: usize, header: u64 },

  #[error("block at {offset:#x} has bad size {size}")]
  BadSize { offset: usize, size: usize },

  #[error("block at {offset:#x} ({size} bytes) runs past the heap end {heap_end:#x}")]
  OutOfBounds {
    offset: usize,
    size: usize,
    heap_end: usize,
  },

  #[error("free block at {offset:#x} has header {header:#x} but footer {footer:#x}")]
  FooterMismatch {
    offset: usize,
    header: u64,
    footer: u64,
  },

  #[error("block at {offset:#x} says previous allocated = {recorded}, it is {actual}")]
  PrevAllocatedBit {
    offset: usize,
    recorded: bool,
    actual: bool,
  },

  #[error("free blocks at {first:#x} and {second:#x} are adjacent but not coalesced")]
  Uncoalesced { first: usize, second: usize },

  #[error("free block at {offset:#x} is missing from the free list")]
  NotListed { offset: usize },

  #[error("free list entry {offset:#x} is not a free block")]
  NotFree { offset: usize },

  #[error("free list entry {offset:#x} appears more than once")]
  Duplicate { offset: usize },

  #[error("free list link {link:#x} from {from:#x} points outside the heap")]
  LinkOutOfBounds { from: usize, link: usize },

  #[error("back link of {offset:#x} is {found:?}, expected {expected:?}")]
  BackLink {
    offset: usize,
    expected: Option<usize>,
    found: Option<usize>,
  },

  #[error("free list class {class} does not terminate")]
  Cycle { class: usize },

  #[error("free block at {offset:#x} ({size} bytes) filed under class {class}, belongs in {expected}")]
  WrongClass {
    offset: usize,
    size: usize,
    class: usize,
    expected: usize,
  },

  #[error("free list class {class} is not sorted at {offset:#x}")]
  Unsorted { class: usize, offset: usize },
}
