#![allow(dead_code, unused_macros)]

use ctor::ctor;
use rallocator::{Allocator, Config, FreeList, MemRegion, Payload};

/// Routes allocator logs to the test harness. Run with `RUST_LOG=trace` to
/// see every operation.
#[ctor]
static INIT: () = {
  let _ = env_logger::builder().is_test(true).try_init();
  rallocator::enable_logging();
};

pub fn allocator<F: FreeList + Default>() -> Allocator<F, MemRegion> {
  allocator_with(Config::default())
}

pub fn allocator_with<F: FreeList + Default>(config: Config) -> Allocator<F, MemRegion> {
  Allocator::new(config).unwrap()
}

/// Fills the payload with a pattern derived from `seed`.
pub fn stamp<F: FreeList>(
  allocator: &mut Allocator<F, MemRegion>,
  payload: Payload,
  seed: u8,
) {
  for (i, byte) in allocator.bytes_mut(payload).unwrap().iter_mut().enumerate() {
    *byte = seed.wrapping_add(i as u8);
  }
}

/// True if the first `len` payload bytes still carry the pattern from
/// [`stamp`].
pub fn stamped<F: FreeList>(
  allocator: &Allocator<F, MemRegion>,
  payload: Payload,
  seed: u8,
  len: usize,
) -> bool {
  allocator.bytes(payload).unwrap()[..len]
    .iter()
    .enumerate()
    .all(|(i, &byte)| byte == seed.wrapping_add(i as u8))
}

/// Runs a generic test body once per free list strategy.
macro_rules! for_each_strategy {
  ($name:ident) => {
    mod $name {
      use super::*;

      #[test]
      fn implicit() {
        $name::<rallocator::ImplicitList>();
      }

      #[test]
      fn explicit() {
        $name::<rallocator::ExplicitList>();
      }

      #[test]
      fn segregated() {
        $name::<rallocator::SegregatedList>();
      }
    }
  };
}
