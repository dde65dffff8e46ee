use std::io::Read;

use rallocator::{Config, Payload, SegregatedAllocator};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the process with tools like `pmap` or
/// `gdb` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints a payload and the address it maps to.
fn print_alloc(
  allocator: &SegregatedAllocator,
  label: &str,
  size: usize,
  payload: Payload,
) {
  println!(
    "[{label}] {size} bytes at offset {:#x}, address = {:#x}, usable = {}",
    payload.offset(),
    allocator.address(payload),
    allocator.usable_size(payload).unwrap_or(0),
  );
}

fn main() {
  if std::env::var_os("RUST_LOG").is_some() {
    env_logger::init();
    rallocator::enable_logging();
  }

  let Ok(mut allocator) = SegregatedAllocator::new(Config::default()) else {
    eprintln!("failed to set up the heap");
    return;
  };

  let config = allocator.config();
  println!(
    "[start] PID = {}, chunk = {} bytes, heap limit = {} bytes",
    std::process::id(),
    config.chunk_size,
    config.max_heap,
  );
  allocator.check_heap(2);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate a 24-byte block and write into it.
  // --------------------------------------------------------------------
  let Some(first) = allocator.allocate(24) else {
    return;
  };
  println!("\n[1] Allocate 24 bytes");
  print_alloc(&allocator, "1", 24, first);
  if let Some(bytes) = allocator.bytes_mut(first) {
    bytes[..4].copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());
  }
  allocator.check_heap(2);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 1000 bytes behind it.
  // --------------------------------------------------------------------
  let Some(second) = allocator.allocate(1000) else {
    return;
  };
  println!("\n[2] Allocate 1000 bytes");
  print_alloc(&allocator, "2", 1000, second);
  allocator.check_heap(2);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free the first block. Its neighbour is in use, so it stays a hole
  //    of its own.
  // --------------------------------------------------------------------
  if let Err(err) = allocator.free(Some(first)) {
    eprintln!("[3] free failed: {err}");
  }
  println!("\n[3] Freed first block");
  allocator.check_heap(2);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) A 16-byte request fits the hole left by the first block.
  // --------------------------------------------------------------------
  let Some(third) = allocator.allocate(16) else {
    return;
  };
  println!("\n[4] Allocate 16 bytes (check reuse of freed block)");
  print_alloc(&allocator, "4", 16, third);
  println!(
    "[4] third == first? {}",
    if third == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Grow the second block. The free tail behind it is absorbed, so the
  //    payload stays where it is.
  // --------------------------------------------------------------------
  let Some(grown) = allocator.reallocate(Some(second), 2500) else {
    return;
  };
  println!("\n[5] Reallocate second block to 2500 bytes");
  print_alloc(&allocator, "5", 2500, grown);
  println!("[5] moved? {}", grown != second);
  allocator.check_heap(2);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Zeroed allocation larger than the heap: forces growth.
  // --------------------------------------------------------------------
  let before = allocator.heap_size();
  let Some(table) = allocator.zero_allocate(1024, 16) else {
    return;
  };
  println!("\n[6] zero_allocate(1024, 16)");
  print_alloc(&allocator, "6", 1024 * 16, table);
  println!("[6] heap grew from {before} to {} bytes", allocator.heap_size());
  allocator.check_heap(2);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 7) Free everything. All blocks merge back into one.
  // --------------------------------------------------------------------
  for payload in [third, grown, table] {
    if let Err(err) = allocator.free(Some(payload)) {
      eprintln!("[7] free failed: {err}");
    }
  }
  println!("\n[7] Freed everything");
  allocator.check_heap(2);

  println!("\n[8] End of example. Dropping the allocator unmaps the heap.");
}
