/// Rounds `value` up to the heap alignment ([`crate::block::ALIGNMENT`]).
///
/// # Examples
///
/// ```rust
/// use rallocator::align;
///
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::block::ALIGNMENT)
  };
}

/// Rounds `value` up to `align`, which must be a power of two.
///
/// # Examples
///
/// ```rust
/// use rallocator::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(4097, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Same as [`align!`] but returns `None` instead of wrapping around when the
/// rounded value does not fit in a `usize`.
pub fn checked_align(value: usize) -> Option<usize> {
  let mask = crate::block::ALIGNMENT - 1;
  value.checked_add(mask).map(|v| v & !mask)
}
