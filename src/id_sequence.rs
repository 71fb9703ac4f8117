use parking_lot::Mutex;

use std::{ops::AddAssign, sync::Arc};

/// Shared monotonic counter handing out wire identifiers.
#[derive(Clone, Debug, Default)]
pub(crate) struct IdSequence<T> {
  allow_zero: bool,
  id:         Arc<Mutex<T>>,
}

impl<T: Copy + Default + AddAssign<T> + PartialEq + From<u8>> IdSequence<T> {
  pub(crate) fn new(allow_zero: bool) -> IdSequence<T> {
    IdSequence {
      allow_zero,
      id: Arc::new(Mutex::new(T::default())),
    }
  }

  /// The identifier the next call to `next` will return.
  pub(crate) fn current(&self) -> T {
    let mut id = self.id.lock();
    if !self.allow_zero && *id == 0.into() {
      *id += 1.into();
    }
    *id
  }

  pub(crate) fn next(&self) -> T {
    let mut id = self.id.lock();
    if !self.allow_zero && *id == 0.into() {
      *id += 1.into();
    }
    let current = *id;
    *id += 1.into();
    current
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn skips_zero_unless_allowed() {
    let sequence = IdSequence::<u64>::new(false);
    assert_eq!(sequence.current(), 1);
    assert_eq!(sequence.next(), 1);
    assert_eq!(sequence.next(), 2);
    assert_eq!(sequence.current(), 3);

    let sequence = IdSequence::<u64>::new(true);
    assert_eq!(sequence.next(), 0);
    assert_eq!(sequence.next(), 1);
  }

  #[test]
  fn clones_share_the_counter() {
    let sequence = IdSequence::<u64>::new(false);
    let other = sequence.clone();
    assert_eq!(sequence.next(), 1);
    assert_eq!(other.next(), 2);
  }
}
