use std::cmp;

/// Growable byte buffer shared by the read and write halves of the io loop.
///
/// Data lives in `memory[position..end]`; `space()` hands out the writable
/// tail. `shift()` moves pending data back to the start of the allocation
/// so the tail can be reused without growing.
#[derive(Debug)]
pub(crate) struct Buffer {
  memory:   Vec<u8>,
  capacity: usize,
  position: usize,
  end:      usize,
}

impl Buffer {
  pub(crate) fn with_capacity(capacity: usize) -> Buffer {
    Buffer {
      memory:   vec![0; capacity],
      capacity,
      position: 0,
      end:      0,
    }
  }

  pub(crate) fn grow(&mut self, new_size: usize) -> bool {
    if self.capacity >= new_size {
      return false;
    }
    self.memory.resize(new_size, 0);
    self.capacity = new_size;
    true
  }

  pub(crate) fn available_data(&self) -> usize {
    self.end - self.position
  }

  pub(crate) fn available_space(&self) -> usize {
    self.capacity - self.end
  }

  pub(crate) fn consume(&mut self, count: usize) -> usize {
    let cnt = cmp::min(count, self.available_data());
    self.position += cnt;
    cnt
  }

  pub(crate) fn fill(&mut self, count: usize) -> usize {
    let cnt = cmp::min(count, self.available_space());
    self.end += cnt;
    cnt
  }

  pub(crate) fn data(&self) -> &[u8] {
    &self.memory[self.position..self.end]
  }

  pub(crate) fn space(&mut self) -> &mut [u8] {
    let end = self.end;
    &mut self.memory[end..]
  }

  pub(crate) fn shift(&mut self) {
    if self.position > 0 {
      let (position, end) = (self.position, self.end);
      self.memory.copy_within(position..end, 0);
      self.position = 0;
      self.end = end - position;
    }
  }

  pub(crate) fn shift_unless_available(&mut self, size: usize) {
    if self.available_space() < size {
      self.shift();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_consume_shift() {
    let mut buffer = Buffer::with_capacity(8);
    assert_eq!(buffer.available_space(), 8);

    buffer.space()[..5].copy_from_slice(b"hello");
    assert_eq!(buffer.fill(5), 5);
    assert_eq!(buffer.available_data(), 5);
    assert_eq!(buffer.data(), b"hello");

    assert_eq!(buffer.consume(2), 2);
    assert_eq!(buffer.data(), b"llo");
    assert_eq!(buffer.available_space(), 3);

    buffer.shift_unless_available(5);
    assert_eq!(buffer.available_space(), 5);
    assert_eq!(buffer.data(), b"llo");
  }

  #[test]
  fn grow_keeps_data() {
    let mut buffer = Buffer::with_capacity(4);
    buffer.space()[..4].copy_from_slice(b"abcd");
    buffer.fill(4);
    assert!(buffer.grow(16));
    assert!(!buffer.grow(8));
    assert_eq!(buffer.data(), b"abcd");
    assert_eq!(buffer.available_space(), 12);
  }

  #[test]
  fn consume_is_capped() {
    let mut buffer = Buffer::with_capacity(4);
    buffer.fill(2);
    assert_eq!(buffer.consume(10), 2);
    assert_eq!(buffer.available_data(), 0);
  }
}
