//! In-memory stream over a Block.
//!
//! Besides the plain [`Stream`] interface, a Buffer can act as a byte queue
//! between threads: `append` adds at the end without touching the read
//! position, `take_all` drains everything unread, and `wait_data` blocks on
//! the data-available condition until a writer extends the contents.
#![allow(missing_docs)]

use crate::block::Block;
use crate::stream::{ByteOrder, Stream};
use crate::sync::Condition;
use crate::util::recover_poison;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
  ReadWrite,
  ReadOnly,
}

#[derive(Debug)]
struct BufferInner {
  block: Block,
  pos: usize,
  order: ByteOrder,
  mode: BufferMode,
  open: bool,
}

/// In-memory Stream backed by an owned Block.
#[derive(Debug)]
pub struct Buffer {
  inner: Mutex<BufferInner>,
  data_available: Condition,
}

impl Default for Buffer {
  fn default() -> Self {
    Buffer::new()
  }
}

impl Buffer {
  /// A closed Buffer; reads and writes do nothing until opened.
  pub fn new() -> Buffer {
    Buffer {
      inner: Mutex::new(BufferInner {
        block: Block::new(),
        pos: 0,
        order: ByteOrder::Little,
        mode: BufferMode::ReadWrite,
        open: false,
      }),
      data_available: Condition::new(),
    }
  }

  /// Opens empty and read-write.
  pub fn open_empty(&self) -> bool {
    self.open_with(Block::new(), BufferMode::ReadWrite)
  }

  /// Opens read-only over the caller's Block without copying; the storage
  /// is shared until someone writes to their handle.
  pub fn open(&self, data: &Block) -> bool {
    self.open_with(data.clone(), BufferMode::ReadOnly)
  }

  /// Takes ownership of `data`, read-write.
  pub fn open_data(&self, data: Block) -> bool {
    self.open_with(data, BufferMode::ReadWrite)
  }

  fn open_with(&self, block: Block, mode: BufferMode) -> bool {
    let mut inner = recover_poison(self.inner.lock());
    if inner.open {
      return false;
    }
    inner.block = block;
    inner.pos = 0;
    inner.mode = mode;
    inner.open = true;
    true
  }

  pub fn close(&self) {
    let mut inner = recover_poison(self.inner.lock());
    inner.open = false;
    inner.block = Block::new();
    inner.pos = 0;
    // Unstick anyone waiting for data that will never come.
    self.data_available.broadcast();
  }

  pub fn is_open(&self) -> bool {
    recover_poison(self.inner.lock()).open
  }

  pub fn mode(&self) -> BufferMode {
    recover_poison(self.inner.lock()).mode
  }

  /// A shared handle onto the current contents.
  pub fn data(&self) -> Block {
    recover_poison(self.inner.lock()).block.clone()
  }

  /// Drops the contents and rewinds.
  pub fn clear(&self) {
    let mut inner = recover_poison(self.inner.lock());
    inner.block = Block::new();
    inner.pos = 0;
  }

  /// Number of unread bytes between the position and the end.
  pub fn pending(&self) -> usize {
    let inner = recover_poison(self.inner.lock());
    inner.block.size() - inner.pos.min(inner.block.size())
  }

  /// True when everything written has been consumed.
  pub fn is_empty(&self) -> bool {
    self.pending() == 0
  }

  /// Appends at the end without moving the read position, then signals the
  /// data-available condition.
  pub fn append(&self, data: &[u8]) {
    if data.is_empty() {
      return;
    }
    let mut inner = recover_poison(self.inner.lock());
    if !inner.open || inner.mode == BufferMode::ReadOnly {
      return;
    }
    inner.block.append_data(data);
    // Signalled with the lock held so a waiter between its pending check
    // and the actual wait cannot miss the wakeup.
    self.data_available.broadcast();
  }

  /// Drains every unread byte. When everything has been consumed the
  /// storage is released so a long-lived queue does not grow unboundedly.
  pub fn take_all(&self) -> Block {
    let mut inner = recover_poison(self.inner.lock());
    let pos = inner.pos.min(inner.block.size());
    let taken = inner.block.mid(pos, inner.block.size() - pos);
    inner.block = Block::new();
    inner.pos = 0;
    taken
  }

  /// Like [`Buffer::take_all`], but waits on the data-available condition
  /// when nothing is pending. A broadcast without data (or `deadline`
  /// passing) returns an empty Block so callers can re-check their state.
  pub fn take_all_or_wait(&self, deadline: Option<Instant>) -> Block {
    {
      let inner = recover_poison(self.inner.lock());
      let pending = inner.block.size() - inner.pos.min(inner.block.size());
      if pending == 0 && inner.open {
        match deadline {
          Some(deadline) => drop(self.data_available.timed_wait(inner, deadline)),
          None => drop(self.data_available.wait(inner)),
        }
      }
    }
    self.take_all()
  }

  /// Blocks until the contents grow past the read position, the Buffer is
  /// closed, or `deadline` passes. True when data is pending on return.
  pub fn wait_data(&self, deadline: Option<Instant>) -> bool {
    let mut inner = recover_poison(self.inner.lock());
    loop {
      let pending = inner.block.size() - inner.pos.min(inner.block.size());
      if pending > 0 || !inner.open {
        return pending > 0;
      }
      match deadline {
        Some(deadline) => {
          let (returned, timed_out) = self.data_available.timed_wait(inner, deadline);
          inner = returned;
          if timed_out {
            let pending = inner.block.size() - inner.pos.min(inner.block.size());
            return pending > 0;
          }
        }
        None => inner = self.data_available.wait(inner),
      }
    }
  }

  /// Wakes every thread blocked on the data-available condition.
  pub fn signal_data(&self) {
    let _inner = recover_poison(self.inner.lock());
    self.data_available.broadcast();
  }

  /// Releases the storage when everything has been consumed, so a queue
  /// that is read as fast as it is written stays small.
  pub fn compact(&self) {
    let mut inner = recover_poison(self.inner.lock());
    if inner.pos >= inner.block.size() && !inner.block.is_empty() {
      inner.block = Block::new();
      inner.pos = 0;
    }
  }
}

impl Stream for Buffer {
  fn seek(&self, offset: u64) -> u64 {
    let mut inner = recover_poison(self.inner.lock());
    inner.pos = (offset as usize).min(inner.block.size());
    inner.pos as u64
  }

  fn read_data(&self, out: &mut [u8]) -> usize {
    let mut inner = recover_poison(self.inner.lock());
    if !inner.open {
      return 0;
    }
    let pos = inner.pos.min(inner.block.size());
    let available = inner.block.size() - pos;
    let count = available.min(out.len());
    if count > 0 {
      let src = &inner.block.as_slice()[pos..pos + count];
      let Some(dst) = out.get_mut(..count) else {
        return 0;
      };
      dst.copy_from_slice(src);
      inner.pos = pos + count;
    }
    count
  }

  fn write_data(&self, data: &[u8]) -> usize {
    let mut inner = recover_poison(self.inner.lock());
    if !inner.open || inner.mode == BufferMode::ReadOnly {
      return 0;
    }
    let pos = inner.pos;
    let end = pos + data.len();
    let grew = end > inner.block.size();
    if grew {
      inner.block.resize(end);
    }
    if let Some(dst) = inner.block.data_mut().get_mut(pos..end) {
      dst.copy_from_slice(data);
    }
    inner.pos = end;
    if grew {
      self.data_available.broadcast();
    }
    data.len()
  }

  fn pos(&self) -> u64 {
    recover_poison(self.inner.lock()).pos as u64
  }

  fn size(&self) -> u64 {
    recover_poison(self.inner.lock()).block.size() as u64
  }

  fn byte_order(&self) -> ByteOrder {
    recover_poison(self.inner.lock()).order
  }

  fn set_byte_order(&self, order: ByteOrder) {
    recover_poison(self.inner.lock()).order = order;
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn closed_buffer_ignores_io() {
    let buffer = Buffer::new();
    assert_eq!(buffer.write_data(b"xyz"), 0);
    let mut out = [0u8; 4];
    assert_eq!(buffer.read_data(&mut out), 0);
  }

  #[test]
  fn read_only_buffer_shares_storage() {
    let source = Block::from("payload");
    let buffer = Buffer::new();
    assert!(buffer.open(&source));
    assert!(buffer.data().shares_storage(&source));
    assert_eq!(buffer.write_data(b"nope"), 0);
    assert_eq!(buffer.read_all().as_slice(), b"payload");
  }

  #[test]
  fn append_and_take_all() {
    let buffer = Buffer::new();
    buffer.open_empty();
    buffer.append(b"one");
    buffer.append(b"two");
    assert_eq!(buffer.pending(), 6);
    assert_eq!(buffer.take_all().as_slice(), b"onetwo");
    assert!(buffer.is_empty());
  }

  #[test]
  fn write_moves_pos_and_size() {
    let buffer = Buffer::new();
    buffer.open_empty();
    buffer.write_data(b"abcdef");
    assert_eq!(buffer.pos(), 6);
    assert_eq!(buffer.size(), 6);
    buffer.seek(2);
    let mut out = [0u8; 2];
    assert_eq!(buffer.read_data(&mut out), 2);
    assert_eq!(&out, b"cd");
  }
}
