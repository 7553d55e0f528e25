//! Byte buffer with copy-on-write semantics.
//!
//! A [`Block`] is a cheap handle onto shared storage. Cloning a Block is O(1)
//! and shares the backing bytes; any mutation first detaches, so clones never
//! observe each other's writes. The backing storage always keeps one NUL byte
//! past the logical end, so the contents can be handed to C-string consumers
//! without copying.
#![allow(missing_docs)]

use crate::plinth_error::{PlinthError, PlinthResult};
use crate::range::Range;
use crate::util;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use std::fmt;
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::sync::{Arc, LazyLock};

/// Smallest storage allocation; growth doubles from here.
const MIN_ALLOC: usize = 16;

#[derive(Debug)]
struct BlockData {
  // Invariant: never empty, last byte is always NUL. Logical size is
  // bytes.len() - 1 and the allocation size is bytes.capacity().
  bytes: Vec<u8>,
}

// All default-constructed and cleared Blocks share this storage. The static
// holds one reference forever, so mutators always see it as shared and
// detach before touching it.
static EMPTY: LazyLock<Arc<BlockData>> = LazyLock::new(|| Arc::new(BlockData { bytes: vec![0] }));

fn grown_capacity(current: usize, needed: usize) -> usize {
  let mut cap = current.max(MIN_ALLOC);
  while cap < needed {
    cap *= 2;
  }
  cap
}

/// Reference-counted byte buffer with copy-on-write mutation.
#[derive(Clone)]
pub struct Block {
  data: Arc<BlockData>,
}

impl Block {
  /// An empty Block sharing the global empty storage.
  pub fn new() -> Block {
    Block { data: Arc::clone(&EMPTY) }
  }

  /// A zero-filled Block of `size` bytes.
  pub fn with_size(size: usize) -> Block {
    if size == 0 {
      return Block::new();
    }
    let mut bytes = Vec::with_capacity(grown_capacity(0, size + 1));
    bytes.resize(size + 1, 0);
    Block { data: Arc::new(BlockData { bytes }) }
  }

  /// Copies `data` into a new Block.
  pub fn from_data(data: &[u8]) -> Block {
    if data.is_empty() {
      return Block::new();
    }
    let mut bytes = Vec::with_capacity(grown_capacity(0, data.len() + 1));
    bytes.extend_from_slice(data);
    bytes.push(0);
    Block { data: Arc::new(BlockData { bytes }) }
  }

  /// Builds a Block from formatted text, the typed replacement for a
  /// printf-style constructor.
  pub fn from_fmt(args: fmt::Arguments<'_>) -> Block {
    let mut block = Block::new();
    block.set_fmt(args);
    block
  }

  pub fn size(&self) -> usize {
    self.data.bytes.len() - 1
  }

  pub fn is_empty(&self) -> bool {
    self.size() == 0
  }

  /// The allocation size of the backing storage. Always at least
  /// `size() + 1` to cover the trailing NUL.
  pub fn alloc_size(&self) -> usize {
    self.data.bytes.capacity()
  }

  /// The byte at `pos`. Out-of-range positions are a caller error.
  pub fn at(&self, pos: usize) -> u8 {
    assert!(pos < self.size(), "Block::at past the end");
    self.data.bytes[pos]
  }

  pub fn front(&self) -> Option<u8> {
    self.as_slice().first().copied()
  }

  pub fn back(&self) -> Option<u8> {
    self.as_slice().last().copied()
  }

  /// The contents without the trailing NUL. Never detaches.
  pub fn as_slice(&self) -> &[u8] {
    let bytes = &self.data.bytes;
    bytes.get(..bytes.len() - 1).unwrap_or_default()
  }

  /// The contents including the guaranteed trailing NUL byte.
  pub fn as_slice_with_nul(&self) -> &[u8] {
    &self.data.bytes
  }

  /// True when both handles point at the same backing storage.
  pub fn shares_storage(&self, other: &Block) -> bool {
    Arc::ptr_eq(&self.data, &other.data)
  }

  /// Copies out `count` bytes starting at `start`, clamped to the contents.
  pub fn mid(&self, start: usize, count: usize) -> Block {
    if start >= self.size() {
      return Block::new();
    }
    let end = start.saturating_add(count).min(self.size());
    Block::from_data(&self.as_slice()[start..end])
  }

  pub fn mid_range(&self, range: &Range) -> Block {
    let clamped = range.clamp_to(&Range::new(0, self.size()));
    self.mid(clamped.start, clamped.size())
  }

  /// Concatenation into a fresh Block; neither input is modified.
  pub fn concat(&self, other: &Block) -> Block {
    let mut cat = Block::with_size(0);
    cat.reserve(self.size() + other.size());
    cat.append_data(self.as_slice());
    cat.append_data(other.as_slice());
    cat
  }

  fn detach(&mut self, min_alloc: usize) {
    if Arc::strong_count(&self.data) > 1 {
      let src = &self.data.bytes;
      let mut bytes = Vec::with_capacity(grown_capacity(0, src.len().max(min_alloc)));
      bytes.extend_from_slice(src);
      self.data = Arc::new(BlockData { bytes });
    }
  }

  fn bytes_mut(&mut self) -> &mut Vec<u8> {
    self.detach(0);
    &mut util::unwrap_some(Arc::get_mut(&mut self.data)).bytes
  }

  /// Mutable access to the contents. Detaches from shared storage first.
  pub fn data_mut(&mut self) -> &mut [u8] {
    let bytes = self.bytes_mut();
    let size = bytes.len() - 1;
    bytes.get_mut(..size).unwrap_or_default()
  }

  /// Guarantees the allocation can hold `size` bytes plus the NUL without
  /// reallocating. The allocation at least doubles when it grows.
  pub fn reserve(&mut self, size: usize) {
    self.detach(size + 1);
    let bytes = self.bytes_mut();
    let cap = grown_capacity(bytes.capacity(), size + 1);
    if cap > bytes.capacity() {
      bytes.reserve_exact(cap - bytes.len());
    }
  }

  /// Grows (zero-filling) or shrinks to exactly `size` bytes.
  pub fn resize(&mut self, size: usize) {
    self.reserve(size);
    let bytes = self.bytes_mut();
    bytes.resize(size + 1, 0);
    *util::unwrap_some(bytes.last_mut()) = 0;
  }

  /// Shortens to at most `size` bytes; never grows.
  pub fn truncate(&mut self, size: usize) {
    if size >= self.size() {
      return;
    }
    let bytes = self.bytes_mut();
    bytes.truncate(size + 1);
    *util::unwrap_some(bytes.last_mut()) = 0;
  }

  /// Releases the storage and returns to the shared empty state.
  pub fn clear(&mut self) {
    self.data = Arc::clone(&EMPTY);
  }

  pub fn fill(&mut self, value: u8) {
    for byte in self.data_mut() {
      *byte = value;
    }
  }

  pub fn push_back(&mut self, value: u8) {
    self.reserve(self.size() + 1);
    let bytes = self.bytes_mut();
    *util::unwrap_some(bytes.last_mut()) = value;
    bytes.push(0);
  }

  pub fn pop_back(&mut self) {
    if self.is_empty() {
      return;
    }
    let bytes = self.bytes_mut();
    bytes.pop();
    *util::unwrap_some(bytes.last_mut()) = 0;
  }

  /// Shares the other Block's storage, releasing this handle's own.
  pub fn assign(&mut self, other: &Block) {
    self.data = Arc::clone(&other.data);
  }

  pub fn set_byte(&mut self, pos: usize, value: u8) {
    assert!(pos < self.size(), "Block::set_byte past the end");
    self.data_mut()[pos] = value;
  }

  pub fn set_data(&mut self, data: &[u8]) {
    self.reserve(data.len());
    let bytes = self.bytes_mut();
    bytes.clear();
    bytes.extend_from_slice(data);
    bytes.push(0);
  }

  /// Replaces the contents with formatted text.
  pub fn set_fmt(&mut self, args: fmt::Arguments<'_>) {
    let mut text = String::new();
    util::unwrap_ok(text.write_fmt(args));
    self.set_data(text.as_bytes());
  }

  pub fn append(&mut self, other: &Block) {
    if self.is_empty() {
      // Appending to an empty handle can share the other's storage outright.
      self.assign(other);
      return;
    }
    // A handle may be appended to itself; the slice borrow would alias the
    // mutation, so take a cheap shared copy first.
    let other = other.clone();
    self.append_data(other.as_slice());
  }

  pub fn append_data(&mut self, data: &[u8]) {
    self.reserve(self.size() + data.len());
    let bytes = self.bytes_mut();
    bytes.pop();
    bytes.extend_from_slice(data);
    bytes.push(0);
  }

  /// Inserts `data` before position `at`; `at` may equal `size()`.
  pub fn insert_data(&mut self, at: usize, data: &[u8]) {
    assert!(at <= self.size(), "Block::insert_data past the end");
    self.reserve(self.size() + data.len());
    let bytes = self.bytes_mut();
    let _ = bytes.splice(at..at, data.iter().copied());
  }

  /// Removes `count` bytes starting at `start`, clamped to the contents.
  pub fn remove(&mut self, start: usize, count: usize) {
    let size = self.size();
    assert!(start <= size, "Block::remove past the end");
    let end = start.saturating_add(count).min(size);
    if start == end {
      return;
    }
    self.bytes_mut().drain(start..end);
  }

  /// Byte-wise comparison against a raw slice; a proper prefix orders before
  /// the longer sequence.
  pub fn cmp_data(&self, data: &[u8]) -> std::cmp::Ordering {
    self.as_slice().cmp(data)
  }

  /// ASCII-case-insensitive comparison.
  pub fn cmp_case(&self, other: &Block) -> std::cmp::Ordering {
    let a = self.as_slice().iter().map(u8::to_ascii_lowercase);
    let b = other.as_slice().iter().map(u8::to_ascii_lowercase);
    a.cmp(b)
  }

  pub fn crc32(&self) -> u32 {
    crc32fast::hash(self.as_slice())
  }

  pub fn md5(&self) -> [u8; 16] {
    Md5::digest(self.as_slice()).into()
  }

  /// Deflates with the default compression level.
  pub fn compress(&self) -> PlinthResult<Block> {
    self.compress_level(6)
  }

  /// Deflates the contents into a zlib stream. `level` is 0..=9.
  pub fn compress_level(&self, level: u32) -> PlinthResult<Block> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder
      .write_all(self.as_slice())
      .and_then(|()| encoder.finish())
      .map(|out| Block::from_data(&out))
      .map_err(|err| PlinthError::Compression(err.to_string()))
  }

  /// Inflates a zlib stream produced by [`Block::compress`].
  pub fn decompress(&self) -> PlinthResult<Block> {
    let mut decoder = ZlibDecoder::new(self.as_slice());
    let mut out = Vec::new();
    decoder
      .read_to_end(&mut out)
      .map(|_| Block::from_data(&out))
      .map_err(|err| PlinthError::Compression(err.to_string()))
  }
}

impl Default for Block {
  fn default() -> Self {
    Block::new()
  }
}

impl From<&[u8]> for Block {
  fn from(value: &[u8]) -> Self {
    Block::from_data(value)
  }
}

impl From<&str> for Block {
  fn from(value: &str) -> Self {
    Block::from_data(value.as_bytes())
  }
}

impl From<Vec<u8>> for Block {
  fn from(mut value: Vec<u8>) -> Self {
    if value.is_empty() {
      return Block::new();
    }
    value.push(0);
    Block { data: Arc::new(BlockData { bytes: value }) }
  }
}

impl AsRef<[u8]> for Block {
  fn as_ref(&self) -> &[u8] {
    self.as_slice()
  }
}

impl PartialEq for Block {
  fn eq(&self, other: &Self) -> bool {
    self.shares_storage(other) || self.as_slice() == other.as_slice()
  }
}

impl Eq for Block {}

impl PartialOrd for Block {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Block {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.as_slice().cmp(other.as_slice())
  }
}

impl std::hash::Hash for Block {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    self.as_slice().hash(state);
  }
}

impl fmt::Debug for Block {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Block[{}]\"", self.size())?;
    for chunk in self.as_slice().escape_ascii() {
      f.write_char(char::from(chunk))?;
    }
    f.write_char('"')
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn empty_blocks_share_the_singleton() {
    let a = Block::new();
    let b = Block::default();
    assert!(a.shares_storage(&b));
    assert_eq!(a.as_slice_with_nul(), &[0]);
  }

  #[test]
  fn detach_on_write() {
    let mut a = Block::from("Hello");
    let b = a.clone();
    assert!(a.shares_storage(&b));
    a.append_data(b" World");
    assert!(!a.shares_storage(&b));
    assert_eq!(a.as_slice(), b"Hello World");
    assert_eq!(b.as_slice(), b"Hello");
  }

  #[test]
  fn growth_is_power_of_two() {
    let mut b = Block::new();
    for i in 0..100u8 {
      b.push_back(i);
    }
    assert_eq!(b.size(), 100);
    assert!(b.alloc_size() >= 101);
    assert!(b.alloc_size().is_power_of_two());
    assert_eq!(b.as_slice_with_nul()[100], 0);
  }

  #[test]
  fn insert_and_remove() {
    let mut b = Block::from("HelloWorld");
    b.insert_data(5, b", ");
    assert_eq!(b.as_slice(), b"Hello, World");
    b.remove(5, 2);
    assert_eq!(b.as_slice(), b"HelloWorld");
    b.remove(5, 5000);
    assert_eq!(b.as_slice(), b"Hello");
  }

  #[test]
  fn self_append() {
    let mut b = Block::from("ab");
    let same = b.clone();
    b.append(&same);
    b.append(&b.clone());
    assert_eq!(b.as_slice(), b"abababab");
  }

  #[test]
  fn prefix_ordering() {
    let a = Block::from("abc");
    let b = Block::from("abcd");
    assert!(a < b);
    assert_eq!(a.cmp_data(b"abc"), std::cmp::Ordering::Equal);
  }

  #[test]
  fn round_trip_compression() {
    let payload = Block::from_data(&[7u8; 4096]);
    let packed = payload.compress_level(9).expect("compress");
    assert!(packed.size() < payload.size());
    let unpacked = packed.decompress().expect("decompress");
    assert_eq!(unpacked, payload);
  }
}
