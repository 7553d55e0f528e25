//! Abstract byte streams with endian-aware primitive codecs.
//!
//! Streams expose `&self` operations and handle their own locking, the same
//! de-mut shape the connection types use; positions and sizes are plain
//! observations. Primitive reads and writes honour the stream's byte order,
//! little-endian unless changed.
#![allow(missing_docs)]

use crate::block::Block;
use crate::plinth_error::PlinthResult;
use crate::text::Text;
use byteorder::ByteOrder as _;
use byteorder::{BigEndian, LittleEndian};

const READ_ALL_CHUNK: usize = 128 * 1024;

/// Serialization order for multi-byte primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
  #[default]
  Little,
  Big,
}

/// Byte-oriented I/O with seek/read/write/flush and a byte order.
///
/// `read_data` returns the number of bytes read, 0 at end-of-stream;
/// `write_data` returns the number of bytes accepted. `seek` returns the
/// resulting position; non-seekable streams return the position unchanged
/// and callers must not rely on repositioning.
pub trait Stream: Send + Sync {
  fn seek(&self, offset: u64) -> u64;
  fn read_data(&self, out: &mut [u8]) -> usize;
  fn write_data(&self, data: &[u8]) -> usize;
  fn flush(&self) {}

  fn pos(&self) -> u64;
  fn size(&self) -> u64;
  fn byte_order(&self) -> ByteOrder;
  fn set_byte_order(&self, order: ByteOrder);

  fn at_end(&self) -> bool {
    self.pos() >= self.size()
  }

  fn read_u8(&self) -> u8 {
    let mut buf = [0u8; 1];
    self.read_data(&mut buf);
    buf[0]
  }

  fn read_i8(&self) -> i8 {
    self.read_u8() as i8
  }

  fn read_u16(&self) -> u16 {
    let mut buf = [0u8; 2];
    self.read_data(&mut buf);
    match self.byte_order() {
      ByteOrder::Little => LittleEndian::read_u16(&buf),
      ByteOrder::Big => BigEndian::read_u16(&buf),
    }
  }

  fn read_i16(&self) -> i16 {
    self.read_u16() as i16
  }

  fn read_u32(&self) -> u32 {
    let mut buf = [0u8; 4];
    self.read_data(&mut buf);
    match self.byte_order() {
      ByteOrder::Little => LittleEndian::read_u32(&buf),
      ByteOrder::Big => BigEndian::read_u32(&buf),
    }
  }

  fn read_i32(&self) -> i32 {
    self.read_u32() as i32
  }

  fn read_u64(&self) -> u64 {
    let mut buf = [0u8; 8];
    self.read_data(&mut buf);
    match self.byte_order() {
      ByteOrder::Little => LittleEndian::read_u64(&buf),
      ByteOrder::Big => BigEndian::read_u64(&buf),
    }
  }

  fn read_i64(&self) -> i64 {
    self.read_u64() as i64
  }

  /// Floats travel as the IEEE-754 bit pattern of the matching width.
  fn read_f32(&self) -> f32 {
    f32::from_bits(self.read_u32())
  }

  fn read_f64(&self) -> f64 {
    f64::from_bits(self.read_u64())
  }

  fn write_u8(&self, value: u8) {
    self.write_data(&[value]);
  }

  fn write_i8(&self, value: i8) {
    self.write_u8(value as u8);
  }

  fn write_u16(&self, value: u16) {
    let mut buf = [0u8; 2];
    match self.byte_order() {
      ByteOrder::Little => LittleEndian::write_u16(&mut buf, value),
      ByteOrder::Big => BigEndian::write_u16(&mut buf, value),
    }
    self.write_data(&buf);
  }

  fn write_i16(&self, value: i16) {
    self.write_u16(value as u16);
  }

  fn write_u32(&self, value: u32) {
    let mut buf = [0u8; 4];
    match self.byte_order() {
      ByteOrder::Little => LittleEndian::write_u32(&mut buf, value),
      ByteOrder::Big => BigEndian::write_u32(&mut buf, value),
    }
    self.write_data(&buf);
  }

  fn write_i32(&self, value: i32) {
    self.write_u32(value as u32);
  }

  fn write_u64(&self, value: u64) {
    let mut buf = [0u8; 8];
    match self.byte_order() {
      ByteOrder::Little => LittleEndian::write_u64(&mut buf, value),
      ByteOrder::Big => BigEndian::write_u64(&mut buf, value),
    }
    self.write_data(&buf);
  }

  fn write_i64(&self, value: i64) {
    self.write_u64(value as u64);
  }

  fn write_f32(&self, value: f32) {
    self.write_u32(value.to_bits());
  }

  fn write_f64(&self, value: f64) {
    self.write_u64(value.to_bits());
  }

  /// Reads up to `size` bytes into a fresh Block.
  fn read_block(&self, size: usize) -> Block {
    let mut data = Block::with_size(size);
    let read = self.read_data(data.data_mut());
    data.truncate(read);
    data
  }

  /// Reads until end-of-stream.
  fn read_all(&self) -> Block {
    let mut data = Block::new();
    loop {
      let chunk = self.read_block(READ_ALL_CHUNK);
      if chunk.is_empty() {
        break;
      }
      data.append(&chunk);
    }
    data
  }

  /// The remaining contents as UTF-8 text.
  fn read_string(&self) -> Text {
    Text::from_utf8_lossy(&self.read_all())
  }

  /// The remaining contents split on newlines.
  fn read_lines(&self) -> Vec<Text> {
    let text = self.read_string();
    text.split("\n").map(Text::from).collect()
  }

  fn write_block(&self, data: &Block) -> usize {
    self.write_data(data.as_slice())
  }
}

/// Hook for objects that can pass through a Stream.
pub trait StreamSerializable {
  fn serialize(&self, stream: &dyn Stream) -> PlinthResult<()>;
  fn deserialize(&mut self, stream: &dyn Stream) -> PlinthResult<()>;
}

/// Serializes `object` into `stream`; returns the number of bytes written.
pub fn write_object(stream: &dyn Stream, object: &dyn StreamSerializable) -> PlinthResult<u64> {
  let start = stream.pos();
  object.serialize(stream)?;
  Ok(stream.pos().saturating_sub(start))
}

/// Restores `object` from `stream`.
pub fn read_object(stream: &dyn Stream, object: &mut dyn StreamSerializable) -> PlinthResult<()> {
  object.deserialize(stream)
}
