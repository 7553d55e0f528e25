use plinth::{
  read_object, write_object, Block, Buffer, ByteOrder, PlinthResult, Stream, StreamSerializable,
};

#[test]
fn little_endian_layout() {
  let buffer = Buffer::new();
  buffer.open_empty();
  buffer.write_u16(0x0123);
  buffer.write_u32(0x0123_4567);
  buffer.write_u64(0x0123_4567_89ab_cdef);
  let expected: [u8; 14] = [
    0x23, 0x01, 0x67, 0x45, 0x23, 0x01, 0xEF, 0xCD, 0xAB, 0x89, 0x67, 0x45, 0x23, 0x01,
  ];
  assert_eq!(buffer.data().as_slice(), &expected);
}

#[test]
fn big_endian_layout() {
  let buffer = Buffer::new();
  buffer.open_empty();
  buffer.set_byte_order(ByteOrder::Big);
  buffer.write_u16(0x0123);
  buffer.write_u32(0x0123_4567);
  buffer.write_u64(0x0123_4567_89ab_cdef);
  let expected: [u8; 14] = [
    0x01, 0x23, 0x01, 0x23, 0x45, 0x67, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF,
  ];
  assert_eq!(buffer.data().as_slice(), &expected);
}

#[test]
fn integers_and_floats_round_trip_in_both_orders() {
  for order in [ByteOrder::Little, ByteOrder::Big] {
    let buffer = Buffer::new();
    buffer.open_empty();
    buffer.set_byte_order(order);
    buffer.write_i16(-1234);
    buffer.write_i32(-7);
    buffer.write_i64(i64::MIN);
    buffer.write_f32(1.5);
    buffer.write_f64(-0.25);
    buffer.write_u8(0xFE);
    buffer.seek(0);
    assert_eq!(buffer.read_i16(), -1234);
    assert_eq!(buffer.read_i32(), -7);
    assert_eq!(buffer.read_i64(), i64::MIN);
    assert_eq!(buffer.read_f32(), 1.5);
    assert_eq!(buffer.read_f64(), -0.25);
    assert_eq!(buffer.read_u8(), 0xFE);
    assert!(buffer.at_end());
  }
}

#[test]
fn floats_serialize_as_bit_patterns() {
  let buffer = Buffer::new();
  buffer.open_empty();
  buffer.write_f32(1.0);
  assert_eq!(buffer.data().as_slice(), &[0x00, 0x00, 0x80, 0x3F]);
}

#[test]
fn read_past_the_end_returns_zero() {
  let buffer = Buffer::new();
  buffer.open_data(Block::from("ab"));
  let mut out = [0u8; 8];
  assert_eq!(buffer.read_data(&mut out), 2);
  assert_eq!(buffer.read_data(&mut out), 0);
  assert_eq!(buffer.read_u8(), 0);
}

#[test]
fn size_tracks_the_high_water_mark() {
  let buffer = Buffer::new();
  buffer.open_empty();
  buffer.write_data(b"12345678");
  buffer.seek(2);
  assert_eq!(buffer.size(), 8);
  buffer.write_data(b"xx");
  assert_eq!(buffer.size(), 8);
  assert_eq!(buffer.pos(), 4);
  let rest = buffer.read_all();
  assert_eq!(rest.as_slice(), b"5678");
}

#[test]
fn read_lines_splits_on_newlines() {
  let buffer = Buffer::new();
  buffer.open_data(Block::from("first\nsecond\n\nfourth\n"));
  let lines = buffer.read_lines();
  let strs: Vec<&str> = lines.iter().map(|line| line.as_str()).collect();
  assert_eq!(strs, vec!["first", "second", "", "fourth"]);
}

#[test]
fn read_string_returns_the_remainder() {
  let buffer = Buffer::new();
  buffer.open_data(Block::from("head|tail"));
  buffer.seek(5);
  assert_eq!(buffer.read_string().as_str(), "tail");
}

struct Record {
  id: u32,
  payload: Block,
}

impl StreamSerializable for Record {
  fn serialize(&self, stream: &dyn Stream) -> PlinthResult<()> {
    stream.write_u32(self.id);
    stream.write_u32(self.payload.size() as u32);
    stream.write_block(&self.payload);
    Ok(())
  }

  fn deserialize(&mut self, stream: &dyn Stream) -> PlinthResult<()> {
    self.id = stream.read_u32();
    let size = stream.read_u32() as usize;
    self.payload = stream.read_block(size);
    Ok(())
  }
}

#[test]
fn objects_pass_through_streams() {
  let buffer = Buffer::new();
  buffer.open_empty();
  let out = Record { id: 42, payload: Block::from("record payload") };
  let written = write_object(&buffer, &out).expect("serialize");
  assert_eq!(written, buffer.size());

  buffer.seek(0);
  let mut read_back = Record { id: 0, payload: Block::new() };
  read_object(&buffer, &mut read_back).expect("deserialize");
  assert_eq!(read_back.id, 42);
  assert_eq!(read_back.payload, out.payload);
}
