use plinth::Block;

#[test]
fn copy_on_write_leaves_the_copy_untouched() {
  let mut a = Block::from("Hello");
  let b = a.clone();
  let b_storage = b.as_slice().as_ptr();
  a.append_data(b" World");
  assert_eq!(a.as_slice(), b"Hello World");
  assert_eq!(b.as_slice(), b"Hello");
  // the untouched copy still points at the original storage
  assert_eq!(b.as_slice().as_ptr(), b_storage);
}

#[test]
fn trailing_nul_survives_every_mutation() {
  let mut b = Block::new();
  assert_eq!(b.as_slice_with_nul(), &[0]);
  b.append_data(b"abc");
  b.push_back(b'd');
  b.insert_data(0, b"xy");
  b.remove(1, 2);
  b.pop_back();
  b.resize(10);
  b.truncate(4);
  assert_eq!(b.as_slice_with_nul()[b.size()], 0);
}

#[test]
fn reads_match_writes() {
  let mut b = Block::with_size(8);
  for i in 0..8 {
    b.set_byte(i, i as u8 * 3);
  }
  for i in 0..8 {
    assert_eq!(b.at(i), i as u8 * 3);
  }
  assert_eq!(b.front(), Some(0));
  assert_eq!(b.back(), Some(21));
}

#[test]
fn growth_doubles_and_stays_bounded() {
  let mut b = Block::new();
  let mut allocs = Vec::new();
  for i in 0..4096u32 {
    b.push_back(i as u8);
    if allocs.last() != Some(&b.alloc_size()) {
      allocs.push(b.alloc_size());
    }
  }
  assert!(b.alloc_size() >= 4097);
  // log2(4096) reallocation steps, give or take the floor
  assert!(allocs.len() <= 13, "too many reallocations: {allocs:?}");
  for window in allocs.windows(2) {
    assert!(window[1] >= window[0] * 2, "allocation did not double: {allocs:?}");
  }
}

#[test]
fn mid_clamps_to_contents() {
  let b = Block::from("abcdef");
  assert_eq!(b.mid(2, 3).as_slice(), b"cde");
  assert_eq!(b.mid(4, 100).as_slice(), b"ef");
  assert!(b.mid(9, 2).is_empty());
}

#[test]
fn clear_returns_to_the_shared_empty_block() {
  let mut b = Block::from("data");
  b.clear();
  assert!(b.shares_storage(&Block::new()));
}

#[test]
fn prefix_compares_less() {
  assert!(Block::from("abc") < Block::from("abcd"));
  assert!(Block::from("abd") > Block::from("abcd"));
  assert_eq!(Block::from("AbC").cmp_case(&Block::from("abc")), std::cmp::Ordering::Equal);
}

#[test]
fn crc32_matches_the_check_value() {
  assert_eq!(Block::from("123456789").crc32(), 0xCBF4_3926);
}

#[test]
fn md5_matches_known_digests() {
  let digest = Block::from("abc").md5();
  let expected: [u8; 16] = [
    0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0, 0xd6, 0x96, 0x3f, 0x7d, 0x28, 0xe1, 0x7f,
    0x72,
  ];
  assert_eq!(digest, expected);
}

#[test]
fn compress_round_trips() {
  let mut payload = Block::new();
  for i in 0..2048u32 {
    payload.push_back((i % 7) as u8);
  }
  let packed = payload.compress().expect("compress");
  assert!(packed.size() < payload.size());
  assert_eq!(packed.decompress().expect("decompress"), payload);
}

#[test]
fn decompress_rejects_garbage() {
  assert!(Block::from("this is not zlib").decompress().is_err());
}

#[test]
fn set_fmt_formats() {
  let mut b = Block::new();
  b.set_fmt(format_args!("{}-{:04}", "id", 7));
  assert_eq!(b.as_slice(), b"id-0007");
}

#[test]
fn concat_copies_both_sides() {
  let a = Block::from("left|");
  let b = Block::from("right");
  let cat = a.concat(&b);
  assert_eq!(cat.as_slice(), b"left|right");
  assert_eq!(a.as_slice(), b"left|");
}
