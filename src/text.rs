//! UTF-8 text on top of [`Block`] storage.
//!
//! A [`Text`] shares the copy-on-write behavior of its Block: clones are
//! O(1) and mutation detaches. The contents are always well-formed UTF-8;
//! constructors taking arbitrary bytes either substitute replacement
//! characters or stop at the first decode error, matching the crate-wide
//! policy that decoders shorten their output instead of failing loudly.
#![allow(missing_docs)]

use crate::block::Block;
use crate::percent::{PercentDecode, PercentEncode};
use crate::range::Range;
use crate::util;
use encoding_rs::Encoding;
use std::char::decode_utf16;
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

/// UTF-8 string with copy-on-write storage and code-point addressing.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Text {
  chars: Block,
}

/// A comparison capability set: ordering, prefix test and substring search.
/// The two built-ins are [`CASE_SENSITIVE`] and [`CASE_INSENSITIVE`].
pub struct Comparison {
  pub cmp: fn(&str, &str) -> Ordering,
  pub has_prefix: fn(&str, &str) -> bool,
  pub locate: fn(&str, &str) -> Option<usize>,
}

fn fold(s: &str) -> String {
  s.chars().flat_map(char::to_lowercase).collect()
}

fn cmp_cs(a: &str, b: &str) -> Ordering {
  a.cmp(b)
}

fn has_prefix_cs(s: &str, prefix: &str) -> bool {
  s.starts_with(prefix)
}

fn locate_cs(haystack: &str, needle: &str) -> Option<usize> {
  haystack.find(needle)
}

fn cmp_ci(a: &str, b: &str) -> Ordering {
  let a = a.chars().flat_map(char::to_lowercase);
  let b = b.chars().flat_map(char::to_lowercase);
  a.cmp(b)
}

fn has_prefix_ci(s: &str, prefix: &str) -> bool {
  let mut folded = s.chars().flat_map(char::to_lowercase);
  for expected in prefix.chars().flat_map(char::to_lowercase) {
    if folded.next() != Some(expected) {
      return false;
    }
  }
  true
}

fn locate_ci(haystack: &str, needle: &str) -> Option<usize> {
  if needle.is_empty() {
    return Some(0);
  }
  for (pos, _) in haystack.char_indices() {
    if has_prefix_ci(&haystack[pos..], needle) {
      return Some(pos);
    }
  }
  None
}

/// Byte-wise ordering and search.
pub static CASE_SENSITIVE: Comparison =
  Comparison { cmp: cmp_cs, has_prefix: has_prefix_cs, locate: locate_cs };

/// Locale-independent lower-case-fold ordering and search.
pub static CASE_INSENSITIVE: Comparison =
  Comparison { cmp: cmp_ci, has_prefix: has_prefix_ci, locate: locate_ci };

/// The encoding used for "local" byte conversions, derived from `LC_CTYPE`
/// or `LANG` the first time it is needed; UTF-8 when neither names a known
/// charset.
pub fn locale_encoding() -> &'static Encoding {
  static ENCODING: LazyLock<&'static Encoding> = LazyLock::new(|| {
    for var in ["LC_CTYPE", "LANG"] {
      let Ok(value) = std::env::var(var) else {
        continue;
      };
      let Some(charset) = value.split('.').nth(1) else {
        continue;
      };
      let label = charset.split('@').next().unwrap_or(charset);
      if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
        return encoding;
      }
    }
    encoding_rs::UTF_8
  });
  *ENCODING
}

impl Text {
  pub fn new() -> Text {
    Text { chars: Block::new() }
  }

  /// Adopts a Block, replacing malformed UTF-8 sequences with U+FFFD.
  /// Well-formed input shares the Block's storage without copying.
  pub fn from_utf8_lossy(chars: &Block) -> Text {
    match std::str::from_utf8(chars.as_slice()) {
      Ok(_) => Text { chars: chars.clone() },
      Err(_) => Text::from(String::from_utf8_lossy(chars.as_slice()).as_ref()),
    }
  }

  pub fn from_bytes_lossy(bytes: &[u8]) -> Text {
    Text::from(String::from_utf8_lossy(bytes).as_ref())
  }

  pub fn from_chars(chars: &[char]) -> Text {
    let mut text = Text::new();
    for ch in chars {
      text.append_char(*ch);
    }
    text
  }

  /// Decodes UTF-16 code units, stopping at the first unpaired surrogate.
  pub fn from_utf16(units: &[u16]) -> Text {
    let mut text = Text::new();
    for decoded in decode_utf16(units.iter().copied()) {
      match decoded {
        Ok(ch) => text.append_char(ch),
        Err(_) => break,
      }
    }
    text
  }

  /// Decodes bytes in the locale encoding (see [`locale_encoding`]).
  pub fn from_local(bytes: &[u8]) -> Text {
    let (decoded, _, _) = locale_encoding().decode(bytes);
    Text::from(decoded.as_ref())
  }

  pub fn from_fmt(args: fmt::Arguments<'_>) -> Text {
    Text { chars: Block::from_fmt(args) }
  }

  /// A Text over the byte range `[range.start, range.end)` of a Block.
  pub fn from_byte_range(block: &Block, range: &Range) -> Text {
    Text::from_bytes_lossy(block.mid_range(range).as_slice())
  }

  pub fn as_str(&self) -> &str {
    util::unwrap_ok(std::str::from_utf8(self.chars.as_slice()))
  }

  /// The UTF-8 bytes including the guaranteed trailing NUL.
  pub fn as_bytes_with_nul(&self) -> &[u8] {
    self.chars.as_slice_with_nul()
  }

  pub fn as_block(&self) -> &Block {
    &self.chars
  }

  pub fn into_block(self) -> Block {
    self.chars
  }

  /// Length in bytes.
  pub fn size(&self) -> usize {
    self.chars.size()
  }

  /// Length in code points; walks the contents.
  pub fn len(&self) -> usize {
    self.as_str().chars().count()
  }

  pub fn is_empty(&self) -> bool {
    self.chars.is_empty()
  }

  /// The first code point, if any.
  pub fn first(&self) -> Option<char> {
    self.as_str().chars().next()
  }

  pub fn chars(&self) -> std::str::Chars<'_> {
    self.as_str().chars()
  }

  pub fn char_indices(&self) -> std::str::CharIndices<'_> {
    self.as_str().char_indices()
  }

  pub fn to_utf16(&self) -> Vec<u16> {
    self.as_str().encode_utf16().collect()
  }

  /// Encodes into the locale encoding; unmappable characters become
  /// substitutes per the encoder's convention.
  pub fn to_local(&self) -> Block {
    let (encoded, _, _) = locale_encoding().encode(self.as_str());
    Block::from_data(&encoded)
  }

  pub fn to_upper(&self) -> Text {
    Text::from(self.as_str().to_uppercase().as_str())
  }

  pub fn to_lower(&self) -> Text {
    Text::from(self.as_str().to_lowercase().as_str())
  }

  /// The byte range covered by `char_count` code points starting at code
  /// point `char_start`. Clamped to the contents.
  pub fn byte_range(&self, char_start: usize, char_count: usize) -> Range {
    let s = self.as_str();
    let mut indices = s.char_indices().map(|(pos, _)| pos).chain(std::iter::once(s.len()));
    let start = indices.by_ref().nth(char_start).unwrap_or(s.len());
    let end = match char_count {
      0 => start,
      n => indices.nth(n - 1).unwrap_or(s.len()),
    };
    Range::new(start, end)
  }

  /// A new Text of `char_count` code points starting at code point
  /// `char_start`.
  pub fn mid(&self, char_start: usize, char_count: usize) -> Text {
    let range = self.byte_range(char_start, char_count);
    Text::from(&self.as_str()[range.start..range.end])
  }

  pub fn cmp_sc(&self, other: &str, sc: &Comparison) -> Ordering {
    (sc.cmp)(self.as_str(), other)
  }

  pub fn starts_with(&self, prefix: &str) -> bool {
    self.starts_with_sc(prefix, &CASE_SENSITIVE)
  }

  pub fn starts_with_sc(&self, prefix: &str, sc: &Comparison) -> bool {
    (sc.has_prefix)(self.as_str(), prefix)
  }

  pub fn ends_with(&self, suffix: &str) -> bool {
    self.as_str().ends_with(suffix)
  }

  pub fn ends_with_sc(&self, suffix: &str, sc: &Comparison) -> bool {
    if std::ptr::eq(sc, &CASE_SENSITIVE) {
      return self.ends_with(suffix);
    }
    fold(self.as_str()).ends_with(&fold(suffix))
  }

  /// Byte position of the first occurrence of `ch`.
  pub fn index_of(&self, ch: char) -> Option<usize> {
    self.as_str().find(ch)
  }

  pub fn index_of_str(&self, needle: &str) -> Option<usize> {
    self.index_of_str_sc(needle, &CASE_SENSITIVE)
  }

  pub fn index_of_str_sc(&self, needle: &str, sc: &Comparison) -> Option<usize> {
    (sc.locate)(self.as_str(), needle)
  }

  pub fn index_of_str_from(&self, needle: &str, from: usize) -> Option<usize> {
    if from >= self.size() {
      return None;
    }
    self.as_str().get(from..).and_then(|tail| tail.find(needle)).map(|pos| pos + from)
  }

  pub fn last_index_of(&self, ch: char) -> Option<usize> {
    self.as_str().rfind(ch)
  }

  pub fn last_index_of_str(&self, needle: &str) -> Option<usize> {
    self.as_str().rfind(needle)
  }

  /// Shares the other Text's storage.
  pub fn set(&mut self, other: &Text) {
    self.chars.assign(&other.chars);
  }

  pub fn set_str(&mut self, value: &str) {
    self.chars.set_data(value.as_bytes());
  }

  pub fn set_fmt(&mut self, args: fmt::Arguments<'_>) {
    self.chars.set_fmt(args);
  }

  pub fn append(&mut self, other: &Text) {
    self.chars.append(&other.chars);
  }

  pub fn append_str(&mut self, value: &str) {
    self.chars.append_data(value.as_bytes());
  }

  /// Appends the byte range `[range.start, range.end)` of `value`; the
  /// range is expected to lie on code-point boundaries.
  pub fn append_range(&mut self, value: &str, range: &Range) {
    let clamped = range.clamp_to(&Range::new(0, value.len()));
    if let Some(part) = value.get(clamped.start..clamped.end) {
      self.append_str(part);
    }
  }

  pub fn append_char(&mut self, ch: char) {
    let mut buf = [0u8; 4];
    self.chars.append_data(ch.encode_utf8(&mut buf).as_bytes());
  }

  pub fn prepend(&mut self, other: &Text) {
    let mut pre = other.clone();
    pre.append(self);
    self.set(&pre);
  }

  pub fn clear(&mut self) {
    self.chars.clear();
  }

  /// Keeps the first `char_count` code points.
  pub fn truncate_chars(&mut self, char_count: usize) {
    let range = self.byte_range(0, char_count);
    self.chars.truncate(range.end);
  }

  pub fn trim_start(&mut self) {
    let kept = self.as_str().trim_start().len();
    let removed = self.size() - kept;
    if removed > 0 {
      self.chars.remove(0, removed);
    }
  }

  pub fn trim_end(&mut self) {
    let kept = self.as_str().trim_end().len();
    self.chars.truncate(kept);
  }

  pub fn trim(&mut self) {
    self.trim_start();
    self.trim_end();
  }

  /// Parses a leading integer; stops at the first non-numeric byte.
  /// No numeric prefix yields 0.
  pub fn to_int(&self) -> i64 {
    let s = self.as_str().trim_start();
    let unsigned_start = usize::from(s.starts_with('+') || s.starts_with('-'));
    let digits_end = s
      .char_indices()
      .skip(unsigned_start)
      .find(|(_, ch)| !ch.is_ascii_digit())
      .map(|(pos, _)| pos)
      .unwrap_or(s.len());
    s.get(..digits_end).and_then(|prefix| prefix.parse().ok()).unwrap_or(0)
  }

  pub fn to_float(&self) -> f32 {
    self.to_double() as f32
  }

  /// Parses a leading floating-point number; stops at the first byte that
  /// cannot extend the number.
  pub fn to_double(&self) -> f64 {
    let s = self.as_str().trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
      end = 1;
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    while let Some(&byte) = bytes.get(end) {
      if byte.is_ascii_digit() {
        seen_digit = true;
      } else if byte == b'.' && !seen_dot {
        seen_dot = true;
      } else {
        break;
      }
      end += 1;
    }
    if !seen_digit {
      return 0.0;
    }
    // An exponent only counts when at least one digit follows it.
    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
      let mut exp_end = end + 1;
      if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
        exp_end += 1;
      }
      let digits = bytes.get(exp_end..).unwrap_or_default();
      let exp_digits = digits.iter().take_while(|b| b.is_ascii_digit()).count();
      if exp_digits > 0 {
        end = exp_end + exp_digits;
      }
    }
    s.get(..end).and_then(|prefix| prefix.parse().ok()).unwrap_or(0.0)
  }

  /// Splits on `separator` with these rules: empty pieces at the very start
  /// and end of the contents are skipped, a contents equal to the separator
  /// produces nothing, and consecutive separators yield empty interior
  /// pieces.
  pub fn split<'a>(&'a self, separator: &'a str) -> Split<'a> {
    split_str(self.as_str(), separator)
  }

  /// Like [`Text::split`] but yields byte ranges instead of sub-slices.
  pub fn split_ranges<'a>(&'a self, separator: &'a str) -> SplitRanges<'a> {
    split_str_ranges(self.as_str(), separator)
  }

  /// Percent-escapes every byte outside `[A-Za-z0-9-_.~]`.
  pub fn url_encode(&self) -> Text {
    Text::from(self.as_str().percent_encode().as_str())
  }

  /// Reverses [`Text::url_encode`]. A malformed `%xx` truncates the result
  /// at that position.
  pub fn url_decode(&self) -> Text {
    Text::from_bytes_lossy(&self.as_str().percent_decode())
  }
}

impl From<&str> for Text {
  fn from(value: &str) -> Self {
    Text { chars: Block::from_data(value.as_bytes()) }
  }
}

impl From<String> for Text {
  fn from(value: String) -> Self {
    Text { chars: Block::from(value.into_bytes()) }
  }
}

impl AsRef<str> for Text {
  fn as_ref(&self) -> &str {
    self.as_str()
  }
}

impl PartialOrd for Text {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Text {
  fn cmp(&self, other: &Self) -> Ordering {
    self.as_str().cmp(other.as_str())
  }
}

impl fmt::Display for Text {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl fmt::Debug for Text {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self.as_str(), f)
  }
}

enum SplitState {
  Start,
  Mid(usize),
  Done,
}

/// Iterator over separator-delimited byte ranges of a `&str`.
pub struct SplitRanges<'a> {
  whole: &'a str,
  separator: &'a str,
  state: SplitState,
}

/// Iterator over separator-delimited sub-slices of a `&str`.
pub struct Split<'a>(SplitRanges<'a>);

/// Splits any `&str` with the rules of [`Text::split`].
pub fn split_str<'a>(whole: &'a str, separator: &'a str) -> Split<'a> {
  Split(split_str_ranges(whole, separator))
}

pub fn split_str_ranges<'a>(whole: &'a str, separator: &'a str) -> SplitRanges<'a> {
  SplitRanges { whole, separator, state: SplitState::Start }
}

impl SplitRanges<'_> {
  fn find_from(&self, start: usize) -> usize {
    self
      .whole
      .get(start..)
      .and_then(|tail| tail.find(self.separator))
      .map(|pos| pos + start)
      .unwrap_or(self.whole.len())
  }
}

impl Iterator for SplitRanges<'_> {
  type Item = Range;

  fn next(&mut self) -> Option<Range> {
    match self.state {
      SplitState::Start => {
        // A separator that does not fit inside the contents splits nothing;
        // this also covers contents exactly equal to the separator.
        if self.separator.is_empty() || self.separator.len() >= self.whole.len() {
          self.state = SplitState::Done;
          return None;
        }
        let start = if self.whole.starts_with(self.separator) { self.separator.len() } else { 0 };
        let end = self.find_from(start);
        self.state = SplitState::Mid(end);
        Some(Range::new(start, end))
      }
      SplitState::Mid(prev_end) => {
        let start = prev_end + self.separator.len();
        if start >= self.whole.len() {
          self.state = SplitState::Done;
          return None;
        }
        let end = self.find_from(start);
        self.state = SplitState::Mid(end);
        Some(Range::new(start, end))
      }
      SplitState::Done => None,
    }
  }
}

impl<'a> Iterator for Split<'a> {
  type Item = &'a str;

  fn next(&mut self) -> Option<&'a str> {
    let range = self.0.next()?;
    self.0.whole.get(range.start..range.end)
  }
}
