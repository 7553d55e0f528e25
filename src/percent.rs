//! Provides percent-encoding functionality.

/// A trait which represents the ability of a type to be percent-encoded.
pub trait PercentEncode {
  /// Percent-encode the value. Every byte outside `[A-Za-z0-9-_.~]` is
  /// escaped as `%XX` with upper-case hex digits.
  fn percent_encode(&self) -> String;
}

impl<T> PercentEncode for T
where
  T: AsRef<[u8]>,
{
  fn percent_encode(&self) -> String {
    urlencoding::encode_binary(self.as_ref()).into_owned()
  }
}

/// A trait which represents the ability of a type to be percent-decoded.
pub trait PercentDecode {
  /// Percent-decode the value. A malformed `%` escape (missing or
  /// non-hex digits) truncates the decode at that position.
  fn percent_decode(&self) -> Vec<u8>;
}

fn from_hex(ch: u8) -> Option<u8> {
  match ch {
    b'0'..=b'9' => Some(ch - b'0'),
    b'A'..=b'F' => Some(10 + ch - b'A'),
    b'a'..=b'f' => Some(10 + ch - b'a'),
    _ => None,
  }
}

impl<T> PercentDecode for T
where
  T: AsRef<[u8]>,
{
  fn percent_decode(&self) -> Vec<u8> {
    let input = self.as_ref();
    let mut decoded = Vec::with_capacity(input.len());
    let mut bytes = input.iter().copied();

    while let Some(character) = bytes.next() {
      if character == b'%' {
        let Some(hi) = bytes.next().and_then(from_hex) else {
          break;
        };
        let Some(lo) = bytes.next().and_then(from_hex) else {
          break;
        };
        decoded.push((hi << 4) | lo);
      } else {
        decoded.push(character);
      }
    }

    decoded
  }
}
