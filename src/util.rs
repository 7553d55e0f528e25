use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, LockResult};
use std::time::{SystemTime, UNIX_EPOCH};

// Reached only when an invariant the surrounding code maintains has been
// broken; there is no sensible way to continue.
fn do_abort() -> ! {
  #[cfg(feature = "backtrace")]
  {
    let trace = backtrace::Backtrace::new();
    crate::error_log!("plinth: internal invariant violated, aborting. backtrace:\n{:?}", trace);
    eprintln!("plinth: internal invariant violated, aborting. backtrace:\n{trace:?}");
    std::process::abort();
  }
  #[cfg(not(feature = "backtrace"))]
  panic!("plinth: internal invariant violated; enable the 'backtrace' feature for a trace and file a bug report");
}

/// Extracts a value the surrounding code has already proven to be present.
pub fn unwrap_some<T>(value: Option<T>) -> T {
  match value {
    Some(inner) => inner,
    None => do_abort(),
  }
}

/// Extracts a success the surrounding code has already proven infallible.
pub fn unwrap_ok<T, E>(value: Result<T, E>) -> T {
  match value {
    Ok(inner) => inner,
    Err(_) => do_abort(),
  }
}

/// Surfaces a poisoned lock as a plain I/O error to fallible callers.
pub fn unwrap_poison<T>(result: LockResult<T>) -> io::Result<T> {
  result.map_err(|_| io::Error::new(io::ErrorKind::Other, "lock poisoned by a panicking thread"))
}

/// Recovers a poisoned lock. Protected state in this crate is left
/// consistent before any call that may unwind.
pub fn recover_poison<T>(result: LockResult<T>) -> T {
  result.unwrap_or_else(|poison| poison.into_inner())
}

// High half seeded from the clock at first use, low half a plain counter;
// ids stay unique across a restart as long as the clock moves.
fn sequential_id() -> u128 {
  static SEED: LazyLock<u64> = LazyLock::new(|| {
    SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|elapsed| elapsed.as_nanos() as u64)
      .unwrap_or(1)
  });
  static NEXT: AtomicU64 = AtomicU64::new(1);
  let low = NEXT.fetch_add(1, Ordering::Relaxed);
  (u128::from(*SEED) << 64) | u128::from(low)
}

/// Process-unique identifier. Objects are tagged with one so audiences can
/// order and remove observers without holding strong references.
#[cfg(not(feature = "random_id"))]
pub fn next_id() -> u128 {
  sequential_id()
}

/// Process-unique identifier, drawn from the system RNG. Falls back to the
/// sequential counter when no entropy source is available.
#[cfg(feature = "random_id")]
pub fn next_id() -> u128 {
  let mut bytes = [0u8; 16];
  match getrandom::fill(&mut bytes) {
    Ok(()) => u128::from_ne_bytes(bytes),
    Err(_) => sequential_id(),
  }
}

/// Shared dispatch for the level macros below. With the `log` feature the
/// call forwards to the `log` crate; without it the arguments are still
/// type-checked, then thrown away.
#[cfg(feature = "log")]
#[doc(hidden)]
#[macro_export]
macro_rules! __plinth_log {
  ($level:ident, target: $target:expr, $($arg:tt)+) => {
    log::log!(target: $target, log::Level::$level, $($arg)+)
  };
  ($level:ident, $($arg:tt)+) => {
    log::log!(log::Level::$level, $($arg)+)
  };
}

#[cfg(not(feature = "log"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __plinth_log {
  ($level:ident, target: $target:expr, $($arg:tt)+) => {{
    _ = &$target;
    _ = format_args!($($arg)+);
  }};
  ($level:ident, $($arg:tt)+) => {{
    _ = format_args!($($arg)+);
  }};
}

/// Logs at trace level when the `log` feature is on.
#[macro_export]
macro_rules! trace_log {
  ($($arg:tt)+) => { $crate::__plinth_log!(Trace, $($arg)+) };
}

/// Logs at debug level when the `log` feature is on.
#[macro_export]
macro_rules! debug_log {
  ($($arg:tt)+) => { $crate::__plinth_log!(Debug, $($arg)+) };
}

/// Logs at info level when the `log` feature is on.
#[macro_export]
macro_rules! info_log {
  ($($arg:tt)+) => { $crate::__plinth_log!(Info, $($arg)+) };
}

/// Logs at warn level when the `log` feature is on.
#[macro_export]
macro_rules! warn_log {
  ($($arg:tt)+) => { $crate::__plinth_log!(Warn, $($arg)+) };
}

/// Logs at error level when the `log` feature is on.
#[macro_export]
macro_rules! error_log {
  ($($arg:tt)+) => { $crate::__plinth_log!(Error, $($arg)+) };
}

#[cfg(doctest)]
#[doc = include_str!("../README.md")]
struct ReadmeDocTests;

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn sequential_ids_do_not_repeat() {
    let a = sequential_id();
    let b = sequential_id();
    assert_ne!(a, b);
    // same seed, advancing counter
    assert_eq!(a >> 64, b >> 64);
  }

  #[test]
  fn poison_helpers_pass_healthy_locks_through() {
    let mutex = std::sync::Mutex::new(5);
    assert_eq!(*unwrap_ok(unwrap_poison(mutex.lock())), 5);
    assert_eq!(*recover_poison(mutex.lock()), 5);
  }
}
