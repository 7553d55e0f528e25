//! Condition variables and mutex guard helpers.
//!
//! All blocking in the crate goes through these wrappers. Timeouts are
//! expressed as absolute deadlines so a wait interrupted by a spurious
//! wakeup resumes with the remaining time, not a fresh interval.
#![allow(missing_docs)]

use crate::util::recover_poison;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

/// Runs `f` with the mutex held, recovering from poisoning.
pub fn guard<T, R>(mutex: &Mutex<T>, f: impl FnOnce(&mut T) -> R) -> R {
  let mut locked = recover_poison(mutex.lock());
  f(&mut locked)
}

/// A condition variable with deadline-based waits.
#[derive(Debug, Default)]
pub struct Condition {
  cv: Condvar,
}

impl Condition {
  pub fn new() -> Condition {
    Condition { cv: Condvar::new() }
  }

  /// Blocks until signalled. Returns the reacquired guard.
  pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    recover_poison(self.cv.wait(guard))
  }

  /// Blocks until signalled or `deadline` passes. The boolean is true when
  /// the wait timed out.
  pub fn timed_wait<'a, T>(
    &self,
    guard: MutexGuard<'a, T>,
    deadline: Instant,
  ) -> (MutexGuard<'a, T>, bool) {
    let now = Instant::now();
    if now >= deadline {
      return (guard, true);
    }
    let (guard, result) = recover_poison(self.cv.wait_timeout(guard, deadline - now));
    (guard, result.timed_out())
  }

  /// Wakes one waiter.
  pub fn signal(&self) {
    self.cv.notify_one();
  }

  /// Wakes every waiter.
  pub fn broadcast(&self) {
    self.cv.notify_all();
  }
}
