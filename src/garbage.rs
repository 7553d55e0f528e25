//! Scoped deferred-release stack.
//!
//! Each thread carries a stack of frames; a frame collects deleters that run
//! in LIFO order when the frame is popped. Collected values never cross the
//! thread boundary: a thread spawned through [`crate::Thread`] opens its own
//! implicit scope and drains it before exiting.
#![allow(missing_docs)]

use std::cell::RefCell;

type Deleter = Box<dyn FnOnce()>;

struct Frames(Vec<Vec<Deleter>>);

impl Frames {
  fn drain_frame(frame: Vec<Deleter>) {
    for deleter in frame.into_iter().rev() {
      deleter();
    }
  }
}

impl Drop for Frames {
  // Frames left open at thread exit are drained, innermost first.
  fn drop(&mut self) {
    while let Some(frame) = self.0.pop() {
      Frames::drain_frame(frame);
    }
  }
}

thread_local! {
  static FRAMES: RefCell<Frames> = RefCell::new(Frames(Vec::new()));
}

/// Pushes a new frame onto the calling thread's scope stack.
pub fn begin_scope() {
  FRAMES.with(|f| f.borrow_mut().0.push(Vec::new()));
}

/// Pops the current frame and runs its deleters in LIFO order.
/// Without an open frame this does nothing.
pub fn end_scope() {
  let frame = FRAMES.with(|f| f.borrow_mut().0.pop());
  match frame {
    Some(frame) => Frames::drain_frame(frame),
    None => {
      crate::warn_log!("plinth: garbage: end_scope without a matching begin_scope");
    }
  }
}

/// Drains the current frame and replaces it with a fresh one.
pub fn recycle() {
  end_scope();
  begin_scope();
}

/// Defers an arbitrary cleanup action to the end of the current frame.
/// Without an open frame the action runs immediately.
pub fn defer(action: impl FnOnce() + 'static) {
  let deferred = FRAMES.with(|f| {
    let mut frames = f.borrow_mut();
    match frames.0.last_mut() {
      Some(frame) => {
        frame.push(Box::new(action));
        None
      }
      None => Some(action),
    }
  });
  if let Some(action) = deferred {
    action();
  }
}

/// Keeps `value` alive until the current frame is drained, then drops it.
/// For reference-counted handles this defers the release of one reference.
pub fn collect<T: 'static>(value: T) {
  defer(move || drop(value));
}

/// Number of frames currently open on this thread.
pub fn depth() -> usize {
  FRAMES.with(|f| f.borrow().0.len())
}

/// RAII wrapper for a scope frame; used by thread entry points so that a
/// panicking body still drains its frame.
pub struct GarbageScope(());

impl GarbageScope {
  #[allow(clippy::new_without_default)]
  pub fn new() -> GarbageScope {
    begin_scope();
    GarbageScope(())
  }
}

impl Drop for GarbageScope {
  fn drop(&mut self) {
    end_scope();
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::cell::RefCell;
  use std::rc::Rc;

  #[test]
  fn lifo_order() {
    let order = Rc::new(RefCell::new(Vec::new()));
    begin_scope();
    for i in 0..3 {
      let order = Rc::clone(&order);
      defer(move || order.borrow_mut().push(i));
    }
    assert_eq!(order.borrow().len(), 0);
    end_scope();
    assert_eq!(*order.borrow(), vec![2, 1, 0]);
  }

  #[test]
  fn recycle_keeps_a_frame_open() {
    let dropped = Rc::new(RefCell::new(false));
    begin_scope();
    let flag = Rc::clone(&dropped);
    defer(move || *flag.borrow_mut() = true);
    recycle();
    assert!(*dropped.borrow());
    assert_eq!(depth(), 1);
    end_scope();
  }

  #[test]
  fn collect_defers_the_drop() {
    struct Tracker(Rc<RefCell<bool>>);
    impl Drop for Tracker {
      fn drop(&mut self) {
        *self.0.borrow_mut() = true;
      }
    }

    let dropped = Rc::new(RefCell::new(false));
    {
      let _scope = GarbageScope::new();
      collect(Tracker(Rc::clone(&dropped)));
      assert!(!*dropped.borrow());
    }
    assert!(*dropped.borrow());
  }

  #[test]
  fn without_frame_runs_immediately() {
    let ran = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&ran);
    defer(move || *flag.borrow_mut() = true);
    assert!(*ran.borrow());
  }
}
