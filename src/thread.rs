//! Owned worker threads.
//!
//! A [`Thread`] is a reference-counted object wrapping one OS thread. The
//! spawned body keeps an extra reference for its whole run, so dropping the
//! last user handle while the thread still executes is safe; the object goes
//! away when the body finishes. Running threads are registered in a
//! process-wide table so [`current_thread`] can resolve the caller.
#![allow(missing_docs)]

use crate::audience::Audience;
use crate::garbage::GarbageScope;
use crate::object::{Class, Object, ObjectCore, OBJECT_CLASS};
use crate::plinth_error::PlinthResult;
use crate::sync::Condition;
use crate::util::{recover_poison, unwrap_poison};
use crate::{error_log, trace_log, warn_log};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, Weak};
use std::thread;
use std::thread::ThreadId;
use std::time::Duration;

pub static THREAD_CLASS: Class = Class::named("Thread", Some(&OBJECT_CLASS));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
  Created,
  Running,
  Finished,
}

/// The thread body; its return value becomes the thread's result.
pub type RunFn = dyn Fn(&Arc<Thread>) -> i32 + Send + Sync;

static RUNNING_THREADS: LazyLock<Mutex<HashMap<ThreadId, Weak<Thread>>>> =
  LazyLock::new(|| Mutex::new(HashMap::new()));

/// The Thread object of the calling OS thread, or None for threads not
/// started through this API.
pub fn current_thread() -> Option<Arc<Thread>> {
  let registry = recover_poison(RUNNING_THREADS.lock());
  registry.get(&thread::current().id()).and_then(Weak::upgrade)
}

/// Blocks the calling thread for `seconds`.
pub fn sleep(seconds: f64) {
  thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
}

struct Lifecycle {
  state: ThreadState,
  result: i32,
  handle: Option<thread::JoinHandle<()>>,
  os_id: Option<ThreadId>,
}

/// A worker thread with an observable lifecycle.
pub struct Thread {
  core: ObjectCore,
  run: Box<RunFn>,
  name: Mutex<Option<String>>,
  termination_enabled: AtomicBool,
  terminate_requested: AtomicBool,
  user_data: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
  lifecycle: Mutex<Lifecycle>,
  // Signalled under the lifecycle mutex once the state reaches Finished,
  // so any number of joiners can block on completion.
  done: Condition,
  finished: Audience<Arc<Thread>>,
}

// Raises the completion signal for a panicking body, so joiners blocked on
// it still wake up and the registry entry does not leak.
struct FinishMarker {
  thread: Arc<Thread>,
  os_id: ThreadId,
}

impl Drop for FinishMarker {
  fn drop(&mut self) {
    if !thread::panicking() {
      return;
    }
    recover_poison(RUNNING_THREADS.lock()).remove(&self.os_id);
    let mut lifecycle = recover_poison(self.thread.lifecycle.lock());
    if lifecycle.state == ThreadState::Running {
      lifecycle.state = ThreadState::Finished;
      self.thread.done.broadcast();
    }
  }
}

impl Thread {
  pub fn new(run: impl Fn(&Arc<Thread>) -> i32 + Send + Sync + 'static) -> Arc<Thread> {
    Arc::new(Thread {
      core: ObjectCore::new(&THREAD_CLASS),
      run: Box::new(run),
      name: Mutex::new(None),
      termination_enabled: AtomicBool::new(false),
      terminate_requested: AtomicBool::new(false),
      user_data: Mutex::new(None),
      lifecycle: Mutex::new(Lifecycle {
        state: ThreadState::Created,
        result: 0,
        handle: None,
        os_id: None,
      }),
      done: Condition::new(),
      finished: Audience::new(),
    })
  }

  /// Notified exactly once when the body has returned, from the worker
  /// thread itself.
  pub fn finished(&self) -> &Audience<Arc<Thread>> {
    &self.finished
  }

  pub fn set_name(&self, name: &str) {
    *recover_poison(self.name.lock()) = Some(name.to_string());
  }

  pub fn set_user_data(&self, data: Arc<dyn Any + Send + Sync>) {
    *recover_poison(self.user_data.lock()) = Some(data);
  }

  pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
    recover_poison(self.user_data.lock()).clone()
  }

  /// Opts in to cooperative termination; see [`Thread::terminate`].
  pub fn set_termination_enabled(&self, enabled: bool) {
    self.termination_enabled.store(enabled, Ordering::SeqCst);
  }

  /// True once [`Thread::terminate`] has been requested. Long-running
  /// bodies poll this at their suspension points.
  pub fn is_terminate_requested(&self) -> bool {
    self.terminate_requested.load(Ordering::SeqCst)
  }

  pub fn state(&self) -> ThreadState {
    recover_poison(self.lifecycle.lock()).state
  }

  pub fn is_running(&self) -> bool {
    self.state() == ThreadState::Running
  }

  pub fn is_finished(&self) -> bool {
    self.state() == ThreadState::Finished
  }

  /// Spawns the OS thread. The state moves to Running before this returns;
  /// starting twice is an error.
  pub fn start(self: &Arc<Self>) -> PlinthResult<()> {
    let mut lifecycle = unwrap_poison(self.lifecycle.lock())?;
    if lifecycle.state != ThreadState::Created {
      return Err(crate::PlinthError::InvalidInput("thread was already started".to_string()));
    }
    let this = Arc::clone(self);
    let mut builder = thread::Builder::new();
    if let Some(name) = recover_poison(self.name.lock()).as_deref() {
      builder = builder.name(name.to_string());
    }
    let handle = builder.spawn(move || {
      let os_id = thread::current().id();
      recover_poison(RUNNING_THREADS.lock()).insert(os_id, Arc::downgrade(&this));
      let _marker = FinishMarker { thread: Arc::clone(&this), os_id };
      trace_log!("plinth: thread {:x}: running", this.core.id());
      // Transient collections made by the body are released on exit.
      {
        let _scope = GarbageScope::new();
        let result = (this.run)(&this);
        recover_poison(RUNNING_THREADS.lock()).remove(&os_id);
        let mut lifecycle = recover_poison(this.lifecycle.lock());
        lifecycle.result = result;
        lifecycle.state = ThreadState::Finished;
        // Raised with the lifecycle lock held so a joiner between its
        // state check and the wait cannot miss it.
        this.done.broadcast();
        drop(lifecycle);
        trace_log!("plinth: thread {:x}: finished with result {}", this.core.id(), result);
        // Notified before the scope drains, so observers run ahead of any
        // deferred releases the body queued up.
        this.finished.notify(&this);
      }
    });
    let handle = match handle {
      Ok(handle) => handle,
      Err(err) => {
        lifecycle.state = ThreadState::Created;
        return Err(err.into());
      }
    };
    lifecycle.state = ThreadState::Running;
    lifecycle.os_id = Some(handle.thread().id());
    lifecycle.handle = Some(handle);
    Ok(())
  }

  /// Waits for the body to return. Every caller blocks until the thread is
  /// finished: the first one reaps the OS thread through the join handle,
  /// the rest sleep on the completion signal. A thread asking to join
  /// itself returns immediately instead of deadlocking.
  pub fn join(&self) {
    let mut lifecycle = recover_poison(self.lifecycle.lock());
    if lifecycle.state != ThreadState::Running {
      return;
    }
    if lifecycle.os_id == Some(thread::current().id()) {
      return;
    }
    if let Some(handle) = lifecycle.handle.take() {
      drop(lifecycle);
      if handle.join().is_err() {
        error_log!("plinth: thread {:x}: body panicked", self.core.id());
      }
      return;
    }
    // Another caller holds the join handle; wait for the body to raise the
    // completion signal.
    while lifecycle.state == ThreadState::Running {
      lifecycle = self.done.wait(lifecycle);
    }
  }

  /// Joins if still running, then returns the body's result.
  pub fn result(&self) -> i32 {
    self.join();
    recover_poison(self.lifecycle.lock()).result
  }

  /// Requests cooperative termination. Does nothing unless the thread was
  /// started with termination enabled; there is no asynchronous
  /// cancellation, the body observes the request at its next suspension
  /// point via [`Thread::is_terminate_requested`].
  pub fn terminate(&self) {
    if !self.termination_enabled.load(Ordering::SeqCst) {
      warn_log!("plinth: thread {:x}: terminate without terminationEnabled", self.core.id());
      return;
    }
    self.terminate_requested.store(true, Ordering::SeqCst);
  }
}

impl Object for Thread {
  fn core(&self) -> &ObjectCore {
    &self.core
  }

  fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }
}

impl Drop for Thread {
  fn drop(&mut self) {
    if recover_poison(self.lifecycle.lock()).state == ThreadState::Running {
      warn_log!("plinth: thread {:x}: destroyed while still running", self.core.id());
    }
  }
}

impl std::fmt::Debug for Thread {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Thread({:x}, {:?})", self.core.id(), self.state())
  }
}
