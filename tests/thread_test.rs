mod probe;

use plinth::garbage;
use plinth::{current_thread, downcast_object, Object, Thread, ThreadState};
use probe::Probe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn result_joins_and_returns_the_body_value() {
  let thread = Thread::new(|_| 42);
  assert_eq!(thread.state(), ThreadState::Created);
  thread.start().expect("start");
  assert_eq!(thread.result(), 42);
  assert!(thread.is_finished());
}

#[test]
fn every_concurrent_joiner_sees_the_real_result() {
  let thread = Thread::new(|_| {
    plinth::sleep(0.05);
    42
  });
  thread.start().expect("start");
  let joiners: Vec<_> = (0..4)
    .map(|_| {
      let thread = Arc::clone(&thread);
      std::thread::spawn(move || thread.result())
    })
    .collect();
  for joiner in joiners {
    // no racer may observe the default result of a still-running body
    assert_eq!(joiner.join().expect("joiner"), 42);
  }
  assert!(thread.is_finished());
}

#[test]
fn starting_twice_is_rejected() {
  let thread = Thread::new(|_| 0);
  thread.start().expect("start");
  assert!(thread.start().is_err());
  thread.join();
}

#[test]
fn finished_audience_fires_once_from_the_worker() {
  fn on_finished(receiver: &Arc<dyn Object>, thread: &Arc<Thread>) {
    if let Some(probe) = downcast_object::<Probe>(receiver) {
      assert!(thread.is_finished());
      probe.log("finished");
    }
  }

  let (probe, rx) = Probe::with_channel();
  let thread = Thread::new(|_| 7);
  thread.finished().insert(&probe, on_finished);
  thread.start().expect("start");
  rx.recv_timeout(Duration::from_secs(5)).expect("finished notification");
  thread.join();
  assert_eq!(probe.count_of("finished"), 1);
}

#[test]
fn current_thread_resolves_inside_the_body_only() {
  let (tx, rx) = channel();
  // the body must be Sync, so the sender travels inside a mutex
  let tx = std::sync::Mutex::new(tx);
  let thread = Thread::new(move |this| {
    let resolved = current_thread();
    let matches = resolved.as_ref().is_some_and(|t| Arc::ptr_eq(t, this));
    tx.lock().unwrap().send(matches).ok();
    0
  });
  thread.start().expect("start");
  assert!(rx.recv_timeout(Duration::from_secs(5)).expect("body ran"));
  thread.join();
  // the registry entry is gone once the thread has finished
  assert!(current_thread().is_none());
}

#[test]
fn user_data_is_shared_with_the_body() {
  let (tx, rx) = channel();
  let tx = std::sync::Mutex::new(tx);
  let thread = Thread::new(move |this| {
    let data = this.user_data().and_then(|d| d.downcast::<String>().ok());
    tx.lock().unwrap().send(data.map(|s| s.as_str().to_string())).ok();
    0
  });
  thread.set_user_data(Arc::new("payload".to_string()));
  thread.start().expect("start");
  let seen = rx.recv_timeout(Duration::from_secs(5)).expect("body ran");
  assert_eq!(seen.as_deref(), Some("payload"));
  thread.join();
}

#[test]
fn thread_bodies_run_inside_a_garbage_scope() {
  static DROPS: AtomicUsize = AtomicUsize::new(0);

  struct Tracker;
  impl Drop for Tracker {
    fn drop(&mut self) {
      DROPS.fetch_add(1, Ordering::SeqCst);
    }
  }

  let thread = Thread::new(|_| {
    garbage::collect(Tracker);
    // still alive inside the body's scope
    assert_eq!(DROPS.load(Ordering::SeqCst), 0);
    0
  });
  thread.start().expect("start");
  thread.join();
  assert_eq!(DROPS.load(Ordering::SeqCst), 1);
}

#[test]
fn terminate_needs_opt_in_and_is_cooperative() {
  let thread = Thread::new(|this| {
    while !this.is_terminate_requested() {
      plinth::sleep(0.005);
    }
    99
  });
  thread.set_termination_enabled(true);
  thread.start().expect("start");
  thread.terminate();
  assert_eq!(thread.result(), 99);
}

#[test]
fn sleep_blocks_for_roughly_the_requested_time() {
  let started = std::time::Instant::now();
  plinth::sleep(0.05);
  assert!(started.elapsed() >= Duration::from_millis(50));
}
