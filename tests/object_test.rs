mod probe;

use plinth::{class_of, downcast_object, is_instance, Object, Thread, OBJECT_CLASS, THREAD_CLASS};
use probe::{Probe, PROBE_CLASS};
use std::sync::{Arc, Weak};

#[test]
fn every_object_derives_from_the_root_class() {
  let probe = Probe::new();
  let thread = Thread::new(|_| 0);
  assert!(is_instance(probe.as_ref(), &OBJECT_CLASS));
  assert!(is_instance(thread.as_ref(), &OBJECT_CLASS));
  assert!(is_instance(thread.as_ref(), &THREAD_CLASS));
  assert!(!is_instance(probe.as_ref(), &THREAD_CLASS));
}

#[test]
fn class_of_reports_the_concrete_class() {
  let probe = Probe::new();
  assert!(std::ptr::eq(class_of(probe.as_ref()), &PROBE_CLASS));
  assert_eq!(class_of(probe.as_ref()).name, "Probe");
}

#[test]
fn downcast_recovers_the_concrete_type() {
  let erased: Arc<dyn Object> = Probe::new();
  assert!(downcast_object::<Probe>(&erased).is_some());
  assert!(downcast_object::<Thread>(&erased).is_none());
}

#[test]
fn matched_refs_return_to_the_initial_count() {
  let probe = Probe::new();
  let weak: Weak<Probe> = Arc::downgrade(&probe);
  assert_eq!(Arc::strong_count(&probe), 1);
  {
    let extra = [Arc::clone(&probe), Arc::clone(&probe), Arc::clone(&probe)];
    assert_eq!(Arc::strong_count(&probe), 4);
    drop(extra);
  }
  assert_eq!(Arc::strong_count(&probe), 1);
  drop(probe);
  // destruction ran exactly once, nothing is left
  assert!(weak.upgrade().is_none());
}

#[test]
fn object_ids_are_process_unique() {
  let a = Probe::new();
  let b = Probe::new();
  assert_ne!(a.core().id(), b.core().id());
}
