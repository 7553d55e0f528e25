#![allow(dead_code)]
use plinth::{Class, Object, ObjectCore, OBJECT_CLASS};
use std::any::Any;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

pub static PROBE_CLASS: Class = Class::named("Probe", Some(&OBJECT_CLASS));

/// A minimal Object that records the notifications it receives, optionally
/// forwarding each event name over a channel so tests can block on it.
pub struct Probe {
  core: ObjectCore,
  events: Mutex<Vec<String>>,
  tx: Mutex<Option<Sender<String>>>,
}

impl Probe {
  pub fn new() -> Arc<Probe> {
    Arc::new(Probe {
      core: ObjectCore::new(&PROBE_CLASS),
      events: Mutex::new(Vec::new()),
      tx: Mutex::new(None),
    })
  }

  pub fn with_channel() -> (Arc<Probe>, Receiver<String>) {
    let (tx, rx) = channel();
    let probe = Probe::new();
    *probe.tx.lock().unwrap() = Some(tx);
    (probe, rx)
  }

  pub fn log(&self, event: &str) {
    self.events.lock().unwrap().push(event.to_string());
    if let Some(tx) = self.tx.lock().unwrap().as_ref() {
      tx.send(event.to_string()).ok();
    }
  }

  pub fn events(&self) -> Vec<String> {
    self.events.lock().unwrap().clone()
  }

  pub fn count_of(&self, event: &str) -> usize {
    self.events.lock().unwrap().iter().filter(|e| e.as_str() == event).count()
  }
}

impl Object for Probe {
  fn core(&self) -> &ObjectCore {
    &self.core
  }

  fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }
}
