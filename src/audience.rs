//! Observer audiences.
//!
//! An [`Audience`] is a sorted set of `(receiver, callback)` pairs owned by
//! the object being observed. Neither side owns the other: observers hold
//! weak receiver references, and every receiver's [`AudienceMember`] holds
//! weak back-references to the audiences it appears in, so whichever side
//! dies first cleans up the other.
#![allow(missing_docs)]

use crate::object::{Object, ObjectId};
use crate::util::recover_poison;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// Notification callback: receives the observing object and the payload.
pub type ObserverFn<A> = fn(&Arc<dyn Object>, &A);

struct Observer<A: 'static> {
  receiver_id: ObjectId,
  receiver: Weak<dyn Object>,
  callback: ObserverFn<A>,
}

impl<A> Clone for Observer<A> {
  fn clone(&self) -> Self {
    Observer {
      receiver_id: self.receiver_id,
      receiver: self.receiver.clone(),
      callback: self.callback,
    }
  }
}

impl<A> Observer<A> {
  fn key(&self) -> (ObjectId, usize) {
    (self.receiver_id, self.callback as usize)
  }
}

/// Type-erased audience reference kept by [`AudienceMember`].
pub(crate) trait AudienceHandle: Send + Sync {
  fn remove_receiver(&self, id: ObjectId) -> bool;
}

struct AudienceInner<A: 'static> {
  observers: Mutex<Vec<Observer<A>>>,
}

impl<A> AudienceHandle for AudienceInner<A> {
  fn remove_receiver(&self, id: ObjectId) -> bool {
    let mut observers = recover_poison(self.observers.lock());
    let before = observers.len();
    observers.retain(|obs| obs.receiver_id != id);
    observers.len() != before
  }
}

/// Sorted observer set; iteration order is `(receiver id, callback)`.
pub struct Audience<A: 'static> {
  inner: Arc<AudienceInner<A>>,
}

impl<A> Default for Audience<A> {
  fn default() -> Self {
    Audience::new()
  }
}

impl<A> Audience<A> {
  pub fn new() -> Audience<A> {
    Audience { inner: Arc::new(AudienceInner { observers: Mutex::new(Vec::new()) }) }
  }

  fn handle(&self) -> Weak<dyn AudienceHandle> {
    let inner: Arc<dyn AudienceHandle> = self.inner.clone();
    Arc::downgrade(&inner)
  }

  /// Installs `(receiver, callback)`. Returns false when the exact pair is
  /// already present; duplicates are never stored.
  pub fn insert<T: Object>(&self, receiver: &Arc<T>, callback: ObserverFn<A>) -> bool {
    let receiver_id = receiver.core().id();
    let as_object: Arc<dyn Object> = Arc::clone(receiver) as Arc<dyn Object>;
    let inserted = {
      let mut observers = recover_poison(self.inner.observers.lock());
      let key = (receiver_id, callback as usize);
      match observers.binary_search_by_key(&key, Observer::key) {
        Ok(_) => false,
        Err(pos) => {
          observers.insert(
            pos,
            Observer { receiver_id, receiver: Arc::downgrade(&as_object), callback },
          );
          true
        }
      }
    };
    if inserted {
      receiver.core().member().enroll(self.handle());
    }
    inserted
  }

  /// Removes exactly `(receiver, callback)`. Removing a missing pair is a
  /// no-op.
  pub fn remove<T: Object>(&self, receiver: &Arc<T>, callback: ObserverFn<A>) -> bool {
    let receiver_id = receiver.core().id();
    let (removed, receiver_gone) = {
      let mut observers = recover_poison(self.inner.observers.lock());
      let key = (receiver_id, callback as usize);
      match observers.binary_search_by_key(&key, Observer::key) {
        Ok(pos) => {
          observers.remove(pos);
          let any_left = observers.iter().any(|obs| obs.receiver_id == receiver_id);
          (true, !any_left)
        }
        Err(_) => (false, false),
      }
    };
    if receiver_gone {
      receiver.core().member().dismiss(&self.handle());
    }
    removed
  }

  /// Removes every observer whose receiver is `receiver`.
  pub fn remove_object<T: Object>(&self, receiver: &Arc<T>) -> bool {
    let removed = self.inner.remove_receiver(receiver.core().id());
    if removed {
      receiver.core().member().dismiss(&self.handle());
    }
    removed
  }

  /// Invokes every observer in sorted order with `args`. The observer list
  /// is snapshotted on entry: observers may insert or remove (including
  /// themselves) during the notification, affecting only later
  /// notifications. Receivers that have died are skipped and pruned.
  pub fn notify(&self, args: &A) {
    let snapshot: Vec<Observer<A>> = recover_poison(self.inner.observers.lock()).clone();
    let mut saw_dead = false;
    for observer in &snapshot {
      match observer.receiver.upgrade() {
        Some(receiver) => (observer.callback)(&receiver, args),
        None => saw_dead = true,
      }
    }
    if saw_dead {
      let mut observers = recover_poison(self.inner.observers.lock());
      observers.retain(|obs| obs.receiver.strong_count() > 0);
    }
  }

  pub fn observer_count(&self) -> usize {
    recover_poison(self.inner.observers.lock()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.observer_count() == 0
  }
}

impl<A> fmt::Debug for Audience<A> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Audience[{}]", self.observer_count())
  }
}

/// Per-object record of the audiences currently observing it.
pub struct AudienceMember {
  audiences: Mutex<Vec<Weak<dyn AudienceHandle>>>,
}

impl Default for AudienceMember {
  fn default() -> Self {
    AudienceMember::new()
  }
}

impl AudienceMember {
  pub fn new() -> AudienceMember {
    AudienceMember { audiences: Mutex::new(Vec::new()) }
  }

  pub(crate) fn enroll(&self, handle: Weak<dyn AudienceHandle>) {
    let mut audiences = recover_poison(self.audiences.lock());
    if !audiences.iter().any(|existing| existing.ptr_eq(&handle)) {
      audiences.push(handle);
    }
  }

  pub(crate) fn dismiss(&self, handle: &Weak<dyn AudienceHandle>) {
    let mut audiences = recover_poison(self.audiences.lock());
    audiences.retain(|existing| !existing.ptr_eq(handle));
  }

  /// Called by the owning object's destructor: asks every registered
  /// audience to drop the observers whose receiver id matches. The list is
  /// drained first so no lock is held while audiences are updated.
  pub(crate) fn withdraw(&self, id: ObjectId) {
    let handles: Vec<Weak<dyn AudienceHandle>> =
      recover_poison(self.audiences.lock()).drain(..).collect();
    for handle in handles {
      if let Some(audience) = handle.upgrade() {
        audience.remove_receiver(id);
      }
    }
  }

  /// Number of audiences currently observing the owner.
  pub fn audience_count(&self) -> usize {
    recover_poison(self.audiences.lock()).len()
  }
}

impl fmt::Debug for AudienceMember {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "AudienceMember[{}]", self.audience_count())
  }
}
