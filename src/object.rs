//! Reference-counted objects with class descriptors.
//!
//! Shared ownership is `Arc`; destruction order is the normal `Drop` chain.
//! What the class descriptor adds is dynamic sub-typing: every object type
//! carries a static [`Class`] with a parent pointer, so [`is_instance`] can
//! answer "is this a Thread?" for an `Arc<dyn Object>` without knowing the
//! concrete type, and [`downcast_object`] recovers the concrete handle.
#![allow(missing_docs)]

use crate::audience::AudienceMember;
use crate::util;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Static type descriptor. One per object type, linked to its parent.
pub struct Class {
  pub name: &'static str,
  pub parent: Option<&'static Class>,
}

impl Class {
  pub const fn named(name: &'static str, parent: Option<&'static Class>) -> Class {
    Class { name, parent }
  }

  /// Walks the parent chain looking for `ancestor` by identity.
  pub fn is_derived_from(&self, ancestor: &Class) -> bool {
    let mut current = Some(self);
    while let Some(class) = current {
      if std::ptr::eq(class, ancestor) {
        return true;
      }
      current = class.parent;
    }
    false
  }
}

impl fmt::Debug for Class {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.parent {
      Some(parent) => write!(f, "Class({} : {})", self.name, parent.name),
      None => write!(f, "Class({})", self.name),
    }
  }
}

/// The root of every class chain.
pub static OBJECT_CLASS: Class = Class::named("Object", None);

/// Process-unique object identity.
pub type ObjectId = u128;

/// State every object embeds: the class pointer, a unique id, and the
/// record of audiences currently observing the object.
pub struct ObjectCore {
  class: &'static Class,
  id: ObjectId,
  member: AudienceMember,
}

impl ObjectCore {
  pub fn new(class: &'static Class) -> ObjectCore {
    ObjectCore { class, id: util::next_id(), member: AudienceMember::new() }
  }

  pub fn class(&self) -> &'static Class {
    self.class
  }

  pub fn id(&self) -> ObjectId {
    self.id
  }

  pub fn member(&self) -> &AudienceMember {
    &self.member
  }
}

impl Drop for ObjectCore {
  // A dying object takes its observers with it: every audience listed in
  // the member record drops the entries whose receiver is this object.
  fn drop(&mut self) {
    self.member.withdraw(self.id);
  }
}

impl fmt::Debug for ObjectCore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ObjectCore({}, id={:x})", self.class.name, self.id)
  }
}

/// Implemented by every reference-counted object type in the crate.
pub trait Object: Send + Sync + 'static {
  fn core(&self) -> &ObjectCore;

  /// Hook for [`downcast_object`]; implementations return `self`.
  fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

pub fn class_of(object: &dyn Object) -> &'static Class {
  object.core().class()
}

/// True when the object's class equals `class` or derives from it.
pub fn is_instance(object: &dyn Object, class: &Class) -> bool {
  class_of(object).is_derived_from(class)
}

/// Recovers the concrete handle from a type-erased object reference.
pub fn downcast_object<T: Object>(object: &Arc<dyn Object>) -> Option<Arc<T>> {
  Arc::clone(object).as_any().downcast::<T>().ok()
}

#[cfg(test)]
mod test {
  use super::*;

  static BASE: Class = Class::named("Base", Some(&OBJECT_CLASS));
  static DERIVED: Class = Class::named("Derived", Some(&BASE));

  struct Probe {
    core: ObjectCore,
    tag: u32,
  }

  impl Object for Probe {
    fn core(&self) -> &ObjectCore {
      &self.core
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
      self
    }
  }

  #[test]
  fn class_chain() {
    assert!(DERIVED.is_derived_from(&DERIVED));
    assert!(DERIVED.is_derived_from(&BASE));
    assert!(DERIVED.is_derived_from(&OBJECT_CLASS));
    assert!(!BASE.is_derived_from(&DERIVED));
  }

  #[test]
  fn instance_checks_and_downcast() {
    let probe = Arc::new(Probe { core: ObjectCore::new(&DERIVED), tag: 77 });
    let erased: Arc<dyn Object> = probe;
    assert!(is_instance(erased.as_ref(), &BASE));
    assert!(is_instance(erased.as_ref(), &DERIVED));
    let back = downcast_object::<Probe>(&erased).expect("downcast");
    assert_eq!(back.tag, 77);
  }

  #[test]
  fn ids_are_unique() {
    let a = ObjectCore::new(&BASE);
    let b = ObjectCore::new(&BASE);
    assert_ne!(a.id(), b.id());
  }
}
