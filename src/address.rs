//! Asynchronous host-name resolution.
#![allow(missing_docs)]

use crate::audience::Audience;
use crate::object::{Class, Object, ObjectCore, OBJECT_CLASS};
use crate::plinth_error::PlinthResult;
use crate::text::Text;
use crate::thread::Thread;
use crate::util::{recover_poison, unwrap_poison};
use crate::warn_log;
use std::any::Any;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};

pub static ADDRESS_CLASS: Class = Class::named("Address", Some(&OBJECT_CLASS));

struct AddressInner {
  host: String,
  port: u16,
  // -1 until a lookup succeeds; then the number of endpoints.
  count: i32,
  addrs: Vec<SocketAddr>,
  pending: Option<Arc<Thread>>,
}

/// A host name with resolved socket addresses. Resolution runs on its own
/// thread; observers of [`Address::lookup_finished`] hear about the result.
pub struct Address {
  core: ObjectCore,
  inner: Mutex<AddressInner>,
  lookup_finished: Audience<Arc<Address>>,
}

impl Address {
  pub fn new() -> Arc<Address> {
    Arc::new(Address {
      core: ObjectCore::new(&ADDRESS_CLASS),
      inner: Mutex::new(AddressInner {
        host: String::new(),
        port: 0,
        count: -1,
        addrs: Vec::new(),
        pending: None,
      }),
      lookup_finished: Audience::new(),
    })
  }

  /// Notified exactly once per lookup, from the resolver thread, after the
  /// result has been recorded.
  pub fn lookup_finished(&self) -> &Audience<Arc<Address>> {
    &self.lookup_finished
  }

  pub fn host_name(&self) -> Text {
    Text::from(recover_poison(self.inner.lock()).host.as_str())
  }

  pub fn port(&self) -> u16 {
    recover_poison(self.inner.lock()).port
  }

  pub fn count(&self) -> i32 {
    recover_poison(self.inner.lock()).count
  }

  /// True while a resolver thread is running.
  pub fn is_pending(&self) -> bool {
    recover_poison(self.inner.lock()).pending.is_some()
  }

  pub fn is_valid(&self) -> bool {
    self.count() >= 0
  }

  pub fn is_host_found(&self) -> bool {
    self.count() > 0
  }

  /// Starts resolving `host`. Ignored while an earlier lookup is pending.
  pub fn lookup(self: &Arc<Self>, host: &str, port: u16) -> PlinthResult<()> {
    let thread = {
      let mut inner = unwrap_poison(self.inner.lock())?;
      if inner.pending.is_some() {
        return Ok(());
      }
      inner.host = host.to_string();
      inner.port = port;
      inner.count = -1;
      inner.addrs.clear();

      let this = Arc::clone(self);
      let host = host.to_string();
      let thread = Thread::new(move |_thread| {
        let resolved: std::io::Result<Vec<SocketAddr>> =
          (host.as_str(), port).to_socket_addrs().map(Iterator::collect);
        {
          let mut inner = recover_poison(this.inner.lock());
          match resolved {
            Ok(addrs) => {
              inner.count = addrs.len() as i32;
              inner.addrs = addrs;
            }
            Err(err) => {
              warn_log!("plinth: address: host lookup for {:?} failed: {}", host, err);
              inner.count = -1;
            }
          }
        }
        this.lookup_finished.notify(&this);
        recover_poison(this.inner.lock()).pending = None;
        0
      });
      thread.set_name("address-lookup");
      inner.pending = Some(Arc::clone(&thread));
      thread
    };
    if let Err(err) = thread.start() {
      recover_poison(self.inner.lock()).pending = None;
      return Err(err);
    }
    Ok(())
  }

  /// Joins the resolver if one is running; otherwise returns immediately.
  pub fn wait_for_finished(&self) {
    // Take a strong reference under the lock so the thread object cannot
    // disappear between the check and the join.
    let pending = recover_poison(self.inner.lock()).pending.clone();
    if let Some(thread) = pending {
      thread.join();
    }
  }

  /// The first resolved endpoint, carrying address family and port.
  pub fn socket_params(&self) -> Option<SocketAddr> {
    recover_poison(self.inner.lock()).addrs.first().copied()
  }

  /// All resolved endpoints.
  pub fn endpoints(&self) -> Vec<SocketAddr> {
    recover_poison(self.inner.lock()).addrs.clone()
  }

  /// Formats the first endpoint as `HOST port:PORT`; the port part is left
  /// out when the port is zero.
  pub fn to_text(&self) -> Text {
    let inner = recover_poison(self.inner.lock());
    match inner.addrs.first() {
      Some(addr) if addr.port() != 0 => {
        Text::from_fmt(format_args!("{} port:{}", addr.ip(), addr.port()))
      }
      Some(addr) => Text::from_fmt(format_args!("{}", addr.ip())),
      None => Text::new(),
    }
  }
}

impl Object for Address {
  fn core(&self) -> &ObjectCore {
    &self.core
  }

  fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }
}

impl std::fmt::Debug for Address {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let inner = recover_poison(self.inner.lock());
    write!(f, "Address({:?}, count={})", inner.host, inner.count)
  }
}
