//! TCP client connection with sender and receiver worker threads.
//!
//! A Socket owns two in-memory [`Buffer`]s. Writers append to the output
//! Buffer and a dedicated sender thread drains it into the TCP stream;
//! a receiver thread blocks in `recv` and appends whatever arrives to the
//! input Buffer, notifying `ready_read` once per batch. All state changes
//! funnel through one mutex; the workers touch it only briefly.
//!
//! Observers of `connected` are notified while the socket is locked, so a
//! `connected` callback must defer actual I/O to another thread.
#![allow(missing_docs)]

use crate::address::Address;
use crate::audience::Audience;
use crate::buffer::Buffer;
use crate::object::{downcast_object, Class, Object, ObjectCore, OBJECT_CLASS};
use crate::stream::{ByteOrder, Stream};
use crate::sync::Condition;
use crate::thread::Thread;
use crate::util;
use crate::util::recover_poison;
use crate::{debug_log, error_log, trace_log, warn_log};
use defer_heavy::defer;
use std::any::Any;
use std::io;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

pub static SOCKET_CLASS: Class = Class::named("Socket", Some(&OBJECT_CLASS));

const RECEIVE_BUF_SIZE: usize = 0x4000;
const DRAIN_RECHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStatus {
  AddressLookup,
  Initialized,
  Connecting,
  Connected,
  Disconnecting,
  Disconnected,
}

/// Payload of the `error` audience: OS error code and message.
#[derive(Debug, Clone)]
pub struct SocketError {
  pub code: i32,
  pub message: String,
}

struct SocketState {
  status: SocketStatus,
  address: Arc<Address>,
  stream: Option<TcpStream>,
  connecting: Option<Arc<Thread>>,
  sender: Option<Arc<Thread>>,
  receiver: Option<Arc<Thread>>,
  exit: Arc<AtomicBool>,
}

/// A TCP connection that is also a [`Stream`].
pub struct Socket {
  core: ObjectCore,
  this: Weak<Socket>,
  input: Buffer,
  output: Buffer,
  state: Mutex<SocketState>,
  all_sent: Condition,
  stream_pos: AtomicU64,
  order: Mutex<ByteOrder>,
  connected: Audience<Arc<Socket>>,
  disconnected: Audience<Arc<Socket>>,
  ready_read: Audience<Arc<Socket>>,
  write_finished: Audience<Arc<Socket>>,
  error: Audience<SocketError>,
}

impl Socket {
  /// Starts in `addressLookup`: the host name resolves in the background
  /// and the socket becomes `initialized` when the lookup succeeds.
  pub fn new(host: &str, port: u16) -> Arc<Socket> {
    let address = Address::new();
    let socket = Socket::make(Arc::clone(&address), SocketStatus::AddressLookup);
    address.lookup_finished().insert(&socket, Socket::address_looked_up);
    if address.lookup(host, port).is_err() {
      recover_poison(socket.state.lock()).status = SocketStatus::Disconnected;
    }
    socket
  }

  /// Adopts an already (or about to be) resolved address; waits for a
  /// pending lookup to finish first.
  pub fn with_address(address: &Arc<Address>) -> Arc<Socket> {
    address.wait_for_finished();
    Socket::make(Arc::clone(address), SocketStatus::Initialized)
  }

  fn make(address: Arc<Address>, status: SocketStatus) -> Arc<Socket> {
    let socket = Arc::new_cyclic(|this| Socket {
      core: ObjectCore::new(&SOCKET_CLASS),
      this: this.clone(),
      input: Buffer::new(),
      output: Buffer::new(),
      state: Mutex::new(SocketState {
        status,
        address,
        stream: None,
        connecting: None,
        sender: None,
        receiver: None,
        exit: Arc::new(AtomicBool::new(false)),
      }),
      all_sent: Condition::new(),
      stream_pos: AtomicU64::new(0),
      order: Mutex::new(ByteOrder::Little),
      connected: Audience::new(),
      disconnected: Audience::new(),
      ready_read: Audience::new(),
      write_finished: Audience::new(),
      error: Audience::new(),
    });
    socket.input.open_empty();
    socket.output.open_empty();
    socket
  }

  fn arc(&self) -> Arc<Socket> {
    util::unwrap_some(self.this.upgrade())
  }

  pub fn connected(&self) -> &Audience<Arc<Socket>> {
    &self.connected
  }

  /// Always the last notification a session delivers.
  pub fn disconnected(&self) -> &Audience<Arc<Socket>> {
    &self.disconnected
  }

  /// Notified once per received batch, after the bytes have been appended
  /// to the input Buffer.
  pub fn ready_read(&self) -> &Audience<Arc<Socket>> {
    &self.ready_read
  }

  /// Notified whenever the sender drains the output Buffer completely.
  pub fn write_finished(&self) -> &Audience<Arc<Socket>> {
    &self.write_finished
  }

  pub fn error(&self) -> &Audience<SocketError> {
    &self.error
  }

  pub fn status(&self) -> SocketStatus {
    recover_poison(self.state.lock()).status
  }

  pub fn is_open(&self) -> bool {
    matches!(self.status(), SocketStatus::Connecting | SocketStatus::Connected)
  }

  pub fn address(&self) -> Arc<Address> {
    Arc::clone(&recover_poison(self.state.lock()).address)
  }

  /// Unread bytes waiting in the input Buffer.
  pub fn received_bytes(&self) -> usize {
    self.input.pending()
  }

  fn address_looked_up(receiver: &Arc<dyn Object>, _address: &Arc<Address>) {
    let Some(socket) = downcast_object::<Socket>(receiver) else {
      return;
    };
    let mut state = recover_poison(socket.state.lock());
    match state.status {
      SocketStatus::AddressLookup => {
        trace_log!("plinth: socket {:x}: address resolved", socket.core.id());
        state.status = SocketStatus::Initialized;
      }
      SocketStatus::Connecting => {
        // open() was called while the lookup was still pending.
        if state.connecting.is_some() || state.stream.is_some() {
          // a direct open already raced ahead of this notification
        } else if state.address.is_valid() {
          socket.open_locked(&mut state);
        } else {
          state.status = SocketStatus::Disconnected;
          drop(state);
          socket.error.notify(&SocketError {
            code: -1,
            message: "host name lookup failed".to_string(),
          });
          socket.disconnected.notify(&socket);
        }
      }
      _ => {}
    }
  }

  /// Begins connecting; returns immediately. False when the socket is
  /// already open or the address is known to be invalid.
  pub fn open(self: &Arc<Self>) -> bool {
    let mut state = recover_poison(self.state.lock());
    if matches!(state.status, SocketStatus::Connecting | SocketStatus::Connected) {
      return false;
    }
    self.open_locked(&mut state)
  }

  fn open_locked(self: &Arc<Self>, state: &mut SocketState) -> bool {
    // Validity is checked first: the lookup may have finished between the
    // caller's last observation and this lock acquisition.
    if !state.address.is_valid() {
      // Deferring to the lookup observer is only sound while it has not
      // fired yet, which is exactly the addressLookup state.
      if state.status == SocketStatus::AddressLookup && state.address.is_pending() {
        state.status = SocketStatus::Connecting;
        return true;
      }
      return false;
    }
    let Some(endpoint) = state.address.socket_params() else {
      return false;
    };
    state.status = SocketStatus::Connecting;
    let this = self.arc();
    let thread = Thread::new(move |_thread| {
      Socket::connect_async(&this, endpoint);
      0
    });
    thread.set_name("socket-connect");
    state.connecting = Some(Arc::clone(&thread));
    if thread.start().is_err() {
      state.connecting = None;
      state.status = SocketStatus::Disconnected;
      return false;
    }
    true
  }

  // Runs on the connector thread; the blocking connect happens here so
  // open() does not stall the caller.
  fn connect_async(socket: &Arc<Socket>, endpoint: SocketAddr) {
    let result = TcpStream::connect(endpoint);
    let mut state = recover_poison(socket.state.lock());
    state.connecting = None;
    if state.status != SocketStatus::Connecting {
      // Closed while we were connecting; the stream (if any) just drops.
      return;
    }
    match result {
      Ok(stream) => {
        state.stream = Some(stream);
        if socket.start_workers(&mut state) {
          state.status = SocketStatus::Connected;
          debug_log!("plinth: socket {:x}: connected to {}", socket.core.id(), endpoint);
          // The socket stays locked during this notification; observers
          // must defer I/O to another thread.
          socket.connected.notify(&socket.arc());
        } else {
          state.stream = None;
          state.status = SocketStatus::Disconnected;
          drop(state);
          socket.disconnected.notify(&socket.arc());
        }
      }
      Err(err) => {
        state.status = SocketStatus::Disconnected;
        drop(state);
        warn_log!("plinth: socket {:x}: connection failed: {}", socket.core.id(), err);
        socket.error.notify(&SocketError {
          code: err.raw_os_error().unwrap_or(-1),
          message: err.to_string(),
        });
        socket.disconnected.notify(&socket.arc());
      }
    }
  }

  fn start_workers(self: &Arc<Self>, state: &mut SocketState) -> bool {
    let Some(stream) = state.stream.as_ref() else {
      return false;
    };
    let (Ok(write_half), Ok(read_half)) = (stream.try_clone(), stream.try_clone()) else {
      return false;
    };
    let exit = Arc::new(AtomicBool::new(false));
    state.exit = Arc::clone(&exit);

    let sender = {
      let this = self.arc();
      let exit = Arc::clone(&exit);
      Thread::new(move |_thread| Socket::run_sender(&this, &exit, &write_half))
    };
    sender.set_name("socket-send");
    let receiver = {
      let this = self.arc();
      let exit = Arc::clone(&exit);
      Thread::new(move |_thread| Socket::run_receiver(&this, &exit, &read_half))
    };
    receiver.set_name("socket-recv");

    if sender.start().is_err() || receiver.start().is_err() {
      exit.store(true, Ordering::SeqCst);
      self.output.signal_data();
      return false;
    }
    state.sender = Some(sender);
    state.receiver = Some(receiver);
    true
  }

  fn run_sender(socket: &Arc<Socket>, exit: &AtomicBool, stream: &TcpStream) -> i32 {
    defer! {
      // A dying sender must not leave close() or flush() waiting forever.
      socket.all_sent.broadcast();
    }
    loop {
      if exit.load(Ordering::SeqCst) {
        return 0;
      }
      let batch = socket.output.take_all_or_wait(None);
      if batch.is_empty() {
        // Woken without data: shutdown or a spurious wakeup.
        continue;
      }
      let mut remaining = batch.as_slice();
      while !remaining.is_empty() {
        match io::Write::write(&mut &*stream, remaining) {
          Ok(0) => return socket.worker_error(exit, ErrorKind::WriteZero.into()),
          Ok(sent) => remaining = remaining.get(sent..).unwrap_or_default(),
          Err(err) if err.kind() == ErrorKind::Interrupted => {}
          Err(err) => return socket.worker_error(exit, err),
        }
      }
      if socket.output.is_empty() {
        socket.all_sent.broadcast();
        socket.write_finished.notify(&socket.arc());
      }
    }
  }

  fn run_receiver(socket: &Arc<Socket>, exit: &AtomicBool, stream: &TcpStream) -> i32 {
    let mut buf = [0u8; RECEIVE_BUF_SIZE];
    loop {
      if exit.load(Ordering::SeqCst) {
        return 0;
      }
      match io::Read::read(&mut &*stream, &mut buf) {
        Ok(0) => {
          if !exit.load(Ordering::SeqCst) {
            debug_log!("plinth: socket {:x}: remote closed the connection", socket.core.id());
            socket.arc().close();
          }
          return 0;
        }
        Ok(received) => {
          socket.input.append(buf.get(..received).unwrap_or_default());
          socket.ready_read.notify(&socket.arc());
        }
        Err(err) if err.kind() == ErrorKind::Interrupted => {}
        Err(err) => return socket.worker_error(exit, err),
      }
    }
  }

  // Worker-side failure: report through the error audience, then tear the
  // session down. During shutdown the same conditions are not errors.
  fn worker_error(self: &Arc<Self>, exit: &AtomicBool, err: io::Error) -> i32 {
    if exit.load(Ordering::SeqCst) {
      return 0;
    }
    let code = err.raw_os_error().unwrap_or(-1);
    error_log!("plinth: socket {:x}: worker failed: {}", self.core.id(), err);
    self.error.notify(&SocketError { code, message: err.to_string() });
    self.close();
    code
  }

  /// Closes the session: drains pending output, shuts the stream down,
  /// stops both workers, and delivers the final `disconnected`
  /// notification. Closing an unopened socket cancels the address lookup
  /// and goes straight to `disconnected`.
  pub fn close(self: &Arc<Self>) {
    let mut state = recover_poison(self.state.lock());
    match state.status {
      SocketStatus::Disconnected | SocketStatus::Disconnecting => return,
      SocketStatus::AddressLookup | SocketStatus::Initialized => {
        state.status = SocketStatus::Disconnected;
        let address = Arc::clone(&state.address);
        drop(state);
        address.lookup_finished().remove_object(self);
        self.disconnected.notify(self);
        return;
      }
      SocketStatus::Connecting | SocketStatus::Connected => {}
    }
    if state.status == SocketStatus::Connected {
      // Let the sender finish what has been queued; give up if it dies.
      // A close initiated by the sender itself must not wait on it.
      loop {
        if self.output.is_empty() {
          break;
        }
        let sender_can_drain = state.sender.as_ref().is_some_and(|thread| {
          thread.is_running()
            && !crate::thread::current_thread().is_some_and(|cur| Arc::ptr_eq(&cur, thread))
        });
        if !sender_can_drain {
          break;
        }
        let (returned, _) = self.all_sent.timed_wait(state, Instant::now() + DRAIN_RECHECK_INTERVAL);
        state = returned;
      }
      // Another closer may have won the race while the lock was released.
      if matches!(state.status, SocketStatus::Disconnecting | SocketStatus::Disconnected) {
        return;
      }
    }
    state.status = SocketStatus::Disconnecting;
    trace_log!("plinth: socket {:x}: disconnecting", self.core.id());
    // The exit flag goes up before the shutdown so the workers treat the
    // resulting I/O failures as shutdown, not as errors to report.
    state.exit.store(true, Ordering::SeqCst);
    if let Some(stream) = state.stream.take() {
      // Unblocks a receiver sitting in recv and a sender mid-write.
      let _ = stream.shutdown(Shutdown::Both);
    }
    let connecting = state.connecting.take();
    let sender = state.sender.take();
    let receiver = state.receiver.take();
    drop(state);
    self.output.signal_data();
    self.input.signal_data();
    if let Some(thread) = connecting {
      thread.join();
    }
    if let Some(thread) = sender {
      thread.join();
    }
    if let Some(thread) = receiver {
      thread.join();
    }
    recover_poison(self.state.lock()).status = SocketStatus::Disconnected;
    self.disconnected.notify(self);
  }
}

impl Stream for Socket {
  /// Sockets are not seekable; the position is returned unchanged.
  fn seek(&self, _offset: u64) -> u64 {
    self.pos()
  }

  fn read_data(&self, out: &mut [u8]) -> usize {
    let read = self.input.read_data(out);
    self.input.compact();
    self.stream_pos.fetch_add(read as u64, Ordering::Relaxed);
    read
  }

  fn write_data(&self, data: &[u8]) -> usize {
    self.output.append(data);
    self.stream_pos.fetch_add(data.len() as u64, Ordering::Relaxed);
    data.len()
  }

  /// Blocks until the sender has drained the output Buffer.
  fn flush(&self) {
    let mut state = recover_poison(self.state.lock());
    loop {
      if state.status != SocketStatus::Connected || self.output.is_empty() {
        return;
      }
      if !state.sender.as_ref().is_some_and(|thread| thread.is_running()) {
        return;
      }
      let (returned, _) = self.all_sent.timed_wait(state, Instant::now() + DRAIN_RECHECK_INTERVAL);
      state = returned;
    }
  }

  fn pos(&self) -> u64 {
    self.stream_pos.load(Ordering::Relaxed)
  }

  fn size(&self) -> u64 {
    self.pos() + self.input.pending() as u64
  }

  fn byte_order(&self) -> ByteOrder {
    *recover_poison(self.order.lock())
  }

  fn set_byte_order(&self, order: ByteOrder) {
    *recover_poison(self.order.lock()) = order;
  }
}

impl Object for Socket {
  fn core(&self) -> &ObjectCore {
    &self.core
  }

  fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }
}

impl Drop for Socket {
  fn drop(&mut self) {
    let status = recover_poison(self.state.lock()).status;
    if !matches!(
      status,
      SocketStatus::Disconnected | SocketStatus::AddressLookup | SocketStatus::Initialized
    ) {
      warn_log!("plinth: socket {:x}: dropped without close, status {:?}", self.core.id(), status);
    }
  }
}

impl std::fmt::Debug for Socket {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Socket({:x}, {:?})", self.core.id(), self.status())
  }
}
