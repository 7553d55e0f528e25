//! Asynchronous TLS client over a [`Socket`].
//!
//! The TLS engine runs as an explicit transducer over two byte queues:
//! encrypted output is drained with `write_tls` and forwarded to the
//! socket, encrypted input arrives through the socket's `ready_read`
//! notifications and is fed back with `read_tls`. A dedicated worker
//! thread drives the handshake and pushes pending plaintext; decryption
//! happens on the socket's receiver thread.
//!
//! No certificate verification is performed; the server certificate is
//! surfaced through [`TlsRequest::server_certificate`] so callers can
//! apply their own trust policy.
#![allow(missing_docs)]

use crate::audience::Audience;
use crate::block::Block;
use crate::object::{downcast_object, Class, Object, ObjectCore, OBJECT_CLASS};
use crate::plinth_error::{PlinthResult, TlsError};
use crate::socket::{Socket, SocketError};
use crate::stream::Stream;
use crate::text::Text;
use crate::thread::{self, Thread};
use crate::tls_certificate::TlsCertificate;
use crate::util;
use crate::util::{recover_poison, unwrap_poison};
use crate::{debug_log, trace_log, warn_log};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};
use std::any::Any;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, LazyLock, Mutex, Weak};

pub static TLS_REQUEST_CLASS: Class = Class::named("TlsRequest", Some(&OBJECT_CLASS));

const PUMP_IDLE_SLEEP_SECONDS: f64 = 0.05;
const PLAINTEXT_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRequestStatus {
  Initialized,
  Submitted,
  Finished,
  Error,
}

// The original client performs no certificate verification either; trust
// decisions belong to the caller, who gets the peer certificate.
#[derive(Debug)]
struct AcceptAnyServerCert {
  provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
  fn verify_server_cert(
    &self,
    _end_entity: &CertificateDer<'_>,
    _intermediates: &[CertificateDer<'_>],
    _server_name: &ServerName<'_>,
    _ocsp_response: &[u8],
    _now: UnixTime,
  ) -> Result<ServerCertVerified, rustls::Error> {
    Ok(ServerCertVerified::assertion())
  }

  fn verify_tls12_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer<'_>,
    _dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn verify_tls13_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer<'_>,
    _dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    self.provider.signature_verification_algorithms.supported_schemes()
  }
}

// One shared session configuration for the whole process.
static CLIENT_CONFIG: LazyLock<Arc<ClientConfig>> = LazyLock::new(|| {
  let provider = Arc::new(rustls::crypto::ring::default_provider());
  let config = util::unwrap_ok(
    ClientConfig::builder_with_provider(Arc::clone(&provider))
      .with_safe_default_protocol_versions(),
  )
  .dangerous()
  .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
  .with_no_client_auth();
  Arc::new(config)
});

struct RequestInner {
  host: String,
  port: u16,
  content: Block,
  result: Block,
  status: TlsRequestStatus,
  socket: Option<Arc<Socket>>,
  worker: Option<Arc<Thread>>,
  session: Option<ClientConnection>,
  pending_plain: Block,
  server_certificate: Option<TlsCertificate>,
}

impl RequestInner {
  // Drains the session's encrypted output into the socket. False on a
  // transport-level failure.
  fn flush_tls_output(&mut self) -> bool {
    let Some(socket) = self.socket.clone() else {
      return false;
    };
    let Some(session) = self.session.as_mut() else {
      return false;
    };
    while session.wants_write() {
      let mut out = Vec::new();
      match session.write_tls(&mut out) {
        Ok(0) => break,
        Ok(_) => {
          socket.write_data(&out);
        }
        Err(err) => {
          warn_log!("plinth: tls: write_tls failed: {}", err);
          return false;
        }
      }
    }
    true
  }

  // One pump step on the worker thread: drive the handshake output and
  // hand pending plaintext to the session. True when progress was made.
  fn pump(&mut self) -> Result<bool, ()> {
    let mut progressed = false;
    let mut failed = false;
    let Some(session) = self.session.as_mut() else {
      return Ok(false);
    };
    if session.wants_write() {
      progressed = true;
    }
    if !session.is_handshaking() && !self.pending_plain.is_empty() {
      match session.writer().write(self.pending_plain.as_slice()) {
        Ok(written) if written > 0 => {
          self.pending_plain.remove(0, written);
          progressed = true;
        }
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::WouldBlock => {}
        Err(err) => {
          warn_log!("plinth: tls: plaintext write failed: {}", err);
          failed = true;
        }
      }
    }
    if failed || !self.flush_tls_output() {
      return Err(());
    }
    Ok(progressed)
  }

  // Feeds received encrypted bytes to the session, advancing the handshake
  // and collecting any decrypted plaintext. False on a fatal TLS error.
  fn feed(&mut self, data: &Block, plaintext_out: &mut Block) -> bool {
    let mut raw = data.as_slice();
    {
      let Some(session) = self.session.as_mut() else {
        return true;
      };
      while !raw.is_empty() {
        match session.read_tls(&mut raw) {
          Ok(0) => break,
          Ok(_) => {}
          Err(err) => {
            warn_log!("plinth: tls: read_tls failed: {}", err);
            return false;
          }
        }
        if let Err(err) = session.process_new_packets() {
          warn_log!("plinth: tls: protocol failure: {}", err);
          return false;
        }
        let mut buf = [0u8; PLAINTEXT_CHUNK];
        loop {
          match session.reader().read(&mut buf) {
            Ok(0) => break,
            Ok(count) => plaintext_out.append_data(buf.get(..count).unwrap_or_default()),
            Err(err) if err.kind() == ErrorKind::WouldBlock => break,
            Err(_) => break,
          }
        }
      }
    }
    self.capture_server_certificate();
    // The session may have produced handshake or close records to send.
    self.flush_tls_output()
  }

  fn capture_server_certificate(&mut self) {
    if self.server_certificate.is_some() {
      return;
    }
    let Some(session) = self.session.as_ref() else {
      return;
    };
    if let Some(certs) = session.peer_certificates() {
      if let Some(first) = certs.first() {
        if let Ok(certificate) = TlsCertificate::from_der(first.as_ref()) {
          self.server_certificate = Some(certificate);
        }
      }
    }
  }
}

/// Submits one request body over TLS and accumulates the response.
pub struct TlsRequest {
  core: ObjectCore,
  this: Weak<TlsRequest>,
  inner: Mutex<RequestInner>,
  ready_read: Audience<Arc<TlsRequest>>,
  finished: Audience<Arc<TlsRequest>>,
}

impl TlsRequest {
  pub fn new() -> Arc<TlsRequest> {
    Arc::new_cyclic(|this| TlsRequest {
      core: ObjectCore::new(&TLS_REQUEST_CLASS),
      this: this.clone(),
      inner: Mutex::new(RequestInner {
        host: String::new(),
        port: 0,
        content: Block::new(),
        result: Block::new(),
        status: TlsRequestStatus::Initialized,
        socket: None,
        worker: None,
        session: None,
        pending_plain: Block::new(),
        server_certificate: None,
      }),
      ready_read: Audience::new(),
      finished: Audience::new(),
    })
  }

  fn arc(&self) -> Arc<TlsRequest> {
    util::unwrap_some(self.this.upgrade())
  }

  /// Notified whenever decrypted response bytes have been appended.
  pub fn ready_read(&self) -> &Audience<Arc<TlsRequest>> {
    &self.ready_read
  }

  /// Notified once the request has reached Finished or Error.
  pub fn finished(&self) -> &Audience<Arc<TlsRequest>> {
    &self.finished
  }

  pub fn set_url(&self, host: &str, port: u16) {
    let mut inner = recover_poison(self.inner.lock());
    inner.host = host.to_string();
    inner.port = port;
  }

  pub fn set_content(&self, content: &Block) {
    recover_poison(self.inner.lock()).content = content.clone();
  }

  pub fn status(&self) -> TlsRequestStatus {
    recover_poison(self.inner.lock()).status
  }

  /// Bytes of decrypted response accumulated so far.
  pub fn received_bytes(&self) -> usize {
    recover_poison(self.inner.lock()).result.size()
  }

  /// Returns and clears the accumulated response.
  pub fn read_all(&self) -> Block {
    let mut inner = recover_poison(self.inner.lock());
    std::mem::take(&mut inner.result)
  }

  pub fn server_certificate(&self) -> Option<TlsCertificate> {
    recover_poison(self.inner.lock()).server_certificate.clone()
  }

  /// Opens the socket and begins the TLS session. The request moves to
  /// Submitted; completion is observable via [`TlsRequest::finished`] or
  /// [`TlsRequest::wait_for_finished`].
  pub fn submit(self: &Arc<Self>) -> PlinthResult<()> {
    let socket = {
      let mut inner = unwrap_poison(self.inner.lock())?;
      if inner.status == TlsRequestStatus::Submitted {
        return Err(TlsError::SessionSetup("request already submitted".to_string()).into());
      }
      let server_name = ServerName::try_from(inner.host.clone())
        .map_err(|_| TlsError::InvalidHostName(inner.host.clone()))?;
      let session = ClientConnection::new(Arc::clone(&CLIENT_CONFIG), server_name)
        .map_err(|err| TlsError::SessionSetup(err.to_string()))?;
      inner.session = Some(session);
      inner.pending_plain = inner.content.clone();
      inner.result = Block::new();
      inner.server_certificate = None;
      inner.worker = None;
      let socket = Socket::new(&inner.host, inner.port);
      socket.connected().insert(self, Self::socket_connected);
      socket.disconnected().insert(self, Self::socket_disconnected);
      socket.ready_read().insert(self, Self::socket_ready_read);
      socket.error().insert(self, Self::socket_error);
      inner.socket = Some(Arc::clone(&socket));
      inner.status = TlsRequestStatus::Submitted;
      socket
    };
    debug_log!("plinth: tls request {:x}: submitted", self.core.id());
    socket.open();
    Ok(())
  }

  /// Closes the transport; the request winds down through the usual
  /// disconnect path.
  pub fn cancel(&self) {
    let socket = recover_poison(self.inner.lock()).socket.clone();
    if let Some(socket) = socket {
      socket.close();
    }
  }

  /// Blocks until the request leaves the Submitted state.
  pub fn wait_for_finished(&self) {
    loop {
      let (status, worker) = {
        let inner = recover_poison(self.inner.lock());
        (inner.status, inner.worker.clone())
      };
      if let Some(worker) = worker {
        worker.join();
        return;
      }
      if status != TlsRequestStatus::Submitted {
        return;
      }
      // Still connecting; the worker appears on the connected notification.
      thread::sleep(0.01);
    }
  }

  // The socket stays locked during the connected notification, so only
  // spawn the pump thread here and let it do the I/O.
  fn socket_connected(receiver: &Arc<dyn Object>, _socket: &Arc<Socket>) {
    let Some(request) = downcast_object::<TlsRequest>(receiver) else {
      return;
    };
    let this = Arc::clone(&request);
    let worker = Thread::new(move |_thread| TlsRequest::run_pump(&this));
    worker.set_name("tls-request");
    recover_poison(request.inner.lock()).worker = Some(Arc::clone(&worker));
    if worker.start().is_err() {
      recover_poison(request.inner.lock()).worker = None;
      request.fail();
    }
  }

  fn socket_disconnected(receiver: &Arc<dyn Object>, _socket: &Arc<Socket>) {
    let Some(request) = downcast_object::<TlsRequest>(receiver) else {
      return;
    };
    let worker = {
      let mut inner = recover_poison(request.inner.lock());
      if inner.status == TlsRequestStatus::Submitted {
        inner.status = TlsRequestStatus::Finished;
      }
      inner.worker.clone()
    };
    // Without a worker (the connection never came up) nobody else will
    // deliver the finished notification.
    if worker.is_none() {
      request.finished.notify(&request);
    }
  }

  fn socket_ready_read(receiver: &Arc<dyn Object>, socket: &Arc<Socket>) {
    use crate::stream::Stream as _;
    let Some(request) = downcast_object::<TlsRequest>(receiver) else {
      return;
    };
    let data = socket.read_all();
    if data.is_empty() {
      return;
    }
    let mut plaintext = Block::new();
    let ok = {
      let mut inner = recover_poison(request.inner.lock());
      let ok = inner.feed(&data, &mut plaintext);
      if !plaintext.is_empty() {
        inner.result.append(&plaintext);
      }
      ok
    };
    if !ok {
      request.fail();
      return;
    }
    if !plaintext.is_empty() {
      request.ready_read.notify(&request);
    }
  }

  fn socket_error(receiver: &Arc<dyn Object>, error: &SocketError) {
    let Some(request) = downcast_object::<TlsRequest>(receiver) else {
      return;
    };
    warn_log!(
      "plinth: tls request {:x}: socket error {}: {}",
      request.core.id(),
      error.code,
      error.message
    );
    request.fail();
  }

  // Fatal failure: flip to Error and close the transport. The lock is
  // released before closing; the socket close path may notify observers.
  fn fail(self: &Arc<Self>) {
    let socket = {
      let mut inner = recover_poison(self.inner.lock());
      if matches!(inner.status, TlsRequestStatus::Finished | TlsRequestStatus::Error) {
        return;
      }
      inner.status = TlsRequestStatus::Error;
      inner.socket.clone()
    };
    if let Some(socket) = socket {
      socket.close();
    }
    let worker = recover_poison(self.inner.lock()).worker.clone();
    if worker.is_none() {
      self.finished.notify(self);
    }
  }

  // Worker thread: drives handshake output and pending plaintext while the
  // request is in flight, sleeping briefly when there is nothing to do so
  // the loop does not spin while waiting for the peer.
  fn run_pump(request: &Arc<TlsRequest>) -> i32 {
    trace_log!("plinth: tls request {:x}: pump running", request.core.id());
    loop {
      let step = {
        let mut inner = recover_poison(request.inner.lock());
        if inner.status != TlsRequestStatus::Submitted {
          break;
        }
        inner.pump()
      };
      match step {
        Ok(true) => {}
        Ok(false) => thread::sleep(PUMP_IDLE_SLEEP_SECONDS),
        Err(()) => {
          request.fail();
          break;
        }
      }
    }
    request.finished.notify(request);
    trace_log!("plinth: tls request {:x}: pump finished", request.core.id());
    0
  }
}

impl Object for TlsRequest {
  fn core(&self) -> &ObjectCore {
    &self.core
  }

  fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }
}

impl std::fmt::Debug for TlsRequest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let inner = recover_poison(self.inner.lock());
    write!(f, "TlsRequest({:x}, {:?}, host={:?})", self.core.id(), inner.status, Text::from(inner.host.as_str()))
  }
}
