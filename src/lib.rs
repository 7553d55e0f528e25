//! Plinth is a compact foundation runtime for thread-based systems services: reference-counted copy-on-write byte buffers, a UTF-8 text type built on them, observer audiences with automatic cleanup, owned worker threads, endian-aware streams, an asynchronous resolver and TCP socket, and a TLS client driven as an explicit byte-queue pump.

#![warn(missing_docs)]

pub mod garbage;

mod address;
mod audience;
mod block;
mod buffer;
mod object;
mod percent;
mod plinth_error;
mod range;
mod socket;
mod stream;
mod sync;
mod text;
mod thread;
#[cfg(feature = "tls")]
mod tls_certificate;
#[cfg(feature = "tls")]
mod tls_request;
mod util;

pub use address::{Address, ADDRESS_CLASS};
pub use audience::{Audience, AudienceMember, ObserverFn};
pub use block::Block;
pub use buffer::{Buffer, BufferMode};
pub use garbage::GarbageScope;
pub use object::{
  class_of, downcast_object, is_instance, Class, Object, ObjectCore, ObjectId, OBJECT_CLASS,
};
pub use percent::{PercentDecode, PercentEncode};
pub use plinth_error::{CertificateError, PlinthError, PlinthResult, TlsError};
pub use range::Range;
pub use socket::{Socket, SocketError, SocketStatus, SOCKET_CLASS};
pub use stream::{read_object, write_object, ByteOrder, Stream, StreamSerializable};
pub use sync::{guard, Condition};
pub use text::{
  locale_encoding, split_str, split_str_ranges, Comparison, Split, SplitRanges, Text,
  CASE_INSENSITIVE, CASE_SENSITIVE,
};
pub use thread::{current_thread, sleep, RunFn, Thread, ThreadState, THREAD_CLASS};
#[cfg(feature = "tls")]
pub use tls_certificate::{NameComponent, TlsCertificate};
#[cfg(feature = "tls")]
pub use tls_request::{TlsRequest, TlsRequestStatus, TLS_REQUEST_CLASS};
