//! Error stuff.
#![allow(missing_docs)]

use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::io::ErrorKind;

pub type PlinthResult<T> = Result<T, PlinthError>;

/// Errors raised while turning bytes into certificates.
#[derive(Debug)]
#[non_exhaustive]
pub enum CertificateError {
  NoPemBlock,
  NotACertificate(String),
  MalformedDer(String),
  KeyGeneration(String),
  SigningFailed(String),
}

impl Display for CertificateError {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      CertificateError::NoPemBlock => f.write_str("input contains no PEM block"),
      CertificateError::NotACertificate(label) => {
        write!(f, "PEM block is not a certificate: {label}")
      }
      CertificateError::MalformedDer(msg) => write!(f, "malformed DER: {msg}"),
      CertificateError::KeyGeneration(msg) => write!(f, "key generation failed: {msg}"),
      CertificateError::SigningFailed(msg) => write!(f, "self-signing failed: {msg}"),
    }
  }
}
impl Error for CertificateError {}

/// Errors from the TLS session layer.
#[derive(Debug)]
#[non_exhaustive]
pub enum TlsError {
  InvalidHostName(String),
  SessionSetup(String),
  Protocol(String),
}

impl Display for TlsError {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      TlsError::InvalidHostName(host) => write!(f, "invalid host name: {host}"),
      TlsError::SessionSetup(msg) => write!(f, "TLS session setup failed: {msg}"),
      TlsError::Protocol(msg) => write!(f, "TLS protocol error: {msg}"),
    }
  }
}
impl Error for TlsError {}

#[derive(Debug)]
#[non_exhaustive]
pub enum PlinthError {
  IO(io::Error),
  Compression(String),
  Certificate(CertificateError),
  Tls(TlsError),
  InvalidInput(String),
  Other(Box<dyn Error + Send + Sync>),
}

impl PlinthError {
  pub fn new_io<E: Into<Box<dyn Error + Send + Sync>>>(kind: ErrorKind, message: E) -> PlinthError {
    io::Error::new(kind, message).into()
  }

  pub fn from_io_kind(kind: ErrorKind) -> PlinthError {
    io::Error::from(kind).into()
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      PlinthError::IO(io) => io.kind(),
      PlinthError::Compression(_) => ErrorKind::InvalidData,
      PlinthError::Certificate(_) => ErrorKind::InvalidData,
      PlinthError::InvalidInput(_) => ErrorKind::InvalidInput,
      _ => ErrorKind::Other,
    }
  }

  pub fn downcast_mut<T: Error + Send + 'static>(&mut self) -> Option<&mut T> {
    match self {
      PlinthError::IO(err) => (err as &mut dyn Error).downcast_mut::<T>(),
      PlinthError::Certificate(err) => (err as &mut dyn Error).downcast_mut::<T>(),
      PlinthError::Tls(err) => (err as &mut dyn Error).downcast_mut::<T>(),
      PlinthError::Other(other) => other.downcast_mut::<T>(),
      _ => None,
    }
  }

  pub fn downcast_ref<T: Error + Send + 'static>(&self) -> Option<&T> {
    match self {
      PlinthError::IO(err) => (err as &dyn Error).downcast_ref::<T>(),
      PlinthError::Certificate(err) => (err as &dyn Error).downcast_ref::<T>(),
      PlinthError::Tls(err) => (err as &dyn Error).downcast_ref::<T>(),
      PlinthError::Other(other) => other.downcast_ref::<T>(),
      _ => None,
    }
  }

  pub fn into_inner(self) -> Box<dyn Error + Send + Sync + 'static> {
    match self {
      PlinthError::IO(err) => Box::new(err) as Box<dyn Error + Send + Sync>,
      PlinthError::Compression(msg) => {
        Box::new(io::Error::new(ErrorKind::InvalidData, msg)) as Box<dyn Error + Send + Sync>
      }
      PlinthError::Certificate(err) => Box::new(err) as Box<dyn Error + Send + Sync>,
      PlinthError::Tls(err) => Box::new(err) as Box<dyn Error + Send + Sync>,
      PlinthError::InvalidInput(msg) => {
        Box::new(io::Error::new(ErrorKind::InvalidInput, msg)) as Box<dyn Error + Send + Sync>
      }
      PlinthError::Other(other) => other,
    }
  }
}

impl Display for PlinthError {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      PlinthError::IO(err) => Display::fmt(err, f),
      PlinthError::Compression(msg) => write!(f, "compression failed: {msg}"),
      PlinthError::Certificate(err) => Display::fmt(err, f),
      PlinthError::Tls(err) => Display::fmt(err, f),
      PlinthError::InvalidInput(msg) => Display::fmt(msg, f),
      PlinthError::Other(err) => Display::fmt(err, f),
    }
  }
}

impl<T> From<T> for PlinthError
where
  T: Error + Send + Sync + 'static,
{
  fn from(value: T) -> Self {
    let mut dyn_box = Box::new(value) as Box<dyn Error + Send + Sync>;
    dyn_box = match dyn_box.downcast::<io::Error>() {
      Ok(err) => return PlinthError::IO(*err),
      Err(err) => err,
    };
    dyn_box = match dyn_box.downcast::<CertificateError>() {
      Ok(err) => return PlinthError::Certificate(*err),
      Err(err) => err,
    };
    dyn_box = match dyn_box.downcast::<TlsError>() {
      Ok(err) => return PlinthError::Tls(*err),
      Err(err) => err,
    };

    PlinthError::Other(dyn_box)
  }
}

impl From<PlinthError> for Box<dyn Error + Send> {
  fn from(value: PlinthError) -> Self {
    value.into_inner()
  }
}

impl From<PlinthError> for io::Error {
  fn from(value: PlinthError) -> Self {
    match value {
      PlinthError::IO(io) => io,
      err => io::Error::new(err.kind(), err.into_inner()),
    }
  }
}
