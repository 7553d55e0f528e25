//! X.509 certificates for the TLS client.
//!
//! A certificate is a value type around its DER bytes; everything else is
//! derived on demand. Self-signed certificates come with their private key,
//! parsed or received ones do not.
#![allow(missing_docs)]

use crate::block::Block;
use crate::plinth_error::{CertificateError, PlinthResult};
use crate::text::Text;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use x509_parser::prelude::{parse_x509_certificate, GeneralName, X509Certificate};

/// Subject name components for self-signed certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameComponent {
  CommonName,
  Organization,
  OrganizationalUnit,
  Locality,
  State,
  Country,
  /// Becomes a DNS subject-alternative name.
  Domain,
}

/// An X.509 certificate backed by its DER encoding.
#[derive(Clone)]
pub struct TlsCertificate {
  der: Vec<u8>,
  pem: String,
  private_key_pem: Option<String>,
}

fn pem_from_der(der: &[u8]) -> String {
  let encoded = BASE64.encode(der);
  let mut pem = String::with_capacity(encoded.len() + 64);
  pem.push_str("-----BEGIN CERTIFICATE-----\n");
  let mut rest = encoded.as_str();
  while !rest.is_empty() {
    let (line, tail) = rest.split_at(rest.len().min(64));
    pem.push_str(line);
    pem.push('\n');
    rest = tail;
  }
  pem.push_str("-----END CERTIFICATE-----\n");
  pem
}

fn wildcard_matches(pattern: &str, domain: &str) -> bool {
  if let Some(suffix) = pattern.strip_prefix("*.") {
    // A wildcard covers exactly one label: *.example.org matches
    // foo.example.org but not a.b.example.org.
    return match domain.split_once('.') {
      Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
      None => false,
    };
  }
  pattern.eq_ignore_ascii_case(domain)
}

impl TlsCertificate {
  /// Parses the first certificate block from PEM text.
  pub fn from_pem(pem: &str) -> PlinthResult<TlsCertificate> {
    let mut bytes = pem.as_bytes();
    let der = match rustls_pemfile::certs(&mut bytes).next() {
      Some(Ok(der)) => der.as_ref().to_vec(),
      Some(Err(err)) => return Err(err.into()),
      None => return Err(CertificateError::NoPemBlock.into()),
    };
    Self::from_der(&der)
  }

  /// Wraps a DER encoding, validating that it parses.
  pub fn from_der(der: &[u8]) -> PlinthResult<TlsCertificate> {
    parse_x509_certificate(der)
      .map_err(|err| CertificateError::MalformedDer(err.to_string()))?;
    Ok(TlsCertificate { der: der.to_vec(), pem: pem_from_der(der), private_key_pem: None })
  }

  /// Generates a self-signed certificate valid for `valid_days` from now.
  /// The key is a freshly generated ECDSA P-256 pair.
  pub fn new_self_signed(
    valid_days: u32,
    names: &[(NameComponent, &str)],
  ) -> PlinthResult<TlsCertificate> {
    let key_pair =
      KeyPair::generate().map_err(|err| CertificateError::KeyGeneration(err.to_string()))?;
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    for (component, value) in names {
      match component {
        NameComponent::CommonName => dn.push(DnType::CommonName, *value),
        NameComponent::Organization => dn.push(DnType::OrganizationName, *value),
        NameComponent::OrganizationalUnit => dn.push(DnType::OrganizationalUnitName, *value),
        NameComponent::Locality => dn.push(DnType::LocalityName, *value),
        NameComponent::State => dn.push(DnType::StateOrProvinceName, *value),
        NameComponent::Country => dn.push(DnType::CountryName, *value),
        NameComponent::Domain => {
          let san = (*value)
            .try_into()
            .map_err(|_| CertificateError::SigningFailed(format!("bad domain: {value}")))?;
          params.subject_alt_names.push(SanType::DnsName(san));
        }
      }
    }
    params.distinguished_name = dn;
    params.not_before = OffsetDateTime::now_utc();
    params.not_after = OffsetDateTime::now_utc() + Duration::days(i64::from(valid_days));
    let cert = params
      .self_signed(&key_pair)
      .map_err(|err| CertificateError::SigningFailed(err.to_string()))?;
    Ok(TlsCertificate {
      der: cert.der().as_ref().to_vec(),
      pem: cert.pem(),
      private_key_pem: Some(key_pair.serialize_pem()),
    })
  }

  fn parsed(&self) -> Option<X509Certificate<'_>> {
    parse_x509_certificate(&self.der).ok().map(|(_, cert)| cert)
  }

  /// The subject distinguished name, e.g. `CN=example.org, O=Example`.
  pub fn subject(&self) -> Text {
    match self.parsed() {
      Some(cert) => Text::from(cert.subject().to_string().as_str()),
      None => Text::new(),
    }
  }

  /// End of the validity window as a Unix timestamp.
  pub fn valid_until(&self) -> i64 {
    self.parsed().map(|cert| cert.validity().not_after.timestamp()).unwrap_or(0)
  }

  pub fn is_expired(&self) -> bool {
    self.valid_until() < OffsetDateTime::now_utc().unix_timestamp()
  }

  /// True when `domain` is covered by a DNS subject-alternative name or
  /// the common name, honouring single-label wildcards.
  pub fn verify_domain(&self, domain: &str) -> bool {
    let Some(cert) = self.parsed() else {
      return false;
    };
    if let Ok(Some(san)) = cert.subject_alternative_name() {
      for name in &san.value.general_names {
        if let GeneralName::DNSName(pattern) = name {
          if wildcard_matches(pattern, domain) {
            return true;
          }
        }
      }
    }
    let matches_common_name = cert
      .subject()
      .iter_common_name()
      .filter_map(|cn| cn.as_str().ok())
      .any(|pattern| wildcard_matches(pattern, domain));
    matches_common_name
  }

  pub fn der(&self) -> &[u8] {
    &self.der
  }

  pub fn pem(&self) -> Text {
    Text::from(self.pem.as_str())
  }

  /// PEM of the private key; only self-signed certificates carry one.
  pub fn private_key_pem(&self) -> Option<Text> {
    self.private_key_pem.as_deref().map(Text::from)
  }

  /// SHA-256 digest of the DER encoding.
  pub fn fingerprint(&self) -> Block {
    Block::from_data(&Sha256::digest(&self.der))
  }
}

impl PartialEq for TlsCertificate {
  fn eq(&self, other: &Self) -> bool {
    self.der == other.der
  }
}

impl Eq for TlsCertificate {}

impl std::fmt::Debug for TlsCertificate {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "TlsCertificate({})", self.subject())
  }
}
