//! Classification of client certificates, keys and CA bundles
//!
//! The evaluator never fails: every problem becomes a [`TlsVerdict`] that the
//! status aggregator turns into a `ConfigurationGenerated` reason.

use std::time::Duration;

use aws_lc_rs::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
    ECDSA_P384_SHA384_ASN1_SIGNING,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use x509_parser::prelude::*;

use crate::conditions::reasons;

/// Resolved TLS material of one output; `Some` means the slot is configured
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Client certificate PEM
    pub cert: Option<String>,
    /// Client private key PEM
    pub key: Option<String>,
    /// CA bundle PEM
    pub ca: Option<String>,
}

impl TlsMaterial {
    /// True when no slot is configured
    pub fn is_empty(&self) -> bool {
        self.cert.is_none() && self.key.is_none() && self.ca.is_none()
    }
}

/// Outcome of evaluating [`TlsMaterial`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TlsVerdict {
    /// Nothing to report
    Valid,
    /// Usable, but a certificate expires within the warning horizon
    AboutToExpire {
        /// Condition message
        message: String,
    },
    /// Not usable
    Invalid {
        /// Condition reason
        reason: &'static str,
        /// Condition message
        message: String,
    },
}

impl TlsVerdict {
    /// The pipeline cannot be configured with this material
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

/// Structural problems found while parsing the material
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlsError {
    #[error("a certificate and private key must either both be provided or both be missing")]
    MissingCertKeyPair,
    #[error("failed to decode PEM block containing certificate")]
    CertDecode,
    #[error("failed to parse certificate")]
    CertParse,
    #[error("failed to decode PEM block containing private key")]
    KeyDecode,
    #[error("failed to parse private key")]
    KeyParse,
    #[error("failed to decode PEM block containing CA certificate")]
    CaDecode,
    #[error("failed to parse CA certificate")]
    CaParse,
    #[error("certificate and private key do not match")]
    KeyPairMismatch,
    #[error("not a CA certificate")]
    NotCa,
}

impl TlsError {
    fn reason(&self) -> &'static str {
        match self {
            Self::MissingCertKeyPair => reasons::TLS_CONFIGURATION_INVALID,
            Self::KeyPairMismatch => reasons::TLS_CERTIFICATE_KEY_PAIR_INVALID,
            _ => reasons::TLS_CERTIFICATE_INVALID,
        }
    }
}

impl From<TlsError> for TlsVerdict {
    fn from(err: TlsError) -> Self {
        TlsVerdict::Invalid {
            reason: err.reason(),
            message: format!("TLS configuration invalid: {}", err),
        }
    }
}

/// The fields of a parsed certificate the evaluator needs
#[derive(Clone, Debug)]
struct CertInfo {
    not_after: DateTime<Utc>,
    is_ca: bool,
    public_key: Vec<u8>,
}

/// Certificate evaluator with a configurable expiry warning horizon
#[derive(Clone, Debug)]
pub struct TlsEvaluator {
    horizon: Duration,
}

impl TlsEvaluator {
    /// Evaluator warning about certificates that expire within `horizon`
    pub fn new(horizon: Duration) -> Self {
        Self { horizon }
    }

    /// Classify `material` at time `now`.
    ///
    /// Checks run in a fixed order: configuration triple, PEM parsing of
    /// certificate, key and CA, key pair match, expiry of the certificate and
    /// then the CA, and finally the about-to-expire warnings.
    pub fn evaluate(&self, material: &TlsMaterial, now: DateTime<Utc>) -> TlsVerdict {
        match self.check(material, now) {
            Ok(verdict) => verdict,
            Err(err) => err.into(),
        }
    }

    fn check(&self, material: &TlsMaterial, now: DateTime<Utc>) -> Result<TlsVerdict, TlsError> {
        if material.cert.is_some() != material.key.is_some() {
            return Err(TlsError::MissingCertKeyPair);
        }

        let cert = material.cert.as_deref().map(sanitize).map(|c| parse_cert(&c)).transpose()?;
        let key = material.key.as_deref().map(sanitize).map(|k| parse_key(&k)).transpose()?;
        let cas = material.ca.as_deref().map(sanitize).map(|c| parse_ca(&c)).transpose()?;

        if let (Some(cert), Some(key)) = (&cert, &key) {
            if !key.matches(&cert.public_key) {
                return Err(TlsError::KeyPairMismatch);
            }
        }

        if let Some(cert) = &cert {
            if now > cert.not_after {
                return Ok(expired(cert, false));
            }
        }
        for ca in cas.iter().flatten() {
            if !ca.is_ca {
                return Err(TlsError::NotCa);
            }
            if now > ca.not_after {
                return Ok(expired(ca, true));
            }
        }

        if let Some(cert) = &cert {
            if self.expires_soon(cert, now) {
                return Ok(about_to_expire(cert, false));
            }
        }
        for ca in cas.iter().flatten() {
            if self.expires_soon(ca, now) {
                return Ok(about_to_expire(ca, true));
            }
        }
        Ok(TlsVerdict::Valid)
    }

    fn expires_soon(&self, cert: &CertInfo, now: DateTime<Utc>) -> bool {
        let remaining = (cert.not_after - now).num_seconds();
        remaining <= i64::try_from(self.horizon.as_secs()).unwrap_or(i64::MAX)
    }
}

fn expired(cert: &CertInfo, is_ca: bool) -> TlsVerdict {
    let subject = if is_ca { "TLS CA certificate" } else { "TLS certificate" };
    TlsVerdict::Invalid {
        reason: reasons::TLS_CERTIFICATE_EXPIRED,
        message: format!("{} expired on {}", subject, cert.not_after.format("%Y-%m-%d")),
    }
}

fn about_to_expire(cert: &CertInfo, is_ca: bool) -> TlsVerdict {
    let subject = if is_ca { "TLS CA certificate" } else { "TLS certificate" };
    TlsVerdict::AboutToExpire {
        message: format!(
            "{} is about to expire, configured certificate is valid until {}",
            subject,
            cert.not_after.format("%Y-%m-%d")
        ),
    }
}

/// Undo escaped newlines, a common artifact of pasting PEM into YAML
fn sanitize(pem: &str) -> String {
    pem.replace("\\n", "\n")
}

fn cert_info(der: &[u8]) -> Option<CertInfo> {
    let (_, cert) = parse_x509_certificate(der).ok()?;
    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)?;
    Some(CertInfo {
        not_after,
        is_ca: cert.is_ca(),
        public_key: cert.public_key().subject_public_key.data.to_vec(),
    })
}

fn parse_cert(pem: &str) -> Result<CertInfo, TlsError> {
    let block = ::pem::parse(pem).map_err(|_| TlsError::CertDecode)?;
    cert_info(block.contents()).ok_or(TlsError::CertParse)
}

fn parse_ca(pem: &str) -> Result<Vec<CertInfo>, TlsError> {
    let blocks = ::pem::parse_many(pem).map_err(|_| TlsError::CaDecode)?;
    if blocks.is_empty() {
        return Err(TlsError::CaDecode);
    }
    blocks
        .iter()
        .map(|b| cert_info(b.contents()).ok_or(TlsError::CaParse))
        .collect()
}

/// A parsed private key, reduced to its public half
struct PrivateKey {
    public_key: Vec<u8>,
}

impl PrivateKey {
    fn matches(&self, cert_public_key: &[u8]) -> bool {
        self.public_key == cert_public_key
    }
}

fn parse_key(pem: &str) -> Result<PrivateKey, TlsError> {
    let block = ::pem::parse(pem).map_err(|_| TlsError::KeyDecode)?;
    let der = block.contents();
    let public_key = match block.tag() {
        "RSA PRIVATE KEY" => RsaKeyPair::from_der(der)
            .ok()
            .map(|k| k.public_key().as_ref().to_vec()),
        "EC PRIVATE KEY" => ecdsa_public_key(der),
        _ => RsaKeyPair::from_pkcs8(der)
            .ok()
            .map(|k| k.public_key().as_ref().to_vec())
            .or_else(|| ecdsa_public_key(der))
            .or_else(|| {
                Ed25519KeyPair::from_pkcs8(der)
                    .ok()
                    .map(|k| k.public_key().as_ref().to_vec())
            }),
    };
    public_key
        .map(|public_key| PrivateKey { public_key })
        .ok_or(TlsError::KeyParse)
}

/// SEC1 or PKCS#8 ECDSA keys on P-256 or P-384
fn ecdsa_public_key(der: &[u8]) -> Option<Vec<u8>> {
    [&ECDSA_P256_SHA256_ASN1_SIGNING, &ECDSA_P384_SHA384_ASN1_SIGNING]
        .into_iter()
        .find_map(|alg| EcdsaKeyPair::from_private_key_der(alg, der).ok())
        .map(|k| k.public_key().as_ref().to_vec())
}
