//! Server certificate pinning
//!
//! Pins are SHA-256 hashes of the server's DER-encoded SubjectPublicKeyInfo,
//! so a renewed certificate for the same key keeps matching.

use tracing::{debug, warn};
use x509_cert::Certificate;
use x509_cert::der::{Decode, Encode};

use crate::error::UpdateError;
use crate::hasher::sha256;

/// Derives the pinned identity of a server from its leaf certificate
pub trait KeyPinVerifier: Send + Sync {
    /// Hash compared against the pinned value, or `None` if the certificate
    /// cannot be interpreted
    fn public_key_hash(&self, certificate_der: &[u8]) -> Option<Vec<u8>>;
}

/// SHA-256 over the certificate's DER-encoded SubjectPublicKeyInfo
///
/// Matches `openssl x509 -pubkey -noout | openssl pkey -pubin -outform der |
/// sha256sum`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectPublicKeySha256;

impl KeyPinVerifier for SubjectPublicKeySha256 {
    fn public_key_hash(&self, certificate_der: &[u8]) -> Option<Vec<u8>> {
        let certificate = match Certificate::from_der(certificate_der) {
            Ok(certificate) => certificate,
            Err(e) => {
                debug!("Peer certificate is not valid X.509: {e}");
                return None;
            }
        };
        let spki = certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .ok()?;
        Some(sha256(&spki).to_vec())
    }
}

/// SHA-256 over the whole DER certificate
///
/// Pins one certificate rather than one key; renewal invalidates the pin.
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateSha256;

impl KeyPinVerifier for CertificateSha256 {
    fn public_key_hash(&self, certificate_der: &[u8]) -> Option<Vec<u8>> {
        Some(sha256(certificate_der).to_vec())
    }
}

/// Check a peer certificate against a pinned hash
///
/// # Errors
///
/// Returns [`UpdateError::Pinning`] when the connection exposed no
/// certificate (plain HTTP included), the verifier rejects it, or the hash
/// differs from `pinned`.
pub fn verify_pin(
    verifier: &dyn KeyPinVerifier,
    peer_certificate: Option<&[u8]>,
    pinned: &[u8],
) -> Result<(), UpdateError> {
    let Some(der) = peer_certificate else {
        warn!("Pinned key configured but the connection exposed no certificate");
        return Err(UpdateError::Pinning(
            "no peer certificate available".to_string(),
        ));
    };

    let actual = verifier
        .public_key_hash(der)
        .ok_or_else(|| UpdateError::Pinning("peer certificate could not be parsed".to_string()))?;

    if actual.as_slice() != pinned {
        return Err(UpdateError::Pinning(format!(
            "expected {}, got {}",
            hex::encode(pinned),
            hex::encode(&actual)
        )));
    }

    debug!("Peer certificate matches pinned key");
    Ok(())
}
