// crucible-governance/src/signing.rs
// ============================================================================
// Module: Release Signing
// Description: HMAC-SHA256 signatures over canonical release manifests.
// Purpose: Make every published manifest verifiable byte-exact.
// Dependencies: crucible-core, hmac, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Signatures cover the RFC 8785 canonical serialization of the manifest
//! minus its own `signature` field. The secret comes from the environment;
//! its absence does not block (a documented development default keeps tests
//! hermetic) but the fallback is surfaced so operators can alarm on it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crucible_core::hashing::hex_encode;
use hmac::Hmac;
use hmac::Mac;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable carrying the signing secret.
pub const SIGNING_SECRET_ENV: &str = "CRUCIBLE_SIGNING_SECRET";

/// Development fallback secret used when the environment is unset.
const DEV_SECRET: &str = "crucible-dev-secret";

/// HMAC-SHA256 instantiation.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Signing failures.
#[derive(Debug, Error)]
pub enum SigningError {
    /// Canonical serialization failed.
    #[error("signing canonicalization failure: {0}")]
    Canonicalization(String),
    /// Key material was rejected by the MAC.
    #[error("signing key failure: {0}")]
    Key(String),
}

// ============================================================================
// SECTION: Signing Secret
// ============================================================================

/// Signing key with provenance.
#[derive(Debug, Clone)]
pub struct SigningSecret {
    /// Raw key bytes.
    key: Vec<u8>,
    /// True when the key came from the environment.
    from_env: bool,
}

impl SigningSecret {
    /// Loads the secret from the environment, falling back to the
    /// development default.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(SIGNING_SECRET_ENV).map_or_else(
            |_| Self {
                key: DEV_SECRET.as_bytes().to_vec(),
                from_env: false,
            },
            |value| Self {
                key: value.into_bytes(),
                from_env: true,
            },
        )
    }

    /// Creates a secret from explicit key material.
    #[must_use]
    pub fn from_key(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            from_env: true,
        }
    }

    /// Returns true when the development fallback is in use.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        !self.from_env
    }

    /// Signs a serializable value over its canonical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError`] on serialization or key failure.
    pub fn sign<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, SigningError> {
        let bytes = serde_jcs::to_vec(value)
            .map_err(|err| SigningError::Canonicalization(err.to_string()))?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|err| SigningError::Key(err.to_string()))?;
        mac.update(&bytes);
        Ok(hex_encode(&mac.finalize().into_bytes()))
    }

    /// Verifies a stored signature byte-exact.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError`] on serialization or key failure.
    pub fn verify<T: Serialize + ?Sized>(
        &self,
        value: &T,
        signature: &str,
    ) -> Result<bool, SigningError> {
        Ok(self.sign(value)? == signature)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

    use serde_json::json;

    use super::*;

    #[test]
    fn signature_round_trips() {
        let secret = SigningSecret::from_key("test-secret");
        let manifest = json!({"id": "rel_x", "version": "0.0.1"});
        let signature = secret.sign(&manifest).expect("sign");
        assert!(secret.verify(&manifest, &signature).expect("verify"));
    }

    #[test]
    fn signature_is_key_ordering_independent() {
        let secret = SigningSecret::from_key("test-secret");
        let a = json!({"id": "rel_x", "version": "0.0.1"});
        let b = json!({"version": "0.0.1", "id": "rel_x"});
        assert_eq!(secret.sign(&a).expect("sign"), secret.sign(&b).expect("sign"));
    }

    #[test]
    fn tampering_breaks_verification() {
        let secret = SigningSecret::from_key("test-secret");
        let manifest = json!({"id": "rel_x", "version": "0.0.1"});
        let signature = secret.sign(&manifest).expect("sign");
        let tampered = json!({"id": "rel_x", "version": "0.0.2"});
        assert!(!secret.verify(&tampered, &signature).expect("verify"));
    }

    #[test]
    fn different_keys_produce_different_signatures() {
        let manifest = json!({"id": "rel_x"});
        let a = SigningSecret::from_key("alpha").sign(&manifest).expect("sign");
        let b = SigningSecret::from_key("beta").sign(&manifest).expect("sign");
        assert_ne!(a, b);
    }
}
