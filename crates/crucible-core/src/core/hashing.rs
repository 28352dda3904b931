// crucible-core/src/core/hashing.rs
// ============================================================================
// Module: Crucible Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for states, plans, events, and
//          release artifacts.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Crucible hashes all canonical JSON using RFC 8785 (JCS) to guarantee
//! stable, replayable digests. Binary payloads are hashed directly over raw
//! bytes. The ledger chain, candidate identifiers, and release signatures all
//! derive from these helpers, so any change here invalidates recorded audit
//! trails.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON and returns the lowercase hex digest.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(&bytes))
}

/// Hashes raw bytes with SHA-256 and returns the lowercase hex digest.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Hashes a sequence of byte segments as one SHA-256 stream.
#[must_use]
pub fn hash_segments(segments: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for segment in segments {
        hasher.update(segment);
    }
    hex_encode(&hasher.finalize())
}

/// Derives a 64-bit seed from hex digest material.
///
/// The first eight bytes of the digest are folded big-endian; short or
/// non-hex input degrades to folding the raw string bytes.
#[must_use]
pub fn seed_from_digest(digest: &str) -> u64 {
    let mut seed: u64 = 0;
    let mut taken = 0_u32;
    for chunk in digest.as_bytes().chunks(2).take(8) {
        let byte = u8::from_str_radix(std::str::from_utf8(chunk).unwrap_or("0"), 16)
            .unwrap_or(chunk.first().copied().unwrap_or(0));
        seed = (seed << 8) | u64::from(byte);
        taken += 1;
    }
    // Short digests still spread across the full width.
    seed.rotate_left(taken * 3)
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
