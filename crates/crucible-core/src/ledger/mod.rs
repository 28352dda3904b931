// crucible-core/src/ledger/mod.rs
// ============================================================================
// Module: Crucible WORM Ledger
// Description: Append-only hash-chained JSON-lines audit log.
// Purpose: Provide the tamper-evident decision record shared by all
//          components.
// Dependencies: crate::core::{events, hashing, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! The ledger is a write-once-read-many JSON-lines file. Each event embeds
//! the hash of its predecessor, so any byte mutation invalidates the event's
//! own hash and any insertion or removal breaks the successor's `prev_hash`.
//! Verification re-reads the file and recomputes every hash independently;
//! cached heads are never trusted.
//!
//! Crash semantics: one event is one line, flushed before `record` returns.
//! A torn final line is tolerated on open by treating the last parseable
//! hash as head and surfacing a recovery flag once.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::events::EventKind;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Literal previous-hash value of the first chain entry.
pub const GENESIS_HASH: &str = "genesis";

// ============================================================================
// SECTION: Ledger Event
// ============================================================================

/// One chained audit event as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Stable event type identifier.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Structured event payload.
    pub data: Value,
    /// ISO-8601 UTC emission time.
    pub timestamp: Timestamp,
    /// Hash of the preceding event, or [`GENESIS_HASH`].
    pub prev_hash: String,
    /// SHA-256 hex over the canonical serialization minus this field.
    pub hash: String,
}

/// Hashable projection of an event (everything except its own hash).
#[derive(Serialize)]
struct EventBody<'a> {
    /// Stable event type identifier.
    #[serde(rename = "type")]
    event_type: &'a str,
    /// Structured event payload.
    data: &'a Value,
    /// ISO-8601 UTC emission time.
    timestamp: &'a Timestamp,
    /// Hash of the preceding event.
    prev_hash: &'a str,
}

/// Computes the chain hash for an event body.
fn event_hash(
    event_type: &str,
    data: &Value,
    timestamp: &Timestamp,
    prev_hash: &str,
) -> Result<String, HashError> {
    hash_canonical_json(&EventBody {
        event_type,
        data,
        timestamp,
        prev_hash,
    })
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying storage I/O failed.
    #[error("ledger i/o failure: {0}")]
    Io(#[from] std::io::Error),
    /// Canonical hashing failed.
    #[error("ledger hash failure: {0}")]
    Hash(#[from] HashError),
    /// Event payload could not be serialized to a line.
    #[error("ledger serialization failure: {0}")]
    Serialization(String),
    /// A non-final line failed to parse during verification.
    #[error("ledger line {index} is malformed: {reason}")]
    Malformed {
        /// Zero-based line index.
        index: u64,
        /// Parse failure description.
        reason: String,
    },
    /// A recomputed hash diverged from the stored hash.
    #[error("ledger line {index} hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch {
        /// Zero-based line index.
        index: u64,
        /// Hash stored on disk.
        stored: String,
        /// Hash recomputed from the event body.
        computed: String,
    },
    /// An event's `prev_hash` does not match its predecessor.
    #[error("ledger line {index} breaks the chain (expected prev {expected}, stored {stored})")]
    LinkBroken {
        /// Zero-based line index.
        index: u64,
        /// Expected predecessor hash.
        expected: String,
        /// `prev_hash` stored on disk.
        stored: String,
    },
}

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// Mutable writer state guarded by the ledger mutex.
#[derive(Debug)]
struct LedgerInner {
    /// Append handle to the backing file.
    file: File,
    /// Hash of the most recent event.
    head: String,
    /// Number of committed events.
    count: u64,
}

/// Append-only hash-chained audit ledger.
///
/// # Invariants
/// - At most one writer mutates the file at a time (internal mutex).
/// - Events are never updated or deleted.
#[derive(Debug)]
pub struct Ledger {
    /// Backing file path.
    path: PathBuf,
    /// Guarded writer state.
    inner: Mutex<LedgerInner>,
    /// True when open discarded a torn final line.
    recovered: bool,
}

impl Ledger {
    /// Opens (or creates) a ledger file and scans it for the current head.
    ///
    /// A torn final line is discarded from the in-memory head computation;
    /// [`Ledger::recovered`] reports that this happened. Earlier malformed
    /// lines are a hard error.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on I/O failure or mid-file corruption.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut head = String::from(GENESIS_HASH);
        let mut count = 0_u64;
        let mut recovered = false;
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
            let total = lines.len();
            for (index, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LedgerEvent>(line) {
                    Ok(event) => {
                        head = event.hash;
                        count += 1;
                    }
                    Err(_) if index + 1 == total => {
                        // Torn tail from a crash mid-append.
                        recovered = true;
                    }
                    Err(err) => {
                        return Err(LedgerError::Malformed {
                            index: index as u64,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(LedgerInner {
                file,
                head,
                count,
            }),
            recovered,
        })
    }

    /// Returns true when open discarded a torn final line.
    #[must_use]
    pub const fn recovered(&self) -> bool {
        self.recovered
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends an event and returns its hash.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on serialization or I/O failure. I/O failures
    /// are fatal for the operation; no partial event is considered committed.
    pub fn record(&self, kind: EventKind, data: Value) -> Result<String, LedgerError> {
        let mut inner = lock_inner(&self.inner);
        let timestamp = Timestamp::now();
        let hash = event_hash(kind.as_str(), &data, &timestamp, &inner.head)?;
        let event = LedgerEvent {
            event_type: kind.as_str().to_string(),
            data,
            timestamp,
            prev_hash: inner.head.clone(),
            hash: hash.clone(),
        };
        let mut line = serde_json::to_string(&event)
            .map_err(|err| LedgerError::Serialization(err.to_string()))?;
        line.push('\n');
        inner.file.write_all(line.as_bytes())?;
        inner.file.flush()?;
        inner.head = hash.clone();
        inner.count += 1;
        Ok(hash)
    }

    /// Returns the hash of the most recent event, or [`GENESIS_HASH`].
    #[must_use]
    pub fn tail_hash(&self) -> String {
        lock_inner(&self.inner).head.clone()
    }

    /// Returns the number of committed events.
    #[must_use]
    pub fn len(&self) -> u64 {
        lock_inner(&self.inner).count
    }

    /// Returns true when no events have been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walks the file from genesis, recomputing hashes and linkage.
    ///
    /// Verification reads the file independently of the writer state and
    /// never reuses cached hashes.
    ///
    /// # Errors
    ///
    /// Returns the first [`LedgerError`] divergence encountered.
    pub fn verify_chain(&self) -> Result<u64, LedgerError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut expected_prev = String::from(GENESIS_HASH);
        let mut verified = 0_u64;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let index = index as u64;
            let event: LedgerEvent =
                serde_json::from_str(&line).map_err(|err| LedgerError::Malformed {
                    index,
                    reason: err.to_string(),
                })?;
            if event.prev_hash != expected_prev {
                return Err(LedgerError::LinkBroken {
                    index,
                    expected: expected_prev,
                    stored: event.prev_hash,
                });
            }
            let computed = event_hash(
                &event.event_type,
                &event.data,
                &event.timestamp,
                &event.prev_hash,
            )?;
            if computed != event.hash {
                return Err(LedgerError::HashMismatch {
                    index,
                    stored: event.hash,
                    computed,
                });
            }
            expected_prev = event.hash;
            verified += 1;
        }
        Ok(verified)
    }

    /// Looks up a committed event by hash.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on I/O failure or mid-file corruption.
    pub fn find(&self, hash: &str) -> Result<Option<LedgerEvent>, LedgerError> {
        let reader = BufReader::new(File::open(&self.path)?);
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: LedgerEvent =
                serde_json::from_str(&line).map_err(|err| LedgerError::Malformed {
                    index: index as u64,
                    reason: err.to_string(),
                })?;
            if event.hash == hash {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

/// Acquires the writer lock, recovering from poisoning.
///
/// A poisoned mutex means a panicking test thread died mid-append; the file
/// state is still line-consistent, so continuing with the inner value is
/// sound.
fn lock_inner(inner: &Mutex<LedgerInner>) -> std::sync::MutexGuard<'_, LedgerInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
