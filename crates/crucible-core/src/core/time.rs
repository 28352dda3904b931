// crucible-core/src/core/time.rs
// ============================================================================
// Module: Crucible Time Model
// Description: Canonical timestamp representations for ledger and queue rows.
// Purpose: Provide UTC wall-clock capture with a stable RFC 3339 string form.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Ledger events carry ISO-8601 UTC timestamps; queue rows carry unix epoch
//! milliseconds for cheap ordering and lease arithmetic. Both forms are
//! produced here so no other module touches the wall clock directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// RFC 3339 UTC timestamp string used in ledger events and manifests.
///
/// # Invariants
/// - The wrapped string is always a valid RFC 3339 instant when produced by
///   [`Timestamp::now`]; deserialized values are treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Captures the current UTC wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let formatted = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"));
        Self(formatted)
    }

    /// Wraps an existing RFC 3339 string without validation.
    #[must_use]
    pub fn from_rfc3339(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the timestamp as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the UTC calendar date portion (`YYYY-MM-DD`) of the timestamp.
    #[must_use]
    pub fn date_str(&self) -> &str {
        self.0.get(..10).unwrap_or(&self.0)
    }
}

// ============================================================================
// SECTION: Epoch Helpers
// ============================================================================

/// Returns the current unix epoch time in milliseconds.
#[must_use]
pub fn unix_millis_now() -> i64 {
    let now = OffsetDateTime::now_utc();
    let nanos = now.unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

/// Returns the current unix epoch time in whole seconds.
#[must_use]
pub fn unix_seconds_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
