// crucible-core/src/core/identifiers.rs
// ============================================================================
// Module: Crucible Identifiers
// Description: Canonical opaque identifiers for plans, tasks, and releases.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! Crucible. Identifiers are opaque and serialize as strings. Validation is
//! handled at plan or runtime boundaries rather than within these simple
//! wrappers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

/// Declares an opaque string identifier with the canonical accessors.
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_id! {
    /// Plan identifier emitted by the external strategic planner.
    PlanId
}

string_id! {
    /// Task identifier scoped to the durable queue.
    TaskId
}

string_id! {
    /// Candidate identifier derived from seeded hash material.
    CandidateId
}

string_id! {
    /// Mutation bundle identifier derived from seeded hash material.
    BundleId
}

string_id! {
    /// Release identifier for one atomic publication.
    ReleaseId
}

string_id! {
    /// Canary window identifier.
    WindowId
}

string_id! {
    /// Failure domain label used by circuit breakers.
    Domain
}

string_id! {
    /// Worker owner label recorded on leases and heartbeats.
    Owner
}
