// crucible-engine/src/genotype.rs
// ============================================================================
// Module: Crucible Genotype
// Description: Normalized gene vectors aligned to a gene space.
// Purpose: Carry candidate coordinates with hashing and denormalization.
// Dependencies: crate::genespace, crucible-core, serde
// ============================================================================

//! ## Overview
//! A genotype is a vector of normalized values in `[0, 1]`, positionally
//! aligned with a gene space declaration. The base genotype's hash seeds the
//! candidate identity chain, so genotype hashing must stay canonical.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crucible_core::hashing::HashError;
use crucible_core::hashing::hash_canonical_json;
use serde::Deserialize;
use serde::Serialize;

use crate::genespace::GeneSpace;
use crate::genespace::ParamValue;

// ============================================================================
// SECTION: Genotype
// ============================================================================

/// Normalized gene vector aligned to a gene space.
///
/// # Invariants
/// - `values.len()` equals the owning space's gene count.
/// - Every value lies in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genotype {
    /// Normalized values in gene-space declaration order.
    pub values: Vec<f64>,
    /// Gene space schema version the vector is aligned to.
    pub schema_version: String,
    /// Hash of the base genotype this one descends from.
    pub hash_base: String,
    /// Parent genotype hashes, oldest first.
    #[serde(default)]
    pub parents: Vec<String>,
}

/// Hashable projection of a genotype (identity excludes lineage).
#[derive(Serialize)]
struct GenotypeIdentity<'a> {
    /// Normalized values.
    values: &'a [f64],
    /// Gene space schema version.
    schema_version: &'a str,
}

impl Genotype {
    /// Computes the canonical identity hash over values and schema version.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Canonicalization`] when serialization fails.
    pub fn identity_hash(&self) -> Result<String, HashError> {
        hash_canonical_json(&GenotypeIdentity {
            values: &self.values,
            schema_version: &self.schema_version,
        })
    }

    /// Denormalizes every gene into a named concrete parameter map.
    #[must_use]
    pub fn denormalize(&self, space: &GeneSpace) -> BTreeMap<String, ParamValue> {
        space
            .genes
            .iter()
            .zip(self.values.iter())
            .map(|(gene, value)| (gene.name.clone(), gene.denormalize(*value)))
            .collect()
    }

    /// Returns the named normalized values for manifests.
    #[must_use]
    pub fn named_values(&self, space: &GeneSpace) -> BTreeMap<String, f64> {
        space
            .genes
            .iter()
            .zip(self.values.iter())
            .map(|(gene, value)| (gene.name.clone(), *value))
            .collect()
    }

    /// Clamps every value back into `[0, 1]`.
    pub fn clamp_all(&mut self) {
        for value in &mut self.values {
            *value = value.clamp(0.0, 1.0);
        }
    }
}
