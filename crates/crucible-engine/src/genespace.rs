// crucible-engine/src/genespace.rs
// ============================================================================
// Module: Crucible Gene Space
// Description: Versioned declarative dictionary of mutable genes.
// Purpose: Define the normalized gene coordinate system and denormalization.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! The gene space is data, not code: a versioned immutable table describing
//! every gene the operators may touch. Genes are indexed by their position in
//! the declaration order; the string name is an external label used in
//! patches and manifests. Normalized values always live in `[0, 1]` and are
//! denormalized per kind when concrete parameters are needed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Gene Kinds
// ============================================================================

/// Typed declaration of one gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneKind {
    /// Continuous value denormalized linearly into `[min, max]`.
    Float {
        /// Lower denormalized bound.
        min: f64,
        /// Upper denormalized bound.
        max: f64,
        /// Distance and mutation weight.
        weight: f64,
    },
    /// Integer value denormalized to the nearest integer in `[min, max]`.
    Int {
        /// Lower denormalized bound.
        min: i64,
        /// Upper denormalized bound.
        max: i64,
        /// Distance and mutation weight.
        weight: f64,
    },
    /// Boolean value denormalized via rounding.
    Flag {
        /// Distance and mutation weight.
        weight: f64,
    },
    /// Categorical value denormalized by index.
    Discrete {
        /// Option labels in declaration order.
        options: Vec<String>,
        /// Distance and mutation weight.
        weight: f64,
    },
}

impl GeneKind {
    /// Returns the gene's mutation and distance weight.
    #[must_use]
    pub fn weight(&self) -> f64 {
        match self {
            Self::Float {
                weight, ..
            }
            | Self::Int {
                weight, ..
            }
            | Self::Flag {
                weight,
            }
            | Self::Discrete {
                weight, ..
            } => *weight,
        }
    }

    /// Returns true for float and int genes (the continuous block).
    #[must_use]
    pub const fn is_continuous(&self) -> bool {
        matches!(self, Self::Float { .. } | Self::Int { .. })
    }
}

// ============================================================================
// SECTION: Concrete Parameter Values
// ============================================================================

/// Denormalized concrete value of one gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    /// Continuous parameter.
    Float(f64),
    /// Integer parameter.
    Int(i64),
    /// Boolean parameter.
    Flag(bool),
    /// Categorical parameter.
    Choice(String),
}

impl ParamValue {
    /// Returns the parameter as a float when numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => {
                // Gene ranges are far below the 2^52 precision boundary.
                #[allow(clippy::cast_precision_loss, reason = "gene ranges are small")]
                let as_float = *value as f64;
                Some(as_float)
            }
            Self::Flag(_) | Self::Choice(_) => None,
        }
    }
}

// ============================================================================
// SECTION: Gene Specification
// ============================================================================

/// One declared gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSpec {
    /// External gene label.
    pub name: String,
    /// Typed declaration.
    pub kind: GeneKind,
    /// True when operators may mutate the gene.
    pub mutable: bool,
    /// True when acquisition anchors seed the gene (flag genes only).
    #[serde(default)]
    pub anchor: bool,
}

impl GeneSpec {
    /// Denormalizes a normalized value into a concrete parameter.
    #[must_use]
    pub fn denormalize(&self, normalized: f64) -> ParamValue {
        let clamped = normalized.clamp(0.0, 1.0);
        match &self.kind {
            GeneKind::Float {
                min,
                max,
                ..
            } => ParamValue::Float(min + clamped * (max - min)),
            GeneKind::Int {
                min,
                max,
                ..
            } => {
                // Range widths are tiny; rounding stays lossless.
                #[allow(clippy::cast_precision_loss, reason = "gene ranges are small")]
                let span = (*max - *min) as f64;
                #[allow(
                    clippy::cast_possible_truncation,
                    reason = "value is clamped into the declared range"
                )]
                let value = (span * clamped).round() as i64 + *min;
                ParamValue::Int(value.clamp(*min, *max))
            }
            GeneKind::Flag {
                ..
            } => ParamValue::Flag(clamped >= 0.5),
            GeneKind::Discrete {
                options,
                ..
            } => {
                let count = options.len();
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss,
                    reason = "index is clamped into the option list"
                )]
                let index = ((clamped * count as f64).floor() as usize).min(count.saturating_sub(1));
                ParamValue::Choice(options.get(index).cloned().unwrap_or_default())
            }
        }
    }
}

// ============================================================================
// SECTION: Gene Space
// ============================================================================

/// Versioned immutable gene dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSpace {
    /// Schema version of the declaration.
    pub version: String,
    /// Genes in declaration order.
    pub genes: Vec<GeneSpec>,
}

impl GeneSpace {
    /// Builds a validated gene space.
    ///
    /// # Errors
    ///
    /// Returns [`GeneSpaceError`] when the declaration is inconsistent.
    pub fn new(version: impl Into<String>, genes: Vec<GeneSpec>) -> Result<Self, GeneSpaceError> {
        let space = Self {
            version: version.into(),
            genes,
        };
        space.validate()?;
        Ok(space)
    }

    /// Validates declaration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`GeneSpaceError`] naming the first violation.
    pub fn validate(&self) -> Result<(), GeneSpaceError> {
        if self.genes.is_empty() {
            return Err(GeneSpaceError::Empty);
        }
        for (index, gene) in self.genes.iter().enumerate() {
            if self.genes.iter().skip(index + 1).any(|other| other.name == gene.name) {
                return Err(GeneSpaceError::DuplicateName(gene.name.clone()));
            }
            if gene.kind.weight() <= 0.0 {
                return Err(GeneSpaceError::NonPositiveWeight(gene.name.clone()));
            }
            match &gene.kind {
                GeneKind::Float {
                    min,
                    max,
                    ..
                } if min >= max => {
                    return Err(GeneSpaceError::InvertedRange(gene.name.clone()));
                }
                GeneKind::Int {
                    min,
                    max,
                    ..
                } if min >= max => {
                    return Err(GeneSpaceError::InvertedRange(gene.name.clone()));
                }
                GeneKind::Discrete {
                    options, ..
                } if options.is_empty() => {
                    return Err(GeneSpaceError::EmptyOptions(gene.name.clone()));
                }
                GeneKind::Flag {
                    ..
                }
                | GeneKind::Float {
                    ..
                }
                | GeneKind::Int {
                    ..
                }
                | GeneKind::Discrete {
                    ..
                } => {}
            }
            if gene.anchor && !matches!(gene.kind, GeneKind::Flag { .. }) {
                return Err(GeneSpaceError::AnchorOnNonFlag(gene.name.clone()));
            }
        }
        Ok(())
    }

    /// Returns the number of declared genes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    /// Returns true when no genes are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Returns indices of mutable genes.
    #[must_use]
    pub fn mutable_indices(&self) -> Vec<usize> {
        self.genes
            .iter()
            .enumerate()
            .filter_map(|(index, gene)| gene.mutable.then_some(index))
            .collect()
    }

    /// Returns indices of mutable continuous genes in declaration order.
    #[must_use]
    pub fn continuous_indices(&self) -> Vec<usize> {
        self.genes
            .iter()
            .enumerate()
            .filter_map(|(index, gene)| (gene.mutable && gene.kind.is_continuous()).then_some(index))
            .collect()
    }

    /// Returns indices of mutable flag genes.
    #[must_use]
    pub fn flag_indices(&self) -> Vec<usize> {
        self.genes
            .iter()
            .enumerate()
            .filter_map(|(index, gene)| {
                (gene.mutable && matches!(gene.kind, GeneKind::Flag { .. })).then_some(index)
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Default Space
// ============================================================================

/// Returns the built-in v1 gene space.
///
/// Fourteen genes spanning the learner's retrieval, optimization, and
/// compression knobs. The `rag_rerank` and `self_check` flags are anchor
/// genes seeded from acquisition evidence.
#[must_use]
pub fn default_space() -> GeneSpace {
    let genes = vec![
        GeneSpec {
            name: "learning_rate".to_string(),
            kind: GeneKind::Float {
                min: 1e-6,
                max: 1e-3,
                weight: 1.0,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "temperature".to_string(),
            kind: GeneKind::Float {
                min: 0.0,
                max: 2.0,
                weight: 0.8,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "dropout".to_string(),
            kind: GeneKind::Float {
                min: 0.0,
                max: 0.5,
                weight: 0.6,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "rag_chunk_overlap".to_string(),
            kind: GeneKind::Float {
                min: 0.0,
                max: 0.5,
                weight: 0.5,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "rag_topk".to_string(),
            kind: GeneKind::Int {
                min: 1,
                max: 32,
                weight: 0.9,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "batch".to_string(),
            kind: GeneKind::Int {
                min: 1,
                max: 128,
                weight: 0.9,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "rag_chunk_size".to_string(),
            kind: GeneKind::Int {
                min: 128,
                max: 2_048,
                weight: 0.5,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "distill_interval".to_string(),
            kind: GeneKind::Int {
                min: 1,
                max: 24,
                weight: 0.4,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "quant".to_string(),
            kind: GeneKind::Flag {
                weight: 0.7,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "pruning".to_string(),
            kind: GeneKind::Flag {
                weight: 0.7,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "rag_rerank".to_string(),
            kind: GeneKind::Flag {
                weight: 0.6,
            },
            mutable: true,
            anchor: true,
        },
        GeneSpec {
            name: "self_check".to_string(),
            kind: GeneKind::Flag {
                weight: 0.6,
            },
            mutable: true,
            anchor: true,
        },
        GeneSpec {
            name: "optimizer".to_string(),
            kind: GeneKind::Discrete {
                options: vec!["adamw".to_string(), "lion".to_string(), "sgd".to_string()],
                weight: 0.8,
            },
            mutable: true,
            anchor: false,
        },
        GeneSpec {
            name: "decay_schedule".to_string(),
            kind: GeneKind::Discrete {
                options: vec![
                    "cosine".to_string(),
                    "linear".to_string(),
                    "constant".to_string(),
                    "one_cycle".to_string(),
                ],
                weight: 0.4,
            },
            mutable: true,
            anchor: false,
        },
    ];
    GeneSpace {
        version: "v1".to_string(),
        genes,
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gene space declaration errors.
#[derive(Debug, Error)]
pub enum GeneSpaceError {
    /// Declaration contains no genes.
    #[error("gene space must declare at least one gene")]
    Empty,
    /// Two genes share a name.
    #[error("duplicate gene name: {0}")]
    DuplicateName(String),
    /// Gene weight is zero or negative.
    #[error("gene {0} has a non-positive weight")]
    NonPositiveWeight(String),
    /// Float or int range has min >= max.
    #[error("gene {0} has an inverted range")]
    InvertedRange(String),
    /// Discrete gene has no options.
    #[error("discrete gene {0} has no options")]
    EmptyOptions(String),
    /// Anchor marker on a non-flag gene.
    #[error("gene {0} is marked anchor but is not a flag")]
    AnchorOnNonFlag(String),
}
