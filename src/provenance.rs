//! Synthetic-vs-real provenance classification
//!
//! Training decisions must never be made on generated or placeholder
//! signal, so every example is resolved to a closed [`Provenance`] variant
//! by one explicit function instead of scattered substring checks. The
//! recognized tags are enumerated below; anything unrecognized resolves to
//! [`Provenance::Unknown`], which real-only dataset output excludes.

use serde::{Deserialize, Serialize};

/// Source tags that identify genuine production signal.
const REAL_SOURCE_TAGS: &[&str] = &[
    "model",
    "ml-model",
    "fallback",
    "production",
    "api",
    "auto-action",
    "auto-outcome",
];

/// Source tags used by data generators and seed scripts.
const SYNTHETIC_SOURCE_TAGS: &[&str] = &[
    "synthetic",
    "synthetic-feedback",
    "bot-feedback-generator",
    "direct-generation",
    "direct-database",
    "generator",
    "seed",
    "test",
    "placeholder",
];

/// Feedback types that carry no real signal of their own.
const PLACEHOLDER_FEEDBACK_TYPES: &[&str] = &["auto-inferred", "generated", "placeholder"];

/// Feedback types produced by genuine users or services.
const REAL_FEEDBACK_TYPES: &[&str] = &["user", "bot", "system"];

/// Resolved data origin of an example
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Genuine user or service behavior
    Real,

    /// Generated, seeded, or placeholder data
    Synthetic,

    /// Origin could not be established; treated as non-real
    Unknown,
}

impl Provenance {
    /// Whether this example may enter real-only training data
    pub fn is_real(&self) -> bool {
        matches!(self, Provenance::Real)
    }

    /// Resolve the provenance of an example from its recorded origin.
    ///
    /// Synthetic indicators are checked first and any one of them decides:
    /// the explicit synthetic flag, a recognized generator source tag, or a
    /// placeholder feedback type. Only afterwards can a recognized real tag
    /// or feedback type classify the example as real. Everything else is
    /// `Unknown`.
    pub fn resolve(
        synthetic_flag: bool,
        source_tag: Option<&str>,
        feedback_type: Option<&str>,
    ) -> Provenance {
        if synthetic_flag {
            return Provenance::Synthetic;
        }

        let tag = source_tag.map(normalize);
        let ftype = feedback_type.map(normalize);

        if let Some(tag) = tag.as_deref() {
            if SYNTHETIC_SOURCE_TAGS.contains(&tag) {
                return Provenance::Synthetic;
            }
        }
        if let Some(ftype) = ftype.as_deref() {
            if PLACEHOLDER_FEEDBACK_TYPES.contains(&ftype) {
                return Provenance::Synthetic;
            }
        }

        match (tag.as_deref(), ftype.as_deref()) {
            (Some(tag), _) if REAL_SOURCE_TAGS.contains(&tag) => Provenance::Real,
            // No tag at all: fall back to the feedback type alone
            (None, Some(ftype)) if REAL_FEEDBACK_TYPES.contains(&ftype) => Provenance::Real,
            _ => Provenance::Unknown,
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Real => write!(f, "real"),
            Provenance::Synthetic => write!(f, "synthetic"),
            Provenance::Unknown => write!(f, "unknown"),
        }
    }
}

/// Tags arrive in mixed case and separator styles ("ml_model", "ML-Model")
fn normalize(tag: &str) -> String {
    tag.trim().to_lowercase().replace('_', "-")
}
