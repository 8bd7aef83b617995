//! Core data types for the Ouroboros feedback loop
//!
//! This module defines the store-level data model: predictions made by the
//! serving model, feedback events recording observed outcomes, and the
//! context/metadata documents carried alongside both. The dataset-side
//! projection ([`crate::dataset::DatasetExample`]) is derived from these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for predictions
///
/// Wraps a UUID to provide type safety and prevent mixing prediction IDs
/// with other UUID-based identifiers in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionId(pub Uuid);

impl PredictionId {
    /// Create a new random prediction ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a prediction ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for PredictionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PredictionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for feedback events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(pub Uuid);

impl FeedbackId {
    /// Create a new random feedback ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a feedback ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for FeedbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a prediction entered the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    /// Produced by the serving model
    Model,

    /// Produced by the heuristic fallback path when the model was unavailable
    Fallback,

    /// Written directly to the store, bypassing the serving path
    DirectWrite,

    /// Produced by a data generator (synthetic by construction)
    Generator,
}

impl PredictionSource {
    /// Stable string form used in the store
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionSource::Model => "model",
            PredictionSource::Fallback => "fallback",
            PredictionSource::DirectWrite => "direct_write",
            PredictionSource::Generator => "generator",
        }
    }

    /// Parse the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(PredictionSource::Model),
            "fallback" => Some(PredictionSource::Fallback),
            "direct_write" => Some(PredictionSource::DirectWrite),
            "generator" => Some(PredictionSource::Generator),
            _ => None,
        }
    }
}

/// Who produced a feedback event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    /// Explicit rating from a human user
    User,

    /// Outcome observed by an automated consuming service
    Bot,

    /// Inferred by the system itself (e.g. health probes)
    System,
}

impl FeedbackType {
    /// Stable string form used in the store
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::User => "user",
            FeedbackType::Bot => "bot",
            FeedbackType::System => "system",
        }
    }

    /// Parse the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(FeedbackType::User),
            "bot" => Some(FeedbackType::Bot),
            "system" => Some(FeedbackType::System),
            _ => None,
        }
    }
}

/// Context document attached to a prediction
///
/// Carries the repository identity the prediction was made for, the raw
/// feature map used by the model, and (once the linker resolves the
/// prediction) the linkage provenance trail.
///
/// The feature map uses a BTreeMap so its serialized form is
/// deterministic; the dataset layer hashes it as a dedup-key fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionContext {
    /// Canonical repository identifier (e.g. "org/repo")
    #[serde(default)]
    pub repo: Option<String>,

    /// Source URL, used as a dedup key when no repo identifier is present
    #[serde(default)]
    pub url: Option<String>,

    /// Raw feature map captured at prediction time
    #[serde(default)]
    pub features: BTreeMap<String, serde_json::Value>,

    // === Linkage provenance (set once by the linker) ===
    /// Service whose outcome resolved this prediction
    #[serde(default)]
    pub linked_service: Option<String>,

    /// Outcome prediction that resolved this prediction
    #[serde(default)]
    pub linked_prediction_id: Option<PredictionId>,

    /// Signed seconds between this prediction and the linked outcome
    #[serde(default)]
    pub linked_time_diff_secs: Option<i64>,

    /// When the linker resolved this prediction
    #[serde(default)]
    pub feedback_collected_at: Option<DateTime<Utc>>,
}

/// A stored quality-score estimate for a repository
///
/// Created when a consuming request is served; mutated exactly once (by
/// the linker) when an outcome resolves it; never deleted, since it is the
/// audit trail for future model evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    // === Identity ===
    /// Unique identifier
    pub id: PredictionId,

    /// Service that requested the prediction
    pub service_name: String,

    /// Prediction type (e.g. "quality")
    pub prediction_type: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    // === Estimate ===
    /// Predicted value in [0, 1]
    pub predicted_value: f64,

    /// Model confidence in [0, 1], absent for fallback paths
    pub confidence: Option<f64>,

    /// Context document (repo identity, feature map, linkage provenance)
    pub context: PredictionContext,

    /// How this prediction entered the store
    pub source: PredictionSource,

    // === Resolution (set once by the linker) ===
    /// Observed outcome value, if resolved
    pub actual_value: Option<f64>,

    /// Absolute prediction error, |predicted_value − actual_value|
    pub error: Option<f64>,
}

impl Prediction {
    /// Whether an outcome has been linked to this prediction
    pub fn is_resolved(&self) -> bool {
        self.actual_value.is_some()
    }

    /// Absolute error this prediction would have against an observed value
    pub fn error_against(&self, actual: f64) -> f64 {
        (self.predicted_value - actual).abs()
    }

    /// Repository identifier from the context, if present
    pub fn repo(&self) -> Option<&str> {
        self.context.repo.as_deref()
    }
}

/// Metadata attached to a feedback event
///
/// Records where the signal came from so the dataset layer can separate
/// real from synthetic data. The synthetic flag must propagate unchanged
/// into any derived dataset record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackMetadata {
    /// Provenance tag of the producer (e.g. "model", "bot-feedback-generator")
    #[serde(default)]
    pub source: Option<String>,

    /// Marks generated/test feedback that reflects no genuine behavior
    #[serde(default)]
    pub synthetic: bool,

    /// Service the outcome was linked from
    #[serde(default)]
    pub linked_from: Option<String>,

    /// Outcome prediction the feedback was derived from
    #[serde(default)]
    pub linked_prediction_id: Option<PredictionId>,

    /// Signed seconds between target prediction and outcome
    #[serde(default)]
    pub time_diff_secs: Option<i64>,
}

/// An observed outcome recorded against a prediction
///
/// Created once per successful link and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Unique identifier
    pub id: FeedbackId,

    /// Prediction this feedback evaluates
    pub prediction_id: PredictionId,

    /// Service that produced the feedback
    pub service_name: String,

    /// Who produced the feedback
    pub feedback_type: FeedbackType,

    /// Observed score in [0, 1]
    pub feedback_score: f64,

    /// Provenance metadata
    pub metadata: FeedbackMetadata,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_prediction() -> Prediction {
        Prediction {
            id: PredictionId::new(),
            service_name: "beast-mode".to_string(),
            prediction_type: "quality".to_string(),
            created_at: Utc::now(),
            predicted_value: 0.7,
            confidence: Some(0.85),
            context: PredictionContext {
                repo: Some("acme/widgets".to_string()),
                ..Default::default()
            },
            source: PredictionSource::Model,
            actual_value: None,
            error: None,
        }
    }

    #[test]
    fn test_prediction_id_uniqueness() {
        let id1 = PredictionId::new();
        let id2 = PredictionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_error_against_is_absolute() {
        let pred = sample_prediction();
        assert!((pred.error_against(0.82) - 0.12).abs() < 1e-12);
        assert!((pred.error_against(0.5) - 0.2).abs() < 1e-12);
        // Symmetric regardless of direction
        assert_eq!(pred.error_against(0.9), pred.error_against(0.5));
    }

    #[test]
    fn test_source_string_roundtrip() {
        for source in [
            PredictionSource::Model,
            PredictionSource::Fallback,
            PredictionSource::DirectWrite,
            PredictionSource::Generator,
        ] {
            assert_eq!(PredictionSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(PredictionSource::parse("unknown"), None);
    }

    #[test]
    fn test_feedback_type_string_roundtrip() {
        for ft in [FeedbackType::User, FeedbackType::Bot, FeedbackType::System] {
            assert_eq!(FeedbackType::parse(ft.as_str()), Some(ft));
        }
        assert_eq!(FeedbackType::parse("carrier-pigeon"), None);
    }

    #[test]
    fn test_context_feature_map_is_ordered() {
        let mut ctx = PredictionContext::default();
        ctx.features
            .insert("stars".to_string(), serde_json::json!(100));
        ctx.features
            .insert("forks".to_string(), serde_json::json!(10));

        // BTreeMap serializes keys in sorted order, which the dataset
        // layer relies on for stable fallback hashing.
        let json = serde_json::to_string(&ctx.features).unwrap();
        assert_eq!(json, r#"{"forks":10,"stars":100}"#);
    }
}
