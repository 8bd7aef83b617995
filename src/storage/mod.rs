//! Storage layer for the prediction log
//!
//! Provides the abstract repository the pipeline stages run against plus a
//! libSQL implementation. No storage-engine assumption leaks above this
//! module: stages see query-by-filter, set-once resolution, and feedback
//! insertion only.

pub mod libsql;

use crate::error::Result;
use crate::types::{FeedbackEvent, Prediction, PredictionContext, PredictionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Sort order for prediction queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first
    CreatedAsc,
    /// Newest first
    CreatedDesc,
}

/// Query-by-filter access to the prediction log
///
/// Built with struct-update syntax:
///
/// ```ignore
/// let unresolved = PredictionFilter {
///     service: Some("beast-mode".to_string()),
///     resolved: Some(false),
///     limit: Some(1000),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct PredictionFilter {
    /// Only predictions from this service
    pub service: Option<String>,

    /// Only predictions NOT from this service (outcome sweeps)
    pub exclude_service: Option<String>,

    /// Only predictions of this type
    pub prediction_type: Option<String>,

    /// Some(true): actual_value set; Some(false): actual_value null
    pub resolved: Option<bool>,

    /// Only predictions created at or after this instant
    pub created_after: Option<DateTime<Utc>>,

    /// Only predictions created before this instant
    pub created_before: Option<DateTime<Utc>>,

    /// Hard page limit
    pub limit: Option<usize>,

    /// Result ordering by creation time
    pub order: SortOrder,
}

impl Default for PredictionFilter {
    fn default() -> Self {
        Self {
            service: None,
            exclude_service: None,
            prediction_type: None,
            resolved: None,
            created_after: None,
            created_before: None,
            limit: None,
            order: SortOrder::CreatedDesc,
        }
    }
}

/// Storage backend trait defining all required operations
///
/// Only the linker writes (resolution + feedback); the monitor and the
/// consolidator are pure readers and may run concurrently with linking.
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Insert a new prediction
    async fn insert_prediction(&self, prediction: &Prediction) -> Result<()>;

    /// Retrieve a prediction by ID
    async fn get_prediction(&self, id: PredictionId) -> Result<Prediction>;

    /// Query predictions by filter, bounded by the filter's limit
    async fn query_predictions(&self, filter: &PredictionFilter) -> Result<Vec<Prediction>>;

    /// Count predictions matching a filter (limit ignored)
    async fn count_predictions(&self, filter: &PredictionFilter) -> Result<usize>;

    /// Resolve a prediction with its observed outcome, exactly once.
    ///
    /// The update only applies while `actual_value` is still null. A
    /// prediction that is already resolved yields
    /// [`crate::error::OuroborosError::Conflict`], which callers treat as
    /// a no-op so re-running a link pass can never double-link.
    async fn resolve_prediction(
        &self,
        id: PredictionId,
        actual_value: f64,
        error: f64,
        context: &PredictionContext,
    ) -> Result<()>;

    /// Insert a feedback event; the referenced prediction must exist
    async fn insert_feedback(&self, event: &FeedbackEvent) -> Result<()>;

    /// Count feedback events (for status reporting)
    async fn count_feedback(&self) -> Result<usize>;
}
