//! Ouroboros - Feedback-Loop Closure for Quality-Prediction Models
//!
//! Closes the loop between a deployed quality-prediction model and the
//! outcomes its consumers observe:
//! - Links asynchronously observed outcomes back to the predictions that
//!   produced them (cross-service, best-effort reconciliation)
//! - Aggregates feedback collection health per service and per day
//! - Consolidates deduplicated training datasets with engineered features
//! - Gates automatic retraining on real-data sufficiency
//!
//! # Architecture
//!
//! The system is organized as bounded, idempotent batch jobs over one
//! shared store:
//! - **Types**: Core data model (Prediction, FeedbackEvent)
//! - **Storage**: The PredictionStore repository (libSQL backend)
//! - **Linker**: The only writer; resolves predictions set-once
//! - **Monitor / Dataset**: Pure readers (observability vs decision data)
//! - **Training**: Gate policy plus the external trainer collaborator
//!
//! # Example
//!
//! ```ignore
//! use ouroboros_core::{ConnectionMode, FeedbackLinker, LibsqlStore, OuroborosConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ouroboros_core::Result<()> {
//!     let config = OuroborosConfig::default();
//!     let store = Arc::new(LibsqlStore::new(ConnectionMode::Local(
//!         config.store.database_path.display().to_string(),
//!     )).await?);
//!
//!     let linker = FeedbackLinker::new(store, config.linker);
//!     let report = linker.run().await?;
//!     println!("linked {} predictions", report.linked);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dataset;
pub mod error;
pub mod jobs;
pub mod linker;
pub mod monitor;
pub mod provenance;
pub mod storage;
pub mod training;
pub mod types;

// Re-export commonly used types
pub use config::OuroborosConfig;
pub use dataset::{ConsolidatedDataset, DatasetConsolidator, DatasetExample};
pub use error::{OuroborosError, Result};
pub use linker::{FeedbackLinker, LinkReport};
pub use monitor::{FeedbackRateMonitor, FeedbackStats, RateHealth, VolumeHealth};
pub use provenance::Provenance;
pub use storage::libsql::{ConnectionMode, LibsqlStore};
pub use storage::{PredictionFilter, PredictionStore, SortOrder};
pub use training::{
    AutoOutcome, GateDecision, Hyperparameters, SubprocessTrainer, Trainer, TrainingGate,
    TrainingMetrics,
};
pub use types::{
    FeedbackEvent, FeedbackId, FeedbackMetadata, FeedbackType, Prediction, PredictionContext,
    PredictionId, PredictionSource,
};
