//! Training gate
//!
//! Policy layer deciding whether enough real feedback exists to justify a
//! retraining run. Readiness counts come from the dataset consolidator's
//! synthetic-filtered build report, never from the monitor's raw
//! aggregates, which may legitimately include synthetic data for
//! observability. When not ready, the gate names each unmet condition
//! with its numeric gap; when ready in auto mode, it invokes the external
//! trainer exactly once and lets failure surface to the caller.

pub mod trainer;

pub use trainer::{
    search_grid, Hyperparameters, SubprocessTrainer, Trainer, TrainingMetrics, CANDIDATE_GRID,
};

use crate::config::TrainingConfig;
use crate::dataset::BuildReport;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// A readiness condition the current data does not meet
#[derive(Debug, Clone, PartialEq)]
pub enum UnmetCondition {
    /// Too few real examples
    InsufficientExamples {
        have: usize,
        need: usize,
        /// Examples still needed
        gap: usize,
    },

    /// Feedback rate below target
    LowFeedbackRate {
        rate: f64,
        target: f64,
        /// Rate still missing
        delta: f64,
    },
}

impl std::fmt::Display for UnmetCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmetCondition::InsufficientExamples { have, need, gap } => write!(
                f,
                "insufficient examples: {} of {} (need {} more)",
                have, need, gap
            ),
            UnmetCondition::LowFeedbackRate { rate, target, delta } => write!(
                f,
                "feedback rate {:.2}% below target {:.2}% (short {:.2}%)",
                rate * 100.0,
                target * 100.0,
                delta * 100.0
            ),
        }
    }
}

/// Outcome of a readiness evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Both conditions met
    Ready {
        real_examples: usize,
        feedback_rate: f64,
    },

    /// One or both conditions unmet, each with its numeric gap
    NotReady { conditions: Vec<UnmetCondition> },
}

impl GateDecision {
    pub fn is_ready(&self) -> bool {
        matches!(self, GateDecision::Ready { .. })
    }
}

/// What an auto-mode run did
#[derive(Debug, Clone)]
pub enum AutoOutcome {
    /// Gate passed; the trainer ran once
    Trained(TrainingMetrics),

    /// Gate failed; nothing was invoked
    Skipped(GateDecision),
}

/// Training state recorded after each successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    pub last_trained_at: DateTime<Utc>,
    pub runs: u32,
    pub metrics: TrainingMetrics,
    pub hyperparameters: Hyperparameters,
    pub real_examples: usize,
}

impl TrainingState {
    /// Load recorded state, if any
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Persist state, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Training gate batch job
pub struct TrainingGate {
    config: TrainingConfig,
}

impl TrainingGate {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Evaluate readiness from the consolidator's filtered report.
    /// Side-effect-free; this is all `training check` does.
    pub fn evaluate(&self, report: &BuildReport) -> GateDecision {
        self.evaluate_counts(report.real_examples, report.real_feedback_rate)
    }

    /// Evaluate readiness from the decision numbers directly
    pub fn evaluate_counts(&self, real_examples: usize, feedback_rate: f64) -> GateDecision {
        let mut conditions = Vec::new();

        if real_examples < self.config.min_examples {
            conditions.push(UnmetCondition::InsufficientExamples {
                have: real_examples,
                need: self.config.min_examples,
                gap: self.config.min_examples - real_examples,
            });
        }

        if feedback_rate < self.config.target_rate {
            conditions.push(UnmetCondition::LowFeedbackRate {
                rate: feedback_rate,
                target: self.config.target_rate,
                delta: self.config.target_rate - feedback_rate,
            });
        }

        if conditions.is_empty() {
            GateDecision::Ready {
                real_examples,
                feedback_rate,
            }
        } else {
            GateDecision::NotReady { conditions }
        }
    }

    /// Auto mode: gate on the report, then invoke the trainer exactly
    /// once. No retry; a trainer failure surfaces to the caller.
    pub async fn run_auto(
        &self,
        report: &BuildReport,
        dataset_path: &Path,
        trainer: &dyn Trainer,
    ) -> Result<AutoOutcome> {
        match self.evaluate(report) {
            decision @ GateDecision::NotReady { .. } => {
                info!("Training gate closed; trainer not invoked");
                Ok(AutoOutcome::Skipped(decision))
            }
            GateDecision::Ready { real_examples, .. } => {
                let metrics = self
                    .train_once(dataset_path, trainer, &Hyperparameters::default(), real_examples)
                    .await?;
                Ok(AutoOutcome::Trained(metrics))
            }
        }
    }

    /// Unconditional single training run (the `training train` mode)
    pub async fn run_train(
        &self,
        dataset_path: &Path,
        trainer: &dyn Trainer,
        params: &Hyperparameters,
        real_examples: usize,
    ) -> Result<TrainingMetrics> {
        self.train_once(dataset_path, trainer, params, real_examples)
            .await
    }

    async fn train_once(
        &self,
        dataset_path: &Path,
        trainer: &dyn Trainer,
        params: &Hyperparameters,
        real_examples: usize,
    ) -> Result<TrainingMetrics> {
        let metrics = trainer.train(dataset_path, params).await?;

        info!(
            "Training complete: R² test {:.4}, MAE {:.4}, RMSE {:.4}",
            metrics.r2_test, metrics.mae, metrics.rmse
        );

        // State recording is an audit convenience; the metrics are the
        // authoritative result, so a failed save only warns
        let runs = TrainingState::load(&self.config.state_path)
            .ok()
            .flatten()
            .map(|s| s.runs)
            .unwrap_or(0);
        let state = TrainingState {
            last_trained_at: Utc::now(),
            runs: runs + 1,
            metrics,
            hyperparameters: *params,
            real_examples,
        };
        if let Err(e) = state.save(&self.config.state_path) {
            warn!(
                "Failed to record training state at {}: {}",
                self.config.state_path.display(),
                e
            );
        }

        Ok(metrics)
    }
}
