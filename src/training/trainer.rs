// External Trainer Invocation
//
// The regressor itself lives outside this system: an external training
// script invoked as a subprocess with a dataset path and a hyperparameter
// set, printing a JSON metrics summary (train/test R², MAE, RMSE) on
// stdout. Hyperparameter search selects among a small fixed candidate
// grid by held-out R², never by the training-split score.

use crate::config::TrainingConfig;
use crate::error::{OuroborosError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Hyperparameters handed to the external trainer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub max_depth: u32,
    pub learning_rate: f64,
    pub n_estimators: u32,
    pub reg_alpha: f64,
    pub reg_lambda: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            max_depth: 4,
            learning_rate: 0.1,
            n_estimators: 100,
            reg_alpha: 0.1,
            reg_lambda: 1.5,
        }
    }
}

/// The fixed candidate grid searched by `search_grid`
pub const CANDIDATE_GRID: &[Hyperparameters] = &[
    Hyperparameters {
        max_depth: 4,
        learning_rate: 0.1,
        n_estimators: 100,
        reg_alpha: 0.1,
        reg_lambda: 1.5,
    },
    Hyperparameters {
        max_depth: 3,
        learning_rate: 0.1,
        n_estimators: 200,
        reg_alpha: 0.1,
        reg_lambda: 1.5,
    },
    Hyperparameters {
        max_depth: 6,
        learning_rate: 0.05,
        n_estimators: 200,
        reg_alpha: 0.1,
        reg_lambda: 1.0,
    },
    Hyperparameters {
        max_depth: 4,
        learning_rate: 0.05,
        n_estimators: 300,
        reg_alpha: 0.2,
        reg_lambda: 2.0,
    },
];

/// Metrics summary returned by the trainer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// R² on the training split (reported, never used for selection)
    pub r2_train: f64,

    /// R² on the held-out split; the selection criterion
    pub r2_test: f64,

    pub mae: f64,
    pub rmse: f64,
}

/// The external trainer collaborator
#[async_trait]
pub trait Trainer: Send + Sync {
    /// Train once on the given dataset with the given hyperparameters
    async fn train(&self, dataset_path: &Path, params: &Hyperparameters)
        -> Result<TrainingMetrics>;
}

/// Trainer invoked as a subprocess (e.g. a Python XGBoost script)
pub struct SubprocessTrainer {
    config: TrainingConfig,
}

impl SubprocessTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Trainer for SubprocessTrainer {
    async fn train(
        &self,
        dataset_path: &Path,
        params: &Hyperparameters,
    ) -> Result<TrainingMetrics> {
        info!(
            "Invoking trainer: {} {} (max_depth={}, lr={}, estimators={})",
            self.config.trainer_command,
            self.config.trainer_script.display(),
            params.max_depth,
            params.learning_rate,
            params.n_estimators
        );

        let output = tokio::process::Command::new(&self.config.trainer_command)
            .arg(&self.config.trainer_script)
            .arg("--data")
            .arg(dataset_path)
            .arg("--max-depth")
            .arg(params.max_depth.to_string())
            .arg("--learning-rate")
            .arg(params.learning_rate.to_string())
            .arg("--n-estimators")
            .arg(params.n_estimators.to_string())
            .arg("--reg-alpha")
            .arg(params.reg_alpha.to_string())
            .arg("--reg-lambda")
            .arg(params.reg_lambda.to_string())
            .output()
            .await
            .map_err(|e| {
                OuroborosError::Trainer(format!(
                    "Failed to launch {}: {}",
                    self.config.trainer_command, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(OuroborosError::Trainer(format!(
                "Trainer exited with {}: {}",
                output.status, tail
            )));
        }

        parse_metrics(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Extract the metrics summary from trainer stdout.
///
/// The trainer logs progress lines freely; the summary is the last line
/// that parses as a metrics JSON object.
pub fn parse_metrics(stdout: &str) -> Result<TrainingMetrics> {
    for line in stdout.lines().rev() {
        let line = line.trim();
        if line.starts_with('{') {
            if let Ok(metrics) = serde_json::from_str::<TrainingMetrics>(line) {
                return Ok(metrics);
            }
        }
    }

    Err(OuroborosError::Trainer(
        "No metrics summary found in trainer output".to_string(),
    ))
}

/// Search a fixed candidate grid, selecting the winner by held-out R².
///
/// Each candidate trains once; a failed candidate is skipped with a
/// warning and the search errors only when every candidate failed.
pub async fn search_grid(
    trainer: &dyn Trainer,
    dataset_path: &Path,
    grid: &[Hyperparameters],
) -> Result<(Hyperparameters, TrainingMetrics)> {
    let mut best: Option<(Hyperparameters, TrainingMetrics)> = None;
    let mut failures = 0usize;

    for params in grid {
        match trainer.train(dataset_path, params).await {
            Ok(metrics) => {
                info!(
                    "Candidate max_depth={} lr={}: held-out R² {:.4}",
                    params.max_depth, params.learning_rate, metrics.r2_test
                );
                let better = match &best {
                    Some((_, current)) => metrics.r2_test > current.r2_test,
                    None => true,
                };
                if better {
                    best = Some((*params, metrics));
                }
            }
            Err(e) => {
                warn!(
                    "Candidate max_depth={} lr={} failed: {}",
                    params.max_depth, params.learning_rate, e
                );
                failures += 1;
            }
        }
    }

    best.ok_or_else(|| {
        OuroborosError::Trainer(format!(
            "All {} grid candidates failed",
            failures
        ))
    })
}
