// Pipeline Configuration
//
// Defines configuration for the feedback-loop batch jobs: store location,
// linking window and page sizes, monitoring thresholds, dataset
// consolidation paths, and training-gate policy. Loaded from TOML with
// validation at startup; invalid values are fatal before any job runs.

use crate::error::OuroborosError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for OuroborosError {
    fn from(err: ConfigError) -> Self {
        OuroborosError::Configuration(err.to_string())
    }
}

/// Main configuration for the feedback-loop pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OuroborosConfig {
    /// Prediction store location
    #[serde(default)]
    pub store: StoreConfig,

    /// Feedback linker settings
    #[serde(default)]
    pub linker: LinkerConfig,

    /// Feedback-rate monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Dataset consolidation settings
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Training gate policy
    #[serde(default)]
    pub training: TrainingConfig,
}

/// Prediction store location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the libSQL database file
    pub database_path: PathBuf,
}

/// Feedback linker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkerConfig {
    /// Service whose predictions are linked against outcomes
    pub target_service: String,

    /// Prediction type to link (e.g. "quality")
    pub prediction_type: String,

    /// Maximum |created_at delta| between prediction and outcome
    #[serde(with = "serde_duration")]
    pub window: Duration,

    /// Hard page limit per run, for both targets and outcomes
    pub page_limit: usize,

    /// Maximum run duration; exceeding it is a connectivity failure
    #[serde(with = "serde_duration")]
    pub max_duration: Duration,

    /// How many error messages a run summary retains
    pub max_reported_errors: usize,
}

/// Feedback-rate monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Reporting window in days (UTC)
    pub window_days: u32,

    /// Hard page limit per run
    pub page_limit: usize,

    /// Per-service alert threshold on the feedback rate
    pub alert_rate: f64,

    /// Services with fewer predictions than this are not alerted on
    pub min_service_volume: usize,

    /// Maximum run duration
    #[serde(with = "serde_duration")]
    pub max_duration: Duration,
}

/// Dataset consolidation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Prediction type consolidated into training data
    pub prediction_type: String,

    /// Directory of snapshot export documents
    pub snapshot_dir: PathBuf,

    /// Where `dataset build` writes the consolidated dataset
    pub output_path: PathBuf,

    /// Hard page limit when scanning the live store
    pub page_limit: usize,

    /// Maximum run duration
    #[serde(with = "serde_duration")]
    pub max_duration: Duration,
}

/// Training gate policy and trainer invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Minimum real (synthetic-filtered) examples required to train
    pub min_examples: usize,

    /// Minimum feedback rate required to train, in (0, 1]
    pub target_rate: f64,

    /// Interpreter the trainer is launched with
    pub trainer_command: String,

    /// Trainer script path, given the dataset path and hyperparameters
    pub trainer_script: PathBuf,

    /// Where training state is recorded after a successful run
    pub state_path: PathBuf,

    /// Maximum trainer duration
    #[serde(with = "serde_duration")]
    pub max_duration: Duration,
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(".ouroboros/predictions.db"),
        }
    }
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            target_service: "beast-mode".to_string(),
            prediction_type: "quality".to_string(),
            window: Duration::from_secs(3600), // 1 hour
            page_limit: 1000,
            max_duration: Duration::from_secs(120),
            max_reported_errors: 5,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            page_limit: 10_000,
            alert_rate: 0.05, // 5% feedback rate threshold
            min_service_volume: 10,
            max_duration: Duration::from_secs(60),
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            prediction_type: "quality".to_string(),
            snapshot_dir: PathBuf::from(".ouroboros/snapshots"),
            output_path: PathBuf::from(".ouroboros/training-data/dataset.json"),
            page_limit: 10_000,
            max_duration: Duration::from_secs(300),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_examples: 50,
            target_rate: 0.05,
            trainer_command: "python3".to_string(),
            trainer_script: PathBuf::from("trainer/train_quality_model.py"),
            state_path: PathBuf::from(".ouroboros/training-state.json"),
            max_duration: Duration::from_secs(1800),
        }
    }
}

impl Default for OuroborosConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            linker: LinkerConfig::default(),
            monitor: MonitorConfig::default(),
            dataset: DatasetConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl OuroborosConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: OuroborosConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.linker.window < Duration::from_secs(60) {
            return Err(ConfigError::ValidationError(
                "linker: window must be at least 1 minute".to_string(),
            ));
        }
        Self::validate_page_limit("linker", self.linker.page_limit)?;
        Self::validate_page_limit("monitor", self.monitor.page_limit)?;
        Self::validate_page_limit("dataset", self.dataset.page_limit)?;

        Self::validate_max_duration("linker", self.linker.max_duration)?;
        Self::validate_max_duration("monitor", self.monitor.max_duration)?;
        Self::validate_max_duration("dataset", self.dataset.max_duration)?;
        Self::validate_max_duration("training", self.training.max_duration)?;

        if self.training.min_examples == 0 {
            return Err(ConfigError::ValidationError(
                "training: min_examples must be at least 1".to_string(),
            ));
        }
        if !(self.training.target_rate > 0.0 && self.training.target_rate <= 1.0) {
            return Err(ConfigError::ValidationError(
                "training: target_rate must be in (0, 1]".to_string(),
            ));
        }
        if !(self.monitor.alert_rate > 0.0 && self.monitor.alert_rate <= 1.0) {
            return Err(ConfigError::ValidationError(
                "monitor: alert_rate must be in (0, 1]".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_page_limit(name: &str, limit: usize) -> Result<(), ConfigError> {
        if limit == 0 || limit > 100_000 {
            return Err(ConfigError::ValidationError(format!(
                "{}: page_limit must be between 1 and 100000",
                name
            )));
        }
        Ok(())
    }

    fn validate_max_duration(name: &str, duration: Duration) -> Result<(), ConfigError> {
        if duration < Duration::from_secs(1) || duration > Duration::from_secs(3600) {
            return Err(ConfigError::ValidationError(format!(
                "{}: max_duration must be between 1 second and 1 hour",
                name
            )));
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}
