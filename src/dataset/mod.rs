//! Dataset consolidation
//!
//! Merges the live prediction store (post-linking) with prior snapshot
//! exports into one deduplicated, feature-enhanced example set, split
//! stably into train/validation/test. Synthetic and unknown-provenance
//! signal is excluded from real-only output; the resulting counts are the
//! decision numbers the training gate runs on.
//!
//! Precedence when the same dedup key appears in multiple sources: the
//! live store wins (it is post-linking and authoritative), then snapshots
//! newest-first by embedded timestamp; first occurrence kept.

pub mod features;
pub mod snapshot;
pub mod split;

pub use features::{FeatureVector, RawFeatures};
pub use snapshot::{SnapshotExample, SnapshotFile, SnapshotScan};
pub use split::SplitBucket;

use crate::config::DatasetConfig;
use crate::error::Result;
use crate::provenance::Provenance;
use crate::storage::{PredictionFilter, PredictionStore, SortOrder};
use crate::types::{Prediction, PredictionSource};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Origin tag for examples taken from the live store
const ORIGIN_STORE: &str = "store";

/// One consolidated training example: a read-only projection of a
/// resolved prediction plus its engineered feature vector and label
#[derive(Debug, Clone, Serialize)]
pub struct DatasetExample {
    /// Dedup key (canonical repo, source URL, or feature-map hash)
    pub key: String,

    /// Repository identifier, when known
    pub repo: Option<String>,

    /// Training label (the observed actual value)
    pub label: f64,

    /// The model's original estimate, when known
    pub predicted_value: Option<f64>,

    /// Model confidence, when known
    pub confidence: Option<f64>,

    /// Engineered feature vector
    pub features: FeatureVector,

    /// Synthetic flag, propagated unchanged from the source metadata
    pub synthetic: bool,

    /// Resolved data origin
    pub provenance: Provenance,

    /// Which source contributed this example ("store" or a snapshot name)
    pub origin: String,
}

/// Structured summary of one consolidation run
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Predictions scanned from the live store
    pub store_scanned: usize,

    /// Usable labeled examples contributed by the live store
    pub store_examples: usize,

    /// Snapshot files merged
    pub snapshots_loaded: usize,

    /// Usable labeled examples contributed by snapshots
    pub snapshot_examples: usize,

    /// Unparsable snapshot files, as "name: reason"
    pub snapshots_skipped: Vec<String>,

    /// Examples dropped because a newer source already claimed their key
    pub duplicates_dropped: usize,

    /// Examples dropped for missing label or dedup key
    pub invalid_skipped: usize,

    /// Examples excluded from real-only output as synthetic
    pub synthetic_excluded: usize,

    /// Examples excluded from real-only output as unknown provenance
    pub unknown_excluded: usize,

    /// Final output size
    pub total_examples: usize,

    // === Decision numbers (synthetic-filtered view) ===
    /// Real-provenance examples in the final output
    pub real_examples: usize,

    /// Real-provenance predictions scanned in the store page
    pub real_predictions_seen: usize,

    /// ... of which resolved with an outcome
    pub real_with_outcome: usize,

    /// real_with_outcome / real_predictions_seen, 0 when nothing scanned
    pub real_feedback_rate: f64,
}

/// Examples grouped by stable split assignment
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetSplit {
    pub train: Vec<DatasetExample>,
    pub validation: Vec<DatasetExample>,
    pub test: Vec<DatasetExample>,
}

/// Consolidated output: examples plus the run report
#[derive(Debug, Clone)]
pub struct ConsolidatedDataset {
    pub examples: Vec<DatasetExample>,
    pub report: BuildReport,
}

impl ConsolidatedDataset {
    /// Partition examples by their stable split bucket
    pub fn split(&self) -> DatasetSplit {
        let mut out = DatasetSplit::default();
        for example in &self.examples {
            match split::bucket_for(&example.key) {
                SplitBucket::Train => out.train.push(example.clone()),
                SplitBucket::Validation => out.validation.push(example.clone()),
                SplitBucket::Test => out.test.push(example.clone()),
            }
        }
        out
    }

    /// Write the dataset (with its split) as a self-describing JSON
    /// document the trainer consumes
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let split = self.split();
        let doc = serde_json::json!({
            "metadata": {
                "exported_at": Utc::now().to_rfc3339(),
                "source": "ouroboros-consolidator",
                "total_examples": self.examples.len(),
                "train": split.train.len(),
                "validation": split.validation.len(),
                "test": split.test.len(),
            },
            "train": split.train,
            "validation": split.validation,
            "test": split.test,
        });

        std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }
}

/// Dataset consolidator batch job
pub struct DatasetConsolidator {
    store: Arc<dyn PredictionStore>,
    config: DatasetConfig,
}

impl DatasetConsolidator {
    pub fn new(store: Arc<dyn PredictionStore>, config: DatasetConfig) -> Self {
        Self { store, config }
    }

    /// Run one consolidation pass over the live store and the snapshot
    /// directory. Pure reader; concurrent linking only makes the view
    /// momentarily stale, which is expected.
    pub async fn build(&self, real_only: bool) -> Result<ConsolidatedDataset> {
        let predictions = self
            .store
            .query_predictions(&PredictionFilter {
                prediction_type: Some(self.config.prediction_type.clone()),
                limit: Some(self.config.page_limit),
                order: SortOrder::CreatedDesc,
                ..Default::default()
            })
            .await?;

        let scan = snapshot::load_dir(&self.config.snapshot_dir)?;

        let dataset = consolidate(&predictions, &scan, real_only);
        info!(
            "Consolidated {} examples ({} real) from {} store predictions and {} snapshots",
            dataset.report.total_examples,
            dataset.report.real_examples,
            dataset.report.store_scanned,
            dataset.report.snapshots_loaded
        );
        Ok(dataset)
    }
}

/// Merge store predictions and scanned snapshots into a deduplicated,
/// provenance-filtered example set
pub fn consolidate(
    store_predictions: &[Prediction],
    scan: &SnapshotScan,
    real_only: bool,
) -> ConsolidatedDataset {
    let mut report = BuildReport {
        store_scanned: store_predictions.len(),
        snapshots_loaded: scan.snapshots.len(),
        snapshots_skipped: scan.skipped.clone(),
        ..Default::default()
    };

    // Candidates in precedence order: live store first, then snapshots
    // newest-first. First occurrence of a dedup key wins.
    let mut candidates: Vec<DatasetExample> = Vec::new();

    for pred in store_predictions {
        let provenance =
            Provenance::resolve(false, Some(pred.source.as_str()), None);

        // Decision-rate inputs come from the same filtered view the
        // example counts do, never from raw monitor aggregates
        if provenance.is_real() {
            report.real_predictions_seen += 1;
            if pred.is_resolved() {
                report.real_with_outcome += 1;
            }
        }

        let label = match pred.actual_value {
            Some(label) => label,
            None => continue, // unresolved predictions carry no label yet
        };

        let key = match dedup_key(
            pred.context.repo.as_deref(),
            pred.context.url.as_deref(),
            &pred.context.features,
        ) {
            Some(key) => key,
            None => {
                report.invalid_skipped += 1;
                continue;
            }
        };

        report.store_examples += 1;
        candidates.push(DatasetExample {
            key,
            repo: pred.context.repo.clone(),
            label,
            predicted_value: Some(pred.predicted_value),
            confidence: pred.confidence,
            features: FeatureVector::enhance(&RawFeatures::from_map(&pred.context.features)),
            synthetic: pred.source == PredictionSource::Generator,
            provenance,
            origin: ORIGIN_STORE.to_string(),
        });
    }

    for snap in &scan.snapshots {
        for example in &snap.examples {
            let label = match example.label {
                Some(label) => label,
                None => {
                    report.invalid_skipped += 1;
                    continue;
                }
            };

            let key = match dedup_key(
                example.repo.as_deref(),
                example.url.as_deref(),
                &example.features,
            ) {
                Some(key) => key,
                None => {
                    report.invalid_skipped += 1;
                    continue;
                }
            };

            report.snapshot_examples += 1;
            candidates.push(DatasetExample {
                key,
                repo: example.repo.clone(),
                label,
                predicted_value: example.predicted_value,
                confidence: example.confidence,
                features: FeatureVector::enhance(&RawFeatures::from_map(&example.features)),
                synthetic: example.synthetic,
                provenance: Provenance::resolve(
                    example.synthetic,
                    example.source_tag.as_deref(),
                    example.feedback_type.as_deref(),
                ),
                origin: snap.name.clone(),
            });
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut examples: Vec<DatasetExample> = Vec::new();

    for example in candidates {
        if !seen.insert(example.key.clone()) {
            report.duplicates_dropped += 1;
            continue;
        }

        if real_only && !example.provenance.is_real() {
            match example.provenance {
                Provenance::Synthetic => report.synthetic_excluded += 1,
                _ => report.unknown_excluded += 1,
            }
            continue;
        }

        examples.push(example);
    }

    report.total_examples = examples.len();
    report.real_examples = examples.iter().filter(|e| e.provenance.is_real()).count();
    report.real_feedback_rate = if report.real_predictions_seen > 0 {
        report.real_with_outcome as f64 / report.real_predictions_seen as f64
    } else {
        0.0
    };

    ConsolidatedDataset { examples, report }
}

/// Dedup key for an example: canonical repo identifier if present, else
/// source URL, else a stable hash of the feature map
pub fn dedup_key(
    repo: Option<&str>,
    url: Option<&str>,
    features: &BTreeMap<String, Value>,
) -> Option<String> {
    if let Some(repo) = repo {
        let repo = repo.trim();
        if !repo.is_empty() {
            return Some(format!("repo:{}", repo.to_lowercase()));
        }
    }

    if let Some(url) = url {
        let url = url.trim().trim_end_matches('/');
        if !url.is_empty() {
            return Some(format!("url:{}", url.to_lowercase()));
        }
    }

    if !features.is_empty() {
        use sha2::{Digest, Sha256};
        // BTreeMap keys serialize sorted, so the hash is stable
        let canonical = serde_json::to_string(features).ok()?;
        let digest = Sha256::digest(canonical.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        return Some(format!("features:{}", hex));
    }

    None
}
