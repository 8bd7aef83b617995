//! Common test utilities and helpers

use chrono::{DateTime, Utc};
use ouroboros_core::{
    ConnectionMode, LibsqlStore, Prediction, PredictionContext, PredictionId, PredictionSource,
    PredictionStore,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Create a file-backed test store.
///
/// libSQL's :memory: mode creates an isolated database per connection, so
/// schema created at init would vanish for later connections; a temp file
/// keeps the test hermetic without that surprise.
pub async fn create_test_store() -> LibsqlStore {
    let temp_file = format!(
        "{}/ouroboros_it_{}.db",
        std::env::temp_dir().display(),
        uuid::Uuid::new_v4()
    );
    LibsqlStore::new_with_validation(ConnectionMode::Local(temp_file), true)
        .await
        .expect("Failed to create test store")
}

/// Build an unresolved prediction
pub fn unresolved(
    service: &str,
    repo: &str,
    created_at: DateTime<Utc>,
    predicted_value: f64,
) -> Prediction {
    Prediction {
        id: PredictionId::new(),
        service_name: service.to_string(),
        prediction_type: "quality".to_string(),
        created_at,
        predicted_value,
        confidence: Some(0.8),
        context: PredictionContext {
            repo: Some(repo.to_string()),
            features: default_features(),
            ..Default::default()
        },
        source: PredictionSource::Model,
        actual_value: None,
        error: None,
    }
}

/// Build a resolved outcome prediction from a consuming service
pub fn outcome(
    service: &str,
    repo: &str,
    created_at: DateTime<Utc>,
    actual_value: f64,
) -> Prediction {
    let mut pred = unresolved(service, repo, created_at, 0.5);
    pred.actual_value = Some(actual_value);
    pred.error = Some((pred.predicted_value - actual_value).abs());
    pred
}

/// A plausible raw feature map
pub fn default_features() -> BTreeMap<String, Value> {
    [
        ("stars", serde_json::json!(1200)),
        ("forks", serde_json::json!(150)),
        ("fileCount", serde_json::json!(420)),
        ("hasTests", serde_json::json!(true)),
        ("hasCI", serde_json::json!(true)),
        ("isActive", serde_json::json!(true)),
        ("repoAgeDays", serde_json::json!(900)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Insert a batch of predictions
pub async fn seed(store: &dyn PredictionStore, predictions: &[Prediction]) {
    for pred in predictions {
        store
            .insert_prediction(pred)
            .await
            .expect("Failed to seed prediction");
    }
}
