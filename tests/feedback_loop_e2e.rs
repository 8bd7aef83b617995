//! End-to-End Integration Test for the feedback loop
//!
//! Exercises the full pipeline against one store: seed predictions and
//! bot outcomes, link, monitor, consolidate, and gate, verifying the
//! acme/widgets scenario end to end, including the deterministic recency
//! tie-break with an explicit second outcome.

mod common;

use chrono::{Duration, Utc};
use common::{create_test_store, outcome, seed, unresolved};
use ouroboros_core::{
    config::{DatasetConfig, LinkerConfig, MonitorConfig, TrainingConfig},
    dataset::DatasetConsolidator,
    monitor::FeedbackRateMonitor,
    training::{GateDecision, TrainingGate},
    FeedbackLinker, PredictionStore,
};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_e2e_link_monitor_consolidate_gate() {
    let store = Arc::new(create_test_store().await);
    let snapshots = TempDir::new().unwrap();
    let t0 = Utc::now() - Duration::hours(4);

    // Quality predictions for acme/widgets at t0 and t0+55min, unresolved
    let first = unresolved("beast-mode", "acme/widgets", t0, 0.7);
    let second = unresolved(
        "beast-mode",
        "acme/widgets",
        t0 + Duration::minutes(55),
        0.6,
    );

    // One bot outcome at t0+50min with actualValue 0.82, plus an explicit
    // earlier outcome so the recency tie-break is validated
    // deterministically rather than by accident of a single candidate
    let early_outcome = outcome(
        "ai-gm",
        "acme/widgets",
        t0 + Duration::minutes(10),
        0.40,
    );
    let bot_outcome = outcome(
        "code-roach",
        "acme/widgets",
        t0 + Duration::minutes(50),
        0.82,
    );

    seed(
        store.as_ref(),
        &[
            first.clone(),
            second.clone(),
            early_outcome.clone(),
            bot_outcome.clone(),
        ],
    )
    .await;

    // === Stage 1: link ===
    let linker = FeedbackLinker::new(store.clone(), LinkerConfig::default());
    let report = linker.run().await.unwrap();

    assert_eq!(report.targets, 2);
    assert_eq!(report.linked, 2);
    assert_eq!(report.recorded, 2);
    assert_eq!(report.failed, 0);

    // The t0+55min prediction links to the t0+50min outcome (delta 5min)
    let second_resolved = store.get_prediction(second.id).await.unwrap();
    assert_eq!(second_resolved.actual_value, Some(0.82));
    assert_eq!(second_resolved.error, Some((0.6f64 - 0.82f64).abs()));
    assert_eq!(
        second_resolved.context.linked_service.as_deref(),
        Some("code-roach")
    );
    assert_eq!(
        second_resolved.context.linked_prediction_id,
        Some(bot_outcome.id)
    );

    // The t0 prediction also links (delta 50min is within the window),
    // and recency decides: both outcomes are candidates, the t0+50min one
    // was created more recently, so it wins over the closer t0+10min one
    let first_resolved = store.get_prediction(first.id).await.unwrap();
    assert_eq!(first_resolved.actual_value, Some(0.82));
    assert_eq!(first_resolved.error, Some((0.7f64 - 0.82f64).abs()));
    assert_eq!(
        first_resolved.context.linked_prediction_id,
        Some(bot_outcome.id)
    );

    // Re-running the whole pass changes nothing
    let rerun = linker.run().await.unwrap();
    assert_eq!(rerun.linked, 0);
    assert_eq!(store.count_feedback().await.unwrap(), 2);

    // === Stage 2: monitor (observability) ===
    let monitor = FeedbackRateMonitor::new(store.clone(), MonitorConfig::default());
    let stats = monitor.stats().await.unwrap();
    assert_eq!(stats.total_predictions, 4);
    assert_eq!(stats.with_actual, 4);
    assert!((stats.feedback_rate - 1.0).abs() < 1e-12);
    assert_eq!(stats.by_service["beast-mode"].with_actual, 2);

    // === Stage 3: consolidate ===
    let mut dataset_config = DatasetConfig::default();
    dataset_config.snapshot_dir = snapshots.path().to_path_buf();
    dataset_config.output_path = snapshots.path().join("dataset.json");
    let consolidator = DatasetConsolidator::new(store.clone(), dataset_config.clone());
    let dataset = consolidator.build(true).await.unwrap();

    // All four predictions share one repo, so one example survives dedup
    assert_eq!(dataset.report.total_examples, 1);
    assert_eq!(dataset.report.real_examples, 1);
    assert_eq!(dataset.report.duplicates_dropped, 3);
    assert!((dataset.report.real_feedback_rate - 1.0).abs() < 1e-12);

    dataset.write_to(&dataset_config.output_path).unwrap();
    assert!(dataset_config.output_path.exists());

    // === Stage 4: gate ===
    let gate = TrainingGate::new(TrainingConfig::default());
    let decision = gate.evaluate(&dataset.report);

    // One example is far from fifty; the gate must say exactly how far
    match decision {
        GateDecision::NotReady { conditions } => {
            assert_eq!(conditions.len(), 1);
            let text = conditions[0].to_string();
            assert!(text.contains("1 of 50"), "unexpected condition: {}", text);
            assert!(text.contains("49"), "unexpected condition: {}", text);
        }
        other => panic!("expected NotReady, got {:?}", other),
    }
}
