//! Feedback-rate monitoring
//!
//! Pure read-side aggregation of feedback collection health: how many
//! predictions have observed outcomes, segmented by service and by UTC
//! calendar day. Statistics are recomputed fresh on every call rather than
//! maintained as incremental counters, and the monitor tolerates a
//! momentarily stale (not-yet-linked) view of the store.
//!
//! These are observability numbers. Training decisions use the dataset
//! consolidator's synthetic-filtered counts instead.

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::storage::{PredictionFilter, PredictionStore, SortOrder};
use crate::types::Prediction;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Rate classification thresholds
const RATE_EXCELLENT: f64 = 0.10;
const RATE_GOOD: f64 = 0.05;
const RATE_LOW: f64 = 0.01;

/// Volume classification thresholds (real examples with outcomes)
const VOLUME_MINIMAL: usize = 50;
const VOLUME_RECOMMENDED: usize = 150;

/// Feedback-rate health, independent of volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateHealth {
    /// ≥ 10% of predictions have outcomes
    Excellent,
    /// ≥ 5%
    Good,
    /// ≥ 1%
    Low,
    /// below 1%
    Critical,
}

impl RateHealth {
    /// Classify a feedback rate
    pub fn classify(rate: f64) -> Self {
        if rate >= RATE_EXCELLENT {
            RateHealth::Excellent
        } else if rate >= RATE_GOOD {
            RateHealth::Good
        } else if rate >= RATE_LOW {
            RateHealth::Low
        } else {
            RateHealth::Critical
        }
    }
}

impl std::fmt::Display for RateHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateHealth::Excellent => write!(f, "excellent"),
            RateHealth::Good => write!(f, "good"),
            RateHealth::Low => write!(f, "low"),
            RateHealth::Critical => write!(f, "critical"),
        }
    }
}

/// Data-volume health, independent of rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeHealth {
    /// Fewer than 50 predictions with outcomes
    Insufficient,
    /// At least 50, minimally sufficient for training
    Minimal,
    /// 150+, the recommended range
    Recommended,
}

impl VolumeHealth {
    /// Classify a with-outcome volume
    pub fn classify(with_actual: usize) -> Self {
        if with_actual >= VOLUME_RECOMMENDED {
            VolumeHealth::Recommended
        } else if with_actual >= VOLUME_MINIMAL {
            VolumeHealth::Minimal
        } else {
            VolumeHealth::Insufficient
        }
    }
}

impl std::fmt::Display for VolumeHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeHealth::Insufficient => write!(f, "insufficient"),
            VolumeHealth::Minimal => write!(f, "minimal"),
            VolumeHealth::Recommended => write!(f, "recommended"),
        }
    }
}

/// Per-service segment
#[derive(Debug, Clone, Default)]
pub struct ServiceStats {
    pub total: usize,
    pub with_actual: usize,
    pub feedback_rate: f64,
}

/// Per-UTC-day segment
#[derive(Debug, Clone, Default)]
pub struct DayStats {
    pub total: usize,
    pub with_actual: usize,
    pub feedback_rate: f64,
}

/// Aggregated feedback statistics over the reporting window
#[derive(Debug, Clone)]
pub struct FeedbackStats {
    pub total_predictions: usize,
    pub with_actual: usize,
    pub without_actual: usize,

    /// with_actual / total, 0 when the window is empty
    pub feedback_rate: f64,

    /// Mean confidence over predictions that carry one; absent
    /// confidences are excluded, never treated as zero
    pub average_confidence: Option<f64>,

    /// Segments keyed by service name ("unknown" when absent)
    pub by_service: BTreeMap<String, ServiceStats>,

    /// Segments keyed by UTC calendar day
    pub by_day: BTreeMap<NaiveDate, DayStats>,

    /// Reporting window in days
    pub window_days: u32,
}

/// A service whose feedback collection needs attention
#[derive(Debug, Clone)]
pub struct ServiceAlert {
    pub service: String,
    pub feedback_rate: f64,
    pub total: usize,
}

/// Health summary combining both classifications
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub rate: RateHealth,
    pub volume: VolumeHealth,
    pub healthy: bool,
    pub alerts: Vec<ServiceAlert>,
    pub stats: FeedbackStats,
}

/// Feedback-rate monitor: a pure reader over the prediction store
pub struct FeedbackRateMonitor {
    store: Arc<dyn PredictionStore>,
    config: MonitorConfig,
}

impl FeedbackRateMonitor {
    pub fn new(store: Arc<dyn PredictionStore>, config: MonitorConfig) -> Self {
        Self { store, config }
    }

    /// Compute fresh statistics over the configured window
    pub async fn stats(&self) -> Result<FeedbackStats> {
        let since = Utc::now() - ChronoDuration::days(i64::from(self.config.window_days));
        let predictions = self
            .store
            .query_predictions(&PredictionFilter {
                created_after: Some(since),
                limit: Some(self.config.page_limit),
                order: SortOrder::CreatedDesc,
                ..Default::default()
            })
            .await?;

        let stats = Self::compute(&predictions, self.config.window_days);
        info!(
            "Feedback stats: {}/{} with outcomes ({:.1}%)",
            stats.with_actual,
            stats.total_predictions,
            stats.feedback_rate * 100.0
        );
        Ok(stats)
    }

    /// Aggregate a page of predictions into statistics
    pub fn compute(predictions: &[Prediction], window_days: u32) -> FeedbackStats {
        let total = predictions.len();
        let mut with_actual = 0usize;
        let mut by_service: BTreeMap<String, ServiceStats> = BTreeMap::new();
        let mut by_day: BTreeMap<NaiveDate, DayStats> = BTreeMap::new();
        let mut confidence_sum = 0.0f64;
        let mut confidence_count = 0usize;

        for pred in predictions {
            let resolved = pred.is_resolved();
            if resolved {
                with_actual += 1;
            }

            let service = if pred.service_name.trim().is_empty() {
                "unknown".to_string()
            } else {
                pred.service_name.clone()
            };
            let entry = by_service.entry(service).or_default();
            entry.total += 1;
            if resolved {
                entry.with_actual += 1;
            }

            let day = pred.created_at.date_naive();
            let entry = by_day.entry(day).or_default();
            entry.total += 1;
            if resolved {
                entry.with_actual += 1;
            }

            if let Some(confidence) = pred.confidence {
                confidence_sum += confidence;
                confidence_count += 1;
            }
        }

        for stats in by_service.values_mut() {
            stats.feedback_rate = rate(stats.with_actual, stats.total);
        }
        for stats in by_day.values_mut() {
            stats.feedback_rate = rate(stats.with_actual, stats.total);
        }

        FeedbackStats {
            total_predictions: total,
            with_actual,
            without_actual: total - with_actual,
            feedback_rate: rate(with_actual, total),
            average_confidence: if confidence_count > 0 {
                Some(confidence_sum / confidence_count as f64)
            } else {
                None
            },
            by_service,
            by_day,
            window_days,
        }
    }

    /// Classify overall health and flag individual services below the
    /// alert threshold (once they have enough volume to matter)
    pub async fn check_health(&self) -> Result<HealthReport> {
        let stats = self.stats().await?;
        Ok(self.health_from(stats))
    }

    fn health_from(&self, stats: FeedbackStats) -> HealthReport {
        let rate_health = RateHealth::classify(stats.feedback_rate);
        let volume_health = VolumeHealth::classify(stats.with_actual);

        let alerts: Vec<ServiceAlert> = stats
            .by_service
            .iter()
            .filter(|(_, s)| {
                s.total > self.config.min_service_volume && s.feedback_rate < self.config.alert_rate
            })
            .map(|(name, s)| ServiceAlert {
                service: name.clone(),
                feedback_rate: s.feedback_rate,
                total: s.total,
            })
            .collect();

        let healthy = stats.feedback_rate >= self.config.alert_rate && alerts.is_empty();

        HealthReport {
            rate: rate_health,
            volume: volume_health,
            healthy,
            alerts,
            stats,
        }
    }
}

fn rate(with_actual: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        with_actual as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PredictionContext, PredictionId, PredictionSource};
    use chrono::{DateTime, TimeZone};

    fn prediction(service: &str, at: DateTime<Utc>, actual: Option<f64>, confidence: Option<f64>) -> Prediction {
        Prediction {
            id: PredictionId::new(),
            service_name: service.to_string(),
            prediction_type: "quality".to_string(),
            created_at: at,
            predicted_value: 0.7,
            confidence,
            context: PredictionContext::default(),
            source: PredictionSource::Model,
            actual_value: actual,
            error: actual.map(|a| (0.7f64 - a).abs()),
        }
    }

    #[test]
    fn test_rate_health_boundaries() {
        assert_eq!(RateHealth::classify(0.10), RateHealth::Excellent);
        assert_eq!(RateHealth::classify(0.099), RateHealth::Good);
        assert_eq!(RateHealth::classify(0.05), RateHealth::Good);
        assert_eq!(RateHealth::classify(0.049), RateHealth::Low);
        assert_eq!(RateHealth::classify(0.01), RateHealth::Low);
        assert_eq!(RateHealth::classify(0.009), RateHealth::Critical);
        assert_eq!(RateHealth::classify(0.0), RateHealth::Critical);
    }

    #[test]
    fn test_volume_health_boundaries() {
        assert_eq!(VolumeHealth::classify(0), VolumeHealth::Insufficient);
        assert_eq!(VolumeHealth::classify(49), VolumeHealth::Insufficient);
        assert_eq!(VolumeHealth::classify(50), VolumeHealth::Minimal);
        assert_eq!(VolumeHealth::classify(149), VolumeHealth::Minimal);
        assert_eq!(VolumeHealth::classify(150), VolumeHealth::Recommended);
        assert_eq!(VolumeHealth::classify(500), VolumeHealth::Recommended);
    }

    #[test]
    fn test_compute_empty_window_rate_is_zero() {
        let stats = FeedbackRateMonitor::compute(&[], 7);
        assert_eq!(stats.total_predictions, 0);
        assert_eq!(stats.feedback_rate, 0.0);
        assert!(stats.average_confidence.is_none());
    }

    #[test]
    fn test_compute_segments_by_service_and_day() {
        let day1 = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 7, 2, 9, 0, 0).unwrap();

        let predictions = vec![
            prediction("beast-mode", day1, Some(0.8), Some(0.9)),
            prediction("beast-mode", day1, None, Some(0.7)),
            prediction("code-roach", day2, Some(0.6), None),
            prediction("", day2, None, None),
        ];

        let stats = FeedbackRateMonitor::compute(&predictions, 7);
        assert_eq!(stats.total_predictions, 4);
        assert_eq!(stats.with_actual, 2);
        assert_eq!(stats.without_actual, 2);
        assert!((stats.feedback_rate - 0.5).abs() < 1e-12);

        let beast = &stats.by_service["beast-mode"];
        assert_eq!(beast.total, 2);
        assert_eq!(beast.with_actual, 1);
        assert!((beast.feedback_rate - 0.5).abs() < 1e-12);

        // Absent service name defaults to "unknown"
        assert_eq!(stats.by_service["unknown"].total, 1);

        assert_eq!(stats.by_day.len(), 2);
        assert_eq!(stats.by_day[&day1.date_naive()].total, 2);
        assert_eq!(stats.by_day[&day2.date_naive()].total, 2);
    }

    #[test]
    fn test_absent_confidence_excluded_from_average() {
        let now = Utc::now();
        let predictions = vec![
            prediction("beast-mode", now, None, Some(0.8)),
            prediction("beast-mode", now, None, Some(0.6)),
            prediction("beast-mode", now, None, None),
        ];

        let stats = FeedbackRateMonitor::compute(&predictions, 7);
        // Mean of 0.8 and 0.6; the missing one is excluded, not zero
        assert!((stats.average_confidence.unwrap() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_health_alerts_require_volume() {
        let monitor_config = MonitorConfig::default();
        let now = Utc::now();

        // 11 predictions, none resolved: below the 5% alert rate and
        // above the 10-prediction volume floor
        let mut noisy: Vec<Prediction> = (0..11)
            .map(|_| prediction("silent-service", now, None, None))
            .collect();
        // A small service with bad rate stays un-alerted
        noisy.push(prediction("tiny-service", now, None, None));
        // And one healthy service
        for _ in 0..10 {
            noisy.push(prediction("chatty-service", now, Some(0.8), None));
        }

        let stats = FeedbackRateMonitor::compute(&noisy, 7);
        let monitor = FeedbackRateMonitor {
            store: Arc::new(NoopStore),
            config: monitor_config,
        };
        let health = monitor.health_from(stats);

        assert_eq!(health.alerts.len(), 1);
        assert_eq!(health.alerts[0].service, "silent-service");
        assert!(!health.healthy);
    }

    // Minimal store stub for health_from tests (never queried)
    struct NoopStore;

    #[async_trait::async_trait]
    impl PredictionStore for NoopStore {
        async fn insert_prediction(&self, _: &Prediction) -> Result<()> {
            unreachable!()
        }
        async fn get_prediction(&self, _: PredictionId) -> Result<Prediction> {
            unreachable!()
        }
        async fn query_predictions(&self, _: &PredictionFilter) -> Result<Vec<Prediction>> {
            Ok(Vec::new())
        }
        async fn count_predictions(&self, _: &PredictionFilter) -> Result<usize> {
            Ok(0)
        }
        async fn resolve_prediction(
            &self,
            _: PredictionId,
            _: f64,
            _: f64,
            _: &PredictionContext,
        ) -> Result<()> {
            unreachable!()
        }
        async fn insert_feedback(&self, _: &crate::types::FeedbackEvent) -> Result<()> {
            unreachable!()
        }
        async fn count_feedback(&self) -> Result<usize> {
            Ok(0)
        }
    }
}
