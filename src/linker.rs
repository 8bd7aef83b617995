// Feedback Linker
//
// Reconciles unresolved predictions with outcomes observed by other,
// independently-deployed services. Correlation is best-effort: a bounded
// sweep sorted by repo then time, not an inline write-time trigger, so
// each producing service stays independently deployable.
//
// Matching rule: an outcome O matches target P iff both carry the same
// context.repo and |O.created_at - P.created_at| is within the window.
// Among multiple matches the most recently CREATED outcome wins (recency,
// not proximity); ties on identical timestamps break by greatest id so
// re-runs are deterministic.

use crate::config::LinkerConfig;
use crate::error::{OuroborosError, Result};
use crate::jobs::ErrorLog;
use crate::storage::{PredictionFilter, PredictionStore, SortOrder};
use crate::types::{
    FeedbackEvent, FeedbackId, FeedbackMetadata, FeedbackType, Prediction, PredictionSource,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Feedback linker batch job
pub struct FeedbackLinker {
    store: Arc<dyn PredictionStore>,
    config: LinkerConfig,
}

/// Structured summary of one link run
#[derive(Debug, Clone)]
pub struct LinkReport {
    /// Unresolved target predictions fetched
    pub targets: usize,

    /// Resolved outcome predictions fetched from other services
    pub outcomes: usize,

    /// Predictions resolved by this run
    pub linked: usize,

    /// Audit feedback events recorded (≤ linked; inserts may fail)
    pub recorded: usize,

    /// Targets with no outcome in window, or already resolved concurrently
    pub skipped: usize,

    /// Per-item failures (malformed records, failed writes)
    pub failed: usize,

    /// First N error messages, with repo/prediction context
    pub errors: Vec<String>,

    /// Wall-clock duration of the run
    pub duration: std::time::Duration,
}

impl FeedbackLinker {
    pub fn new(store: Arc<dyn PredictionStore>, config: LinkerConfig) -> Self {
        Self { store, config }
    }

    /// Run one bounded link pass.
    ///
    /// Fatal (connectivity) errors abort the run; per-item errors are
    /// counted and the batch continues. Re-running is always safe: the
    /// store's set-once resolution turns double-links into no-ops.
    pub async fn run(&self) -> Result<LinkReport> {
        let start = Instant::now();

        let targets = self
            .store
            .query_predictions(&PredictionFilter {
                service: Some(self.config.target_service.clone()),
                prediction_type: Some(self.config.prediction_type.clone()),
                resolved: Some(false),
                limit: Some(self.config.page_limit),
                order: SortOrder::CreatedAsc,
                ..Default::default()
            })
            .await?;

        let outcomes = self
            .store
            .query_predictions(&PredictionFilter {
                exclude_service: Some(self.config.target_service.clone()),
                prediction_type: Some(self.config.prediction_type.clone()),
                resolved: Some(true),
                limit: Some(self.config.page_limit),
                order: SortOrder::CreatedDesc,
                ..Default::default()
            })
            .await?;

        info!(
            "Link pass: {} unresolved targets, {} candidate outcomes",
            targets.len(),
            outcomes.len()
        );

        // Gather the full candidate set per repo before deciding anything;
        // the recency tie-break needs all of a repo's outcomes at once.
        let mut by_repo: HashMap<&str, Vec<&Prediction>> = HashMap::new();
        for outcome in &outcomes {
            if let Some(repo) = outcome.repo() {
                by_repo.entry(repo).or_default().push(outcome);
            } else {
                debug!("Outcome {} has no repo identifier, unusable", outcome.id);
            }
        }

        // Deterministic sweep order: repo, then creation time
        let mut ordered: Vec<&Prediction> = targets.iter().collect();
        ordered.sort_by(|a, b| {
            a.repo()
                .cmp(&b.repo())
                .then(a.created_at.cmp(&b.created_at))
        });

        let mut linked = 0usize;
        let mut recorded = 0usize;
        let mut skipped = 0usize;
        let mut errors = ErrorLog::new(self.config.max_reported_errors);

        for target in ordered {
            let repo = match target.repo() {
                Some(repo) => repo,
                None => {
                    errors.push(format!(
                        "prediction {}: missing repo identifier, skipped",
                        target.id
                    ));
                    continue;
                }
            };

            let candidates = by_repo.get(repo).map(Vec::as_slice).unwrap_or_default();
            let best = match select_outcome(target, candidates, self.config.window) {
                Some(best) => best,
                None => {
                    skipped += 1;
                    continue;
                }
            };

            match self.link_one(target, best).await {
                Ok(feedback_recorded) => {
                    linked += 1;
                    if feedback_recorded {
                        recorded += 1;
                    }
                }
                Err(OuroborosError::Conflict(_)) => {
                    // Already resolved (e.g. by a concurrent run): a no-op
                    debug!("Prediction {} already resolved, skipping", target.id);
                    skipped += 1;
                }
                Err(e) if !e.is_fatal() => {
                    errors.push(format!("prediction {} ({}): {}", target.id, repo, e));
                }
                Err(e) => return Err(e),
            }
        }

        let report = LinkReport {
            targets: targets.len(),
            outcomes: outcomes.len(),
            linked,
            recorded,
            skipped,
            failed: errors.total(),
            errors: errors.into_messages(),
            duration: start.elapsed(),
        };

        info!(
            "Link pass complete: {} linked, {} skipped, {} failed in {:?}",
            report.linked, report.skipped, report.failed, report.duration
        );

        Ok(report)
    }

    /// Resolve one target against its selected outcome and record the
    /// audit feedback event.
    ///
    /// Returns whether the feedback event landed. The prediction's
    /// actual_value is the authoritative signal, so a failed audit insert
    /// after a successful resolve is logged and swallowed.
    async fn link_one(&self, target: &Prediction, outcome: &Prediction) -> Result<bool> {
        let actual = outcome.actual_value.ok_or_else(|| {
            OuroborosError::Validation(format!(
                "outcome {} has no actual value",
                outcome.id
            ))
        })?;

        let error = target.error_against(actual);
        let time_diff_secs = (outcome.created_at - target.created_at).num_seconds();

        let mut context = target.context.clone();
        context.linked_service = Some(outcome.service_name.clone());
        context.linked_prediction_id = Some(outcome.id);
        context.linked_time_diff_secs = Some(time_diff_secs);
        context.feedback_collected_at = Some(Utc::now());

        self.store
            .resolve_prediction(target.id, actual, error, &context)
            .await?;

        debug!(
            "Linked {} <- {} ({}): actual {:.3}, error {:.3}",
            target.id, outcome.id, outcome.service_name, actual, error
        );

        let event = FeedbackEvent {
            id: FeedbackId::new(),
            prediction_id: target.id,
            service_name: outcome.service_name.clone(),
            feedback_type: FeedbackType::Bot,
            feedback_score: actual,
            metadata: FeedbackMetadata {
                source: Some(outcome.source.as_str().to_string()),
                // Outcomes written by generators stay marked synthetic all
                // the way into derived dataset records
                synthetic: outcome.source == PredictionSource::Generator,
                linked_from: Some(outcome.service_name.clone()),
                linked_prediction_id: Some(outcome.id),
                time_diff_secs: Some(time_diff_secs),
            },
            created_at: Utc::now(),
        };

        match self.store.insert_feedback(&event).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(
                    "Feedback insert failed for {} (prediction stays resolved): {}",
                    target.id, e
                );
                Ok(false)
            }
        }
    }
}

/// Select the winning outcome for a target from its repo's candidates.
///
/// Candidates outside the window are ignored; among the rest the most
/// recently created wins, with identical timestamps broken by greatest id.
fn select_outcome<'a>(
    target: &Prediction,
    candidates: &[&'a Prediction],
    window: std::time::Duration,
) -> Option<&'a Prediction> {
    let window = chrono::Duration::from_std(window).ok()?;

    candidates
        .iter()
        .filter(|outcome| {
            let delta = outcome.created_at - target.created_at;
            delta.abs() <= window
        })
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PredictionContext, PredictionId};
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn prediction_at(service: &str, repo: &str, at: DateTime<Utc>, actual: Option<f64>) -> Prediction {
        Prediction {
            id: PredictionId::new(),
            service_name: service.to_string(),
            prediction_type: "quality".to_string(),
            created_at: at,
            predicted_value: 0.7,
            confidence: Some(0.8),
            context: PredictionContext {
                repo: Some(repo.to_string()),
                ..Default::default()
            },
            source: PredictionSource::Model,
            actual_value: actual,
            error: actual.map(|a| (0.7f64 - a).abs()),
        }
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_select_outcome_prefers_most_recently_created() {
        let t0 = Utc::now();
        let target = prediction_at("beast-mode", "acme/widgets", t0, None);

        // Both within the window; +50min is further from the target but
        // created later, so recency decides, not proximity.
        let near = prediction_at("code-roach", "acme/widgets", t0 + ChronoDuration::minutes(10), Some(0.6));
        let late = prediction_at("oracle", "acme/widgets", t0 + ChronoDuration::minutes(50), Some(0.82));

        let candidates = vec![&near, &late];
        let selected = select_outcome(&target, &candidates, HOUR).unwrap();
        assert_eq!(selected.id, late.id);
        assert_eq!(selected.actual_value, Some(0.82));
    }

    #[test]
    fn test_select_outcome_ignores_candidates_outside_window() {
        let t0 = Utc::now();
        let target = prediction_at("beast-mode", "acme/widgets", t0, None);

        let stale = prediction_at("oracle", "acme/widgets", t0 + ChronoDuration::minutes(90), Some(0.9));
        let fresh = prediction_at("oracle", "acme/widgets", t0 + ChronoDuration::minutes(30), Some(0.5));

        let candidates = vec![&stale, &fresh];
        let selected = select_outcome(&target, &candidates, HOUR).unwrap();
        assert_eq!(selected.id, fresh.id);
    }

    #[test]
    fn test_select_outcome_window_is_symmetric() {
        let t0 = Utc::now();
        let target = prediction_at("beast-mode", "acme/widgets", t0, None);

        // An outcome observed shortly BEFORE the prediction still matches
        let earlier = prediction_at("oracle", "acme/widgets", t0 - ChronoDuration::minutes(20), Some(0.4));
        let candidates = vec![&earlier];
        assert!(select_outcome(&target, &candidates, HOUR).is_some());
    }

    #[test]
    fn test_select_outcome_none_when_empty_or_all_outside() {
        let t0 = Utc::now();
        let target = prediction_at("beast-mode", "acme/widgets", t0, None);

        assert!(select_outcome(&target, &[], HOUR).is_none());

        let stale = prediction_at("oracle", "acme/widgets", t0 + ChronoDuration::hours(2), Some(0.9));
        let candidates = vec![&stale];
        assert!(select_outcome(&target, &candidates, HOUR).is_none());
    }

    #[test]
    fn test_select_outcome_identical_timestamps_break_by_id() {
        let t0 = Utc::now();
        let target = prediction_at("beast-mode", "acme/widgets", t0, None);

        let a = prediction_at("oracle", "acme/widgets", t0 + ChronoDuration::minutes(5), Some(0.3));
        let b = prediction_at("code-roach", "acme/widgets", t0 + ChronoDuration::minutes(5), Some(0.9));

        let expected = if a.id > b.id { a.id } else { b.id };
        let candidates = vec![&a, &b];
        let selected = select_outcome(&target, &candidates, HOUR).unwrap();
        assert_eq!(selected.id, expected);

        // Same winner regardless of candidate ordering
        let candidates = vec![&b, &a];
        let selected = select_outcome(&target, &candidates, HOUR).unwrap();
        assert_eq!(selected.id, expected);
    }
}
