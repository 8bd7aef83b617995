// Deterministic Feature Enhancement
//
// Derives the engineered feature vector the trainer consumes from the raw
// repository feature map: guarded ratios, log-compressed magnitudes,
// pairwise interactions, and bounded fixed-weight composites. No learned
// parameters anywhere; the same raw map always yields the same vector.
// Missing inputs default to 0 (or false) and every output is finite.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Raw repository features as captured at prediction/export time.
///
/// Producers disagree on key style ("openIssues" vs "open_issues" vs
/// "totalFiles"), so extraction goes through alias lists rather than
/// strict field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFeatures {
    pub stars: f64,
    pub forks: f64,
    pub open_issues: f64,
    pub file_count: f64,
    pub code_file_count: f64,
    pub repo_age_days: f64,
    pub days_since_update: f64,
    pub days_since_push: f64,
    pub has_readme: bool,
    pub has_tests: bool,
    pub has_ci: bool,
    pub has_license: bool,
    pub has_docker: bool,
    pub has_description: bool,
    pub is_active: bool,
}

impl RawFeatures {
    /// Extract raw features from a JSON feature map.
    ///
    /// Absent keys default to 0/false; non-finite numbers are treated as
    /// absent rather than allowed to poison downstream math.
    pub fn from_map(map: &BTreeMap<String, Value>) -> Self {
        Self {
            stars: num(map, &["stars"]),
            forks: num(map, &["forks"]),
            open_issues: num(map, &["openIssues", "open_issues"]),
            file_count: num(map, &["fileCount", "file_count", "totalFiles", "total_files"]),
            code_file_count: num(map, &["codeFileCount", "code_file_count"]),
            repo_age_days: num(map, &["repoAgeDays", "repo_age_days", "daysSinceCreated"]),
            days_since_update: num(map, &["daysSinceUpdate", "days_since_update"]),
            days_since_push: num(map, &["daysSincePush", "days_since_push"]),
            has_readme: flag(map, &["hasReadme", "has_readme"]),
            has_tests: flag(map, &["hasTests", "has_tests"]),
            has_ci: flag(map, &["hasCI", "has_ci"]),
            has_license: flag(map, &["hasLicense", "has_license"]),
            has_docker: flag(map, &["hasDocker", "has_docker"]),
            has_description: flag(map, &["hasDescription", "has_description"]),
            is_active: flag(map, &["isActive", "is_active"]),
        }
    }
}

/// First finite numeric value under any of the aliases, else 0
fn num(map: &BTreeMap<String, Value>, keys: &[&str]) -> f64 {
    for key in keys {
        if let Some(value) = map.get(*key) {
            let parsed = match value {
                Value::Number(n) => n.as_f64(),
                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            };
            if let Some(v) = parsed {
                if v.is_finite() {
                    return v;
                }
            }
        }
    }
    0.0
}

/// First truthy value under any of the aliases, else false.
/// Exporters encode flags as booleans or 0/1 numbers interchangeably.
fn flag(map: &BTreeMap<String, Value>, keys: &[&str]) -> bool {
    for key in keys {
        if let Some(value) = map.get(*key) {
            return match value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
                _ => false,
            };
        }
    }
    false
}

/// Engineered feature vector, the trainer's input space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    // === Raw passthrough ===
    pub stars: f64,
    pub forks: f64,
    pub open_issues: f64,
    pub file_count: f64,
    pub has_readme: f64,
    pub has_tests: f64,
    pub has_ci: f64,
    pub has_license: f64,
    pub has_docker: f64,
    pub has_description: f64,
    pub is_active: f64,

    // === Guarded ratios (never divide by zero) ===
    pub stars_per_fork: f64,
    pub stars_per_file: f64,
    pub forks_per_file: f64,
    pub engagement_per_issue: f64,

    // === Log-compressed magnitudes, log10(x + 1) ===
    pub log_stars: f64,
    pub log_forks: f64,
    pub log_files: f64,
    pub log_age_days: f64,

    // === Pairwise interactions ===
    pub stars_times_activity: f64,
    pub tests_and_ci: f64,
    pub readme_and_license: f64,
    pub active_log_age: f64,

    // === Bounded [0, 1] composites, fixed weights ===
    pub code_quality_score: f64,
    pub documentation_score: f64,
    pub freshness_score: f64,
}

impl FeatureVector {
    /// Derive the engineered vector from raw features
    pub fn enhance(raw: &RawFeatures) -> Self {
        let b = |v: bool| if v { 1.0 } else { 0.0 };
        let active = b(raw.is_active);

        Self {
            stars: raw.stars,
            forks: raw.forks,
            open_issues: raw.open_issues,
            file_count: raw.file_count,
            has_readme: b(raw.has_readme),
            has_tests: b(raw.has_tests),
            has_ci: b(raw.has_ci),
            has_license: b(raw.has_license),
            has_docker: b(raw.has_docker),
            has_description: b(raw.has_description),
            is_active: active,

            stars_per_fork: guarded_ratio(raw.stars, raw.forks),
            stars_per_file: guarded_ratio(raw.stars, raw.file_count),
            forks_per_file: guarded_ratio(raw.forks, raw.file_count),
            engagement_per_issue: guarded_ratio(raw.stars + raw.forks, raw.open_issues),

            log_stars: log10_1p(raw.stars),
            log_forks: log10_1p(raw.forks),
            log_files: log10_1p(raw.file_count),
            log_age_days: log10_1p(raw.repo_age_days),

            stars_times_activity: raw.stars * active,
            tests_and_ci: b(raw.has_tests) * b(raw.has_ci),
            readme_and_license: b(raw.has_readme) * b(raw.has_license),
            active_log_age: active * log10_1p(raw.repo_age_days),

            code_quality_score: 0.3 * b(raw.has_tests)
                + 0.3 * b(raw.has_ci)
                + 0.2 * b(raw.has_docker)
                + 0.2 * b(raw.has_readme),
            documentation_score: 0.4 * b(raw.has_readme)
                + 0.3 * b(raw.has_description)
                + 0.3 * b(raw.has_license),
            freshness_score: 1.0 / (1.0 + raw.days_since_push.max(0.0) / 30.0),
        }
    }

    /// Whether every component is finite
    pub fn is_finite(&self) -> bool {
        self.components().iter().all(|v| v.is_finite())
    }

    fn components(&self) -> [f64; 26] {
        [
            self.stars,
            self.forks,
            self.open_issues,
            self.file_count,
            self.has_readme,
            self.has_tests,
            self.has_ci,
            self.has_license,
            self.has_docker,
            self.has_description,
            self.is_active,
            self.stars_per_fork,
            self.stars_per_file,
            self.forks_per_file,
            self.engagement_per_issue,
            self.log_stars,
            self.log_forks,
            self.log_files,
            self.log_age_days,
            self.stars_times_activity,
            self.tests_and_ci,
            self.readme_and_license,
            self.active_log_age,
            self.code_quality_score,
            self.documentation_score,
            self.freshness_score,
        ]
    }
}

fn guarded_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn log10_1p(value: f64) -> f64 {
    (value.max(0.0) + 1.0).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn map_of(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_stars_times_activity_interaction() {
        let active = RawFeatures {
            stars: 100.0,
            is_active: true,
            ..Default::default()
        };
        let vector = FeatureVector::enhance(&active);
        assert_eq!(vector.stars_times_activity, 100.0);

        let inactive = RawFeatures {
            stars: 100.0,
            is_active: false,
            ..Default::default()
        };
        let vector = FeatureVector::enhance(&inactive);
        assert_eq!(vector.stars_times_activity, 0.0);
    }

    #[test]
    fn test_guarded_ratios_never_divide_by_zero() {
        let raw = RawFeatures {
            stars: 500.0,
            forks: 0.0,
            file_count: 0.0,
            open_issues: 0.0,
            ..Default::default()
        };
        let vector = FeatureVector::enhance(&raw);
        assert_eq!(vector.stars_per_fork, 0.0);
        assert_eq!(vector.stars_per_file, 0.0);
        assert_eq!(vector.engagement_per_issue, 0.0);
        assert!(vector.is_finite());

        let raw = RawFeatures {
            stars: 500.0,
            forks: 50.0,
            ..Default::default()
        };
        let vector = FeatureVector::enhance(&raw);
        assert_eq!(vector.stars_per_fork, 10.0);
    }

    #[test]
    fn test_log_terms() {
        let raw = RawFeatures {
            stars: 999.0,
            ..Default::default()
        };
        let vector = FeatureVector::enhance(&raw);
        assert!((vector.log_stars - 3.0).abs() < 1e-12);

        // Zero input stays at exactly zero
        let vector = FeatureVector::enhance(&RawFeatures::default());
        assert_eq!(vector.log_stars, 0.0);
        assert_eq!(vector.log_age_days, 0.0);
    }

    #[test]
    fn test_composites_are_bounded() {
        let everything = RawFeatures {
            has_readme: true,
            has_tests: true,
            has_ci: true,
            has_license: true,
            has_docker: true,
            has_description: true,
            is_active: true,
            days_since_push: 0.0,
            ..Default::default()
        };
        let vector = FeatureVector::enhance(&everything);
        assert!((vector.code_quality_score - 1.0).abs() < 1e-12);
        assert!((vector.documentation_score - 1.0).abs() < 1e-12);
        assert!((vector.freshness_score - 1.0).abs() < 1e-12);

        let nothing = FeatureVector::enhance(&RawFeatures::default());
        assert_eq!(nothing.code_quality_score, 0.0);
        assert_eq!(nothing.documentation_score, 0.0);
    }

    #[test]
    fn test_from_map_aliases_and_defaults() {
        let map = map_of(&[
            ("stars", json!(1200)),
            ("openIssues", json!(7)),
            ("totalFiles", json!(340)),
            ("hasTests", json!(1)),
            ("has_ci", json!(true)),
            ("isActive", json!(0)),
        ]);

        let raw = RawFeatures::from_map(&map);
        assert_eq!(raw.stars, 1200.0);
        assert_eq!(raw.open_issues, 7.0);
        assert_eq!(raw.file_count, 340.0);
        assert!(raw.has_tests);
        assert!(raw.has_ci);
        assert!(!raw.is_active);
        // Absent keys default, not fail
        assert_eq!(raw.forks, 0.0);
        assert!(!raw.has_docker);
    }

    #[test]
    fn test_from_map_ignores_garbage_values() {
        let map = map_of(&[
            ("stars", json!("not-a-number")),
            ("forks", json!(["nested"])),
            ("hasTests", json!("yes")),
        ]);

        let raw = RawFeatures::from_map(&map);
        assert_eq!(raw.stars, 0.0);
        assert_eq!(raw.forks, 0.0);
        assert!(!raw.has_tests);
    }

    proptest! {
        #[test]
        fn prop_enhancement_is_always_finite(
            stars in 0u32..=u32::MAX,
            forks in 0u32..=u32::MAX,
            open_issues in 0u32..=u32::MAX,
            file_count in 0u32..=u32::MAX,
            age in 0u32..=100_000u32,
            push in 0u32..=100_000u32,
            has_tests: bool,
            has_ci: bool,
            is_active: bool,
        ) {
            let raw = RawFeatures {
                stars: stars as f64,
                forks: forks as f64,
                open_issues: open_issues as f64,
                file_count: file_count as f64,
                repo_age_days: age as f64,
                days_since_push: push as f64,
                has_tests,
                has_ci,
                is_active,
                ..Default::default()
            };
            let vector = FeatureVector::enhance(&raw);
            prop_assert!(vector.is_finite());
            prop_assert!((0.0..=1.0).contains(&vector.code_quality_score));
            prop_assert!((0.0..=1.0).contains(&vector.documentation_score));
            prop_assert!((0.0..=1.0).contains(&vector.freshness_score));
        }

        #[test]
        fn prop_enhancement_is_deterministic(stars in 0u32..=1_000_000u32, active: bool) {
            let raw = RawFeatures {
                stars: stars as f64,
                is_active: active,
                ..Default::default()
            };
            prop_assert_eq!(FeatureVector::enhance(&raw), FeatureVector::enhance(&raw));
        }
    }
}
