// Snapshot Export Documents
//
// Prior dataset exports live in a directory of self-describing JSON
// documents: a metadata header (export timestamp, source tag, declared
// example count) plus the example list. This module only consumes them;
// the consolidator decides precedence, processing snapshots newest-first
// by the timestamp embedded in the file name (header timestamp as the
// fallback when the name carries none).
//
// Exporters disagree on field naming (repo/full_name/name, label/
// quality_score, camelCase/snake_case), so example extraction is
// alias-tolerant instead of schema-strict: a malformed document is
// skipped and counted, never fatal.

use crate::error::{OuroborosError, Result};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Timestamp embedded in a snapshot file name, e.g.
/// "export-2026-07-04T12-00-00.json" or "dataset-20260704T120000.json"
static NAME_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})-?(\d{2})-?(\d{2})[T_](\d{2})[-:]?(\d{2})[-:]?(\d{2})")
        .expect("static datetime pattern")
});

/// Date-only fallback, e.g. "export-2026-07-04.json"
static NAME_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("static date pattern"));

/// One example from a snapshot document
#[derive(Debug, Clone)]
pub struct SnapshotExample {
    pub repo: Option<String>,
    pub url: Option<String>,
    pub label: Option<f64>,
    pub predicted_value: Option<f64>,
    pub confidence: Option<f64>,
    pub features: BTreeMap<String, Value>,
    pub synthetic: bool,
    pub source_tag: Option<String>,
    pub feedback_type: Option<String>,
}

impl SnapshotExample {
    /// Extract an example from a JSON object; None for non-objects
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let metadata = obj.get("metadata").and_then(Value::as_object);
        let synthetic = metadata
            .and_then(|m| m.get("synthetic"))
            .map(truthy)
            .unwrap_or(false);
        let source_tag = metadata
            .and_then(|m| get_str(m, &["source", "source_tag", "sourceTag"]))
            .or_else(|| get_str(obj, &["source"]));
        let feedback_type = metadata.and_then(|m| get_str(m, &["feedback_type", "feedbackType"]));

        let features = obj
            .get("features")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Some(Self {
            repo: get_str(obj, &["repo", "full_name", "name"]),
            url: get_str(obj, &["url", "html_url"]),
            label: get_f64(obj, &["label", "quality_score", "actual_value", "actualValue"]),
            predicted_value: get_f64(
                obj,
                &["predicted_value", "predicted_quality", "predictedValue"],
            ),
            confidence: get_f64(obj, &["confidence"]),
            features,
            synthetic,
            source_tag,
            feedback_type,
        })
    }
}

/// A parsed snapshot document
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    /// File name (without directory)
    pub name: String,

    /// Timestamp used for newest-first ordering: name-embedded, falling
    /// back to the header's exported_at
    pub ordering_timestamp: DateTime<Utc>,

    /// Header export timestamp, when present
    pub exported_at: Option<DateTime<Utc>>,

    /// Header source tag
    pub source: Option<String>,

    /// Header's declared example count (informational; the list decides)
    pub declared_count: Option<usize>,

    pub examples: Vec<SnapshotExample>,
}

/// Result of scanning a snapshot directory
#[derive(Debug, Clone, Default)]
pub struct SnapshotScan {
    /// Parsed snapshots, newest first
    pub snapshots: Vec<SnapshotFile>,

    /// Unparsable files, as "name: reason"
    pub skipped: Vec<String>,
}

/// Parse the timestamp embedded in a snapshot file name
pub fn parse_name_timestamp(name: &str) -> Option<DateTime<Utc>> {
    if let Some(c) = NAME_DATETIME.captures(name) {
        let parts: Vec<i64> = (1..=6)
            .filter_map(|i| c.get(i).and_then(|m| m.as_str().parse().ok()))
            .collect();
        if parts.len() == 6 {
            if let chrono::LocalResult::Single(dt) = Utc.with_ymd_and_hms(
                parts[0] as i32,
                parts[1] as u32,
                parts[2] as u32,
                parts[3] as u32,
                parts[4] as u32,
                parts[5] as u32,
            ) {
                return Some(dt);
            }
        }
    }

    if let Some(c) = NAME_DATE.captures(name) {
        let year: i32 = c.get(1)?.as_str().parse().ok()?;
        let month: u32 = c.get(2)?.as_str().parse().ok()?;
        let day: u32 = c.get(3)?.as_str().parse().ok()?;
        if let chrono::LocalResult::Single(dt) = Utc.with_ymd_and_hms(year, month, day, 0, 0, 0) {
            return Some(dt);
        }
    }

    None
}

/// Load every snapshot document in a directory, newest first.
///
/// A missing directory means zero snapshots; an unreadable one is a
/// connectivity failure. Individual malformed files are skipped and
/// reported in the scan.
pub fn load_dir(dir: &Path) -> Result<SnapshotScan> {
    let mut scan = SnapshotScan::default();

    if !dir.exists() {
        debug!("Snapshot directory {} absent, nothing to merge", dir.display());
        return Ok(scan);
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        OuroborosError::Connectivity(format!(
            "Cannot read snapshot directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            OuroborosError::Connectivity(format!("Snapshot directory scan failed: {}", e))
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();

        match load_file(&path, &name) {
            Ok(snapshot) => scan.snapshots.push(snapshot),
            Err(e) => {
                warn!("Skipping snapshot {}: {}", name, e);
                scan.skipped.push(format!("{}: {}", name, e));
            }
        }
    }

    // Newest first; name as the final tie-break keeps ordering total
    scan.snapshots.sort_by(|a, b| {
        b.ordering_timestamp
            .cmp(&a.ordering_timestamp)
            .then(b.name.cmp(&a.name))
    });

    Ok(scan)
}

fn load_file(path: &Path, name: &str) -> Result<SnapshotFile> {
    let contents = std::fs::read_to_string(path)?;
    let doc: Value = serde_json::from_str(&contents)?;

    let obj = doc
        .as_object()
        .ok_or_else(|| OuroborosError::Validation("document is not an object".to_string()))?;

    let metadata = obj.get("metadata").and_then(Value::as_object);
    let exported_at = metadata
        .and_then(|m| get_str(m, &["exported_at", "exportedAt"]))
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    let source = metadata.and_then(|m| get_str(m, &["source"]));
    let declared_count = metadata
        .and_then(|m| {
            m.get("total_examples")
                .or_else(|| m.get("total_repos"))
                .or_else(|| m.get("count"))
        })
        .and_then(Value::as_u64)
        .map(|n| n as usize);

    let list = obj
        .get("examples")
        .or_else(|| obj.get("repositories"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            OuroborosError::Validation("no examples/repositories list".to_string())
        })?;

    let examples: Vec<SnapshotExample> =
        list.iter().filter_map(SnapshotExample::from_value).collect();

    let ordering_timestamp = parse_name_timestamp(name)
        .or(exported_at)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    Ok(SnapshotFile {
        name: name.to_string(),
        ordering_timestamp,
        exported_at,
        source,
        declared_count,
        examples,
    })
}

/// First string value under any of the aliases
fn get_str(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(|s| s.to_string())
}

/// First finite numeric value under any of the aliases
fn get_f64(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_f64))
        .filter(|v| v.is_finite())
}

/// JS-style truthiness for flags encoded as bool, 0/1, or "true"
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_name_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2026, 7, 4, 12, 30, 0).unwrap();
        assert_eq!(
            parse_name_timestamp("export-2026-07-04T12-30-00.json"),
            Some(expected)
        );
        assert_eq!(
            parse_name_timestamp("dataset-20260704T123000.json"),
            Some(expected)
        );
        assert_eq!(
            parse_name_timestamp("all-repos_2026-07-04_12:30:00.json"),
            Some(expected)
        );

        let midnight = Utc.with_ymd_and_hms(2026, 7, 4, 0, 0, 0).unwrap();
        assert_eq!(parse_name_timestamp("export-2026-07-04.json"), Some(midnight));

        assert_eq!(parse_name_timestamp("latest.json"), None);
    }

    #[test]
    fn test_example_extraction_with_aliases() {
        let value = json!({
            "name": "acme/widgets",
            "full_name": "acme/widgets",
            "repo": "acme/widgets",
            "quality_score": 0.82,
            "predicted_quality": 0.7,
            "confidence": 0.9,
            "features": { "stars": 100, "hasTests": true },
            "metadata": { "source": "ml_model", "synthetic": 0 }
        });

        let example = SnapshotExample::from_value(&value).unwrap();
        assert_eq!(example.repo.as_deref(), Some("acme/widgets"));
        assert_eq!(example.label, Some(0.82));
        assert_eq!(example.predicted_value, Some(0.7));
        assert!(!example.synthetic);
        assert_eq!(example.source_tag.as_deref(), Some("ml_model"));
        assert_eq!(example.features["stars"], json!(100));
    }

    #[test]
    fn test_example_synthetic_flag_truthiness() {
        for flag in [json!(true), json!(1), json!("true")] {
            let value = json!({ "repo": "a/b", "metadata": { "synthetic": flag } });
            let example = SnapshotExample::from_value(&value).unwrap();
            assert!(example.synthetic, "flag {:?} should mark synthetic", value);
        }

        let value = json!({ "repo": "a/b" });
        assert!(!SnapshotExample::from_value(&value).unwrap().synthetic);
    }

    #[test]
    fn test_load_dir_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let doc = |source: &str| {
            json!({
                "metadata": { "source": source, "total_examples": 1 },
                "examples": [{ "repo": "a/b", "label": 0.5 }]
            })
            .to_string()
        };

        std::fs::write(dir.path().join("export-2026-07-01.json"), doc("old")).unwrap();
        std::fs::write(dir.path().join("export-2026-07-04.json"), doc("new")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a snapshot").unwrap();

        let scan = load_dir(dir.path()).unwrap();
        assert_eq!(scan.snapshots.len(), 2);
        assert_eq!(scan.snapshots[0].name, "export-2026-07-04.json");
        assert_eq!(scan.snapshots[1].name, "export-2026-07-01.json");
        assert!(scan.skipped.is_empty());
    }

    #[test]
    fn test_load_dir_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(
            dir.path().join("no-list.json"),
            json!({ "metadata": {} }).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("good-2026-07-04.json"),
            json!({ "metadata": {}, "examples": [] }).to_string(),
        )
        .unwrap();

        let scan = load_dir(dir.path()).unwrap();
        assert_eq!(scan.snapshots.len(), 1);
        assert_eq!(scan.skipped.len(), 2);
    }

    #[test]
    fn test_load_dir_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let scan = load_dir(&missing).unwrap();
        assert!(scan.snapshots.is_empty());
    }

    #[test]
    fn test_header_timestamp_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("latest.json"),
            json!({
                "metadata": { "exported_at": "2026-07-03T10:00:00Z" },
                "examples": []
            })
            .to_string(),
        )
        .unwrap();

        let scan = load_dir(dir.path()).unwrap();
        assert_eq!(
            scan.snapshots[0].ordering_timestamp,
            Utc.with_ymd_and_hms(2026, 7, 3, 10, 0, 0).unwrap()
        );
    }
}
