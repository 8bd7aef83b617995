//! LibSQL storage backend implementation
//!
//! Persists the prediction log and feedback events in a libSQL database.
//! Resolution uses a conditional single-row update (`WHERE actual_value IS
//! NULL`) so linking is atomic-enough: re-runs and mid-run cancellation can
//! never double-link a prediction.

use crate::error::{OuroborosError, Result};
use crate::storage::{PredictionFilter, PredictionStore, SortOrder};
use crate::types::{
    FeedbackEvent, Prediction, PredictionContext, PredictionId, PredictionSource,
};
use async_trait::async_trait;
use libsql::{params, params_from_iter, Builder, Connection, Database, Value};
use tracing::{debug, info};

/// Database connection mode
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Local file-based database
    Local(String),
    /// In-memory database. Note: libSQL gives each connection its own
    /// `:memory:` database, so tests that reopen connections use temp files.
    InMemory,
}

/// LibSQL prediction store
#[derive(Debug)]
pub struct LibsqlStore {
    db: Database,
}

impl LibsqlStore {
    /// Open a store; the database must already exist for local paths
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        Self::new_with_validation(mode, false).await
    }

    /// Open a store, optionally creating the database file
    ///
    /// # Arguments
    /// * `mode` - Connection mode (local file or in-memory)
    /// * `create_if_missing` - If true, create the database and its parent
    ///   directory when absent. If false, a missing database is an error.
    pub async fn new_with_validation(mode: ConnectionMode, create_if_missing: bool) -> Result<Self> {
        info!("Connecting to prediction store: {:?}", mode);

        let db = match &mode {
            ConnectionMode::Local(path) => {
                let file = std::path::Path::new(path);
                if !file.exists() {
                    if !create_if_missing {
                        return Err(OuroborosError::Connectivity(format!(
                            "Prediction store not found at '{}'. Run 'ouroboros init' first.",
                            path
                        )));
                    }
                    if let Some(parent) = file.parent() {
                        if !parent.as_os_str().is_empty() {
                            std::fs::create_dir_all(parent).map_err(|e| {
                                OuroborosError::Database(format!(
                                    "Failed to create store directory {}: {}",
                                    parent.display(),
                                    e
                                ))
                            })?;
                        }
                    }
                }

                Builder::new_local(path).build().await.map_err(|e| {
                    OuroborosError::Connectivity(format!("Failed to open store at {}: {}", path, e))
                })?
            }
            ConnectionMode::InMemory => Builder::new_local(":memory:")
                .build()
                .await
                .map_err(|e| {
                    OuroborosError::Connectivity(format!("Failed to open in-memory store: {}", e))
                })?,
        };

        let store = Self { db };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create from a string path; ":memory:" selects the in-memory mode
    pub async fn from_path(database_url: &str, create_if_missing: bool) -> Result<Self> {
        let mode = if database_url == ":memory:" {
            ConnectionMode::InMemory
        } else {
            ConnectionMode::Local(database_url.to_string())
        };
        Self::new_with_validation(mode, create_if_missing).await
    }

    /// Get a connection from the database
    fn get_conn(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| OuroborosError::Connectivity(format!("Failed to get connection: {}", e)))
    }

    /// Create tables and indexes (idempotent)
    pub async fn run_migrations(&self) -> Result<()> {
        debug!("Running store migrations...");
        let conn = self.get_conn()?;

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id TEXT PRIMARY KEY,
                service_name TEXT NOT NULL,
                prediction_type TEXT NOT NULL,
                predicted_value REAL NOT NULL,
                confidence REAL,
                context TEXT NOT NULL DEFAULT '{}',
                source TEXT NOT NULL,
                actual_value REAL,
                error REAL,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_predictions_type_resolved
                ON predictions(prediction_type, actual_value)",
            "CREATE INDEX IF NOT EXISTS idx_predictions_service
                ON predictions(service_name, created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS feedback_events (
                id TEXT PRIMARY KEY,
                prediction_id TEXT NOT NULL REFERENCES predictions(id),
                service_name TEXT NOT NULL,
                feedback_type TEXT NOT NULL,
                feedback_score REAL NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_feedback_prediction
                ON feedback_events(prediction_id)",
        ];

        for sql in statements {
            conn.execute(sql, params![]).await.map_err(|e| {
                OuroborosError::Database(format!("Migration failed: {}", e))
            })?;
        }

        debug!("Store migrations completed");
        Ok(())
    }

    /// Map a result row to a Prediction
    fn row_to_prediction(row: &libsql::Row) -> Result<Prediction> {
        let id_str: String = row.get(0)?;
        let id = PredictionId::from_string(&id_str)?;

        let service_name: String = row.get(1)?;
        let prediction_type: String = row.get(2)?;
        let predicted_value: f64 = row.get(3)?;
        let confidence: Option<f64> = row.get(4)?;

        let context_json: String = row.get(5)?;
        let context: PredictionContext = serde_json::from_str(&context_json)?;

        let source_str: String = row.get(6)?;
        let source = PredictionSource::parse(&source_str).ok_or_else(|| {
            OuroborosError::Validation(format!(
                "prediction {}: unknown source '{}'",
                id, source_str
            ))
        })?;

        let actual_value: Option<f64> = row.get(7)?;
        let error: Option<f64> = row.get(8)?;

        let created_at: String = row.get(9)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| {
                OuroborosError::Validation(format!("prediction {}: invalid timestamp: {}", id, e))
            })?
            .with_timezone(&chrono::Utc);

        Ok(Prediction {
            id,
            service_name,
            prediction_type,
            created_at,
            predicted_value,
            confidence,
            context,
            source,
            actual_value,
            error,
        })
    }

    /// Build the WHERE clause and bound values for a filter
    fn build_where(filter: &PredictionFilter) -> (String, Vec<Value>) {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(service) = &filter.service {
            conditions.push("service_name = ?");
            values.push(Value::Text(service.clone()));
        }
        if let Some(excluded) = &filter.exclude_service {
            conditions.push("service_name != ?");
            values.push(Value::Text(excluded.clone()));
        }
        if let Some(ptype) = &filter.prediction_type {
            conditions.push("prediction_type = ?");
            values.push(Value::Text(ptype.clone()));
        }
        match filter.resolved {
            Some(true) => conditions.push("actual_value IS NOT NULL"),
            Some(false) => conditions.push("actual_value IS NULL"),
            None => {}
        }
        if let Some(after) = &filter.created_after {
            conditions.push("created_at >= ?");
            values.push(Value::Text(after.to_rfc3339()));
        }
        if let Some(before) = &filter.created_before {
            conditions.push("created_at < ?");
            values.push(Value::Text(before.to_rfc3339()));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        (clause, values)
    }
}

#[async_trait]
impl PredictionStore for LibsqlStore {
    async fn insert_prediction(&self, prediction: &Prediction) -> Result<()> {
        debug!("Storing prediction: {}", prediction.id);

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO predictions (
                id, service_name, prediction_type, predicted_value, confidence,
                context, source, actual_value, error, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                prediction.id.to_string(),
                prediction.service_name.clone(),
                prediction.prediction_type.clone(),
                prediction.predicted_value,
                prediction.confidence,
                serde_json::to_string(&prediction.context)?,
                prediction.source.as_str(),
                prediction.actual_value,
                prediction.error,
                prediction.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| OuroborosError::Database(format!("Failed to insert prediction: {}", e)))?;

        Ok(())
    }

    async fn get_prediction(&self, id: PredictionId) -> Result<Prediction> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, service_name, prediction_type, predicted_value, confidence,
                        context, source, actual_value, error, created_at
                 FROM predictions WHERE id = ?",
                params![id.to_string()],
            )
            .await
            .map_err(|e| OuroborosError::Database(format!("Query failed: {}", e)))?;

        let row = rows
            .next()
            .await
            .map_err(|e| OuroborosError::Database(format!("Row fetch failed: {}", e)))?
            .ok_or_else(|| OuroborosError::PredictionNotFound(id.to_string()))?;

        Self::row_to_prediction(&row)
    }

    async fn query_predictions(&self, filter: &PredictionFilter) -> Result<Vec<Prediction>> {
        let conn = self.get_conn()?;
        let (clause, mut values) = Self::build_where(filter);

        let order = match filter.order {
            SortOrder::CreatedAsc => "ASC",
            SortOrder::CreatedDesc => "DESC",
        };
        let mut sql = format!(
            "SELECT id, service_name, prediction_type, predicted_value, confidence,
                    context, source, actual_value, error, created_at
             FROM predictions{} ORDER BY created_at {}",
            clause, order
        );
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit as i64));
        }

        let mut rows = conn
            .query(&sql, params_from_iter(values))
            .await
            .map_err(|e| OuroborosError::Database(format!("Query failed: {}", e)))?;

        let mut predictions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| OuroborosError::Database(format!("Row fetch failed: {}", e)))?
        {
            predictions.push(Self::row_to_prediction(&row)?);
        }

        Ok(predictions)
    }

    async fn count_predictions(&self, filter: &PredictionFilter) -> Result<usize> {
        let conn = self.get_conn()?;
        let (clause, values) = Self::build_where(filter);
        let sql = format!("SELECT COUNT(*) FROM predictions{}", clause);

        let mut rows = conn
            .query(&sql, params_from_iter(values))
            .await
            .map_err(|e| OuroborosError::Database(format!("Count failed: {}", e)))?;

        let row = rows
            .next()
            .await
            .map_err(|e| OuroborosError::Database(format!("Row fetch failed: {}", e)))?
            .ok_or_else(|| OuroborosError::Database("Count returned no rows".to_string()))?;

        let count: i64 = row.get(0)?;
        Ok(count as usize)
    }

    async fn resolve_prediction(
        &self,
        id: PredictionId,
        actual_value: f64,
        error: f64,
        context: &PredictionContext,
    ) -> Result<()> {
        debug!("Resolving prediction {} -> {:.3}", id, actual_value);

        let conn = self.get_conn()?;

        // Set-once guard: the update only lands while actual_value is null
        let changed = conn
            .execute(
                "UPDATE predictions
                 SET actual_value = ?, error = ?, context = ?
                 WHERE id = ? AND actual_value IS NULL",
                params![
                    actual_value,
                    error,
                    serde_json::to_string(context)?,
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| OuroborosError::Database(format!("Resolve failed: {}", e)))?;

        if changed == 1 {
            return Ok(());
        }

        // Nothing changed: distinguish already-resolved from missing
        let existing = self.get_prediction(id).await?;
        if existing.is_resolved() {
            Err(OuroborosError::Conflict(format!(
                "prediction {} already resolved to {:.3}",
                id,
                existing.actual_value.unwrap_or_default()
            )))
        } else {
            Err(OuroborosError::Database(format!(
                "resolve of {} changed no rows",
                id
            )))
        }
    }

    async fn insert_feedback(&self, event: &FeedbackEvent) -> Result<()> {
        debug!("Storing feedback {} for {}", event.id, event.prediction_id);

        let conn = self.get_conn()?;

        // Feedback must reference an existing prediction
        let mut rows = conn
            .query(
                "SELECT 1 FROM predictions WHERE id = ?",
                params![event.prediction_id.to_string()],
            )
            .await
            .map_err(|e| OuroborosError::Database(format!("Query failed: {}", e)))?;
        if rows
            .next()
            .await
            .map_err(|e| OuroborosError::Database(format!("Row fetch failed: {}", e)))?
            .is_none()
        {
            return Err(OuroborosError::Validation(format!(
                "feedback {} references missing prediction {}",
                event.id, event.prediction_id
            )));
        }

        conn.execute(
            r#"
            INSERT INTO feedback_events (
                id, prediction_id, service_name, feedback_type,
                feedback_score, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                event.id.to_string(),
                event.prediction_id.to_string(),
                event.service_name.clone(),
                event.feedback_type.as_str(),
                event.feedback_score,
                serde_json::to_string(&event.metadata)?,
                event.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| OuroborosError::Database(format!("Failed to insert feedback: {}", e)))?;

        Ok(())
    }

    async fn count_feedback(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM feedback_events", params![])
            .await
            .map_err(|e| OuroborosError::Database(format!("Count failed: {}", e)))?;

        let row = rows
            .next()
            .await
            .map_err(|e| OuroborosError::Database(format!("Row fetch failed: {}", e)))?
            .ok_or_else(|| OuroborosError::Database("Count returned no rows".to_string()))?;

        let count: i64 = row.get(0)?;
        Ok(count as usize)
    }
}
