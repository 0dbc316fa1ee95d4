//! libSQL backend: async `HistoryStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::pipeline::types::{Candidate, SourceKind};
use crate::store::migrations;
use crate::store::traits::{HistoryRecord, HistoryStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn source_to_str(source: SourceKind) -> &'static str {
    match source {
        SourceKind::Timeline => "timeline",
        SourceKind::Search => "search",
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
        None => libsql::Value::Null,
    }
}

/// Column order matches RECORD_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<HistoryRecord, libsql::Error> {
    let share_count: i64 = row.get(4)?;
    let posted_at: Option<String> = row.get::<String>(6).ok();
    let recorded_at: String = row.get(8)?;

    Ok(HistoryRecord {
        external_id: row.get(0)?,
        author_display_name: row.get(1)?,
        author_handle: row.get(2)?,
        body_text: row.get(3)?,
        share_count: share_count.max(0) as u64,
        origin_client: row.get(5)?,
        posted_at: posted_at.as_deref().map(parse_datetime),
        source: row.get(7)?,
        recorded_at: parse_datetime(&recorded_at),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const RECORD_COLUMNS: &str = "external_id, author_display_name, author_handle, body_text, share_count, origin_client, posted_at, source, recorded_at";

#[async_trait]
impl HistoryStore for LibSqlBackend {
    async fn exists(&self, external_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM reposts WHERE external_id = ?1 LIMIT 1",
                params![external_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("exists: {e}")))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("exists: {e}"))),
        }
    }

    async fn record_all(&self, candidates: &[Candidate]) -> Result<usize, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let mut written = 0usize;
        let mut last_error = None;

        for c in candidates {
            let result = conn
                .execute(
                    &format!(
                        "INSERT OR IGNORE INTO reposts ({RECORD_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                    ),
                    params![
                        c.external_id.clone(),
                        c.author_display_name.clone(),
                        c.author_handle.clone(),
                        c.body_text.clone(),
                        c.share_count.min(i64::MAX as u64) as i64,
                        c.origin_client.clone(),
                        opt_datetime(c.posted_at),
                        source_to_str(c.source),
                        now.clone(),
                    ],
                )
                .await;

            match result {
                Ok(affected) => {
                    if affected > 0 {
                        written += 1;
                        debug!(external_id = %c.external_id, "Recorded repost");
                    }
                }
                Err(e) => {
                    warn!(external_id = %c.external_id, error = %e, "Failed to record repost");
                    last_error = Some(e);
                }
            }
        }

        // Only escalate when nothing could be written at all.
        match last_error {
            Some(e) if written == 0 => Err(DatabaseError::Query(format!("record_all: {e}"))),
            _ => Ok(written),
        }
    }

    async fn count(&self) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM reposts", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count: {e}"))),
        }
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM reposts ORDER BY recorded_at DESC, rowid DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent: {e}")))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_record(&row) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping repost row: {e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(read = records.len(), error = %e, "Stopped reading repost rows");
                    break;
                }
            }
        }
        Ok(records)
    }
}
