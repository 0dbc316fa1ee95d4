//! History store trait: the only persistence the pipeline needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;
use crate::pipeline::types::Candidate;

/// A post the curator has already acted upon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub external_id: String,
    pub author_display_name: String,
    pub author_handle: String,
    pub body_text: String,
    pub share_count: u64,
    pub origin_client: String,
    pub posted_at: Option<DateTime<Utc>>,
    /// `timeline` or `search`.
    pub source: String,
    pub recorded_at: DateTime<Utc>,
}

/// Existence check and bulk insert keyed by `external_id`.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Whether `external_id` has already been recorded.
    async fn exists(&self, external_id: &str) -> Result<bool, DatabaseError>;

    /// Record every candidate. Already-present IDs are ignored, and a row
    /// that fails to insert does not stop the rest. Returns the number of
    /// rows newly written.
    async fn record_all(&self, candidates: &[Candidate]) -> Result<usize, DatabaseError>;

    /// Number of recorded posts.
    async fn count(&self) -> Result<u64, DatabaseError>;

    /// Most recently recorded posts, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, DatabaseError>;
}
