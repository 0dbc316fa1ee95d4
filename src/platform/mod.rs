//! Social platform seam.
//!
//! The pipeline only ever talks to the platform through [`SocialPlatform`].
//! Payloads come back as raw JSON so that a single malformed entry can be
//! dropped by the normalizer without losing the rest of the batch.

pub mod twitter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

pub use twitter::TwitterClient;

/// Search result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Recency,
    Relevancy,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recency => "recency",
            Self::Relevancy => "relevancy",
        }
    }
}

/// Parameters for a keyword search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub term: String,
    /// Only posts newer than this are returned.
    pub since: DateTime<Utc>,
    pub sort: SortOrder,
    pub limit: u32,
}

/// Posting time of a post, returned by the enrichment lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostTimestamp {
    pub external_id: String,
    pub posted_at: DateTime<Utc>,
}

/// Operations the pipeline needs from the social platform.
#[async_trait]
pub trait SocialPlatform: Send + Sync {
    /// Most recent entries of the acting account's home timeline.
    async fn fetch_home_timeline(
        &self,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, PlatformError>;

    /// Names of the currently trending terms in a region.
    async fn fetch_trending_terms(&self, region: u64) -> Result<Vec<String>, PlatformError>;

    /// Run a keyword search.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<serde_json::Value>, PlatformError>;

    /// The platform ID of the account the curator acts as.
    async fn resolve_acting_account_id(&self) -> Result<String, PlatformError>;

    /// Re-publish a post as the acting account.
    async fn republish(&self, actor_id: &str, external_id: &str) -> Result<(), PlatformError>;

    /// Look up posting times for a set of post IDs. Unknown IDs are omitted.
    async fn fetch_posts_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<PostTimestamp>, PlatformError>;
}
