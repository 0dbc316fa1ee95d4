//! Candidate normalizer: raw platform payloads into [`Candidate`]s.
//!
//! Every payload is decoded on its own, so one malformed entry is logged
//! and dropped without affecting its siblings.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::pipeline::types::{Candidate, SourceKind};

/// v1.1 `created_at` format, e.g. `Wed Oct 10 20:19:24 +0000 2018`.
const TIMELINE_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

// ── Payload shapes ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TimelineUser {
    name: String,
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct TimelineStatus {
    id_str: String,
    full_text: Option<String>,
    text: Option<String>,
    retweet_count: u64,
    source: Option<String>,
    created_at: String,
    user: TimelineUser,
    #[serde(default)]
    retweeted: bool,
    retweeted_status: Option<Box<TimelineStatus>>,
}

impl TimelineStatus {
    fn body(&self) -> String {
        self.full_text
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct PublicMetrics {
    retweet_count: u64,
}

#[derive(Debug, Deserialize)]
struct ReferencedPost {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    text: String,
    source: Option<String>,
    public_metrics: PublicMetrics,
    #[serde(default)]
    referenced_tweets: Vec<ReferencedPost>,
}

// ── Normalization ───────────────────────────────────────────────────

/// Normalize one payload, logging and discarding it on failure.
pub fn normalize(payload: &Value, kind: SourceKind) -> Option<Candidate> {
    match try_normalize(payload, kind) {
        Ok(candidate) => Some(candidate),
        Err(e) => {
            warn!(
                source = ?kind,
                payload_id = payload_id(payload).unwrap_or("<unknown>"),
                error = %e,
                "Dropping payload that failed normalization"
            );
            None
        }
    }
}

/// Normalize a whole fetch batch, keeping fetch order.
pub fn normalize_batch(payloads: &[Value], kind: SourceKind) -> Vec<Candidate> {
    let candidates: Vec<Candidate> = payloads
        .iter()
        .filter_map(|p| normalize(p, kind))
        .collect();
    debug!(
        source = ?kind,
        fetched = payloads.len(),
        normalized = candidates.len(),
        "Normalized batch"
    );
    candidates
}

/// Normalize one payload, returning why it was rejected.
pub fn try_normalize(payload: &Value, kind: SourceKind) -> Result<Candidate, PipelineError> {
    let candidate = match kind {
        SourceKind::Timeline => from_timeline(payload)?,
        SourceKind::Search => from_search(payload)?,
    };

    if candidate.external_id.trim().is_empty() {
        return Err(PipelineError::Normalize("empty post id".into()));
    }
    Ok(candidate)
}

fn from_timeline(payload: &Value) -> Result<Candidate, PipelineError> {
    let wrapper = TimelineStatus::deserialize(payload)
        .map_err(|e| PipelineError::Normalize(format!("timeline entry: {e}")))?;

    // A re-share takes everything from the embedded original except the
    // share count, which belongs to the re-share observed on the timeline.
    let original = wrapper.retweeted_status.as_deref().unwrap_or(&wrapper);

    Ok(Candidate {
        external_id: original.id_str.clone(),
        author_display_name: original.user.name.clone(),
        author_handle: original.user.screen_name.clone(),
        body_text: original.body(),
        share_count: wrapper.retweet_count,
        origin_client: original.source.clone().unwrap_or_default(),
        posted_at: parse_timeline_date(&original.created_at),
        via_reshare: wrapper.retweeted_status.is_some(),
        reshared_by_actor: wrapper.retweeted,
        source: SourceKind::Timeline,
    })
}

fn from_search(payload: &Value) -> Result<Candidate, PipelineError> {
    let hit = SearchHit::deserialize(payload)
        .map_err(|e| PipelineError::Normalize(format!("search hit: {e}")))?;

    let external_id = hit
        .referenced_tweets
        .first()
        .map(|r| r.id.clone())
        .unwrap_or(hit.id);

    Ok(Candidate {
        external_id,
        author_display_name: String::new(),
        author_handle: String::new(),
        body_text: hit.text,
        share_count: hit.public_metrics.retweet_count,
        origin_client: hit.source.unwrap_or_default(),
        posted_at: None,
        via_reshare: false,
        reshared_by_actor: false,
        source: SourceKind::Search,
    })
}

fn parse_timeline_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, TIMELINE_DATE_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| warn!(created_at = raw, error = %e, "Unparseable timeline date"))
        .ok()
}

fn payload_id(payload: &Value) -> Option<&str> {
    payload
        .get("id_str")
        .or_else(|| payload.get("id"))
        .and_then(Value::as_str)
}
