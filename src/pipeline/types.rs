//! Shared types for the selection pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Candidate ───────────────────────────────────────────────────────

/// Where a raw payload came from. Decides how it is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Timeline,
    Search,
}

/// A post under consideration for re-publishing.
///
/// Produced only by the normalizer, so `external_id` is always the
/// original post's ID and never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// ID of the original post. Re-shares collapse onto it.
    pub external_id: String,
    pub author_display_name: String,
    pub author_handle: String,
    pub body_text: String,
    /// Share count observed at fetch time.
    pub share_count: u64,
    /// Client/app the post was made with.
    pub origin_client: String,
    /// `None` until known. Search candidates get it from enrichment.
    pub posted_at: Option<DateTime<Utc>>,
    /// The timeline entry was a re-share wrapper around the original.
    pub via_reshare: bool,
    /// The acting account already re-shared this timeline entry.
    pub reshared_by_actor: bool,
    pub source: SourceKind,
}

// ── Scenarios ───────────────────────────────────────────────────────

/// The three pipeline entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Timeline,
    Trend,
    Keyword,
}

impl ScenarioKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeline => "timeline",
            Self::Trend => "trend",
            Self::Keyword => "keyword",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the share count is compared with the configured minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// `share_count > minimum`
    Strict,
    /// `share_count >= minimum`
    Inclusive,
}

impl ThresholdMode {
    pub fn admits(&self, share_count: u64, minimum: u64) -> bool {
        match self {
            Self::Strict => share_count > minimum,
            Self::Inclusive => share_count >= minimum,
        }
    }
}

/// Per-scenario switches for the shared pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioPolicy {
    pub kind: ScenarioKind,
    /// Keep timeline entries that are re-share wrappers.
    pub include_reshares: bool,
    pub threshold: ThresholdMode,
    /// Require the search keyword in the body text.
    pub require_keyword_in_body: bool,
}

impl ScenarioPolicy {
    pub fn timeline(include_reshares: bool) -> Self {
        Self {
            kind: ScenarioKind::Timeline,
            include_reshares,
            threshold: ThresholdMode::Strict,
            require_keyword_in_body: false,
        }
    }

    pub fn trend() -> Self {
        Self {
            kind: ScenarioKind::Trend,
            include_reshares: true,
            threshold: ThresholdMode::Inclusive,
            require_keyword_in_body: false,
        }
    }

    pub fn keyword() -> Self {
        Self {
            kind: ScenarioKind::Keyword,
            include_reshares: true,
            threshold: ThresholdMode::Inclusive,
            require_keyword_in_body: true,
        }
    }
}

// ── Reports ─────────────────────────────────────────────────────────

/// Outcome of dispatching one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub republished: usize,
    pub failed: usize,
    pub recorded: usize,
}

/// Counters for one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scenario: ScenarioKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Search terms that were actually queried (trend and keyword runs).
    pub terms: Vec<String>,
    pub fetched: usize,
    pub normalized: usize,
    pub eligible: usize,
    pub republished: usize,
    pub failed: usize,
    pub recorded: usize,
}

impl RunReport {
    pub fn start(scenario: ScenarioKind, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scenario,
            started_at,
            finished_at: None,
            terms: Vec::new(),
            fetched: 0,
            normalized: 0,
            eligible: 0,
            republished: 0,
            failed: 0,
            recorded: 0,
        }
    }

    pub fn absorb(&mut self, dispatch: DispatchReport) {
        self.republished += dispatch.republished;
        self.failed += dispatch.failed;
        self.recorded += dispatch.recorded;
    }
}
