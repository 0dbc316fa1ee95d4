//! Eligibility filter chain.
//!
//! Pure predicates run first and short-circuit on the first rejection:
//! - freshness window (unset `posted_at` fails closed)
//! - share-count threshold (strict or inclusive, per scenario)
//! - exclusion keywords in body text or client
//! - keyword relevance (keyword scenario only)
//!
//! The history lookup is the only predicate doing I/O. It runs last and
//! always gates admission.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::CuratorConfig;
use crate::pipeline::types::{Candidate, ScenarioPolicy, ThresholdMode};
use crate::store::HistoryStore;

/// Which candidate field an exclusion keyword matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateField {
    Body,
    Client,
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    AlreadyRecorded,
    Undated,
    Stale { posted_at: DateTime<Utc> },
    BelowThreshold { share_count: u64, minimum: u64 },
    ExcludedTerm { term: String, field: CandidateField },
    KeywordNotInBody { keyword: String },
}

impl Rejection {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AlreadyRecorded => "already_recorded",
            Self::Undated => "undated",
            Self::Stale { .. } => "stale",
            Self::BelowThreshold { .. } => "below_threshold",
            Self::ExcludedTerm { .. } => "excluded_term",
            Self::KeywordNotInBody { .. } => "keyword_not_in_body",
        }
    }
}

/// The configured predicates.
#[derive(Debug, Clone)]
pub struct EligibilityRules {
    lookback: chrono::Duration,
    min_shares: u64,
    exclusion_keywords: Vec<String>,
}

impl EligibilityRules {
    pub fn new(lookback: chrono::Duration, min_shares: u64, exclusion_keywords: Vec<String>) -> Self {
        Self {
            lookback,
            min_shares,
            exclusion_keywords,
        }
    }

    pub fn from_config(config: &CuratorConfig) -> Self {
        Self::new(
            config.lookback(),
            config.min_shares,
            config.exclusion_keywords.clone(),
        )
    }

    /// Oldest accepted `posted_at`. Saturates at the earliest representable
    /// time instead of overflowing.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn check_freshness(
        &self,
        candidate: &Candidate,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let posted_at = candidate.posted_at.ok_or(Rejection::Undated)?;
        if posted_at < self.window_start(now) {
            return Err(Rejection::Stale { posted_at });
        }
        Ok(())
    }

    pub fn check_threshold(
        &self,
        candidate: &Candidate,
        mode: ThresholdMode,
    ) -> Result<(), Rejection> {
        if mode.admits(candidate.share_count, self.min_shares) {
            Ok(())
        } else {
            Err(Rejection::BelowThreshold {
                share_count: candidate.share_count,
                minimum: self.min_shares,
            })
        }
    }

    pub fn check_exclusions(&self, candidate: &Candidate) -> Result<(), Rejection> {
        for term in &self.exclusion_keywords {
            if candidate.body_text.contains(term.as_str()) {
                return Err(Rejection::ExcludedTerm {
                    term: term.clone(),
                    field: CandidateField::Body,
                });
            }
            if candidate.origin_client.contains(term.as_str()) {
                return Err(Rejection::ExcludedTerm {
                    term: term.clone(),
                    field: CandidateField::Client,
                });
            }
        }
        Ok(())
    }

    pub fn check_relevance(candidate: &Candidate, keyword: &str) -> Result<(), Rejection> {
        if candidate.body_text.contains(keyword) {
            Ok(())
        } else {
            Err(Rejection::KeywordNotInBody {
                keyword: keyword.to_string(),
            })
        }
    }

    /// Run the pure predicates for a scenario.
    ///
    /// `keyword` is the search term the candidate was fetched with; it is
    /// only consulted when the policy requires body relevance.
    pub fn evaluate(
        &self,
        candidate: &Candidate,
        policy: &ScenarioPolicy,
        keyword: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        self.check_freshness(candidate, now)?;
        self.check_threshold(candidate, policy.threshold)?;
        self.check_exclusions(candidate)?;
        if policy.require_keyword_in_body
            && let Some(keyword) = keyword
        {
            Self::check_relevance(candidate, keyword)?;
        }
        Ok(())
    }

    /// Full chain, history included.
    pub async fn check(
        &self,
        candidate: &Candidate,
        policy: &ScenarioPolicy,
        keyword: Option<&str>,
        history: &dyn HistoryStore,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        self.evaluate(candidate, policy, keyword, now)?;

        match history.exists(&candidate.external_id).await {
            Ok(true) => Err(Rejection::AlreadyRecorded),
            Ok(false) => Ok(()),
            Err(e) => {
                // Lookup failure counts as "not recorded"; the platform
                // tolerates a repeated re-publish.
                warn!(
                    external_id = %candidate.external_id,
                    error = %e,
                    "History lookup failed, treating candidate as new"
                );
                Ok(())
            }
        }
    }

    pub async fn is_eligible(
        &self,
        candidate: &Candidate,
        policy: &ScenarioPolicy,
        keyword: Option<&str>,
        history: &dyn HistoryStore,
        now: DateTime<Utc>,
    ) -> bool {
        self.check(candidate, policy, keyword, history, now)
            .await
            .is_ok()
    }

    /// Keep only the eligible candidates, in order.
    pub async fn select(
        &self,
        candidates: Vec<Candidate>,
        policy: &ScenarioPolicy,
        keyword: Option<&str>,
        history: &dyn HistoryStore,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let mut eligible = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.check(&candidate, policy, keyword, history, now).await {
                Ok(()) => eligible.push(candidate),
                Err(rejection) => {
                    debug!(
                        scenario = %policy.kind,
                        external_id = %candidate.external_id,
                        share_count = candidate.share_count,
                        reason = rejection.label(),
                        "Candidate rejected"
                    );
                }
            }
        }
        eligible
    }
}
