//! Action dispatcher: re-publishes eligible candidates and records them.
//!
//! Every re-publish call in a batch is started at once and joined before
//! the history write. Individual failures are logged and counted; they
//! never stop the rest of the batch or the history write.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::pipeline::types::{Candidate, DispatchReport};
use crate::platform::SocialPlatform;
use crate::store::HistoryStore;

/// The account the curator acts as, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActingAccount {
    pub id: String,
}

impl ActingAccount {
    pub async fn resolve(platform: &dyn SocialPlatform) -> Result<Self, PipelineError> {
        let id = platform
            .resolve_acting_account_id()
            .await
            .map_err(PipelineError::Identity)?;
        info!(account_id = %id, "Resolved acting account");
        Ok(Self { id })
    }
}

pub struct ActionDispatcher {
    platform: Arc<dyn SocialPlatform>,
    history: Arc<dyn HistoryStore>,
}

impl ActionDispatcher {
    pub fn new(platform: Arc<dyn SocialPlatform>, history: Arc<dyn HistoryStore>) -> Self {
        Self { platform, history }
    }

    /// Re-publish every candidate, then record the whole batch.
    pub async fn dispatch(&self, account: &ActingAccount, candidates: &[Candidate]) -> DispatchReport {
        let mut report = DispatchReport {
            attempted: candidates.len(),
            ..DispatchReport::default()
        };
        if candidates.is_empty() {
            return report;
        }

        let outcomes = join_all(candidates.iter().map(|c| async move {
            let result = self.platform.republish(&account.id, &c.external_id).await;
            (c, result)
        }))
        .await;

        for (candidate, result) in outcomes {
            match result {
                Ok(()) => {
                    report.republished += 1;
                    info!(
                        external_id = %candidate.external_id,
                        share_count = candidate.share_count,
                        author = %candidate.author_handle,
                        "Re-published post"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        external_id = %candidate.external_id,
                        error = %e,
                        "Re-publish failed"
                    );
                }
            }
        }

        // Recorded regardless of individual outcomes.
        match self.history.record_all(candidates).await {
            Ok(written) => {
                report.recorded = written;
                if written < candidates.len() {
                    warn!(
                        written,
                        submitted = candidates.len(),
                        "Some candidates were not newly recorded"
                    );
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    submitted = candidates.len(),
                    "History write failed, batch may be re-published next run"
                );
            }
        }

        report
    }
}
