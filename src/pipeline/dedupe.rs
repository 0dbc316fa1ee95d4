//! Batch deduplication on `external_id`.

use std::collections::HashSet;

use crate::pipeline::types::Candidate;

/// Drop candidates whose `external_id` was already seen in this batch.
/// The first occurrence wins and order is preserved.
pub fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.external_id.clone()))
        .collect()
}
