//! Candidate selection pipeline.
//!
//! Every scenario flows through the same stages:
//! 1. `normalizer`: raw platform payloads into `Candidate`s
//! 2. `dedupe`: first occurrence of each `external_id` wins
//! 3. `rules`: freshness, threshold, exclusions, relevance, then history
//! 4. `dispatcher`: re-publish as the acting account, then record
//!
//! `processor::SelectionPipeline` wires the stages per scenario.
//!
//! **A run never fails as a whole.** Fetch, normalize, re-publish and
//! history errors are logged and isolated to what produced them.

pub mod dedupe;
pub mod dispatcher;
pub mod normalizer;
pub mod processor;
pub mod rules;
pub mod types;
