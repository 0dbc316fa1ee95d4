//! Selection pipeline: one parameterized flow for all three scenarios.
//!
//! Flow per batch:
//! 1. Fetch from the platform (a failure degrades to an empty batch)
//! 2. Normalize each payload, dropping the ones that fail
//! 3. Dedupe on `external_id`
//! 4. Enrich `posted_at` for search-sourced candidates
//! 5. Filter through the eligibility rules, history last
//! 6. Dispatch and record
//!
//! A run never aborts. Every failure is logged and isolated to the step or
//! item that produced it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::config::CuratorConfig;
use crate::pipeline::dedupe::dedupe;
use crate::pipeline::dispatcher::{ActingAccount, ActionDispatcher};
use crate::pipeline::normalizer::normalize_batch;
use crate::pipeline::rules::EligibilityRules;
use crate::pipeline::types::{Candidate, RunReport, ScenarioKind, ScenarioPolicy, SourceKind};
use crate::platform::{SearchQuery, SocialPlatform};
use crate::store::HistoryStore;

/// Source of "now" for a run.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Per-run state. Nothing here outlives a single run.
struct RunState {
    now: DateTime<Utc>,
    account: OnceCell<Option<ActingAccount>>,
    report: RunReport,
}

pub struct SelectionPipeline {
    config: CuratorConfig,
    platform: Arc<dyn SocialPlatform>,
    history: Arc<dyn HistoryStore>,
    dispatcher: ActionDispatcher,
    rules: EligibilityRules,
    clock: Clock,
}

impl SelectionPipeline {
    pub fn new(
        config: CuratorConfig,
        platform: Arc<dyn SocialPlatform>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let dispatcher = ActionDispatcher::new(Arc::clone(&platform), Arc::clone(&history));
        let rules = EligibilityRules::from_config(&config);
        Self {
            config,
            platform,
            history,
            dispatcher,
            rules,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock (tests pin "now").
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run one scenario to completion.
    pub async fn run(&self, scenario: ScenarioKind) -> RunReport {
        match scenario {
            ScenarioKind::Timeline => self.run_timeline().await,
            ScenarioKind::Trend => self.run_trends().await,
            ScenarioKind::Keyword => self.run_keywords().await,
        }
    }

    /// Re-publish popular posts straight off the home timeline.
    pub async fn run_timeline(&self) -> RunReport {
        let mut state = self.begin(ScenarioKind::Timeline);
        let policy = ScenarioPolicy::timeline(self.config.include_reshares);

        let payloads = match self.platform.fetch_home_timeline(self.config.timeline_count).await {
            Ok(p) => p,
            Err(e) => {
                error!(scenario = %policy.kind, error = %e, "Timeline fetch failed");
                Vec::new()
            }
        };
        state.report.fetched = payloads.len();

        let candidates: Vec<Candidate> = normalize_batch(&payloads, SourceKind::Timeline)
            .into_iter()
            .filter(|c| !c.reshared_by_actor)
            .filter(|c| policy.include_reshares || !c.via_reshare)
            .collect();
        state.report.normalized = candidates.len();

        let candidates = dedupe(candidates);
        self.select_and_dispatch(&mut state, &policy, None, candidates)
            .await;

        self.finish(state)
    }

    /// Search trending terms that also show up on the home timeline.
    pub async fn run_trends(&self) -> RunReport {
        let mut state = self.begin(ScenarioKind::Trend);
        let policy = ScenarioPolicy::trend();

        let terms = self.relevant_trend_terms().await;
        for term in terms {
            debug!(scenario = %policy.kind, term = %term, "Searching trending term");
            self.run_search_term(&mut state, &policy, &term).await;
        }

        self.finish(state)
    }

    /// Search every keyword on the watchlist.
    pub async fn run_keywords(&self) -> RunReport {
        let mut state = self.begin(ScenarioKind::Keyword);
        let policy = ScenarioPolicy::keyword();

        for keyword in &self.config.search_keywords {
            self.run_search_term(&mut state, &policy, keyword).await;
        }

        self.finish(state)
    }

    /// Trending terms for the configured region that literally appear in
    /// the body of a non-reshared home timeline entry.
    pub async fn relevant_trend_terms(&self) -> Vec<String> {
        let terms = match self
            .platform
            .fetch_trending_terms(self.config.trend_region)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                error!(region = self.config.trend_region, error = %e, "Trend fetch failed");
                return Vec::new();
            }
        };
        if terms.is_empty() {
            return terms;
        }

        let timeline = match self.platform.fetch_home_timeline(self.config.timeline_count).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Timeline fetch for trend matching failed");
                return Vec::new();
            }
        };
        let bodies: Vec<&str> = timeline.iter().filter_map(own_timeline_body).collect();

        let mut seen = HashSet::new();
        let relevant: Vec<String> = terms
            .into_iter()
            .filter(|t| !t.is_empty() && bodies.iter().any(|b| b.contains(t.as_str())))
            .filter(|t| seen.insert(t.clone()))
            .collect();

        info!(
            region = self.config.trend_region,
            count = relevant.len(),
            terms = ?relevant,
            "Trending terms found on timeline"
        );
        relevant
    }

    /// Search → normalize → dedupe → enrich → filter → dispatch for one term.
    async fn run_search_term(&self, state: &mut RunState, policy: &ScenarioPolicy, term: &str) {
        state.report.terms.push(term.to_string());

        let query = SearchQuery {
            term: term.to_string(),
            since: self.rules.window_start(state.now),
            sort: self.config.search_sort,
            limit: self.config.search_limit,
        };
        let payloads = match self.platform.search(&query).await {
            Ok(p) => p,
            Err(e) => {
                error!(scenario = %policy.kind, term, error = %e, "Search failed");
                return;
            }
        };
        state.report.fetched += payloads.len();

        let candidates = normalize_batch(&payloads, SourceKind::Search);
        state.report.normalized += candidates.len();

        let mut candidates = dedupe(candidates);
        self.enrich_posted_at(&mut candidates).await;

        let dispatched = self
            .select_and_dispatch(state, policy, Some(term), candidates)
            .await;
        if dispatched > 0 {
            info!(scenario = %policy.kind, term, count = dispatched, "Dispatched candidates for term");
        }
    }

    /// Back-fill missing `posted_at` values with one batched lookup.
    pub async fn enrich_posted_at(&self, candidates: &mut [Candidate]) {
        let ids: Vec<String> = candidates
            .iter()
            .filter(|c| c.posted_at.is_none())
            .map(|c| c.external_id.clone())
            .collect();
        if ids.is_empty() {
            return;
        }

        let found: HashMap<String, DateTime<Utc>> = match self.platform.fetch_posts_by_ids(&ids).await {
            Ok(rows) => rows
                .into_iter()
                .map(|row| (row.external_id, row.posted_at))
                .collect(),
            Err(e) => {
                warn!(count = ids.len(), error = %e, "posted_at enrichment failed");
                return;
            }
        };

        for candidate in candidates.iter_mut().filter(|c| c.posted_at.is_none()) {
            candidate.posted_at = found.get(&candidate.external_id).copied();
        }
        debug!(requested = ids.len(), found = found.len(), "Enriched posted_at");
    }

    /// Filter a deduped batch and dispatch what survives. Returns how many
    /// candidates were dispatched.
    ///
    /// If the acting account cannot be resolved the batch is neither
    /// re-published nor recorded, so the next run finds it again.
    async fn select_and_dispatch(
        &self,
        state: &mut RunState,
        policy: &ScenarioPolicy,
        keyword: Option<&str>,
        candidates: Vec<Candidate>,
    ) -> usize {
        let eligible = self
            .rules
            .select(candidates, policy, keyword, self.history.as_ref(), state.now)
            .await;
        state.report.eligible += eligible.len();
        if eligible.is_empty() {
            return 0;
        }

        let account = state
            .account
            .get_or_init(|| async {
                match ActingAccount::resolve(self.platform.as_ref()).await {
                    Ok(account) => Some(account),
                    Err(e) => {
                        error!(error = %e, "Skipping dispatch for this run");
                        None
                    }
                }
            })
            .await;
        let Some(account) = account else {
            return 0;
        };

        let dispatch = self.dispatcher.dispatch(account, &eligible).await;
        state.report.absorb(dispatch);
        eligible.len()
    }

    fn begin(&self, scenario: ScenarioKind) -> RunState {
        let now = (self.clock)();
        info!(scenario = %scenario, "Starting run");
        RunState {
            now,
            account: OnceCell::new(),
            report: RunReport::start(scenario, now),
        }
    }

    fn finish(&self, state: RunState) -> RunReport {
        let mut report = state.report;
        report.finished_at = Some(Utc::now());
        info!(
            run_id = %report.run_id,
            scenario = %report.scenario,
            fetched = report.fetched,
            normalized = report.normalized,
            eligible = report.eligible,
            republished = report.republished,
            failed = report.failed,
            recorded = report.recorded,
            "Run complete"
        );
        report
    }
}

/// Body text of a timeline payload that is not a re-share. Read straight
/// from the payload so entries that fail normalization still count.
fn own_timeline_body(payload: &Value) -> Option<&str> {
    if payload
        .get("retweeted_status")
        .is_some_and(|original| !original.is_null())
    {
        return None;
    }
    payload
        .get("full_text")
        .and_then(Value::as_str)
        .or_else(|| payload.get("text").and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::error::PlatformError;
    use crate::platform::PostTimestamp;
    use crate::store::LibSqlBackend;

    #[derive(Default)]
    struct StubPlatform {
        timeline: Vec<Value>,
        timeline_fails: bool,
        trends: Vec<String>,
        searches: HashMap<String, Vec<Value>>,
        posted: HashMap<String, DateTime<Utc>>,
        identity_fails: bool,
        identity_calls: AtomicUsize,
        queries: Mutex<Vec<SearchQuery>>,
        republished: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SocialPlatform for StubPlatform {
        async fn fetch_home_timeline(&self, _limit: u32) -> Result<Vec<Value>, PlatformError> {
            if self.timeline_fails {
                return Err(PlatformError::Network {
                    endpoint: "/1.1/statuses/home_timeline.json".into(),
                    reason: "connection reset".into(),
                });
            }
            Ok(self.timeline.clone())
        }

        async fn fetch_trending_terms(&self, _region: u64) -> Result<Vec<String>, PlatformError> {
            Ok(self.trends.clone())
        }

        async fn search(&self, query: &SearchQuery) -> Result<Vec<Value>, PlatformError> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(self.searches.get(&query.term).cloned().unwrap_or_default())
        }

        async fn resolve_acting_account_id(&self) -> Result<String, PlatformError> {
            self.identity_calls.fetch_add(1, Ordering::SeqCst);
            if self.identity_fails {
                return Err(PlatformError::AuthFailed {
                    endpoint: "/2/users/me".into(),
                });
            }
            Ok("me".into())
        }

        async fn republish(&self, _actor_id: &str, external_id: &str) -> Result<(), PlatformError> {
            self.republished.lock().unwrap().push(external_id.to_string());
            Ok(())
        }

        async fn fetch_posts_by_ids(
            &self,
            ids: &[String],
        ) -> Result<Vec<PostTimestamp>, PlatformError> {
            Ok(ids
                .iter()
                .filter_map(|id| {
                    self.posted.get(id).map(|posted_at| PostTimestamp {
                        external_id: id.clone(),
                        posted_at: *posted_at,
                    })
                })
                .collect())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    const FRESH: &str = "Sun Oct 18 10:00:00 +0000 2026";
    const STALE: &str = "Thu Oct 15 10:00:00 +0000 2026";

    fn status(id: &str, shares: u64, created_at: &str, text: &str) -> Value {
        json!({
            "id_str": id,
            "full_text": text,
            "retweet_count": shares,
            "source": "<a href=\"https://example.com\">Web App</a>",
            "created_at": created_at,
            "user": { "name": "Alice", "screen_name": "alice" },
        })
    }

    fn hit(id: &str, shares: u64, text: &str) -> Value {
        json!({
            "id": id,
            "text": text,
            "source": "Web App",
            "public_metrics": { "retweet_count": shares },
        })
    }

    async fn build(
        config: CuratorConfig,
        platform: Arc<StubPlatform>,
    ) -> (SelectionPipeline, Arc<LibSqlBackend>) {
        let history = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let pipeline = SelectionPipeline::new(config, platform, history.clone())
            .with_clock(Arc::new(now));
        (pipeline, history)
    }

    #[tokio::test]
    async fn timeline_republishes_popular_fresh_posts() {
        let platform = Arc::new(StubPlatform {
            timeline: vec![
                status("1", 50, FRESH, "quiet"),
                status("2", 150, FRESH, "busy"),
                status("3", 300, FRESH, "viral"),
            ],
            ..Default::default()
        });
        let (pipeline, history) = build(CuratorConfig::default(), platform.clone()).await;

        let report = pipeline.run(ScenarioKind::Timeline).await;

        assert_eq!(report.fetched, 3);
        assert_eq!(report.eligible, 2);
        assert_eq!(report.republished, 2);
        assert_eq!(report.recorded, 2);
        assert!(report.finished_at.is_some());
        assert_eq!(*platform.republished.lock().unwrap(), vec!["2", "3"]);
        assert!(history.exists("2").await.unwrap());
        assert!(!history.exists("1").await.unwrap());
    }

    #[tokio::test]
    async fn second_run_skips_recorded_posts() {
        let platform = Arc::new(StubPlatform {
            timeline: vec![status("2", 150, FRESH, "busy")],
            ..Default::default()
        });
        let (pipeline, _history) = build(CuratorConfig::default(), platform.clone()).await;

        assert_eq!(pipeline.run_timeline().await.republished, 1);
        let again = pipeline.run_timeline().await;
        assert_eq!(again.eligible, 0);
        assert_eq!(again.republished, 0);
        assert_eq!(platform.republished.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn timeline_threshold_is_strict_and_stale_posts_drop() {
        let platform = Arc::new(StubPlatform {
            timeline: vec![
                status("1", 100, FRESH, "exactly at the bar"),
                status("2", 500, STALE, "old news"),
                json!({ "id_str": "broken" }),
                status("3", 101, FRESH, "just over"),
            ],
            ..Default::default()
        });
        let (pipeline, _history) = build(CuratorConfig::default(), platform.clone()).await;

        let report = pipeline.run_timeline().await;
        assert_eq!(report.fetched, 4);
        assert_eq!(report.normalized, 3);
        assert_eq!(*platform.republished.lock().unwrap(), vec!["3"]);
    }

    #[tokio::test]
    async fn timeline_reshares_follow_config() {
        let mut reshare = status("10", 400, FRESH, "RT @bob: hello");
        reshare["retweeted_status"] = status("11", 0, FRESH, "hello");
        let mut mine = status("20", 400, FRESH, "already shared");
        mine["retweeted"] = json!(true);

        let platform = Arc::new(StubPlatform {
            timeline: vec![reshare.clone(), mine.clone()],
            ..Default::default()
        });
        let (pipeline, _history) = build(CuratorConfig::default(), platform.clone()).await;
        pipeline.run_timeline().await;
        // The original is re-published, never the wrapper.
        assert_eq!(*platform.republished.lock().unwrap(), vec!["11"]);

        let platform = Arc::new(StubPlatform {
            timeline: vec![reshare, mine],
            ..Default::default()
        });
        let config = CuratorConfig {
            include_reshares: false,
            ..CuratorConfig::default()
        };
        let (pipeline, _history) = build(config, platform.clone()).await;
        let report = pipeline.run_timeline().await;
        assert_eq!(report.normalized, 0);
        assert!(platform.republished.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeline_fetch_failure_is_an_empty_run() {
        let platform = Arc::new(StubPlatform {
            timeline_fails: true,
            ..Default::default()
        });
        let (pipeline, _history) = build(CuratorConfig::default(), platform.clone()).await;

        let report = pipeline.run_timeline().await;
        assert_eq!(report.fetched, 0);
        assert_eq!(report.republished, 0);
        assert_eq!(platform.identity_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identity_failure_skips_dispatch_and_recording() {
        let platform = Arc::new(StubPlatform {
            timeline: vec![status("2", 150, FRESH, "busy")],
            identity_fails: true,
            ..Default::default()
        });
        let (pipeline, history) = build(CuratorConfig::default(), platform.clone()).await;

        let report = pipeline.run_timeline().await;
        assert_eq!(report.eligible, 1);
        assert_eq!(report.republished, 0);
        assert_eq!(report.recorded, 0);
        assert!(!history.exists("2").await.unwrap());
    }

    #[tokio::test]
    async fn trend_terms_must_appear_on_timeline() {
        let mut reshare = status("10", 0, FRESH, "RT: rocket launch");
        reshare["retweeted_status"] = status("11", 0, FRESH, "rocket launch");
        let platform = Arc::new(StubPlatform {
            timeline: vec![
                status("1", 0, FRESH, "watching the #match tonight"),
                reshare,
                json!({ "id_str": "2", "text": "no author but #derby today" }),
            ],
            trends: vec![
                "#match".into(),
                "rocket".into(),
                "#match".into(),
                "#derby".into(),
                "unrelated".into(),
            ],
            ..Default::default()
        });
        let (pipeline, _history) = build(CuratorConfig::default(), platform).await;

        assert_eq!(
            pipeline.relevant_trend_terms().await,
            vec!["#match".to_string(), "#derby".to_string()]
        );
    }

    #[tokio::test]
    async fn trend_run_enriches_and_uses_inclusive_threshold() {
        let posted = HashMap::from([
            ("100".to_string(), now() - chrono::Duration::hours(1)),
            ("101".to_string(), now() - chrono::Duration::hours(1)),
            ("103".to_string(), now() - chrono::Duration::hours(48)),
        ]);
        let platform = Arc::new(StubPlatform {
            timeline: vec![status("1", 0, FRESH, "#match is on")],
            trends: vec!["#match".into()],
            searches: HashMap::from([(
                "#match".to_string(),
                vec![
                    hit("100", 100, "goal! #match"),
                    hit("101", 99, "#match"),
                    hit("102", 500, "no date for this one"),
                    hit("103", 900, "yesterday's #match"),
                    hit("100", 100, "goal! #match"),
                ],
            )]),
            posted,
            ..Default::default()
        });
        let (pipeline, _history) = build(CuratorConfig::default(), platform.clone()).await;

        let report = pipeline.run_trends().await;
        assert_eq!(report.terms, vec!["#match".to_string()]);
        assert_eq!(report.fetched, 5);
        assert_eq!(report.eligible, 1);
        assert_eq!(*platform.republished.lock().unwrap(), vec!["100"]);

        let queries = platform.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].since, now() - chrono::Duration::hours(24));
        assert_eq!(queries[0].limit, 100);
    }

    #[tokio::test]
    async fn keyword_run_requires_keyword_in_body() {
        let fresh = now() - chrono::Duration::hours(2);
        let mut quote = hit("200", 250, "quoting something");
        quote["referenced_tweets"] = json!([{ "id": "199", "type": "retweeted" }]);
        let platform = Arc::new(StubPlatform {
            searches: HashMap::from([(
                "rust".to_string(),
                vec![
                    hit("300", 250, "learning rust today"),
                    hit("301", 250, "matched on the author only"),
                    quote,
                ],
            )]),
            posted: HashMap::from([
                ("300".to_string(), fresh),
                ("301".to_string(), fresh),
                ("199".to_string(), fresh),
            ]),
            ..Default::default()
        });
        let config = CuratorConfig {
            search_keywords: vec!["rust".into(), "nothing-here".into()],
            ..CuratorConfig::default()
        };
        let (pipeline, history) = build(config, platform.clone()).await;

        let report = pipeline.run(ScenarioKind::Keyword).await;
        assert_eq!(report.terms, vec!["rust".to_string(), "nothing-here".to_string()]);
        assert_eq!(report.eligible, 1);
        assert_eq!(*platform.republished.lock().unwrap(), vec!["300"]);
        assert!(!history.exists("199").await.unwrap());
        assert_eq!(platform.identity_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_lookback_still_completes() {
        let platform = Arc::new(StubPlatform {
            timeline: vec![status("1", 500, FRESH, "popular")],
            ..Default::default()
        });
        let config = CuratorConfig {
            lookback_hours: u32::MAX,
            search_keywords: vec!["rust".into()],
            ..CuratorConfig::default()
        };
        let (pipeline, _history) = build(config, platform.clone()).await;

        assert_eq!(pipeline.run_timeline().await.republished, 1);
        pipeline.run_keywords().await;
        let queries = platform.queries.lock().unwrap();
        assert_eq!(queries[0].since, DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn account_resolved_once_per_run() {
        let fresh = now() - chrono::Duration::hours(2);
        let platform = Arc::new(StubPlatform {
            searches: HashMap::from([
                ("alpha".to_string(), vec![hit("1", 500, "alpha news")]),
                ("beta".to_string(), vec![hit("2", 500, "beta news")]),
            ]),
            posted: HashMap::from([("1".to_string(), fresh), ("2".to_string(), fresh)]),
            ..Default::default()
        });
        let config = CuratorConfig {
            search_keywords: vec!["alpha".into(), "beta".into()],
            ..CuratorConfig::default()
        };
        let (pipeline, _history) = build(config, platform.clone()).await;

        let report = pipeline.run_keywords().await;
        assert_eq!(report.republished, 2);
        assert_eq!(platform.identity_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exclusion_keywords_apply_to_body_and_client() {
        let mut bot = status("2", 500, FRESH, "fine text");
        bot["source"] = json!("SpamBot 3000");
        let platform = Arc::new(StubPlatform {
            timeline: vec![
                status("1", 500, FRESH, "buy now giveaway"),
                bot,
                status("3", 500, FRESH, "ok"),
            ],
            ..Default::default()
        });
        let config = CuratorConfig {
            exclusion_keywords: vec!["giveaway".into(), "SpamBot".into()],
            ..CuratorConfig::default()
        };
        let (pipeline, _history) = build(config, platform.clone()).await;

        pipeline.run_timeline().await;
        assert_eq!(*platform.republished.lock().unwrap(), vec!["3"]);
    }
}
