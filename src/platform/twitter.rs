//! Twitter/X API client.
//!
//! Timeline and trends use the v1.1 endpoints (their payloads carry the
//! embedded `retweeted_status` original); search, identity, re-publish and
//! lookup use v2. Authentication is bearer-token only.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use super::{PostTimestamp, SearchQuery, SocialPlatform};
use crate::config::PlatformConfig;
use crate::error::PlatformError;

/// The v2 lookup endpoint accepts at most this many IDs per request.
const LOOKUP_BATCH_SIZE: usize = 100;

const SEARCH_TWEET_FIELDS: &str = "public_metrics,referenced_tweets,created_at,source";

/// HTTP client for the Twitter/X API.
pub struct TwitterClient {
    client: reqwest::Client,
    api_base: String,
    user_token: SecretString,
    app_token: SecretString,
}

impl TwitterClient {
    pub fn new(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PlatformError::Network {
                endpoint: "client".into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            user_token: config.user_token.clone(),
            app_token: config.app_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    async fn get_json(
        &self,
        endpoint: &str,
        token: &SecretString,
        query: &[(&str, String)],
    ) -> Result<Value, PlatformError> {
        let resp = self
            .client
            .get(self.url(endpoint))
            .bearer_auth(token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| PlatformError::Network {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let resp = check_status(endpoint, resp).await?;
        resp.json::<Value>()
            .await
            .map_err(|e| PlatformError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Map non-success statuses onto the error taxonomy.
async fn check_status(
    endpoint: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, PlatformError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(PlatformError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after: retry_after(resp.headers(), Utc::now()),
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PlatformError::AuthFailed {
            endpoint: endpoint.to_string(),
        }),
        _ => {
            let message = resp.text().await.unwrap_or_default();
            Err(PlatformError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Read the rate-limit reset hint, either `retry-after` seconds or the
/// `x-rate-limit-reset` epoch timestamp.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
    };

    if let Some(secs) = header("retry-after") {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    header("x-rate-limit-reset").map(|reset| {
        let secs = (reset - now.timestamp()).max(0);
        Duration::from_secs(secs as u64)
    })
}

fn parse_timeline(endpoint: &str, body: Value) -> Result<Vec<Value>, PlatformError> {
    match body {
        Value::Array(entries) => Ok(entries),
        other => Err(PlatformError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: format!("expected an array, got {}", kind_of(&other)),
        }),
    }
}

fn parse_trends(endpoint: &str, body: &Value) -> Result<Vec<String>, PlatformError> {
    let trends = body
        .get(0)
        .and_then(|place| place.get("trends"))
        .and_then(Value::as_array)
        .ok_or_else(|| PlatformError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: "missing [0].trends".into(),
        })?;

    Ok(trends
        .iter()
        .filter_map(|t| t.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

/// v2 list responses omit `data` entirely when nothing matched.
fn parse_data_list(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn parse_lookup(items: &[Value]) -> Vec<PostTimestamp> {
    items
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(Value::as_str)?;
            let created = item.get("created_at").and_then(Value::as_str)?;
            match DateTime::parse_from_rfc3339(created) {
                Ok(dt) => Some(PostTimestamp {
                    external_id: id.to_string(),
                    posted_at: dt.with_timezone(&Utc),
                }),
                Err(e) => {
                    warn!(external_id = id, error = %e, "Unparseable created_at in lookup");
                    None
                }
            }
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl SocialPlatform for TwitterClient {
    async fn fetch_home_timeline(&self, limit: u32) -> Result<Vec<Value>, PlatformError> {
        let endpoint = "/1.1/statuses/home_timeline.json";
        let body = self
            .get_json(
                endpoint,
                &self.user_token,
                &[
                    ("count", limit.to_string()),
                    ("tweet_mode", "extended".to_string()),
                ],
            )
            .await?;
        let entries = parse_timeline(endpoint, body)?;
        debug!(count = entries.len(), "Fetched home timeline");
        Ok(entries)
    }

    async fn fetch_trending_terms(&self, region: u64) -> Result<Vec<String>, PlatformError> {
        let endpoint = "/1.1/trends/place.json";
        let body = self
            .get_json(endpoint, &self.app_token, &[("id", region.to_string())])
            .await?;
        let terms = parse_trends(endpoint, &body)?;
        debug!(region, count = terms.len(), "Fetched trending terms");
        Ok(terms)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Value>, PlatformError> {
        let endpoint = "/2/tweets/search/recent";
        let body = self
            .get_json(
                endpoint,
                &self.user_token,
                &[
                    ("query", query.term.clone()),
                    ("tweet.fields", SEARCH_TWEET_FIELDS.to_string()),
                    ("expansions", "referenced_tweets.id".to_string()),
                    (
                        "start_time",
                        query
                            .since
                            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    ),
                    ("sort_order", query.sort.as_str().to_string()),
                    ("max_results", query.limit.to_string()),
                ],
            )
            .await?;
        let hits = parse_data_list(body);
        debug!(term = %query.term, count = hits.len(), "Search complete");
        Ok(hits)
    }

    async fn resolve_acting_account_id(&self) -> Result<String, PlatformError> {
        let endpoint = "/2/users/me";
        let body = self.get_json(endpoint, &self.user_token, &[]).await?;
        body.pointer("/data/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PlatformError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: "missing data.id".into(),
            })
    }

    async fn republish(&self, actor_id: &str, external_id: &str) -> Result<(), PlatformError> {
        let endpoint = format!("/2/users/{actor_id}/retweets");
        let resp = self
            .client
            .post(self.url(&endpoint))
            .bearer_auth(self.user_token.expose_secret())
            .json(&serde_json::json!({ "tweet_id": external_id }))
            .send()
            .await
            .map_err(|e| PlatformError::Network {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        check_status(&endpoint, resp).await?;
        Ok(())
    }

    async fn fetch_posts_by_ids(&self, ids: &[String]) -> Result<Vec<PostTimestamp>, PlatformError> {
        let endpoint = "/2/tweets";
        let mut found = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(LOOKUP_BATCH_SIZE) {
            let body = self
                .get_json(
                    endpoint,
                    &self.user_token,
                    &[
                        ("ids", chunk.join(",")),
                        ("tweet.fields", "created_at".to_string()),
                    ],
                )
                .await?;
            found.extend(parse_lookup(&parse_data_list(body)));
        }
        debug!(requested = ids.len(), found = found.len(), "Looked up post timestamps");
        Ok(found)
    }
}
