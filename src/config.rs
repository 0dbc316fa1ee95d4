//! Configuration types.
//!
//! Everything is read from environment variables. Parsing goes through a
//! lookup closure so tests can feed values without touching the process
//! environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::platform::SortOrder;

/// WOEID the trend scenario reads from when none is configured (Japan).
pub const DEFAULT_TREND_REGION: u64 = 23_424_856;

/// Longest accepted freshness window (one year).
pub const MAX_LOOKBACK_HOURS: u32 = 8_760;

const DEFAULT_API_BASE: &str = "https://api.twitter.com";

/// Selection thresholds and keyword lists.
#[derive(Debug, Clone)]
pub struct CuratorConfig {
    /// Posts older than this many hours are ignored.
    pub lookback_hours: u32,
    /// Minimum share count for re-publishing.
    pub min_shares: u64,
    /// How many home timeline entries to fetch per run.
    pub timeline_count: u32,
    /// Max results per search request.
    pub search_limit: u32,
    /// Search for recent posts or relevant posts.
    pub search_sort: SortOrder,
    /// Region (WOEID) trending terms are read from.
    pub trend_region: u64,
    /// Whether the timeline scenario considers re-share wrappers.
    pub include_reshares: bool,
    /// Posts whose body or client contains any of these are never re-published.
    pub exclusion_keywords: Vec<String>,
    /// Watchlist searched by the keyword scenario.
    pub search_keywords: Vec<String>,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            min_shares: 100,
            timeline_count: 200,
            search_limit: 100,
            search_sort: SortOrder::Relevancy,
            trend_region: DEFAULT_TREND_REGION,
            include_reshares: true,
            exclusion_keywords: Vec::new(),
            search_keywords: Vec::new(),
        }
    }
}

impl CuratorConfig {
    /// The freshness window as a chrono duration.
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.lookback_hours))
    }
}

/// Social platform API credentials and transport settings.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub api_base: String,
    /// OAuth2 user-context token (timeline, search, identity, re-publish).
    pub user_token: SecretString,
    /// App-only token (trends). Falls back to the user token.
    pub app_token: SecretString,
    pub request_timeout: Duration,
}

/// Trigger server, storage and log locations.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            db_path: PathBuf::from("./data/feed-curator.db"),
            log_dir: PathBuf::from("./logs"),
        }
    }
}

/// Optional cron expressions, one per scenario.
#[derive(Debug, Clone, Default)]
pub struct ScheduleConfig {
    pub timeline: Option<String>,
    pub trend: Option<String>,
    pub search: Option<String>,
}

impl ScheduleConfig {
    pub fn is_empty(&self) -> bool {
        self.timeline.is_none() && self.trend.is_none() && self.search.is_none()
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub curator: CuratorConfig,
    pub platform: PlatformConfig,
    pub server: ServerConfig,
    pub schedule: ScheduleConfig,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = CuratorConfig::default();

        let search_by_recency: bool = parse_or(&lookup, "CURATOR_SEARCH_BY_RECENCY", false)?;
        let search_limit: u32 = parse_or(&lookup, "CURATOR_SEARCH_LIMIT", defaults.search_limit)?;
        if !(10..=100).contains(&search_limit) {
            return Err(ConfigError::InvalidValue {
                key: "CURATOR_SEARCH_LIMIT".into(),
                message: format!("{search_limit} is outside 10..=100"),
            });
        }

        let lookback_hours: u32 =
            parse_or(&lookup, "CURATOR_LOOKBACK_HOURS", defaults.lookback_hours)?;
        if !(1..=MAX_LOOKBACK_HOURS).contains(&lookback_hours) {
            return Err(ConfigError::InvalidValue {
                key: "CURATOR_LOOKBACK_HOURS".into(),
                message: format!("{lookback_hours} is outside 1..={MAX_LOOKBACK_HOURS}"),
            });
        }

        let curator = CuratorConfig {
            lookback_hours,
            min_shares: parse_or(&lookup, "CURATOR_MIN_SHARES", defaults.min_shares)?,
            timeline_count: parse_or(&lookup, "CURATOR_TIMELINE_COUNT", defaults.timeline_count)?,
            search_limit,
            search_sort: if search_by_recency {
                SortOrder::Recency
            } else {
                SortOrder::Relevancy
            },
            trend_region: parse_or(&lookup, "CURATOR_TREND_REGION", defaults.trend_region)?,
            include_reshares: parse_or(
                &lookup,
                "CURATOR_INCLUDE_RESHARES",
                defaults.include_reshares,
            )?,
            exclusion_keywords: parse_list(&lookup, "CURATOR_NG_KEYWORDS"),
            search_keywords: parse_list(&lookup, "CURATOR_SEARCH_KEYWORDS"),
        };

        let user_token = lookup("TWITTER_USER_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("TWITTER_USER_TOKEN".into()))?;
        let app_token = lookup("TWITTER_APP_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| user_token.clone());

        let platform = PlatformConfig {
            api_base: lookup("TWITTER_API_BASE")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            user_token: SecretString::from(user_token),
            app_token: SecretString::from(app_token),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "TWITTER_REQUEST_TIMEOUT_SECS",
                30u64,
            )?),
        };

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            port: parse_or(&lookup, "CURATOR_PORT", server_defaults.port)?,
            db_path: lookup("CURATOR_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(server_defaults.db_path),
            log_dir: lookup("CURATOR_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(server_defaults.log_dir),
        };

        let schedule = ScheduleConfig {
            timeline: non_empty(&lookup, "CURATOR_SCHEDULE_TIMELINE"),
            trend: non_empty(&lookup, "CURATOR_SCHEDULE_TREND"),
            search: non_empty(&lookup, "CURATOR_SCHEDULE_SEARCH"),
        };

        Ok(Self {
            curator,
            platform,
            server,
            schedule,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

fn parse_list<F>(lookup: &F, key: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_only_token_set() {
        let config = AppConfig::from_lookup(lookup_from(&[("TWITTER_USER_TOKEN", "tok")])).unwrap();
        assert_eq!(config.curator.lookback_hours, 24);
        assert_eq!(config.curator.min_shares, 100);
        assert_eq!(config.curator.timeline_count, 200);
        assert_eq!(config.curator.search_sort, SortOrder::Relevancy);
        assert_eq!(config.curator.trend_region, DEFAULT_TREND_REGION);
        assert!(config.curator.include_reshares);
        assert!(config.curator.exclusion_keywords.is_empty());
        assert_eq!(config.platform.api_base, DEFAULT_API_BASE);
        assert_eq!(config.platform.app_token.expose_secret(), "tok");
        assert_eq!(config.server.port, 3000);
        assert!(config.schedule.is_empty());
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "TWITTER_USER_TOKEN"));
    }

    #[test]
    fn keyword_lists_are_trimmed() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("TWITTER_USER_TOKEN", "tok"),
            ("CURATOR_NG_KEYWORDS", " spam , ,giveaway,"),
            ("CURATOR_SEARCH_KEYWORDS", "rust,tokio"),
        ]))
        .unwrap();
        assert_eq!(config.curator.exclusion_keywords, vec!["spam", "giveaway"]);
        assert_eq!(config.curator.search_keywords, vec!["rust", "tokio"]);
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("TWITTER_USER_TOKEN", "tok"),
            ("CURATOR_MIN_SHARES", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CURATOR_MIN_SHARES"));
    }

    #[test]
    fn search_limit_out_of_range() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("TWITTER_USER_TOKEN", "tok"),
            ("CURATOR_SEARCH_LIMIT", "500"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn lookback_out_of_range() {
        for raw in ["0", "8761", "4000000000"] {
            let err = AppConfig::from_lookup(lookup_from(&[
                ("TWITTER_USER_TOKEN", "tok"),
                ("CURATOR_LOOKBACK_HOURS", raw),
            ]))
            .unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CURATOR_LOOKBACK_HOURS"),
                "{raw}"
            );
        }

        let config = AppConfig::from_lookup(lookup_from(&[
            ("TWITTER_USER_TOKEN", "tok"),
            ("CURATOR_LOOKBACK_HOURS", "8760"),
        ]))
        .unwrap();
        assert_eq!(config.curator.lookback_hours, MAX_LOOKBACK_HOURS);
    }

    #[test]
    fn recency_and_schedules() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("TWITTER_USER_TOKEN", "tok"),
            ("TWITTER_APP_TOKEN", "app"),
            ("TWITTER_API_BASE", "http://localhost:9000/"),
            ("CURATOR_SEARCH_BY_RECENCY", "true"),
            ("CURATOR_SCHEDULE_TREND", "0 0 * * * *"),
        ]))
        .unwrap();
        assert_eq!(config.curator.search_sort, SortOrder::Recency);
        assert_eq!(config.platform.app_token.expose_secret(), "app");
        assert_eq!(config.platform.api_base, "http://localhost:9000");
        assert_eq!(config.schedule.trend.as_deref(), Some("0 0 * * * *"));
        assert!(config.schedule.timeline.is_none());
        assert!(!config.schedule.is_empty());
    }

    #[test]
    fn lookback_duration() {
        let config = CuratorConfig {
            lookback_hours: 6,
            ..CuratorConfig::default()
        };
        assert_eq!(config.lookback(), chrono::Duration::hours(6));
    }
}
