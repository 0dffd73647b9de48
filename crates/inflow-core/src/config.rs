//! Environment-driven configuration.
//!
//! All options the connector recognizes are collected into [`Config`].
//! `from_env()` never fails (missing values become `None` or defaults),
//! and `validate()` reports every problem at once so startup fails fast
//! with a complete diagnostic.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::defaults;
use crate::error::{Error, Result};

/// Teamwork connection settings.
#[derive(Debug, Clone, Default)]
pub struct TeamworkConfig {
    /// Tenant-specific base URL, e.g. `https://acme.teamwork.com`.
    pub base_url: Option<String>,
    /// API key, sent as the basic-auth username.
    pub api_key: Option<String>,
    pub webhook_secret: Option<String>,
    /// Entities created before this instant are acknowledged but not stored.
    pub process_after: Option<DateTime<Utc>>,
    pub include_completed_on_initial_sync: bool,
}

/// Missive connection settings.
#[derive(Debug, Clone, Default)]
pub struct MissiveConfig {
    pub api_token: Option<String>,
    pub webhook_secret: Option<String>,
    pub process_after: Option<DateTime<Utc>>,
}

/// Craft connection settings. The source is enabled iff a base URL is set.
#[derive(Debug, Clone, Default)]
pub struct CraftConfig {
    pub base_url: Option<String>,
}

/// Complete connector configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_port: u16,
    /// Postgres connection string.
    pub db_dsn: Option<String>,
    pub teamwork: TeamworkConfig,
    pub missive: MissiveConfig,
    pub craft: CraftConfig,
    /// Skip webhook registration and rely on short-interval polling.
    pub disable_webhooks: bool,
    /// Externally reachable base URL for webhook targets, when known.
    pub public_url: Option<String>,
    pub backfill_interval_secs: u64,
    pub backfill_overlap_secs: i64,
    pub max_queue_attempts: i32,
    pub spool_retry_secs: u64,
    /// Display timezone. Storage stays UTC regardless.
    pub timezone: String,
    /// Directory for identity snapshots.
    pub data_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_port: defaults::APP_PORT,
            db_dsn: None,
            teamwork: TeamworkConfig {
                include_completed_on_initial_sync: true,
                ..Default::default()
            },
            missive: MissiveConfig::default(),
            craft: CraftConfig::default(),
            disable_webhooks: false,
            public_url: None,
            backfill_interval_secs: defaults::BACKFILL_INTERVAL_SECS,
            backfill_overlap_secs: defaults::BACKFILL_OVERLAP_SECS,
            max_queue_attempts: defaults::MAX_QUEUE_ATTEMPTS,
            spool_retry_secs: defaults::SPOOL_RETRY_SECS,
            timezone: defaults::TIMEZONE.to_string(),
            data_dir: defaults::DATA_DIR.to_string(),
        }
    }
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup (testable variant of
    /// [`Config::from_env`]).
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let disable_webhooks = get("DISABLE_WEBHOOKS")
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        // Short interval when polling is the only channel.
        let default_interval = if disable_webhooks {
            defaults::BACKFILL_INTERVAL_NO_WEBHOOKS_SECS
        } else {
            defaults::BACKFILL_INTERVAL_SECS
        };

        Self {
            app_port: parse_or(get("APP_PORT"), defaults::APP_PORT),
            db_dsn: get("DB_DSN"),
            teamwork: TeamworkConfig {
                base_url: get("TEAMWORK_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
                api_key: get("TEAMWORK_API_KEY"),
                webhook_secret: get("TEAMWORK_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
                process_after: get("TEAMWORK_PROCESS_AFTER")
                    .as_deref()
                    .and_then(|s| parse_process_after(s).ok()),
                include_completed_on_initial_sync: get("INCLUDE_COMPLETED_TASKS_ON_INITIAL_SYNC")
                    .map(|v| is_truthy(&v))
                    .unwrap_or(true),
            },
            missive: MissiveConfig {
                api_token: get("MISSIVE_API_TOKEN"),
                webhook_secret: get("MISSIVE_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
                process_after: get("MISSIVE_PROCESS_AFTER")
                    .as_deref()
                    .and_then(|s| parse_process_after(s).ok()),
            },
            craft: CraftConfig {
                base_url: get("CRAFT_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            },
            disable_webhooks,
            public_url: get("PUBLIC_URL").map(|u| u.trim_end_matches('/').to_string()),
            backfill_interval_secs: parse_or(get("PERIODIC_BACKFILL_INTERVAL"), default_interval),
            backfill_overlap_secs: parse_or(
                get("BACKFILL_OVERLAP_SECONDS"),
                defaults::BACKFILL_OVERLAP_SECS,
            ),
            max_queue_attempts: parse_or(get("MAX_QUEUE_ATTEMPTS"), defaults::MAX_QUEUE_ATTEMPTS),
            spool_retry_secs: parse_or(get("SPOOL_RETRY_SECONDS"), defaults::SPOOL_RETRY_SECS),
            timezone: get("TIMEZONE").unwrap_or_else(|| defaults::TIMEZONE.to_string()),
            data_dir: get("DATA_DIR").unwrap_or_else(|| defaults::DATA_DIR.to_string()),
        }
    }

    /// Validate that required configuration is present.
    ///
    /// Returns one error naming every missing or invalid option.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.teamwork.base_url.as_deref().unwrap_or("").is_empty() {
            errors.push("TEAMWORK_BASE_URL is required");
        }
        if self.teamwork.api_key.as_deref().unwrap_or("").is_empty() {
            errors.push("TEAMWORK_API_KEY is required");
        }
        if self.missive.api_token.as_deref().unwrap_or("").is_empty() {
            errors.push("MISSIVE_API_TOKEN is required");
        }
        if self.db_dsn.as_deref().unwrap_or("").is_empty() {
            errors.push("DB_DSN is required");
        }
        if self.max_queue_attempts < 1 {
            errors.push("MAX_QUEUE_ATTEMPTS must be at least 1");
        }
        if self.backfill_overlap_secs < 0 {
            errors.push("BACKFILL_OVERLAP_SECONDS must not be negative");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "configuration errors:\n  {}",
                errors.join("\n  ")
            )))
        }
    }

    /// Whether the Craft source is enabled.
    pub fn craft_enabled(&self) -> bool {
        self.craft.base_url.is_some()
    }
}

/// Parse a `DD.MM.YYYY` cutoff into midnight UTC of that day.
pub fn parse_process_after(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s.trim(), "%d.%m.%Y")
        .map_err(|e| Error::Config(format!("invalid DD.MM.YYYY date '{s}': {e}")))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = Config::from_lookup(|_| None);
        assert_eq!(cfg.app_port, 5000);
        assert_eq!(cfg.backfill_interval_secs, 60);
        assert_eq!(cfg.backfill_overlap_secs, 120);
        assert_eq!(cfg.max_queue_attempts, 3);
        assert_eq!(cfg.spool_retry_secs, 60);
        assert!(!cfg.disable_webhooks);
        assert!(cfg.teamwork.include_completed_on_initial_sync);
        assert!(!cfg.craft_enabled());
    }

    #[test]
    fn test_disabled_webhooks_shorten_poll_interval() {
        let cfg = Config::from_lookup(lookup(&[("DISABLE_WEBHOOKS", "true")]));
        assert!(cfg.disable_webhooks);
        assert_eq!(cfg.backfill_interval_secs, 5);

        // Explicit interval wins over the shortened default.
        let cfg = Config::from_lookup(lookup(&[
            ("DISABLE_WEBHOOKS", "true"),
            ("PERIODIC_BACKFILL_INTERVAL", "30"),
        ]));
        assert_eq!(cfg.backfill_interval_secs, 30);
    }

    #[test]
    fn test_base_urls_trailing_slash_stripped() {
        let cfg = Config::from_lookup(lookup(&[
            ("TEAMWORK_BASE_URL", "https://acme.teamwork.com/"),
            ("CRAFT_BASE_URL", "https://docs.example.com/"),
        ]));
        assert_eq!(
            cfg.teamwork.base_url.as_deref(),
            Some("https://acme.teamwork.com")
        );
        assert_eq!(cfg.craft.base_url.as_deref(), Some("https://docs.example.com"));
        assert!(cfg.craft_enabled());
    }

    #[test]
    fn test_process_after_parsing() {
        let ts = parse_process_after("15.03.2024").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-15T00:00:00+00:00");

        assert!(parse_process_after("2024-03-15").is_err());
        assert!(parse_process_after("31.02.2024").is_err());
        assert!(parse_process_after("").is_err());
    }

    #[test]
    fn test_validate_reports_all_missing_options() {
        let cfg = Config::from_lookup(|_| None);
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("TEAMWORK_BASE_URL"));
        assert!(err.contains("TEAMWORK_API_KEY"));
        assert!(err.contains("MISSIVE_API_TOKEN"));
        assert!(err.contains("DB_DSN"));
    }

    #[test]
    fn test_validate_ok_with_required_options() {
        let cfg = Config::from_lookup(lookup(&[
            ("TEAMWORK_BASE_URL", "https://acme.teamwork.com"),
            ("TEAMWORK_API_KEY", "twp_abc"),
            ("MISSIVE_API_TOKEN", "mv_xyz"),
            ("DB_DSN", "postgres://localhost/inflow"),
        ]));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_webhook_secret_means_unconfigured() {
        let cfg = Config::from_lookup(lookup(&[("TEAMWORK_WEBHOOK_SECRET", "")]));
        assert!(cfg.teamwork.webhook_secret.is_none());
    }

    #[test]
    fn test_truthy_variants() {
        for v in ["true", "1", "yes", "TRUE", "Yes"] {
            assert!(is_truthy(v), "{v} should be truthy");
        }
        for v in ["false", "0", "no", "", "on"] {
            assert!(!is_truthy(v), "{v} should be falsy");
        }
    }
}
