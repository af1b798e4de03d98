use std::env;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::submission::RetryPolicy;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Runtime settings for the exam engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub api_base_url: Url,
    pub api_token: Option<String>,
    /// `None` keeps drafts in memory only.
    pub db_url: Option<String>,
    pub tick_interval: Duration,
    pub save_debounce: Duration,
    pub retry: RetryPolicy,
    pub allow_edit_after_timeout: bool,
}

impl EngineConfig {
    /// Defaults for everything but the backend location.
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            api_token: None,
            db_url: None,
            tick_interval: Duration::from_secs(1),
            save_debounce: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            allow_edit_after_timeout: false,
        }
    }

    /// Read settings from `CBT_*` environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a value is present but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_base = get("CBT_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let api_base_url = Url::parse(raw_base.trim()).map_err(|source| ConfigError::InvalidUrl {
            var: "CBT_API_BASE_URL",
            source,
        })?;
        let defaults = Self::new(api_base_url);

        let millis = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(var) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
                None => Ok(default),
            }
        };

        let max_attempts = match get("CBT_SUBMIT_MAX_ATTEMPTS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidNumber {
                    var: "CBT_SUBMIT_MAX_ATTEMPTS",
                    value: raw,
                })?,
            None => defaults.retry.max_attempts,
        };

        let allow_edit_after_timeout = match get("CBT_ALLOW_EDIT_AFTER_TIMEOUT") {
            Some(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag {
                var: "CBT_ALLOW_EDIT_AFTER_TIMEOUT",
                value: raw,
            })?,
            None => defaults.allow_edit_after_timeout,
        };

        Ok(Self {
            api_base_url: defaults.api_base_url.clone(),
            api_token: get("CBT_API_TOKEN"),
            db_url: get("CBT_DB_URL"),
            tick_interval: millis("CBT_TICK_INTERVAL_MS", defaults.tick_interval)?,
            save_debounce: millis("CBT_SAVE_DEBOUNCE_MS", defaults.save_debounce)?,
            retry: RetryPolicy::new(
                max_attempts,
                millis(
                    "CBT_SUBMIT_INITIAL_BACKOFF_MS",
                    defaults.retry.initial_delay,
                )?,
                millis("CBT_SUBMIT_MAX_BACKOFF_MS", defaults.retry.max_delay)?,
            ),
            allow_edit_after_timeout,
        })
    }

    #[must_use]
    pub fn with_api_base_url(mut self, url: Url) -> Self {
        self.api_base_url = url;
        self
    }

    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_db_url(mut self, db_url: impl Into<String>) -> Self {
        self.db_url = Some(db_url.into());
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn with_save_debounce(mut self, debounce: Duration) -> Self {
        self.save_debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_edit_after_timeout(mut self, allow: bool) -> Self {
        self.allow_edit_after_timeout = allow;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_base_url.as_str(), "http://localhost:8000/api");
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.save_debounce, Duration::from_secs(2));
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.api_token.is_none());
        assert!(config.db_url.is_none());
        assert!(!config.allow_edit_after_timeout);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("CBT_API_BASE_URL", "https://cbt.example.com/api"),
            ("CBT_API_TOKEN", "secret"),
            ("CBT_DB_URL", "sqlite:exam.db"),
            ("CBT_TICK_INTERVAL_MS", "250"),
            ("CBT_SUBMIT_MAX_ATTEMPTS", "3"),
            ("CBT_SUBMIT_INITIAL_BACKOFF_MS", "100"),
            ("CBT_ALLOW_EDIT_AFTER_TIMEOUT", "yes"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url.host_str(), Some("cbt.example.com"));
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.db_url.as_deref(), Some("sqlite:exam.db"));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(100));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
        assert!(config.allow_edit_after_timeout);
    }

    #[test]
    fn blank_token_is_treated_as_unset() {
        let config = EngineConfig::from_lookup(lookup(&[("CBT_API_TOKEN", "  ")])).unwrap();
        assert!(config.api_token.is_none());
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("CBT_TICK_INTERVAL_MS", "soon")])),
            Err(ConfigError::InvalidNumber {
                var: "CBT_TICK_INTERVAL_MS",
                ..
            })
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("CBT_API_BASE_URL", "not a url")])),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("CBT_ALLOW_EDIT_AFTER_TIMEOUT", "maybe")])),
            Err(ConfigError::InvalidFlag { .. })
        ));
    }
}
