use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://coordinator.db?mode=rwc";

/// Which optional worker groups are switched on.
///
/// Unset means everything is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    enabled: Option<BTreeSet<String>>,
}

impl Features {
    pub fn all() -> Self {
        Self { enabled: None }
    }

    pub fn only<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: Some(features.into_iter().map(Into::into).collect()),
        }
    }

    /// Parse a comma separated list such as `imdb_title,anime`.
    pub fn parse(list: &str) -> Self {
        Self::only(
            list.split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty()),
        )
    }

    pub fn is_enabled(&self, feature: &str) -> bool {
        match &self.enabled {
            Some(enabled) => enabled.contains(feature),
            None => true,
        }
    }
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub features: Features,
    /// Sleep between readiness checks while a worker waits on a dependency
    pub wait_backoff: Duration,
    pub eviction_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            features: lookup("FEATURES")
                .map(|list| Features::parse(&list))
                .unwrap_or_default(),
            wait_backoff: Duration::from_secs(
                lookup("WORKER_WAIT_BACKOFF_SECS")
                    .unwrap_or_else(|| "300".to_string())
                    .parse()
                    .context("WORKER_WAIT_BACKOFF_SECS must be a number of seconds")?,
            ),
            eviction_interval: Duration::from_secs(
                lookup("JOB_EVICTION_INTERVAL_SECS")
                    .unwrap_or_else(|| "3600".to_string())
                    .parse()
                    .context("JOB_EVICTION_INTERVAL_SECS must be a number of seconds")?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.features, Features::all());
        assert_eq!(config.wait_backoff, Duration::from_secs(300));
        assert_eq!(config.eviction_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_features_list() {
        let config = Config::from_lookup(lookup(&[("FEATURES", " anime, imdb_title ,")])).unwrap();
        assert!(config.features.is_enabled("anime"));
        assert!(config.features.is_enabled("imdb_title"));
        assert!(!config.features.is_enabled("dmm_hashlist"));

        // An empty list switches every feature off.
        assert!(!Features::parse("").is_enabled("anime"));
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = Config::from_lookup(lookup(&[("WORKER_WAIT_BACKOFF_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("WORKER_WAIT_BACKOFF_SECS"));
    }
}
