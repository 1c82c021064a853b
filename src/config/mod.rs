//! Runtime configuration for unilink.
//!
//! Configuration is loaded with precedence: overrides > Env vars > Config file > Defaults
//!
//! Environment variables use the `UNILINK_` prefix and a double underscore
//! between section and key, e.g. `UNILINK_MATCHING__MAYBE_THRESHOLD=0.7`.
//!
//! # Example config file (unilink.toml)
//! ```toml
//! [matching]
//! threshold = 0.85
//! maybe_threshold = 0.7
//! strategy = "mix"
//! threads = 4
//!
//! [blocking]
//! window_size = 8
//!
//! [storage]
//! path = "/var/lib/unilink/records"
//! link_store_path = "/var/lib/unilink/links"
//! ```

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::persistence::PersistentOpenOptions;
use crate::scoring::ProbabilityCurve;
use crate::strategy::{LinkageStrategy, Thresholds};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for a linkage run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnilinkConfig {
    pub matching: MatchingConfig,
    pub blocking: BlockingConfig,
    pub storage: StorageConfig,
}

impl UnilinkConfig {
    /// Load configuration with precedence: overrides > Env > File > Defaults,
    /// then validate it.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(UnilinkConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with UNILINK_ prefix
        figment = figment.merge(Env::prefixed("UNILINK_").split("__"));

        // Layer 3: Programmatic overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: UnilinkConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only.
    pub fn from_env(config_path: Option<&Path>) -> Result<Self> {
        Self::load(config_path, ConfigOverrides::default())
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        for (name, value) in [
            ("threshold", m.threshold),
            ("maybe_threshold", m.maybe_threshold),
            ("min_relevance", self.blocking.min_relevance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::config(format!("{name} {value} is outside [0, 1]")));
            }
        }
        if m.maybe_threshold > m.threshold {
            return Err(Error::config(format!(
                "maybe_threshold {} exceeds threshold {}",
                m.maybe_threshold, m.threshold
            )));
        }
        if m.threads == 0 {
            return Err(Error::config("threads must be at least 1"));
        }
        if m.batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }
        if self.blocking.bucket_capacity == 0 {
            return Err(Error::config("bucket_capacity must be at least 1"));
        }
        if self.storage.cache_capacity == 0 {
            return Err(Error::config("cache_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(self.matching.threshold, self.matching.maybe_threshold)
    }

    pub fn open_options(&self) -> PersistentOpenOptions {
        PersistentOpenOptions {
            cache_capacity: self.storage.cache_capacity,
            bucket_capacity: self.blocking.bucket_capacity,
        }
    }
}

/// Scoring and decision settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub threshold: f64,
    /// Zero disables possible matches
    pub maybe_threshold: f64,
    pub strategy: LinkageStrategy,
    pub curve: ProbabilityCurve,
    pub threads: usize,
    pub batch_size: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            maybe_threshold: DEFAULT_MAYBE_THRESHOLD,
            strategy: LinkageStrategy::default(),
            curve: ProbabilityCurve::default(),
            threads: default_thread_count(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Candidate retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingConfig {
    pub window_size: usize,
    /// Replace records whose external id is already indexed
    pub overwrite: bool,
    pub bucket_capacity: usize,
    pub max_search_hits: usize,
    pub min_relevance: f64,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            overwrite: true,
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            max_search_hits: DEFAULT_MAX_SEARCH_HITS,
            min_relevance: DEFAULT_MIN_RELEVANCE,
        }
    }
}

/// RocksDB storage settings. No path means in-memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    pub link_store_path: Option<PathBuf>,
    pub cache_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            link_store_path: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching: Option<MatchingOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<BlockingOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maybe_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<LinkageStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_store_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        let config = UnilinkConfig::default();
        assert_eq!(config.matching.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.blocking.window_size, DEFAULT_WINDOW_SIZE);
        assert!(config.blocking.overwrite);
        assert!(config.storage.path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "unilink.toml",
                r#"
                [matching]
                threshold = 0.9
                maybe_threshold = 0.6
                strategy = "best"

                [blocking]
                window_size = 9
                "#,
            )?;
            jail.set_env("UNILINK_BLOCKING__WINDOW_SIZE", "12");
            jail.set_env("UNILINK_MATCHING__MAYBE_THRESHOLD", "0.7");

            let overrides = ConfigOverrides {
                matching: Some(MatchingOverrides {
                    strategy: Some(LinkageStrategy::Mix),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let config = UnilinkConfig::load(Some(Path::new("unilink.toml")), overrides)
                .map_err(|err| err.to_string())?;

            assert_eq!(config.matching.threshold, 0.9);
            assert_eq!(config.matching.maybe_threshold, 0.7);
            assert_eq!(config.matching.strategy, LinkageStrategy::Mix);
            assert_eq!(config.blocking.window_size, 12);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = UnilinkConfig::default();
        config.matching.maybe_threshold = 0.95;
        assert!(config.validate().unwrap_err().is_fatal());

        let mut config = UnilinkConfig::default();
        config.matching.threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_serde() {
        let json = serde_json::to_string(&LinkageStrategy::Mix).unwrap();
        assert_eq!(json, "\"mix\"");

        let curve: ProbabilityCurve = serde_json::from_str("\"damped\"").unwrap();
        assert_eq!(curve, ProbabilityCurve::Damped);
    }
}
