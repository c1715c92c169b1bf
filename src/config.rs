//! Typed configuration
//!
//! [`Settings`] groups the per-component configuration structs. Each one
//! carries explicit defaults and rejects unknown fields, so a misspelled
//! key in a YAML file fails at load time instead of being ignored.
//!
//! ```yaml
//! cache:
//!   prefix: app
//!   ttl_seconds: 600
//!   consistency_level: eventual
//! compression:
//!   algorithm: auto
//!   min_size: 1024
//! cluster:
//!   shards:
//!     - id: 0
//!       nodes: [{ id: node-a, address: "memory://a" }]
//! patterns:
//!   refresh_threshold: 0.8
//! ```
//!
//! The flat option surface (`minSize`, `ttlSeconds`, ...) is applied on top
//! through [`ConfigOverrides`] and [`Settings::merge`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{ConsistencyLevel, CoreConfig};
use crate::cluster::ClusterConfig;
use crate::compression::{AlgorithmSetting, CompressionConfig};
use crate::error::{Error, Result};
use crate::patterns::PatternConfig;
use crate::retry::RetryConfig;

/// Complete cache-layer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub cache: CoreConfig,
    pub compression: CompressionConfig,
    pub cluster: ClusterConfig,
    pub patterns: PatternConfig,
    pub retry: RetryConfig,
}

impl Settings {
    /// Parse YAML and validate
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load a YAML file and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.compression.validate()?;
        self.cluster.validate()?;
        self.patterns.validate()?;
        self.retry.validate()?;
        Ok(())
    }

    /// Apply every set override, then re-validate
    pub fn merge(mut self, overrides: &ConfigOverrides) -> Result<Self> {
        let o = overrides;
        if let Some(algorithm) = o.algorithm {
            self.compression.algorithm = algorithm;
        }
        if let Some(min_size) = o.min_size {
            self.compression.min_size = min_size;
        }
        if let Some(max_size) = o.max_size {
            self.compression.max_size = max_size;
        }
        if let Some(chunk_size) = o.chunk_size {
            self.compression.chunk_size = chunk_size;
        }
        if let Some(adaptive) = o.adaptive_mode {
            self.compression.adaptive_mode = adaptive;
        }
        if let Some(ttl) = o.ttl_seconds {
            self.cache.ttl_seconds = ttl;
        }
        if let Some(threshold) = o.refresh_threshold {
            self.patterns.refresh_threshold = threshold;
        }
        if let Some(swr) = o.stale_while_revalidate {
            self.patterns.stale_while_revalidate = swr;
        }
        if let Some(ms) = o.max_stale_time {
            self.patterns.max_stale_time = Duration::from_millis(ms);
        }
        if let Some(max) = o.max_pending_writes {
            self.patterns.max_pending_writes = max;
        }
        if let Some(ms) = o.flush_interval_ms {
            self.patterns.flush_interval = Duration::from_millis(ms);
        }
        if let Some(level) = o.consistency_level {
            self.cache.consistency_level = level;
        }
        if let Some(factor) = o.replication_factor {
            self.cache.replication_factor = factor;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Flat option surface applied over [`Settings`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ConfigOverrides {
    pub algorithm: Option<AlgorithmSetting>,
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    pub chunk_size: Option<usize>,
    pub adaptive_mode: Option<bool>,
    pub ttl_seconds: Option<u64>,
    pub refresh_threshold: Option<f64>,
    pub stale_while_revalidate: Option<bool>,
    /// Milliseconds
    pub max_stale_time: Option<u64>,
    pub max_pending_writes: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub consistency_level: Option<ConsistencyLevel>,
    pub replication_factor: Option<u32>,
}

impl ConfigOverrides {
    /// Parse `key=value` pairs such as `minSize=512` or `algorithm=fast-text`.
    ///
    /// Values are read as JSON scalars when possible and as plain strings
    /// otherwise. Unknown keys are rejected.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = serde_json::Map::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("expected key=value, got '{}'", pair)))?;
            let key = key.trim();
            let raw = raw.trim();
            let value = serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
            map.insert(key.to_string(), value);
        }
        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| Error::Config(format!("invalid override: {}", e)))
    }

    /// Whether no override is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.cache.prefix, "cache");
        assert_eq!(settings.cache.ttl_seconds, 3600);
        assert_eq!(settings.compression.min_size, 1024);
        assert_eq!(settings.compression.chunk_size, 64 * 1024);
        assert_eq!(settings.patterns.refresh_threshold, 0.8);
        assert_eq!(settings.patterns.max_pending_writes, 1000);
        assert_eq!(settings.patterns.flush_interval, Duration::from_millis(5000));
        assert_eq!(settings.retry.operation_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_yaml_sections() {
        let yaml = r#"
cache:
  prefix: app
  namespace: users
  consistency_level: session
compression:
  algorithm: fast-text
  min_size: 256
cluster:
  shards:
    - id: 0
      nodes:
        - { id: a, address: "memory://a" }
    - id: 1
      nodes:
        - { id: b, address: "memory://b" }
patterns:
  stale_while_revalidate: true
  max_stale_time_ms: 5000
retry:
  max_retries: 4
"#;
        let settings = Settings::from_yaml_str(yaml).unwrap();
        assert_eq!(settings.cache.prefix, "app");
        assert_eq!(settings.cache.consistency_level, ConsistencyLevel::Session);
        assert_eq!(settings.compression.algorithm, AlgorithmSetting::FastText);
        assert_eq!(settings.cluster.shards.len(), 2);
        assert!(settings.patterns.stale_while_revalidate);
        assert_eq!(settings.patterns.max_stale_time, Duration::from_secs(5));
        assert_eq!(settings.retry.max_retries, 4);
        // Untouched sections keep defaults
        assert_eq!(settings.cache.ttl_seconds, 3600);
    }

    #[test]
    fn test_yaml_unknown_key_rejected() {
        let err = Settings::from_yaml_str("cache:\n  prefx: oops\n").unwrap_err();
        assert_matches!(err, Error::Config(_));
        let err = Settings::from_yaml_str("bogus: 1\n").unwrap_err();
        assert_matches!(err, Error::Config(_));
    }

    #[test]
    fn test_overrides_from_pairs_and_merge() {
        let overrides = ConfigOverrides::from_pairs([
            "algorithm=deflate-family",
            "minSize=128",
            "adaptiveMode=false",
            "ttlSeconds=60",
            "refreshThreshold=0.5",
            "staleWhileRevalidate=true",
            "maxStaleTime=2000",
            "maxPendingWrites=10",
            "flushIntervalMs=250",
            "consistencyLevel=strong",
            "replicationFactor=2",
        ])
        .unwrap();
        assert!(!overrides.is_empty());

        let settings = Settings::default().merge(&overrides).unwrap();
        assert_eq!(settings.compression.algorithm, AlgorithmSetting::DeflateFamily);
        assert_eq!(settings.compression.min_size, 128);
        assert!(!settings.compression.adaptive_mode);
        assert_eq!(settings.cache.ttl_seconds, 60);
        assert_eq!(settings.patterns.refresh_threshold, 0.5);
        assert!(settings.patterns.stale_while_revalidate);
        assert_eq!(settings.patterns.max_stale_time, Duration::from_secs(2));
        assert_eq!(settings.patterns.max_pending_writes, 10);
        assert_eq!(settings.patterns.flush_interval, Duration::from_millis(250));
        assert_eq!(settings.cache.consistency_level, ConsistencyLevel::Strong);
        assert_eq!(settings.cache.replication_factor, 2);
    }

    #[test]
    fn test_overrides_reject_unknown_and_malformed() {
        assert_matches!(
            ConfigOverrides::from_pairs(["cacheSize=10"]),
            Err(Error::Config(_))
        );
        assert_matches!(
            ConfigOverrides::from_pairs(["minSize"]),
            Err(Error::Config(_))
        );
        assert_matches!(
            ConfigOverrides::from_pairs(["minSize=lots"]),
            Err(Error::Config(_))
        );
        assert!(ConfigOverrides::from_pairs(Vec::<String>::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_merge_revalidates() {
        let overrides = ConfigOverrides {
            refresh_threshold: Some(1.5),
            ..Default::default()
        };
        assert_matches!(Settings::default().merge(&overrides), Err(Error::Config(_)));
    }
}
