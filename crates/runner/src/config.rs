#![forbid(unsafe_code)]

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub(crate) const DEFAULT_STORAGE_DIRNAME: &str = ".bookwiki";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("{name} must be an integer, got {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Engine tuning. Every field has a default, so an empty YAML document is a
/// valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub storage_dir: PathBuf,
    /// Cumulative token ceiling per conversation; 0 disables it.
    pub token_ceiling: i64,
    /// Turn ceiling per conversation; 0 disables it.
    pub max_turns: i64,
    pub max_tool_errors: i64,
    pub max_transport_attempts: i64,
    pub backoff_base_ms: i64,
    pub backoff_max_ms: i64,
    pub claim_ttl_ms: u64,
    pub wait_timeout_ms: i64,
    pub poll_ms: u64,
    pub workers: usize,
    pub compression_threshold: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIRNAME),
            token_ceiling: 5_000_000,
            max_turns: 200,
            max_tool_errors: 5,
            max_transport_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            claim_ttl_ms: 300_000,
            wait_timeout_ms: 7 * 24 * 60 * 60 * 1_000,
            poll_ms: 1_500,
            workers: 1,
            compression_threshold: 150_000,
        }
    }
}

fn env_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_int<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env_var(lookup, name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        None => Ok(None),
    }
}

impl EngineConfig {
    /// Reads the optional YAML file, applies `BW_*` environment overrides and
    /// clamps the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        let mut config = base.with_env(|name| std::env::var(name).ok())?;
        config.clamp();
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(dir) = env_var(&lookup, "BW_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_int(&lookup, "BW_TOKEN_CEILING")? {
            self.token_ceiling = v;
        }
        if let Some(v) = env_int(&lookup, "BW_MAX_TURNS")? {
            self.max_turns = v;
        }
        if let Some(v) = env_int(&lookup, "BW_MAX_TOOL_ERRORS")? {
            self.max_tool_errors = v;
        }
        if let Some(v) = env_int(&lookup, "BW_MAX_TRANSPORT_ATTEMPTS")? {
            self.max_transport_attempts = v;
        }
        if let Some(v) = env_int(&lookup, "BW_BACKOFF_BASE_MS")? {
            self.backoff_base_ms = v;
        }
        if let Some(v) = env_int(&lookup, "BW_BACKOFF_MAX_MS")? {
            self.backoff_max_ms = v;
        }
        if let Some(v) = env_int(&lookup, "BW_CLAIM_TTL_MS")? {
            self.claim_ttl_ms = v;
        }
        if let Some(v) = env_int(&lookup, "BW_WAIT_TIMEOUT_MS")? {
            self.wait_timeout_ms = v;
        }
        if let Some(v) = env_int(&lookup, "BW_POLL_MS")? {
            self.poll_ms = v;
        }
        if let Some(v) = env_int(&lookup, "BW_WORKERS")? {
            self.workers = v;
        }
        if let Some(v) = env_int(&lookup, "BW_COMPRESSION_THRESHOLD")? {
            self.compression_threshold = v;
        }
        Ok(self)
    }

    pub fn clamp(&mut self) {
        self.token_ceiling = self.token_ceiling.max(0);
        self.max_turns = self.max_turns.max(0);
        self.max_tool_errors = self.max_tool_errors.clamp(1, 1_000);
        self.max_transport_attempts = self.max_transport_attempts.clamp(1, 100);
        self.backoff_base_ms = self.backoff_base_ms.clamp(1, 3_600_000);
        self.backoff_max_ms = self.backoff_max_ms.clamp(self.backoff_base_ms, 86_400_000);
        self.claim_ttl_ms = self.claim_ttl_ms.clamp(1_000, 3_600_000);
        self.wait_timeout_ms = self.wait_timeout_ms.max(1_000);
        self.poll_ms = self.poll_ms.clamp(10, 60_000);
        self.workers = self.workers.clamp(1, 64);
        self.compression_threshold = self.compression_threshold.max(1);
    }

    pub fn token_ceiling(&self) -> Option<i64> {
        (self.token_ceiling > 0).then_some(self.token_ceiling)
    }

    /// Delay before retry number `attempts` (1-based): doubles from the base
    /// and saturates at the maximum.
    pub fn backoff_ms(&self, attempts: i64) -> i64 {
        let exponent = u32::try_from(attempts.saturating_sub(1).clamp(0, 30)).unwrap_or(30);
        self.backoff_base_ms
            .saturating_mul(1_i64 << exponent)
            .min(self.backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = EngineConfig::from_yaml_str("max_turns: 12\nworkers: 3\n").expect("parse");
        assert_eq!(config.max_turns, 12);
        assert_eq!(config.workers, 3);
        assert_eq!(config.poll_ms, EngineConfig::default().poll_ms);
        assert_eq!(EngineConfig::from_yaml_str("").expect("empty"), EngineConfig::default());
    }

    #[test]
    fn unknown_yaml_keys_are_rejected() {
        assert!(EngineConfig::from_yaml_str("max_turn: 12\n").is_err());
    }

    #[test]
    fn env_overrides_yaml_and_is_validated() {
        let config = EngineConfig::from_yaml_str("max_turns: 12\n")
            .expect("parse")
            .with_env(env(&[("BW_MAX_TURNS", " 40 "), ("BW_STORAGE_DIR", "/tmp/wiki")]))
            .expect("env");
        assert_eq!(config.max_turns, 40);
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/wiki"));

        let err = EngineConfig::default()
            .with_env(env(&[("BW_WORKERS", "many")]))
            .expect_err("non-numeric");
        match err {
            ConfigError::InvalidEnv { name, value } => {
                assert_eq!(name, "BW_WORKERS");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn clamp_keeps_values_in_range() {
        let mut config = EngineConfig {
            workers: 0,
            poll_ms: 0,
            backoff_base_ms: 500,
            backoff_max_ms: 10,
            token_ceiling: -5,
            ..EngineConfig::default()
        };
        config.clamp();
        assert_eq!(config.workers, 1);
        assert_eq!(config.poll_ms, 10);
        assert_eq!(config.backoff_max_ms, 500);
        assert_eq!(config.token_ceiling(), None);
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let config = EngineConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..EngineConfig::default()
        };
        let delays: Vec<i64> = (1..=6).map(|n| config.backoff_ms(n)).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }
}
