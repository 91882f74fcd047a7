use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::RetryPolicy;
use crate::coordinator::ReconcileOptions;
use crate::store::StoreOptions;

const MAX_DEBOUNCE_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_debounce_ms() -> u64 {
    1500
}

fn default_call_timeout_ms() -> u64 {
    5000
}

fn default_validate_cached_ids() -> bool {
    true
}

fn default_max_transient_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_race_retry_jitter_ms() -> u64 {
    250
}

/// Tunables for one editing session. Every field may be omitted from the
/// TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Quiet window after the last edit before a save starts.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound for a single store call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Confirm cached ids with the store before writing through them.
    #[serde(default = "default_validate_cached_ids")]
    pub validate_cached_ids: bool,
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_race_retry_jitter_ms")]
    pub race_retry_jitter_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            validate_cached_ids: default_validate_cached_ids(),
            max_transient_retries: default_max_transient_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            race_retry_jitter_ms: default_race_retry_jitter_ms(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, or returns the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::Invalid(format!(
                "debounce_ms must be at most {MAX_DEBOUNCE_MS}, got {}",
                self.debounce_ms
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "call_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_transient_retries: self.max_transient_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            race_retry_jitter: Duration::from_millis(self.race_retry_jitter_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            validate_cached_ids: self.validate_cached_ids,
            retry: self.retry_policy(),
        }
    }

    pub fn store_options(&self, account_scope: Option<String>) -> StoreOptions {
        StoreOptions {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            account_scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use uuid::Uuid;

    use super::{ConfigError, SyncConfig};

    #[test]
    fn missing_fields_take_defaults() {
        let config = SyncConfig::from_toml_str("debounce_ms = 250\n").expect("config should parse");
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.call_timeout_ms, 5000);
        assert!(config.validate_cached_ids);
        assert_eq!(config.retry_policy().max_transient_retries, 3);
        assert_eq!(
            SyncConfig::from_toml_str("").expect("empty config"),
            SyncConfig::default()
        );
    }

    #[test]
    fn converts_into_runtime_options() {
        let config = SyncConfig {
            validate_cached_ids: false,
            backoff_base_ms: 10,
            backoff_max_ms: 40,
            ..SyncConfig::default()
        };
        let options = config.reconcile_options();
        assert!(!options.validate_cached_ids);
        assert_eq!(options.retry.backoff_base, Duration::from_millis(10));
        assert_eq!(options.retry.unclassified_retries, 1);

        let store = config.store_options(Some("u1".to_string()));
        assert_eq!(store.call_timeout, Duration::from_millis(5000));
        assert_eq!(store.account_scope.as_deref(), Some("u1"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        for raw in [
            "debounce_ms = 60001",
            "call_timeout_ms = 0",
            "backoff_base_ms = 900\nbackoff_max_ms = 100",
        ] {
            let err = SyncConfig::from_toml_str(raw).expect_err("value should be rejected");
            assert!(matches!(err, ConfigError::Invalid(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn rejects_unknown_keys_and_bad_types() {
        assert!(matches!(
            SyncConfig::from_toml_str("debounce = 10"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            SyncConfig::from_toml_str("debounce_ms = \"fast\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn load_reads_file_or_falls_back_to_defaults() {
        assert_eq!(
            SyncConfig::load(None).expect("defaults"),
            SyncConfig::default()
        );

        let path = std::env::temp_dir().join(format!("liftlog-config-{}.toml", Uuid::now_v7()));
        fs::write(&path, "validate_cached_ids = false\n").expect("config should write");
        let loaded = SyncConfig::load(Some(&path)).expect("config should load");
        assert!(!loaded.validate_cached_ids);
        let _ = fs::remove_file(&path);

        assert!(matches!(
            SyncConfig::load(Some(&path)),
            Err(ConfigError::Io { .. })
        ));
    }
}
