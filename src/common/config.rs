//! Configuration for minilog components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "MINILOG_CONFIG";

/// Default config file, read only if present
pub const DEFAULT_CONFIG_FILE: &str = "minilog.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub commit: CommitConfig,

    #[serde(default)]
    pub kv: KvConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log: LogConfig::default(),
            commit: CommitConfig::default(),
            kv: KvConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Append/poll engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Prefix prepended to every log key to form its substrate key
    #[serde(default)]
    pub key_prefix: String,

    /// Attempts before an append gives up with `StorageExhausted`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit; attempt `n` sleeps `n * base_delay_ms`
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Serialize same-key appends inside this process
    #[serde(default = "default_true")]
    pub local_key_locks: bool,
}

fn default_max_attempts() -> u32 {
    100
}
fn default_base_delay() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

impl LogConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            local_key_locks: true,
        }
    }
}

/// How a requested commit offset combines with the stored one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CommitPolicy {
    /// Committed offsets only move forward
    #[default]
    Max,
    /// Legacy behavior: keep the smaller of the two
    Min,
}

impl CommitPolicy {
    pub fn combine(self, existing: u64, requested: u64) -> u64 {
        match self {
            CommitPolicy::Max => existing.max(requested),
            CommitPolicy::Min => existing.min(requested),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitConfig {
    #[serde(default)]
    pub policy: CommitPolicy,
}

/// Substrate client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// Node id of the linearizable KV service
    #[serde(default = "default_kv_service")]
    pub service: String,

    /// How long to wait for a substrate reply
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,
}

fn default_kv_service() -> String {
    "lin-kv".to_string()
}
fn default_rpc_timeout() -> u64 {
    1000
}

impl KvConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            service: default_kv_service(),
            rpc_timeout_ms: default_rpc_timeout(),
        }
    }
}

/// HTTP surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Maximum accepted request body
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Config {
    /// Load from the file named by `MINILOG_CONFIG` (or `minilog.toml`),
    /// then `MINILOG_*` environment variables. Missing file is not an error.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("MINILOG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.log.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "log.max_attempts must be at least 1".into(),
            ));
        }
        if self.kv.service.is_empty() {
            return Err(Error::InvalidConfig("kv.service must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log.max_attempts, 100);
        assert_eq!(config.log.base_delay(), Duration::from_millis(10));
        assert!(config.log.local_key_locks);
        assert_eq!(config.commit.policy, CommitPolicy::Max);
        assert_eq!(config.kv.service, "lin-kv");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "log_level = 'debug'\n[log]\nmax_attempts = 7\nkey_prefix = 'topic/'\n[commit]\npolicy = 'min'\n"
        )
        .unwrap();

        let config = Config::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log.max_attempts, 7);
        assert_eq!(config.log.key_prefix, "topic/");
        assert_eq!(config.log.base_delay_ms, 10);
        assert_eq!(config.commit.policy, CommitPolicy::Min);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_from("/nonexistent/minilog.toml").unwrap();
        assert_eq!(config.log.max_attempts, 100);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.log.max_attempts = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_commit_policy_combine() {
        assert_eq!(CommitPolicy::Max.combine(3, 5), 5);
        assert_eq!(CommitPolicy::Max.combine(5, 3), 5);
        assert_eq!(CommitPolicy::Min.combine(3, 5), 3);
        assert_eq!(CommitPolicy::Min.combine(0, 5), 0);
    }
}
