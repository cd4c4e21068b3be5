//! Smoothd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::SchedulerConfig;

/// Main Smoothd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (overridden by --log-level)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// HTTP intake
    pub server: ServerConfig,

    /// Rate smoothing parameters
    pub scheduler: SchedulerConfig,

    /// Backlog record storage
    pub store: StoreConfig,

    /// Outbound HTTP dispatch
    pub dispatch: DispatchConfig,

    /// Email provider
    pub email: EmailConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Credentials are not required here; a request without one fails when
    /// it is scheduled.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.server.socket_addr()?;
        if self.dispatch.max_concurrent == 0 {
            return Err(eyre::eyre!("dispatch.max-concurrent must be at least 1"));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(eyre::eyre!("dispatch.queue-capacity must be at least 1"));
        }
        if self.store.backend == StoreBackend::Sqlite && self.store.path.as_os_str().is_empty() {
            return Err(eyre::eyre!("store.path is required for the sqlite backend"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    ///
    /// Explicit path, then ./smoothd.yml, then ~/.config/smoothd/smoothd.yml,
    /// then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let paths = match config_path {
            Some(path) => vec![path.clone()],
            None => Self::candidates(),
        };
        paths
            .iter()
            .filter(|p| p.exists())
            .find_map(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("smoothd.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("smoothd").join("smoothd.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// HTTP intake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .context(format!("Invalid server.bind address: {}", self.bind))
    }
}

/// Which state store backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; state is lost on restart
    Memory,
    /// Shared SQLite file
    #[default]
    Sqlite,
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// SQLite database file
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: statestore::config::default_store_path(),
        }
    }
}

/// Outbound HTTP dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Target of `http` requests; HTTP intake is disabled without one
    pub endpoint: Option<String>,

    /// Environment variable holding the fallback credential
    #[serde(rename = "default-credential-env")]
    pub default_credential_env: String,

    /// Per-call timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Calls in flight at once
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,

    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// Requests waiting to enter the delay queue
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            default_credential_env: "DEFAULT_API_KEY".to_string(),
            timeout_ms: 30_000,
            max_concurrent: 2,
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            queue_capacity: 10_000,
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Fallback credential from the environment, if set and non-empty
    pub fn default_credential(&self) -> Option<String> {
        read_env(&self.default_credential_env)
    }
}

/// Email provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Provider API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.resend.com".to_string(),
            api_key_env: "RESEND_API_KEY".to_string(),
            timeout_ms: 60_000,
        }
    }
}

impl EmailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn api_key(&self) -> Option<String> {
        read_env(&self.api_key_env)
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.scheduler.target_rate, 2.0);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.dispatch.max_concurrent, 2);
        assert_eq!(config.dispatch.default_credential_env, "DEFAULT_API_KEY");
        assert_eq!(config.email.base_url, "https://api.resend.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

server:
  bind: 127.0.0.1:8080

scheduler:
  target-rate: 5
  distribution-window-ms: 30000
  queue-name: outbound

store:
  backend: memory

dispatch:
  endpoint: https://api.example.com/endpoint
  max-concurrent: 4
  max-retries: 1

email:
  api-key-env: MY_RESEND_KEY
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.server.socket_addr().unwrap().port(), 8080);
        assert_eq!(config.scheduler.target_rate, 5.0);
        assert_eq!(config.scheduler.distribution_window_ms, 30_000);
        assert_eq!(config.scheduler.queue_name, "outbound");
        assert_eq!(config.scheduler.state_key, "api_queue_state");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.dispatch.endpoint.as_deref(), Some("https://api.example.com/endpoint"));
        assert_eq!(config.dispatch.max_concurrent, 4);
        assert_eq!(config.dispatch.max_retries, 1);
        assert_eq!(config.dispatch.timeout_ms, 30_000);
        assert_eq!(config.email.api_key_env, "MY_RESEND_KEY");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.scheduler.target_rate = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.bind = "not an address".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatch.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.yml");
        fs::write(&path, "log-level: warn\nscheduler:\n  target-rate: 10\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.target_rate, 10.0);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert_eq!(Config::load_log_level(Some(&path)), None);
    }

    #[test]
    #[serial]
    fn test_credentials_from_env() {
        let dispatch = DispatchConfig {
            default_credential_env: "SMOOTHD_TEST_DEFAULT_KEY".to_string(),
            ..Default::default()
        };
        let email = EmailConfig {
            api_key_env: "SMOOTHD_TEST_EMAIL_KEY".to_string(),
            ..Default::default()
        };

        unsafe {
            std::env::set_var("SMOOTHD_TEST_DEFAULT_KEY", "abc");
            std::env::set_var("SMOOTHD_TEST_EMAIL_KEY", "");
        }
        assert_eq!(dispatch.default_credential().as_deref(), Some("abc"));
        assert_eq!(email.api_key(), None);

        unsafe {
            std::env::remove_var("SMOOTHD_TEST_DEFAULT_KEY");
            std::env::remove_var("SMOOTHD_TEST_EMAIL_KEY");
        }
        assert_eq!(dispatch.default_credential(), None);
    }
}
