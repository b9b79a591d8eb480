//! Configuration for rudderd

use rudder_control::ControlPlaneConfig;
use rudder_dispatch::{RetryPolicy, DEFAULT_API_BASE};
use rudder_release::ReleaseConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub release: ReleaseSettings,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            request_timeout_secs: default_request_timeout(),
            enable_cors: true,
        }
    }
}

/// Task worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Workers pulling from the task queue
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Sleep between polls of an empty queue, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Time budget for one task, in seconds
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// Deliveries before a task is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before a failed or contended task is delivered again, in milliseconds
    #[serde(default = "default_requeue_delay")]
    pub requeue_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            task_timeout_secs: default_task_timeout(),
            max_attempts: default_max_attempts(),
            requeue_delay_ms: default_requeue_delay(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSettings {
    /// Newest ready versions considered per evaluation
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            candidate_limit: default_candidate_limit(),
        }
    }
}

/// Outbound execution backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Total attempts per outbound call
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_github_api_base")]
    pub github_api_base: String,

    /// Installation token used for every GitHub installation
    #[serde(default)]
    pub github_token: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            retry_attempts: default_retry_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            github_api_base: default_github_api_base(),
            github_token: None,
        }
    }
}

impl DispatchConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Workspace snapshot lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Base64 AES-256 key for sensitive variables; a random key is used when unset
    #[serde(default)]
    pub aes_key: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    250
}

fn default_task_timeout() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_requeue_delay() -> u64 {
    500
}

fn default_candidate_limit() -> usize {
    100
}

fn default_http_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    200
}

fn default_max_backoff() -> u64 {
    5_000
}

fn default_github_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `RUDDER_`
    /// environment variables (`RUDDER_WORKER__CONCURRENCY=8`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RUDDER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn control_plane(&self) -> ControlPlaneConfig {
        ControlPlaneConfig {
            release: ReleaseConfig {
                candidate_limit: self.release.candidate_limit,
            },
            cache_ttl: Duration::from_secs(self.cache.ttl_secs),
            requeue_delay: self.worker.requeue_delay(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.release.candidate_limit, 100);
        assert_eq!(config.worker.max_attempts, 5);
        assert_eq!(config.dispatch.github_api_base, "https://api.github.com");
        assert!(config.secrets.aes_key.is_none());
    }

    #[test]
    fn test_retry_policy_from_dispatch_settings() {
        let dispatch = DispatchConfig {
            retry_attempts: 0,
            initial_backoff_ms: 100,
            max_backoff_ms: 800,
            ..Default::default()
        };
        let policy = dispatch.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_millis(800));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("rudderd-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rudderd.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[worker]\nconcurrency = 9\ntask_timeout_secs = 5\n\n[cache]\nttl_secs = 10"
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        assert_eq!(config.worker.concurrency, 9);
        assert_eq!(config.worker.task_timeout(), Duration::from_secs(5));
        assert_eq!(config.control_plane().cache_ttl, Duration::from_secs(10));
        // Untouched sections keep their defaults
        assert_eq!(config.release.candidate_limit, 100);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_is_ignored() {
        let config = DaemonConfig::load(Some("/nonexistent/rudderd")).unwrap();
        assert_eq!(config.worker.concurrency, 4);
    }
}
