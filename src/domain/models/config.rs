use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key in `max_retries_by_type` used for worker types without their own limit.
pub const DEFAULT_RETRY_KEY: &str = "default";

/// Main configuration structure for Warden
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Token ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Zombie detection and cleanup configuration
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Restart policy configuration
    #[serde(default)]
    pub restart: RestartConfig,

    /// On-disk locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Token ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LedgerConfig {
    /// Total token budget shared by all workers
    #[serde(default = "default_total_budget")]
    pub total_budget: u64,

    /// Maximum wait for the exclusive ledger lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Age after which a held allocation is force-reclaimed
    #[serde(default = "default_stale_timeout_seconds")]
    pub stale_timeout_seconds: u64,

    /// How often the reclamation loop runs
    #[serde(default = "default_reclaim_interval_seconds")]
    pub reclaim_interval_seconds: u64,
}

const fn default_total_budget() -> u64 {
    100_000
}

const fn default_lock_timeout_ms() -> u64 {
    3000
}

const fn default_stale_timeout_seconds() -> u64 {
    3600
}

const fn default_reclaim_interval_seconds() -> u64 {
    300
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            total_budget: default_total_budget(),
            lock_timeout_ms: default_lock_timeout_ms(),
            stale_timeout_seconds: default_stale_timeout_seconds(),
            reclaim_interval_seconds: default_reclaim_interval_seconds(),
        }
    }
}

/// Zombie detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DetectorConfig {
    /// Heartbeat silence after which a worker is a zombie
    #[serde(default = "default_zombie_threshold_seconds")]
    pub zombie_threshold_seconds: u64,

    /// Debounce delay before re-checking a suspected zombie
    #[serde(default = "default_verification_delay_seconds")]
    pub verification_delay_seconds: u64,

    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_graceful_shutdown_timeout_seconds")]
    pub graceful_shutdown_timeout_seconds: u64,

    /// Cleanups allowed per one-minute window
    #[serde(default = "default_max_cleanups_per_minute")]
    pub max_cleanups_per_minute: u32,

    /// How often the liveness loop scans active workers
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,

    /// Upper bound on cleanups processed concurrently per scan
    #[serde(default = "default_max_concurrent_cleanups")]
    pub max_concurrent_cleanups: usize,
}

const fn default_zombie_threshold_seconds() -> u64 {
    300
}

const fn default_verification_delay_seconds() -> u64 {
    2
}

const fn default_graceful_shutdown_timeout_seconds() -> u64 {
    30
}

const fn default_max_cleanups_per_minute() -> u32 {
    5
}

const fn default_check_interval_seconds() -> u64 {
    60
}

const fn default_max_concurrent_cleanups() -> usize {
    4
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            zombie_threshold_seconds: default_zombie_threshold_seconds(),
            verification_delay_seconds: default_verification_delay_seconds(),
            graceful_shutdown_timeout_seconds: default_graceful_shutdown_timeout_seconds(),
            max_cleanups_per_minute: default_max_cleanups_per_minute(),
            check_interval_seconds: default_check_interval_seconds(),
            max_concurrent_cleanups: default_max_concurrent_cleanups(),
        }
    }
}

/// Restart policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RestartConfig {
    /// Whether replacements are scheduled at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub rate_limits: RestartRateLimits,

    /// Per worker type retry limits; `default` applies to unlisted types
    #[serde(default = "default_max_retries_by_type")]
    pub max_retries_by_type: BTreeMap<String, u32>,
}

const fn default_true() -> bool {
    true
}

fn default_max_retries_by_type() -> BTreeMap<String, u32> {
    BTreeMap::from([(DEFAULT_RETRY_KEY.to_string(), 3)])
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backoff: BackoffConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            rate_limits: RestartRateLimits::default(),
            max_retries_by_type: default_max_retries_by_type(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_seconds")]
    pub base_delay_seconds: u64,

    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,
}

const fn default_base_delay_seconds() -> u64 {
    5
}

const fn default_max_delay_seconds() -> u64 {
    60
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: default_base_delay_seconds(),
            max_delay_seconds: default_max_delay_seconds(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Failures within the window that trip the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_failure_window_seconds")]
    pub failure_window_seconds: u64,

    /// Time an open breaker stays open
    #[serde(default = "default_reset_timeout_seconds")]
    pub reset_timeout_seconds: u64,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_failure_window_seconds() -> u64 {
    600
}

const fn default_reset_timeout_seconds() -> u64 {
    300
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            failure_window_seconds: default_failure_window_seconds(),
            reset_timeout_seconds: default_reset_timeout_seconds(),
        }
    }
}

/// Restart rate limits per one-minute window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RestartRateLimits {
    #[serde(default = "default_global_max_per_minute")]
    pub global_max_per_minute: u32,

    #[serde(default = "default_per_type_max_per_minute")]
    pub per_type_max_per_minute: u32,
}

const fn default_global_max_per_minute() -> u32 {
    10
}

const fn default_per_type_max_per_minute() -> u32 {
    3
}

impl Default for RestartRateLimits {
    fn default() -> Self {
        Self {
            global_max_per_minute: default_global_max_per_minute(),
            per_type_max_per_minute: default_per_type_max_per_minute(),
        }
    }
}

/// On-disk locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// Root for ledger, worker records, breakers, restart queue and events
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Where workers write their logs
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Dated archive of cleaned-up workers
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,

    /// Worker pid files
    #[serde(default = "default_pid_dir")]
    pub pid_dir: String,
}

fn default_state_dir() -> String {
    ".warden/state".to_string()
}

fn default_log_dir() -> String {
    ".warden/logs".to_string()
}

fn default_archive_dir() -> String {
    ".warden/archive".to_string()
}

fn default_pid_dir() -> String {
    ".warden/pids".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            log_dir: default_log_dir(),
            archive_dir: default_archive_dir(),
            pid_dir: default_pid_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Also log to the terminal when file logging is on
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stdout: true,
            rotation: default_rotation(),
        }
    }
}
