//! Service configuration.
//!
//! All data paths are relative to `sync.repo_path` unless absolute, so a
//! single setting moves the whole working tree.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use atmolog_types::channels;

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub history: HistoryConfig,
    pub schedule: ScheduleConfig,
    pub sync: SyncSection,
    pub lock: LockConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if there is none.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate every section, collecting all problems.
    ///
    /// ```
    /// use atmolog_service::Config;
    ///
    /// Config::default().validate().expect("defaults are valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.device.validate());
        errors.extend(self.history.validate());
        errors.extend(self.schedule.validate());
        errors.extend(self.sync.validate());
        errors.extend(self.lock.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve a configured path against the repository root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.sync.repo_path.join(path)
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.resolve(&self.history.path)
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.resolve(&self.schedule.path)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.resolve(&self.schedule.ledger_path)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.resolve(&self.lock.path)
    }

    /// Local-authoritative files, relative to the repository root.
    ///
    /// Files outside the repository cannot be published and are left out.
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        [self.history_path(), self.ledger_path()]
            .into_iter()
            .filter_map(|p| p.strip_prefix(&self.sync.repo_path).ok().map(Path::to_path_buf))
            .collect()
    }
}

/// Device connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Host name or IP address of the controller.
    pub address: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub read_channels: Vec<String>,
    pub setpoint_channels: Vec<String>,
    /// Key that reports the operating mode.
    pub mode_key: String,
}

/// Maximum per-request device timeout in seconds.
pub const MAX_DEVICE_TIMEOUT: u64 = 300;

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: "192.168.100.100".to_string(),
            port: 80,
            timeout_secs: 5,
            read_channels: channels::DEFAULT_READINGS.map(String::from).to_vec(),
            setpoint_channels: channels::DEFAULT_SETPOINTS.map(String::from).to_vec(),
            mode_key: channels::MODE.to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Apply a `host` or `host:port` override.
    pub fn set_endpoint(&mut self, endpoint: &str) {
        match endpoint.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse() {
                Ok(port) => {
                    self.address = host.to_string();
                    self.port = port;
                }
                Err(_) => self.address = endpoint.to_string(),
            },
            _ => self.address = endpoint.to_string(),
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.address.trim().is_empty() {
            errors.push(ValidationError::new(
                "device.address",
                "device address cannot be empty",
            ));
        } else if self.address.contains("://") || self.address.contains('/') {
            errors.push(ValidationError::new(
                "device.address",
                format!(
                    "invalid device address '{}': expected a host name or IP, without scheme or path",
                    self.address
                ),
            ));
        }

        if self.port == 0 {
            errors.push(ValidationError::new("device.port", "port cannot be 0"));
        }

        if self.timeout_secs == 0 || self.timeout_secs > MAX_DEVICE_TIMEOUT {
            errors.push(ValidationError::new(
                "device.timeout_secs",
                format!(
                    "timeout {} is out of range (1-{} seconds)",
                    self.timeout_secs, MAX_DEVICE_TIMEOUT
                ),
            ));
        }

        for (field, names) in [
            ("device.read_channels", &self.read_channels),
            ("device.setpoint_channels", &self.setpoint_channels),
        ] {
            if names.iter().any(|n| n.trim().is_empty()) {
                errors.push(ValidationError::new(field, "channel names cannot be empty"));
            }
        }

        if self.mode_key.trim().is_empty() {
            errors.push(ValidationError::new(
                "device.mode_key",
                "mode key cannot be empty",
            ));
        }

        errors
    }
}

/// History file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: PathBuf,
    /// Retention window in hours.
    pub max_age_hours: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/log/incubator_history.json"),
            max_age_hours: 3.0,
        }
    }
}

impl HistoryConfig {
    pub fn max_age(&self) -> time::Duration {
        time::Duration::saturating_seconds_f64(self.max_age_hours * 3600.0)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "history.path",
                "history path cannot be empty",
            ));
        }
        if !self.max_age_hours.is_finite() || self.max_age_hours <= 0.0 {
            errors.push(ValidationError::new(
                "history.max_age_hours",
                format!("max age {} must be a positive number", self.max_age_hours),
            ));
        } else if self.max_age_hours > MAX_AGE_HOURS {
            errors.push(ValidationError::new(
                "history.max_age_hours",
                format!(
                    "max age {} is too long (maximum {} hours)",
                    self.max_age_hours, MAX_AGE_HOURS
                ),
            ));
        }

        errors
    }
}

/// Longest retention window accepted, one year.
pub const MAX_AGE_HOURS: f64 = 24.0 * 366.0;

/// Schedule settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub path: PathBuf,
    /// Where executed entry identities are persisted.
    pub ledger_path: PathBuf,
    /// Tolerance window in seconds.
    pub tolerance_secs: u64,
    /// Cadence of continuous mode in seconds.
    pub check_interval_secs: u64,
    /// How long executed identities are kept, in days.
    pub ledger_retention_days: u64,
}

/// Minimum check interval in seconds.
pub const MIN_CHECK_INTERVAL: u64 = 10;
/// Maximum check interval in seconds (1 hour).
pub const MAX_CHECK_INTERVAL: u64 = 3600;
/// Longest ledger retention accepted, ten years.
pub const MAX_LEDGER_RETENTION_DAYS: u64 = 3650;

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/schedules/setpoint_schedule.json"),
            ledger_path: PathBuf::from("data/schedules/executed.json"),
            tolerance_secs: 60,
            check_interval_secs: 60,
            ledger_retention_days: 7,
        }
    }
}

impl ScheduleConfig {
    pub fn tolerance(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.tolerance_secs).unwrap_or(i64::MAX))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn ledger_retention(&self) -> time::Duration {
        let days = i64::try_from(self.ledger_retention_days).unwrap_or(i64::MAX);
        time::Duration::seconds(days.saturating_mul(86_400))
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "schedule.path",
                "schedule path cannot be empty",
            ));
        }
        if self.ledger_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "schedule.ledger_path",
                "ledger path cannot be empty",
            ));
        }

        if self.tolerance_secs == 0 {
            errors.push(ValidationError::new(
                "schedule.tolerance_secs",
                "tolerance must be at least 1 second",
            ));
        }

        if self.check_interval_secs < MIN_CHECK_INTERVAL {
            errors.push(ValidationError::new(
                "schedule.check_interval_secs",
                format!(
                    "check interval {} is too short (minimum {} seconds)",
                    self.check_interval_secs, MIN_CHECK_INTERVAL
                ),
            ));
        } else if self.check_interval_secs > MAX_CHECK_INTERVAL {
            errors.push(ValidationError::new(
                "schedule.check_interval_secs",
                format!(
                    "check interval {} is too long (maximum {} seconds / 1 hour)",
                    self.check_interval_secs, MAX_CHECK_INTERVAL
                ),
            ));
        }

        if self.ledger_retention_days > MAX_LEDGER_RETENTION_DAYS {
            errors.push(ValidationError::new(
                "schedule.ledger_retention_days",
                format!(
                    "ledger retention {} is too long (maximum {} days)",
                    self.ledger_retention_days, MAX_LEDGER_RETENTION_DAYS
                ),
            ));
        } else if self.ledger_retention() < self.tolerance() {
            errors.push(ValidationError::new(
                "schedule.ledger_retention_days",
                "ledger retention must not be shorter than the tolerance window",
            ));
        }

        errors
    }
}

/// Versioned-store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Publish after each cycle.
    pub enabled: bool,
    /// Root of the git checkout holding the data files.
    pub repo_path: PathBuf,
    pub remote: String,
    pub branch: String,
    pub max_push_retries: u32,
    pub command_timeout_secs: u64,
    /// Private key passed to ssh for this repository only.
    pub ssh_key: Option<PathBuf>,
}

/// Upper bound on push retries.
pub const MAX_PUSH_RETRIES: u32 = 10;

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_path: atmolog_store::default_data_dir(),
            remote: "origin".to_string(),
            branch: "main".to_string(),
            max_push_retries: atmolog_sync::DEFAULT_MAX_PUSH_RETRIES,
            command_timeout_secs: atmolog_sync::DEFAULT_COMMAND_TIMEOUT.as_secs(),
            ssh_key: None,
        }
    }
}

impl SyncSection {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.repo_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "sync.repo_path",
                "repository path cannot be empty",
            ));
        }
        if !self.enabled {
            return errors;
        }

        if self.remote.trim().is_empty() {
            errors.push(ValidationError::new("sync.remote", "remote cannot be empty"));
        }
        if self.branch.trim().is_empty() {
            errors.push(ValidationError::new("sync.branch", "branch cannot be empty"));
        }
        if self.max_push_retries > MAX_PUSH_RETRIES {
            errors.push(ValidationError::new(
                "sync.max_push_retries",
                format!(
                    "{} push retries is too many (maximum {})",
                    self.max_push_retries, MAX_PUSH_RETRIES
                ),
            ));
        }
        if self.command_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "sync.command_timeout_secs",
                "command timeout must be at least 1 second",
            ));
        }
        if let Some(key) = &self.ssh_key
            && key.as_os_str().is_empty()
        {
            errors.push(ValidationError::new(
                "sync.ssh_key",
                "ssh key cannot be empty string (omit it instead)",
            ));
        }

        errors
    }
}

/// Working-tree lock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub path: PathBuf,
    /// How long to wait for another invocation to finish.
    pub wait_secs: u64,
    /// Age after which a lock file is considered abandoned.
    pub stale_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".atmolog.lock"),
            wait_secs: 120,
            stale_secs: 900,
        }
    }
}

impl LockConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_secs)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new("lock.path", "lock path cannot be empty"));
        }
        if self.stale_secs <= self.wait_secs {
            errors.push(ValidationError::new(
                "lock.stale_secs",
                format!(
                    "stale threshold {}s must exceed the wait time {}s",
                    self.stale_secs, self.wait_secs
                ),
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `device.port`).
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("atmolog")
        .join("atmolog.toml")
}
