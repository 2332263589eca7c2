//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TtError};
use crate::daemon::notifications::NotificationConfig;

/// Full tracker configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub tracking: TrackingConfig,
    pub params: ParamsConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
    pub notifications: NotificationConfig,
    pub device: DeviceConfig,
    pub auth: AuthConfig,
    pub paths: PathsConfig,
}

/// Default values for the runtime-tunable tracking parameters.
///
/// These seed the parameter provider; a fetched parameter document can
/// override any of them while the tracker runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackingConfig {
    /// Radius in meters inside which a fix counts as "same place".
    pub min_distance_changed_m: f64,
    /// Upper bound on retained statuses per entity.
    pub max_statuses: usize,
    /// Requested interval between location fixes.
    pub location_request_interval_ms: u64,
    /// Fastest interval the host may deliver fixes at.
    pub location_request_interval_fastest_ms: u64,
    /// Local hour (0-23) at which tracking suspends itself; -1 disables.
    pub sleep_hour_of_day: i32,
    /// How long a quiet-hours suspension lasts before restart.
    pub sleep_hours_duration: f64,
}

/// Runtime parameter document and its cache policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ParamsConfig {
    /// JSON parameter document re-read on refresh. `None` = defaults only.
    pub source_file: Option<PathBuf>,
    /// Maximum age of fetched parameters before a refresh re-reads them.
    pub cache_expiry_secs: u64,
    /// Developer mode disables parameter caching entirely.
    pub developer_mode: bool,
}

/// Which remote store implementation backs the sync client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    File,
    Sqlite,
    Memory,
}

/// Remote store addressing and outbound queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub backend: RemoteBackend,
    /// Prefix joined with the entity id to form its remote path.
    pub base_path: String,
    /// Per-entity outbound queue capacity.
    pub outbound_queue_capacity: usize,
}

/// Activity log rotation and the debug status log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub jsonl_max_size_bytes: u64,
    pub jsonl_max_rotated_files: u32,
    pub jsonl_fsync_interval_secs: u64,
    pub channel_capacity: usize,
    /// Append every accepted status to a plain-text log.
    pub status_log_enabled: bool,
}

/// Battery and connectivity sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Fixed battery level instead of reading the power supply.
    pub battery_percent: Option<f64>,
    /// Fixed connectivity instead of inspecting network interfaces.
    pub assume_connected: Option<bool>,
    pub power_supply_dir: PathBuf,
    pub net_dir: PathBuf,
}

/// Credentials the tracker accepts at session start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Filesystem paths used by ttrack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
    pub status_log: PathBuf,
    pub lock_file: PathBuf,
    pub remote_dir: PathBuf,
    pub sqlite_db: PathBuf,
    pub restart_dir: PathBuf,
    pub notifications_log: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_distance_changed_m: 10.0,
            max_statuses: 20,
            location_request_interval_ms: 10_000,
            location_request_interval_fastest_ms: 5_000,
            sleep_hour_of_day: 2,
            sleep_hours_duration: 4.0,
        }
    }
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            source_file: None,
            cache_expiry_secs: 600,
            developer_mode: false,
        }
    }
}

impl ParamsConfig {
    /// Cache expiry actually applied (zero in developer mode).
    #[must_use]
    pub const fn effective_cache_expiry_secs(&self) -> u64 {
        if self.developer_mode {
            0
        } else {
            self.cache_expiry_secs
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::File,
            base_path: "transports/".to_string(),
            outbound_queue_capacity: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            jsonl_max_size_bytes: 20 * 1024 * 1024,
            jsonl_max_rotated_files: 5,
            jsonl_fsync_interval_secs: 30,
            channel_capacity: 1024,
            status_log_enabled: cfg!(debug_assertions),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            battery_percent: None,
            assume_connected: None,
            power_supply_dir: PathBuf::from("/sys/class/power_supply"),
            net_dir: PathBuf::from("/sys/class/net"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[TT-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("ttrack").join("config.toml");
        let mut paths = Self::under(&home_dir.join(".local").join("share").join("ttrack"));
        paths.config_file = cfg;
        paths
    }
}

impl PathsConfig {
    /// All data paths rooted at `data_dir`; `config_file` is left empty.
    #[must_use]
    pub fn under(data_dir: &Path) -> Self {
        Self {
            config_file: PathBuf::new(),
            jsonl_log: data_dir.join("activity.jsonl"),
            status_log: data_dir.join("status-log.txt"),
            lock_file: data_dir.join("tracking.lock"),
            remote_dir: data_dir.join("remote"),
            sqlite_db: data_dir.join("remote.sqlite3"),
            restart_dir: data_dir.join("restart"),
            notifications_log: data_dir.join("notifications.jsonl"),
        }
    }
}

impl RemoteConfig {
    /// Remote path addressing an entity's status list.
    #[must_use]
    pub fn entity_path(&self, entity_id: &str) -> String {
        format!("{}{entity_id}", self.base_path)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| TtError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(TtError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over canonical JSON, stable across processes and releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // Re-rooting comes first so explicit per-path settings can't be
        // silently clobbered by it later.
        if let Some(raw) = lookup("TT_DATA_DIR") {
            let config_file = std::mem::take(&mut self.paths.config_file);
            self.paths = PathsConfig::under(Path::new(&raw));
            self.paths.config_file = config_file;
        }

        // tracking
        if let Some(raw) = lookup("TT_TRACKING_MIN_DISTANCE_CHANGED_M") {
            self.tracking.min_distance_changed_m =
                parse_env("TT_TRACKING_MIN_DISTANCE_CHANGED_M", &raw)?;
        }
        if let Some(raw) = lookup("TT_TRACKING_MAX_STATUSES") {
            self.tracking.max_statuses = parse_env("TT_TRACKING_MAX_STATUSES", &raw)?;
        }
        if let Some(raw) = lookup("TT_TRACKING_LOCATION_REQUEST_INTERVAL_MS") {
            self.tracking.location_request_interval_ms =
                parse_env("TT_TRACKING_LOCATION_REQUEST_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("TT_TRACKING_LOCATION_REQUEST_INTERVAL_FASTEST_MS") {
            self.tracking.location_request_interval_fastest_ms =
                parse_env("TT_TRACKING_LOCATION_REQUEST_INTERVAL_FASTEST_MS", &raw)?;
        }
        if let Some(raw) = lookup("TT_TRACKING_SLEEP_HOUR_OF_DAY") {
            self.tracking.sleep_hour_of_day = parse_env("TT_TRACKING_SLEEP_HOUR_OF_DAY", &raw)?;
        }
        if let Some(raw) = lookup("TT_TRACKING_SLEEP_HOURS_DURATION") {
            self.tracking.sleep_hours_duration =
                parse_env("TT_TRACKING_SLEEP_HOURS_DURATION", &raw)?;
        }

        // params
        if let Some(raw) = lookup("TT_PARAMS_SOURCE_FILE") {
            self.params.source_file = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("TT_PARAMS_CACHE_EXPIRY_SECS") {
            self.params.cache_expiry_secs = parse_env("TT_PARAMS_CACHE_EXPIRY_SECS", &raw)?;
        }
        if let Some(raw) = lookup("TT_PARAMS_DEVELOPER_MODE") {
            self.params.developer_mode = parse_env("TT_PARAMS_DEVELOPER_MODE", &raw)?;
        }

        // remote
        if let Some(raw) = lookup("TT_REMOTE_BACKEND") {
            self.remote.backend = match raw.trim().to_ascii_lowercase().as_str() {
                "file" => RemoteBackend::File,
                "sqlite" => RemoteBackend::Sqlite,
                "memory" => RemoteBackend::Memory,
                other => {
                    return Err(TtError::ConfigParse {
                        context: "env",
                        details: format!("TT_REMOTE_BACKEND={other:?}: expected file|sqlite|memory"),
                    });
                }
            };
        }
        if let Some(raw) = lookup("TT_REMOTE_BASE_PATH") {
            self.remote.base_path = raw;
        }

        // logging
        if let Some(raw) = lookup("TT_LOGGING_STATUS_LOG_ENABLED") {
            self.logging.status_log_enabled = parse_env("TT_LOGGING_STATUS_LOG_ENABLED", &raw)?;
        }

        // device
        if let Some(raw) = lookup("TT_DEVICE_BATTERY_PERCENT") {
            self.device.battery_percent = Some(parse_env("TT_DEVICE_BATTERY_PERCENT", &raw)?);
        }
        if let Some(raw) = lookup("TT_DEVICE_ASSUME_CONNECTED") {
            self.device.assume_connected = Some(parse_env("TT_DEVICE_ASSUME_CONNECTED", &raw)?);
        }

        // auth
        if let Some(raw) = lookup("TT_AUTH_EMAIL") {
            self.auth.email = Some(raw);
        }
        if let Some(raw) = lookup("TT_AUTH_PASSWORD") {
            self.auth.password = Some(raw);
        }

        Ok(())
    }

    /// Ensure the remote base path ends with exactly one separator.
    fn normalize(&mut self) {
        let trimmed = self.remote.base_path.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            self.remote.base_path = format!("{trimmed}/");
        }
    }

    fn validate(&self) -> Result<()> {
        let t = &self.tracking;
        if !(t.min_distance_changed_m.is_finite() && t.min_distance_changed_m > 0.0) {
            return Err(TtError::InvalidConfig {
                details: format!(
                    "tracking.min_distance_changed_m must be > 0, got {}",
                    t.min_distance_changed_m
                ),
            });
        }
        if t.max_statuses == 0 {
            return Err(TtError::InvalidConfig {
                details: "tracking.max_statuses must be >= 1".to_string(),
            });
        }
        if t.location_request_interval_ms == 0 || t.location_request_interval_fastest_ms == 0 {
            return Err(TtError::InvalidConfig {
                details: "tracking location request intervals must be > 0".to_string(),
            });
        }
        if t.location_request_interval_fastest_ms > t.location_request_interval_ms {
            return Err(TtError::InvalidConfig {
                details: "tracking.location_request_interval_fastest_ms must be <= location_request_interval_ms"
                    .to_string(),
            });
        }
        if !(-1..=23).contains(&t.sleep_hour_of_day) {
            return Err(TtError::InvalidConfig {
                details: format!(
                    "tracking.sleep_hour_of_day must be in [-1, 23], got {}",
                    t.sleep_hour_of_day
                ),
            });
        }
        if !(t.sleep_hours_duration.is_finite()
            && t.sleep_hours_duration > 0.0
            && t.sleep_hours_duration <= 24.0)
        {
            return Err(TtError::InvalidConfig {
                details: format!(
                    "tracking.sleep_hours_duration must be in (0, 24], got {}",
                    t.sleep_hours_duration
                ),
            });
        }

        if self.remote.base_path.trim().is_empty() {
            return Err(TtError::InvalidConfig {
                details: "remote.base_path must not be empty".to_string(),
            });
        }
        if self.remote.outbound_queue_capacity == 0 {
            return Err(TtError::InvalidConfig {
                details: "remote.outbound_queue_capacity must be >= 1".to_string(),
            });
        }

        if self.logging.jsonl_max_size_bytes == 0 || self.logging.channel_capacity == 0 {
            return Err(TtError::InvalidConfig {
                details: "logging.jsonl_max_size_bytes and logging.channel_capacity must be > 0"
                    .to_string(),
            });
        }

        if let Some(pct) = self.device.battery_percent
            && !(0.0..=100.0).contains(&pct)
        {
            return Err(TtError::InvalidConfig {
                details: format!("device.battery_percent must be in [0, 100], got {pct}"),
            });
        }

        if self.auth.password.is_some() && self.auth.email.is_none() {
            return Err(TtError::InvalidConfig {
                details: "auth.password is set without auth.email".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| TtError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, RemoteBackend, TtError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let hash_before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.tracking.max_statuses += 1;
        let hash_after = modified.stable_hash().expect("hash should compute");
        assert_ne!(hash_before, hash_after);
    }

    #[test]
    fn stable_hash_deterministic() {
        let cfg = Config::default();
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());
    }

    #[test]
    fn zero_max_statuses_rejected() {
        let mut cfg = Config::default();
        cfg.tracking.max_statuses = 0;
        let err = cfg.validate().expect_err("expected max_statuses error");
        assert!(err.to_string().contains("max_statuses"));
    }

    #[test]
    fn non_positive_distance_rejected() {
        let mut cfg = Config::default();
        cfg.tracking.min_distance_changed_m = 0.0;
        assert!(cfg.validate().is_err());
        cfg.tracking.min_distance_changed_m = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fastest_interval_cannot_exceed_interval() {
        let mut cfg = Config::default();
        cfg.tracking.location_request_interval_fastest_ms =
            cfg.tracking.location_request_interval_ms + 1;
        let err = cfg.validate().expect_err("expected interval error");
        assert!(err.to_string().contains("fastest"));
    }

    #[test]
    fn sleep_hour_range_enforced() {
        let mut cfg = Config::default();
        cfg.tracking.sleep_hour_of_day = -1;
        assert!(cfg.validate().is_ok());
        cfg.tracking.sleep_hour_of_day = 24;
        let err = cfg.validate().expect_err("expected sleep hour error");
        assert!(err.to_string().contains("sleep_hour_of_day"));
    }

    #[test]
    fn sleep_duration_range_enforced() {
        let mut cfg = Config::default();
        cfg.tracking.sleep_hours_duration = 0.0;
        assert!(cfg.validate().is_err());
        cfg.tracking.sleep_hours_duration = 25.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn battery_override_range_enforced() {
        let mut cfg = Config::default();
        cfg.device.battery_percent = Some(101.0);
        let err = cfg.validate().expect_err("expected battery error");
        assert!(err.to_string().contains("battery_percent"));
    }

    #[test]
    fn developer_mode_disables_param_cache() {
        let mut cfg = Config::default();
        assert_eq!(cfg.params.effective_cache_expiry_secs(), 600);
        cfg.params.developer_mode = true;
        assert_eq!(cfg.params.effective_cache_expiry_secs(), 0);
    }

    #[test]
    fn env_overrides_tracking_and_remote() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("TT_TRACKING_MAX_STATUSES", "5"),
            ("TT_TRACKING_MIN_DISTANCE_CHANGED_M", "25.5"),
            ("TT_TRACKING_SLEEP_HOUR_OF_DAY", "-1"),
            ("TT_REMOTE_BACKEND", "Memory"),
            ("TT_REMOTE_BASE_PATH", "fleet"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");
        cfg.normalize();

        assert_eq!(cfg.tracking.max_statuses, 5);
        assert!((cfg.tracking.min_distance_changed_m - 25.5).abs() < f64::EPSILON);
        assert_eq!(cfg.tracking.sleep_hour_of_day, -1);
        assert_eq!(cfg.remote.backend, RemoteBackend::Memory);
        assert_eq!(cfg.remote.entity_path("bus-7"), "fleet/bus-7");
    }

    #[test]
    fn env_data_dir_reroots_paths_but_keeps_config_file() {
        let mut cfg = Config::default();
        cfg.paths.config_file = PathBuf::from("/etc/ttrack.toml");
        let overrides = vars(&[("TT_DATA_DIR", "/var/lib/ttrack")]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .unwrap();
        assert_eq!(cfg.paths.config_file, PathBuf::from("/etc/ttrack.toml"));
        assert_eq!(
            cfg.paths.jsonl_log,
            PathBuf::from("/var/lib/ttrack/activity.jsonl")
        );
        assert_eq!(cfg.paths.remote_dir, PathBuf::from("/var/lib/ttrack/remote"));
    }

    #[test]
    fn env_invalid_values_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("TT_TRACKING_MAX_STATUSES", "many")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid usize should fail");
        match err {
            TtError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("TT_TRACKING_MAX_STATUSES"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let overrides = vars(&[("TT_REMOTE_BACKEND", "firebase")]);
        assert!(
            cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
                .is_err()
        );
    }

    #[test]
    fn base_path_normalized_to_single_trailing_slash() {
        let mut cfg = Config::default();
        cfg.remote.base_path = " transports// ".to_string();
        cfg.normalize();
        assert_eq!(cfg.remote.base_path, "transports/");
    }

    #[test]
    fn toml_sections_parse_with_partial_overrides() {
        let raw = r#"
            [tracking]
            max_statuses = 7
            sleep_hour_of_day = 23

            [remote]
            backend = "sqlite"
        "#;
        let cfg: Config = toml::from_str(raw).expect("toml should parse");
        assert_eq!(cfg.tracking.max_statuses, 7);
        assert_eq!(cfg.tracking.sleep_hour_of_day, 23);
        assert!((cfg.tracking.min_distance_changed_m - 10.0).abs() < f64::EPSILON);
        assert_eq!(cfg.remote.backend, RemoteBackend::Sqlite);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/ttrack/config.toml")));
        assert!(matches!(result, Err(TtError::MissingConfig { .. })));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tracking]\nmax_statuses = 3\n").unwrap();
        let cfg = Config::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.tracking.max_statuses, 3);
        assert_eq!(cfg.paths.config_file, path);
    }
}
