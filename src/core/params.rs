//! Runtime-tunable tracking parameters with a bounded cache lifetime.
//!
//! Defaults come from the static `[tracking]` config section. A parameter
//! document (JSON object keyed by the remote-config names) may override any
//! subset of them; it is re-fetched only when the cached copy is older than
//! the caller-supplied maximum age. A failed or invalid fetch keeps the
//! last-known-good values and never blocks the caller.

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use crate::core::config::{Config, TrackingConfig};
use crate::core::errors::{Result, TtError};

// ──────────────────── keys ────────────────────

/// Parameter names as they appear in the parameter document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    MinDistanceChanged,
    MaxStatuses,
    LocationRequestInterval,
    LocationRequestIntervalFastest,
    SleepHourOfDay,
    SleepHoursDuration,
}

impl ParamKey {
    pub const ALL: [Self; 6] = [
        Self::MinDistanceChanged,
        Self::MaxStatuses,
        Self::LocationRequestInterval,
        Self::LocationRequestIntervalFastest,
        Self::SleepHourOfDay,
        Self::SleepHoursDuration,
    ];

    #[must_use]
    pub const fn remote_name(self) -> &'static str {
        match self {
            Self::MinDistanceChanged => "LOCATION_MIN_DISTANCE_CHANGED",
            Self::MaxStatuses => "MAX_STATUSES",
            Self::LocationRequestInterval => "LOCATION_REQUEST_INTERVAL",
            Self::LocationRequestIntervalFastest => "LOCATION_REQUEST_INTERVAL_FASTEST",
            Self::SleepHourOfDay => "SLEEP_HOUR_OF_DAY",
            Self::SleepHoursDuration => "SLEEP_HOURS_DURATION",
        }
    }

    #[must_use]
    pub fn from_remote_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.remote_name() == name)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.remote_name())
    }
}

/// A single parameter value as returned by [`ParamsProvider::get`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

// ──────────────────── typed snapshot ────────────────────

/// Typed view of every parameter the controller consumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackingParams {
    pub min_distance_changed_m: f64,
    pub max_statuses: usize,
    pub location_request_interval_ms: u64,
    pub location_request_interval_fastest_ms: u64,
    /// `None` disables quiet hours.
    pub sleep_hour_of_day: Option<u32>,
    pub sleep_hours_duration: f64,
}

impl TrackingParams {
    #[must_use]
    pub fn from_config(cfg: &TrackingConfig) -> Self {
        Self {
            min_distance_changed_m: cfg.min_distance_changed_m,
            max_statuses: cfg.max_statuses,
            location_request_interval_ms: cfg.location_request_interval_ms,
            location_request_interval_fastest_ms: cfg.location_request_interval_fastest_ms,
            sleep_hour_of_day: u32::try_from(cfg.sleep_hour_of_day).ok(),
            sleep_hours_duration: cfg.sleep_hours_duration,
        }
    }

    #[must_use]
    pub fn get(&self, key: ParamKey) -> ParamValue {
        match key {
            ParamKey::MinDistanceChanged => ParamValue::Float(self.min_distance_changed_m),
            ParamKey::MaxStatuses => {
                ParamValue::Int(i64::try_from(self.max_statuses).unwrap_or(i64::MAX))
            }
            ParamKey::LocationRequestInterval => {
                ParamValue::Int(i64::try_from(self.location_request_interval_ms).unwrap_or(i64::MAX))
            }
            ParamKey::LocationRequestIntervalFastest => ParamValue::Int(
                i64::try_from(self.location_request_interval_fastest_ms).unwrap_or(i64::MAX),
            ),
            ParamKey::SleepHourOfDay => {
                ParamValue::Int(self.sleep_hour_of_day.map_or(-1, i64::from))
            }
            ParamKey::SleepHoursDuration => ParamValue::Float(self.sleep_hours_duration),
        }
    }

    /// Whether `hour` (local, 0-23) is the configured quiet hour.
    #[must_use]
    pub fn is_quiet_hour(&self, hour: u32) -> bool {
        self.sleep_hour_of_day == Some(hour)
    }

    /// Delay before a quiet-hours suspension restarts tracking.
    #[must_use]
    pub fn quiet_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_hours_duration.clamp(0.0, 24.0) * 3600.0)
    }

    /// Overlay a parameter document on top of `self`.
    ///
    /// Unknown keys are ignored. Values may be JSON numbers or numeric
    /// strings. The merged result must pass validation as a whole.
    pub fn overlay(&self, document: &Value) -> Result<Self> {
        let Value::Object(map) = document else {
            return Err(TtError::ParamsFetch {
                details: "parameter document is not a JSON object".to_string(),
            });
        };

        let mut next = *self;
        for (name, raw) in map {
            let Some(key) = ParamKey::from_remote_name(name) else {
                continue;
            };
            let value = numeric(raw).ok_or_else(|| TtError::ParamsFetch {
                details: format!("{name} is not numeric: {raw}"),
            })?;
            next.set(key, value)?;
        }
        next.validate()?;
        Ok(next)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::float_cmp
    )]
    fn set(&mut self, key: ParamKey, value: f64) -> Result<()> {
        let integral = |v: f64| -> Result<i64> {
            if v.fract() == 0.0 && v.abs() < 9.0e15 {
                Ok(v as i64)
            } else {
                Err(TtError::ParamsFetch {
                    details: format!("{key} must be an integer, got {v}"),
                })
            }
        };
        let non_negative = |v: i64| -> Result<u64> {
            u64::try_from(v).map_err(|_| TtError::ParamsFetch {
                details: format!("{key} must be >= 0, got {v}"),
            })
        };

        match key {
            ParamKey::MinDistanceChanged => self.min_distance_changed_m = value,
            ParamKey::MaxStatuses => {
                self.max_statuses = usize::try_from(non_negative(integral(value)?)?)
                    .unwrap_or(usize::MAX);
            }
            ParamKey::LocationRequestInterval => {
                self.location_request_interval_ms = non_negative(integral(value)?)?;
            }
            ParamKey::LocationRequestIntervalFastest => {
                self.location_request_interval_fastest_ms = non_negative(integral(value)?)?;
            }
            ParamKey::SleepHourOfDay => {
                let hour = integral(value)?;
                self.sleep_hour_of_day = if hour < 0 {
                    None
                } else {
                    Some(u32::try_from(hour).unwrap_or(u32::MAX))
                };
            }
            ParamKey::SleepHoursDuration => self.sleep_hours_duration = value,
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let reject = |details: String| -> Result<()> { Err(TtError::ParamsFetch { details }) };
        if !(self.min_distance_changed_m.is_finite() && self.min_distance_changed_m > 0.0) {
            return reject(format!(
                "LOCATION_MIN_DISTANCE_CHANGED must be > 0, got {}",
                self.min_distance_changed_m
            ));
        }
        if self.max_statuses == 0 {
            return reject("MAX_STATUSES must be >= 1".to_string());
        }
        if self.location_request_interval_ms == 0
            || self.location_request_interval_fastest_ms == 0
        {
            return reject("location request intervals must be > 0".to_string());
        }
        if let Some(hour) = self.sleep_hour_of_day
            && hour > 23
        {
            return reject(format!("SLEEP_HOUR_OF_DAY must be in [-1, 23], got {hour}"));
        }
        if !(self.sleep_hours_duration.is_finite()
            && self.sleep_hours_duration > 0.0
            && self.sleep_hours_duration <= 24.0)
        {
            return reject(format!(
                "SLEEP_HOURS_DURATION must be in (0, 24], got {}",
                self.sleep_hours_duration
            ));
        }
        Ok(())
    }
}

fn numeric(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

// ──────────────────── sources ────────────────────

/// Where parameter documents come from.
pub trait ParamsSource: Send + Sync {
    /// Fetch the current document. `Ok(None)` means no overrides exist.
    fn fetch(&self) -> Result<Option<Value>>;

    fn describe(&self) -> String;
}

impl<T: ParamsSource + ?Sized> ParamsSource for Arc<T> {
    fn fetch(&self) -> Result<Option<Value>> {
        (**self).fetch()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Reads a JSON document from disk on every fetch.
#[derive(Debug, Clone)]
pub struct FileParamsSource {
    path: PathBuf,
}

impl FileParamsSource {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParamsSource for FileParamsSource {
    fn fetch(&self) -> Result<Option<Value>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| TtError::io(&self.path, source))?;
        let doc: Value = serde_json::from_str(&raw).map_err(|error| TtError::ParamsFetch {
            details: format!("{}: {error}", self.path.display()),
        })?;
        Ok(Some(doc))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// In-process document holder; also counts fetches.
#[derive(Debug, Default)]
pub struct MemoryParamsSource {
    document: Mutex<Option<std::result::Result<Value, String>>>,
    fetches: Mutex<u64>,
}

impl MemoryParamsSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_document(&self, document: Value) {
        *self.document.lock() = Some(Ok(document));
    }

    /// Make subsequent fetches fail with `reason`.
    pub fn set_failing(&self, reason: impl Into<String>) {
        *self.document.lock() = Some(Err(reason.into()));
    }

    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        *self.fetches.lock()
    }
}

impl ParamsSource for MemoryParamsSource {
    fn fetch(&self) -> Result<Option<Value>> {
        *self.fetches.lock() += 1;
        match &*self.document.lock() {
            None => Ok(None),
            Some(Ok(doc)) => Ok(Some(doc.clone())),
            Some(Err(reason)) => Err(TtError::ParamsFetch {
                details: reason.clone(),
            }),
        }
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ──────────────────── provider ────────────────────

/// Result of a [`ParamsProvider::refresh`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Cached values are younger than the requested maximum age.
    Cached,
    /// A document was fetched and applied (values may be unchanged).
    Applied { changed: bool },
    /// No source is configured, defaults stay in effect.
    NoSource,
    /// Fetch or validation failed; last-known-good values remain.
    Failed { details: String },
}

impl RefreshOutcome {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

struct ParamsState {
    current: TrackingParams,
    fetched_at: Option<Instant>,
}

/// Shared, concurrently readable parameter provider.
pub struct ParamsProvider {
    defaults: TrackingParams,
    source: Option<Box<dyn ParamsSource>>,
    state: RwLock<ParamsState>,
}

impl fmt::Debug for ParamsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamsProvider")
            .field("defaults", &self.defaults)
            .field("source", &self.source.as_ref().map(|s| s.describe()))
            .field("current", &self.state.read().current)
            .finish()
    }
}

impl ParamsProvider {
    #[must_use]
    pub fn new(defaults: TrackingParams, source: Option<Box<dyn ParamsSource>>) -> Self {
        Self {
            defaults,
            source,
            state: RwLock::new(ParamsState {
                current: defaults,
                fetched_at: None,
            }),
        }
    }

    /// Provider seeded from `[tracking]` with the `[params]` file source.
    #[must_use]
    pub fn from_config(cfg: &Config) -> Self {
        let source = cfg
            .params
            .source_file
            .clone()
            .map(|path| Box::new(FileParamsSource::new(path)) as Box<dyn ParamsSource>);
        Self::new(TrackingParams::from_config(&cfg.tracking), source)
    }

    #[must_use]
    pub fn get(&self, key: ParamKey) -> ParamValue {
        self.state.read().current.get(key)
    }

    #[must_use]
    pub fn snapshot(&self) -> TrackingParams {
        self.state.read().current
    }

    #[must_use]
    pub const fn defaults(&self) -> &TrackingParams {
        &self.defaults
    }

    /// Re-fetch the parameter document if the cached one is older than
    /// `max_age`. Never returns an error; failures keep the current values.
    pub fn refresh(&self, max_age: Duration) -> RefreshOutcome {
        let Some(source) = self.source.as_ref() else {
            return RefreshOutcome::NoSource;
        };

        if let Some(at) = self.state.read().fetched_at
            && at.elapsed() < max_age
        {
            return RefreshOutcome::Cached;
        }

        // Overlay on defaults, not on current, so a key removed from the
        // document reverts to its default.
        let fetched = source.fetch().and_then(|doc| match doc {
            Some(doc) => self.defaults.overlay(&doc),
            None => Ok(self.defaults),
        });

        match fetched {
            Ok(next) => {
                let mut state = self.state.write();
                let changed = state.current != next;
                state.current = next;
                state.fetched_at = Some(Instant::now());
                drop(state);
                if changed {
                    eprintln!(
                        "[TT-PARAMS] applied parameters from {}: {next:?}",
                        source.describe()
                    );
                }
                RefreshOutcome::Applied { changed }
            }
            Err(error) => {
                eprintln!(
                    "[TT-PARAMS] refresh from {} failed, keeping last-known-good: {error}",
                    source.describe()
                );
                RefreshOutcome::Failed {
                    details: error.to_string(),
                }
            }
        }
    }

    /// Refresh ignoring the cache age.
    pub fn force_refresh(&self) -> RefreshOutcome {
        self.refresh(Duration::ZERO)
    }
}
