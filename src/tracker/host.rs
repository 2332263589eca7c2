//! Facilities the lifecycle host supplies to the controller: device state,
//! authentication, and the keep-alive resource held while tracking.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::core::config::{AuthConfig, DeviceConfig};
use crate::core::errors::{Result, TtError};

// ──────────────────── device state ────────────────────

pub trait DeviceState: Send + Sync {
    /// Battery charge, 0-100.
    fn battery_percent(&self) -> f64;

    fn is_connected(&self) -> bool;
}

/// Values set by hand.
#[derive(Debug)]
pub struct FixedDevice {
    battery: Mutex<f64>,
    connected: AtomicBool,
}

impl FixedDevice {
    #[must_use]
    pub fn new(battery_percent: f64, connected: bool) -> Self {
        Self {
            battery: Mutex::new(battery_percent),
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set_battery(&self, percent: f64) {
        *self.battery.lock() = percent;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

impl DeviceState for FixedDevice {
    fn battery_percent(&self) -> f64 {
        *self.battery.lock()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Reads battery and link state from sysfs.
///
/// A host without a battery reports 100. A host whose interface directory
/// cannot be read is treated as connected. Configured overrides win.
#[derive(Debug, Clone)]
pub struct SysfsDevice {
    power_supply_dir: PathBuf,
    net_dir: PathBuf,
    battery_override: Option<f64>,
    connected_override: Option<bool>,
}

impl SysfsDevice {
    #[must_use]
    pub fn from_config(cfg: &DeviceConfig) -> Self {
        Self {
            power_supply_dir: cfg.power_supply_dir.clone(),
            net_dir: cfg.net_dir.clone(),
            battery_override: cfg.battery_percent,
            connected_override: cfg.assume_connected,
        }
    }

    fn read_trimmed(path: &Path) -> Option<String> {
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    fn sysfs_battery(&self) -> Option<f64> {
        let entries = fs::read_dir(&self.power_supply_dir).ok()?;
        let mut levels: Vec<f64> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|dir| Self::read_trimmed(&dir.join("type")).as_deref() == Some("Battery"))
            .filter_map(|dir| Self::read_trimmed(&dir.join("capacity"))?.parse::<f64>().ok())
            .collect();
        levels.sort_by(f64::total_cmp);
        levels.first().copied()
    }

    fn sysfs_connected(&self) -> Option<bool> {
        let entries = fs::read_dir(&self.net_dir).ok()?;
        Some(
            entries
                .filter_map(std::result::Result::ok)
                .filter(|entry| entry.file_name() != "lo")
                .any(|entry| {
                    Self::read_trimmed(&entry.path().join("operstate")).as_deref() == Some("up")
                }),
        )
    }
}

impl DeviceState for SysfsDevice {
    fn battery_percent(&self) -> f64 {
        self.battery_override
            .or_else(|| self.sysfs_battery())
            .unwrap_or(100.0)
            .clamp(0.0, 100.0)
    }

    fn is_connected(&self) -> bool {
        self.connected_override
            .or_else(|| self.sysfs_connected())
            .unwrap_or(true)
    }
}

// ──────────────────── authentication ────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait Authenticator: Send + Sync {
    /// Ok if `credentials` may track `entity_id`.
    fn authenticate(&self, entity_id: &str, credentials: &Credentials) -> Result<()>;
}

fn digest(secret: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(secret.as_bytes()));
    out
}

/// Checks credentials against the `[auth]` section. Passwords are kept and
/// compared as SHA-256 digests.
pub struct SharedSecretAuthenticator {
    email: Option<String>,
    password_digest: Option<[u8; 32]>,
}

impl SharedSecretAuthenticator {
    #[must_use]
    pub fn from_config(cfg: &AuthConfig) -> Self {
        Self {
            email: cfg.email.clone(),
            password_digest: cfg.password.as_deref().map(digest),
        }
    }
}

impl Authenticator for SharedSecretAuthenticator {
    fn authenticate(&self, entity_id: &str, credentials: &Credentials) -> Result<()> {
        let fail = |details: &str| TtError::AuthFailed {
            entity_id: entity_id.to_string(),
            details: details.to_string(),
        };
        if credentials.email.trim().is_empty() {
            return Err(fail("email is empty"));
        }
        if let Some(expected) = &self.email
            && !expected.eq_ignore_ascii_case(credentials.email.trim())
        {
            return Err(fail("unknown account"));
        }
        if let Some(expected) = &self.password_digest
            && digest(&credentials.password) != *expected
        {
            return Err(fail("wrong password"));
        }
        Ok(())
    }
}

// ──────────────────── keep-alive ────────────────────

/// The resource that keeps the host awake while a session tracks.
pub trait KeepAlive: Send + Sync {
    fn acquire(&self, entity_id: &str) -> Result<Box<dyn KeepAliveLease>>;
}

/// A held keep-alive. Consumed on release, so it can only be released once.
pub trait KeepAliveLease: Send {
    fn release(self: Box<Self>);
}

/// Counts acquisitions and releases; holds nothing.
#[derive(Debug, Default)]
pub struct CountingKeepAlive {
    counters: Arc<KeepAliveCounters>,
}

#[derive(Debug, Default)]
struct KeepAliveCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl CountingKeepAlive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn acquired(&self) -> u64 {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn released(&self) -> u64 {
        self.counters.released.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn held(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

struct CountingLease(Arc<KeepAliveCounters>);

impl KeepAliveLease for CountingLease {
    fn release(self: Box<Self>) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl KeepAlive for CountingKeepAlive {
    fn acquire(&self, _entity_id: &str) -> Result<Box<dyn KeepAliveLease>> {
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingLease(Arc::clone(&self.counters))))
    }
}

/// Exclusive lock file holding `<pid> <entity>` while a session runs. A
/// second tracker on the same file is refused.
#[derive(Debug, Clone)]
pub struct LockFileKeepAlive {
    path: PathBuf,
}

impl LockFileKeepAlive {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn lock(&self, file: fs::File) -> Result<nix::fcntl::Flock<fs::File>> {
        #[allow(deprecated)]
        nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusiveNonblock).map_err(
            |(_file, errno)| TtError::Runtime {
                details: format!(
                    "keep-alive lock {} is held by another tracker: {errno}",
                    self.path.display()
                ),
            },
        )
    }
}

impl KeepAlive for LockFileKeepAlive {
    fn acquire(&self, entity_id: &str) -> Result<Box<dyn KeepAliveLease>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| TtError::io(parent, source))?;
        }
        let file = {
            let mut opts = OpenOptions::new();
            opts.read(true).write(true).create(true).truncate(false);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&self.path)
                .map_err(|source| TtError::io(&self.path, source))?
        };

        #[cfg(unix)]
        let mut file = self.lock(file)?;
        #[cfg(not(unix))]
        let mut file = file;

        file.set_len(0)
            .and_then(|()| writeln!(file, "{} {entity_id}", std::process::id()))
            .map_err(|source| TtError::io(&self.path, source))?;

        Ok(Box::new(LockFileLease {
            path: self.path.clone(),
            _file: file,
        }))
    }
}

struct LockFileLease {
    path: PathBuf,
    #[cfg(unix)]
    _file: nix::fcntl::Flock<fs::File>,
    #[cfg(not(unix))]
    _file: fs::File,
}

impl KeepAliveLease for LockFileLease {
    fn release(self: Box<Self>) {
        // Unlink while still locked; the lock drops with the lease.
        if let Err(error) = fs::remove_file(&self.path)
            && error.kind() != std::io::ErrorKind::NotFound
        {
            eprintln!(
                "[TT-TRACKER] failed to remove keep-alive lock {}: {error}",
                self.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn device_config(root: &Path) -> DeviceConfig {
        DeviceConfig {
            battery_percent: None,
            assume_connected: None,
            power_supply_dir: root.join("power_supply"),
            net_dir: root.join("net"),
        }
    }

    #[test]
    fn sysfs_reads_battery_and_link_state() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("power_supply/AC/type"), "Mains\n");
        write(&root.join("power_supply/BAT0/type"), "Battery\n");
        write(&root.join("power_supply/BAT0/capacity"), "57\n");
        write(&root.join("net/lo/operstate"), "unknown\n");
        write(&root.join("net/eth0/operstate"), "up\n");

        let device = SysfsDevice::from_config(&device_config(root));
        assert!((device.battery_percent() - 57.0).abs() < f64::EPSILON);
        assert!(device.is_connected());

        write(&root.join("net/eth0/operstate"), "down\n");
        assert!(!device.is_connected());
    }

    #[test]
    fn sysfs_without_battery_or_net_uses_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let device = SysfsDevice::from_config(&device_config(dir.path()));
        assert!((device.battery_percent() - 100.0).abs() < f64::EPSILON);
        assert!(device.is_connected());
    }

    #[test]
    fn config_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("net/eth0/operstate"), "up\n");
        let cfg = DeviceConfig {
            battery_percent: Some(12.5),
            assume_connected: Some(false),
            ..device_config(dir.path())
        };
        let device = SysfsDevice::from_config(&cfg);
        assert!((device.battery_percent() - 12.5).abs() < f64::EPSILON);
        assert!(!device.is_connected());
    }

    #[test]
    fn fixed_device_is_settable() {
        let device = FixedDevice::new(80.0, true);
        device.set_battery(20.0);
        device.set_connected(false);
        assert!((device.battery_percent() - 20.0).abs() < f64::EPSILON);
        assert!(!device.is_connected());
    }

    #[test]
    fn unconfigured_auth_accepts_any_email() {
        let auth = SharedSecretAuthenticator::from_config(&AuthConfig::default());
        assert!(auth.authenticate("bus-7", &Credentials::new("a@b.c", "")).is_ok());
        let err = auth
            .authenticate("bus-7", &Credentials::new("  ", "pw"))
            .unwrap_err();
        assert_eq!(err.code(), "TT-3001");
        assert!(err.is_fatal_to_session());
    }

    #[test]
    fn configured_auth_checks_email_and_password() {
        let auth = SharedSecretAuthenticator::from_config(&AuthConfig {
            email: Some("driver@fleet.test".to_string()),
            password: Some("s3cret".to_string()),
        });
        assert!(
            auth.authenticate("bus-7", &Credentials::new("Driver@Fleet.test", "s3cret"))
                .is_ok()
        );
        assert!(
            auth.authenticate("bus-7", &Credentials::new("other@fleet.test", "s3cret"))
                .is_err()
        );
        let err = auth
            .authenticate("bus-7", &Credentials::new("driver@fleet.test", "nope"))
            .unwrap_err();
        assert!(err.to_string().contains("wrong password"));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("a@b.c", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn counting_keep_alive_tracks_leases() {
        let keep_alive = CountingKeepAlive::new();
        let lease = keep_alive.acquire("bus-7").unwrap();
        assert_eq!(keep_alive.held(), 1);
        lease.release();
        assert_eq!(keep_alive.acquired(), 1);
        assert_eq!(keep_alive.released(), 1);
        assert_eq!(keep_alive.held(), 0);
    }

    #[test]
    fn lock_file_holds_pid_and_is_removed_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/ttrack.lock");
        let keep_alive = LockFileKeepAlive::new(path.clone());

        let lease = keep_alive.acquire("bus-7").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{} bus-7\n", std::process::id()));

        lease.release();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn lock_file_refuses_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let keep_alive = LockFileKeepAlive::new(dir.path().join("ttrack.lock"));
        let first = keep_alive.acquire("bus-7").unwrap();
        let err = keep_alive.acquire("bus-8").err().unwrap();
        assert_eq!(err.code(), "TT-3900");
        first.release();
        keep_alive.acquire("bus-8").unwrap().release();
    }
}
