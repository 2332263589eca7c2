//! Shared helpers for integration tests: a `ttrack` runner that keeps a log
//! per case, and an in-process tracking rig.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use transport_tracker::core::config::{AuthConfig, RemoteConfig, TrackingConfig};
use transport_tracker::core::params::{MemoryParamsSource, ParamsProvider, TrackingParams};
use transport_tracker::daemon::notifications::RecordingNotifier;
use transport_tracker::logger::activity::ActivityLoggerHandle;
use transport_tracker::logger::status_log::StatusLog;
use transport_tracker::sync::client::RemoteSyncClient;
use transport_tracker::sync::remote::{MemoryRemoteStore, RemoteStore};
use transport_tracker::sync::scheduler::MemoryTaskScheduler;
use transport_tracker::tracker::clock::FixedClock;
use transport_tracker::tracker::controller::{ControllerDeps, TrackingController};
use transport_tracker::tracker::host::{
    CountingKeepAlive, Credentials, FixedDevice, SharedSecretAuthenticator,
};

pub const ENTITY: &str = "bus-7";
pub const REMOTE_PATH: &str = "transports/bus-7";
/// 2023-11-14T22:13:20Z.
pub const NOW: i64 = 1_700_000_000_000;

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_ttrack") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "ttrack.exe" } else { "ttrack" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve ttrack binary path for integration test"),
    }
}

/// Run `ttrack` with every data path rooted at `data_dir`.
pub fn run_cli_case(case_name: &str, data_dir: &Path, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, data_dir, args, &[])
}

pub fn run_cli_case_with_env(
    case_name: &str,
    data_dir: &Path,
    args: &[&str],
    env: &[(&str, &str)],
) -> CmdResult {
    let root = std::env::temp_dir().join("ttrack-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("HOME", data_dir)
        .env("TT_DATA_DIR", data_dir)
        .env("TT_OUTPUT_FORMAT", "json")
        .env("RUST_BACKTRACE", "1");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("execute ttrack command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── in-process rig ────────────────────

/// A controller wired to in-memory collaborators, with handles to each so
/// tests can steer and observe them.
pub struct Rig {
    pub controller: TrackingController,
    pub store: Arc<MemoryRemoteStore>,
    pub scheduler: Arc<MemoryTaskScheduler>,
    pub params: Arc<MemoryParamsSource>,
    pub device: Arc<FixedDevice>,
    pub clock: Arc<FixedClock>,
    pub keep_alive: Arc<CountingKeepAlive>,
    pub notifier: Arc<RecordingNotifier>,
    pub sync: Arc<RemoteSyncClient>,
}

pub fn rig() -> Rig {
    let store = Arc::new(MemoryRemoteStore::new());
    rig_with_store(store.clone(), store)
}

/// Rig whose sync client writes through `remote` (e.g. a simulated store
/// wrapping `store`).
pub fn rig_with_store(store: Arc<MemoryRemoteStore>, remote: Arc<dyn RemoteStore>) -> Rig {
    let scheduler = Arc::new(MemoryTaskScheduler::new());
    let params = Arc::new(MemoryParamsSource::new());
    let device = Arc::new(FixedDevice::new(80.0, true));
    let clock = Arc::new(FixedClock::new(NOW, 12));
    let keep_alive = Arc::new(CountingKeepAlive::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let sync = Arc::new(RemoteSyncClient::new(
        remote,
        scheduler.clone(),
        &RemoteConfig::default(),
        ActivityLoggerHandle::disabled(),
    ));
    let mut tracking = TrackingConfig::default();
    tracking.sleep_hour_of_day = 2;
    let deps = ControllerDeps {
        params: Arc::new(ParamsProvider::new(
            TrackingParams::from_config(&tracking),
            Some(Box::new(params.clone())),
        )),
        sync: sync.clone(),
        device: device.clone(),
        auth: Arc::new(SharedSecretAuthenticator::from_config(&AuthConfig {
            email: Some("driver@fleet.test".to_string()),
            password: Some("pw".to_string()),
        })),
        keep_alive: keep_alive.clone(),
        clock: clock.clone(),
        notifier: notifier.clone(),
        logger: ActivityLoggerHandle::disabled(),
        status_log: StatusLog::disabled(),
        params_max_age: Duration::ZERO,
        config_hash: "test".to_string(),
    };
    Rig {
        controller: TrackingController::new(deps),
        store,
        scheduler,
        params,
        device,
        clock,
        keep_alive,
        notifier,
        sync,
    }
}

pub fn creds() -> Credentials {
    Credentials::new("driver@fleet.test", "pw")
}

impl Rig {
    pub fn positions(&self) -> Vec<(f64, f64)> {
        self.controller
            .history()
            .map(|h| h.iter().map(|r| r.position()).collect())
            .unwrap_or_default()
    }

    pub fn flush(&self) {
        assert!(self.sync.flush(Duration::from_secs(5)), "sync flush timed out");
    }
}

/// Poll until `store` has seen at least `count` writes; false after 5s.
pub fn wait_for_writes(store: &MemoryRemoteStore, count: usize) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if store.writes().len() >= count {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}
