//! Top-level CLI definition and dispatch.

use std::fs::File;
use std::io::{self, BufRead, BufReader, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Map, Value, json};
use thiserror::Error;

use transport_tracker::core::config::{Config, RemoteBackend};
use transport_tracker::core::errors::TtError;
use transport_tracker::core::params::{ParamKey, ParamsProvider};
use transport_tracker::daemon::notifications::NotificationManager;
use transport_tracker::daemon::signals::SignalHandler;
use transport_tracker::logger::activity::{
    ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use transport_tracker::logger::jsonl::JsonlConfig;
use transport_tracker::logger::status_log::StatusLog;
use transport_tracker::status::record::{LocationFix, StatusRecord, decode_snapshot};
use transport_tracker::sync::client::RemoteSyncClient;
use transport_tracker::sync::remote::{
    FileRemoteStore, MemoryRemoteStore, RemoteStore, validate_entity_id,
};
use transport_tracker::sync::scheduler::{DeferredJob, DeferredTaskScheduler, FileTaskScheduler};
#[cfg(feature = "sqlite")]
use transport_tracker::sync::sqlite::SqliteRemoteStore;
use transport_tracker::tracker::clock::{Clock, SystemClock};
use transport_tracker::tracker::controller::{ControllerDeps, StopReason, TrackingController};
use transport_tracker::tracker::host::{
    Credentials, LockFileKeepAlive, SharedSecretAuthenticator, SysfsDevice,
};
use transport_tracker::tracker::runtime::{RunExit, RunSummary, TrackerHandle, TrackerRuntime};

/// Transport tracker: compacts a vehicle's location fixes into a bounded
/// status list mirrored to a remote store.
#[derive(Debug, Parser)]
#[command(
    name = "ttrack",
    author,
    version,
    about = "Transport tracker - vehicle status compaction and sync",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Track an entity from a JSON-lines feed of location fixes.
    Run(RunArgs),
    /// Print the stored status list for an entity.
    Show(ShowArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Print the effective runtime tracking parameters.
    Params,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Entity (vehicle) id to track.
    entity: String,
    /// Fix feed: one `{"lat":..,"lng":..,"time":..}` object per line; `-` is stdin.
    #[arg(long, default_value = "-", value_name = "PATH")]
    fixes: PathBuf,
    /// Account email (defaults to `[auth].email`).
    #[arg(long)]
    email: Option<String>,
    /// Account password (defaults to `[auth].password`).
    #[arg(long)]
    password: Option<String>,
    /// Exit at quiet hours instead of waiting for the armed restart.
    #[arg(long)]
    no_wait: bool,
}

#[derive(Debug, Clone, Args)]
struct ShowArgs {
    /// Entity (vehicle) id.
    entity: String,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or credentials.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<TtError> for CliError {
    fn from(error: TtError) -> Self {
        if error.code().starts_with("TT-1") || error.is_fatal_to_session() {
            Self::User(error.to_string())
        } else {
            Self::Runtime(error.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_tracking(cli, args),
        Command::Show(args) => run_show(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Params => run_params(cli),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── services ────────────────────

fn open_store(config: &Config) -> Result<Arc<dyn RemoteStore>, CliError> {
    Ok(match config.remote.backend {
        RemoteBackend::File => Arc::new(FileRemoteStore::new(config.paths.remote_dir.clone())),
        #[cfg(feature = "sqlite")]
        RemoteBackend::Sqlite => Arc::new(SqliteRemoteStore::open(&config.paths.sqlite_db)?),
        #[cfg(not(feature = "sqlite"))]
        RemoteBackend::Sqlite => {
            return Err(CliError::User(
                "remote.backend = \"sqlite\" needs the sqlite feature".to_string(),
            ));
        }
        RemoteBackend::Memory => Arc::new(MemoryRemoteStore::new()),
    })
}

/// Long-lived collaborators shared by every tracking cycle of one `run`.
struct Services {
    sync: Arc<RemoteSyncClient>,
    params: Arc<ParamsProvider>,
    device: Arc<SysfsDevice>,
    auth: Arc<SharedSecretAuthenticator>,
    keep_alive: Arc<LockFileKeepAlive>,
    notifier: Arc<NotificationManager>,
    clock: Arc<dyn Clock>,
    logger: ActivityLoggerHandle,
    status_log: Option<PathBuf>,
    params_max_age: Duration,
    config_hash: String,
}

impl Services {
    fn from_config(config: &Config, logger: ActivityLoggerHandle) -> Result<Self, CliError> {
        let store = open_store(config)?;
        let scheduler: Arc<dyn DeferredTaskScheduler> =
            Arc::new(FileTaskScheduler::new(config.paths.restart_dir.clone()));
        Ok(Self {
            sync: Arc::new(RemoteSyncClient::new(
                store,
                scheduler,
                &config.remote,
                logger.clone(),
            )),
            params: Arc::new(ParamsProvider::from_config(config)),
            device: Arc::new(SysfsDevice::from_config(&config.device)),
            auth: Arc::new(SharedSecretAuthenticator::from_config(&config.auth)),
            keep_alive: Arc::new(LockFileKeepAlive::new(config.paths.lock_file.clone())),
            notifier: Arc::new(NotificationManager::from_config(
                &config.notifications,
                &config.paths.notifications_log,
            )),
            clock: Arc::new(SystemClock),
            logger,
            status_log: config
                .logging
                .status_log_enabled
                .then(|| config.paths.status_log.clone()),
            params_max_age: Duration::from_secs(config.params.effective_cache_expiry_secs()),
            config_hash: config.stable_hash()?,
        })
    }

    fn controller(&self) -> TrackingController {
        TrackingController::new(ControllerDeps {
            params: Arc::clone(&self.params),
            sync: Arc::clone(&self.sync),
            device: self.device.clone(),
            auth: self.auth.clone(),
            keep_alive: self.keep_alive.clone(),
            clock: Arc::clone(&self.clock),
            notifier: self.notifier.clone(),
            logger: self.logger.clone(),
            status_log: self
                .status_log
                .clone()
                .map_or_else(StatusLog::disabled, StatusLog::new),
            params_max_age: self.params_max_age,
            config_hash: self.config_hash.clone(),
        })
    }
}

// ──────────────────── run ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedEnd {
    Eof,
    Signalled,
    /// The runtime loop ended on its own (quiet hours).
    LoopClosed,
}

fn resolve_credentials(args: &RunArgs, config: &Config) -> Result<Credentials, CliError> {
    let email = args
        .email
        .clone()
        .or_else(|| config.auth.email.clone())
        .ok_or_else(|| {
            CliError::User("no account email: pass --email or set [auth].email".to_string())
        })?;
    let password = args
        .password
        .clone()
        .or_else(|| config.auth.password.clone())
        .unwrap_or_default();
    Ok(Credentials::new(email, password))
}

fn open_fix_feed(path: &Path) -> Result<Box<dyn BufRead>, CliError> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path)
        .map_err(|e| CliError::User(format!("cannot open fix feed {}: {e}", path.display())))?;
    Ok(Box::new(BufReader::new(file)))
}

fn run_tracking(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    validate_entity_id(&args.entity)?;
    let credentials = resolve_credentials(args, &config)?;
    let mut feed = open_fix_feed(&args.fixes)?;

    let (logger, logger_join) = spawn_logger(ActivityLoggerConfig {
        jsonl: JsonlConfig::from_config(&config.logging, &config.paths),
        channel_capacity: config.logging.channel_capacity,
    })?;
    let signals = SignalHandler::new();

    let result = Services::from_config(&config, logger.clone()).and_then(|services| {
        let outcome = drive(cli, args, &services, &credentials, feed.as_mut(), &signals);
        services.sync.shutdown();
        outcome
    });

    logger.shutdown();
    if logger_join.join().is_err() {
        eprintln!("[TT-CLI] logger thread panicked");
    }
    result
}

/// Tracking cycles: wait out any armed restart, run until the feed ends,
/// a signal arrives, or quiet hours suspend tracking.
fn drive(
    cli: &Cli,
    args: &RunArgs,
    services: &Services,
    credentials: &Credentials,
    feed: &mut dyn BufRead,
    signals: &SignalHandler,
) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let mut line_no = 0_usize;
    loop {
        if let Some(job) = services.sync.pending_restart(&args.entity)? {
            if args.no_wait {
                report_pending(mode, &job)?;
                return Ok(());
            }
            if !wait_until_due(&job, services.clock.as_ref(), signals) {
                return Ok(());
            }
        }

        let runtime =
            TrackerRuntime::spawn(services.controller(), &args.entity, credentials.clone())?;
        let handle = runtime.handle();
        let end = feed_fixes(feed, &handle, signals, &mut line_no)?;
        if end != FeedEnd::LoopClosed {
            // Already closed if the loop suspended between the last fix and now.
            let _ = handle.stop(StopReason::HostShutdown);
        }
        drop(handle);

        let summary = runtime.join()?;
        print_summary(mode, &summary)?;

        let suspended = matches!(summary.exit, RunExit::QuietHours { .. });
        if !suspended || end == FeedEnd::Eof || signals.should_stop() {
            return Ok(());
        }
    }
}

fn wait_until_due(job: &DeferredJob, clock: &dyn Clock, signals: &SignalHandler) -> bool {
    eprintln!(
        "[TT-CLI] waiting for {} restart of {} ({}s)",
        job.tag,
        job.entity_id,
        job.remaining(clock.now_millis()).as_secs()
    );
    loop {
        let remaining = job.remaining(clock.now_millis());
        if remaining.is_zero() {
            return true;
        }
        if signals.should_stop() {
            return false;
        }
        thread::sleep(remaining.min(Duration::from_secs(1)));
    }
}

/// Parse and submit fixes until the feed or the loop ends. Blank lines and
/// `#` comments are skipped; malformed lines are reported and skipped.
fn feed_fixes(
    feed: &mut dyn BufRead,
    handle: &TrackerHandle,
    signals: &SignalHandler,
    line_no: &mut usize,
) -> Result<FeedEnd, CliError> {
    let mut line = String::new();
    loop {
        if signals.should_stop() {
            return Ok(FeedEnd::Signalled);
        }
        if signals.should_refresh() && handle.refresh_params().is_err() {
            return Ok(FeedEnd::LoopClosed);
        }

        line.clear();
        if feed.read_line(&mut line)? == 0 {
            return Ok(FeedEnd::Eof);
        }
        *line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fix: LocationFix = match serde_json::from_str(trimmed) {
            Ok(fix) => fix,
            Err(error) => {
                eprintln!("[TT-CLI] skipping fix on line {line_no}: {error}");
                continue;
            }
        };
        if handle.submit_fix(fix).is_err() {
            return Ok(FeedEnd::LoopClosed);
        }
    }
}

fn exit_label(exit: RunExit) -> String {
    match exit {
        RunExit::Stopped(reason) => format!("stopped ({reason})"),
        RunExit::QuietHours {
            resume_at_ms: Some(at),
        } => format!("quiet hours, resumes at {}", format_millis(at)),
        RunExit::QuietHours { resume_at_ms: None } => "quiet hours".to_string(),
        RunExit::HandlesDropped => "feed closed".to_string(),
    }
}

fn print_summary(mode: OutputMode, summary: &RunSummary) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            println!(
                "{}: {} fixes ({} appended, {} merged, {} evicted), {} rejected, {} statuses kept",
                summary.entity_id.bold(),
                summary.fixes_accepted,
                summary.appended,
                summary.merged,
                summary.evicted,
                summary.fixes_rejected,
                summary.history_len
            );
            let label = exit_label(summary.exit);
            match summary.exit {
                RunExit::QuietHours { .. } => println!("  {}", label.yellow()),
                _ => println!("  {}", label.green()),
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "entity": summary.entity_id,
                "fixes_accepted": summary.fixes_accepted,
                "fixes_rejected": summary.fixes_rejected,
                "appended": summary.appended,
                "merged": summary.merged,
                "evicted": summary.evicted,
                "history_len": summary.history_len,
                "exit": exit_label(summary.exit),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn report_pending(mode: OutputMode, job: &DeferredJob) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => println!(
            "{}: tracking suspended until {}",
            job.entity_id.bold(),
            format_millis(job.not_before_ms).yellow()
        ),
        OutputMode::Json => write_json_line(&json!({
            "command": "run",
            "entity": job.entity_id,
            "pending_restart": job,
        }))?,
    }
    Ok(())
}

// ──────────────────── show ────────────────────

fn run_show(cli: &Cli, args: &ShowArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    validate_entity_id(&args.entity)?;
    if config.remote.backend == RemoteBackend::Memory {
        return Err(CliError::User(
            "remote.backend = \"memory\" keeps nothing between runs".to_string(),
        ));
    }
    let store = open_store(&config)?;
    let path = config.remote.entity_path(&args.entity);
    let records = store
        .read_all(&path)?
        .map(|doc| decode_snapshot(&doc))
        .unwrap_or_default();
    let pending = FileTaskScheduler::new(config.paths.restart_dir.clone())
        .pending()?
        .into_iter()
        .find(|job| job.entity_id == args.entity);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{} ({})", args.entity.bold(), path);
            if records.is_empty() {
                println!("  no statuses stored");
            }
            for (index, record) in records.iter().enumerate() {
                println!(
                    "  {index:>3}  {:>11.6} {:>11.6}  {}  {:>5.1}%",
                    record.latitude(),
                    record.longitude(),
                    format_millis(record.timestamp()),
                    record.power_level()
                );
            }
            if let Some(job) = &pending {
                println!(
                    "  restart armed for {}",
                    format_millis(job.not_before_ms).yellow()
                );
            }
        }
        OutputMode::Json => {
            let statuses: Vec<Value> = records
                .iter()
                .enumerate()
                .map(|(index, record)| status_json(index, record))
                .collect();
            let payload = json!({
                "command": "show",
                "entity": args.entity,
                "path": path,
                "statuses": statuses,
                "pending_restart": pending,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn status_json(index: usize, record: &StatusRecord) -> Value {
    json!({
        "index": index,
        "lat": record.latitude(),
        "lng": record.longitude(),
        "time": record.timestamp(),
        "power": record.power_level(),
    })
}

// ──────────────────── config / params ────────────────────

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("{} {e}", "Configuration is INVALID:".red());
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn run_params(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let provider = ParamsProvider::from_config(&config);
    let outcome = provider.force_refresh();
    let params = provider.snapshot();
    let source = config
        .params
        .source_file
        .as_ref()
        .map_or_else(|| "defaults".to_string(), |p| p.display().to_string());

    match output_mode(cli) {
        OutputMode::Human => {
            println!("source: {source} ({outcome:?})");
            for key in ParamKey::ALL {
                println!("  {:<36} {}", key.remote_name(), params.get(key));
            }
        }
        OutputMode::Json => {
            let mut values = Map::new();
            for key in ParamKey::ALL {
                values.insert(
                    key.remote_name().to_string(),
                    serde_json::to_value(params.get(key))?,
                );
            }
            let payload = json!({
                "command": "params",
                "source": source,
                "refresh_ok": outcome.succeeded(),
                "values": values,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── output ────────────────────

fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |t| t.to_rfc3339())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("TT_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use transport_tracker::core::config::PathsConfig;

    fn test_config(root: &Path) -> Config {
        let mut config = Config {
            paths: PathsConfig::under(root),
            ..Config::default()
        };
        config.remote.backend = RemoteBackend::Memory;
        config.tracking.sleep_hour_of_day = -1;
        config.device.battery_percent = Some(50.0);
        config.device.assume_connected = Some(true);
        config.notifications.enabled = false;
        config.auth.email = Some("driver@fleet.test".to_string());
        config
    }

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "ttrack",
            "--config",
            "/tmp/ttrack.toml",
            "--json",
            "--no-color",
            "show",
            "bus-7",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["ttrack", "show", "bus-7", "--json", "--no-color"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_subcommands() {
        let cases = [
            vec!["ttrack", "run", "bus-7"],
            vec!["ttrack", "run", "bus-7", "--fixes", "feed.jsonl", "--no-wait"],
            vec!["ttrack", "run", "bus-7", "--email", "a@b.c", "--password", "pw"],
            vec!["ttrack", "show", "bus-7"],
            vec!["ttrack", "config", "path"],
            vec!["ttrack", "config", "validate"],
            vec!["ttrack", "params"],
        ];
        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
        assert!(Cli::try_parse_from(["ttrack", "run"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["ttrack", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("bogus"), true), OutputMode::Human);
    }

    #[test]
    fn tt_errors_map_to_exit_codes() {
        let user: CliError = TtError::InvalidEntityId {
            entity_id: "x/y".to_string(),
            reason: "slash".to_string(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);
        let auth: CliError = TtError::AuthFailed {
            entity_id: "bus-7".to_string(),
            details: "nope".to_string(),
        }
        .into();
        assert_eq!(auth.exit_code(), 1);
        let runtime: CliError = TtError::remote("bus-7", "offline").into();
        assert_eq!(runtime.exit_code(), 2);
    }

    #[test]
    fn credentials_fall_back_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let args = RunArgs {
            entity: "bus-7".to_string(),
            fixes: PathBuf::from("-"),
            email: None,
            password: None,
            no_wait: true,
        };
        let creds = resolve_credentials(&args, &config).unwrap();
        assert_eq!(creds.email(), "driver@fleet.test");

        let mut bare = config;
        bare.auth.email = None;
        assert_eq!(resolve_credentials(&args, &bare).unwrap_err().exit_code(), 1);
    }

    #[test]
    fn feed_replays_fixes_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let services = Services::from_config(&config, ActivityLoggerHandle::disabled()).unwrap();
        let runtime = TrackerRuntime::spawn(
            services.controller(),
            "bus-7",
            Credentials::new("driver@fleet.test", ""),
        )
        .unwrap();
        let handle = runtime.handle();

        let mut feed = Cursor::new(
            "# replay\n\
             {\"lat\": 10.0, \"lng\": 20.0, \"time\": 1}\n\
             not json\n\
             \n\
             {\"lat\": 10.0, \"lng\": 20.0, \"time\": 2}\n\
             {\"lat\": 10.0, \"lng\": 20.0, \"time\": 3}\n\
             {\"lat\": 45.0, \"lng\": 20.0, \"time\": 4}\n",
        );
        let mut line_no = 0;
        let end = feed_fixes(
            &mut feed,
            &handle,
            &SignalHandler::unregistered(),
            &mut line_no,
        )
        .unwrap();
        assert_eq!(end, FeedEnd::Eof);
        assert_eq!(line_no, 7);

        handle.stop(StopReason::HostShutdown).unwrap();
        drop(handle);
        let summary = runtime.join().unwrap();
        assert_eq!(summary.fixes_accepted, 4);
        assert_eq!(summary.appended, 3);
        assert_eq!(summary.merged, 1);
        assert_eq!(summary.history_len, 3);
        assert_eq!(summary.exit, RunExit::Stopped(StopReason::HostShutdown));
    }

    #[test]
    fn feed_stops_on_signal() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let services = Services::from_config(&config, ActivityLoggerHandle::disabled()).unwrap();
        let runtime = TrackerRuntime::spawn(
            services.controller(),
            "bus-7",
            Credentials::new("driver@fleet.test", ""),
        )
        .unwrap();
        let signals = SignalHandler::unregistered();
        signals.request_stop();
        let mut feed = Cursor::new("{\"lat\": 10.0, \"lng\": 20.0, \"time\": 1}\n");
        let mut line_no = 0;
        let end = feed_fixes(&mut feed, &runtime.handle(), &signals, &mut line_no).unwrap();
        assert_eq!(end, FeedEnd::Signalled);
        assert_eq!(line_no, 0);
        let summary = runtime.join().unwrap();
        assert_eq!(summary.exit, RunExit::HandlesDropped);
    }

    #[test]
    fn exit_labels_are_readable() {
        assert_eq!(
            exit_label(RunExit::Stopped(StopReason::User)),
            "stopped (user)"
        );
        assert!(exit_label(RunExit::QuietHours { resume_at_ms: Some(0) }).contains("1970"));
    }
}
