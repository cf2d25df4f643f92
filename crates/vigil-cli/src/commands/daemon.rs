/// Daemon lifecycle and control commands
use anyhow::{Context, Result};
use chrono::Local;
use std::{env, fs, io, path::Path, process::Command, sync::Arc, thread::sleep, time};
use sysinfo::{Pid, System};
use vigil_analytics::UsageAnalyzer;
use vigil_core::{
    config::{get_log_dir, Config},
    daemon::analyze_today,
    event_log::{format_record, DailyLogWriter, EVENT_TARGET},
    ipc::{IpcClient, IpcRequest, IpcResponse},
    Daemon,
};
use vigil_storage::{DailyUsage, Database};

use super::helpers::{format_duration, percentage};

pub fn start_daemon(data_dir: &Path) -> Result<()> {
    let pid_file_path = data_dir.join("vigil.pid");
    let sock_path = data_dir.join("vigil.sock");

    // 1. Check if daemon is already running
    if pid_file_path.exists() {
        if let Ok(pid_str) = fs::read_to_string(&pid_file_path) {
            if let Ok(pid) = pid_str.trim().parse::<usize>() {
                let mut sys = System::new();
                if sys.refresh_process(Pid::from(pid)) {
                    log::info!("Daemon is already running (PID: {pid}).");
                    return Ok(());
                }
            }
        }
        // If pid file is stale, remove it
        log::warn!("Removing stale PID file.");
        let _ = fs::remove_file(&pid_file_path);
    }

    // 2. Refuse to start without an enrolled face
    let reference_path = Config::load()?.matcher.reference_path()?;
    if !reference_path.exists() {
        anyhow::bail!(
            "No reference face at {}. Run `vigil enroll` first.",
            reference_path.display()
        );
    }

    // 3. Clean up old socket if it exists
    if sock_path.exists() {
        log::warn!("Removing stale socket file.");
        fs::remove_file(&sock_path)?;
    }

    log::info!("Starting vigil daemon...");

    // 4. Spawn a new process for the daemon
    let current_exe = env::current_exe()?;
    let current_dir = env::current_dir()?;
    let child = Command::new(current_exe)
        .arg("daemon-internal-start")
        .current_dir(current_dir)
        .spawn()?;

    // 5. In parent process, write PID and exit
    log::info!("Daemon process started with PID: {}", child.id());
    fs::create_dir_all(data_dir)?;
    fs::write(&pid_file_path, child.id().to_string())?;

    Ok(())
}

pub async fn run_daemon_process() -> Result<()> {
    // This is the detached daemon process, logging goes to the event log
    if let Err(e) = setup_daemon_logging() {
        // Without the event log there is no way to report anything
        panic!("Failed to set up daemon logging: {e}");
    }
    log::info!("Daemon process started internally.");

    if let Err(e) = daemon_main_logic().await {
        log::error!("Daemon main logic exited with a fatal error: {e:#}");
        return Err(e);
    }

    Ok(())
}

/// Run the daemon attached to the terminal
pub async fn run_foreground() -> Result<()> {
    setup_daemon_logging()?;
    println!("Running in the foreground, press Ctrl-C to stop.");
    println!("Event log: {}", get_log_dir()?.display());
    daemon_main_logic().await
}

async fn daemon_main_logic() -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(None)?;
    let mut daemon = Daemon::new(config, db)?;
    daemon.run_with_signals().await
}

pub async fn stop_daemon(data_dir: &Path) -> Result<()> {
    let pid_file_path = data_dir.join("vigil.pid");
    let sock_path = data_dir.join("vigil.sock");

    if !pid_file_path.exists() {
        log::info!("Daemon is not running (no PID file).");
        // Also remove socket if it exists for consistency
        if sock_path.exists() {
            fs::remove_file(&sock_path)?;
        }
        return Ok(());
    }

    let pid_str = fs::read_to_string(&pid_file_path)?;
    let pid = pid_str
        .trim()
        .parse::<usize>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    log::info!("Stopping vigil daemon (PID: {pid})...");
    let client = IpcClient::new(&sock_path);

    match client.send_command(IpcRequest::Shutdown).await {
        Ok(IpcResponse::Shutdown) => {
            log::info!("Daemon shutdown signal sent. Waiting for process to exit...");
            sleep(time::Duration::from_secs(2));

            let mut sys = System::new();
            if sys.refresh_process(Pid::from(pid)) {
                log::warn!("Daemon did not stop gracefully. Force killing...");
                if let Some(process) = sys.process(Pid::from(pid)) {
                    process.kill();
                }
            } else {
                log::info!("Daemon stopped successfully.");
            }
        }
        Ok(resp) => log::error!("Received unexpected response from daemon: {resp:?}"),
        Err(e) => {
            log::error!("Failed to send shutdown command: {e}. Forcing cleanup.");
            let mut sys = System::new();
            if sys.refresh_process(Pid::from(pid)) {
                if let Some(process) = sys.process(Pid::from(pid)) {
                    process.kill();
                    log::info!("Process killed.");
                }
            }
        }
    }

    // Cleanup
    fs::remove_file(&pid_file_path)?;
    if sock_path.exists() {
        fs::remove_file(&sock_path)?;
    }

    Ok(())
}

pub async fn show_status(data_dir: &Path) -> Result<()> {
    let sock_path = data_dir.join("vigil.sock");

    if sock_path.exists() {
        let client = IpcClient::new(&sock_path);
        match client.send_command(IpcRequest::Status).await {
            Ok(IpcResponse::Status {
                monitoring,
                session_locked,
                state,
                uptime_seconds,
            }) => {
                println!("Daemon Status: Running");
                println!(
                    "  Monitoring: {}",
                    if monitoring { "ACTIVE" } else { "PAUSED" }
                );
                println!(
                    "  Session: {}",
                    if session_locked { "locked" } else { "unlocked" }
                );
                println!("  Presence check: {state}");
                let uptime = u32::try_from(uptime_seconds).unwrap_or(u32::MAX);
                println!("  Uptime: {}", format_duration(uptime));
            }
            Ok(_) => anyhow::bail!("Unexpected response from daemon"),
            Err(e) => {
                log::error!("Failed to get status: {e}");
                println!("Daemon Status: Not running (or not responding)");
            }
        }
    } else {
        println!("Daemon Status: Not running");
    }

    let db = Database::new(None)?;
    match db.get_daily_usage(Local::now().date_naive())? {
        Some(usage) => print_usage("Today", &usage),
        None => println!("\nNo usage recorded today."),
    }
    Ok(())
}

pub async fn pause_monitoring(data_dir: &Path) -> Result<()> {
    match send_to_daemon(data_dir, IpcRequest::Pause).await? {
        IpcResponse::Paused { changed: true } => println!("Monitoring paused"),
        IpcResponse::Paused { changed: false } => println!("Monitoring was already paused"),
        other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
    }
    Ok(())
}

pub async fn resume_monitoring(data_dir: &Path) -> Result<()> {
    match send_to_daemon(data_dir, IpcRequest::Resume).await? {
        IpcResponse::Resumed { changed: true } => println!("Monitoring resumed"),
        IpcResponse::Resumed { changed: false } => println!("Monitoring was already active"),
        other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
    }
    Ok(())
}

/// Recompute today's usage, through the daemon when it is running
pub async fn analyze_now(data_dir: &Path) -> Result<()> {
    let sock_path = data_dir.join("vigil.sock");

    let usage = if sock_path.exists() {
        match IpcClient::new(&sock_path)
            .send_command(IpcRequest::Analyze)
            .await?
        {
            IpcResponse::Usage(usage) => usage,
            IpcResponse::Error(e) => anyhow::bail!("Analysis failed in daemon: {e}"),
            other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
        }
    } else {
        let analyzer = UsageAnalyzer::new(get_log_dir()?, Arc::new(Database::new(None)?));
        analyze_today(Arc::new(analyzer)).await?
    };

    print_usage("Today", &usage);
    Ok(())
}

async fn send_to_daemon(data_dir: &Path, request: IpcRequest) -> Result<IpcResponse> {
    let sock_path = data_dir.join("vigil.sock");
    if !sock_path.exists() {
        anyhow::bail!("Daemon is not running. Start it with `vigil start`.");
    }
    IpcClient::new(&sock_path)
        .send_command(request)
        .await
        .context("Failed to reach the daemon")
}

fn print_usage(label: &str, usage: &DailyUsage) {
    println!("\n{label} ({}):", usage.date);
    println!("  Monitored:   {}", format_duration(usage.total_monitored));
    println!(
        "  Screen time: {} ({})",
        format_duration(usage.screen_time),
        percentage(usage.screen_time, usage.total_monitored)
    );
    println!(
        "  Active time: {} ({})",
        format_duration(usage.active_time),
        percentage(usage.active_time, usage.total_monitored)
    );
    println!("  Locked:      {}", format_duration(usage.locked_time));
    println!("  Camera down: {}", format_duration(usage.camera_down_time));
    println!("  Updated:     {}", usage.updated_at.format("%Y-%m-%d %H:%M:%S"));
}

fn setup_daemon_logging() -> Result<()> {
    let writer = DailyLogWriter::new(get_log_dir()?)?;

    daemon_log_builder(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(writer)))
        .init();

    Ok(())
}

/// `RUST_LOG` tunes diagnostics only; analytics events are always written
fn daemon_log_builder(env: env_logger::Env<'_>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_env(env);
    builder
        .filter_module(EVENT_TARGET, log::LevelFilter::Info)
        .format(|buf, record| format_record(buf, record));
    builder
}
