use crate::{
    collab::{
        CommandEmbedder, CommandLock, CommandPresenter, DeviceCamera, EmbeddingMatcher,
        ReferenceDescriptor,
    },
    config::{get_log_dir, Config},
    event_log::record_event,
    ipc::{default_sock_path, listen, DaemonIpcHandler},
    session::{create_session_signal, SessionListener, SessionSignal},
    watch::{supervise, Collaborators, PauseFlag, PresenceWatchLoop, WatchControl},
};
use anyhow::{Context, Result};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::interval;
use vigil_analytics::{EventKind, UsageAnalyzer};
use vigil_storage::{DailyUsage, Database};

/// Run today's analysis off the async runtime
///
/// # Errors
///
/// Returns an error if the log cannot be read or the result cannot be stored
pub async fn analyze_today(analyzer: Arc<UsageAnalyzer>) -> Result<DailyUsage> {
    let usage = tokio::task::spawn_blocking(move || analyzer.process_today())
        .await
        .context("Usage analysis task failed")??;
    Ok(usage)
}

/// Real collaborators as configured
#[must_use]
pub fn build_collaborators(config: &Config) -> Collaborators {
    let embedder = Arc::new(CommandEmbedder::new(config.matcher.embedder_command.clone()));
    Collaborators {
        camera: Arc::new(DeviceCamera::new(&config.camera)),
        matcher: Arc::new(EmbeddingMatcher::new(
            embedder,
            config.matcher.similarity_threshold,
        )),
        presenter: Arc::new(CommandPresenter::new(config.alert.command.clone())),
        lock: Arc::new(CommandLock::new(config.lock.command.clone())),
    }
}

pub struct Daemon {
    config: Config,
    collaborators: Collaborators,
    reference: Arc<ReferenceDescriptor>,
    analyzer: Arc<UsageAnalyzer>,
    pause: Arc<PauseFlag>,
    control: Arc<WatchControl>,
    session_signal: Option<Box<dyn SessionSignal>>,
    sock_path: PathBuf,
    shutdown_signal: Arc<AtomicBool>,
}

impl Daemon {
    /// Wire up the daemon from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if no reference face has been enrolled or the data
    /// directory cannot be determined
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let reference_path = config.matcher.reference_path()?;
        let reference = ReferenceDescriptor::load(&reference_path).with_context(|| {
            format!(
                "No usable reference face at {}; run `vigil enroll` first",
                reference_path.display()
            )
        })?;

        let session_signal = match create_session_signal(config.watch.poll_interval()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                log::warn!("Session lock detection unavailable: {e:#}");
                None
            }
        };

        let analyzer = UsageAnalyzer::new(get_log_dir()?, Arc::new(db));
        let collaborators = build_collaborators(&config);

        Ok(Self::with_parts(
            config,
            collaborators,
            reference,
            analyzer,
            session_signal,
            default_sock_path()?,
        ))
    }

    #[must_use]
    pub fn with_parts(
        config: Config,
        collaborators: Collaborators,
        reference: ReferenceDescriptor,
        analyzer: UsageAnalyzer,
        session_signal: Option<Box<dyn SessionSignal>>,
        sock_path: PathBuf,
    ) -> Self {
        Self {
            config,
            collaborators,
            reference: Arc::new(reference),
            analyzer: Arc::new(analyzer),
            pause: Arc::new(PauseFlag::new()),
            control: Arc::new(WatchControl::new()),
            session_signal,
            sock_path,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn run_with_signals(&mut self) -> Result<()> {
        let ipc_handler = Arc::new(DaemonIpcHandler::new(
            self.control.clone(),
            self.pause.clone(),
            self.analyzer.clone(),
            self.shutdown_signal.clone(),
        ));
        let sock_path = self.sock_path.clone();
        let ipc_task = tokio::spawn(async move {
            if let Err(e) = listen(ipc_handler, &sock_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });

        let session_listener = match self.session_signal.take() {
            Some(signal) => match SessionListener::spawn(signal, self.pause.clone()) {
                Ok(listener) => Some(listener),
                Err(e) => {
                    log::warn!("Session listener not started: {e:#}");
                    None
                }
            },
            None => None,
        };

        if self.config.daemon.monitor_on_start {
            record_event(EventKind::MonitorStart);
        } else {
            self.control.pause();
            log::info!("Monitoring stays paused until `vigil resume`");
        }

        let watch_task = tokio::spawn(supervise(
            self.loop_factory(),
            self.control.clone(),
            self.config.watch.restart_delay(),
        ));

        let mut analyze_interval =
            interval(self.config.analyzer.interval().max(Duration::from_secs(1)));
        let mut shutdown_check = interval(Duration::from_millis(200));
        log::info!("Daemon started with signal handling and IPC");

        loop {
            tokio::select! {
                _ = analyze_interval.tick() => {
                    Self::run_analysis(self.analyzer.clone()).await;
                }
                _ = shutdown_check.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down...");
                    self.shutdown_signal.store(true, Ordering::SeqCst);
                }
            }

            if self.shutdown_signal.load(Ordering::SeqCst) {
                break;
            }
        }

        // The watch loop releases the camera and dismisses the alert on exit
        self.control.shutdown();
        if let Err(e) = watch_task.await {
            log::error!("Presence watch task failed: {e}");
        }
        if !self.control.is_paused() {
            record_event(EventKind::MonitorStop);
        }
        Self::run_analysis(self.analyzer.clone()).await;

        if let Some(listener) = session_listener {
            if let Err(e) = tokio::task::spawn_blocking(move || listener.stop()).await {
                log::error!("Failed to stop session listener: {e}");
            }
        }
        ipc_task.abort();
        if self.sock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.sock_path) {
                log::warn!("Failed to remove {}: {e}", self.sock_path.display());
            }
        }

        log::info!("Daemon shut down gracefully.");
        Ok(())
    }

    fn loop_factory(&self) -> impl Fn() -> PresenceWatchLoop + Send + Sync + 'static {
        let collaborators = self.collaborators.clone();
        let reference = self.reference.clone();
        let pause = self.pause.clone();
        let control = self.control.clone();
        let settings = self.config.watch.clone();
        let alert_text = self.config.alert.text.clone();

        move || {
            PresenceWatchLoop::new(
                collaborators.clone(),
                reference.clone(),
                pause.clone(),
                control.clone(),
                settings.clone(),
                alert_text.clone(),
            )
        }
    }

    async fn run_analysis(analyzer: Arc<UsageAnalyzer>) {
        match analyze_today(analyzer).await {
            Ok(usage) => log::debug!(
                "Usage updated for {}: screen {}s, active {}s",
                usage.date,
                usage.screen_time,
                usage.active_time
            ),
            Err(e) => log::error!("Usage analysis failed, retrying next tick: {e:#}"),
        }
    }
}
