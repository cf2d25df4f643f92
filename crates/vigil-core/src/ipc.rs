use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
};
use vigil_analytics::{EventKind, UsageAnalyzer};
use vigil_storage::DailyUsage;

use crate::config::{get_data_dir, ConfigError};
use crate::daemon::analyze_today;
use crate::event_log::record_event;
use crate::watch::{PauseFlag, PresenceState, WatchControl};

/// Control socket of the running daemon
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn default_sock_path() -> Result<PathBuf, ConfigError> {
    Ok(get_data_dir()?.join("vigil.sock"))
}

/// IPC request from CLI to daemon
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcRequest {
    Status,
    /// Manual override: stop presence checks
    Pause,
    Resume,
    /// Run the usage analyzer for today right away
    Analyze,
    Shutdown,
}

/// IPC response from daemon to CLI
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcResponse {
    Status {
        monitoring: bool,
        session_locked: bool,
        state: PresenceState,
        uptime_seconds: u64,
    },
    Paused {
        changed: bool,
    },
    Resumed {
        changed: bool,
    },
    Usage(DailyUsage),
    Error(String),
    Shutdown,
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.sock_path).await?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse = bincode::deserialize(&buffer)?;

        Ok(response)
    }
}

pub struct DaemonIpcHandler {
    control: Arc<WatchControl>,
    pause: Arc<PauseFlag>,
    analyzer: Arc<UsageAnalyzer>,
    started: Instant,
    shutdown_signal: Arc<AtomicBool>,
}

impl DaemonIpcHandler {
    #[must_use]
    pub fn new(
        control: Arc<WatchControl>,
        pause: Arc<PauseFlag>,
        analyzer: Arc<UsageAnalyzer>,
        shutdown_signal: Arc<AtomicBool>,
    ) -> Self {
        Self {
            control,
            pause,
            analyzer,
            started: Instant::now(),
            shutdown_signal,
        }
    }

    async fn respond(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Status => IpcResponse::Status {
                monitoring: !self.control.is_paused(),
                session_locked: self.pause.is_set(),
                state: self.control.state(),
                uptime_seconds: self.started.elapsed().as_secs(),
            },
            IpcRequest::Pause => {
                let changed = self.control.pause();
                if changed {
                    record_event(EventKind::MonitorStop);
                }
                IpcResponse::Paused { changed }
            }
            IpcRequest::Resume => {
                let changed = self.control.resume();
                if changed {
                    record_event(EventKind::MonitorStart);
                }
                IpcResponse::Resumed { changed }
            }
            IpcRequest::Analyze => match analyze_today(self.analyzer.clone()).await {
                Ok(usage) => IpcResponse::Usage(usage),
                Err(e) => IpcResponse::Error(format!("{e:#}")),
            },
            IpcRequest::Shutdown => {
                self.shutdown_signal.store(true, Ordering::SeqCst);
                IpcResponse::Shutdown
            }
        }
    }

    pub async fn handle(
        &self,
        stream: &mut UnixStream,
        request: IpcRequest,
    ) -> Result<(), anyhow::Error> {
        let response = self.respond(request).await;
        let encoded = bincode::serialize(&response)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }
}

pub async fn listen(handler: Arc<DaemonIpcHandler>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    if let Some(parent) = sock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(sock_path)?;

    loop {
        let (mut stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("IPC accept error: {e}");
                continue;
            }
        };
        let handler = handler.clone();
        tokio::spawn(async move {
            // The client half-closes after writing, so the request is whatever precedes EOF
            let mut buf = Vec::new();
            if let Err(e) = stream.read_to_end(&mut buf).await {
                log::error!("IPC read error: {e}");
                return;
            }
            if buf.is_empty() {
                return;
            }
            let request = match bincode::deserialize::<IpcRequest>(&buf) {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("Ignoring malformed IPC request: {e}");
                    return;
                }
            };
            log::debug!("IPC request: {request:?}");
            if let Err(e) = handler.handle(&mut stream, request).await {
                log::error!("IPC handle error: {e}");
            }
        });
    }
}
