//! TOML-based agent configuration.
//!
//! Stored at `<data_dir>/config.toml`. Every key is optional; a missing file
//! or a missing key falls back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read/write config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to get local data dir")]
    DataDir,
}

/// Get the local data directory for vigil.
///
/// `VIGIL_DATA_DIR` overrides the platform default.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os("VIGIL_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let mut path = dirs::data_local_dir().ok_or(ConfigError::DataDir)?;
    path.push("vigil");
    Ok(path)
}

/// Directory holding the daily event logs
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_log_dir() -> Result<PathBuf, ConfigError> {
    Ok(get_data_dir()?.join("logs"))
}

/// Presence watch loop timing and escalation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Delay between camera checks while the camera is unavailable
    pub camera_retry_delay_secs: u64,
    /// Downtime alert step; thresholds compound (30s, 60s, 90s, ...)
    pub camera_alert_interval_secs: u64,
    /// Consecutive failed matches before the workstation is locked
    pub max_attempts: u32,
    /// Pause after a successful verification
    pub success_cooldown_secs: u64,
    /// Upper bound on how long the loop waits before re-checking the pause flag
    pub poll_interval_ms: u64,
    /// Delay before the supervisor restarts a failed loop
    pub restart_delay_secs: u64,
    /// Longest a single camera acquisition, frame read or face match may take
    pub frame_timeout_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            camera_retry_delay_secs: 5,
            camera_alert_interval_secs: 30,
            max_attempts: 100,
            success_cooldown_secs: 5,
            poll_interval_ms: 1000,
            restart_delay_secs: 3,
            frame_timeout_ms: 10_000,
        }
    }
}

impl WatchConfig {
    #[must_use]
    pub const fn camera_retry_delay(&self) -> Duration {
        Duration::from_secs(self.camera_retry_delay_secs)
    }

    #[must_use]
    pub const fn camera_alert_interval(&self) -> Duration {
        Duration::from_secs(self.camera_alert_interval_secs)
    }

    #[must_use]
    pub const fn success_cooldown(&self) -> Duration {
        Duration::from_secs(self.success_cooldown_secs)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    #[must_use]
    pub const fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device node
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    /// 2 for YUYV
    pub bytes_per_pixel: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            width: 640,
            height: 480,
            bytes_per_pixel: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Cosine similarity a face must exceed to match the reference
    pub similarity_threshold: f32,
    /// External face-embedding program and its arguments
    pub embedder_command: Vec<String>,
    /// Reference embedding; defaults to `<data_dir>/reference.json`
    pub reference_path: Option<PathBuf>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            embedder_command: vec!["vigil-face-embed".to_string()],
            reference_path: None,
        }
    }
}

impl MatcherConfig {
    /// Resolved reference embedding path
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the data directory cannot be determined.
    pub fn reference_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.reference_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_data_dir()?.join("reference.json")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub text: String,
    /// Warning program; the alert text is appended as the last argument
    pub command: Vec<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            text: "Couldn't find employee in the frame!".to_string(),
            command: vec![
                "zenity".to_string(),
                "--warning".to_string(),
                "--no-wrap".to_string(),
                "--text".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub command: Vec<String>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            command: vec!["loginctl".to_string(), "lock-session".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Period of the background usage analysis
    pub interval_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self { interval_secs: 900 }
    }
}

impl AnalyzerConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Start presence monitoring as soon as the daemon starts
    pub monitor_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            monitor_on_start: true,
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub camera: CameraConfig,
    pub matcher: MatcherConfig,
    pub alert: AlertConfig,
    pub lock: LockConfig,
    pub analyzer: AnalyzerConfig,
    pub daemon: DaemonConfig,
}

impl Config {
    /// Default config file location
    ///
    /// # Errors
    ///
    /// Returns an error if the local data directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(get_data_dir()?.join("config.toml"))
    }

    /// Load from the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load from `path`, falling back to defaults if the file does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Render as TOML
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write to `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml_string()?;
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, content).map_err(io_err)
    }
}
