use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use super::{CameraProbe, Frame, FrameSource};
use crate::config::CameraConfig;

/// V4L2 capture device using the read() I/O method.
///
/// The device must already be configured for the frame size in
/// [`CameraConfig`]; each read returns one complete frame.
pub struct DeviceCamera {
    device: PathBuf,
    width: u32,
    height: u32,
    frame_len: usize,
}

impl DeviceCamera {
    #[must_use]
    pub fn new(config: &CameraConfig) -> Self {
        let frame_len = u64::from(config.width)
            * u64::from(config.height)
            * u64::from(config.bytes_per_pixel);
        Self {
            device: config.device.clone(),
            width: config.width,
            height: config.height,
            frame_len: usize::try_from(frame_len).unwrap_or(usize::MAX),
        }
    }

    fn open_device(device: &Path) -> std::io::Result<File> {
        OpenOptions::new().read(true).write(true).open(device)
    }
}

#[async_trait]
impl CameraProbe for DeviceCamera {
    async fn is_accessible(&self) -> bool {
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || Self::open_device(&device).is_ok())
            .await
            .unwrap_or(false)
    }

    async fn open(&self) -> Result<Box<dyn FrameSource>> {
        let device = self.device.clone();
        let file = tokio::task::spawn_blocking(move || Self::open_device(&device))
            .await
            .context("Camera open task failed")?
            .with_context(|| format!("Failed to open {}", self.device.display()))?;

        log::debug!("Acquired camera {}", self.device.display());
        Ok(Box::new(DeviceFrameSource {
            device: self.device.clone(),
            file: Some(file),
            width: self.width,
            height: self.height,
            frame_len: self.frame_len,
        }))
    }
}

struct DeviceFrameSource {
    device: PathBuf,
    file: Option<File>,
    width: u32,
    height: u32,
    frame_len: usize,
}

#[async_trait]
impl FrameSource for DeviceFrameSource {
    async fn read_frame(&mut self) -> Option<Frame> {
        let mut file = self.file.take()?;
        let len = self.frame_len;

        let joined = tokio::task::spawn_blocking(move || {
            let mut data = vec![0; len];
            let read = file.read_exact(&mut data).map(|()| data);
            (file, read)
        })
        .await;

        match joined {
            Ok((file, Ok(data))) => {
                self.file = Some(file);
                Some(Frame {
                    width: self.width,
                    height: self.height,
                    data,
                })
            }
            Ok((file, Err(e))) => {
                log::debug!("Frame read from {} failed: {e}", self.device.display());
                self.file = Some(file);
                None
            }
            Err(e) => {
                log::error!("Frame read task failed: {e}");
                None
            }
        }
    }
}

impl Drop for DeviceFrameSource {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            log::debug!("Released camera {}", self.device.display());
        }
    }
}
