//! Seams between the presence watch loop and the outside world.
//!
//! The loop only talks to these traits; the implementations in the
//! submodules drive real devices and programs.

use anyhow::Result;
use async_trait::async_trait;

pub mod camera;
pub mod lock;
pub mod matcher;
pub mod presenter;

pub use camera::DeviceCamera;
pub use lock::CommandLock;
pub use matcher::{enroll, CommandEmbedder, EmbeddingMatcher, ReferenceDescriptor};
pub use presenter::CommandPresenter;

/// A single raw camera frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Camera availability and acquisition
#[async_trait]
pub trait CameraProbe: Send + Sync {
    /// Whether a frame source can currently be opened
    async fn is_accessible(&self) -> bool;

    /// Acquire the device. It stays held until the returned source is dropped.
    async fn open(&self) -> Result<Box<dyn FrameSource>>;
}

/// An open capture stream
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` when the device stopped delivering
    async fn read_frame(&mut self) -> Option<Frame>;
}

/// Decides whether a frame shows the enrolled person
#[async_trait]
pub trait FaceMatcher: Send + Sync {
    async fn matches(&self, frame: &Frame, reference: &ReferenceDescriptor) -> Result<bool>;
}

/// Computes face embeddings for every face found in a frame
#[async_trait]
pub trait FaceEmbedder: Send + Sync {
    async fn embed(&self, frame: &Frame) -> Result<Vec<Vec<f32>>>;
}

/// Full-screen warning shown while presence cannot be confirmed
pub trait AlertPresenter: Send + Sync {
    /// Show the warning
    ///
    /// # Errors
    ///
    /// Returns an error if the warning cannot be displayed
    fn show(&self, text: &str) -> Result<()>;

    /// Keep the warning visible, re-displaying it if it was closed
    ///
    /// # Errors
    ///
    /// Returns an error if the warning cannot be displayed
    fn refresh(&self) -> Result<()>;

    /// Dismiss the warning; a no-op when nothing is shown
    ///
    /// # Errors
    ///
    /// Returns an error if the warning cannot be dismissed
    fn hide(&self) -> Result<()>;
}

/// Locks the workstation
#[async_trait]
pub trait LockAction: Send + Sync {
    async fn now(&self) -> Result<()>;
}
