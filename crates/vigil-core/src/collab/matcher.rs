use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{CameraProbe, FaceEmbedder, FaceMatcher, Frame};

/// The enrolled face: an L2-normalized embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    embedding: Vec<f32>,
}

impl ReferenceDescriptor {
    /// Normalize `embedding` into a descriptor
    ///
    /// # Errors
    ///
    /// Returns an error if the embedding is empty or has zero length
    pub fn from_embedding(embedding: Vec<f32>) -> Result<Self> {
        match normalize(embedding) {
            Some(embedding) => Ok(Self { embedding }),
            None => bail!("Reference embedding is empty or zero"),
        }
    }

    #[must_use]
    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold a valid embedding
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read reference {}", path.display()))?;
        let stored: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid reference file {}", path.display()))?;
        Self::from_embedding(stored.embedding)
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write reference {}", path.display()))
    }

    /// Cosine similarity with an arbitrary embedding
    #[must_use]
    pub fn similarity(&self, embedding: &[f32]) -> f32 {
        normalize(embedding.to_vec()).map_or(0.0, |candidate| {
            self.embedding
                .iter()
                .zip(&candidate)
                .map(|(a, b)| a * b)
                .sum()
        })
    }
}

fn normalize(mut v: Vec<f32>) -> Option<Vec<f32>> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if v.is_empty() || norm <= 0.0 || !norm.is_finite() {
        return None;
    }
    for x in &mut v {
        *x /= norm;
    }
    Some(v)
}

/// Matches when any face in the frame is similar enough to the reference
pub struct EmbeddingMatcher {
    embedder: Arc<dyn FaceEmbedder>,
    threshold: f32,
}

impl EmbeddingMatcher {
    #[must_use]
    pub fn new(embedder: Arc<dyn FaceEmbedder>, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
        }
    }
}

#[async_trait]
impl FaceMatcher for EmbeddingMatcher {
    async fn matches(&self, frame: &Frame, reference: &ReferenceDescriptor) -> Result<bool> {
        let faces = self.embedder.embed(frame).await?;
        let best = faces
            .iter()
            .map(|face| reference.similarity(face))
            .fold(f32::MIN, f32::max);
        log::debug!("{} face(s) in frame, best similarity {best:.3}", faces.len());
        Ok(best > self.threshold)
    }
}

/// Runs an external face-embedding program per frame.
///
/// The raw frame goes to stdin with its size in `VIGIL_FRAME_WIDTH` and
/// `VIGIL_FRAME_HEIGHT`; stdout must be a JSON array of embeddings, one per
/// detected face.
pub struct CommandEmbedder {
    command: Vec<String>,
}

impl CommandEmbedder {
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl FaceEmbedder for CommandEmbedder {
    async fn embed(&self, frame: &Frame) -> Result<Vec<Vec<f32>>> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("No embedder command configured");
        };

        let mut child = Command::new(program)
            .args(args)
            .env("VIGIL_FRAME_WIDTH", frame.width.to_string())
            .env("VIGIL_FRAME_HEIGHT", frame.height.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start embedder {program}"))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&frame.data)
                .await
                .context("Failed to send frame to embedder")?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "Embedder exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        serde_json::from_slice(&output.stdout).context("Embedder returned invalid JSON")
    }
}

/// Capture one frame and store its first face as the reference
///
/// # Errors
///
/// Returns an error if no frame can be captured, no face is found, or the
/// reference cannot be written
pub async fn enroll(
    camera: &dyn CameraProbe,
    embedder: &dyn FaceEmbedder,
    path: &Path,
) -> Result<ReferenceDescriptor> {
    let frame = {
        let mut source = camera.open().await?;
        source
            .read_frame()
            .await
            .context("Camera returned no frame")?
    };

    let faces = embedder.embed(&frame).await?;
    let Some(first) = faces.into_iter().next() else {
        bail!("No face found in the captured frame");
    };

    let reference = ReferenceDescriptor::from_embedding(first)?;
    reference.save(path)?;
    log::info!("Reference face stored at {}", path.display());
    Ok(reference)
}
