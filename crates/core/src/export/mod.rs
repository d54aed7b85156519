//! Export pipelines and artifact delivery
//!
//! Exporters only produce bytes. Nothing reaches an [`ArtifactSink`] until
//! the whole document has been built, so a failed export leaves no partial
//! file behind.

mod cropped;
mod highlighted;
mod naming;

pub use cropped::{compose_crop, export_cropped, image_pdf, CROP_HIGHLIGHT_ALPHA, CROP_RENDER_SCALE};
pub use highlighted::{export_highlighted, HIGHLIGHT_OPACITY};
pub use naming::{cropped_file_name, highlighted_file_name};

use std::fs;
use std::io;
use std::path::PathBuf;

/// A finished export ready to be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Destination for finished exports.
pub trait ArtifactSink {
    /// Persist `artifact` and return where it went.
    fn save(&mut self, artifact: &SavedArtifact) -> io::Result<PathBuf>;
}

/// Writes artifacts into a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactSink for DirectorySink {
    fn save(&mut self, artifact: &SavedArtifact) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(&artifact.file_name);
        fs::write(&path, &artifact.bytes)?;
        Ok(path)
    }
}

/// Keeps artifacts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub saved: Vec<SavedArtifact>,
}

impl ArtifactSink for MemorySink {
    fn save(&mut self, artifact: &SavedArtifact) -> io::Result<PathBuf> {
        self.saved.push(artifact.clone());
        Ok(PathBuf::from(&artifact.file_name))
    }
}
