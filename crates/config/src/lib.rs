//! User settings for Pagemark
//!
//! Settings live in `settings.json` under the platform config directory,
//! wrapped in a versioned envelope. A missing file means defaults.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_SCHEMA_VERSION: u32 = 1;
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to resolve config directory")]
    NoConfigDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported settings version {found} (expected {SETTINGS_SCHEMA_VERSION})")]
    UnsupportedVersion { found: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Palette name or CSS color used for new highlights.
    pub default_highlight_color: String,
    pub initial_zoom: f32,
    /// Where exports are written; the working directory when unset.
    pub output_dir: Option<PathBuf>,
    /// Upload size limit in bytes. Values above 50 MB are capped.
    pub max_upload_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_highlight_color: "Yellow".to_owned(),
            initial_zoom: 1.0,
            output_dir: None,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsEnvelope {
    version: u32,
    settings: Settings,
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn from_default_project() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("dev", "Pagemark", "Pagemark")
            .ok_or(ConfigError::NoConfigDirectory)?;

        Ok(Self { path: dirs.config_dir().join(SETTINGS_FILE) })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Settings, ConfigError> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let bytes = fs::read(&self.path)?;
        let envelope: SettingsEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version > SETTINGS_SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedVersion { found: envelope.version });
        }

        Ok(envelope.settings)
    }

    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let envelope = SettingsEnvelope { version: SETTINGS_SCHEMA_VERSION, settings: settings.clone() };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}
