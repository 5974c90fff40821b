//! User settings persisted between runs
//!
//! A small JSON file holding the API key entered by the user and the last
//! selected voice. Lives at `~/.local/share/kitsune/settings.json` on Linux.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Voice used until the user picks one
pub const DEFAULT_VOICE: &str = "ff_siwis";

/// Persisted user settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl Settings {
    /// Selected voice, or [`DEFAULT_VOICE`]
    #[must_use]
    pub fn voice(&self) -> &str {
        self.voice.as_deref().unwrap_or(DEFAULT_VOICE)
    }
}

/// Reads and writes [`Settings`] at a fixed path
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform data directory
    #[must_use]
    pub fn open_default() -> Self {
        Self::at(default_path())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing file yields defaults
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(&self) -> Result<Settings> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|e| {
            Error::Settings(format!("invalid settings file {}: {e}", self.path.display()))
        })
    }

    /// Write settings, replacing the file atomically
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(settings)?)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    /// Update the stored API key (empty clears it)
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be loaded or saved
    pub fn set_api_key(&self, api_key: &str) -> Result<Settings> {
        self.update(|s| {
            s.api_key = Some(api_key.trim().to_string()).filter(|k| !k.is_empty());
        })
    }

    /// Update the stored voice
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be loaded or saved
    pub fn set_voice(&self, voice: &str) -> Result<Settings> {
        self.update(|s| s.voice = Some(voice.to_string()))
    }

    fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<Settings> {
        let mut settings = self.load()?;
        f(&mut settings);
        self.save(&settings)?;
        Ok(settings)
    }
}

/// `settings.json` under the platform data directory
#[must_use]
pub fn default_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".kitsune/settings.json"),
        |d| d.data_dir().join("kitsune").join("settings.json"),
    )
}
