//! Layerscope Settings
//!
//! JSON config file management for Layerscope services. Each service defines
//! its own config type and wraps it in `Settings<T>` for persistence.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Read(String),
    #[error("failed to write settings: {0}")]
    Write(String),
    #[error("failed to parse settings: {0}")]
    Parse(String),
    #[error("failed to create directory: {0}")]
    CreateDir(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Persisted settings for a service.
///
/// ```ignore
/// let settings: Settings<MonitorConfig> = Settings::load_or_default("layerscope", None)?;
/// ```
pub struct Settings<T> {
    pub config: T,
    path: PathBuf,
}

impl<T: Serialize + DeserializeOwned + Default> Settings<T> {
    /// Load settings from the default path for a service, writing defaults
    /// to disk on first run.
    pub fn load_or_default(service: &str, custom_path: Option<&Path>) -> Result<Self> {
        let path = match custom_path {
            Some(p) => p.to_path_buf(),
            None => default_settings_path(service),
        };

        if path.exists() {
            debug!("loading settings from {}", path.display());
            let content =
                fs::read_to_string(&path).map_err(|e| SettingsError::Read(e.to_string()))?;
            let config: T =
                serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))?;
            Ok(Self { config, path })
        } else {
            debug!("creating default settings at {}", path.display());
            let settings = Self {
                config: T::default(),
                path,
            };
            settings.save()?;
            Ok(settings)
        }
    }

    /// Save current settings to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SettingsError::CreateDir(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| SettingsError::Write(e.to_string()))?;
        fs::write(&self.path, content).map_err(|e| SettingsError::Write(e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Default settings file path for a service.
pub fn default_settings_path(service: &str) -> PathBuf {
    default_config_dir(service).join("settings.json")
}

/// Platform config directory for a service name.
///
/// - Linux: `$XDG_CONFIG_HOME/{service}` or `~/.config/{service}`
/// - macOS: `~/Library/Application Support/{service}`
/// - Windows: `%APPDATA%\{service}`
pub fn default_config_dir(service: &str) -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let xdg = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".config"));
        xdg.join(service)
    }
    #[cfg(target_os = "macos")]
    {
        home_dir()
            .join("Library")
            .join("Application Support")
            .join(service)
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join("AppData").join("Roaming"))
            .join(service)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        home_dir().join(format!(".{service}"))
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
