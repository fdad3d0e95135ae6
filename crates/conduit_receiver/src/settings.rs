//! Persistent Receiver Settings
//!
//! Saves the user parameters across sessions.
//!
//! # Storage Locations
//! - Linux: `~/.config/conduit/receiver.json`
//! - Windows: `%APPDATA%\conduit\receiver.json`
//! - macOS: `~/Library/Application Support/conduit/receiver.json`

use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::params::ReceiverParams;

/// Root settings structure for the receiver plugin
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiverSettings {
    #[serde(default)]
    pub params: ReceiverParams,
}

impl ReceiverSettings {
    /// Load settings from disk, or return defaults if missing/corrupt
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match fs::File::open(&path) {
            Ok(file) => match serde_json::from_reader(file) {
                Ok(settings) => {
                    info!("Receiver settings loaded from {:?}", path);
                    settings
                }
                Err(e) => {
                    error!("Failed to parse settings file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to open settings file: {}", e);
                Self::default()
            }
        }
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<(), String> {
        let path = Self::config_path().ok_or("Could not determine config directory")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;
        fs::write(&path, json).map_err(|e| e.to_string())?;

        info!("Receiver settings saved to {:?}", path);
        Ok(())
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "conduit").map(|dirs| dirs.config_dir().join("receiver.json"))
    }
}
