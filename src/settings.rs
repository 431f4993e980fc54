use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::StitchConfig;

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("panorama-stitcher")
        .join("config.json")
}

pub fn save_config(config: &StitchConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;

    log::info!("Settings saved to: {}", path.display());
    Ok(())
}

/// Reads a config file, falling back to defaults when it is missing,
/// unreadable, unparsable, or fails validation.
pub fn load_config(path: &Path) -> StitchConfig {
    if !path.exists() {
        log::info!("No settings file found. Using defaults.");
        return StitchConfig::default();
    }

    let config: StitchConfig = match std::fs::read_to_string(path) {
        Ok(json) => match serde_json::from_str(&json) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to parse settings file: {}. Using defaults.", e);
                return StitchConfig::default();
            }
        },
        Err(e) => {
            log::warn!("Failed to read settings file: {}. Using defaults.", e);
            return StitchConfig::default();
        }
    };

    match config.validate() {
        Ok(()) => {
            log::info!("Settings loaded from: {}", path.display());
            config
        }
        Err(e) => {
            log::warn!("Settings file rejected: {}. Using defaults.", e);
            StitchConfig::default()
        }
    }
}
