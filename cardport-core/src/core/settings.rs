//! Import preferences persisted as JSON.
//!
//! Both importers accept an [`ImportSettings`] through `apply_settings`; the
//! individual setters on each importer override single values afterwards.

use crate::core::matcher::ImportMode;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted import preferences.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSettings {
    /// How notes matching an existing note are treated.
    pub import_mode: ImportMode,
    /// Keep field text of delimited files verbatim instead of escaping it.
    pub allow_html: bool,
    /// Column separator of delimited files; detected from the file when unset.
    pub delimiter: Option<char>,
    /// Let a package change a model that already has notes.
    pub dupe_on_schema_change: bool,
    /// Tags added to every imported note.
    pub tags_to_add: Vec<String>,
}

impl ImportSettings {
    /// The delimiter as a byte, if it is set and ASCII.
    pub fn delimiter_byte(&self) -> Option<u8> {
        self.delimiter.filter(char::is_ascii).map(|c| c as u8)
    }
}

/// Returns the default location of the settings file.
///
/// - macOS / Linux: `~/.config/cardport/import.json`
/// - Windows: `%APPDATA%/Cardport/import.json`
pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("Cardport").join("import.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config").join("cardport").join("import.json")
    }
}

/// Loads settings from `path`; returns defaults if the file is missing or corrupt.
pub fn load_settings(path: &Path) -> ImportSettings {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("ignoring unreadable import settings at {}: {e}", path.display());
            ImportSettings::default()
        }),
        Err(_) => ImportSettings::default(),
    }
}

/// Saves settings to `path`, creating parent directories as needed.
pub fn save_settings(path: &Path, settings: &ImportSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}
