//! RTC-Einstellungen
//!
//! Werden als JSON im App-Konfigurationsverzeichnis gespeichert:
//! - Windows: `%APPDATA%/traP/qall/config/settings.json`
//! - macOS: `~/Library/Application Support/jp.traP.qall/settings.json`
//! - Linux: `~/.config/qall/settings.json`
//!
//! Fehlt die Datei, gelten die Defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Umgebungsvariable zum Abschalten der Sprachfunktionen
pub const ENV_RTC_DISABLED: &str = "QALL_RTC_DISABLED";

/// Umgebungsvariable für ein abweichendes Effekt-Verzeichnis
pub const ENV_EFFECTS_DIR: &str = "QALL_EFFECTS_DIR";

const SETTINGS_FILE: &str = "settings.json";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Could not determine app config directory")]
    NoConfigDir,

    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Vom Benutzer einstellbare Sprach-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RtcSettings {
    /// Sprachfunktionen aktiviert
    pub is_enabled: bool,

    /// Gesamtlautstärke des Mixers (0.0 - 1.0)
    pub master_volume: f32,

    /// Gewähltes Eingabegerät, None = noch nicht aufgelöst
    pub audio_input_device_id: Option<String>,

    /// Verzeichnis mit den Effekt-WAVs
    pub effects_dir: PathBuf,
}

impl Default for RtcSettings {
    fn default() -> Self {
        Self {
            is_enabled: true,
            master_volume: 0.5,
            audio_input_device_id: None,
            effects_dir: PathBuf::from("static"),
        }
    }
}

impl RtcSettings {
    /// Lädt die Einstellungen aus dem App-Konfigurationsverzeichnis
    pub fn load() -> Result<Self, SettingsError> {
        let path = Self::settings_path()?;
        let mut settings = Self::load_from(&path)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Lädt die Einstellungen aus einer Datei (fehlend = Defaults)
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::info!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        tracing::info!("Loading settings from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Speichert die Einstellungen im App-Konfigurationsverzeichnis
    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Überschreibt Werte aus Umgebungsvariablen
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(ENV_RTC_DISABLED) {
            if matches!(value.as_str(), "1" | "true" | "yes") {
                self.is_enabled = false;
            }
        }
        if let Ok(dir) = std::env::var(ENV_EFFECTS_DIR) {
            self.effects_dir = PathBuf::from(dir);
        }
    }

    /// Pfad einer Effekt-Datei
    pub fn effect_path(&self, file_name: &str) -> PathBuf {
        self.effects_dir.join(file_name)
    }

    fn settings_path() -> Result<PathBuf, SettingsError> {
        let proj_dirs = directories::ProjectDirs::from("jp", "traP", "qall")
            .ok_or(SettingsError::NoConfigDir)?;

        let mut path = proj_dirs.config_dir().to_path_buf();
        path.push(SETTINGS_FILE);
        Ok(path)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RtcSettings::load_from(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, RtcSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = RtcSettings {
            is_enabled: false,
            master_volume: 0.8,
            audio_input_device_id: Some("USB Mic".to_string()),
            effects_dir: PathBuf::from("/tmp/effects"),
        };
        settings.save_to(&path).unwrap();

        assert_eq!(RtcSettings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file_uses_defaults_for_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "masterVolume": 0.25 }"#).unwrap();

        let settings = RtcSettings::load_from(&path).unwrap();
        assert_eq!(settings.master_volume, 0.25);
        assert!(settings.is_enabled);
        assert!(settings.audio_input_device_id.is_none());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            RtcSettings::load_from(&path),
            Err(SettingsError::Parse(_))
        ));
    }
}
