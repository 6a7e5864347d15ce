use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::audio::frame::FFT_SIZES;
use crate::theme::THEMES;
use crate::visual::VisualizationMode;

/// Quiet period before batched changes are written.
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub last_mode: String,
    pub last_theme_index: usize,
    pub last_device_name: Option<String>,
    pub sensitivity: f32,
    pub fft_size: usize,
    pub target_fps: u32,
    pub has_seen_welcome: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_mode: VisualizationMode::Waveform.name().to_string(),
            last_theme_index: 0,
            last_device_name: None,
            sensitivity: 1.0,
            fft_size: 2048,
            target_fps: 60,
            has_seen_welcome: false,
        }
    }
}

impl Settings {
    /// Clamps every field into range. Unknown modes fall back to waveform.
    pub fn validated(mut self) -> Self {
        if VisualizationMode::from_name(&self.last_mode).is_none() {
            self.last_mode = VisualizationMode::Waveform.name().to_string();
        }
        self.last_theme_index %= THEMES.len();
        if !FFT_SIZES.contains(&self.fft_size) {
            self.fft_size = 2048;
        }
        self.sensitivity = if self.sensitivity.is_finite() {
            self.sensitivity.clamp(0.5, 2.0)
        } else {
            1.0
        };
        self.target_fps = self.target_fps.clamp(1, 120);
        self
    }

    pub fn mode(&self) -> VisualizationMode {
        VisualizationMode::from_name(&self.last_mode).unwrap_or(VisualizationMode::Waveform)
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            device_name: self.last_device_name.clone(),
            fft_size: self.fft_size,
            target_fps: self.target_fps,
            sensitivity: self.sensitivity,
        }
    }

    /// Missing or unreadable files yield defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Self>(&json) {
                Ok(settings) => settings.validated(),
                Err(e) => {
                    log::warn!("Ignoring corrupt settings {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("synthwave").join("settings.json"))
}

/// Settings read once at startup; changes are written back after a quiet period.
pub struct SettingsStore {
    path: Option<PathBuf>,
    settings: Settings,
    dirty_since: Option<Instant>,
}

impl SettingsStore {
    /// Opens the store at the platform config path. `reset` ignores the stored file.
    pub fn open(reset: bool) -> Self {
        let path = default_path();
        if path.is_none() {
            log::warn!("No config directory; settings will not persist");
        }
        Self::open_at(path, reset)
    }

    pub fn open_at(path: Option<PathBuf>, reset: bool) -> Self {
        let settings = match (&path, reset) {
            (Some(p), false) => {
                let settings = Settings::load(p);
                log::info!("Loaded settings from {}", p.display());
                settings
            }
            _ => Settings::default(),
        };
        Self {
            path,
            settings,
            dirty_since: None,
        }
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Applies a change at `now`. No-op changes leave the store clean.
    pub fn update(&mut self, now: Instant, f: impl FnOnce(&mut Settings)) {
        let before = self.settings.clone();
        f(&mut self.settings);
        self.settings = std::mem::take(&mut self.settings).validated();
        if self.settings != before {
            self.dirty_since = Some(now);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// Writes if the last change is at least [`SAVE_DEBOUNCE`] old.
    pub fn flush_if_due(&mut self, now: Instant) -> Result<bool> {
        match self.dirty_since {
            Some(since) if now.saturating_duration_since(since) >= SAVE_DEBOUNCE => {
                self.flush()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.dirty_since.take().is_none() {
            return Ok(());
        }
        if let Some(path) = &self.path {
            self.settings.save(path)?;
            log::info!("Saved settings to {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn missing_fields_default_and_values_clamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"lastMode":"spiral","lastThemeIndex":11,"sensitivity":9.0,"fftSize":1000,"targetFps":0}"#,
        )
        .unwrap();
        let settings = Settings::load(&path);
        assert_eq!(settings.mode(), VisualizationMode::Waveform);
        assert_eq!(settings.last_theme_index, 2);
        assert_eq!(settings.sensitivity, 2.0);
        assert_eq!(settings.fft_size, 2048);
        assert_eq!(settings.target_fps, 1);
        assert!(!settings.has_seen_welcome);
    }

    #[test]
    fn camel_case_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            last_mode: "nebula".into(),
            last_device_name: Some("Line In".into()),
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"lastDeviceName\""));
        assert_eq!(Settings::load(&path), settings);
    }

    #[test]
    fn store_debounces_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut store = SettingsStore::open_at(Some(path.clone()), false);
        let t0 = Instant::now();

        store.update(t0, |s| s.last_theme_index = 3);
        store.update(t0 + Duration::from_millis(300), |s| s.sensitivity = 1.5);
        assert!(!store.flush_if_due(t0 + Duration::from_millis(600)).unwrap());
        assert!(!path.exists());

        assert!(store.flush_if_due(t0 + Duration::from_millis(800)).unwrap());
        let saved = Settings::load(&path);
        assert_eq!(saved.last_theme_index, 3);
        assert_eq!(saved.sensitivity, 1.5);
        assert!(!store.is_dirty());
    }

    #[test]
    fn unchanged_update_stays_clean() {
        let mut store = SettingsStore::open_at(None, true);
        store.update(Instant::now(), |s| s.target_fps = 60);
        assert!(!store.is_dirty());
    }

    #[test]
    fn reset_ignores_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        Settings {
            last_theme_index: 5,
            ..Settings::default()
        }
        .save(&path)
        .unwrap();
        let store = SettingsStore::open_at(Some(path), true);
        assert_eq!(store.get().last_theme_index, 0);
    }
}
