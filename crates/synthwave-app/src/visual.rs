use serde::{Deserialize, Serialize};

use crate::audio::AudioDevice;
use crate::theme::{self, THEMES};

/// The seven visualization modes. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationMode {
    Waveform,
    Bars,
    Circular,
    Particles,
    Terrain,
    Nebula,
    Starfield,
}

impl VisualizationMode {
    pub const ALL: [Self; 7] = [
        Self::Waveform,
        Self::Bars,
        Self::Circular,
        Self::Particles,
        Self::Terrain,
        Self::Nebula,
        Self::Starfield,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Waveform => "waveform",
            Self::Bars => "bars",
            Self::Circular => "circular",
            Self::Particles => "particles",
            Self::Terrain => "terrain",
            Self::Nebula => "nebula",
            Self::Starfield => "starfield",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Mode for keyboard digit `1`..=`7`.
    pub fn from_digit(digit: u8) -> Option<Self> {
        Self::ALL.get(usize::from(digit).checked_sub(1)?).copied()
    }
}

/// Operations the UI shell can request.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    SetMode(VisualizationMode),
    CycleTheme,
    SetTheme(usize),
    ToggleOverlay,
    ToggleControls,
    ToggleSettings,
    ToggleCapture,
    AdjustSensitivity(f32),
    SelectDevice(String),
    ToggleFullscreen,
    ExitFullscreen,
    Screenshot,
    ToggleRecording,
    Quit,
}

/// Mode/theme selection and panel visibility owned by the shell side.
#[derive(Debug, Clone)]
pub struct VisualState {
    pub mode: VisualizationMode,
    pub theme_index: usize,
    pub show_overlay: bool,
    pub show_controls: bool,
    pub show_settings: bool,
    pub fps: f32,
}

impl VisualState {
    pub fn new(mode: VisualizationMode, theme_index: usize) -> Self {
        Self {
            mode,
            theme_index: theme_index % THEMES.len(),
            show_overlay: false,
            show_controls: true,
            show_settings: false,
            fps: 0.0,
        }
    }

    pub fn cycle_theme(&mut self) {
        self.theme_index = theme::next_theme_index(self.theme_index);
    }

    pub fn set_theme(&mut self, index: usize) {
        self.theme_index = index % THEMES.len();
    }
}

/// What the shell displays, captured once per frame.
#[derive(Debug, Clone)]
pub struct ShellSnapshot {
    pub mode: VisualizationMode,
    pub theme_index: usize,
    pub theme_name: &'static str,
    pub fps: f32,
    pub bpm: f32,
    pub beat_intensity: f32,
    pub capturing: bool,
    pub recording: bool,
    pub sensitivity: f32,
    pub devices: Vec<AudioDevice>,
    pub show_overlay: bool,
    pub show_controls: bool,
    pub show_settings: bool,
}

impl ShellSnapshot {
    /// One-line status for the window title.
    pub fn title(&self) -> String {
        let bpm = if self.bpm > 0.0 {
            format!("{:.0} BPM", self.bpm)
        } else {
            "-- BPM".to_string()
        };
        let capture = if self.capturing { "" } else { " | capture off" };
        let recording = if self.recording { " | REC" } else { "" };
        format!(
            "Synthwave | {} | {} | {:.0} fps | {bpm}{capture}{recording}",
            self.mode.name(),
            self.theme_name,
            self.fps
        )
    }

    /// Settings panel contents, one entry per line.
    pub fn settings_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Theme {}: {}", self.theme_index + 1, self.theme_name),
            format!("Sensitivity: {:.1}", self.sensitivity),
            format!("Beat intensity: {:.2}", self.beat_intensity),
            format!(
                "Panels: overlay {}, controls {}, settings {}",
                on_off(self.show_overlay),
                on_off(self.show_controls),
                on_off(self.show_settings)
            ),
        ];
        if self.devices.is_empty() {
            lines.push("Devices: none".to_string());
        }
        for device in self.devices.iter().filter(|d| d.is_input) {
            let marker = if device.is_default { " (default)" } else { "" };
            lines.push(format!("Device: {}{marker}", device.name));
        }
        lines
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
