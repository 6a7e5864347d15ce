use serde::{Deserialize, Serialize};

/// One analysis result from the audio backend. Immutable once delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFeatureFrame {
    pub spectrum: Vec<f32>,
    pub waveform: Vec<f32>,
    /// Negative means the device disconnected or the stream ended.
    pub rms: f32,
    /// Hz.
    pub centroid: f32,
    pub flux: f32,
    pub zcr: f32,
    /// True only for the frame in which an onset was detected.
    pub beat: bool,
    /// 0 = unknown.
    pub bpm: f32,
    /// Seconds since capture start.
    pub timestamp: f64,
}

impl AudioFeatureFrame {
    /// End-of-stream marker sent by a backend when capture stops.
    pub fn end_of_stream(timestamp: f64) -> Self {
        Self {
            rms: -1.0,
            timestamp,
            ..Self::default()
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.rms < 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDevice {
    pub name: String,
    pub is_default: bool,
    pub is_input: bool,
}

pub const FFT_SIZES: [usize; 4] = [1024, 2048, 4096, 8192];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    pub device_name: Option<String>,
    pub fft_size: usize,
    pub target_fps: u32,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
}

fn default_sensitivity() -> f32 {
    1.0
}

impl AudioConfig {
    /// Clamps every field into its supported range.
    pub fn validated(mut self) -> Self {
        if !FFT_SIZES.contains(&self.fft_size) {
            self.fft_size = 2048;
        }
        self.target_fps = self.target_fps.clamp(1, 120);
        self.sensitivity = self.sensitivity.clamp(0.5, 2.0);
        self
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            fft_size: 2048,
            target_fps: 60,
            sensitivity: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_uses_camel_case_json() {
        let json = r#"{"spectrum":[0.5],"waveform":[],"rms":0.5,"centroid":440.0,
            "flux":0.0,"zcr":0.1,"beat":true,"bpm":120.0,"timestamp":1.5}"#;
        let frame: AudioFeatureFrame = serde_json::from_str(json).unwrap();
        assert!(frame.beat);
        assert_eq!(frame.bpm, 120.0);
        assert!(!frame.is_end_of_stream());
    }

    #[test]
    fn negative_rms_is_end_of_stream() {
        assert!(AudioFeatureFrame::end_of_stream(2.0).is_end_of_stream());
    }

    #[test]
    fn config_validation_clamps() {
        let config = AudioConfig {
            device_name: None,
            fft_size: 3000,
            target_fps: 500,
            sensitivity: 0.1,
        }
        .validated();
        assert_eq!(config.fft_size, 2048);
        assert_eq!(config.target_fps, 120);
        assert_eq!(config.sensitivity, 0.5);
    }

    #[test]
    fn missing_sensitivity_defaults() {
        let config: AudioConfig =
            serde_json::from_str(r#"{"deviceName":null,"fftSize":4096,"targetFps":30}"#).unwrap();
        assert_eq!(config.sensitivity, 1.0);
        assert_eq!(config.fft_size, 4096);
    }
}
