use super::frame::AudioFeatureFrame;

/// Weight kept from the previous smoothed value on each delivery.
pub const SPECTRUM_RETAIN: f32 = 0.7;
/// Factor applied to beat intensity once per rendered frame.
pub const BEAT_DECAY: f32 = 0.92;

/// Render-thread view of the audio stream: the latest frame plus state
/// derived from every delivery.
#[derive(Debug, Default)]
pub struct AudioFeatureState {
    latest: Option<AudioFeatureFrame>,
    smoothed: Vec<f32>,
    beat_intensity: f32,
    capture_ended: bool,
    deliveries: u64,
}

/// Consistent per-frame read of [`AudioFeatureState`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioSnapshot {
    pub rms: f32,
    pub centroid: f32,
    pub bpm: f32,
    pub beat_intensity: f32,
}

impl AudioFeatureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one delivered frame. Returns false for the end-of-stream
    /// sentinel, which leaves the last analysis untouched.
    pub fn ingest(&mut self, frame: AudioFeatureFrame) -> bool {
        if frame.is_end_of_stream() {
            if !self.capture_ended {
                log::warn!("Audio capture ended; keeping last state");
            }
            self.capture_ended = true;
            return false;
        }

        if self.smoothed.len() == frame.spectrum.len() {
            for (s, &v) in self.smoothed.iter_mut().zip(&frame.spectrum) {
                *s = *s * SPECTRUM_RETAIN + v * (1.0 - SPECTRUM_RETAIN);
            }
        } else {
            log::debug!(
                "Spectrum length {} -> {}, reseeding smoothing",
                self.smoothed.len(),
                frame.spectrum.len()
            );
            self.smoothed.clone_from(&frame.spectrum);
        }

        if frame.beat {
            self.beat_intensity = 1.0;
        }
        self.capture_ended = false;
        self.deliveries += 1;
        self.latest = Some(frame);
        true
    }

    pub fn decay_beat(&mut self) {
        self.beat_intensity *= BEAT_DECAY;
    }

    pub fn mark_capture_ended(&mut self) {
        self.capture_ended = true;
    }

    pub fn capture_ended(&self) -> bool {
        self.capture_ended
    }

    pub fn latest(&self) -> Option<&AudioFeatureFrame> {
        self.latest.as_ref()
    }

    pub fn smoothed_spectrum(&self) -> &[f32] {
        &self.smoothed
    }

    pub fn beat_intensity(&self) -> f32 {
        self.beat_intensity
    }

    pub fn deliveries(&self) -> u64 {
        self.deliveries
    }

    pub fn snapshot(&self) -> AudioSnapshot {
        let (rms, centroid, bpm) = self
            .latest
            .as_ref()
            .map_or((0.0, 0.0, 0.0), |f| (f.rms, f.centroid, f.bpm));
        AudioSnapshot {
            rms,
            centroid,
            bpm,
            beat_intensity: self.beat_intensity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::bloom::bloom_intensity;

    fn frame(spectrum: Vec<f32>) -> AudioFeatureFrame {
        AudioFeatureFrame {
            spectrum,
            rms: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn second_delivery_blends_elementwise() {
        let mut state = AudioFeatureState::new();
        state.ingest(frame(vec![1.0, 1.0, 1.0]));
        state.ingest(frame(vec![0.0, 0.0, 0.0]));
        for &v in state.smoothed_spectrum() {
            assert!((v - 0.7).abs() < 1e-6);
        }
    }

    #[test]
    fn length_change_reseeds() {
        let mut state = AudioFeatureState::new();
        state.ingest(frame(vec![1.0; 4]));
        state.ingest(frame(vec![0.25; 8]));
        assert_eq!(state.smoothed_spectrum(), &[0.25; 8]);
    }

    #[test]
    fn beat_decays_geometrically() {
        let mut state = AudioFeatureState::new();
        state.ingest(AudioFeatureFrame {
            beat: true,
            ..frame(vec![])
        });
        assert_eq!(state.beat_intensity(), 1.0);
        for n in 1..=50 {
            state.decay_beat();
            let expected = BEAT_DECAY.powi(n);
            assert!((state.beat_intensity() - expected).abs() < 1e-5);
        }
        assert!(state.beat_intensity() < 0.05);
    }

    #[test]
    fn non_beat_frame_keeps_intensity() {
        let mut state = AudioFeatureState::new();
        state.ingest(AudioFeatureFrame {
            beat: true,
            ..frame(vec![])
        });
        state.decay_beat();
        state.ingest(frame(vec![]));
        assert!((state.beat_intensity() - 0.92).abs() < 1e-6);
    }

    #[test]
    fn sentinel_marks_capture_ended_and_keeps_state() {
        let mut state = AudioFeatureState::new();
        state.ingest(AudioFeatureFrame {
            rms: 0.4,
            ..frame(vec![0.5])
        });
        assert!(!state.ingest(AudioFeatureFrame::end_of_stream(1.0)));
        assert!(state.capture_ended());
        assert_eq!(state.snapshot().rms, 0.4);
        assert_eq!(state.deliveries(), 1);
    }

    #[test]
    fn beat_frame_then_two_renders() {
        fn render(state: &mut AudioFeatureState, delivered: Option<AudioFeatureFrame>) -> f32 {
            state.decay_beat();
            if let Some(f) = delivered {
                state.ingest(f);
            }
            let s = state.snapshot();
            bloom_intensity(s.rms, s.beat_intensity)
        }

        let mut state = AudioFeatureState::new();
        let beat = AudioFeatureFrame {
            rms: 0.5,
            beat: true,
            bpm: 120.0,
            ..Default::default()
        };
        let first = render(&mut state, Some(beat));
        assert_eq!(state.beat_intensity(), 1.0);
        assert!((first - 0.85).abs() < 1e-6);
        let second = render(&mut state, None);
        assert!((state.beat_intensity() - 0.92).abs() < 1e-6);
        assert!((second - (0.3 + 0.25 + 0.92 * 0.3)).abs() < 1e-6);
        assert_eq!(state.snapshot().bpm, 120.0);
    }
}
