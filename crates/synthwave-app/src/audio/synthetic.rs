use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::AudioBackend;
use super::frame::{AudioConfig, AudioDevice, AudioFeatureFrame};

const DEVICE_NAME: &str = "Synthetic (120 BPM)";
const SAMPLE_RATE: f32 = 48_000.0;
const BPM: f32 = 120.0;
const WAVEFORM_LEN: usize = 1024;

/// Deterministic kick + hi-hat pattern, analysed directly into frames.
pub struct SyntheticSignal {
    bins: usize,
    sensitivity: f32,
    rng: StdRng,
    prev_spectrum: Vec<f32>,
    last_beat: Option<u64>,
}

impl SyntheticSignal {
    pub fn new(fft_size: usize, sensitivity: f32) -> Self {
        Self {
            bins: fft_size / 2,
            sensitivity,
            rng: StdRng::seed_from_u64(0x5eed),
            prev_spectrum: Vec::new(),
            last_beat: None,
        }
    }

    /// Analysis frame at `t` seconds. `beat` is set on the first frame of each beat.
    pub fn frame_at(&mut self, t: f64) -> AudioFeatureFrame {
        let beats = t * f64::from(BPM) / 60.0;
        let beat_index = beats.floor() as u64;
        let phase = beats.fract() as f32;
        let beat = self.last_beat != Some(beat_index);
        self.last_beat = Some(beat_index);

        // Kick decays over the beat; hi-hat lands on the off-beat.
        let kick = (-phase * 8.0).exp();
        let hat = (-((phase - 0.5).rem_euclid(1.0)) * 30.0).exp();
        let gain = self.sensitivity;

        let bin_hz = SAMPLE_RATE / (self.bins * 2) as f32;
        let drift = (t as f32 * 0.3).sin() * 0.5 + 0.5;
        let spectrum: Vec<f32> = (0..self.bins)
            .map(|i| {
                let hz = i as f32 * bin_hz;
                let bass = kick * (-((hz - 60.0) / 40.0).powi(2)).exp();
                let pad = 0.15 * (0.5 + 0.5 * drift) * (-((hz - 800.0) / 600.0).powi(2)).exp();
                let air = 0.25 * hat * (-((hz - 9_000.0) / 3_000.0).powi(2)).exp();
                let floor = 0.02 / (1.0 + hz / 200.0);
                ((bass + pad + air + floor) * gain).min(1.0)
            })
            .collect();

        let kick_hz = 50.0 + 100.0 * (-phase * 12.0).exp();
        let start = t as f32;
        let waveform: Vec<f32> = (0..WAVEFORM_LEN)
            .map(|n| {
                let s = start + n as f32 / SAMPLE_RATE;
                let noise = self.rng.random::<f32>() * 2.0 - 1.0;
                let tone = (TAU * kick_hz * s).sin() * kick * 0.8;
                let pad = (TAU * 220.0 * s).sin() * 0.1 * drift;
                ((tone + pad + noise * hat * 0.2) * gain).clamp(-1.0, 1.0)
            })
            .collect();

        let rms = (waveform.iter().map(|v| v * v).sum::<f32>() / WAVEFORM_LEN as f32).sqrt();
        let total: f32 = spectrum.iter().sum();
        let centroid = if total > 0.0 {
            spectrum
                .iter()
                .enumerate()
                .map(|(i, m)| i as f32 * bin_hz * m)
                .sum::<f32>()
                / total
        } else {
            0.0
        };
        let flux = if self.prev_spectrum.len() == spectrum.len() {
            spectrum
                .iter()
                .zip(&self.prev_spectrum)
                .map(|(a, b)| (a - b).max(0.0))
                .sum()
        } else {
            0.0
        };
        let crossings = waveform
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        self.prev_spectrum.clone_from(&spectrum);

        AudioFeatureFrame {
            spectrum,
            waveform,
            rms,
            centroid,
            flux,
            zcr: crossings as f32 / WAVEFORM_LEN as f32,
            beat,
            bpm: BPM,
            timestamp: t,
        }
    }
}

/// Built-in backend producing [`SyntheticSignal`] frames on a worker thread.
#[derive(Default)]
pub struct SyntheticBackend {
    running: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn devices(&self) -> Vec<AudioDevice> {
        vec![AudioDevice {
            name: DEVICE_NAME.to_string(),
            is_default: true,
            is_input: true,
        }]
    }

    fn start(&mut self, config: &AudioConfig, tx: Sender<AudioFeatureFrame>) -> Result<()> {
        self.stop();

        let config = config.clone().validated();
        match config.device_name.as_deref() {
            Some(name) if name != DEVICE_NAME => {
                log::warn!("Audio device '{name}' not found, using '{DEVICE_NAME}'");
            }
            _ => {}
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("synthwave-audio".into())
            .spawn(move || synthetic_thread(config, tx, flag))
            .context("failed to spawn audio thread")?;
        self.running = Some((running, handle));
        log::info!("Audio capture started: {DEVICE_NAME}");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((running, handle)) = self.running.take() {
            running.store(false, Ordering::Relaxed);
            if handle.join().is_err() {
                log::error!("Audio thread panicked");
            }
            log::info!("Audio capture stopped");
        }
    }
}

impl Drop for SyntheticBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn synthetic_thread(config: AudioConfig, tx: Sender<AudioFeatureFrame>, running: Arc<AtomicBool>) {
    let mut signal = SyntheticSignal::new(config.fft_size, config.sensitivity);
    let interval = Duration::from_secs_f64(1.0 / f64::from(config.target_fps));
    let start = Instant::now();
    let mut next = start;

    while running.load(Ordering::Relaxed) {
        let frame = signal.frame_at(start.elapsed().as_secs_f64());
        // Non-blocking send; drop if the render thread is behind
        if let Err(crossbeam_channel::TrySendError::Disconnected(_)) = tx.try_send(frame) {
            return;
        }
        next += interval;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        } else {
            next = Instant::now();
        }
    }

    let end = AudioFeatureFrame::end_of_stream(start.elapsed().as_secs_f64());
    let _ = tx.send_timeout(end, Duration::from_millis(250));
}
