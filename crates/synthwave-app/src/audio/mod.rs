pub mod frame;
pub mod state;
pub mod synthetic;

pub use frame::{AudioConfig, AudioDevice, AudioFeatureFrame};
pub use state::{AudioFeatureState, AudioSnapshot};
pub use synthetic::SyntheticBackend;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// Capture + analysis source. Runs on its own thread and pushes frames
/// into the channel handed to `start`.
pub trait AudioBackend: Send {
    fn name(&self) -> &str;
    fn devices(&self) -> Vec<AudioDevice>;
    fn start(&mut self, config: &AudioConfig, tx: Sender<AudioFeatureFrame>) -> Result<()>;
    fn stop(&mut self);
}

/// Owns the backend and the render-thread end of its channel.
pub struct AudioSystem {
    backend: Box<dyn AudioBackend>,
    receiver: Option<Receiver<AudioFeatureFrame>>,
    config: AudioConfig,
    state: AudioFeatureState,
    devices: Vec<AudioDevice>,
}

impl AudioSystem {
    pub fn new(backend: Box<dyn AudioBackend>, config: AudioConfig) -> Self {
        let devices = backend.devices();
        log::info!(
            "Audio backend '{}': {} device(s)",
            backend.name(),
            devices.len()
        );
        Self {
            backend,
            receiver: None,
            config: config.validated(),
            state: AudioFeatureState::new(),
            devices,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.stop();
        let (tx, rx) = crossbeam_channel::bounded(4);
        self.backend.start(&self.config, tx)?;
        self.receiver = Some(rx);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.receiver.take().is_some() {
            self.backend.stop();
            self.state.mark_capture_ended();
            log::debug!(
                "Audio capture from '{}' stopped after {} frames",
                self.backend.name(),
                self.state.deliveries()
            );
        }
    }

    pub fn toggle(&mut self) -> Result<()> {
        if self.is_capturing() {
            self.stop();
            Ok(())
        } else {
            self.start()
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.receiver.is_some()
    }

    pub fn devices(&self) -> &[AudioDevice] {
        &self.devices
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Applies a new config, restarting capture if it was running.
    pub fn reconfigure(&mut self, config: AudioConfig) -> Result<()> {
        self.config = config.validated();
        if self.is_capturing() {
            self.start()?;
        }
        Ok(())
    }

    /// Once per rendered frame: decay the beat, then ingest every queued
    /// frame in arrival order. Returns how many frames were ingested.
    pub fn pump(&mut self) -> usize {
        self.state.decay_beat();
        let Some(rx) = &self.receiver else {
            return 0;
        };

        let mut ingested = 0;
        let mut ended = false;
        loop {
            match rx.try_recv() {
                Ok(frame) => {
                    if self.state.ingest(frame) {
                        ingested += 1;
                    } else {
                        ended = true;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    ended = true;
                    break;
                }
            }
        }

        if ended {
            log::warn!("Audio stream from '{}' ended", self.backend.name());
            self.receiver = None;
            self.backend.stop();
            self.state.mark_capture_ended();
        }
        ingested
    }

    pub fn state(&self) -> &AudioFeatureState {
        &self.state
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Backend whose sender is parked for the test to drive.
    struct ManualBackend {
        tx: Arc<Mutex<Option<Sender<AudioFeatureFrame>>>>,
    }

    impl AudioBackend for ManualBackend {
        fn name(&self) -> &str {
            "manual"
        }

        fn devices(&self) -> Vec<AudioDevice> {
            Vec::new()
        }

        fn start(&mut self, _config: &AudioConfig, tx: Sender<AudioFeatureFrame>) -> Result<()> {
            *self.tx.lock().unwrap() = Some(tx);
            Ok(())
        }

        fn stop(&mut self) {
            self.tx.lock().unwrap().take();
        }
    }

    fn manual() -> (AudioSystem, Arc<Mutex<Option<Sender<AudioFeatureFrame>>>>) {
        let tx = Arc::new(Mutex::new(None));
        let system = AudioSystem::new(
            Box::new(ManualBackend { tx: tx.clone() }),
            AudioConfig::default(),
        );
        (system, tx)
    }

    fn send(tx: &Arc<Mutex<Option<Sender<AudioFeatureFrame>>>>, frame: AudioFeatureFrame) {
        tx.lock().unwrap().as_ref().unwrap().try_send(frame).unwrap();
    }

    #[test]
    fn pump_decays_then_ingests_in_order() {
        let (mut system, tx) = manual();
        system.start().unwrap();
        send(
            &tx,
            AudioFeatureFrame {
                spectrum: vec![1.0],
                beat: true,
                rms: 0.2,
                ..Default::default()
            },
        );
        send(
            &tx,
            AudioFeatureFrame {
                spectrum: vec![0.0],
                rms: 0.3,
                ..Default::default()
            },
        );
        assert_eq!(system.pump(), 2);
        assert_eq!(system.state().beat_intensity(), 1.0);
        assert_eq!(system.state().snapshot().rms, 0.3);
        assert!((system.state().smoothed_spectrum()[0] - 0.7).abs() < 1e-6);

        assert_eq!(system.pump(), 0);
        assert!((system.state().beat_intensity() - 0.92).abs() < 1e-6);
    }

    #[test]
    fn disconnect_ends_capture() {
        let (mut system, tx) = manual();
        system.start().unwrap();
        send(
            &tx,
            AudioFeatureFrame {
                rms: 0.5,
                ..Default::default()
            },
        );
        tx.lock().unwrap().take();
        assert_eq!(system.pump(), 1);
        assert!(!system.is_capturing());
        assert!(system.state().capture_ended());
        assert_eq!(system.state().snapshot().rms, 0.5);
    }

    #[test]
    fn sentinel_ends_capture() {
        let (mut system, tx) = manual();
        system.start().unwrap();
        send(&tx, AudioFeatureFrame::end_of_stream(0.0));
        assert_eq!(system.pump(), 0);
        assert!(!system.is_capturing());
    }

    #[test]
    fn toggle_round_trip() {
        let (mut system, _tx) = manual();
        system.toggle().unwrap();
        assert!(system.is_capturing());
        system.toggle().unwrap();
        assert!(!system.is_capturing());
    }
}
