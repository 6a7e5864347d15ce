use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, Result};
use winit::window::{Fullscreen, Window};

use crate::audio::{AudioConfig, AudioSystem, SyntheticBackend};
use crate::capture::{self, CaptureHandle, CaptureService, Recorder};
use crate::error::RenderError;
use crate::gpu::GpuContext;
use crate::pacing::FramePacer;
use crate::render::{FrameInput, Renderer};
use crate::settings::SettingsStore;
use crate::theme;
use crate::visual::{ShellCommand, ShellSnapshot, VisualState};

const WINDOW_TITLE: &str = "Synthwave";

pub struct App {
    pub window: Arc<Window>,
    pub gpu: GpuContext,
    pub visual: VisualState,
    pub quit_requested: bool,
    renderer: Renderer,
    audio: AudioSystem,
    settings: SettingsStore,
    pacer: FramePacer,
    capture: CaptureService,
    capture_handle: CaptureHandle,
    recorder: Option<Recorder>,
    /// Recording writers still draining; joined at shutdown.
    finishing: Vec<JoinHandle<u32>>,
    screenshots: Vec<JoinHandle<()>>,
}

impl App {
    pub fn new(window: Arc<Window>, reset_settings: bool) -> Result<Self> {
        let mut settings = SettingsStore::open(reset_settings);
        let initial = settings.get().clone();
        let mode = initial.mode();

        let gpu = GpuContext::new(window.clone())?;
        let mut renderer = Renderer::new(mode, initial.last_theme_index);
        renderer.attach(&gpu).context("creating render resources")?;

        let mut audio = AudioSystem::new(Box::new(SyntheticBackend::new()), initial.audio_config());
        if let Err(e) = audio.start() {
            log::warn!("Audio capture unavailable, rendering idle: {e:#}");
        }

        let now = Instant::now();
        if !initial.has_seen_welcome {
            log::info!(
                "Keys: 1-7 modes, T theme, I overlay, Space capture, +/- sensitivity, F fullscreen, Ctrl+Shift+S screenshot, Ctrl+R record"
            );
            settings.update(now, |s| s.has_seen_welcome = true);
        }

        let (capture_handle, capture) = capture::channel();
        let app = Self {
            window,
            gpu,
            visual: VisualState::new(mode, initial.last_theme_index),
            quit_requested: false,
            renderer,
            audio,
            settings,
            pacer: FramePacer::new(initial.target_fps, now),
            capture,
            capture_handle,
            recorder: None,
            finishing: Vec::new(),
            screenshots: Vec::new(),
        };
        app.refresh_title();
        Ok(app)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
    }

    pub fn next_deadline(&self) -> Instant {
        self.pacer.next_deadline()
    }

    pub fn snapshot(&self) -> ShellSnapshot {
        let audio = self.audio.state().snapshot();
        ShellSnapshot {
            mode: self.visual.mode,
            theme_index: self.visual.theme_index,
            theme_name: theme::theme(self.visual.theme_index).name,
            fps: self.visual.fps,
            bpm: audio.bpm,
            beat_intensity: audio.beat_intensity,
            capturing: self.audio.is_capturing(),
            recording: self.recorder.is_some(),
            sensitivity: self.audio.config().sensitivity,
            devices: self.audio.devices().to_vec(),
            show_overlay: self.visual.show_overlay,
            show_controls: self.visual.show_controls,
            show_settings: self.visual.show_settings,
        }
    }

    fn refresh_title(&self) {
        let snapshot = self.snapshot();
        if snapshot.show_overlay {
            self.window.set_title(&snapshot.title());
        } else {
            self.window.set_title(WINDOW_TITLE);
        }
    }

    pub fn apply(&mut self, command: ShellCommand) {
        let now = Instant::now();
        match command {
            ShellCommand::SetMode(mode) => {
                if self.visual.mode != mode {
                    self.visual.mode = mode;
                    log::info!("Mode: {}", mode.name());
                    self.settings
                        .update(now, |s| s.last_mode = mode.name().to_string());
                    self.refresh_title();
                }
            }
            ShellCommand::CycleTheme => {
                self.visual.cycle_theme();
                self.theme_changed(now);
            }
            ShellCommand::SetTheme(index) => {
                self.visual.set_theme(index);
                self.theme_changed(now);
            }
            ShellCommand::ToggleOverlay => {
                self.visual.show_overlay = !self.visual.show_overlay;
                self.refresh_title();
            }
            ShellCommand::ToggleControls => {
                self.visual.show_controls = !self.visual.show_controls;
                log::info!("Controls {}", shown(self.visual.show_controls));
            }
            ShellCommand::ToggleSettings => {
                self.visual.show_settings = !self.visual.show_settings;
                log::info!("Settings panel {}", shown(self.visual.show_settings));
                if self.visual.show_settings {
                    for line in self.snapshot().settings_lines() {
                        log::info!("  {line}");
                    }
                }
            }
            ShellCommand::ToggleCapture => match self.audio.toggle() {
                Ok(()) if self.audio.is_capturing() => log::info!("Audio capture started"),
                Ok(()) => log::info!("Audio capture stopped"),
                Err(e) => log::warn!("Failed to start audio capture: {e:#}"),
            },
            ShellCommand::AdjustSensitivity(step) => {
                let current = self.audio.config().sensitivity;
                let sensitivity = (((current + step) * 10.0).round() / 10.0).clamp(0.5, 2.0);
                if sensitivity != current {
                    log::info!("Sensitivity: {sensitivity:.1}");
                    self.reconfigure_audio(|c| c.sensitivity = sensitivity);
                    self.settings.update(now, |s| s.sensitivity = sensitivity);
                }
            }
            ShellCommand::SelectDevice(name) => {
                log::info!("Audio device: {name}");
                let device = Some(name);
                self.reconfigure_audio(|c| c.device_name.clone_from(&device));
                self.settings.update(now, |s| s.last_device_name = device);
            }
            ShellCommand::ToggleFullscreen => {
                if self.window.fullscreen().is_some() {
                    self.window.set_fullscreen(None);
                } else {
                    self.window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                }
            }
            ShellCommand::ExitFullscreen => {
                if self.window.fullscreen().is_some() {
                    self.window.set_fullscreen(None);
                }
            }
            ShellCommand::Screenshot => {
                self.screenshots.retain(|writer| !writer.is_finished());
                match capture::save_still(&self.capture_handle, capture::capture_dir()) {
                    Ok(writer) => self.screenshots.push(writer),
                    Err(e) => log::error!("Screenshot failed: {e:#}"),
                }
            }
            ShellCommand::ToggleRecording => self.toggle_recording(),
            ShellCommand::Quit => self.quit_requested = true,
        }
    }

    fn theme_changed(&mut self, now: Instant) {
        let index = self.visual.theme_index;
        log::info!("Theme: {}", theme::theme(index).name);
        self.renderer.set_theme(index);
        self.settings.update(now, |s| s.last_theme_index = index);
        self.refresh_title();
    }

    fn reconfigure_audio(&mut self, edit: impl FnOnce(&mut AudioConfig)) {
        let mut config = self.audio.config().clone();
        edit(&mut config);
        if let Err(e) = self.audio.reconfigure(config) {
            log::warn!("Failed to restart audio capture: {e:#}");
        }
    }

    fn toggle_recording(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            log::info!("Recording stopped");
            self.finishing.push(recorder.stop(&self.capture_handle));
            return;
        }
        match Recorder::start(&self.capture_handle, &capture::capture_dir()) {
            Ok(recorder) => {
                log::info!("Recording started");
                self.recorder = Some(recorder);
            }
            Err(e) => log::error!("Failed to start recording: {e:#}"),
        }
    }

    /// Runs one frame. Returns false when the session cannot continue.
    pub fn redraw(&mut self) -> bool {
        let now = Instant::now();
        let frame = self.pacer.tick(now);

        if self.audio.pump() > 0
            && let Some(latest) = self.audio.state().latest()
            && let Err(e) = self.renderer.update_audio_data(
                &self.gpu.queue,
                latest,
                self.audio.state().smoothed_spectrum(),
            )
        {
            log::warn!("Audio texture upload skipped: {e}");
        }

        let output = match self.gpu.acquire() {
            Ok(Some(output)) => output,
            Ok(None) => return true,
            Err(RenderError::SurfaceLost) => {
                log::error!("GPU surface lost; the session has to be restarted");
                return false;
            }
            Err(e) => {
                log::error!("Cannot acquire a frame: {e}");
                return false;
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let input = FrameInput {
            time: frame.time,
            delta: frame.delta,
            mode: self.visual.mode,
            audio: self.audio.state().snapshot(),
        };
        match self
            .renderer
            .render(&self.gpu.device, &self.gpu.queue, &view, self.gpu.size(), &input)
        {
            Ok(Some(fps)) => {
                self.visual.fps = fps;
                log::debug!("{fps:.1} fps");
                if self.visual.show_overlay {
                    self.refresh_title();
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Frame skipped: {e}"),
        }

        self.window.pre_present_notify();
        output.present();

        if let Some(presentation) = self.renderer.presentation()
            && let Err(e) = self
                .capture
                .service(&self.gpu.device, &self.gpu.queue, presentation)
        {
            log::warn!("Capture skipped: {e}");
        }

        if let Err(e) = self.settings.flush_if_due(now) {
            log::warn!("Failed to save settings: {e:#}");
        }
        true
    }

    /// Stops capture and recording, writes pending settings and frees the GPU.
    pub fn shutdown(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            self.finishing.push(recorder.stop(&self.capture_handle));
        }
        self.capture.dispose();
        for writer in self.finishing.drain(..) {
            if writer.join().is_err() {
                log::error!("Recording writer panicked");
            }
        }
        for writer in self.screenshots.drain(..) {
            if writer.join().is_err() {
                log::error!("Screenshot writer panicked");
            }
        }
        self.audio.stop();
        if self.settings.is_dirty() {
            log::debug!("Writing pending settings");
        }
        if let Err(e) = self.settings.flush() {
            log::error!("Failed to save settings: {e:#}");
        }
        self.renderer.dispose();
        log::info!("Shut down");
    }
}

fn shown(visible: bool) -> &'static str {
    if visible { "shown" } else { "hidden" }
}
