pub mod audio;
pub mod frame;
pub mod modes;
pub mod transition;

use std::collections::HashSet;

use wgpu::{Device, Queue, TextureFormat, TextureView};

use self::audio::{AudioTextures, HISTORY_ROWS};
use self::frame::{FpsCounter, FrameState};
use self::modes::{ModeInputs, ModePrograms};
use self::transition::TransitionOverlay;
use crate::audio::{AudioFeatureFrame, AudioSnapshot};
use crate::error::RenderError;
use crate::gpu::bloom::{BloomCompositor, bloom_intensity};
use crate::gpu::context::{Capabilities, GpuContext};
use crate::gpu::framebuffer::{Blitter, Framebuffer};
use crate::gpu::particle::{ParticleSimulator, ParticleView, StepAudio, particle_camera};
use crate::theme::{self, ColorTransition};
use crate::visual::VisualizationMode;

/// Per-frame inputs from the render loop.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput {
    pub time: f32,
    pub delta: f32,
    pub mode: VisualizationMode,
    pub audio: AudioSnapshot,
}

/// Everything that needs a device. Built by `attach`, released by `dispose`.
struct GpuResources {
    audio: AudioTextures,
    modes: ModePrograms,
    particles: ParticleSimulator,
    bloom: BloomCompositor,
    presentation: Framebuffer,
    transition: TransitionOverlay,
    blitter: Blitter,
    surface_format: TextureFormat,
}

impl GpuResources {
    fn new(
        device: &Device,
        capabilities: Capabilities,
        surface_format: TextureFormat,
        (width, height): (u32, u32),
    ) -> Result<Self, RenderError> {
        let target = capabilities.target_format;
        let audio = AudioTextures::new(device)?;
        let modes = ModePrograms::new(device, target, &audio.layout)?;
        let particles = ParticleSimulator::new(device, target, capabilities.compute_particles)?;
        let bloom = BloomCompositor::new(device, target, target, width, height)?;
        let presentation = Framebuffer::new(device, "presentation", width, height, target)?;
        let transition = TransitionOverlay::new(device, target, surface_format, width, height)?;
        let blitter = Blitter::new(device, &[target, surface_format]);
        Ok(Self {
            audio,
            modes,
            particles,
            bloom,
            presentation,
            transition,
            blitter,
            surface_format,
        })
    }

    fn resize(&mut self, device: &Device, width: u32, height: u32) -> Result<(), RenderError> {
        log::debug!("Resizing render targets to {width}x{height}");
        self.bloom.resize(device, width, height)?;
        self.presentation.resize(device, width, height)?;
        self.transition.resize(device, width, height)
    }

    fn dispose(&mut self) {
        self.audio.dispose();
        self.modes.dispose();
        self.particles.dispose();
        self.bloom.dispose();
        self.presentation.dispose();
        self.transition.dispose();
    }
}

/// Scene orchestrator: one mode per frame, bloom, present, crossfade.
pub struct Renderer {
    state: FrameState,
    colors: ColorTransition,
    fps: FpsCounter,
    gpu: Option<GpuResources>,
    reported: HashSet<String>,
}

impl Renderer {
    /// Context-free construction; GPU resources come with [`Renderer::attach`].
    pub fn new(mode: VisualizationMode, theme_index: usize) -> Self {
        Self {
            state: FrameState::new(mode, (0, 0)),
            colors: ColorTransition::new(theme::theme(theme_index).colors),
            fps: FpsCounter::default(),
            gpu: None,
            reported: HashSet::new(),
        }
    }

    pub fn attach(&mut self, ctx: &GpuContext) -> Result<(), RenderError> {
        self.attach_device(&ctx.device, ctx.capabilities, ctx.format, ctx.size())
    }

    pub fn attach_device(
        &mut self,
        device: &Device,
        capabilities: Capabilities,
        surface_format: TextureFormat,
        size: (u32, u32),
    ) -> Result<(), RenderError> {
        if self.gpu.is_some() {
            log::warn!("Renderer already attached");
            return Ok(());
        }
        self.gpu = Some(GpuResources::new(device, capabilities, surface_format, size)?);
        self.state = FrameState::new(self.state.active_mode(), size);
        log::info!(
            "Renderer attached: {}x{} {:?} targets, particles on {}",
            size.0,
            size.1,
            capabilities.target_format,
            self.gpu
                .as_ref()
                .map_or("none", |gpu| gpu.particles.strategy_name())
        );
        Ok(())
    }

    pub fn set_theme(&mut self, index: usize) {
        self.colors.set_target(theme::theme(index).colors);
    }

    /// Uploads one delivered frame into the audio textures.
    pub fn update_audio_data(
        &mut self,
        queue: &Queue,
        frame: &AudioFeatureFrame,
        smoothed: &[f32],
    ) -> Result<(), RenderError> {
        let gpu = self.gpu.as_mut().ok_or(RenderError::NotAttached)?;
        gpu.audio.upload(queue, frame, smoothed);
        Ok(())
    }

    /// Draws one frame into `target`. Returns an fps estimate every 60 frames.
    pub fn render(
        &mut self,
        device: &Device,
        queue: &Queue,
        target: &TextureView,
        size: (u32, u32),
        input: &FrameInput,
    ) -> Result<Option<f32>, RenderError> {
        let gpu = self.gpu.as_mut().ok_or(RenderError::NotAttached)?;
        let plan = self.state.plan(input.mode, size);
        let colors = *self.colors.advance(input.delta);
        let audio = input.audio;

        if let Some((width, height)) = plan.resize {
            gpu.resize(device, width, height)?;
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame"),
        });

        // The presentation target still holds the previous frame here.
        if plan.snapshot {
            gpu.transition
                .capture(device, &mut encoder, &gpu.blitter, &gpu.presentation)?;
        }
        let overlay_alpha = self.state.commit(&plan, input.delta);

        if plan.mode == VisualizationMode::Particles {
            let step = StepAudio {
                rms: audio.rms,
                beat_intensity: audio.beat_intensity,
            };
            gpu.particles.update(queue, &mut encoder, input.delta, step);
        }

        let (width, height) = gpu.bloom.scene().size();
        let inputs = ModeInputs {
            time: input.time,
            rms: audio.rms,
            centroid: audio.centroid,
            beat_intensity: audio.beat_intensity,
            colors: &colors,
            resolution: [width as f32, height as f32],
            history_offset: gpu.audio.history_offset(),
            history_rows: HISTORY_ROWS,
        };

        gpu.modes.begin_frame();
        let drawn = {
            let mut pass = gpu.bloom.scene().bind(&mut encoder, Some(colors.clear_color()));
            let audio_group = &gpu.audio.bind_group;
            match plan.mode {
                VisualizationMode::Waveform => {
                    gpu.modes.draw_waveform(queue, &mut pass, audio_group, &inputs)
                }
                VisualizationMode::Bars => {
                    gpu.modes.draw_bars(queue, &mut pass, audio_group, &inputs)
                }
                VisualizationMode::Circular => {
                    gpu.modes.draw_circular(queue, &mut pass, audio_group, &inputs)
                }
                VisualizationMode::Particles => gpu.particles.draw(
                    queue,
                    &mut pass,
                    &ParticleView {
                        view_proj: particle_camera(inputs.aspect()),
                        colors: &colors,
                        beat_intensity: audio.beat_intensity,
                        centroid: audio.centroid,
                        resolution: inputs.resolution,
                    },
                ),
                VisualizationMode::Terrain => {
                    gpu.modes.draw_terrain(queue, &mut pass, audio_group, &inputs)
                }
                VisualizationMode::Nebula => {
                    gpu.modes.draw_nebula(queue, &mut pass, audio_group, &inputs)
                }
                VisualizationMode::Starfield => {
                    gpu.modes.draw_starfield(queue, &mut pass, audio_group, &inputs)
                }
            }
        };
        if let Err(e) = drawn {
            report_once(&mut self.reported, plan.mode.name(), &e);
        }

        let intensity = bloom_intensity(audio.rms, audio.beat_intensity);
        if let Err(e) = gpu
            .bloom
            .render(device, queue, &mut encoder, intensity, &gpu.presentation.view)
        {
            report_once(&mut self.reported, "bloom", &e);
        }

        gpu.blitter
            .blit(device, &mut encoder, &gpu.presentation, target, gpu.surface_format)?;

        if let Some(alpha) = overlay_alpha
            && let Err(e) = gpu.transition.draw(device, queue, &mut encoder, target, alpha)
        {
            report_once(&mut self.reported, "transition", &e);
        }

        queue.submit(Some(encoder.finish()));
        Ok(self.fps.record(input.delta))
    }

    /// Last composited frame, before it reached the display surface.
    pub fn presentation(&self) -> Option<&Framebuffer> {
        self.gpu.as_ref().map(|gpu| &gpu.presentation)
    }

    /// Releases every GPU resource. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(mut gpu) = self.gpu.take() {
            gpu.dispose();
            log::info!("Renderer resources released");
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Logs a per-frame failure the first time its message is seen.
fn report_once(seen: &mut HashSet<String>, what: &str, err: &RenderError) -> bool {
    let first = seen.insert(format!("{what}: {err}"));
    if first {
        log::warn!("Skipping {what} draw: {err}");
    }
    first
}
