use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindingResource, CommandEncoder, Device, Queue, TextureFormat, TextureView,
};

use super::bind::{sampler_entry, tex_entry};
use super::framebuffer::Framebuffer;
use super::shader_program::{ProgramDesc, ShaderProgram};
use crate::error::RenderError;

const BLOOM_EXTRACT_FS: &str = include_str!("../../../../assets/shaders/bloom_extract.wgsl");
const BLOOM_BLUR_FS: &str = include_str!("../../../../assets/shaders/bloom_blur.wgsl");
const BLOOM_COMPOSITE_FS: &str = include_str!("../../../../assets/shaders/bloom_composite.wgsl");

/// Bright-pass cutoff (luma). Pixels at or above it pass unchanged.
pub const BLOOM_THRESHOLD: f32 = 0.3;

/// Per-frame bloom strength: grows with loudness and on beats.
pub fn bloom_intensity(rms: f32, beat_intensity: f32) -> f32 {
    0.3 + rms * 0.5 + beat_intensity * 0.3
}

/// Blur target size for a full-resolution scene.
pub fn half_extent(width: u32, height: u32) -> (u32, u32) {
    ((width / 2).max(1), (height / 2).max(1))
}

/// Extract -> horizontal blur -> vertical blur -> additive composite.
/// Blur passes run on two half-resolution targets, the vertical pass
/// writing back into the extract target.
pub struct BloomCompositor {
    scene: Framebuffer,
    ping: Framebuffer,
    pong: Framebuffer,
    extract: ShaderProgram,
    blur: ShaderProgram,
    composite: ShaderProgram,
    input_bgl: BindGroupLayout,
    composite_bgl: BindGroupLayout,
}

impl BloomCompositor {
    pub fn new(
        device: &Device,
        target_format: TextureFormat,
        output_format: TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let (hw, hh) = half_extent(width, height);
        let scene = Framebuffer::new(device, "bloom-scene", width, height, target_format)?;
        let ping = Framebuffer::new(device, "bloom-ping", hw, hh, target_format)?;
        let pong = Framebuffer::new(device, "bloom-pong", hw, hh, target_format)?;

        let input_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("bloom-input-bgl"),
            entries: &[tex_entry(0), sampler_entry(1)],
        });
        let composite_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("bloom-composite-bgl"),
            entries: &[
                tex_entry(0),     // scene
                sampler_entry(1), // scene sampler
                tex_entry(2),     // blurred bright pass
                sampler_entry(3), // bloom sampler
            ],
        });

        let extract = ShaderProgram::new(
            device,
            &ProgramDesc::fullscreen(
                "bloom-extract",
                BLOOM_EXTRACT_FS,
                target_format,
                &[&input_bgl],
            ),
        )?;
        let blur = ShaderProgram::new(
            device,
            &ProgramDesc::fullscreen("bloom-blur", BLOOM_BLUR_FS, target_format, &[&input_bgl]),
        )?;
        let composite = ShaderProgram::new(
            device,
            &ProgramDesc::fullscreen(
                "bloom-composite",
                BLOOM_COMPOSITE_FS,
                output_format,
                &[&composite_bgl],
            ),
        )?;

        Ok(Self {
            scene,
            ping,
            pong,
            extract,
            blur,
            composite,
            input_bgl,
            composite_bgl,
        })
    }

    /// Full-resolution target the active mode draws into.
    pub fn scene(&self) -> &Framebuffer {
        &self.scene
    }

    pub fn resize(&mut self, device: &Device, width: u32, height: u32) -> Result<(), RenderError> {
        let (hw, hh) = half_extent(width, height);
        self.scene.resize(device, width, height)?;
        self.ping.resize(device, hw, hh)?;
        self.pong.resize(device, hw, hh)?;
        Ok(())
    }

    /// Runs all four passes, compositing into `target`.
    pub fn render(
        &mut self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        intensity: f32,
        target: &TextureView,
    ) -> Result<(), RenderError> {
        self.extract.begin_frame();
        self.blur.begin_frame();
        self.composite.begin_frame();

        let resolution = [self.ping.width() as f32, self.ping.height() as f32];

        // Pass 1: bright pass, scene -> ping
        self.extract.set_float("threshold", BLOOM_THRESHOLD)?;
        let bg = self.input_group(device, "bloom-extract-bg", &self.scene);
        fullscreen_pass(encoder, "bloom-extract", &self.ping.view, queue, &mut self.extract, &bg);

        // Pass 2: horizontal blur, ping -> pong
        self.blur.set_vec2("direction", [1.0, 0.0])?;
        self.blur.set_vec2("resolution", resolution)?;
        let bg = self.input_group(device, "bloom-blur-h-bg", &self.ping);
        fullscreen_pass(encoder, "bloom-blur-h", &self.pong.view, queue, &mut self.blur, &bg);

        // Pass 3: vertical blur, pong -> ping
        self.blur.set_vec2("direction", [0.0, 1.0])?;
        let bg = self.input_group(device, "bloom-blur-v-bg", &self.pong);
        fullscreen_pass(encoder, "bloom-blur-v", &self.ping.view, queue, &mut self.blur, &bg);

        // Pass 4: scene + bloom * intensity -> target
        self.composite.set_float("intensity", intensity)?;
        let bg = device.create_bind_group(&BindGroupDescriptor {
            label: Some("bloom-composite-bg"),
            layout: &self.composite_bgl,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&self.scene.view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.scene.sampler),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(&self.ping.view),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::Sampler(&self.ping.sampler),
                },
            ],
        });
        fullscreen_pass(encoder, "bloom-composite", target, queue, &mut self.composite, &bg);
        Ok(())
    }

    fn input_group(&self, device: &Device, label: &str, src: &Framebuffer) -> BindGroup {
        device.create_bind_group(&BindGroupDescriptor {
            label: Some(label),
            layout: &self.input_bgl,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&src.view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&src.sampler),
                },
            ],
        })
    }

    pub fn dispose(&mut self) {
        self.scene.dispose();
        self.ping.dispose();
        self.pong.dispose();
        self.extract.dispose();
        self.blur.dispose();
        self.composite.dispose();
    }
}

fn fullscreen_pass(
    encoder: &mut CommandEncoder,
    label: &str,
    target: &TextureView,
    queue: &Queue,
    program: &mut ShaderProgram,
    inputs: &BindGroup,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    program.activate(queue, &mut pass);
    pass.set_bind_group(1, inputs, &[]);
    pass.draw(0..3, 0..1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShaderStage;
    use crate::gpu::fullscreen_quad::FULLSCREEN_TRIANGLE_VS_WITH_UV;
    use crate::gpu::shader_program::{compile_stage, link};

    #[test]
    fn intensity_follows_loudness_and_beat() {
        assert!((bloom_intensity(0.5, 1.0) - 0.85).abs() < 1e-6);
        assert!((bloom_intensity(0.0, 0.0) - 0.3).abs() < 1e-6);
        let decayed = bloom_intensity(0.5, 0.92);
        assert!((decayed - (0.3 + 0.25 + 0.276)).abs() < 1e-6);
    }

    #[test]
    fn half_extent_uses_integer_division() {
        assert_eq!(half_extent(1920, 1080), (960, 540));
        assert_eq!(half_extent(1281, 721), (640, 360));
        assert_eq!(half_extent(1, 1), (1, 1));
    }

    #[test]
    fn bloom_programs_link() {
        let vs = compile_stage("fullscreen", ShaderStage::Vertex, FULLSCREEN_TRIANGLE_VS_WITH_UV)
            .unwrap();
        for (label, src, uniform) in [
            ("extract", BLOOM_EXTRACT_FS, "threshold"),
            ("blur", BLOOM_BLUR_FS, "direction"),
            ("composite", BLOOM_COMPOSITE_FS, "intensity"),
        ] {
            let fs = compile_stage(label, ShaderStage::Fragment, src).unwrap();
            let layout = link(label, &vs, &fs).unwrap().unwrap();
            assert!(layout.find(uniform).is_some(), "{label} lacks {uniform}");
        }
    }

    #[test]
    fn resize_recomputes_half_resolution_targets() {
        let Some((device, _queue)) = crate::gpu::context::test_device() else {
            return;
        };
        let format = TextureFormat::Rgba16Float;
        let mut bloom = BloomCompositor::new(&device, format, format, 800, 600).unwrap();
        assert_eq!(bloom.ping.size(), (400, 300));
        bloom.resize(&device, 1025, 767).unwrap();
        assert_eq!(bloom.scene().size(), (1025, 767));
        assert_eq!(bloom.ping.size(), (512, 383));
        assert_eq!(bloom.pong.size(), (512, 383));
    }

    /// Composites a flat grey scene at intensity 0.3 and reads back one pixel.
    fn composite_flat_grey(device: &Device, queue: &Queue, grey: f64) -> u8 {
        let format = TextureFormat::Rgba8Unorm;
        let mut bloom = BloomCompositor::new(device, format, format, 8, 8).unwrap();
        let out = Framebuffer::new(device, "out", 8, 8, format).unwrap();
        let mut encoder = device.create_command_encoder(&Default::default());
        let clear = wgpu::Color {
            r: grey,
            g: grey,
            b: grey,
            a: 1.0,
        };
        drop(bloom.scene().bind(&mut encoder, Some(clear)));
        bloom.render(device, queue, &mut encoder, 0.3, &out.view).unwrap();
        queue.submit(Some(encoder.finish()));

        let (handle, mut capture) = crate::capture::channel();
        let still = handle.request_still().unwrap();
        for _ in 0..100 {
            capture.service(device, queue, &out).unwrap();
            let _ = device.poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            });
            if let Ok(frame) = still.try_recv() {
                capture.dispose();
                return frame.rgba[(4 * 8 + 4) * 4];
            }
        }
        panic!("no frame read back");
    }

    #[test]
    fn bright_pass_is_a_hard_cutoff() {
        let Some((device, queue)) = crate::gpu::context::test_device() else {
            return;
        };
        // Just above the cutoff the whole colour blooms: 0.35 * (1 + 0.3).
        let above = composite_flat_grey(&device, &queue, 0.35);
        assert!((113..=119).contains(&above), "{above}");
        // Below it nothing is added.
        let below = composite_flat_grey(&device, &queue, 0.25);
        assert!((63..=65).contains(&below), "{below}");
    }
}
