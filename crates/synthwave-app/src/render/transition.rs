use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindingResource, BlendState, CommandEncoder, Device, Queue, TextureFormat, TextureView,
};

use crate::error::RenderError;
use crate::gpu::bind::{sampler_entry, tex_entry};
use crate::gpu::framebuffer::{Blitter, Framebuffer};
use crate::gpu::shader_program::{ProgramDesc, ShaderProgram};

const TRANSITION_FS: &str = include_str!("../../../../assets/shaders/transition.frag.wgsl");

/// Snapshot of the last presented frame, faded over the display after a mode switch.
pub struct TransitionOverlay {
    snapshot: Framebuffer,
    program: ShaderProgram,
    bgl: BindGroupLayout,
}

impl TransitionOverlay {
    pub fn new(
        device: &Device,
        snapshot_format: TextureFormat,
        output_format: TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let snapshot =
            Framebuffer::new(device, "transition-snapshot", width, height, snapshot_format)?;
        let bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("transition-bgl"),
            entries: &[tex_entry(0), sampler_entry(1)],
        });
        let program = ShaderProgram::new(
            device,
            &ProgramDesc {
                blend: Some(BlendState::ALPHA_BLENDING),
                ..ProgramDesc::fullscreen("transition", TRANSITION_FS, output_format, &[&bgl])
            },
        )?;
        Ok(Self {
            snapshot,
            program,
            bgl,
        })
    }

    pub fn resize(&mut self, device: &Device, width: u32, height: u32) -> Result<(), RenderError> {
        self.snapshot.resize(device, width, height)?;
        Ok(())
    }

    /// Copies `presented` into the snapshot buffer.
    pub fn capture(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        blitter: &Blitter,
        presented: &Framebuffer,
    ) -> Result<(), RenderError> {
        blitter.blit(device, encoder, presented, &self.snapshot.view, self.snapshot.format)
    }

    /// Blends the snapshot over `target` at `alpha`, keeping what is already there.
    pub fn draw(
        &mut self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        target: &TextureView,
        alpha: f32,
    ) -> Result<(), RenderError> {
        self.program.begin_frame();
        self.program.set_float("alpha", alpha.clamp(0.0, 1.0))?;
        let bg = device.create_bind_group(&BindGroupDescriptor {
            label: Some("transition-bg"),
            layout: &self.bgl,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&self.snapshot.view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.snapshot.sampler),
                },
            ],
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("transition"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.program.activate(queue, &mut pass);
        pass.set_bind_group(1, &bg, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    pub fn dispose(&mut self) {
        self.snapshot.dispose();
        self.program.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShaderStage;
    use crate::gpu::fullscreen_quad::FULLSCREEN_TRIANGLE_VS_WITH_UV;
    use crate::gpu::shader_program::{compile_stage, link};

    #[test]
    fn overlay_program_links() {
        let vs = compile_stage("t", ShaderStage::Vertex, FULLSCREEN_TRIANGLE_VS_WITH_UV).unwrap();
        let fs = compile_stage("t", ShaderStage::Fragment, TRANSITION_FS).unwrap();
        let layout = link("transition", &vs, &fs).unwrap().unwrap();
        assert!(layout.find("alpha").is_some());
    }

    #[test]
    fn snapshot_follows_resize() {
        let Some((device, _queue)) = crate::gpu::context::test_device() else {
            return;
        };
        let mut overlay = TransitionOverlay::new(
            &device,
            TextureFormat::Rgba16Float,
            TextureFormat::Bgra8UnormSrgb,
            320,
            200,
        )
        .unwrap();
        overlay.resize(&device, 640, 400).unwrap();
        assert_eq!(overlay.snapshot.size(), (640, 400));
        overlay.dispose();
    }
}
