use std::collections::HashMap;

use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindingResource, Color, ColorTargetState, CommandEncoder, Device, FragmentState,
    PipelineCompilationOptions, PipelineLayoutDescriptor, PrimitiveState, RenderPass,
    RenderPipeline, Sampler, Texture, TextureFormat, TextureView, VertexState,
};

use super::bind::{sampler_entry, tex_entry};
use super::context::guarded;
use super::fullscreen_quad::FULLSCREEN_TRIANGLE_VS_WITH_UV;
use crate::error::RenderError;

const BLIT_FS: &str = include_str!("../../../../assets/shaders/blit.wgsl");

/// An off-screen colour target: texture, view and a linear sampler for
/// passes that read it back.
pub struct Framebuffer {
    texture: Texture,
    pub view: TextureView,
    pub sampler: Sampler,
    pub format: TextureFormat,
    width: u32,
    height: u32,
    label: String,
    allocations: u32,
}

impl Framebuffer {
    pub fn new(
        device: &Device,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Self, RenderError> {
        let w = width.max(1);
        let h = height.max(1);
        let (texture, view) = allocate(device, label, w, h, format)?;
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{label}-sampler")),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });

        Ok(Self {
            texture,
            view,
            sampler,
            format,
            width: w,
            height: h,
            label: label.to_string(),
            allocations: 1,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Reallocates the backing texture when the size changes. Contents are
    /// not preserved. Returns whether a reallocation happened.
    pub fn resize(
        &mut self,
        device: &Device,
        width: u32,
        height: u32,
    ) -> Result<bool, RenderError> {
        let w = width.max(1);
        let h = height.max(1);
        if w == self.width && h == self.height {
            return Ok(false);
        }
        let (texture, view) = allocate(device, &self.label, w, h, self.format)?;
        self.texture.destroy();
        self.texture = texture;
        self.view = view;
        self.width = w;
        self.height = h;
        self.allocations += 1;
        log::debug!("{} resized (allocation #{})", self.label, self.allocations);
        Ok(true)
    }

    /// Opens a render pass on this target. The viewport covers the whole
    /// target; dropping the pass returns to the default target.
    pub fn bind<'e>(
        &self,
        encoder: &'e mut CommandEncoder,
        clear: Option<Color>,
    ) -> RenderPass<'e> {
        let load = match clear {
            Some(color) => wgpu::LoadOp::Clear(color),
            None => wgpu::LoadOp::Load,
        };
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&self.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }

    pub fn dispose(&mut self) {
        self.texture.destroy();
    }

    #[cfg(test)]
    pub fn allocations(&self) -> u32 {
        self.allocations
    }
}

fn allocate(
    device: &Device,
    label: &str,
    width: u32,
    height: u32,
    format: TextureFormat,
) -> Result<(Texture, TextureView), RenderError> {
    let texture = guarded(device, label, || {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    })?;
    log::debug!("Allocated {label} {width}x{height} {format:?}");
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok((texture, view))
}

/// Nearest-neighbour copy between targets of any size, one pipeline per
/// destination format.
pub struct Blitter {
    bgl: BindGroupLayout,
    sampler: Sampler,
    pipelines: HashMap<TextureFormat, RenderPipeline>,
}

impl Blitter {
    pub fn new(device: &Device, formats: &[TextureFormat]) -> Self {
        let bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("blit-bgl"),
            entries: &[tex_entry(0), sampler_entry(1)],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit-sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let full_source = format!("{FULLSCREEN_TRIANGLE_VS_WITH_UV}\n{BLIT_FS}");
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit"),
            source: wgpu::ShaderSource::Wgsl(full_source.into()),
        });
        let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("blit-layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipelines = formats
            .iter()
            .map(|&format| {
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&format!("blit-{format:?}")),
                    layout: Some(&layout),
                    vertex: VertexState {
                        module: &module,
                        entry_point: Some("vs_main"),
                        buffers: &[],
                        compilation_options: PipelineCompilationOptions::default(),
                    },
                    fragment: Some(FragmentState {
                        module: &module,
                        entry_point: Some("fs_main"),
                        targets: &[Some(ColorTargetState {
                            format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: PipelineCompilationOptions::default(),
                    }),
                    primitive: PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                });
                (format, pipeline)
            })
            .collect();

        Self {
            bgl,
            sampler,
            pipelines,
        }
    }

    pub fn blit(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        src: &Framebuffer,
        dst: &TextureView,
        dst_format: TextureFormat,
    ) -> Result<(), RenderError> {
        let pipeline =
            self.pipelines
                .get(&dst_format)
                .ok_or_else(|| RenderError::ResourceCreation {
                    what: format!("blit pipeline for {dst_format:?}"),
                    reason: "format was not registered".into(),
                })?;
        let bg = device.create_bind_group(&BindGroupDescriptor {
            label: Some("blit-bg"),
            layout: &self.bgl,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&src.view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("blit"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: dst,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::test_device;

    #[test]
    fn resize_to_same_size_does_not_reallocate() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let mut fb =
            Framebuffer::new(&device, "test-fb", 320, 200, TextureFormat::Rgba16Float).unwrap();
        assert!(!fb.resize(&device, 320, 200).unwrap());
        assert_eq!(fb.allocations(), 1);
        assert_eq!(fb.size(), (320, 200));
    }

    #[test]
    fn resize_to_new_size_takes_requested_dims() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let mut fb =
            Framebuffer::new(&device, "test-fb", 320, 200, TextureFormat::Rgba16Float).unwrap();
        assert!(fb.resize(&device, 641, 359).unwrap());
        assert_eq!(fb.width(), 641);
        assert_eq!(fb.height(), 359);
        assert_eq!(fb.allocations(), 2);
    }

    #[test]
    fn zero_size_clamps_to_one_texel() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let fb = Framebuffer::new(&device, "test-fb", 0, 0, TextureFormat::Rgba8Unorm).unwrap();
        assert_eq!(fb.size(), (1, 1));
    }
}
