use wgpu::{
    BindGroupEntry, BindGroupLayoutEntry, BindingResource, Device, Queue, Texture, TextureView,
};

use super::bind::data_tex_entry;
use super::context::guarded;
use crate::error::RenderError;

/// Number of samples that fit: longer input is truncated, not rejected.
pub fn upload_len(samples: usize, capacity: u32) -> usize {
    samples.min(capacity as usize)
}

/// Single-channel float texture of `capacity` samples per row, pinned to one
/// binding slot of the audio bind group for its lifetime.
pub struct AudioTexture {
    texture: Texture,
    view: TextureView,
    capacity: u32,
    rows: u32,
    unit: u32,
}

impl AudioTexture {
    pub fn new(
        device: &Device,
        label: &str,
        capacity: u32,
        unit: u32,
    ) -> Result<Self, RenderError> {
        Self::with_rows(device, label, capacity, 1, unit)
    }

    pub fn with_rows(
        device: &Device,
        label: &str,
        capacity: u32,
        rows: u32,
        unit: u32,
    ) -> Result<Self, RenderError> {
        let texture = guarded(device, label, || {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: capacity,
                    height: rows,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            view,
            capacity,
            rows,
            unit,
        })
    }

    /// Writes the first row. Returns how many samples were stored.
    pub fn update(&self, queue: &Queue, samples: &[f32]) -> usize {
        self.update_row(queue, 0, samples)
    }

    pub fn update_row(&self, queue: &Queue, row: u32, samples: &[f32]) -> usize {
        let len = upload_len(samples.len(), self.capacity);
        if len == 0 || row >= self.rows {
            return 0;
        }
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: row, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&samples[..len]),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(len as u32 * 4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: len as u32,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        len
    }

    pub fn layout_entry(&self) -> BindGroupLayoutEntry {
        data_tex_entry(self.unit)
    }

    /// Binds the texture at its fixed slot.
    pub fn bind(&self) -> BindGroupEntry<'_> {
        BindGroupEntry {
            binding: self.unit,
            resource: BindingResource::TextureView(&self.view),
        }
    }

    pub fn dispose(&mut self) {
        self.texture.destroy();
    }
}

/// Circular row cursor for the spectrum history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor {
    offset: u32,
    depth: u32,
}

impl HistoryCursor {
    pub fn new(depth: u32) -> Self {
        Self {
            offset: 0,
            depth: depth.max(1),
        }
    }

    /// Row the next spectrum lands in.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Returns the row to write and moves the cursor one row forward.
    pub fn advance(&mut self) -> u32 {
        let row = self.offset;
        self.offset = (self.offset + 1) % self.depth;
        row
    }
}
