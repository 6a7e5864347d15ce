use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use wgpu::{
    Adapter, Device, DeviceDescriptor, DownlevelFlags, ErrorFilter, ExperimentalFeatures, Instance,
    InstanceDescriptor, Limits, MemoryHints, PowerPreference, Queue, RequestAdapterOptions,
    Surface, SurfaceConfiguration, SurfaceError, SurfaceTexture, TextureFormat, TextureUsages,
    Trace,
};
use winit::window::Window;

use crate::error::RenderError;

/// Optional GPU features, probed once before the device is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Compute shaders with at least two storage buffers per stage.
    pub compute_particles: bool,
    /// Off-screen target format; `Rgba16Float` unless the adapter can't render to it.
    pub target_format: TextureFormat,
}

impl Capabilities {
    pub const PREFERRED_TARGET: TextureFormat = TextureFormat::Rgba16Float;
    pub const FALLBACK_TARGET: TextureFormat = TextureFormat::Rgba8Unorm;

    pub fn probe(adapter: &Adapter) -> Self {
        let hdr_usages = adapter
            .get_texture_format_features(Self::PREFERRED_TARGET)
            .allowed_usages;
        Self::from_parts(
            adapter.get_downlevel_capabilities().flags,
            &adapter.limits(),
            hdr_usages.contains(TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING),
        )
    }

    pub fn from_parts(flags: DownlevelFlags, limits: &Limits, hdr_renderable: bool) -> Self {
        let compute_particles = flags.contains(DownlevelFlags::COMPUTE_SHADERS)
            && limits.max_storage_buffers_per_shader_stage >= 2;
        let target_format = if hdr_renderable {
            Self::PREFERRED_TARGET
        } else {
            Self::FALLBACK_TARGET
        };
        Self {
            compute_particles,
            target_format,
        }
    }

    fn required_limits(&self, adapter: &Adapter) -> Limits {
        let base = if self.compute_particles {
            Limits::default()
        } else {
            Limits::downlevel_webgl2_defaults()
        };
        base.using_resolution(adapter.limits())
    }
}

pub struct GpuContext {
    pub device: Device,
    pub queue: Queue,
    pub surface: Surface<'static>,
    pub surface_config: SurfaceConfiguration,
    pub format: TextureFormat,
    pub capabilities: Capabilities,
    lost: Arc<AtomicBool>,
}

impl GpuContext {
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let instance = Instance::new(&InstanceDescriptor::default());

        let surface = instance.create_surface(window.clone())?;

        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))?;

        let capabilities = Capabilities::probe(&adapter);
        if capabilities.target_format != Capabilities::PREFERRED_TARGET {
            log::warn!(
                "Adapter cannot render to {:?}; bloom runs on {:?} targets",
                Capabilities::PREFERRED_TARGET,
                capabilities.target_format
            );
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&DeviceDescriptor {
            label: Some("synthwave-device"),
            required_features: wgpu::Features::empty(),
            required_limits: capabilities.required_limits(&adapter),
            experimental_features: ExperimentalFeatures::default(),
            memory_hints: MemoryHints::Performance,
            trace: Trace::Off,
        }))?;

        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::error!("GPU device lost ({reason:?}): {message}");
            lost_flag.store(true, Ordering::Release);
        });

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow::anyhow!("surface reports no supported formats"))?;

        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            desired_maximum_frame_latency: 2,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
        };
        surface.configure(&device, &surface_config);

        log::info!(
            "GPU initialized: {} ({:?}), surface {:?}, targets {:?}",
            adapter.get_info().name,
            adapter.get_info().backend,
            format,
            capabilities.target_format
        );

        Ok(Self {
            device,
            queue,
            surface,
            surface_config,
            format,
            capabilities,
            lost,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(&self.device, &self.surface_config);
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Acquires the next surface frame. `Ok(None)` means skip this frame.
    pub fn acquire(&mut self) -> Result<Option<SurfaceTexture>, RenderError> {
        if self.is_lost() {
            return Err(RenderError::SurfaceLost);
        }
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.surface_config);
                Ok(None)
            }
            Err(SurfaceError::Timeout) => {
                log::warn!("Surface frame timed out, skipping");
                Ok(None)
            }
            Err(SurfaceError::Lost) => Err(RenderError::SurfaceLost),
            Err(SurfaceError::OutOfMemory) => Err(RenderError::ResourceCreation {
                what: "surface frame".into(),
                reason: "out of GPU memory".into(),
            }),
            Err(e) => {
                log::warn!("Surface error: {e}");
                Ok(None)
            }
        }
    }
}

/// Runs `create` inside validation and out-of-memory error scopes so a
/// failed allocation surfaces as an error instead of an invalid handle.
pub fn guarded<T>(
    device: &Device,
    what: &str,
    create: impl FnOnce() -> T,
) -> Result<T, RenderError> {
    device.push_error_scope(ErrorFilter::OutOfMemory);
    device.push_error_scope(ErrorFilter::Validation);
    let value = create();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    match validation.or(out_of_memory) {
        Some(err) => Err(RenderError::ResourceCreation {
            what: what.to_string(),
            reason: err.to_string(),
        }),
        None => Ok(value),
    }
}

/// Headless device for GPU-backed unit tests; `None` when no adapter exists.
#[cfg(test)]
pub fn test_device() -> Option<(Device, Queue)> {
    let instance = Instance::new(&InstanceDescriptor::default());
    let adapter =
        pollster::block_on(instance.request_adapter(&RequestAdapterOptions::default())).ok()?;
    pollster::block_on(adapter.request_device(&DeviceDescriptor::default())).ok()
}
