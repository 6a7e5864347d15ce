use std::f32::consts::FRAC_PI_3;

use glam::{Mat4, Vec3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use wgpu::util::DeviceExt;
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, BlendComponent, BlendFactor, BlendOperation, BlendState,
    Buffer, BufferBindingType, CommandEncoder, ComputePipeline, Device,
    PipelineCompilationOptions, PipelineLayoutDescriptor, PrimitiveTopology, Queue, RenderPass,
    ShaderStages, TextureFormat, VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode,
};

use super::cpu::{CpuStepper, initial_particles};
use super::types::{PARTICLE_COUNT, Particle, SimParams, StepAudio};
use crate::error::{RenderError, ShaderStage};
use crate::gpu::context::guarded;
use crate::gpu::ping_pong::PingPong;
use crate::gpu::shader_program::{ProgramDesc, ShaderProgram, compile_stage};
use crate::theme::ThemeColors;

const PARTICLES_UPDATE_CS: &str =
    include_str!("../../../../../assets/shaders/particles_update.wgsl");
const PARTICLES_VS: &str = include_str!("../../../../../assets/shaders/particles.vert.wgsl");
const PARTICLES_FS: &str = include_str!("../../../../../assets/shaders/particles.frag.wgsl");

const WORKGROUP_SIZE: u32 = 256;
const POINT_SCALE: f32 = 1.5;

const INSTANCE_ATTRIBUTES: [VertexAttribute; 3] = [
    VertexAttribute {
        format: VertexFormat::Float32x3,
        offset: 0,
        shader_location: 0,
    },
    VertexAttribute {
        format: VertexFormat::Float32,
        offset: 24,
        shader_location: 1,
    },
    VertexAttribute {
        format: VertexFormat::Float32,
        offset: 28,
        shader_location: 2,
    },
];

/// Camera for the particle mode: 60 degree fov, eye at (0, 1, 4) looking at the origin.
pub fn particle_camera(aspect: f32) -> Mat4 {
    Mat4::perspective_rh(FRAC_PI_3, aspect, 0.1, 100.0)
        * Mat4::look_at_rh(Vec3::new(0.0, 1.0, 4.0), Vec3::ZERO, Vec3::Y)
}

/// Per-draw inputs for rendering the particles.
pub struct ParticleView<'a> {
    pub view_proj: Mat4,
    pub colors: &'a ThemeColors,
    pub beat_intensity: f32,
    pub centroid: f32,
    pub resolution: [f32; 2],
}

struct GpuStepper {
    pipeline: ComputePipeline,
    /// `bind_groups[i]` reads slot `i` and writes the other slot.
    bind_groups: [BindGroup; 2],
    params_buffer: Buffer,
    frame: u32,
}

/// Update strategy, resolved once at construction.
enum ParticleStrategy {
    Gpu(GpuStepper),
    Cpu(CpuStepper),
}

/// Double-buffered particle simulation rendered as additive sprites.
pub struct ParticleSimulator {
    buffers: PingPong<Buffer>,
    strategy: ParticleStrategy,
    program: ShaderProgram,
    count: u32,
}

impl ParticleSimulator {
    pub fn new(
        device: &Device,
        format: TextureFormat,
        use_compute: bool,
    ) -> Result<Self, RenderError> {
        Self::with_count(device, format, use_compute, PARTICLE_COUNT)
    }

    pub fn with_count(
        device: &Device,
        format: TextureFormat,
        use_compute: bool,
        count: u32,
    ) -> Result<Self, RenderError> {
        let seed = rand::random::<u64>();
        let initial = initial_particles(count, &mut StdRng::seed_from_u64(seed));

        let mut usage = wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST;
        if use_compute {
            usage |= wgpu::BufferUsages::STORAGE;
        }
        let make_buffer = |label: &str| {
            guarded(device, label, || {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(&initial),
                    usage,
                })
            })
        };
        let buffers = PingPong::new(make_buffer("particles-a")?, make_buffer("particles-b")?);

        let strategy = if use_compute {
            ParticleStrategy::Gpu(GpuStepper::new(device, &buffers)?)
        } else {
            ParticleStrategy::Cpu(CpuStepper::new(initial, seed))
        };

        let instance_layout = VertexBufferLayout {
            array_stride: std::mem::size_of::<Particle>() as u64,
            step_mode: VertexStepMode::Instance,
            attributes: &INSTANCE_ATTRIBUTES,
        };
        let program = ShaderProgram::new(
            device,
            &ProgramDesc {
                label: "particles",
                vertex: PARTICLES_VS,
                fragment: PARTICLES_FS,
                format,
                blend: Some(BlendState {
                    color: BlendComponent {
                        src_factor: BlendFactor::SrcAlpha,
                        dst_factor: BlendFactor::One,
                        operation: BlendOperation::Add,
                    },
                    alpha: BlendComponent {
                        src_factor: BlendFactor::One,
                        dst_factor: BlendFactor::One,
                        operation: BlendOperation::Add,
                    },
                }),
                topology: PrimitiveTopology::TriangleList,
                vertex_buffers: &[instance_layout],
                input_layouts: &[],
            },
        )?;

        let sim = Self {
            buffers,
            strategy,
            program,
            count,
        };
        log::info!("Particle simulation: {count} particles on the {}", sim.strategy_name());
        Ok(sim)
    }

    pub fn strategy_name(&self) -> &'static str {
        match self.strategy {
            ParticleStrategy::Gpu(_) => "GPU (compute)",
            ParticleStrategy::Cpu(_) => "CPU fallback",
        }
    }

    /// Advances every particle into the next buffer, then swaps roles.
    pub fn update(
        &mut self,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        dt: f32,
        audio: StepAudio,
    ) {
        match &mut self.strategy {
            ParticleStrategy::Gpu(gpu) => {
                gpu.dispatch(queue, encoder, self.buffers.current_index(), self.count, dt, audio);
            }
            ParticleStrategy::Cpu(cpu) => {
                let particles = cpu.step(dt, audio);
                queue.write_buffer(self.buffers.next(), 0, bytemuck::cast_slice(particles));
            }
        }
        self.buffers.swap();
    }

    /// Draws the most recently written buffer into the bound target.
    pub fn draw(
        &mut self,
        queue: &Queue,
        pass: &mut RenderPass<'_>,
        view: &ParticleView<'_>,
    ) -> Result<(), RenderError> {
        self.program.begin_frame();
        self.program.set_mat4("view_proj", &view.view_proj)?;
        self.program.set_vec3("primary", view.colors.primary)?;
        self.program.set_vec3("secondary", view.colors.secondary)?;
        self.program.set_vec3("accent", view.colors.accent)?;
        self.program.set_float("beat_intensity", view.beat_intensity)?;
        self.program.set_float("centroid_hz", view.centroid)?;
        self.program.set_float("point_scale", POINT_SCALE)?;
        self.program.set_vec2("resolution", view.resolution)?;
        self.program.activate(queue, pass);
        pass.set_vertex_buffer(0, self.buffers.current().slice(..));
        // 6 vertices per particle (two triangles = instanced quad)
        pass.draw(0..6, 0..self.count);
        Ok(())
    }

    pub fn dispose(&mut self) {
        for buffer in self.buffers.iter_mut() {
            buffer.destroy();
        }
        if let ParticleStrategy::Gpu(gpu) = &self.strategy {
            gpu.params_buffer.destroy();
        }
        self.program.dispose();
    }
}

impl GpuStepper {
    fn new(device: &Device, buffers: &PingPong<Buffer>) -> Result<Self, RenderError> {
        compile_stage("particles-update", ShaderStage::Compute, PARTICLES_UPDATE_CS)?;

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("particle-sim-params"),
            size: std::mem::size_of::<SimParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("particle-compute-bgl"),
            entries: &[
                // binding 0: sim params
                storage_or_uniform_entry(0, BufferBindingType::Uniform),
                // binding 1: particles_in (read)
                storage_or_uniform_entry(1, BufferBindingType::Storage { read_only: true }),
                // binding 2: particles_out (write)
                storage_or_uniform_entry(2, BufferBindingType::Storage { read_only: false }),
            ],
        });

        let pipeline = guarded(device, "particle-compute-pipeline", || {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("particle-compute"),
                source: wgpu::ShaderSource::Wgsl(PARTICLES_UPDATE_CS.into()),
            });
            let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some("particle-compute-layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("particle-compute-pipeline"),
                layout: Some(&layout),
                module: &module,
                entry_point: Some("cs_main"),
                compilation_options: PipelineCompilationOptions::default(),
                cache: None,
            })
        })?;

        // Bind group i reads from the slot at index i.
        let (current, next) = (buffers.current(), buffers.next());
        let first = compute_bind_group(device, &bgl, &params_buffer, current, next, 0);
        let second = compute_bind_group(device, &bgl, &params_buffer, next, current, 1);
        let bind_groups = if buffers.current_index() == 0 {
            [first, second]
        } else {
            [second, first]
        };

        Ok(Self {
            pipeline,
            bind_groups,
            params_buffer,
            frame: 0,
        })
    }

    fn dispatch(
        &mut self,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        current: usize,
        count: u32,
        dt: f32,
        audio: StepAudio,
    ) {
        self.frame = self.frame.wrapping_add(1);
        let params = SimParams {
            delta_time: dt,
            rms: audio.rms,
            beat_intensity: audio.beat_intensity,
            seed: self.frame.wrapping_mul(2_654_435_761),
            count,
            _pad: [0; 3],
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("particle-sim"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_groups[current], &[]);
        pass.dispatch_workgroups(count.div_ceil(WORKGROUP_SIZE), 1, 1);
    }
}

fn storage_or_uniform_entry(binding: u32, ty: BufferBindingType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn compute_bind_group(
    device: &Device,
    layout: &BindGroupLayout,
    params: &Buffer,
    src: &Buffer,
    dst: &Buffer,
    index: usize,
) -> BindGroup {
    device.create_bind_group(&BindGroupDescriptor {
        label: Some(&format!("particle-compute-bg-{index}")),
        layout,
        entries: &[
            BindGroupEntry {
                binding: 0,
                resource: params.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: src.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 2,
                resource: dst.as_entire_binding(),
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::shader_program::link;

    #[test]
    fn update_shader_validates() {
        let module = compile_stage("update", ShaderStage::Compute, PARTICLES_UPDATE_CS).unwrap();
        assert!(module.entry_points.iter().any(|ep| ep.name == "cs_main"));
    }

    #[test]
    fn render_program_links() {
        let vs = compile_stage("particles", ShaderStage::Vertex, PARTICLES_VS).unwrap();
        let fs = compile_stage("particles", ShaderStage::Fragment, PARTICLES_FS).unwrap();
        let layout = link("particles", &vs, &fs).unwrap().unwrap();
        for name in ["view_proj", "primary", "beat_intensity", "resolution", "point_scale"] {
            assert!(layout.find(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn camera_projects_origin_in_front() {
        let clip = particle_camera(16.0 / 9.0) * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(clip.w > 0.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn cpu_fallback_swaps_once_per_update() {
        let Some((device, queue)) = crate::gpu::context::test_device() else {
            return;
        };
        let mut sim =
            ParticleSimulator::with_count(&device, TextureFormat::Rgba16Float, false, 64).unwrap();
        assert_eq!(sim.strategy_name(), "CPU fallback");
        let mut encoder = device.create_command_encoder(&Default::default());
        let before = sim.buffers.current_index();
        sim.update(&queue, &mut encoder, 1.0 / 60.0, StepAudio::default());
        assert_ne!(sim.buffers.current_index(), before);
        sim.update(&queue, &mut encoder, 1.0 / 60.0, StepAudio::default());
        assert_eq!(sim.buffers.current_index(), before);
        queue.submit(Some(encoder.finish()));
    }
}
