use std::num::NonZeroU64;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Binding, Module, ShaderStage as NagaStage};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, BlendState, Buffer, BufferBinding,
    BufferBindingType, ColorTargetState, Device, FragmentState, MultisampleState,
    PipelineCompilationOptions, PipelineLayoutDescriptor, PrimitiveState, PrimitiveTopology,
    Queue, RenderPass, RenderPipeline, ShaderStages, TextureFormat, VertexBufferLayout,
    VertexState,
};

use super::uniforms::{UniformBlock, UniformKind, UniformLayout, UniformValue};
use crate::error::{RenderError, ShaderStage};

/// Uniform uploads a program can take per frame before slots are reused.
const UNIFORM_SLOTS: u32 = 8;

pub struct ProgramDesc<'a> {
    pub label: &'a str,
    pub vertex: &'a str,
    pub fragment: &'a str,
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
    pub topology: PrimitiveTopology,
    pub vertex_buffers: &'a [VertexBufferLayout<'a>],
    /// Layouts for groups 1.. (group 0 is the program's own uniform block).
    pub input_layouts: &'a [&'a BindGroupLayout],
}

impl<'a> ProgramDesc<'a> {
    /// Fullscreen-triangle program with no blending and no vertex buffers.
    pub fn fullscreen(
        label: &'a str,
        fragment: &'a str,
        format: TextureFormat,
        input_layouts: &'a [&'a BindGroupLayout],
    ) -> Self {
        Self {
            label,
            vertex: super::fullscreen_quad::FULLSCREEN_TRIANGLE_VS_WITH_UV,
            fragment,
            format,
            blend: None,
            topology: PrimitiveTopology::TriangleList,
            vertex_buffers: &[],
            input_layouts,
        }
    }
}

/// Parses and validates one WGSL stage.
pub fn compile_stage(label: &str, stage: ShaderStage, source: &str) -> Result<Module, RenderError> {
    let compile_error = |log: String| RenderError::ShaderCompile {
        label: label.to_string(),
        stage,
        log,
    };
    let module =
        naga::front::wgsl::parse_str(source).map_err(|e| compile_error(e.emit_to_string(source)))?;
    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|e| compile_error(e.emit_to_string(source)))?;
    Ok(module)
}

/// Host-side link of a vertex/fragment pair: entry points, stage interface and
/// shared uniform layout. Returns the merged uniform layout.
pub fn link(
    label: &str,
    vertex: &Module,
    fragment: &Module,
) -> Result<Option<UniformLayout>, RenderError> {
    let link_error = |log: String| RenderError::ShaderLink {
        label: label.to_string(),
        log,
    };

    let vs = vertex
        .entry_points
        .iter()
        .find(|ep| ep.stage == NagaStage::Vertex && ep.name == "vs_main")
        .ok_or_else(|| link_error("vertex stage has no vs_main entry point".into()))?;
    let fs = fragment
        .entry_points
        .iter()
        .find(|ep| ep.stage == NagaStage::Fragment && ep.name == "fs_main")
        .ok_or_else(|| link_error("fragment stage has no fs_main entry point".into()))?;

    let mut outputs = Vec::new();
    if let Some(result) = &vs.function.result {
        collect_locations(vertex, result.ty, result.binding.as_ref(), &mut outputs);
    }
    let mut inputs = Vec::new();
    for arg in &fs.function.arguments {
        collect_locations(fragment, arg.ty, arg.binding.as_ref(), &mut inputs);
    }
    for (location, kind) in &inputs {
        match outputs.iter().find(|(l, _)| l == location) {
            None => {
                return Err(link_error(format!(
                    "fragment input @location({location}) is not written by the vertex stage"
                )));
            }
            Some((_, out_kind)) if out_kind != kind => {
                return Err(link_error(format!(
                    "@location({location}) is {} in the vertex stage but {} in the fragment stage",
                    out_kind.name(),
                    kind.name()
                )));
            }
            Some(_) => {}
        }
    }

    let vs_uniforms = UniformLayout::reflect(vertex).map_err(link_error)?;
    let fs_uniforms = UniformLayout::reflect(fragment).map_err(link_error)?;
    match (vs_uniforms, fs_uniforms) {
        (Some(a), Some(b)) if a != b => Err(link_error(
            "uniform block layout differs between vertex and fragment stages".into(),
        )),
        (Some(a), _) => Ok(Some(a)),
        (None, b) => Ok(b),
    }
}

fn collect_locations(
    module: &Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    out: &mut Vec<(u32, UniformKind)>,
) {
    let inner = &module.types[ty].inner;
    match binding {
        Some(Binding::Location { location, .. }) => {
            out.push((*location, UniformKind::from_type(inner)));
        }
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = inner {
                for member in members {
                    collect_locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

struct ProgramUniforms {
    block: UniformBlock,
    buffer: Buffer,
    bind_group: BindGroup,
    stride: u64,
    next_slot: u32,
}

/// A linked vertex + fragment pipeline with name-addressed uniforms.
pub struct ShaderProgram {
    label: String,
    pipeline: RenderPipeline,
    uniforms: Option<ProgramUniforms>,
    empty_group: Option<BindGroup>,
}

impl ShaderProgram {
    pub fn new(device: &Device, desc: &ProgramDesc<'_>) -> Result<Self, RenderError> {
        let vertex = compile_stage(desc.label, ShaderStage::Vertex, desc.vertex)?;
        let fragment = compile_stage(desc.label, ShaderStage::Fragment, desc.fragment)?;
        let layout = link(desc.label, &vertex, &fragment)?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let uniform_entries: Vec<BindGroupLayoutEntry> = layout
            .iter()
            .map(|layout| BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(u64::from(layout.size)),
                },
                count: None,
            })
            .collect();
        let uniform_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some(&format!("{}-uniforms-bgl", desc.label)),
            entries: &uniform_entries,
        });

        let vs_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{}-vs", desc.label)),
            source: wgpu::ShaderSource::Wgsl(desc.vertex.into()),
        });
        let fs_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{}-fs", desc.label)),
            source: wgpu::ShaderSource::Wgsl(desc.fragment.into()),
        });

        let mut group_layouts = vec![&uniform_bgl];
        group_layouts.extend_from_slice(desc.input_layouts);
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some(&format!("{}-layout", desc.label)),
            bind_group_layouts: &group_layouts,
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{}-pipeline", desc.label)),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &vs_module,
                entry_point: Some("vs_main"),
                buffers: desc.vertex_buffers,
                compilation_options: PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: &fs_module,
                entry_point: Some("fs_main"),
                targets: &[Some(ColorTargetState {
                    format: desc.format,
                    blend: desc.blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: PipelineCompilationOptions::default(),
            }),
            primitive: PrimitiveState {
                topology: desc.topology,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let (uniforms, empty_group) = match layout {
            Some(layout) => {
                let align = u64::from(device.limits().min_uniform_buffer_offset_alignment);
                let stride = u64::from(layout.size).div_ceil(align) * align;
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{}-uniforms", desc.label)),
                    size: stride * u64::from(UNIFORM_SLOTS),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let bind_group = device.create_bind_group(&BindGroupDescriptor {
                    label: Some(&format!("{}-uniforms-bg", desc.label)),
                    layout: &uniform_bgl,
                    entries: &[BindGroupEntry {
                        binding: 0,
                        resource: BindingResource::Buffer(BufferBinding {
                            buffer: &buffer,
                            offset: 0,
                            size: NonZeroU64::new(u64::from(layout.size)),
                        }),
                    }],
                });
                let uniforms = ProgramUniforms {
                    block: UniformBlock::new(layout),
                    buffer,
                    bind_group,
                    stride,
                    next_slot: 0,
                };
                (Some(uniforms), None)
            }
            None => {
                let group = device.create_bind_group(&BindGroupDescriptor {
                    label: Some(&format!("{}-empty-bg", desc.label)),
                    layout: &uniform_bgl,
                    entries: &[],
                });
                (None, Some(group))
            }
        };

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::ShaderLink {
                label: desc.label.to_string(),
                log: err.to_string(),
            });
        }

        log::debug!("Linked program {}", desc.label);

        Ok(Self {
            label: desc.label.to_string(),
            pipeline,
            uniforms,
            empty_group,
        })
    }

    fn set(&mut self, name: &str, value: UniformValue) -> Result<(), RenderError> {
        match &mut self.uniforms {
            Some(u) => u.block.set(name, value),
            None => Err(RenderError::UniformNotFound(name.to_string())),
        }
    }

    pub fn set_float(&mut self, name: &str, value: f32) -> Result<(), RenderError> {
        self.set(name, UniformValue::Float(value))
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> Result<(), RenderError> {
        self.set(name, UniformValue::Int(value))
    }

    pub fn set_uint(&mut self, name: &str, value: u32) -> Result<(), RenderError> {
        self.set(name, UniformValue::Uint(value))
    }

    pub fn set_vec2(&mut self, name: &str, value: [f32; 2]) -> Result<(), RenderError> {
        self.set(name, UniformValue::Vec2(value))
    }

    pub fn set_vec3(&mut self, name: &str, value: [f32; 3]) -> Result<(), RenderError> {
        self.set(name, UniformValue::Vec3(value))
    }

    pub fn set_vec4(&mut self, name: &str, value: [f32; 4]) -> Result<(), RenderError> {
        self.set(name, UniformValue::Vec4(value))
    }

    pub fn set_mat4(&mut self, name: &str, value: &glam::Mat4) -> Result<(), RenderError> {
        self.set(name, UniformValue::Mat4(value.to_cols_array()))
    }

    /// Rewinds the uniform ring. Call once per frame before the first `activate`.
    pub fn begin_frame(&mut self) {
        if let Some(u) = &mut self.uniforms {
            u.next_slot = 0;
        }
    }

    /// Uploads the current uniform values and binds pipeline + group 0.
    pub fn activate(&mut self, queue: &Queue, pass: &mut RenderPass<'_>) {
        pass.set_pipeline(&self.pipeline);
        if let Some(u) = &mut self.uniforms {
            if u.next_slot == UNIFORM_SLOTS {
                log::debug!("{}: uniform ring exhausted, reusing slot 0", self.label);
                u.next_slot = 0;
            }
            let offset = u64::from(u.next_slot) * u.stride;
            queue.write_buffer(&u.buffer, offset, u.block.bytes());
            u.next_slot += 1;
            pass.set_bind_group(0, &u.bind_group, &[offset as u32]);
        } else if let Some(group) = &self.empty_group {
            pass.set_bind_group(0, group, &[]);
        }
    }

    pub fn dispose(&mut self) {
        if let Some(u) = &mut self.uniforms {
            u.buffer.destroy();
            u.block.clear_cache();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = r#"
struct Params { tint: vec3f, rms: f32 }
@group(0) @binding(0) var<uniform> u: Params;

struct VsOut {
    @builtin(position) position: vec4f,
    @location(0) uv: vec2f,
}

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> VsOut {
    var out: VsOut;
    out.position = vec4f(f32(vi) * u.rms, 0.0, 0.0, 1.0);
    out.uv = vec2f(0.0);
    return out;
}
"#;

    const FS: &str = r#"
struct Params { tint: vec3f, rms: f32 }
@group(0) @binding(0) var<uniform> u: Params;

@fragment
fn fs_main(@location(0) uv: vec2f) -> @location(0) vec4f {
    return vec4f(u.tint * uv.x, 1.0);
}
"#;

    fn modules(vs: &str, fs: &str) -> (Module, Module) {
        (
            compile_stage("test", ShaderStage::Vertex, vs).unwrap(),
            compile_stage("test", ShaderStage::Fragment, fs).unwrap(),
        )
    }

    #[test]
    fn links_matching_stages() {
        let (vs, fs) = modules(VS, FS);
        let layout = link("test", &vs, &fs).unwrap().unwrap();
        assert!(layout.find("tint").is_some());
        assert!(layout.find("rms").is_some());
    }

    #[test]
    fn syntax_error_is_compile_error_with_stage() {
        let err = compile_stage("broken", ShaderStage::Fragment, "fn fs_main( {").unwrap_err();
        match err {
            RenderError::ShaderCompile { stage, log, .. } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(!log.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn type_error_fails_validation() {
        let src = "@fragment fn fs_main() -> @location(0) vec4f { let x: f32 = 1u; return vec4f(x); }";
        assert!(matches!(
            compile_stage("typed", ShaderStage::Fragment, src),
            Err(RenderError::ShaderCompile { .. })
        ));
    }

    #[test]
    fn missing_varying_is_link_error() {
        let fs = r#"
@fragment
fn fs_main(@location(3) glow: f32) -> @location(0) vec4f {
    return vec4f(glow);
}
"#;
        let (vs, fs) = modules(VS, fs);
        let err = link("test", &vs, &fs).unwrap_err();
        assert!(matches!(err, RenderError::ShaderLink { log, .. } if log.contains("@location(3)")));
    }

    #[test]
    fn mismatched_varying_type_is_link_error() {
        let fs = r#"
@fragment
fn fs_main(@location(0) uv: vec4f) -> @location(0) vec4f {
    return uv;
}
"#;
        let (vs, fs) = modules(VS, fs);
        assert!(matches!(link("test", &vs, &fs), Err(RenderError::ShaderLink { .. })));
    }

    #[test]
    fn divergent_uniform_blocks_are_link_error() {
        let fs = r#"
struct Params { rms: f32, tint: vec3f }
@group(0) @binding(0) var<uniform> u: Params;

@fragment
fn fs_main(@location(0) uv: vec2f) -> @location(0) vec4f {
    return vec4f(u.tint * uv.y, u.rms);
}
"#;
        let (vs, fs) = modules(VS, fs);
        assert!(matches!(link("test", &vs, &fs), Err(RenderError::ShaderLink { .. })));
    }

    #[test]
    fn missing_entry_point_is_link_error() {
        let fs = "@fragment fn main() -> @location(0) vec4f { return vec4f(1.0); }";
        let (vs, fs) = modules(VS, fs);
        assert!(matches!(link("test", &vs, &fs), Err(RenderError::ShaderLink { .. })));
    }
}
