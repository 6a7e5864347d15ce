use std::f32::consts::FRAC_PI_4;

use glam::{Mat4, Vec3};
use wgpu::{
    BindGroup, BindGroupLayout, BlendState, Device, PrimitiveTopology, Queue, RenderPass,
    TextureFormat,
};

use crate::error::RenderError;
use crate::gpu::shader_program::{ProgramDesc, ShaderProgram};
use crate::theme::ThemeColors;

const WAVEFORM_VS: &str = include_str!("../../../../assets/shaders/waveform.vert.wgsl");
const WAVEFORM_FS: &str = include_str!("../../../../assets/shaders/waveform.frag.wgsl");
const BARS_VS: &str = include_str!("../../../../assets/shaders/bars.vert.wgsl");
const BARS_FS: &str = include_str!("../../../../assets/shaders/bars.frag.wgsl");
const CIRCULAR_FS: &str = include_str!("../../../../assets/shaders/circular.frag.wgsl");
const TERRAIN_VS: &str = include_str!("../../../../assets/shaders/terrain.vert.wgsl");
const TERRAIN_FS: &str = include_str!("../../../../assets/shaders/terrain.frag.wgsl");
const NEBULA_FS: &str = include_str!("../../../../assets/shaders/nebula.frag.wgsl");
const STARFIELD_FS: &str = include_str!("../../../../assets/shaders/starfield.frag.wgsl");

pub const WAVEFORM_COLUMNS: u32 = 1024;
pub const BAR_COUNT: u32 = 64;
pub const TERRAIN_GRID: u32 = 128;
pub const STAR_LAYERS: i32 = 4;
/// Circular ring: base radius, rms gain, beat gain, spectrum reach.
pub const RING_SHAPE: [f32; 4] = [0.3, 0.2, 0.08, 0.45];

/// Camera for the terrain mode: 45 degree fov looking down the history.
pub fn terrain_camera(aspect: f32) -> Mat4 {
    Mat4::perspective_rh(FRAC_PI_4, aspect, 0.1, 50.0)
        * Mat4::look_at_rh(Vec3::new(0.0, 2.5, 3.0), Vec3::new(0.0, 0.0, -1.0), Vec3::Y)
}

/// Everything a draw routine may read for one frame.
pub struct ModeInputs<'a> {
    pub time: f32,
    pub rms: f32,
    pub centroid: f32,
    pub beat_intensity: f32,
    pub colors: &'a ThemeColors,
    pub resolution: [f32; 2],
    pub history_offset: u32,
    pub history_rows: u32,
}

impl ModeInputs<'_> {
    pub fn aspect(&self) -> f32 {
        self.resolution[0] / self.resolution[1].max(1.0)
    }
}

/// Programs for every mode except particles, which owns its own.
pub struct ModePrograms {
    waveform: ShaderProgram,
    bars: ShaderProgram,
    circular: ShaderProgram,
    terrain: ShaderProgram,
    nebula: ShaderProgram,
    starfield: ShaderProgram,
}

impl ModePrograms {
    pub fn new(
        device: &Device,
        format: TextureFormat,
        audio_layout: &BindGroupLayout,
    ) -> Result<Self, RenderError> {
        let inputs: &[&BindGroupLayout] = &[audio_layout];
        let geometry = |label: &'static str,
                        vertex: &'static str,
                        fragment: &'static str,
                        topology: PrimitiveTopology,
                        blend: Option<BlendState>| ProgramDesc {
            label,
            vertex,
            fragment,
            format,
            blend,
            topology,
            vertex_buffers: &[],
            input_layouts: inputs,
        };
        let overlay = |label: &'static str, fragment: &'static str| ProgramDesc {
            blend: Some(BlendState::ALPHA_BLENDING),
            ..ProgramDesc::fullscreen(label, fragment, format, inputs)
        };

        Ok(Self {
            waveform: ShaderProgram::new(
                device,
                &geometry(
                    "waveform",
                    WAVEFORM_VS,
                    WAVEFORM_FS,
                    PrimitiveTopology::TriangleStrip,
                    Some(BlendState::ALPHA_BLENDING),
                ),
            )?,
            bars: ShaderProgram::new(
                device,
                &geometry(
                    "bars",
                    BARS_VS,
                    BARS_FS,
                    PrimitiveTopology::TriangleList,
                    Some(BlendState::ALPHA_BLENDING),
                ),
            )?,
            circular: ShaderProgram::new(device, &overlay("circular", CIRCULAR_FS))?,
            terrain: ShaderProgram::new(
                device,
                &geometry("terrain", TERRAIN_VS, TERRAIN_FS, PrimitiveTopology::TriangleList, None),
            )?,
            nebula: ShaderProgram::new(
                device,
                &ProgramDesc::fullscreen("nebula", NEBULA_FS, format, inputs),
            )?,
            starfield: ShaderProgram::new(device, &overlay("starfield", STARFIELD_FS))?,
        })
    }

    /// Rewinds every program's uniform ring.
    pub fn begin_frame(&mut self) {
        for program in self.programs_mut() {
            program.begin_frame();
        }
    }

    pub fn draw_waveform(
        &mut self,
        queue: &Queue,
        pass: &mut RenderPass<'_>,
        audio: &BindGroup,
        inputs: &ModeInputs<'_>,
    ) -> Result<(), RenderError> {
        let p = &mut self.waveform;
        p.set_vec3("primary", inputs.colors.primary)?;
        p.set_vec3("secondary", inputs.colors.secondary)?;
        p.set_float("rms", inputs.rms)?;
        p.set_float("beat_intensity", inputs.beat_intensity)?;
        p.set_vec2("resolution", inputs.resolution)?;
        p.activate(queue, pass);
        pass.set_bind_group(1, audio, &[]);
        pass.draw(0..WAVEFORM_COLUMNS * 2, 0..1);
        Ok(())
    }

    pub fn draw_bars(
        &mut self,
        queue: &Queue,
        pass: &mut RenderPass<'_>,
        audio: &BindGroup,
        inputs: &ModeInputs<'_>,
    ) -> Result<(), RenderError> {
        let p = &mut self.bars;
        p.set_vec3("primary", inputs.colors.primary)?;
        p.set_vec3("secondary", inputs.colors.secondary)?;
        p.set_vec3("accent", inputs.colors.accent)?;
        p.set_float("beat_intensity", inputs.beat_intensity)?;
        p.set_float("time", inputs.time)?;
        p.set_uint("bar_count", BAR_COUNT)?;
        p.set_vec2("resolution", inputs.resolution)?;
        p.activate(queue, pass);
        pass.set_bind_group(1, audio, &[]);
        pass.draw(0..6, 0..BAR_COUNT);
        Ok(())
    }

    pub fn draw_circular(
        &mut self,
        queue: &Queue,
        pass: &mut RenderPass<'_>,
        audio: &BindGroup,
        inputs: &ModeInputs<'_>,
    ) -> Result<(), RenderError> {
        let p = &mut self.circular;
        p.set_vec4("shape", RING_SHAPE)?;
        p.set_vec3("primary", inputs.colors.primary)?;
        p.set_vec3("secondary", inputs.colors.secondary)?;
        p.set_vec3("accent", inputs.colors.accent)?;
        p.set_float("rms", inputs.rms)?;
        p.set_float("beat_intensity", inputs.beat_intensity)?;
        p.set_float("time", inputs.time)?;
        p.set_vec2("resolution", inputs.resolution)?;
        p.activate(queue, pass);
        pass.set_bind_group(1, audio, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    pub fn draw_terrain(
        &mut self,
        queue: &Queue,
        pass: &mut RenderPass<'_>,
        audio: &BindGroup,
        inputs: &ModeInputs<'_>,
    ) -> Result<(), RenderError> {
        let p = &mut self.terrain;
        p.set_mat4("view_proj", &terrain_camera(inputs.aspect()))?;
        p.set_vec3("primary", inputs.colors.primary)?;
        p.set_vec3("secondary", inputs.colors.secondary)?;
        p.set_vec3("accent", inputs.colors.accent)?;
        p.set_vec3("background", inputs.colors.background)?;
        p.set_float("time", inputs.time)?;
        p.set_float("beat_intensity", inputs.beat_intensity)?;
        p.set_uint("grid_size", TERRAIN_GRID)?;
        p.set_uint("history_offset", inputs.history_offset)?;
        p.set_uint("history_size", inputs.history_rows)?;
        p.activate(queue, pass);
        pass.set_bind_group(1, audio, &[]);
        let cells = TERRAIN_GRID - 1;
        pass.draw(0..cells * cells * 6, 0..1);
        Ok(())
    }

    pub fn draw_nebula(
        &mut self,
        queue: &Queue,
        pass: &mut RenderPass<'_>,
        audio: &BindGroup,
        inputs: &ModeInputs<'_>,
    ) -> Result<(), RenderError> {
        let p = &mut self.nebula;
        p.set_vec3("primary", inputs.colors.primary)?;
        p.set_vec3("secondary", inputs.colors.secondary)?;
        p.set_vec3("accent", inputs.colors.accent)?;
        p.set_vec3("background", inputs.colors.background)?;
        p.set_float("time", inputs.time)?;
        p.set_float("rms", inputs.rms)?;
        p.set_float("centroid_hz", inputs.centroid)?;
        p.set_float("beat_intensity", inputs.beat_intensity)?;
        p.set_vec2("resolution", inputs.resolution)?;
        p.activate(queue, pass);
        pass.set_bind_group(1, audio, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    pub fn draw_starfield(
        &mut self,
        queue: &Queue,
        pass: &mut RenderPass<'_>,
        audio: &BindGroup,
        inputs: &ModeInputs<'_>,
    ) -> Result<(), RenderError> {
        let p = &mut self.starfield;
        p.set_vec3("primary", inputs.colors.primary)?;
        p.set_vec3("secondary", inputs.colors.secondary)?;
        p.set_vec3("accent", inputs.colors.accent)?;
        p.set_float("time", inputs.time)?;
        p.set_float("rms", inputs.rms)?;
        p.set_float("beat_intensity", inputs.beat_intensity)?;
        p.set_vec2("resolution", inputs.resolution)?;
        p.set_int("layers", STAR_LAYERS)?;
        p.activate(queue, pass);
        pass.set_bind_group(1, audio, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    /// Swaps in another nebula program.
    #[cfg(test)]
    pub fn replace_nebula(&mut self, program: ShaderProgram) {
        self.nebula.dispose();
        self.nebula = program;
    }

    fn programs_mut(&mut self) -> [&mut ShaderProgram; 6] {
        [
            &mut self.waveform,
            &mut self.bars,
            &mut self.circular,
            &mut self.terrain,
            &mut self.nebula,
            &mut self.starfield,
        ]
    }

    pub fn dispose(&mut self) {
        for program in self.programs_mut() {
            program.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShaderStage;
    use crate::gpu::fullscreen_quad::FULLSCREEN_TRIANGLE_VS_WITH_UV;
    use crate::gpu::shader_program::{compile_stage, link};

    fn linked(label: &str, vs: &str, fs: &str) -> crate::gpu::uniforms::UniformLayout {
        let vs = compile_stage(label, ShaderStage::Vertex, vs).unwrap();
        let fs = compile_stage(label, ShaderStage::Fragment, fs).unwrap();
        link(label, &vs, &fs).unwrap().unwrap()
    }

    fn assert_members(layout: &crate::gpu::uniforms::UniformLayout, names: &[&str]) {
        for name in names {
            assert!(layout.find(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn waveform_links() {
        let layout = linked("waveform", WAVEFORM_VS, WAVEFORM_FS);
        assert_members(&layout, &["primary", "secondary", "rms", "beat_intensity", "resolution"]);
    }

    #[test]
    fn bars_link() {
        let layout = linked("bars", BARS_VS, BARS_FS);
        assert_members(&layout, &["bar_count", "accent", "time", "resolution"]);
    }

    #[test]
    fn terrain_links() {
        let layout = linked("terrain", TERRAIN_VS, TERRAIN_FS);
        assert_members(
            &layout,
            &["view_proj", "background", "grid_size", "history_offset", "history_size"],
        );
    }

    #[test]
    fn fullscreen_modes_link() {
        for (label, fs, names) in [
            ("circular", CIRCULAR_FS, &["rms", "time", "accent", "shape"][..]),
            ("nebula", NEBULA_FS, &["centroid_hz", "background", "rms"][..]),
            ("starfield", STARFIELD_FS, &["rms", "beat_intensity", "resolution", "layers"][..]),
        ] {
            let layout = linked(label, FULLSCREEN_TRIANGLE_VS_WITH_UV, fs);
            assert_members(&layout, names);
        }
    }

    #[test]
    fn starfield_layers_is_an_int() {
        let layout = linked("starfield", FULLSCREEN_TRIANGLE_VS_WITH_UV, STARFIELD_FS);
        let member = layout.find("layers").unwrap();
        assert_eq!(member.kind, crate::gpu::uniforms::UniformKind::Int);
    }

    #[test]
    fn terrain_camera_sees_the_grid_centre() {
        let clip = terrain_camera(16.0 / 9.0) * glam::Vec4::new(0.0, 0.0, -1.0, 1.0);
        assert!(clip.w > 0.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
    }

    #[test]
    fn programs_build_on_a_device() {
        let Some((device, _queue)) = crate::gpu::context::test_device() else {
            return;
        };
        let audio = crate::render::audio::AudioTextures::new(&device).unwrap();
        assert!(ModePrograms::new(&device, TextureFormat::Rgba16Float, &audio.layout).is_ok());
    }
}
