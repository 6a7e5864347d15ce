/// Fullscreen triangle vertex stage (WGSL) emitting `uv` at location 0.
/// Three vertices from `vertex_index` cover the target, no vertex buffer.
/// UV origin is top-left so textures sample upright.
pub const FULLSCREEN_TRIANGLE_VS_WITH_UV: &str = r#"
struct FullscreenOut {
    @builtin(position) position: vec4f,
    @location(0) uv: vec2f,
}

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> FullscreenOut {
    let x = f32(i32(vi & 1u) * 4) - 1.0;
    let y = f32(i32(vi & 2u) * 2) - 1.0;
    var out: FullscreenOut;
    out.position = vec4f(x, y, 0.0, 1.0);
    out.uv = vec2f((x + 1.0) * 0.5, (1.0 - y) * 0.5);
    return out;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShaderStage;
    use crate::gpu::shader_program::compile_stage;

    #[test]
    fn fullscreen_stage_validates() {
        let module =
            compile_stage("fullscreen", ShaderStage::Vertex, FULLSCREEN_TRIANGLE_VS_WITH_UV)
                .unwrap();
        assert_eq!(module.entry_points.len(), 1);
        assert_eq!(module.entry_points[0].name, "vs_main");
    }
}
