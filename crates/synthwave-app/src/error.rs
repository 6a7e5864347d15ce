use std::fmt;

/// Shader stage named in compile diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        })
    }
}

/// Errors raised by the rendering core.
///
/// Construction-time variants abort whatever was being built. The uniform
/// variants are per-frame and only skip the draw that raised them.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{label}: {stage} shader failed to compile:\n{log}")]
    ShaderCompile {
        label: String,
        stage: ShaderStage,
        log: String,
    },

    #[error("{label}: program failed to link: {log}")]
    ShaderLink { label: String, log: String },

    #[error("uniform not found: {0}")]
    UniformNotFound(String),

    #[error("uniform {name} is not a {expected}")]
    UniformTypeMismatch { name: String, expected: &'static str },

    #[error("failed to create {what}: {reason}")]
    ResourceCreation { what: String, reason: String },

    #[error("renderer is not attached to a GPU context")]
    NotAttached,

    #[error("display surface lost; the session must be reinitialized")]
    SurfaceLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_names_stage_and_log() {
        let err = RenderError::ShaderCompile {
            label: "bars".into(),
            stage: ShaderStage::Fragment,
            log: "expected ';'".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bars"));
        assert!(msg.contains("fragment"));
        assert!(msg.contains("expected ';'"));
    }

    #[test]
    fn uniform_not_found_names_uniform() {
        let err = RenderError::UniformNotFound("u_beat".into());
        assert_eq!(err.to_string(), "uniform not found: u_beat");
    }
}
