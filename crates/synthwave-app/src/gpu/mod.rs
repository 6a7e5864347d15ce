pub mod audio_texture;
pub mod bind;
pub mod bloom;
pub mod context;
pub mod framebuffer;
pub mod fullscreen_quad;
pub mod particle;
pub mod ping_pong;
pub mod shader_program;
pub mod uniforms;

pub use context::GpuContext;
