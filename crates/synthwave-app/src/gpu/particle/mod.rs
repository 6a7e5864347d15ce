pub mod cpu;
pub mod system;
pub mod types;

pub use system::{ParticleSimulator, ParticleView, particle_camera};
pub use types::StepAudio;
