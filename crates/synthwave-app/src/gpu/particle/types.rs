use bytemuck::{Pod, Zeroable};

pub const PARTICLE_COUNT: u32 = 50_000;

/// One particle: 32 bytes, interleaved position/velocity/life/size.
/// Also the per-instance vertex layout used for rendering.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    /// Seconds left; at or below zero the particle respawns.
    pub life: f32,
    pub size: f32,
}

/// Compute uniforms: 32 bytes, matches `SimParams` in particles_update.wgsl.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct SimParams {
    pub delta_time: f32,
    pub rms: f32,
    pub beat_intensity: f32,
    pub seed: u32,
    pub count: u32,
    pub _pad: [u32; 3],
}

/// Audio inputs to one simulation step.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepAudio {
    pub rms: f32,
    pub beat_intensity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particle_is_eight_floats() {
        assert_eq!(std::mem::size_of::<Particle>(), 32);
        assert_eq!(std::mem::offset_of!(Particle, life), 24);
        assert_eq!(std::mem::offset_of!(Particle, size), 28);
    }

    #[test]
    fn sim_params_size_32() {
        assert_eq!(std::mem::size_of::<SimParams>(), 32);
    }
}
