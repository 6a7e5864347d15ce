use std::f32::consts::{FRAC_PI_2, PI, TAU};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::types::{Particle, StepAudio};

const DAMPING: f32 = 0.998;
const GRAVITY: f32 = 0.02;

/// Initial state: dead particles with a size already assigned, so the first
/// step respawns every one of them.
pub fn initial_particles<R: Rng>(count: u32, rng: &mut R) -> Vec<Particle> {
    (0..count)
        .map(|_| Particle {
            position: [0.0; 3],
            velocity: [0.0; 3],
            life: 0.0,
            size: 2.0 + rng.random::<f32>() * 4.0,
        })
        .collect()
}

/// Advances one particle by `dt`, respawning it at the origin once its life runs out.
pub fn step_particle<R: Rng>(p: &mut Particle, dt: f32, audio: StepAudio, rng: &mut R) {
    let life = p.life - dt;
    if life <= 0.0 {
        respawn(p, audio, rng);
        return;
    }

    for axis in 0..3 {
        p.position[axis] += p.velocity[axis] * dt;
    }
    p.velocity[0] *= DAMPING;
    p.velocity[1] -= GRAVITY * dt;
    p.velocity[2] *= DAMPING;
    p.life = life;
}

fn respawn<R: Rng>(p: &mut Particle, audio: StepAudio, rng: &mut R) {
    let theta = rng.random::<f32>() * TAU;
    let phi = rng.random::<f32>() * PI - FRAC_PI_2;
    let speed = (0.5 + rng.random::<f32>() * 1.5)
        * (1.0 + audio.beat_intensity * 3.0)
        * (0.3 + audio.rms * 2.0);

    p.position = [0.0; 3];
    p.velocity = [
        theta.cos() * phi.cos() * speed,
        phi.sin() * speed,
        theta.sin() * phi.cos() * speed,
    ];
    p.life = 1.0 + rng.random::<f32>() * 3.0;
    p.size = 2.0 + rng.random::<f32>() * 4.0;
}

/// Host-side simulation for adapters without compute support.
pub struct CpuStepper {
    particles: Vec<Particle>,
    rng: StdRng,
}

impl CpuStepper {
    pub fn new(particles: Vec<Particle>, seed: u64) -> Self {
        Self {
            particles,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn step(&mut self, dt: f32, audio: StepAudio) -> &[Particle] {
        for p in &mut self.particles {
            step_particle(p, dt, audio, &mut self.rng);
        }
        &self.particles
    }
}
