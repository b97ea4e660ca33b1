//! Particle storage: parallel per-attribute arrays with a fixed particle count.
//!
//! Vector attributes are stored as `[f32; 3]` so each array maps byte-for-byte
//! onto the 3×float device buffers used by the GPU back end.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::boundary::Aabb;
use crate::SimError;

/// Parallel particle arrays.
///
/// Index `i` across every array refers to the same particle. The particle
/// count is fixed once constructed; nothing in the crate pushes or removes
/// entries after initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleArrays {
    /// Positions.
    pub positions: Vec<[f32; 3]>,
    /// Velocities.
    pub velocities: Vec<[f32; 3]>,
    /// Accelerations from the most recent force pass.
    pub accelerations: Vec<[f32; 3]>,
    /// Density from the most recent density pass.
    pub density: Vec<f32>,
    /// Particle mass (constant).
    pub mass: Vec<f32>,
}

impl ParticleArrays {
    /// Create an empty particle collection.
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
            velocities: Vec::new(),
            accelerations: Vec::new(),
            density: Vec::new(),
            mass: Vec::new(),
        }
    }

    /// Place `count` particles uniformly at random within the central 50% of
    /// `boundary` on every axis.
    ///
    /// Velocities and accelerations start at zero, density at `density0` and
    /// every particle carries `particle_mass`. The generator is seeded
    /// explicitly so runs are reproducible.
    pub fn initialize(
        count: usize,
        boundary: &Aabb,
        density0: f32,
        particle_mass: f32,
        seed: u64,
    ) -> Result<Self, SimError> {
        boundary.validate()?;
        if !(particle_mass.is_finite() && particle_mass > 0.0) {
            return Err(SimError::InvalidParams(format!(
                "particle mass must be positive, got {particle_mass}"
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (lo, hi) = boundary.central_half();

        let mut particles = Self::with_capacity(count);
        for _ in 0..count {
            let pos = [
                rng.random_range(lo[0]..hi[0]),
                rng.random_range(lo[1]..hi[1]),
                rng.random_range(lo[2]..hi[2]),
            ];
            particles.push_particle(pos, [0.0; 3], particle_mass, density0);
        }

        tracing::info!(
            "Initialized {} particles in [{:?}, {:?}] (seed {})",
            count,
            lo,
            hi,
            seed
        );
        Ok(particles)
    }

    fn with_capacity(count: usize) -> Self {
        Self {
            positions: Vec::with_capacity(count),
            velocities: Vec::with_capacity(count),
            accelerations: Vec::with_capacity(count),
            density: Vec::with_capacity(count),
            mass: Vec::with_capacity(count),
        }
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Return `true` if there are no particles.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Append a particle with zero acceleration.
    ///
    /// Only used while building an initial state (tests, custom layouts).
    pub fn push_particle(&mut self, position: [f32; 3], velocity: [f32; 3], mass: f32, density: f32) {
        self.positions.push(position);
        self.velocities.push(velocity);
        self.accelerations.push([0.0; 3]);
        self.density.push(density);
        self.mass.push(mass);
    }

    /// Speed magnitude of particle `i`.
    pub fn speed(&self, i: usize) -> f32 {
        let [vx, vy, vz] = self.velocities[i];
        (vx * vx + vy * vy + vz * vz).sqrt()
    }
}

impl Default for ParticleArrays {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb::new([-1.0, 0.0, -1.0], [1.0, 2.0, 1.0])
    }

    #[test]
    fn empty_particle_arrays() {
        let pa = ParticleArrays::new();
        assert_eq!(pa.len(), 0);
        assert!(pa.is_empty());
    }

    #[test]
    fn push_and_len() {
        let mut pa = ParticleArrays::new();
        pa.push_particle([1.0, 2.0, 3.0], [0.0, 3.0, 4.0], 0.1, 1.0);
        assert_eq!(pa.len(), 1);
        assert_eq!(pa.positions[0], [1.0, 2.0, 3.0]);
        assert_eq!(pa.accelerations[0], [0.0; 3]);
        assert_eq!(pa.mass[0], 0.1);
        assert!((pa.speed(0) - 5.0).abs() < 1.0e-6);
    }

    #[test]
    fn initialize_places_particles_in_central_half() {
        let boundary = unit_box();
        let pa = ParticleArrays::initialize(500, &boundary, 1.0, 0.1, 7).unwrap();
        assert_eq!(pa.len(), 500);
        for p in &pa.positions {
            assert!(p[0] >= -0.5 && p[0] <= 0.5, "x out of central half: {p:?}");
            assert!(p[1] >= 0.5 && p[1] <= 1.5, "y out of central half: {p:?}");
            assert!(p[2] >= -0.5 && p[2] <= 0.5, "z out of central half: {p:?}");
        }
        assert!(pa.velocities.iter().all(|v| *v == [0.0; 3]));
        assert!(pa.density.iter().all(|&d| d == 1.0));
        assert!(pa.mass.iter().all(|&m| m == 0.1));
    }

    #[test]
    fn initialize_is_reproducible_for_a_seed() {
        let boundary = unit_box();
        let a = ParticleArrays::initialize(64, &boundary, 1.0, 0.1, 42).unwrap();
        let b = ParticleArrays::initialize(64, &boundary, 1.0, 0.1, 42).unwrap();
        let c = ParticleArrays::initialize(64, &boundary, 1.0, 0.1, 43).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.positions, c.positions);
    }

    #[test]
    fn initialize_rejects_inverted_box() {
        let boundary = Aabb::new([1.0, 0.0, 0.0], [0.0, 1.0, 1.0]);
        assert!(ParticleArrays::initialize(4, &boundary, 1.0, 0.1, 0).is_err());
    }
}
