//! SPH Particle Fluid Kernel
//!
//! This crate provides the compute core of a weakly-compressible Smoothed
//! Particle Hydrodynamics (SPH) fluid confined to an axis-aligned box. Each
//! tick runs four phases with hard barriers between them:
//!
//! 1. Spatial grid rebuild (CSR counting sort)
//! 2. Density summation
//! 3. Acceleration (pressure + artificial viscosity + gravity)
//! 4. Symplectic Euler integration with wall reflection
//!
//! # Modules
//! - [`particle`] -- Parallel per-attribute particle arrays and seeded initialization.
//! - [`params`] -- Physical and numerical parameters.
//! - [`sph`] -- M4 cubic spline kernel and the density/acceleration/integration passes.
//! - [`neighbor`] -- GPU-friendly uniform grid with a flat 27-cell neighborhood.
//! - [`boundary`] -- Boundary box, boundary supplier and wall reflection.
//! - `gpu` -- wgpu compute back end sharing the same buffer schema (feature `gpu`).

#![warn(missing_docs)]

use std::fmt;

pub mod boundary;
pub mod neighbor;
pub mod params;
pub mod particle;
pub mod sph;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

pub use boundary::{Aabb, BoundarySupplier, StaticBox};
pub use neighbor::{NeighborGrid, CPU_CELL_FACTOR, GPU_CELL_FACTOR};
pub use params::SphParams;
pub use particle::ParticleArrays;
pub use sph::{cubic_spline, cubic_spline_dq};

#[cfg(feature = "gpu")]
pub use gpu::{gpu_available, GpuKernel};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while setting up or checking a simulation.
///
/// The per-tick numerics never fail; these cover construction, boundary
/// updates and the optional finiteness check.
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// Boundary box violates `min < max` or is not finite.
    InvalidBoundary(String),
    /// A parameter is out of its admissible range.
    InvalidParams(String),
    /// A particle attribute became NaN or infinite.
    NonFinite {
        /// Index of the first offending particle.
        index: usize,
        /// Name of the offending attribute.
        field: &'static str,
    },
    /// GPU adapter, device or limit failure.
    #[cfg(feature = "gpu")]
    Gpu(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::InvalidBoundary(msg) => write!(f, "invalid boundary: {msg}"),
            SimError::InvalidParams(msg) => write!(f, "invalid parameters: {msg}"),
            SimError::NonFinite { index, field } => {
                write!(f, "particle {index} has a non-finite {field}")
            }
            #[cfg(feature = "gpu")]
            SimError::Gpu(msg) => write!(f, "GPU initialization failed: {msg}"),
        }
    }
}

impl std::error::Error for SimError {}

// ---------------------------------------------------------------------------
// SimulationKernel trait
// ---------------------------------------------------------------------------

/// Aggregate diagnostics for a simulation snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickMetrics {
    /// Largest particle speed.
    pub max_speed: f32,
    /// Mean particle density.
    pub mean_density: f32,
    /// Largest particle density.
    pub max_density: f32,
    /// Total kinetic energy `sum 0.5 m |v|^2`.
    pub kinetic_energy: f64,
    /// Total mass.
    pub total_mass: f64,
}

impl TickMetrics {
    /// Compute metrics from particle arrays.
    pub fn from_particles(particles: &ParticleArrays) -> Self {
        let n = particles.len();
        if n == 0 {
            return Self::default();
        }
        let mut metrics = Self::default();
        let mut density_sum = 0.0_f64;
        for i in 0..n {
            let m = particles.mass[i] as f64;
            let speed = particles.speed(i);
            metrics.max_speed = metrics.max_speed.max(speed);
            metrics.max_density = metrics.max_density.max(particles.density[i]);
            metrics.kinetic_energy += 0.5 * m * (speed as f64) * (speed as f64);
            metrics.total_mass += m;
            density_sum += particles.density[i] as f64;
        }
        metrics.mean_density = (density_sum / n as f64) as f32;
        metrics
    }
}

/// Trait that all simulation back ends (CPU, GPU) implement.
///
/// A `SimulationKernel` owns particle data and advances it one tick at a
/// time. The boundary box is pushed in from outside before each tick.
pub trait SimulationKernel {
    /// Replace the boundary box used by subsequent ticks.
    fn set_boundary(&mut self, boundary: Aabb) -> Result<(), SimError>;

    /// Current boundary box.
    fn boundary(&self) -> Aabb;

    /// Run the four-phase pipeline once with tick duration `dt` seconds.
    fn tick(&mut self, dt: f32);

    /// Read back current particle state (immutable reference).
    fn particles(&self) -> &ParticleArrays;

    /// Particle positions.
    fn positions(&self) -> &[[f32; 3]] {
        &self.particles().positions
    }

    /// Particle velocities.
    fn velocities(&self) -> &[[f32; 3]] {
        &self.particles().velocities
    }

    /// Particle densities from the latest density pass.
    fn density(&self) -> &[f32] {
        &self.particles().density
    }

    /// Number of particles in the simulation.
    fn particle_count(&self) -> usize;

    /// Diagnostics for the current state.
    fn metrics(&self) -> TickMetrics {
        TickMetrics::from_particles(self.particles())
    }

    /// Fail with [`SimError::NonFinite`] if any position, velocity or density
    /// is NaN or infinite.
    fn check_finite(&self) -> Result<(), SimError> {
        check_finite(self.particles())
    }
}

/// Scan particle arrays for the first non-finite attribute.
pub fn check_finite(particles: &ParticleArrays) -> Result<(), SimError> {
    let finite3 = |v: &[f32; 3]| v.iter().all(|c| c.is_finite());
    if let Some(index) = particles.positions.iter().position(|p| !finite3(p)) {
        return Err(SimError::NonFinite { index, field: "position" });
    }
    if let Some(index) = particles.velocities.iter().position(|v| !finite3(v)) {
        return Err(SimError::NonFinite { index, field: "velocity" });
    }
    if let Some(index) = particles.density.iter().position(|d| !d.is_finite()) {
        return Err(SimError::NonFinite { index, field: "density" });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CpuKernel -- reference CPU implementation of SimulationKernel
// ---------------------------------------------------------------------------

/// Reference CPU implementation of the SPH simulation kernel.
///
/// Every phase runs on an owned rayon pool, partitioned over the particle
/// index range. The end of each parallel pass is the phase barrier.
pub struct CpuKernel {
    /// Fluid particle data.
    particles: ParticleArrays,
    /// Model parameters.
    params: SphParams,
    /// Current boundary box.
    boundary: Aabb,
    /// Neighbor grid, rebuilt every tick.
    grid: NeighborGrid,
    /// Worker pool for the particle passes.
    pool: rayon::ThreadPool,
}

impl CpuKernel {
    /// Create a new CPU simulation kernel using [`CPU_CELL_FACTOR`].
    ///
    /// # Arguments
    /// * `particles` - Initial particle data (see [`ParticleArrays::initialize`]).
    /// * `params` - Model parameters, validated here.
    /// * `boundary` - Initial boundary box, validated here.
    pub fn new(particles: ParticleArrays, params: SphParams, boundary: Aabb) -> Result<Self, SimError> {
        Self::with_cell_factor(particles, params, boundary, CPU_CELL_FACTOR)
    }

    /// Create a CPU kernel whose grid cells are `cell_factor * h` wide.
    pub fn with_cell_factor(
        particles: ParticleArrays,
        params: SphParams,
        boundary: Aabb,
        cell_factor: f32,
    ) -> Result<Self, SimError> {
        params.validate()?;
        boundary.validate()?;
        if !(cell_factor.is_finite() && cell_factor > 0.0) {
            return Err(SimError::InvalidParams(format!(
                "cell factor must be positive, got {cell_factor}"
            )));
        }

        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("sph-worker-{i}"));
        if let Some(threads) = params.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| SimError::InvalidParams(format!("failed to build worker pool: {e}")))?;

        tracing::info!(
            "CPU kernel: {} particles, h = {}, cell factor {}, {} worker threads",
            particles.len(),
            params.smooth_length,
            cell_factor,
            pool.current_num_threads()
        );

        Ok(Self {
            particles,
            params,
            boundary,
            grid: NeighborGrid::new(cell_factor),
            pool,
        })
    }

    /// Model parameters.
    pub fn params(&self) -> &SphParams {
        &self.params
    }

    /// Neighbor grid as built by the latest tick.
    pub fn grid(&self) -> &NeighborGrid {
        &self.grid
    }
}

impl SimulationKernel for CpuKernel {
    fn set_boundary(&mut self, boundary: Aabb) -> Result<(), SimError> {
        boundary.validate()?;
        self.boundary = boundary;
        Ok(())
    }

    fn boundary(&self) -> Aabb {
        self.boundary
    }

    fn tick(&mut self, dt: f32) {
        let Self {
            particles,
            params,
            boundary,
            grid,
            pool,
        } = self;
        let h = params.smooth_length;
        let walls = boundary.walls(params.particle_size());

        pool.install(|| {
            // --- 1. Grid rebuild ---
            grid.rebuild(boundary, h, &particles.positions);
            // --- 2. Density ---
            sph::compute_density(particles, grid, h);
            // --- 3. Accelerations ---
            sph::compute_accelerations(particles, grid, params);
            // --- 4. Integrate + reflect ---
            sph::integrate(particles, params, &walls, dt);
        });
    }

    fn particles(&self) -> &ParticleArrays {
        &self.particles
    }

    fn particle_count(&self) -> usize {
        self.particles.len()
    }
}
