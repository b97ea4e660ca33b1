//! Configuration parsing and validation for SPH simulations

use serde::{Deserialize, Serialize};
use sph_kernel::{Aabb, SphParams};
use std::fs;

/// Main simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable simulation name
    pub name: String,
    /// Compute back end
    #[serde(default)]
    pub backend: BackendType,
    /// Number of particles placed at start
    #[serde(default = "default_particle_count")]
    pub particle_count: usize,
    /// Mass of every particle
    #[serde(default = "default_particle_mass")]
    pub particle_mass: f32,
    /// Smoothing length `h`
    #[serde(default = "default_smooth_length")]
    pub smooth_length: f32,
    /// Reference density
    #[serde(default = "default_one")]
    pub density0: f32,
    /// Numerical speed of sound
    #[serde(default = "default_one")]
    pub sound_speed: f32,
    /// Speed cap as a fraction of the speed of sound
    #[serde(default = "default_velocity_constraint")]
    pub velocity_constraint: f32,
    /// Artificial viscosity linear coefficient
    #[serde(default = "default_one")]
    pub alpha: f32,
    /// Artificial viscosity quadratic coefficient
    #[serde(default = "default_beta")]
    pub beta: f32,
    /// Gravity magnitude, acting along -y
    #[serde(default = "default_gravity")]
    pub gravity: f32,
    /// Restitution of the wall-normal velocity on contact
    #[serde(default = "default_collision_damping")]
    pub collision_damping: f32,
    /// Damping of the tangential velocity on contact
    #[serde(default = "default_shear_damping")]
    pub shear_damping: f32,
    /// Boundary box
    #[serde(default)]
    pub domain: DomainBounds,
    /// Fixed tick duration (seconds)
    #[serde(default = "default_dt")]
    pub dt: f32,
    /// Stop after this many ticks
    pub max_ticks: Option<u64>,
    /// Seed for the initial particle placement
    #[serde(default)]
    pub seed: u64,
    /// Worker threads for the CPU back end (default: one per core)
    pub threads: Option<usize>,
}

/// Compute back end selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendType {
    /// rayon thread pool
    #[default]
    Cpu,
    /// wgpu compute shaders (requires the `gpu` feature)
    Gpu,
    /// GPU when available, otherwise CPU
    Auto,
}

/// Domain bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainBounds {
    /// Minimum corner [x, y, z]
    pub min: [f32; 3],
    /// Maximum corner [x, y, z]
    pub max: [f32; 3],
}

impl Default for DomainBounds {
    fn default() -> Self {
        Self {
            min: [-1.0, 0.0, -1.0],
            max: [1.0, 2.0, 1.0],
        }
    }
}

impl DomainBounds {
    /// Boundary box for the kernel.
    pub fn to_aabb(&self) -> Aabb {
        Aabb::new(self.min, self.max)
    }
}

// Default values
fn default_particle_count() -> usize {
    100
}

fn default_particle_mass() -> f32 {
    0.1
}

fn default_smooth_length() -> f32 {
    0.2
}

fn default_one() -> f32 {
    1.0
}

fn default_velocity_constraint() -> f32 {
    0.5
}

fn default_beta() -> f32 {
    2.0
}

fn default_gravity() -> f32 {
    9.8
}

fn default_collision_damping() -> f32 {
    0.8
}

fn default_shear_damping() -> f32 {
    0.95
}

fn default_dt() -> f32 {
    1.0 / 60.0
}

impl SimulationConfig {
    /// Configuration with every tunable at its default.
    pub fn with_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            backend: BackendType::default(),
            particle_count: default_particle_count(),
            particle_mass: default_particle_mass(),
            smooth_length: default_smooth_length(),
            density0: default_one(),
            sound_speed: default_one(),
            velocity_constraint: default_velocity_constraint(),
            alpha: default_one(),
            beta: default_beta(),
            gravity: default_gravity(),
            collision_damping: default_collision_damping(),
            shear_damping: default_shear_damping(),
            domain: DomainBounds::default(),
            dt: default_dt(),
            max_ticks: None,
            seed: 0,
            threads: None,
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;
        Self::from_json(&contents)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: SimulationConfig = serde_json::from_str(json)
            .map_err(|e| format!("Failed to parse config JSON: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        // Check domain bounds
        let axes = ["x", "y", "z"];
        for (axis, name) in axes.iter().enumerate() {
            if !(self.domain.min[axis] < self.domain.max[axis]) {
                return Err(format!("Domain min.{name} must be less than max.{name}"));
            }
        }

        if self.particle_count == 0 {
            return Err("particle_count must be at least 1".to_string());
        }

        let positive = [
            ("particle_mass", self.particle_mass),
            ("smooth_length", self.smooth_length),
            ("density0", self.density0),
            ("sound_speed", self.sound_speed),
            ("velocity_constraint", self.velocity_constraint),
            ("dt", self.dt),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{name} must be positive"));
            }
        }

        if !(self.alpha >= 0.0 && self.beta >= 0.0) {
            return Err("Viscosity coefficients alpha and beta must be non-negative".to_string());
        }

        if !self.gravity.is_finite() {
            return Err("gravity must be finite".to_string());
        }

        for (name, value) in [
            ("collision_damping", self.collision_damping),
            ("shear_damping", self.shear_damping),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be in range [0, 1]"));
            }
        }

        // Check max_ticks
        if let Some(max_ticks) = self.max_ticks {
            if max_ticks == 0 {
                return Err("max_ticks must be at least 1".to_string());
            }
        }

        if self.threads == Some(0) {
            return Err("threads must be at least 1".to_string());
        }

        Ok(())
    }

    /// Kernel parameters for this configuration
    pub fn sph_params(&self) -> SphParams {
        SphParams {
            smooth_length: self.smooth_length,
            density0: self.density0,
            sound_speed: self.sound_speed,
            velocity_constraint: self.velocity_constraint,
            alpha: self.alpha,
            beta: self.beta,
            gravity: [0.0, -self.gravity, 0.0],
            collision_damping: self.collision_damping,
            shear_damping: self.shear_damping,
            threads: self.threads,
        }
    }
}
