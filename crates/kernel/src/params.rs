//! Physical and numerical parameters shared by every back end.
//!
//! All values are held fixed for the lifetime of a simulation: a single
//! smoothing length, a single gravity vector, a single rest density.

use serde::{Deserialize, Serialize};

use crate::SimError;

/// Fraction of the smoothing length used as the particle "size".
///
/// The integrator insets every box face by this distance so particles are
/// reflected before their visual extent crosses the wall.
pub const PARTICLE_SIZE_FACTOR: f32 = 0.2;

/// Tunable parameters of the SPH model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphParams {
    /// Smoothing length `h`. Kernel support radius is `2h`.
    pub smooth_length: f32,
    /// Reference density used by the density-corrected pressure term.
    pub density0: f32,
    /// Numerical speed of sound.
    pub sound_speed: f32,
    /// Speed cap as a fraction of `sound_speed`.
    pub velocity_constraint: f32,
    /// Artificial viscosity linear coefficient.
    pub alpha: f32,
    /// Artificial viscosity quadratic coefficient.
    pub beta: f32,
    /// Uniform gravity acceleration vector.
    pub gravity: [f32; 3],
    /// Restitution applied to the wall-normal velocity component on contact.
    pub collision_damping: f32,
    /// Damping applied to the two tangential velocity components on contact.
    pub shear_damping: f32,
    /// Worker thread count for the CPU back end (`None` = rayon default).
    #[serde(default)]
    pub threads: Option<usize>,
}

impl Default for SphParams {
    fn default() -> Self {
        Self {
            smooth_length: 0.2,
            density0: 1.0,
            sound_speed: 1.0,
            velocity_constraint: 0.5,
            alpha: 1.0,
            beta: 2.0,
            gravity: [0.0, -9.8, 0.0],
            collision_damping: 0.8,
            shear_damping: 0.95,
            threads: None,
        }
    }
}

impl SphParams {
    /// Maximum particle speed after force integration.
    pub fn max_speed(&self) -> f32 {
        self.velocity_constraint * self.sound_speed
    }

    /// Distance by which each wall is inset from the boundary box.
    pub fn particle_size(&self) -> f32 {
        PARTICLE_SIZE_FACTOR * self.smooth_length
    }

    /// Reject parameter sets the numerics cannot work with.
    pub fn validate(&self) -> Result<(), SimError> {
        let positive = [
            ("smooth_length", self.smooth_length),
            ("density0", self.density0),
            ("sound_speed", self.sound_speed),
            ("velocity_constraint", self.velocity_constraint),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SimError::InvalidParams(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if !(self.alpha >= 0.0 && self.beta >= 0.0) {
            return Err(SimError::InvalidParams(
                "viscosity coefficients alpha/beta must be non-negative".into(),
            ));
        }
        for (name, value) in [
            ("collision_damping", self.collision_damping),
            ("shear_damping", self.shear_damping),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::InvalidParams(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(SimError::InvalidParams("gravity must be finite".into()));
        }
        if self.threads == Some(0) {
            return Err(SimError::InvalidParams("threads must be at least 1".into()));
        }
        Ok(())
    }
}
