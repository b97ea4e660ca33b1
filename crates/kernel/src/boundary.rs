//! Boundary box and wall reflection.
//!
//! The simulation domain is an axis-aligned box supplied from outside once
//! per tick. Particles are confined by reflecting them off the box faces,
//! each face inset by the particle size.

use serde::{Deserialize, Serialize};

use crate::SimError;

/// Axis-aligned boundary box. Invariant: `min < max` on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: [f32; 3],
    /// Maximum corner.
    pub max: [f32; 3],
}

impl Aabb {
    /// Create a box from its two corners. Call [`Aabb::validate`] before use.
    pub const fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    /// Check `min < max` componentwise and that all corners are finite.
    pub fn validate(&self) -> Result<(), SimError> {
        for axis in 0..3 {
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if !lo.is_finite() || !hi.is_finite() {
                return Err(SimError::InvalidBoundary(format!(
                    "axis {axis} has non-finite bounds [{lo}, {hi}]"
                )));
            }
            if lo >= hi {
                return Err(SimError::InvalidBoundary(format!(
                    "axis {axis}: min {lo} must be less than max {hi}"
                )));
            }
        }
        Ok(())
    }

    /// Box edge lengths.
    pub fn extent(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Corners of the central 50% of the box on every axis.
    pub fn central_half(&self) -> ([f32; 3], [f32; 3]) {
        let mut lo = [0.0; 3];
        let mut hi = [0.0; 3];
        for axis in 0..3 {
            lo[axis] = 0.75 * self.min[axis] + 0.25 * self.max[axis];
            hi[axis] = 0.25 * self.min[axis] + 0.75 * self.max[axis];
        }
        (lo, hi)
    }

    /// Wall planes: every face moved inward by `inset`.
    pub fn walls(&self, inset: f32) -> Walls {
        Walls {
            min: [self.min[0] + inset, self.min[1] + inset, self.min[2] + inset],
            max: [self.max[0] - inset, self.max[1] - inset, self.max[2] - inset],
        }
    }
}

/// Source of the boundary box, queried once before each tick.
pub trait BoundarySupplier {
    /// Current box corners.
    fn current_bounds(&mut self) -> Aabb;
}

/// A boundary that never moves.
#[derive(Debug, Clone, Copy)]
pub struct StaticBox(pub Aabb);

impl BoundarySupplier for StaticBox {
    fn current_bounds(&mut self) -> Aabb {
        self.0
    }
}

/// Inset wall planes the integrator reflects against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Walls {
    /// Lower wall plane per axis (`xmin`, `ymin`, `zmin`).
    pub min: [f32; 3],
    /// Upper wall plane per axis (`xmax`, `ymax`, `zmax`).
    pub max: [f32; 3],
}

/// Wall contact response coefficients.
#[derive(Debug, Clone, Copy)]
pub struct Damping {
    /// Factor on the reversed wall-normal component.
    pub collision: f32,
    /// Factor on both tangential components.
    pub shear: f32,
}

/// Reflect a particle off the walls, one axis at a time in x, y, z order.
///
/// For each axis the lower plane is tested first and the upper plane only if
/// the lower one was not crossed. A crossing clamps the coordinate onto the
/// plane, reverses and damps the normal velocity component and damps the two
/// tangential ones. Later axes see the velocity already modified by earlier
/// ones, so a corner crossing is resolved as successive single-face fix-ups.
#[inline]
pub fn reflect(pos: &mut [f32; 3], vel: &mut [f32; 3], walls: &Walls, damping: Damping) {
    for axis in 0..3 {
        let hit = if pos[axis] < walls.min[axis] {
            pos[axis] = walls.min[axis];
            true
        } else if pos[axis] > walls.max[axis] {
            pos[axis] = walls.max[axis];
            true
        } else {
            false
        };
        if hit {
            vel[axis] *= -damping.collision;
            vel[(axis + 1) % 3] *= damping.shear;
            vel[(axis + 2) % 3] *= damping.shear;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAMPING: Damping = Damping {
        collision: 0.8,
        shear: 0.95,
    };

    fn walls() -> Walls {
        Aabb::new([0.0; 3], [1.0; 3]).walls(0.1)
    }

    #[test]
    fn validate_accepts_proper_box() {
        assert!(Aabb::new([-1.0, 0.0, -1.0], [1.0, 2.0, 1.0]).validate().is_ok());
    }

    #[test]
    fn validate_rejects_flat_box() {
        let b = Aabb::new([0.0; 3], [1.0, 0.0, 1.0]);
        assert!(matches!(b.validate(), Err(SimError::InvalidBoundary(_))));
    }

    #[test]
    fn central_half_corners() {
        let (lo, hi) = Aabb::new([-1.0, 0.0, -1.0], [1.0, 2.0, 1.0]).central_half();
        assert_eq!(lo, [-0.5, 0.5, -0.5]);
        assert_eq!(hi, [0.5, 1.5, 0.5]);
    }

    #[test]
    fn inside_particle_untouched() {
        let mut pos = [0.5, 0.5, 0.5];
        let mut vel = [1.0, -2.0, 3.0];
        reflect(&mut pos, &mut vel, &walls(), DAMPING);
        assert_eq!(pos, [0.5, 0.5, 0.5]);
        assert_eq!(vel, [1.0, -2.0, 3.0]);
    }

    #[test]
    fn upper_x_face_reflects() {
        let mut pos = [0.95, 0.5, 0.5];
        let mut vel = [1.0, 1.0, 1.0];
        reflect(&mut pos, &mut vel, &walls(), DAMPING);
        assert!((pos[0] - 0.9).abs() < 1.0e-6);
        assert!((vel[0] + 0.8).abs() < 1.0e-6);
        assert!((vel[1] - 0.95).abs() < 1.0e-6);
        assert!((vel[2] - 0.95).abs() < 1.0e-6);
    }

    #[test]
    fn corner_crossing_is_sequential() {
        // Crosses xmin and ymin: x fix-up damps y first, then y fix-up
        // reverses the already-damped y component.
        let mut pos = [0.0, 0.0, 0.5];
        let mut vel = [-1.0, -1.0, 1.0];
        reflect(&mut pos, &mut vel, &walls(), DAMPING);
        assert!((pos[0] - 0.1).abs() < 1.0e-6);
        assert!((pos[1] - 0.1).abs() < 1.0e-6);
        assert!((vel[0] - 0.8 * 0.95).abs() < 1.0e-6);
        assert!((vel[1] - 0.95 * 0.8).abs() < 1.0e-6);
        assert!((vel[2] - 0.95 * 0.95).abs() < 1.0e-6);
    }

    #[test]
    fn static_box_supplies_same_bounds() {
        let b = Aabb::new([0.0; 3], [2.0; 3]);
        let mut supplier = StaticBox(b);
        assert_eq!(supplier.current_bounds(), b);
        assert_eq!(supplier.current_bounds(), b);
    }
}
