//! SPH smoothing kernel and the per-tick particle passes.
//!
//! Implements the M4 cubic spline kernel for 3D SPH and the three
//! "full pass" phases run after the grid rebuild: density summation,
//! acceleration (pressure + artificial viscosity + gravity) and symplectic
//! Euler integration with wall reflection.
//!
//! Every pass runs in parallel over the particle index range and each task
//! writes only its own particle's slot, so the passes are deterministic for a
//! fixed input regardless of thread count.

use std::f32::consts::FRAC_1_PI;

use rayon::prelude::*;

use crate::boundary::{self, Damping, Walls};
use crate::neighbor::NeighborGrid;
use crate::params::SphParams;
use crate::particle::ParticleArrays;

/// Additive guard on the pair distance before it is inverted.
pub const DIST_EPSILON: f32 = 1.0e-8;

/// M4 cubic spline smoothing kernel in 3D.
///
/// ```text
/// W(q, h) = (1 / pi h^3) * (1 - 1.5 q^2 + 0.75 q^3)   for 0 <= q < 1
/// W(q, h) = (1 / pi h^3) * 0.25 (2 - q)^3            for 1 <= q < 2
/// W(q, h) = 0                                         otherwise
/// ```
///
/// # Arguments
/// * `q` - Normalized distance `r / h`.
/// * `h` - Smoothing length. The support radius is 2h.
pub fn cubic_spline(q: f32, h: f32) -> f32 {
    let f = if (0.0..1.0).contains(&q) {
        1.0 - 1.5 * q * q + 0.75 * q * q * q
    } else if (1.0..2.0).contains(&q) {
        let t = 2.0 - q;
        0.25 * t * t * t
    } else {
        return 0.0;
    };
    FRAC_1_PI * f / (h * h * h)
}

/// Derivative of the M4 kernel with respect to `q`, scaled by `1/h`.
///
/// ```text
/// dW/dq = (1 / pi h^4) * (-3 q + 2.25 q^2)   for 0 <= q < 1
/// dW/dq = (1 / pi h^4) * -0.75 (2 - q)^2     for 1 <= q < 2
/// dW/dq = 0                                  otherwise
/// ```
///
/// The kernel gradient is this scalar times the unit separation vector.
/// Takes the pair distance, not `q`.
pub fn cubic_spline_dq(dist: f32, h: f32) -> f32 {
    let q = dist / h;
    let g = if (0.0..1.0).contains(&q) {
        -3.0 * q + 2.25 * q * q
    } else if (1.0..2.0).contains(&q) {
        let t = 2.0 - q;
        -0.75 * t * t
    } else {
        return 0.0;
    };
    FRAC_1_PI * g / (h * h * h * h)
}

#[inline]
fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Density summation over the 27-cell neighborhood, self term included.
///
/// `density[i] = sum_j mass[j] * W(|p_i - p_j| / h, h)`
pub fn compute_density(particles: &mut ParticleArrays, grid: &NeighborGrid, h: f32) {
    let ParticleArrays {
        positions,
        density,
        mass,
        ..
    } = particles;
    let positions = &*positions;
    let mass = &*mass;

    density.par_iter_mut().enumerate().for_each(|(i, rho)| {
        let pi = positions[i];
        let mut sum = 0.0_f32;
        grid.for_each_candidate(i, |j| {
            let r = sub(pi, positions[j]);
            let dist = dot(r, r).sqrt();
            sum += mass[j] * cubic_spline(dist / h, h);
        });
        *rho = sum;
    });
}

/// Pressure, artificial viscosity and gravity accelerations.
///
/// For every candidate `j != i`:
///
/// ```text
/// r_ab  = p_i - p_j,  v_ab = v_i - v_j
/// vdotr = (v_ab . r_ab) / (dist + eps)
/// Pi    = -0.5 (alpha c - beta vdotr) vdotr   if vdotr < 0, else 0
/// term  = [(1/rho_i + 1/rho_j) - rho0 (1/rho_i^2 + 1/rho_j^2)] (c^2 + Pi) dW/dq
/// a_i  += -m_j term / (dist + eps) * r_ab
/// ```
///
/// Gravity is added once per particle after the neighbor sum. Requires the
/// density pass of the same tick to have completed.
pub fn compute_accelerations(particles: &mut ParticleArrays, grid: &NeighborGrid, params: &SphParams) {
    let ParticleArrays {
        positions,
        velocities,
        accelerations,
        density,
        mass,
    } = particles;
    let (positions, velocities, density, mass) = (&*positions, &*velocities, &*density, &*mass);

    let h = params.smooth_length;
    let c = params.sound_speed;
    let c2 = c * c;
    let rho0 = params.density0;
    let (alpha, beta) = (params.alpha, params.beta);
    let gravity = params.gravity;

    accelerations.par_iter_mut().enumerate().for_each(|(i, acc)| {
        let (pi, vi) = (positions[i], velocities[i]);
        let inv_rho_i = 1.0 / density[i];
        let mut a = [0.0_f32; 3];

        grid.for_each_candidate(i, |j| {
            if j == i {
                return;
            }
            let r_ab = sub(pi, positions[j]);
            let dist = dot(r_ab, r_ab).sqrt();
            let inv_dist = 1.0 / (dist + DIST_EPSILON);
            let vdotr = dot(sub(vi, velocities[j]), r_ab) * inv_dist;

            let visc = if vdotr < 0.0 {
                -0.5 * (alpha * c - beta * vdotr) * vdotr
            } else {
                0.0
            };

            let inv_rho_j = 1.0 / density[j];
            let mut term = (inv_rho_i + inv_rho_j) - rho0 * (inv_rho_i * inv_rho_i + inv_rho_j * inv_rho_j);
            term *= (c2 + visc) * cubic_spline_dq(dist, h);

            let s = -mass[j] * term * inv_dist;
            a[0] += s * r_ab[0];
            a[1] += s * r_ab[1];
            a[2] += s * r_ab[2];
        });

        *acc = [a[0] + gravity[0], a[1] + gravity[1], a[2] + gravity[2]];
    });
}

/// Symplectic Euler step with speed clamp and wall reflection.
///
/// `v += a dt`, then `|v|` is capped at `params.max_speed()`, then
/// `p += v dt`, then the particle is reflected off `walls`.
pub fn integrate(particles: &mut ParticleArrays, params: &SphParams, walls: &Walls, dt: f32) {
    let max_speed = params.max_speed();
    let damping = Damping {
        collision: params.collision_damping,
        shear: params.shear_damping,
    };
    let ParticleArrays {
        positions,
        velocities,
        accelerations,
        ..
    } = particles;

    positions
        .par_iter_mut()
        .zip(velocities.par_iter_mut())
        .zip(accelerations.par_iter())
        .for_each(|((pos, vel), acc)| {
            let mut v = [
                vel[0] + acc[0] * dt,
                vel[1] + acc[1] * dt,
                vel[2] + acc[2] * dt,
            ];
            let speed = dot(v, v).sqrt();
            if speed > max_speed {
                let scale = max_speed / speed;
                v = [v[0] * scale, v[1] * scale, v[2] * scale];
            }
            let mut p = [pos[0] + v[0] * dt, pos[1] + v[1] * dt, pos[2] + v[2] * dt];
            boundary::reflect(&mut p, &mut v, walls, damping);
            *pos = p;
            *vel = v;
        });
}
