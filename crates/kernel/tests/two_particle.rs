//! Two-particle closed-form test.
//!
//! Two particles 0.1 apart with h = 0.2 (q = 0.5), mass 0.1 and rest
//! density 1. Density and acceleration are checked against the closed-form
//! kernel sums, and the accelerations must be equal and opposite along the
//! separation line. Approaching pairs exercise the artificial viscosity term.

use sph_kernel::sph::{compute_accelerations, compute_density};
use sph_kernel::{
    cubic_spline, cubic_spline_dq, Aabb, CpuKernel, NeighborGrid, ParticleArrays, SimulationKernel,
    SphParams, CPU_CELL_FACTOR,
};

const H: f32 = 0.2;
const D: f32 = 0.1;
const MASS: f32 = 0.1;

fn boundary() -> Aabb {
    Aabb::new([-1.0, 0.0, -1.0], [1.0, 2.0, 1.0])
}

fn two_particles() -> ParticleArrays {
    moving_pair(0.0)
}

/// Particle 0 moves at `+vx`, particle 1 at `-vx`; positive `vx` closes the gap.
fn moving_pair(vx: f32) -> ParticleArrays {
    let mut particles = ParticleArrays::new();
    particles.push_particle([0.0, 1.0, 0.0], [vx, 0.0, 0.0], MASS, 1.0);
    particles.push_particle([D, 1.0, 0.0], [-vx, 0.0, 0.0], MASS, 1.0);
    particles
}

/// Density and acceleration passes over `particles` with `params`.
fn evaluate(mut particles: ParticleArrays, params: &SphParams) -> ParticleArrays {
    let mut grid = NeighborGrid::new(CPU_CELL_FACTOR);
    grid.rebuild(&boundary(), H, &particles.positions);
    compute_density(&mut particles, &grid, H);
    compute_accelerations(&mut particles, &grid, params);
    particles
}

/// Closed-form x acceleration of particle 0 for the symmetric pair moving at `vx`.
fn expected_ax(rho: f32, vx: f32, params: &SphParams) -> f32 {
    let c = params.sound_speed;
    let inv_dist = 1.0 / (D + 1.0e-8);
    // r_ab = (-D, 0, 0), v_ab = (2 vx, 0, 0)
    let vdotr = 2.0 * vx * -D * inv_dist;
    let visc = if vdotr < 0.0 {
        -0.5 * (params.alpha * c - params.beta * vdotr) * vdotr
    } else {
        0.0
    };
    let term = (2.0 / rho - params.density0 * 2.0 / (rho * rho)) * (c * c + visc) * cubic_spline_dq(D, H);
    -MASS * term * inv_dist * -D
}

fn params() -> SphParams {
    SphParams {
        smooth_length: H,
        density0: 1.0,
        gravity: [0.0; 3],
        ..SphParams::default()
    }
}

fn expected_density() -> f32 {
    MASS * cubic_spline(0.0, H) + MASS * cubic_spline(D / H, H)
}

#[test]
fn density_matches_closed_form() {
    let mut particles = two_particles();
    let mut grid = NeighborGrid::new(CPU_CELL_FACTOR);
    grid.rebuild(&boundary(), H, &particles.positions);
    compute_density(&mut particles, &grid, H);

    let expected = expected_density();
    for (i, &rho) in particles.density.iter().enumerate() {
        assert!(
            (rho - expected).abs() < 1.0e-5,
            "particle {i}: density {rho}, expected {expected}"
        );
    }
}

#[test]
fn density_through_kernel_tick() {
    let mut kernel = CpuKernel::new(two_particles(), params(), boundary()).unwrap();
    kernel.tick(1.0 / 60.0);

    let expected = expected_density();
    for &rho in kernel.density() {
        assert!((rho - expected).abs() < 1.0e-5, "density {rho}, expected {expected}");
    }
}

#[test]
fn accelerations_equal_and_opposite() {
    let params = params();
    let mut particles = two_particles();
    let mut grid = NeighborGrid::new(CPU_CELL_FACTOR);
    grid.rebuild(&boundary(), H, &particles.positions);
    compute_density(&mut particles, &grid, H);
    compute_accelerations(&mut particles, &grid, &params);

    // Closed form for particle 0: r_ab = (-D, 0, 0), both at rest.
    let rho = particles.density[0];
    let c2 = params.sound_speed * params.sound_speed;
    let term = (2.0 / rho - params.density0 * 2.0 / (rho * rho)) * c2 * cubic_spline_dq(D, H);
    let inv_dist = 1.0 / (D + 1.0e-8);
    let expected_ax = -MASS * term * inv_dist * -D;

    let a0 = particles.accelerations[0];
    let a1 = particles.accelerations[1];
    println!("a0 = {a0:?}, a1 = {a1:?}, expected ax = {expected_ax}");

    assert!((a0[0] - expected_ax).abs() / expected_ax.abs() < 1.0e-4);
    // Repulsive: particle 0 is pushed towards -x.
    assert!(a0[0] < 0.0);

    for c in 0..3 {
        assert!((a0[c] + a1[c]).abs() < 1.0e-5, "component {c} not antisymmetric");
    }
    assert_eq!(a0[1], 0.0);
    assert_eq!(a0[2], 0.0);
}

#[test]
fn momentum_conserved_without_gravity() {
    let mut kernel = CpuKernel::new(two_particles(), params(), boundary()).unwrap();
    for _ in 0..10 {
        kernel.tick(1.0e-3);
    }
    let v = kernel.velocities();
    for c in 0..3 {
        let p = MASS * v[0][c] + MASS * v[1][c];
        assert!(p.abs() < 1.0e-6, "momentum component {c} = {p}");
    }
    // The pair separates.
    let gap = kernel.positions()[1][0] - kernel.positions()[0][0];
    assert!(gap > D);
}

#[test]
fn approaching_pair_adds_artificial_viscosity() {
    let params = params();
    let at_rest = evaluate(two_particles(), &params);
    let approaching = evaluate(moving_pair(0.3), &params);

    let rho = approaching.density[0];
    let expected = expected_ax(rho, 0.3, &params);
    let a0 = approaching.accelerations[0];
    let a1 = approaching.accelerations[1];
    println!("approaching a0 = {a0:?}, expected ax = {expected}");

    assert!((a0[0] - expected).abs() / expected.abs() < 1.0e-4);
    // Viscosity strengthens the repulsion of an approaching pair.
    assert!(a0[0].abs() > at_rest.accelerations[0][0].abs() * 1.01);
    for c in 0..3 {
        assert!((a0[c] + a1[c]).abs() < 1.0e-5, "component {c} not antisymmetric");
    }
}

#[test]
fn separating_pair_has_no_viscosity() {
    let params = params();
    let at_rest = evaluate(two_particles(), &params);
    let separating = evaluate(moving_pair(-0.3), &params);

    let rho = separating.density[0];
    let expected = expected_ax(rho, -0.3, &params);
    let a0 = separating.accelerations[0];
    assert!((a0[0] - expected).abs() / expected.abs() < 1.0e-4);
    // With the viscosity term off the result is the at-rest pressure force.
    assert_eq!(a0, at_rest.accelerations[0]);
    assert_eq!(separating.accelerations[1], at_rest.accelerations[1]);
}

#[test]
fn gravity_added_once_with_neighbors() {
    let without = evaluate(two_particles(), &params());
    let gravity = [0.0, -9.8, 0.0];
    let with_gravity = SphParams {
        gravity,
        ..params()
    };
    let with = evaluate(two_particles(), &with_gravity);

    for i in 0..2 {
        let a = with.accelerations[i];
        assert_eq!(a[1], gravity[1], "particle {i}: {a:?}");
        assert_eq!(a[0], without.accelerations[i][0]);
        assert_eq!(a[2], 0.0);
    }
}
