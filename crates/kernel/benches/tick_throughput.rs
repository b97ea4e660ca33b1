//! Tick throughput at increasing particle counts.
//!
//! Run with: cargo bench -p sph-kernel --bench tick_throughput
//! GPU rows: cargo bench -p sph-kernel --features gpu --bench tick_throughput

use std::time::Instant;

use sph_kernel::{Aabb, CpuKernel, ParticleArrays, SimulationKernel, SphParams};

/// Box sized so the central half holds `n` particles at roughly rest spacing.
fn setup(n: usize) -> (ParticleArrays, SphParams, Aabb) {
    let params = SphParams {
        smooth_length: 0.05,
        ..SphParams::default()
    };
    let half = 0.5 * (n as f32).cbrt() * 0.04;
    let boundary = Aabb::new([-2.0 * half, 0.0, -2.0 * half], [2.0 * half, 4.0 * half, 2.0 * half]);
    let particles = ParticleArrays::initialize(n, &boundary, params.density0, 0.1, 0)
        .expect("valid benchmark setup");
    (particles, params, boundary)
}

fn time_ticks(kernel: &mut dyn SimulationKernel, ticks: usize) -> f64 {
    let dt = 1.0 / 60.0;
    // Warmup
    for _ in 0..2 {
        kernel.tick(dt);
    }
    let _ = kernel.particles();
    let start = Instant::now();
    for _ in 0..ticks {
        kernel.tick(dt);
    }
    let _ = kernel.particles();
    start.elapsed().as_secs_f64()
}

fn main() {
    println!("=== SPH Tick Throughput ===\n");

    // (particles, ticks) -- fewer ticks at larger counts
    let configs = [(1_000, 100), (8_000, 40), (27_000, 20), (64_000, 10)];

    println!(
        "{:>8} {:>10} {:>8} {:>12} {:>12}",
        "Backend", "Particles", "Ticks", "ticks/s", "ms/tick"
    );

    for &(n, ticks) in &configs {
        let (particles, params, boundary) = setup(n);
        let mut cpu = CpuKernel::new(particles, params, boundary).expect("CPU kernel");
        let secs = time_ticks(&mut cpu, ticks);
        println!(
            "{:>8} {:>10} {:>8} {:>12.1} {:>12.3}",
            "cpu",
            n,
            ticks,
            ticks as f64 / secs,
            1000.0 * secs / ticks as f64
        );

        #[cfg(feature = "gpu")]
        {
            let (particles, params, boundary) = setup(n);
            match sph_kernel::GpuKernel::new(particles, params, boundary) {
                Ok(mut gpu) => {
                    let secs = time_ticks(&mut gpu, ticks);
                    println!(
                        "{:>8} {:>10} {:>8} {:>12.1} {:>12.3}",
                        "gpu",
                        n,
                        ticks,
                        ticks as f64 / secs,
                        1000.0 * secs / ticks as f64
                    );
                }
                Err(e) => println!("{:>8} {:>10} skipped: {e}", "gpu", n),
            }
        }
    }
}
