//! Headless SPH simulation driver
//!
//! Usage: `sph-sim [CONFIG_PATH]` (defaults to `configs/default.json`).
//! Logs the tick metrics once per simulated second until the run finishes.

use orchestrator::{create_simulation, RunnerState};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sph_sim=info,orchestrator=info,sph_kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "configs/default.json".to_string());

    let runner = match create_simulation(&config_path) {
        Ok(runner) => runner,
        Err(e) => {
            tracing::error!("Failed to create simulation: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runner.start();

    let mut last_reported = 0.0_f64;
    loop {
        match runner.state() {
            RunnerState::Finished | RunnerState::Error => break,
            _ => thread::sleep(Duration::from_millis(100)),
        }

        let sim_time = runner.sim_time();
        if sim_time - last_reported >= 1.0 {
            last_reported = sim_time;
            if let Some(m) = runner.latest_metrics() {
                tracing::info!(
                    "t={:.2}s ticks={} max_speed={:.4} mean_density={:.4} max_density={:.4} kinetic_energy={:.5}",
                    sim_time,
                    runner.tick_count(),
                    m.max_speed,
                    m.mean_density,
                    m.max_density,
                    m.kinetic_energy
                );
            }
        }
    }

    match runner.join() {
        Ok(()) => {
            tracing::info!("Simulation complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Simulation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
