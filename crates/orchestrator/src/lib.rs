//! Orchestration Layer
//!
//! This crate wires the SPH kernel into a runnable simulation:
//! - JSON configuration loading and validation
//! - Back end selection (CPU, GPU, or automatic with fallback)
//! - Simulation runner with lifecycle management

#![warn(missing_docs)]

pub mod config;
pub mod runner;

pub use config::{BackendType, SimulationConfig};
pub use runner::{RunnerState, SimulationRunner};

use sph_kernel::{Aabb, CpuKernel, ParticleArrays, SimError, SimulationKernel, SphParams, StaticBox};

/// Create a complete simulation from a configuration file
///
/// This function performs the full simulation setup pipeline:
/// 1. Load and validate the configuration
/// 2. Place the particles in the central half of the domain
/// 3. Create the kernel for the configured back end
/// 4. Wrap in a SimulationRunner with a static boundary box
///
/// # Example
/// ```no_run
/// use orchestrator::create_simulation;
///
/// let runner = create_simulation("configs/default.json")?;
/// runner.start();
/// // ... query status, pause, resume, etc.
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_simulation(config_path: &str) -> Result<SimulationRunner, Box<dyn std::error::Error>> {
    tracing::info!("Creating simulation from config: {}", config_path);

    let config = SimulationConfig::load(config_path)?;
    tracing::info!("Configuration loaded: {}", config.name);

    create_simulation_from_config(&config)
}

/// Create a simulation from an already validated configuration
pub fn create_simulation_from_config(
    config: &SimulationConfig,
) -> Result<SimulationRunner, Box<dyn std::error::Error>> {
    let boundary = config.domain.to_aabb();
    let particles = ParticleArrays::initialize(
        config.particle_count,
        &boundary,
        config.density0,
        config.particle_mass,
        config.seed,
    )?;

    let kernel = create_kernel(config.backend, particles, config.sph_params(), boundary)?;

    let runner = SimulationRunner::new(kernel, Box::new(StaticBox(boundary)), config.dt, config.max_ticks);
    tracing::info!("Simulation ready to start");
    Ok(runner)
}

/// Create a simulation kernel based on the backend configuration.
///
/// For `Auto`, attempts GPU first and falls back to CPU if unavailable.
/// `Gpu` fails when the adapter cannot be used or the `gpu` feature is off.
pub fn create_kernel(
    backend: BackendType,
    particles: ParticleArrays,
    params: SphParams,
    boundary: Aabb,
) -> Result<Box<dyn SimulationKernel + Send>, SimError> {
    match backend {
        BackendType::Cpu => {
            tracing::info!("Creating CPU simulation kernel...");
            Ok(Box::new(CpuKernel::new(particles, params, boundary)?))
        }
        #[cfg(feature = "gpu")]
        BackendType::Gpu => {
            tracing::info!("Creating GPU simulation kernel...");
            Ok(Box::new(sph_kernel::GpuKernel::new(particles, params, boundary)?))
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Gpu => Err(SimError::InvalidParams(
            "GPU backend requested but the 'gpu' feature is not enabled".to_string(),
        )),
        #[cfg(feature = "gpu")]
        BackendType::Auto => {
            if sph_kernel::gpu_available() {
                match sph_kernel::GpuKernel::new(particles.clone(), params, boundary) {
                    Ok(gpu) => {
                        tracing::info!("Auto backend: using GPU");
                        return Ok(Box::new(gpu));
                    }
                    Err(e) => tracing::warn!("GPU initialization failed ({}), falling back to CPU", e),
                }
            } else {
                tracing::warn!("No GPU adapter found, falling back to CPU");
            }
            Ok(Box::new(CpuKernel::new(particles, params, boundary)?))
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Auto => {
            tracing::info!("Auto backend: GPU support not compiled in, using CPU");
            Ok(Box::new(CpuKernel::new(particles, params, boundary)?))
        }
    }
}
