//! Simulation runner with lifecycle management
//!
//! This module provides the `SimulationRunner` which drives a kernel in a
//! background thread at a fixed tick duration. Each tick the boundary box is
//! refreshed from a `BoundarySupplier`, the kernel is advanced, its state is
//! checked for non-finite values and the resulting metrics are published.

use sph_kernel::{BoundarySupplier, SimulationKernel, TickMetrics};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Runner state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Simulation created but not yet started
    Created,
    /// Simulation actively running
    Running,
    /// Simulation paused
    Paused,
    /// Simulation finished (reached stopping condition or stopped)
    Finished,
    /// Simulation encountered an error
    Error,
}

/// Shared state between the runner thread and control interface
struct SharedState {
    state: RunnerState,
    /// Simulated time (seconds)
    sim_time: f64,
    tick_count: u64,
    /// Metrics after the most recent tick
    metrics: Option<TickMetrics>,
    /// Most recent error message (if state is Error)
    error_message: Option<String>,
}

type Shared = Arc<Mutex<SharedState>>;

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    // The loop never panics while holding the lock, so the data is consistent.
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    shared: Shared,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl SimulationRunner {
    /// Create a new simulation runner.
    ///
    /// # Arguments
    /// * `kernel` - The simulation kernel to run
    /// * `supplier` - Source of the boundary box, queried before every tick
    /// * `dt` - Fixed tick duration (seconds)
    /// * `max_ticks` - Optional number of ticks after which the run finishes
    pub fn new(
        mut kernel: Box<dyn SimulationKernel + Send>,
        mut supplier: Box<dyn BoundarySupplier + Send>,
        dt: f32,
        max_ticks: Option<u64>,
    ) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            sim_time: 0.0,
            tick_count: 0,
            metrics: None,
            error_message: None,
        }));

        let shared_clone = Arc::clone(&shared);
        let thread_handle = thread::Builder::new()
            .name("sph-runner".to_string())
            .spawn(move || {
                run_simulation_loop(kernel.as_mut(), supplier.as_mut(), &shared_clone, dt, max_ticks);
            });

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to spawn simulation thread: {}", e);
                let mut guard = lock(&shared);
                guard.state = RunnerState::Error;
                guard.error_message = Some(format!("failed to spawn simulation thread: {e}"));
                None
            }
        };

        Self {
            shared,
            thread_handle,
        }
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state
    }

    /// Simulated time (seconds)
    pub fn sim_time(&self) -> f64 {
        lock(&self.shared).sim_time
    }

    /// Number of completed ticks
    pub fn tick_count(&self) -> u64 {
        lock(&self.shared).tick_count
    }

    /// Metrics published after the most recent tick, if any tick has run
    pub fn latest_metrics(&self) -> Option<TickMetrics> {
        lock(&self.shared).metrics
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Pause the simulation
    pub fn pause(&self) {
        let mut guard = lock(&self.shared);
        if guard.state == RunnerState::Running {
            guard.state = RunnerState::Paused;
        }
    }

    /// Resume the simulation
    pub fn resume(&self) {
        let mut guard = lock(&self.shared);
        if guard.state == RunnerState::Paused {
            guard.state = RunnerState::Running;
        }
    }

    /// Start the simulation (transition from Created to Running)
    pub fn start(&self) {
        let mut guard = lock(&self.shared);
        if guard.state == RunnerState::Created {
            guard.state = RunnerState::Running;
        }
    }

    /// Ask the simulation thread to finish after the current tick
    pub fn stop(&self) {
        let mut guard = lock(&self.shared);
        if matches!(
            guard.state,
            RunnerState::Created | RunnerState::Running | RunnerState::Paused
        ) {
            guard.state = RunnerState::Finished;
        }
    }

    /// Wait for the simulation thread to complete
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| "Thread panicked".to_string())?;
        }
        match self.error_message() {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        // Signal the thread to exit; it is detached if still running
        self.stop();
    }
}

fn current_state(shared: &Mutex<SharedState>) -> RunnerState {
    lock(shared).state
}

fn fail(shared: &Mutex<SharedState>, message: String) {
    tracing::error!("Simulation stopped: {}", message);
    let mut guard = lock(shared);
    guard.state = RunnerState::Error;
    guard.error_message = Some(message);
}

/// Main simulation loop executed in background thread
fn run_simulation_loop(
    kernel: &mut dyn SimulationKernel,
    supplier: &mut dyn BoundarySupplier,
    shared: &Mutex<SharedState>,
    dt: f32,
    max_ticks: Option<u64>,
) {
    // Wait for start signal
    loop {
        match current_state(shared) {
            RunnerState::Created => thread::sleep(Duration::from_millis(10)),
            RunnerState::Running => break,
            _ => return,
        }
    }

    tracing::info!(
        "Simulation thread started: {} particles, dt={:.5}s",
        kernel.particle_count(),
        dt
    );

    let start_wall_time = Instant::now();
    let mut sim_time = 0.0_f64;
    let mut tick_count = 0_u64;

    loop {
        match current_state(shared) {
            RunnerState::Running => {
                let bounds = supplier.current_bounds();
                if let Err(e) = kernel.set_boundary(bounds) {
                    fail(shared, e.to_string());
                    break;
                }

                kernel.tick(dt);

                if let Err(e) = kernel.check_finite() {
                    fail(shared, format!("tick {}: {}", tick_count + 1, e));
                    break;
                }

                sim_time += dt as f64;
                tick_count += 1;
                let metrics = kernel.metrics();

                {
                    let mut guard = lock(shared);
                    guard.sim_time = sim_time;
                    guard.tick_count = tick_count;
                    guard.metrics = Some(metrics);
                }

                if let Some(max) = max_ticks {
                    if tick_count >= max {
                        tracing::info!("Simulation finished: reached max_ticks = {}", max);
                        let mut guard = lock(shared);
                        if guard.state != RunnerState::Error {
                            guard.state = RunnerState::Finished;
                        }
                        break;
                    }
                }

                if tick_count % 100 == 0 {
                    tracing::debug!(
                        "Tick {}: sim_time={:.3}s, wall_time={:.2}s, max_speed={:.4}, mean_density={:.4}",
                        tick_count,
                        sim_time,
                        start_wall_time.elapsed().as_secs_f64(),
                        metrics.max_speed,
                        metrics.mean_density,
                    );
                }
            }
            RunnerState::Paused => thread::sleep(Duration::from_millis(50)),
            RunnerState::Finished | RunnerState::Error | RunnerState::Created => break,
        }
    }

    tracing::info!(
        "Simulation thread exiting: {} ticks, {:.3}s simulated, {:.2}s wall",
        tick_count,
        sim_time,
        start_wall_time.elapsed().as_secs_f64()
    );
}
