//! GPU (Metal/Vulkan/DX12 via wgpu) implementation of the SPH simulation kernel.
//!
//! `GpuKernel` implements `SimulationKernel` using wgpu compute shaders.
//!
//! # Architecture
//! - The neighbor grid is rebuilt on the host from a mirror of the positions
//!   and uploaded before each tick.
//! - Each tick then records 3 compute passes in one command encoder, which
//!   provides the phase barriers by submission order:
//!   1. Density summation
//!   2. Acceleration (pressure + viscosity + gravity)
//!   3. Integration with wall reflection
//! - The same submission copies positions into a staging buffer and starts
//!   mapping it. The host completes the mapping at the start of the next tick
//!   to refresh its mirror. Device buffers stay authoritative.
//! - Velocity, acceleration and density readback happens only on demand.
//!
//! # Bind group layout
//! A single group 0 shared by all three entry points:
//!
//! | binding | buffer | access |
//! |---|---|---|
//! | 0 | SimParams | uniform |
//! | 1-4 | positions, velocities, accelerations, density | read_write |
//! | 5-9 | mass, block_ids, sorted_ids, block_start, block_offset | read |

pub mod buffers;

use std::cell::{Cell, UnsafeCell};
use std::sync::mpsc::TryRecvError;

use buffers::{GpuBuffers, GpuSimParams, MapReceiver};

use crate::boundary::Aabb;
use crate::neighbor::{NeighborGrid, GPU_CELL_FACTOR};
use crate::params::SphParams;
use crate::particle::ParticleArrays;
use crate::{SimError, SimulationKernel};

/// Storage buffers bound by the acceleration pass.
pub const REQUIRED_STORAGE_BUFFERS: u32 = 9;

/// Threads per workgroup; must match `@workgroup_size` in `sph.wgsl`.
const WORKGROUP_SIZE: u32 = 64;

/// GPU-accelerated SPH simulation kernel using wgpu compute shaders.
pub struct GpuKernel {
    // wgpu resources
    device: wgpu::Device,
    queue: wgpu::Queue,

    // Compute pipelines
    pipeline_density: wgpu::ComputePipeline,
    pipeline_acceleration: wgpu::ComputePipeline,
    pipeline_integrate: wgpu::ComputePipeline,

    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,

    // GPU buffers
    bufs: GpuBuffers,

    // Simulation parameters
    params: SphParams,
    boundary: Aabb,

    // Host-side grid, rebuilt from the position mirror each tick.
    grid: NeighborGrid,

    // Cached CPU-side particle data (refreshed lazily via interior mutability).
    // `positions` doubles as the mirror used for the grid rebuild.
    cached_particles: UnsafeCell<ParticleArrays>,

    // In-flight position readback started by the previous tick.
    pending_positions: Cell<Option<MapReceiver>>,

    // Lazy readback: true when velocities/accelerations/density on the GPU
    // are newer than cached_particles.
    cache_dirty: Cell<bool>,
}

/// Check whether a GPU adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

impl GpuKernel {
    /// Create a new GPU simulation kernel using [`GPU_CELL_FACTOR`].
    ///
    /// Returns `Err(SimError::Gpu)` if no suitable GPU adapter is found,
    /// allowing callers to fall back to `CpuKernel`.
    pub fn new(particles: ParticleArrays, params: SphParams, boundary: Aabb) -> Result<Self, SimError> {
        Self::with_cell_factor(particles, params, boundary, GPU_CELL_FACTOR)
    }

    /// Create a GPU kernel whose grid cells are `cell_factor * h` wide.
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

        // --- Device initialization ---
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| SimError::Gpu("No suitable GPU adapter found".into()))?;

        tracing::info!("GPU adapter: {:?}", adapter.get_info().name);

        // wgpu defaults to 8 storage buffers per stage; the acceleration pass
        // needs 9, so ask for the adapter's actual limit.
        let adapter_limits = adapter.limits();
        if adapter_limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
            return Err(SimError::Gpu(format!(
                "adapter supports {} storage buffers per shader stage, {} required",
                adapter_limits.max_storage_buffers_per_shader_stage, REQUIRED_STORAGE_BUFFERS
            )));
        }
        let mut required_limits = wgpu::Limits::default();
        required_limits.max_storage_buffers_per_shader_stage =
            adapter_limits.max_storage_buffers_per_shader_stage;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sph_gpu_device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| SimError::Gpu(format!("Failed to create device: {e}")))?;

        // --- Create buffers ---
        let grid = NeighborGrid::new(cell_factor);
        let sim_params = make_params(&params, &boundary, particles.len() as u32, 0, 0.0);
        let bufs = GpuBuffers::new(&device, &particles, &sim_params);

        // --- Load shader ---
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sph"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/sph.wgsl").into()),
        });

        // --- Bind group layout ---
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sph_bgl"),
            entries: &[
                bgl_uniform(0),     // params
                bgl_storage_rw(1),  // positions
                bgl_storage_rw(2),  // velocities
                bgl_storage_rw(3),  // accelerations
                bgl_storage_rw(4),  // density
                bgl_storage_ro(5),  // mass
                bgl_storage_ro(6),  // block_ids
                bgl_storage_ro(7),  // sorted_ids
                bgl_storage_ro(8),  // block_start
                bgl_storage_ro(9),  // block_offset
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sph_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |label: &str, entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let pipeline_density = make_pipeline("density", "density_pass");
        let pipeline_acceleration = make_pipeline("acceleration", "acceleration_pass");
        let pipeline_integrate = make_pipeline("integrate", "integrate_pass");

        let bind_group = create_bind_group(&device, &bind_group_layout, &bufs);

        tracing::info!(
            "GPU kernel: {} particles, h = {}, cell factor {}",
            particles.len(),
            params.smooth_length,
            cell_factor
        );

        Ok(Self {
            device,
            queue,
            pipeline_density,
            pipeline_acceleration,
            pipeline_integrate,
            bind_group_layout,
            bind_group,
            bufs,
            params,
            boundary,
            grid,
            cached_particles: UnsafeCell::new(particles),
            pending_positions: Cell::new(None),
            cache_dirty: Cell::new(false),
        })
    }

    /// Neighbor grid as built by the latest tick.
    pub fn grid(&self) -> &NeighborGrid {
        &self.grid
    }

    /// Complete the position readback started by the previous tick, if any,
    /// and copy it into the host mirror.
    fn finish_position_readback(&self) {
        let Some(rx) = self.pending_positions.take() else {
            return;
        };
        self.device.poll(wgpu::Maintain::Poll);
        let result = match rx.try_recv() {
            Ok(result) => Ok(result),
            Err(TryRecvError::Empty) => {
                self.device.poll(wgpu::Maintain::Wait);
                rx.recv()
            }
            Err(TryRecvError::Disconnected) => rx.recv(),
        };
        match result {
            Ok(Ok(())) => {
                // SAFETY: see `ensure_cache`.
                let cache = unsafe { &mut *self.cached_particles.get() };
                self.bufs.take_mapped_positions(&mut cache.positions);
            }
            Ok(Err(e)) => tracing::warn!("GPU position readback failed: {e}"),
            Err(_) => tracing::warn!("GPU position readback was dropped"),
        }
    }

    /// Ensure the CPU-side particle cache is up-to-date with GPU data.
    ///
    /// Uses interior mutability (UnsafeCell + Cell) so this can be called
    /// from `&self` methods like `particles()` and `metrics()`.
    ///
    /// # Safety
    /// `GpuKernel` is `!Sync` (it holds `Cell`s), so no concurrent access is
    /// possible. The cache is only mutated while a readback is pending or the
    /// cache is dirty, and both states are only entered through `tick`, which
    /// takes `&mut self` and so cannot overlap a borrow handed out by
    /// `particles()`.
    fn ensure_cache(&self) {
        self.finish_position_readback();
        if self.cache_dirty.get() {
            // SAFETY: no reference into the cache is live while it is dirty.
            let cache = unsafe { &mut *self.cached_particles.get() };
            self.bufs.readback_state(&self.device, &self.queue, cache);
            self.cache_dirty.set(false);
        }
    }
}

impl SimulationKernel for GpuKernel {
    fn set_boundary(&mut self, boundary: Aabb) -> Result<(), SimError> {
        boundary.validate()?;
        self.boundary = boundary;
        Ok(())
    }

    fn boundary(&self) -> Aabb {
        self.boundary
    }

    fn tick(&mut self, dt: f32) {
        let n_particles = self.bufs.n_particles;
        if n_particles == 0 {
            return;
        }

        // --- 1. Host grid rebuild from the position mirror ---
        self.finish_position_readback();
        let mirror = &self.cached_particles.get_mut().positions;
        self.grid.rebuild(&self.boundary, self.params.smooth_length, mirror);

        if self.bufs.upload_grid(&self.device, &self.queue, &self.grid) {
            self.bind_group = create_bind_group(&self.device, &self.bind_group_layout, &self.bufs);
        }
        let params = make_params(
            &self.params,
            &self.boundary,
            n_particles,
            self.grid.n_blocks() as u32,
            dt,
        );
        self.bufs.update_params(&self.queue, &params);

        // --- 2-4. Density, acceleration, integration in one submission ---
        let wg_particles = dispatch_size(n_particles, WORKGROUP_SIZE);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sph_tick"),
        });
        for (label, pipeline) in [
            ("density", &self.pipeline_density),
            ("acceleration", &self.pipeline_acceleration),
            ("integrate", &self.pipeline_integrate),
        ] {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(wg_particles, 1, 1);
        }
        self.bufs.encode_position_copy(&mut encoder);
        self.queue.submit(std::iter::once(encoder.finish()));

        // --- 5. Start async position readback for the next tick ---
        self.pending_positions.set(Some(self.bufs.begin_position_map()));

        // Mark cache as stale; readback deferred until particles() is called
        self.cache_dirty.set(true);
    }

    fn particles(&self) -> &ParticleArrays {
        self.ensure_cache();
        // SAFETY: ensure_cache() guarantees no outstanding mutable reference.
        // The returned reference borrows `self`, preventing tick() from being
        // called while it's alive (tick takes &mut self).
        unsafe { &*self.cached_particles.get() }
    }

    fn particle_count(&self) -> usize {
        self.bufs.n_particles as usize
    }
}

/// Pack parameters, inset walls and grid size into the uniform layout.
fn make_params(params: &SphParams, boundary: &Aabb, particle_count: u32, n_blocks: u32, dt: f32) -> GpuSimParams {
    let walls = boundary.walls(params.particle_size());
    GpuSimParams {
        dt,
        particle_count,
        gravity_x: params.gravity[0],
        gravity_y: params.gravity[1],
        gravity_z: params.gravity[2],
        max_speed: params.max_speed(),
        collision_damping: params.collision_damping,
        shear_damping: params.shear_damping,
        smooth_length: params.smooth_length,
        density0: params.density0,
        sound_speed: params.sound_speed,
        alpha: params.alpha,
        beta: params.beta,
        xmin: walls.min[0],
        xmax: walls.max[0],
        ymin: walls.min[1],
        ymax: walls.max[1],
        zmin: walls.min[2],
        zmax: walls.max[2],
        n_blocks,
    }
}

fn create_bind_group(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, bufs: &GpuBuffers) -> wgpu::BindGroup {
    let buffers = [
        &bufs.params_buffer,
        &bufs.positions,
        &bufs.velocities,
        &bufs.accelerations,
        &bufs.density,
        &bufs.mass,
        &bufs.block_ids,
        &bufs.sorted_ids,
        &bufs.block_start,
        &bufs.block_offset,
    ];
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(binding, buf)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buf.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("sph_bg"),
        layout,
        entries: &entries,
    })
}

/// Calculate dispatch workgroup count: ceil(total / workgroup_size).
fn dispatch_size(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size)
}

// ---- Bind group layout entry helpers ----

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(1, 64), 1);
        assert_eq!(dispatch_size(64, 64), 1);
        assert_eq!(dispatch_size(65, 64), 2);
    }

    #[test]
    fn params_carry_inset_walls() {
        let params = SphParams::default();
        let boundary = Aabb::new([-1.0, 0.0, -1.0], [1.0, 2.0, 1.0]);
        let p = make_params(&params, &boundary, 10, 99, 0.5);
        assert!((p.xmin - (-1.0 + 0.04)).abs() < 1.0e-6);
        assert!((p.ymax - (2.0 - 0.04)).abs() < 1.0e-6);
        assert_eq!(p.particle_count, 10);
        assert_eq!(p.n_blocks, 99);
        assert!((p.max_speed - 0.5).abs() < 1.0e-6);
    }
}
