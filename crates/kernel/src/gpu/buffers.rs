//! GPU buffer management for SPH particle data.
//!
//! Creates and manages the wgpu storage buffers of the shared buffer schema:
//! particle arrays (3-vectors packed as 3 consecutive `f32`), the host-built
//! neighbor grid and the `SimParams` uniform. Handles CPU->GPU upload and
//! GPU->CPU readback.

use std::sync::mpsc;

use wgpu::util::DeviceExt;

use crate::neighbor::{NeighborGrid, NEIGHBOR_OFFSETS};
use crate::particle::ParticleArrays;

/// Simulation parameters uniform buffer layout.
/// Must match the SimParams struct in `sph.wgsl` exactly (20 scalars, 80 bytes).
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSimParams {
    pub dt: f32,
    pub particle_count: u32,
    pub gravity_x: f32,
    pub gravity_y: f32,
    pub gravity_z: f32,
    pub max_speed: f32,
    pub collision_damping: f32,
    pub shear_damping: f32,
    pub smooth_length: f32,
    pub density0: f32,
    pub sound_speed: f32,
    pub alpha: f32,
    pub beta: f32,
    /// Inset wall planes.
    pub xmin: f32,
    pub xmax: f32,
    pub ymin: f32,
    pub ymax: f32,
    pub zmin: f32,
    pub zmax: f32,
    pub n_blocks: u32,
}

/// Result channel of an in-flight `map_async`.
pub type MapReceiver = mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>;

/// All GPU buffers needed for the SPH simulation.
pub struct GpuBuffers {
    // Uniform buffer
    pub params_buffer: wgpu::Buffer,

    // Particle buffers
    pub positions: wgpu::Buffer,
    pub velocities: wgpu::Buffer,
    pub accelerations: wgpu::Buffer,
    pub density: wgpu::Buffer,
    pub mass: wgpu::Buffer,

    // Neighbor grid buffers (written from the host every tick)
    pub block_ids: wgpu::Buffer,
    pub sorted_ids: wgpu::Buffer,
    pub block_start: wgpu::Buffer,
    pub block_offset: wgpu::Buffer,
    /// Number of `u32` slots `block_start` can hold.
    pub block_start_capacity: usize,

    // Staging buffers for readback
    /// Positions, copied after every tick for the host grid rebuild.
    pub staging_positions: wgpu::Buffer,
    /// Velocities, accelerations and density, packed back to back.
    pub staging_state: wgpu::Buffer,

    pub n_particles: u32,
}

/// Minimum buffer size (wgpu requires non-zero buffers).
const MIN_BUF_SIZE: u64 = 4;

const STORAGE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Create a storage buffer from POD slice data. If the slice is empty, creates
/// a minimal buffer.
fn create_storage_buf<T: bytemuck::Pod>(device: &wgpu::Device, label: &str, data: &[T]) -> wgpu::Buffer {
    if data.is_empty() {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: MIN_BUF_SIZE,
            usage: STORAGE_USAGE,
            mapped_at_creation: false,
        })
    } else {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: STORAGE_USAGE,
        })
    }
}

/// Create a zeroed storage buffer holding `count` 4-byte elements.
fn create_empty_storage_buf(device: &wgpu::Device, label: &str, count: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: ((count * 4) as u64).max(MIN_BUF_SIZE),
        usage: STORAGE_USAGE,
        mapped_at_creation: false,
    })
}

/// Create a staging (MAP_READ) buffer for readback.
fn create_staging_buf(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    let size = size.max(MIN_BUF_SIZE);
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

impl GpuBuffers {
    /// Create all GPU buffers from initial particle data.
    pub fn new(device: &wgpu::Device, particles: &ParticleArrays, params: &GpuSimParams) -> Self {
        let n = particles.len();

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sim_params"),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let positions = create_storage_buf(device, "positions", &particles.positions);
        let velocities = create_storage_buf(device, "velocities", &particles.velocities);
        let accelerations = create_storage_buf(device, "accelerations", &particles.accelerations);
        let density = create_storage_buf(device, "density", &particles.density);
        let mass = create_storage_buf(device, "mass", &particles.mass);

        let block_ids = create_empty_storage_buf(device, "block_ids", n);
        let sorted_ids = create_empty_storage_buf(device, "sorted_ids", n);
        let block_start_capacity = 1;
        let block_start = create_empty_storage_buf(device, "block_start", block_start_capacity);
        let block_offset = create_empty_storage_buf(device, "block_offset", NEIGHBOR_OFFSETS);

        let vec3_bytes = (n * 3 * std::mem::size_of::<f32>()) as u64;
        let scalar_bytes = (n * std::mem::size_of::<f32>()) as u64;
        let staging_positions = create_staging_buf(device, "staging_positions", vec3_bytes);
        let staging_state = create_staging_buf(device, "staging_state", 2 * vec3_bytes + scalar_bytes);

        Self {
            params_buffer,
            positions,
            velocities,
            accelerations,
            density,
            mass,
            block_ids,
            sorted_ids,
            block_start,
            block_offset,
            block_start_capacity,
            staging_positions,
            staging_state,
            n_particles: n as u32,
        }
    }

    /// Update the uniform params buffer.
    pub fn update_params(&self, queue: &wgpu::Queue, params: &GpuSimParams) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
    }

    /// Upload the host-built neighbor grid.
    ///
    /// Returns `true` when `block_start` had to be reallocated, in which case
    /// bind groups referencing it must be recreated.
    pub fn upload_grid(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, grid: &NeighborGrid) -> bool {
        let block_start = grid.block_start();
        let regrown = block_start.len() > self.block_start_capacity;
        if regrown {
            self.block_start_capacity = block_start.len().next_power_of_two();
            self.block_start = create_empty_storage_buf(device, "block_start", self.block_start_capacity);
            tracing::debug!("GPU block_start regrown to {} slots", self.block_start_capacity);
        }
        if !grid.block_ids().is_empty() {
            queue.write_buffer(&self.block_ids, 0, bytemuck::cast_slice(grid.block_ids()));
            queue.write_buffer(&self.sorted_ids, 0, bytemuck::cast_slice(grid.sorted_ids()));
        }
        queue.write_buffer(&self.block_start, 0, bytemuck::cast_slice(block_start));
        queue.write_buffer(&self.block_offset, 0, bytemuck::cast_slice(grid.block_offsets()));
        regrown
    }

    /// Record a copy of positions into their staging buffer.
    pub fn encode_position_copy(&self, encoder: &mut wgpu::CommandEncoder) {
        let bytes = (self.n_particles as usize * 3 * std::mem::size_of::<f32>()) as u64;
        encoder.copy_buffer_to_buffer(&self.positions, 0, &self.staging_positions, 0, bytes);
    }

    /// Start mapping the position staging buffer. Completion is reported on
    /// the returned channel once the device is polled.
    pub fn begin_position_map(&self) -> MapReceiver {
        let (tx, rx) = mpsc::channel();
        self.staging_positions
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        rx
    }

    /// Copy the mapped position staging buffer into `out` and unmap it.
    pub fn take_mapped_positions(&self, out: &mut [[f32; 3]]) {
        {
            let data = self.staging_positions.slice(..).get_mapped_range();
            let floats: &[f32] = bytemuck::cast_slice(&data);
            for (dst, src) in out.iter_mut().zip(floats.chunks_exact(3)) {
                *dst = [src[0], src[1], src[2]];
            }
        }
        self.staging_positions.unmap();
    }

    /// Read back velocities, accelerations and density into `out`.
    ///
    /// Blocks until the copy completes. Positions and mass are left untouched.
    pub fn readback_state(&self, device: &wgpu::Device, queue: &wgpu::Queue, out: &mut ParticleArrays) {
        let n = self.n_particles as usize;
        if n == 0 {
            return;
        }

        let vec3_bytes = (n * 3 * std::mem::size_of::<f32>()) as u64;
        let scalar_bytes = (n * std::mem::size_of::<f32>()) as u64;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_state"),
        });
        encoder.copy_buffer_to_buffer(&self.velocities, 0, &self.staging_state, 0, vec3_bytes);
        encoder.copy_buffer_to_buffer(&self.accelerations, 0, &self.staging_state, vec3_bytes, vec3_bytes);
        encoder.copy_buffer_to_buffer(&self.density, 0, &self.staging_state, 2 * vec3_bytes, scalar_bytes);
        queue.submit(std::iter::once(encoder.finish()));

        let Some(floats) = read_f32_buffer(device, &self.staging_state, 7 * n) else {
            tracing::warn!("GPU state readback failed; keeping previous host copy");
            return;
        };
        let (vel, rest) = floats.split_at(3 * n);
        let (acc, rho) = rest.split_at(3 * n);
        for (dst, src) in out.velocities.iter_mut().zip(vel.chunks_exact(3)) {
            *dst = [src[0], src[1], src[2]];
        }
        for (dst, src) in out.accelerations.iter_mut().zip(acc.chunks_exact(3)) {
            *dst = [src[0], src[1], src[2]];
        }
        out.density.copy_from_slice(rho);
    }
}

/// Block on mapping a staging buffer and read f32 data.
///
/// Returns `None` if the mapping failed.
fn read_f32_buffer(device: &wgpu::Device, buffer: &wgpu::Buffer, count: usize) -> Option<Vec<f32>> {
    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv().ok()?.ok()?;

    let data = slice.get_mapped_range();
    let result: Vec<f32> = bytemuck::cast_slice(&data)[..count].to_vec();
    drop(data);
    buffer.unmap();
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_params_is_eighty_bytes() {
        assert_eq!(std::mem::size_of::<GpuSimParams>(), 80);
        assert_eq!(std::mem::size_of::<GpuSimParams>() % 16, 0);
    }
}
