//! Uniform-grid counting-sort binning for neighbor search.
//!
//! Uses sorted-index + cell-start arrays (CSR) rather than `HashMap` so the
//! data layout maps directly to GPU buffers (no pointer chasing). The grid is
//! rebuilt from scratch every tick; its arrays are reused as an arena and only
//! reallocate when the particle or cell count grows.

use rayon::prelude::*;

use crate::boundary::Aabb;

/// Cell size multiple of the smoothing length used by the CPU back end.
pub const CPU_CELL_FACTOR: f32 = 2.0;

/// Cell size multiple of the smoothing length used by the GPU back end.
pub const GPU_CELL_FACTOR: f32 = 2.5;

/// Number of entries in the neighbor offset table (3x3x3 cube).
pub const NEIGHBOR_OFFSETS: usize = 27;

/// Uniform-grid binning of particles with a flat 27-cell neighborhood.
///
/// Neighbor cells are reached by adding flat linear deltas to a particle's
/// cell id. For a cell on the x or y edge of the grid a delta can wrap into
/// an unrelated row or column (and the same cell can be reached twice). That
/// aliasing is part of the neighbor semantics: evaluators tolerate it because
/// the kernel vanishes beyond `2h`, and both back ends reproduce it exactly.
#[derive(Debug, Clone)]
pub struct NeighborGrid {
    cell_factor: f32,
    shape: GridShape,
    n_blocks: usize,
    /// Cell id for each particle.
    block_ids: Vec<u32>,
    /// Particle indices grouped by cell.
    sorted_ids: Vec<u32>,
    /// CSR start offsets into `sorted_ids`, length `n_blocks + 1`.
    block_start: Vec<u32>,
    /// Per-cell scatter cursor (scratch).
    counts: Vec<u32>,
    /// Linear id deltas of the 27 neighbor cells for the current `(nx, ny)`.
    block_offsets: [i32; NEIGHBOR_OFFSETS],
    /// `(nx, ny)` the offset table was last computed for.
    offsets_for: Option<(u32, u32)>,
}

/// Placement and resolution of the grid for one rebuild.
#[derive(Debug, Clone, Copy)]
struct GridShape {
    min: [f32; 3],
    cell_size: f32,
    dims: [u32; 3],
}

impl GridShape {
    /// Map a position to its cell coordinate, clamped into the grid.
    #[inline]
    fn pos_to_cell(&self, p: [f32; 3]) -> [u32; 3] {
        let mut cell = [0u32; 3];
        for axis in 0..3 {
            let c = ((p[axis] - self.min[axis]) / self.cell_size).floor();
            cell[axis] = c.max(0.0).min((self.dims[axis] - 1) as f32) as u32;
        }
        cell
    }

    /// Flat cell id `i + j*nx + k*nx*ny`.
    #[inline]
    fn cell_hash(&self, c: [u32; 3]) -> u32 {
        c[0] + c[1] * self.dims[0] + c[2] * self.dims[0] * self.dims[1]
    }
}

impl NeighborGrid {
    /// Create an empty grid whose cells are `cell_factor * h` wide.
    pub fn new(cell_factor: f32) -> Self {
        assert!(cell_factor > 0.0, "cell_factor must be positive");
        Self {
            cell_factor,
            shape: GridShape {
                min: [0.0; 3],
                cell_size: 0.0,
                dims: [0; 3],
            },
            n_blocks: 0,
            block_ids: Vec::new(),
            sorted_ids: Vec::new(),
            block_start: vec![0],
            counts: Vec::new(),
            block_offsets: [0; NEIGHBOR_OFFSETS],
            offsets_for: None,
        }
    }

    /// Cell size multiple of `h`.
    pub fn cell_factor(&self) -> f32 {
        self.cell_factor
    }

    /// Cell edge length used by the last rebuild.
    pub fn cell_size(&self) -> f32 {
        self.shape.cell_size
    }

    /// Cell counts `[nx, ny, nz]` of the last rebuild.
    pub fn dims(&self) -> [u32; 3] {
        self.shape.dims
    }

    /// Total number of cells `nx * ny * nz`.
    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }

    /// Cell id of every particle.
    pub fn block_ids(&self) -> &[u32] {
        &self.block_ids
    }

    /// Particle indices grouped by cell.
    pub fn sorted_ids(&self) -> &[u32] {
        &self.sorted_ids
    }

    /// CSR cell start offsets (`n_blocks + 1` entries).
    pub fn block_start(&self) -> &[u32] {
        &self.block_start
    }

    /// The 27 linear neighbor-cell deltas.
    pub fn block_offsets(&self) -> &[i32; NEIGHBOR_OFFSETS] {
        &self.block_offsets
    }

    /// Recompute the 27 linear deltas for `(nx, ny)`.
    fn update_offsets(&mut self, nx: u32, ny: u32) {
        if self.offsets_for == Some((nx, ny)) {
            return;
        }
        let (nx, ny) = (nx as i32, ny as i32);
        let mut n = 0;
        for i in -1i32..=1 {
            for j in -1i32..=1 {
                for k in -1i32..=1 {
                    self.block_offsets[n] = i + j * nx + k * nx * ny;
                    n += 1;
                }
            }
        }
        self.offsets_for = Some((nx as u32, ny as u32));
        tracing::debug!("Neighbor offsets recomputed for nx={}, ny={}", nx, ny);
    }

    /// Rebuild the grid for `positions` inside `boundary`, with smoothing
    /// length `h`.
    pub fn rebuild(&mut self, boundary: &Aabb, h: f32, positions: &[[f32; 3]]) {
        let n = positions.len();

        // --- 1. Grid extents ---
        let cell_size = self.cell_factor * h;
        let extent = boundary.extent();
        let dims = [
            (extent[0] / cell_size).floor() as u32 + 1,
            (extent[1] / cell_size).floor() as u32 + 1,
            (extent[2] / cell_size).floor() as u32 + 1,
        ];
        if dims != self.shape.dims {
            tracing::debug!("Neighbor grid resized to {}x{}x{}", dims[0], dims[1], dims[2]);
        }
        self.shape = GridShape {
            min: boundary.min,
            cell_size,
            dims,
        };
        self.n_blocks = (dims[0] as usize) * (dims[1] as usize) * (dims[2] as usize);
        self.update_offsets(dims[0], dims[1]);

        // --- 2. Cell id for each particle (parallel) ---
        let shape = self.shape;
        self.block_ids.resize(n, 0);
        self.block_ids
            .par_iter_mut()
            .zip(positions.par_iter())
            .for_each(|(id, &p)| *id = shape.cell_hash(shape.pos_to_cell(p)));

        // --- 3. Count particles per cell ---
        self.counts.clear();
        self.counts.resize(self.n_blocks, 0);
        for &id in &self.block_ids {
            self.counts[id as usize] += 1;
        }

        // --- 4. Prefix-sum into cell starts ---
        self.block_start.clear();
        self.block_start.resize(self.n_blocks + 1, 0);
        for c in 0..self.n_blocks {
            self.block_start[c + 1] = self.block_start[c] + self.counts[c];
        }

        // --- 5. Scatter, consuming each cell's counter ---
        self.sorted_ids.resize(n, 0);
        for (p, &id) in self.block_ids.iter().enumerate() {
            let id = id as usize;
            let slot = self.block_start[id + 1] - self.counts[id];
            self.sorted_ids[slot as usize] = p as u32;
            self.counts[id] -= 1;
        }
    }

    /// Visit every neighbor candidate of particle `i`.
    ///
    /// Candidates are all particles in the cells reached by the 27 offsets,
    /// including `i` itself. No distance filtering is done here.
    #[inline]
    pub fn for_each_candidate<F>(&self, i: usize, mut f: F)
    where
        F: FnMut(usize),
    {
        let home = self.block_ids[i] as i64;
        let n_blocks = self.n_blocks as i64;
        for &offset in &self.block_offsets {
            let block = home + offset as i64;
            if block < 0 || block >= n_blocks {
                continue;
            }
            let block = block as usize;
            let start = self.block_start[block] as usize;
            let end = self.block_start[block + 1] as usize;
            for &j in &self.sorted_ids[start..end] {
                f(j as usize);
            }
        }
    }
}
