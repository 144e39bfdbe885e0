//! Reduction of per-cell values over cells shared by neighboring ranks.
//!
//! Local cell grids overlap near decomposed faces. Every cell within
//! `num_comm` cells of a face is sent to each rank it may overlap with, and
//! received contributions are folded into the local value.

use std::collections::BTreeSet;
use std::ops::AddAssign;

use bytemuck::Pod;
use particles::{CellGrid, SizeChangeSlot};

use crate::decomposition::{DomainDecomposition, ProcessGrid};
use crate::error::CommError;
use crate::face::Face;
use crate::transport::{Exchange, Transport};
use crate::wire::{MessageTag, TAG_CELL_DATA, TAG_CELL_INDEX};

/// `(rank, global cell)` pairs this rank must send, ordered by rank then cell.
///
/// Cells deep inside the local grid are skipped. For a cell near one or more
/// faces, every combination of "stay" and "step across" on the affected axes
/// (except staying on all of them) names a neighbor that shares the cell.
pub fn build_send_pairs(
    grid: &CellGrid,
    procs: &ProcessGrid,
    position: [u32; 3],
) -> BTreeSet<(usize, usize)> {
    let dims = grid.local_dims();
    let num_comm = grid.num_comm();
    let max_lo = [0, 1, 2].map(|a| num_comm[Face::lower(a).index()]);
    let min_hi = [0, 1, 2].map(|a| dims[a] - num_comm[Face::upper(a).index()]);
    let global = grid.global_indexer();

    let mut pairs = BTreeSet::new();
    for k in 0..dims[2] {
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                let cell = [i, j, k];
                if (0..3).all(|a| cell[a] >= max_lo[a] && cell[a] < min_hi[a]) {
                    continue;
                }

                // At most one non-zero step per axis.
                let mut steps = [[0i32; 2]; 3];
                let mut counts = [1usize; 3];
                for a in 0..3 {
                    if cell[a] < max_lo[a] {
                        steps[a][1] = -1;
                        counts[a] = 2;
                    } else if cell[a] >= min_hi[a] {
                        steps[a][1] = 1;
                        counts[a] = 2;
                    }
                }

                let g = global.index_of(grid.local_to_global([i as i32, j as i32, k as i32]));
                for di in &steps[0][..counts[0]] {
                    for dj in &steps[1][..counts[1]] {
                        for dk in &steps[2][..counts[2]] {
                            let offset = [*di, *dj, *dk];
                            if offset == [0, 0, 0] {
                                continue;
                            }
                            pairs.insert((procs.neighbor(position, offset), g));
                        }
                    }
                }
            }
        }
    }
    pairs
}

/// Map a global flat cell index onto the local grid.
///
/// The offset from the local origin is wrapped by at most one global
/// extent per axis. A cell that still falls outside the local grid is an error.
pub fn wrap_global_to_local(global_idx: usize, grid: &CellGrid) -> Result<usize, CommError> {
    let global = grid.global_indexer();
    let local = grid.local_indexer();
    let out_of_range = |l: [i32; 3]| CommError::CellOutOfRange { cell: global_idx, local: l };
    if global_idx >= global.num_elements() {
        return Err(out_of_range([-1; 3]));
    }

    let gdims = global.dims();
    let mut l = grid.global_to_local(global.triple(global_idx));
    for a in 0..3 {
        let d = gdims[a] as i32;
        if l[a] >= d {
            l[a] -= d;
        } else if l[a] < 0 {
            l[a] += d;
        }
    }
    if !local.contains(l) {
        return Err(out_of_range(l));
    }
    Ok(local.index(l[0] as u32, l[1] as u32, l[2] as u32))
}

/// Build one exchange per neighbor over contiguous slices of the buffers.
fn neighbor_batch<'a, P: Pod>(
    neighbors: &[usize],
    begin: &[usize],
    num_send: &[usize],
    tag: MessageTag,
    send: &'a [P],
    recv: &'a mut [P],
) -> Vec<Exchange<'a>> {
    let mut batch = Vec::with_capacity(neighbors.len());
    let mut rest = recv;
    for (n, &rank) in neighbors.iter().enumerate() {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(num_send[n]);
        rest = tail;
        let out = &send[begin[n]..begin[n] + num_send[n]];
        batch.push(Exchange::typed(rank, rank, tag, out, head));
    }
    batch
}

/// Exchange tables for one cell grid geometry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CellTables {
    neighbors: Vec<usize>,
    begin: Vec<usize>,
    num_send: Vec<usize>,
    /// Local cell of every outgoing entry.
    send_idx: Vec<usize>,
    /// Local cell of every incoming entry.
    recv_idx: Vec<usize>,
    /// Incoming entry positions grouped by local cell.
    recv_cells: Vec<usize>,
    recv_cells_begin: Vec<usize>,
    recv_cells_end: Vec<usize>,
    unique_cells: Vec<usize>,
}

/// Sums (or otherwise folds) per-cell values across overlapping local grids.
pub struct CellCommunicator<T: Transport> {
    transport: T,
    decomposition: DomainDecomposition,
    size_change: SizeChangeSlot,
    needs_init: bool,
    tables: CellTables,
}

impl<T: Transport> CellCommunicator<T> {
    /// Create a communicator for `grid`, rebuilt whenever the grid is resized.
    pub fn new(transport: T, decomposition: DomainDecomposition, grid: &CellGrid) -> Self {
        Self {
            transport,
            decomposition,
            size_change: grid.subscribe(),
            needs_init: true,
            tables: CellTables::default(),
        }
    }

    /// Mark the tables stale; they are rebuilt on the next [`CellCommunicator::communicate`].
    pub fn slot_init(&mut self) {
        self.needs_init = true;
    }

    /// Whether the next exchange rebuilds the tables first.
    pub fn needs_init(&self) -> bool {
        self.needs_init || self.size_change.is_raised()
    }

    /// Neighbor ranks, ascending.
    pub fn neighbors(&self) -> &[usize] {
        &self.tables.neighbors
    }

    /// Number of cells exchanged with each neighbor, parallel to [`CellCommunicator::neighbors`].
    pub fn num_send(&self) -> &[usize] {
        &self.tables.num_send
    }

    /// Local cells receiving at least one contribution.
    pub fn unique_cells(&self) -> &[usize] {
        &self.tables.unique_cells
    }

    /// Build the exchange tables for the current grid geometry.
    ///
    /// Collective: every rank sharing cells with this one must call it too.
    pub fn initialize(&mut self, grid: &CellGrid) -> Result<(), CommError> {
        self.needs_init = true;
        self.size_change.take();

        let pairs = build_send_pairs(grid, self.decomposition.grid(), self.decomposition.position());

        let mut t = CellTables::default();
        let mut send_global: Vec<u64> = Vec::with_capacity(pairs.len());
        for &(rank, cell) in &pairs {
            if t.neighbors.last() != Some(&rank) {
                t.neighbors.push(rank);
                t.begin.push(send_global.len());
                t.num_send.push(0);
            }
            if let Some(n) = t.num_send.last_mut() {
                *n += 1;
            }
            send_global.push(cell as u64);
        }

        // Both sides of a pair share the same cells, so receive counts equal send counts.
        let mut recv_global = vec![0u64; send_global.len()];
        {
            let mut batch = neighbor_batch(
                &t.neighbors,
                &t.begin,
                &t.num_send,
                TAG_CELL_INDEX,
                &send_global,
                &mut recv_global,
            );
            self.transport.sendrecv(&mut batch)?;
        }

        t.send_idx = send_global
            .iter()
            .map(|&g| wrap_global_to_local(g as usize, grid))
            .collect::<Result<_, _>>()?;
        t.recv_idx = recv_global
            .iter()
            .map(|&g| wrap_global_to_local(g as usize, grid))
            .collect::<Result<_, _>>()?;

        let mut order: Vec<usize> = (0..t.recv_idx.len()).collect();
        order.sort_by_key(|&j| (t.recv_idx[j], j));
        for (pos, &j) in order.iter().enumerate() {
            let cell = t.recv_idx[j];
            if t.unique_cells.last() != Some(&cell) {
                t.unique_cells.push(cell);
                t.recv_cells_begin.push(pos);
                t.recv_cells_end.push(pos);
            }
            if let Some(end) = t.recv_cells_end.last_mut() {
                *end = pos + 1;
            }
        }
        t.recv_cells = order;

        tracing::debug!(
            "Rank {}: cell communicator initialized, {} neighbors, {} cells sent, {} unique cells received",
            self.transport.rank(),
            t.neighbors.len(),
            t.send_idx.len(),
            t.unique_cells.len()
        );
        self.tables = t;
        self.needs_init = false;
        Ok(())
    }

    /// Fold contributions from neighbors into `values`: `values[c] = op(values[c], received)`.
    ///
    /// `values` holds one entry per local cell. Tables are rebuilt first if stale.
    pub fn communicate<V, F>(&mut self, grid: &CellGrid, values: &mut [V], mut op: F) -> Result<(), CommError>
    where
        V: Pod,
        F: FnMut(V, V) -> V,
    {
        if self.needs_init() {
            self.initialize(grid)?;
        }
        if values.len() != grid.num_local_cells() {
            return Err(CommError::CellValueCount {
                expected: grid.num_local_cells(),
                found: values.len(),
            });
        }

        let t = &self.tables;
        let send: Vec<V> = t.send_idx.iter().map(|&c| values[c]).collect();
        let mut recv = vec![V::zeroed(); t.recv_idx.len()];
        {
            let mut batch =
                neighbor_batch(&t.neighbors, &t.begin, &t.num_send, TAG_CELL_DATA, &send, &mut recv);
            self.transport.sendrecv(&mut batch)?;
        }

        for (u, &cell) in t.unique_cells.iter().enumerate() {
            let mut acc = values[cell];
            for &j in &t.recv_cells[t.recv_cells_begin[u]..t.recv_cells_end[u]] {
                acc = op(acc, recv[j]);
            }
            values[cell] = acc;
        }
        Ok(())
    }

    /// [`CellCommunicator::communicate`] with addition.
    pub fn communicate_sum<V>(&mut self, grid: &CellGrid, values: &mut [V]) -> Result<(), CommError>
    where
        V: Pod + AddAssign,
    {
        self.communicate(grid, values, |mut a, b| {
            a += b;
            a
        })
    }
}
