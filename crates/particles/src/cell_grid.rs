//! Rank-local view of a global periodic cell grid.
//!
//! Each rank owns an even share of the global cells along every decomposed
//! axis and extends its grid by a few cells past each face so that cells near
//! the boundary overlap with the neighboring rank's grid. Per-face depths in
//! `num_comm` follow the face order east, west, north, south, up, down
//! (`+x, -x, +y, -y, +z, -z`).

use crate::error::GridError;
use crate::index::Index3D;
use crate::signal::{SizeChangeSignal, SizeChangeSlot};

/// Geometry of the local cell grid and its place in the global grid.
#[derive(Debug)]
pub struct CellGrid {
    global: Index3D,
    local: Index3D,
    /// Global coordinates of local cell (0, 0, 0); may be negative.
    origin: [i32; 3],
    num_comm: [u32; 6],
    signal: SizeChangeSignal,
}

/// Geometry parts shared by construction and resize.
struct Geometry {
    global: Index3D,
    local: Index3D,
    origin: [i32; 3],
    num_comm: [u32; 6],
}

impl CellGrid {
    /// Grid for the rank at `proc_pos` in a `proc_dims` process grid.
    ///
    /// Global cells are split as evenly as possible along each decomposed
    /// axis; the local grid then adds `extension` cells beyond each face.
    /// Undecomposed axes cover the whole global extent with no extension.
    pub fn new(
        global_dims: [u32; 3],
        proc_dims: [u32; 3],
        proc_pos: [u32; 3],
        extension: u32,
    ) -> Result<Self, GridError> {
        let geom = decompose(global_dims, proc_dims, proc_pos, extension)?;
        Ok(Self::from_geometry(geom))
    }

    /// Grid from explicit geometry.
    ///
    /// `num_comm` is indexed east, west, north, south, up, down.
    pub fn from_parts(
        global_dims: [u32; 3],
        origin: [i32; 3],
        local_dims: [u32; 3],
        num_comm: [u32; 6],
    ) -> Result<Self, GridError> {
        let geom = Geometry {
            global: Index3D::from_dims(global_dims),
            local: Index3D::from_dims(local_dims),
            origin,
            num_comm,
        };
        validate(&geom)?;
        Ok(Self::from_geometry(geom))
    }

    fn from_geometry(geom: Geometry) -> Self {
        tracing::debug!(
            "Cell grid: global {:?}, local {:?} at origin {:?}, num_comm {:?}",
            geom.global.dims(),
            geom.local.dims(),
            geom.origin,
            geom.num_comm
        );
        Self {
            global: geom.global,
            local: geom.local,
            origin: geom.origin,
            num_comm: geom.num_comm,
            signal: SizeChangeSignal::new(),
        }
    }

    /// Recompute the geometry and notify subscribers.
    pub fn resize(
        &mut self,
        global_dims: [u32; 3],
        proc_dims: [u32; 3],
        proc_pos: [u32; 3],
        extension: u32,
    ) -> Result<(), GridError> {
        let geom = decompose(global_dims, proc_dims, proc_pos, extension)?;
        self.global = geom.global;
        self.local = geom.local;
        self.origin = geom.origin;
        self.num_comm = geom.num_comm;
        self.signal.emit();
        Ok(())
    }

    /// Subscribe to geometry changes.
    pub fn subscribe(&self) -> SizeChangeSlot {
        self.signal.connect()
    }

    /// Global grid indexer.
    pub fn global_indexer(&self) -> Index3D {
        self.global
    }

    /// Local grid indexer.
    pub fn local_indexer(&self) -> Index3D {
        self.local
    }

    /// Global dimensions.
    pub fn global_dims(&self) -> [u32; 3] {
        self.global.dims()
    }

    /// Local dimensions, including extension cells.
    pub fn local_dims(&self) -> [u32; 3] {
        self.local.dims()
    }

    /// Number of local cells.
    pub fn num_local_cells(&self) -> usize {
        self.local.num_elements()
    }

    /// Global coordinates of the first local cell.
    pub fn origin(&self) -> [i32; 3] {
        self.origin
    }

    /// Depth of the shared region behind each face.
    pub fn num_comm(&self) -> [u32; 6] {
        self.num_comm
    }

    /// Global triple of a local triple, wrapped into the global grid.
    pub fn local_to_global(&self, local: [i32; 3]) -> [u32; 3] {
        let dims = self.global.dims();
        let mut g = [0u32; 3];
        for a in 0..3 {
            g[a] = (local[a] + self.origin[a]).rem_euclid(dims[a] as i32) as u32;
        }
        g
    }

    /// Local triple of a global triple, without any wrapping.
    pub fn global_to_local(&self, global: [u32; 3]) -> [i32; 3] {
        let mut l = [0i32; 3];
        for a in 0..3 {
            l[a] = global[a] as i32 - self.origin[a];
        }
        l
    }
}

/// Even split of the global grid with `extension` cells on every decomposed face.
fn decompose(
    global_dims: [u32; 3],
    proc_dims: [u32; 3],
    proc_pos: [u32; 3],
    extension: u32,
) -> Result<Geometry, GridError> {
    if global_dims.contains(&0) {
        return Err(GridError::ZeroDimension(global_dims));
    }
    if proc_dims.contains(&0) {
        return Err(GridError::ZeroDimension(proc_dims));
    }
    if (0..3).any(|a| proc_pos[a] >= proc_dims[a]) {
        return Err(GridError::PositionOutOfRange { position: proc_pos, dims: proc_dims });
    }

    let mut local = [0u32; 3];
    let mut origin = [0i32; 3];
    let mut num_comm = [0u32; 6];
    for a in 0..3 {
        let n = global_dims[a] as u64;
        let p = proc_dims[a] as u64;
        if p == 1 {
            local[a] = global_dims[a];
            continue;
        }
        if n < p {
            return Err(GridError::TooFewCells { axis: a, cells: global_dims[a], ranks: proc_dims[a] });
        }
        let pos = proc_pos[a] as u64;
        let start = (pos * n / p) as i32;
        let end = ((pos + 1) * n / p) as i32;
        origin[a] = start - extension as i32;
        local[a] = (end - start) as u32 + 2 * extension;
        // Our lower extension lies in the neighbor's owned cells and its upper
        // extension in ours, so the shared depth is twice the extension.
        num_comm[2 * a] = 2 * extension;
        num_comm[2 * a + 1] = 2 * extension;
    }

    let geom = Geometry {
        global: Index3D::from_dims(global_dims),
        local: Index3D::from_dims(local),
        origin,
        num_comm,
    };
    validate(&geom)?;
    Ok(geom)
}

fn validate(geom: &Geometry) -> Result<(), GridError> {
    let global = geom.global.dims();
    let local = geom.local.dims();
    if global.contains(&0) {
        return Err(GridError::ZeroDimension(global));
    }
    if local.contains(&0) {
        return Err(GridError::ZeroDimension(local));
    }
    for a in 0..3 {
        if local[a] > global[a] {
            return Err(GridError::LocalExceedsGlobal { axis: a, local: local[a], global: global[a] });
        }
        let depth = geom.num_comm[2 * a] + geom.num_comm[2 * a + 1];
        if depth > local[a] {
            return Err(GridError::CommExceedsLocal { axis: a, num_comm: depth, local: local[a] });
        }
    }
    Ok(())
}
