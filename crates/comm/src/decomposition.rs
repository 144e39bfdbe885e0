//! Process grid and per-rank domain decomposition.
//!
//! The global box is cut along each axis at a fixed list of coordinates.
//! Each cut is computed once and used as both the upper bound of one sub-box
//! and the lower bound of the next, so neighboring sub-boxes share
//! bit-identical faces. The last sub-box ends exactly at the global upper bound.

use particles::{BoxDim, Index3D, Scalar, Vec3};

use crate::error::CommError;
use crate::face::Face;

/// Exclusive upper limit on the ghost width along an axis split over
/// `ranks_on_axis` ranks with sub-box edge `extent`.
pub fn ghost_width_limit(ranks_on_axis: u32, extent: Scalar) -> Scalar {
    if ranks_on_axis == 2 {
        extent / 2.0
    } else {
        extent
    }
}

/// 3D grid of ranks with periodic wrap on every axis.
#[derive(Debug, Clone)]
pub struct ProcessGrid {
    index: Index3D,
    /// Linear rank at each grid position.
    cart_ranks: Vec<usize>,
    /// Grid position of each rank.
    positions: Vec<[u32; 3]>,
}

impl ProcessGrid {
    /// Grid with row-major rank numbering.
    pub fn new(dims: [u32; 3]) -> Result<Self, CommError> {
        let n = dims.iter().map(|&d| d as usize).product();
        Self::with_ranks(dims, (0..n).collect())
    }

    /// Grid with an explicit rank at each position (row-major positions).
    pub fn with_ranks(dims: [u32; 3], cart_ranks: Vec<usize>) -> Result<Self, CommError> {
        if dims.contains(&0) {
            return Err(CommError::InvalidDecomposition(format!(
                "process grid dimensions must be non-zero, got {:?}",
                dims
            )));
        }
        let index = Index3D::from_dims(dims);
        let n = index.num_elements();
        if cart_ranks.len() != n {
            return Err(CommError::InvalidDecomposition(format!(
                "{} rank entries for a {:?} grid",
                cart_ranks.len(),
                dims
            )));
        }
        let mut positions = vec![[u32::MAX; 3]; n];
        for (i, &rank) in cart_ranks.iter().enumerate() {
            if rank >= n || positions[rank][0] != u32::MAX {
                return Err(CommError::InvalidDecomposition(format!(
                    "rank table is not a permutation of 0..{}",
                    n
                )));
            }
            positions[rank] = index.triple(i);
        }
        Ok(Self { index, cart_ranks, positions })
    }

    /// Grid dimensions.
    pub fn dims(&self) -> [u32; 3] {
        self.index.dims()
    }

    /// Number of ranks.
    pub fn num_ranks(&self) -> usize {
        self.cart_ranks.len()
    }

    /// Whether `axis` is split across more than one rank.
    pub fn is_decomposed(&self, axis: usize) -> bool {
        self.dims()[axis] > 1
    }

    /// Exclusive upper limit on the ghost width for a sub-box `extent` along `axis`.
    ///
    /// With two ranks on an axis both faces lead to the same neighbor, so a
    /// particle may be near at most one of them.
    pub fn ghost_width_limit(&self, axis: usize, extent: Scalar) -> Scalar {
        ghost_width_limit(self.dims()[axis], extent)
    }

    /// Rank at a possibly out-of-range position, wrapping periodically.
    pub fn rank_at(&self, pos: [i32; 3]) -> usize {
        let dims = self.dims();
        let mut wrapped = [0u32; 3];
        for a in 0..3 {
            wrapped[a] = pos[a].rem_euclid(dims[a] as i32) as u32;
        }
        self.cart_ranks[self.index.index_of(wrapped)]
    }

    /// Grid position of `rank`.
    pub fn position_of(&self, rank: usize) -> Option<[u32; 3]> {
        self.positions.get(rank).copied()
    }

    /// Rank reached from `pos` by `offset`, wrapping periodically.
    pub fn neighbor(&self, pos: [u32; 3], offset: [i32; 3]) -> usize {
        self.rank_at([
            pos[0] as i32 + offset[0],
            pos[1] as i32 + offset[1],
            pos[2] as i32 + offset[2],
        ])
    }
}

/// Cut coordinates per axis; `cuts[a]` has `dims[a] + 1` entries.
fn compute_cuts(
    global: &BoxDim,
    dims: [u32; 3],
    fractions: Option<&[Vec<Scalar>; 3]>,
) -> Result<[Vec<Scalar>; 3], CommError> {
    let lengths = global.lengths();
    let mut cuts: [Vec<Scalar>; 3] = Default::default();
    for a in 0..3 {
        let n = dims[a] as usize;
        let mut c = Vec::with_capacity(n + 1);
        c.push(global.lo[a]);
        match fractions.map(|f| &f[a]).filter(|f| !f.is_empty()) {
            Some(f) => {
                if f.len() != n - 1 {
                    return Err(CommError::InvalidDecomposition(format!(
                        "axis {}: {} split fractions for {} ranks",
                        a,
                        f.len(),
                        n
                    )));
                }
                let mut prev = 0.0;
                for &frac in f {
                    if frac <= prev || frac >= 1.0 {
                        return Err(CommError::InvalidDecomposition(format!(
                            "axis {}: split fractions must increase strictly inside (0, 1)",
                            a
                        )));
                    }
                    prev = frac;
                    c.push(global.lo[a] + frac * lengths[a]);
                }
            }
            None => {
                for i in 1..n {
                    c.push(global.lo[a] + lengths[a] * (i as Scalar / n as Scalar));
                }
            }
        }
        c.push(global.hi[a]);
        cuts[a] = c;
    }
    Ok(cuts)
}

/// One rank's view of the decomposition.
#[derive(Debug, Clone)]
pub struct DomainDecomposition {
    global_box: BoxDim,
    grid: ProcessGrid,
    cuts: [Vec<Scalar>; 3],
    rank: usize,
    position: [u32; 3],
    sub_box: BoxDim,
    neighbors: [usize; 6],
    at_boundary: [bool; 6],
}

impl DomainDecomposition {
    /// Uniform decomposition of `global_box` over `grid`, seen from `rank`.
    pub fn new(global_box: BoxDim, grid: ProcessGrid, rank: usize) -> Result<Self, CommError> {
        Self::with_splits(global_box, grid, rank, None)
    }

    /// Decomposition with optional per-axis split fractions.
    ///
    /// `fractions[a]` lists the `dims[a] - 1` interior cut positions as
    /// fractions of the box length; an empty list means a uniform split.
    pub fn with_splits(
        global_box: BoxDim,
        grid: ProcessGrid,
        rank: usize,
        fractions: Option<&[Vec<Scalar>; 3]>,
    ) -> Result<Self, CommError> {
        if !global_box.is_valid() {
            return Err(CommError::InvalidDecomposition(format!(
                "global box {:?} has a non-positive edge",
                global_box
            )));
        }
        let position = grid.position_of(rank).ok_or_else(|| {
            CommError::InvalidDecomposition(format!(
                "rank {} outside a grid of {} ranks",
                rank,
                grid.num_ranks()
            ))
        })?;
        let dims = grid.dims();
        let cuts = compute_cuts(&global_box, dims, fractions)?;

        let mut neighbors = [0usize; 6];
        let mut at_boundary = [false; 6];
        for face in Face::ALL {
            let mut offset = [0i32; 3];
            offset[face.axis()] = face.step();
            neighbors[face.index()] = grid.neighbor(position, offset);
            let p = position[face.axis()];
            at_boundary[face.index()] = if face.is_upper() {
                p == dims[face.axis()] - 1
            } else {
                p == 0
            };
        }

        let sub_box = box_at(&cuts, position);
        Ok(Self {
            global_box,
            grid,
            cuts,
            rank,
            position,
            sub_box,
            neighbors,
            at_boundary,
        })
    }

    /// This rank.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Grid position of this rank.
    pub fn position(&self) -> [u32; 3] {
        self.position
    }

    /// Process grid.
    pub fn grid(&self) -> &ProcessGrid {
        &self.grid
    }

    /// Global periodic box.
    pub fn global_box(&self) -> &BoxDim {
        &self.global_box
    }

    /// This rank's sub-box.
    pub fn sub_box(&self) -> &BoxDim {
        &self.sub_box
    }

    /// Rank across `face`.
    pub fn neighbor(&self, face: Face) -> usize {
        self.neighbors[face.index()]
    }

    /// Whether `face` lies on the global periodic seam.
    pub fn is_at_boundary(&self, face: Face) -> bool {
        self.at_boundary[face.index()]
    }

    /// Whether communication along `axis` is needed.
    pub fn is_decomposed(&self, axis: usize) -> bool {
        self.grid.is_decomposed(axis)
    }

    /// Rank owning `pos` after wrapping it into the global box.
    pub fn owner_of(&self, pos: &Vec3) -> usize {
        let mut p = *pos;
        let mut image = [0; 3];
        self.global_box.wrap(&mut p, &mut image);
        let mut cell = [0i32; 3];
        for a in 0..3 {
            let c = &self.cuts[a];
            // Last cut is hi, never reached after wrapping.
            let i = c[..c.len() - 1].partition_point(|&cut| cut <= p[a]);
            cell[a] = i.saturating_sub(1) as i32;
        }
        self.grid.rank_at(cell)
    }
}

fn box_at(cuts: &[Vec<Scalar>; 3], pos: [u32; 3]) -> BoxDim {
    let mut lo = [0.0; 3];
    let mut hi = [0.0; 3];
    for a in 0..3 {
        lo[a] = cuts[a][pos[a] as usize];
        hi[a] = cuts[a][pos[a] as usize + 1];
    }
    BoxDim::new(lo, hi)
}
