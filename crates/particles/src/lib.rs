//! Particle Data Layer
//!
//! This crate holds the per-rank data consumed by the communication layer:
//! particle storage with its global-tag reverse map, box geometry, the local
//! view of the cell grid and bond topology. It performs no communication itself.
//!
//! # Modules
//! - [`particle`] -- Columnar particle store, owned + ghost ranges, reverse map.
//! - [`box_dim`] -- Axis-aligned boxes with half-open bounds.
//! - [`index`] -- Row-major 3D indexer.
//! - [`cell_grid`] -- Local cell grid geometry and its global mapping.
//! - [`signal`] -- Size-change notification for cell grid subscribers.
//! - [`bonds`] -- Bond topology by global tag.
//! - [`error`] -- Store and grid error types.

#![warn(missing_docs)]

pub mod bonds;
pub mod box_dim;
pub mod cell_grid;
pub mod error;
pub mod index;
pub mod particle;
pub mod signal;

pub use bonds::{BondTable, BondTopology};
pub use box_dim::{BoxDim, Scalar, Vec3};
pub use cell_grid::CellGrid;
pub use error::{GridError, StoreError};
pub use index::Index3D;
pub use particle::{GhostColumns, ParticleRecord, ParticleStore, NOT_LOCAL, NO_BODY};
pub use signal::{SizeChangeSignal, SizeChangeSlot};
