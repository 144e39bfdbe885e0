//! Error types for the particle store and cell grid.

use thiserror::Error;

/// Errors raised by [`crate::ParticleStore`] and [`crate::BondTable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A global tag outside `0..n_global`.
    #[error("tag {tag} out of range for {n_global} global particles")]
    TagOutOfRange {
        /// Offending tag
        tag: u32,
        /// Global particle count
        n_global: usize,
    },

    /// A tag that should be absent is already resident on this rank.
    #[error("tag {tag} is already resident at slot {slot}")]
    TagAlreadyLocal {
        /// Offending tag
        tag: u32,
        /// Slot currently holding it
        slot: usize,
    },

    /// Owned particles can only be added or removed while no ghosts are resident.
    #[error("cannot modify owned particles while {n_ghosts} ghosts are resident")]
    GhostsPresent {
        /// Number of resident ghosts
        n_ghosts: usize,
    },

    /// A slot index past the owned range.
    #[error("slot {slot} out of range ({len} resident)")]
    SlotOutOfRange {
        /// Requested slot
        slot: usize,
        /// Number of resident particles
        len: usize,
    },

    /// Ghost column slices passed to the store have different lengths.
    #[error("ghost columns have mismatched lengths")]
    GhostColumnMismatch,

    /// The reverse map disagrees with the stored tags.
    #[error("reverse map inconsistent: {0}")]
    InconsistentReverseMap(String),
}

/// Errors raised when building or resizing a [`crate::CellGrid`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// A grid or process dimension of zero.
    #[error("grid dimensions must be non-zero, got {0:?}")]
    ZeroDimension([u32; 3]),

    /// Fewer global cells than ranks along an axis.
    #[error("axis {axis}: {cells} cells cannot be split across {ranks} ranks")]
    TooFewCells {
        /// Axis index (0 = x)
        axis: usize,
        /// Global cells along the axis
        cells: u32,
        /// Ranks along the axis
        ranks: u32,
    },

    /// The local grid is wider than the global grid, so a single periodic
    /// wrap cannot map global cells onto it.
    #[error("axis {axis}: local extent {local} exceeds global extent {global}")]
    LocalExceedsGlobal {
        /// Axis index
        axis: usize,
        /// Local extent in cells
        local: u32,
        /// Global extent in cells
        global: u32,
    },

    /// The communication depths on the two faces of an axis overlap.
    #[error("axis {axis}: communication depth {num_comm} exceeds local extent {local}")]
    CommExceedsLocal {
        /// Axis index
        axis: usize,
        /// Sum of the lower and upper face depths
        num_comm: u32,
        /// Local extent in cells
        local: u32,
    },

    /// The grid position is outside the process grid.
    #[error("grid position {position:?} outside process grid {dims:?}")]
    PositionOutOfRange {
        /// Requested position
        position: [u32; 3],
        /// Process grid dimensions
        dims: [u32; 3],
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_messages() {
        let e = StoreError::TagAlreadyLocal { tag: 7, slot: 3 };
        assert_eq!(e.to_string(), "tag 7 is already resident at slot 3");

        let e = StoreError::TagOutOfRange { tag: 12, n_global: 10 };
        assert!(e.to_string().contains("12"));
        assert!(e.to_string().contains("10"));
    }

    #[test]
    fn grid_error_messages() {
        let e = GridError::LocalExceedsGlobal { axis: 1, local: 12, global: 10 };
        assert_eq!(e.to_string(), "axis 1: local extent 12 exceeds global extent 10");
    }
}
