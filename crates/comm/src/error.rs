//! Communication error type.

use particles::{GridError, StoreError};
use thiserror::Error;

use crate::wire::MessageTag;

/// Errors raised by the communicators and transports.
///
/// Every variant is fatal for the run: the step loop stops on the first one.
#[derive(Debug, Error)]
pub enum CommError {
    /// Particle store rejected an update (e.g. a received tag already resident).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cell grid geometry is invalid.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// A message's length differs from the posted receive.
    #[error("rank {rank}: expected {expected} bytes from rank {from_rank} (tag {tag}), received {received}")]
    SizeMismatch {
        /// Receiving rank
        rank: usize,
        /// Sending rank
        from_rank: usize,
        /// Message tag
        tag: MessageTag,
        /// Posted receive size
        expected: usize,
        /// Actual message size
        received: usize,
    },

    /// Owned counts no longer add up to the global particle count.
    #[error("particle count mismatch after migration: {found} owned across ranks, expected {expected}")]
    ParticleCountMismatch {
        /// Global particle count
        expected: u64,
        /// Sum of owned counts
        found: u64,
    },

    /// `copy_ghosts` without a matching `exchange_ghosts`.
    #[error("ghost positions requested before a ghost exchange (or after the store changed)")]
    GhostsNotExchanged,

    /// A particle recorded as a ghost source is no longer resident.
    #[error("ghost source tag {tag} is no longer resident")]
    MissingGhostSource {
        /// Recorded tag
        tag: u32,
    },

    /// Ghost layer would reach past the neighbor's sub-box.
    #[error("ghost width {width} is not below {limit} (sub-box extent {extent}) along axis {axis}")]
    GhostWidthTooLarge {
        /// Requested ghost width
        width: f64,
        /// Exclusive limit for this axis
        limit: f64,
        /// Sub-box edge length
        extent: f64,
        /// Axis index
        axis: usize,
    },

    /// A received global cell does not land inside the local grid after one wrap.
    #[error("global cell {cell} maps to local {local:?}, outside the local grid")]
    CellOutOfRange {
        /// Global flat cell index
        cell: usize,
        /// Local triple after wrapping
        local: [i32; 3],
    },

    /// Per-cell value slice does not match the local grid.
    #[error("{found} cell values for a local grid of {expected} cells")]
    CellValueCount {
        /// Local cells
        expected: usize,
        /// Values passed in
        found: usize,
    },

    /// Peer's transport handle was dropped while we waited on it.
    #[error("rank {peer} disconnected")]
    PeerDisconnected {
        /// Rank that went away
        peer: usize,
    },

    /// Process grid or decomposition setup problem.
    #[error("invalid decomposition: {0}")]
    InvalidDecomposition(String),

    /// Transport-level failure not covered above.
    #[error("transport error: {0}")]
    Transport(String),

    /// A rank thread panicked.
    #[error("rank {rank} panicked")]
    RankPanicked {
        /// Rank whose thread panicked
        rank: usize,
    },
}
