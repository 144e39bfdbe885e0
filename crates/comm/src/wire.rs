//! Message layouts and tags.
//!
//! Records are plain `#[repr(C)]` structs cast to bytes with `bytemuck`.
//! Both ends are built from the same source, so there is no versioning.

use bytemuck::{Pod, Zeroable};
use particles::{ParticleRecord, Scalar, Vec3};

use crate::face::FaceMask;

/// Tag distinguishing concurrent messages between the same pair of ranks.
pub type MessageTag = u16;

/// Element count sent ahead of a variable-size payload.
pub const TAG_COUNT: MessageTag = 1;
/// Migrating particle records.
pub const TAG_PARTICLES: MessageTag = 2;
/// Ghost plans.
pub const TAG_GHOST_PLAN: MessageTag = 10;
/// Ghost positions.
pub const TAG_GHOST_POSITION: MessageTag = 11;
/// Ghost type ids.
pub const TAG_GHOST_TYPE: MessageTag = 12;
/// Ghost tags.
pub const TAG_GHOST_TAG: MessageTag = 13;
/// Ghost charges.
pub const TAG_GHOST_CHARGE: MessageTag = 14;
/// Ghost diameters.
pub const TAG_GHOST_DIAMETER: MessageTag = 15;
/// Refreshed ghost positions.
pub const TAG_GHOST_REFRESH: MessageTag = 16;
/// Global cell indices shared with a neighbor.
pub const TAG_CELL_INDEX: MessageTag = 20;
/// Per-cell values.
pub const TAG_CELL_DATA: MessageTag = 21;

/// Full particle state on the wire.
///
/// Scalar fields first, then 4-byte fields, so there is no interior padding.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct PackedParticle {
    /// Position
    pub position: [Scalar; 3],
    /// Velocity
    pub velocity: [Scalar; 3],
    /// Acceleration
    pub acceleration: [Scalar; 3],
    /// Orientation quaternion
    pub orientation: [Scalar; 4],
    /// Mass
    pub mass: Scalar,
    /// Charge
    pub charge: Scalar,
    /// Diameter
    pub diameter: Scalar,
    /// Image counters
    pub image: [i32; 3],
    /// Type id
    pub type_id: u32,
    /// Body id
    pub body: u32,
    /// Global tag
    pub tag: u32,
}

impl From<&ParticleRecord> for PackedParticle {
    fn from(r: &ParticleRecord) -> Self {
        Self {
            position: r.position,
            velocity: r.velocity,
            acceleration: r.acceleration,
            orientation: r.orientation,
            mass: r.mass,
            charge: r.charge,
            diameter: r.diameter,
            image: r.image,
            type_id: r.type_id,
            body: r.body,
            tag: r.tag,
        }
    }
}

impl From<&PackedParticle> for ParticleRecord {
    fn from(p: &PackedParticle) -> Self {
        Self {
            tag: p.tag,
            position: p.position,
            type_id: p.type_id,
            velocity: p.velocity,
            mass: p.mass,
            acceleration: p.acceleration,
            charge: p.charge,
            diameter: p.diameter,
            image: p.image,
            body: p.body,
            orientation: p.orientation,
        }
    }
}

/// Per-field buffers for one direction of a ghost exchange.
#[derive(Debug, Clone, Default)]
pub struct GhostBuffers {
    /// Plans
    pub plan: Vec<FaceMask>,
    /// Positions
    pub position: Vec<Vec3>,
    /// Type ids
    pub type_id: Vec<u32>,
    /// Tags
    pub tag: Vec<u32>,
    /// Charges
    pub charge: Vec<Scalar>,
    /// Diameters
    pub diameter: Vec<Scalar>,
}

impl GhostBuffers {
    /// Empty every buffer, keeping capacity.
    pub fn clear(&mut self) {
        self.plan.clear();
        self.position.clear();
        self.type_id.clear();
        self.tag.clear();
        self.charge.clear();
        self.diameter.clear();
    }

    /// Size every buffer to `n` zeroed entries.
    pub fn resize(&mut self, n: usize) {
        self.plan.resize(n, FaceMask::EMPTY);
        self.position.resize(n, [0.0; 3]);
        self.type_id.resize(n, 0);
        self.tag.resize(n, 0);
        self.charge.resize(n, 0.0);
        self.diameter.resize(n, 0.0);
    }

    /// Number of ghosts held.
    pub fn len(&self) -> usize {
        self.tag.len()
    }

    /// Whether no ghosts are held.
    pub fn is_empty(&self) -> bool {
        self.tag.is_empty()
    }
}
