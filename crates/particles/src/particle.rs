//! Columnar particle storage with a global-tag reverse map.
//!
//! Owned particles occupy slots `0..n_local`, ghosts follow in
//! `n_local..n_local + n_ghosts`. Every mutating method keeps the reverse map
//! `rtag[tag]` pointing at the slot holding `tag`, or at [`NOT_LOCAL`] when the
//! tag is not resident on this rank. Callers never touch `rtag` directly.

use serde::{Deserialize, Serialize};

use crate::box_dim::{Scalar, Vec3};
use crate::error::StoreError;

/// Reverse-map sentinel for a tag that is not resident on this rank.
pub const NOT_LOCAL: u32 = u32::MAX;

/// Body id of a particle that is not part of a rigid body.
pub const NO_BODY: u32 = u32::MAX;

/// Full state of one particle, as it travels between ranks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    /// Global tag, unique across all ranks
    pub tag: u32,
    /// Position
    pub position: Vec3,
    /// Type id
    pub type_id: u32,
    /// Velocity
    pub velocity: Vec3,
    /// Mass
    pub mass: Scalar,
    /// Acceleration
    pub acceleration: Vec3,
    /// Charge
    pub charge: Scalar,
    /// Diameter
    pub diameter: Scalar,
    /// Periodic image counters
    pub image: [i32; 3],
    /// Rigid body id or [`NO_BODY`]
    pub body: u32,
    /// Orientation quaternion (w, x, y, z)
    pub orientation: [Scalar; 4],
}

impl ParticleRecord {
    /// Particle at rest with unit mass and diameter.
    pub fn new(tag: u32, position: Vec3) -> Self {
        Self {
            tag,
            position,
            type_id: 0,
            velocity: [0.0; 3],
            mass: 1.0,
            acceleration: [0.0; 3],
            charge: 0.0,
            diameter: 1.0,
            image: [0; 3],
            body: NO_BODY,
            orientation: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Fields carried by ghost particles, as parallel slices.
#[derive(Debug, Clone, Copy)]
pub struct GhostColumns<'a> {
    /// Global tags
    pub tag: &'a [u32],
    /// Positions
    pub position: &'a [Vec3],
    /// Type ids
    pub type_id: &'a [u32],
    /// Charges
    pub charge: &'a [Scalar],
    /// Diameters
    pub diameter: &'a [Scalar],
}

impl GhostColumns<'_> {
    fn len(&self) -> Result<usize, StoreError> {
        let n = self.tag.len();
        if self.position.len() != n
            || self.type_id.len() != n
            || self.charge.len() != n
            || self.diameter.len() != n
        {
            return Err(StoreError::GhostColumnMismatch);
        }
        Ok(n)
    }
}

/// Struct-of-arrays particle storage for one rank.
///
/// All columns are parallel: slot `i` in every column refers to the same particle.
#[derive(Debug, Clone)]
pub struct ParticleStore {
    // ---- Kinematics ----
    position: Vec<Vec3>,
    velocity: Vec<Vec3>,
    acceleration: Vec<Vec3>,
    image: Vec<[i32; 3]>,
    orientation: Vec<[Scalar; 4]>,

    // ---- Per-particle properties ----
    type_id: Vec<u32>,
    mass: Vec<Scalar>,
    charge: Vec<Scalar>,
    diameter: Vec<Scalar>,
    body: Vec<u32>,
    tag: Vec<u32>,

    // ---- Bookkeeping ----
    rtag: Vec<u32>,
    n_local: usize,
    /// Bumped on every structural change (slot assignment changes).
    generation: u64,
}

impl ParticleStore {
    /// Create an empty store for a system of `n_global` particles.
    pub fn new(n_global: usize) -> Self {
        Self {
            position: Vec::new(),
            velocity: Vec::new(),
            acceleration: Vec::new(),
            image: Vec::new(),
            orientation: Vec::new(),
            type_id: Vec::new(),
            mass: Vec::new(),
            charge: Vec::new(),
            diameter: Vec::new(),
            body: Vec::new(),
            tag: Vec::new(),
            rtag: vec![NOT_LOCAL; n_global],
            n_local: 0,
            generation: 0,
        }
    }

    /// Number of owned particles.
    pub fn n_local(&self) -> usize {
        self.n_local
    }

    /// Number of ghost particles.
    pub fn n_ghosts(&self) -> usize {
        self.tag.len() - self.n_local
    }

    /// Owned plus ghost particles.
    pub fn n_resident(&self) -> usize {
        self.tag.len()
    }

    /// Global particle count (size of the reverse map).
    pub fn n_global(&self) -> usize {
        self.rtag.len()
    }

    /// Structural generation counter.
    ///
    /// Changes whenever particles are added, removed or reordered, so callers
    /// can tell whether slot assignments recorded earlier are still valid.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Raw reverse-map entry for `tag`: a slot or [`NOT_LOCAL`].
    pub fn rtag(&self, tag: u32) -> u32 {
        self.rtag.get(tag as usize).copied().unwrap_or(NOT_LOCAL)
    }

    /// Slot currently holding `tag`, if resident.
    pub fn slot_of(&self, tag: u32) -> Option<usize> {
        match self.rtag(tag) {
            NOT_LOCAL => None,
            slot => Some(slot as usize),
        }
    }

    /// Whether `tag` is owned (not merely a ghost) on this rank.
    pub fn is_owned(&self, tag: u32) -> bool {
        self.slot_of(tag).is_some_and(|s| s < self.n_local)
    }

    // ---- Column access ----

    /// Positions of all resident particles.
    pub fn positions(&self) -> &[Vec3] {
        &self.position
    }

    /// Mutable positions of all resident particles.
    pub fn positions_mut(&mut self) -> &mut [Vec3] {
        &mut self.position
    }

    /// Velocities.
    pub fn velocities(&self) -> &[Vec3] {
        &self.velocity
    }

    /// Mutable velocities.
    pub fn velocities_mut(&mut self) -> &mut [Vec3] {
        &mut self.velocity
    }

    /// Accelerations.
    pub fn accelerations(&self) -> &[Vec3] {
        &self.acceleration
    }

    /// Mutable accelerations.
    pub fn accelerations_mut(&mut self) -> &mut [Vec3] {
        &mut self.acceleration
    }

    /// Image counters.
    pub fn images(&self) -> &[[i32; 3]] {
        &self.image
    }

    /// Mutable image counters.
    pub fn images_mut(&mut self) -> &mut [[i32; 3]] {
        &mut self.image
    }

    /// Orientations.
    pub fn orientations(&self) -> &[[Scalar; 4]] {
        &self.orientation
    }

    /// Type ids.
    pub fn types(&self) -> &[u32] {
        &self.type_id
    }

    /// Masses.
    pub fn masses(&self) -> &[Scalar] {
        &self.mass
    }

    /// Charges.
    pub fn charges(&self) -> &[Scalar] {
        &self.charge
    }

    /// Diameters.
    pub fn diameters(&self) -> &[Scalar] {
        &self.diameter
    }

    /// Body ids.
    pub fn bodies(&self) -> &[u32] {
        &self.body
    }

    /// Global tags, indexed by slot.
    pub fn tags(&self) -> &[u32] {
        &self.tag
    }

    /// Copy out the full record in `slot`.
    pub fn record(&self, slot: usize) -> Result<ParticleRecord, StoreError> {
        if slot >= self.n_resident() {
            return Err(StoreError::SlotOutOfRange { slot, len: self.n_resident() });
        }
        Ok(ParticleRecord {
            tag: self.tag[slot],
            position: self.position[slot],
            type_id: self.type_id[slot],
            velocity: self.velocity[slot],
            mass: self.mass[slot],
            acceleration: self.acceleration[slot],
            charge: self.charge[slot],
            diameter: self.diameter[slot],
            image: self.image[slot],
            body: self.body[slot],
            orientation: self.orientation[slot],
        })
    }

    /// Records of all owned particles, in slot order.
    pub fn owned_records(&self) -> Vec<ParticleRecord> {
        (0..self.n_local)
            .filter_map(|slot| self.record(slot).ok())
            .collect()
    }

    // ---- Owned particles ----

    /// Add one owned particle.
    pub fn add_particle(&mut self, record: ParticleRecord) -> Result<usize, StoreError> {
        self.append_particles(std::slice::from_ref(&record))?;
        Ok(self.n_local - 1)
    }

    /// Append owned particles at the end of the owned range.
    ///
    /// Fails without modifying the store if any tag is out of range or
    /// already resident, or if ghosts are present.
    pub fn append_particles(&mut self, records: &[ParticleRecord]) -> Result<(), StoreError> {
        self.require_no_ghosts()?;
        let start = self.n_resident();
        for r in records {
            if let Err(e) = self.claim_tag(r.tag, self.n_resident()) {
                self.truncate_to(start);
                return Err(e);
            }
            self.push_record(r);
        }
        self.n_local = self.n_resident();
        if !records.is_empty() {
            self.generation += 1;
        }
        Ok(())
    }

    /// Remove every owned particle whose position satisfies `leaves`.
    ///
    /// The owned range is stably partitioned into stays followed by leaves,
    /// the trailing run is cut off and returned in its original relative order.
    /// Departed tags become [`NOT_LOCAL`]; staying tags are re-pointed.
    pub fn drain_where<F>(&mut self, mut leaves: F) -> Result<Vec<ParticleRecord>, StoreError>
    where
        F: FnMut(&Vec3) -> bool,
    {
        self.require_no_ghosts()?;
        let n = self.n_local;

        let mut stay = Vec::with_capacity(n);
        let mut go = Vec::new();
        for slot in 0..n {
            if leaves(&self.position[slot]) {
                go.push(slot);
            } else {
                stay.push(slot);
            }
        }
        if go.is_empty() {
            return Ok(Vec::new());
        }

        let departed: Vec<ParticleRecord> = go
            .iter()
            .filter_map(|&slot| self.record(slot).ok())
            .collect();

        self.permute(&stay);
        self.n_local = stay.len();
        for (slot, &tag) in self.tag.iter().enumerate() {
            self.rtag[tag as usize] = slot as u32;
        }
        for r in &departed {
            self.rtag[r.tag as usize] = NOT_LOCAL;
        }
        self.generation += 1;
        Ok(departed)
    }

    /// Remove the owned particle in `slot`, moving the last owned particle into it.
    pub fn swap_remove(&mut self, slot: usize) -> Result<ParticleRecord, StoreError> {
        self.require_no_ghosts()?;
        let record = self.record(slot)?;
        let last = self.n_local - 1;
        if slot != last {
            let mut order: Vec<usize> = (0..last).collect();
            order[slot] = last;
            self.permute(&order);
            self.rtag[self.tag[slot] as usize] = slot as u32;
        } else {
            self.permute(&(0..last).collect::<Vec<_>>());
        }
        self.rtag[record.tag as usize] = NOT_LOCAL;
        self.n_local = last;
        self.generation += 1;
        Ok(record)
    }

    // ---- Ghosts ----

    /// Append ghost particles after all resident particles.
    ///
    /// Every tag must be non-resident; otherwise nothing is appended and
    /// [`StoreError::TagAlreadyLocal`] is returned.
    pub fn append_ghosts(&mut self, ghosts: GhostColumns<'_>) -> Result<(), StoreError> {
        let n = ghosts.len()?;
        let start = self.n_resident();
        for i in 0..n {
            if let Err(e) = self.claim_tag(ghosts.tag[i], self.n_resident()) {
                self.truncate_to(start);
                return Err(e);
            }
            let mut r = ParticleRecord::new(ghosts.tag[i], ghosts.position[i]);
            r.type_id = ghosts.type_id[i];
            r.charge = ghosts.charge[i];
            r.diameter = ghosts.diameter[i];
            self.push_record(&r);
        }
        if n > 0 {
            self.generation += 1;
        }
        Ok(())
    }

    /// Drop every ghost and reset its reverse-map entry.
    pub fn remove_all_ghosts(&mut self) {
        if self.n_ghosts() > 0 {
            self.truncate_to(self.n_local);
            self.generation += 1;
        }
    }

    /// Mutable positions of the ghost range only.
    pub fn ghost_positions_mut(&mut self) -> &mut [Vec3] {
        &mut self.position[self.n_local..]
    }

    /// Verify the reverse map against the stored tags.
    pub fn check_consistency(&self) -> Result<(), StoreError> {
        for (slot, &tag) in self.tag.iter().enumerate() {
            let entry = self.rtag(tag);
            if entry as usize != slot {
                return Err(StoreError::InconsistentReverseMap(format!(
                    "tag {} in slot {} but rtag says {}",
                    tag, slot, entry
                )));
            }
        }
        let mapped = self.rtag.iter().filter(|&&r| r != NOT_LOCAL).count();
        if mapped != self.n_resident() {
            return Err(StoreError::InconsistentReverseMap(format!(
                "{} reverse-map entries for {} resident particles",
                mapped,
                self.n_resident()
            )));
        }
        Ok(())
    }

    // ---- Internals ----

    fn require_no_ghosts(&self) -> Result<(), StoreError> {
        match self.n_ghosts() {
            0 => Ok(()),
            n_ghosts => Err(StoreError::GhostsPresent { n_ghosts }),
        }
    }

    /// Point `rtag[tag]` at `slot` if the tag is valid and not resident.
    fn claim_tag(&mut self, tag: u32, slot: usize) -> Result<(), StoreError> {
        let n_global = self.n_global();
        let entry = self
            .rtag
            .get_mut(tag as usize)
            .ok_or(StoreError::TagOutOfRange { tag, n_global })?;
        if *entry != NOT_LOCAL {
            return Err(StoreError::TagAlreadyLocal { tag, slot: *entry as usize });
        }
        *entry = slot as u32;
        Ok(())
    }

    fn push_record(&mut self, r: &ParticleRecord) {
        self.position.push(r.position);
        self.velocity.push(r.velocity);
        self.acceleration.push(r.acceleration);
        self.image.push(r.image);
        self.orientation.push(r.orientation);
        self.type_id.push(r.type_id);
        self.mass.push(r.mass);
        self.charge.push(r.charge);
        self.diameter.push(r.diameter);
        self.body.push(r.body);
        self.tag.push(r.tag);
    }

    /// Cut every column back to `len` slots, releasing the removed tags.
    fn truncate_to(&mut self, len: usize) {
        for &tag in &self.tag[len..] {
            self.rtag[tag as usize] = NOT_LOCAL;
        }
        self.position.truncate(len);
        self.velocity.truncate(len);
        self.acceleration.truncate(len);
        self.image.truncate(len);
        self.orientation.truncate(len);
        self.type_id.truncate(len);
        self.mass.truncate(len);
        self.charge.truncate(len);
        self.diameter.truncate(len);
        self.body.truncate(len);
        self.tag.truncate(len);
    }

    /// Rebuild every column as `column[order[0]], column[order[1]], ...`.
    fn permute(&mut self, order: &[usize]) {
        fn gather<T: Copy>(col: &mut Vec<T>, order: &[usize]) {
            *col = order.iter().map(|&i| col[i]).collect();
        }
        gather(&mut self.position, order);
        gather(&mut self.velocity, order);
        gather(&mut self.acceleration, order);
        gather(&mut self.image, order);
        gather(&mut self.orientation, order);
        gather(&mut self.type_id, order);
        gather(&mut self.mass, order);
        gather(&mut self.charge, order);
        gather(&mut self.diameter, order);
        gather(&mut self.body, order);
        gather(&mut self.tag, order);
    }
}
