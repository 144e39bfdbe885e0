//! Particle migration and ghost exchange between neighboring ranks.
//!
//! All three operations walk the faces in the fixed order east, west, north,
//! south, up, down and skip axes that are not decomposed. For face `f` a rank
//! sends to its neighbor across `f` and receives from the neighbor across the
//! opposite face, so every rank is sending and receiving in the same
//! direction at the same time. Particles received in one direction take part
//! in later directions, which is how corner and edge neighbors are reached.
//!
//! Periodic wrap is applied by the receiver: a particle that travelled across
//! `f` and arrives at a rank whose opposite face sits on the global seam is
//! shifted by one box length back into the receiver's coordinate range.

use bytemuck::Zeroable;
use particles::{BondTopology, GhostColumns, ParticleRecord, ParticleStore, Scalar, Vec3};

use crate::config::MigrationPolicy;
use crate::decomposition::DomainDecomposition;
use crate::error::CommError;
use crate::face::{Face, FaceMask};
use crate::transport::{exchange_count, Exchange, Transport};
use crate::wire::{
    GhostBuffers, PackedParticle, TAG_GHOST_CHARGE, TAG_GHOST_DIAMETER, TAG_GHOST_PLAN,
    TAG_GHOST_POSITION, TAG_GHOST_REFRESH, TAG_GHOST_TAG, TAG_GHOST_TYPE, TAG_PARTICLES,
};

/// Counters from the most recent call of each operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommStats {
    /// Particles sent per face by the last migration
    pub migrated_out: [usize; 6],
    /// Particles received per face by the last migration
    pub migrated_in: [usize; 6],
    /// Ghosts sent per face by the last ghost exchange
    pub ghosts_out: [usize; 6],
    /// Ghosts received per face by the last ghost exchange
    pub ghosts_in: [usize; 6],
    /// Number of migrations performed so far
    pub migrations: u64,
    /// Number of position-only ghost refreshes so far
    pub ghost_refreshes: u64,
}

/// Tags sent and counts received per face by the last ghost exchange.
#[derive(Debug, Clone, Default)]
struct GhostRecord {
    copy_tags: [Vec<u32>; 6],
    num_recv: [usize; 6],
    /// Store generation right after the exchange.
    generation: u64,
}

/// Moves particles between the sub-boxes of a [`DomainDecomposition`].
pub struct DomainCommunicator<T: Transport> {
    transport: T,
    decomposition: DomainDecomposition,
    ghost_width: Scalar,
    policy: MigrationPolicy,

    /// Plan of every resident particle during a ghost exchange.
    plan: Vec<FaceMask>,
    ghosts: Option<GhostRecord>,
    /// Owned positions at the last migration, by tag.
    reference_positions: Vec<(u32, Vec3)>,
    last_migration_step: Option<u64>,

    send_particles: Vec<PackedParticle>,
    recv_particles: Vec<PackedParticle>,
    send_ghosts: GhostBuffers,
    recv_ghosts: GhostBuffers,

    stats: CommStats,
}

impl<T: Transport> DomainCommunicator<T> {
    /// Create a communicator for the rank described by `decomposition`.
    pub fn new(
        transport: T,
        decomposition: DomainDecomposition,
        ghost_width: Scalar,
        policy: MigrationPolicy,
    ) -> Self {
        tracing::info!(
            "Rank {}/{}: sub-box {:?} -> {:?}, ghost width {}, neighbors {:?}",
            transport.rank(),
            transport.size(),
            decomposition.sub_box().lo,
            decomposition.sub_box().hi,
            ghost_width,
            Face::ALL.map(|f| decomposition.neighbor(f)),
        );
        Self {
            transport,
            decomposition,
            ghost_width,
            policy,
            plan: Vec::new(),
            ghosts: None,
            reference_positions: Vec::new(),
            last_migration_step: None,
            send_particles: Vec::new(),
            recv_particles: Vec::new(),
            send_ghosts: GhostBuffers::default(),
            recv_ghosts: GhostBuffers::default(),
            stats: CommStats::default(),
        }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Decomposition this communicator serves.
    pub fn decomposition(&self) -> &DomainDecomposition {
        &self.decomposition
    }

    /// Ghost layer width.
    pub fn ghost_width(&self) -> Scalar {
        self.ghost_width
    }

    /// Counters from the most recent operations.
    pub fn stats(&self) -> &CommStats {
        &self.stats
    }

    /// Tags sent as ghosts across `face` by the last exchange.
    pub fn copy_ghost_tags(&self, face: Face) -> &[u32] {
        self.ghosts
            .as_ref()
            .map(|g| g.copy_tags[face.index()].as_slice())
            .unwrap_or(&[])
    }

    /// Ghosts received across `face` by the last exchange.
    pub fn num_recv_ghosts(&self, face: Face) -> usize {
        self.ghosts.as_ref().map(|g| g.num_recv[face.index()]).unwrap_or(0)
    }

    /// Faces along which communication happens.
    fn active_faces(&self) -> impl Iterator<Item = Face> + '_ {
        Face::ALL
            .into_iter()
            .filter(move |f| self.decomposition.is_decomposed(f.axis()))
    }

    /// Box-length shift for something that crossed `face` and arrived here.
    fn periodic_shift(&self, face: Face) -> Option<(usize, Scalar, i32)> {
        if !self.decomposition.is_at_boundary(face.opposite()) {
            return None;
        }
        let axis = face.axis();
        let length = self.decomposition.global_box().lengths()[axis];
        // Crossing an upper face lands past the seam on the lower side.
        if face.is_upper() {
            Some((axis, -length, 1))
        } else {
            Some((axis, length, -1))
        }
    }

    // ---------------------------------------------------------------------
    // Migration
    // ---------------------------------------------------------------------

    /// Send every owned particle that left the sub-box to the neighbor that now owns it.
    ///
    /// Ghosts are dropped first. After all faces are processed the owned
    /// counts of all ranks must add up to the global particle count.
    pub fn migrate(&mut self, store: &mut ParticleStore) -> Result<(), CommError> {
        store.remove_all_ghosts();
        self.ghosts = None;
        self.stats.migrated_out = [0; 6];
        self.stats.migrated_in = [0; 6];
        self.wrap_undecomposed(store);

        let sub_box = *self.decomposition.sub_box();
        let faces: Vec<Face> = self.active_faces().collect();
        for face in faces {
            let axis = face.axis();
            if !face.is_upper() && self.decomposition.is_at_boundary(face) {
                self.settle_lower_seam(store, axis);
            }
            let bound = if face.is_upper() { sub_box.hi[axis] } else { sub_box.lo[axis] };
            let leaving = store.drain_where(|p| {
                if face.is_upper() {
                    p[axis] >= bound
                } else {
                    p[axis] < bound
                }
            })?;

            self.send_particles.clear();
            self.send_particles.extend(leaving.iter().map(PackedParticle::from));

            let dest = self.decomposition.neighbor(face);
            let source = self.decomposition.neighbor(face.opposite());
            let n_recv = exchange_count(&self.transport, dest, source, self.send_particles.len())?;
            self.recv_particles.clear();
            self.recv_particles.resize(n_recv, PackedParticle::zeroed());
            self.transport.sendrecv(&mut [Exchange::typed(
                dest,
                source,
                TAG_PARTICLES,
                &self.send_particles,
                &mut self.recv_particles,
            )])?;

            let shift = self.periodic_shift(face);
            let global = *self.decomposition.global_box();
            let received: Vec<ParticleRecord> = self
                .recv_particles
                .iter()
                .map(|p| {
                    let mut r = ParticleRecord::from(p);
                    if let Some((a, dx, di)) = shift {
                        r.position[a] += dx;
                        r.image[a] += di;
                        // Rounding can land just below lo.
                        if r.position[a] < global.lo[a] {
                            r.position[a] = global.lo[a];
                        }
                    }
                    r
                })
                .collect();
            if let Err(e) = store.append_particles(&received) {
                tracing::warn!("Rank {}: rejected particles from rank {}: {}", self.transport.rank(), source, e);
                return Err(e.into());
            }

            self.stats.migrated_out[face.index()] = self.send_particles.len();
            self.stats.migrated_in[face.index()] = n_recv;
            tracing::trace!(
                "Rank {} migrate {:?}: sent {} to rank {}, received {} from rank {}",
                self.transport.rank(),
                face,
                self.send_particles.len(),
                dest,
                n_recv,
                source
            );
        }

        let expected = store.n_global() as u64;
        let found = self.transport.all_reduce_sum(store.n_local() as u64)?;
        if found != expected {
            tracing::warn!(
                "Rank {}: particle count drift after migration ({} owned across ranks, {} expected)",
                self.transport.rank(),
                found,
                expected
            );
            return Err(CommError::ParticleCountMismatch { expected, found });
        }

        self.stats.migrations += 1;
        self.reference_positions = (0..store.n_local())
            .map(|slot| (store.tags()[slot], store.positions()[slot]))
            .collect();
        tracing::debug!(
            "Rank {}: migration done, {} owned (out {:?}, in {:?})",
            self.transport.rank(),
            store.n_local(),
            self.stats.migrated_out,
            self.stats.migrated_in
        );
        Ok(())
    }

    /// Pin owned particles just below the global lower bound to that bound
    /// when their periodic image would round onto the exclusive upper bound.
    /// Such a particle stays on this rank with its image unchanged.
    fn settle_lower_seam(&self, store: &mut ParticleStore, axis: usize) {
        let global = *self.decomposition.global_box();
        let length = global.lengths()[axis];
        let n = store.n_local();
        for p in store.positions_mut()[..n].iter_mut() {
            if p[axis] < global.lo[axis] && p[axis] + length >= global.hi[axis] {
                p[axis] = global.lo[axis];
            }
        }
    }

    /// Wrap owned particles back into the global box along axes that are not
    /// split, where no neighbor exchange takes care of the seam.
    fn wrap_undecomposed(&self, store: &mut ParticleStore) {
        let global = *self.decomposition.global_box();
        let lengths = global.lengths();
        let axes: Vec<usize> = (0..3).filter(|&a| !self.decomposition.is_decomposed(a)).collect();
        if axes.is_empty() {
            return;
        }

        let n = store.n_local();
        let mut image_steps = Vec::new();
        for (slot, p) in store.positions_mut()[..n].iter_mut().enumerate() {
            for &a in &axes {
                if p[a] >= global.hi[a] {
                    p[a] = (p[a] - lengths[a]).max(global.lo[a]);
                    image_steps.push((slot, a, 1));
                } else if p[a] < global.lo[a] {
                    if p[a] + lengths[a] >= global.hi[a] {
                        p[a] = global.lo[a];
                    } else {
                        p[a] += lengths[a];
                        image_steps.push((slot, a, -1));
                    }
                }
            }
        }
        let images = store.images_mut();
        for (slot, a, step) in image_steps {
            images[slot][a] += step;
        }
    }

    // ---------------------------------------------------------------------
    // Ghost exchange
    // ---------------------------------------------------------------------

    /// Rebuild the ghost layer from scratch.
    ///
    /// Owned particles within the ghost width of a face are copied across it,
    /// and so are owned particles with a bonded partner that is not owned here
    /// (toward the nearer face on every axis). Ghosts received across one face
    /// are forwarded across later faces when their plan says so.
    pub fn exchange_ghosts(
        &mut self,
        store: &mut ParticleStore,
        bonds: Option<&dyn BondTopology>,
    ) -> Result<(), CommError> {
        store.remove_all_ghosts();
        self.ghosts = None;
        self.check_ghost_width()?;

        self.compute_plans(store, bonds);

        let mut record = GhostRecord::default();
        self.stats.ghosts_out = [0; 6];
        self.stats.ghosts_in = [0; 6];

        let faces: Vec<Face> = self.active_faces().collect();
        for face in faces {
            // ---- Pack ----
            self.send_ghosts.clear();
            for slot in 0..store.n_resident() {
                let plan = self.plan[slot];
                if !plan.contains(face) {
                    continue;
                }
                self.send_ghosts.plan.push(plan);
                self.send_ghosts.position.push(store.positions()[slot]);
                self.send_ghosts.type_id.push(store.types()[slot]);
                self.send_ghosts.tag.push(store.tags()[slot]);
                self.send_ghosts.charge.push(store.charges()[slot]);
                self.send_ghosts.diameter.push(store.diameters()[slot]);
            }

            // ---- Exchange ----
            let dest = self.decomposition.neighbor(face);
            let source = self.decomposition.neighbor(face.opposite());
            let n_recv = exchange_count(&self.transport, dest, source, self.send_ghosts.len())?;
            self.recv_ghosts.resize(n_recv);
            {
                let send = &self.send_ghosts;
                let recv = &mut self.recv_ghosts;
                self.transport.sendrecv(&mut [
                    Exchange::typed(dest, source, TAG_GHOST_PLAN, &send.plan, &mut recv.plan),
                    Exchange::typed(dest, source, TAG_GHOST_POSITION, &send.position, &mut recv.position),
                    Exchange::typed(dest, source, TAG_GHOST_TYPE, &send.type_id, &mut recv.type_id),
                    Exchange::typed(dest, source, TAG_GHOST_TAG, &send.tag, &mut recv.tag),
                    Exchange::typed(dest, source, TAG_GHOST_CHARGE, &send.charge, &mut recv.charge),
                    Exchange::typed(dest, source, TAG_GHOST_DIAMETER, &send.diameter, &mut recv.diameter),
                ])?;
            }

            // ---- Unpack ----
            if let Some((a, dx, _)) = self.periodic_shift(face) {
                for p in &mut self.recv_ghosts.position {
                    p[a] += dx;
                }
            }
            let appended = store.append_ghosts(GhostColumns {
                tag: &self.recv_ghosts.tag,
                position: &self.recv_ghosts.position,
                type_id: &self.recv_ghosts.type_id,
                charge: &self.recv_ghosts.charge,
                diameter: &self.recv_ghosts.diameter,
            });
            if let Err(e) = appended {
                tracing::warn!("Rank {}: rejected ghosts from rank {}: {}", self.transport.rank(), source, e);
                return Err(e.into());
            }
            self.plan.extend_from_slice(&self.recv_ghosts.plan);

            record.copy_tags[face.index()] = self.send_ghosts.tag.clone();
            record.num_recv[face.index()] = n_recv;
            self.stats.ghosts_out[face.index()] = self.send_ghosts.len();
            self.stats.ghosts_in[face.index()] = n_recv;
            tracing::trace!(
                "Rank {} ghosts {:?}: sent {} to rank {}, received {} from rank {}",
                self.transport.rank(),
                face,
                self.send_ghosts.len(),
                dest,
                n_recv,
                source
            );
        }

        record.generation = store.generation();
        self.ghosts = Some(record);
        tracing::debug!(
            "Rank {}: ghost exchange done, {} owned + {} ghosts",
            self.transport.rank(),
            store.n_local(),
            store.n_ghosts()
        );
        Ok(())
    }

    /// Ghosts may only reach into the adjacent sub-box. On a two-rank axis a
    /// particle must also not be near both faces, or it would arrive twice.
    fn check_ghost_width(&self) -> Result<(), CommError> {
        let lengths = self.decomposition.sub_box().lengths();
        for axis in 0..3 {
            if !self.decomposition.is_decomposed(axis) {
                continue;
            }
            let limit = self.decomposition.grid().ghost_width_limit(axis, lengths[axis]);
            if self.ghost_width >= limit {
                return Err(CommError::GhostWidthTooLarge {
                    width: self.ghost_width,
                    limit,
                    extent: lengths[axis],
                    axis,
                });
            }
        }
        Ok(())
    }

    /// Fill `plan` for the owned particles from bonds and the ghost width.
    fn compute_plans(&mut self, store: &ParticleStore, bonds: Option<&dyn BondTopology>) {
        let sub_box = *self.decomposition.sub_box();
        let lengths = sub_box.lengths();
        let w = self.ghost_width;

        self.plan.clear();
        self.plan.resize(store.n_local(), FaceMask::EMPTY);

        for slot in 0..store.n_local() {
            let pos = store.positions()[slot];
            let mut plan = FaceMask::EMPTY;

            // A bond reaching off-rank needs its local end visible over there.
            let incomplete = bonds.is_some_and(|b| {
                b.partners(store.tags()[slot])
                    .iter()
                    .any(|&partner| !store.is_owned(partner))
            });
            if incomplete {
                for axis in 0..3 {
                    if pos[axis] > sub_box.lo[axis] + lengths[axis] / 2.0 {
                        plan.insert(Face::upper(axis));
                    } else {
                        plan.insert(Face::lower(axis));
                    }
                }
            }

            for axis in 0..3 {
                if pos[axis] >= sub_box.hi[axis] - w {
                    plan.insert(Face::upper(axis));
                }
                if pos[axis] < sub_box.lo[axis] + w {
                    plan.insert(Face::lower(axis));
                }
            }
            self.plan[slot] = plan;
        }
    }

    // ---------------------------------------------------------------------
    // Ghost position refresh
    // ---------------------------------------------------------------------

    /// Resend current positions of the particles recorded by the last ghost exchange.
    ///
    /// Ghost slots keep their order; only positions change.
    pub fn copy_ghosts(&mut self, store: &mut ParticleStore) -> Result<(), CommError> {
        let ghosts = match self.ghosts.take() {
            Some(g) if g.generation == store.generation() => g,
            other => {
                self.ghosts = other;
                return Err(CommError::GhostsNotExchanged);
            }
        };
        let result = self.refresh_positions(store, &ghosts);
        self.ghosts = Some(ghosts);
        result?;
        self.stats.ghost_refreshes += 1;
        Ok(())
    }

    fn refresh_positions(&mut self, store: &mut ParticleStore, ghosts: &GhostRecord) -> Result<(), CommError> {
        let faces: Vec<Face> = self.active_faces().collect();
        let mut offset = 0;
        for face in faces {
            let tags = &ghosts.copy_tags[face.index()];
            self.send_ghosts.position.clear();
            for &tag in tags {
                let slot = store
                    .slot_of(tag)
                    .ok_or(CommError::MissingGhostSource { tag })?;
                self.send_ghosts.position.push(store.positions()[slot]);
            }

            let n_recv = ghosts.num_recv[face.index()];
            let dest = self.decomposition.neighbor(face);
            let source = self.decomposition.neighbor(face.opposite());
            self.recv_ghosts.position.clear();
            self.recv_ghosts.position.resize(n_recv, [0.0; 3]);
            self.transport.sendrecv(&mut [Exchange::typed(
                dest,
                source,
                TAG_GHOST_REFRESH,
                &self.send_ghosts.position,
                &mut self.recv_ghosts.position,
            )])?;

            let shift = self.periodic_shift(face);
            let target = &mut store.ghost_positions_mut()[offset..offset + n_recv];
            for (dst, src) in target.iter_mut().zip(&self.recv_ghosts.position) {
                *dst = *src;
                if let Some((a, dx, _)) = shift {
                    dst[a] += dx;
                }
            }
            offset += n_recv;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Per-step entry point
    // ---------------------------------------------------------------------

    /// Whether `step` needs a full migration under the configured policy.
    ///
    /// Collective: every rank must call this with the same step.
    pub fn needs_migration(&self, step: u64, store: &ParticleStore) -> Result<bool, CommError> {
        let last = match self.last_migration_step {
            None => return Ok(true),
            Some(last) => last,
        };
        if self.ghosts.is_none() {
            return Ok(true);
        }
        match self.policy {
            MigrationPolicy::EveryStep => Ok(true),
            MigrationPolicy::Period(n) => Ok(step.saturating_sub(last) >= n),
            MigrationPolicy::Displacement(threshold) => {
                let mut max_sq: Scalar = 0.0;
                for &(tag, reference) in &self.reference_positions {
                    if let Some(slot) = store.slot_of(tag) {
                        let p = store.positions()[slot];
                        let d2 = (0..3).map(|a| (p[a] - reference[a]).powi(2)).sum::<Scalar>();
                        max_sq = max_sq.max(d2);
                    }
                }
                let global = self.transport.all_reduce_max(max_sq.sqrt())?;
                Ok(global > threshold)
            }
        }
    }

    /// Bring ghosts up to date for `step`: migrate and rebuild ghosts when the
    /// policy asks for it, otherwise only refresh ghost positions.
    ///
    /// Returns whether a migration happened.
    pub fn communicate(
        &mut self,
        step: u64,
        store: &mut ParticleStore,
        bonds: Option<&dyn BondTopology>,
    ) -> Result<bool, CommError> {
        if self.needs_migration(step, store)? {
            self.migrate(store)?;
            self.exchange_ghosts(store, bonds)?;
            self.last_migration_step = Some(step);
            Ok(true)
        } else {
            self.copy_ghosts(store)?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::ProcessGrid;
    use crate::local::LocalTransport;
    use particles::BoxDim;

    fn faces(mask: FaceMask) -> Vec<Face> {
        Face::ALL.into_iter().filter(|f| mask.contains(*f)).collect()
    }

    fn single_rank(dims: [u32; 3]) -> DomainCommunicator<LocalTransport> {
        let grid = ProcessGrid::new(dims).unwrap();
        let decomposition = DomainDecomposition::new(BoxDim::cube(10.0), grid, 0).unwrap();
        let transport = LocalTransport::group(1).remove(0);
        DomainCommunicator::new(transport, decomposition, 1.0, MigrationPolicy::EveryStep)
    }

    #[test]
    fn plan_marks_faces_within_ghost_width() {
        let mut comm = single_rank([1, 1, 1]);
        let mut store = ParticleStore::new(3);
        store.add_particle(ParticleRecord::new(0, [0.5, 5.0, 9.5])).unwrap();
        store.add_particle(ParticleRecord::new(1, [5.0, 5.0, 5.0])).unwrap();
        store.add_particle(ParticleRecord::new(2, [9.0, 0.99, 5.0])).unwrap();
        comm.compute_plans(&store, None);

        assert_eq!(faces(comm.plan[0]), vec![Face::West, Face::Up]);
        assert!(faces(comm.plan[1]).is_empty());
        // 9.0 >= 10 - 1 is on the boundary of the ghost layer.
        assert!(comm.plan[2].contains(Face::East));
        assert!(comm.plan[2].contains(Face::South));
    }

    #[test]
    fn plan_marks_nearest_faces_for_broken_bonds() {
        let mut comm = single_rank([1, 1, 1]);
        let mut store = ParticleStore::new(2);
        store.add_particle(ParticleRecord::new(0, [3.0, 7.0, 5.5])).unwrap();
        let bonds = particles::BondTable::new(2, &[[0, 1]]).unwrap();
        comm.compute_plans(&store, Some(&bonds));

        assert_eq!(faces(comm.plan[0]), vec![Face::West, Face::North, Face::Up]);
    }

    #[test]
    fn single_rank_needs_no_messages() {
        let mut comm = single_rank([1, 1, 1]);
        let mut store = ParticleStore::new(2);
        store.add_particle(ParticleRecord::new(0, [0.5, 0.5, 0.5])).unwrap();
        store.add_particle(ParticleRecord::new(1, [5.0, 5.0, 5.0])).unwrap();

        comm.migrate(&mut store).unwrap();
        comm.exchange_ghosts(&mut store, None).unwrap();
        assert_eq!(store.n_local(), 2);
        assert_eq!(store.n_ghosts(), 0);
        comm.copy_ghosts(&mut store).unwrap();
    }

    #[test]
    fn copy_without_exchange_fails() {
        let mut comm = single_rank([1, 1, 1]);
        let mut store = ParticleStore::new(1);
        assert!(matches!(comm.copy_ghosts(&mut store), Err(CommError::GhostsNotExchanged)));

        comm.exchange_ghosts(&mut store, None).unwrap();
        store.add_particle(ParticleRecord::new(0, [1.0; 3])).unwrap();
        assert!(matches!(comm.copy_ghosts(&mut store), Err(CommError::GhostsNotExchanged)));
    }

    #[test]
    fn undecomposed_axes_wrap_locally() {
        let mut comm = single_rank([1, 1, 1]);
        let mut store = ParticleStore::new(1);
        store.add_particle(ParticleRecord::new(0, [10.25, -0.5, 3.0])).unwrap();
        comm.migrate(&mut store).unwrap();
        let p = store.positions()[0];
        assert!((p[0] - 0.25).abs() < 1e-12);
        assert!((p[1] - 9.5).abs() < 1e-12);
        assert_eq!(store.images()[0], [1, -1, 0]);
    }

    #[test]
    fn local_wrap_never_lands_on_upper_bound() {
        let mut comm = single_rank([1, 1, 1]);
        let mut store = ParticleStore::new(1);
        store.add_particle(ParticleRecord::new(0, [-1e-17, 5.0, 5.0])).unwrap();
        comm.migrate(&mut store).unwrap();
        assert_eq!(store.positions()[0], [0.0, 5.0, 5.0]);
        assert_eq!(store.images()[0], [0, 0, 0]);
    }

    #[test]
    fn count_mismatch_is_fatal() {
        let mut comm = single_rank([1, 1, 1]);
        // Two global particles but only one resident anywhere.
        let mut store = ParticleStore::new(2);
        store.add_particle(ParticleRecord::new(0, [1.0; 3])).unwrap();
        assert!(matches!(
            comm.migrate(&mut store),
            Err(CommError::ParticleCountMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn periodic_policy_schedule() {
        let grid = ProcessGrid::new([1, 1, 1]).unwrap();
        let decomposition = DomainDecomposition::new(BoxDim::cube(10.0), grid, 0).unwrap();
        let transport = LocalTransport::group(1).remove(0);
        let mut comm = DomainCommunicator::new(transport, decomposition, 1.0, MigrationPolicy::Period(3));
        let mut store = ParticleStore::new(1);
        store.add_particle(ParticleRecord::new(0, [1.0; 3])).unwrap();

        let migrated: Vec<bool> = (0..7)
            .map(|step| comm.communicate(step, &mut store, None).unwrap())
            .collect();
        assert_eq!(migrated, vec![true, false, false, true, false, false, true]);
        assert_eq!(comm.stats().migrations, 3);
        assert_eq!(comm.stats().ghost_refreshes, 4);
    }

    #[test]
    fn displacement_policy_triggers_on_motion() {
        let grid = ProcessGrid::new([1, 1, 1]).unwrap();
        let decomposition = DomainDecomposition::new(BoxDim::cube(10.0), grid, 0).unwrap();
        let transport = LocalTransport::group(1).remove(0);
        let mut comm =
            DomainCommunicator::new(transport, decomposition, 1.0, MigrationPolicy::Displacement(0.5));
        let mut store = ParticleStore::new(1);
        store.add_particle(ParticleRecord::new(0, [1.0; 3])).unwrap();

        assert!(comm.communicate(0, &mut store, None).unwrap());
        store.positions_mut()[0][0] += 0.3;
        assert!(!comm.communicate(1, &mut store, None).unwrap());
        store.positions_mut()[0][0] += 0.3;
        assert!(comm.communicate(2, &mut store, None).unwrap());
    }
}
