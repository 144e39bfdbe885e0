//! In-process distributed execution
//!
//! Runs every rank of a decomposition on its own thread with a
//! [`LocalTransport`], so a full multi-rank run can be driven (and checked)
//! from a single process. Each rank owns its particle store and talks to its
//! neighbors only through the communicators.

use std::sync::{Arc, Mutex};
use std::thread;

use particles::{BondTable, BoxDim, ParticleRecord, ParticleStore, Scalar, Vec3};

use crate::cell_comm::CellCommunicator;
use crate::communicator::{CommStats, DomainCommunicator};
use crate::config::{DecompositionConfig, RunConfig};
use crate::error::CommError;
use crate::local::LocalTransport;
use crate::transport::Transport;

/// Per-rank outcome of a distributed run
#[derive(Debug, Clone)]
pub struct RankSummary {
    /// Rank
    pub rank: usize,
    /// Owned particles at the end
    pub n_local: usize,
    /// Ghost particles at the end
    pub n_ghosts: usize,
    /// Communication counters
    pub stats: CommStats,
    /// Tag and position of every ghost at the end
    pub ghosts: Vec<(u32, Vec3)>,
    /// Sum over local cells after the cell exchange, if a cell grid is configured
    pub cell_total: Option<Scalar>,
}

/// Result of a distributed run
#[derive(Debug, Clone)]
pub struct DistributedResult {
    /// Owned particles of all ranks, sorted by tag
    pub particles: Vec<ParticleRecord>,
    /// Number of timesteps executed
    pub timesteps: u64,
    /// One summary per rank, in rank order
    pub ranks: Vec<RankSummary>,
}

/// Run `f` on `num_ranks` threads, one [`LocalTransport`] each.
///
/// Results come back in rank order. If any rank fails, the first error that
/// is not merely a consequence of another rank going away is returned.
pub fn spawn_ranks<F, R>(num_ranks: usize, f: F) -> Result<Vec<R>, CommError>
where
    F: Fn(LocalTransport) -> Result<R, CommError> + Send + Sync + 'static,
    R: Send + 'static,
{
    let f = Arc::new(f);
    let results: Arc<Mutex<Vec<Option<Result<R, CommError>>>>> =
        Arc::new(Mutex::new((0..num_ranks).map(|_| None).collect()));

    let mut handles = Vec::with_capacity(num_ranks);
    for (rank, transport) in LocalTransport::group(num_ranks).into_iter().enumerate() {
        let f = Arc::clone(&f);
        let results = Arc::clone(&results);
        handles.push(thread::spawn(move || {
            let outcome = f(transport);
            let mut slots = results.lock().unwrap_or_else(|e| e.into_inner());
            slots[rank] = Some(outcome);
        }));
    }

    let mut panicked = None;
    for (rank, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() && panicked.is_none() {
            panicked = Some(rank);
        }
    }
    if let Some(rank) = panicked {
        return Err(CommError::RankPanicked { rank });
    }

    let slots = std::mem::take(&mut *results.lock().unwrap_or_else(|e| e.into_inner()));
    let mut ok = Vec::with_capacity(num_ranks);
    let mut first_err: Option<CommError> = None;
    for (rank, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(r)) => ok.push(r),
            Some(Err(e)) => {
                let secondary = matches!(e, CommError::PeerDisconnected { .. });
                if first_err.is_none() || (!secondary && first_err.as_ref().is_some_and(is_disconnect)) {
                    first_err = Some(e);
                }
            }
            None => return Err(CommError::RankPanicked { rank }),
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(ok),
    }
}

fn is_disconnect(e: &CommError) -> bool {
    matches!(e, CommError::PeerDisconnected { .. })
}

/// Deterministic 64-bit mixer for reproducible initial velocities.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Particles on a regular lattice filling `global_box`, with velocities in
/// `[-max_speed, max_speed)` per component and optional linear chains.
///
/// Returns the particles (tag = lattice index) and the bond list.
pub fn lattice_system(global_box: &BoxDim, run: &RunConfig) -> (Vec<ParticleRecord>, Vec<[u32; 2]>) {
    let [nx, ny, nz] = run.lattice;
    let lengths = global_box.lengths();
    let mut state = run.seed;
    let mut particles = Vec::with_capacity((nx * ny * nz) as usize);

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let tag = particles.len() as u32;
                let position = [
                    global_box.lo[0] + (i as Scalar + 0.5) * lengths[0] / nx as Scalar,
                    global_box.lo[1] + (j as Scalar + 0.5) * lengths[1] / ny as Scalar,
                    global_box.lo[2] + (k as Scalar + 0.5) * lengths[2] / nz as Scalar,
                ];
                let mut r = ParticleRecord::new(tag, position);
                for v in r.velocity.iter_mut() {
                    let unit = (splitmix64(&mut state) >> 11) as Scalar / (1u64 << 53) as Scalar;
                    *v = (2.0 * unit - 1.0) * run.max_speed;
                }
                r.type_id = tag % 2;
                particles.push(r);
            }
        }
    }

    let mut bonds = Vec::new();
    if run.chain_length > 1 {
        let chain = run.chain_length as usize;
        for start in (0..particles.len()).step_by(chain) {
            let end = (start + chain).min(particles.len());
            for t in start..end.saturating_sub(1) {
                bonds.push([t as u32, t as u32 + 1]);
            }
        }
    }
    (particles, bonds)
}

/// Advance owned particles by `velocity * dt` without wrapping.
pub fn drift(store: &mut ParticleStore, dt: Scalar) {
    let n = store.n_local();
    let velocities: Vec<Vec3> = store.velocities()[..n].to_vec();
    for (p, v) in store.positions_mut()[..n].iter_mut().zip(&velocities) {
        for a in 0..3 {
            p[a] += v[a] * dt;
        }
    }
}

/// Run a decomposed simulation for `num_timesteps` steps.
///
/// This function:
/// 1. Decomposes the global box over the configured process grid
/// 2. Hands each rank the particles inside its sub-box
/// 3. Builds the ghost layer
/// 4. Each step, applies `mover` to every rank's store and communicates
/// 5. If a cell grid is configured, sums one unit per local cell across ranks
/// 6. Merges the owned particles of all ranks
pub fn run_distributed<M>(
    config: &DecompositionConfig,
    particles: &[ParticleRecord],
    bonds: &[[u32; 2]],
    num_timesteps: u64,
    mover: M,
) -> Result<DistributedResult, CommError>
where
    M: Fn(&mut ParticleStore, u64) + Send + Sync + 'static,
{
    let n = config.num_ranks();
    let n_global = particles.len();
    tracing::info!(
        "Distributed run '{}': {} ranks ({:?}), {} particles, {} bonds",
        config.name,
        n,
        config.grid,
        n_global,
        bonds.len()
    );

    let config = Arc::new(config.clone());
    let particles: Arc<Vec<ParticleRecord>> = Arc::new(particles.to_vec());
    let bonds = Arc::new(BondTable::new(n_global, bonds)?);

    let ranks = spawn_ranks(n, move |transport| {
        let transport = Arc::new(transport);
        let rank = transport.rank();
        let decomposition = config.decomposition(rank)?;

        // Hand out the particles inside this rank's sub-box.
        let mut store = ParticleStore::new(n_global);
        let global_box = *decomposition.global_box();
        let mine: Vec<ParticleRecord> = particles
            .iter()
            .filter_map(|r| {
                let mut r = *r;
                global_box.wrap(&mut r.position, &mut r.image);
                (decomposition.owner_of(&r.position) == rank).then_some(r)
            })
            .collect();
        store.append_particles(&mine)?;
        tracing::debug!("Rank {}: {} initial particles", rank, store.n_local());

        let cell_grid = config.cell_grid(&decomposition).transpose()?;
        let mut cells = cell_grid
            .as_ref()
            .map(|grid| CellCommunicator::new(Arc::clone(&transport), decomposition.clone(), grid));

        let mut comm = DomainCommunicator::new(
            Arc::clone(&transport),
            decomposition,
            config.ghost_width,
            config.migration,
        );
        comm.communicate(0, &mut store, Some(bonds.as_ref()))?;

        for step in 1..=num_timesteps {
            mover(&mut store, step);
            comm.communicate(step, &mut store, Some(bonds.as_ref()))?;
        }

        let cell_total = match (cells.as_mut(), cell_grid.as_ref()) {
            (Some(cc), Some(grid)) => {
                let mut values = vec![1.0; grid.num_local_cells()];
                cc.communicate_sum(grid, &mut values)?;
                Some(values.iter().sum())
            }
            _ => None,
        };

        store.check_consistency()?;
        let ghosts = (store.n_local()..store.n_resident())
            .map(|slot| (store.tags()[slot], store.positions()[slot]))
            .collect();
        Ok((
            store.owned_records(),
            RankSummary {
                rank,
                n_local: store.n_local(),
                n_ghosts: store.n_ghosts(),
                stats: *comm.stats(),
                ghosts,
                cell_total,
            },
        ))
    })?;

    let mut merged = Vec::with_capacity(n_global);
    let mut summaries = Vec::with_capacity(n);
    for (owned, summary) in ranks {
        merged.extend(owned);
        summaries.push(summary);
    }
    merged.sort_by_key(|r| r.tag);

    tracing::info!(
        "Distributed run complete: {} timesteps, {} particles across {} ranks",
        num_timesteps,
        merged.len(),
        n
    );

    Ok(DistributedResult {
        particles: merged,
        timesteps: num_timesteps,
        ranks: summaries,
    })
}
