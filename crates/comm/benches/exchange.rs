//! Timing of migrate / exchange_ghosts / copy_ghosts on in-process ranks.
//!
//! Run with: cargo bench -p comm --bench exchange

use std::time::Instant;

use comm::distributed::{drift, lattice_system, spawn_ranks};
use comm::{CommError, DomainCommunicator, DomainDecomposition, MigrationPolicy, ProcessGrid, RunConfig, Transport};
use particles::{BoxDim, ParticleRecord, ParticleStore};

struct Timing {
    migrate: f64,
    ghosts: f64,
    copy: f64,
    n_ghosts: usize,
}

fn time_grid(grid: [u32; 3], lattice: u32, steps: u32) -> Result<Vec<Timing>, CommError> {
    let num_ranks = grid.iter().product::<u32>() as usize;
    spawn_ranks(num_ranks, move |t| {
        let rank = t.rank();
        let decomp = DomainDecomposition::new(BoxDim::cube(20.0), ProcessGrid::new(grid)?, rank)?;
        let run = RunConfig { lattice: [lattice; 3], max_speed: 2.0, ..RunConfig::default() };
        let (all, _) = lattice_system(decomp.global_box(), &run);
        let mut store = ParticleStore::new(all.len());
        let mine: Vec<ParticleRecord> =
            all.into_iter().filter(|r| decomp.owner_of(&r.position) == rank).collect();
        store.append_particles(&mine)?;

        let mut comm = DomainCommunicator::new(t, decomp, 1.0, MigrationPolicy::EveryStep);
        let mut timing = Timing { migrate: 0.0, ghosts: 0.0, copy: 0.0, n_ghosts: 0 };
        for _ in 0..steps {
            drift(&mut store, 0.01);

            let start = Instant::now();
            comm.migrate(&mut store)?;
            timing.migrate += start.elapsed().as_secs_f64();

            let start = Instant::now();
            comm.exchange_ghosts(&mut store, None)?;
            timing.ghosts += start.elapsed().as_secs_f64();

            let start = Instant::now();
            comm.copy_ghosts(&mut store)?;
            timing.copy += start.elapsed().as_secs_f64();
        }
        timing.n_ghosts = store.n_ghosts();
        Ok(timing)
    })
}

fn main() {
    println!("=== Domain Communicator Timing ===\n");

    // (process grid, lattice points per axis, steps)
    let configs = [
        ([2, 1, 1], 20, 50),
        ([2, 2, 1], 20, 50),
        ([2, 2, 2], 24, 30),
        ([3, 3, 3], 30, 20),
    ];

    println!(
        "{:>10} {:>10} {:>10} {:>14} {:>14} {:>14}",
        "Grid", "Particles", "Ghosts", "migrate ms", "ghosts ms", "copy ms"
    );

    for &(grid, lattice, steps) in &configs {
        let timings = match time_grid(grid, lattice, steps) {
            Ok(t) => t,
            Err(e) => {
                println!("{:?}: failed: {}", grid, e);
                continue;
            }
        };
        // Slowest rank sets the pace.
        let worst = |f: fn(&Timing) -> f64| timings.iter().map(f).fold(0.0, f64::max) * 1e3 / steps as f64;
        let ghosts: usize = timings.iter().map(|t| t.n_ghosts).sum();

        println!(
            "{:>10} {:>10} {:>10} {:>14.4} {:>14.4} {:>14.4}",
            format!("{}x{}x{}", grid[0], grid[1], grid[2]),
            lattice.pow(3),
            ghosts,
            worst(|t| t.migrate),
            worst(|t| t.ghosts),
            worst(|t| t.copy),
        );
    }
}
