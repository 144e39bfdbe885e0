//! Multi-rank validation of migration and ghost exchange
//!
//! Every test runs a small process grid on in-process threads and checks what
//! each rank ends up owning or seeing as ghosts:
//! - Particle counts are conserved and the reverse map stays consistent
//! - Ghost positions are continuous across the periodic seam
//! - Forwarded ghosts reach edge and corner neighbors
//! - Bonded partners are visible on both ranks

use comm::config::{DecompositionConfig, MigrationPolicy, RunConfig};
use comm::distributed::{drift, lattice_system, run_distributed, spawn_ranks};
use comm::{CommError, DomainCommunicator, DomainDecomposition, ProcessGrid, Transport};
use particles::{BondTable, BoxDim, ParticleRecord, ParticleStore, StoreError, Vec3};

const TOL: f64 = 1e-12;

fn decomposition(grid: [u32; 3], rank: usize) -> Result<DomainDecomposition, CommError> {
    DomainDecomposition::new(BoxDim::cube(10.0), ProcessGrid::new(grid)?, rank)
}

fn ghosts_of(store: &ParticleStore) -> Vec<(u32, Vec3)> {
    let mut ghosts: Vec<(u32, Vec3)> = (store.n_local()..store.n_resident())
        .map(|slot| (store.tags()[slot], store.positions()[slot]))
        .collect();
    ghosts.sort_by(|a, b| a.0.cmp(&b.0).then(a.1[0].total_cmp(&b.1[0])));
    ghosts
}

fn close(a: Vec3, b: Vec3) -> bool {
    (0..3).all(|i| (a[i] - b[i]).abs() < TOL)
}

/// 2x1x1 grid, box [0,10)^3, ghost width 1.0: ghosts on both sides of the seam.
#[test]
fn ghosts_are_continuous_across_the_seam() {
    let ghosts = spawn_ranks(2, |t| {
        let rank = t.rank();
        let decomp = decomposition([2, 1, 1], rank)?;
        let mut store = ParticleStore::new(3);
        if rank == 0 {
            store.add_particle(ParticleRecord::new(0, [4.5, 5.0, 5.0]))?;
            store.add_particle(ParticleRecord::new(1, [0.3, 5.0, 5.0]))?;
        } else {
            store.add_particle(ParticleRecord::new(2, [9.5, 5.0, 5.0]))?;
        }
        let mut comm = DomainCommunicator::new(t, decomp, 1.0, MigrationPolicy::EveryStep);
        comm.migrate(&mut store)?;
        comm.exchange_ghosts(&mut store, None)?;
        Ok(ghosts_of(&store))
    })
    .unwrap();

    println!("rank 0 ghosts: {:?}", ghosts[0]);
    println!("rank 1 ghosts: {:?}", ghosts[1]);

    // Rank 0 sees tag 2 just below its lower edge.
    assert_eq!(ghosts[0].len(), 1);
    assert_eq!(ghosts[0][0].0, 2);
    assert!(close(ghosts[0][0].1, [-0.5, 5.0, 5.0]));

    // Rank 1 sees tag 0 next to the interior face and tag 1 past the upper seam.
    assert_eq!(ghosts[1].len(), 2);
    assert_eq!(ghosts[1][0].0, 0);
    assert!(close(ghosts[1][0].1, [4.5, 5.0, 5.0]));
    assert_eq!(ghosts[1][1].0, 1);
    assert!(close(ghosts[1][1].1, [10.3, 5.0, 5.0]));
}

#[test]
fn migration_conserves_particles() {
    let config = DecompositionConfig {
        name: "conservation".to_string(),
        global_box: BoxDim::cube(10.0),
        grid: [2, 2, 2],
        splits: None,
        ghost_width: 1.0,
        migration: MigrationPolicy::EveryStep,
        cells: None,
        run: RunConfig { lattice: [8, 8, 8], max_speed: 5.0, seed: 7, ..RunConfig::default() },
    };
    let (particles, _) = lattice_system(&config.global_box, &config.run);
    let result = run_distributed(&config, &particles, &[], 25, |store, _| drift(store, 0.05)).unwrap();

    assert_eq!(result.particles.len(), particles.len());
    for (i, r) in result.particles.iter().enumerate() {
        assert_eq!(r.tag, i as u32);
        assert!(config.global_box.contains(&r.position), "tag {} at {:?}", r.tag, r.position);
    }
    let owned: usize = result.ranks.iter().map(|r| r.n_local).sum();
    assert_eq!(owned, particles.len());
    assert!(result.ranks.iter().all(|r| r.stats.migrations == 26));
    let moved: usize = result.ranks.iter().map(|r| r.stats.migrated_out.iter().sum::<usize>()).sum();
    println!("particles moved in the last step: {}", moved);
}

/// Unwrapped positions follow velocity * time whatever the number of seam crossings.
#[test]
fn unwrapped_positions_follow_ballistic_motion() {
    let config = DecompositionConfig {
        name: "ballistic".to_string(),
        global_box: BoxDim::cube(10.0),
        grid: [3, 2, 1],
        splits: None,
        ghost_width: 0.5,
        migration: MigrationPolicy::Period(2),
        cells: None,
        run: RunConfig { lattice: [6, 4, 4], max_speed: 4.0, seed: 3, ..RunConfig::default() },
    };
    let (particles, _) = lattice_system(&config.global_box, &config.run);
    let steps = 40;
    let dt = 0.1;
    let result = run_distributed(&config, &particles, &[], steps, move |store, _| drift(store, dt)).unwrap();

    let lengths = config.global_box.lengths();
    for (end, start) in result.particles.iter().zip(&particles) {
        for a in 0..3 {
            let unwrapped = end.position[a] + end.image[a] as f64 * lengths[a];
            let expected = start.position[a] + start.velocity[a] * dt * steps as f64;
            assert!((unwrapped - expected).abs() < 1e-9, "tag {} axis {}", end.tag, a);
        }
    }
}

/// A particle exactly on an interior face belongs to the upper sub-box.
#[test]
fn boundary_particle_has_one_owner() {
    let counts = spawn_ranks(2, |t| {
        let rank = t.rank();
        let decomp = decomposition([2, 1, 1], rank)?;
        let mut store = ParticleStore::new(2);
        if rank == 0 {
            store.add_particle(ParticleRecord::new(0, [5.0, 1.0, 1.0]))?;
            store.add_particle(ParticleRecord::new(1, [0.0, 1.0, 1.0]))?;
        }
        let mut comm = DomainCommunicator::new(t, decomp, 1.0, MigrationPolicy::EveryStep);
        comm.migrate(&mut store)?;
        Ok(store.tags()[..store.n_local()].to_vec())
    })
    .unwrap();

    assert_eq!(counts[0], vec![1]);
    assert_eq!(counts[1], vec![0]);
}

/// A particle a hair below the lower seam stays at the lower bound instead of
/// wrapping onto the exclusive upper bound of the far rank.
#[test]
fn seam_rounding_keeps_particle_inside_its_owner() {
    let owned = spawn_ranks(2, |t| {
        let rank = t.rank();
        let decomp = decomposition([2, 1, 1], rank)?;
        let mut store = ParticleStore::new(1);
        if rank == 0 {
            store.add_particle(ParticleRecord::new(0, [-1e-17, 5.0, 5.0]))?;
        }
        let mut comm = DomainCommunicator::new(t, decomp.clone(), 1.0, MigrationPolicy::EveryStep);
        comm.migrate(&mut store)?;
        let records = store.owned_records();
        assert!(records.iter().all(|r| decomp.sub_box().contains(&r.position)));
        Ok(records)
    })
    .unwrap();

    assert!(owned[1].is_empty());
    assert_eq!(owned[0].len(), 1);
    assert_eq!(owned[0][0].position, [0.0, 5.0, 5.0]);
    assert_eq!(owned[0][0].image, [0, 0, 0]);
}

/// With three ranks on an axis the ghost width may exceed half a sub-box;
/// a particle near both faces reaches both neighbors once.
#[test]
fn wide_ghost_layer_on_three_rank_axis() {
    let ghosts = spawn_ranks(3, |t| {
        let rank = t.rank();
        let decomp = decomposition([3, 1, 1], rank)?;
        let mut store = ParticleStore::new(1);
        if rank == 0 {
            store.add_particle(ParticleRecord::new(0, [1.5, 5.0, 5.0]))?;
        }
        let mut comm = DomainCommunicator::new(t, decomp, 2.0, MigrationPolicy::EveryStep);
        comm.migrate(&mut store)?;
        comm.exchange_ghosts(&mut store, None)?;
        Ok(ghosts_of(&store))
    })
    .unwrap();

    assert!(ghosts[0].is_empty());
    assert_eq!(ghosts[1].len(), 1);
    assert!(close(ghosts[1][0].1, [1.5, 5.0, 5.0]));
    assert_eq!(ghosts[2].len(), 1);
    assert!(close(ghosts[2][0].1, [11.5, 5.0, 5.0]));
}

/// On a two-rank axis the same width would deliver a particle twice.
#[test]
fn wide_ghost_layer_on_two_rank_axis_is_rejected() {
    let outcome = spawn_ranks(2, |t| {
        let decomp = decomposition([2, 1, 1], t.rank())?;
        let mut store = ParticleStore::new(1);
        let mut comm = DomainCommunicator::new(t, decomp, 2.5, MigrationPolicy::EveryStep);
        Ok(comm.exchange_ghosts(&mut store, None))
    })
    .unwrap();

    for result in &outcome {
        assert!(matches!(
            result,
            Err(CommError::GhostWidthTooLarge { axis: 0, limit, .. }) if (*limit - 2.5).abs() < TOL
        ));
    }
}

/// A ghost whose tag is already owned here is a fatal protocol error.
#[test]
fn ghost_of_resident_tag_is_fatal() {
    let outcome = spawn_ranks(2, |t| {
        let decomp = decomposition([2, 1, 1], t.rank())?;
        let mut store = ParticleStore::new(1);
        // Both ranks claim tag 0, each next to the interior face.
        let x = if t.rank() == 0 { 4.5 } else { 5.5 };
        store.add_particle(ParticleRecord::new(0, [x, 5.0, 5.0]))?;
        let mut comm = DomainCommunicator::new(t, decomp, 1.0, MigrationPolicy::EveryStep);
        comm.exchange_ghosts(&mut store, None)
    });

    // The rank that sees the duplicate first fails; its peer only loses the connection.
    assert!(matches!(
        outcome,
        Err(CommError::Store(StoreError::TagAlreadyLocal { tag: 0, .. }))
    ));
}

/// Crossing the seam and coming back restores position and image.
#[test]
fn periodic_round_trip() {
    let snapshots = spawn_ranks(2, |t| {
        let rank = t.rank();
        let decomp = decomposition([2, 1, 1], rank)?;
        let mut store = ParticleStore::new(1);
        if rank == 1 {
            store.add_particle(ParticleRecord::new(0, [9.8, 2.0, 2.0]))?;
        }
        let mut comm = DomainCommunicator::new(t, decomp, 1.0, MigrationPolicy::EveryStep);

        let mut seen = Vec::new();
        for dx in [0.4, -0.4] {
            for p in store.positions_mut() {
                p[0] += dx;
            }
            comm.migrate(&mut store)?;
            seen.push(store.owned_records());
        }
        store.check_consistency()?;
        Ok(seen)
    })
    .unwrap();

    // Forward: now on rank 0, one image up.
    assert!(snapshots[1][0].is_empty());
    let there = &snapshots[0][0][0];
    assert!((there.position[0] - 0.2).abs() < TOL);
    assert_eq!(there.image, [1, 0, 0]);

    // Back: on rank 1 again with the original image.
    assert!(snapshots[0][1].is_empty());
    let back = &snapshots[1][1][0];
    assert!((back.position[0] - 9.8).abs() < TOL);
    assert_eq!(back.image, [0, 0, 0]);
}

#[test]
fn ghost_exchange_is_idempotent() {
    let diffs = spawn_ranks(4, |t| {
        let rank = t.rank();
        let decomp = decomposition([2, 2, 1], rank)?;
        let (all, _) = lattice_system(
            decomp.global_box(),
            &RunConfig { lattice: [7, 7, 3], ..RunConfig::default() },
        );
        let mut store = ParticleStore::new(all.len());
        let mine: Vec<ParticleRecord> =
            all.into_iter().filter(|r| decomp.owner_of(&r.position) == rank).collect();
        store.append_particles(&mine)?;

        let mut comm = DomainCommunicator::new(t, decomp, 1.2, MigrationPolicy::EveryStep);
        comm.migrate(&mut store)?;
        comm.exchange_ghosts(&mut store, None)?;
        let first = ghosts_of(&store);
        comm.exchange_ghosts(&mut store, None)?;
        let second = ghosts_of(&store);
        store.check_consistency()?;
        Ok((first.len(), first == second))
    })
    .unwrap();

    for (rank, (n, same)) in diffs.iter().enumerate() {
        println!("rank {}: {} ghosts", rank, n);
        assert!(*n > 0);
        assert!(same, "rank {} ghost set changed", rank);
    }
}

/// One particle in the lower corner of rank 0 is forwarded to all seven other ranks.
#[test]
fn corner_ghost_reaches_every_neighbor() {
    let results = spawn_ranks(8, |t| {
        let rank = t.rank();
        let decomp = decomposition([2, 2, 2], rank)?;
        let position = decomp.position();
        let mut store = ParticleStore::new(1);
        if rank == 0 {
            store.add_particle(ParticleRecord::new(0, [0.5, 0.5, 0.5]))?;
        }
        let mut comm = DomainCommunicator::new(t, decomp, 1.0, MigrationPolicy::EveryStep);
        comm.migrate(&mut store)?;
        comm.exchange_ghosts(&mut store, None)?;
        Ok((position, store.n_local(), ghosts_of(&store)))
    })
    .unwrap();

    let owner_position = results[0].0;
    for (position, n_local, ghosts) in &results {
        if *position == owner_position {
            assert_eq!(*n_local, 1);
            assert!(ghosts.is_empty());
            continue;
        }
        assert_eq!(ghosts.len(), 1, "rank at {:?}", position);
        let expected = [0, 1, 2].map(|a| if position[a] != owner_position[a] { 10.5 } else { 0.5 });
        assert!(close(ghosts[0].1, expected), "rank at {:?}: {:?}", position, ghosts[0].1);
    }
}

#[test]
fn bonded_partners_become_ghosts() {
    let run = |with_bonds: bool| {
        spawn_ranks(2, move |t| {
            let rank = t.rank();
            let decomp = decomposition([2, 1, 1], rank)?;
            let mut store = ParticleStore::new(2);
            if rank == 0 {
                store.add_particle(ParticleRecord::new(0, [3.0, 5.0, 5.0]))?;
            } else {
                store.add_particle(ParticleRecord::new(1, [7.0, 5.0, 5.0]))?;
            }
            let table = BondTable::new(2, &[[0, 1]])?;
            let mut comm = DomainCommunicator::new(t, decomp, 1.0, MigrationPolicy::EveryStep);
            comm.migrate(&mut store)?;
            let bonds = with_bonds.then_some(&table as &dyn particles::BondTopology);
            comm.exchange_ghosts(&mut store, bonds)?;
            Ok(ghosts_of(&store))
        })
        .unwrap()
    };

    let without = run(false);
    assert!(without.iter().all(|g| g.is_empty()));

    let with = run(true);
    assert_eq!(with[0].len(), 1);
    assert_eq!(with[0][0].0, 1);
    assert!(close(with[0][0].1, [7.0, 5.0, 5.0]));
    assert_eq!(with[1].len(), 1);
    assert_eq!(with[1][0].0, 0);
    assert!(close(with[1][0].1, [3.0, 5.0, 5.0]));
}

#[test]
fn copy_ghosts_refreshes_positions() {
    let results = spawn_ranks(2, |t| {
        let rank = t.rank();
        let decomp = decomposition([2, 1, 1], rank)?;
        let mut store = ParticleStore::new(1);
        if rank == 0 {
            store.add_particle(ParticleRecord::new(0, [0.5, 5.0, 5.0]))?;
        }
        let mut comm = DomainCommunicator::new(t, decomp, 1.0, MigrationPolicy::Period(10));
        comm.communicate(0, &mut store, None)?;

        // Owned particle moves; the ghost follows without a migration.
        if rank == 0 {
            store.positions_mut()[0][0] = 0.25;
        }
        let migrated = comm.communicate(1, &mut store, None)?;
        Ok((migrated, ghosts_of(&store), comm.stats().ghost_refreshes))
    })
    .unwrap();

    let (migrated, ghosts, refreshes) = &results[1];
    assert!(!migrated);
    assert_eq!(*refreshes, 1);
    assert_eq!(ghosts.len(), 1);
    assert!(close(ghosts[0].1, [10.25, 5.0, 5.0]));
}

#[test]
fn copy_ghosts_after_structural_change_is_rejected() {
    let outcome = spawn_ranks(1, |t| {
        let decomp = decomposition([1, 1, 1], 0)?;
        let mut store = ParticleStore::new(2);
        store.add_particle(ParticleRecord::new(0, [1.0, 1.0, 1.0]))?;
        let mut comm = DomainCommunicator::new(t, decomp, 1.0, MigrationPolicy::EveryStep);
        comm.exchange_ghosts(&mut store, None)?;
        comm.copy_ghosts(&mut store)?;

        store.add_particle(ParticleRecord::new(1, [2.0, 2.0, 2.0])).ok();
        Ok(comm.copy_ghosts(&mut store))
    })
    .unwrap();

    assert!(matches!(outcome[0], Err(CommError::GhostsNotExchanged)));
}
