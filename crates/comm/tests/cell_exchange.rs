//! Cell communicator against a brute-force reduction
//!
//! Every rank fills its local cells with values that depend on the rank and
//! the global cell. After the exchange each local cell must hold the sum of
//! the values of every rank whose local grid contains that global cell.

use std::collections::HashMap;

use comm::distributed::spawn_ranks;
use comm::{CellCommunicator, CommError, DomainDecomposition, ProcessGrid, Transport};
use particles::{BoxDim, CellGrid};

fn value(rank: usize, global_cell: usize) -> u64 {
    (rank as u64 + 1) * 100_000 + global_cell as u64
}

/// Sum over all ranks of `value` for every global cell they hold.
fn brute_force(global_dims: [u32; 3], procs: &ProcessGrid) -> HashMap<usize, u64> {
    let mut totals = HashMap::new();
    for rank in 0..procs.num_ranks() {
        let pos = procs.position_of(rank).unwrap();
        let grid = CellGrid::new(global_dims, procs.dims(), pos, 1).unwrap();
        let local = grid.local_indexer();
        for idx in 0..local.num_elements() {
            let l = local.triple(idx);
            let g = grid.global_indexer().index_of(grid.local_to_global([l[0] as i32, l[1] as i32, l[2] as i32]));
            *totals.entry(g).or_insert(0) += value(rank, g);
        }
    }
    totals
}

fn run_sum(global_dims: [u32; 3], proc_dims: [u32; 3]) {
    let procs = ProcessGrid::new(proc_dims).unwrap();
    let expected = brute_force(global_dims, &procs);
    let num_ranks = procs.num_ranks();

    let per_rank = spawn_ranks(num_ranks, move |t| {
        let rank = t.rank();
        let procs = ProcessGrid::new(proc_dims)?;
        let decomp = DomainDecomposition::new(BoxDim::cube(1.0), procs, rank)?;
        let grid = CellGrid::new(global_dims, proc_dims, decomp.position(), 1)?;
        let mut comm = CellCommunicator::new(t, decomp, &grid);

        let local = grid.local_indexer();
        let globals: Vec<usize> = (0..local.num_elements())
            .map(|idx| {
                let l = local.triple(idx);
                grid.global_indexer()
                    .index_of(grid.local_to_global([l[0] as i32, l[1] as i32, l[2] as i32]))
            })
            .collect();
        let mut values: Vec<u64> = globals.iter().map(|&g| value(rank, g)).collect();
        comm.communicate_sum(&grid, &mut values)?;
        Ok((globals, values, comm.neighbors().len()))
    })
    .unwrap();

    for (rank, (globals, values, neighbors)) in per_rank.iter().enumerate() {
        println!("rank {}: {} local cells, {} neighbors", rank, values.len(), neighbors);
        for (g, v) in globals.iter().zip(values) {
            assert_eq!(*v, expected[g], "rank {} global cell {}", rank, g);
        }
    }
}

#[test]
fn two_per_axis_matches_brute_force() {
    run_sum([8, 8, 8], [2, 2, 2]);
}

#[test]
fn three_per_axis_matches_brute_force() {
    run_sum([9, 9, 6], [3, 3, 3]);
}

#[test]
fn slab_matches_brute_force() {
    run_sum([10, 4, 4], [3, 1, 1]);
}

#[test]
fn resize_triggers_reinitialization() {
    let results = spawn_ranks(2, |t| {
        let rank = t.rank();
        let decomp = DomainDecomposition::new(BoxDim::cube(1.0), ProcessGrid::new([2, 1, 1])?, rank)?;
        let mut grid = CellGrid::new([8, 2, 2], [2, 1, 1], decomp.position(), 1)?;
        let mut comm = CellCommunicator::new(t, decomp.clone(), &grid);

        let mut values = vec![1u64; grid.num_local_cells()];
        comm.communicate_sum(&grid, &mut values)?;
        let before = comm.num_send().to_vec();
        let old_cells = grid.num_local_cells();

        grid.resize([12, 2, 2], [2, 1, 1], decomp.position(), 1)?;
        let stale = comm.needs_init();
        let mut values = vec![1u64; grid.num_local_cells()];
        comm.communicate_sum(&grid, &mut values)?;
        let after = comm.num_send().to_vec();

        // Old-sized buffers are rejected once the grid has grown.
        let mut short = vec![1u64; old_cells];
        let rejected = matches!(
            comm.communicate_sum(&grid, &mut short),
            Err(CommError::CellValueCount { .. })
        );
        Ok((before, stale, after, values, rejected))
    })
    .unwrap();

    for (before, stale, after, values, rejected) in &results {
        // 2-cell bands at both faces, 2x2 cross-section, both to the one neighbor.
        assert_eq!(before, &vec![16]);
        assert!(stale);
        assert_eq!(after, &vec![16]);
        // Shared cells are held by both ranks.
        assert_eq!(values.iter().filter(|&&v| v == 2).count(), 16);
        assert!(rejected);
    }
}
