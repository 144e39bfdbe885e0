//! Reference test framework for decomposed particle runs
//!
//! A reference test loads a decomposition configuration, runs the generated
//! lattice system on in-process ranks and validates the merged result
//! against properties that must hold for any correct exchange: particle
//! conservation, consistent periodic images, complete ghost layers and
//! agreement with an undecomposed run of the same system.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use comm::config::DecompositionConfig;
use comm::distributed::{drift, lattice_system, run_distributed, spawn_ranks, DistributedResult};
use comm::{CommError, DomainCommunicator, MigrationPolicy, Transport};
use particles::{CellGrid, ParticleRecord, ParticleStore, Scalar, Vec3};

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Every particle is owned by exactly one rank at the end
    pub conservation: bool,
    /// Owned particles lie inside the global box
    pub position_bounds: bool,
    /// Unwrapped positions follow ballistic motion
    pub image_consistency: Option<ImageCheck>,
    /// Ghost layer covers the expanded sub-box of every rank
    pub ghost_coverage: Option<GhostCoverageCheck>,
    /// Rebuilding ghosts without motion gives the same ghosts
    pub ghost_idempotence: bool,
    /// Cell sums match a brute-force count of overlapping local grids
    pub cell_overlap: bool,
    /// Same final state as a single-rank run
    pub single_rank_agreement: Option<AgreementCheck>,
}

/// Check that `position + image * L` equals `start + velocity * t`
#[derive(Debug, Clone)]
pub struct ImageCheck {
    /// Absolute tolerance per component
    pub tolerance: Scalar,
}

/// Check that ghosts are complete and continuous with their owners
#[derive(Debug, Clone)]
pub struct GhostCoverageCheck {
    /// Absolute tolerance on ghost positions
    pub tolerance: Scalar,
}

/// Check against an undecomposed run
#[derive(Debug, Clone)]
pub struct AgreementCheck {
    /// Absolute tolerance on positions
    pub tolerance: Scalar,
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Number of ranks
    pub num_ranks: usize,
    /// Number of particles
    pub num_particles: usize,
    /// Number of timesteps executed
    pub timesteps: u64,
    /// Migrations performed (rank 0)
    pub migrations: u64,
    /// Ghost position refreshes performed (rank 0)
    pub ghost_refreshes: u64,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Detail message
    pub message: Option<String>,
}

impl CheckResult {
    fn pass(name: &str, message: String) -> Self {
        Self { name: name.to_string(), passed: true, message: Some(message) }
    }

    fn fail(name: &str, message: String) -> Self {
        Self { name: name.to_string(), passed: false, message: Some(message) }
    }
}

/// A reference test case
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to configuration file
    pub config_path: String,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

impl ReferenceTest {
    /// Run the reference test and return results
    pub fn run(&self) -> Result<TestResult, String> {
        tracing::info!("Running reference test: {}", self.name);

        let config = DecompositionConfig::load(&self.config_path).map_err(|e| e.to_string())?;
        let (initial, bonds) = lattice_system(&config.global_box, &config.run);
        let steps = config.run.steps;
        let dt = config.run.dt;

        tracing::info!(
            "Initialized: {} particles, {} bonds, {} ranks",
            initial.len(),
            bonds.len(),
            config.num_ranks()
        );

        let result = run_distributed(&config, &initial, &bonds, steps, move |store, _| drift(store, dt))
            .map_err(|e| e.to_string())?;
        tracing::info!("Simulation complete: {} steps", result.timesteps);

        // Validate results
        let mut checks = Vec::new();

        if self.expected.conservation {
            checks.push(validate_conservation(&result, initial.len()));
        }

        if self.expected.position_bounds {
            checks.push(validate_position_bounds(&result, &config));
        }

        if let Some(ref check) = self.expected.image_consistency {
            checks.push(validate_images(&result, &initial, &config, check));
        }

        if let Some(ref check) = self.expected.ghost_coverage {
            checks.push(validate_ghost_coverage(&result, &config, check));
        }

        if self.expected.ghost_idempotence {
            checks.push(validate_ghost_idempotence(&config, &result.particles));
        }

        if self.expected.cell_overlap {
            checks.push(validate_cell_overlap(&result, &config));
        }

        if let Some(ref check) = self.expected.single_rank_agreement {
            let mut single = config.clone();
            single.grid = [1, 1, 1];
            single.splits = None;
            let reference = run_distributed(&single, &initial, &bonds, steps, move |store, _| drift(store, dt))
                .map_err(|e| e.to_string())?;
            checks.push(validate_agreement(&result, &reference, check));
        }

        let passed = checks.iter().all(|c| c.passed);
        let (migrations, ghost_refreshes) = result
            .ranks
            .first()
            .map(|r| (r.stats.migrations, r.stats.ghost_refreshes))
            .unwrap_or((0, 0));

        Ok(TestResult {
            name: self.name.clone(),
            passed,
            checks,
            num_ranks: result.ranks.len(),
            num_particles: initial.len(),
            timesteps: result.timesteps,
            migrations,
            ghost_refreshes,
        })
    }
}

/// Validate that every tag is owned exactly once
fn validate_conservation(result: &DistributedResult, n_global: usize) -> CheckResult {
    let name = "Conservation";
    let owned: usize = result.ranks.iter().map(|r| r.n_local).sum();
    if owned != n_global || result.particles.len() != n_global {
        return CheckResult::fail(name, format!("{} owned across ranks, {} expected", owned, n_global));
    }
    // Merged list is sorted by tag, so it must read 0, 1, 2, ...
    if let Some(r) = result.particles.iter().enumerate().find(|(i, r)| r.tag as usize != *i) {
        return CheckResult::fail(name, format!("tag {} missing or duplicated", r.0));
    }
    CheckResult::pass(name, format!("{} particles on {} ranks", n_global, result.ranks.len()))
}

/// Validate that owned particles lie inside the global box
fn validate_position_bounds(result: &DistributedResult, config: &DecompositionConfig) -> CheckResult {
    let name = "Position Bounds";
    let outside = result
        .particles
        .iter()
        .filter(|r| !config.global_box.contains(&r.position))
        .count();
    if outside == 0 {
        CheckResult::pass(name, "all particles inside the global box".to_string())
    } else {
        CheckResult::fail(name, format!("{} particles outside the global box", outside))
    }
}

/// Validate unwrapped trajectories
fn validate_images(
    result: &DistributedResult,
    initial: &[ParticleRecord],
    config: &DecompositionConfig,
    check: &ImageCheck,
) -> CheckResult {
    let name = "Image Consistency";
    let lengths = config.global_box.lengths();
    let t = config.run.dt * result.timesteps as Scalar;
    let mut max_error: Scalar = 0.0;
    let mut crossings = 0;
    for (end, start) in result.particles.iter().zip(initial) {
        for a in 0..3 {
            let unwrapped = end.position[a] + end.image[a] as Scalar * lengths[a];
            let expected = start.position[a] + start.velocity[a] * t;
            max_error = max_error.max((unwrapped - expected).abs());
            crossings += end.image[a].unsigned_abs();
        }
    }
    let message = format!("max error {:.3e}, {} net seam crossings", max_error, crossings);
    if max_error <= check.tolerance {
        CheckResult::pass(name, message)
    } else {
        CheckResult::fail(name, format!("{} (tolerance {:.1e})", message, check.tolerance))
    }
}

/// Validate ghosts against the owned particles of all ranks.
///
/// Every particle with a periodic image inside a rank's sub-box grown by the
/// ghost width on decomposed axes must be a ghost there at that image, and
/// every ghost must sit at a periodic image of its owner.
fn validate_ghost_coverage(
    result: &DistributedResult,
    config: &DecompositionConfig,
    check: &GhostCoverageCheck,
) -> CheckResult {
    let name = "Ghost Coverage";
    if config.migration != MigrationPolicy::EveryStep {
        return CheckResult::fail(name, "ghost sets are only exact right after a migration".to_string());
    }
    let lengths = config.global_box.lengths();
    let w = config.ghost_width;
    let owners: HashMap<u32, Vec3> = result.particles.iter().map(|r| (r.tag, r.position)).collect();

    let mut missing = 0;
    let mut misplaced = 0;
    let mut total = 0;
    for summary in &result.ranks {
        let decomp = match config.decomposition(summary.rank) {
            Ok(d) => d,
            Err(e) => return CheckResult::fail(name, e.to_string()),
        };
        let sub = *decomp.sub_box();
        total += summary.ghosts.len();

        // Ghosts sit at a box-multiple shift of their owner.
        for (tag, pos) in &summary.ghosts {
            let Some(owner) = owners.get(tag) else {
                misplaced += 1;
                continue;
            };
            let continuous = (0..3).all(|a| {
                let k = ((pos[a] - owner[a]) / lengths[a]).round();
                (pos[a] - owner[a] - k * lengths[a]).abs() <= check.tolerance
            });
            if !continuous {
                misplaced += 1;
            }
        }

        // Expanded region is fully covered.
        for r in &result.particles {
            if decomp.owner_of(&r.position) == summary.rank {
                continue;
            }
            let mut image = r.position;
            let mut inside = true;
            for a in 0..3 {
                if !decomp.is_decomposed(a) {
                    continue;
                }
                let lo = sub.lo[a] - w;
                let hi = sub.hi[a] + w;
                let candidate = [image[a], image[a] - lengths[a], image[a] + lengths[a]]
                    .into_iter()
                    .find(|x| *x >= lo && *x < hi);
                match candidate {
                    Some(x) => image[a] = x,
                    None => {
                        inside = false;
                        break;
                    }
                }
            }
            if !inside {
                continue;
            }
            let found = summary.ghosts.iter().any(|(tag, pos)| {
                *tag == r.tag && (0..3).all(|a| (pos[a] - image[a]).abs() <= check.tolerance)
            });
            if !found {
                missing += 1;
            }
        }
    }

    let message = format!("{} ghosts, {} missing, {} misplaced", total, missing, misplaced);
    if missing == 0 && misplaced == 0 {
        CheckResult::pass(name, message)
    } else {
        CheckResult::fail(name, message)
    }
}

/// Rebuild ghosts twice from the final state and compare
fn validate_ghost_idempotence(config: &DecompositionConfig, particles: &[ParticleRecord]) -> CheckResult {
    let name = "Ghost Idempotence";
    let config = config.clone();
    let particles = particles.to_vec();
    let n_global = particles.len();

    let outcome = spawn_ranks(config.num_ranks(), move |t| {
        let rank = t.rank();
        let decomp = config.decomposition(rank)?;
        let mine: Vec<ParticleRecord> = particles
            .iter()
            .filter(|r| decomp.owner_of(&r.position) == rank)
            .copied()
            .collect();
        let mut store = ParticleStore::new(n_global);
        store.append_particles(&mine)?;

        let mut comm = DomainCommunicator::new(t, decomp, config.ghost_width, config.migration);
        comm.migrate(&mut store)?;
        comm.exchange_ghosts(&mut store, None)?;
        let first = ghost_snapshot(&store);
        comm.exchange_ghosts(&mut store, None)?;
        let second = ghost_snapshot(&store);
        Ok::<_, CommError>(first == second)
    });

    match outcome {
        Ok(same) if same.iter().all(|s| *s) => CheckResult::pass(name, "ghost sets unchanged".to_string()),
        Ok(same) => {
            let ranks: Vec<usize> = (0..same.len()).filter(|&r| !same[r]).collect();
            CheckResult::fail(name, format!("ghost sets changed on ranks {:?}", ranks))
        }
        Err(e) => CheckResult::fail(name, e.to_string()),
    }
}

fn ghost_snapshot(store: &ParticleStore) -> Vec<(u32, Vec3)> {
    (store.n_local()..store.n_resident())
        .map(|slot| (store.tags()[slot], store.positions()[slot]))
        .collect()
}

/// Compare per-rank cell sums with the number of ranks holding each cell
fn validate_cell_overlap(result: &DistributedResult, config: &DecompositionConfig) -> CheckResult {
    let name = "Cell Overlap";
    let Some(cells) = &config.cells else {
        return CheckResult::fail(name, "no cell grid configured".to_string());
    };

    // Count how many local grids contain each global cell.
    let mut grids = Vec::with_capacity(result.ranks.len());
    let mut holders: HashMap<[u32; 3], usize> = HashMap::new();
    for summary in &result.ranks {
        let grid = config
            .decomposition(summary.rank)
            .and_then(|d| CellGrid::new(cells.dims, config.grid, d.position(), cells.extension).map_err(CommError::from));
        let grid = match grid {
            Ok(g) => g,
            Err(e) => return CheckResult::fail(name, e.to_string()),
        };
        for idx in 0..grid.num_local_cells() {
            let l = grid.local_indexer().triple(idx);
            *holders.entry(grid.local_to_global([l[0] as i32, l[1] as i32, l[2] as i32])).or_default() += 1;
        }
        grids.push(grid);
    }

    let mut mismatched = Vec::new();
    for (summary, grid) in result.ranks.iter().zip(&grids) {
        let expected: usize = (0..grid.num_local_cells())
            .map(|idx| {
                let l = grid.local_indexer().triple(idx);
                holders[&grid.local_to_global([l[0] as i32, l[1] as i32, l[2] as i32])]
            })
            .sum();
        if summary.cell_total != Some(expected as Scalar) {
            mismatched.push(summary.rank);
        }
    }

    if mismatched.is_empty() {
        CheckResult::pass(name, format!("{} ranks match", result.ranks.len()))
    } else {
        CheckResult::fail(name, format!("cell sums differ on ranks {:?}", mismatched))
    }
}

/// Validate against a single-rank run of the same system
fn validate_agreement(result: &DistributedResult, reference: &DistributedResult, check: &AgreementCheck) -> CheckResult {
    let name = "Single-Rank Agreement";
    if result.particles.len() != reference.particles.len() {
        return CheckResult::fail(
            name,
            format!("{} vs {} particles", result.particles.len(), reference.particles.len()),
        );
    }
    let mut max_error: Scalar = 0.0;
    let mut image_mismatches = 0;
    for (a, b) in result.particles.iter().zip(&reference.particles) {
        for i in 0..3 {
            max_error = max_error.max((a.position[i] - b.position[i]).abs());
        }
        if a.image != b.image {
            image_mismatches += 1;
        }
    }
    let message = format!("max position error {:.3e}, {} image mismatches", max_error, image_mismatches);
    if max_error <= check.tolerance && image_mismatches == 0 {
        CheckResult::pass(name, message)
    } else {
        CheckResult::fail(name, message)
    }
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Ranks: {}", self.num_ranks);
        println!("Particles: {}", self.num_particles);
        println!("Timesteps: {}", self.timesteps);
        println!("\nCommunication (rank 0):");
        println!("  Migrations: {}", self.migrations);
        println!("  Ghost refreshes: {}", self.ghost_refreshes);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}
