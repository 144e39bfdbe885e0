//! Reference test binary entry point
//!
//! Runs every reference scenario, or a single configuration given on the
//! command line. Log verbosity follows `RUST_LOG` (default `info`).

use reference_tests::{AgreementCheck, ExpectedResult, GhostCoverageCheck, ImageCheck, ReferenceTest, TestResult};
use tracing_subscriber::EnvFilter;

/// Two ranks along x, every-step migration
fn slab_test() -> ReferenceTest {
    ReferenceTest {
        name: "Two-Rank Slab".to_string(),
        config_path: "configs/slab_2x1x1.json".to_string(),
        expected: ExpectedResult {
            conservation: true,
            position_bounds: true,
            image_consistency: Some(ImageCheck { tolerance: 1e-9 }),
            ghost_coverage: Some(GhostCoverageCheck { tolerance: 1e-9 }),
            ghost_idempotence: true,
            cell_overlap: false,
            single_rank_agreement: Some(AgreementCheck { tolerance: 1e-12 }),
        },
    }
}

/// Eight ranks, bonded chains and a shared cell grid
fn cube_test() -> ReferenceTest {
    ReferenceTest {
        name: "Eight-Rank Cube With Chains".to_string(),
        config_path: "configs/cube_2x2x2.json".to_string(),
        expected: ExpectedResult {
            conservation: true,
            position_bounds: true,
            image_consistency: Some(ImageCheck { tolerance: 1e-9 }),
            ghost_coverage: Some(GhostCoverageCheck { tolerance: 1e-9 }),
            ghost_idempotence: true,
            cell_overlap: true,
            single_rank_agreement: Some(AgreementCheck { tolerance: 1e-12 }),
        },
    }
}

/// Nine ranks, migration every fourth step with ghost refreshes in between
fn periodic_grid_test() -> ReferenceTest {
    ReferenceTest {
        name: "Nine-Rank Grid, Periodic Migration".to_string(),
        config_path: "configs/grid_3x3x1_period.json".to_string(),
        expected: ExpectedResult {
            conservation: true,
            image_consistency: Some(ImageCheck { tolerance: 1e-9 }),
            ghost_idempotence: true,
            cell_overlap: true,
            single_rank_agreement: Some(AgreementCheck { tolerance: 1e-12 }),
            ..ExpectedResult::default()
        },
    }
}

/// Uneven slabs, migration once particles have moved far enough
fn uneven_split_test() -> ReferenceTest {
    ReferenceTest {
        name: "Uneven Slabs, Displacement Trigger".to_string(),
        config_path: "configs/uneven_3x1x1_displacement.json".to_string(),
        expected: ExpectedResult {
            conservation: true,
            image_consistency: Some(ImageCheck { tolerance: 1e-9 }),
            ghost_idempotence: true,
            single_rank_agreement: Some(AgreementCheck { tolerance: 1e-12 }),
            ..ExpectedResult::default()
        },
    }
}

/// Get all reference tests
fn all_tests() -> Vec<ReferenceTest> {
    vec![slab_test(), cube_test(), periodic_grid_test(), uneven_split_test()]
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    tracing::info!("Domain Decomposition Reference Test Suite");
    tracing::info!("=========================================");

    let tests = match std::env::args().nth(1) {
        Some(path) => vec![ReferenceTest {
            name: path.clone(),
            config_path: path,
            expected: ExpectedResult {
                conservation: true,
                ghost_idempotence: true,
                single_rank_agreement: Some(AgreementCheck { tolerance: 1e-12 }),
                ..ExpectedResult::default()
            },
        }],
        None => all_tests(),
    };
    tracing::info!("Found {} reference tests", tests.len());

    // Run all tests
    let mut results: Vec<TestResult> = Vec::new();
    let mut passed_count = 0;
    let mut failed_count = 0;

    for test in tests {
        match test.run() {
            Ok(result) => {
                if result.passed {
                    passed_count += 1;
                } else {
                    failed_count += 1;
                }
                result.print_summary();
                results.push(result);
            }
            Err(e) => {
                eprintln!("\nERROR running test {}: {}", test.name, e);
                failed_count += 1;
            }
        }
    }

    // Print overall summary
    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total tests: {}", results.len());
    println!("Passed: {}", passed_count);
    println!("Failed: {}", failed_count);
    println!("{}", "=".repeat(80));

    // Exit with error code if any tests failed
    if failed_count > 0 {
        std::process::exit(1);
    }
}
