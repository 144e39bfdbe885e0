//! Reference test integration tests
//!
//! These tests run the full reference test suite via cargo test.

use crate::{AgreementCheck, ExpectedResult, GhostCoverageCheck, ImageCheck, ReferenceTest};

/// Resolve a path relative to the workspace root (one level up from this crate)
fn project_path(relative: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let project_root = std::path::Path::new(manifest_dir)
        .parent()
        .expect("Could not find workspace root");
    project_root.join(relative).to_string_lossy().to_string()
}

fn slab_test() -> ReferenceTest {
    ReferenceTest {
        name: "Two-Rank Slab".to_string(),
        config_path: project_path("configs/slab_2x1x1.json"),
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

fn cube_test() -> ReferenceTest {
    ReferenceTest {
        name: "Eight-Rank Cube With Chains".to_string(),
        config_path: project_path("configs/cube_2x2x2.json"),
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

fn periodic_grid_test() -> ReferenceTest {
    ReferenceTest {
        name: "Nine-Rank Grid, Periodic Migration".to_string(),
        config_path: project_path("configs/grid_3x3x1_period.json"),
        expected: ExpectedResult {
            conservation: true,
            position_bounds: false,
            image_consistency: Some(ImageCheck { tolerance: 1e-9 }),
            ghost_coverage: None,
            ghost_idempotence: true,
            cell_overlap: true,
            single_rank_agreement: Some(AgreementCheck { tolerance: 1e-12 }),
        },
    }
}

fn uneven_split_test() -> ReferenceTest {
    ReferenceTest {
        name: "Uneven Slabs, Displacement Trigger".to_string(),
        config_path: project_path("configs/uneven_3x1x1_displacement.json"),
        expected: ExpectedResult {
            conservation: true,
            position_bounds: false,
            image_consistency: Some(ImageCheck { tolerance: 1e-9 }),
            ghost_coverage: None,
            ghost_idempotence: true,
            cell_overlap: false,
            single_rank_agreement: Some(AgreementCheck { tolerance: 1e-12 }),
        },
    }
}

#[test]
fn test_two_rank_slab() {
    let result = slab_test().run().expect("Test execution failed");
    result.print_summary();
    assert!(result.passed, "Two-rank slab test failed");
}

#[test]
fn test_eight_rank_cube() {
    let result = cube_test().run().expect("Test execution failed");
    result.print_summary();
    assert!(result.passed, "Eight-rank cube test failed");
}

#[test]
fn test_periodic_migration_grid() {
    let result = periodic_grid_test().run().expect("Test execution failed");
    result.print_summary();
    assert!(result.passed, "Periodic migration grid test failed");
    assert!(result.ghost_refreshes > 0);
}

#[test]
fn test_uneven_split_displacement() {
    let result = uneven_split_test().run().expect("Test execution failed");
    result.print_summary();
    assert!(result.passed, "Uneven split test failed");
    assert!(result.migrations < result.timesteps + 1);
}
