//! Configuration parsing and validation for decomposed runs

use std::fs;
use std::path::Path;

use particles::{BoxDim, CellGrid, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decomposition::{ghost_width_limit, DomainDecomposition, ProcessGrid};
use crate::error::CommError;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid JSON for this schema.
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field has an unusable value.
    #[error("{0}")]
    Invalid(String),
}

/// Main decomposition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Human-readable run name
    pub name: String,
    /// Global periodic box
    pub global_box: BoxDim,
    /// Ranks along x, y, z
    pub grid: [u32; 3],
    /// Interior split positions per axis as fractions of the box length
    #[serde(default)]
    pub splits: Option<[Vec<Scalar>; 3]>,
    /// Distance from a face within which particles are copied as ghosts
    pub ghost_width: Scalar,
    /// When to migrate instead of only refreshing ghost positions
    #[serde(default)]
    pub migration: MigrationPolicy,
    /// Cell grid shared through the cell communicator
    #[serde(default)]
    pub cells: Option<CellGridConfig>,
    /// Parameters for generated test runs
    #[serde(default)]
    pub run: RunConfig,
}

/// Migration schedule.
///
/// In JSON: `"every_step"`, `{"period": 10}` or `{"displacement": 0.25}`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPolicy {
    /// Migrate on every step
    #[default]
    EveryStep,
    /// Migrate every `n` steps
    Period(u64),
    /// Migrate once any particle has moved farther than this since the last migration
    Displacement(Scalar),
}

/// Cell grid dimensions and per-face extension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellGridConfig {
    /// Global cells along x, y, z
    pub dims: [u32; 3],
    /// Cells added beyond each decomposed face of the owned range
    #[serde(default = "default_extension")]
    pub extension: u32,
}

/// Generated-run parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Lattice points per axis
    #[serde(default = "default_lattice")]
    pub lattice: [u32; 3],
    /// Number of steps
    #[serde(default = "default_steps")]
    pub steps: u64,
    /// Timestep
    #[serde(default = "default_dt")]
    pub dt: Scalar,
    /// Largest initial speed component
    #[serde(default = "default_max_speed")]
    pub max_speed: Scalar,
    /// Seed for the initial velocities
    #[serde(default)]
    pub seed: u64,
    /// Bond consecutive lattice points into chains of this length (0 = no bonds)
    #[serde(default)]
    pub chain_length: u32,
}

// Default values
fn default_extension() -> u32 {
    1
}

fn default_lattice() -> [u32; 3] {
    [6, 6, 6]
}

fn default_steps() -> u64 {
    20
}

fn default_dt() -> Scalar {
    0.01
}

fn default_max_speed() -> Scalar {
    1.0
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lattice: default_lattice(),
            steps: default_steps(),
            dt: default_dt(),
            max_speed: default_max_speed(),
            seed: 0,
            chain_length: 0,
        }
    }
}

impl DecompositionConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config: DecompositionConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        // Check box
        if !self.global_box.is_valid() {
            return invalid("Global box lo must be below hi on every axis".to_string());
        }

        // Check process grid
        if self.grid.contains(&0) {
            return invalid(format!("Process grid dimensions must be positive, got {:?}", self.grid));
        }

        // Check split fractions
        if let Some(splits) = &self.splits {
            for a in 0..3 {
                let f = &splits[a];
                if !f.is_empty() && f.len() != self.grid[a] as usize - 1 {
                    return invalid(format!(
                        "Axis {} has {} split fractions for {} ranks",
                        a,
                        f.len(),
                        self.grid[a]
                    ));
                }
            }
        }

        // Check ghost width against the narrowest decomposed sub-box
        if self.ghost_width < 0.0 {
            return invalid("Ghost width must be non-negative".to_string());
        }
        let lengths = self.global_box.lengths();
        for a in 0..3 {
            if self.grid[a] > 1 {
                let extent = self.min_extent(a, lengths[a]);
                let limit = ghost_width_limit(self.grid[a], extent);
                if self.ghost_width >= limit {
                    return invalid(format!(
                        "Ghost width {} must be below {} (sub-box extent {}) along axis {}",
                        self.ghost_width, limit, extent, a
                    ));
                }
            }
        }

        // Check migration policy
        match self.migration {
            MigrationPolicy::Period(0) => {
                return invalid("Migration period must be at least 1".to_string());
            }
            MigrationPolicy::Displacement(d) if d <= 0.0 => {
                return invalid("Migration displacement threshold must be positive".to_string());
            }
            _ => {}
        }

        // Check cell grid
        if let Some(cells) = &self.cells {
            for a in 0..3 {
                if cells.dims[a] < self.grid[a] {
                    return invalid(format!(
                        "Axis {}: {} cells cannot be split across {} ranks",
                        a, cells.dims[a], self.grid[a]
                    ));
                }
            }
        }

        // Check run parameters
        if self.run.dt <= 0.0 {
            return invalid("Timestep must be positive".to_string());
        }

        Ok(())
    }

    /// Smallest sub-box edge along `axis`.
    fn min_extent(&self, axis: usize, length: Scalar) -> Scalar {
        let n = self.grid[axis] as usize;
        match self.splits.as_ref().map(|s| &s[axis]).filter(|f| !f.is_empty()) {
            Some(f) => {
                let mut prev = 0.0;
                let mut min = Scalar::INFINITY;
                for &frac in f.iter().chain(std::iter::once(&1.0)) {
                    min = min.min((frac - prev) * length);
                    prev = frac;
                }
                min
            }
            None => length / n as Scalar,
        }
    }

    /// Total number of ranks.
    pub fn num_ranks(&self) -> usize {
        self.grid.iter().map(|&d| d as usize).product()
    }

    /// Decomposition as seen from `rank`.
    pub fn decomposition(&self, rank: usize) -> Result<DomainDecomposition, CommError> {
        let grid = ProcessGrid::new(self.grid)?;
        DomainDecomposition::with_splits(self.global_box, grid, rank, self.splits.as_ref())
    }

    /// Cell grid for the rank described by `decomposition`, if configured.
    pub fn cell_grid(&self, decomposition: &DomainDecomposition) -> Option<Result<CellGrid, CommError>> {
        self.cells.as_ref().map(|cells| {
            CellGrid::new(
                cells.dims,
                self.grid,
                decomposition.position(),
                cells.extension,
            )
            .map_err(CommError::from)
        })
    }
}
