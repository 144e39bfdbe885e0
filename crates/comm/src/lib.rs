//! Communication Layer
//!
//! This crate moves particle and cell data between the ranks of a spatially
//! decomposed simulation, including:
//! - Process grid and sub-box decomposition of a periodic box
//! - Particle migration and ghost-layer construction across the six faces
//! - Cheap ghost position refresh between migrations
//! - Reduction of cell-grid values over overlapping rank borders
//! - In-process and MPI transports, plus a threaded multi-rank runner

#![warn(missing_docs)]

pub mod cell_comm;
pub mod communicator;
pub mod config;
pub mod decomposition;
pub mod distributed;
pub mod error;
pub mod face;
pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi_transport;
pub mod transport;
pub mod wire;

pub use cell_comm::CellCommunicator;
pub use communicator::{CommStats, DomainCommunicator};
pub use config::{CellGridConfig, ConfigError, DecompositionConfig, MigrationPolicy, RunConfig};
pub use decomposition::{DomainDecomposition, ProcessGrid};
pub use distributed::{run_distributed, spawn_ranks, DistributedResult, RankSummary};
pub use error::CommError;
pub use face::{Face, FaceMask};
pub use local::LocalTransport;
#[cfg(feature = "mpi")]
pub use mpi_transport::MpiTransport;
pub use transport::{Exchange, Transport};

/// Load a configuration file and run it on in-process ranks.
///
/// Particles come from [`distributed::lattice_system`] and drift ballistically
/// with the configured timestep.
///
/// # Example
/// ```no_run
/// let result = comm::run_config("configs/slab_2x1x1.json")?;
/// println!("{} particles after {} steps", result.particles.len(), result.timesteps);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn run_config(config_path: &str) -> Result<DistributedResult, Box<dyn std::error::Error>> {
    let config = DecompositionConfig::load(config_path)?;
    tracing::info!("Loaded configuration '{}' from {}", config.name, config_path);

    let (particles, bonds) = distributed::lattice_system(&config.global_box, &config.run);
    let dt = config.run.dt;
    let result = run_distributed(&config, &particles, &bonds, config.run.steps, move |store, _| {
        distributed::drift(store, dt)
    })?;
    Ok(result)
}
