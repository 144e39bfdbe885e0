//! MPI-backed transport (feature `mpi`).

use mpi::collective::SystemOperation;
use mpi::request::{scope, WaitGuard};
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use crate::error::CommError;
use crate::transport::{Exchange, Transport};

/// Transport over an MPI communicator.
pub struct MpiTransport {
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

impl MpiTransport {
    /// Wrap an existing communicator.
    pub fn new(world: SimpleCommunicator) -> Self {
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        tracing::info!("MPI transport: rank {} of {}", rank, size);
        Self { world, rank, size }
    }
}

impl Transport for MpiTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sendrecv(&self, batch: &mut [Exchange<'_>]) -> Result<(), CommError> {
        let world = &self.world;
        scope(|sc| {
            let mut pending = Vec::with_capacity(batch.len());
            for ex in batch.iter() {
                let req = world
                    .process_at_rank(ex.dest as i32)
                    .immediate_send_with_tag(sc, ex.send, ex.tag as i32);
                pending.push(WaitGuard::from(req));
            }
            for ex in batch.iter_mut() {
                let (data, _status) = world
                    .process_at_rank(ex.source as i32)
                    .receive_vec_with_tag::<u8>(ex.tag as i32);
                if data.len() != ex.recv.len() {
                    tracing::warn!(
                        "Rank {}: message from rank {} (tag {}) has {} bytes, expected {}",
                        self.rank,
                        ex.source,
                        ex.tag,
                        data.len(),
                        ex.recv.len()
                    );
                    return Err(CommError::SizeMismatch {
                        rank: self.rank,
                        from_rank: ex.source,
                        tag: ex.tag,
                        expected: ex.recv.len(),
                        received: data.len(),
                    });
                }
                ex.recv.copy_from_slice(&data);
            }
            // Dropping the guards waits for every send.
            drop(pending);
            Ok(())
        })
    }

    fn all_reduce_sum(&self, value: u64) -> Result<u64, CommError> {
        let mut global = 0u64;
        self.world.all_reduce_into(&value, &mut global, SystemOperation::sum());
        Ok(global)
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64, CommError> {
        let mut global = 0.0f64;
        self.world.all_reduce_into(&value, &mut global, SystemOperation::max());
        Ok(global)
    }
}
