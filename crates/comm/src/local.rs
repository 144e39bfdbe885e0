//! In-process transport: one rank per thread, messages through shared mailboxes.
//!
//! Messages between a pair of ranks with the same tag are delivered in send
//! order. Sends never block. When a rank's handle is dropped, peers blocked on
//! a receive from it (or on a collective) get [`CommError::PeerDisconnected`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::CommError;
use crate::transport::{Exchange, Transport};
use crate::wire::MessageTag;

#[derive(Default)]
struct Mailbox {
    queues: Mutex<HashMap<(usize, MessageTag), VecDeque<Vec<u8>>>>,
    arrived: Condvar,
}

#[derive(Default)]
struct ReduceState {
    generation: u64,
    waiting: usize,
    sum: u64,
    max: f64,
    result_sum: u64,
    result_max: f64,
}

struct Shared {
    mailboxes: Vec<Mailbox>,
    alive: Vec<AtomicBool>,
    reduce: Mutex<ReduceState>,
    reduced: Condvar,
}

impl Shared {
    fn first_dead(&self) -> Option<usize> {
        self.alive.iter().position(|a| !a.load(Ordering::Acquire))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle for one rank of an in-process group.
pub struct LocalTransport {
    rank: usize,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("rank", &self.rank)
            .field("size", &self.shared.mailboxes.len())
            .finish()
    }
}

impl LocalTransport {
    /// Create handles for ranks `0..size`, to be moved onto one thread each.
    pub fn group(size: usize) -> Vec<LocalTransport> {
        let shared = Arc::new(Shared {
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
            alive: (0..size).map(|_| AtomicBool::new(true)).collect(),
            reduce: Mutex::new(ReduceState::default()),
            reduced: Condvar::new(),
        });
        (0..size)
            .map(|rank| LocalTransport { rank, shared: Arc::clone(&shared) })
            .collect()
    }

    fn post(&self, dest: usize, tag: MessageTag, data: &[u8]) -> Result<(), CommError> {
        let mailbox = self.shared.mailboxes.get(dest).ok_or_else(|| {
            CommError::Transport(format!("send to rank {} outside a group of {}", dest, self.size()))
        })?;
        lock(&mailbox.queues)
            .entry((self.rank, tag))
            .or_default()
            .push_back(data.to_vec());
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn take(&self, source: usize, tag: MessageTag, recv: &mut [u8]) -> Result<(), CommError> {
        let alive = self.shared.alive.get(source).ok_or_else(|| {
            CommError::Transport(format!("receive from rank {} outside a group of {}", source, self.size()))
        })?;
        let mailbox = &self.shared.mailboxes[self.rank];
        let mut queues = lock(&mailbox.queues);
        let msg = loop {
            if let Some(msg) = queues.get_mut(&(source, tag)).and_then(|q| q.pop_front()) {
                break msg;
            }
            if !alive.load(Ordering::Acquire) {
                return Err(CommError::PeerDisconnected { peer: source });
            }
            queues = mailbox.arrived.wait(queues).unwrap_or_else(|e| e.into_inner());
        };
        drop(queues);

        if msg.len() != recv.len() {
            tracing::warn!(
                "Rank {}: message from rank {} (tag {}) has {} bytes, expected {}",
                self.rank,
                source,
                tag,
                msg.len(),
                recv.len()
            );
            return Err(CommError::SizeMismatch {
                rank: self.rank,
                from_rank: source,
                tag,
                expected: recv.len(),
                received: msg.len(),
            });
        }
        recv.copy_from_slice(&msg);
        Ok(())
    }

    /// Contribute to a collective and wait for the combined result.
    fn reduce(&self, sum: u64, max: f64) -> Result<(u64, f64), CommError> {
        let mut st = lock(&self.shared.reduce);
        if st.waiting == 0 {
            st.sum = 0;
            st.max = f64::NEG_INFINITY;
        }
        st.sum += sum;
        st.max = st.max.max(max);
        st.waiting += 1;

        if st.waiting == self.size() {
            st.result_sum = st.sum;
            st.result_max = st.max;
            st.waiting = 0;
            st.generation += 1;
            self.shared.reduced.notify_all();
            return Ok((st.result_sum, st.result_max));
        }

        let generation = st.generation;
        while st.generation == generation {
            if let Some(peer) = self.shared.first_dead() {
                return Err(CommError::PeerDisconnected { peer });
            }
            st = self.shared.reduced.wait(st).unwrap_or_else(|e| e.into_inner());
        }
        Ok((st.result_sum, st.result_max))
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.mailboxes.len()
    }

    fn sendrecv(&self, batch: &mut [Exchange<'_>]) -> Result<(), CommError> {
        for ex in batch.iter() {
            self.post(ex.dest, ex.tag, ex.send)?;
        }
        for ex in batch.iter_mut() {
            self.take(ex.source, ex.tag, ex.recv)?;
        }
        Ok(())
    }

    fn all_reduce_sum(&self, value: u64) -> Result<u64, CommError> {
        self.reduce(value, f64::NEG_INFINITY).map(|(s, _)| s)
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64, CommError> {
        self.reduce(0, value).map(|(_, m)| m)
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.shared.alive[self.rank].store(false, Ordering::Release);
        for mailbox in &self.shared.mailboxes {
            // Take the lock so a peer between its check and its wait sees the wakeup.
            let _guard = lock(&mailbox.queues);
            mailbox.arrived.notify_all();
        }
        let _guard = lock(&self.shared.reduce);
        self.shared.reduced.notify_all();
    }
}
