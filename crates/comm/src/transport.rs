//! Point-to-point and collective transport.
//!
//! A [`Transport`] moves byte buffers between ranks. The communicators only
//! use [`Transport::sendrecv`]: every entry of a batch posts a send and a
//! receive, and the call returns once all of them have completed. Received
//! lengths must match the posted receive exactly.

use bytemuck::Pod;

use crate::error::CommError;
use crate::wire::{MessageTag, TAG_COUNT};

/// One paired send/receive in a batch.
#[derive(Debug)]
pub struct Exchange<'a> {
    /// Rank to send to
    pub dest: usize,
    /// Rank to receive from
    pub source: usize,
    /// Message tag for both the send and the receive
    pub tag: MessageTag,
    /// Outgoing bytes
    pub send: &'a [u8],
    /// Incoming bytes; its length is the expected message size
    pub recv: &'a mut [u8],
}

impl<'a> Exchange<'a> {
    /// Typed exchange of plain-old-data slices.
    pub fn typed<T: Pod>(
        dest: usize,
        source: usize,
        tag: MessageTag,
        send: &'a [T],
        recv: &'a mut [T],
    ) -> Self {
        Self {
            dest,
            source,
            tag,
            send: bytemuck::cast_slice(send),
            recv: bytemuck::cast_slice_mut(recv),
        }
    }
}

/// Message passing between the ranks of one run.
pub trait Transport {
    /// This rank.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Post every send and receive in `batch`, then wait for all of them.
    fn sendrecv(&self, batch: &mut [Exchange<'_>]) -> Result<(), CommError>;

    /// Sum of `value` over all ranks.
    fn all_reduce_sum(&self, value: u64) -> Result<u64, CommError>;

    /// Maximum of `value` over all ranks.
    fn all_reduce_max(&self, value: f64) -> Result<f64, CommError>;
}

/// Send `count` to `dest` and return the count received from `source`.
pub fn exchange_count<T: Transport + ?Sized>(
    transport: &T,
    dest: usize,
    source: usize,
    count: usize,
) -> Result<usize, CommError> {
    let send = [count as u64];
    let mut recv = [0u64];
    transport.sendrecv(&mut [Exchange::typed(dest, source, TAG_COUNT, &send, &mut recv)])?;
    Ok(recv[0] as usize)
}

/// Send `send` to `dest` and fill `recv` from `source`.
pub fn exchange_slice<T: Transport + ?Sized, P: Pod>(
    transport: &T,
    dest: usize,
    source: usize,
    tag: MessageTag,
    send: &[P],
    recv: &mut [P],
) -> Result<(), CommError> {
    transport.sendrecv(&mut [Exchange::typed(dest, source, tag, send, recv)])
}

impl<T: Transport + ?Sized> Transport for &T {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn sendrecv(&self, batch: &mut [Exchange<'_>]) -> Result<(), CommError> {
        (**self).sendrecv(batch)
    }

    fn all_reduce_sum(&self, value: u64) -> Result<u64, CommError> {
        (**self).all_reduce_sum(value)
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64, CommError> {
        (**self).all_reduce_max(value)
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn sendrecv(&self, batch: &mut [Exchange<'_>]) -> Result<(), CommError> {
        (**self).sendrecv(batch)
    }

    fn all_reduce_sum(&self, value: u64) -> Result<u64, CommError> {
        (**self).all_reduce_sum(value)
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64, CommError> {
        (**self).all_reduce_max(value)
    }
}
