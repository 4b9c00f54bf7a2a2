//! Communicator contract consumed by collective thunks.
//!
//! Thunks operate on raw `u64` addresses and byte counts. A
//! `CollectivesInterface` hands out communicators bound to one participant
//! group; the communicator performs the exchange and reports a typed error
//! when the group cannot complete it.

mod in_process;

pub use in_process::{ExchangeRegistry, InProcessCollectives, InProcessCommunicator};

use crate::error::Result;
use crate::rendezvous::RendezvousKey;
use crate::types::GlobalDeviceId;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Collective primitives over one participant group.
pub trait CollectivesCommunicator: Send + Sync {
    /// All-to-all exchange of `chunk_bytes`-sized buffers.
    ///
    /// `sources[j]` is delivered to destination slot `rank` of participant
    /// `j`, and `destinations[i]` receives source slot `rank` of participant
    /// `i`. Both lists hold one buffer per participant. The future resolves
    /// once every participant has exchanged, or fails when `timeout` elapses.
    ///
    /// # Safety
    /// Every source must be valid for reads, and every destination valid for
    /// writes, of `chunk_bytes` bytes until the returned future resolves.
    unsafe fn all_to_all<'a>(
        &'a self,
        key: &'a RendezvousKey,
        chunk_bytes: usize,
        sources: &'a [u64],
        destinations: &'a [u64],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<()>>;

    /// All-gather: `destination` receives every participant's `chunk_bytes`
    /// source, concatenated in rank order.
    ///
    /// # Safety
    /// `source` must be valid for reads of `chunk_bytes` bytes and
    /// `destination` for writes of `chunk_bytes * world_size` bytes until the
    /// returned future resolves.
    unsafe fn all_gather<'a>(
        &'a self,
        key: &'a RendezvousKey,
        chunk_bytes: usize,
        source: u64,
        destination: u64,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Factory for communicators bound to a participant group.
pub trait CollectivesInterface: Send + Sync {
    /// Communicator for `rank` within the ordered group `global_devices`.
    fn get_communicator(
        &self,
        global_devices: &[GlobalDeviceId],
        rank: usize,
    ) -> Result<Arc<dyn CollectivesCommunicator>>;
}
