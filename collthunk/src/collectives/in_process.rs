//! Communicator for participants that share one address space.
//!
//! Participants rendezvous in an `ExchangeRegistry` under their
//! `RendezvousKey`. The first arrival creates the exchange, the last arrival
//! seals it, and each participant then copies its inbound chunks straight
//! out of its peers' source memory. Nobody leaves until every participant has
//! finished copying, and the last one out evicts the exchange.

use crate::collectives::{CollectivesCommunicator, CollectivesInterface};
use crate::error::{Result, ThunkError};
use crate::rendezvous::RendezvousKey;
use crate::types::GlobalDeviceId;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeOp {
    AllToAll,
    AllGather,
}

impl ExchangeOp {
    fn name(self) -> &'static str {
        match self {
            ExchangeOp::AllToAll => "all-to-all",
            ExchangeOp::AllGather => "all-gather",
        }
    }
}

/// Addresses one participant contributes to an exchange.
#[derive(Debug, Clone)]
struct Contribution {
    sources: Vec<u64>,
    destinations: Vec<u64>,
}

struct ExchangeState {
    contributions: Vec<Option<Contribution>>,
    arrived: usize,
    copied: usize,
    /// Set once every participant has arrived; withdrawal is impossible after.
    sealed: bool,
}

struct Exchange {
    op: ExchangeOp,
    world: usize,
    chunk_bytes: usize,
    state: Mutex<ExchangeState>,
    arrived_tx: watch::Sender<usize>,
    copied_tx: watch::Sender<usize>,
}

impl Exchange {
    fn new(op: ExchangeOp, world: usize, chunk_bytes: usize) -> Self {
        Self {
            op,
            world,
            chunk_bytes,
            state: Mutex::new(ExchangeState {
                contributions: vec![None; world],
                arrived: 0,
                copied: 0,
                sealed: false,
            }),
            arrived_tx: watch::Sender::new(0),
            copied_tx: watch::Sender::new(0),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ExchangeState>> {
        self.state
            .lock()
            .map_err(|_| ThunkError::LockPoisoned("exchange state"))
    }

    /// Every contribution, in rank order. Only valid once sealed.
    fn snapshot(&self) -> Result<Vec<Contribution>> {
        let state = self.lock_state()?;
        state
            .contributions
            .iter()
            .enumerate()
            .map(|(rank, c)| {
                c.clone().ok_or_else(|| {
                    ThunkError::transport(format!("sealed exchange missing rank {rank}"))
                })
            })
            .collect()
    }
}

/// In-flight exchanges keyed by rendezvous key.
///
/// An entry lives from its first participant's arrival until its last
/// participant's departure, or until every participant present has timed out
/// and withdrawn.
#[derive(Default)]
pub struct ExchangeRegistry {
    exchanges: Mutex<HashMap<RendezvousKey, Arc<Exchange>>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of exchanges currently registered.
    ///
    /// Map updates are single inserts and removes, so a poisoned map still
    /// holds a consistent entry set to count.
    pub fn pending(&self) -> usize {
        match self.exchanges.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<RendezvousKey, Arc<Exchange>>>> {
        self.exchanges
            .lock()
            .map_err(|_| ThunkError::LockPoisoned("exchange registry"))
    }

    fn evict(
        map: &mut HashMap<RendezvousKey, Arc<Exchange>>,
        key: &RendezvousKey,
        exchange: &Arc<Exchange>,
    ) {
        if map.get(key).is_some_and(|e| Arc::ptr_eq(e, exchange)) {
            map.remove(key);
            tracing::debug!(%key, "exchange evicted");
        }
    }

    fn join(
        &self,
        key: &RendezvousKey,
        op: ExchangeOp,
        world: usize,
        chunk_bytes: usize,
        rank: usize,
        contribution: Contribution,
    ) -> Result<Arc<Exchange>> {
        let mut map = self.lock()?;
        let exchange = Arc::clone(
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(Exchange::new(op, world, chunk_bytes))),
        );

        if exchange.op != op || exchange.world != world || exchange.chunk_bytes != chunk_bytes {
            return Err(ThunkError::group_formation(format!(
                "rendezvous key collision on {key}: registered {} of {} x {}B, joining {} of {} x {}B",
                exchange.op.name(),
                exchange.world,
                exchange.chunk_bytes,
                op.name(),
                world,
                chunk_bytes
            )));
        }

        let mut state = exchange.lock_state()?;
        if state.contributions[rank].is_some() {
            return Err(ThunkError::group_formation(format!(
                "rank {rank} already joined {key}"
            )));
        }
        state.contributions[rank] = Some(contribution);
        state.arrived += 1;
        if state.arrived == world {
            state.sealed = true;
        }
        exchange.arrived_tx.send_replace(state.arrived);
        drop(state);

        Ok(exchange)
    }

    /// Retract `rank`'s contribution after a timeout. Returns the number of
    /// participants that had arrived (including `rank`), or `None` if the
    /// exchange sealed before the withdrawal could happen.
    fn withdraw(
        &self,
        key: &RendezvousKey,
        exchange: &Arc<Exchange>,
        rank: usize,
    ) -> Result<Option<usize>> {
        let mut map = self.lock()?;
        let mut state = exchange.lock_state()?;
        if state.sealed {
            return Ok(None);
        }
        let arrived = state.arrived;
        state.contributions[rank] = None;
        state.arrived -= 1;
        exchange.arrived_tx.send_replace(state.arrived);
        if state.arrived == 0 {
            Self::evict(&mut map, key, exchange);
        }
        Ok(Some(arrived))
    }

    fn depart(&self, key: &RendezvousKey, exchange: &Arc<Exchange>) -> Result<()> {
        let mut map = self.lock()?;
        let mut state = exchange.lock_state()?;
        state.copied += 1;
        exchange.copied_tx.send_replace(state.copied);
        if state.copied == exchange.world {
            Self::evict(&mut map, key, exchange);
        }
        Ok(())
    }

    /// Drop a sealed exchange whose departure barrier never completed.
    fn abandon(&self, key: &RendezvousKey, exchange: &Arc<Exchange>) -> Result<()> {
        let mut map = self.lock()?;
        Self::evict(&mut map, key, exchange);
        Ok(())
    }

    /// Run one participant's side of an exchange.
    ///
    /// # Safety
    /// Every address in `contribution` must stay valid for `chunk_bytes`-sized
    /// reads (sources) or writes (destinations, `chunk_bytes * world` for
    /// all-gather) until this future resolves.
    #[allow(clippy::too_many_arguments)]
    async unsafe fn exchange(
        &self,
        key: &RendezvousKey,
        op: ExchangeOp,
        world: usize,
        chunk_bytes: usize,
        rank: usize,
        contribution: Contribution,
        timeout: Duration,
    ) -> Result<()> {
        let exchange = self.join(key, op, world, chunk_bytes, rank, contribution)?;

        let mut arrived_rx = exchange.arrived_tx.subscribe();
        let all_arrived = tokio::time::timeout(timeout, async {
            arrived_rx.wait_for(|&n| n == world).await.map(|_| ())
        })
        .await;

        match all_arrived {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(ThunkError::transport("exchange closed while waiting")),
            Err(_) => {
                if let Some(arrived) = self.withdraw(key, &exchange, rank)? {
                    tracing::warn!(
                        %key,
                        rank,
                        arrived,
                        world,
                        "{} timed out waiting for participants",
                        op.name()
                    );
                    return Err(ThunkError::CommunicationTimeout {
                        op: op.name(),
                        rank,
                        arrived,
                        world,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                // Sealed right at the deadline: every peer is committed to
                // reading our sources, so we must see the exchange through.
            }
        }

        let copied = exchange.snapshot().map(|peers| {
            let mine = &peers[rank];
            for (i, peer) in peers.iter().enumerate() {
                let (src, dst) = match op {
                    ExchangeOp::AllToAll => (peer.sources[rank], mine.destinations[i]),
                    ExchangeOp::AllGather => (
                        peer.sources[0],
                        mine.destinations[0] + (i * chunk_bytes) as u64,
                    ),
                };
                // SAFETY: the caller of every participant guarantees its
                // addresses stay valid until its exchange resolves, and no
                // participant resolves before all copies are done.
                unsafe {
                    std::ptr::copy(src as *const u8, dst as *mut u8, chunk_bytes);
                }
            }
        });
        // Count this participant out even if the copy failed, so peers are
        // not left at the barrier.
        let departed = self.depart(key, &exchange);
        copied?;
        departed?;

        let mut copied_rx = exchange.copied_tx.subscribe();
        let all_copied = tokio::time::timeout(timeout, async {
            copied_rx.wait_for(|&n| n == world).await.map(|_| ())
        })
        .await;

        match all_copied {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ThunkError::transport("exchange closed while departing")),
            Err(_) => {
                let copied = *copied_rx.borrow();
                self.abandon(key, &exchange)?;
                tracing::warn!(
                    %key,
                    rank,
                    copied,
                    world,
                    "{} timed out waiting for peers to finish copying",
                    op.name()
                );
                Err(ThunkError::CommunicationTimeout {
                    op: op.name(),
                    rank,
                    arrived: copied,
                    world,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// `CollectivesInterface` whose participants are tasks of one process.
#[derive(Default)]
pub struct InProcessCollectives {
    registry: Arc<ExchangeRegistry>,
}

impl InProcessCollectives {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every communicator handed out.
    pub fn registry(&self) -> &Arc<ExchangeRegistry> {
        &self.registry
    }
}

impl CollectivesInterface for InProcessCollectives {
    fn get_communicator(
        &self,
        global_devices: &[GlobalDeviceId],
        rank: usize,
    ) -> Result<Arc<dyn CollectivesCommunicator>> {
        if global_devices.is_empty() {
            return Err(ThunkError::group_formation("empty participant group"));
        }
        if rank >= global_devices.len() {
            return Err(ThunkError::group_formation(format!(
                "rank {rank} out of range for group of {}",
                global_devices.len()
            )));
        }
        let mut seen = HashSet::with_capacity(global_devices.len());
        if let Some(dup) = global_devices.iter().find(|d| !seen.insert(**d)) {
            return Err(ThunkError::group_formation(format!(
                "device {dup} appears twice in participant group"
            )));
        }

        tracing::debug!(rank, world = global_devices.len(), "in-process communicator acquired");
        Ok(Arc::new(InProcessCommunicator {
            registry: Arc::clone(&self.registry),
            devices: global_devices.to_vec(),
            rank,
        }))
    }
}

/// One participant's handle on an `ExchangeRegistry`.
pub struct InProcessCommunicator {
    registry: Arc<ExchangeRegistry>,
    devices: Vec<GlobalDeviceId>,
    rank: usize,
}

impl InProcessCommunicator {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.devices.len()
    }

    fn check_key(&self, key: &RendezvousKey) -> Result<()> {
        if key.global_devices != self.devices {
            return Err(ThunkError::group_formation(format!(
                "{key} does not match communicator group of {} devices",
                self.devices.len()
            )));
        }
        Ok(())
    }
}

impl CollectivesCommunicator for InProcessCommunicator {
    unsafe fn all_to_all<'a>(
        &'a self,
        key: &'a RendezvousKey,
        chunk_bytes: usize,
        sources: &'a [u64],
        destinations: &'a [u64],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_key(key)?;
            let world = self.world_size();
            if sources.len() != world || destinations.len() != world {
                return Err(ThunkError::invalid_op_buffers(
                    "all-to-all",
                    format!(
                        "{} sources and {} destinations for a group of {world}",
                        sources.len(),
                        destinations.len()
                    ),
                ));
            }
            let contribution = Contribution {
                sources: sources.to_vec(),
                destinations: destinations.to_vec(),
            };
            unsafe {
                self.registry.exchange(
                    key,
                    ExchangeOp::AllToAll,
                    world,
                    chunk_bytes,
                    self.rank,
                    contribution,
                    timeout,
                )
            }
            .await
        })
    }

    unsafe fn all_gather<'a>(
        &'a self,
        key: &'a RendezvousKey,
        chunk_bytes: usize,
        source: u64,
        destination: u64,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_key(key)?;
            let contribution = Contribution {
                sources: vec![source],
                destinations: vec![destination],
            };
            unsafe {
                self.registry.exchange(
                    key,
                    ExchangeOp::AllGather,
                    self.world_size(),
                    chunk_bytes,
                    self.rank,
                    contribution,
                    timeout,
                )
            }
            .await
        })
    }
}
