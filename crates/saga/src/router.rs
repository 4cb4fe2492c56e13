//! Routes messages to the single live worker of each global transaction.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use common::GlobalTxId;
use event_store::EventStore;
use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::actor::{SagaActor, SagaContext};
use crate::channel::CompensationChannel;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::machine::{SagaMessage, SagaStateMachine};
use crate::settings::SagaSettings;
use crate::sink::SagaDataSink;

struct WorkerHandle {
    generation: u64,
    tx: mpsc::UnboundedSender<SagaMessage>,
    task: JoinHandle<()>,
}

type Shard = Mutex<HashMap<GlobalTxId, WorkerHandle>>;

struct RouterInner {
    ctx: Arc<SagaContext>,
    shards: Vec<Shard>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

/// Entry point for inbound events.
///
/// Keeps at most one live worker per global transaction. Workers are
/// created on first contact, recover from the journal, and remove
/// themselves from their shard when the saga terminates or goes idle.
#[derive(Clone)]
pub struct SagaRouter {
    inner: Arc<RouterInner>,
}

impl SagaRouter {
    pub fn new(
        store: Arc<dyn EventStore>,
        channel: Arc<dyn CompensationChannel>,
        sink: Arc<dyn SagaDataSink>,
        settings: SagaSettings,
    ) -> Self {
        let shard_count = settings.shards.max(1);
        let ctx = Arc::new(SagaContext {
            store,
            channel,
            sink,
            machine: SagaStateMachine::new(settings),
        });

        Self {
            inner: Arc::new(RouterInner {
                ctx,
                shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
                next_generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Delivers an inbound event to its saga, creating the worker if needed.
    ///
    /// Returns once the event is queued; the outcome is observable through
    /// the sink.
    #[tracing::instrument(skip(self, event), fields(global_tx_id = %event.global_tx_id(), event_type = event.event_type()))]
    pub async fn tell(&self, event: SagaEvent) -> Result<()> {
        event.validate()?;
        let global_tx_id = event.global_tx_id().clone();
        self.inner
            .deliver(global_tx_id, SagaMessage::Event(event))
            .await
    }

    /// Starts a worker for every journal left in the store, so deadlines
    /// and retries resume after a restart. Returns how many were started.
    #[tracing::instrument(skip(self))]
    pub async fn recover_all(&self) -> Result<usize> {
        let streams = self.inner.ctx.store.list_streams().await?;
        let mut started = 0;
        for global_tx_id in streams {
            if self.inner.ensure_worker(global_tx_id).await? {
                started += 1;
            }
        }
        tracing::info!(started, "saga workers recovered");
        Ok(started)
    }

    /// Number of live workers.
    pub async fn live_count(&self) -> usize {
        let mut count = 0;
        for shard in &self.inner.shards {
            count += shard.lock().await.len();
        }
        count
    }

    /// Returns true if a worker is live for the transaction.
    pub async fn is_live(&self, global_tx_id: &GlobalTxId) -> bool {
        self.inner
            .shard(global_tx_id)
            .lock()
            .await
            .contains_key(global_tx_id)
    }

    /// Stops all workers and waits for them. Journals are kept.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        let mut tasks = Vec::new();
        for shard in &self.inner.shards {
            // Dropping the sender lets each worker drain its queue and exit
            tasks.extend(shard.lock().await.drain().map(|(_, handle)| handle.task));
        }

        let count = tasks.len();
        join_all(tasks).await;
        tracing::info!(count, "saga router shut down");
    }
}

impl RouterInner {
    fn shard(&self, global_tx_id: &GlobalTxId) -> &Shard {
        let mut hasher = DefaultHasher::new();
        global_tx_id.hash(&mut hasher);
        &self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
    }

    async fn deliver(self: &Arc<Self>, global_tx_id: GlobalTxId, message: SagaMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SagaError::RouterClosed);
        }

        let mut workers = self.shard(&global_tx_id).lock().await;

        let message = match workers.get(&global_tx_id) {
            Some(handle) => match handle.tx.send(message) {
                Ok(()) => return Ok(()),
                // The worker stopped without releasing itself (panicked)
                Err(mpsc::error::SendError(message)) => {
                    tracing::warn!(%global_tx_id, "evicting dead saga worker");
                    workers.remove(&global_tx_id);
                    message
                }
            },
            None => message,
        };

        let handle = self.spawn_worker(global_tx_id.clone(), vec![message]);
        workers.insert(global_tx_id, handle);
        Ok(())
    }

    /// Spawns a worker with no message, unless one is already live.
    async fn ensure_worker(self: &Arc<Self>, global_tx_id: GlobalTxId) -> Result<bool> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SagaError::RouterClosed);
        }

        let mut workers = self.shard(&global_tx_id).lock().await;
        if workers.contains_key(&global_tx_id) {
            return Ok(false);
        }
        let handle = self.spawn_worker(global_tx_id.clone(), Vec::new());
        workers.insert(global_tx_id, handle);
        Ok(true)
    }

    /// Must be called with the shard lock held.
    fn spawn_worker(self: &Arc<Self>, global_tx_id: GlobalTxId, backlog: Vec<SagaMessage>) -> WorkerHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        for message in backlog {
            // The receiver is alive, so this cannot fail
            let _ = tx.send(message);
        }

        let actor = SagaActor::new(global_tx_id.clone(), self.ctx.clone(), tx.downgrade());
        let router = Arc::clone(self);
        let task = tokio::spawn(async move {
            let rx = actor.run(rx).await;
            router.release(global_tx_id, generation, rx).await;
        });

        WorkerHandle {
            generation,
            tx,
            task,
        }
    }

    /// Removes a stopped worker from its shard. Anything still queued for
    /// it goes to a fresh worker, in order.
    async fn release(
        self: Arc<Self>,
        global_tx_id: GlobalTxId,
        generation: u64,
        mut rx: mpsc::UnboundedReceiver<SagaMessage>,
    ) {
        let mut workers = self.shard(&global_tx_id).lock().await;

        let current = workers
            .get(&global_tx_id)
            .is_some_and(|handle| handle.generation == generation);
        if !current {
            return;
        }
        workers.remove(&global_tx_id);

        rx.close();
        let mut backlog = Vec::new();
        while let Ok(message) = rx.try_recv() {
            backlog.push(message);
        }

        if backlog.is_empty() || self.closed.load(Ordering::SeqCst) {
            return;
        }

        tracing::debug!(%global_tx_id, pending = backlog.len(), "handing queued messages to a new worker");
        let handle = self.spawn_worker(global_tx_id.clone(), backlog);
        workers.insert(global_tx_id, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OmegaRegistry;
    use crate::sink::InMemorySagaDataRepository;
    use event_store::InMemoryEventStore;

    fn router(shards: usize) -> SagaRouter {
        SagaRouter::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(OmegaRegistry::new()),
            Arc::new(InMemorySagaDataRepository::new()),
            SagaSettings {
                shards,
                ..SagaSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn shard_is_stable_per_transaction() {
        let router = router(10);
        let gtx = GlobalTxId::from("gtx-42");
        let first = router.inner.shard(&gtx) as *const Shard;
        let second = router.inner.shard(&gtx) as *const Shard;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn zero_shards_falls_back_to_one() {
        let router = router(0);
        assert_eq!(router.inner.shards.len(), 1);
    }

    #[tokio::test]
    async fn tell_rejects_invalid_event() {
        let router = router(4);
        let event = SagaEvent::saga_ended(crate::events::EventHeader::new("", "svc", "svc-1"));
        assert!(matches!(
            router.tell(event).await,
            Err(SagaError::InvalidEvent(_))
        ));
        assert_eq!(router.live_count().await, 0);
    }

    #[tokio::test]
    async fn tell_after_shutdown_fails() {
        let router = router(4);
        router.shutdown().await;
        let event = SagaEvent::saga_ended(crate::events::EventHeader::new("gtx", "svc", "svc-1"));
        assert!(matches!(
            router.tell(event).await,
            Err(SagaError::RouterClosed)
        ));
    }
}
