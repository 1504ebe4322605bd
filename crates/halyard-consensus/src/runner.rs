use std::time::Duration;

use halyard_core::{ConsensusMessage, PublicKey};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::epoch_manager::EpochManager;
use crate::error::ConsensusError;
use crate::timer::{ScheduledEvent, Scheduler};

/// Everything the consensus event loop consumes, in arrival order
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Message {
        from: PublicKey,
        message: ConsensusMessage,
    },
    Scheduled(ScheduledEvent),
}

/// Delivers scheduled events back into the event channel after their delay
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl TokioScheduler {
    pub fn new(tx: mpsc::UnboundedSender<NodeEvent>) -> Self {
        TokioScheduler { tx }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, event: ScheduledEvent, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(NodeEvent::Scheduled(event)).is_err() {
                trace!("Event loop gone, dropping scheduled event");
            }
        });
    }
}

/// Run one consensus instance until the event channel closes or a fatal
/// error occurs. Recoverable errors drop the offending event.
pub async fn run_event_loop(
    mut manager: EpochManager,
    mut rx: mpsc::UnboundedReceiver<NodeEvent>,
) -> Result<(), ConsensusError> {
    if let Err(e) = manager.start() {
        error!("Consensus failed to start: {}", e);
        return Err(e);
    }

    while let Some(event) = rx.recv().await {
        if let Err(e) = manager.handle(event) {
            if e.is_fatal() {
                error!("Fatal consensus error, stopping: {}", e);
                return Err(e);
            }
            debug!("Dropped event: {}", e);
        }
    }

    info!("Event channel closed, consensus stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::EmptyCommandSource;
    use crate::config::BftConfig;
    use crate::epoch_manager::ConsensusContext;
    use crate::events::{BftEventSink, CommittedUpdate};
    use crate::ledger::AccumulatorLedger;
    use crate::net::ConsensusNetwork;
    use crate::test_utils::genesis_ledger;
    use crate::timer::SystemTimeSupplier;
    use halyard_core::{Ed25519Verifier, KeyPair, Validator, VertexStoreState, View};
    use halyard_storage::{
        ConsensusStore, MemoryStorage, StorageError, VertexStorePersistence,
    };
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct Loopback {
        tx: mpsc::UnboundedSender<NodeEvent>,
        me: PublicKey,
    }

    impl ConsensusNetwork for Loopback {
        fn send(&self, _to: PublicKey, message: ConsensusMessage) {
            let _ = self.tx.send(NodeEvent::Message {
                from: self.me,
                message,
            });
        }
    }

    #[derive(Default)]
    struct CountingSink(AtomicU64);

    impl BftEventSink for CountingSink {
        fn on_committed(&self, update: &CommittedUpdate) {
            self.0.fetch_add(update.vertices.len() as u64, Ordering::SeqCst);
        }
    }

    struct BrokenPersistence;

    impl VertexStorePersistence for BrokenPersistence {
        fn load_vertex_store(&self) -> Result<Option<VertexStoreState>, StorageError> {
            Ok(None)
        }

        fn save_vertex_store(&mut self, _state: &VertexStoreState) -> Result<(), StorageError> {
            Err(std::io::Error::other("disk full").into())
        }
    }

    fn solo_manager(
        persistence: Box<dyn VertexStorePersistence>,
    ) -> (EpochManager, mpsc::UnboundedReceiver<NodeEvent>, Arc<CountingSink>) {
        let kp = KeyPair::from_seed(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(CountingSink::default());
        let validators = vec![Validator::new(kp.public, 1)];
        let ctx = ConsensusContext {
            signer: Arc::new(kp.clone()),
            hash_verifier: Arc::new(Ed25519Verifier),
            network: Arc::new(Loopback {
                tx: tx.clone(),
                me: kp.public,
            }),
            scheduler: Arc::new(TokioScheduler::new(tx)),
            commands: Arc::new(EmptyCommandSource),
            sink: sink.clone(),
            time: Arc::new(SystemTimeSupplier),
        };
        let manager = EpochManager::new(
            BftConfig::default(),
            ctx,
            Box::new(ConsensusStore::new(MemoryStorage::new())),
            persistence,
            Box::new(AccumulatorLedger::new(genesis_ledger(0), validators.clone(), None)),
            genesis_ledger(0),
            validators,
        )
        .unwrap();
        (manager, rx, sink)
    }

    #[tokio::test]
    async fn test_scheduler_delivers_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(tx);
        let event = ScheduledEvent::LocalTimeout {
            epoch: 0,
            view: View(4),
            count: 0,
        };
        scheduler.schedule(event.clone(), Duration::from_millis(5));

        match rx.recv().await {
            Some(NodeEvent::Scheduled(received)) => assert_eq!(received, event),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_validator_commits() {
        let (manager, rx, sink) =
            solo_manager(Box::new(ConsensusStore::new(MemoryStorage::new())));
        let handle = tokio::spawn(run_event_loop(manager, rx));

        let committed = tokio::time::timeout(Duration::from_secs(10), async {
            while sink.0.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        handle.abort();
        assert!(committed.is_ok(), "no commits within the deadline");
    }

    #[tokio::test]
    async fn test_persistence_failure_stops_loop() {
        let (manager, rx, _) = solo_manager(Box::new(BrokenPersistence));
        let result = run_event_loop(manager, rx).await;
        assert!(matches!(result, Err(ConsensusError::Storage(_))));
    }
}
