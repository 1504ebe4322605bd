use std::sync::Arc;

use anyhow::{anyhow, Result};
use halyard_consensus::{
    run_event_loop, AccumulatorLedger, ConsensusContext, EpochManager, NodeEvent,
    SystemTimeSupplier, TokioScheduler,
};
use halyard_core::{Ed25519Verifier, KeyPair};
use halyard_storage::{ConsensusStore, FileStorage};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::NodeConfig;
use crate::http::{create_router, AppState};
use crate::pool::CommandPool;
use crate::status::StatusSink;
use crate::transport::HttpNetwork;

const SAFETY_FILE: &str = "safety.bin";
const VERTICES_FILE: &str = "vertices.bin";

/// The Halyard validator node
pub struct Node {
    config: NodeConfig,
    keypair: KeyPair,
}

impl Node {
    /// Create a new node from configuration
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let keypair = config.keypair()?;
        Ok(Node { config, keypair })
    }

    pub fn public_key(&self) -> halyard_core::PublicKey {
        self.keypair.public
    }

    /// Build the consensus instance and the HTTP state feeding it
    fn assemble(
        &self,
        tx: mpsc::UnboundedSender<NodeEvent>,
    ) -> Result<(EpochManager, Arc<AppState>)> {
        let config = &self.config;
        std::fs::create_dir_all(&config.data_dir)?;
        let validators = config.genesis_validators()?;

        let pool = Arc::new(CommandPool::new(config.pool_max_size));
        let sink = Arc::new(StatusSink::new(
            self.keypair.public,
            validators.len(),
            Arc::clone(&pool),
        ));
        let network = HttpNetwork::new(self.keypair.public, config.peer_addresses()?, tx.clone());

        let ctx = ConsensusContext {
            signer: Arc::new(self.keypair.clone()),
            hash_verifier: Arc::new(Ed25519Verifier),
            network: Arc::new(network),
            scheduler: Arc::new(TokioScheduler::new(tx.clone())),
            commands: pool.clone(),
            sink: sink.clone(),
            time: Arc::new(SystemTimeSupplier),
        };

        let safety_store = ConsensusStore::new(FileStorage::open(config.data_dir.join(SAFETY_FILE))?);
        let vertex_store =
            ConsensusStore::new(FileStorage::open(config.data_dir.join(VERTICES_FILE))?);
        let ledger = AccumulatorLedger::new(
            config.genesis_header(),
            validators.clone(),
            config.epoch_max_view(),
        );

        let manager = EpochManager::new(
            config.consensus.clone(),
            ctx,
            Box::new(safety_store),
            Box::new(vertex_store),
            Box::new(ledger),
            config.genesis_header(),
            validators.clone(),
        )?;

        let app_state = Arc::new(AppState {
            events: tx,
            pool,
            status: sink.status(),
            validators: validators.iter().map(|v| v.key).collect(),
        });
        Ok((manager, app_state))
    }

    /// Run the node until consensus stops or the process is interrupted
    pub async fn run(self) -> Result<()> {
        info!("Starting Halyard validator {}", self.keypair.public);

        let (tx, rx) = mpsc::unbounded_channel();
        let (manager, app_state) = self.assemble(tx)?;
        let router = create_router(app_state);

        let addr = self.config.bind_addr;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Listening on {}", addr);

        let mut consensus = tokio::spawn(run_event_loop(manager, rx));
        let server = async move { axum::serve(listener, router).await };

        tokio::select! {
            result = &mut consensus => {
                match result {
                    Ok(Ok(())) => info!("Consensus stopped"),
                    Ok(Err(e)) => {
                        error!("Consensus halted: {}", e);
                        return Err(anyhow!(e));
                    }
                    Err(e) => return Err(anyhow!("consensus task failed: {}", e)),
                }
            }
            result = server => {
                if let Err(e) = result {
                    error!("HTTP server error: {}", e);
                    return Err(e.into());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
            }
        }
        consensus.abort();
        Ok(())
    }
}
