use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use halyard_core::{
    BftHeader, ConsensusMessage, GetEpochRequest, GetEpochResponse, HashSigner, HashVerifier,
    HighQc, LedgerHeader, PublicKey, QuorumCertificate, Validator, VerifiedVertex, Vertex, View,
};
use halyard_storage::{SafetyStateStore, VertexStorePersistence};
use tracing::{debug, info, trace, warn};

use crate::bft_sync::BftSync;
use crate::commands::CommandSource;
use crate::config::BftConfig;
use crate::error::ConsensusError;
use crate::events::{BftEventSink, CommittedUpdate};
use crate::ledger::Ledger;
use crate::net::ConsensusNetwork;
use crate::pacemaker::Pacemaker;
use crate::preprocessor::{BftEvent, BftEventPreProcessor};
use crate::proposer_election::ProposerElection;
use crate::qc::verify_qc;
use crate::reducer::BftEventReducer;
use crate::runner::NodeEvent;
use crate::safety_rules::SafetyRules;
use crate::timer::{ScheduledEvent, Scheduler, TimeSupplier};
use crate::validator_set::ValidatorSet;
use crate::verifier::Verifier;
use crate::vertex_store::VertexStore;

/// Collaborators shared by every epoch of one consensus instance
#[derive(Clone)]
pub struct ConsensusContext {
    pub signer: Arc<dyn HashSigner>,
    pub hash_verifier: Arc<dyn HashVerifier>,
    pub network: Arc<dyn ConsensusNetwork>,
    pub scheduler: Arc<dyn Scheduler>,
    pub commands: Arc<dyn CommandSource>,
    pub sink: Arc<dyn BftEventSink>,
    pub time: Arc<dyn TimeSupplier>,
}

struct EpochState {
    epoch: u64,
    validators: Arc<ValidatorSet>,
    election: Arc<ProposerElection>,
    verifier: Verifier,
    processor: BftEventPreProcessor,
    reported_view: View,
}

/// Runs consensus one epoch at a time. Messages are routed by epoch: older
/// ones are dropped, newer ones wait while the proof that ended the current
/// epoch is fetched. Committing an end-of-epoch vertex, locally or through a
/// proof, moves the instance to the next validator set.
pub struct EpochManager {
    config: BftConfig,
    ctx: ConsensusContext,
    self_key: PublicKey,
    persistence: Box<dyn VertexStorePersistence>,
    state: Option<EpochState>,
    future_events: BTreeMap<u64, Vec<(PublicKey, ConsensusMessage)>>,
    requested_proofs: HashSet<(u64, PublicKey)>,
    epoch_proofs: BTreeMap<u64, QuorumCertificate>,
}

impl EpochManager {
    /// Restore the last persisted vertex tree if there is one, otherwise
    /// begin at `genesis` with `validators`
    pub fn new(
        config: BftConfig,
        ctx: ConsensusContext,
        safety_store: Box<dyn SafetyStateStore>,
        persistence: Box<dyn VertexStorePersistence>,
        mut ledger: Box<dyn Ledger>,
        genesis: LedgerHeader,
        validators: Vec<Validator>,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;
        let self_key = ctx.signer.public_key();

        let (store, validators) = match persistence.load_vertex_store()? {
            Some(saved) => {
                info!(
                    "Restoring epoch {} vertex tree with {} vertices",
                    saved.epoch,
                    saved.vertices.len()
                );
                let root = VerifiedVertex::new(saved.root)?;
                let vertices = saved
                    .vertices
                    .into_iter()
                    .map(VerifiedVertex::new)
                    .collect::<Result<Vec<_>, _>>()?;
                let root_ledger = saved
                    .high_qc
                    .highest_committed_qc()
                    .committed()
                    .map(|header| header.ledger.clone())
                    .ok_or_else(|| {
                        ConsensusError::InvalidRoot("saved root is not committed".to_string())
                    })?;
                ledger.sync_to(&root_ledger)?;
                let store = VertexStore::create(root, saved.high_qc, vertices, ledger)?;
                (store, saved.validators)
            }
            None => {
                let (root, high_qc) = genesis_of(&genesis)?;
                (VertexStore::create(root, high_qc, vec![], ledger)?, validators)
            }
        };

        let epoch = store.epoch();
        let validators = Arc::new(ValidatorSet::new(validators)?);
        let safety = SafetyRules::new(Arc::clone(&ctx.signer), safety_store, epoch)?;

        let mut manager = EpochManager {
            config,
            ctx,
            self_key,
            persistence,
            state: None,
            future_events: BTreeMap::new(),
            requested_proofs: HashSet::new(),
            epoch_proofs: BTreeMap::new(),
        };
        manager.state = Some(manager.build_epoch(validators, store, safety));
        Ok(manager)
    }

    fn build_epoch(
        &self,
        validators: Arc<ValidatorSet>,
        store: VertexStore,
        safety: SafetyRules,
    ) -> EpochState {
        let epoch = store.epoch();
        let election = Arc::new(ProposerElection::new(&validators));
        let pacemaker = Pacemaker::new(
            self.self_key,
            epoch,
            Arc::clone(&validators),
            Arc::clone(&election),
            &self.config,
            Arc::clone(&self.ctx.network),
            Arc::clone(&self.ctx.scheduler),
            Arc::clone(&self.ctx.commands),
            Arc::clone(&self.ctx.time),
        );
        let reducer = BftEventReducer::new(
            self.self_key,
            store,
            pacemaker,
            safety,
            Arc::clone(&validators),
            Arc::clone(&election),
            Arc::clone(&self.ctx.network),
            Arc::clone(&self.ctx.time),
        );
        let sync = BftSync::new(
            self.self_key,
            epoch,
            Arc::clone(&validators),
            Arc::clone(&self.ctx.hash_verifier),
            Arc::clone(&self.ctx.network),
            Arc::clone(&self.ctx.scheduler),
            Duration::from_millis(self.config.sync_patience_ms),
        );
        let verifier = Verifier::new(
            epoch,
            Arc::clone(&validators),
            Arc::clone(&election),
            Arc::clone(&self.ctx.hash_verifier),
        );

        EpochState {
            epoch,
            validators,
            election,
            verifier,
            processor: BftEventPreProcessor::new(reducer, sync, self.config.max_future_views),
            reported_view: View::genesis(),
        }
    }

    pub fn self_key(&self) -> PublicKey {
        self.self_key
    }

    pub fn epoch(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.epoch)
    }

    pub fn current_view(&self) -> Option<View> {
        self.state.as_ref().map(|s| s.processor.current_view())
    }

    pub fn validators(&self) -> Option<&ValidatorSet> {
        self.state.as_ref().map(|s| s.validators.as_ref())
    }

    pub fn vertex_store(&self) -> Option<&VertexStore> {
        self.state
            .as_ref()
            .map(|s| s.processor.reducer().vertex_store())
    }

    pub fn safety_rules(&self) -> Option<&SafetyRules> {
        self.state
            .as_ref()
            .map(|s| s.processor.reducer().safety_rules())
    }

    pub fn queued_future_events(&self) -> usize {
        self.future_events.values().map(Vec::len).sum()
    }

    /// Enter the first view of the current epoch
    pub fn start(&mut self) -> Result<(), ConsensusError> {
        if let Some(state) = self.state.as_mut() {
            info!(
                "Starting consensus in epoch {} with {} validators",
                state.epoch,
                state.validators.len()
            );
            state.processor.start()?;
        }
        self.after_event()
    }

    pub fn handle(&mut self, event: NodeEvent) -> Result<(), ConsensusError> {
        let result = match event {
            NodeEvent::Message { from, message } => self.process_message(from, message),
            NodeEvent::Scheduled(scheduled) => self.process_scheduled(scheduled),
        };
        self.after_event()?;
        result
    }

    fn process_scheduled(&mut self, event: ScheduledEvent) -> Result<(), ConsensusError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        match event {
            ScheduledEvent::LocalTimeout { epoch, view, count } if epoch == state.epoch => {
                state.processor.process_local_timeout(view, count)
            }
            ScheduledEvent::SyncTimeout {
                epoch,
                request,
                peer,
            } if epoch == state.epoch => state.processor.process_sync_timeout(request, peer),
            other => {
                trace!("Ignoring scheduled event from another epoch: {:?}", other);
                Ok(())
            }
        }
    }

    fn process_message(
        &mut self,
        from: PublicKey,
        message: ConsensusMessage,
    ) -> Result<(), ConsensusError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        trace!("Received {} from {}", message.kind(), from);

        let event = match message {
            ConsensusMessage::Proposal(proposal) => BftEvent::Proposal(proposal),
            ConsensusMessage::Vote(vote) => BftEvent::Vote(vote),
            ConsensusMessage::ViewTimeout(timeout) => BftEvent::ViewTimeout(timeout),
            ConsensusMessage::GetVerticesRequest(request) => {
                let response = state.processor.respond_to_request(request);
                self.ctx.network.send(from, response);
                return Ok(());
            }
            ConsensusMessage::GetVerticesResponse(response) => {
                return state.processor.process_sync_response(from, response);
            }
            ConsensusMessage::GetVerticesErrorResponse(response) => {
                return state.processor.process_sync_error(from, response);
            }
            ConsensusMessage::GetEpochRequest(request) => {
                let proof = self.epoch_proofs.get(&request.epoch).cloned();
                self.ctx.network.send(
                    from,
                    ConsensusMessage::GetEpochResponse(GetEpochResponse {
                        epoch: request.epoch,
                        proof,
                    }),
                );
                return Ok(());
            }
            ConsensusMessage::GetEpochResponse(response) => {
                return self.process_epoch_response(from, response);
            }
        };

        let epoch = event.epoch();
        if epoch < state.epoch {
            trace!("Dropping {} from past epoch {}", event.kind(), epoch);
            return Ok(());
        }
        if epoch > state.epoch {
            let current = state.epoch;
            self.queue_future_event(from, epoch, event.into_message());
            self.request_epoch_proof(current, from);
            return Ok(());
        }

        let verified = match &event {
            BftEvent::Proposal(p) => state.verifier.verify_proposal(p),
            BftEvent::Vote(v) => state.verifier.verify_vote(v),
            BftEvent::ViewTimeout(t) => state.verifier.verify_view_timeout(t),
        };
        if let Err(e) = verified {
            debug!("Dropping invalid {} from {}: {}", event.kind(), from, e);
            return Ok(());
        }
        state.processor.process_event(event)
    }

    fn queue_future_event(&mut self, from: PublicKey, epoch: u64, message: ConsensusMessage) {
        if self.queued_future_events() >= self.config.max_queued_epoch_events {
            debug!(
                "Future epoch queue full, dropping {} for epoch {}",
                message.kind(),
                epoch
            );
            return;
        }
        trace!("Holding {} for epoch {}", message.kind(), epoch);
        self.future_events
            .entry(epoch)
            .or_default()
            .push((from, message));
    }

    fn request_epoch_proof(&mut self, epoch: u64, peer: PublicKey) {
        if peer == self.self_key || !self.requested_proofs.insert((epoch, peer)) {
            return;
        }
        info!("Peer {} is past epoch {}, requesting its proof", peer, epoch);
        self.ctx.network.send(
            peer,
            ConsensusMessage::GetEpochRequest(GetEpochRequest { epoch }),
        );
    }

    fn process_epoch_response(
        &mut self,
        from: PublicKey,
        response: GetEpochResponse,
    ) -> Result<(), ConsensusError> {
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };
        let Some(proof) = response.proof else {
            debug!("Peer {} has no proof for epoch {}", from, response.epoch);
            return Ok(());
        };
        if response.epoch != state.epoch {
            trace!("Ignoring proof for epoch {}", response.epoch);
            return Ok(());
        }

        let end_of_epoch = match proof.committed() {
            Some(header) if header.ledger.epoch == state.epoch && header.ledger.is_end_of_epoch() => {
                header.ledger.clone()
            }
            _ => {
                warn!(
                    "Epoch proof from {} does not commit the end of epoch {}",
                    from, state.epoch
                );
                return Ok(());
            }
        };
        if let Err(e) = verify_qc(&proof, &state.validators, self.ctx.hash_verifier.as_ref()) {
            warn!("Invalid epoch proof from {}: {}", from, e);
            return Ok(());
        }

        info!(
            "Verified proof that epoch {} ended at view {}",
            state.epoch, end_of_epoch.view
        );
        let Some(state) = self.state.take() else {
            return Ok(());
        };
        let (safety, mut ledger) = state.processor.into_reducer().into_parts();
        ledger
            .sync_to(&end_of_epoch)
            .map_err(ConsensusError::LedgerCommit)?;
        self.enter_next_epoch(end_of_epoch, proof, safety, ledger)
    }

    /// The previous epoch's state is already gone at this point, so any
    /// failure here leaves the instance unable to continue
    fn enter_next_epoch(
        &mut self,
        end_of_epoch: LedgerHeader,
        proof: QuorumCertificate,
        safety: SafetyRules,
        ledger: Box<dyn Ledger>,
    ) -> Result<(), ConsensusError> {
        let epoch = end_of_epoch.epoch;
        self.try_enter_next_epoch(end_of_epoch, proof, safety, ledger)
            .map_err(|e| {
                if e.is_fatal() {
                    e
                } else {
                    ConsensusError::InvalidRoot(format!("cannot leave epoch {}: {}", epoch, e))
                }
            })
    }

    fn try_enter_next_epoch(
        &mut self,
        end_of_epoch: LedgerHeader,
        proof: QuorumCertificate,
        mut safety: SafetyRules,
        mut ledger: Box<dyn Ledger>,
    ) -> Result<(), ConsensusError> {
        let (Some(genesis), Some(next_validators)) = (
            end_of_epoch.next_epoch_genesis(),
            end_of_epoch.next_validators.clone(),
        ) else {
            return Err(ConsensusError::InvalidRoot(format!(
                "epoch {} ended without a next validator set",
                end_of_epoch.epoch
            )));
        };

        self.epoch_proofs.insert(end_of_epoch.epoch, proof);
        let validators = Arc::new(ValidatorSet::new(next_validators)?);
        let (root, high_qc) = genesis_of(&genesis)?;
        ledger.sync_to(&genesis)?;
        let store = VertexStore::create(root, high_qc, vec![], ledger)?;
        safety.reset_for_epoch(genesis.epoch)?;

        info!(
            "Entering epoch {} with {} validators (total weight {})",
            genesis.epoch,
            validators.len(),
            validators.total_weight()
        );
        self.ctx.sink.on_epoch_changed(genesis.epoch, &validators);

        let mut state = self.build_epoch(validators, store, safety);
        state.processor.start()?;
        self.state = Some(state);

        self.requested_proofs.retain(|(epoch, _)| *epoch >= genesis.epoch);
        self.future_events = self.future_events.split_off(&genesis.epoch);
        if let Some(events) = self.future_events.remove(&genesis.epoch) {
            debug!("Replaying {} events held for epoch {}", events.len(), genesis.epoch);
            for (from, message) in events {
                if let Err(e) = self.process_message(from, message) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    debug!("Dropped replayed event: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Publish commits and view changes, persist the tree if it changed,
    /// and switch epoch once the root closes the current one
    fn after_event(&mut self) -> Result<(), ConsensusError> {
        loop {
            let Some(state) = self.state.as_mut() else {
                return Ok(());
            };

            let store = state.processor.reducer_mut().vertex_store_mut();
            let committed = store.take_committed();
            if !committed.is_empty() {
                self.ctx
                    .sink
                    .on_committed(&CommittedUpdate { vertices: committed });
            }
            if store.take_dirty() {
                let snapshot = store.to_state(state.validators.validators());
                self.persistence.save_vertex_store(&snapshot)?;
            }
            let end_of_epoch = store.root_ledger().is_end_of_epoch();

            let view = state.processor.current_view();
            if view != state.reported_view {
                state.reported_view = view;
                self.ctx
                    .sink
                    .on_view_changed(state.epoch, view, state.election.leader(view));
            }

            if !end_of_epoch {
                return Ok(());
            }

            let Some(state) = self.state.take() else {
                return Ok(());
            };
            let store = state.processor.reducer().vertex_store();
            let end_header = store.root_ledger().clone();
            let proof = store.highest_committed_qc().clone();
            let (safety, ledger) = state.processor.into_reducer().into_parts();
            self.enter_next_epoch(end_header, proof, safety, ledger)?;
        }
    }
}

/// Root vertex and certificates an epoch starts from
fn genesis_of(header: &LedgerHeader) -> Result<(VerifiedVertex, HighQc), ConsensusError> {
    let root = VerifiedVertex::new(Vertex::genesis(header))?;
    let qc = QuorumCertificate::genesis(BftHeader::new(View::genesis(), root.id(), header.clone()));
    Ok((root, HighQc::from_genesis(qc)))
}
