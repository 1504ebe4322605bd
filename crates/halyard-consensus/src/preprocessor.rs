use std::collections::BTreeMap;

use halyard_core::{
    ConsensusMessage, GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, Hash,
    HighQc, Proposal, PublicKey, View, ViewTimeout, Vote,
};
use tracing::{debug, trace};

use crate::bft_sync::{respond_to_request, BftSync, SyncResult};
use crate::error::ConsensusError;
use crate::reducer::{BftEventReducer, ReducerOutcome};

/// A verified consensus event on its way to the reducer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BftEvent {
    Proposal(Proposal),
    Vote(Vote),
    ViewTimeout(ViewTimeout),
}

impl BftEvent {
    pub fn view(&self) -> View {
        match self {
            BftEvent::Proposal(p) => p.view(),
            BftEvent::Vote(v) => v.view(),
            BftEvent::ViewTimeout(t) => t.view,
        }
    }

    pub fn epoch(&self) -> u64 {
        match self {
            BftEvent::Proposal(p) => p.epoch(),
            BftEvent::Vote(v) => v.epoch(),
            BftEvent::ViewTimeout(t) => t.epoch,
        }
    }

    pub fn author(&self) -> Option<PublicKey> {
        match self {
            BftEvent::Proposal(p) => p.author(),
            BftEvent::Vote(v) => Some(v.author),
            BftEvent::ViewTimeout(t) => Some(t.author),
        }
    }

    pub fn high_qc(&self) -> Option<HighQc> {
        match self {
            BftEvent::Proposal(p) => p.high_qc(),
            BftEvent::Vote(v) => Some(v.high_qc.clone()),
            BftEvent::ViewTimeout(t) => Some(t.high_qc.clone()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BftEvent::Proposal(_) => "proposal",
            BftEvent::Vote(_) => "vote",
            BftEvent::ViewTimeout(_) => "view_timeout",
        }
    }

    pub fn into_message(self) -> ConsensusMessage {
        match self {
            BftEvent::Proposal(p) => ConsensusMessage::Proposal(p),
            BftEvent::Vote(v) => ConsensusMessage::Vote(v),
            BftEvent::ViewTimeout(t) => ConsensusMessage::ViewTimeout(t),
        }
    }
}

enum Processing {
    Done,
    /// Waiting on the sync of this vertex
    Pending(Hash),
}

struct Queued {
    event: BftEvent,
    sync_id: Hash,
}

/// Cache slot of a future-view event: one per author and event kind
type CacheSlot = (PublicKey, &'static str);

/// Holds events back until the vertices their QCs reference are in the
/// store and the pacemaker reaches their view.
///
/// Each author has at most one event waiting on a sync, and at most one
/// event of each kind waiting for a future view. A newer event from the
/// same author takes its place; an older one is dropped. Events more than
/// `max_future_views` ahead of the current view are not held at all.
pub struct BftEventPreProcessor {
    reducer: BftEventReducer,
    sync: BftSync,
    max_future_views: u64,
    queues: BTreeMap<PublicKey, Queued>,
    view_cache: BTreeMap<CacheSlot, BftEvent>,
}

impl BftEventPreProcessor {
    pub fn new(reducer: BftEventReducer, sync: BftSync, max_future_views: u64) -> Self {
        BftEventPreProcessor {
            reducer,
            sync,
            max_future_views,
            queues: BTreeMap::new(),
            view_cache: BTreeMap::new(),
        }
    }

    pub fn start(&mut self) -> Result<(), ConsensusError> {
        self.reducer.start()?;
        self.drain_view_cache()
    }

    pub fn current_view(&self) -> View {
        self.reducer.current_view()
    }

    pub fn reducer(&self) -> &BftEventReducer {
        &self.reducer
    }

    pub fn reducer_mut(&mut self) -> &mut BftEventReducer {
        &mut self.reducer
    }

    pub fn into_reducer(self) -> BftEventReducer {
        self.reducer
    }

    pub fn queued_events(&self) -> usize {
        self.queues.len()
    }

    pub fn cached_events(&self) -> usize {
        self.view_cache.len()
    }

    pub fn process_event(&mut self, event: BftEvent) -> Result<(), ConsensusError> {
        let Some(author) = event.author() else {
            return Ok(());
        };

        if let Some(queued) = self.queues.get(&author) {
            if queued.event.view() > event.view() {
                debug!(
                    "Dropping {} for view {} from {}, newer event already queued",
                    event.kind(),
                    event.view(),
                    author
                );
                return Ok(());
            }
            self.queues.remove(&author);
        }

        if let Processing::Pending(sync_id) = self.process_internal(event.clone())? {
            self.queues.insert(author, Queued { event, sync_id });
        }
        self.drain_view_cache()
    }

    fn process_internal(&mut self, event: BftEvent) -> Result<Processing, ConsensusError> {
        if event.view() < self.current_view() {
            trace!(
                "Discarding {} for past view {} (current {})",
                event.kind(),
                event.view(),
                self.current_view()
            );
            return Ok(Processing::Done);
        }
        let (Some(high_qc), Some(author)) = (event.high_qc(), event.author()) else {
            return Ok(Processing::Done);
        };
        let sync_id = high_qc.highest_qc().proposed().vertex_id;

        let result = tolerate(
            self.sync
                .sync_to_qc(high_qc, author, self.reducer.vertex_store_mut()),
            "sync",
        )?;
        match result {
            Some(SyncResult::AlreadySynced) => {}
            Some(SyncResult::SyncInProgress) => {
                debug!(
                    "Queueing {} for view {} from {} until {} is synced",
                    event.kind(),
                    event.view(),
                    author,
                    sync_id.short()
                );
                return Ok(Processing::Pending(sync_id));
            }
            Some(SyncResult::Invalid) | None => return Ok(Processing::Done),
        }

        self.reducer.process_high_qc()?;
        if self.reducer.vertex_store().root_ledger().is_end_of_epoch() {
            trace!("Epoch has ended, not forwarding {}", event.kind());
            return Ok(Processing::Done);
        }

        let current = self.current_view();
        if event.view() == current {
            self.forward(event)?;
        } else if event.view() > current {
            self.cache_future_event(author, event);
        }
        Ok(Processing::Done)
    }

    fn cache_future_event(&mut self, author: PublicKey, event: BftEvent) {
        let current = self.current_view();
        if event.view().0 > current.0.saturating_add(self.max_future_views) {
            debug!(
                "Dropping {} for view {} from {}, too far ahead of view {}",
                event.kind(),
                event.view(),
                author,
                current
            );
            return;
        }
        let slot = (author, event.kind());
        if let Some(cached) = self.view_cache.get(&slot) {
            if cached.view() >= event.view() {
                trace!(
                    "Keeping cached {} for view {} from {}",
                    cached.kind(),
                    cached.view(),
                    author
                );
                return;
            }
        }
        trace!("Caching {} for future view {}", event.kind(), event.view());
        self.view_cache.insert(slot, event);
    }

    fn forward(&mut self, event: BftEvent) -> Result<(), ConsensusError> {
        match event {
            BftEvent::Proposal(proposal) => {
                tolerate(self.reducer.process_proposal(&proposal), "proposal")?;
            }
            BftEvent::Vote(vote) => {
                let outcome = tolerate(self.reducer.process_vote(&vote), "vote")?;
                if let Some(ReducerOutcome::SyncRequired { high_qc, author }) = outcome {
                    tolerate(
                        self.sync
                            .sync_to_qc(high_qc, author, self.reducer.vertex_store_mut()),
                        "sync",
                    )?;
                }
            }
            BftEvent::ViewTimeout(timeout) => {
                tolerate(self.reducer.process_view_timeout(&timeout), "view timeout")?;
            }
        }
        Ok(())
    }

    fn drain_view_cache(&mut self) -> Result<(), ConsensusError> {
        loop {
            let current = self.current_view();
            self.view_cache.retain(|_, event| event.view() >= current);
            let mut ready: Vec<CacheSlot> = self
                .view_cache
                .iter()
                .filter(|(_, event)| event.view() == current)
                .map(|(slot, _)| *slot)
                .collect();
            if ready.is_empty() {
                return Ok(());
            }
            // Proposals first so votes for them find the vertex
            ready.sort_by_key(|(_, kind)| *kind != "proposal");
            for slot in ready {
                let Some(event) = self.view_cache.remove(&slot) else {
                    continue;
                };
                if event.view() == self.current_view() {
                    self.forward(event)?;
                }
            }
        }
    }

    /// Re-run every queued event whose sync is no longer running
    fn retry_queues(&mut self) -> Result<(), ConsensusError> {
        let ready: Vec<PublicKey> = self
            .queues
            .iter()
            .filter(|(_, queued)| !self.sync.is_syncing(&queued.sync_id))
            .map(|(author, _)| *author)
            .collect();

        for author in ready {
            let Some(queued) = self.queues.remove(&author) else {
                continue;
            };
            if let Processing::Pending(sync_id) = self.process_internal(queued.event.clone())? {
                self.queues.insert(
                    author,
                    Queued {
                        event: queued.event,
                        sync_id,
                    },
                );
            }
        }
        Ok(())
    }

    fn after_sync(&mut self) -> Result<(), ConsensusError> {
        self.reducer.process_high_qc()?;
        self.sync.prune(self.reducer.vertex_store());
        self.retry_queues()?;
        self.drain_view_cache()
    }

    pub fn process_sync_response(
        &mut self,
        from: PublicKey,
        response: GetVerticesResponse,
    ) -> Result<(), ConsensusError> {
        tolerate(
            self.sync
                .process_response(from, response, self.reducer.vertex_store_mut()),
            "sync response",
        )?;
        self.after_sync()
    }

    pub fn process_sync_error(
        &mut self,
        from: PublicKey,
        response: GetVerticesErrorResponse,
    ) -> Result<(), ConsensusError> {
        tolerate(
            self.sync
                .process_error_response(from, response, self.reducer.vertex_store_mut()),
            "sync error response",
        )?;
        self.after_sync()
    }

    pub fn process_sync_timeout(
        &mut self,
        request: GetVerticesRequest,
        peer: PublicKey,
    ) -> Result<(), ConsensusError> {
        self.sync.prune(self.reducer.vertex_store());
        self.sync.process_timeout(request, peer);
        self.retry_queues()
    }

    pub fn process_local_timeout(&mut self, view: View, count: u32) -> Result<(), ConsensusError> {
        self.reducer.process_local_timeout(view, count)?;
        self.retry_queues()?;
        self.drain_view_cache()
    }

    pub fn respond_to_request(&self, request: GetVerticesRequest) -> ConsensusMessage {
        respond_to_request(self.reducer.vertex_store(), request)
    }
}

/// Pass fatal errors up; log and swallow the rest
fn tolerate<T>(result: Result<T, ConsensusError>, what: &str) -> Result<Option<T>, ConsensusError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!("Dropping {}: {}", what, e);
            Ok(None)
        }
    }
}
