use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use halyard_core::{
    ConsensusMessage, GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, Hash,
    HashVerifier, HighQc, PublicKey, VerifiedVertex,
};
use tracing::{debug, info, trace, warn};

use crate::error::ConsensusError;
use crate::net::ConsensusNetwork;
use crate::qc::verify_high_qc;
use crate::timer::{ScheduledEvent, Scheduler};
use crate::validator_set::ValidatorSet;
use crate::vertex_store::VertexStore;

/// Vertices requested when catching up to a committed QC: the committed
/// vertex and the two certified above it
const COMMITTED_SYNC_COUNT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    /// The QC's vertex is in the store
    AlreadySynced,
    /// Missing vertices were requested
    SyncInProgress,
    /// Nothing can be fetched for this QC
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncStage {
    /// Fetching the vertices of a committed QC above our root
    Committed,
    /// Walking back from the QC's vertex to a stored ancestor
    Qc,
}

#[derive(Debug)]
struct SyncState {
    high_qc: HighQc,
    author: PublicKey,
    stage: SyncStage,
    peers: Vec<PublicKey>,
    /// Vertices fetched so far, newest first
    fetched: Vec<VerifiedVertex>,
}

#[derive(Debug)]
struct RequestState {
    sync_ids: Vec<Hash>,
    current_peer: PublicKey,
    remaining_peers: VecDeque<PublicKey>,
    /// Peers that already failed this round
    tried: Vec<PublicKey>,
}

/// Answer a vertices request from the local store.
///
/// A count of zero, or one larger than the store plus its root, can never
/// be served and is answered with our high QC.
pub fn respond_to_request(store: &VertexStore, request: GetVerticesRequest) -> ConsensusMessage {
    let count = request.count as usize;
    let servable = count > 0 && count <= store.len() + 1;
    let vertices = if servable {
        store.get_vertices(&request.vertex_id, count)
    } else {
        debug!(
            "Refusing request for {} vertices ending at {}",
            request.count,
            request.vertex_id.short()
        );
        None
    };
    match vertices {
        Some(vertices) => ConsensusMessage::GetVerticesResponse(GetVerticesResponse {
            request,
            vertices,
        }),
        None => ConsensusMessage::GetVerticesErrorResponse(GetVerticesErrorResponse {
            request,
            high_qc: store.high_qc(),
        }),
    }
}

/// Fetches the ancestors of QCs whose vertices are not yet in the store.
///
/// Syncs are keyed by the id of the vertex the target QC certifies;
/// outstanding requests are keyed by the request itself so concurrent syncs
/// that need the same vertices share one request.
pub struct BftSync {
    self_key: PublicKey,
    epoch: u64,
    validators: Arc<ValidatorSet>,
    hash_verifier: Arc<dyn HashVerifier>,
    network: Arc<dyn ConsensusNetwork>,
    scheduler: Arc<dyn Scheduler>,
    patience: Duration,
    syncing: HashMap<Hash, SyncState>,
    requests: HashMap<GetVerticesRequest, RequestState>,
}

impl BftSync {
    pub fn new(
        self_key: PublicKey,
        epoch: u64,
        validators: Arc<ValidatorSet>,
        hash_verifier: Arc<dyn HashVerifier>,
        network: Arc<dyn ConsensusNetwork>,
        scheduler: Arc<dyn Scheduler>,
        patience: Duration,
    ) -> Self {
        BftSync {
            self_key,
            epoch,
            validators,
            hash_verifier,
            network,
            scheduler,
            patience,
            syncing: HashMap::new(),
            requests: HashMap::new(),
        }
    }

    pub fn is_syncing(&self, sync_id: &Hash) -> bool {
        self.syncing.contains_key(sync_id)
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Make sure the vertex `high_qc` certifies, and its ancestors, are in
    /// the store, requesting whatever is missing from `author` and the QC
    /// signers.
    pub fn sync_to_qc(
        &mut self,
        high_qc: HighQc,
        author: PublicKey,
        store: &mut VertexStore,
    ) -> Result<SyncResult, ConsensusError> {
        if let Some(tc) = high_qc.highest_tc() {
            store.insert_timeout_certificate(tc.clone());
        }

        let qc = high_qc.highest_qc();
        if qc.view() <= store.root().view() && !store.contains_vertex(&qc.proposed().vertex_id) {
            trace!("QC at view {} is behind our root, nothing to fetch", qc.view());
            return Ok(SyncResult::AlreadySynced);
        }

        if store.add_qc(qc)? {
            let committed_qc = high_qc.highest_committed_qc();
            if committed_qc.view() > store.highest_committed_view() {
                store.add_qc(committed_qc)?;
            }
            return Ok(SyncResult::AlreadySynced);
        }

        if qc.is_genesis() {
            debug!("Unknown genesis QC from {}", author);
            return Ok(SyncResult::Invalid);
        }

        let sync_id = qc.proposed().vertex_id;
        if self.syncing.contains_key(&sync_id) {
            return Ok(SyncResult::SyncInProgress);
        }

        self.start_sync(sync_id, high_qc, author, store)
    }

    fn start_sync(
        &mut self,
        sync_id: Hash,
        high_qc: HighQc,
        author: PublicKey,
        store: &VertexStore,
    ) -> Result<SyncResult, ConsensusError> {
        let mut peers = Vec::new();
        for peer in std::iter::once(&author).chain(high_qc.highest_qc().signers()) {
            if *peer != self.self_key && !peers.contains(peer) {
                peers.push(*peer);
            }
        }
        if peers.is_empty() {
            warn!("No peers to sync vertex {} from", sync_id.short());
            return Ok(SyncResult::Invalid);
        }

        let committed_qc = high_qc.highest_committed_qc();
        let needs_committed = committed_qc.committed().is_some_and(|committed| {
            committed.view > store.root().view() && !store.contains_vertex(&committed.vertex_id)
        });

        let (stage, request) = if needs_committed {
            info!(
                "Starting committed sync to view {} from {}",
                committed_qc.view(),
                author
            );
            (
                SyncStage::Committed,
                GetVerticesRequest {
                    vertex_id: committed_qc.proposed().vertex_id,
                    count: COMMITTED_SYNC_COUNT,
                },
            )
        } else {
            debug!(
                "Starting sync to vertex {} at view {} from {}",
                sync_id.short(),
                high_qc.highest_qc().view(),
                author
            );
            (
                SyncStage::Qc,
                GetVerticesRequest {
                    vertex_id: sync_id,
                    count: 1,
                },
            )
        };

        self.syncing.insert(
            sync_id,
            SyncState {
                high_qc,
                author,
                stage,
                peers: peers.clone(),
                fetched: Vec::new(),
            },
        );
        self.send_request(request, sync_id, peers);
        Ok(SyncResult::SyncInProgress)
    }

    fn send_request(&mut self, request: GetVerticesRequest, sync_id: Hash, peers: Vec<PublicKey>) {
        if let Some(existing) = self.requests.get_mut(&request) {
            if !existing.sync_ids.contains(&sync_id) {
                existing.sync_ids.push(sync_id);
            }
            return;
        }

        let mut remaining: VecDeque<_> = peers.into();
        let Some(peer) = remaining.pop_front() else {
            return;
        };
        self.requests.insert(
            request,
            RequestState {
                sync_ids: vec![sync_id],
                current_peer: peer,
                remaining_peers: remaining,
                tried: Vec::new(),
            },
        );
        self.dispatch(request, peer);
    }

    fn dispatch(&self, request: GetVerticesRequest, peer: PublicKey) {
        trace!(
            "Requesting {} vertices ending at {} from {}",
            request.count,
            request.vertex_id.short(),
            peer
        );
        self.network
            .send(peer, ConsensusMessage::GetVerticesRequest(request));
        self.scheduler.schedule(
            ScheduledEvent::SyncTimeout {
                epoch: self.epoch,
                request,
                peer,
            },
            self.patience,
        );
    }

    /// Move an outstanding request to its next peer. Once every peer failed
    /// the round starts over, so the request stays outstanding until someone
    /// answers or its syncs are pruned.
    fn retry_with_next_peer(&mut self, request: GetVerticesRequest) {
        let Some(state) = self.requests.get_mut(&request) else {
            return;
        };
        state.tried.push(state.current_peer);

        let next = match state.remaining_peers.pop_front() {
            Some(next) => next,
            None => {
                state.remaining_peers = state.tried.drain(..).collect();
                warn!(
                    "No peer answered the request for vertex {}, asking all {} again",
                    request.vertex_id.short(),
                    state.remaining_peers.len()
                );
                match state.remaining_peers.pop_front() {
                    Some(next) => next,
                    None => return,
                }
            }
        };
        state.current_peer = next;

        debug!(
            "Retrying request for {} with {}",
            request.vertex_id.short(),
            next
        );
        self.dispatch(request, next);
    }

    pub fn process_timeout(&mut self, request: GetVerticesRequest, peer: PublicKey) {
        if self
            .requests
            .get(&request)
            .is_some_and(|state| state.current_peer == peer)
        {
            self.retry_with_next_peer(request);
        }
    }

    /// Drop syncs whose target vertex arrived by other means or fell below
    /// the root, along with requests no sync waits on anymore
    pub fn prune(&mut self, store: &VertexStore) {
        let root_view = store.root().view();
        self.syncing.retain(|id, sync| {
            let keep = sync.high_qc.highest_qc().view() > root_view && !store.contains_vertex(id);
            if !keep {
                trace!("Sync {} no longer needed", id.short());
            }
            keep
        });

        let syncing = &self.syncing;
        self.requests.retain(|_, state| {
            state.sync_ids.retain(|id| syncing.contains_key(id));
            !state.sync_ids.is_empty()
        });
    }

    /// Handle a peer that does not have the requested vertices
    pub fn process_error_response(
        &mut self,
        from: PublicKey,
        response: GetVerticesErrorResponse,
        store: &mut VertexStore,
    ) -> Result<(), ConsensusError> {
        if self
            .requests
            .get(&response.request)
            .is_some_and(|state| state.current_peer == from)
        {
            self.retry_with_next_peer(response.request);
        }

        let ahead = response.high_qc.highest_qc().view() > store.highest_qc().view();
        if ahead {
            match verify_high_qc(&response.high_qc, &self.validators, self.hash_verifier.as_ref()) {
                Ok(()) => {
                    self.sync_to_qc(response.high_qc, from, store)?;
                }
                Err(e) => debug!("Ignoring high QC from {}: {}", from, e),
            }
        }
        Ok(())
    }

    pub fn process_response(
        &mut self,
        from: PublicKey,
        response: GetVerticesResponse,
        store: &mut VertexStore,
    ) -> Result<(), ConsensusError> {
        if !self.requests.contains_key(&response.request) {
            trace!("Unsolicited vertices response from {}", from);
            return Ok(());
        }

        let vertices = match self.check_chain(&response) {
            Ok(vertices) => vertices,
            Err(reason) => {
                warn!("Bad vertices response from {}: {}", from, reason);
                self.retry_with_next_peer(response.request);
                return Ok(());
            }
        };

        let Some(state) = self.requests.remove(&response.request) else {
            return Ok(());
        };

        for sync_id in state.sync_ids {
            let Some(sync) = self.syncing.remove(&sync_id) else {
                continue;
            };
            match sync.stage {
                SyncStage::Committed => self.process_committed(sync, &vertices, store)?,
                SyncStage::Qc => {
                    if let Some(vertex) = vertices.first() {
                        self.process_qc_vertex(sync_id, sync, vertex.clone(), from, store)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// The response must hold exactly the requested vertex followed by its
    /// ancestors, linked by id
    fn check_chain(&self, response: &GetVerticesResponse) -> Result<Vec<VerifiedVertex>, String> {
        let request = response.request;
        if response.vertices.len() != request.count as usize {
            return Err(format!(
                "expected {} vertices, got {}",
                request.count,
                response.vertices.len()
            ));
        }

        let mut verified = Vec::with_capacity(response.vertices.len());
        let mut expected = request.vertex_id;
        for vertex in &response.vertices {
            let vertex = VerifiedVertex::new(vertex.clone()).map_err(|e| e.to_string())?;
            if vertex.id() != expected {
                return Err(format!(
                    "vertex {} does not match expected {}",
                    vertex.id().short(),
                    expected.short()
                ));
            }
            if vertex.epoch() != self.epoch {
                return Err(format!("vertex from epoch {}", vertex.epoch()));
            }
            expected = vertex.parent_id().unwrap_or(Hash::ZERO);
            verified.push(vertex);
        }
        Ok(verified)
    }

    fn process_committed(
        &mut self,
        sync: SyncState,
        vertices: &[VerifiedVertex],
        store: &mut VertexStore,
    ) -> Result<(), ConsensusError> {
        let committed_qc = sync.high_qc.highest_committed_qc().clone();
        let Some(committed) = committed_qc.committed() else {
            return Ok(());
        };

        let mut ordered: Vec<VerifiedVertex> = vertices.to_vec();
        ordered.reverse();
        let Some(root) = ordered.first().cloned() else {
            return Ok(());
        };
        if root.id() != committed.vertex_id {
            warn!(
                "Committed sync returned root {} instead of {}",
                root.id().short(),
                committed.vertex_id.short()
            );
            return Ok(());
        }

        if committed.view > store.root().view() && !store.contains_vertex(&committed.vertex_id) {
            let high_qc = HighQc::new(
                committed_qc.clone(),
                committed_qc.clone(),
                sync.high_qc.highest_tc().cloned(),
            );
            store.rebuild(root, high_qc, ordered.split_off(1))?;
        }

        self.sync_to_qc(sync.high_qc, sync.author, store)?;
        Ok(())
    }

    fn process_qc_vertex(
        &mut self,
        sync_id: Hash,
        mut sync: SyncState,
        vertex: VerifiedVertex,
        from: PublicKey,
        store: &mut VertexStore,
    ) -> Result<(), ConsensusError> {
        if vertex.view() <= store.root().view() {
            debug!(
                "Fetched vertex {} at view {} is not above our root, dropping sync",
                vertex.id().short(),
                vertex.view()
            );
            return Ok(());
        }
        let Some(parent_id) = vertex.parent_id() else {
            return Ok(());
        };
        sync.fetched.push(vertex);

        if !store.contains_vertex(&parent_id) {
            let mut peers = vec![from];
            peers.extend(sync.peers.iter().copied().filter(|p| *p != from));
            self.syncing.insert(sync_id, sync);
            self.send_request(
                GetVerticesRequest {
                    vertex_id: parent_id,
                    count: 1,
                },
                sync_id,
                peers,
            );
            return Ok(());
        }

        for vertex in sync.fetched.into_iter().rev() {
            let id = vertex.id();
            if let Some(qc) = vertex.qc().cloned() {
                store.add_qc(&qc)?;
            }
            if let Err(e) = store.insert_vertex(vertex) {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("Could not insert synced vertex {}: {}", id.short(), e);
                return Ok(());
            }
        }

        debug!("Sync to vertex {} complete", sync_id.short());
        self.sync_to_qc(sync.high_qc, sync.author, store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        extend, genesis_qc, genesis_store, RecordingNetwork, RecordingScheduler, TestCommittee,
    };
    use halyard_core::{Ed25519Verifier, QuorumCertificate, View};

    struct Fixture {
        committee: TestCommittee,
        network: Arc<RecordingNetwork>,
        scheduler: Arc<RecordingScheduler>,
        sync: BftSync,
    }

    fn fixture() -> Fixture {
        let committee = TestCommittee::new(4);
        let network = Arc::new(RecordingNetwork::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let sync = BftSync::new(
            committee.keys[3].public,
            0,
            committee.set.clone(),
            Arc::new(Ed25519Verifier),
            network.clone(),
            scheduler.clone(),
            Duration::from_millis(500),
        );
        Fixture {
            committee,
            network,
            scheduler,
            sync,
        }
    }

    /// A peer's store holding a chain of `len` vertices, each certified
    fn remote_chain(committee: &TestCommittee, len: u64) -> (VertexStore, Vec<QuorumCertificate>) {
        let mut store = genesis_store(None);
        let mut qcs = vec![genesis_qc(0)];
        for view in 1..=len {
            let parent = qcs.last().unwrap().clone();
            let (_, qc) = extend(&mut store, committee, &parent, view, format!("v{view}").as_bytes());
            qcs.push(qc);
        }
        for qc in &qcs[1..] {
            assert!(store.add_qc(qc).unwrap());
        }
        (store, qcs)
    }

    fn only_request(network: &RecordingNetwork) -> (PublicKey, GetVerticesRequest) {
        let sent = network.take();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            (peer, ConsensusMessage::GetVerticesRequest(request)) => (*peer, *request),
            other => panic!("unexpected message {:?}", other),
        }
    }

    fn answer(remote: &VertexStore, request: GetVerticesRequest) -> GetVerticesResponse {
        match respond_to_request(remote, request) {
            ConsensusMessage::GetVerticesResponse(response) => response,
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_known_qc_is_already_synced() {
        let mut f = fixture();
        let mut store = genesis_store(None);
        let (_, qc) = extend(&mut store, &f.committee, &genesis_qc(0), 1, b"a");

        let high = HighQc::new(qc, genesis_qc(0), None);
        let result = f.sync.sync_to_qc(high, f.committee.keys[0].public, &mut store).unwrap();
        assert_eq!(result, SyncResult::AlreadySynced);
        assert_eq!(store.highest_qc().view(), View(1));
        assert!(f.network.take().is_empty());
    }

    #[test]
    fn test_sync_walks_back_to_stored_ancestor() {
        let mut f = fixture();
        let (remote, qcs) = remote_chain(&f.committee, 2);
        let mut local = genesis_store(None);
        let author = f.committee.keys[1].public;

        let high = HighQc::new(qcs[2].clone(), genesis_qc(0), None);
        let result = f.sync.sync_to_qc(high.clone(), author, &mut local).unwrap();
        assert_eq!(result, SyncResult::SyncInProgress);
        assert!(f.sync.is_syncing(&qcs[2].proposed().vertex_id));

        // A second QC for the same vertex joins the running sync
        let again = f.sync.sync_to_qc(high, author, &mut local).unwrap();
        assert_eq!(again, SyncResult::SyncInProgress);

        let (peer, request) = only_request(&f.network);
        assert_eq!(peer, author);
        assert_eq!(request.count, 1);
        let scheduled = f.scheduler.take();
        assert_eq!(scheduled[0].1, Duration::from_millis(500));

        f.sync
            .process_response(peer, answer(&remote, request), &mut local)
            .unwrap();
        let (peer, parent_request) = only_request(&f.network);
        assert_eq!(parent_request.vertex_id, qcs[1].proposed().vertex_id);

        f.sync
            .process_response(peer, answer(&remote, parent_request), &mut local)
            .unwrap();
        assert!(local.contains_vertex(&qcs[2].proposed().vertex_id));
        assert_eq!(local.highest_qc(), &qcs[2]);
        assert_eq!(f.sync.pending_requests(), 0);
        assert!(!f.sync.is_syncing(&qcs[2].proposed().vertex_id));
    }

    #[test]
    fn test_committed_sync_rebuilds_store() {
        let mut f = fixture();
        let (remote, qcs) = remote_chain(&f.committee, 4);
        let committed = qcs[4].committed().unwrap().clone();
        assert_eq!(remote.root().id(), committed.vertex_id);

        let mut local = genesis_store(None);
        let high = HighQc::new(qcs[4].clone(), qcs[4].clone(), None);
        let result = f
            .sync
            .sync_to_qc(high, f.committee.keys[0].public, &mut local)
            .unwrap();
        assert_eq!(result, SyncResult::SyncInProgress);

        let (peer, request) = only_request(&f.network);
        assert_eq!(request.count, COMMITTED_SYNC_COUNT);
        f.sync
            .process_response(peer, answer(&remote, request), &mut local)
            .unwrap();

        assert_eq!(local.root().id(), committed.vertex_id);
        assert_eq!(local.root_ledger(), &committed.ledger);
        assert_eq!(local.highest_qc().view(), View(4));
        assert!(local.contains_vertex(&qcs[4].proposed().vertex_id));
        assert!(f.network.take().is_empty());
    }

    #[test]
    fn test_unanswered_request_cycles_through_peers() {
        let mut f = fixture();
        let (remote, qcs) = remote_chain(&f.committee, 2);
        let mut local = genesis_store(None);
        let author = f.committee.keys[1].public;
        let sync_id = qcs[2].proposed().vertex_id;

        f.sync
            .sync_to_qc(HighQc::new(qcs[2].clone(), genesis_qc(0), None), author, &mut local)
            .unwrap();
        let (first, request) = only_request(&f.network);
        assert_eq!(first, author);

        // Timeouts for a peer we already moved away from are ignored
        f.sync.process_timeout(request, f.committee.keys[3].public);
        assert!(f.network.take().is_empty());

        let mut asked = vec![first];
        for _ in 0..5 {
            f.sync.process_timeout(request, *asked.last().unwrap());
            let (next, retried) = only_request(&f.network);
            assert_eq!(retried, request);
            asked.push(next);
        }

        // The author and the two other signers in turn, then around again;
        // never ourselves
        assert_eq!(asked[..3], asked[3..]);
        assert!(!asked[..3].contains(&f.committee.keys[3].public));
        assert_ne!(asked[0], asked[1]);
        assert_ne!(asked[1], asked[2]);
        assert!(f.sync.is_syncing(&sync_id));

        // Someone finally answers
        let peer = *asked.last().unwrap();
        f.sync
            .process_response(peer, answer(&remote, request), &mut local)
            .unwrap();
        let (_, parent_request) = only_request(&f.network);
        f.sync
            .process_response(peer, answer(&remote, parent_request), &mut local)
            .unwrap();
        assert!(local.contains_vertex(&sync_id));
        assert!(!f.sync.is_syncing(&sync_id));
    }

    #[test]
    fn test_prune_drops_syncs_below_root() {
        let mut f = fixture();
        let (remote, qcs) = remote_chain(&f.committee, 4);
        let mut local = genesis_store(None);

        f.sync
            .sync_to_qc(
                HighQc::new(qcs[1].clone(), genesis_qc(0), None),
                f.committee.keys[0].public,
                &mut local,
            )
            .unwrap();
        assert_eq!(f.sync.pending_requests(), 1);

        f.sync.prune(&local);
        assert!(f.sync.is_syncing(&qcs[1].proposed().vertex_id));

        // The remote tree is rooted above view 1
        assert!(remote.root().view() >= View(1));
        f.sync.prune(&remote);
        assert!(!f.sync.is_syncing(&qcs[1].proposed().vertex_id));
        assert_eq!(f.sync.pending_requests(), 0);
    }

    #[test]
    fn test_bad_response_moves_to_next_peer() {
        let mut f = fixture();
        let (remote, qcs) = remote_chain(&f.committee, 2);
        let mut local = genesis_store(None);

        f.sync
            .sync_to_qc(
                HighQc::new(qcs[2].clone(), genesis_qc(0), None),
                f.committee.keys[1].public,
                &mut local,
            )
            .unwrap();
        let (peer, request) = only_request(&f.network);

        // Answer with the wrong vertex
        let mut response = answer(&remote, GetVerticesRequest {
            vertex_id: qcs[1].proposed().vertex_id,
            count: 1,
        });
        response.request = request;
        f.sync.process_response(peer, response, &mut local).unwrap();

        let (next, retried) = only_request(&f.network);
        assert_ne!(next, peer);
        assert_eq!(retried, request);
        assert_eq!(local.len(), 0);
    }

    #[test]
    fn test_unservable_count_answered_with_high_qc() {
        let committee = TestCommittee::new(4);
        let (remote, qcs) = remote_chain(&committee, 2);
        let tip = qcs[2].proposed().vertex_id;

        for count in [0, remote.len() as u32 + 2, u32::MAX] {
            let request = GetVerticesRequest { vertex_id: tip, count };
            match respond_to_request(&remote, request) {
                ConsensusMessage::GetVerticesErrorResponse(error) => {
                    assert_eq!(error.request, request);
                    assert_eq!(error.high_qc.highest_qc(), &qcs[2]);
                }
                other => panic!("count {} got {:?}", count, other),
            }
        }

        // The whole path down to the root is still served
        let request = GetVerticesRequest { vertex_id: tip, count: 2 };
        assert_eq!(answer(&remote, request).vertices.len(), 2);
    }

    #[test]
    fn test_unknown_vertex_answered_with_high_qc() {
        let committee = TestCommittee::new(4);
        let (remote, qcs) = remote_chain(&committee, 1);
        let request = GetVerticesRequest {
            vertex_id: halyard_core::hash_blake3(b"unknown"),
            count: 1,
        };
        match respond_to_request(&remote, request) {
            ConsensusMessage::GetVerticesErrorResponse(error) => {
                assert_eq!(error.request, request);
                assert_eq!(error.high_qc.highest_qc(), &qcs[1]);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }
}
