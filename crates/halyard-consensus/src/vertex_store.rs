use std::collections::{HashMap, HashSet, VecDeque};

use halyard_core::{
    BftHeader, Hash, HighQc, LedgerHeader, QuorumCertificate, TimeoutCertificate, Validator,
    VerifiedVertex, Vertex, VertexStoreState, View,
};
use tracing::{debug, info, trace, warn};

use crate::error::ConsensusError;
use crate::events::CommittedVertex;
use crate::ledger::Ledger;

/// A vertex together with the ledger header its execution produced
#[derive(Debug, Clone)]
struct PreparedVertex {
    vertex: VerifiedVertex,
    ledger_header: LedgerHeader,
}

impl PreparedVertex {
    fn header(&self) -> BftHeader {
        BftHeader::new(self.vertex.view(), self.vertex.id(), self.ledger_header.clone())
    }
}

/// The tree of uncommitted vertices, rooted at the last committed vertex.
///
/// Vertices live in an arena keyed by id; parent and child links are id
/// lookups. Committing a vertex makes it the new root and removes every
/// vertex that does not descend from it.
pub struct VertexStore {
    ledger: Box<dyn Ledger>,
    root: PreparedVertex,
    vertices: HashMap<Hash, PreparedVertex>,
    children: HashMap<Hash, HashSet<Hash>>,
    highest_qc: QuorumCertificate,
    /// Its committed header is always the root
    highest_committed_qc: QuorumCertificate,
    highest_tc: Option<TimeoutCertificate>,
    committed: Vec<CommittedVertex>,
    dirty: bool,
}

impl VertexStore {
    /// Build a store rooted at `root`. `high_qc.highest_committed_qc()` must
    /// commit `root`; `vertices` must be ordered parents first.
    pub fn create(
        root: VerifiedVertex,
        high_qc: HighQc,
        vertices: Vec<VerifiedVertex>,
        ledger: Box<dyn Ledger>,
    ) -> Result<Self, ConsensusError> {
        let root_ledger = Self::check_root(&root, &high_qc)?;

        let mut store = VertexStore {
            ledger,
            root: PreparedVertex {
                vertex: root,
                ledger_header: root_ledger,
            },
            vertices: HashMap::new(),
            children: HashMap::new(),
            highest_qc: high_qc.highest_committed_qc().clone(),
            highest_committed_qc: high_qc.highest_committed_qc().clone(),
            highest_tc: None,
            committed: Vec::new(),
            dirty: true,
        };
        store.restore(high_qc, vertices)?;
        Ok(store)
    }

    /// Re-root the store at a vertex committed elsewhere, after bringing the
    /// ledger up to that vertex's header
    pub fn rebuild(
        &mut self,
        root: VerifiedVertex,
        high_qc: HighQc,
        vertices: Vec<VerifiedVertex>,
    ) -> Result<(), ConsensusError> {
        let root_ledger = Self::check_root(&root, &high_qc)?;
        if root.epoch() != self.epoch() {
            return Err(ConsensusError::InvalidVertex(format!(
                "cannot rebuild epoch {} store from epoch {} root",
                self.epoch(),
                root.epoch()
            )));
        }
        self.ledger.sync_to(&root_ledger)?;

        info!(
            "Rebuilding vertex store at root {} (view {}), {} vertices",
            root.id().short(),
            root.view(),
            vertices.len()
        );

        self.root = PreparedVertex {
            vertex: root,
            ledger_header: root_ledger,
        };
        self.vertices.clear();
        self.children.clear();
        self.highest_qc = high_qc.highest_committed_qc().clone();
        self.highest_committed_qc = high_qc.highest_committed_qc().clone();
        self.dirty = true;
        self.restore(high_qc, vertices)
    }

    fn check_root(root: &VerifiedVertex, high_qc: &HighQc) -> Result<LedgerHeader, ConsensusError> {
        let committed = high_qc.highest_committed_qc().committed().ok_or_else(|| {
            ConsensusError::InvalidRoot("root QC does not commit any vertex".to_string())
        })?;
        if committed.vertex_id != root.id() || committed.view != root.view() {
            return Err(ConsensusError::InvalidRoot(format!(
                "root {} at view {} is not the vertex its QC commits ({} at view {})",
                root.id().short(),
                root.view(),
                committed.vertex_id.short(),
                committed.view
            )));
        }
        Ok(committed.ledger.clone())
    }

    fn restore(&mut self, high_qc: HighQc, vertices: Vec<VerifiedVertex>) -> Result<(), ConsensusError> {
        for vertex in vertices {
            let id = vertex.id();
            if let Some(qc) = vertex.qc().cloned() {
                self.add_qc(&qc)?;
            }
            if let Err(e) = self.insert_vertex(vertex) {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("Dropping restored vertex {}: {}", id.short(), e);
            }
        }
        self.add_qc(high_qc.highest_qc())?;
        if let Some(tc) = high_qc.highest_tc() {
            self.insert_timeout_certificate(tc.clone());
        }
        Ok(())
    }

    pub fn epoch(&self) -> u64 {
        self.root.vertex.epoch()
    }

    pub fn root(&self) -> &VerifiedVertex {
        &self.root.vertex
    }

    pub fn root_ledger(&self) -> &LedgerHeader {
        &self.root.ledger_header
    }

    pub fn highest_qc(&self) -> &QuorumCertificate {
        &self.highest_qc
    }

    pub fn highest_committed_qc(&self) -> &QuorumCertificate {
        &self.highest_committed_qc
    }

    pub fn highest_tc(&self) -> Option<&TimeoutCertificate> {
        self.highest_tc.as_ref()
    }

    pub fn high_qc(&self) -> HighQc {
        HighQc::new(
            self.highest_qc.clone(),
            self.highest_committed_qc.clone(),
            self.highest_tc.clone(),
        )
    }

    pub fn contains_vertex(&self, id: &Hash) -> bool {
        *id == self.root.vertex.id() || self.vertices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    fn prepared(&self, id: &Hash) -> Option<&PreparedVertex> {
        if *id == self.root.vertex.id() {
            Some(&self.root)
        } else {
            self.vertices.get(id)
        }
    }

    pub fn get_vertex(&self, id: &Hash) -> Option<&VerifiedVertex> {
        self.prepared(id).map(|p| &p.vertex)
    }

    pub fn ledger_header_of(&self, id: &Hash) -> Option<&LedgerHeader> {
        self.prepared(id).map(|p| &p.ledger_header)
    }

    /// Execute `vertex` on top of its parent and add it to the tree
    pub fn insert_vertex(&mut self, vertex: VerifiedVertex) -> Result<BftHeader, ConsensusError> {
        let id = vertex.id();
        if let Some(existing) = self.prepared(&id) {
            return Ok(existing.header());
        }

        if vertex.epoch() != self.epoch() {
            return Err(ConsensusError::InvalidVertex(format!(
                "vertex {} is from epoch {}, store is at epoch {}",
                id.short(),
                vertex.epoch(),
                self.epoch()
            )));
        }
        if vertex.view() <= self.root.vertex.view() {
            return Err(ConsensusError::InvalidVertex(format!(
                "vertex {} at view {} is not above the root view {}",
                id.short(),
                vertex.view(),
                self.root.vertex.view()
            )));
        }

        let qc = vertex.qc().ok_or_else(|| {
            ConsensusError::InvalidVertex(format!("vertex {} has no parent QC", id.short()))
        })?;
        let parent_id = qc.proposed().vertex_id;
        let parent = self
            .prepared(&parent_id)
            .ok_or(ConsensusError::MissingParent {
                vertex: id,
                parent: parent_id,
            })?;

        if parent.vertex.view() != qc.proposed().view {
            return Err(ConsensusError::InvalidVertex(format!(
                "vertex {} names parent view {}, parent is at view {}",
                id.short(),
                qc.proposed().view,
                parent.vertex.view()
            )));
        }
        if vertex.view() <= parent.vertex.view() {
            return Err(ConsensusError::InvalidVertex(format!(
                "vertex {} at view {} does not advance past its parent at view {}",
                id.short(),
                vertex.view(),
                parent.vertex.view()
            )));
        }

        let parent_ledger = parent.ledger_header.clone();
        let ledger_header = self.ledger.prepare(&parent_ledger, &vertex)?;

        trace!(
            "Inserted vertex {} at view {} on parent {}",
            id.short(),
            vertex.view(),
            parent_id.short()
        );

        let prepared = PreparedVertex {
            vertex,
            ledger_header,
        };
        let header = prepared.header();
        self.children.entry(parent_id).or_default().insert(id);
        self.vertices.insert(id, prepared);
        self.dirty = true;
        Ok(header)
    }

    /// Record a QC for a stored vertex and commit whatever it proves final.
    /// Returns false if the certified vertex is not in the store.
    pub fn add_qc(&mut self, qc: &QuorumCertificate) -> Result<bool, ConsensusError> {
        let proposed = qc.proposed();
        let Some(prepared) = self.prepared(&proposed.vertex_id) else {
            return Ok(false);
        };

        if prepared.vertex.view() != proposed.view {
            return Err(ConsensusError::InconsistentQc(format!(
                "QC names view {} for vertex {} at view {}",
                proposed.view,
                proposed.vertex_id.short(),
                prepared.vertex.view()
            )));
        }
        if prepared.ledger_header != proposed.ledger {
            return Err(ConsensusError::InconsistentQc(format!(
                "QC ledger header for vertex {} differs from local execution",
                proposed.vertex_id.short()
            )));
        }
        let is_root = proposed.vertex_id == self.root.vertex.id();
        if !is_root && prepared.vertex.parent_id() != Some(qc.parent().vertex_id) {
            return Err(ConsensusError::InconsistentQc(format!(
                "QC parent {} is not the parent of vertex {}",
                qc.parent().vertex_id.short(),
                proposed.vertex_id.short()
            )));
        }

        if qc.view() > self.highest_qc.view() {
            debug!("New highest QC at view {}", qc.view());
            self.highest_qc = qc.clone();
            self.dirty = true;
        }

        if let Some(committed) = qc.committed() {
            if committed.view > self.root.vertex.view() {
                self.commit(committed.clone(), qc)?;
            }
        }
        Ok(true)
    }

    fn commit(&mut self, header: BftHeader, qc: &QuorumCertificate) -> Result<(), ConsensusError> {
        let path = self.path_ids(&header.vertex_id).ok_or_else(|| {
            ConsensusError::SafetyViolation(format!(
                "committed vertex {} at view {} is not a descendant of the root",
                header.vertex_id.short(),
                header.view
            ))
        })?;

        for id in &path {
            let Some(prepared) = self.vertices.get(id).cloned() else {
                continue;
            };
            self.ledger
                .commit(&prepared.vertex, &prepared.ledger_header)
                .map_err(ConsensusError::LedgerCommit)?;
            self.committed.push(CommittedVertex {
                vertex: prepared.vertex,
                ledger_header: prepared.ledger_header,
            });
        }

        info!(
            "Committed {} vertices up to view {} ({})",
            path.len(),
            header.view,
            header.vertex_id.short()
        );

        self.prune(header.vertex_id);
        self.highest_committed_qc = qc.clone();
        if qc.view() > self.highest_qc.view() {
            self.highest_qc = qc.clone();
        }
        self.dirty = true;
        Ok(())
    }

    /// Make `new_root` the root and drop every vertex not descended from it
    fn prune(&mut self, new_root: Hash) {
        let mut keep = HashSet::new();
        let mut queue = VecDeque::from([new_root]);
        while let Some(id) = queue.pop_front() {
            if let Some(children) = self.children.get(&id) {
                queue.extend(children.iter().copied());
            }
            keep.insert(id);
        }

        let Some(root) = self.vertices.remove(&new_root) else {
            return;
        };
        let before = self.vertices.len();
        self.vertices.retain(|id, _| keep.contains(id));
        self.children.retain(|id, _| keep.contains(id));
        self.root = root;

        debug!(
            "Pruned {} vertices off the committed branch",
            before - self.vertices.len()
        );
    }

    /// Ids from just above the root down to `id`, oldest first
    fn path_ids(&self, id: &Hash) -> Option<Vec<Hash>> {
        let mut path = Vec::new();
        let mut cursor = *id;
        while cursor != self.root.vertex.id() {
            let prepared = self.vertices.get(&cursor)?;
            path.push(cursor);
            cursor = prepared.vertex.parent_id()?;
        }
        path.reverse();
        Some(path)
    }

    /// Vertices strictly above the root leading to `id`, oldest first
    pub fn get_path_from_root(&self, id: &Hash) -> Option<Vec<&VerifiedVertex>> {
        let ids = self.path_ids(id)?;
        Some(
            ids.iter()
                .filter_map(|id| self.vertices.get(id).map(|p| &p.vertex))
                .collect(),
        )
    }

    /// `count` vertices ending at `id`, newest first, or None if the store
    /// does not hold that many
    pub fn get_vertices(&self, id: &Hash, count: usize) -> Option<Vec<Vertex>> {
        let mut result = Vec::with_capacity(count.min(self.vertices.len() + 1));
        let mut cursor = Some(*id);
        while result.len() < count {
            let prepared = self.prepared(&cursor?)?;
            result.push(prepared.vertex.vertex().clone());
            cursor = prepared.vertex.parent_id();
        }
        Some(result)
    }

    pub fn insert_timeout_certificate(&mut self, tc: TimeoutCertificate) {
        if tc.epoch != self.epoch() {
            return;
        }
        let higher = self.highest_tc.as_ref().map_or(true, |current| tc.view > current.view);
        if higher {
            debug!("New highest TC at view {}", tc.view);
            self.highest_tc = Some(tc);
            self.dirty = true;
        }
    }

    /// Snapshot for persistence, vertices ordered parents first
    pub fn to_state(&self, validators: Vec<Validator>) -> VertexStoreState {
        let mut vertices = Vec::with_capacity(self.vertices.len());
        let mut queue = VecDeque::from([self.root.vertex.id()]);
        while let Some(id) = queue.pop_front() {
            if let Some(children) = self.children.get(&id) {
                let mut ordered: Vec<_> = children
                    .iter()
                    .filter_map(|child| self.vertices.get(child))
                    .collect();
                ordered.sort_by_key(|p| (p.vertex.view(), p.vertex.id()));
                for child in ordered {
                    vertices.push(child.vertex.vertex().clone());
                    queue.push_back(child.vertex.id());
                }
            }
        }

        VertexStoreState {
            epoch: self.epoch(),
            validators,
            root: self.root.vertex.vertex().clone(),
            high_qc: self.high_qc(),
            vertices,
        }
    }

    /// Whether the tree or its certificates changed since the last call
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Vertices committed since the last call, oldest first
    pub fn take_committed(&mut self) -> Vec<CommittedVertex> {
        std::mem::take(&mut self.committed)
    }

    pub fn highest_committed_view(&self) -> View {
        self.highest_committed_qc.view()
    }

    pub fn into_ledger(self) -> Box<dyn Ledger> {
        self.ledger
    }
}

impl std::fmt::Debug for VertexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexStore")
            .field("root", &self.root.vertex.id())
            .field("root_view", &self.root.vertex.view())
            .field("vertices", &self.vertices.len())
            .field("highest_qc_view", &self.highest_qc.view())
            .finish()
    }
}
