use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{hash_blake3, Hash, PublicKey};
use crate::error::CoreError;
use crate::serialize::hash_of;
use crate::types::certificate::{BftHeader, QuorumCertificate, TimeoutCertificate};
use crate::types::ledger::LedgerHeader;
use crate::types::view::View;

/// An opaque command to be ordered by consensus
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command(pub Vec<u8>);

impl Command {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Command(payload.into())
    }

    pub fn payload(&self) -> &[u8] {
        &self.0
    }

    pub fn hash(&self) -> Hash {
        hash_blake3(&self.0)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({} bytes, {})", self.0.len(), self.hash().short())
    }
}

/// A proposed unit of the ledger, linked to its parent through `qc`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub epoch: u64,
    pub view: View,
    /// Certifies the parent; absent only on an epoch's genesis vertex
    pub qc: Option<QuorumCertificate>,
    pub commands: Vec<Command>,
    pub proposer: Option<PublicKey>,
    /// Carried when the parent is not the previous view
    pub timeout_certificate: Option<TimeoutCertificate>,
}

impl Vertex {
    pub fn genesis(ledger: &LedgerHeader) -> Self {
        Vertex {
            epoch: ledger.epoch,
            view: View::genesis(),
            qc: None,
            commands: Vec::new(),
            proposer: None,
            timeout_certificate: None,
        }
    }

    pub fn hash(&self) -> Result<Hash, CoreError> {
        hash_of(self)
    }
}

/// A vertex paired with its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedVertex {
    vertex: Vertex,
    id: Hash,
}

impl VerifiedVertex {
    pub fn new(vertex: Vertex) -> Result<Self, CoreError> {
        let id = vertex.hash()?;
        Ok(VerifiedVertex { vertex, id })
    }

    pub fn id(&self) -> Hash {
        self.id
    }

    pub fn vertex(&self) -> &Vertex {
        &self.vertex
    }

    pub fn into_vertex(self) -> Vertex {
        self.vertex
    }

    pub fn epoch(&self) -> u64 {
        self.vertex.epoch
    }

    pub fn view(&self) -> View {
        self.vertex.view
    }

    pub fn qc(&self) -> Option<&QuorumCertificate> {
        self.vertex.qc.as_ref()
    }

    pub fn commands(&self) -> &[Command] {
        &self.vertex.commands
    }

    pub fn proposer(&self) -> Option<PublicKey> {
        self.vertex.proposer
    }

    pub fn timeout_certificate(&self) -> Option<&TimeoutCertificate> {
        self.vertex.timeout_certificate.as_ref()
    }

    pub fn is_genesis(&self) -> bool {
        self.vertex.qc.is_none()
    }

    pub fn parent_header(&self) -> Option<&BftHeader> {
        self.qc().map(|qc| qc.proposed())
    }

    pub fn grandparent_header(&self) -> Option<&BftHeader> {
        self.qc().map(|qc| qc.parent())
    }

    pub fn parent_id(&self) -> Option<Hash> {
        self.parent_header().map(|h| h.vertex_id)
    }

    /// The parent sits in the immediately preceding view
    pub fn has_direct_parent(&self) -> bool {
        self.parent_header()
            .is_some_and(|parent| parent.view.next() == self.view())
    }

    pub fn parent_has_direct_parent(&self) -> bool {
        self.qc()
            .is_some_and(|qc| qc.parent().view.next() == qc.proposed().view)
    }

    /// Any of this vertex, its parent, or its grandparent is a genesis vertex
    pub fn touches_genesis(&self) -> bool {
        match self.qc() {
            None => true,
            Some(qc) => qc.proposed().view.is_genesis() || qc.parent().view.is_genesis(),
        }
    }
}
