use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, PublicKey, Sig};
use crate::error::CoreError;
use crate::types::certificate::{
    HighQc, QuorumCertificate, TimeoutCertificate, VoteData, VoteTimeout,
};
use crate::types::vertex::Vertex;
use crate::types::view::View;

/// A validator's vote for a proposed vertex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub author: PublicKey,
    pub vote_data: VoteData,
    pub timestamp: u64,
    /// Covers `vote_data.signing_hash(timestamp)`
    pub signature: Sig,
    pub high_qc: HighQc,
    /// Covers `VoteTimeout { epoch, view }` once the author timed out in this view
    pub timeout_signature: Option<Sig>,
}

impl Vote {
    pub fn view(&self) -> View {
        self.vote_data.proposed.view
    }

    pub fn epoch(&self) -> u64 {
        self.vote_data.proposed.ledger.epoch
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout_signature.is_some()
    }

    pub fn vote_timeout(&self) -> VoteTimeout {
        VoteTimeout::new(self.epoch(), self.view())
    }
}

/// A leader's signed proposal of a vertex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub vertex: Vertex,
    pub highest_committed_qc: QuorumCertificate,
    /// Covers the vertex hash
    pub signature: Sig,
    pub highest_tc: Option<TimeoutCertificate>,
}

impl Proposal {
    pub fn author(&self) -> Option<PublicKey> {
        self.vertex.proposer
    }

    pub fn view(&self) -> View {
        self.vertex.view
    }

    pub fn epoch(&self) -> u64 {
        self.vertex.epoch
    }

    /// Tip the proposer built on, as seen by the proposer
    pub fn high_qc(&self) -> Option<HighQc> {
        let qc = self.vertex.qc.clone()?;
        Some(HighQc::new(
            qc,
            self.highest_committed_qc.clone(),
            self.highest_tc.clone(),
        ))
    }
}

/// Broadcast by a validator that gave up on `view` without having voted in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewTimeout {
    pub author: PublicKey,
    pub epoch: u64,
    pub view: View,
    pub timestamp: u64,
    pub high_qc: HighQc,
    /// Covers `VoteTimeout { epoch, view }`
    pub signature: Sig,
}

impl ViewTimeout {
    pub fn vote_timeout(&self) -> VoteTimeout {
        VoteTimeout::new(self.epoch, self.view)
    }
}

/// Ask a peer for `count` vertices ending at `vertex_id`, walking toward the root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GetVerticesRequest {
    pub vertex_id: Hash,
    pub count: u32,
}

/// Vertices in request order: the requested vertex first, then its ancestors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetVerticesResponse {
    pub request: GetVerticesRequest,
    pub vertices: Vec<Vertex>,
}

/// Sent when the responder no longer (or never did) hold the requested range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetVerticesErrorResponse {
    pub request: GetVerticesRequest,
    pub high_qc: HighQc,
}

/// Ask for the certificate that closed `epoch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEpochRequest {
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEpochResponse {
    pub epoch: u64,
    /// QC whose committed header ends `epoch` and names the next validator set
    pub proof: Option<QuorumCertificate>,
}

/// Every message exchanged between consensus instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Vote(Vote),
    ViewTimeout(ViewTimeout),
    GetVerticesRequest(GetVerticesRequest),
    GetVerticesResponse(GetVerticesResponse),
    GetVerticesErrorResponse(GetVerticesErrorResponse),
    GetEpochRequest(GetEpochRequest),
    GetEpochResponse(GetEpochResponse),
}

impl ConsensusMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::Proposal(_) => "proposal",
            ConsensusMessage::Vote(_) => "vote",
            ConsensusMessage::ViewTimeout(_) => "view_timeout",
            ConsensusMessage::GetVerticesRequest(_) => "get_vertices_request",
            ConsensusMessage::GetVerticesResponse(_) => "get_vertices_response",
            ConsensusMessage::GetVerticesErrorResponse(_) => "get_vertices_error",
            ConsensusMessage::GetEpochRequest(_) => "get_epoch_request",
            ConsensusMessage::GetEpochResponse(_) => "get_epoch_response",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        crate::serialize::to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        crate::serialize::from_bytes(bytes)
    }
}
