pub mod certificate;
pub mod ledger;
pub mod message;
pub mod state;
pub mod vertex;
pub mod view;

pub use certificate::{
    BftHeader, HighQc, QuorumCertificate, TimeoutCertificate, TimestampedSignature,
    TimestampedSignatures, VoteData, VoteTimeout,
};
pub use ledger::{LedgerHeader, Validator};
pub use message::{
    ConsensusMessage, GetEpochRequest, GetEpochResponse, GetVerticesErrorResponse,
    GetVerticesRequest, GetVerticesResponse, Proposal, ViewTimeout, Vote,
};
pub use state::{SafetyState, VertexStoreState};
pub use vertex::{Command, VerifiedVertex, Vertex};
pub use view::View;
