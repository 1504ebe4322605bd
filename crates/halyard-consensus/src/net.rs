use halyard_core::{ConsensusMessage, PublicKey};

/// Outbound message transport. Sends are fire-and-forget; a message addressed
/// to the local validator must come back through the inbound event stream.
pub trait ConsensusNetwork: Send + Sync {
    fn send(&self, to: PublicKey, message: ConsensusMessage);

    fn broadcast(&self, to: &[PublicKey], message: ConsensusMessage) {
        for peer in to {
            self.send(*peer, message.clone());
        }
    }
}
