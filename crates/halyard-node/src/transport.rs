use std::collections::HashMap;

use halyard_consensus::{ConsensusNetwork, NodeEvent};
use halyard_core::{serialize, ConsensusMessage, CoreError, PublicKey};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{trace, warn};

pub const CONSENSUS_PATH: &str = "/consensus";

/// Wire frame of `POST /consensus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusEnvelope {
    pub from: PublicKey,
    pub message: ConsensusMessage,
}

impl ConsensusEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        serialize::from_bytes(bytes)
    }
}

/// Posts consensus messages to peers over HTTP. Messages addressed to this
/// node go straight back into its own event channel.
pub struct HttpNetwork {
    me: PublicKey,
    peers: HashMap<PublicKey, String>,
    client: reqwest::Client,
    loopback: mpsc::UnboundedSender<NodeEvent>,
}

impl HttpNetwork {
    pub fn new(
        me: PublicKey,
        peers: impl IntoIterator<Item = (PublicKey, String)>,
        loopback: mpsc::UnboundedSender<NodeEvent>,
    ) -> Self {
        HttpNetwork {
            me,
            peers: peers.into_iter().collect(),
            client: reqwest::Client::new(),
            loopback,
        }
    }
}

impl ConsensusNetwork for HttpNetwork {
    fn send(&self, to: PublicKey, message: ConsensusMessage) {
        if to == self.me {
            if self
                .loopback
                .send(NodeEvent::Message { from: self.me, message })
                .is_err()
            {
                trace!("Event loop gone, dropping loopback message");
            }
            return;
        }

        let Some(address) = self.peers.get(&to) else {
            warn!("No address for validator {}, dropping {}", to, message.kind());
            return;
        };
        let kind = message.kind();
        let body = match (ConsensusEnvelope { from: self.me, message }).to_bytes() {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode {} for {}: {}", kind, to, e);
                return;
            }
        };

        let url = format!("{}{}", address, CONSENSUS_PATH);
        let client = self.client.clone();
        tokio::spawn(async move {
            let response = client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(body)
                .send()
                .await;
            match response {
                Ok(resp) if !resp.status().is_success() => {
                    warn!("Validator {} rejected {}: {}", to, kind, resp.status());
                }
                Ok(_) => trace!("Delivered {} to {}", kind, to),
                Err(e) => trace!("Failed to reach validator {}: {}", to, e),
            }
        });
    }
}
