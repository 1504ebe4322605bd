use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use halyard_consensus::BftConfig;
use halyard_core::{Hash, KeyPair, LedgerHeader, PublicKey, SecretKey, Validator, View};
use serde::{Deserialize, Serialize};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Validator secret key (hex)
    pub secret_key: String,

    /// HTTP bind address for consensus traffic and the API
    pub bind_addr: SocketAddr,

    /// Node data directory
    pub data_dir: PathBuf,

    /// Genesis timestamp in milliseconds
    #[serde(default)]
    pub genesis_timestamp: u64,

    /// Genesis validator set, with the address each member listens on
    pub validators: Vec<ValidatorEntry>,

    /// Pacemaker, sync and proposal settings
    #[serde(default)]
    pub consensus: BftConfig,

    /// Close each epoch once this view is reached
    #[serde(default)]
    pub epoch_max_view: Option<u64>,

    /// Max commands waiting in the pool
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEntry {
    pub public_key: String,
    pub weight: u64,
    /// Base URL, e.g. `http://127.0.0.1:9100`
    pub address: String,
}

fn default_pool_max_size() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn keypair(&self) -> Result<KeyPair> {
        Ok(KeyPair::from_secret(SecretKey::from_hex(&self.secret_key)?))
    }

    pub fn genesis_header(&self) -> LedgerHeader {
        LedgerHeader::genesis(0, Hash::ZERO, 0, self.genesis_timestamp)
    }

    pub fn genesis_validators(&self) -> Result<Vec<Validator>> {
        self.validators
            .iter()
            .map(|entry| {
                let key = PublicKey::from_hex(&entry.public_key)?;
                Ok(Validator::new(key, entry.weight))
            })
            .collect()
    }

    /// Addresses of every validator, keyed by public key
    pub fn peer_addresses(&self) -> Result<Vec<(PublicKey, String)>> {
        self.validators
            .iter()
            .map(|entry| {
                let key = PublicKey::from_hex(&entry.public_key)?;
                Ok((key, entry.address.trim_end_matches('/').to_string()))
            })
            .collect()
    }

    pub fn epoch_max_view(&self) -> Option<View> {
        self.epoch_max_view.map(View)
    }

    pub fn validate(&self) -> Result<()> {
        let me = self.keypair()?.public;
        let validators = self.genesis_validators()?;
        if validators.is_empty() {
            return Err(anyhow!("the validator set is empty"));
        }
        if !validators.iter().any(|v| v.key == me) {
            return Err(anyhow!("this node's key {} is not in the validator set", me));
        }
        self.consensus.validate()?;
        Ok(())
    }
}

/// One configuration per validator of a local committee, listening on
/// consecutive ports from `base_port`
pub fn generate_committee(
    validators: usize,
    base_port: u16,
    data_root: &Path,
    epoch_max_view: Option<u64>,
) -> Result<Vec<NodeConfig>> {
    if validators == 0 {
        return Err(anyhow!("a committee needs at least one validator"));
    }
    let keys: Vec<KeyPair> = (0..validators).map(|_| KeyPair::generate()).collect();
    let entries = keys
        .iter()
        .enumerate()
        .map(|(i, kp)| {
            let port = port_for(base_port, i)?;
            Ok(ValidatorEntry {
                public_key: kp.public.to_hex(),
                weight: 1,
                address: format!("http://127.0.0.1:{}", port),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let genesis_timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();

    keys.iter()
        .enumerate()
        .map(|(i, kp)| {
            Ok(NodeConfig {
                secret_key: kp.secret.to_hex(),
                bind_addr: SocketAddr::from(([127, 0, 0, 1], port_for(base_port, i)?)),
                data_dir: data_root.join(format!("node-{}", i)),
                genesis_timestamp,
                validators: entries.clone(),
                consensus: BftConfig::default(),
                epoch_max_view,
                pool_max_size: default_pool_max_size(),
                log_level: default_log_level(),
            })
        })
        .collect()
}

fn port_for(base_port: u16, index: usize) -> Result<u16> {
    u16::try_from(index)
        .ok()
        .and_then(|i| base_port.checked_add(i))
        .ok_or_else(|| anyhow!("port range starting at {} overflows", base_port))
}
