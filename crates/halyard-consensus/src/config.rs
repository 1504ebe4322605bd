use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;

/// Tuning knobs of one consensus instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BftConfig {
    /// Timeout of a view that directly follows a commit
    pub base_timeout_ms: u64,
    /// Growth factor per uncommitted view
    pub timeout_rate: f64,
    /// Cap on the exponent applied to `timeout_rate`
    pub max_timeout_exponent: u32,
    /// How long to wait on one peer before asking the next for vertices
    pub sync_patience_ms: u64,
    /// Max commands a leader packs into one vertex
    pub max_commands_per_vertex: usize,
    /// Max events from future epochs held while the epoch proof is fetched
    pub max_queued_epoch_events: usize,
    /// How far above the current view an event may be and still be held
    pub max_future_views: u64,
}

impl Default for BftConfig {
    fn default() -> Self {
        BftConfig {
            base_timeout_ms: 1000,
            timeout_rate: 1.2,
            max_timeout_exponent: 6,
            sync_patience_ms: 500,
            max_commands_per_vertex: 100,
            max_queued_epoch_events: 1024,
            max_future_views: 100,
        }
    }
}

impl BftConfig {
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.base_timeout_ms == 0 {
            return Err(ConsensusError::Config(
                "base_timeout_ms must be positive".to_string(),
            ));
        }
        if self.timeout_rate.is_nan() || self.timeout_rate < 1.0 {
            return Err(ConsensusError::Config(format!(
                "timeout_rate must be at least 1.0, got {}",
                self.timeout_rate
            )));
        }
        if self.sync_patience_ms == 0 {
            return Err(ConsensusError::Config(
                "sync_patience_ms must be positive".to_string(),
            ));
        }
        if self.max_future_views == 0 {
            return Err(ConsensusError::Config(
                "max_future_views must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BftConfig::default().validate().is_ok());
    }

    #[test]
    fn test_shrinking_timeouts_rejected() {
        let config = BftConfig {
            timeout_rate: 0.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConsensusError::Config(_))));

        let config = BftConfig {
            timeout_rate: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: BftConfig =
            serde_json::from_str(r#"{"base_timeout_ms": 250, "max_future_views": 8}"#).unwrap();
        assert_eq!(config.base_timeout_ms, 250);
        assert_eq!(config.max_future_views, 8);
        assert_eq!(config.sync_patience_ms, BftConfig::default().sync_patience_ms);
    }
}
