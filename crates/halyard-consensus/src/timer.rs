use std::time::{Duration, SystemTime, UNIX_EPOCH};

use halyard_core::{GetVerticesRequest, PublicKey, View};

/// Deferred work delivered back into the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledEvent {
    LocalTimeout {
        epoch: u64,
        view: View,
        /// Number of times this view already timed out
        count: u32,
    },
    SyncTimeout {
        epoch: u64,
        request: GetVerticesRequest,
        peer: PublicKey,
    },
}

pub trait Scheduler: Send + Sync {
    fn schedule(&self, event: ScheduledEvent, delay: Duration);
}

pub trait TimeSupplier: Send + Sync {
    /// Milliseconds since the unix epoch
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSupplier;

impl TimeSupplier for SystemTimeSupplier {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}
