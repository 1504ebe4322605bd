use std::collections::HashSet;

use halyard_core::{Command, Hash};

/// Supplies command batches to a proposing leader
pub trait CommandSource: Send + Sync {
    /// Up to `max` commands whose hashes are not in `exclude`
    fn next_commands(&self, max: usize, exclude: &HashSet<Hash>) -> Vec<Command>;
}

/// Source that never has anything to propose
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyCommandSource;

impl CommandSource for EmptyCommandSource {
    fn next_commands(&self, _max: usize, _exclude: &HashSet<Hash>) -> Vec<Command> {
        Vec::new()
    }
}
