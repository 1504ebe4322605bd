use serde::{Deserialize, Serialize};
use std::fmt;

/// A consensus round number. Each view has exactly one designated leader.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct View(pub u64);

impl View {
    pub const fn genesis() -> Self {
        View(0)
    }

    pub const fn number(&self) -> u64 {
        self.0
    }

    pub fn is_genesis(&self) -> bool {
        self.0 == 0
    }

    pub fn next(&self) -> View {
        View(self.0.saturating_add(1))
    }

    pub fn previous(&self) -> View {
        View(self.0.saturating_sub(1))
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
