use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use halyard_consensus::CommandSource;
use halyard_core::{Command, Hash};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Command already pending")]
    AlreadyExists,

    #[error("Command pool is full")]
    PoolFull,

    #[error("Empty command")]
    Empty,
}

#[derive(Debug, Default)]
struct PoolInner {
    order: VecDeque<Hash>,
    by_hash: HashMap<Hash, Command>,
}

/// Commands waiting to be proposed, in arrival order
#[derive(Debug)]
pub struct CommandPool {
    max_size: usize,
    inner: Mutex<PoolInner>,
}

impl CommandPool {
    pub fn new(max_size: usize) -> Self {
        CommandPool {
            max_size,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, command: Command) -> Result<Hash, PoolError> {
        if command.payload().is_empty() {
            return Err(PoolError::Empty);
        }
        let hash = command.hash();
        let mut inner = self.lock();
        if inner.by_hash.contains_key(&hash) {
            return Err(PoolError::AlreadyExists);
        }
        if inner.by_hash.len() >= self.max_size {
            return Err(PoolError::PoolFull);
        }
        inner.order.push_back(hash);
        inner.by_hash.insert(hash, command);
        debug!("Added command {} to pool", hash.short());
        Ok(hash)
    }

    /// Forget commands that were committed
    pub fn remove_committed<'a>(&self, commands: impl IntoIterator<Item = &'a Command>) {
        let mut inner = self.lock();
        let mut removed = 0;
        for command in commands {
            if inner.by_hash.remove(&command.hash()).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            let PoolInner { order, by_hash } = &mut *inner;
            order.retain(|hash| by_hash.contains_key(hash));
            debug!("Removed {} committed commands from pool", removed);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CommandSource for CommandPool {
    fn next_commands(&self, max: usize, exclude: &HashSet<Hash>) -> Vec<Command> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter(|hash| !exclude.contains(*hash))
            .filter_map(|hash| inner.by_hash.get(hash).cloned())
            .take(max)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(tag: &str) -> Command {
        Command::new(tag.as_bytes().to_vec())
    }

    #[test]
    fn test_add_rejects_duplicates_and_overflow() {
        let pool = CommandPool::new(2);
        pool.add(cmd("a")).unwrap();
        assert_eq!(pool.add(cmd("a")), Err(PoolError::AlreadyExists));
        pool.add(cmd("b")).unwrap();
        assert_eq!(pool.add(cmd("c")), Err(PoolError::PoolFull));
        assert_eq!(pool.add(Command::new(Vec::new())), Err(PoolError::Empty));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_next_commands_in_arrival_order_skipping_excluded() {
        let pool = CommandPool::new(10);
        for tag in ["a", "b", "c", "d"] {
            pool.add(cmd(tag)).unwrap();
        }
        let exclude: HashSet<_> = [cmd("b").hash()].into_iter().collect();

        let batch = pool.next_commands(2, &exclude);
        assert_eq!(batch, vec![cmd("a"), cmd("c")]);
        assert!(pool.next_commands(0, &HashSet::new()).is_empty());
    }

    #[test]
    fn test_committed_commands_leave_the_pool() {
        let pool = CommandPool::new(10);
        for tag in ["a", "b", "c"] {
            pool.add(cmd(tag)).unwrap();
        }
        pool.remove_committed(&[cmd("a"), cmd("c"), cmd("zz")]);

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.next_commands(5, &HashSet::new()), vec![cmd("b")]);
        // A committed command may be submitted again
        pool.add(cmd("a")).unwrap();
    }
}
