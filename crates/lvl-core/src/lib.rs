pub mod engine;
pub mod input;
pub mod leveling;
pub mod session;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub use engine::{CompletionResult, LevelingEngine, UnlockableRegistration};
pub use leveling::{level_for, progress_percentage, Progress, XP_PER_LEVEL};
pub use session::SessionId;
pub use store::{ProgressStore, SessionTx, TaskClaim};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LevelError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("task {0} not found")]
    TaskNotFound(i64),
    #[error("task {0} already completed")]
    AlreadyCompleted(i64),
    #[error("store failure: {0}")]
    Store(String),
}

impl LevelError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Rejections caused by the request rather than the backing store.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, LevelError::Store(_))
    }
}

pub type LevelResult<T> = Result<T, LevelError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub xp: u32,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unlockable {
    pub id: i64,
    pub level: u64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Consistent read of one session partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: SessionId,
    pub total_xp: u64,
    pub unlocked: BTreeSet<u64>,
    pub tasks: Vec<Task>,
    pub unlockables: Vec<Unlockable>,
}

impl SessionSnapshot {
    pub fn empty(session: SessionId) -> Self {
        Self {
            session,
            total_xp: 0,
            unlocked: BTreeSet::new(),
            tasks: Vec::new(),
            unlockables: Vec::new(),
        }
    }

    pub fn level(&self) -> u64 {
        level_for(self.total_xp)
    }

    pub fn progress(&self) -> Progress {
        Progress::from_total(self.total_xp)
    }

    pub fn is_unlocked(&self, level: u64) -> bool {
        self.unlocked.contains(&level)
    }

    pub fn task(&self, task_id: i64) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_derives_level_and_progress_from_total() {
        let session = SessionId::parse("abcd").expect("valid token");
        let mut snapshot = SessionSnapshot::empty(session);
        snapshot.total_xp = 2_370;

        assert_eq!(snapshot.level(), 2);
        assert_eq!(snapshot.progress().percentage, 37);
        assert!(!snapshot.is_unlocked(2));

        snapshot.unlocked.insert(2);
        assert!(snapshot.is_unlocked(2));
    }

    #[test]
    fn store_failures_are_not_client_errors() {
        assert!(LevelError::invalid("xp").is_client_error());
        assert!(LevelError::TaskNotFound(3).is_client_error());
        assert!(LevelError::AlreadyCompleted(3).is_client_error());
        assert!(!LevelError::Store("disk".to_string()).is_client_error());
    }
}
