//! State Store collaborator contract.
//!
//! A store owns every session partition. Reads go through [`ProgressStore::snapshot`];
//! every mutation runs inside one [`ProgressStore::write`] call, which is
//! exclusive for its session and all-or-nothing: the changes made through the
//! [`SessionTx`] become visible only when the closure returns `Ok`.

use crate::{LevelResult, SessionId, SessionSnapshot, Task, Unlockable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClaim {
    /// Flag flipped false -> true; carries the task's xp.
    Claimed(u32),
    NotFound,
    AlreadyCompleted,
}

pub trait SessionTx {
    fn total_xp(&self) -> LevelResult<u64>;

    /// Overwrites the session total. Callers only ever pass a larger value.
    fn set_total_xp(&mut self, total_xp: u64) -> LevelResult<()>;

    /// Returns `true` when the level was not unlocked before.
    fn set_unlocked(&mut self, level: u64) -> LevelResult<bool>;

    fn insert_task(&mut self, name: &str, xp: u32) -> LevelResult<Task>;

    fn claim_task(&mut self, task_id: i64) -> LevelResult<TaskClaim>;

    fn find_unlockable(&self, level: u64, description: &str) -> LevelResult<Option<Unlockable>>;

    fn insert_unlockable(&mut self, level: u64, description: &str) -> LevelResult<Unlockable>;

    /// Unlockables registered for any of `levels`, ordered by level then id.
    fn unlockables_at(&self, levels: &[u64]) -> LevelResult<Vec<Unlockable>>;
}

pub trait ProgressStore: Send + Sync {
    fn session_exists(&self, session: &SessionId) -> LevelResult<bool>;

    /// Creates the partition with zero XP if needed. Returns `true` if created.
    fn ensure_session(&self, session: &SessionId) -> LevelResult<bool>;

    fn snapshot(&self, session: &SessionId) -> LevelResult<Option<SessionSnapshot>>;

    /// Runs `op` as one exclusive write unit for `session`, creating the
    /// partition first if it does not exist.
    fn write<T, F>(&self, session: &SessionId, op: F) -> LevelResult<T>
    where
        F: FnOnce(&mut dyn SessionTx) -> LevelResult<T>;
}
