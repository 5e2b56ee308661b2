use crate::StorageError;
use chrono::Utc;
use lvl_core::{
    LevelResult, ProgressStore, SessionId, SessionSnapshot, SessionTx, Task, TaskClaim, Unlockable,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default)]
struct SessionRecord {
    total_xp: u64,
    unlocked: BTreeSet<u64>,
    tasks: Vec<Task>,
    unlockables: Vec<Unlockable>,
    next_task_id: i64,
    next_unlockable_id: i64,
}

/// In-process store. Each session sits behind its own lock; the map lock is
/// only held to look up or insert a partition.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Arc<RwLock<SessionRecord>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> Result<usize, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|_| StorageError::Poisoned)?
            .len())
    }

    fn partition(
        &self,
        session: &SessionId,
    ) -> Result<Option<Arc<RwLock<SessionRecord>>>, StorageError> {
        let sessions = self.sessions.read().map_err(|_| StorageError::Poisoned)?;
        Ok(sessions.get(session).cloned())
    }

    fn partition_or_insert(
        &self,
        session: &SessionId,
    ) -> Result<(Arc<RwLock<SessionRecord>>, bool), StorageError> {
        if let Some(existing) = self.partition(session)? {
            return Ok((existing, false));
        }
        let mut sessions = self.sessions.write().map_err(|_| StorageError::Poisoned)?;
        // another writer may have inserted between the two locks
        if let Some(existing) = sessions.get(session) {
            return Ok((existing.clone(), false));
        }
        let record = Arc::new(RwLock::new(SessionRecord::default()));
        sessions.insert(session.clone(), record.clone());
        Ok((record, true))
    }
}

impl ProgressStore for MemoryStore {
    fn session_exists(&self, session: &SessionId) -> LevelResult<bool> {
        Ok(self.partition(session)?.is_some())
    }

    fn ensure_session(&self, session: &SessionId) -> LevelResult<bool> {
        let (_, created) = self.partition_or_insert(session)?;
        Ok(created)
    }

    fn snapshot(&self, session: &SessionId) -> LevelResult<Option<SessionSnapshot>> {
        let Some(partition) = self.partition(session)? else {
            return Ok(None);
        };
        let record = partition.read().map_err(|_| StorageError::Poisoned)?;

        let mut unlockables = record.unlockables.clone();
        unlockables.sort_by_key(|unlockable| (unlockable.level, unlockable.id));
        Ok(Some(SessionSnapshot {
            session: session.clone(),
            total_xp: record.total_xp,
            unlocked: record.unlocked.clone(),
            tasks: record.tasks.clone(),
            unlockables,
        }))
    }

    fn write<T, F>(&self, session: &SessionId, op: F) -> LevelResult<T>
    where
        F: FnOnce(&mut dyn SessionTx) -> LevelResult<T>,
    {
        let (partition, _) = self.partition_or_insert(session)?;
        let mut record = partition.write().map_err(|_| StorageError::Poisoned)?;

        // Work on a copy so an error leaves the published record untouched.
        let mut draft = record.clone();
        let value = op(&mut MemoryTx { record: &mut draft })?;
        *record = draft;
        Ok(value)
    }
}

struct MemoryTx<'a> {
    record: &'a mut SessionRecord,
}

impl SessionTx for MemoryTx<'_> {
    fn total_xp(&self) -> LevelResult<u64> {
        Ok(self.record.total_xp)
    }

    fn set_total_xp(&mut self, total_xp: u64) -> LevelResult<()> {
        self.record.total_xp = total_xp;
        Ok(())
    }

    fn set_unlocked(&mut self, level: u64) -> LevelResult<bool> {
        Ok(self.record.unlocked.insert(level))
    }

    fn insert_task(&mut self, name: &str, xp: u32) -> LevelResult<Task> {
        self.record.next_task_id += 1;
        let task = Task {
            id: self.record.next_task_id,
            name: name.to_string(),
            xp,
            completed: false,
            created_at: Utc::now(),
        };
        self.record.tasks.push(task.clone());
        Ok(task)
    }

    fn claim_task(&mut self, task_id: i64) -> LevelResult<TaskClaim> {
        let Some(task) = self.record.tasks.iter_mut().find(|task| task.id == task_id) else {
            return Ok(TaskClaim::NotFound);
        };
        if task.completed {
            return Ok(TaskClaim::AlreadyCompleted);
        }
        task.completed = true;
        Ok(TaskClaim::Claimed(task.xp))
    }

    fn find_unlockable(&self, level: u64, description: &str) -> LevelResult<Option<Unlockable>> {
        Ok(self
            .record
            .unlockables
            .iter()
            .find(|unlockable| unlockable.level == level && unlockable.description == description)
            .cloned())
    }

    fn insert_unlockable(&mut self, level: u64, description: &str) -> LevelResult<Unlockable> {
        self.record.next_unlockable_id += 1;
        let unlockable = Unlockable {
            id: self.record.next_unlockable_id,
            level,
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.record.unlockables.push(unlockable.clone());
        Ok(unlockable)
    }

    fn unlockables_at(&self, levels: &[u64]) -> LevelResult<Vec<Unlockable>> {
        let wanted: BTreeSet<u64> = levels.iter().copied().collect();
        let mut found: Vec<Unlockable> = self
            .record
            .unlockables
            .iter()
            .filter(|unlockable| wanted.contains(&unlockable.level))
            .cloned()
            .collect();
        found.sort_by_key(|unlockable| (unlockable.level, unlockable.id));
        Ok(found)
    }
}
