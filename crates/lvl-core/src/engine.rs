use crate::input;
use crate::leveling::{crossed_levels, level_for, Progress};
use crate::session::{SessionId, DEFAULT_TOKEN_LEN};
use crate::store::{ProgressStore, TaskClaim};
use crate::{LevelError, LevelResult, SessionSnapshot, Task, Unlockable};
use rand::Rng;
use serde::Serialize;

/// How many fresh tokens are tried before giving up on finding an unused one.
pub const TOKEN_ATTEMPTS: usize = 8;

/// Totals are persisted as signed 64-bit integers.
pub const MAX_TOTAL_XP: u64 = i64::MAX as u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: SessionId,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionResult {
    pub task_id: i64,
    pub xp_awarded: u32,
    pub total_xp: u64,
    pub level: u64,
    pub progress: Progress,
    /// Levels crossed by this completion, ascending. Recorded even when no
    /// unlockable is registered for them yet.
    pub newly_unlocked: Vec<u64>,
    /// Unlockables registered for the levels in `newly_unlocked`.
    pub rewards: Vec<Unlockable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockableRegistration {
    pub unlockable: Unlockable,
    /// `false` when an identical (level, description) pair already existed.
    pub created: bool,
    pub unlocked: bool,
}

pub struct LevelingEngine<S> {
    store: S,
    token_len: usize,
}

impl<S: ProgressStore> LevelingEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            token_len: DEFAULT_TOKEN_LEN,
        }
    }

    pub fn with_token_len(mut self, token_len: usize) -> Self {
        self.token_len = token_len;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Maps an external token to its partition, creating it on first use.
    /// Without a token a fresh, currently unused one is generated.
    pub fn resolve_or_create(&self, token: Option<&str>) -> LevelResult<SessionHandle> {
        match token {
            Some(token) => {
                let id = SessionId::parse(token)?;
                let created = self.store.ensure_session(&id)?;
                Ok(SessionHandle { id, created })
            }
            None => self.create_session(&mut rand::thread_rng()),
        }
    }

    pub fn create_session<R: Rng + ?Sized>(&self, rng: &mut R) -> LevelResult<SessionHandle> {
        for _ in 0..TOKEN_ATTEMPTS {
            let id = SessionId::generate(rng, self.token_len);
            if self.store.ensure_session(&id)? {
                return Ok(SessionHandle { id, created: true });
            }
        }
        Err(LevelError::Store(format!(
            "no unused session token after {TOKEN_ATTEMPTS} attempts"
        )))
    }

    pub fn snapshot(&self, session: &SessionId) -> LevelResult<SessionSnapshot> {
        Ok(self
            .store
            .snapshot(session)?
            .unwrap_or_else(|| SessionSnapshot::empty(session.clone())))
    }

    pub fn add_task(&self, session: &SessionId, name: &str, xp: i64) -> LevelResult<Task> {
        let name = input::task_name(name)?;
        let xp = input::task_xp(xp)?;
        self.store.write(session, |tx| tx.insert_task(&name, xp))
    }

    pub fn complete_task(&self, session: &SessionId, task_id: i64) -> LevelResult<CompletionResult> {
        self.store.write(session, |tx| {
            let xp = match tx.claim_task(task_id)? {
                TaskClaim::Claimed(xp) => xp,
                TaskClaim::NotFound => return Err(LevelError::TaskNotFound(task_id)),
                TaskClaim::AlreadyCompleted => return Err(LevelError::AlreadyCompleted(task_id)),
            };

            let old_total = tx.total_xp()?;
            let new_total = old_total
                .checked_add(u64::from(xp))
                .filter(|total| *total <= MAX_TOTAL_XP)
                .ok_or_else(|| LevelError::invalid("total xp would overflow"))?;
            tx.set_total_xp(new_total)?;

            let mut newly_unlocked = Vec::new();
            for level in crossed_levels(old_total, new_total) {
                if tx.set_unlocked(level)? {
                    newly_unlocked.push(level);
                }
            }
            let rewards = if newly_unlocked.is_empty() {
                Vec::new()
            } else {
                tx.unlockables_at(&newly_unlocked)?
            };

            Ok(CompletionResult {
                task_id,
                xp_awarded: xp,
                total_xp: new_total,
                level: level_for(new_total),
                progress: Progress::from_total(new_total),
                newly_unlocked,
                rewards,
            })
        })
    }

    pub fn register_unlockable(
        &self,
        session: &SessionId,
        level: i64,
        description: &str,
    ) -> LevelResult<UnlockableRegistration> {
        let level = input::unlockable_level(level)?;
        let description = input::unlockable_description(description)?;
        self.store.write(session, |tx| {
            let (unlockable, created) = match tx.find_unlockable(level, &description)? {
                Some(existing) => (existing, false),
                None => (tx.insert_unlockable(level, &description)?, true),
            };
            let unlocked = level <= level_for(tx.total_xp()?);
            if unlocked {
                tx.set_unlocked(level)?;
            }
            Ok(UnlockableRegistration {
                unlockable,
                created,
                unlocked,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionTx;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Knows a fixed set of tokens and refuses writes.
    struct ReadOnlyStore {
        taken: Mutex<BTreeSet<String>>,
        claim_everything: bool,
    }

    impl ReadOnlyStore {
        fn new(claim_everything: bool) -> Self {
            Self {
                taken: Mutex::new(BTreeSet::new()),
                claim_everything,
            }
        }
    }

    impl ProgressStore for ReadOnlyStore {
        fn session_exists(&self, session: &SessionId) -> LevelResult<bool> {
            Ok(self.claim_everything || self.taken.lock().unwrap().contains(session.as_str()))
        }

        fn ensure_session(&self, session: &SessionId) -> LevelResult<bool> {
            if self.claim_everything {
                return Ok(false);
            }
            Ok(self.taken.lock().unwrap().insert(session.to_string()))
        }

        fn snapshot(&self, _session: &SessionId) -> LevelResult<Option<SessionSnapshot>> {
            Ok(None)
        }

        fn write<T, F>(&self, _session: &SessionId, _op: F) -> LevelResult<T>
        where
            F: FnOnce(&mut dyn SessionTx) -> LevelResult<T>,
        {
            panic!("validation should reject before any write");
        }
    }

    fn session() -> SessionId {
        SessionId::parse("abcd").expect("token")
    }

    #[test]
    fn invalid_task_is_rejected_before_touching_the_store() {
        let engine = LevelingEngine::new(ReadOnlyStore::new(false));
        assert!(matches!(
            engine.add_task(&session(), "Clean desk", 0),
            Err(LevelError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.add_task(&session(), "   ", 10),
            Err(LevelError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.add_task(&session(), "Huge", i64::from(input::MAX_TASK_XP) + 1),
            Err(LevelError::InvalidInput(_))
        ));
    }

    #[test]
    fn invalid_unlockable_is_rejected_before_touching_the_store() {
        let engine = LevelingEngine::new(ReadOnlyStore::new(false));
        assert!(matches!(
            engine.register_unlockable(&session(), -1, "x"),
            Err(LevelError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.register_unlockable(&session(), 2, "  "),
            Err(LevelError::InvalidInput(_))
        ));
    }

    #[test]
    fn missing_session_snapshot_is_empty() {
        let engine = LevelingEngine::new(ReadOnlyStore::new(false));
        let snapshot = engine.snapshot(&session()).expect("snapshot");
        assert_eq!(snapshot.total_xp, 0);
        assert!(snapshot.tasks.is_empty());
        assert!(snapshot.unlocked.is_empty());
    }

    #[test]
    fn generated_tokens_skip_taken_ones() {
        let engine = LevelingEngine::new(ReadOnlyStore::new(false)).with_token_len(4);
        let first = engine
            .create_session(&mut StdRng::seed_from_u64(11))
            .expect("first");
        let second = engine
            .create_session(&mut StdRng::seed_from_u64(11))
            .expect("second");
        assert!(first.created && second.created);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn token_generation_gives_up_when_everything_is_taken() {
        let engine = LevelingEngine::new(ReadOnlyStore::new(true));
        let err = engine
            .create_session(&mut StdRng::seed_from_u64(1))
            .expect_err("all tokens taken");
        assert!(matches!(err, LevelError::Store(_)));
    }

    #[test]
    fn explicit_token_is_validated_and_reports_creation() {
        let engine = LevelingEngine::new(ReadOnlyStore::new(false));
        let first = engine.resolve_or_create(Some("team-a")).expect("resolve");
        let again = engine.resolve_or_create(Some("team-a")).expect("resolve");
        assert!(first.created);
        assert!(!again.created);
        assert!(engine.resolve_or_create(Some("bad token")).is_err());
    }
}
