use crate::StorageError;
use chrono::{DateTime, Utc};
use lvl_core::{
    LevelResult, ProgressStore, SessionId, SessionSnapshot, SessionTx, Task, TaskClaim, Unlockable,
};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PROGRESS_SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store. Every call opens its own connection so sessions never
/// queue behind a shared handle; writers serialize on `BEGIN IMMEDIATE`.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = store.connect()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        migrate(&conn)?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        schema_version(&self.connect()?)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let conn = self.connect()?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    fn read_snapshot(&self, session: &SessionId) -> Result<Option<SessionSnapshot>, StorageError> {
        let mut conn = self.connect()?;
        // One deferred transaction so all four reads see the same commit.
        let tx = conn.transaction()?;
        let total_xp = tx
            .query_row(
                "SELECT total_xp FROM sessions WHERE id = ?1",
                [session.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        let Some(total_xp) = total_xp else {
            return Ok(None);
        };

        let snapshot = SessionSnapshot {
            session: session.clone(),
            total_xp: from_sql_int(total_xp, "total_xp")?,
            unlocked: load_unlocked(&tx, session)?,
            tasks: load_tasks(&tx, session)?,
            unlockables: load_unlockables(&tx, session)?,
        };
        tx.commit()?;
        Ok(Some(snapshot))
    }
}

impl ProgressStore for SqliteStore {
    fn session_exists(&self, session: &SessionId) -> LevelResult<bool> {
        let conn = self.connect()?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?1",
                [session.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map_err(StorageError::from)?
            .is_some();
        Ok(exists)
    }

    fn ensure_session(&self, session: &SessionId) -> LevelResult<bool> {
        let conn = self.connect()?;
        Ok(insert_session(&conn, session)?)
    }

    fn snapshot(&self, session: &SessionId) -> LevelResult<Option<SessionSnapshot>> {
        Ok(self.read_snapshot(session)?)
    }

    fn write<T, F>(&self, session: &SessionId, op: F) -> LevelResult<T>
    where
        F: FnOnce(&mut dyn SessionTx) -> LevelResult<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;
        insert_session(&tx, session)?;

        let outcome = op(&mut SqliteTx {
            conn: &tx,
            session,
        });
        match outcome {
            Ok(value) => {
                tx.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            // dropping the transaction rolls it back
            Err(err) => Err(err),
        }
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
    session: &'a SessionId,
}

impl SessionTx for SqliteTx<'_> {
    fn total_xp(&self) -> LevelResult<u64> {
        let total = self
            .conn
            .query_row(
                "SELECT total_xp FROM sessions WHERE id = ?1",
                [self.session.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map_err(StorageError::from)?;
        Ok(from_sql_int(total, "total_xp")?)
    }

    fn set_total_xp(&mut self, total_xp: u64) -> LevelResult<()> {
        let total_xp = to_sql_int(total_xp, "total_xp")?;
        self.conn
            .execute(
                "UPDATE sessions SET total_xp = ?1 WHERE id = ?2",
                params![total_xp, self.session.as_str()],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn set_unlocked(&mut self, level: u64) -> LevelResult<bool> {
        let level = to_sql_int(level, "level")?;
        let changes = self
            .conn
            .execute(
                "
                INSERT OR IGNORE INTO unlocked_levels (session_id, level, unlocked_at)
                VALUES (?1, ?2, ?3)
                ",
                params![self.session.as_str(), level, Utc::now().to_rfc3339()],
            )
            .map_err(StorageError::from)?;
        Ok(changes > 0)
    }

    fn insert_task(&mut self, name: &str, xp: u32) -> LevelResult<Task> {
        let created_at = Utc::now();
        self.conn
            .execute(
                "
                INSERT INTO tasks (session_id, name, xp, completed, created_at)
                VALUES (?1, ?2, ?3, 0, ?4)
                ",
                params![
                    self.session.as_str(),
                    name,
                    i64::from(xp),
                    created_at.to_rfc3339()
                ],
            )
            .map_err(StorageError::from)?;
        Ok(Task {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            xp,
            completed: false,
            created_at,
        })
    }

    fn claim_task(&mut self, task_id: i64) -> LevelResult<TaskClaim> {
        let row = self
            .conn
            .query_row(
                "SELECT xp, completed FROM tasks WHERE id = ?1 AND session_id = ?2",
                params![task_id, self.session.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()
            .map_err(StorageError::from)?;
        let Some((xp, completed)) = row else {
            return Ok(TaskClaim::NotFound);
        };
        if completed {
            return Ok(TaskClaim::AlreadyCompleted);
        }

        let changes = self
            .conn
            .execute(
                "
                UPDATE tasks SET completed = 1
                WHERE id = ?1 AND session_id = ?2 AND completed = 0
                ",
                params![task_id, self.session.as_str()],
            )
            .map_err(StorageError::from)?;
        if changes == 0 {
            return Ok(TaskClaim::AlreadyCompleted);
        }
        let xp = u32::try_from(xp)
            .map_err(|_| StorageError::Corrupt(format!("task {task_id} has xp {xp}")))?;
        Ok(TaskClaim::Claimed(xp))
    }

    fn find_unlockable(&self, level: u64, description: &str) -> LevelResult<Option<Unlockable>> {
        let level = to_sql_int(level, "level")?;
        let found = self
            .conn
            .query_row(
                "
                SELECT id, level, description, created_at
                FROM unlockables
                WHERE session_id = ?1 AND level = ?2 AND description = ?3
                ",
                params![self.session.as_str(), level, description],
                unlockable_from_row,
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(found)
    }

    fn insert_unlockable(&mut self, level: u64, description: &str) -> LevelResult<Unlockable> {
        let created_at = Utc::now();
        self.conn
            .execute(
                "
                INSERT INTO unlockables (session_id, level, description, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ",
                params![
                    self.session.as_str(),
                    to_sql_int(level, "level")?,
                    description,
                    created_at.to_rfc3339()
                ],
            )
            .map_err(StorageError::from)?;
        Ok(Unlockable {
            id: self.conn.last_insert_rowid(),
            level,
            description: description.to_string(),
            created_at,
        })
    }

    fn unlockables_at(&self, levels: &[u64]) -> LevelResult<Vec<Unlockable>> {
        let mut statement = self
            .conn
            .prepare(
                "
                SELECT id, level, description, created_at
                FROM unlockables
                WHERE session_id = ?1 AND level = ?2
                ORDER BY id ASC
                ",
            )
            .map_err(StorageError::from)?;

        let mut levels = levels.to_vec();
        levels.sort_unstable();
        levels.dedup();

        let mut found = Vec::new();
        for level in levels {
            let rows = statement
                .query_map(
                    params![self.session.as_str(), to_sql_int(level, "level")?],
                    unlockable_from_row,
                )
                .map_err(StorageError::from)?;
            for row in rows {
                found.push(row.map_err(StorageError::from)?);
            }
        }
        Ok(found)
    }
}

fn schema_version(conn: &Connection) -> Result<i64, StorageError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn migrate(conn: &Connection) -> Result<(), StorageError> {
    let current = schema_version(conn)?;
    if current > PROGRESS_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchemaVersion {
            found: current,
            supported: PROGRESS_SCHEMA_VERSION,
        });
    }

    if current < 1 {
        let sql = include_str!("../migrations/0001_progress_schema.sql");
        conn.execute_batch(sql)?;
        conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
    }

    Ok(())
}

fn insert_session(conn: &Connection, session: &SessionId) -> Result<bool, StorageError> {
    let changes = conn.execute(
        "INSERT OR IGNORE INTO sessions (id, total_xp, created_at) VALUES (?1, 0, ?2)",
        params![session.as_str(), Utc::now().to_rfc3339()],
    )?;
    Ok(changes > 0)
}

fn load_unlocked(conn: &Connection, session: &SessionId) -> Result<BTreeSet<u64>, StorageError> {
    let mut statement =
        conn.prepare("SELECT level FROM unlocked_levels WHERE session_id = ?1 ORDER BY level")?;
    let rows = statement.query_map([session.as_str()], |row| row.get::<_, i64>(0))?;

    let mut unlocked = BTreeSet::new();
    for row in rows {
        unlocked.insert(from_sql_int(row?, "level")?);
    }
    Ok(unlocked)
}

fn load_tasks(conn: &Connection, session: &SessionId) -> Result<Vec<Task>, StorageError> {
    let mut statement = conn.prepare(
        "
        SELECT id, name, xp, completed, created_at
        FROM tasks
        WHERE session_id = ?1
        ORDER BY id ASC
        ",
    )?;
    let rows = statement.query_map([session.as_str()], task_from_row)?;

    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(row?);
    }
    Ok(tasks)
}

fn load_unlockables(
    conn: &Connection,
    session: &SessionId,
) -> Result<Vec<Unlockable>, StorageError> {
    let mut statement = conn.prepare(
        "
        SELECT id, level, description, created_at
        FROM unlockables
        WHERE session_id = ?1
        ORDER BY level ASC, id ASC
        ",
    )?;
    let rows = statement.query_map([session.as_str()], unlockable_from_row)?;

    let mut unlockables = Vec::new();
    for row in rows {
        unlockables.push(row?);
    }
    Ok(unlockables)
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let xp = row.get::<_, i64>(2)?;
    let xp = u32::try_from(xp).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, Box::new(err))
    })?;
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        xp,
        completed: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}

fn unlockable_from_row(row: &Row<'_>) -> rusqlite::Result<Unlockable> {
    let level = row.get::<_, i64>(1)?;
    let level = u64::try_from(level).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Integer, Box::new(err))
    })?;
    Ok(Unlockable {
        id: row.get(0)?,
        level,
        description: row.get(2)?,
        created_at: timestamp_column(row, 3)?,
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(row.get::<_, String>(index)?).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

fn to_sql_int(value: u64, field: &str) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::Corrupt(format!("{field} {value} out of range")))
}

fn from_sql_int(value: i64, field: &str) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::Corrupt(format!("negative {field}: {value}")))
}
