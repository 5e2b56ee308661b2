mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, PROGRESS_SCHEMA_VERSION};

use lvl_core::{LevelError, LevelResult, ProgressStore, SessionId, SessionSnapshot, SessionTx};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("session lock poisoned")]
    Poisoned,
}

impl From<StorageError> for LevelError {
    fn from(err: StorageError) -> Self {
        LevelError::Store(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Sqlite => "sqlite",
            StoreKind::Memory => "memory",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "sqlite" | "sql" | "db" => Ok(StoreKind::Sqlite),
            "memory" | "mem" => Ok(StoreKind::Memory),
            other => Err(format!("Unknown store: {other}")),
        }
    }
}

/// Backend chosen at startup.
pub enum AnyStore {
    Sqlite(SqliteStore),
    Memory(MemoryStore),
}

impl AnyStore {
    pub fn kind(&self) -> StoreKind {
        match self {
            AnyStore::Sqlite(_) => StoreKind::Sqlite,
            AnyStore::Memory(_) => StoreKind::Memory,
        }
    }
}

impl ProgressStore for AnyStore {
    fn session_exists(&self, session: &SessionId) -> LevelResult<bool> {
        match self {
            AnyStore::Sqlite(store) => store.session_exists(session),
            AnyStore::Memory(store) => store.session_exists(session),
        }
    }

    fn ensure_session(&self, session: &SessionId) -> LevelResult<bool> {
        match self {
            AnyStore::Sqlite(store) => store.ensure_session(session),
            AnyStore::Memory(store) => store.ensure_session(session),
        }
    }

    fn snapshot(&self, session: &SessionId) -> LevelResult<Option<SessionSnapshot>> {
        match self {
            AnyStore::Sqlite(store) => store.snapshot(session),
            AnyStore::Memory(store) => store.snapshot(session),
        }
    }

    fn write<T, F>(&self, session: &SessionId, op: F) -> LevelResult<T>
    where
        F: FnOnce(&mut dyn SessionTx) -> LevelResult<T>,
    {
        match self {
            AnyStore::Sqlite(store) => store.write(session, op),
            AnyStore::Memory(store) => store.write(session, op),
        }
    }
}
