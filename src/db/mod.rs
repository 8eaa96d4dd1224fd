mod catalog;
mod schema;
mod store;

pub use catalog::{default_definitions, FeatureCatalog};
pub use store::{AssignmentStore, StoreTx};

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, TransactionBehavior};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{FeatureName, SubjectKind};

/// How long a connection waits on another writer before giving up with `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the SQLite database backing the catalog and the assignment store.
///
/// Clones share one connection. Separate `open` calls on the same file get
/// separate connections and coordinate through SQLite's own locking, which is
/// what keeps several service instances consistent.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::configure(conn)
    }

    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> anyhow::Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        schema::run_migrations(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StorageUnavailable("database lock poisoned".to_string()))
    }

    /// Run a single read against the connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken before `f` performs its first read, so a
    /// read-decide-write sequence can't interleave with another writer, in
    /// this process or any other. The transaction rolls back if `f` fails.
    pub(crate) fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

/// `<data dir>/entitlements.db`, resolved through the platform's project directories.
pub fn default_path() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "entitlements")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("entitlements.db"))
}

impl ToSql for FeatureName {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FeatureName {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        FeatureName::from_str(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown feature name {:?}", s).into()))
    }
}

impl ToSql for SubjectKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SubjectKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        SubjectKind::from_str(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown subject kind {:?}", s).into()))
    }
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
