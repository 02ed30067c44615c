//! SQLite persistence shared by the job store and the work queue.
//!
//! Both live in one database file so a job write and its queue message
//! go through the same connection. Several processes may open the file;
//! writers wait on each other through `busy_timeout`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

/// Milliseconds a writer waits for a lock held by another process.
const BUSY_TIMEOUT_MS: u32 = 5_000;

pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod queue_repo;

pub use error::DatabaseError;

/// Handle to one connection, shared by clones.
///
/// Worker threads of a process take turns on the connection. The queue
/// claim runs its select and update in one transaction under that lock.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the database file, creating parent directories,
    /// and brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout={};",
            BUSY_TIMEOUT_MS
        ))?;
        let db = Self::prepare(conn)?;
        log::info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Private in-memory database, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` while holding the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// Returns the canonical database path: `~/.docpipe/data/docpipe.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".docpipe").join("data").join("docpipe.db"))
}
