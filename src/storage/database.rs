//! Database connection and transaction serialization.
//!
//! SQLite supports a single writer; overlapping BEGIN/COMMIT pairs on one
//! connection fail with "cannot start a transaction within a transaction".
//! [`Database`] therefore funnels every access through one connection behind
//! an async mutex whose FIFO wait queue serializes transactions: a caller
//! only begins its transaction after the previous holder has committed or
//! rolled back. All operations hop through `spawn_blocking` so the async
//! runtime is never blocked on disk I/O.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::Mutex;

use super::schema;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Task join error: {0}")]
    Join(String),

    #[error("Invalid row data: {0}")]
    InvalidRow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Thread-safe handle to the local cache database.
///
/// Cloning is cheap; all clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// Enables foreign keys and WAL mode, then runs migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            Ok(conn)
        })
        .await
        .map_err(|e| DatabaseError::Join(e.to_string()))??;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Opens an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection> {
            let conn = Connection::open_in_memory()?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(conn)
        })
        .await
        .map_err(|e| DatabaseError::Join(e.to_string()))??;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Runs all schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();

            for migration in schema::all_migrations() {
                conn.execute_batch(migration)
                    .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Join(e.to_string()))?
    }

    /// Executes a function with shared access to the connection.
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| DatabaseError::Join(e.to_string()))?
    }

    /// Runs `f` inside BEGIN/COMMIT, rolling back on any error from `f`.
    ///
    /// Transactions are strictly serialized: the connection mutex is held for
    /// the whole BEGIN..COMMIT span and waiters acquire it in FIFO order, so
    /// no two transactions ever interleave. If `f` fails, rollback is
    /// attempted; a rollback failure (the engine may already have rolled
    /// back) is swallowed so the original error propagates. The mutex is
    /// released on every path.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            match f(&tx) {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(err) => {
                    // Dropping the transaction attempts ROLLBACK and ignores
                    // its failure, keeping the original error.
                    drop(tx);
                    Err(err)
                }
            }
        })
        .await
        .map_err(|e| DatabaseError::Join(e.to_string()))?
    }

    /// Runs a read-only query and returns the first row, if any.
    pub async fn select_first<T, F>(
        &self,
        sql: &str,
        params: Vec<String>,
        map: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sql = sql.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt
                .query_row(rusqlite::params_from_iter(params), map)
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// Runs a COUNT-style query and returns whether any rows matched.
    pub async fn exists(&self, sql: &str, params: Vec<String>) -> Result<bool> {
        let sql = sql.to_owned();
        self.with_conn(move |conn| {
            let count: i64 =
                conn.query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))?;
            Ok(count > 0)
        })
        .await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
