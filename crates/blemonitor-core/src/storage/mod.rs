//! Durable storage for status sessions and thresholds.
//!
//! [`PersistenceGateway`] is the seam the monitor and threshold editor talk
//! to. [`SqliteStore`] implements it on a single SQLite connection owned by a
//! dedicated worker thread; callers submit closures over a channel and await
//! the reply, so no async task ever blocks on disk I/O.
//!
//! Every query binds its parameters. History is keyed on both the device
//! name and address.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::types::{DeviceIdentity, DurationTable, Status, StatusSession};

mod migrations;

use migrations::run_migrations;

/// Errors raised by the session and threshold store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database file could not be opened.
    #[error("Failed to open database at {}: {source}", path.display())]
    Open {
        /// Database path.
        path: PathBuf,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// The parent directory of the database could not be created.
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Schema setup failed.
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A statement failed.
    #[error("Database query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// A stored row could not be mapped back to a domain value.
    #[error("Invalid stored value: {0}")]
    InvalidRow(String),

    /// The worker thread could not be started.
    #[error("Failed to start database worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The worker thread is gone.
    #[error("Database worker is not running")]
    WorkerGone,
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Returns `true` when the database was busy or locked by another writer.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            Self::Query(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }
}

/// Durable store behind the monitor.
pub trait PersistenceGateway: Send + Sync + 'static {
    /// Per-status totals over every stored session of `device`.
    fn load_durations(
        &self,
        device: &DeviceIdentity,
    ) -> impl Future<Output = StorageResult<DurationTable>> + Send;

    /// Appends closed sessions of `device`. All or nothing.
    fn append_sessions(
        &self,
        device: &DeviceIdentity,
        sessions: Vec<StatusSession>,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Stored boundary under key `index`, if any.
    fn load_threshold(&self, index: u8) -> impl Future<Output = StorageResult<Option<u16>>> + Send;

    /// Stores boundary `value` under key `index`.
    fn save_threshold(&self, index: u8, value: u16)
        -> impl Future<Output = StorageResult<()>> + Send;
}

// =============================================================================
// SQLITE WORKER
// =============================================================================

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to database worker: {err}");
            }
            if handle.join().is_err() {
                error!("Database worker panicked");
            }
        }
    }
}

fn to_i64(value: u64) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidRow(format!("value {value} exceeds SQLite INTEGER range")))
}

fn to_u64(value: i64) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| StorageError::InvalidRow(format!("value {value} is negative")))
}

/// SQLite implementation of [`PersistenceGateway`].
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
    path: Arc<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, database or schema cannot be set up.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<StorageResult<()>>();
        let path_for_thread = path.clone();

        let worker = thread::Builder::new()
            .name("blemonitor-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(conn) => conn,
                    Err(source) => {
                        let _ = ready_tx.send(Err(StorageError::Open {
                            path: path_for_thread,
                            source,
                        }));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    warn!("Failed to enable WAL mode: {err}");
                }

                if ready_tx.send(run_migrations(&mut conn)).is_err() {
                    error!("Database opener went away before the ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                debug!("Database worker shutting down");
            })
            .map_err(StorageError::WorkerSpawn)?;

        ready_rx.recv().map_err(|_| StorageError::WorkerGone)??;

        info!(path = %path.display(), "Session store opened");

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            path: Arc::new(path),
        })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Runs `task` on the worker thread and awaits its result.
    ///
    /// # Errors
    ///
    /// Returns whatever `task` returns, or [`StorageError::WorkerGone`].
    pub async fn execute<F, T>(&self, task: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                debug!("Database caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|_| StorageError::WorkerGone)?;

        reply_rx.await.map_err(|_| StorageError::WorkerGone)?
    }

    /// Number of stored sessions for `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn session_count(&self, device: &DeviceIdentity) -> StorageResult<u64> {
        let device = device.clone();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM status_sessions
                 WHERE device_name = ?1 AND device_address = ?2",
                params![device.name, device.address],
                |row| row.get(0),
            )?;
            to_u64(count)
        })
        .await
    }

    /// Most recent stored sessions for `device`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is malformed.
    pub async fn recent_sessions(
        &self,
        device: &DeviceIdentity,
        limit: u32,
    ) -> StorageResult<Vec<StatusSession>> {
        let device = device.clone();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status, start_time_ms, end_time_ms FROM status_sessions
                 WHERE device_name = ?1 AND device_address = ?2
                 ORDER BY start_time_ms DESC, id DESC
                 LIMIT ?3",
            )?;

            let mut rows = stmt.query(params![device.name, device.address, limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                let status = status_from_code(row.get(0)?)?;
                let start = from_millis(row.get(1)?)?;
                let end = from_millis(row.get(2)?)?;
                sessions.push(StatusSession::closed(device.clone(), status, start, end));
            }
            Ok(sessions)
        })
        .await
    }
}

fn status_from_code(code: i64) -> StorageResult<Status> {
    Status::from_code(code)
        .filter(|s| s.is_tracked())
        .ok_or_else(|| StorageError::InvalidRow(format!("unknown status code {code}")))
}

fn from_millis(ms: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::InvalidRow(format!("timestamp {ms} out of range")))
}

impl PersistenceGateway for SqliteStore {
    async fn load_durations(&self, device: &DeviceIdentity) -> StorageResult<DurationTable> {
        let device = device.clone();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status, SUM(duration_ms) FROM status_sessions
                 WHERE device_name = ?1 AND device_address = ?2
                 GROUP BY status",
            )?;

            let mut rows = stmt.query(params![device.name, device.address])?;
            let mut table = DurationTable::default();
            while let Some(row) = rows.next()? {
                let code: i64 = row.get(0)?;
                let Some(status) = Status::from_code(code).filter(|s| s.is_tracked()) else {
                    warn!(code, "skipping sessions with unknown status code");
                    continue;
                };
                table.add(status, to_u64(row.get(1)?)?);
            }
            Ok(table)
        })
        .await
    }

    async fn append_sessions(
        &self,
        device: &DeviceIdentity,
        sessions: Vec<StatusSession>,
    ) -> StorageResult<()> {
        if sessions.is_empty() {
            return Ok(());
        }

        let device = device.clone();
        let count = sessions.len();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO status_sessions
                        (device_name, device_address, status, start_time_ms, end_time_ms, duration_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for session in &sessions {
                    stmt.execute(params![
                        device.name,
                        device.address,
                        session.status().code(),
                        session.start().timestamp_millis(),
                        session.end().timestamp_millis(),
                        to_i64(session.duration_ms())?,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        debug!(count, "Appended status sessions");
        Ok(())
    }

    async fn load_threshold(&self, index: u8) -> StorageResult<Option<u16>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare("SELECT value FROM thresholds WHERE idx = ?1")?;
            let mut rows = stmt.query(params![index])?;
            match rows.next()? {
                Some(row) => {
                    let value: i64 = row.get(0)?;
                    u16::try_from(value).map(Some).map_err(|_| {
                        StorageError::InvalidRow(format!("threshold {index} value {value}"))
                    })
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn save_threshold(&self, index: u8, value: u16) -> StorageResult<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO thresholds (idx, value) VALUES (?1, ?2)
                 ON CONFLICT(idx) DO UPDATE SET value = excluded.value",
                params![index, value],
            )?;
            Ok(())
        })
        .await
    }
}

/// Default database location.
///
/// On Linux: `/var/lib/blemonitor/blemonitor.db`
/// Elsewhere: the platform data directory.
#[must_use]
pub fn default_database_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/blemonitor/blemonitor.db")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "blemonitor").map_or_else(
            || PathBuf::from("./blemonitor.db"),
            |dirs| dirs.data_dir().join("blemonitor.db"),
        )
    }
}

// =============================================================================
// IN-MEMORY STORE (tests)
// =============================================================================

#[cfg(test)]
pub(crate) use memory::MemoryStore;
