//! Fixed-size SQLite connection pool that absorbs write contention.
//!
//! SQLite allows only one writer at a time. Every handle is opened once with
//! WAL journal mode, a bounded busy-wait, NORMAL synchronous mode and
//! memory-mapped reads, then reused for the life of the process.
//!
//! - At most `pool_size` handles are checked out at once (a semaphore).
//! - Handles are opened lazily up to `pool_size` and kept in an idle set.
//! - `acquire` waits at most `acquire_timeout` and then fails with
//!   `PoolExhausted` instead of blocking forever.
//! - A [`PooledConnection`] returns itself to the idle set on drop, so
//!   release happens on every exit path, cancellation included.
//! - [`ConnectionPool::write`] retries "database is busy/locked" with
//!   exponential backoff before surfacing a transient failure. A handle
//!   that failed with an I/O error is closed rather than pooled again.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use parley_core::resilience::retry::RetryPolicy;
use parley_types::config::ParleyConfig;
use parley_types::error::DependencyError;

/// Dependency name used in errors and logs.
pub const DEPENDENCY: &str = "sqlite";

/// Primary SQLite result codes (and extended variants) meaning "try again".
/// 5 = SQLITE_BUSY, 6 = SQLITE_LOCKED, 261 = BUSY_RECOVERY,
/// 262 = LOCKED_SHAREDCACHE, 517 = BUSY_SNAPSHOT.
const BUSY_CODES: [&str; 5] = ["5", "6", "261", "262", "517"];

/// Settings for [`ConnectionPool::connect`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub path: PathBuf,
    pub pool_size: usize,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
    pub write_retry: RetryPolicy,
}

impl PoolOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool_size: 10,
            acquire_timeout: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(5),
            write_retry: RetryPolicy::new(5, Duration::from_millis(50), Duration::from_secs(2)),
        }
    }

    pub fn from_config(config: &ParleyConfig) -> Self {
        Self {
            path: config.database.path.clone(),
            pool_size: config.resilience.pool_size,
            acquire_timeout: config.resilience.acquire_timeout,
            busy_timeout: config.database.busy_timeout,
            write_retry: RetryPolicy::new(
                config.database.write_retry_attempts,
                config.database.write_retry_base_delay,
                config.resilience.max_delay,
            )
            .with_jitter(true),
        }
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn write_retry(mut self, policy: RetryPolicy) -> Self {
        self.write_retry = policy;
        self
    }
}

/// Occupancy counters reported by [`ConnectionPool::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub size: usize,
    pub opened: usize,
    pub idle: usize,
    pub in_use: usize,
    pub closed: bool,
}

/// Result of [`ConnectionPool::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub latency_ms: u64,
    pub file_size_bytes: Option<u64>,
    pub status: PoolStatus,
}

struct IdleConnection {
    id: u64,
    conn: SqliteConnection,
    last_used_at: Instant,
}

struct PoolInner {
    connect_options: SqliteConnectOptions,
    path: PathBuf,
    size: usize,
    acquire_timeout: Duration,
    write_retry: RetryPolicy,
    idle: Mutex<VecDeque<IdleConnection>>,
    permits: Arc<Semaphore>,
    opened: AtomicUsize,
    next_id: AtomicU64,
    // Checked-out handles to close instead of pooling when released.
    retired: Mutex<HashSet<u64>>,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retired(&self) -> MutexGuard<'_, HashSet<u64>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open(&self) -> Result<(u64, SqliteConnection), DependencyError> {
        let conn = self
            .connect_options
            .connect()
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let opened = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(id, opened, size = self.size, "opened sqlite connection");
        Ok((id, conn))
    }

    fn release(&self, id: u64, conn: SqliteConnection) {
        let retired = self.retired().remove(&id);
        if retired || self.permits.is_closed() {
            self.opened.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(id, retired, "dropping sqlite connection on release");
            return;
        }
        self.idle().push_back(IdleConnection {
            id,
            conn,
            last_used_at: Instant::now(),
        });
    }

    async fn close_connection(&self, id: u64, conn: SqliteConnection) {
        self.opened.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = conn.close().await {
            tracing::debug!(id, error = %e, "error closing sqlite connection");
        }
    }

    /// Take handle `id` out of circulation. Closed now if idle, otherwise
    /// dropped when its current holder releases it.
    async fn retire(&self, id: u64) {
        let idle = {
            let mut idle = self.idle();
            idle.iter()
                .position(|c| c.id == id)
                .and_then(|pos| idle.remove(pos))
        };
        match idle {
            Some(idle) => self.close_connection(idle.id, idle.conn).await,
            None if !self.permits.is_closed() => {
                self.retired().insert(id);
            }
            None => {}
        }
    }
}

/// A fixed-size pool of SQLite connections.
///
/// Cheap to clone; clones share the same handles.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.inner.path)
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionPool {
    /// Create the pool and open the first handle eagerly, so a bad path or
    /// unreadable file fails at startup rather than on first use.
    pub async fn connect(options: PoolOptions) -> Result<Self, DependencyError> {
        if let Some(parent) = options.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DependencyError::permanent(
                    DEPENDENCY,
                    format!("cannot create {}: {e}", parent.display()),
                )
            })?;
        }

        let size = options.pool_size.max(1);
        let connect_options = SqliteConnectOptions::new()
            .filename(&options.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true)
            .pragma("mmap_size", "268435456")
            .pragma("cache_size", "-64000")
            .pragma("temp_store", "MEMORY");

        let pool = Self {
            inner: Arc::new(PoolInner {
                connect_options,
                path: options.path,
                size,
                acquire_timeout: options.acquire_timeout,
                write_retry: options.write_retry,
                idle: Mutex::new(VecDeque::with_capacity(size)),
                permits: Arc::new(Semaphore::new(size)),
                opened: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                retired: Mutex::new(HashSet::new()),
            }),
        };

        let (first_id, mut first) = pool.inner.open().await?;
        let version: String = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(&mut first)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        pool.inner.release(first_id, first);

        tracing::info!(
            path = %pool.inner.path.display(),
            pool_size = size,
            sqlite_version = %version,
            "sqlite pool ready"
        );
        Ok(pool)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Check out a handle, waiting at most the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection, DependencyError> {
        self.acquire_timeout(self.inner.acquire_timeout).await
    }

    /// Check out a handle, waiting at most `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection, DependencyError> {
        let started = Instant::now();
        let acquire = Arc::clone(&self.inner.permits).acquire_owned();
        let permit = match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(DependencyError::permanent(DEPENDENCY, "connection pool is closed"));
            }
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(waited_ms, size = self.inner.size, "connection pool exhausted");
                return Err(DependencyError::PoolExhausted { waited_ms });
            }
        };

        // The permit is dropped (and the slot freed) if opening fails or this
        // future is cancelled before the handle is built.
        let idle = self.inner.idle().pop_front();
        let (id, conn, last_used_at) = match idle {
            Some(idle) => (idle.id, idle.conn, Some(idle.last_used_at)),
            None => {
                let (id, conn) = self.inner.open().await?;
                (id, conn, None)
            }
        };

        Ok(PooledConnection {
            id,
            conn: Some(conn),
            last_used_at,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Run a write, retrying while SQLite reports busy/locked.
    ///
    /// `op` receives a freshly acquired handle per attempt and releases it by
    /// dropping it. Non-busy errors are not retried; after an I/O failure the
    /// handle is closed instead of going back to the idle set.
    pub async fn write<T, F, Fut>(&self, mut op: F) -> Result<T, DependencyError>
    where
        F: FnMut(PooledConnection) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let policy = &self.inner.write_retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let conn = self.acquire().await?;
            let id = conn.id;
            let result = op(conn).await;
            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "database busy, retrying write"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if is_connection_broken(&e) {
                        tracing::warn!(id, error = %e, "discarding sqlite connection after failure");
                        self.inner.retire(id).await;
                    } else if is_busy(&e) {
                        tracing::warn!(attempts = attempt, "database still busy, giving up on write");
                    }
                    return Err(classify_sqlx_error(&e));
                }
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        let idle = self.inner.idle().len();
        let closed = self.inner.permits.is_closed();
        let in_use = if closed {
            0
        } else {
            self.inner.size - self.inner.permits.available_permits()
        };
        PoolStatus {
            size: self.inner.size,
            opened: self.inner.opened.load(Ordering::SeqCst),
            idle,
            in_use,
            closed,
        }
    }

    /// Round-trip `SELECT 1` through a pooled handle.
    pub async fn health_check(&self) -> Result<PoolHealth, DependencyError> {
        let started = Instant::now();
        let mut conn = self.acquire().await?;
        sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        drop(conn);
        let latency_ms = started.elapsed().as_millis() as u64;

        let file_size_bytes = tokio::fs::metadata(&self.inner.path)
            .await
            .ok()
            .map(|m| m.len());

        Ok(PoolHealth {
            latency_ms,
            file_size_bytes,
            status: self.status(),
        })
    }

    /// Stop handing out handles and close the idle ones. Handles still
    /// checked out are closed when they are dropped.
    pub async fn close(&self) {
        self.inner.permits.close();
        let drained: Vec<IdleConnection> = self.inner.idle().drain(..).collect();
        for idle in drained {
            self.inner.close_connection(idle.id, idle.conn).await;
        }
        self.inner.retired().clear();
        tracing::info!(path = %self.inner.path.display(), "sqlite pool closed");
    }
}

/// A checked-out handle. Derefs to [`SqliteConnection`].
///
/// Returned to the pool when dropped.
pub struct PooledConnection {
    id: u64,
    conn: Option<SqliteConnection>,
    last_used_at: Option<Instant>,
    pool: Arc<PoolInner>,
    // Dropped after `Drop::drop` has put the handle back in the idle set.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// When this handle was last released, `None` if it was freshly opened.
    pub fn last_used_at(&self) -> Option<Instant> {
        self.last_used_at
    }

    /// Close the handle instead of returning it (e.g. after an I/O error).
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.close_connection(self.id, conn).await;
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("last_used_at", &self.last_used_at)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(self.id, conn);
        }
    }
}

/// Whether `err` is SQLite reporting lock contention.
pub fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code();
            if code.as_deref().is_some_and(|c| BUSY_CODES.contains(&c)) {
                return true;
            }
            let message = db.message();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

/// Whether `err` leaves the handle unusable.
fn is_connection_broken(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed)
}

/// Map a sqlx error into the dependency taxonomy.
pub fn classify_sqlx_error(err: &sqlx::Error) -> DependencyError {
    match err {
        e if is_busy(e) => DependencyError::transient(DEPENDENCY, e.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
            DependencyError::transient(DEPENDENCY, err.to_string())
        }
        _ => DependencyError::permanent(DEPENDENCY, err.to_string()),
    }
}
