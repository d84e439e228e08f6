//! Ambient transaction scopes.
//!
//! A [`Context`] is threaded through every repository call. When it carries
//! a transaction handle, the call runs on that transaction's connection;
//! otherwise it runs on a pooled connection in autocommit mode.
//! [`TxManager::run`] opens a scope, hands the unit of work a context bound
//! to it, and guarantees exactly one COMMIT or ROLLBACK.

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use sqlx::pool::PoolConnection;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::time::Instant;

use crate::error::{LedgerError, LedgerResult};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// How a transaction scope is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Takes the write lock up front, so competing writers queue at BEGIN
    /// instead of failing on a lock upgrade halfway through.
    ReadWrite,
    /// Deferred; the first read pins the snapshot every later read sees.
    ReadOnly,
}

impl TxMode {
    fn begin_statement(self) -> &'static str {
        match self {
            TxMode::ReadWrite => "BEGIN IMMEDIATE",
            TxMode::ReadOnly => "BEGIN DEFERRED",
        }
    }
}

struct ScopeState {
    conn: Option<PoolConnection<Sqlite>>,
}

impl Drop for ScopeState {
    fn drop(&mut self) {
        // Neither COMMIT nor ROLLBACK ran: the owner was cancelled. Closing the
        // connection makes SQLite discard the open transaction.
        if let Some(conn) = self.conn.as_mut() {
            tracing::warn!("transaction scope dropped while open, closing its connection");
            conn.close_on_drop();
        }
    }
}

/// Opaque capability for one open transaction.
pub struct TxHandle {
    id: u64,
    mode: TxMode,
    state: Mutex<ScopeState>,
}

impl TxHandle {
    /// Take a connection and open a transaction on it. Waiting for the pool
    /// or for the write lock is bounded by `deadline`.
    async fn begin(
        pool: &SqlitePool,
        mode: TxMode,
        deadline: Option<Instant>,
    ) -> LedgerResult<Self> {
        let mut conn = bounded(deadline, pool.acquire())
            .await?
            .map_err(|e| LedgerError::from_store("begin", e))?;

        let begun = bounded(deadline, (&mut *conn).execute(mode.begin_statement())).await;
        match begun {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(LedgerError::from_store("begin", err)),
            Err(err) => {
                // BEGIN may still complete on the connection after we stop waiting.
                conn.close_on_drop();
                return Err(err);
            }
        }

        Ok(Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            mode,
            state: Mutex::new(ScopeState { conn: Some(conn) }),
        })
    }

    async fn finish(&self, statement: &'static str) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        let Some(mut conn) = state.conn.take() else {
            return Err(LedgerError::Unavailable(format!(
                "transaction scope #{} already finished",
                self.id
            )));
        };

        match (&mut *conn).execute(statement).await {
            Ok(_) => Ok(()),
            Err(err) => {
                // The transaction may still be open on this connection.
                conn.close_on_drop();
                Err(LedgerError::from_store(statement, err))
            }
        }
    }

    async fn commit(&self) -> LedgerResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) {
        if let Err(err) = self.finish("ROLLBACK").await {
            tracing::warn!(scope = self.id, error = %err, "rollback failed");
        }
    }
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Execution context passed to every ledger call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    scope: Option<Arc<TxHandle>>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context with no transaction and no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Attach a deadline `timeout` from now. An earlier deadline is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn in_transaction(&self) -> bool {
        self.scope.is_some()
    }

    /// Identifier of the carried transaction, if any.
    pub fn scope_id(&self) -> Option<u64> {
        self.scope.as_ref().map(|handle| handle.id)
    }

    fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn with_scope(&self, handle: Arc<TxHandle>) -> Self {
        Self {
            scope: Some(handle),
            deadline: self.deadline,
        }
    }

    /// Connection a statement issued under this context must run on.
    pub(crate) async fn connection<'a>(&'a self, pool: &SqlitePool) -> LedgerResult<Conn<'a>> {
        if self.is_expired() {
            return Err(deadline_exceeded());
        }

        match &self.scope {
            Some(handle) => {
                let state = handle.state.lock().await;
                MutexGuard::try_map(state, |state| state.conn.as_mut())
                    .map(Conn::Scoped)
                    .map_err(|_| {
                        LedgerError::Unavailable(format!(
                            "transaction scope #{} already finished",
                            handle.id
                        ))
                    })
            }
            None => pool
                .acquire()
                .await
                .map(Conn::Pooled)
                .map_err(|e| LedgerError::from_store("acquire", e)),
        }
    }
}

/// Either the scope's connection (held for the duration of one statement)
/// or an autocommit connection from the pool.
pub(crate) enum Conn<'a> {
    Scoped(MappedMutexGuard<'a, PoolConnection<Sqlite>>),
    Pooled(PoolConnection<Sqlite>),
}

impl Deref for Conn<'_> {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match self {
            Conn::Scoped(guard) => &***guard,
            Conn::Pooled(conn) => &**conn,
        }
    }
}

impl DerefMut for Conn<'_> {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match self {
            Conn::Scoped(guard) => &mut ***guard,
            Conn::Pooled(conn) => &mut **conn,
        }
    }
}

/// Runs units of work inside transaction scopes.
#[derive(Clone)]
pub struct TxManager {
    pool: SqlitePool,
}

impl TxManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run `work` in a transaction scope.
    ///
    /// If `ctx` already carries a transaction, `work` joins it and the outer
    /// scope decides the outcome. A read-write unit of work cannot join a
    /// read-only scope. Otherwise a new transaction is opened and
    /// committed when `work` returns `Ok`. It is rolled back when `work`
    /// returns `Err`, panics (the panic is resumed afterwards) or outlives
    /// the context deadline.
    pub async fn run<T, F, Fut>(&self, ctx: &Context, mode: TxMode, work: F) -> LedgerResult<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        if let Some(handle) = &ctx.scope {
            if mode == TxMode::ReadWrite && handle.mode == TxMode::ReadOnly {
                return Err(LedgerError::InvalidArgument(format!(
                    "cannot write inside read-only transaction scope #{}",
                    handle.id
                )));
            }
            tracing::debug!(scope = handle.id, "joining ambient transaction");
            return work(ctx.clone()).await;
        }
        if ctx.is_expired() {
            return Err(deadline_exceeded());
        }

        let handle = Arc::new(TxHandle::begin(&self.pool, mode, ctx.deadline).await?);
        tracing::debug!(scope = handle.id, ?mode, "transaction started");

        let scoped = ctx.with_scope(Arc::clone(&handle));
        let guarded = AssertUnwindSafe(async move { work(scoped).await }).catch_unwind();
        let outcome = match ctx.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or_else(|_| Ok(Err(deadline_exceeded()))),
            None => guarded.await,
        };

        match outcome {
            Ok(Ok(value)) => {
                handle.commit().await?;
                tracing::debug!(scope = handle.id, "transaction committed");
                Ok(value)
            }
            Ok(Err(err)) => {
                tracing::warn!(scope = handle.id, error = %err, "rolling back transaction");
                handle.rollback().await;
                Err(err)
            }
            Err(panic) => {
                tracing::error!(scope = handle.id, "unit of work panicked, rolling back");
                handle.rollback().await;
                std::panic::resume_unwind(panic)
            }
        }
    }
}

/// Await `future`, giving up with `Unavailable` once `deadline` passes.
async fn bounded<F: Future>(deadline: Option<Instant>, future: F) -> LedgerResult<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| deadline_exceeded()),
        None => Ok(future.await),
    }
}

fn deadline_exceeded() -> LedgerError {
    LedgerError::Unavailable("operation deadline exceeded".to_string())
}
