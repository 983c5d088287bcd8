//! Connection pool implementation.
//!
//! All bookkeeping (idle connections, counters, the waiting queue) lives in
//! one [`PoolState`] behind a `parking_lot` mutex that is never held across
//! an `.await`. Slow work (connecting, resetting, closing, probing) happens
//! outside the lock while the connection is accounted as in use or
//! connecting.
//!
//! Accounting: `nconns` counts every connection the pool is responsible for,
//! including the ones being opened (`connecting`) and the ones handed out.
//! Connections in use are therefore `nconns - connecting - idle.len()`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use sqlconn_client::{Config, Connect, Connection, TransactionStatus, connect_any};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{PoolConfig, PoolKind};
use crate::connection::{PoolConnection, PooledConnection};
use crate::error::PoolError;
use crate::lifecycle::{
    ConnectionLifecycle, ConnectionMetadata, ConnectionState, DefaultLifecycle,
    DynConnectionLifecycle,
};
use crate::queue::{WaitResult, WaitingQueue, deadline_after};
use crate::stats::{Gauges, PoolStats, PoolStatus, StatsCounters};
use crate::worker::{Scheduler, Task, TaskHandler};

static NEXT_POOL_NUM: AtomicU64 = AtomicU64::new(1);

type Record<C> = PoolConnection<<C as Connect>::Connection>;

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A connection pool.
///
/// The pool keeps between `min_size` and `max_size` connections open,
/// hands them out to callers in strict arrival order, resets them when
/// they come back, and replaces broken or expired ones in the background.
///
/// # Example
///
/// ```rust,ignore
/// use sqlconn_pool::{Pool, PoolConfig};
///
/// let pool = Pool::builder(connector)
///     .connection_string("host=db1,db2;dbname=app;user=svc")
///     .min_size(2)
///     .max_size(10)
///     .build()
///     .await?;
///
/// pool.wait(Duration::from_secs(5)).await?;
///
/// let mut conn = pool.acquire().await?;
/// conn.execute("SELECT 1").await?;
/// // Connection automatically returned to the pool on drop
/// ```
pub struct Pool<C: Connect> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connect> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connect> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.config.kind)
            .field("status", &self.status())
            .finish()
    }
}

/// Mutable pool state, guarded by the core lock.
struct PoolState<T> {
    idle: VecDeque<PoolConnection<T>>,
    waiting: WaitingQueue<PoolConnection<T>>,
    nconns: usize,
    connecting: usize,
    min_size: usize,
    max_size: Option<usize>,
    closed: bool,
    counters: StatsCounters,
}

impl<T> PoolState<T> {
    fn at_capacity(&self) -> bool {
        self.max_size.is_some_and(|max| self.nconns >= max)
    }

    fn over_capacity(&self) -> bool {
        self.max_size.is_some_and(|max| self.nconns > max)
    }

    fn live(&self) -> usize {
        self.nconns - self.connecting
    }

    fn in_use(&self) -> usize {
        self.nconns - self.connecting - self.idle.len()
    }

    fn gauges(&self) -> Gauges {
        Gauges {
            pool_min: self.min_size,
            pool_max: self.max_size,
            pool_size: self.nconns,
            pool_available: self.idle.len(),
            requests_waiting: self.waiting.len(),
        }
    }

    fn record_connect(&mut self, elapsed: Duration) {
        self.counters.connections_num += 1;
        self.counters.connections_ms += millis(elapsed);
        self.counters.connect_time.record(elapsed);
    }
}

/// What a returned connection turned out to be after its reset.
enum ResetOutcome {
    Reusable,
    Bad,
    Lost,
}

/// How an acquire request proceeds once the lock is released.
enum Checkout<T> {
    Ready(PoolConnection<T>),
    ConnectInline,
    Queued(u64, oneshot::Receiver<WaitResult<PoolConnection<T>>>),
}

pub(crate) struct PoolInner<C: Connect> {
    name: Arc<str>,
    connector: C,
    conn_config: Config,
    config: PoolConfig,
    lifecycle: DynConnectionLifecycle<C::Connection>,
    state: Mutex<PoolState<C::Connection>>,
    scheduler: Scheduler<Record<C>>,
    ready: watch::Sender<bool>,
    next_connection_id: AtomicU64,
    created_at: Instant,
}

impl<C: Connect> Pool<C> {
    /// Create a new pool builder around `connector`.
    #[must_use]
    pub fn builder(connector: C) -> PoolBuilder<C> {
        PoolBuilder::new(connector)
    }

    /// Create and open a pool without lifecycle hooks.
    ///
    /// For more control over pool creation, use [`Pool::builder()`].
    pub async fn new(
        connector: C,
        connection_config: Config,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        Self::open(connector, connection_config, config, None).await
    }

    async fn open(
        connector: C,
        conn_config: Config,
        config: PoolConfig,
        lifecycle: Option<DynConnectionLifecycle<C::Connection>>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let (min_size, max_size) = config.check_size(config.min_size, config.max_size)?;

        let name: Arc<str> = match &config.name {
            Some(name) => Arc::from(name.as_str()),
            None => Arc::from(format!("pool-{}", NEXT_POOL_NUM.fetch_add(1, Ordering::Relaxed))),
        };
        let lifecycle = lifecycle.unwrap_or_else(|| {
            Arc::new(DefaultLifecycle) as DynConnectionLifecycle<C::Connection>
        });
        let (ready, _) = watch::channel(false);

        let inner = Arc::new(PoolInner {
            name,
            connector,
            conn_config,
            config: config.clone(),
            lifecycle,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(max_size.unwrap_or(min_size)),
                waiting: WaitingQueue::new(),
                nconns: 0,
                connecting: 0,
                min_size,
                max_size,
                closed: false,
                counters: StatsCounters::default(),
            }),
            scheduler: Scheduler::new(),
            ready,
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
        });

        inner.scheduler.start(
            Arc::downgrade(&inner),
            config.num_workers,
            config.maintenance_interval,
        );

        {
            let mut state = inner.state.lock();
            match config.kind {
                PoolKind::Standard => {
                    if min_size == 0 {
                        inner.ready.send_replace(true);
                    }
                    inner.replenish_locked(&mut state);
                }
                // One probe connection so that `wait()` reports connectivity.
                PoolKind::Null => {
                    inner.dispatch_add_locked(&mut state, None);
                }
            }
        }

        tracing::info!(
            pool = %inner.name,
            kind = ?config.kind,
            min = min_size,
            max = ?max_size,
            "connection pool created"
        );

        Ok(Self { inner })
    }

    /// Get a connection, waiting up to the configured timeout.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, PoolError> {
        self.acquire_timeout(self.inner.config.timeout).await
    }

    /// Get a connection, waiting up to `timeout`.
    ///
    /// An idle connection is returned immediately unless other requests are
    /// already queued: requests are served strictly in arrival order.
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledConnection<C>, PoolError> {
        tracing::trace!(pool = %self.inner.name, "acquiring connection from pool");
        match self.inner.checkout(timeout).await {
            Ok(record) => Ok(PooledConnection::new(record, Arc::clone(&self.inner))),
            Err(e) => {
                if !matches!(e, PoolError::PoolClosed) {
                    self.inner.state.lock().counters.requests_errors += 1;
                }
                Err(e)
            }
        }
    }

    /// Try to get an idle connection without waiting.
    ///
    /// Returns `None` if no connection is immediately available or other
    /// requests are queued.
    pub fn try_acquire(&self) -> Result<Option<PooledConnection<C>>, PoolError> {
        let record = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            state.counters.requests_num += 1;
            if !state.waiting.is_empty() {
                return Ok(None);
            }
            self.inner.take_idle_locked(&mut state, Instant::now())
        };
        Ok(record.map(|record| PooledConnection::new(record, Arc::clone(&self.inner))))
    }

    /// Return a connection to the pool, resetting it in the current task.
    ///
    /// Problems found while resetting are logged and the connection is
    /// discarded; they are never reported to the caller.
    pub async fn release(&self, mut conn: PooledConnection<C>) -> Result<(), PoolError> {
        if !conn.belongs_to(&self.inner) {
            return Err(PoolError::WrongPool);
        }
        if let Some(record) = conn.take_record() {
            self.inner.return_connection(record).await;
        }
        Ok(())
    }

    /// Change the pool size.
    ///
    /// Growing schedules new connections. Shrinking closes idle excess
    /// connections now and in-use excess ones when they are returned.
    /// [`wait`](Self::wait) then waits for the new `min_size`.
    pub fn resize(&self, min_size: usize, max_size: Option<usize>) -> Result<(), PoolError> {
        let (min_size, max_size) = self.inner.config.check_size(min_size, max_size)?;

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        state.min_size = min_size;
        state.max_size = max_size;

        if let Some(max) = max_size {
            while state.nconns > max {
                let Some(record) = state.idle.pop_back() else { break };
                state.nconns -= 1;
                self.inner.dispatch_close(record);
            }
        }
        if !self.inner.is_null() {
            let filled = state.live() >= min_size;
            self.inner
                .ready
                .send_if_modified(|ready| std::mem::replace(ready, filled) != filled);
        }
        self.inner.replenish_locked(&mut state);

        tracing::info!(
            pool = %self.inner.name,
            min = min_size,
            max = ?max_size,
            "pool resized"
        );
        Ok(())
    }

    /// Wait until the pool is filled to `min_size`.
    ///
    /// On a null pool, wait until the first connection attempt succeeded.
    /// A timeout leaves the pool open.
    pub async fn wait(&self, timeout: Duration) -> Result<(), PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        let mut ready = self.inner.ready.subscribe();
        let token = self.inner.scheduler.token().clone();
        let filled = async { ready.wait_for(|filled| *filled).await.map(|_| ()) };

        tokio::select! {
            biased;
            () = token.cancelled() => Err(PoolError::PoolClosed),
            outcome = tokio::time::timeout(timeout, filled) => match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(PoolError::PoolClosed),
                Err(_) => Err(PoolError::Timeout { timeout }),
            },
        }
    }

    /// Probe the idle connections one at a time, replacing the dead ones.
    ///
    /// Does nothing on a null pool.
    pub async fn check(&self) -> Result<(), PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        if self.inner.config.kind == PoolKind::Null {
            return Ok(());
        }
        self.inner.check_idle().await;
        Ok(())
    }

    /// Snapshot of the pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats::from_parts(
            state.gauges(),
            state.counters.clone(),
            self.inner.created_at.elapsed(),
        )
    }

    /// Snapshot of the pool statistics, resetting the counters.
    pub fn pop_stats(&self) -> PoolStats {
        let mut state = self.inner.state.lock();
        let counters = std::mem::take(&mut state.counters);
        PoolStats::from_parts(state.gauges(), counters, self.inner.created_at.elapsed())
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.idle.len(),
            in_use: state.in_use(),
            total: state.nconns,
            max: state.max_size,
            waiting: state.waiting.len(),
        }
    }

    /// Close the pool.
    ///
    /// Queued requests fail with [`PoolError::PoolClosed`], idle connections
    /// are closed, background workers are stopped. Connections in use are
    /// closed when they are returned. Closing twice is a no-op.
    pub async fn close(&self) {
        let idle: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let failed = state.waiting.drain_with(|| PoolError::PoolClosed);
            if failed > 0 {
                tracing::debug!(
                    pool = %self.inner.name,
                    requests = failed,
                    "failing queued requests"
                );
            }
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.nconns -= idle.len();
            idle
        };

        self.inner.scheduler.shutdown(self.inner.as_ref()).await;

        for record in idle {
            record.close(&self.inner.name).await;
        }

        tracing::info!(pool = %self.inner.name, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the pool configuration as given at creation.
    ///
    /// Sizes changed by [`resize`](Self::resize) are reported by
    /// [`stats`](Self::stats) and [`status`](Self::status).
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

/// Releases a reserved connection slot unless disarmed.
struct SlotGuard<'a, C: Connect> {
    pool: &'a PoolInner<C>,
    armed: bool,
}

impl<C: Connect> Drop for SlotGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.pool.state.lock();
            state.nconns -= 1;
            state.connecting -= 1;
            self.pool.replenish_locked(&mut state);
        }
    }
}

/// A queued request. Dropping it before it resolved withdraws the request
/// and passes on any connection delivered in the meantime.
struct WaitTicket<'a, C: Connect> {
    pool: &'a PoolInner<C>,
    id: u64,
    rx: oneshot::Receiver<WaitResult<Record<C>>>,
    finished: bool,
}

impl<C: Connect> WaitTicket<'_, C> {
    async fn wait(mut self, deadline: Instant, timeout: Duration) -> Result<Record<C>, PoolError> {
        let outcome = tokio::time::timeout_at(deadline, &mut self.rx).await;
        self.finished = true;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PoolError::PoolClosed),
            Err(_) => self.pool.abandon_wait(self.id, &mut self.rx, timeout, false),
        }
    }
}

impl<C: Connect> Drop for WaitTicket<'_, C> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::trace!(pool = %self.pool.name, waiter = self.id, "request cancelled");
            let _ = self.pool.abandon_wait(self.id, &mut self.rx, Duration::ZERO, true);
        }
    }
}

/// Keeps a connection accounted for while it is reset or probed. If the
/// owning future is dropped midway, the connection is closed and its slot
/// released.
struct RecordGuard<'a, C: Connect> {
    pool: &'a PoolInner<C>,
    record: Option<Record<C>>,
}

impl<'a, C: Connect> RecordGuard<'a, C> {
    fn new(pool: &'a PoolInner<C>, record: Record<C>) -> Self {
        Self {
            pool,
            record: Some(record),
        }
    }

    #[allow(clippy::expect_used)]
    fn get(&mut self) -> &mut Record<C> {
        self.record.as_mut().expect("guarded record is present until disarmed")
    }

    #[allow(clippy::expect_used)]
    fn disarm(mut self) -> Record<C> {
        self.record.take().expect("guarded record is present until disarmed")
    }
}

impl<C: Connect> Drop for RecordGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            {
                let mut state = self.pool.state.lock();
                state.nconns -= 1;
                self.pool.replenish_locked(&mut state);
            }
            record.close_detached(Arc::clone(&self.pool.name));
        }
    }
}

impl<C: Connect> PoolInner<C> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn is_null(&self) -> bool {
        self.config.kind == PoolKind::Null
    }

    async fn checkout(&self, timeout: Duration) -> Result<Record<C>, PoolError> {
        let now = Instant::now();
        let deadline = deadline_after(now, timeout);

        let step = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            state.counters.requests_num += 1;
            state.waiting.expire_now(now);

            let idle = if state.waiting.is_empty() {
                self.take_idle_locked(&mut state, now)
            } else {
                None
            };

            if let Some(record) = idle {
                Checkout::Ready(record)
            } else if self.config.max_waiting > 0
                && state.waiting.len() >= self.config.max_waiting
            {
                return Err(PoolError::TooManyRequests {
                    max_waiting: self.config.max_waiting,
                });
            } else if self.is_null() && state.waiting.is_empty() && !state.at_capacity() {
                state.nconns += 1;
                state.connecting += 1;
                Checkout::ConnectInline
            } else {
                state.counters.requests_queued += 1;
                let (id, rx) = state.waiting.enqueue(now, timeout);
                if state.waiting.len() > state.connecting && !state.at_capacity() {
                    self.dispatch_add_locked(&mut state, Some(id));
                }
                tracing::trace!(
                    pool = %self.name,
                    waiter = id,
                    waiting = state.waiting.len(),
                    "request queued"
                );
                Checkout::Queued(id, rx)
            }
        };

        match step {
            Checkout::Ready(record) => Ok(record),
            Checkout::ConnectInline => self.connect_inline(deadline, timeout).await,
            Checkout::Queued(id, rx) => {
                let ticket = WaitTicket {
                    pool: self,
                    id,
                    rx,
                    finished: false,
                };
                ticket.wait(deadline, timeout).await
            }
        }
    }

    /// Pop the first usable idle connection, discarding expired ones.
    fn take_idle_locked(
        &self,
        state: &mut PoolState<C::Connection>,
        now: Instant,
    ) -> Option<Record<C>> {
        let mut discarded = false;
        let found = loop {
            let Some(record) = state.idle.pop_front() else { break None };
            if record.meta.is_expired(now) {
                tracing::debug!(
                    pool = %self.name,
                    connection_id = record.meta.id,
                    "discarding expired connection"
                );
                state.nconns -= 1;
                self.dispatch_close(record);
                discarded = true;
                continue;
            }
            break Some(record);
        };
        if discarded {
            self.replenish_locked(state);
        }
        found
    }

    async fn connect_inline(
        &self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Record<C>, PoolError> {
        let mut slot = SlotGuard {
            pool: self,
            armed: true,
        };

        let outcome = tokio::time::timeout_at(deadline, self.open_connection()).await;

        match outcome {
            Ok(Ok((record, elapsed))) => {
                slot.armed = false;
                let mut state = self.state.lock();
                state.connecting -= 1;
                state.record_connect(elapsed);
                self.update_ready_locked(&state);
                if state.closed {
                    state.nconns -= 1;
                    self.dispatch_close(record);
                    return Err(PoolError::PoolClosed);
                }
                Ok(record)
            }
            Ok(Err(e)) => {
                self.state.lock().counters.connections_errors += 1;
                tracing::warn!(pool = %self.name, error = %e, "error connecting");
                Err(PoolError::Connect(e))
            }
            Err(_) => Err(PoolError::Timeout { timeout }),
        }
    }

    /// Withdraw a queued request. On timeout a connection delivered at the
    /// last moment goes to the caller; on cancellation it goes back to the
    /// pool.
    fn abandon_wait(
        &self,
        id: u64,
        rx: &mut oneshot::Receiver<WaitResult<Record<C>>>,
        timeout: Duration,
        cancelled: bool,
    ) -> Result<Record<C>, PoolError> {
        let mut state = self.state.lock();
        if state.waiting.remove(id) {
            return Err(PoolError::Timeout { timeout });
        }
        rx.close();
        match rx.try_recv() {
            Ok(Ok(record)) if cancelled => {
                tracing::debug!(
                    pool = %self.name,
                    connection_id = record.meta.id,
                    "passing on connection delivered to a cancelled request"
                );
                self.deliver_locked(&mut state, record, Instant::now());
                Err(PoolError::Timeout { timeout })
            }
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout { timeout }),
        }
    }

    /// Hand a healthy connection to the oldest waiter, or make it idle.
    fn deliver_locked(
        &self,
        state: &mut PoolState<C::Connection>,
        mut record: Record<C>,
        now: Instant,
    ) {
        if state.closed || (self.is_null() && state.waiting.is_empty()) {
            state.nconns -= 1;
            self.dispatch_close(record);
            return;
        }

        record.meta.state = ConnectionState::Idle;
        let mut slot = Some(record);
        if let Some(served) = state.waiting.fulfill(&mut slot, now) {
            state.counters.requests_wait_ms += millis(served.waited);
            tracing::trace!(
                pool = %self.name,
                waiter = served.waiter_id,
                "connection handed to queued request"
            );
            return;
        }
        let Some(record) = slot else { return };
        if self.is_null() {
            state.nconns -= 1;
            self.dispatch_close(record);
        } else {
            state.idle.push_back(record);
        }
    }

    /// Schedule connections until `min_size` is reached and every queued
    /// request has a creation pending, within `max_size`.
    fn replenish_locked(&self, state: &mut PoolState<C::Connection>) {
        if state.closed || self.scheduler.is_stopped() {
            return;
        }
        loop {
            let below_min = state.nconns < state.min_size;
            let starving = state.waiting.len() > state.connecting;
            if !(below_min || starving) || state.at_capacity() {
                break;
            }
            if !self.dispatch_add_locked(state, None) {
                break;
            }
        }
    }

    fn dispatch_add_locked(
        &self,
        state: &mut PoolState<C::Connection>,
        waiter: Option<u64>,
    ) -> bool {
        state.nconns += 1;
        state.connecting += 1;
        match self.scheduler.dispatch(Task::AddConnection { waiter }) {
            None => true,
            Some(_) => {
                state.nconns -= 1;
                state.connecting -= 1;
                if let Some(id) = waiter {
                    state.waiting.fail(id, PoolError::PoolClosed);
                }
                false
            }
        }
    }

    fn dispatch_close(&self, record: Record<C>) {
        if let Some(Task::CloseConnection(record)) =
            self.scheduler.dispatch(Task::CloseConnection(record))
        {
            record.close_detached(Arc::clone(&self.name));
        }
    }

    /// Called when a guard is dropped.
    pub(crate) fn return_later(&self, record: Record<C>) {
        tracing::trace!(
            pool = %self.name,
            connection_id = record.meta.id,
            "returning connection to pool"
        );
        if let Some(Task::ReturnConnection(record)) =
            self.scheduler.dispatch(Task::ReturnConnection(record))
        {
            self.state.lock().nconns -= 1;
            record.close_detached(Arc::clone(&self.name));
        }
    }

    /// Called when a guard is detached.
    pub(crate) fn forget(&self, record: &Record<C>) {
        tracing::debug!(
            pool = %self.name,
            connection_id = record.meta.id,
            "connection detached from pool"
        );
        let mut state = self.state.lock();
        state.nconns -= 1;
        self.replenish_locked(&mut state);
    }

    fn jittered_lifetime(&self) -> Option<Duration> {
        self.config
            .max_lifetime
            .map(|lifetime| {
                let factor = rand::thread_rng().gen_range(0.95..=1.0);
                Duration::try_from_secs_f64(lifetime.as_secs_f64() * factor).unwrap_or(lifetime)
            })
    }

    /// Connect and configure a new connection.
    async fn open_connection(&self) -> sqlconn_client::Result<(Record<C>, Duration)> {
        let start = Instant::now();
        let mut conn = connect_any(&self.connector, &self.conn_config).await?;

        if let Err(e) = self.lifecycle.configure(&mut conn).await {
            let _ = conn.close().await;
            return Err(e);
        }
        let status = conn.transaction_status();
        if status != TransactionStatus::Idle {
            let _ = conn.close().await;
            return Err(sqlconn_client::Error::BadState {
                status,
                hook: format!("{} configure", self.lifecycle.name()),
            });
        }

        let now = Instant::now();
        let elapsed = now - start;
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let meta = ConnectionMetadata::new(id, conn.backend_pid(), now, self.jittered_lifetime());
        tracing::debug!(
            pool = %self.name,
            connection_id = id,
            backend_pid = meta.backend_pid,
            elapsed_ms = millis(elapsed),
            "connection opened"
        );
        Ok((PoolConnection::new(conn, meta), elapsed))
    }

    fn update_ready_locked(&self, state: &PoolState<C::Connection>) {
        let filled = self.is_null() || state.live() >= state.min_size;
        if filled {
            self.ready.send_if_modified(|ready| !std::mem::replace(ready, true));
        }
    }

    async fn add_connection(&self, waiter: Option<u64>, shutdown: &CancellationToken) {
        let attempts = self.config.reconnect_attempts.max(1);
        let mut delay = self.config.reconnect_delay;

        for attempt in 1..=attempts {
            let outcome = tokio::select! {
                biased;
                () = shutdown.cancelled() => None,
                outcome = self.open_connection() => Some(outcome),
            };
            let Some(outcome) = outcome else {
                self.release_slot(waiter, PoolError::PoolClosed);
                return;
            };

            let e = match outcome {
                Ok((record, elapsed)) => {
                    let mut state = self.state.lock();
                    state.connecting -= 1;
                    state.record_connect(elapsed);
                    self.update_ready_locked(&state);
                    self.deliver_locked(&mut state, record, Instant::now());
                    return;
                }
                Err(e) => e,
            };

            let closed = {
                let mut state = self.state.lock();
                state.counters.connections_errors += 1;
                state.closed
            };
            if closed {
                self.release_slot(waiter, PoolError::PoolClosed);
                return;
            }
            if attempt == attempts {
                tracing::error!(
                    pool = %self.name,
                    attempts,
                    error = %e,
                    "reconnection attempts exhausted, giving up"
                );
                self.release_slot(waiter, PoolError::Connect(e));
                return;
            }

            let factor = rand::thread_rng().gen_range(0.9..=1.1);
            let wait = Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay);
            tracing::warn!(
                pool = %self.name,
                attempt,
                retry_in_ms = millis(wait),
                error = %e,
                "error connecting, retrying"
            );
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    self.release_slot(waiter, PoolError::PoolClosed);
                    return;
                }
                () = tokio::time::sleep(wait) => {}
            }
            delay = delay.saturating_mul(2).min(self.config.reconnect_delay_max);
        }
    }

    /// Give back the slot of a creation that failed.
    fn release_slot(&self, waiter: Option<u64>, err: PoolError) {
        let mut state = self.state.lock();
        state.nconns -= 1;
        state.connecting -= 1;
        if let Some(id) = waiter {
            state.waiting.fail(id, err);
        }
    }

    /// Reset a returned connection and put it back into service.
    pub(crate) async fn return_connection(&self, mut record: Record<C>) {
        let now = Instant::now();
        let usage = record.meta.checkout_at.take().map(|at| now - at);

        let reset = {
            let mut state = self.state.lock();
            if let Some(usage) = usage {
                state.counters.usage_ms += millis(usage);
            }
            if state.closed {
                state.nconns -= 1;
                false
            } else if self.is_null() && state.waiting.is_empty() {
                if record.conn.is_broken() {
                    state.counters.connections_lost += 1;
                }
                state.nconns -= 1;
                false
            } else {
                record.meta.state = ConnectionState::Resetting;
                true
            }
        };
        if !reset {
            record.close(&self.name).await;
            return;
        }

        let mut guard = RecordGuard::new(self, record);
        let outcome = self.reset_connection(guard.get()).await;
        let mut record = guard.disarm();

        let mut state = self.state.lock();
        let now = Instant::now();
        match outcome {
            ResetOutcome::Reusable => {
                record.meta.last_used = now;
                if record.meta.is_expired(now) {
                    tracing::debug!(
                        pool = %self.name,
                        connection_id = record.meta.id,
                        "discarding expired connection"
                    );
                    state.nconns -= 1;
                    self.dispatch_close(record);
                    self.replenish_locked(&mut state);
                } else if state.over_capacity() {
                    tracing::debug!(
                        pool = %self.name,
                        connection_id = record.meta.id,
                        "closing connection above max_size"
                    );
                    state.nconns -= 1;
                    self.dispatch_close(record);
                } else {
                    self.deliver_locked(&mut state, record, now);
                }
            }
            ResetOutcome::Bad | ResetOutcome::Lost => {
                if matches!(outcome, ResetOutcome::Lost) {
                    state.counters.connections_lost += 1;
                }
                state.counters.returns_bad += 1;
                record.meta.state = ConnectionState::Broken;
                state.nconns -= 1;
                self.dispatch_close(record);
                self.replenish_locked(&mut state);
            }
        }
    }

    /// Bring a returned connection back to IDLE, logging every problem.
    async fn reset_connection(&self, record: &mut Record<C>) -> ResetOutcome {
        let id = record.meta.id;
        let conn = &mut record.conn;

        if conn.is_closed() || conn.is_broken() {
            tracing::warn!(
                pool = %self.name,
                connection_id = id,
                "discarding closed connection: {}",
                if conn.is_broken() { "BAD" } else { "CLOSED" }
            );
            return if conn.is_broken() {
                ResetOutcome::Lost
            } else {
                ResetOutcome::Bad
            };
        }

        let status = conn.transaction_status();
        match status {
            TransactionStatus::Idle => {}
            TransactionStatus::InTrans | TransactionStatus::InError => {
                tracing::warn!(
                    pool = %self.name,
                    connection_id = id,
                    status = %status,
                    "rolling back returned connection: {status}"
                );
                if let Err(e) = conn.rollback().await {
                    tracing::warn!(
                        pool = %self.name,
                        connection_id = id,
                        error = %e,
                        "rollback failed: {}: {e}. Discarding connection",
                        e.kind()
                    );
                    return if e.is_connection_error() {
                        ResetOutcome::Lost
                    } else {
                        ResetOutcome::Bad
                    };
                }
            }
            TransactionStatus::Active | TransactionStatus::Unknown => {
                tracing::warn!(
                    pool = %self.name,
                    connection_id = id,
                    status = %status,
                    "closing returned connection: {status}"
                );
                return ResetOutcome::Bad;
            }
        }

        if let Err(e) = self.lifecycle.reset(conn).await {
            tracing::warn!(
                pool = %self.name,
                connection_id = id,
                error = %e,
                "error resetting connection: {}: {e}",
                e.kind()
            );
            return ResetOutcome::Bad;
        }

        let status = conn.transaction_status();
        if status != TransactionStatus::Idle {
            tracing::warn!(
                pool = %self.name,
                connection_id = id,
                status = %status,
                "connection left in status {status} by reset hook, discarding"
            );
            return ResetOutcome::Bad;
        }

        ResetOutcome::Reusable
    }

    /// Probe every connection idle at the start of the call.
    async fn check_idle(&self) {
        let rounds = self.state.lock().idle.len();
        for _ in 0..rounds {
            let record = {
                let mut state = self.state.lock();
                if state.closed {
                    return;
                }
                state.idle.pop_front()
            };
            let Some(mut record) = record else { return };
            record.meta.state = ConnectionState::InUse;

            let mut guard = RecordGuard::new(self, record);
            let health = self.lifecycle.health_check(&mut guard.get().conn).await;
            let mut record = guard.disarm();

            let mut state = self.state.lock();
            if health.is_healthy() {
                self.deliver_locked(&mut state, record, Instant::now());
            } else {
                tracing::warn!(
                    pool = %self.name,
                    connection_id = record.meta.id,
                    health = ?health,
                    "discarding broken connection"
                );
                record.meta.state = ConnectionState::Broken;
                state.counters.connections_lost += 1;
                state.nconns -= 1;
                self.dispatch_close(record);
                self.replenish_locked(&mut state);
            }
        }
    }

    /// Periodic housekeeping.
    fn maintain(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let expired = state.waiting.expire_now(now);
        if expired > 0 {
            tracing::debug!(pool = %self.name, requests = expired, "expired queued requests");
        }

        let mut to_close = Vec::new();
        let mut kept = VecDeque::with_capacity(state.idle.len());
        while let Some(record) = state.idle.pop_front() {
            if record.meta.is_expired(now) {
                to_close.push(record);
            } else {
                kept.push_back(record);
            }
        }
        state.idle = kept;
        state.nconns -= to_close.len();

        if let Some(max_idle) = self.config.max_idle {
            while state.nconns > state.min_size {
                match state.idle.front() {
                    Some(record) if now - record.meta.last_used >= max_idle => {}
                    _ => break,
                }
                if let Some(record) = state.idle.pop_front() {
                    state.nconns -= 1;
                    to_close.push(record);
                }
            }
        }

        if let Some(max) = state.max_size {
            while state.nconns > max {
                let Some(record) = state.idle.pop_back() else { break };
                state.nconns -= 1;
                to_close.push(record);
            }
        }

        if !to_close.is_empty() {
            tracing::debug!(
                pool = %self.name,
                closing = to_close.len(),
                remaining = state.nconns,
                "closing expired or excess idle connections"
            );
        }
        for record in to_close {
            self.dispatch_close(record);
        }

        self.replenish_locked(&mut state);
    }
}

#[async_trait]
impl<C: Connect> TaskHandler<Record<C>> for PoolInner<C> {
    async fn run(&self, task: Task<Record<C>>, shutdown: &CancellationToken) {
        match task {
            Task::AddConnection { waiter } => self.add_connection(waiter, shutdown).await,
            Task::ReturnConnection(record) => self.return_connection(record).await,
            Task::CloseConnection(record) => record.close(&self.name).await,
            Task::Maintenance => self.maintain(),
        }
    }

    async fn discard(&self, task: Task<Record<C>>) {
        match task {
            Task::AddConnection { waiter } => self.release_slot(waiter, PoolError::PoolClosed),
            Task::ReturnConnection(record) => {
                self.state.lock().nconns -= 1;
                record.close(&self.name).await;
            }
            Task::CloseConnection(record) => record.close(&self.name).await,
            Task::Maintenance => {}
        }
    }
}

impl<C: Connect> Drop for PoolInner<C> {
    fn drop(&mut self) {
        self.scheduler.cancel();
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder(connector)
///     .connection_config(client_config)
///     .pool_config(pool_config)
///     .lifecycle(MyHooks)
///     .build()
///     .await?;
/// ```
pub struct PoolBuilder<C: Connect> {
    connector: C,
    connection_config: Config,
    pool_config: PoolConfig,
    lifecycle: Option<DynConnectionLifecycle<C::Connection>>,
    error: Option<PoolError>,
}

impl<C: Connect> PoolBuilder<C> {
    /// Create a new pool builder with default settings.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            connection_config: Config::default(),
            pool_config: PoolConfig::default(),
            lifecycle: None,
            error: None,
        }
    }

    /// Set the connection configuration.
    #[must_use]
    pub fn connection_config(mut self, config: Config) -> Self {
        self.connection_config = config;
        self
    }

    /// Parse the connection configuration from a connection string.
    ///
    /// A parse error is reported by [`build`](Self::build).
    #[must_use]
    pub fn connection_string(mut self, conn_str: &str) -> Self {
        match Config::from_connection_string(conn_str) {
            Ok(config) => self.connection_config = config,
            Err(e) => self.error = Some(PoolError::Config(e.to_string())),
        }
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the pool name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.pool_config.name = Some(name.into());
        self
    }

    /// Make this a null pool (no idle connections kept).
    #[must_use]
    pub fn null(mut self) -> Self {
        self.pool_config.kind = PoolKind::Null;
        self.pool_config.min_size = 0;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_size(mut self, size: usize) -> Self {
        self.pool_config.min_size = size;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.pool_config.max_size = Some(size);
        self
    }

    /// Set the default acquire timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.timeout = timeout;
        self
    }

    /// Set the queue length limit (0 for no limit).
    #[must_use]
    pub fn max_waiting(mut self, max_waiting: usize) -> Self {
        self.pool_config.max_waiting = max_waiting;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.pool_config.max_lifetime = lifetime;
        self
    }

    /// Set the maximum idle time.
    #[must_use]
    pub fn max_idle(mut self, idle: Option<Duration>) -> Self {
        self.pool_config.max_idle = idle;
        self
    }

    /// Set the number of background workers.
    #[must_use]
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.pool_config.num_workers = workers;
        self
    }

    /// Set the number of connection attempts per creation.
    #[must_use]
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.pool_config.reconnect_attempts = attempts;
        self
    }

    /// Set the initial and maximum retry delay.
    #[must_use]
    pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.pool_config.reconnect_delay = initial;
        self.pool_config.reconnect_delay_max = max;
        self
    }

    /// Set the maintenance interval.
    #[must_use]
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.pool_config.maintenance_interval = interval;
        self
    }

    /// Install lifecycle hooks.
    #[must_use]
    pub fn lifecycle<L>(mut self, lifecycle: L) -> Self
    where
        L: ConnectionLifecycle<C::Connection> + 'static,
    {
        self.lifecycle = Some(Arc::new(lifecycle));
        self
    }

    /// Validate the configuration and open the pool.
    pub async fn build(self) -> Result<Pool<C>, PoolError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Pool::open(
            self.connector,
            self.connection_config,
            self.pool_config,
            self.lifecycle,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlconn_testing::MockServer;

    #[test]
    fn test_builder_default() {
        let builder = PoolBuilder::new(MockServer::new().connector());
        assert_eq!(builder.pool_config.min_size, 4);
        assert_eq!(builder.pool_config.max_size, None);
        assert!(builder.lifecycle.is_none());
    }

    #[test]
    fn test_builder_fluent() {
        let builder = Pool::builder(MockServer::new().connector())
            .min_size(5)
            .max_size(50)
            .max_waiting(8)
            .name("reports");

        assert_eq!(builder.pool_config.min_size, 5);
        assert_eq!(builder.pool_config.max_size, Some(50));
        assert_eq!(builder.pool_config.max_waiting, 8);
        assert_eq!(builder.pool_config.name.as_deref(), Some("reports"));
    }

    #[test]
    fn test_builder_null() {
        let builder = Pool::builder(MockServer::new().connector()).min_size(3).null();
        assert_eq!(builder.pool_config.kind, PoolKind::Null);
        assert_eq!(builder.pool_config.min_size, 0);
    }

    #[tokio::test]
    async fn test_bad_connection_string_reported_on_build() {
        let result = Pool::builder(MockServer::new().connector())
            .connection_string("host=db:notaport")
            .build()
            .await;
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_sizes_rejected_on_build() {
        let result = Pool::builder(MockServer::new().connector())
            .min_size(4)
            .max_size(2)
            .build()
            .await;
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[test]
    fn test_state_accounting() {
        let state: PoolState<()> = PoolState {
            idle: VecDeque::new(),
            waiting: WaitingQueue::new(),
            nconns: 3,
            connecting: 1,
            min_size: 1,
            max_size: Some(3),
            closed: false,
            counters: StatsCounters::default(),
        };
        assert!(state.at_capacity());
        assert!(!state.over_capacity());
        assert_eq!(state.live(), 2);
        assert_eq!(state.in_use(), 2);
    }
}
