//! Pooled connection records and the guard handed to callers.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use sqlconn_client::{Connect, Connection};
use tokio::time::Instant;

use crate::lifecycle::{ConnectionMetadata, ConnectionState};
use crate::pool::PoolInner;

/// A backend session plus the pool's bookkeeping about it.
pub(crate) struct PoolConnection<T> {
    pub(crate) conn: T,
    pub(crate) meta: ConnectionMetadata,
}

impl<T: Connection> PoolConnection<T> {
    pub(crate) fn new(conn: T, meta: ConnectionMetadata) -> Self {
        Self { conn, meta }
    }

    /// Close the session, logging failures.
    pub(crate) async fn close(mut self, pool: &str) {
        self.meta.state = ConnectionState::Closed;
        if let Err(e) = self.conn.close().await {
            tracing::debug!(
                pool,
                connection_id = self.meta.id,
                error = %e,
                "error closing connection"
            );
        }
    }

    /// Close the session on the current runtime without waiting.
    pub(crate) fn close_detached(self, pool: Arc<str>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { self.close(&pool).await });
            }
            Err(_) => {
                tracing::debug!(
                    pool = %pool,
                    connection_id = self.meta.id,
                    "no runtime to close connection, dropping it"
                );
            }
        }
    }
}

impl<T> fmt::Debug for PoolConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnection")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// A connection retrieved from the pool.
///
/// Dereferences to the underlying connection. When dropped, the connection
/// is handed to a pool worker which resets it and makes it available again.
/// Use [`Pool::release`](crate::Pool::release) to run the reset in the
/// current task instead, or [`detach()`](PooledConnection::detach) to take
/// the connection out of the pool for good.
pub struct PooledConnection<C: Connect> {
    record: Option<PoolConnection<C::Connection>>,
    pool: Arc<PoolInner<C>>,
}

impl<C: Connect> PooledConnection<C> {
    pub(crate) fn new(mut record: PoolConnection<C::Connection>, pool: Arc<PoolInner<C>>) -> Self {
        record.meta.state = ConnectionState::InUse;
        record.meta.checkout_at = Some(Instant::now());
        record.meta.checkouts += 1;
        tracing::trace!(
            pool = %pool.name(),
            connection_id = record.meta.id,
            "connection checked out"
        );
        Self {
            record: Some(record),
            pool,
        }
    }

    /// Get the connection metadata.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self
            .record
            .as_ref()
            .expect("record is present until the guard is consumed")
            .meta
    }

    /// Detach the connection from the pool.
    ///
    /// The pool stops accounting for it and opens a replacement if needed;
    /// closing the returned connection is up to the caller.
    #[allow(clippy::expect_used)]
    pub fn detach(mut self) -> C::Connection {
        let record = self
            .record
            .take()
            .expect("record is present until the guard is consumed");
        self.pool.forget(&record);
        record.conn
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner<C>>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    pub(crate) fn take_record(&mut self) -> Option<PoolConnection<C::Connection>> {
        self.record.take()
    }
}

#[allow(clippy::expect_used)]
impl<C: Connect> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        &self
            .record
            .as_ref()
            .expect("record is present until the guard is consumed")
            .conn
    }
}

#[allow(clippy::expect_used)]
impl<C: Connect> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self
            .record
            .as_mut()
            .expect("record is present until the guard is consumed")
            .conn
    }
}

impl<C: Connect> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            self.pool.return_later(record);
        }
    }
}

impl<C: Connect> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name())
            .field("meta", &self.record.as_ref().map(|r| &r.meta))
            .finish()
    }
}
