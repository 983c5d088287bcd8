//! Connection capability consumed by the pool.
//!
//! A driver plugs into the pool by implementing [`Connect`] (how to open a
//! session against one host) and [`Connection`] (the handful of operations
//! the pool needs on a live session). [`connect_any`] layers candidate-host
//! fallback and per-host timeouts on top of a [`Connect`] implementation.

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::config::{Config, HostAddr, LoadBalanceHosts};
use crate::error::{Error, HostFailure, Result};
use crate::state::TransactionStatus;

/// A live backend session.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Execute a simple statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Close the session. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Cheap liveness probe.
    async fn ping(&mut self) -> Result<()> {
        self.execute("").await.map(|_| ())
    }

    /// Whether [`close`](Connection::close) was called.
    fn is_closed(&self) -> bool;

    /// Whether the session was lost (server gone, protocol desync).
    fn is_broken(&self) -> bool;

    /// Server-side session identifier.
    fn backend_pid(&self) -> u32;

    /// Current transaction status.
    fn transaction_status(&self) -> TransactionStatus;
}

/// Factory opening sessions against a single host.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    /// The session type produced.
    type Connection: Connection;

    /// Open a session against `host` using the rest of `config`.
    async fn connect(&self, host: &HostAddr, config: &Config) -> Result<Self::Connection>;
}

/// Open a session against the first candidate host that accepts.
///
/// Every host gets its own `connect_timeout`. When all of them fail the
/// returned [`Error::Connect`] lists each host with its own error.
pub async fn connect_any<C: Connect + ?Sized>(
    connector: &C,
    config: &Config,
) -> Result<C::Connection> {
    if config.hosts.is_empty() {
        return Err(Error::Config("no host to connect to".into()));
    }

    let mut hosts = config.hosts.clone();
    if config.load_balance_hosts == LoadBalanceHosts::Random {
        hosts.shuffle(&mut rand::thread_rng());
    }

    let mut failures = Vec::with_capacity(hosts.len());
    for host in hosts {
        tracing::debug!(host = %host.host, port = host.port, "connecting");

        let attempt = connector.connect(&host, config);
        let outcome = if config.connect_timeout.is_zero() {
            attempt.await
        } else {
            match tokio::time::timeout(config.connect_timeout, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::ConnectTimeout),
            }
        };

        match outcome {
            Ok(conn) => {
                tracing::debug!(
                    host = %host.host,
                    port = host.port,
                    backend_pid = conn.backend_pid(),
                    "connected"
                );
                return Ok(conn);
            }
            Err(e) => {
                tracing::debug!(
                    host = %host.host,
                    port = host.port,
                    error = %e,
                    "connection attempt failed"
                );
                failures.push(HostFailure {
                    host,
                    message: e.to_string(),
                });
            }
        }
    }

    Err(Error::Connect(failures))
}
