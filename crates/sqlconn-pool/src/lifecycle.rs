//! Connection lifecycle hooks and metadata.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlconn_client::{Connection, Result};
use tokio::time::Instant;

/// Where a pooled connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Being opened.
    Connecting,
    /// Available in the pool.
    Idle,
    /// Handed out to a caller, or probed by the pool.
    InUse,
    /// Being reset after a return.
    Resetting,
    /// Failed a check; will be closed.
    Broken,
    /// Closed.
    Closed,
}

/// Bookkeeping attached to each pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-unique connection id.
    pub id: u64,
    /// Backend session id reported by the server.
    pub backend_pid: u32,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the connection must be replaced, if it has a lifetime.
    pub expires_at: Option<Instant>,
    /// When the connection was last returned (or opened).
    pub last_used: Instant,
    /// When the current checkout started.
    pub checkout_at: Option<Instant>,
    /// Current state.
    pub state: ConnectionState,
    /// Number of times the connection was handed out.
    pub checkouts: u64,
}

impl ConnectionMetadata {
    /// Metadata for a connection opened at `now`.
    ///
    /// A lifetime reaching past the end of the clock never expires.
    #[must_use]
    pub fn new(id: u64, backend_pid: u32, now: Instant, lifetime: Option<Duration>) -> Self {
        Self {
            id,
            backend_pid,
            created_at: now,
            expires_at: lifetime.and_then(|lifetime| now.checked_add(lifetime)),
            last_used: now,
            checkout_at: None,
            state: ConnectionState::Connecting,
            checkouts: 0,
        }
    }

    /// Age of the connection.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last used.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Whether the connection outlived its lifetime at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Outcome of a health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckResult {
    /// The connection answered.
    Healthy,
    /// The connection is unusable.
    Unhealthy(String),
}

impl HealthCheckResult {
    /// Whether the connection is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Hooks run by the pool around a connection's life.
///
/// Every method has a default, so an implementation only overrides what it
/// needs:
///
/// ```rust,ignore
/// struct UtcSessions;
///
/// #[async_trait]
/// impl<C: Connection> ConnectionLifecycle<C> for UtcSessions {
///     async fn configure(&self, conn: &mut C) -> Result<()> {
///         conn.execute("SET timezone = 'UTC'").await?;
///         conn.commit().await
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionLifecycle<C: Connection>: Send + Sync {
    /// Run once on every new connection before it joins the pool.
    ///
    /// The connection must be left IDLE.
    async fn configure(&self, _conn: &mut C) -> Result<()> {
        Ok(())
    }

    /// Run on every returned connection before it is reused.
    ///
    /// The connection must be left IDLE.
    async fn reset(&self, _conn: &mut C) -> Result<()> {
        Ok(())
    }

    /// Probe an idle connection.
    async fn health_check(&self, conn: &mut C) -> HealthCheckResult {
        match conn.ping().await {
            Ok(()) => HealthCheckResult::Healthy,
            Err(e) => HealthCheckResult::Unhealthy(e.to_string()),
        }
    }

    /// Name used in log records and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared lifecycle hooks.
pub type DynConnectionLifecycle<C> = Arc<dyn ConnectionLifecycle<C>>;

/// Hooks used when none are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLifecycle;

impl<C: Connection> ConnectionLifecycle<C> for DefaultLifecycle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_metadata_expiry() {
        let now = Instant::now();
        let meta = ConnectionMetadata::new(1, 1000, now, Some(Duration::from_millis(200)));
        assert!(!meta.is_expired(now));
        assert!(meta.is_expired(now + Duration::from_millis(200)));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(meta.age(), Duration::from_millis(50));
        assert_eq!(meta.idle_time(), Duration::from_millis(50));
    }

    #[test]
    fn test_metadata_without_lifetime_never_expires() {
        let now = Instant::now();
        let meta = ConnectionMetadata::new(1, 1000, now, None);
        assert!(!meta.is_expired(now + Duration::from_secs(86_400)));
        assert_eq!(meta.state, ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_lifetime_never_expires() {
        let now = Instant::now();
        let meta = ConnectionMetadata::new(1, 1000, now, Some(Duration::MAX));
        assert_eq!(meta.expires_at, None);
        assert!(!meta.is_expired(now + Duration::from_secs(60 * 60 * 24 * 365)));
    }

    #[test]
    fn test_health_check_result() {
        assert!(HealthCheckResult::Healthy.is_healthy());
        assert!(!HealthCheckResult::Unhealthy("gone".into()).is_healthy());
    }
}
