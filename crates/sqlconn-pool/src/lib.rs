//! # sqlconn-pool
//!
//! Client-side connection pool for database sessions.
//!
//! Unlike generic object pools, this implementation understands session
//! state: a connection given back inside a transaction is rolled back, one
//! left mid-command is discarded, and every problem is logged instead of
//! being thrown at the caller that returned it.
//!
//! ## Features
//!
//! - Strict first-come first-served hand-out, even under contention
//! - Reset on return with user `configure`/`reset` hooks
//! - Connections created in the background with retries and backoff
//! - `max_lifetime` (with jitter) and `max_idle` eviction
//! - Live resizing between `min_size` and `max_size`
//! - Null pool mode that keeps no idle connections
//! - Statistics with a connect time histogram
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlconn_pool::{Pool, PoolConfig};
//! use std::time::Duration;
//!
//! // Using the builder pattern
//! let pool = Pool::builder(connector)
//!     .connection_string("host=db1,db2;dbname=app;user=svc")
//!     .min_size(4)
//!     .max_size(16)
//!     .max_idle(Some(Duration::from_secs(300)))
//!     .build()
//!     .await?;
//!
//! // Or using PoolConfig directly
//! let config = PoolConfig::new().min_size(4).max_size(16);
//! let pool = Pool::new(connector, client_config, config).await?;
//!
//! // Block until the pool is filled
//! pool.wait(Duration::from_secs(30)).await?;
//!
//! // Get a connection from the pool
//! let mut conn = pool.acquire().await?;
//! conn.execute("SELECT 1").await?;
//! // Connection automatically returned to pool on drop
//!
//! // Check pool status
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//!
//! // Get statistics
//! let stats = pool.stats();
//! println!("Checkout success rate: {:.2}", stats.checkout_success_rate());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod worker;

// Configuration
pub use config::{PoolConfig, PoolKind};

// Error types
pub use error::PoolError;

// Pool types
pub use connection::PooledConnection;
pub use pool::{Pool, PoolBuilder};

// Statistics
pub use stats::{CONNECT_TIME_BUCKETS_MS, ConnectTimeHistogram, PoolStats, PoolStatus, keys};

// Lifecycle management
pub use lifecycle::{
    ConnectionLifecycle, ConnectionMetadata, ConnectionState, DefaultLifecycle,
    DynConnectionLifecycle, HealthCheckResult,
};
