//! # sqlconn-client
//!
//! Connection capability consumed by the `sqlconn` pool.
//!
//! This crate does not speak a wire protocol itself. It defines what a
//! database session must offer for the pool to manage it, how connection
//! parameters are parsed, and how several candidate hosts are tried.
//!
//! ## Features
//!
//! - **Connection traits**: [`Connect`] opens sessions, [`Connection`] is a live one
//! - **Multiple hosts**: ordered or shuffled fallback with per-host timeouts
//! - **Connection strings**: `key=value;` parsing with pass-through options
//! - **Adapters**: layered dumper/loader maps with an explicit optimised registry
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlconn_client::{Config, connect_any};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_connection_string(
//!         "host=db1,db2:6432;dbname=app;user=svc;password=secret;connect_timeout=5"
//!     )?;
//!
//!     let mut conn = connect_any(&MyDriver, &config).await?;
//!     conn.execute("SELECT 1").await?;
//!     println!("backend pid: {}", conn.backend_pid());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod config;
pub mod connection;
pub mod error;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use adapters::{AdaptersMap, Dumper, Loader, OptimisedAdapters};
pub use config::{Config, DEFAULT_PORT, HostAddr, LoadBalanceHosts};
pub use connection::{Connect, Connection, connect_any};
pub use error::{Error, HostFailure, Result};
pub use state::TransactionStatus;
pub use types::{DumpFormat, Format, Oid, Value, ValueKind};
