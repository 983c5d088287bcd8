//! # sqlconn-testing
//!
//! Test infrastructure for the sqlconn pool.
//!
//! ## Features
//!
//! - **Mock server**: in-process sessions with injectable failures
//! - **Mock connector**: a [`sqlconn_client::Connect`] over the mock server
//! - **Log capture**: a `tracing` layer recording events for assertions
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlconn_testing::{CapturedLogs, MockServer};
//!
//! let server = MockServer::new();
//! server.set_connect_delay(Duration::from_millis(100));
//! let connector = server.connector();
//! let (logs, _guard) = CapturedLogs::install();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod logs;
pub mod mock;

pub use logs::{CapturedLogs, LogRecord};
pub use mock::{FIRST_PID, MockConnection, MockConnector, MockServer};
