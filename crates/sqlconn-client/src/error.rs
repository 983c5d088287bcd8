//! Client error types.

use std::fmt;

use thiserror::Error;

use crate::config::HostAddr;
use crate::state::TransactionStatus;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// One failed attempt to reach a candidate host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    /// The host that was tried.
    pub host: HostAddr,
    /// Why the attempt failed.
    pub message: String,
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host: '{}', port: '{}': {}",
            self.host.host, self.host.port, self.message
        )
    }
}

fn display_failures(failures: &[HostFailure]) -> String {
    match failures {
        [] => "connection failed: no host to connect to".to_string(),
        [single] => format!("connection failed: {single}"),
        many => {
            let mut out = String::from("connection failed:");
            for failure in many {
                out.push_str("\n- ");
                out.push_str(&failure.to_string());
            }
            out
        }
    }
}

/// Errors produced by connections and connectors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Every candidate host failed. Each attempt keeps its own message.
    #[error("{}", display_failures(.0))]
    Connect(Vec<HostFailure>),

    /// A single connection attempt exceeded `connect_timeout`.
    #[error("connection timeout expired")]
    ConnectTimeout,

    /// IO error on the transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed by the client.
    #[error("the connection is closed")]
    Closed,

    /// The server side of the session went away.
    #[error("server closed the connection unexpectedly")]
    ConnectionLost,

    /// The server rejected a statement.
    #[error("server error: {message}")]
    Server {
        /// SQLSTATE code, when the server sent one.
        sqlstate: Option<String>,
        /// Server message.
        message: String,
    },

    /// A user hook left the session in a state the pool cannot reuse.
    #[error("connection left in status {status} by {hook}")]
    BadState {
        /// Transaction status found after the hook ran.
        status: TransactionStatus,
        /// Name of the hook.
        hook: String,
    },

    /// Invalid configuration or connection string.
    #[error("configuration error: {0}")]
    Config(String),

    /// No dumper registered for a value kind and format.
    #[error("cannot adapt type {kind} to format {format}")]
    Adapt {
        /// Value kind name.
        kind: &'static str,
        /// Requested format name.
        format: &'static str,
    },

    /// A type name that does not resolve to a known type.
    #[error("unknown type name: {0}")]
    UnknownType(String),

    /// A loader could not interpret wire data.
    #[error("cannot load value: {0}")]
    Load(String),
}

impl Error {
    /// Build a server error without SQLSTATE.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            sqlstate: None,
            message: message.into(),
        }
    }

    /// Stable name of the error kind, used in log records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) | Self::ConnectTimeout | Self::Io(_) | Self::ConnectionLost => {
                "OperationalError"
            }
            Self::Closed => "InterfaceError",
            Self::Server { .. } => "ProgrammingError",
            Self::BadState { .. } => "BadStateError",
            Self::Config(_) => "ConfigError",
            Self::Adapt { .. } | Self::UnknownType(_) | Self::Load(_) => "DataError",
        }
    }

    /// Whether the error means the session cannot be used any more.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::ConnectTimeout
                | Self::Io(_)
                | Self::Closed
                | Self::ConnectionLost
        )
    }
}
