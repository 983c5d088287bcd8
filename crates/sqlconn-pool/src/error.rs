//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Invalid pool configuration. The pool was left unchanged.
    #[error("pool configuration error: {0}")]
    Config(String),

    /// No connection became available in time.
    #[error("couldn't get a connection after {:.2} sec", .timeout.as_secs_f64())]
    Timeout {
        /// The timeout that expired.
        timeout: Duration,
    },

    /// The queue of waiting requests is full.
    #[error("the pool has already {max_waiting} requests waiting")]
    TooManyRequests {
        /// The configured queue limit.
        max_waiting: usize,
    },

    /// The pool is closed.
    #[error("the pool is closed")]
    PoolClosed,

    /// Opening a connection failed.
    #[error(transparent)]
    Connect(#[from] sqlconn_client::Error),

    /// The connection does not belong to this pool.
    #[error("can't return connection to pool: it belongs to a different pool")]
    WrongPool,
}

impl PoolError {
    /// Whether the error is transient and the operation may succeed later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::TooManyRequests { .. } | Self::Connect(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = PoolError::Timeout {
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "couldn't get a connection after 1.50 sec");
        assert!(err.is_transient());
    }

    #[test]
    fn test_connect_error_is_transparent() {
        let err = PoolError::from(sqlconn_client::Error::ConnectTimeout);
        assert_eq!(err.to_string(), "connection timeout expired");
        assert!(!PoolError::PoolClosed.is_transient());
    }
}
