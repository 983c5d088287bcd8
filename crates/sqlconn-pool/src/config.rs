//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Pooling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolKind {
    /// Keep up to `max_size` connections open and reuse them.
    #[default]
    Standard,
    /// Open a connection per request and close it on return, unless a
    /// queued request can take it over.
    Null,
}

/// Configuration for a connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name used in log records.
    pub name: Option<String>,

    /// Pooling strategy.
    pub kind: PoolKind,

    /// Connections kept open even when unused.
    pub min_size: usize,

    /// Upper bound on open connections.
    ///
    /// `None` means "same as `min_size`" on a standard pool and "unbounded"
    /// on a null pool, where `Some(0)` is also unbounded.
    pub max_size: Option<usize>,

    /// Default time a caller waits in [`acquire`](crate::Pool::acquire).
    pub timeout: Duration,

    /// Maximum number of queued requests, 0 for no limit.
    pub max_waiting: usize,

    /// Connections older than this are replaced. `None` disables recycling.
    pub max_lifetime: Option<Duration>,

    /// Idle connections above `min_size` unused for this long are closed.
    /// `None` disables idle eviction.
    pub max_idle: Option<Duration>,

    /// Connection attempts per creation before giving up.
    pub reconnect_attempts: u32,

    /// Delay before the first retry of a failed connection attempt.
    pub reconnect_delay: Duration,

    /// Upper bound on the retry delay.
    pub reconnect_delay_max: Duration,

    /// Background worker tasks.
    pub num_workers: usize,

    /// Interval between maintenance runs.
    pub maintenance_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: None,
            kind: PoolKind::Standard,
            min_size: 4,
            max_size: None,
            timeout: Duration::from_secs(30),
            max_waiting: 0,
            max_lifetime: Some(Duration::from_secs(60 * 60)),
            max_idle: Some(Duration::from_secs(10 * 60)),
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(10),
            num_workers: 3,
            maintenance_interval: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    /// Create a standard pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a null pool configuration: no idle connections, no upper bound.
    #[must_use]
    pub fn null() -> Self {
        Self {
            kind: PoolKind::Null,
            min_size: 0,
            max_size: None,
            ..Self::default()
        }
    }

    /// Set the pool name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = Some(size);
        self
    }

    /// Set the default acquire timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the queue length limit (0 for no limit).
    #[must_use]
    pub fn max_waiting(mut self, max_waiting: usize) -> Self {
        self.max_waiting = max_waiting;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the maximum idle time.
    #[must_use]
    pub fn max_idle(mut self, idle: Option<Duration>) -> Self {
        self.max_idle = idle;
        self
    }

    /// Set the number of connection attempts per creation.
    #[must_use]
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// Set the initial and maximum retry delay.
    #[must_use]
    pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.reconnect_delay_max = max;
        self
    }

    /// Set the number of background workers.
    #[must_use]
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    /// Set the maintenance interval.
    #[must_use]
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Resolve `(min_size, max_size)` to the effective pair for this pool
    /// kind, rejecting invalid combinations. `None` means unbounded.
    pub fn check_size(
        &self,
        min_size: usize,
        max_size: Option<usize>,
    ) -> Result<(usize, Option<usize>), PoolError> {
        match self.kind {
            PoolKind::Standard => {
                let max = max_size.unwrap_or(min_size);
                if max == 0 {
                    return Err(PoolError::Config("max_size must be at least 1".into()));
                }
                if max < min_size {
                    return Err(PoolError::Config(format!(
                        "max_size ({max}) must be greater or equal than min_size ({min_size})"
                    )));
                }
                Ok((min_size, Some(max)))
            }
            PoolKind::Null => {
                if min_size != 0 {
                    return Err(PoolError::Config(format!(
                        "null pools must have min_size 0, got {min_size}"
                    )));
                }
                Ok((0, max_size.filter(|&max| max > 0)))
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        self.check_size(self.min_size, self.max_size)?;

        if self.num_workers == 0 {
            return Err(PoolError::Config("num_workers must be at least 1".into()));
        }

        if self.reconnect_attempts == 0 {
            return Err(PoolError::Config("reconnect_attempts must be at least 1".into()));
        }

        if self.maintenance_interval.is_zero() {
            return Err(PoolError::Config(
                "maintenance_interval must be greater than zero".into(),
            ));
        }

        if self.reconnect_delay > self.reconnect_delay_max {
            return Err(PoolError::Config(
                "reconnect_delay must not exceed reconnect_delay_max".into(),
            ));
        }

        Ok(())
    }
}
