//! Pool statistics and status.

use std::collections::BTreeMap;
use std::time::Duration;

/// Names of the statistics exposed by [`PoolStats::get`].
pub mod keys {
    /// Connections opened successfully.
    pub const CONNECTIONS_NUM: &str = "connections_num";
    /// Cumulative time spent opening connections, in milliseconds.
    pub const CONNECTIONS_MS: &str = "connections_ms";
    /// Failed connection attempts.
    pub const CONNECTIONS_ERRORS: &str = "connections_errors";
    /// Connections found broken on return or by a check.
    pub const CONNECTIONS_LOST: &str = "connections_lost";
    /// Acquire calls.
    pub const REQUESTS_NUM: &str = "requests_num";
    /// Acquire calls that had to queue.
    pub const REQUESTS_QUEUED: &str = "requests_queued";
    /// Requests queued right now.
    pub const REQUESTS_WAITING: &str = "requests_waiting";
    /// Cumulative time spent in the queue, in milliseconds.
    pub const REQUESTS_WAIT_MS: &str = "requests_wait_ms";
    /// Acquire calls that failed.
    pub const REQUESTS_ERRORS: &str = "requests_errors";
    /// Cumulative time connections spent checked out, in milliseconds.
    pub const USAGE_MS: &str = "usage_ms";
    /// Returned connections discarded.
    pub const RETURNS_BAD: &str = "returns_bad";
    /// Configured minimum size.
    pub const POOL_MIN: &str = "pool_min";
    /// Configured maximum size (0 when unbounded).
    pub const POOL_MAX: &str = "pool_max";
    /// Connections currently open or being opened.
    pub const POOL_SIZE: &str = "pool_size";
    /// Idle connections.
    pub const POOL_AVAILABLE: &str = "pool_available";
}

/// Upper bounds, in milliseconds, of the connect time histogram buckets.
pub const CONNECT_TIME_BUCKETS_MS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

/// Histogram of connection establishment times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectTimeHistogram {
    counts: [u64; CONNECT_TIME_BUCKETS_MS.len() + 1],
}

impl ConnectTimeHistogram {
    /// Record one connect time.
    pub fn record(&mut self, elapsed: Duration) {
        let ms = elapsed.as_millis();
        let idx = CONNECT_TIME_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= u128::from(bound))
            .unwrap_or(CONNECT_TIME_BUCKETS_MS.len());
        self.counts[idx] += 1;
    }

    /// `(upper bound in ms, count)` pairs; the overflow bucket has no bound.
    #[must_use]
    pub fn buckets(&self) -> Vec<(Option<u64>, u64)> {
        CONNECT_TIME_BUCKETS_MS
            .iter()
            .map(|&bound| Some(bound))
            .chain(std::iter::once(None))
            .zip(self.counts.iter().copied())
            .collect()
    }

    /// Number of recorded samples.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Counters updated under the pool lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatsCounters {
    pub connections_num: u64,
    pub connections_ms: u64,
    pub connections_errors: u64,
    pub connections_lost: u64,
    pub requests_num: u64,
    pub requests_queued: u64,
    pub requests_wait_ms: u64,
    pub requests_errors: u64,
    pub usage_ms: u64,
    pub returns_bad: u64,
    pub connect_time: ConnectTimeHistogram,
}

/// Point-in-time gauges.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Gauges {
    pub pool_min: usize,
    pub pool_max: Option<usize>,
    pub pool_size: usize,
    pub pool_available: usize,
    pub requests_waiting: usize,
}

/// Snapshot of pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Configured minimum size.
    pub pool_min: usize,
    /// Configured maximum size, `None` when unbounded.
    pub pool_max: Option<usize>,
    /// Connections open or being opened.
    pub pool_size: usize,
    /// Idle connections.
    pub pool_available: usize,
    /// Requests queued right now.
    pub requests_waiting: usize,
    /// Connections opened successfully.
    pub connections_num: u64,
    /// Cumulative connect time in milliseconds.
    pub connections_ms: u64,
    /// Failed connection attempts.
    pub connections_errors: u64,
    /// Connections found broken.
    pub connections_lost: u64,
    /// Acquire calls.
    pub requests_num: u64,
    /// Acquire calls that had to queue.
    pub requests_queued: u64,
    /// Cumulative queue time in milliseconds.
    pub requests_wait_ms: u64,
    /// Acquire calls that failed.
    pub requests_errors: u64,
    /// Cumulative checkout time in milliseconds.
    pub usage_ms: u64,
    /// Returned connections discarded.
    pub returns_bad: u64,
    /// Connect time distribution.
    pub connect_time: ConnectTimeHistogram,
    /// Time since the pool was opened.
    pub uptime: Duration,
}

impl PoolStats {
    pub(crate) fn from_parts(gauges: Gauges, counters: StatsCounters, uptime: Duration) -> Self {
        Self {
            pool_min: gauges.pool_min,
            pool_max: gauges.pool_max,
            pool_size: gauges.pool_size,
            pool_available: gauges.pool_available,
            requests_waiting: gauges.requests_waiting,
            connections_num: counters.connections_num,
            connections_ms: counters.connections_ms,
            connections_errors: counters.connections_errors,
            connections_lost: counters.connections_lost,
            requests_num: counters.requests_num,
            requests_queued: counters.requests_queued,
            requests_wait_ms: counters.requests_wait_ms,
            requests_errors: counters.requests_errors,
            usage_ms: counters.usage_ms,
            returns_bad: counters.returns_bad,
            connect_time: counters.connect_time,
            uptime,
        }
    }

    /// Value of the statistic called `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<u64> {
        let value = match key {
            keys::CONNECTIONS_NUM => self.connections_num,
            keys::CONNECTIONS_MS => self.connections_ms,
            keys::CONNECTIONS_ERRORS => self.connections_errors,
            keys::CONNECTIONS_LOST => self.connections_lost,
            keys::REQUESTS_NUM => self.requests_num,
            keys::REQUESTS_QUEUED => self.requests_queued,
            keys::REQUESTS_WAITING => self.requests_waiting as u64,
            keys::REQUESTS_WAIT_MS => self.requests_wait_ms,
            keys::REQUESTS_ERRORS => self.requests_errors,
            keys::USAGE_MS => self.usage_ms,
            keys::RETURNS_BAD => self.returns_bad,
            keys::POOL_MIN => self.pool_min as u64,
            keys::POOL_MAX => self.pool_max.unwrap_or(0) as u64,
            keys::POOL_SIZE => self.pool_size as u64,
            keys::POOL_AVAILABLE => self.pool_available as u64,
            _ => return None,
        };
        Some(value)
    }

    /// Every statistic keyed by name. Zero counters are included.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<&'static str, u64> {
        [
            keys::POOL_MIN,
            keys::POOL_MAX,
            keys::POOL_SIZE,
            keys::POOL_AVAILABLE,
            keys::REQUESTS_WAITING,
            keys::CONNECTIONS_NUM,
            keys::CONNECTIONS_MS,
            keys::CONNECTIONS_ERRORS,
            keys::CONNECTIONS_LOST,
            keys::REQUESTS_NUM,
            keys::REQUESTS_QUEUED,
            keys::REQUESTS_WAIT_MS,
            keys::REQUESTS_ERRORS,
            keys::USAGE_MS,
            keys::RETURNS_BAD,
        ]
        .into_iter()
        .filter_map(|key| self.get(key).map(|value| (key, value)))
        .collect()
    }

    /// Fraction of acquire calls that succeeded (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        if self.requests_num == 0 {
            return 1.0;
        }
        let failed = self.requests_errors.min(self.requests_num);
        (self.requests_num - failed) as f64 / self.requests_num as f64
    }

    /// Average queue time of queued requests, in milliseconds.
    #[must_use]
    pub fn avg_wait_ms(&self) -> f64 {
        if self.requests_queued == 0 {
            return 0.0;
        }
        self.requests_wait_ms as f64 / self.requests_queued as f64
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently in use.
    pub in_use: usize,
    /// Total number of connections, including those being opened.
    pub total: usize,
    /// Maximum allowed connections, `None` when unbounded.
    pub max: Option<usize>,
    /// Requests queued.
    pub waiting: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        match self.max {
            Some(max) if max > 0 => (self.in_use as f64 / max as f64) * 100.0,
            _ => 0.0,
        }
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.max.is_some_and(|max| self.total >= max)
    }
}
