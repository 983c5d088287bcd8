//! In-process mock database server.
//!
//! [`MockServer`] hands out [`MockConnection`]s through [`MockConnector`]
//! and lets tests inject the failures a real server produces: slow
//! connects, refused connects, unreachable hosts, terminated backends and
//! failing rollbacks. Sessions follow the transaction status rules of a
//! real backend closely enough for the pool's reset logic to be exercised.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlconn_client::{Config, Connect, Connection, Error, HostAddr, Result, TransactionStatus};

/// First backend pid handed out by a fresh server.
pub const FIRST_PID: u32 = 1000;

#[derive(Debug)]
struct ServerState {
    next_pid: AtomicU32,
    connect_delay: Mutex<Duration>,
    fail_next: AtomicUsize,
    refuse_all: AtomicBool,
    refused_hosts: Mutex<HashSet<String>>,
    unreachable_hosts: Mutex<HashSet<String>>,
    sessions: Mutex<HashMap<u32, Arc<AtomicBool>>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    attempts: AtomicUsize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            next_pid: AtomicU32::new(FIRST_PID),
            connect_delay: Mutex::new(Duration::ZERO),
            fail_next: AtomicUsize::new(0),
            refuse_all: AtomicBool::new(false),
            refused_hosts: Mutex::new(HashSet::new()),
            unreachable_hosts: Mutex::new(HashSet::new()),
            sessions: Mutex::new(HashMap::new()),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }
}

/// Shared handle on a mock server.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    state: Arc<ServerState>,
}

impl MockServer {
    /// Create a server accepting every connection immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector opening sessions on this server.
    #[must_use]
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            server: self.clone(),
        }
    }

    /// Delay applied to every successful connect.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Refuse every connection attempt until switched off.
    pub fn refuse_all(&self, refuse: bool) {
        self.state.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Refuse connections addressed to `host`.
    pub fn refuse_host(&self, host: impl Into<String>) {
        self.state.refused_hosts.lock().insert(host.into());
    }

    /// Never answer connections addressed to `host`.
    pub fn make_unreachable(&self, host: impl Into<String>) {
        self.state.unreachable_hosts.lock().insert(host.into());
    }

    /// Kill the backend serving `pid`. Returns `false` for unknown pids.
    pub fn terminate(&self, pid: u32) -> bool {
        match self.state.sessions.lock().remove(&pid) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Kill every live backend.
    pub fn terminate_all(&self) -> usize {
        let mut sessions = self.state.sessions.lock();
        let n = sessions.len();
        for (_, flag) in sessions.drain() {
            flag.store(true, Ordering::SeqCst);
        }
        n
    }

    /// Sessions opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed by the client so far.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Connection attempts received, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Sessions opened and not closed yet.
    #[must_use]
    pub fn live(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }

    async fn accept(&self, host: &HostAddr, config: &Config) -> Result<MockConnection> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        if self.state.unreachable_hosts.lock().contains(&host.host) {
            std::future::pending::<()>().await;
        }

        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let refused = self.state.refuse_all.load(Ordering::SeqCst)
            || self.state.refused_hosts.lock().contains(&host.host)
            || self
                .state
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if refused {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let pid = self.state.next_pid.fetch_add(1, Ordering::SeqCst);
        let broken = Arc::new(AtomicBool::new(false));
        self.state.sessions.lock().insert(pid, Arc::clone(&broken));
        self.state.opened.fetch_add(1, Ordering::SeqCst);

        tracing::trace!(pid, host = %host, "mock session opened");

        Ok(MockConnection {
            pid,
            status: TransactionStatus::Idle,
            autocommit: config.autocommit,
            closed: false,
            broken,
            fail_next_rollback: false,
            settings: HashMap::new(),
            executed: Vec::new(),
            server: self.clone(),
        })
    }

    fn session_closed(&self, pid: u32) {
        self.state.sessions.lock().remove(&pid);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// [`Connect`] implementation backed by a [`MockServer`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    server: MockServer,
}

impl MockConnector {
    /// The server behind this connector.
    #[must_use]
    pub fn server(&self) -> &MockServer {
        &self.server
    }
}

#[async_trait]
impl Connect for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, host: &HostAddr, config: &Config) -> Result<MockConnection> {
        self.server.accept(host, config).await
    }
}

/// A session on a [`MockServer`].
///
/// Recognised statements: empty string, `SELECT ...`, `BEGIN`, `COMMIT`,
/// `ROLLBACK`, `SET name = value`, `RESET ALL`, `COPY ...` (leaves the
/// session ACTIVE) and `SLEEP <ms>`. Anything else is a syntax error.
#[derive(Debug)]
pub struct MockConnection {
    pid: u32,
    status: TransactionStatus,
    autocommit: bool,
    closed: bool,
    broken: Arc<AtomicBool>,
    fail_next_rollback: bool,
    settings: HashMap<String, String>,
    executed: Vec<String>,
    server: MockServer,
}

impl MockConnection {
    /// Statements executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Value of a session setting.
    #[must_use]
    pub fn setting(&self, name: &str) -> Option<&str> {
        self.settings.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Switch autocommit on or off.
    pub fn set_autocommit(&mut self, autocommit: bool) {
        self.autocommit = autocommit;
    }

    /// Whether the session runs in autocommit mode.
    #[must_use]
    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// Make the next rollback fail and break the session.
    pub fn fail_next_rollback(&mut self) {
        self.fail_next_rollback = true;
    }

    fn check_usable(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.broken.load(Ordering::SeqCst) {
            self.status = TransactionStatus::Unknown;
            return Err(Error::ConnectionLost);
        }
        Ok(())
    }

    fn begin_implicit(&mut self) {
        if !self.autocommit && self.status == TransactionStatus::Idle {
            self.status = TransactionStatus::InTrans;
        }
    }

    fn statement_failed(&mut self, message: String) -> Error {
        if self.status == TransactionStatus::InTrans {
            self.status = TransactionStatus::InError;
        }
        Error::server(message)
    }

    fn apply_set(&mut self, rest: &str) -> Result<()> {
        let (name, value) = rest
            .split_once('=')
            .or_else(|| rest.split_once(" to "))
            .or_else(|| rest.split_once(" TO "))
            .ok_or_else(|| self.statement_failed(format!("syntax error at or near \"{rest}\"")))?;
        self.settings.insert(
            name.trim().to_lowercase(),
            value.trim().trim_matches('\'').to_string(),
        );
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.check_usable()?;
        let sql = sql.trim();
        if sql.is_empty() {
            return Ok(0);
        }
        self.executed.push(sql.to_string());

        if self.status == TransactionStatus::Active {
            return Err(Error::server("another command is already in progress"));
        }

        let upper = sql.to_uppercase();
        if self.status == TransactionStatus::InError
            && upper != "ROLLBACK"
            && upper != "COMMIT"
        {
            return Err(Error::server(
                "current transaction is aborted, commands ignored until end of transaction block",
            ));
        }

        match upper.as_str() {
            "BEGIN" => {
                self.status = TransactionStatus::InTrans;
                Ok(0)
            }
            "COMMIT" | "ROLLBACK" => {
                self.status = TransactionStatus::Idle;
                Ok(0)
            }
            "RESET ALL" => {
                self.begin_implicit();
                self.settings.clear();
                Ok(0)
            }
            _ if upper.starts_with("SET ") => {
                self.begin_implicit();
                self.apply_set(&sql[4..])?;
                Ok(0)
            }
            _ if upper.starts_with("SELECT") => {
                self.begin_implicit();
                Ok(1)
            }
            _ if upper.starts_with("COPY ") => {
                self.begin_implicit();
                self.status = TransactionStatus::Active;
                Ok(0)
            }
            _ if upper.starts_with("SLEEP ") => {
                let ms: u64 = sql[6..]
                    .trim()
                    .parse()
                    .map_err(|_| Error::server(format!("invalid sleep: {sql}")))?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                self.check_usable()?;
                Ok(0)
            }
            _ => {
                self.begin_implicit();
                Err(self.statement_failed(format!("syntax error at or near \"{sql}\"")))
            }
        }
    }

    async fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.check_usable()?;
        if std::mem::take(&mut self.fail_next_rollback) {
            self.broken.store(true, Ordering::SeqCst);
            self.status = TransactionStatus::Unknown;
            return Err(Error::ConnectionLost);
        }
        self.executed.push("ROLLBACK".to_string());
        self.status = TransactionStatus::Idle;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.status = TransactionStatus::Unknown;
            self.server.session_closed(self.pid);
            tracing::trace!(pid = self.pid, "mock session closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_broken(&self) -> bool {
        !self.closed && self.broken.load(Ordering::SeqCst)
    }

    fn backend_pid(&self) -> u32 {
        self.pid
    }

    fn transaction_status(&self) -> TransactionStatus {
        if self.closed || self.broken.load(Ordering::SeqCst) {
            TransactionStatus::Unknown
        } else {
            self.status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::new().host("mock", 5432)
    }

    async fn open(server: &MockServer) -> MockConnection {
        server
            .connector()
            .connect(&HostAddr::new("mock", 5432), &config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pids_are_sequential() {
        let server = MockServer::new();
        let a = open(&server).await;
        let b = open(&server).await;
        assert_eq!(a.backend_pid(), FIRST_PID);
        assert_eq!(b.backend_pid(), FIRST_PID + 1);
        assert_eq!(server.live(), 2);
    }

    #[tokio::test]
    async fn test_transaction_status_follows_statements() {
        let server = MockServer::new();
        let mut conn = open(&server).await;

        conn.execute("SELECT 1").await.unwrap();
        assert_eq!(conn.transaction_status(), TransactionStatus::InTrans);
        assert!(conn.execute("WAT").await.is_err());
        assert_eq!(conn.transaction_status(), TransactionStatus::InError);
        conn.rollback().await.unwrap();
        assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

        conn.set_autocommit(true);
        conn.execute("SET timezone = 'UTC'").await.unwrap();
        assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
        assert_eq!(conn.setting("TimeZone"), Some("UTC"));

        conn.execute("COPY t TO STDOUT").await.unwrap();
        assert_eq!(conn.transaction_status(), TransactionStatus::Active);
    }

    #[tokio::test]
    async fn test_terminate_breaks_session() {
        let server = MockServer::new();
        let mut conn = open(&server).await;
        assert!(server.terminate(conn.backend_pid()));
        assert!(conn.is_broken());
        assert!(matches!(conn.ping().await, Err(Error::ConnectionLost)));
        conn.close().await.unwrap();
        assert_eq!(server.live(), 0);
    }

    #[tokio::test]
    async fn test_fail_next_connects() {
        let server = MockServer::new();
        server.fail_next_connects(1);
        let host = HostAddr::new("mock", 5432);
        assert!(server.connector().connect(&host, &config()).await.is_err());
        assert!(server.connector().connect(&host, &config()).await.is_ok());
        assert_eq!(server.attempts(), 2);
    }

    #[tokio::test]
    async fn test_failing_rollback() {
        let server = MockServer::new();
        let mut conn = open(&server).await;
        conn.execute("BEGIN").await.unwrap();
        conn.fail_next_rollback();
        let err = conn.rollback().await.unwrap_err();
        assert_eq!(err.kind(), "OperationalError");
        assert!(conn.is_broken());
    }
}
