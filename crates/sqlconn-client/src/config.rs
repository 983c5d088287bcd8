//! Connection configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::Error;

/// Default server port.
pub const DEFAULT_PORT: u16 = 5432;

/// One candidate server address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddr {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl HostAddr {
    /// Create a host address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Order in which candidate hosts are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalanceHosts {
    /// Try hosts in the order they were given.
    #[default]
    Disable,
    /// Shuffle hosts before every connection attempt.
    Random,
}

/// Configuration for opening a connection.
#[derive(Clone)]
pub struct Config {
    /// Candidate hosts, tried in order until one accepts.
    pub hosts: Vec<HostAddr>,

    /// Database name.
    pub database: Option<String>,

    /// User name.
    pub user: Option<String>,

    /// Password.
    pub password: Option<String>,

    /// Application name (shown in server activity views).
    pub application_name: String,

    /// Timeout for each single host attempt. Zero disables the timeout.
    pub connect_timeout: Duration,

    /// Whether new sessions run in autocommit mode.
    pub autocommit: bool,

    /// Host ordering policy.
    pub load_balance_hosts: LoadBalanceHosts,

    /// Connector-specific options passed through untouched.
    pub options: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: vec![HostAddr::new("localhost", DEFAULT_PORT)],
            database: None,
            user: None,
            password: None,
            application_name: "sqlconn".to_string(),
            connect_timeout: Duration::from_secs(30),
            autocommit: false,
            load_balance_hosts: LoadBalanceHosts::Disable,
            options: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("hosts", &self.hosts)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("application_name", &self.application_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("autocommit", &self.autocommit)
            .field("load_balance_hosts", &self.load_balance_hosts)
            .field("options", &self.options)
            .finish()
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("on")
        || value == "1"
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string into configuration.
    ///
    /// Accepts `key=value` pairs separated by semicolons. Several hosts can
    /// be listed, each with an optional port:
    /// ```text
    /// host=db1:5432,db2;dbname=app;user=svc;password=secret;connect_timeout=5
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut config = Self::default();
        let mut hosts: Option<Vec<(String, Option<u16>)>> = None;
        let mut default_port = DEFAULT_PORT;

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "host" | "server" | "data source" => {
                    let mut parsed = Vec::new();
                    for item in value.split(',') {
                        let item = item.trim();
                        if item.is_empty() {
                            return Err(Error::Config(format!("empty host in: {value}")));
                        }
                        match item.rsplit_once(':') {
                            Some((host, port)) => {
                                let port = port.parse().map_err(|_| {
                                    Error::Config(format!("invalid port: {port}"))
                                })?;
                                parsed.push((host.to_string(), Some(port)));
                            }
                            None => parsed.push((item.to_string(), None)),
                        }
                    }
                    hosts = Some(parsed);
                }
                "port" => {
                    default_port = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid port: {value}")))?;
                }
                "database" | "dbname" | "initial catalog" => {
                    config.database = Some(value.to_string());
                }
                "user" | "user id" | "uid" => {
                    config.user = Some(value.to_string());
                }
                "password" | "pwd" => {
                    config.password = Some(value.to_string());
                }
                "application name" | "application_name" | "app" => {
                    config.application_name = value.to_string();
                }
                "connect timeout" | "connect_timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                "autocommit" => {
                    config.autocommit = parse_bool(value);
                }
                "load balance hosts" | "load_balance_hosts" => {
                    config.load_balance_hosts = match value.to_lowercase().as_str() {
                        "disable" => LoadBalanceHosts::Disable,
                        "random" => LoadBalanceHosts::Random,
                        other => {
                            return Err(Error::Config(format!(
                                "invalid load_balance_hosts: {other}"
                            )));
                        }
                    };
                }
                _ => {
                    // Unknown keys belong to the connector
                    tracing::debug!(
                        key = key,
                        "passing unknown connection string option to the connector"
                    );
                    config.options.insert(key, value.to_string());
                }
            }
        }

        if let Some(hosts) = hosts {
            config.hosts = hosts
                .into_iter()
                .map(|(host, port)| HostAddr::new(host, port.unwrap_or(default_port)))
                .collect();
        } else {
            for host in &mut config.hosts {
                host.port = default_port;
            }
        }

        Ok(config)
    }

    /// Replace the candidate hosts with a single host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.hosts = vec![HostAddr::new(host, port)];
        self
    }

    /// Append a fallback host.
    #[must_use]
    pub fn add_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.hosts.push(HostAddr::new(host, port));
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the user name and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the per-host connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set autocommit for new sessions.
    #[must_use]
    pub fn autocommit(mut self, enabled: bool) -> Self {
        self.autocommit = enabled;
        self
    }

    /// Set the host ordering policy.
    #[must_use]
    pub fn load_balance_hosts(mut self, policy: LoadBalanceHosts) -> Self {
        self.load_balance_hosts = policy;
        self
    }

    /// Set a connector-specific option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}
