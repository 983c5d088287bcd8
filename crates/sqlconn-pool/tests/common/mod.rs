//! Helpers shared by the pool integration tests.

#![allow(dead_code)]

use std::time::Duration;

use sqlconn_client::Config;
use sqlconn_pool::{Pool, PoolBuilder};
use sqlconn_testing::{MockConnector, MockServer};

/// Client configuration for the mock server, in autocommit mode so that
/// plain queries do not leave transactions behind.
pub fn client_config() -> Config {
    Config::new()
        .host("db", 5432)
        .autocommit(true)
        .connect_timeout(Duration::from_secs(5))
}

/// Builder with the mock connector and the test client configuration.
pub fn builder(server: &MockServer) -> PoolBuilder<MockConnector> {
    Pool::builder(server.connector())
        .connection_config(client_config())
        .reconnect_delay(Duration::from_millis(100), Duration::from_secs(1))
}

/// Open a filled pool of `min..=max` connections.
pub async fn filled_pool(server: &MockServer, min: usize, max: usize) -> Pool<MockConnector> {
    let pool = builder(server)
        .min_size(min)
        .max_size(max)
        .build()
        .await
        .expect("pool opens");
    pool.wait(Duration::from_secs(5)).await.expect("pool fills");
    pool
}

/// Let background workers drain their queue.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
