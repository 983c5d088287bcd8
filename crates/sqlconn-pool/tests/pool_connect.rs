//! Background connection creation: retries, failures and failover.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use sqlconn_pool::PoolError;
use sqlconn_testing::{CapturedLogs, MockServer};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_connect_retries_with_backoff() {
    let (logs, _guard) = CapturedLogs::install();
    let server = MockServer::new();
    server.fail_next_connects(2);

    let start = Instant::now();
    let pool = common::builder(&server)
        .min_size(1)
        .max_size(1)
        .reconnect_attempts(3)
        .reconnect_delay(Duration::from_secs(1), Duration::from_secs(10))
        .build()
        .await
        .unwrap();
    pool.wait(Duration::from_secs(30)).await.unwrap();

    // Roughly 1s then 2s of backoff, each with 10% jitter.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2700), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(3300), "{elapsed:?}");

    let stats = pool.stats();
    assert_eq!(stats.connections_errors, 2);
    assert_eq!(stats.connections_num, 1);

    let retries = logs
        .warnings()
        .iter()
        .filter(|r| r.message == "error connecting, retrying")
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_attempts_are_logged_and_retried_later() {
    let (logs, _guard) = CapturedLogs::install();
    let server = MockServer::new();
    server.refuse_all(true);

    let pool = common::builder(&server)
        .min_size(1)
        .max_size(1)
        .reconnect_attempts(2)
        .build()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(logs.has_message("reconnection attempts exhausted, giving up"));
    assert_eq!(pool.status().total, 0);

    server.refuse_all(false);
    pool.wait(Duration::from_secs(5)).await.unwrap();
    assert_eq!(pool.status().available, 1);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_gets_connection_error() {
    let server = MockServer::new();
    server.refuse_all(true);

    let pool = common::builder(&server)
        .min_size(0)
        .max_size(1)
        .reconnect_attempts(1)
        .build()
        .await
        .unwrap();

    let err = pool
        .acquire_timeout(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Connect(_)));
    assert!(err.to_string().contains("connection refused"));
    assert_eq!(pool.status().total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failover_to_second_host() {
    let server = MockServer::new();
    server.refuse_host("db1");

    let pool = common::builder(&server)
        .connection_string("host=db1,db2;autocommit=true")
        .min_size(2)
        .build()
        .await
        .unwrap();
    pool.wait(Duration::from_secs(5)).await.unwrap();

    assert_eq!(server.attempts(), 4);
    assert_eq!(server.opened(), 2);
    assert_eq!(pool.stats().connections_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_time_statistics() {
    let server = MockServer::new();
    server.set_connect_delay(Duration::from_millis(50));
    let pool = common::filled_pool(&server, 2, 2).await;

    let stats = pool.stats();
    assert_eq!(stats.connections_ms, 100);
    assert_eq!(stats.connect_time.buckets()[4], (Some(50), 2));
}
