//! Acquire, return and close against the mock server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use sqlconn_client::Connection;
use sqlconn_pool::{ConnectionState, PoolError};
use sqlconn_testing::MockServer;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_pool_fills_to_min_size() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 2, 4).await;

    let status = pool.status();
    assert_eq!(status.total, 2);
    assert_eq!(status.available, 2);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.max, Some(4));
    assert_eq!(server.opened(), 2);

    let stats = pool.stats();
    assert_eq!(stats.connections_num, 2);
    assert_eq!(stats.pool_min, 2);
    assert_eq!(stats.pool_max, Some(4));
    assert_eq!(stats.connect_time.total(), 2);

    pool.close().await;
    assert_eq!(server.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_returned_connection_goes_to_the_back() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 2, 2).await;

    let first = pool.acquire().await.unwrap();
    let first_pid = first.backend_pid();
    drop(first);
    common::settle().await;

    let second = pool.acquire().await.unwrap();
    assert_ne!(second.backend_pid(), first_pid);
    drop(second);
    common::settle().await;

    let third = pool.acquire().await.unwrap();
    assert_eq!(third.backend_pid(), first_pid);
}

#[tokio::test(start_paused = true)]
async fn test_pool_grows_up_to_max_size() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 1, 3).await;

    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(pool.acquire().await.unwrap());
    }
    let mut pids: Vec<u32> = held.iter().map(|c| c.backend_pid()).collect();
    pids.sort_unstable();
    pids.dedup();
    assert_eq!(pids.len(), 3);
    assert_eq!(pool.status().in_use, 3);
    assert!(pool.status().is_at_capacity());

    let err = pool
        .acquire_timeout(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Timeout { .. }));
    assert_eq!(err.to_string(), "couldn't get a connection after 0.10 sec");

    let stats = pool.stats();
    assert_eq!(stats.requests_num, 4);
    assert_eq!(stats.requests_queued, 3);
    assert_eq!(stats.requests_errors, 1);
    assert_eq!(server.opened(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_uses_configured_timeout() {
    let server = MockServer::new();
    let pool = common::builder(&server)
        .min_size(1)
        .max_size(1)
        .timeout(Duration::from_millis(200))
        .build()
        .await
        .unwrap();

    let _held = pool.acquire().await.unwrap();
    let start = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(
        err,
        PoolError::Timeout { timeout } if timeout == Duration::from_millis(200)
    ));
    assert_eq!(start.elapsed(), Duration::from_millis(200));
    assert_eq!(pool.status().waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_fails_waiters_and_closes_idle() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 2, 2).await;

    let held = pool.acquire().await.unwrap();
    let _other = pool.acquire().await.unwrap();
    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire_timeout(Duration::from_secs(10)).await }
    });
    common::settle().await;
    assert_eq!(pool.status().waiting, 1);

    pool.close().await;
    assert!(pool.is_closed());
    assert!(matches!(
        waiter.await.unwrap(),
        Err(PoolError::PoolClosed)
    ));
    assert!(matches!(pool.acquire().await, Err(PoolError::PoolClosed)));
    assert!(matches!(pool.try_acquire(), Err(PoolError::PoolClosed)));

    // Connections in use are closed when they come back.
    assert_eq!(server.live(), 2);
    drop(held);
    common::settle().await;
    assert_eq!(server.live(), 1);

    // Closing again is a no-op.
    let closed = server.closed();
    pool.close().await;
    common::settle().await;
    assert_eq!(server.closed(), closed);
    assert_eq!(server.live(), 1);
    assert_eq!(pool.stats().requests_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_max_waiting_rejects_excess_requests() {
    let server = MockServer::new();
    let pool = common::builder(&server)
        .min_size(1)
        .max_size(1)
        .max_waiting(1)
        .build()
        .await
        .unwrap();
    pool.wait(Duration::from_secs(1)).await.unwrap();

    let held = pool.acquire().await.unwrap();
    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire_timeout(Duration::from_secs(10)).await }
    });
    common::settle().await;

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::TooManyRequests { max_waiting: 1 }));
    assert!(err.is_transient());

    drop(held);
    let conn = waiter.await.unwrap().unwrap();
    assert_eq!(conn.metadata().checkouts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_try_acquire() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 1, 1).await;

    let conn = pool.try_acquire().unwrap().expect("idle connection");
    assert!(pool.try_acquire().unwrap().is_none());

    drop(conn);
    common::settle().await;
    assert!(pool.try_acquire().unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_release_resets_in_place() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 1, 1).await;

    let conn = pool.acquire().await.unwrap();
    assert_eq!(pool.status().available, 0);
    pool.release(conn).await.unwrap();
    assert_eq!(pool.status().available, 1);
}

#[tokio::test(start_paused = true)]
async fn test_release_to_wrong_pool() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 1, 1).await;
    let other = common::filled_pool(&server, 1, 1).await;

    let conn = pool.acquire().await.unwrap();
    let err = other.release(conn).await.unwrap_err();
    assert!(matches!(err, PoolError::WrongPool));

    // The guard went back to its own pool on drop.
    common::settle().await;
    assert_eq!(pool.status().available, 1);
    assert_eq!(other.status().available, 1);
}

#[tokio::test(start_paused = true)]
async fn test_detach_replaces_connection() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 1, 1).await;

    let conn = pool.acquire().await.unwrap();
    let mut raw = conn.detach();
    common::settle().await;

    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.available, 1);
    assert_eq!(server.opened(), 2);

    raw.execute("SELECT 1").await.unwrap();
    raw.close().await.unwrap();
    assert_eq!(server.live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_metadata() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 1, 1).await;

    let conn = pool.acquire().await.unwrap();
    let meta = conn.metadata();
    assert_eq!(meta.state, ConnectionState::InUse);
    assert_eq!(meta.checkouts, 1);
    assert_eq!(meta.backend_pid, conn.backend_pid());
    assert!(meta.expires_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_usage_and_pop_stats() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 1, 1).await;

    let conn = pool.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(conn);
    common::settle().await;

    let stats = pool.pop_stats();
    assert_eq!(stats.requests_num, 1);
    assert!(stats.usage_ms >= 100);

    let stats = pool.stats();
    assert_eq!(stats.requests_num, 0);
    assert_eq!(stats.usage_ms, 0);
    assert_eq!(stats.connections_num, 0);
    assert_eq!(stats.pool_size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_keeps_pool_open() {
    let server = MockServer::new();
    server.refuse_all(true);
    let pool = common::builder(&server)
        .min_size(1)
        .max_size(1)
        .reconnect_attempts(1)
        .build()
        .await
        .unwrap();

    let err = pool.wait(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, PoolError::Timeout { .. }));
    assert!(!pool.is_closed());

    server.refuse_all(false);
    pool.wait(Duration::from_secs(5)).await.unwrap();
    assert_eq!(pool.status().available, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pool_names() {
    let server = MockServer::new();
    let named = common::builder(&server)
        .name("orders")
        .min_size(1)
        .build()
        .await
        .unwrap();
    assert_eq!(named.name(), "orders");

    let unnamed = common::builder(&server).min_size(1).build().await.unwrap();
    assert!(unnamed.name().starts_with("pool-"));
}
