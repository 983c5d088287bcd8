//! Lifetime, idle eviction and health checks.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use sqlconn_client::Connection;
use sqlconn_pool::PoolError;
use sqlconn_testing::{CapturedLogs, MockServer};

#[tokio::test(start_paused = true)]
async fn test_max_lifetime_replaces_connections() {
    let server = MockServer::new();
    let pool = common::builder(&server)
        .min_size(1)
        .max_size(1)
        .max_lifetime(Some(Duration::from_millis(200)))
        .build()
        .await
        .unwrap();
    pool.wait(Duration::from_secs(1)).await.unwrap();

    let mut pids = Vec::new();
    for _ in 0..5 {
        let conn = pool.acquire().await.unwrap();
        pids.push(conn.backend_pid());
        drop(conn);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(pids[0], pids[1]);
    assert_ne!(pids[1], pids[4]);
    assert!(server.opened() >= 2);
    assert_eq!(pool.status().total, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_durations_keep_pool_working() {
    let server = MockServer::new();
    let pool = common::builder(&server)
        .min_size(1)
        .max_size(1)
        .max_lifetime(Some(Duration::MAX))
        .max_idle(Some(Duration::MAX))
        .maintenance_interval(Duration::MAX)
        .build()
        .await
        .unwrap();
    pool.wait(Duration::from_secs(5)).await.unwrap();

    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.available, 1);
    assert_eq!(server.live(), 1);

    let first = pool.acquire().await.unwrap().backend_pid();
    common::settle().await;
    let second = pool.acquire().await.unwrap().backend_pid();
    assert_eq!(first, second);
    assert_eq!(server.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_idle_connection_closed_by_maintenance() {
    let server = MockServer::new();
    let pool = common::builder(&server)
        .min_size(1)
        .max_size(1)
        .max_lifetime(Some(Duration::from_millis(500)))
        .build()
        .await
        .unwrap();
    pool.wait(Duration::from_secs(1)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(server.opened(), 2);
    assert_eq!(server.live(), 1);
    assert_eq!(pool.status().available, 1);
}

#[tokio::test(start_paused = true)]
async fn test_max_idle_shrinks_to_min_size() {
    let server = MockServer::new();
    let pool = common::builder(&server)
        .min_size(1)
        .max_size(4)
        .max_idle(Some(Duration::from_secs(2)))
        .build()
        .await
        .unwrap();
    pool.wait(Duration::from_secs(1)).await.unwrap();

    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(pool.acquire().await.unwrap());
    }
    drop(held);
    common::settle().await;
    assert_eq!(pool.status().total, 3);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(pool.status().total, 1);
    assert_eq!(server.live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_without_max_idle_pool_keeps_connections() {
    let server = MockServer::new();
    let pool = common::builder(&server)
        .min_size(1)
        .max_size(4)
        .max_idle(None)
        .build()
        .await
        .unwrap();
    pool.wait(Duration::from_secs(1)).await.unwrap();

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    drop((first, second));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(pool.status().total, 2);
}

#[tokio::test(start_paused = true)]
async fn test_check_replaces_broken_connections() {
    let (logs, _guard) = CapturedLogs::install();
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 2, 2).await;

    assert_eq!(server.terminate_all(), 2);
    pool.check().await.unwrap();

    let discarded = logs
        .warnings()
        .iter()
        .filter(|r| r.message == "discarding broken connection")
        .count();
    assert_eq!(discarded, 2);
    assert_eq!(pool.stats().connections_lost, 2);

    common::settle().await;
    let status = pool.status();
    assert_eq!(status.total, 2);
    assert_eq!(status.available, 2);
    assert_eq!(server.live(), 2);
    assert_eq!(server.opened(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_check_keeps_healthy_connections() {
    let (logs, _guard) = CapturedLogs::install();
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 2, 2).await;

    pool.check().await.unwrap();

    assert!(logs.warnings().is_empty());
    assert_eq!(pool.status().available, 2);
    assert_eq!(server.opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_check_on_closed_pool() {
    let server = MockServer::new();
    let pool = common::filled_pool(&server, 1, 1).await;
    pool.close().await;
    assert!(matches!(pool.check().await, Err(PoolError::PoolClosed)));
}
