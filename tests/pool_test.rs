//! Integration tests for pooled mode.
//!
//! Tests verify that:
//! - Contexts bind from the pool on first use once a policy is installed
//! - The pool bound holds and a release admits exactly one more loan
//! - Auto-disconnect hands connections back after updates and drained cursors
//! - Changing the policy drains the old group
//! - Schema-switched connections never return to the pool
//! - A lost link is closed, never handed back to the pool
//! - Concurrent first uses never exceed the pool bound

use std::sync::Arc;

use simsql::db::{MemoryDriver, MemoryResponse};
use simsql::error::ConnectionErrorKind;
use simsql::models::{ContextId, Setting, Value};
use simsql::{Environment, SqlError};

fn settings(items: &[(&str, Value)]) -> Vec<Setting> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn policy(max: f64, auto_disconnect: bool) -> Vec<Setting> {
    settings(&[
        ("host", "db.local".into()),
        ("user", "sim".into()),
        ("schema", "world".into()),
        ("brand", "mysql".into()),
        ("maxconnections", Value::Number(max)),
        ("autodisconnect", Value::Boolean(auto_disconnect)),
    ])
}

fn env_with(driver: &MemoryDriver) -> Environment<MemoryDriver> {
    Environment::with_driver(driver.clone())
}

#[tokio::test]
async fn test_first_use_binds_from_pool() {
    let driver = MemoryDriver::new();
    let env = env_with(&driver);
    let ctx = ContextId::from("a1");

    env.set_connection_pooling(&ctx, &policy(4.0, false))
        .await
        .unwrap();
    assert_eq!(driver.opened(), 0);

    env.exec_update(&ctx, "UPDATE agents SET x = 1").await.unwrap();
    assert_eq!(driver.opened(), 1);
    assert!(env.registry().pooled_fingerprint(&ctx).await.is_some());
}

#[tokio::test]
async fn test_pool_bound_and_release() {
    let driver = MemoryDriver::new();
    let env = env_with(&driver);
    let setup = ContextId::from("setup");
    env.set_connection_pooling(&setup, &policy(2.0, false))
        .await
        .unwrap();

    let a1 = ContextId::from("a1");
    let a2 = ContextId::from("a2");
    let a3 = ContextId::from("a3");
    env.exec_direct(&a1, "SELECT 1").await.unwrap();
    env.exec_direct(&a2, "SELECT 1").await.unwrap();

    let err = env.exec_direct(&a3, "SELECT 1").await.unwrap_err();
    assert!(matches!(
        err,
        SqlError::Connection {
            kind: ConnectionErrorKind::PoolExhausted,
            ..
        }
    ));

    env.disconnect(&a1).await.unwrap();
    env.exec_direct(&a3, "SELECT 1").await.unwrap();
    // The idle connection was reused, not a new one opened.
    assert_eq!(driver.opened(), 2);

    let a4 = ContextId::from("a4");
    assert!(env.exec_direct(&a4, "SELECT 1").await.is_err());
}

#[tokio::test]
async fn test_failed_pooled_connect_frees_slot() {
    let driver = MemoryDriver::new();
    let env = env_with(&driver);
    let ctx = ContextId::from("a1");
    env.set_connection_pooling(&ctx, &policy(1.0, false))
        .await
        .unwrap();

    driver.fail_connect(Some(ConnectionErrorKind::AuthFailed));
    assert!(env.exec_direct(&ctx, "SELECT 1").await.is_err());
    let fp = env.pooling_policy().unwrap().fingerprint();
    assert!(env.registry().pool().stats(&fp).is_none());

    driver.fail_connect(None);
    env.exec_direct(&ctx, "SELECT 1").await.unwrap();
    assert_eq!(env.registry().pool().stats(&fp).unwrap().loaned, 1);
}

#[tokio::test]
async fn test_auto_disconnect_after_drain() {
    let driver = MemoryDriver::new();
    driver.respond(
        "SELECT n FROM t",
        MemoryResponse::rows(&[("n", "INT4")], vec![vec![Value::Number(1.0)]]),
    );
    let env = env_with(&driver);
    let ctx = ContextId::from("a1");
    env.set_connection_pooling(&ctx, &policy(2.0, true))
        .await
        .unwrap();
    let fp = env.pooling_policy().unwrap().fingerprint();

    env.exec_query(&ctx, "SELECT n FROM t").await.unwrap();
    assert_eq!(env.registry().bound_count().await, 1);

    assert_eq!(env.fetch_row(&ctx).await.unwrap(), vec![Value::Number(1.0)]);
    assert_eq!(env.registry().bound_count().await, 1);

    assert!(env.fetch_row(&ctx).await.unwrap().is_empty());
    assert_eq!(env.registry().bound_count().await, 0);
    let stats = env.registry().pool().stats(&fp).unwrap();
    assert_eq!((stats.idle, stats.loaned), (1, 0));
    assert_eq!(driver.closed(), 0);
}

#[tokio::test]
async fn test_policy_change_drains_old_group() {
    let driver = MemoryDriver::new();
    let env = env_with(&driver);
    let ctx = ContextId::from("a1");
    env.set_connection_pooling(&ctx, &policy(2.0, true))
        .await
        .unwrap();
    let old = env.pooling_policy().unwrap().fingerprint();

    env.exec_update(&ctx, "DELETE FROM t").await.unwrap();
    assert_eq!(env.registry().pool().stats(&old).unwrap().idle, 1);

    // Same fingerprint: nothing drained.
    env.set_connection_pooling(&ctx, &settings(&[("maxconnections", Value::Number(3.0))]))
        .await
        .unwrap();
    assert_eq!(env.registry().pool().stats(&old).unwrap().idle, 1);

    env.set_connection_pooling(&ctx, &settings(&[("schema", "archive".into())]))
        .await
        .unwrap();
    assert!(env.registry().pool().stats(&old).is_none());
    assert_eq!(driver.live(), 0);
    assert_eq!(env.pooling_policy().unwrap().schema, "archive");
}

#[tokio::test]
async fn test_switched_schema_is_not_pooled() {
    let driver = MemoryDriver::new().with_schemas(["world", "archive"]);
    let env = env_with(&driver);
    let ctx = ContextId::from("a1");
    env.set_connection_pooling(&ctx, &policy(2.0, false))
        .await
        .unwrap();
    let fp = env.pooling_policy().unwrap().fingerprint();

    env.use_database(&ctx, "archive").await.unwrap();
    env.disconnect(&ctx).await.unwrap();

    assert!(env.registry().pool().stats(&fp).is_none());
    assert_eq!(driver.live(), 0);
}

#[tokio::test]
async fn test_explicit_connect_over_policy_is_pooled() {
    let driver = MemoryDriver::new();
    let env = env_with(&driver);
    let ctx = ContextId::from("a1");
    env.set_connection_pooling(&ctx, &policy(2.0, false))
        .await
        .unwrap();

    env.connect(&ctx, &settings(&[("user", "sim".into())]))
        .await
        .unwrap();
    assert!(env.registry().pooled_fingerprint(&ctx).await.is_some());

    env.disconnect(&ctx).await.unwrap();
    assert_eq!(driver.closed(), 0);
}

#[tokio::test]
async fn test_policy_applies_to_previously_connected_context() {
    let driver = MemoryDriver::new();
    let env = env_with(&driver);
    let endpoint = settings(&[
        ("host", "db.local".into()),
        ("user", "sim".into()),
        ("schema", "world".into()),
        ("brand", "mysql".into()),
    ]);
    let a1 = ContextId::from("a1");
    let a2 = ContextId::from("a2");

    env.connect(&a1, &endpoint).await.unwrap();
    assert!(env.registry().pooled_fingerprint(&a1).await.is_none());
    env.disconnect(&a1).await.unwrap();

    env.set_connection_pooling(&ContextId::from("setup"), &policy(2.0, false))
        .await
        .unwrap();
    env.connect(&a1, &endpoint).await.unwrap();
    env.connect(&a2, &endpoint).await.unwrap();

    let fp = env.pooling_policy().unwrap().fingerprint();
    assert_eq!(env.registry().pooled_fingerprint(&a1).await, Some(fp.clone()));
    assert_eq!(env.registry().pooled_fingerprint(&a2).await, Some(fp.clone()));
    assert_eq!(env.registry().pool().stats(&fp).unwrap().loaned, 2);

    let a3 = ContextId::from("a3");
    let err = env.connect(&a3, &endpoint).await.unwrap_err();
    assert!(matches!(
        err,
        SqlError::Connection {
            kind: ConnectionErrorKind::PoolExhausted,
            ..
        }
    ));
}

#[tokio::test]
async fn test_lost_link_is_not_returned_to_pool() {
    let driver = MemoryDriver::new();
    driver.respond("SELECT pg_sleep(60)", MemoryResponse::Disconnect);
    let env = env_with(&driver);
    env.set_connection_pooling(&ContextId::from("setup"), &policy(1.0, false))
        .await
        .unwrap();
    let fp = env.pooling_policy().unwrap().fingerprint();

    let a1 = ContextId::from("a1");
    let err = env.exec_direct(&a1, "SELECT pg_sleep(60)").await.unwrap_err();
    assert!(matches!(
        err,
        SqlError::Connection {
            kind: ConnectionErrorKind::Unreachable,
            ..
        }
    ));
    assert_eq!(env.registry().bound_count().await, 0);
    assert!(env.registry().pool().stats(&fp).is_none());
    assert_eq!(driver.closed(), 1);

    // The freed slot is filled by a fresh connection.
    let a2 = ContextId::from("a2");
    env.exec_update(&a2, "UPDATE t SET x = 1").await.unwrap();
    assert_eq!(driver.opened(), 2);
    assert_eq!(env.registry().pool().stats(&fp).unwrap().loaned, 1);
}

#[tokio::test]
async fn test_context_rebinds_after_lost_link() {
    let driver = MemoryDriver::new();
    driver.respond("SELECT 1", MemoryResponse::Disconnect);
    let env = env_with(&driver);
    env.set_connection_pooling(&ContextId::from("setup"), &policy(1.0, false))
        .await
        .unwrap();

    let a1 = ContextId::from("a1");
    assert!(env.exec_direct(&a1, "SELECT 1").await.is_err());
    // A later call binds a fresh loan rather than the broken connection.
    assert_eq!(env.current_database(&a1).await.unwrap(), "world");
    assert_eq!(driver.opened(), 2);
    assert_eq!(driver.live(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_respects_bound() {
    let driver = MemoryDriver::new();
    let env = Arc::new(env_with(&driver));
    env.set_connection_pooling(&ContextId::from("setup"), &policy(3.0, false))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let env = Arc::clone(&env);
        handles.push(tokio::spawn(async move {
            env.exec_direct(&ContextId::from(format!("agent-{}", i)), "SELECT 1")
                .await
        }));
    }

    let mut succeeded = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(SqlError::Connection {
                kind: ConnectionErrorKind::PoolExhausted,
                ..
            }) => exhausted += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(succeeded, 3);
    assert_eq!(exhausted, 13);
    assert_eq!(driver.opened(), 3);
    assert_eq!(env.registry().bound_count().await, 3);
}

#[tokio::test]
async fn test_shutdown_drains_idle_and_loaned() {
    let driver = MemoryDriver::new();
    let env = env_with(&driver);
    let setup = ContextId::from("setup");
    env.set_connection_pooling(&setup, &policy(4.0, false))
        .await
        .unwrap();

    for name in ["a1", "a2", "a3"] {
        env.exec_direct(&ContextId::from(name), "SELECT 1")
            .await
            .unwrap();
    }
    env.disconnect(&ContextId::from("a1")).await.unwrap();
    assert_eq!(driver.live(), 3);

    env.shutdown().await;
    assert_eq!(driver.live(), 0);
    assert_eq!(env.registry().pool().group_count(), 0);
}
