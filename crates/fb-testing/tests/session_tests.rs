//! Session lifecycle and pooling tests against the in-memory server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use fb_client::{Connection, ErrorKind, StateError, StatementState};
use fb_protocol::ProtocolError;
use fb_protocol::error::codes;
use fb_testing::{MockServer, WireEvent, connection_string};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_close_cleans_up_and_returns_connection() {
    init_tracing();
    let server = MockServer::new();
    let driver = server.driver();
    let cs = connection_string("");

    let mut conn = driver.open(&cs).await.unwrap();
    let id = conn.connection_id().unwrap();
    let tx = conn.begin_transaction().await.unwrap();
    let mut stmt = conn.create_statement("update t set a = 1").unwrap();
    stmt.set_transaction(Some(&tx)).unwrap();
    stmt.prepare().await.unwrap();

    conn.close().await.unwrap();
    assert!(!conn.is_open());
    assert!(tx.is_updated());
    assert_eq!(stmt.state(), StatementState::Closed);
    assert_eq!(
        server.count(|e| matches!(e, WireEvent::Rollback { retaining: false, .. })),
        1
    );
    assert_eq!(server.count(|e| matches!(e, WireEvent::Free(_))), 1);
    assert_eq!(server.count(|e| matches!(e, WireEvent::Detach)), 0);

    let status = driver.pool_status(&cs).unwrap().unwrap();
    assert_eq!(status.available, 1);
    assert_eq!(status.in_use, 0);

    let err = stmt.execute_non_query().await.unwrap_err();
    assert_eq!(err.state_error(), Some(StateError::NotConnected));

    let mut again = driver.open(&cs).await.unwrap();
    assert_eq!(again.connection_id(), Some(id));
    assert_eq!(server.attach_count(), 1);
    again.close().await.unwrap();
}

#[tokio::test]
async fn test_statements_do_not_outlive_their_session() {
    let server = MockServer::new();
    let driver = server.driver();
    let cs = connection_string("Max Pool Size=1");

    let mut first = driver.open(&cs).await.unwrap();
    let id = first.connection_id();
    let mut unprepared = first.create_statement("update t set a = 1").unwrap();
    let mut released = first.create_statement("update t set a = 2").unwrap();
    released.prepare().await.unwrap();
    released.release().await.unwrap();
    first.close().await.unwrap();

    let mut second = driver.open(&cs).await.unwrap();
    assert_eq!(second.connection_id(), id);
    let tx = second.begin_transaction().await.unwrap();
    server.clear_events();

    for stmt in [&mut unprepared, &mut released] {
        assert_eq!(stmt.state(), StatementState::Closed);
        let err = stmt.execute_non_query().await.unwrap_err();
        assert_eq!(err.state_error(), Some(StateError::NotConnected));
    }
    assert!(server.events().is_empty());
    assert!(!tx.is_updated());

    tx.rollback().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_session_rejects_work() {
    let server = MockServer::new();
    let driver = server.driver();
    let mut conn = Connection::new(&driver, &connection_string("")).unwrap();
    assert!(!conn.is_open());

    let err = conn.create_statement("select 1 from rdb$database").unwrap_err();
    assert_eq!(err.state_error(), Some(StateError::NotConnected));
    let err = conn.begin_transaction().await.unwrap_err();
    assert_eq!(err.state_error(), Some(StateError::NotConnected));
    assert_eq!(server.attach_count(), 0);

    conn.open().await.unwrap();
    conn.open().await.unwrap();
    assert_eq!(server.attach_count(), 1);

    conn.close().await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_unpooled_close_detaches() {
    let server = MockServer::new();
    let driver = server.driver();
    let cs = connection_string("Pooling=false");

    let mut conn = driver.open(&cs).await.unwrap();
    assert_eq!(server.open_links(), 1);
    conn.close().await.unwrap();

    assert_eq!(server.open_links(), 0);
    assert_eq!(server.count(|e| matches!(e, WireEvent::Detach)), 1);
    assert_eq!(driver.pool_count(), 0);
    assert!(driver.pool_status(&cs).unwrap().is_none());
}

#[tokio::test]
async fn test_dropped_session_is_cleaned_up_in_background() {
    let server = MockServer::new();
    let driver = server.driver();
    let cs = connection_string("");

    {
        let conn = driver.open(&cs).await.unwrap();
        let _tx = conn.begin_transaction().await.unwrap();
    }

    for _ in 0..50 {
        if driver.pool_status(&cs).unwrap().unwrap().available == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(driver.pool_status(&cs).unwrap().unwrap().available, 1);
    assert_eq!(
        server.count(|e| matches!(e, WireEvent::Rollback { retaining: false, .. })),
        1
    );
}

#[tokio::test]
async fn test_invalid_connection_string_is_rejected_up_front() {
    let server = MockServer::new();
    let driver = server.driver();

    let err = driver
        .open("DataSource=mock.local;Database=/data/test.fdb;User=SYSDBA")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = driver
        .open(&connection_string("Min Pool Size=5;Max Pool Size=2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(server.attach_count(), 0);
}

// ============================================================================
// Pooling
// ============================================================================

#[tokio::test]
async fn test_equivalent_strings_share_a_pool() {
    let server = MockServer::new();
    let driver = server.driver();

    let mut first = driver.open(&connection_string("")).await.unwrap();
    let id = first.connection_id();
    first.close().await.unwrap();

    let reordered = "password=masterkey; USER ID=SYSDBA; database=/data/test.fdb; server=mock.local";
    let mut second = driver.clone().open(reordered).await.unwrap();
    assert_eq!(second.connection_id(), id);
    assert_eq!(driver.pool_count(), 1);
    second.close().await.unwrap();

    let mut other = driver
        .open(&connection_string("Fetch Size=10"))
        .await
        .unwrap();
    assert_ne!(other.connection_id(), id);
    assert_eq!(driver.pool_count(), 2);
    other.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_checkout_times_out_at_capacity() {
    let server = MockServer::new();
    let driver = server.driver();
    let cs = connection_string("Max Pool Size=1;Connection Timeout=2");

    let mut held = driver.open(&cs).await.unwrap();
    let id = held.connection_id();
    let err = driver.open(&cs).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolTimeout);
    assert!(err.is_transient());

    held.close().await.unwrap();
    let mut next = driver.open(&cs).await.unwrap();
    assert_eq!(next.connection_id(), id);
    assert_eq!(server.attach_count(), 1);
    next.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_waiting_checkout_gets_returned_connection() {
    let server = MockServer::new();
    let driver = server.driver();
    let cs = connection_string("Max Pool Size=1;Connection Timeout=5");

    let mut held = driver.open(&cs).await.unwrap();
    let id = held.connection_id();
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        held.close().await.unwrap();
    });

    let mut waiting = driver.open(&cs).await.unwrap();
    assert_eq!(waiting.connection_id(), id);
    assert_eq!(server.attach_count(), 1);

    releaser.await.unwrap();
    waiting.close().await.unwrap();
}

#[tokio::test]
async fn test_dead_idle_connection_is_replaced() {
    let server = MockServer::new();
    let driver = server.driver();
    let cs = connection_string("");

    let mut conn = driver.open(&cs).await.unwrap();
    let id = conn.connection_id();
    conn.close().await.unwrap();

    server.kill_all();
    let mut fresh = driver.open(&cs).await.unwrap();
    assert_ne!(fresh.connection_id(), id);
    assert_eq!(server.attach_count(), 2);

    let metrics = driver.pool_metrics(&cs).unwrap().unwrap();
    assert_eq!(metrics.health_check_evictions, 1);
    fresh.close().await.unwrap();
}

#[tokio::test]
async fn test_clear_pool_closes_idle_connections() {
    let server = MockServer::new();
    let driver = server.driver();
    let cs = connection_string("");

    let mut conn = driver.open(&cs).await.unwrap();
    conn.close().await.unwrap();
    assert_eq!(server.open_links(), 1);

    assert!(driver.clear_pool(&cs).await.unwrap());
    assert_eq!(server.open_links(), 0);
    assert_eq!(driver.pool_count(), 0);
    assert!(!driver.clear_pool(&cs).await.unwrap());

    let mut reopened = driver.open(&cs).await.unwrap();
    assert_eq!(server.attach_count(), 2);
    reopened.close().await.unwrap();

    driver.clear_all_pools().await;
    assert_eq!(driver.pool_count(), 0);
}

// ============================================================================
// Attach failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_attach_times_out() {
    let server = MockServer::new();
    server.set_attach_delay(Some(Duration::from_secs(30)));
    let driver = server.driver();

    for extra in ["Pooling=false;Connection Timeout=1", "Connection Timeout=1"] {
        let err = driver.open(&connection_string(extra)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol, "{extra}");
        assert_eq!(err.protocol_error().unwrap().code, codes::NETWORK_ERROR);
    }
    assert_eq!(server.attach_count(), 0);
}

#[tokio::test]
async fn test_refused_attach_surfaces_server_error() {
    let server = MockServer::new();
    server.refuse_connections(Some(ProtocolError::new(
        codes::NETWORK_ERROR,
        "Unable to complete network request to host \"mock.local\"",
    )));
    let driver = server.driver();
    let cs = connection_string("");

    let err = driver.open(&cs).await.unwrap_err();
    assert_eq!(err.protocol_error().unwrap().code, codes::NETWORK_ERROR);
    assert_eq!(driver.pool_metrics(&cs).unwrap().unwrap().checkouts_failed, 1);

    server.refuse_connections(None);
    let mut conn = driver.open(&cs).await.unwrap();
    conn.close().await.unwrap();
}
