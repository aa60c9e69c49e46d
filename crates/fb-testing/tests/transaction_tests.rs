//! Transaction boundary tests against the in-memory server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use fb_client::{ErrorKind, IsolationLevel, StateError, TransactionOptions};
use fb_protocol::{SqlType, TransactionFlags, WireValue};
use fb_testing::{MockServer, StatementScript, WireEvent, column, connection_string};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn commits(server: &MockServer) -> usize {
    server.count(|e| matches!(e, WireEvent::Commit { retaining: false, .. }))
}

fn rollbacks(server: &MockServer) -> usize {
    server.count(|e| matches!(e, WireEvent::Rollback { retaining: false, .. }))
}

fn numbers_script() -> StatementScript {
    StatementScript::select(
        vec![column("N", SqlType::Long)],
        vec![vec![WireValue::Long(1)], vec![WireValue::Long(2)]],
    )
}

// ============================================================================
// Implicit transactions
// ============================================================================

#[tokio::test]
async fn test_reader_close_commits_implicit_transaction() {
    init_tracing();
    let server = MockServer::new();
    server.script("select n", numbers_script());
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let mut stmt = conn.create_statement("select n from numbers").unwrap();
    let reader = stmt.execute_reader().await.unwrap();
    assert_eq!(reader.field_count(), 1);
    assert!(conn.current_transaction().is_some());

    let rows = reader.collect_rows().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get::<i32>(0).unwrap(), 2);

    assert_eq!(commits(&server), 1);
    assert_eq!(rollbacks(&server), 0);
    assert!(conn.current_transaction().is_none());
    assert!(stmt.transaction().is_none());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_write_without_transaction_is_rolled_back() {
    let server = MockServer::new();
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let mut stmt = conn
        .create_statement("insert into orders (qty) values (?)")
        .unwrap();
    stmt.parameters_mut().add_with_value("qty", 3);
    let affected = stmt.execute_non_query().await.unwrap();

    assert_eq!(affected, 1);
    assert_eq!(commits(&server), 0);
    assert_eq!(rollbacks(&server), 1);
    assert!(conn.current_transaction().is_none());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_execution_failure_rolls_back_implicit_transaction() {
    let server = MockServer::new();
    server.script(
        "select broken",
        StatementScript::select(vec![column("X", SqlType::Long)], vec![])
            .fail_execute(fb_testing::dsql_error("arithmetic exception")),
    );
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let mut stmt = conn.create_statement("select broken from t").unwrap();
    let err = stmt.execute_scalar().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.protocol_error().unwrap().messages[1], "arithmetic exception");
    assert_eq!(commits(&server), 0);
    assert_eq!(rollbacks(&server), 1);
    assert!(conn.current_transaction().is_none());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_implicit_commit_falls_back_to_rollback() {
    let server = MockServer::new();
    server.script("select n", numbers_script());
    server.set_fail_commit(true);
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let mut stmt = conn.create_statement("select n from numbers").unwrap();
    let value = stmt.execute_scalar().await.unwrap();

    assert_eq!(value, fb_client::SqlValue::Int(1));
    assert_eq!(commits(&server), 1);
    assert_eq!(rollbacks(&server), 1);
    assert!(conn.current_transaction().is_none());

    server.set_fail_commit(false);
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_prepare_failure_ends_implicit_transaction() {
    let server = MockServer::new();
    server.script(
        "selec",
        StatementScript::select(vec![], vec![]).fail_prepare(fb_testing::dsql_error(
            "Token unknown - line 1, column 1",
        )),
    );
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let mut stmt = conn.create_statement("selec 1 from rdb$database").unwrap();
    assert!(stmt.prepare().await.is_err());
    assert!(!stmt.is_prepared());
    assert!(conn.current_transaction().is_none());
    assert_eq!(rollbacks(&server), 1);
    assert_eq!(server.count(|e| matches!(e, WireEvent::Allocate(_))), 1);
    assert_eq!(server.count(|e| matches!(e, WireEvent::Free(_))), 1);

    conn.close().await.unwrap();
    assert_eq!(server.count(|e| matches!(e, WireEvent::Free(_))), 1);
}

// ============================================================================
// Explicit transactions
// ============================================================================

#[tokio::test]
async fn test_explicit_transaction_spans_statements() {
    let server = MockServer::new();
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let tx = conn.begin_transaction().await.unwrap();
    for qty in [1, 2] {
        let mut stmt = conn
            .create_statement("insert into orders (qty) values (@qty)")
            .unwrap();
        stmt.set_transaction(Some(&tx)).unwrap();
        stmt.parameters_mut().add_with_value("@qty", qty);
        stmt.execute_non_query().await.unwrap();
        stmt.release().await.unwrap();
    }
    assert_eq!(server.count(|e| matches!(e, WireEvent::Begin { .. })), 1);
    assert_eq!(rollbacks(&server), 0);

    tx.commit().await.unwrap();
    assert!(tx.is_updated());
    assert_eq!(commits(&server), 1);
    assert!(conn.current_transaction().is_none());

    let err = tx.commit().await.unwrap_err();
    assert_eq!(err.state_error(), Some(StateError::TransactionFinalized));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_only_one_transaction_per_connection() {
    let server = MockServer::new();
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let tx = conn.begin_transaction().await.unwrap();
    let err = conn.begin_transaction().await.unwrap_err();
    assert_eq!(err.state_error(), Some(StateError::TransactionActive));

    // An unbound statement cannot start its own transaction either.
    let mut stmt = conn.create_statement("select n from numbers").unwrap();
    let err = stmt.execute_scalar().await.unwrap_err();
    assert_eq!(err.state_error(), Some(StateError::TransactionActive));

    tx.rollback().await.unwrap();
    let again = conn.begin_transaction().await.unwrap();
    assert_ne!(again.id(), tx.id());
    again.rollback().await.unwrap();

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_statement_forgets_finished_transaction() {
    let server = MockServer::new();
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let tx = conn.begin_transaction().await.unwrap();
    let mut stmt = conn.create_statement("update t set a = 1").unwrap();
    stmt.set_transaction(Some(&tx)).unwrap();
    assert_eq!(stmt.transaction().map(|t| t.id()), Some(tx.id()));

    tx.commit().await.unwrap();
    assert!(stmt.transaction().is_none());

    let err = stmt.set_transaction(Some(&tx)).unwrap_err();
    assert_eq!(err.state_error(), Some(StateError::TransactionFinalized));

    // With the binding gone, the next execution runs implicitly.
    stmt.execute_non_query().await.unwrap();
    assert_eq!(rollbacks(&server), 1);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_transaction_from_another_connection_is_rejected() {
    let server = MockServer::new();
    let driver = server.driver();
    let mut first = driver.open(&connection_string("")).await.unwrap();
    let mut second = driver.open(&connection_string("")).await.unwrap();
    assert_ne!(first.connection_id(), second.connection_id());

    let tx = first.begin_transaction().await.unwrap();
    let mut stmt = second.create_statement("select 1 from rdb$database").unwrap();
    let err = stmt.set_transaction(Some(&tx)).unwrap_err();
    assert_eq!(err.state_error(), Some(StateError::TransactionMismatch));

    tx.rollback().await.unwrap();
    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_transaction_options_reach_the_wire() {
    let server = MockServer::new();
    let driver = server.driver();
    let mut conn = driver
        .open(&connection_string("Isolation Level=Serializable"))
        .await
        .unwrap();

    let tx = conn.begin_transaction().await.unwrap();
    assert_eq!(tx.isolation_level(), IsolationLevel::Serializable);
    tx.rollback().await.unwrap();

    let tx = conn
        .begin_transaction_with(
            TransactionOptions::new(IsolationLevel::RepeatableRead)
                .read_only(true)
                .no_wait(true),
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let flags: Vec<TransactionFlags> = server
        .events()
        .into_iter()
        .filter_map(|e| match e {
            WireEvent::Begin { flags, .. } => Some(flags),
            _ => None,
        })
        .collect();
    assert_eq!(flags.len(), 2);
    assert!(flags[0].contains(TransactionFlags::CONSISTENCY | TransactionFlags::WRITE));
    assert!(flags[1].contains(
        TransactionFlags::CONCURRENCY | TransactionFlags::READ | TransactionFlags::NO_WAIT
    ));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_retaining_keeps_transaction_open() {
    let server = MockServer::new();
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let tx = conn.begin_transaction().await.unwrap();
    tx.commit_retaining().await.unwrap();
    tx.rollback_retaining().await.unwrap();
    assert!(!tx.is_updated());
    assert_eq!(conn.current_transaction().map(|t| t.id()), Some(tx.id()));
    assert_eq!(
        server.count(|e| matches!(
            e,
            WireEvent::Commit { retaining: true, .. } | WireEvent::Rollback { retaining: true, .. }
        )),
        2
    );

    tx.commit().await.unwrap();
    conn.close().await.unwrap();
}

// ============================================================================
// Savepoints
// ============================================================================

#[tokio::test]
async fn test_savepoint_commands() {
    let server = MockServer::new();
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let tx = conn.begin_transaction().await.unwrap();
    let sp = tx.save("before_items").await.unwrap();
    assert_eq!(sp.name(), "before_items");
    tx.rollback_to(&sp).await.unwrap();
    tx.release("before_items").await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(
        server.prepared_sql(),
        vec![
            "SAVEPOINT before_items",
            "ROLLBACK WORK TO SAVEPOINT before_items",
            "RELEASE SAVEPOINT before_items",
        ]
    );
    // Each command runs on a temporary statement that is freed again.
    assert_eq!(server.count(|e| matches!(e, WireEvent::Allocate(_))), 3);
    assert_eq!(server.count(|e| matches!(e, WireEvent::Free(_))), 3);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_savepoint_name_never_reaches_server() {
    let server = MockServer::new();
    let driver = server.driver();
    let mut conn = driver.open(&connection_string("")).await.unwrap();

    let tx = conn.begin_transaction().await.unwrap();
    let err = tx.save("sp; drop table t").await.unwrap_err();
    assert!(matches!(err, fb_client::Error::InvalidIdentifier(_)));
    assert!(tx.rollback_to("1st").await.is_err());
    assert!(server.prepared_sql().is_empty());

    tx.rollback().await.unwrap();
    let err = tx.save("late").await.unwrap_err();
    assert_eq!(err.state_error(), Some(StateError::TransactionFinalized));

    conn.close().await.unwrap();
}
