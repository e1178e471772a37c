use std::sync::{atomic::Ordering, Arc};

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::{
    bson::{doc, Document},
    bulk::DeleteRequest,
    client::Client,
    cluster::TopologyType,
    cmap::StreamDescription,
    concern::WriteConcern,
    error::ErrorKind,
    operation::Delete,
    options::{ClientOptions, DeleteManyOptions, ServerAddress},
    session::ClientSession,
    test::util::{scripted_connection, MockPool, MockTopology, Reply, SentLog},
    Namespace,
};

fn address(name: &str) -> ServerAddress {
    ServerAddress::Tcp {
        host: name.to_string(),
        port: Some(27017),
    }
}

fn description_for(name: &str) -> StreamDescription {
    StreamDescription {
        server_address: address(name),
        ..StreamDescription::new_testing()
    }
}

struct Fleet {
    client: Client,
    pools: Vec<Arc<MockPool>>,
    logs: Vec<SentLog>,
    topology: Arc<MockTopology>,
}

/// Builds a client over one mock server per reply-script, each preloaded with
/// a single scripted connection.
fn fleet(scripts: Vec<Vec<Reply>>) -> Fleet {
    fleet_with(scripts, |name| description_for(name))
}

fn fleet_with(
    scripts: Vec<Vec<Reply>>,
    description: impl Fn(&str) -> StreamDescription,
) -> Fleet {
    let mut pools = Vec::new();
    let mut logs = Vec::new();
    for (index, script) in scripts.into_iter().enumerate() {
        let name = format!("host-{}", index);
        let pool = MockPool::new(address(&name));
        let (conn, log) = scripted_connection(index as u32 + 1, description(&name), script);
        pool.add_connection(conn);
        pools.push(pool);
        logs.push(log);
    }
    let topology = MockTopology::new(pools.clone(), TopologyType::ReplicaSet);
    let client = Client::with_selector(ClientOptions::default(), topology.clone());
    Fleet {
        client,
        pools,
        logs,
        topology,
    }
}

fn delete_op(n: usize) -> Delete {
    let requests = (0..n).map(|_| DeleteRequest::one(doc! { "x": 1 })).collect();
    Delete::new(Namespace::new("test_db", "test_coll"), requests, None)
}

fn sent(log: &SentLog) -> Vec<Document> {
    log.lock().unwrap().clone()
}

fn network_error(kind: std::io::ErrorKind) -> Reply {
    Reply::NetworkError(kind)
}

fn command_error(code: i32, message: &str) -> Reply {
    Reply::Ok(doc! {
        "ok": 0,
        "code": code,
        "codeName": "",
        "errmsg": message,
    })
}

#[tokio::test]
async fn successful_write_executes_once() {
    let fleet = fleet(vec![vec![Reply::ok(doc! { "n": 3 })]]);
    let mut session = ClientSession::new(None, false);

    let result = fleet
        .client
        .execute_operation(&mut delete_op(3), &mut session)
        .await
        .unwrap();
    assert_eq!(result.deleted_count, 3);

    let commands = sent(&fleet.logs[0]);
    assert_eq!(commands.len(), 1);
    let command = &commands[0];
    assert_eq!(command.get_str("delete"), Ok("test_coll"));
    assert_eq!(command.get_array("deletes").unwrap().len(), 3);
    // the attempt carried the session and its freshly advanced number
    assert!(command.contains_key("lsid"));
    assert_eq!(command.get_i64("txnNumber"), Ok(1));
    assert_eq!(session.txn_number(), 1);
}

#[tokio::test]
async fn retried_write_reuses_transaction_number() {
    let fleet = fleet(vec![
        vec![network_error(std::io::ErrorKind::ConnectionReset)],
        vec![Reply::ok(doc! { "n": 1 })],
    ]);
    let mut session = ClientSession::new(None, false);

    let result = fleet
        .client
        .execute_operation(&mut delete_op(1), &mut session)
        .await
        .unwrap();
    assert_eq!(result.deleted_count, 1);

    let first = sent(&fleet.logs[0]);
    let second = sent(&fleet.logs[1]);
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    // both attempts saw the identical transaction number
    assert_eq!(first[0].get_i64("txnNumber"), Ok(1));
    assert_eq!(second[0].get_i64("txnNumber"), Ok(1));
    // the number was advanced once for the operation
    assert_eq!(session.txn_number(), 1);
    // the failed channel was replaced: one selection per attempt
    assert_eq!(fleet.topology.selections.load(Ordering::SeqCst), 2);
    // both connections were released
    assert_eq!(fleet.pools[0].checked_in.load(Ordering::SeqCst), 1);
    assert_eq!(fleet.pools[1].checked_in.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_surfaces_original_error_for_server_errors() {
    let fleet = fleet(vec![
        vec![network_error(std::io::ErrorKind::ConnectionReset)],
        vec![command_error(11000, "duplicate key")],
    ]);
    let mut session = ClientSession::new(None, false);

    let error = fleet
        .client
        .execute_operation(&mut delete_op(1), &mut session)
        .await
        .unwrap_err();
    // the retry's duplicate-key failure implies the first attempt may have
    // applied; its connection fault is the root cause the caller sees
    assert!(matches!(*error.kind, ErrorKind::Io(_)));
    assert_eq!(sent(&fleet.logs[1]).len(), 1);
}

#[tokio::test]
async fn retry_surfaces_fresh_connection_errors() {
    let fleet = fleet(vec![
        vec![network_error(std::io::ErrorKind::ConnectionReset)],
        vec![network_error(std::io::ErrorKind::TimedOut)],
    ]);
    let mut session = ClientSession::new(None, false);

    let error = fleet
        .client
        .execute_operation(&mut delete_op(1), &mut session)
        .await
        .unwrap_err();
    // the second attempt's fault is the one reported
    match *error.kind {
        ErrorKind::Io(ref io_error) => {
            assert_eq!(io_error.kind(), std::io::ErrorKind::TimedOut)
        }
        ref other => panic!("expected Io error, got {:?}", other),
    }
}

#[tokio::test]
async fn unacknowledged_writes_are_not_retried() {
    let fleet = fleet(vec![
        vec![network_error(std::io::ErrorKind::ConnectionReset)],
        vec![Reply::ok(doc! { "n": 1 })],
    ]);

    let options = DeleteManyOptions::builder()
        .write_concern(WriteConcern::from(0))
        .build();
    let mut op = Delete::new(
        Namespace::new("test_db", "test_coll"),
        vec![DeleteRequest::one(doc! {})],
        Some(options),
    );

    let error = fleet.client.execute_operation(&mut op, None).await.unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::Io(_)));

    // exactly one attempt ran, without a transaction number or session
    let commands = sent(&fleet.logs[0]);
    assert_eq!(commands.len(), 1);
    assert!(!commands[0].contains_key("txnNumber"));
    assert!(!commands[0].contains_key("lsid"));
    assert!(sent(&fleet.logs[1]).is_empty());
}

#[tokio::test]
async fn non_retryable_errors_propagate() {
    let fleet = fleet(vec![
        vec![command_error(11000, "duplicate key")],
        vec![Reply::ok(doc! { "n": 1 })],
    ]);
    let mut session = ClientSession::new(None, false);

    let error = fleet
        .client
        .execute_operation(&mut delete_op(1), &mut session)
        .await
        .unwrap_err();
    match *error.kind {
        ErrorKind::Command(ref command_error) => assert_eq!(command_error.code, 11000),
        ref other => panic!("expected Command error, got {:?}", other),
    }
    // no second attempt was dispatched
    assert!(sent(&fleet.logs[1]).is_empty());
}

#[tokio::test]
async fn replacement_channel_must_support_retryable_writes() {
    let fleet = fleet_with(
        vec![
            vec![network_error(std::io::ErrorKind::ConnectionReset)],
            vec![Reply::ok(doc! { "n": 1 })],
        ],
        |name| {
            if name == "host-1" {
                StreamDescription {
                    server_address: address(name),
                    ..StreamDescription::new_standalone()
                }
            } else {
                description_for(name)
            }
        },
    );
    let mut session = ClientSession::new(None, false);

    let error = fleet
        .client
        .execute_operation(&mut delete_op(1), &mut session)
        .await
        .unwrap_err();
    // the original connection fault is surfaced and attempt two never runs
    assert!(matches!(*error.kind, ErrorKind::Io(_)));
    assert!(sent(&fleet.logs[1]).is_empty());
}

#[tokio::test]
async fn sessionless_writes_execute_once_without_transaction_number() {
    // a server that advertises no logical session timeout cannot deduplicate
    let fleet = fleet_with(
        vec![vec![Reply::ok(doc! { "n": 1 })]],
        |name| StreamDescription {
            server_address: address(name),
            logical_session_timeout: None,
            ..StreamDescription::new_testing()
        },
    );

    let result = fleet
        .client
        .execute_operation(&mut delete_op(1), None)
        .await
        .unwrap();
    assert_eq!(result.deleted_count, 1);

    let commands = sent(&fleet.logs[0]);
    assert_eq!(commands.len(), 1);
    assert!(!commands[0].contains_key("lsid"));
    assert!(!commands[0].contains_key("txnNumber"));
}

#[tokio::test]
async fn writes_in_transactions_are_not_retried() {
    let fleet = fleet(vec![
        vec![network_error(std::io::ErrorKind::ConnectionReset)],
        vec![Reply::ok(doc! { "n": 1 })],
    ]);
    let mut session = ClientSession::new(None, false);
    session.set_in_transaction(true);

    let error = fleet
        .client
        .execute_operation(&mut delete_op(1), &mut session)
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::Io(_)));
    assert!(sent(&fleet.logs[1]).is_empty());
    // no transaction number was consumed
    assert_eq!(session.txn_number(), 0);
}

#[tokio::test]
async fn cancellation_supersedes_execution() {
    let fleet = fleet(vec![vec![Reply::ok(doc! { "n": 1 })]]);
    let mut session = ClientSession::new(None, false);

    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let error = fleet
        .client
        .execute_operation_with_cancellation(&mut delete_op(1), &mut session, cancellation)
        .await
        .unwrap_err();
    assert!(error.is_cancelled());
    assert!(sent(&fleet.logs[0]).is_empty());
}

#[tokio::test]
async fn paused_pool_escalates_to_full_retry() {
    let fleet = fleet(vec![
        vec![],
        vec![Reply::ok(doc! { "n": 1 })],
    ]);
    fleet.pools[0].pause();
    let mut session = ClientSession::new(None, false);

    let result = fleet
        .client
        .execute_operation(&mut delete_op(1), &mut session)
        .await
        .unwrap();
    assert_eq!(result.deleted_count, 1);
    // acquisition failed on the paused pool and was retried on a fresh
    // selection
    assert_eq!(fleet.topology.selections.load(Ordering::SeqCst), 2);
    assert_eq!(sent(&fleet.logs[1]).len(), 1);
}

#[tokio::test]
async fn connections_are_released_after_failures() {
    let fleet = fleet(vec![
        vec![command_error(11000, "duplicate key")],
    ]);
    let mut session = ClientSession::new(None, false);

    fleet
        .client
        .execute_operation(&mut delete_op(1), &mut session)
        .await
        .unwrap_err();

    assert_eq!(fleet.pools[0].checked_out.load(Ordering::SeqCst), 1);
    assert_eq!(fleet.pools[0].checked_in.load(Ordering::SeqCst), 1);
}
