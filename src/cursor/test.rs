use std::sync::{atomic::Ordering, Arc};

use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Document},
    client::Client,
    cluster::TopologyType,
    cmap::StreamDescription,
    options::{ClientOptions, FindOptions, ServerAddress},
    test::util::{scripted_connection, MockPool, MockTopology, Reply},
    Namespace,
};

fn cursor_reply(id: i64, batch_field: &str, docs: Vec<Document>) -> Reply {
    Reply::ok(doc! {
        "cursor": {
            "id": id,
            "ns": "test_db.test_coll",
            batch_field: docs,
        },
    })
}

fn single_server_client(replies: Vec<Reply>) -> (Client, Arc<MockPool>, crate::test::util::SentLog) {
    let address = ServerAddress::default();
    let pool = MockPool::new(address.clone());
    let description = StreamDescription {
        server_address: address,
        ..StreamDescription::new_testing()
    };
    let (conn, log) = scripted_connection(1, description, replies);
    pool.add_connection(conn);
    let topology = MockTopology::new(vec![pool.clone()], TopologyType::ReplicaSet);
    let client = Client::with_selector(ClientOptions::default(), topology);
    (client, pool, log)
}

#[tokio::test]
async fn iterates_batches_on_the_same_connection() {
    let (client, pool, log) = single_server_client(vec![
        cursor_reply(7, "firstBatch", vec![doc! { "x": 1 }, doc! { "x": 2 }]),
        cursor_reply(7, "nextBatch", vec![doc! { "x": 3 }]),
        cursor_reply(0, "nextBatch", vec![]),
    ]);

    let mut cursor = client
        .find::<Document>(Namespace::new("test_db", "test_coll"), doc! {}, None)
        .await
        .unwrap();

    let mut all = Vec::new();
    while let Some(doc) = cursor.next().await {
        all.push(doc.unwrap());
    }
    assert_eq!(
        all,
        vec![doc! { "x": 1 }, doc! { "x": 2 }, doc! { "x": 3 }]
    );

    // every continuation command travelled over the connection that served
    // the query
    let commands = log.lock().unwrap().clone();
    assert_eq!(commands.len(), 3);
    assert_eq!(commands[0].get_str("find"), Ok("test_coll"));
    assert_eq!(commands[1].get_i64("getMore"), Ok(7));
    assert_eq!(commands[2].get_i64("getMore"), Ok(7));

    // exhaustion released the pinned connection back to the pool
    drop(cursor);
    assert_eq!(pool.checked_in.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_first_batch_does_not_pin() {
    let (client, pool, _log) = single_server_client(vec![cursor_reply(
        0,
        "firstBatch",
        vec![doc! { "x": 1 }],
    )]);

    let mut cursor = client
        .find::<Document>(Namespace::new("test_db", "test_coll"), doc! {}, None)
        .await
        .unwrap();
    assert_eq!(cursor.id(), 0);

    let mut count = 0;
    while let Some(doc) = cursor.next().await {
        doc.unwrap();
        count += 1;
    }
    assert_eq!(count, 1);
    // the connection went straight back to the pool after the query
    assert_eq!(pool.checked_in.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn limit_bounds_iteration() {
    let (client, _pool, log) = single_server_client(vec![cursor_reply(
        9,
        "firstBatch",
        vec![doc! { "x": 1 }, doc! { "x": 2 }, doc! { "x": 3 }],
    )]);

    let options = FindOptions::builder().limit(-2).build();
    let mut cursor = client
        .find::<Document>(Namespace::new("test_db", "test_coll"), doc! {}, options)
        .await
        .unwrap();

    let mut count = 0;
    while let Some(doc) = cursor.next().await {
        doc.unwrap();
        count += 1;
    }
    // a negative limit caps the results at |limit| from the single batch
    assert_eq!(count, 2);
    // and no continuation command was issued
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn network_error_invalidates_pinned_connection() {
    let (client, pool, _log) = single_server_client(vec![
        cursor_reply(7, "firstBatch", vec![doc! { "x": 1 }]),
        Reply::NetworkError(std::io::ErrorKind::ConnectionReset),
    ]);

    let mut cursor = client
        .find::<Document>(Namespace::new("test_db", "test_coll"), doc! {}, None)
        .await
        .unwrap();

    assert!(cursor.next().await.unwrap().is_ok());
    let error = cursor.next().await.unwrap().unwrap_err();
    assert!(error.is_network_error());
    assert!(cursor.next().await.is_none());

    // the dead connection was discarded rather than returned to the pool
    drop(cursor);
    assert_eq!(pool.checked_in.load(Ordering::SeqCst), 0);
}
