use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Document},
    bulk::DeleteRequest,
    client::Client,
    cluster::TopologyType,
    cmap::StreamDescription,
    error::ErrorKind,
    options::{ClientOptions, InsertManyOptions, ServerAddress},
    test::util::{scripted_connection, MockPool, MockTopology, Reply, SentLog},
    Namespace,
};

/// A client over a single server whose lone connection advertises a write
/// batch limit of two statements and replays the given replies.
fn small_batch_client(replies: Vec<Reply>) -> (Client, SentLog) {
    let address = ServerAddress::default();
    let pool = MockPool::new(address.clone());
    let description = StreamDescription {
        server_address: address,
        max_write_batch_size: 2,
        ..StreamDescription::new_testing()
    };
    let (conn, log) = scripted_connection(1, description, replies);
    pool.add_connection(conn);
    let topology = MockTopology::new(vec![pool], TopologyType::ReplicaSet);
    (Client::with_selector(ClientOptions::default(), topology), log)
}

fn documents(n: usize) -> Vec<Document> {
    (0..n).map(|i| doc! { "_id": i as i32 }).collect()
}

#[tokio::test]
async fn inserts_split_into_batches() {
    let (client, log) = small_batch_client(vec![
        Reply::ok(doc! { "n": 2 }),
        Reply::ok(doc! { "n": 2 }),
        Reply::ok(doc! { "n": 1 }),
    ]);

    let result = client
        .insert_many(Namespace::new("db", "coll"), documents(5), None)
        .await
        .unwrap();
    assert_eq!(result.inserted_ids.len(), 5);

    let commands = log.lock().unwrap().clone();
    assert_eq!(commands.len(), 3);
    let batch_sizes: Vec<usize> = commands
        .iter()
        .map(|command| command.get_array("documents").unwrap().len())
        .collect();
    assert_eq!(batch_sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn ordered_failure_halts_remaining_batches() {
    let (client, log) = small_batch_client(vec![
        Reply::ok(doc! { "n": 2 }),
        Reply::ok(doc! {
            "n": 1,
            "writeErrors": [ { "index": 1, "code": 11000, "errmsg": "duplicate key" } ],
        }),
        // never consumed
        Reply::ok(doc! { "n": 2 }),
    ]);

    let error = client
        .insert_many(Namespace::new("db", "coll"), documents(6), None)
        .await
        .unwrap_err();
    match *error.kind {
        ErrorKind::BulkWrite(ref failure) => {
            // the per-statement error is re-indexed into the caller's sequence
            let write_errors = failure.write_errors.as_ref().unwrap();
            assert_eq!(write_errors.len(), 1);
            assert_eq!(write_errors[0].index, 3);
            // the successes applied before the failure are observable
            assert!(failure.inserted_ids.contains_key(&0));
            assert!(failure.inserted_ids.contains_key(&1));
            assert!(failure.inserted_ids.contains_key(&2));
            assert!(!failure.inserted_ids.contains_key(&3));
        }
        ref other => panic!("expected BulkWrite error, got {:?}", other),
    }

    // the remainder of the sequence was never sent
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn unordered_failures_aggregate_across_batches() {
    let (client, log) = small_batch_client(vec![
        Reply::ok(doc! {
            "n": 1,
            "writeErrors": [ { "index": 0, "code": 11000, "errmsg": "duplicate key" } ],
        }),
        Reply::ok(doc! {
            "n": 1,
            "writeErrors": [ { "index": 1, "code": 11000, "errmsg": "duplicate key" } ],
        }),
    ]);

    let options = InsertManyOptions::builder().ordered(false).build();
    let error = client
        .insert_many(Namespace::new("db", "coll"), documents(4), options)
        .await
        .unwrap_err();
    match *error.kind {
        ErrorKind::BulkWrite(ref failure) => {
            let mut indexes: Vec<usize> = failure
                .write_errors
                .as_ref()
                .unwrap()
                .iter()
                .map(|write_error| write_error.index)
                .collect();
            indexes.sort_unstable();
            // all batches ran and their failures were folded together
            assert_eq!(indexes, vec![0, 3]);
        }
        ref other => panic!("expected BulkWrite error, got {:?}", other),
    }
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn deletes_split_into_batches() {
    let (client, log) = small_batch_client(vec![
        Reply::ok(doc! { "n": 2 }),
        Reply::ok(doc! { "n": 1 }),
    ]);

    let requests = (0..3)
        .map(|i| DeleteRequest::one(doc! { "x": i as i32 }))
        .collect::<Vec<_>>();
    let result = client
        .delete_many(Namespace::new("db", "coll"), requests, None)
        .await
        .unwrap();
    assert_eq!(result.deleted_count, 3);
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn empty_request_sequences_are_rejected() {
    let (client, _log) = small_batch_client(vec![]);
    let error = client
        .insert_many(Namespace::new("db", "coll"), Vec::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));

    let error = client
        .delete_many(Namespace::new("db", "coll"), Vec::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));
}
