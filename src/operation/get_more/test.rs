use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bson::doc,
    cmap::StreamDescription,
    cursor::CursorInformation,
    operation::{GetMore, Operation},
    options::ServerAddress,
    Namespace,
};

fn info(batch_size: Option<u32>, max_time: Option<Duration>) -> CursorInformation {
    CursorInformation {
        ns: Namespace::new("test_db", "test_coll"),
        address: ServerAddress::default(),
        id: 123,
        batch_size,
        max_time,
        comment: None,
        limit: None,
    }
}

#[test]
fn build() {
    let mut get_more = GetMore::new(info(Some(10), Some(Duration::from_millis(20))), None);
    let cmd = get_more.build(&StreamDescription::new_testing()).unwrap();

    assert_eq!(cmd.name.as_str(), "getMore");
    assert_eq!(cmd.target_db.as_str(), "test_db");
    assert_eq!(
        cmd.body,
        doc! {
            "getMore": 123_i64,
            "collection": "test_coll",
            "batchSize": 10,
            "maxTimeMS": 20_i64,
        }
    );
}

#[test]
fn build_omits_zero_batch_size() {
    let mut get_more = GetMore::new(info(Some(0), None), None);
    let cmd = get_more.build(&StreamDescription::new_testing()).unwrap();
    assert!(!cmd.body.contains_key("batchSize"));
}

#[test]
fn handle_response() {
    let get_more = GetMore::new(info(None, None), None);

    let response = crate::operation::test::ok_response(doc! {
        "cursor": {
            "id": 123_i64,
            "ns": "test_db.test_coll",
            "nextBatch": [ { "_id": 1 }, { "_id": 2 } ],
        },
    });
    let result = get_more
        .handle_response(&response, &StreamDescription::new_testing())
        .unwrap();
    assert_eq!(result.batch.len(), 2);
    assert!(!result.exhausted);

    let response = crate::operation::test::ok_response(doc! {
        "cursor": {
            "id": 0_i64,
            "ns": "test_db.test_coll",
            "nextBatch": [],
        },
    });
    let result = get_more
        .handle_response(&response, &StreamDescription::new_testing())
        .unwrap();
    assert!(result.exhausted);
}
