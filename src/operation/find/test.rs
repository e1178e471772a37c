use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Document},
    bson_util,
    cmap::StreamDescription,
    error::ErrorKind,
    operation::{Find, Operation},
    options::{CursorType, FindOptions, Hint, ReadConcern},
    Namespace,
};

fn build_test(
    description: &StreamDescription,
    filter: Document,
    options: Option<FindOptions>,
    mut expected_body: Document,
) {
    let ns = Namespace::new("test_db", "test_coll");
    let mut find = Find::new(ns.clone(), filter, options);

    let mut cmd = find.build(description).unwrap();

    assert_eq!(cmd.name.as_str(), "find");
    assert_eq!(cmd.target_db.as_str(), ns.db.as_str());

    bson_util::sort_document(&mut expected_body);
    bson_util::sort_document(&mut cmd.body);

    assert_eq!(cmd.body, expected_body);
}

#[test]
fn build() {
    let filter = doc! {
        "x": 2,
        "y": { "$gt": 1 },
    };

    let options = FindOptions::builder()
        .hint(Hint::Keys(doc! { "x": 1, "y": 2 }))
        .projection(doc! { "x": 0 })
        .read_concern(ReadConcern::available())
        .build();

    let expected_body = doc! {
        "find": "test_coll",
        "filter": filter.clone(),
        "hint": {
            "x": 1,
            "y": 2,
        },
        "projection": {
            "x": 0
        },
        "readConcern": {
            "level": "available"
        },
    };

    build_test(
        &StreamDescription::new_testing(),
        filter,
        Some(options),
        expected_body,
    );
}

#[test]
fn build_cursor_type() {
    let tailable_options = FindOptions::builder()
        .cursor_type(CursorType::Tailable)
        .build();

    build_test(
        &StreamDescription::new_testing(),
        doc! {},
        Some(tailable_options),
        doc! { "find": "test_coll", "filter": {}, "tailable": true },
    );

    let tailable_await_options = FindOptions::builder()
        .cursor_type(CursorType::TailableAwait)
        .build();

    build_test(
        &StreamDescription::new_testing(),
        doc! {},
        Some(tailable_await_options),
        doc! { "find": "test_coll", "filter": {}, "tailable": true, "awaitData": true },
    );
}

#[test]
fn build_limit() {
    let positive_options = FindOptions::builder().limit(5).build();

    build_test(
        &StreamDescription::new_testing(),
        doc! {},
        Some(positive_options),
        doc! { "find": "test_coll", "filter": {}, "limit": 5_i64 },
    );

    // negative limits are requests for a single batch of |limit| documents
    let negative_options = FindOptions::builder().limit(-5).build();

    build_test(
        &StreamDescription::new_testing(),
        doc! {},
        Some(negative_options),
        doc! { "find": "test_coll", "filter": {}, "limit": 5_i64, "singleBatch": true },
    );

    let single_batch_options = FindOptions::builder()
        .limit(5)
        .single_batch(true)
        .build();

    build_test(
        &StreamDescription::new_testing(),
        doc! {},
        Some(single_batch_options),
        doc! { "find": "test_coll", "filter": {}, "limit": 5_i64, "singleBatch": true },
    );
}

#[test]
fn build_allow_partial_results() {
    let options = FindOptions::builder().allow_partial_results(true).build();

    // only shard routers can return partial first batches
    build_test(
        &StreamDescription::new_sharded(),
        doc! {},
        Some(options.clone()),
        doc! { "find": "test_coll", "filter": {}, "allowPartialResults": true },
    );

    build_test(
        &StreamDescription::new_testing(),
        doc! {},
        Some(options),
        doc! { "find": "test_coll", "filter": {} },
    );
}

#[test]
fn build_modifiers() {
    let modifiers = doc! {
        "$comment": "old",
        "$maxTimeMS": 500.0,
        "$orderby": { "x": 1 },
        "$showDiskLoc": true,
    };

    let options = FindOptions::builder()
        .comment("new".to_string())
        .modifiers(modifiers)
        .build();

    // options set explicitly shadow the modifier of the same semantic
    build_test(
        &StreamDescription::new_testing(),
        doc! {},
        Some(options),
        doc! {
            "find": "test_coll",
            "filter": {},
            "sort": { "x": 1 },
            "comment": "new",
            "maxTimeMS": 500_i64,
            "showRecordId": true,
        },
    );
}

#[test]
fn build_modifiers_idempotent() {
    // a command built from modifiers matches the command built from the
    // equivalent first-class options
    let from_modifiers = FindOptions::builder()
        .modifiers(doc! {
            "$hint": "index_name",
            "$maxScan": 100_i64,
            "$returnKey": false,
            "$snapshot": true,
            "$max": { "x": 10 },
            "$min": { "x": 0 },
        })
        .build();

    let from_options = FindOptions::builder()
        .hint(Hint::Name("index_name".to_string()))
        .max_scan(100)
        .return_key(false)
        .snapshot(true)
        .max(doc! { "x": 10 })
        .min(doc! { "x": 0 })
        .build();

    let mut find_modifiers = Find::new(Namespace::empty(), doc! {}, Some(from_modifiers));
    let mut find_options = Find::new(Namespace::empty(), doc! {}, Some(from_options));

    let description = StreamDescription::new_testing();
    let body_modifiers = find_modifiers.build(&description).unwrap().body;
    let body_options = find_options.build(&description).unwrap().body;
    assert_eq!(body_modifiers, body_options);
}

#[test]
fn build_unknown_modifier() {
    let options = FindOptions::builder()
        .modifiers(doc! { "$explain": true })
        .build();

    let mut find = Find::new(Namespace::empty(), doc! {}, Some(options));
    let error = find.build(&StreamDescription::new_testing()).unwrap_err();
    match *error.kind {
        ErrorKind::InvalidArgument { ref message } => {
            assert!(message.contains("$explain"), "message: {}", message)
        }
        ref other => panic!("expected InvalidArgument, got {:?}", other),
    }
}

#[test]
fn handle_success() {
    let ns = Namespace::new("test_db", "test_coll");
    let find = Find::new(ns.clone(), doc! {}, None);

    let first_batch = vec![doc! { "_id": 1 }, doc! { "_id": 2 }];

    let response = crate::operation::test::cursor_response(123, &ns, first_batch.clone());
    let spec = find
        .handle_response(&response, &StreamDescription::new_testing())
        .unwrap();

    assert_eq!(spec.id(), 123);
    assert_eq!(spec.ns(), &ns);
    assert_eq!(spec.batch_size(), None);
    let docs: Vec<Document> = spec
        .initial_buffer
        .iter()
        .map(|raw| raw.to_document().unwrap())
        .collect();
    assert_eq!(docs, first_batch);
}

fn verify_max_await_time(max_await_time: Option<Duration>, cursor_type: Option<CursorType>) -> Option<Duration> {
    let ns = Namespace::empty();
    let find = Find::new(
        ns.clone(),
        doc! {},
        Some(FindOptions {
            cursor_type,
            max_await_time,
            ..Default::default()
        }),
    );

    let response = crate::operation::test::cursor_response(123, &ns, Vec::new());
    let spec = find
        .handle_response(&response, &StreamDescription::new_testing())
        .unwrap();
    spec.max_time()
}

#[test]
fn handle_max_await_time() {
    assert!(verify_max_await_time(None, None).is_none());
    assert!(verify_max_await_time(Some(Duration::from_millis(5)), None).is_none());
    assert!(
        verify_max_await_time(Some(Duration::from_millis(5)), Some(CursorType::Tailable))
            .is_none()
    );
    assert_eq!(
        verify_max_await_time(
            Some(Duration::from_millis(5)),
            Some(CursorType::TailableAwait)
        ),
        Some(Duration::from_millis(5))
    );
}

#[test]
fn handle_invalid_response() {
    let find = Find::empty();

    let garbled = crate::operation::test::raw_response(doc! { "asdfasf": "ASdfasdf" });
    assert!(find
        .handle_response(&garbled, &StreamDescription::new_testing())
        .is_err());

    let missing_cursor_field = crate::operation::test::raw_response(doc! {
        "cursor": {
            "ns": "test.test",
            "firstBatch": [],
        }
    });
    assert!(find
        .handle_response(&missing_cursor_field, &StreamDescription::new_testing())
        .is_err());
}
