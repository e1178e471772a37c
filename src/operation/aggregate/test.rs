use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Bson, Document},
    cmap::StreamDescription,
    error::ErrorKind,
    operation::{Aggregate, Operation},
    options::AggregateOptions,
    Namespace,
};

fn build_pipeline(target_db: &str, pipeline: Vec<Document>) -> Vec<Bson> {
    let ns = Namespace::new(target_db, "test_coll");
    let mut aggregate = Aggregate::new(ns, pipeline, None);
    let cmd = aggregate.build(&StreamDescription::new_testing()).unwrap();
    cmd.body.get_array("pipeline").unwrap().clone()
}

#[test]
fn build() {
    let ns = Namespace::new("test_db", "test_coll");
    let pipeline = vec![doc! { "$match": { "x": 1 } }];

    let options = AggregateOptions::builder()
        .allow_disk_use(true)
        .batch_size(4)
        .build();

    let mut aggregate = Aggregate::new(ns, pipeline.clone(), Some(options));
    let cmd = aggregate.build(&StreamDescription::new_testing()).unwrap();

    assert_eq!(cmd.name.as_str(), "aggregate");
    assert_eq!(cmd.target_db.as_str(), "test_db");
    assert_eq!(
        cmd.body,
        doc! {
            "aggregate": "test_coll",
            "pipeline": [{ "$match": { "x": 1 } }],
            "allowDiskUse": true,
            "cursor": { "batchSize": 4 },
        }
    );
}

#[test]
fn build_database_target() {
    let mut aggregate = Aggregate::new(
        "test_db".to_string(),
        vec![doc! { "$currentOp": {} }],
        None,
    );
    let cmd = aggregate.build(&StreamDescription::new_testing()).unwrap();
    assert_eq!(cmd.body.get_i32("aggregate"), Ok(1));
}

#[test]
fn build_out_rewrite() {
    // $out targeting the operation's own database collapses to the bare
    // collection name
    let pipeline = build_pipeline(
        "D",
        vec![
            doc! { "$match": { "x": 1 } },
            doc! { "$out": { "db": "D", "coll": "C" } },
        ],
    );
    assert_eq!(
        pipeline,
        vec![
            Bson::Document(doc! { "$match": { "x": 1 } }),
            Bson::Document(doc! { "$out": "C" }),
        ]
    );

    // a cross-database $out is preserved
    let pipeline = build_pipeline(
        "D2",
        vec![
            doc! { "$match": { "x": 1 } },
            doc! { "$out": { "db": "D", "coll": "C" } },
        ],
    );
    assert_eq!(
        pipeline,
        vec![
            Bson::Document(doc! { "$match": { "x": 1 } }),
            Bson::Document(doc! { "$out": { "db": "D", "coll": "C" } }),
        ]
    );
}

#[test]
fn to_collection_requires_output_stage() {
    let ns = Namespace::new("test_db", "test_coll");

    let error = Aggregate::new_to_collection(
        ns.clone(),
        vec![doc! { "$match": { "x": 1 } }],
        None,
    )
    .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));

    assert!(Aggregate::new_to_collection(
        ns.clone(),
        vec![doc! { "$match": { "x": 1 } }, doc! { "$out": "other" }],
        None
    )
    .is_ok());

    assert!(Aggregate::new_to_collection(
        ns,
        vec![doc! { "$merge": { "into": "other" } }],
        None
    )
    .is_ok());
}

#[test]
fn out_is_not_retryable() {
    use crate::operation::Retryability;

    let ns = Namespace::new("test_db", "test_coll");
    let aggregate = Aggregate::new_to_collection(
        ns.clone(),
        vec![doc! { "$out": "other" }],
        None,
    )
    .unwrap();
    assert_eq!(aggregate.retryability(), Retryability::None);

    let cursor_aggregate = Aggregate::new(ns, vec![doc! { "$match": {} }], None);
    assert_eq!(cursor_aggregate.retryability(), Retryability::Read);
}

#[test]
fn out_omits_cursor_batch_size() {
    let ns = Namespace::new("test_db", "test_coll");
    let options = AggregateOptions::builder().batch_size(10).build();
    let mut aggregate =
        Aggregate::new_to_collection(ns, vec![doc! { "$out": "other" }], Some(options)).unwrap();
    let cmd = aggregate.build(&StreamDescription::new_testing()).unwrap();
    assert_eq!(cmd.body.get_document("cursor"), Ok(&Document::new()));
}
