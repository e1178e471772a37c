//! Contains the types of results returned by CRUD operations.

use std::collections::HashMap;

use serde::Serialize;

use crate::bson::{Bson, RawDocumentBuf};

/// The result of an insert operation.
#[derive(Debug, Clone, Default, Serialize)]
#[non_exhaustive]
pub struct InsertManyResult {
    /// The `_id` field of the documents inserted, keyed by their index in the
    /// original request sequence.
    pub inserted_ids: HashMap<usize, Bson>,
}

impl InsertManyResult {
    pub(crate) fn new() -> Self {
        InsertManyResult {
            inserted_ids: HashMap::new(),
        }
    }
}

/// The result of an update operation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UpdateManyResult {
    /// The number of documents that matched the filters.
    pub matched_count: u64,

    /// The number of documents that were modified.
    pub modified_count: u64,

    /// The `_id` fields of the upserted documents, keyed by the index of the
    /// statement that upserted them.
    pub upserted_ids: HashMap<usize, Bson>,
}

impl UpdateManyResult {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// The result of a delete operation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DeleteManyResult {
    /// The number of documents deleted by the operation.
    pub deleted_count: u64,
}

/// The result of a single continuation round trip of a cursor.
#[derive(Debug, Clone)]
pub(crate) struct GetMoreResult {
    pub(crate) batch: std::collections::VecDeque<RawDocumentBuf>,
    pub(crate) exhausted: bool,
    pub(crate) id: i64,
}
