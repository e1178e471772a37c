//! Bulk write requests and the batching loops that drive them.
//!
//! An arbitrary caller-supplied sequence of requests is split into batches
//! bounded by the server-advertised statement-count and message-size limits;
//! each batch runs as its own (independently retryable) write command.

#[cfg(test)]
mod test;

use std::collections::HashSet;

use crate::{
    bson::Document,
    error::{BulkWriteError, BulkWriteFailure, Error, ErrorKind, Result},
    operation::{Delete, Insert, Update},
    options::{Collation, DeleteManyOptions, Hint, InsertManyOptions, UpdateManyOptions},
    results::{DeleteManyResult, InsertManyResult, UpdateManyResult},
    Client,
    ClientSession,
    Namespace,
};

/// A single statement of a bulk delete.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct DeleteRequest {
    /// The filter selecting the documents to delete.
    pub filter: Document,

    /// The maximum number of documents to delete: 1, or 0 for no limit.
    pub limit: u32,

    /// The collation to use for filter comparisons.
    pub collation: Option<Collation>,

    /// The index to use for the statement.
    pub hint: Option<Hint>,
}

impl DeleteRequest {
    /// A statement deleting at most one matching document.
    pub fn one(filter: Document) -> Self {
        Self {
            filter,
            limit: 1,
            collation: None,
            hint: None,
        }
    }

    /// A statement deleting every matching document.
    pub fn many(filter: Document) -> Self {
        Self {
            filter,
            limit: 0,
            collation: None,
            hint: None,
        }
    }
}

/// A single statement of a bulk update.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct UpdateRequest {
    /// The filter selecting the documents to update.
    pub filter: Document,

    /// The update modifications to apply.
    pub update: Document,

    /// Whether all matching documents are updated, rather than just the first.
    pub multi: bool,

    /// Whether a matching document should be created if none exists.
    pub upsert: Option<bool>,

    /// Filters selecting the array elements the update applies to.
    pub array_filters: Option<Vec<Document>>,

    /// The collation to use for filter comparisons.
    pub collation: Option<Collation>,

    /// The index to use for the statement.
    pub hint: Option<Hint>,
}

impl UpdateRequest {
    /// A statement updating at most one matching document.
    pub fn one(filter: Document, update: Document) -> Self {
        Self {
            filter,
            update,
            multi: false,
            upsert: None,
            array_filters: None,
            collation: None,
            hint: None,
        }
    }

    /// A statement updating every matching document.
    pub fn many(filter: Document, update: Document) -> Self {
        Self {
            multi: true,
            ..Self::one(filter, update)
        }
    }
}

/// Tracks the failures accumulated across the batches of one bulk operation.
struct CumulativeFailure {
    failure: Option<BulkWriteFailure>,
    labels: HashSet<String>,
}

impl CumulativeFailure {
    fn new() -> Self {
        Self {
            failure: None,
            labels: HashSet::new(),
        }
    }

    /// Folds one batch's failure in, re-indexing its per-statement errors into
    /// the caller's request sequence.
    fn absorb(&mut self, error: Error, n_attempted: usize) -> Result<()> {
        let labels = error.labels().clone();
        match *error.kind {
            ErrorKind::BulkWrite(batch_failure) => {
                let failure = self.failure.get_or_insert_with(BulkWriteFailure::new);
                if let Some(write_errors) = batch_failure.write_errors {
                    for write_error in write_errors {
                        failure
                            .write_errors
                            .get_or_insert_with(Default::default)
                            .push(BulkWriteError {
                                index: n_attempted + write_error.index,
                                ..write_error
                            });
                    }
                }
                for (index, id) in batch_failure.inserted_ids {
                    failure.inserted_ids.insert(n_attempted + index, id);
                }
                if let Some(wc_error) = batch_failure.write_concern_error {
                    failure.write_concern_error = Some(wc_error);
                }
                self.labels.extend(labels);
                Ok(())
            }
            // anything other than a per-statement failure aborts the loop
            _ => Err(error),
        }
    }

    /// Folds the ids applied by earlier, successful batches into the reported
    /// failure, so a partial outcome is observable from the error alone.
    fn merge_inserted_ids(&mut self, result: &InsertManyResult) {
        if let Some(ref mut failure) = self.failure {
            for (index, id) in result.inserted_ids.iter() {
                failure.inserted_ids.insert(*index, id.clone());
            }
        }
    }

    fn into_result<T>(self, result: T) -> Result<T> {
        match self.failure {
            Some(failure) => Err(Error::new(
                ErrorKind::BulkWrite(failure),
                Some(self.labels),
            )),
            None => Ok(result),
        }
    }
}

impl Client {
    /// Inserts the given documents into the namespace, splitting them into as
    /// many batches as the server's limits require.
    pub async fn insert_many(
        &self,
        ns: Namespace,
        documents: Vec<Document>,
        options: impl Into<Option<InsertManyOptions>>,
    ) -> Result<InsertManyResult> {
        self.insert_many_with_session(ns, documents, options, None)
            .await
    }

    /// Inserts the given documents using the provided session.
    pub async fn insert_many_with_session(
        &self,
        ns: Namespace,
        documents: Vec<Document>,
        options: impl Into<Option<InsertManyOptions>>,
        mut session: Option<&mut ClientSession>,
    ) -> Result<InsertManyResult> {
        let options = options.into();
        if documents.is_empty() {
            return Err(ErrorKind::InvalidArgument {
                message: "no documents provided to insert_many".to_string(),
            }
            .into());
        }
        let ordered = options
            .as_ref()
            .and_then(|options| options.ordered)
            .unwrap_or(true);

        let mut cumulative_failure = CumulativeFailure::new();
        let mut cumulative_result = InsertManyResult::new();
        let mut n_attempted = 0;

        while n_attempted < documents.len() {
            let batch: Vec<Document> = documents[n_attempted..].to_vec();
            let mut insert = Insert::new(ns.clone(), batch, options.clone());

            match self
                .execute_operation(&mut insert, session.as_deref_mut())
                .await
            {
                Ok(result) => {
                    let batch_size = insert.n_attempted();
                    for (index, id) in result.inserted_ids {
                        cumulative_result
                            .inserted_ids
                            .insert(n_attempted + index, id);
                    }
                    n_attempted += batch_size;
                }
                Err(error) => {
                    let batch_size = insert.n_attempted();
                    cumulative_failure.absorb(error, n_attempted)?;
                    if ordered {
                        // the remainder of the sequence is skipped; the
                        // cumulative failure carries what was applied
                        cumulative_failure.merge_inserted_ids(&cumulative_result);
                        return cumulative_failure.into_result(cumulative_result);
                    }
                    n_attempted += batch_size;
                }
            }
        }

        cumulative_failure.merge_inserted_ids(&cumulative_result);
        cumulative_failure.into_result(cumulative_result)
    }

    /// Applies the given update statements, splitting them into as many
    /// batches as the server's limits require.
    pub async fn update_many(
        &self,
        ns: Namespace,
        requests: Vec<UpdateRequest>,
        options: impl Into<Option<UpdateManyOptions>>,
    ) -> Result<UpdateManyResult> {
        self.update_many_with_session(ns, requests, options, None)
            .await
    }

    /// Applies the given update statements using the provided session.
    pub async fn update_many_with_session(
        &self,
        ns: Namespace,
        requests: Vec<UpdateRequest>,
        options: impl Into<Option<UpdateManyOptions>>,
        mut session: Option<&mut ClientSession>,
    ) -> Result<UpdateManyResult> {
        let options = options.into();
        if requests.is_empty() {
            return Err(ErrorKind::InvalidArgument {
                message: "no statements provided to update_many".to_string(),
            }
            .into());
        }
        let ordered = options
            .as_ref()
            .and_then(|options| options.ordered)
            .unwrap_or(true);

        let mut cumulative_failure = CumulativeFailure::new();
        let mut cumulative_result = UpdateManyResult::new();
        let mut n_attempted = 0;

        while n_attempted < requests.len() {
            let batch: Vec<UpdateRequest> = requests[n_attempted..].to_vec();
            let mut update = Update::new(ns.clone(), batch, options.clone());

            match self
                .execute_operation(&mut update, session.as_deref_mut())
                .await
            {
                Ok(result) => {
                    let batch_size = update.n_attempted();
                    cumulative_result.matched_count += result.matched_count;
                    cumulative_result.modified_count += result.modified_count;
                    for (index, id) in result.upserted_ids {
                        cumulative_result
                            .upserted_ids
                            .insert(n_attempted + index, id);
                    }
                    n_attempted += batch_size;
                }
                Err(error) => {
                    let batch_size = update.n_attempted();
                    cumulative_failure.absorb(error, n_attempted)?;
                    if ordered {
                        return cumulative_failure.into_result(cumulative_result);
                    }
                    n_attempted += batch_size;
                }
            }
        }

        cumulative_failure.into_result(cumulative_result)
    }

    /// Applies the given delete statements, splitting them into as many
    /// batches as the server's limits require.
    pub async fn delete_many(
        &self,
        ns: Namespace,
        requests: Vec<DeleteRequest>,
        options: impl Into<Option<DeleteManyOptions>>,
    ) -> Result<DeleteManyResult> {
        self.delete_many_with_session(ns, requests, options, None)
            .await
    }

    /// Applies the given delete statements using the provided session.
    pub async fn delete_many_with_session(
        &self,
        ns: Namespace,
        requests: Vec<DeleteRequest>,
        options: impl Into<Option<DeleteManyOptions>>,
        mut session: Option<&mut ClientSession>,
    ) -> Result<DeleteManyResult> {
        let options = options.into();
        if requests.is_empty() {
            return Err(ErrorKind::InvalidArgument {
                message: "no statements provided to delete_many".to_string(),
            }
            .into());
        }
        let ordered = options
            .as_ref()
            .and_then(|options| options.ordered)
            .unwrap_or(true);

        let mut cumulative_failure = CumulativeFailure::new();
        let mut cumulative_result = DeleteManyResult::default();
        let mut n_attempted = 0;

        while n_attempted < requests.len() {
            let batch: Vec<DeleteRequest> = requests[n_attempted..].to_vec();
            let mut delete = Delete::new(ns.clone(), batch, options.clone());

            match self
                .execute_operation(&mut delete, session.as_deref_mut())
                .await
            {
                Ok(result) => {
                    let batch_size = delete.n_attempted();
                    cumulative_result.deleted_count += result.deleted_count;
                    n_attempted += batch_size;
                }
                Err(error) => {
                    let batch_size = delete.n_attempted();
                    cumulative_failure.absorb(error, n_attempted)?;
                    if ordered {
                        return cumulative_failure.into_result(cumulative_result);
                    }
                    n_attempted += batch_size;
                }
            }
        }

        cumulative_failure.into_result(cumulative_result)
    }
}
