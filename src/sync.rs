//! A blocking facade over the asynchronous API.
//!
//! Every wrapper defers to the corresponding async method on a shared runtime,
//! so both variants share one implementation and identical semantics.

use lazy_static::lazy_static;
use serde::de::DeserializeOwned;

use crate::{
    bson::Document,
    error::Result,
    operation::AggregateTarget,
    options::{
        AggregateOptions,
        ClientOptions,
        DeleteManyOptions,
        FindOptions,
        InsertManyOptions,
        RunCommandOptions,
        UpdateManyOptions,
    },
    results::{DeleteManyResult, InsertManyResult, UpdateManyResult},
    bulk::{DeleteRequest, UpdateRequest},
    Namespace,
};

lazy_static! {
    static ref RUNTIME: tokio::runtime::Runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to initialize the blocking-facade runtime");
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    RUNTIME.block_on(future)
}

/// A blocking handle to a cluster. This is a thin wrapper over the async
/// [`Client`](crate::Client); each method blocks the calling thread until the
/// corresponding async call resolves.
#[derive(Clone, Debug)]
pub struct Client {
    async_client: crate::Client,
}

impl Client {
    /// Creates a new blocking `Client` for the cluster described by the given
    /// options.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        Ok(Self {
            async_client: crate::Client::with_options(options)?,
        })
    }

    /// The wrapped async client.
    pub fn async_client(&self) -> &crate::Client {
        &self.async_client
    }

    /// Finds the documents in the given namespace matching `filter`.
    pub fn find<T>(
        &self,
        ns: Namespace,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Cursor<T>> {
        block_on(self.async_client.find(ns, filter, options)).map(Cursor::new)
    }

    /// Runs an aggregation pipeline and returns a cursor over its results.
    pub fn aggregate<T>(
        &self,
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<Cursor<T>> {
        block_on(self.async_client.aggregate(target, pipeline, options)).map(Cursor::new)
    }

    /// Runs an aggregation pipeline that materializes its results into a
    /// collection.
    pub fn aggregate_to_collection(
        &self,
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<()> {
        block_on(
            self.async_client
                .aggregate_to_collection(target, pipeline, options),
        )
    }

    /// Inserts the given documents into the namespace.
    pub fn insert_many(
        &self,
        ns: Namespace,
        documents: Vec<Document>,
        options: impl Into<Option<InsertManyOptions>>,
    ) -> Result<InsertManyResult> {
        block_on(self.async_client.insert_many(ns, documents, options))
    }

    /// Applies the given update statements.
    pub fn update_many(
        &self,
        ns: Namespace,
        requests: Vec<UpdateRequest>,
        options: impl Into<Option<UpdateManyOptions>>,
    ) -> Result<UpdateManyResult> {
        block_on(self.async_client.update_many(ns, requests, options))
    }

    /// Applies the given delete statements.
    pub fn delete_many(
        &self,
        ns: Namespace,
        requests: Vec<DeleteRequest>,
        options: impl Into<Option<DeleteManyOptions>>,
    ) -> Result<DeleteManyResult> {
        block_on(self.async_client.delete_many(ns, requests, options))
    }

    /// Runs an arbitrary command against the given database.
    pub fn run_command(
        &self,
        db: impl Into<String>,
        command: Document,
        options: impl Into<Option<RunCommandOptions>>,
    ) -> Result<Document> {
        block_on(self.async_client.run_command(db, command, options))
    }
}

/// A blocking cursor, iterable via the standard [`Iterator`] trait.
#[derive(Debug)]
pub struct Cursor<T> {
    async_cursor: crate::Cursor<T>,
}

impl<T> Cursor<T> {
    fn new(async_cursor: crate::Cursor<T>) -> Self {
        Self { async_cursor }
    }
}

impl<T> Iterator for Cursor<T>
where
    T: DeserializeOwned,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        block_on(self.async_cursor.next())
    }
}
