mod common;

#[cfg(test)]
mod test;

use std::collections::VecDeque;

use serde::de::DeserializeOwned;

use crate::{
    bson::{RawDocument, RawDocumentBuf},
    cmap::PinnedConnectionHandle,
    error::Result,
    operation::GetMore,
    Client,
    ClientSession,
};

pub(crate) use common::{CursorInformation, CursorSpecification};

/// A `Cursor` streams the result of a query. When a query is made, the
/// returned `Cursor` holds the first batch of results from the server; further
/// batches are fetched lazily as it is iterated, via cursor continuation
/// commands routed back to the server that created the cursor. Because of
/// this batching, iteration yields `Result<T>` items rather than simply `T`
/// items.
///
/// The batch size of the `Cursor` can be configured using the options to the
/// method that returns it, e.g. the `batch_size` field of
/// [`FindOptions`](crate::options::FindOptions).
///
/// ```no_run
/// # use stratadb::{bson::{doc, Document}, Client, error::Result, Namespace};
/// # async fn do_stuff(client: Client) -> Result<()> {
/// let mut cursor = client
///     .find::<Document>(Namespace::new("db", "coll"), doc! { "x": 1 }, None)
///     .await?;
/// while let Some(doc) = cursor.next().await {
///     println!("{}", doc?);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Cursor<T> {
    client: Client,
    info: CursorInformation,
    buffer: VecDeque<RawDocumentBuf>,
    current: Option<RawDocumentBuf>,
    exhausted: bool,
    returned: i64,
    pinned_connection: Option<PinnedConnectionHandle>,
    session: Option<ClientSession>,
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T> Cursor<T> {
    pub(crate) fn new(
        client: Client,
        spec: CursorSpecification,
        session: Option<ClientSession>,
        pinned_connection: Option<PinnedConnectionHandle>,
    ) -> Self {
        let exhausted = spec.id() == 0;
        Self {
            client,
            info: spec.info,
            buffer: spec.initial_buffer,
            current: None,
            exhausted,
            returned: 0,
            pinned_connection,
            session,
            _phantom: Default::default(),
        }
    }

    /// The id of the server-side cursor, or 0 if it is exhausted.
    pub fn id(&self) -> i64 {
        if self.exhausted {
            0
        } else {
            self.info.id
        }
    }

    fn limit_reached(&self) -> bool {
        match self.info.limit {
            Some(limit) if limit > 0 => self.returned >= limit,
            _ => false,
        }
    }

    /// Advance the cursor forward to the next document. Returns false once all
    /// matching documents have been visited.
    ///
    /// If there are no documents buffered locally, one or more continuation
    /// round trips are performed.
    pub async fn advance(&mut self) -> Result<bool> {
        loop {
            if self.limit_reached() {
                self.release_pin();
                return Ok(false);
            }

            if let Some(doc) = self.buffer.pop_front() {
                self.current = Some(doc);
                self.returned += 1;
                return Ok(true);
            }

            if self.exhausted {
                self.release_pin();
                return Ok(false);
            }

            let get_more = GetMore::new(self.info.clone(), self.pinned_connection.as_ref());
            let result = self
                .client
                .execute_get_more(get_more, self.session.as_mut())
                .await;
            match result {
                Ok(get_more_result) => {
                    self.exhausted = get_more_result.exhausted;
                    self.info.id = get_more_result.id;
                    if get_more_result.exhausted {
                        self.release_pin();
                    }
                    self.buffer = get_more_result.batch;
                }
                Err(error) => {
                    if error.is_network_error() {
                        // The connection state is unknown; it must not serve
                        // another operation.
                        if let Some(ref pin) = self.pinned_connection {
                            pin.invalidate();
                        }
                    }
                    self.exhausted = true;
                    return Err(error);
                }
            }
        }
    }

    /// The document the cursor is currently positioned at. Valid only after a
    /// call to [`advance`](Cursor::advance) returned true.
    pub fn current(&self) -> Option<&RawDocument> {
        self.current.as_deref()
    }

    /// Deserialize the current document.
    pub fn deserialize_current<'a>(&'a self) -> Result<T>
    where
        T: serde::Deserialize<'a>,
    {
        let current = self.current().ok_or_else(|| {
            crate::error::Error::internal("the cursor is not positioned at a document")
        })?;
        crate::bson::from_slice(current.as_bytes()).map_err(crate::error::Error::from)
    }

    /// Advances the cursor and deserializes the next document, or returns
    /// `None` once the results are exhausted.
    pub async fn next(&mut self) -> Option<Result<T>>
    where
        T: DeserializeOwned,
    {
        match self.advance().await {
            Ok(true) => Some(self.deserialize_current()),
            Ok(false) => None,
            Err(error) => Some(Err(error)),
        }
    }

    fn release_pin(&mut self) {
        if let Some(pin) = self.pinned_connection.take() {
            pin.release();
        }
    }
}

impl<T> Drop for Cursor<T> {
    fn drop(&mut self) {
        self.release_pin();
    }
}
