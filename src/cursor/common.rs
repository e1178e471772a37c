use std::{collections::VecDeque, time::Duration};

use crate::{
    bson::{Bson, RawDocumentBuf},
    operation::CursorInfo,
    options::ServerAddress,
    Namespace,
};

/// Everything the driver needs to issue continuation commands for a cursor,
/// as produced by the operation that created it.
#[derive(Debug, Clone)]
pub(crate) struct CursorSpecification {
    pub(crate) info: CursorInformation,
    pub(crate) initial_buffer: VecDeque<RawDocumentBuf>,
}

impl CursorSpecification {
    pub(crate) fn new(
        info: CursorInfo,
        address: ServerAddress,
        batch_size: impl Into<Option<u32>>,
        max_time: impl Into<Option<Duration>>,
        comment: impl Into<Option<Bson>>,
    ) -> Self {
        Self {
            info: CursorInformation {
                ns: info.ns,
                id: info.id,
                address,
                batch_size: batch_size.into(),
                max_time: max_time.into(),
                comment: comment.into(),
                limit: None,
            },
            initial_buffer: info.first_batch,
        }
    }

    pub(crate) fn with_limit(mut self, limit: impl Into<Option<i64>>) -> Self {
        // a negative limit requests a single (already delivered) batch of
        // |limit| documents
        self.info.limit = limit.into().map(i64::abs);
        self
    }

    pub(crate) fn id(&self) -> i64 {
        self.info.id
    }

    #[cfg(test)]
    pub(crate) fn ns(&self) -> &Namespace {
        &self.info.ns
    }

    #[cfg(test)]
    pub(crate) fn batch_size(&self) -> Option<u32> {
        self.info.batch_size
    }

    #[cfg(test)]
    pub(crate) fn max_time(&self) -> Option<Duration> {
        self.info.max_time
    }
}

/// The driver-side state of a cursor needed to build continuation commands.
#[derive(Debug, Clone)]
pub(crate) struct CursorInformation {
    pub(crate) ns: Namespace,

    /// The address of the server the cursor lives on; continuation commands
    /// must be routed to it.
    pub(crate) address: ServerAddress,

    pub(crate) id: i64,

    pub(crate) batch_size: Option<u32>,

    /// The server-side await window for each continuation of a tailable await
    /// cursor.
    pub(crate) max_time: Option<Duration>,

    pub(crate) comment: Option<Bson>,

    /// The remaining-result bound the cursor enforces, taken from the
    /// originating query.
    pub(crate) limit: Option<i64>,
}
