use std::sync::atomic::{AtomicI32, Ordering};

use crate::{
    bson::RawDocumentBuf,
    error::Result,
};

use super::Command;

static REQUEST_ID: AtomicI32 = AtomicI32::new(0);

/// Returns a monotonically increasing id to use for the next wire message.
pub(crate) fn next_request_id() -> i32 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// A wire protocol message holding a single command or reply document.
///
/// The binary framing of the message (header, flags, section encoding,
/// compression) is applied below the [`MessageStream`](super::stream::MessageStream)
/// interface and is not modeled here.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Message {
    /// The id of this message, unique per connection.
    pub request_id: Option<i32>,

    /// The id of the message this one replies to, if any.
    pub response_to: Option<i32>,

    /// The body of the message: a single command or reply document.
    pub document_payload: RawDocumentBuf,
}

impl Message {
    /// Creates a message holding the given reply document. Used by transport
    /// implementations and tests to construct server responses.
    pub fn from_reply_document(document: RawDocumentBuf) -> Self {
        Self {
            request_id: None,
            response_to: None,
            document_payload: document,
        }
    }

    pub(crate) fn from_command(command: Command) -> Result<Self> {
        let document_payload = crate::bson::to_raw_document_buf(&command)?;
        Ok(Self {
            request_id: None,
            response_to: None,
            document_payload,
        })
    }
}
