//! Contains the logical session type used to tie operations to server-side
//! state, most importantly the transaction number used for retryable-write
//! deduplication.

use std::sync::atomic::{AtomicI64, Ordering};

use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::bson::{doc, spec::BinarySubtype, Binary, Bson, Document, Timestamp};

/// Options for starting a session.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[non_exhaustive]
pub struct SessionOptions {
    /// Whether operations on the session are causally consistent, i.e. whether
    /// reads observe the session's own prior writes. Defaults to true unless
    /// `snapshot` is true.
    #[builder(default, setter(strip_option))]
    pub causal_consistency: Option<bool>,

    /// Whether all reads on the session use a single consistent snapshot.
    #[builder(default, setter(strip_option))]
    pub snapshot: Option<bool>,
}

/// A logical session, used as a handle to server-side session state.
///
/// A session is logically owned by one operation at a time; the transaction
/// number counter is nevertheless atomic so that the sequence it produces is
/// strictly monotonic even for concurrent sharers.
#[derive(Debug)]
pub struct ClientSession {
    id: Document,
    txn_number: AtomicI64,
    options: Option<SessionOptions>,
    is_implicit: bool,
    in_transaction: bool,
    dirty: bool,
    pub(crate) operation_time: Option<Timestamp>,
    pub(crate) snapshot_time: Option<Timestamp>,
}

impl ClientSession {
    pub(crate) fn new(options: Option<SessionOptions>, is_implicit: bool) -> Self {
        let binary = Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: Uuid::new_v4().as_bytes().to_vec(),
        });

        Self {
            id: doc! { "id": binary },
            txn_number: AtomicI64::new(0),
            options,
            is_implicit,
            in_transaction: false,
            dirty: false,
            operation_time: None,
            snapshot_time: None,
        }
    }

    /// The id of this session, a 16-byte server-opaque identifier.
    pub fn id(&self) -> &Document {
        &self.id
    }

    /// The options used to start this session.
    pub fn options(&self) -> Option<&SessionOptions> {
        self.options.as_ref()
    }

    /// Whether this session was created implicitly by the driver or explicitly
    /// by the user.
    pub(crate) fn is_implicit(&self) -> bool {
        self.is_implicit
    }

    /// Whether this session is currently inside an explicit user transaction.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    #[cfg(test)]
    pub(crate) fn set_in_transaction(&mut self, in_transaction: bool) {
        self.in_transaction = in_transaction;
    }

    pub(crate) fn causal_consistency(&self) -> bool {
        let snapshot = self
            .options
            .as_ref()
            .and_then(|opts| opts.snapshot)
            .unwrap_or(false);
        self.options
            .as_ref()
            .and_then(|opts| opts.causal_consistency)
            .unwrap_or(!snapshot)
    }

    pub(crate) fn is_snapshot(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|opts| opts.snapshot)
            .unwrap_or(false)
    }

    /// The current transaction number.
    #[cfg(test)]
    pub(crate) fn txn_number(&self) -> i64 {
        self.txn_number.load(Ordering::SeqCst)
    }

    /// Advances the transaction number and returns the new value. Each call
    /// produces the next value of a strictly increasing sequence unique to
    /// this session; the value obtained for an operation is reused verbatim
    /// across all of its retry attempts.
    pub(crate) fn advance_transaction_number(&self) -> i64 {
        self.txn_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Advance the session's observed operation time to the provided one if it
    /// is greater than the current value.
    pub(crate) fn advance_operation_time(&mut self, to: Timestamp) {
        if self.operation_time.map(|current| current < to).unwrap_or(true) {
            self.operation_time = Some(to);
        }
    }

    /// Mark this session as dirty; a dirty session saw a network error and its
    /// server-side state may be inconsistent.
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[allow(dead_code)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::ClientSession;

    #[test]
    fn transaction_numbers_are_strictly_monotonic() {
        let session = ClientSession::new(None, false);
        let mut prev = session.txn_number();
        for _ in 0..10 {
            let next = session.advance_transaction_number();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn transaction_numbers_are_unique_under_concurrency() {
        let session = Arc::new(ClientSession::new(None, false));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = Arc::clone(&session);
            handles.push(std::thread::spawn(move || {
                (0..100)
                    .map(|_| session.advance_transaction_number())
                    .collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 800);
        assert_eq!(session.txn_number(), 800);
    }

    #[test]
    fn session_ids_are_unique() {
        let a = ClientSession::new(None, true);
        let b = ClientSession::new(None, true);
        assert_ne!(a.id(), b.id());
    }
}
