mod command;
pub(crate) mod stream;
mod stream_description;
pub(crate) mod wire;

use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Mutex,
    },
};

use derivative::Derivative;

pub(crate) use command::{Command, RawCommandResponse};
pub(crate) use stream_description::StreamDescription;

use self::{stream::MessageStream, wire::next_request_id};
use super::pool::ConnectionPool;
use crate::{
    error::{ErrorKind, Result},
    options::ServerAddress,
    trace,
};

/// A leased logical connection to a single server, wrapping a wire-message
/// stream with the capability snapshot negotiated during its handshake.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct Connection {
    pub(crate) id: u32,

    /// The id the server assigned to this connection during its handshake, if
    /// the server reported one.
    pub(crate) server_id: Option<i64>,

    pub(crate) address: ServerAddress,

    pub(crate) generation: u32,

    /// The cached StreamDescription from the connection's handshake.
    pub(crate) stream_description: Option<StreamDescription>,

    #[derivative(Debug = "ignore")]
    stream: Box<dyn MessageStream>,
}

impl Connection {
    pub(crate) fn new(
        id: u32,
        address: ServerAddress,
        generation: u32,
        stream: Box<dyn MessageStream>,
    ) -> Self {
        Self {
            id,
            server_id: None,
            address,
            generation,
            stream_description: None,
            stream,
        }
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Executes a `Command` and returns the raw result from the server.
    ///
    /// An `Ok(...)` result simply means the server received the command and
    /// that the driver received the response; it does not imply anything about
    /// the success of the command itself.
    pub(crate) async fn send_command(
        &mut self,
        command: Command,
        request_id: impl Into<Option<i32>>,
    ) -> Result<RawCommandResponse> {
        let mut message = command.into_message()?;
        message.request_id = Some(request_id.into().unwrap_or_else(next_request_id));

        self.stream.write_message(message).await?;
        let response = self.stream.read_message().await?;

        Ok(RawCommandResponse::new(self.address.clone(), response))
    }

    /// The stream this connection wraps. Authenticators converse over it
    /// directly during establishment.
    pub(crate) fn stream_mut(&mut self) -> &mut dyn MessageStream {
        self.stream.as_mut()
    }

    /// Gets the connection's StreamDescription.
    pub(crate) fn stream_description(&self) -> Result<&StreamDescription> {
        self.stream_description.as_ref().ok_or_else(|| {
            ErrorKind::Internal {
                message: "connection checked out but not handshaked".to_string(),
            }
            .into()
        })
    }
}

/// State shared between a pinned connection's handles and the leased
/// connection itself.
#[derive(Debug)]
struct PinState {
    slot: Mutex<Option<Connection>>,

    /// Set when the pin is released; the connection goes back to its pool
    /// rather than the pin slot.
    unpinned: AtomicBool,

    /// Set when the pinned connection saw a network error; the connection is
    /// discarded rather than reused.
    invalidated: AtomicBool,
}

/// A connection leased from a pool. Dropping the lease returns the connection
/// to the pool (or to its pin slot when pinned), guaranteeing release on both
/// normal and abnormal exits from the owning scope.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct PooledConnection {
    conn: Option<Connection>,
    #[derivative(Debug = "ignore")]
    pool: Arc<dyn ConnectionPool>,
    pin: Option<Arc<PinState>>,
}

impl PooledConnection {
    pub(crate) fn new(conn: Connection, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            conn: Some(conn),
            pool,
            pin: None,
        }
    }

    /// Pins this connection, returning a handle through which subsequent
    /// operations can lease the same connection rather than an arbitrary one
    /// from the pool.
    pub(crate) fn pin(&mut self) -> Result<PinnedConnectionHandle> {
        let conn = self.conn.as_ref().ok_or_else(|| {
            ErrorKind::Internal {
                message: "attempted to pin a released connection".to_string(),
            }
        })?;
        let pin = self.pin.get_or_insert_with(|| {
            Arc::new(PinState {
                slot: Mutex::new(None),
                unpinned: AtomicBool::new(false),
                invalidated: AtomicBool::new(false),
            })
        });
        Ok(PinnedConnectionHandle {
            id: conn.id,
            address: conn.address.clone(),
            pool: Arc::clone(&self.pool),
            state: Arc::clone(pin),
        })
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        // The inner connection is only absent after the lease is dropped.
        self.conn.as_ref().unwrap()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        if let Some(ref pin) = self.pin {
            if pin.invalidated.load(Ordering::SeqCst) {
                trace::connection_closed(&conn, "pinned connection invalidated");
                return;
            }
            if !pin.unpinned.load(Ordering::SeqCst) {
                if let Ok(mut slot) = pin.slot.lock() {
                    *slot = Some(conn);
                    return;
                } else {
                    return;
                }
            }
        }
        self.pool.check_in(conn);
    }
}

/// A handle to a pinned connection, shared between the cursor (or transaction)
/// that pinned it and the continuation operations that lease it. The pin is
/// released explicitly when the owner closes.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct PinnedConnectionHandle {
    id: u32,
    address: ServerAddress,
    #[derivative(Debug = "ignore")]
    pool: Arc<dyn ConnectionPool>,
    state: Arc<PinState>,
}

impl PinnedConnectionHandle {
    /// Returns an additional handle to the same pinned connection.
    pub(crate) fn replicate(&self) -> Self {
        Self {
            id: self.id,
            address: self.address.clone(),
            pool: Arc::clone(&self.pool),
            state: Arc::clone(&self.state),
        }
    }

    /// Leases the pinned connection. Fails if it is still in use by another
    /// operation or if the pin has been released.
    pub(crate) fn take_connection(&self) -> Result<PooledConnection> {
        let mut slot = self.state.slot.lock().map_err(|_| {
            crate::error::Error::internal("pinned connection state poisoned")
        })?;
        let conn = slot.take().ok_or_else(|| {
            ErrorKind::Internal {
                message: format!(
                    "cannot lease pinned connection {} to {}: already in use or released",
                    self.id, self.address
                ),
            }
        })?;
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.pool),
            pin: Some(Arc::clone(&self.state)),
        })
    }

    /// Flags the pinned connection as unusable, preventing further leases and
    /// discarding it once returned.
    pub(crate) fn invalidate(&self) {
        self.state.invalidated.store(true, Ordering::SeqCst);
    }

    /// Releases the pin: the connection returns to its pool instead of the pin
    /// slot from now on. An invalidated connection is discarded instead.
    pub(crate) fn release(&self) {
        self.state.unpinned.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.state.slot.lock() {
            if let Some(conn) = slot.take() {
                if self.state.invalidated.load(Ordering::SeqCst) {
                    trace::connection_closed(&conn, "pinned connection invalidated");
                } else {
                    self.pool.check_in(conn);
                }
            }
        }
    }
}
