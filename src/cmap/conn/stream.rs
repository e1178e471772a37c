use async_trait::async_trait;

use super::wire::Message;
use crate::{error::Result, options::ServerAddress};

/// A bidirectional, message-oriented stream to a single server.
///
/// The driver core is transport-agnostic: socket establishment, TLS, timeouts
/// on reads and writes, and binary message framing all live behind this
/// interface. Implementations are provided by a transport crate (or by tests).
#[async_trait]
pub trait MessageStream: Send {
    /// Writes a single message to the stream.
    async fn write_message(&mut self, message: Message) -> Result<()>;

    /// Reads the next message from the stream.
    async fn read_message(&mut self) -> Result<Message>;
}

/// A factory producing [`MessageStream`]s for new connections.
#[async_trait]
pub trait StreamFactory: Send + Sync {
    /// Opens a stream to the server at the given address.
    async fn connect(&self, address: &ServerAddress) -> Result<Box<dyn MessageStream>>;
}
