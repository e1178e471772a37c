pub(crate) mod conn;
pub(crate) mod establish;
pub(crate) mod options;
pub(crate) mod pool;

pub use conn::stream::{MessageStream, StreamFactory};
pub use conn::wire::Message;

pub(crate) use conn::{
    Command,
    Connection,
    PinnedConnectionHandle,
    PooledConnection,
    RawCommandResponse,
    StreamDescription,
};
