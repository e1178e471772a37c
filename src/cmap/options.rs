use std::time::Duration;

use crate::options::{ClientOptions, Credential};

/// Options for a single server's connection pool, derived from the client
/// options. Sizing knobs (min/max pool size, max concurrent establishment,
/// wait-queue behavior) are interpreted by the pool implementation behind the
/// [`ConnectionPool`](super::pool::ConnectionPool) seam.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConnectionPoolOptions {
    /// How long a connection may sit idle in the pool before being discarded
    /// instead of handed out.
    pub(crate) max_idle_time: Option<Duration>,

    /// The credential used to authenticate new connections.
    pub(crate) credential: Option<Credential>,
}

impl ConnectionPoolOptions {
    pub(crate) fn from_client_options(options: &ClientOptions) -> Self {
        Self {
            max_idle_time: options.max_idle_time,
            credential: options.credential.clone(),
        }
    }
}
