use std::time::Duration;

use crate::{bson::oid::ObjectId, cluster::ServerType, hello::HelloReply, options::ServerAddress};

/// A negotiated capability snapshot of the server a connection is connected
/// to, produced by the connection handshake. Immutable for the lifetime of the
/// connection.
#[derive(Debug, Clone)]
pub(crate) struct StreamDescription {
    /// The address of the server.
    pub(crate) server_address: ServerAddress,

    /// The type of the server when the handshake occurred.
    pub(crate) initial_server_type: ServerType,

    /// The maximum wire version that the server understands.
    pub(crate) max_wire_version: Option<i32>,

    /// The minimum wire version that the server understands.
    pub(crate) min_wire_version: Option<i32>,

    /// The server's advertised window within which a session id remains
    /// valid. Its presence is a proxy for server support of sessions.
    pub(crate) logical_session_timeout: Option<Duration>,

    /// The maximum size of a document the server accepts.
    pub(crate) max_bson_object_size: i64,

    /// The maximum number of statements permitted in a single write command.
    pub(crate) max_write_batch_size: i64,

    /// The maximum size of a wire message the server accepts.
    pub(crate) max_message_size_bytes: i32,

    /// Whether the server supports the non-legacy greeting.
    pub(crate) hello_ok: bool,

    /// The id of the backend behind a load balancer that this connection is
    /// pinned to.
    pub(crate) service_id: Option<ObjectId>,

    /// The id the server assigned to this connection, when the server
    /// reported one.
    pub(crate) server_connection_id: Option<i64>,
}

impl StreamDescription {
    /// Constructs a new StreamDescription from a hello reply. In load-balanced
    /// mode the server behind the balancer is not observed directly and the
    /// server type is fixed.
    pub(crate) fn from_hello_reply(reply: &HelloReply, load_balanced: bool) -> Self {
        let response = &reply.command_response;
        Self {
            server_address: reply.server_address.clone(),
            initial_server_type: if load_balanced {
                ServerType::LoadBalancer
            } else {
                response.server_type()
            },
            max_wire_version: response.max_wire_version,
            min_wire_version: response.min_wire_version,
            logical_session_timeout: response
                .logical_session_timeout_minutes
                .map(|mins| Duration::from_secs(mins as u64 * 60)),
            max_bson_object_size: response.max_bson_object_size,
            max_write_batch_size: response.max_write_batch_size.unwrap_or(100_000),
            max_message_size_bytes: response.max_message_size_bytes,
            hello_ok: response.hello_ok.unwrap_or(false),
            service_id: response.service_id,
            server_connection_id: response.connection_id,
        }
    }

    /// Whether this server supports retryable writes: a write replay can only
    /// be deduplicated when the server tracks sessions, and standalone servers
    /// never do. Connections through a load balancer are assumed to reach
    /// session-tracking backends.
    pub(crate) fn supports_retryable_writes(&self) -> bool {
        self.initial_server_type == ServerType::LoadBalancer
            || (self.logical_session_timeout.is_some()
                && self.initial_server_type != ServerType::Standalone)
    }

    /// Whether this server supports sessions.
    pub(crate) fn supports_sessions(&self) -> bool {
        self.initial_server_type == ServerType::LoadBalancer
            || self.logical_session_timeout.is_some()
    }

    pub(crate) fn is_sharded(&self) -> bool {
        self.initial_server_type == ServerType::ShardRouter
    }

    /// Gets a description of a stream for a replica set primary on a 4.4
    /// server. This should be used for test purposes only.
    #[cfg(test)]
    pub(crate) fn new_testing() -> Self {
        Self {
            server_address: ServerAddress::default(),
            initial_server_type: ServerType::RsPrimary,
            max_wire_version: Some(9),
            min_wire_version: Some(6),
            logical_session_timeout: Some(Duration::from_secs(30 * 60)),
            max_bson_object_size: 16 * 1024 * 1024,
            max_write_batch_size: 100_000,
            max_message_size_bytes: 48_000_000,
            hello_ok: true,
            service_id: None,
            server_connection_id: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_standalone() -> Self {
        Self {
            initial_server_type: ServerType::Standalone,
            logical_session_timeout: None,
            ..Self::new_testing()
        }
    }

    #[cfg(test)]
    pub(crate) fn new_sharded() -> Self {
        Self {
            initial_server_type: ServerType::ShardRouter,
            ..Self::new_testing()
        }
    }
}

#[cfg(test)]
mod test {
    use super::StreamDescription;
    use crate::cluster::ServerType;

    #[test]
    fn retryable_write_support() {
        // replica set member with session support
        assert!(StreamDescription::new_testing().supports_retryable_writes());

        // standalone servers never support retryable writes, even with a
        // session timeout advertised
        let mut standalone = StreamDescription::new_testing();
        standalone.initial_server_type = ServerType::Standalone;
        assert!(!standalone.supports_retryable_writes());

        // session timeout must be present for non-load-balanced servers
        let mut no_sessions = StreamDescription::new_testing();
        no_sessions.logical_session_timeout = None;
        assert!(!no_sessions.supports_retryable_writes());

        // load balanced connections support retryable writes unconditionally
        let mut load_balanced = StreamDescription::new_testing();
        load_balanced.initial_server_type = ServerType::LoadBalancer;
        load_balanced.logical_session_timeout = None;
        assert!(load_balanced.supports_retryable_writes());
    }
}
