//! Contains the types for the options that can be specified when constructing
//! a [`Client`](../struct.Client.html) or running an operation.

use std::{fmt, sync::Arc, time::Duration};

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::bson::{Bson, Document};

pub use crate::{
    cmap::{Message, MessageStream, StreamFactory},
    concern::{Acknowledgment, ReadConcern, ReadConcernLevel, WriteConcern},
    selection_criteria::{Predicate, ReadPreference, SelectionCriteria, ServerInfo},
    session::SessionOptions,
};

pub(crate) const DEFAULT_PORT: u16 = 27017;

/// An enum representing the address of a StrataDB server.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ServerAddress {
    /// A TCP/IP host and port combination.
    Tcp {
        /// The hostname or IP address where the server can be found.
        host: String,

        /// The port that the server is listening on. The default is 27017.
        port: Option<u16>,
    },
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl ServerAddress {
    /// The hostname of this address.
    pub fn host(&self) -> &str {
        match self {
            Self::Tcp { host, .. } => host.as_str(),
        }
    }

    /// The port of this address, or the default port if none was specified.
    pub fn port(&self) -> u16 {
        match self {
            Self::Tcp { port, .. } => port.unwrap_or(DEFAULT_PORT),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => {
                write!(fmt, "{}:{}", host, port.unwrap_or(DEFAULT_PORT))
            }
        }
    }
}

/// The declared server API version, guaranteeing the behavior of that version
/// regardless of the server's release version.
#[derive(Clone, Debug, PartialEq, Copy, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ServerApiVersion {
    /// Version 1 of the server API.
    #[serde(rename = "1")]
    V1,
}

impl fmt::Display for ServerApiVersion {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::V1 => write!(fmt, "1"),
        }
    }
}

/// Options used to declare a stable server API.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ServerApi {
    /// The declared API version.
    #[serde(rename = "apiVersion")]
    pub version: ServerApiVersion,

    /// Whether the server should error on commands outside of the declared API
    /// version.
    #[builder(default, setter(strip_option))]
    #[serde(rename = "apiStrict")]
    pub strict: Option<bool>,

    /// Whether the server should error on deprecated commands within the
    /// declared API version.
    #[builder(default, setter(strip_option))]
    #[serde(rename = "apiDeprecationErrors")]
    pub deprecation_errors: Option<bool>,
}

/// The compressors that may be negotiated during the connection handshake.
/// Compression itself happens below the wire-message interface.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Compressor {
    /// The zstd compressor.
    Zstd {
        /// The compression level, if any.
        level: Option<i32>,
    },
    /// The zlib compressor.
    Zlib {
        /// The compression level, if any.
        level: Option<i32>,
    },
    /// The snappy compressor.
    Snappy,
}

impl Compressor {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Compressor::Zstd { .. } => "zstd",
            Compressor::Zlib { .. } => "zlib",
            Compressor::Snappy => "snappy",
        }
    }
}

/// Specifies the TLS configuration that the driver should use.
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[non_exhaustive]
pub struct TlsOptions {
    /// Whether or not to accept invalid certificates from the server.
    ///
    /// The default value is false.
    #[builder(default, setter(strip_option))]
    pub allow_invalid_certificates: Option<bool>,

    /// The path to the CA file that the driver should use for TLS.
    ///
    /// If none is specified, then the driver will use the trust store native
    /// to the operating system.
    #[builder(default, setter(strip_option))]
    pub ca_file_path: Option<std::path::PathBuf>,

    /// The path to the certificate file that the driver should present to the
    /// server to verify its identity.
    #[builder(default, setter(strip_option))]
    pub cert_key_file_path: Option<std::path::PathBuf>,

    /// Whether to check the revocation status of the server's certificate.
    #[builder(default, setter(strip_option))]
    pub check_certificate_revocation: Option<bool>,
}

/// A struct containing authentication information.
///
/// The mechanism implementations themselves live behind the
/// [`Authenticator`](crate::options::Authenticator) interface; the driver core
/// runs the configured authenticators in order after the connection greeting.
#[derive(Clone, Default, Derivative, TypedBuilder)]
#[derivative(Debug, PartialEq)]
#[non_exhaustive]
pub struct Credential {
    /// The username to authenticate with. This applies to all mechanisms but
    /// may be omitted when authenticating via X.509.
    #[builder(default, setter(strip_option))]
    pub username: Option<String>,

    /// The database used to authenticate. This applies to all mechanisms and
    /// defaults to "admin".
    #[builder(default, setter(strip_option))]
    pub source: Option<String>,

    /// The password to authenticate with. This does not apply to all
    /// mechanisms.
    #[builder(default, setter(strip_option))]
    pub password: Option<String>,

    /// The name of the authentication mechanism to negotiate, if
    /// predetermined. When absent, the handshake asks the server which
    /// mechanisms are available for the credential.
    #[builder(default, setter(strip_option))]
    pub mechanism: Option<String>,

    /// The authenticators to run, in order, after the connection greeting.
    #[builder(default)]
    #[derivative(Debug = "ignore", PartialEq = "ignore")]
    pub authenticators: Vec<Arc<dyn Authenticator>>,
}

impl Credential {
    /// The database used to authenticate.
    pub fn resolved_source(&self) -> &str {
        self.source.as_deref().unwrap_or("admin")
    }

    /// If the mechanism is not predetermined, append `saslSupportedMechs` to
    /// the greeting so the server replies with the mechanisms available for
    /// this credential.
    pub(crate) fn append_needed_mechanism_negotiation(&self, command: &mut Document) {
        if let (Some(username), None) = (self.username.as_ref(), self.mechanism.as_ref()) {
            command.insert(
                "saslSupportedMechs",
                format!("{}.{}", self.resolved_source(), username),
            );
        }
    }
}

pub use crate::cmap::establish::Authenticator;

/// Contains the options that can be used to create a new
/// [`Client`](../struct.Client.html).
#[derive(Clone, Default, Derivative, TypedBuilder)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct ClientOptions {
    /// The initial list of seeds that the client should connect to.
    ///
    /// Note that by default, the driver will autodiscover other nodes in the
    /// cluster. To connect directly to a single server (rather than
    /// autodiscovering the rest of the cluster), set the `direct_connection`
    /// field to `true`.
    #[builder(default_code = "vec![ServerAddress::Tcp {
        host: \"localhost\".to_string(),
        port: Some(27017),
    }]")]
    pub hosts: Vec<ServerAddress>,

    /// The application name that the client will send to the server as part
    /// of the handshake. This can be used in combination with the server logs
    /// to determine which client is connected to a server.
    #[builder(default, setter(strip_option))]
    pub app_name: Option<String>,

    /// The compressors that the client is willing to use in the order they
    /// are specified in the configuration. The client sends this list of
    /// compressors to the server. The server responds with the intersection
    /// of its supported list of compressors.
    #[builder(default, setter(strip_option))]
    pub compressors: Option<Vec<Compressor>>,

    /// The connect timeout passed to each underlying TCP stream when
    /// attempting to connect to the server.
    ///
    /// The default value is 10 seconds.
    #[builder(default, setter(strip_option))]
    pub connect_timeout: Option<Duration>,

    /// The credential to use for authenticating connections made by this
    /// client.
    #[builder(default, setter(strip_option))]
    pub credential: Option<Credential>,

    /// Specifies whether the Client should directly connect to a single host
    /// rather than autodiscover all servers in the cluster.
    ///
    /// The default value is false.
    #[builder(default, setter(strip_option))]
    pub direct_connection: Option<bool>,

    /// The amount of time each monitoring thread should wait between sending
    /// a greeting to its respective server.
    ///
    /// The default value is 10 seconds.
    #[builder(default, setter(strip_option))]
    pub heartbeat_freq: Option<Duration>,

    /// Whether or not the client is connecting to a load balancer.
    #[builder(default, setter(strip_option))]
    pub load_balanced: Option<bool>,

    /// The amount of time that a connection can remain idle in a connection
    /// pool before being closed.
    #[builder(default, setter(strip_option))]
    pub max_idle_time: Option<Duration>,

    /// The maximum amount of connections that the Client should allow to be
    /// created in a connection pool for a given server.
    ///
    /// The default value is 10.
    #[builder(default, setter(strip_option))]
    pub max_pool_size: Option<u32>,

    /// The minimum number of connections that should be available in a
    /// server's connection pool at a given time.
    ///
    /// The default value is 0.
    #[builder(default, setter(strip_option))]
    pub min_pool_size: Option<u32>,

    /// The maximum number of new connections that can be created concurrently.
    ///
    /// The default value is 2.
    #[builder(default, setter(strip_option))]
    pub max_connecting: Option<u32>,

    /// The name of the replica set that the Client should connect to.
    #[builder(default, setter(strip_option))]
    pub repl_set_name: Option<String>,

    /// Whether or not the client should retry a read operation if the
    /// operation fails.
    ///
    /// The default value is true.
    #[builder(default, setter(strip_option))]
    pub retry_reads: Option<bool>,

    /// Whether or not the client should retry a write operation if the
    /// operation fails.
    ///
    /// The default value is true.
    #[builder(default, setter(strip_option))]
    pub retry_writes: Option<bool>,

    /// The declared API version for this client.
    #[builder(default, setter(strip_option))]
    pub server_api: Option<ServerApi>,

    /// The amount of time the Client should attempt to select a server for an
    /// operation before timing out.
    ///
    /// The default value is 30 seconds.
    #[builder(default, setter(strip_option))]
    pub server_selection_timeout: Option<Duration>,

    /// The amount of time the driver waits to send or receive wire bytes on a
    /// connection before timing out.
    #[builder(default, setter(strip_option))]
    pub socket_timeout: Option<Duration>,

    /// The TLS configuration for the Client to use in its connections with
    /// the server.
    ///
    /// By default, TLS is disabled.
    #[builder(default, setter(strip_option))]
    pub tls_options: Option<TlsOptions>,

    /// The amount of time a thread should block while waiting to check out a
    /// connection before returning an error.
    #[builder(default, setter(strip_option))]
    pub wait_queue_timeout: Option<Duration>,

    /// The default read concern for operations performed on this client.
    #[builder(default, setter(strip_option))]
    pub read_concern: Option<ReadConcern>,

    /// The default write concern for operations performed on this client.
    #[builder(default, setter(strip_option))]
    pub write_concern: Option<WriteConcern>,

    /// The default selection criteria for operations performed on this client.
    #[builder(default, setter(strip_option))]
    pub selection_criteria: Option<SelectionCriteria>,

    /// The path of a file the topology layer writes its diagnostic log to, in
    /// addition to emitting `tracing` events.
    #[builder(default, setter(strip_option))]
    pub topology_log_path: Option<std::path::PathBuf>,

    /// The factory producing wire-message streams for new connections. The
    /// driver core is transport-agnostic; socket and TLS mechanics live behind
    /// this interface.
    #[builder(default, setter(strip_option))]
    #[derivative(Debug = "ignore")]
    pub stream_factory: Option<Arc<dyn StreamFactory>>,
}

impl ClientOptions {
    pub(crate) fn retry_writes_enabled(&self) -> bool {
        self.retry_writes != Some(false)
    }

    pub(crate) fn retry_reads_enabled(&self) -> bool {
        self.retry_reads != Some(false)
    }

    /// Validates that the options are consistent before they are used to
    /// construct a client.
    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        if self.hosts.is_empty() {
            return Err(crate::error::Error::invalid_argument(
                "the list of hosts cannot be empty",
            ));
        }
        if self.load_balanced == Some(true) {
            if self.hosts.len() > 1 {
                return Err(crate::error::Error::invalid_argument(
                    "cannot specify multiple hosts in load balanced mode",
                ));
            }
            if self.repl_set_name.is_some() {
                return Err(crate::error::Error::invalid_argument(
                    "cannot specify a replica set name in load balanced mode",
                ));
            }
            if self.direct_connection == Some(true) {
                return Err(crate::error::Error::invalid_argument(
                    "cannot specify a direct connection in load balanced mode",
                ));
            }
        }
        if let Some(ref write_concern) = self.write_concern {
            write_concern.validate()?;
        }
        Ok(())
    }
}

/// The type of cursor produced by a find operation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum CursorType {
    /// A cursor that exhausts once all the matching results are returned.
    NonTailable,

    /// A cursor that remains open after all the matching results are returned
    /// and can return new results as they become available.
    Tailable,

    /// A tailable cursor for which the server blocks for a period of time
    /// waiting for new results rather than returning an empty batch.
    TailableAwait,
}

/// Specifies the index to use for an operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Hint {
    /// The name of the index to use.
    Name(String),

    /// A document specifying the keys of the index to use.
    Keys(Document),
}

/// A collation configures how strings are compared for a given operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, TypedBuilder, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Collation {
    /// The ICU locale.
    pub locale: String,

    /// The level of comparison to perform.
    #[builder(default, setter(strip_option))]
    pub strength: Option<i32>,

    /// Whether to include case comparison at strength level 1 or 2.
    #[builder(default, setter(strip_option))]
    pub case_level: Option<bool>,

    /// Whether to compare numeric strings as numbers or as strings.
    #[builder(default, setter(strip_option))]
    pub numeric_ordering: Option<bool>,

    /// Whether strings with diacritics sort from back of the string.
    #[builder(default, setter(strip_option))]
    pub backwards: Option<bool>,
}

/// Specifies the options to a find operation.
///
/// Fields are declared in the order the corresponding command fields are laid
/// out on the wire.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[non_exhaustive]
pub struct FindOptions {
    /// The order of the documents for the purposes of the operation.
    #[builder(default, setter(strip_option))]
    pub sort: Option<Document>,

    /// Limits the fields of the document being returned.
    #[builder(default, setter(strip_option))]
    pub projection: Option<Document>,

    /// The index to use for the operation.
    #[builder(default, setter(strip_option))]
    pub hint: Option<Hint>,

    /// The number of documents to skip before returning.
    #[builder(default, setter(strip_option))]
    pub skip: Option<i64>,

    /// The maximum number of documents to query. If a negative number is
    /// specified, the documents will be returned in a single batch limited in
    /// number by the positive value of the specified limit.
    #[builder(default, setter(strip_option))]
    pub limit: Option<i64>,

    /// The number of documents the server should return per cursor batch.
    ///
    /// Note that this does not have any affect on the documents that are
    /// returned by a cursor, only the number of documents kept in memory at a
    /// given time (and by extension, the number of round trips needed to
    /// return the entire set of documents returned by the query).
    #[builder(default, setter(strip_option))]
    pub batch_size: Option<u32>,

    /// Whether to close the cursor after the first batch regardless of the
    /// remaining results. Implied by a negative limit.
    #[builder(default, setter(strip_option))]
    pub single_batch: Option<bool>,

    /// Tags the query with an arbitrary string to help trace the operation
    /// through the database profiler and logs.
    #[builder(default, setter(strip_option))]
    pub comment: Option<String>,

    /// Maximum number of documents or index keys to scan when executing the
    /// query.
    #[builder(default, setter(strip_option))]
    pub max_scan: Option<i64>,

    /// The maximum amount of time to allow the query to run on the server.
    ///
    /// This is a server-side budget serialized as `maxTimeMS`, not a
    /// client-side deadline.
    #[builder(default, setter(strip_option))]
    pub max_time: Option<Duration>,

    /// The exclusive upper bound for a specific index.
    #[builder(default, setter(strip_option))]
    pub max: Option<Document>,

    /// The inclusive lower bound for a specific index.
    #[builder(default, setter(strip_option))]
    pub min: Option<Document>,

    /// Whether to return only the index keys in the documents.
    #[builder(default, setter(strip_option))]
    pub return_key: Option<bool>,

    /// Whether to return the record identifier for each document.
    #[builder(default, setter(strip_option))]
    pub show_record_id: Option<bool>,

    /// Whether to prevent the cursor from returning a document more than once
    /// because of an intervening write.
    #[builder(default, setter(strip_option))]
    pub snapshot: Option<bool>,

    /// Whether the query should replay the operation log.
    #[builder(default, setter(strip_option))]
    pub oplog_replay: Option<bool>,

    /// The type of cursor to return.
    #[builder(default, setter(strip_option))]
    pub cursor_type: Option<CursorType>,

    /// Whether the server should close the cursor after a period of
    /// inactivity.
    #[builder(default, setter(strip_option))]
    pub no_cursor_timeout: Option<bool>,

    /// Enables writing to temporary files by the server.
    #[builder(default, setter(strip_option))]
    pub allow_disk_use: Option<bool>,

    /// If true, partial results will be returned from a shard router rather
    /// than an error being returned if one or more shards is down.
    #[builder(default, setter(strip_option))]
    pub allow_partial_results: Option<bool>,

    /// The collation to use for the operation.
    #[builder(default, setter(strip_option))]
    pub collation: Option<Collation>,

    /// The read concern to use for this find query.
    ///
    /// If none is specified, the default set on the client will be used.
    #[builder(default, setter(strip_option))]
    pub read_concern: Option<ReadConcern>,

    /// A map of parameter names to values that can be referenced from the
    /// filter via `$$`.
    #[builder(default, setter(strip_option))]
    pub let_vars: Option<Document>,

    /// A legacy modifiers document. Each recognized `$`-prefixed key maps to
    /// the corresponding first-class option; an explicitly-set option always
    /// shadows the modifier value of the same semantic.
    #[builder(default, setter(strip_option))]
    pub modifiers: Option<Document>,

    /// The maximum amount of time for the server to wait on new documents to
    /// satisfy a tailable await cursor query. If the cursor is not a tailable
    /// await cursor, this option is ignored.
    #[builder(default, setter(strip_option))]
    pub max_await_time: Option<Duration>,

    /// The criteria used to select a server for this find query.
    #[builder(default, setter(strip_option))]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Specifies the options to an aggregate operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Enables writing to temporary files by the server.
    #[builder(default, setter(strip_option))]
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server should return per cursor batch.
    #[builder(default, setter(strip_option))]
    pub batch_size: Option<u32>,

    /// Opts out of document-level validation on the output collection.
    #[builder(default, setter(strip_option))]
    pub bypass_document_validation: Option<bool>,

    /// The maximum amount of time to allow the pipeline to run on the server.
    #[builder(default, setter(strip_option))]
    pub max_time: Option<Duration>,

    /// The collation to use for the operation.
    #[builder(default, setter(strip_option))]
    pub collation: Option<Collation>,

    /// The read concern to use for the operation.
    #[builder(default, setter(strip_option))]
    pub read_concern: Option<ReadConcern>,

    /// The write concern to use when the pipeline writes to a collection.
    #[builder(default, setter(strip_option))]
    pub write_concern: Option<WriteConcern>,

    /// The index to use for the operation.
    #[builder(default, setter(strip_option))]
    pub hint: Option<Hint>,

    /// A map of parameter names to values that can be referenced from the
    /// pipeline via `$$`.
    #[builder(default, setter(strip_option))]
    pub let_vars: Option<Document>,

    /// Tags the operation with an arbitrary value to help trace it through
    /// the database profiler and logs.
    #[builder(default, setter(strip_option))]
    pub comment: Option<Bson>,

    /// The maximum amount of time for the server to wait on new documents for
    /// a change-stream style cursor.
    #[builder(default, setter(strip_option))]
    pub max_await_time: Option<Duration>,

    /// The criteria used to select a server for this operation.
    #[builder(default, setter(strip_option))]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Specifies the options to a bulk insert operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct InsertManyOptions {
    /// Opts out of document-level validation.
    #[builder(default, setter(strip_option))]
    pub bypass_document_validation: Option<bool>,

    /// Whether the statements should be applied in order and the operation
    /// should halt at the first per-item error.
    ///
    /// The default value is true.
    #[builder(default, setter(strip_option))]
    pub ordered: Option<bool>,

    /// The write concern for the operation.
    #[builder(default, setter(strip_option))]
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a bulk update operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[non_exhaustive]
pub struct UpdateManyOptions {
    /// Whether the statements should be applied in order and the operation
    /// should halt at the first per-item error.
    ///
    /// The default value is true.
    #[builder(default, setter(strip_option))]
    pub ordered: Option<bool>,

    /// Opts out of document-level validation.
    #[builder(default, setter(strip_option))]
    pub bypass_document_validation: Option<bool>,

    /// A map of parameter names to values that can be referenced from the
    /// update expressions via `$$`.
    #[builder(default, setter(strip_option))]
    pub let_vars: Option<Document>,

    /// The write concern for the operation.
    #[builder(default, setter(strip_option))]
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a bulk delete operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[non_exhaustive]
pub struct DeleteManyOptions {
    /// Whether the statements should be applied in order and the operation
    /// should halt at the first per-item error.
    ///
    /// The default value is true.
    #[builder(default, setter(strip_option))]
    pub ordered: Option<bool>,

    /// A map of parameter names to values that can be referenced from the
    /// filters via `$$`.
    #[builder(default, setter(strip_option))]
    pub let_vars: Option<Document>,

    /// The write concern for the operation.
    #[builder(default, setter(strip_option))]
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a generic run-command operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[non_exhaustive]
pub struct RunCommandOptions {
    /// The criteria used to select a server for this operation.
    #[builder(default, setter(strip_option))]
    pub selection_criteria: Option<SelectionCriteria>,
}
