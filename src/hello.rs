use crate::{
    bson::{doc, oid::ObjectId, Document},
    cluster::ServerType,
    cmap::Command,
    options::{ServerAddress, ServerApi},
};
use serde::{Deserialize, Serialize};

/// The legacy version of the `hello` command which was deprecated in 5.0.
/// To limit usages of the legacy name in the codebase, this constant should be
/// used wherever possible.
pub(crate) const LEGACY_HELLO_COMMAND_NAME: &str = "isMaster";
pub(crate) const LEGACY_HELLO_COMMAND_NAME_LOWERCASE: &str = "ismaster";

/// Construct a hello or legacy hello command, depending on the circumstances.
///
/// If an API version is provided or `load_balanced` is true, `hello` will be
/// used. If the server indicated `helloOk: true`, then `hello` will also be
/// used. Otherwise, legacy hello will be used, and if it's unknown whether the
/// server supports hello, the command also will contain `helloOk: true`.
pub(crate) fn hello_command(
    server_api: Option<&ServerApi>,
    load_balanced: Option<bool>,
    hello_ok: Option<bool>,
) -> Command {
    let (mut body, command_name) = if server_api.is_some()
        || matches!(load_balanced, Some(true))
        || matches!(hello_ok, Some(true))
    {
        (doc! { "hello": 1 }, "hello")
    } else {
        let mut body = doc! { LEGACY_HELLO_COMMAND_NAME: 1 };
        if hello_ok.is_none() {
            body.insert("helloOk", true);
        }
        (body, LEGACY_HELLO_COMMAND_NAME)
    };

    if load_balanced == Some(true) {
        body.insert("loadBalanced", true);
    }

    let mut command = Command::new(command_name, "admin", body);
    if let Some(server_api) = server_api {
        command.set_server_api(server_api);
    }
    command
}

#[derive(Debug, Clone)]
pub(crate) struct HelloReply {
    pub(crate) server_address: ServerAddress,
    pub(crate) command_response: HelloCommandResponse,
}

/// The response to a `hello` command.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HelloCommandResponse {
    /// Whether the server is writable. If true, this instance is a primary in
    /// a replica set, a shard router, or a standalone server.
    pub is_writable_primary: Option<bool>,

    #[serde(rename = "ismaster")]
    /// Legacy name for `is_writable_primary`.
    pub is_master: Option<bool>,

    /// Whether or not the server supports using the `hello` command for
    /// monitoring instead of the legacy hello command.
    pub hello_ok: Option<bool>,

    /// An optional message. This contains the value "isdbgrid" when returned
    /// from a shard router.
    pub msg: Option<String>,

    /// The name of the replica set the server belongs to.
    pub set_name: Option<String>,

    /// Whether the server is hidden.
    pub hidden: Option<bool>,

    /// Whether the server is a secondary.
    pub secondary: Option<bool>,

    /// Whether the server is an arbiter.
    pub arbiter_only: Option<bool>,

    #[serde(rename = "isreplicaset")]
    /// Whether the server is a replica set member that has not yet been
    /// initialized.
    pub is_replica_set: Option<bool>,

    /// The time in minutes that a session remains active after its most recent
    /// use.
    pub logical_session_timeout_minutes: Option<i64>,

    /// The minimum wire version that the server supports.
    pub min_wire_version: Option<i32>,

    /// The maximum wire version that the server supports.
    pub max_wire_version: Option<i32>,

    /// A list of SASL mechanisms available for the user's credential.
    pub sasl_supported_mechs: Option<Vec<String>>,

    /// The reply to speculative authentication done in the authentication
    /// handshake.
    pub speculative_authenticate: Option<Document>,

    /// The maximum permitted size of a document in bytes.
    #[serde(default = "max_bson_object_size_default")]
    pub max_bson_object_size: i64,

    /// The maximum number of write operations permitted in a write batch.
    pub max_write_batch_size: Option<i64>,

    /// The maximum permitted size of a wire protocol message.
    #[serde(default = "max_message_size_default")]
    pub max_message_size_bytes: i32,

    /// If the connection is to a load balancer, the id of the selected
    /// backend.
    pub service_id: Option<ObjectId>,

    /// The server-generated ID for the connection the hello command was run
    /// on.
    pub connection_id: Option<i64>,
}

fn max_bson_object_size_default() -> i64 {
    16 * 1024 * 1024
}

fn max_message_size_default() -> i32 {
    48_000_000
}

impl HelloCommandResponse {
    pub(crate) fn server_type(&self) -> ServerType {
        if self.msg.as_deref() == Some("isdbgrid") {
            ServerType::ShardRouter
        } else if self.set_name.is_some() {
            if self.hidden == Some(true) {
                ServerType::RsOther
            } else if self.is_writable_primary == Some(true) || self.is_master == Some(true) {
                ServerType::RsPrimary
            } else if self.secondary == Some(true) {
                ServerType::RsSecondary
            } else if self.arbiter_only == Some(true) {
                ServerType::RsArbiter
            } else {
                ServerType::RsOther
            }
        } else if self.is_replica_set == Some(true) {
            ServerType::RsGhost
        } else {
            ServerType::Standalone
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::options::ServerApiVersion;

    #[test]
    fn legacy_hello_used_without_api_version() {
        let command = hello_command(None, None, None);
        assert_eq!(command.name, LEGACY_HELLO_COMMAND_NAME);
        assert_eq!(command.body.get_i32(LEGACY_HELLO_COMMAND_NAME), Ok(1));
        assert_eq!(command.body.get_bool("helloOk"), Ok(true));
    }

    #[test]
    fn hello_used_with_api_version_or_load_balancing() {
        let api = ServerApi::builder().version(ServerApiVersion::V1).build();
        let command = hello_command(Some(&api), None, None);
        assert_eq!(command.name, "hello");

        let command = hello_command(None, Some(true), None);
        assert_eq!(command.name, "hello");
        assert_eq!(command.body.get_bool("loadBalanced"), Ok(true));
    }

    #[test]
    fn server_type_derivation() {
        let mut response = HelloCommandResponse {
            msg: Some("isdbgrid".to_string()),
            ..Default::default()
        };
        assert_eq!(response.server_type(), ServerType::ShardRouter);

        response.msg = None;
        response.set_name = Some("rs0".to_string());
        response.is_writable_primary = Some(true);
        assert_eq!(response.server_type(), ServerType::RsPrimary);

        response.is_writable_primary = None;
        response.secondary = Some(true);
        assert_eq!(response.server_type(), ServerType::RsSecondary);

        response.set_name = None;
        response.secondary = None;
        assert_eq!(response.server_type(), ServerType::Standalone);
    }
}
