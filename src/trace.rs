//! `tracing` event emission for commands and connections.

use std::collections::HashSet;

use lazy_static::lazy_static;

use crate::{
    bson::Bson,
    cmap::Connection,
    error::Error,
    hello::LEGACY_HELLO_COMMAND_NAME_LOWERCASE,
    options::ServerAddress,
};

pub(crate) const COMMAND_TRACING_EVENT_TARGET: &str = "stratadb::command";
pub(crate) const CONNECTION_TRACING_EVENT_TARGET: &str = "stratadb::connection";

/// The default maximum length of the rendered command/reply attached to a
/// tracing event.
pub(crate) const DEFAULT_MAX_DOCUMENT_LENGTH_BYTES: usize = 1000;

lazy_static! {
    /// Commands whose bodies and replies are never attached to tracing events.
    pub(crate) static ref REDACTED_COMMANDS: HashSet<&'static str> = {
        let mut hash_set = HashSet::new();
        hash_set.insert("authenticate");
        hash_set.insert("saslstart");
        hash_set.insert("saslcontinue");
        hash_set.insert("getnonce");
        hash_set.insert("createuser");
        hash_set.insert("updateuser");
        hash_set
    };
    pub(crate) static ref HELLO_COMMAND_NAMES: HashSet<&'static str> = {
        let mut hash_set = HashSet::new();
        hash_set.insert("hello");
        hash_set.insert(LEGACY_HELLO_COMMAND_NAME_LOWERCASE);
        hash_set
    };
}

/// Whether events for the given command should have their bodies redacted. A
/// greeting carrying a speculative authentication exchange is as sensitive as
/// the authentication commands themselves.
pub(crate) fn should_redact(command_name: &str, body: &crate::bson::Document) -> bool {
    let lower = command_name.to_lowercase();
    REDACTED_COMMANDS.contains(lower.as_str())
        || (HELLO_COMMAND_NAMES.contains(lower.as_str())
            && body.contains_key("speculativeAuthenticate"))
}

/// Renders a document for a tracing event, truncating it to the given length.
pub(crate) fn truncated_json(doc: &crate::bson::Document, max_length: usize) -> String {
    let mut rendered = Bson::Document(doc.clone()).into_relaxed_extjson().to_string();
    if rendered.len() > max_length {
        let mut end = max_length;
        while end < rendered.len() && !rendered.is_char_boundary(end) {
            end += 1;
        }
        rendered.truncate(end);
        rendered.push_str("...");
    }
    rendered
}

pub(crate) fn command_started(
    command_name: &str,
    request_id: i32,
    target_db: &str,
    body: &crate::bson::Document,
    conn: &Connection,
) {
    let rendered = if should_redact(command_name, body) {
        "{}".to_string()
    } else {
        truncated_json(body, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES)
    };
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        command_name,
        request_id,
        database_name = target_db,
        driver_connection_id = conn.id,
        server_connection_id = conn.server_id,
        server_host = conn.address().host(),
        server_port = conn.address().port(),
        command = rendered.as_str(),
        "Command started"
    );
}

pub(crate) fn command_succeeded(
    command_name: &str,
    request_id: i32,
    duration: std::time::Duration,
    reply: Option<&crate::bson::Document>,
    conn: &Connection,
) {
    let rendered = match reply {
        Some(reply) if !should_redact(command_name, reply) => {
            truncated_json(reply, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES)
        }
        _ => "{}".to_string(),
    };
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        command_name,
        request_id,
        duration_ms = duration.as_millis() as u64,
        driver_connection_id = conn.id,
        server_connection_id = conn.server_id,
        server_host = conn.address().host(),
        server_port = conn.address().port(),
        reply = rendered.as_str(),
        "Command succeeded"
    );
}

pub(crate) fn command_failed(
    command_name: &str,
    request_id: i32,
    duration: std::time::Duration,
    failure: &Error,
    conn: &Connection,
) {
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        command_name,
        request_id,
        duration_ms = duration.as_millis() as u64,
        driver_connection_id = conn.id,
        server_connection_id = conn.server_id,
        server_host = conn.address().host(),
        server_port = conn.address().port(),
        failure = failure.to_string().as_str(),
        "Command failed"
    );
}

pub(crate) fn connection_closed(conn: &Connection, reason: &str) {
    tracing::debug!(
        target: CONNECTION_TRACING_EVENT_TARGET,
        driver_connection_id = conn.id,
        server_connection_id = conn.server_id,
        server_host = conn.address().host(),
        server_port = conn.address().port(),
        reason,
        "Connection closed"
    );
}

pub(crate) fn connection_id_fetch_failed(conn: &Connection, error: &Error) {
    tracing::debug!(
        target: CONNECTION_TRACING_EVENT_TARGET,
        driver_connection_id = conn.id,
        server_host = conn.address().host(),
        server_port = conn.address().port(),
        failure = error.to_string().as_str(),
        "Unable to retrieve the server-assigned connection id"
    );
}

pub(crate) fn pool_cleared(address: &ServerAddress, cause: &Error) {
    tracing::debug!(
        target: CONNECTION_TRACING_EVENT_TARGET,
        server_host = address.host(),
        server_port = address.port(),
        cause = cause.to_string().as_str(),
        "Connection pool cleared"
    );
}
