use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::wire::Message;
use crate::{
    bson::{doc, Document, RawDocumentBuf, Timestamp},
    error::{Error, ErrorKind, Result},
    hello::{HelloCommandResponse, HelloReply},
    operation::{CommandErrorBody, CommandResponse},
    options::{ReadPreference, ServerAddress, ServerApi},
    session::ClientSession,
};

/// Driver-side model of a database command.
///
/// Serializes to the final wire document: the command body first, followed by
/// the driver-managed fields (`$db`, session id, transaction number, and so
/// on).
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Command {
    #[serde(skip)]
    pub(crate) name: String,

    #[serde(flatten)]
    pub(crate) body: Document,

    #[serde(rename = "$db")]
    pub(crate) target_db: String,

    pub(crate) lsid: Option<Document>,

    #[serde(flatten)]
    server_api: Option<ServerApi>,

    #[serde(rename = "$readPreference")]
    read_preference: Option<ReadPreference>,

    pub(crate) txn_number: Option<i64>,
}

impl Command {
    pub(crate) fn new(
        name: impl ToString,
        target_db: impl ToString,
        body: Document,
    ) -> Self {
        Self {
            name: name.to_string(),
            target_db: target_db.to_string(),
            body,
            lsid: None,
            server_api: None,
            read_preference: None,
            txn_number: None,
        }
    }

    pub(crate) fn set_session(&mut self, session: &ClientSession) {
        self.lsid = Some(session.id().clone())
    }

    pub(crate) fn set_txn_number(&mut self, txn_number: i64) {
        self.txn_number = Some(txn_number);
    }

    pub(crate) fn set_server_api(&mut self, server_api: &ServerApi) {
        self.server_api = Some(server_api.clone());
    }

    pub(crate) fn set_read_preference(&mut self, read_preference: ReadPreference) {
        self.read_preference = Some(read_preference);
    }

    /// Sets the read concern level for this command to "snapshot", tying it to
    /// the session's snapshot time when one has been established.
    pub(crate) fn set_snapshot_read_concern(&mut self, session: &ClientSession) {
        let mut read_concern = doc! { "level": "snapshot" };
        if let Some(at_cluster_time) = session.snapshot_time {
            read_concern.insert("atClusterTime", at_cluster_time);
        }
        self.body.insert("readConcern", read_concern);
    }

    /// Sets `readConcern.afterClusterTime` to the session's highest observed
    /// operation time, preserving any level already present in the body.
    pub(crate) fn set_after_cluster_time(&mut self, session: &ClientSession) {
        let operation_time = match session.operation_time {
            Some(operation_time) => operation_time,
            None => return,
        };
        match self.body.get_document_mut("readConcern") {
            Ok(read_concern) => {
                read_concern.insert("afterClusterTime", operation_time);
            }
            Err(_) => {
                self.body
                    .insert("readConcern", doc! { "afterClusterTime": operation_time });
            }
        }
    }

    /// Removes the write concern from the command body. Commands executed
    /// inside a transaction inherit the transaction's write concern instead.
    pub(crate) fn clear_write_concern(&mut self) {
        self.body.remove("writeConcern");
    }

    pub(crate) fn into_message(self) -> Result<Message> {
        Message::from_command(self)
    }
}

/// A server response to an executed command, as raw bytes.
#[derive(Debug, Clone)]
pub(crate) struct RawCommandResponse {
    pub(crate) source: ServerAddress,
    raw: RawDocumentBuf,
}

impl RawCommandResponse {
    pub(crate) fn new(source: ServerAddress, message: Message) -> Self {
        Self {
            source,
            raw: message.document_payload,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_document_and_address(source: ServerAddress, doc: Document) -> Result<Self> {
        let mut raw = vec![];
        doc.to_writer(&mut raw)?;
        Ok(Self {
            source,
            raw: RawDocumentBuf::from_bytes(raw)?,
        })
    }

    /// Deserialize the body of this response.
    pub(crate) fn body<'a, T: Deserialize<'a>>(&'a self) -> Result<T> {
        crate::bson::from_slice(self.raw.as_bytes()).map_err(|e| {
            Error::from(ErrorKind::InvalidResponse {
                message: format!("{}", e),
            })
        })
    }

    pub(crate) fn raw_body(&self) -> &crate::bson::RawDocument {
        &self.raw
    }

    /// Deserialize the body of this response, returning an authentication
    /// error if it fails.
    #[allow(dead_code)]
    pub(crate) fn auth_response_body<T: serde::de::DeserializeOwned>(
        &self,
        mechanism_name: &str,
    ) -> Result<T> {
        self.body()
            .map_err(|_| Error::authentication_error(mechanism_name, "invalid server response"))
    }

    pub(crate) fn into_hello_reply(self) -> Result<HelloReply> {
        match self.body::<CommandResponse<HelloCommandResponse>>() {
            Ok(response) if response.is_success() => Ok(HelloReply {
                server_address: self.source.clone(),
                command_response: response.body,
            }),
            _ => match self.body::<CommandResponse<CommandErrorBody>>() {
                Ok(command_error_body) => Err(Error::new(
                    ErrorKind::Command(command_error_body.body.command_error),
                    command_error_body.body.error_labels,
                )),
                Err(_) => Err(ErrorKind::InvalidResponse {
                    message: "invalid server response to hello command".into(),
                }
                .into()),
            },
        }
    }

    /// The operation time reported by the server in this response, if any.
    pub(crate) fn operation_time(&self) -> Result<Option<Timestamp>> {
        Ok(self
            .raw
            .get("operationTime")?
            .and_then(crate::bson::RawBsonRef::as_timestamp))
    }
}
