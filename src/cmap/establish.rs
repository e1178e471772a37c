pub(crate) mod handshake;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use self::handshake::{Handshaker, HandshakerOptions};
use super::conn::{stream::MessageStream, stream::StreamFactory, Command, Connection};
use crate::{
    bson::{doc, Document},
    bson_util,
    error::{ErrorKind, Result},
    options::{ClientOptions, Credential, ServerAddress},
    trace,
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An authentication mechanism, run against a connection after the greeting.
///
/// Mechanism implementations (SCRAM, X.509, and so on) live outside the driver
/// core; the handshake runs the configured authenticators in order, handing
/// each the mechanism negotiation results from the greeting.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// The name of this mechanism, e.g. "SCRAM-SHA-256".
    fn mechanism(&self) -> &str;

    /// A document to embed in the greeting as `speculativeAuthenticate`,
    /// allowing the mechanism's first round trip to piggyback on the greeting.
    fn build_speculative_client_first(&self, _credential: &Credential) -> Option<Document> {
        None
    }

    /// Runs the mechanism's conversation over the freshly-greeted stream.
    ///
    /// `sasl_supported_mechs` carries the server's advertised mechanisms for
    /// the credential, when negotiation was requested; `speculative_reply` is
    /// the server's response to `build_speculative_client_first`, when one was
    /// sent and answered.
    async fn authenticate(
        &self,
        stream: &mut dyn MessageStream,
        credential: &Credential,
        sasl_supported_mechs: Option<&[String]>,
        speculative_reply: Option<Document>,
    ) -> Result<()>;
}

/// Contains the logic to establish a connection: opening the stream,
/// greeting the server, authenticating, and reconciling the server-assigned
/// connection id.
#[derive(Clone)]
pub(crate) struct ConnectionEstablisher {
    handshaker: Handshaker,
    stream_factory: Arc<dyn StreamFactory>,
    connect_timeout: Duration,
    load_balanced: bool,
}

impl ConnectionEstablisher {
    /// Creates a new ConnectionEstablisher from the given options.
    pub(crate) fn new(
        options: &ClientOptions,
        stream_factory: Arc<dyn StreamFactory>,
    ) -> Self {
        let handshaker = Handshaker::new(HandshakerOptions::from_client_options(options));
        let connect_timeout = match options.connect_timeout {
            Some(timeout) if timeout.is_zero() => Duration::MAX,
            Some(timeout) => timeout,
            None => DEFAULT_CONNECT_TIMEOUT,
        };
        Self {
            handshaker,
            stream_factory,
            connect_timeout,
            load_balanced: options.load_balanced.unwrap_or(false),
        }
    }

    async fn make_stream(&self, address: &ServerAddress) -> Result<Box<dyn MessageStream>> {
        tokio::time::timeout(self.connect_timeout, self.stream_factory.connect(address))
            .await
            .map_err(|_| {
                ErrorKind::from(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("timed out connecting to {}", address),
                ))
            })?
    }

    /// Establishes a connection. A failure of the greeting or of any
    /// authenticator discards the connection; a failure to learn the
    /// server-assigned connection id does not.
    pub(crate) async fn establish_connection(
        &self,
        address: ServerAddress,
        id: u32,
        generation: u32,
        credential: Option<&Credential>,
    ) -> Result<Connection> {
        let stream = self.make_stream(&address).await?;

        let mut connection = Connection::new(id, address, generation, stream);
        let hello_reply = self
            .handshaker
            .handshake(&mut connection, credential)
            .await?;

        // If load balancing was requested, the reply must carry a service id;
        // a server that does not reply with one does not support this mode.
        if self.load_balanced && hello_reply.command_response.service_id.is_none() {
            return Err(ErrorKind::IncompatibleServer {
                message: "Driver attempted to initialize in load balancing mode, but the server \
                          does not support this mode."
                    .to_string(),
            }
            .into());
        }

        if let Some(credential) = credential {
            let mut speculative_reply = hello_reply
                .command_response
                .speculative_authenticate
                .clone();
            let sasl_supported_mechs =
                hello_reply.command_response.sasl_supported_mechs.clone();
            for authenticator in &credential.authenticators {
                authenticator
                    .authenticate(
                        connection.stream_mut(),
                        credential,
                        sasl_supported_mechs.as_deref(),
                        // Only the mechanism that produced the speculative
                        // client-first consumes the server's reply to it.
                        speculative_reply.take(),
                    )
                    .await?;
            }
        }

        let mut server_id = hello_reply.command_response.connection_id;
        if server_id.is_none() {
            server_id = self.fetch_legacy_connection_id(&mut connection).await;
        }

        let mut description =
            super::conn::StreamDescription::from_hello_reply(&hello_reply, self.load_balanced);
        description.server_connection_id = server_id;
        connection.server_id = server_id;
        connection.stream_description = Some(description);

        Ok(connection)
    }

    /// Best-effort retrieval of the server-assigned connection id from servers
    /// that predate reporting it in the greeting. Failure leaves the
    /// connection usable with only its local id.
    async fn fetch_legacy_connection_id(&self, connection: &mut Connection) -> Option<i64> {
        let command = Command::new("getLastError", "admin", doc! { "getLastError": 1 });
        let response = match connection.send_command(command, None).await {
            Ok(response) => response,
            Err(error) => {
                trace::connection_id_fetch_failed(connection, &error);
                return None;
            }
        };
        response
            .body::<Document>()
            .ok()
            .and_then(|body| body.get("connectionId").and_then(bson_util::get_int))
    }
}
