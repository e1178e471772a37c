
use lazy_static::lazy_static;

use crate::{
    bson::{doc, Bson, Document},
    cmap::conn::{Command, Connection},
    error::Result,
    hello::{hello_command, HelloReply},
    options::{ClientOptions, Credential, ServerApi},
};

#[derive(Clone, Debug)]
struct ClientMetadata {
    application: Option<AppMetadata>,
    driver: DriverMetadata,
    os: OsMetadata,
    platform: Option<String>,
}

#[derive(Clone, Debug)]
struct AppMetadata {
    name: String,
}

#[derive(Clone, Debug)]
struct DriverMetadata {
    name: String,
    version: String,
}

#[derive(Clone, Debug)]
struct OsMetadata {
    os_type: String,
    name: Option<String>,
    architecture: String,
    version: Option<String>,
}

impl From<ClientMetadata> for Bson {
    fn from(metadata: ClientMetadata) -> Self {
        let mut metadata_doc = Document::new();

        if let Some(application) = metadata.application {
            metadata_doc.insert("application", doc! { "name": application.name });
        }

        metadata_doc.insert(
            "driver",
            doc! {
                "name": metadata.driver.name,
                "version": metadata.driver.version,
            },
        );

        metadata_doc.insert("os", metadata.os);

        if let Some(platform) = metadata.platform {
            metadata_doc.insert("platform", platform);
        }

        Bson::Document(metadata_doc)
    }
}

impl From<OsMetadata> for Bson {
    fn from(metadata: OsMetadata) -> Self {
        let mut doc = doc! { "type": metadata.os_type };

        if let Some(name) = metadata.name {
            doc.insert("name", name);
        }

        doc.insert("architecture", metadata.architecture);

        if let Some(version) = metadata.version {
            doc.insert("version", version);
        }

        Bson::Document(doc)
    }
}

lazy_static! {
    /// Contains the basic handshake information that can be statically
    /// determined. This document (potentially with additional fields added)
    /// can be cloned and put in the `client` field of the greeting command.
    static ref BASE_CLIENT_METADATA: ClientMetadata = ClientMetadata {
        application: None,
        driver: DriverMetadata {
            name: "strata-rust-driver".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        },
        os: OsMetadata {
            os_type: std::env::consts::OS.into(),
            // the release name and version are not observable without host
            // introspection; servers treat the fields as optional
            name: None,
            architecture: std::env::consts::ARCH.into(),
            version: None,
        },
        platform: Some(format!("rust {}", env!("CARGO_PKG_RUST_VERSION"))),
    };
}

/// Options that configure the greeting sent when handshaking a connection.
#[derive(Clone, Debug)]
pub(crate) struct HandshakerOptions {
    app_name: Option<String>,
    compressor_names: Vec<String>,
    server_api: Option<ServerApi>,
    load_balanced: Option<bool>,
}

impl HandshakerOptions {
    pub(crate) fn from_client_options(options: &ClientOptions) -> Self {
        Self {
            app_name: options.app_name.clone(),
            compressor_names: options
                .compressors
                .as_ref()
                .map(|compressors| {
                    compressors
                        .iter()
                        .map(|compressor| compressor.name().to_string())
                        .collect()
                })
                .unwrap_or_default(),
            server_api: options.server_api.clone(),
            load_balanced: options.load_balanced,
        }
    }
}

/// Contains the logic needed to handshake a connection.
#[derive(Clone, Debug)]
pub(crate) struct Handshaker {
    /// The greeting command to send when handshaking. This will always be
    /// identical given the same options, so it can be created at the time the
    /// Handshaker is created.
    command: Command,
}

impl Handshaker {
    /// Creates a new Handshaker.
    pub(crate) fn new(options: HandshakerOptions) -> Self {
        let mut metadata = BASE_CLIENT_METADATA.clone();
        if let Some(app_name) = options.app_name {
            metadata.application = Some(AppMetadata { name: app_name });
        }

        let mut command = hello_command(options.server_api.as_ref(), options.load_balanced, None);
        command.body.insert("client", metadata);
        if !options.compressor_names.is_empty() {
            command.body.insert("compression", options.compressor_names);
        }

        Self { command }
    }

    /// Handshakes a connection: sends the greeting (embedding mechanism
    /// negotiation hints and the speculative authentication round when
    /// applicable) and parses the reply.
    pub(crate) async fn handshake(
        &self,
        conn: &mut Connection,
        credential: Option<&Credential>,
    ) -> Result<HelloReply> {
        let mut command = self.command.clone();

        if let Some(credential) = credential {
            credential.append_needed_mechanism_negotiation(&mut command.body);
            command.target_db = credential.resolved_source().to_string();

            if let Some(first_authenticator) = credential.authenticators.first() {
                if let Some(client_first) =
                    first_authenticator.build_speculative_client_first(credential)
                {
                    command.body.insert("speculativeAuthenticate", client_first);
                }
            }
        }

        let response = conn.send_command(command, None).await?;
        response.into_hello_reply()
    }

    #[cfg(test)]
    pub(crate) fn command(&self) -> &Command {
        &self.command
    }
}
