//! This crate contains the core operation-execution subsystem of the Rust
//! driver for StrataDB, a document-oriented clustered database. It accepts
//! high-level requests (find, aggregate, bulk writes), selects a server and
//! connection from a cluster, assembles the wire-format command document,
//! executes it, and for qualifying write operations performs a single retry
//! with at-most-once semantics on the server.
//!
//! To connect to a deployment, construct [`ClientOptions`](options/struct.ClientOptions.html)
//! and pass them to `Client::with_options`:
//!
//! ```no_run
//! # use stratadb::{Client, error::Result, options::{ClientOptions, ServerAddress}};
//! # fn make_client() -> Result<Client> {
//! let options = ClientOptions::builder()
//!     .hosts(vec![ServerAddress::Tcp {
//!         host: "localhost".to_string(),
//!         port: Some(27017),
//!     }])
//!     .build();
//! let client = Client::with_options(options)?;
//! # Ok(client)
//! # }
//! ```

pub use bson;

mod bson_util;
mod bulk;
mod client;
mod cluster;
mod cmap;
pub mod concern;
mod cursor;
pub mod error;
mod hello;
mod namespace;
mod operation;
pub mod options;
pub mod results;
mod selection_criteria;
mod serde_util;
mod session;
pub mod sync;
mod trace;

#[cfg(test)]
mod test;

pub use crate::{
    client::Client,
    cluster::{ClusterRegistry, ServerType, TopologyType},
    cursor::Cursor,
    namespace::Namespace,
    session::{ClientSession, SessionOptions},
};
pub use bulk::{DeleteRequest, UpdateRequest};
pub use operation::aggregate::AggregateTarget;
