use tokio_util::sync::CancellationToken;

use crate::{
    cluster::{SelectedServer, ServerSelector},
    cmap::{
        pool::ConnectionPoolExt,
        PinnedConnectionHandle,
        PooledConnection,
        StreamDescription,
    },
    error::{Error, Result},
    selection_criteria::SelectionCriteria,
};

/// The server and connection an operation (or one attempt of it) runs
/// against, together with the caller's retry request and cancellation token.
///
/// The context owns at most one server handle and one connection at a time;
/// replacing either releases the previous one, and dropping the context
/// releases both, on normal and abnormal exits alike.
#[derive(Debug)]
pub(crate) struct OperationContext {
    // declared before `server` so the connection is released first
    connection: Option<PooledConnection>,
    server: Option<SelectedServer>,
    retry_requested: bool,
    cancellation: CancellationToken,
}

impl OperationContext {
    /// Acquires a server and a connection from it. Anything acquired before a
    /// failure (or a cancellation observed between the two acquisitions) is
    /// released before the error is returned.
    pub(crate) async fn new(
        selector: &dyn ServerSelector,
        criteria: Option<&SelectionCriteria>,
        pinned: Option<&PinnedConnectionHandle>,
        retry_requested: bool,
        cancellation: CancellationToken,
    ) -> Result<Self> {
        if let Some(handle) = pinned {
            let connection = handle.take_connection()?;
            return Ok(Self {
                connection: Some(connection),
                server: None,
                retry_requested,
                cancellation,
            });
        }

        let server = selector.select_server(criteria).await?;
        if cancellation.is_cancelled() {
            drop(server);
            return Err(Error::cancelled());
        }
        let connection = match server.pool.checked_out_connection().await {
            Ok(connection) => connection,
            Err(error) => {
                drop(server);
                return Err(error);
            }
        };
        Ok(Self {
            connection: Some(connection),
            server: Some(server),
            retry_requested,
            cancellation,
        })
    }

    pub(crate) fn connection_mut(&mut self) -> Result<&mut PooledConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| Error::internal("operation context has no connection"))
    }

    pub(crate) fn stream_description(&self) -> Result<&StreamDescription> {
        self.connection
            .as_ref()
            .ok_or_else(|| Error::internal("operation context has no connection"))?
            .stream_description()
    }

    pub(crate) fn retry_requested(&self) -> bool {
        self.retry_requested
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Installs a freshly selected server, releasing the previous one.
    pub(crate) fn replace_server(&mut self, new: SelectedServer) {
        self.server = Some(new);
    }

    /// Leases a connection from the currently installed server.
    pub(crate) async fn checkout_connection(&self) -> Result<PooledConnection> {
        let server = self
            .server
            .as_ref()
            .ok_or_else(|| Error::internal("operation context has no server"))?;
        server.pool.checked_out_connection().await
    }

    /// Installs a fresh connection, releasing the previous one to its pool.
    pub(crate) fn replace_connection(&mut self, new: PooledConnection) {
        self.connection = Some(new);
    }
}
