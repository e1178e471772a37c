pub(crate) mod context;
pub(crate) mod executor;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    bson::Document,
    cluster::{ClusterRegistry, ServerSelector, TopologyType},
    cmap::establish::ConnectionEstablisher,
    cursor::Cursor,
    error::{Error, Result},
    operation::{Aggregate, AggregateTarget, Find, RunCommand},
    options::{AggregateOptions, ClientOptions, FindOptions, RunCommandOptions},
    session::{ClientSession, SessionOptions},
    Namespace,
};

/// The entry point to the driver: a handle to a cluster, cheap to clone and
/// safe to share across tasks.
///
/// The `Client` does not own sockets itself; it leases connections from the
/// per-server pools of the cluster it is attached to, executes operations on
/// them, and retries qualifying operations once on failure.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    selector: Arc<dyn ServerSelector>,
    options: ClientOptions,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Client {
    /// Creates a new `Client` connected to the cluster described by the given
    /// options, registering the cluster in the shared default
    /// [`ClusterRegistry`](crate::ClusterRegistry).
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        Self::with_options_and_registry(options, ClusterRegistry::default_instance())
    }

    /// Creates a new `Client`, registering its cluster in the given registry.
    /// Clients built from options with equal connection parameters share one
    /// live cluster per registry.
    pub fn with_options_and_registry(
        options: ClientOptions,
        registry: &ClusterRegistry,
    ) -> Result<Self> {
        options.validate()?;
        let stream_factory = options.stream_factory.clone().ok_or_else(|| {
            Error::invalid_argument(
                "no transport configured: `stream_factory` must be set on the client options",
            )
        })?;
        let establisher = ConnectionEstablisher::new(&options, stream_factory);
        let cluster = registry.get_or_create(&options, establisher)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                selector: cluster,
                options,
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_selector(
        options: ClientOptions,
        selector: Arc<dyn ServerSelector>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                selector,
                options,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub(crate) fn selector(&self) -> &Arc<dyn ServerSelector> {
        &self.inner.selector
    }

    pub(crate) fn is_load_balanced(&self) -> bool {
        self.inner.options.load_balanced.unwrap_or(false)
            || self.inner.selector.topology_type() == TopologyType::LoadBalanced
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Marks this client as shut down; subsequent operations fail immediately.
    /// The underlying cluster is torn down through the registry it was
    /// created in.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
    }

    /// Starts a new session.
    pub fn start_session(&self, options: impl Into<Option<SessionOptions>>) -> ClientSession {
        ClientSession::new(options.into(), false)
    }

    /// Finds the documents in the given namespace matching `filter`.
    pub async fn find<T>(
        &self,
        ns: Namespace,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Cursor<T>> {
        let mut find = Find::new(ns, filter, options.into());
        self.execute_cursor_operation(&mut find).await
    }

    /// Runs an aggregation pipeline over the given target and returns a cursor
    /// over its results.
    pub async fn aggregate<T>(
        &self,
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<Cursor<T>> {
        let mut aggregate = Aggregate::new(target.into(), pipeline, options.into());
        self.execute_cursor_operation(&mut aggregate).await
    }

    /// Runs an aggregation pipeline that materializes its results into a
    /// collection via a trailing `$out` or `$merge` stage.
    pub async fn aggregate_to_collection(
        &self,
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<()> {
        let mut aggregate =
            Aggregate::new_to_collection(target.into(), pipeline, options.into())?;
        self.execute_operation(&mut aggregate, None).await?;
        Ok(())
    }

    /// Runs an arbitrary command against the given database.
    pub async fn run_command(
        &self,
        db: impl Into<String>,
        command: Document,
        options: impl Into<Option<RunCommandOptions>>,
    ) -> Result<Document> {
        let selection_criteria = options.into().and_then(|options| options.selection_criteria);
        let mut op = RunCommand::new(db.into(), command, selection_criteria)?;
        self.execute_operation(&mut op, None).await
    }
}
