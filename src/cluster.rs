//! Server and cluster bookkeeping: the server-selection seam, the default
//! fixed-topology selector, and the process-wide cluster registry.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
};

use async_trait::async_trait;
use lazy_static::lazy_static;

use crate::{
    cmap::{
        establish::ConnectionEstablisher,
        options::ConnectionPoolOptions,
        pool::{ConnectionPool, StandardConnectionPool},
    },
    error::{Error, ErrorKind, Result},
    options::{ClientOptions, ServerAddress},
    selection_criteria::SelectionCriteria,
};

/// The type of a server as reported by its greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServerType {
    /// A standalone server. Standalone servers do not track sessions.
    Standalone,

    /// A router to a sharded cluster, i.e. a `stratas` process.
    ShardRouter,

    /// The primary of a replica set.
    RsPrimary,

    /// A secondary of a replica set.
    RsSecondary,

    /// A non-data-bearing member of a replica set.
    RsArbiter,

    /// A hidden or otherwise non-electable member of a replica set.
    RsOther,

    /// A replica set member that has not yet been initialized.
    RsGhost,

    /// A load balancer in front of the cluster. The backend behind it is not
    /// observed directly.
    LoadBalancer,

    /// A server whose type is not yet known.
    Unknown,
}

/// The type of the cluster a client is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopologyType {
    /// A single server, connected to directly.
    Single,

    /// A replica set.
    ReplicaSet,

    /// A sharded cluster of one or more shard routers.
    Sharded,

    /// A cluster behind one or more load balancers.
    LoadBalanced,
}

/// A handle to a specific server: its address plus the lease strategy for its
/// connections. Scoped to one operation (or sub-operation); dropping the
/// handle releases it.
#[derive(Clone)]
pub(crate) struct SelectedServer {
    pub(crate) address: ServerAddress,
    pub(crate) pool: Arc<dyn ConnectionPool>,
}

impl std::fmt::Debug for SelectedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedServer")
            .field("address", &self.address)
            .finish()
    }
}

/// The server-selection interface. Topology monitoring, heartbeating, and the
/// selection policy itself live behind this seam; the driver core only
/// requires that a suitable server be produced for the given criteria.
#[async_trait]
pub(crate) trait ServerSelector: Send + Sync {
    /// Selects a server suitable for the given criteria, suspending until one
    /// is available or the selection timeout elapses.
    async fn select_server(
        &self,
        criteria: Option<&SelectionCriteria>,
    ) -> Result<SelectedServer>;

    /// The type of the cluster this selector observes.
    fn topology_type(&self) -> TopologyType;
}

/// Value-equality over the connection parameters of a cluster. Two sets of
/// client options with the same key share a single live cluster within a
/// registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ClusterKey {
    hosts: Vec<ServerAddress>,
    repl_set_name: Option<String>,
    direct_connection: bool,
    load_balanced: bool,
    app_name: Option<String>,
}

impl ClusterKey {
    fn from_options(options: &ClientOptions) -> Self {
        let mut hosts = options.hosts.clone();
        hosts.sort_by_key(|address| (address.host().to_string(), address.port()));
        Self {
            hosts,
            repl_set_name: options.repl_set_name.clone(),
            direct_connection: options.direct_connection.unwrap_or(false),
            load_balanced: options.load_balanced.unwrap_or(false),
            app_name: options.app_name.clone(),
        }
    }
}

/// A live cluster: one pool per seed and a fixed topology classification.
///
/// This is the default [`ServerSelector`]; deployments with dynamic
/// memberships substitute a monitoring selector behind the same seam.
pub(crate) struct Cluster {
    servers: Vec<SelectedServer>,
    pools: Vec<Arc<StandardConnectionPool>>,
    topology_type: TopologyType,
    next: AtomicUsize,
    closed: AtomicBool,
}

impl Cluster {
    pub(crate) fn new(options: &ClientOptions, establisher: ConnectionEstablisher) -> Self {
        let pool_options = ConnectionPoolOptions::from_client_options(options);
        let pools: Vec<Arc<StandardConnectionPool>> = options
            .hosts
            .iter()
            .map(|address| {
                Arc::new(StandardConnectionPool::new(
                    address.clone(),
                    establisher.clone(),
                    pool_options.clone(),
                ))
            })
            .collect();
        let servers = options
            .hosts
            .iter()
            .zip(pools.iter())
            .map(|(address, pool)| SelectedServer {
                address: address.clone(),
                pool: Arc::clone(pool) as Arc<dyn ConnectionPool>,
            })
            .collect();

        let topology_type = if options.load_balanced.unwrap_or(false) {
            TopologyType::LoadBalanced
        } else if options.repl_set_name.is_some() {
            TopologyType::ReplicaSet
        } else if options.hosts.len() > 1 {
            TopologyType::Sharded
        } else {
            TopologyType::Single
        };

        Self {
            servers,
            pools,
            topology_type,
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn server_matching(&self, criteria: Option<&SelectionCriteria>) -> Option<SelectedServer> {
        match criteria {
            Some(SelectionCriteria::Predicate(predicate)) => self
                .servers
                .iter()
                .find(|server| {
                    predicate(&crate::selection_criteria::ServerInfo {
                        address: server.address.clone(),
                        server_type: ServerType::Unknown,
                    })
                })
                .cloned(),
            // Without monitoring data, read preferences all resolve through
            // rotation over the seed list.
            _ => {
                if self.servers.is_empty() {
                    return None;
                }
                let index = self.next.fetch_add(1, Ordering::SeqCst) % self.servers.len();
                self.servers.get(index).cloned()
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for pool in &self.pools {
            pool.clear(Error::from(ErrorKind::Shutdown));
        }
    }
}

#[async_trait]
impl ServerSelector for Cluster {
    async fn select_server(
        &self,
        criteria: Option<&SelectionCriteria>,
    ) -> Result<SelectedServer> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ErrorKind::Shutdown.into());
        }
        self.server_matching(criteria).ok_or_else(|| {
            ErrorKind::ServerSelection {
                message: format!(
                    "no server in the cluster matches the criteria {:?}",
                    criteria
                ),
            }
            .into()
        })
    }

    fn topology_type(&self) -> TopologyType {
        self.topology_type
    }
}

lazy_static! {
    static ref DEFAULT_REGISTRY: ClusterRegistry = ClusterRegistry::new();
}

/// A process-wide mapping from connection parameters to live clusters.
///
/// Registration, lookup, and disposal are each atomic with respect to one
/// another. The registry is an explicit value owned by the application root;
/// a shared default instance is available for callers that do not manage
/// their own.
pub struct ClusterRegistry {
    clusters: Mutex<HashMap<ClusterKey, Arc<Cluster>>>,
}

impl Default for ClusterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            clusters: Mutex::new(HashMap::new()),
        }
    }

    /// The shared default instance, created at first use and living until
    /// process exit.
    pub fn default_instance() -> &'static ClusterRegistry {
        &DEFAULT_REGISTRY
    }

    pub(crate) fn get_or_create(
        &self,
        options: &ClientOptions,
        establisher: ConnectionEstablisher,
    ) -> Result<Arc<Cluster>> {
        let key = ClusterKey::from_options(options);
        let mut clusters = self
            .clusters
            .lock()
            .map_err(|_| Error::internal("cluster registry lock poisoned"))?;
        if let Some(cluster) = clusters.get(&key) {
            return Ok(Arc::clone(cluster));
        }
        let cluster = Arc::new(Cluster::new(options, establisher));
        clusters.insert(key, Arc::clone(&cluster));
        Ok(cluster)
    }

    /// Removes the cluster for the given options from the registry and tears
    /// it down. Clients still holding the cluster observe shutdown errors on
    /// subsequent selections.
    pub fn dispose(&self, options: &ClientOptions) {
        let key = ClusterKey::from_options(options);
        let removed = match self.clusters.lock() {
            Ok(mut clusters) => clusters.remove(&key),
            Err(_) => None,
        };
        // Tear down outside the registry lock.
        if let Some(cluster) = removed {
            cluster.close();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::util::TestStreamFactory;

    fn options_for(host: &str) -> ClientOptions {
        ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: host.to_string(),
                port: Some(27017),
            }])
            .build()
    }

    fn establisher(options: &ClientOptions) -> ConnectionEstablisher {
        ConnectionEstablisher::new(options, Arc::new(TestStreamFactory))
    }

    #[test]
    fn registry_deduplicates_by_key() {
        let registry = ClusterRegistry::new();
        let options = options_for("a");
        let cluster1 = registry
            .get_or_create(&options, establisher(&options))
            .unwrap();
        let cluster2 = registry
            .get_or_create(&options, establisher(&options))
            .unwrap();
        assert!(Arc::ptr_eq(&cluster1, &cluster2));

        let other = options_for("b");
        let cluster3 = registry.get_or_create(&other, establisher(&other)).unwrap();
        assert!(!Arc::ptr_eq(&cluster1, &cluster3));
    }

    #[tokio::test]
    async fn disposed_cluster_rejects_selection() {
        let registry = ClusterRegistry::new();
        let options = options_for("a");
        let cluster = registry
            .get_or_create(&options, establisher(&options))
            .unwrap();
        registry.dispose(&options);
        let err = cluster.select_server(None).await.unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::Shutdown));

        // a new cluster can be registered for the same key afterwards
        let fresh = registry
            .get_or_create(&options, establisher(&options))
            .unwrap();
        assert!(!Arc::ptr_eq(&cluster, &fresh));
    }
}
