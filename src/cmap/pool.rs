use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
        Mutex,
    },
};

use async_trait::async_trait;

use super::{
    conn::{Connection, PooledConnection},
    establish::ConnectionEstablisher,
    options::ConnectionPoolOptions,
};
use crate::{
    error::{Error, Result},
    options::ServerAddress,
    trace,
};

/// A lease strategy for connections to a single server. Checkout suspends
/// while a connection is established or awaited; check-in is synchronous so
/// that it can run from `Drop`.
#[async_trait]
pub(crate) trait ConnectionPool: Send + Sync {
    /// Leases a connection from the pool, establishing a new one if none are
    /// available.
    async fn check_out(&self) -> Result<Connection>;

    /// Returns a connection to the pool.
    fn check_in(&self, conn: Connection);

    /// The address of the server this pool leases connections to.
    fn address(&self) -> &ServerAddress;
}

#[async_trait]
pub(crate) trait ConnectionPoolExt {
    /// Leases a connection and wraps it so that dropping the lease returns it
    /// here.
    async fn checked_out_connection(&self) -> Result<PooledConnection>;
}

#[async_trait]
impl ConnectionPoolExt for Arc<dyn ConnectionPool> {
    async fn checked_out_connection(&self) -> Result<PooledConnection> {
        let conn = self.check_out().await?;
        Ok(PooledConnection::new(conn, Arc::clone(self)))
    }
}

/// The default pool implementation: a FIFO queue of idle connections,
/// replenished on demand through the connection establisher.
pub(crate) struct StandardConnectionPool {
    address: ServerAddress,
    establisher: ConnectionEstablisher,
    options: ConnectionPoolOptions,
    available: Mutex<VecDeque<(Connection, std::time::Instant)>>,
    next_id: AtomicU32,
    generation: AtomicU32,
    /// The error that paused the pool, when it is paused.
    pause_cause: Mutex<Option<Error>>,
}

impl StandardConnectionPool {
    pub(crate) fn new(
        address: ServerAddress,
        establisher: ConnectionEstablisher,
        options: ConnectionPoolOptions,
    ) -> Self {
        Self {
            address,
            establisher,
            options,
            available: Mutex::new(VecDeque::new()),
            next_id: AtomicU32::new(1),
            generation: AtomicU32::new(0),
            pause_cause: Mutex::new(None),
        }
    }

    /// Pauses the pool and discards idle connections. Checkouts fail with a
    /// pool-cleared error until the pool is marked ready again.
    pub(crate) fn clear(&self, cause: Error) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut available) = self.available.lock() {
            available.clear();
        }
        trace::pool_cleared(&self.address, &cause);
        if let Ok(mut pause_cause) = self.pause_cause.lock() {
            *pause_cause = Some(cause);
        }
    }

    /// Marks a paused pool as ready again.
    pub(crate) fn mark_ready(&self) {
        if let Ok(mut pause_cause) = self.pause_cause.lock() {
            *pause_cause = None;
        }
    }

    fn paused_error(&self) -> Option<Error> {
        let pause_cause = self.pause_cause.lock().ok()?;
        pause_cause
            .as_ref()
            .map(|cause| Error::pool_cleared_error(&self.address, cause))
    }

    fn pop_available(&self) -> Option<Connection> {
        let mut available = self.available.lock().ok()?;
        let generation = self.generation.load(Ordering::SeqCst);
        // Drop stale-generation and idle connections rather than handing them
        // out.
        while let Some((conn, checked_in_at)) = available.pop_front() {
            if conn.generation != generation {
                trace::connection_closed(&conn, "stale generation");
                continue;
            }
            let idle = self
                .options
                .max_idle_time
                .map_or(false, |max_idle_time| checked_in_at.elapsed() >= max_idle_time);
            if idle {
                trace::connection_closed(&conn, "idle");
                continue;
            }
            return Some(conn);
        }
        None
    }
}

#[async_trait]
impl ConnectionPool for StandardConnectionPool {
    async fn check_out(&self) -> Result<Connection> {
        if let Some(error) = self.paused_error() {
            return Err(error);
        }

        if let Some(conn) = self.pop_available() {
            return Ok(conn);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        self.establisher
            .establish_connection(
                self.address.clone(),
                id,
                generation,
                self.options.credential.as_ref(),
            )
            .await
    }

    fn check_in(&self, conn: Connection) {
        let generation = self.generation.load(Ordering::SeqCst);
        if conn.generation != generation {
            trace::connection_closed(&conn, "stale generation");
            return;
        }
        if let Ok(mut available) = self.available.lock() {
            available.push_back((conn, std::time::Instant::now()));
        }
    }

    fn address(&self) -> &ServerAddress {
        &self.address
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::{
        cmap::establish::ConnectionEstablisher,
        error::ErrorKind,
        options::{ClientOptions, ServerAddress},
        test::util::TestStreamFactory,
    };

    fn pool() -> StandardConnectionPool {
        let options = ClientOptions::default();
        let establisher = ConnectionEstablisher::new(&options, Arc::new(TestStreamFactory));
        StandardConnectionPool::new(
            ServerAddress::default(),
            establisher,
            ConnectionPoolOptions::default(),
        )
    }

    #[tokio::test]
    async fn checkout_establishes_and_reuses_connections() {
        let pool = pool();
        let conn = pool.check_out().await.unwrap();
        let id = conn.id;
        pool.check_in(conn);

        let conn = pool.check_out().await.unwrap();
        assert_eq!(conn.id, id);
    }

    #[tokio::test]
    async fn paused_pool_rejects_checkouts() {
        let pool = pool();
        let conn = pool.check_out().await.unwrap();
        let stale_id = conn.id;
        pool.check_in(conn);

        let cause = Error::from(ErrorKind::from(std::io::ErrorKind::ConnectionReset));
        pool.clear(cause);

        let error = pool.check_out().await.unwrap_err();
        assert!(error.is_pool_cleared());

        // once ready again, connections from the cleared generation are gone
        pool.mark_ready();
        let conn = pool.check_out().await.unwrap();
        assert_ne!(conn.id, stale_id);
    }
}
