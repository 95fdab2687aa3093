//! Bounded per-replica connection pools and the address-keyed pool set that
//! is republished on every topology change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::RouterError;
use crate::topology::ChunkServer;
use crate::wire::FramedConn;

/// Reusable framed connections to one replica, bounded by capacity.
///
/// `capacity` bounds the total connections outstanding (idle plus borrowed).
/// At capacity, `get` fails fast rather than queueing; the caller reports it
/// as a replica-level failure.
#[derive(Debug)]
pub struct ConnectionPool {
    addr: String,
    capacity: usize,
    connect_timeout: Duration,
    idle: Mutex<Vec<FramedConn>>,
    live: AtomicUsize,
}

impl ConnectionPool {
    /// Creates an empty pool for the replica at `addr`.
    pub fn new(addr: impl Into<String>, capacity: usize, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            capacity: capacity.max(1),
            connect_timeout,
            idle: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
        }
    }

    /// Borrows a connection: an idle one if available, a fresh dial while
    /// under capacity, an error otherwise.
    pub async fn get(&self) -> Result<FramedConn, RouterError> {
        if let Some(conn) = self.idle.lock().pop() {
            return Ok(conn);
        }

        let mut live = self.live.load(Ordering::Acquire);
        loop {
            if live >= self.capacity {
                return Err(RouterError::PoolExhausted {
                    addr: self.addr.clone(),
                    capacity: self.capacity,
                });
            }
            match self.live.compare_exchange(
                live,
                live + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => live = actual,
            }
        }

        match FramedConn::connect(&self.addr, self.connect_timeout).await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                Err(RouterError::ReplicaIo {
                    addr: self.addr.clone(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Returns a borrowed connection. Connections flagged closed are dropped
    /// and their capacity slot freed; healthy ones go back to the idle list.
    pub fn release(&self, conn: FramedConn) {
        if conn.is_closed() {
            self.live.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        self.idle.lock().push(conn);
    }

    /// Drops every idle connection, freeing their capacity slots. Borrowed
    /// connections are untouched; their holders release or close them later.
    ///
    /// Used both to reconcile after a peer disconnect (idle siblings of a
    /// torn connection are suspect) and to drain a pool whose replica left
    /// the topology.
    pub fn close_idle(&self) -> usize {
        let drained = std::mem::take(&mut *self.idle.lock());
        let count = drained.len();
        if count > 0 {
            self.live.fetch_sub(count, Ordering::AcqRel);
            debug!(addr = %self.addr, count, "dropped idle replica connections");
        }
        count
    }

    /// Replica address this pool dials.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Idle connections currently parked in the pool.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Connections outstanding, idle and borrowed combined.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// All replica pools, keyed by `"host:port"`.
///
/// The set itself is immutable once published; topology changes build a new
/// set (carrying unaffected pools over by `Arc`) and swap it in atomically.
#[derive(Debug, Default)]
pub struct PoolSet {
    pools: HashMap<String, Arc<ConnectionPool>>,
}

impl PoolSet {
    /// Registers a fresh pool for the replica unless its address already has
    /// one; replicas sharing an address share a pool.
    pub fn add_pool(&mut self, server: &ChunkServer, capacity: usize, connect_timeout: Duration) {
        self.pools
            .entry(server.addr_key())
            .or_insert_with(|| Arc::new(ConnectionPool::new(server.addr_key(), capacity, connect_timeout)));
    }

    /// Carries an existing pool into this set during reconfiguration.
    pub fn add_existing(&mut self, key: String, pool: Arc<ConnectionPool>) {
        self.pools.insert(key, pool);
    }

    /// Removes the replica's pool, returning it so the caller can drain it
    /// after the new set has been published.
    pub fn remove_pool(&mut self, server: &ChunkServer) -> Option<Arc<ConnectionPool>> {
        self.pools.remove(&server.addr_key())
    }

    /// Pool registered for the `"host:port"` key, if any.
    #[must_use]
    pub fn get(&self, addr_key: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.get(addr_key).cloned()
    }

    /// Iterates over `(addr key, pool)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<ConnectionPool>)> {
        self.pools.iter()
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether the set holds no pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
