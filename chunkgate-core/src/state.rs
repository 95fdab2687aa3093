//! Shared cluster state: one mutex guards a single snapshot pointer so every
//! reader observes a coherent `(pools, groups)` pair, and every topology
//! change publishes a freshly built pair with one swap.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::pool::PoolSet;
use crate::topology::{diff_servers, ChunkServerGroups};

/// A coherent view of the cluster taken at one instant. In-flight requests
/// keep using the snapshot they started with; new requests see the latest.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// Connection pools keyed by replica address.
    pub pools: Arc<PoolSet>,
    /// Replica groups keyed by group id.
    pub groups: Arc<ChunkServerGroups>,
}

/// Holder of the current snapshot. The mutex is held only for the pointer
/// read or swap, never across I/O; all pool surgery happens on locally built
/// sets before publication.
#[derive(Debug, Default)]
pub struct ClusterState {
    current: Mutex<Arc<ClusterSnapshot>>,
}

impl ClusterState {
    /// Creates a state with an empty topology and no pools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.current.lock().clone()
    }

    /// Publishes new groups while keeping the existing pools.
    pub fn publish_groups(&self, groups: Arc<ChunkServerGroups>) {
        let mut current = self.current.lock();
        *current = Arc::new(ClusterSnapshot {
            pools: current.pools.clone(),
            groups,
        });
    }

    /// Publishes a new `(pools, groups)` pair atomically.
    pub fn publish(&self, pools: Arc<PoolSet>, groups: Arc<ChunkServerGroups>) {
        *self.current.lock() = Arc::new(ClusterSnapshot { pools, groups });
    }

    /// Applies a freshly polled topology.
    ///
    /// When the replica set is unchanged (by address), only the group map is
    /// republished. Otherwise a new pool set is built from the old one minus
    /// removed replicas plus added ones, the pair is published, and only then
    /// are the removed replicas' pools drained of idle connections; borrowers
    /// that obtained a connection from the old snapshot finish undisturbed.
    pub fn apply_route(
        &self,
        new_groups: ChunkServerGroups,
        pool_capacity: usize,
        connect_timeout: Duration,
    ) {
        let old = self.snapshot();
        let (added, removed) = diff_servers(&new_groups, &old.groups);

        if added.is_empty() && removed.is_empty() {
            self.publish_groups(Arc::new(new_groups));
            return;
        }

        info!(
            added = added.len(),
            removed = removed.len(),
            groups = new_groups.len(),
            "chunkserver topology changed"
        );

        let mut pools = PoolSet::default();
        for (key, pool) in old.pools.iter() {
            pools.add_existing(key.clone(), Arc::clone(pool));
        }
        let mut drained = Vec::with_capacity(removed.len());
        for server in &removed {
            if let Some(pool) = pools.remove_pool(server) {
                drained.push(pool);
            }
        }
        for server in &added {
            pools.add_pool(server, pool_capacity, connect_timeout);
        }

        self.publish(Arc::new(pools), Arc::new(new_groups));

        // Sequenced after publication: new requests can no longer find these
        // pools, and in-flight borrowers hold their connections until release.
        for pool in drained {
            let dropped = pool.close_idle();
            debug!(addr = %pool.addr(), dropped, "drained pool for removed replica");
        }
    }
}
