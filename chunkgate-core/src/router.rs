//! The router itself: one struct owning the cluster snapshot, the fid
//! lease, and the master handle, exposing the operations the HTTP front
//! dispatches to.

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::fid::FidCache;
use crate::master::MasterApi;
use crate::selector;
use crate::state::{ClusterSnapshot, ClusterState};
use crate::topology::ChunkServer;
use crate::transfer;
use crate::types::FragmentLocation;

/// Routing core shared by every request task and both control loops.
pub struct Router {
    config: RouterConfig,
    state: ClusterState,
    fids: FidCache,
    master: Arc<dyn MasterApi>,
}

impl Router {
    /// Creates a router with an empty topology; call [`Router::bootstrap`]
    /// before serving.
    pub fn new(config: RouterConfig, master: Arc<dyn MasterApi>) -> Self {
        Self {
            config,
            state: ClusterState::new(),
            fids: FidCache::new(),
            master,
        }
    }

    /// The configuration the router was started with.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The current `(pools, groups)` snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.state.snapshot()
    }

    /// Ids still available in the fid lease; diagnostics only.
    #[must_use]
    pub fn fid_remaining(&self) -> u64 {
        self.fids.remaining()
    }

    /// One synchronous round of both master calls. Run before serving;
    /// a failure here is fatal to startup.
    pub async fn bootstrap(&self) -> Result<(), RouterError> {
        self.poll_route_once().await?;
        self.refill_fids(false).await?;
        let snapshot = self.snapshot();
        info!(
            groups = snapshot.groups.len(),
            pools = snapshot.pools.len(),
            fids = self.fids.remaining(),
            "router bootstrapped from master"
        );
        Ok(())
    }

    /// Fetches the topology from the master and applies the diff.
    pub async fn poll_route_once(&self) -> Result<(), RouterError> {
        let groups = self.master.fetch_route().await?;
        self.state.apply_route(
            groups,
            self.config.conn_pool_capacity,
            self.config.connect_timeout,
        );
        Ok(())
    }

    /// Tops up the fid lease when it runs short; `wake` releases any callers
    /// parked on an exhausted window.
    pub async fn refill_fids(&self, wake: bool) -> Result<(), RouterError> {
        if !self.fids.is_shortage() {
            return Ok(());
        }
        let range = self.master.fetch_fid_range().await?;
        self.fids.merge(range.start, range.end, wake);
        Ok(())
    }

    /// Next file id, refilling the lease from the master when exhausted.
    ///
    /// Exactly one concurrent caller performs the master call; the rest park
    /// until it publishes fresh ids or aborts, in which case every parked
    /// caller observes the same refill error.
    pub async fn next_fid(&self) -> Result<u64, RouterError> {
        loop {
            if let Some(fid) = self.fids.try_next() {
                return Ok(fid);
            }
            let Some(guard) = self.fids.begin_refill() else {
                return self.fids.wait_next().await;
            };
            // A refill may have finished between the failed take and the
            // claim; re-check before going to the master.
            if let Some(fid) = self.fids.try_next() {
                return Ok(fid);
            }
            let range = match self.master.fetch_fid_range().await {
                Ok(range) => range,
                Err(err) => {
                    let message = err.to_string();
                    self.fids.abort_refill(&message);
                    return Err(RouterError::FidRefill(message));
                }
            };
            if !self.fids.merge(range.start, range.end, true) {
                self.fids
                    .abort_refill("master returned a stale fid window");
                return Err(RouterError::FidRefill(
                    "master returned a stale fid window".to_string(),
                ));
            }
            drop(guard);
            // Loop: this caller races the woken waiters for the fresh ids.
        }
    }

    /// Chooses a group able to take a write of `size` bytes and returns its
    /// replicas from the same snapshot.
    pub fn select_group(&self, size: u64) -> Result<(u16, Vec<ChunkServer>), RouterError> {
        let snapshot = self.snapshot();
        let group_id = selector::select_group(&snapshot.groups, size, self.config.limit_num)?;
        let servers = snapshot
            .groups
            .group(group_id)
            .map(<[ChunkServer]>::to_vec)
            .unwrap_or_default();
        Ok((group_id, servers))
    }

    /// Replicates the fragment body to every RW replica of the group.
    pub async fn store_fragment(
        &self,
        servers: &[ChunkServer],
        file_id: u64,
        body: Bytes,
    ) -> Result<(), RouterError> {
        transfer::write_fragment(&self.snapshot(), servers, file_id, body).await
    }

    /// Fetches a fragment from one RW replica of its recorded group.
    pub async fn fetch_fragment(
        &self,
        location: &FragmentLocation,
    ) -> Result<Vec<u8>, RouterError> {
        transfer::read_fragment(&self.snapshot(), location).await
    }
}
