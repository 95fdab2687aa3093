//! Routing core for the chunkgate object-storage gateway.
//!
//! The router is stateless per request and stateful per process: a single
//! shared snapshot of `(connection pools, chunkserver groups)` swapped
//! atomically on every topology poll, plus a leased window of file ids
//! refilled from the master on demand. Everything here is HTTP-agnostic;
//! the service binary wires these pieces to the request surface.

/// Router start parameters.
pub mod config;
/// Background pollers for topology and fid leases.
pub mod control;
/// Error types surfaced by the routing core.
pub mod error;
/// File-id leasing with single-flight refills.
pub mod fid;
/// Master control-plane client and its trait seam.
pub mod master;
/// Bounded per-replica connection pools.
pub mod pool;
/// The router orchestrator.
pub mod router;
/// Write placement across chunkserver groups.
pub mod selector;
/// The atomically swapped `(pools, groups)` snapshot.
pub mod state;
/// Fan-out replication writes and replica reads.
pub mod transfer;
/// Chunkserver topology and diffing.
pub mod topology;
/// Fragment identity and location records.
pub mod types;
/// Framed TCP protocol spoken to chunkservers.
pub mod wire;

pub use config::RouterConfig;
pub use error::RouterError;
pub use fid::{FidCache, FidRange};
pub use master::{MasterApi, MasterClient};
pub use pool::{ConnectionPool, PoolSet};
pub use router::Router;
pub use state::{ClusterSnapshot, ClusterState};
pub use topology::{ChunkServer, ChunkServerGroups, GroupStatus, ReplicaStatus};
pub use types::{FragmentKey, FragmentLocation, RegistryVersion};
