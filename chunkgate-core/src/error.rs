use thiserror::Error;

/// Errors surfaced by the routing core.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Group selection found no group that can accept the write.
    #[error("no chunkserver group can accept a write of {size} bytes")]
    NoQualifiedGroup {
        /// Fragment size the selector was asked to place.
        size: u64,
    },
    /// The target group exists but exposes no read-write replica.
    #[error("no read-write replica available in group {group_id}")]
    NoReplicaAvailable {
        /// Group the operation was routed to.
        group_id: u16,
    },
    /// The metadata record references a group missing from the topology.
    #[error("chunkserver group {group_id} is not present in the current topology")]
    UnknownGroup {
        /// Group recorded at write time.
        group_id: u16,
    },
    /// No pool is registered for the replica address.
    #[error("no connection pool registered for replica {addr}")]
    PoolMissing {
        /// `host:port` key of the replica.
        addr: String,
    },
    /// Every pooled connection for the replica is currently borrowed.
    #[error("connection pool for replica {addr} is exhausted (capacity {capacity})")]
    PoolExhausted {
        /// `host:port` key of the replica.
        addr: String,
        /// Configured pool capacity.
        capacity: usize,
    },
    /// A connect, put, or get against a single replica failed.
    #[error("replica {addr} i/o failure: {message}")]
    ReplicaIo {
        /// `host:port` key of the replica.
        addr: String,
        /// Error text reported by the failing attempt.
        message: String,
    },
    /// The master control plane rejected or failed a request.
    #[error("master request failed: {0}")]
    Master(String),
    /// A fid lease refill did not produce usable ids.
    #[error("fid lease refill failed: {0}")]
    FidRefill(String),
}
