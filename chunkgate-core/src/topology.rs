//! Chunkserver topology: replica descriptors as reported by the master and
//! the address-equality diff that drives pool reconfiguration.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-replica serving state. The master reports integer codes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ReplicaStatus {
    /// Accepts reads and writes.
    Rw,
    /// Read-only.
    Ro,
    /// Faulted; skipped by the selector without disqualifying the group.
    Err,
    /// Not serving at all.
    Offline,
    /// Transitional or unrecognized state; disqualifies the whole group for writes.
    Other(u8),
}

impl From<u8> for ReplicaStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Rw,
            1 => Self::Ro,
            2 => Self::Err,
            3 => Self::Offline,
            other => Self::Other(other),
        }
    }
}

impl From<ReplicaStatus> for u8 {
    fn from(status: ReplicaStatus) -> Self {
        match status {
            ReplicaStatus::Rw => 0,
            ReplicaStatus::Ro => 1,
            ReplicaStatus::Err => 2,
            ReplicaStatus::Offline => 3,
            ReplicaStatus::Other(code) => code,
        }
    }
}

/// Group-wide state; only `Normal` groups accept new writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum GroupStatus {
    /// Group is fully serving.
    Normal,
    /// Group is migrating chunks and must not take new writes.
    Transferring,
    /// Unrecognized state reported by the master.
    Other(u8),
}

impl From<u8> for GroupStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Normal,
            1 => Self::Transferring,
            other => Self::Other(other),
        }
    }
}

impl From<GroupStatus> for u8 {
    fn from(status: GroupStatus) -> Self {
        match status {
            GroupStatus::Normal => 0,
            GroupStatus::Transferring => 1,
            GroupStatus::Other(code) => code,
        }
    }
}

/// One storage daemon as reported by `/cm/v1/chunkmaster/route`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkServer {
    /// Replica host.
    pub host: String,
    /// Replica data port.
    pub port: u16,
    /// Group the replica belongs to.
    pub group_id: u16,
    /// Serving state of this replica.
    pub status: ReplicaStatus,
    /// Serving state of the whole group.
    pub global_status: GroupStatus,
    /// Free space (bytes) on the most spacious volume of the replica.
    pub max_free_space: i64,
    /// Writes queued but not yet started.
    pub pending_writes: i64,
    /// Writes currently in flight.
    pub writing_count: i64,
}

impl ChunkServer {
    /// Pool key for this replica; replicas with equal addresses share a pool.
    #[must_use]
    pub fn addr_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Topology diffs compare replicas by address only.
    #[must_use]
    pub fn addr_eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }

    /// Whether the replica accepts reads and writes.
    #[must_use]
    pub const fn is_rw(&self) -> bool {
        matches!(self.status, ReplicaStatus::Rw)
    }
}

/// Immutable snapshot of the cluster layout: `group id -> replicas`.
///
/// Replaced wholesale on every master poll; never mutated in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkServerGroups {
    /// Replica lists keyed by group id.
    pub groups: BTreeMap<u16, Vec<ChunkServer>>,
}

impl ChunkServerGroups {
    /// Replicas of one group, if present.
    #[must_use]
    pub fn group(&self, group_id: u16) -> Option<&[ChunkServer]> {
        self.groups.get(&group_id).map(Vec::as_slice)
    }

    /// Number of groups in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the snapshot holds no groups at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Replicas present in `new` but not in `old`, and vice versa, compared by
/// address only. Both sides empty means the pool set can be kept as-is.
#[must_use]
pub fn diff_servers(
    new: &ChunkServerGroups,
    old: &ChunkServerGroups,
) -> (Vec<ChunkServer>, Vec<ChunkServer>) {
    (one_sided_diff(new, old), one_sided_diff(old, new))
}

fn one_sided_diff(from: &ChunkServerGroups, against: &ChunkServerGroups) -> Vec<ChunkServer> {
    let mut missing = Vec::new();
    for servers in from.groups.values() {
        for server in servers {
            let known = against
                .groups
                .values()
                .flatten()
                .any(|other| server.addr_eq(other));
            if !known {
                missing.push(server.clone());
            }
        }
    }
    missing
}

/// Picks a read-write replica for a download: one random probe, then a linear
/// scan so a degraded group still serves as long as one RW replica remains.
#[must_use]
pub fn pick_rw_replica(servers: &[ChunkServer]) -> Option<&ChunkServer> {
    if servers.is_empty() {
        return None;
    }
    let probe = rand::thread_rng().gen_range(0..servers.len());
    if servers[probe].is_rw() {
        return Some(&servers[probe]);
    }
    servers.iter().find(|server| server.is_rw())
}

#[cfg(test)]
pub(crate) fn test_server(host: &str, port: u16, group_id: u16) -> ChunkServer {
    ChunkServer {
        host: host.to_string(),
        port,
        group_id,
        status: ReplicaStatus::Rw,
        global_status: GroupStatus::Normal,
        max_free_space: 10 * 1024 * 1024,
        pending_writes: 0,
        writing_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups_of(servers: Vec<ChunkServer>) -> ChunkServerGroups {
        let mut groups: BTreeMap<u16, Vec<ChunkServer>> = BTreeMap::new();
        for server in servers {
            groups.entry(server.group_id).or_default().push(server);
        }
        ChunkServerGroups { groups }
    }

    #[test]
    fn status_codes_round_trip() {
        for code in 0..=6u8 {
            assert_eq!(u8::from(ReplicaStatus::from(code)), code);
            assert_eq!(u8::from(GroupStatus::from(code)), code);
        }
    }

    #[test]
    fn replica_parses_from_master_json() {
        let raw = r#"{
            "host": "10.0.0.7",
            "port": 9632,
            "group_id": 3,
            "status": 0,
            "global_status": 0,
            "max_free_space": 1048576,
            "pending_writes": 2,
            "writing_count": 1
        }"#;
        let server: ChunkServer = serde_json::from_str(raw).unwrap();
        assert_eq!(server.addr_key(), "10.0.0.7:9632");
        assert_eq!(server.status, ReplicaStatus::Rw);
        assert_eq!(server.global_status, GroupStatus::Normal);
    }

    #[test]
    fn diff_detects_added_and_removed_by_address() {
        let old = groups_of(vec![
            test_server("a", 1, 1),
            test_server("b", 1, 1),
            test_server("c", 1, 2),
        ]);
        let new = groups_of(vec![
            test_server("a", 1, 1),
            test_server("b", 1, 1),
            test_server("d", 1, 2),
        ]);

        let (added, removed) = diff_servers(&new, &old);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].host, "d");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].host, "c");
    }

    #[test]
    fn diff_ignores_load_metric_changes() {
        let old = groups_of(vec![test_server("a", 1, 1)]);
        let mut moved = test_server("a", 1, 1);
        moved.max_free_space = 1;
        moved.status = ReplicaStatus::Err;
        let new = groups_of(vec![moved]);

        let (added, removed) = diff_servers(&new, &old);
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[test]
    fn pick_skips_non_rw_replicas() {
        let mut ro = test_server("a", 1, 1);
        ro.status = ReplicaStatus::Ro;
        let mut down = test_server("b", 1, 1);
        down.status = ReplicaStatus::Err;
        let rw = test_server("c", 1, 1);
        let servers = vec![ro, down, rw];

        for _ in 0..32 {
            let picked = pick_rw_replica(&servers).unwrap();
            assert_eq!(picked.host, "c");
        }
    }

    #[test]
    fn pick_returns_none_without_rw() {
        let mut ro = test_server("a", 1, 1);
        ro.status = ReplicaStatus::Ro;
        assert!(pick_rw_replica(&[ro]).is_none());
        assert!(pick_rw_replica(&[]).is_none());
    }
}
