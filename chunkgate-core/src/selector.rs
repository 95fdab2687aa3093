//! Write placement: filters chunkserver groups against health and capacity
//! constraints, ranks the survivors, and spreads load with a bounded random
//! pick among the best candidates.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use rand::Rng;

use crate::error::RouterError;
use crate::topology::{ChunkServerGroups, GroupStatus, ReplicaStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    group_id: u16,
    min_free: i64,
    pending_writes: i64,
    writing_count: i64,
}

// Heap admission is by free space alone; the group id keeps eviction
// deterministic when groups tie.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.min_free
            .cmp(&other.min_free)
            .then_with(|| other.group_id.cmp(&self.group_id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Picks a group able to take a write of `size` bytes.
///
/// A group qualifies when it is globally normal, every replica is either RW
/// or ERR (any transitional state disqualifies the whole group), it exposes
/// at least `limit_num` RW replicas, and the least-free RW replica still has
/// more than `size` bytes available. Qualifying groups compete for a top-k
/// slot (`k = len/10 + 3`) by free space; the final pick is uniform over the
/// survivors, ranked by pending then in-flight writes.
pub fn select_group(
    groups: &ChunkServerGroups,
    size: u64,
    limit_num: usize,
) -> Result<u16, RouterError> {
    let limit = limit_num.max(1);
    let k = groups.len() / 10 + 3;

    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(k + 1);
    for (group_id, servers) in &groups.groups {
        let Some(candidate) = evaluate_group(*group_id, servers, size, limit) else {
            continue;
        };
        heap.push(Reverse(candidate));
        if heap.len() > k {
            heap.pop();
        }
    }

    if heap.is_empty() {
        return Err(RouterError::NoQualifiedGroup { size });
    }

    let mut ranked: Vec<Candidate> = heap.into_iter().map(|entry| entry.0).collect();
    ranked.sort_by(|a, b| {
        a.pending_writes
            .cmp(&b.pending_writes)
            .then_with(|| a.writing_count.cmp(&b.writing_count))
            .then_with(|| a.group_id.cmp(&b.group_id))
    });

    let pick = rand::thread_rng().gen_range(0..ranked.len());
    Ok(ranked[pick].group_id)
}

fn evaluate_group(
    group_id: u16,
    servers: &[crate::topology::ChunkServer],
    size: u64,
    limit_num: usize,
) -> Option<Candidate> {
    if servers.is_empty() || servers[0].global_status != GroupStatus::Normal {
        return None;
    }

    let mut min_free = i64::MAX;
    let mut rw_count = 0usize;
    let mut pending_writes = 0i64;
    let mut writing_count = 0i64;

    for server in servers {
        match server.status {
            ReplicaStatus::Err => continue,
            ReplicaStatus::Rw => {}
            _ => return None,
        }
        rw_count += 1;
        min_free = min_free.min(server.max_free_space);
        pending_writes = pending_writes.max(server.pending_writes);
        writing_count = writing_count.max(server.writing_count);
    }

    if rw_count < limit_num {
        return None;
    }
    if min_free <= size as i64 {
        return None;
    }

    Some(Candidate {
        group_id,
        min_free,
        pending_writes,
        writing_count,
    })
}
