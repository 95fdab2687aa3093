//! The replica data path: fan-out replication writes with all-success
//! semantics, and single-replica reads for downloads.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::RouterError;
use crate::pool::ConnectionPool;
use crate::state::ClusterSnapshot;
use crate::topology::{pick_rw_replica, ChunkServer};
use crate::types::FragmentLocation;
use crate::wire::is_disconnect;

/// Per-replica outcome reported back over the fan-out channel.
type Report = Result<(), (String, String)>;

/// Pushes the fragment body to every RW replica of the chosen group in
/// parallel and succeeds only if every replica acknowledged it.
///
/// Partial replication is reported as failure: there is no repair daemon at
/// this layer, so a metadata record must mean "present on all RW replicas at
/// the time of write". The error carries the last failure observed.
pub async fn write_fragment(
    snapshot: &ClusterSnapshot,
    servers: &[ChunkServer],
    file_id: u64,
    body: Bytes,
) -> Result<(), RouterError> {
    let writers: Vec<ChunkServer> = servers.iter().filter(|s| s.is_rw()).cloned().collect();
    if writers.is_empty() {
        return Err(RouterError::NoReplicaAvailable {
            group_id: servers.first().map_or(0, |s| s.group_id),
        });
    }

    let (tx, mut rx) = mpsc::channel::<Report>(writers.len());
    for server in writers {
        let pool = snapshot.pools.get(&server.addr_key());
        let body = body.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = push_to_replica(pool, &server, file_id, &body)
                .await
                .map_err(|err| (server.addr_key(), err.to_string()));
            let _ = tx.send(outcome).await;
        });
    }
    drop(tx);

    let mut failure: Option<(String, String)> = None;
    while let Some(report) = rx.recv().await {
        if let Err(fail) = report {
            failure = Some(fail);
        }
    }

    match failure {
        None => Ok(()),
        Some((addr, message)) => {
            warn!(%addr, %message, file_id, "replication write failed");
            Err(RouterError::ReplicaIo { addr, message })
        }
    }
}

async fn push_to_replica(
    pool: Option<Arc<ConnectionPool>>,
    server: &ChunkServer,
    file_id: u64,
    body: &[u8],
) -> Result<(), RouterError> {
    let pool = pool.ok_or_else(|| RouterError::PoolMissing {
        addr: server.addr_key(),
    })?;
    let mut conn = pool.get().await?;
    match conn.put(file_id, body).await {
        Ok(()) => {
            debug!(addr = %server.addr_key(), file_id, "replica acknowledged put");
            pool.release(conn);
            Ok(())
        }
        Err(err) => {
            conn.mark_closed();
            let disconnect = is_disconnect(&err);
            pool.release(conn);
            if disconnect {
                let dropped = pool.close_idle();
                warn!(addr = %server.addr_key(), dropped, "reconciled pool after replica disconnect");
            }
            Err(RouterError::ReplicaIo {
                addr: server.addr_key(),
                message: err.to_string(),
            })
        }
    }
}

/// Fetches a fragment from one RW replica of the group recorded at write
/// time: a random probe first, then a linear scan fallback.
pub async fn read_fragment(
    snapshot: &ClusterSnapshot,
    location: &FragmentLocation,
) -> Result<Vec<u8>, RouterError> {
    let servers = snapshot
        .groups
        .group(location.group_id)
        .ok_or(RouterError::UnknownGroup {
            group_id: location.group_id,
        })?;
    let server = pick_rw_replica(servers).ok_or(RouterError::NoReplicaAvailable {
        group_id: location.group_id,
    })?;
    let pool = snapshot
        .pools
        .get(&server.addr_key())
        .ok_or_else(|| RouterError::PoolMissing {
            addr: server.addr_key(),
        })?;

    let mut conn = pool.get().await?;
    match conn
        .get(location.file_id, location.key.start, location.key.end)
        .await
    {
        Ok(data) => {
            pool.release(conn);
            Ok(data)
        }
        Err(err) => {
            conn.mark_closed();
            let disconnect = is_disconnect(&err);
            pool.release(conn);
            if disconnect {
                let dropped = pool.close_idle();
                warn!(addr = %server.addr_key(), dropped, "reconciled pool after replica disconnect");
            }
            Err(RouterError::ReplicaIo {
                addr: server.addr_key(),
                message: err.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolSet;
    use crate::topology::{test_server, ChunkServerGroups, ReplicaStatus};
    use crate::types::FragmentKey;
    use crate::wire::{read_request, write_reply, OP_GET, OP_PUT, STATUS_ERR, STATUS_OK};
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;
    use tokio::net::TcpListener;

    type Store = Arc<Mutex<HashMap<u64, Vec<u8>>>>;

    /// A minimal chunkserver: stores PUT bodies by fid, serves them on GET,
    /// optionally failing every PUT.
    async fn spawn_chunkserver(fail_puts: bool) -> (String, Store) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let store: Store = Arc::new(Mutex::new(HashMap::new()));
        let served = Arc::clone(&store);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let served = Arc::clone(&served);
                tokio::spawn(async move {
                    while let Ok(request) = read_request(&mut stream).await {
                        match request.op {
                            OP_PUT if fail_puts => {
                                let _ = write_reply(
                                    &mut stream,
                                    STATUS_ERR,
                                    b"simulated write failure",
                                )
                                .await;
                            }
                            OP_PUT => {
                                served.lock().insert(request.file_id, request.body);
                                let _ = write_reply(&mut stream, STATUS_OK, &[]).await;
                            }
                            OP_GET => {
                                let body = served.lock().get(&request.file_id).cloned();
                                match body {
                                    Some(body) => {
                                        let _ =
                                            write_reply(&mut stream, STATUS_OK, &body).await;
                                    }
                                    None => {
                                        let _ = write_reply(
                                            &mut stream,
                                            STATUS_ERR,
                                            b"no such file id",
                                        )
                                        .await;
                                    }
                                }
                            }
                            _ => return,
                        }
                    }
                });
            }
        });
        (addr, store)
    }

    fn snapshot_for(servers: &[ChunkServer]) -> ClusterSnapshot {
        let mut pools = PoolSet::default();
        let mut groups: BTreeMap<u16, Vec<ChunkServer>> = BTreeMap::new();
        for server in servers {
            pools.add_pool(server, 4, Duration::from_secs(1));
            groups
                .entry(server.group_id)
                .or_default()
                .push(server.clone());
        }
        ClusterSnapshot {
            pools: Arc::new(pools),
            groups: Arc::new(ChunkServerGroups { groups }),
        }
    }

    fn replica_at(addr: &str, group_id: u16) -> ChunkServer {
        let (host, port) = addr.split_once(':').unwrap();
        test_server(host, port.parse().unwrap(), group_id)
    }

    #[tokio::test]
    async fn all_replicas_receive_the_body_exactly_once() {
        let (addr_a, store_a) = spawn_chunkserver(false).await;
        let (addr_b, store_b) = spawn_chunkserver(false).await;
        let (addr_c, store_c) = spawn_chunkserver(false).await;
        let servers = vec![
            replica_at(&addr_a, 1),
            replica_at(&addr_b, 1),
            replica_at(&addr_c, 1),
        ];
        let snapshot = snapshot_for(&servers);

        write_fragment(&snapshot, &servers, 7, Bytes::from_static(b"payload"))
            .await
            .unwrap();

        for store in [&store_a, &store_b, &store_c] {
            let store = store.lock();
            assert_eq!(store.len(), 1);
            assert_eq!(store.get(&7).unwrap(), b"payload");
        }
    }

    #[tokio::test]
    async fn one_failing_replica_fails_the_whole_write() {
        let (addr_a, _) = spawn_chunkserver(false).await;
        let (addr_b, _) = spawn_chunkserver(true).await;
        let (addr_c, _) = spawn_chunkserver(false).await;
        let servers = vec![
            replica_at(&addr_a, 1),
            replica_at(&addr_b, 1),
            replica_at(&addr_c, 1),
        ];
        let snapshot = snapshot_for(&servers);

        let err = write_fragment(&snapshot, &servers, 9, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        match err {
            RouterError::ReplicaIo { addr, message } => {
                assert_eq!(addr, addr_b);
                assert!(message.contains("simulated write failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_rw_replicas_are_not_written() {
        let (addr_a, store_a) = spawn_chunkserver(false).await;
        let (addr_b, store_b) = spawn_chunkserver(false).await;
        let mut readonly = replica_at(&addr_b, 1);
        readonly.status = ReplicaStatus::Ro;
        let servers = vec![replica_at(&addr_a, 1), readonly];
        let snapshot = snapshot_for(&servers);

        write_fragment(&snapshot, &servers, 11, Bytes::from_static(b"data"))
            .await
            .unwrap();
        assert_eq!(store_a.lock().len(), 1);
        assert!(store_b.lock().is_empty());
    }

    #[tokio::test]
    async fn group_without_rw_replicas_is_rejected() {
        let (addr_a, _) = spawn_chunkserver(false).await;
        let mut faulted = replica_at(&addr_a, 3);
        faulted.status = ReplicaStatus::Err;
        let servers = vec![faulted];
        let snapshot = snapshot_for(&servers);

        let err = write_fragment(&snapshot, &servers, 1, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::NoReplicaAvailable { group_id: 3 }
        ));
    }

    #[tokio::test]
    async fn written_fragment_reads_back_byte_for_byte() {
        let (addr_a, _) = spawn_chunkserver(false).await;
        let servers = vec![replica_at(&addr_a, 1)];
        let snapshot = snapshot_for(&servers);

        write_fragment(&snapshot, &servers, 21, Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let location = FragmentLocation {
            key: FragmentKey::new("/a", 0, 0, 5),
            file_id: 21,
            group_id: 1,
            is_last: true,
        };
        let data = read_fragment(&snapshot, &location).await.unwrap();
        assert_eq!(data, b"hello");

        // Both operations returned their connections to the pool.
        let pool = snapshot.pools.get(&addr_a).unwrap();
        assert_eq!(pool.idle_count(), pool.live_count());
    }

    #[tokio::test]
    async fn read_from_unknown_group_is_reported() {
        let snapshot = ClusterSnapshot::default();
        let location = FragmentLocation {
            key: FragmentKey::new("/a", 0, 0, 5),
            file_id: 21,
            group_id: 9,
            is_last: false,
        };
        let err = read_fragment(&snapshot, &location).await.unwrap_err();
        assert!(matches!(err, RouterError::UnknownGroup { group_id: 9 }));
    }
}
