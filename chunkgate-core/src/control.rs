//! Background control loops polling the master for topology and fid leases.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::warn;

use crate::router::Router;

/// Spawns the topology and fid pollers as independent long-lived tasks.
///
/// Both tick at the configured poll interval. The first tick is delayed by
/// one full period because [`Router::bootstrap`] already performed the
/// initial synchronous round. Tick failures are logged and the loop keeps
/// serving against the last good snapshot.
pub fn spawn_pollers(router: Arc<Router>) -> Vec<JoinHandle<()>> {
    let period = router.config().poll_interval;

    let topology = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = router.poll_route_once().await {
                    warn!(error = %err, "topology poll failed");
                }
            }
        })
    };

    let fids = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = router.refill_fids(true).await {
                warn!(error = %err, "fid lease poll failed");
            }
        }
    });

    vec![topology, fids]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::master::MasterApi;
    use crate::router::test_support::MockMaster;
    use crate::topology::test_server;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn pollers_refresh_topology_and_fids() {
        let master = Arc::new(MockMaster::new(1000));
        master.set_route(vec![test_server("a", 1, 1)]);

        let config = RouterConfig {
            poll_interval: Duration::from_millis(50),
            ..RouterConfig::default()
        };
        let router = Arc::new(Router::new(config, Arc::clone(&master) as Arc<dyn MasterApi>));
        router.bootstrap().await.unwrap();

        let handles = spawn_pollers(Arc::clone(&router));

        // Swap the route out from under the running poller.
        master.set_route(vec![test_server("b", 1, 1)]);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let snapshot = router.snapshot();
        assert!(snapshot.pools.get("a:1").is_none());
        assert!(snapshot.pools.get("b:1").is_some());

        // The fid poller only refills on shortage; a fresh lease stays put.
        assert_eq!(router.fid_remaining(), 1000);

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn fid_poller_tops_up_a_short_lease() {
        let master = Arc::new(MockMaster::new(1000));
        let config = RouterConfig {
            poll_interval: Duration::from_millis(50),
            ..RouterConfig::default()
        };
        let router = Arc::new(Router::new(config, Arc::clone(&master) as Arc<dyn MasterApi>));

        // No bootstrap: the lease starts empty and the poller must fill it.
        let handles = spawn_pollers(Arc::clone(&router));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(router.fid_remaining() > 0);
        assert!(master.fid_calls.load(Ordering::SeqCst) >= 1);

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn poll_errors_keep_the_last_good_snapshot() {
        let master = Arc::new(MockMaster::new(70));
        master.set_route(vec![test_server("a", 1, 1)]);
        let config = RouterConfig {
            poll_interval: Duration::from_millis(50),
            ..RouterConfig::default()
        };
        let router = Arc::new(Router::new(config, Arc::clone(&master) as Arc<dyn MasterApi>));
        router.bootstrap().await.unwrap();

        // Drain into shortage territory, then take the master's fid call down.
        for _ in 0..10 {
            router.next_fid().await.unwrap();
        }
        master.fail_fids.store(true, Ordering::SeqCst);
        let before = router.fid_remaining();

        let handles = spawn_pollers(Arc::clone(&router));
        tokio::time::sleep(Duration::from_millis(120)).await;

        // Failed refill ticks leave the lease untouched and the topology
        // poller keeps serving the last good snapshot.
        assert_eq!(router.fid_remaining(), before);
        assert!(router.snapshot().pools.get("a:1").is_some());
        assert!(master.fid_calls.load(Ordering::SeqCst) >= 2);

        for handle in handles {
            handle.abort();
        }
    }
}
