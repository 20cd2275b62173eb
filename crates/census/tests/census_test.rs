//! End-to-end tests for census enumeration.
//!
//! # Test Strategy
//!
//! 1. **Per-poll protocol**: success, each failure point, timeouts
//! 2. **Scheduling**: racing workers, seed bootstrap
//! 3. **Lifecycle**: start/stop idempotence, failed workers, group drain
//! 4. **Discovery**: the census grows outward from the seeds
//!
//! Time-dependent tests run on a paused clock, so ticks and sleeps are
//! deterministic.

use census::testing::MockNetwork;
use census::{
    all_fresh, CensusConfig, Enumerator, Error, Health, Lease, SimulatedNetwork, SimulatedPeer,
    Topology, Worker, WorkerNotification,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Barrier};

const SEED: &str = "10.0.0.1:18555";
const X: &str = "10.0.0.2:18555";
const Y: &str = "10.0.0.3:18555";

fn config(workers: usize) -> CensusConfig {
    CensusConfig {
        interval: Duration::from_secs(15),
        workers,
        worker_wait: Duration::from_secs(1),
        ..CensusConfig::default()
    }
}

fn census(seeds: &[&str], workers: usize, mock: &MockNetwork) -> Arc<Enumerator> {
    Arc::new(Enumerator::new(seeds.iter().copied(), config(workers), mock.factory()).unwrap())
}

fn received(events: &mut broadcast::Receiver<WorkerNotification>) -> Vec<WorkerNotification> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ============================================================================
// Per-poll Protocol Tests
// ============================================================================

#[tokio::test]
async fn test_poll_discovers_peers() {
    // One seed whose poll reveals X and Y
    let mock = MockNetwork::new().with_peers(SEED, &[X, Y]);
    let census = census(&[SEED], 1, &mock);
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();

    let lease = census.pick_node().expect("seed is stale");
    worker.check_node(lease).await.unwrap();

    assert_eq!(census.len(), 3, "seed plus two discovered peers");
    let seed = census.get(SEED).unwrap();
    assert!(seed.is_online());
    assert_eq!(seed.version(), "70002");
    assert_eq!(seed.connections(), vec![X.to_string(), Y.to_string()]);
    assert!(seed.last_checked().is_some());
    assert!(!seed.is_busy());

    // Discovered peers start out unpolled
    let x = census.get(X).unwrap();
    assert!(!x.is_online());
    assert!(x.is_stale(census.interval()));
    assert_eq!(mock.connect_calls(SEED), 1);
}

#[tokio::test]
async fn test_liveness_failure_marks_offline() {
    let mock = MockNetwork::new().fail_liveness(SEED);
    let census = census(&[SEED], 1, &mock);
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();

    let lease = census.pick_node().unwrap();
    assert!(worker.check_node(lease).await.is_err());

    let seed = census.get(SEED).expect("seed stays in the census");
    assert!(!seed.is_online());
    assert!(!seed.is_busy());
    assert!(seed.is_stale(census.interval()), "failed polls are not stamped");
    assert_eq!(mock.connect_calls(SEED), 0);
}

#[tokio::test]
async fn test_connect_failure_releases_lease() {
    let mock = MockNetwork::new().fail_connect(SEED).with_peers(SEED, &[X]);
    let census = census(&[SEED], 1, &mock);
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();

    let lease = census.pick_node().unwrap();
    assert!(worker.check_node(lease).await.is_err());

    let seed = census.get(SEED).unwrap();
    assert!(!seed.is_busy());
    assert_eq!(seed.version(), "70002", "liveness result is kept");
    assert!(!seed.is_online());
    assert_eq!(census.len(), 1, "no peers merged after a failed connect");
}

#[tokio::test]
async fn test_list_peers_failure_marks_offline() {
    let mock = MockNetwork::new().fail_list_peers(SEED);
    let census = census(&[SEED], 1, &mock);
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();

    // A previous successful poll left the node online
    let seed = census.get(SEED).unwrap();
    Lease::try_acquire(&seed).unwrap().update(|f| f.online = true);

    let lease = census.pick_node().unwrap();
    assert!(worker.check_node(lease).await.is_err());

    assert!(!seed.is_online());
    assert!(!seed.is_busy());
}

#[tokio::test]
async fn test_existing_connection_is_reused() {
    let mock = MockNetwork::new().already_connected(SEED);
    let census = census(&[SEED], 1, &mock);
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();

    let lease = census.pick_node().unwrap();
    worker.check_node(lease).await.unwrap();
    assert_eq!(mock.connect_calls(SEED), 0);
}

#[tokio::test]
async fn test_connections_are_replaced() {
    let mock = MockNetwork::new().with_peers(SEED, &[X, Y]);
    let census = census(&[SEED], 1, &mock);
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();

    let seed = census.get(SEED).unwrap();
    Lease::try_acquire(&seed)
        .unwrap()
        .update(|f| f.connections = ["10.9.9.9:18555".to_string()].into());

    worker.check_node(Lease::try_acquire(&seed).unwrap()).await.unwrap();
    assert_eq!(seed.connections(), vec![X.to_string(), Y.to_string()]);
}

#[tokio::test]
async fn test_vantage_point_is_not_censused() {
    let vantage = "127.0.0.1:19555";
    let mock = MockNetwork::new()
        .with_peers(SEED, &[X, vantage])
        .with_self_addresses(&[vantage]);
    let census = census(&[SEED], 1, &mock);
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();

    worker.check_node(census.pick_node().unwrap()).await.unwrap();
    assert!(census.get(vantage).is_none());
    assert_eq!(census.get(SEED).unwrap().connections(), vec![X.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_hung_call_times_out() {
    let mock = MockNetwork::new().hang_liveness(SEED);
    let config = CensusConfig {
        call_timeout: Some(Duration::from_secs(2)),
        ..config(1)
    };
    let census = Arc::new(Enumerator::new([SEED], config, mock.factory()).unwrap());
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();

    let err = worker.check_node(census.pick_node().unwrap()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { operation: "query_liveness", .. }));

    let seed = census.get(SEED).unwrap();
    assert!(!seed.is_online());
    assert!(!seed.is_busy());
}

#[tokio::test]
async fn test_readers_see_fields_while_leased() {
    let mock = MockNetwork::new();
    let census = census(&[SEED], 1, &mock);

    let lease = census.pick_node().unwrap();
    lease.update(|f| f.version = "70001".into());

    // Holding the lease does not block status queries
    let info = census.node_info(SEED).unwrap();
    assert_eq!(info.version, "70001");
    assert!(census.get(SEED).unwrap().is_busy());
    drop(lease);
}

// ============================================================================
// Scheduling Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn test_racing_workers_poll_once() {
    // Three workers tick at the same moment against one stale node
    let mock = MockNetwork::new();
    let census = census(&[SEED], 3, &mock);
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = (0..3)
        .map(|id| {
            let mut worker = Worker::new(Arc::clone(&census), id).unwrap();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                worker.tick().await
            })
        })
        .collect();

    let mut polled = 0;
    for handle in handles {
        if handle.await.unwrap() {
            polled += 1;
        }
    }

    assert_eq!(polled, 1, "exactly one worker gets the node");
    assert_eq!(mock.liveness_calls(SEED), 1);
    assert!(!census.get(SEED).unwrap().is_busy());
}

#[tokio::test]
async fn test_fresh_node_is_not_picked() {
    let mock = MockNetwork::new();
    let census = census(&[SEED], 1, &mock);
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();

    assert!(worker.tick().await);
    assert!(census.pick_node().is_none());
    assert!(!worker.tick().await);
    assert_eq!(mock.liveness_calls(SEED), 1);
}

#[tokio::test(start_paused = true)]
async fn test_check_seeds_waits_for_every_seed() {
    let mock = MockNetwork::new().fail_liveness(X);
    let census = census(&[SEED, X], 1, &mock);
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();
    let (_shutdown, mut rx) = oneshot::channel();

    let bootstrap = tokio::spawn(async move { worker.check_seeds(&mut rx).await });

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(!bootstrap.is_finished(), "X has never been fresh");
    assert!(mock.liveness_calls(X) >= 3);
    // every pass polls every free seed, fresh or not
    assert_eq!(mock.liveness_calls(SEED), mock.liveness_calls(X));

    mock.heal(X);
    assert!(bootstrap.await.unwrap());
    assert!(all_fresh(census.seeds(), census.interval()));
}

#[tokio::test(start_paused = true)]
async fn test_check_seeds_observes_shutdown() {
    let mock = MockNetwork::new().fail_liveness(SEED);
    let census = census(&[SEED], 1, &mock);
    let mut worker = Worker::new(Arc::clone(&census), 0).unwrap();
    let (shutdown, mut rx) = oneshot::channel();

    let bootstrap = tokio::spawn(async move { worker.check_seeds(&mut rx).await });
    tokio::time::sleep(Duration::from_millis(1500)).await;
    shutdown.send(()).unwrap();

    assert!(!bootstrap.await.unwrap());
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_cycle_single_worker() {
    let mock = MockNetwork::new().with_peers(SEED, &[X, Y]);
    let census = census(&[SEED], 1, &mock);

    census.start();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(census.len(), 3);
    let seed = census.get(SEED).unwrap();
    assert!(seed.is_online());
    assert_eq!(seed.connections(), vec![X.to_string(), Y.to_string()]);

    census.stop().await;
    assert_eq!(mock.starts(), 1);
    assert_eq!(mock.stops(), 1, "driver is torn down on exit");
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_spawns_one_batch() {
    let mock = MockNetwork::new();
    let census = census(&[SEED], 2, &mock);

    census.start();
    census.start();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(mock.created(), 2);
    assert_eq!(mock.starts(), 2);

    census.stop().await;
    census.stop().await;
    assert_eq!(mock.stops(), 2);
}

#[tokio::test]
async fn test_stop_before_start_does_not_block() {
    let mock = MockNetwork::new();
    let census = census(&[SEED], 2, &mock);

    tokio::time::timeout(Duration::from_secs(1), census.stop())
        .await
        .expect("stop returns without a started census");
    assert_eq!(mock.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_every_driver_start_failing_leaves_registry_alone() {
    let mock = MockNetwork::new().fail_start();
    let census = census(&[SEED], 2, &mock);
    let mut events = census.subscribe();

    census.start();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let failed = received(&mut events)
        .into_iter()
        .filter(|e| matches!(e, WorkerNotification::StartFailed { .. }))
        .count();
    assert_eq!(failed, 2);
    assert_eq!(mock.starts(), 2);
    assert_eq!(mock.stops(), 2, "failed vantage points are still torn down");
    assert_eq!(mock.total_liveness_calls(), 0, "no polling without a vantage point");
    assert_eq!(census.len(), 1, "registry is unaffected");

    tokio::time::timeout(Duration::from_secs(1), census.stop())
        .await
        .expect("stop drains exited workers");
}

#[tokio::test(start_paused = true)]
async fn test_failed_driver_start_stops_only_that_worker() {
    let mock = MockNetwork::new().fail_first_starts(1);
    let census = census(&[SEED], 2, &mock);
    let mut events = census.subscribe();

    census.start();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let events = received(&mut events);
    let failed = events
        .iter()
        .filter(|e| matches!(e, WorkerNotification::StartFailed { .. }))
        .count();
    let started = events
        .iter()
        .filter(|e| matches!(e, WorkerNotification::Started { .. }))
        .count();
    assert_eq!(failed, 1);
    assert_eq!(started, 1);

    // the sibling still bootstraps and polls the seed
    assert!(mock.liveness_calls(SEED) >= 1);
    let seed = census.get(SEED).unwrap();
    assert!(seed.is_online());
    assert!(seed.last_checked().is_some());

    census.stop().await;
    assert_eq!(mock.stops(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_worker_creation_tears_down_batch() {
    let mock = MockNetwork::new().create_limit(1);
    let census = census(&[SEED], 3, &mock);
    let mut events = census.subscribe();

    census.start();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let create_failures: Vec<_> = received(&mut events)
        .into_iter()
        .filter(|e| matches!(e, WorkerNotification::CreateFailed { .. }))
        .collect();
    assert_eq!(create_failures.len(), 1);
    assert!(matches!(create_failures[0], WorkerNotification::CreateFailed { worker: 1, .. }));
    assert_eq!(mock.created(), 1);
    assert_eq!(mock.stops(), 1, "already-started worker is torn down");

    tokio::time::timeout(Duration::from_secs(1), census.stop())
        .await
        .expect("coordinator already returned");
}

#[tokio::test(start_paused = true)]
async fn test_worker_status_follows_run() {
    let mock = MockNetwork::new();
    let census = census(&[SEED], 1, &mock);
    let worker = Worker::new(Arc::clone(&census), 0).unwrap();
    let status = worker.status();
    assert!(!status.is_running());

    let (shutdown, rx) = oneshot::channel();
    let task = tokio::spawn(worker.run(rx));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(status.is_running());

    shutdown.send(()).unwrap();
    task.await.unwrap();
    assert!(!status.is_running());
    assert_eq!(mock.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_workers() {
    let mock = MockNetwork::new();
    let census = census(&[SEED], 3, &mock);

    census.start();
    tokio::time::sleep(Duration::from_secs(5)).await;
    census.stop().await;

    // every started vantage point has been torn down by the time stop returns
    assert_eq!(mock.starts(), 3);
    assert_eq!(mock.stops(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_racing_start_still_drains() {
    for _ in 0..50 {
        let mock = MockNetwork::new();
        let census = census(&[SEED], 2, &mock);
        let barrier = Arc::new(Barrier::new(2));

        let starter = {
            let census = Arc::clone(&census);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                census.start();
            })
        };

        barrier.wait().await;
        census.stop().await;
        starter.await.unwrap();

        // either start won and stop drained its workers, or start was ignored
        assert_eq!(mock.starts(), mock.stops());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.starts(), mock.stops(), "no worker outlives stop");
    }
}

// ============================================================================
// Discovery Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_census_grows_outward_from_seed() {
    // a -> b -> c, only a is a seed
    let network = SimulatedNetwork::new();
    network.insert("10.0.0.1:18555", SimulatedPeer::new("70002", &["10.0.0.2:18555"]));
    network.insert("10.0.0.2:18555", SimulatedPeer::new("70002", &["10.0.0.3:18555"]));
    network.insert("10.0.0.3:18555", SimulatedPeer::new("70001", &[]));
    let network = Arc::new(network);

    let census = Arc::new(
        Enumerator::new(["10.0.0.1:18555"], config(2), Arc::new(network.factory())).unwrap(),
    );
    census.start();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(census.len(), 3);
    assert!(census.nodes().iter().all(|n| n.is_online()));
    assert_eq!(census.get("10.0.0.3:18555").unwrap().version(), "70001");

    let topology = Topology::from_census(&census);
    assert_eq!(topology.count(Health::Online), 3);
    assert!(topology
        .edges
        .contains(&("10.0.0.1:18555".to_string(), "10.0.0.2:18555".to_string())));

    census.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_offline_participant_is_recorded() {
    let network = SimulatedNetwork::new();
    network.insert("10.0.0.1:18555", SimulatedPeer::new("70002", &["10.0.0.2:18555"]));
    network.insert(
        "10.0.0.2:18555",
        SimulatedPeer {
            online: false,
            ..SimulatedPeer::new("70002", &[])
        },
    );
    let network = Arc::new(network);

    let census = Arc::new(
        Enumerator::new(["10.0.0.1:18555"], config(1), Arc::new(network.factory())).unwrap(),
    );
    census.start();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let unreachable = census.get("10.0.0.2:18555").expect("discovered via the seed");
    assert!(!unreachable.is_online());
    assert!(!unreachable.is_busy());

    census.stop().await;
}
