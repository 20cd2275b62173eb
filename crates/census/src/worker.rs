//! Census polling workers.
//!
//! Each worker owns one vantage point and runs through
//! `initializing -> bootstrapping seeds -> polling -> stopped`:
//!
//! 1. Start the driver. On failure, report it and stop.
//! 2. Poll every seed, in passes, until all seeds are fresh at once.
//! 3. On every tick, ask the [`Enumerator`] for a stale node and poll it.
//!
//! The driver is stopped when the worker exits, whatever the reason.

use crate::driver::{with_deadline, Driver, KnownPeers};
use crate::enumerator::{Enumerator, WorkerNotification};
use crate::error::Result;
use crate::node::{all_fresh, Lease, Node};
use metrics::counter;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shared view of whether a worker is currently running.
#[derive(Clone, Debug, Default)]
pub struct WorkerStatus(Arc<AtomicBool>);

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, running: bool) {
        self.0.store(running, Ordering::Release);
    }
}

/// A census polling agent.
pub struct Worker {
    id: usize,
    census: Arc<Enumerator>,
    driver: Box<dyn Driver>,
    /// Tick period and pause between seed passes.
    wait: Duration,
    call_timeout: Option<Duration>,
    status: WorkerStatus,
}

impl Worker {
    /// Create a worker with a fresh vantage point from the census's driver factory.
    pub fn new(census: Arc<Enumerator>, id: usize) -> Result<Self> {
        let driver = census.driver_factory().create(census.config().network)?;
        Ok(Self::with_driver(census, id, driver))
    }

    pub fn with_driver(census: Arc<Enumerator>, id: usize, driver: Box<dyn Driver>) -> Self {
        let config = census.config();
        let (wait, call_timeout) = (config.worker_wait, config.call_timeout);
        Self {
            id,
            census,
            driver,
            wait,
            call_timeout,
            status: WorkerStatus::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.clone()
    }

    /// Run until `shutdown` fires (or its sender is dropped).
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        self.status.set(true);

        if let Err(e) = with_deadline(self.call_timeout, "start", self.driver.start()).await {
            self.notify(WorkerNotification::StartFailed {
                worker: self.id,
                error: e.to_string(),
            });
            self.teardown().await;
            return;
        }
        self.notify(WorkerNotification::Started { worker: self.id });

        if self.check_seeds(&mut shutdown).await {
            self.poll_loop(&mut shutdown).await;
        }

        self.teardown().await;
    }

    async fn poll_loop(&mut self, shutdown: &mut oneshot::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.wait, self.wait);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = &mut *shutdown => return,
            }
        }
    }

    /// Poll one eligible node, if any. Returns true if a node was polled.
    pub async fn tick(&mut self) -> bool {
        let Some(lease) = self.census.pick_node() else {
            return false;
        };

        let node = Arc::clone(lease.node());
        match self.check_node(lease).await {
            Ok(()) => {
                counter!("census_polls_total", "outcome" => "online").increment(1);
                debug!(worker = self.id, node = %node, version = %node.version(), "checked node");
            }
            Err(e) => {
                counter!("census_polls_total", "outcome" => "offline").increment(1);
                warn!(worker = self.id, node = %node, error = %e, "error checking node");
            }
        }
        true
    }

    /// Poll seeds in passes until every seed is fresh.
    ///
    /// Seeds reserved by a sibling worker are skipped for this pass; the pass
    /// loop only ends once all seeds are fresh at the same time. Returns false
    /// if shutdown was requested first.
    pub async fn check_seeds(&mut self, shutdown: &mut oneshot::Receiver<()>) -> bool {
        let census = Arc::clone(&self.census);
        let interval = census.interval();

        while !all_fresh(census.seeds(), interval) {
            for seed in census.seeds() {
                let Some(lease) = Lease::try_acquire(seed) else {
                    continue;
                };
                info!(worker = self.id, seed = %seed, "checking seed");
                if let Err(e) = self.check_node(lease).await {
                    warn!(worker = self.id, seed = %seed, error = %e, "error checking seed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.wait) => {}
                _ = &mut *shutdown => return false,
            }
        }

        true
    }

    /// Poll the leased node through this worker's vantage point.
    ///
    /// 1. Liveness check; failure marks the node offline.
    /// 2. Connect to the node unless already connected.
    /// 3. List the vantage point's known peers; failure marks the node offline.
    /// 4. Add every newly seen peer to the census.
    /// 5. Replace the node's connections, mark it online and stamp it.
    ///
    /// The lease is released when this returns, on every path.
    pub async fn check_node(&mut self, lease: Lease) -> Result<()> {
        let node = Arc::clone(lease.node());
        let address = node.address();

        let version = match with_deadline(
            self.call_timeout,
            "query_liveness",
            self.driver.query_liveness(address),
        )
        .await
        {
            Ok(version) => version,
            Err(e) => {
                lease.update(|f| f.online = false);
                return Err(e);
            }
        };
        lease.update(|f| f.version = version);

        let connected = with_deadline(
            self.call_timeout,
            "is_connected_to",
            self.driver.is_connected_to(address),
        )
        .await?;
        if !connected {
            with_deadline(self.call_timeout, "connect_to", self.driver.connect_to(address)).await?;
        }

        let KnownPeers {
            self_addresses,
            peers,
        } = match with_deadline(
            self.call_timeout,
            "list_known_peers",
            self.driver.list_known_peers(),
        )
        .await
        {
            Ok(known) => known,
            Err(e) => {
                lease.update(|f| f.online = false);
                return Err(e);
            }
        };

        let peers: BTreeSet<String> = peers
            .into_iter()
            .filter(|p| !self_addresses.contains(p))
            .collect();
        for peer in &peers {
            self.census.add_to_census(Arc::new(Node::new(peer.as_str())));
        }

        lease.update(|f| {
            f.connections = peers;
            f.online = true;
            f.last_checked = Some(Instant::now());
        });
        self.census.add_to_census(node);

        Ok(())
    }

    async fn teardown(&mut self) {
        if let Err(e) = with_deadline(self.call_timeout, "stop", self.driver.stop()).await {
            warn!(worker = self.id, error = %e, "failed to stop vantage point");
        }
        self.status.set(false);
        self.notify(WorkerNotification::Stopped { worker: self.id });
    }

    fn notify(&self, notification: WorkerNotification) {
        self.census.notify(notification);
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("wait", &self.wait)
            .field("running", &self.is_running())
            .finish()
    }
}
