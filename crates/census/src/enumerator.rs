//! The census registry and scheduler.
//!
//! An [`Enumerator`] owns the map of every node discovered so far, hands out
//! polling permission to workers, and supervises the worker pool.
//!
//! # Locking
//!
//! The node map sits behind one reader/writer lock that only guards
//! membership. A node's contents are guarded by the node itself (see
//! [`crate::node`]). Map operations hold the map lock briefly; no caller keeps
//! it across a poll, so nodes discovered mid-scan are simply picked up on a
//! later scan.
//!
//! # Lifecycle
//!
//! ```text
//! new(seeds) ──► start() ──► [coordinator spawns N workers] ──► stop()
//!                              │                                   │
//!                              └─ relays worker notifications ◄────┘ drains all workers
//! ```
//!
//! `start` and `stop` each take effect once; later calls are no-ops.

use crate::config::CensusConfig;
use crate::driver::DriverFactory;
use crate::error::{Error, Result};
use crate::node::{Lease, Node, NodeSnapshot};
use crate::worker::{Worker, WorkerStatus};
use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

/// Capacity of the notification broadcast seen by subscribers.
const NOTIFICATION_CAPACITY: usize = 64;

/// Status messages from workers, logged by the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerNotification {
    /// The worker's vantage point could not be created; the batch is torn down.
    CreateFailed { worker: usize, error: String },
    Started { worker: usize },
    /// The worker's vantage point failed to start; the worker has exited.
    StartFailed { worker: usize, error: String },
    Stopped { worker: usize },
}

impl fmt::Display for WorkerNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerNotification::CreateFailed { worker, error } => {
                write!(f, "failed to create worker {}: {}", worker, error)
            }
            WorkerNotification::Started { worker } => write!(f, "worker {} started", worker),
            WorkerNotification::StartFailed { worker, error } => {
                write!(f, "worker {} failed to start vantage point: {}", worker, error)
            }
            WorkerNotification::Stopped { worker } => write!(f, "worker {} stopped", worker),
        }
    }
}

/// Collects information from participants of the p2p network and makes it
/// available to other tasks (dashboards, reports).
pub struct Enumerator {
    /// Nodes the first census starts from. Every seed is also in `nodes`.
    seeds: Vec<Arc<Node>>,
    /// Every node we have collected census for, keyed by address.
    nodes: RwLock<HashMap<String, Arc<Node>>>,
    config: CensusConfig,
    factory: Arc<dyn DriverFactory>,
    started: AtomicBool,
    stopped: AtomicBool,
    quit: watch::Sender<bool>,
    notify_tx: mpsc::UnboundedSender<WorkerNotification>,
    notify_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerNotification>>>,
    /// Notifications relayed by the coordinator, for subscribers.
    events: broadcast::Sender<WorkerNotification>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

struct WorkerHandle {
    shutdown: oneshot::Sender<()>,
    status: WorkerStatus,
    task: JoinHandle<()>,
}

impl Enumerator {
    /// Build an enumerator over `seeds`.
    ///
    /// Seeds are added to the census immediately; duplicate addresses are
    /// collapsed into one record. Call [`start`](Self::start) to begin polling.
    pub fn new<I, S>(seeds: I, config: CensusConfig, factory: Arc<dyn DriverFactory>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        config.validate()?;

        let mut nodes = HashMap::new();
        let mut seed_nodes = Vec::new();
        for address in seeds {
            let address = address.into();
            if nodes.contains_key(&address) {
                continue;
            }
            let node = Arc::new(Node::new(address.clone()));
            nodes.insert(address, Arc::clone(&node));
            seed_nodes.push(node);
        }

        let (quit, _) = watch::channel(false);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Ok(Self {
            seeds: seed_nodes,
            nodes: RwLock::new(nodes),
            config,
            factory,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            quit,
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
            events,
            coordinator: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CensusConfig {
        &self.config
    }

    /// How often each node is re-polled.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn seeds(&self) -> &[Arc<Node>] {
        &self.seeds
    }

    pub(crate) fn driver_factory(&self) -> &dyn DriverFactory {
        self.factory.as_ref()
    }

    /// Add `node` to the census unless its address is already known.
    ///
    /// Returns true if the node was inserted. An existing record is never
    /// replaced.
    pub fn add_to_census(&self, node: Arc<Node>) -> bool {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(node.address()) {
            return false;
        }
        nodes.insert(node.address().to_string(), node);
        gauge!("census_nodes").set(nodes.len() as f64);
        true
    }

    /// Remove the node with `node`'s address from the census.
    pub fn remove_from_census(&self, node: &Node) -> Option<Arc<Node>> {
        let mut nodes = self.nodes.write();
        let removed = nodes.remove(node.address());
        gauge!("census_nodes").set(nodes.len() as f64);
        removed
    }

    pub fn get(&self, address: &str) -> Option<Arc<Node>> {
        self.nodes.read().get(address).cloned()
    }

    pub fn is_in_census(&self, node: &Node) -> bool {
        self.nodes.read().contains_key(node.address())
    }

    /// Snapshot of every known node.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Serializable view of the node at `address`.
    pub fn node_info(&self, address: &str) -> Result<NodeSnapshot> {
        self.get(address)
            .map(|n| n.snapshot())
            .ok_or_else(|| Error::NotFound(address.to_string()))
    }

    /// Resolve `node`'s neighbour addresses to census records.
    ///
    /// Neighbours that are not (or no longer) in the census are skipped.
    pub fn connections_of(&self, node: &Node) -> Vec<Arc<Node>> {
        let addresses = node.connections();
        let nodes = self.nodes.read();
        addresses.iter().filter_map(|a| nodes.get(a).cloned()).collect()
    }

    /// Reserve a node that is due for polling.
    ///
    /// Scans the census in unspecified order and returns a lease on the first
    /// node that is stale and not held by another worker. Returns `None` when
    /// nothing is both stale and free.
    pub fn pick_node(&self) -> Option<Lease> {
        let nodes = self.nodes.read();
        for node in nodes.values() {
            if !node.is_stale(self.config.interval) {
                continue;
            }
            if let Some(lease) = Lease::try_acquire(node) {
                trace!(node = %node, "reserved node for polling");
                return Some(lease);
            }
        }
        None
    }

    /// Start enumeration in a background task.
    ///
    /// Must be called from within a tokio runtime. Only the first call has an
    /// effect.
    ///
    /// A census that was already stopped is never started.
    pub fn start(self: &Arc<Self>) {
        // Held until the handle is stored, so a concurrent `stop` always
        // finds it.
        let mut coordinator = self.coordinator.lock();
        if self.stopped.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let Some(notifications) = self.notify_rx.lock().take() else {
            return;
        };
        let census = Arc::clone(self);
        *coordinator = Some(tokio::spawn(census.enumeration(notifications)));
    }

    /// Stop enumeration and wait for every worker to exit.
    ///
    /// Returns immediately if enumeration was never started. Only the first
    /// call has an effect.
    pub async fn stop(&self) {
        let handle = {
            let mut coordinator = self.coordinator.lock();
            if self.stopped.swap(true, Ordering::AcqRel) {
                return;
            }
            self.quit.send_replace(true);
            coordinator.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "census coordinator failed");
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Receive every worker notification the coordinator relays from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerNotification> {
        self.events.subscribe()
    }

    pub(crate) fn notify(&self, notification: WorkerNotification) {
        // The receiver lives as long as the coordinator; after shutdown there
        // is nobody left to log for.
        let _ = self.notify_tx.send(notification);
    }

    /// Coordination routine: spawn the worker pool, relay notifications, and
    /// cascade shutdown.
    async fn enumeration(
        self: Arc<Self>,
        mut notifications: mpsc::UnboundedReceiver<WorkerNotification>,
    ) {
        let mut quit = self.quit.subscribe();

        info!(
            workers = self.config.workers,
            network = %self.config.network,
            seeds = self.seeds.len(),
            "starting census workers"
        );

        let mut workers = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            match Worker::new(Arc::clone(&self), id) {
                Ok(worker) => {
                    let (shutdown, rx) = oneshot::channel();
                    let status = worker.status();
                    let task = tokio::spawn(worker.run(rx));
                    workers.push(WorkerHandle {
                        shutdown,
                        status,
                        task,
                    });
                }
                Err(e) => {
                    self.notify(WorkerNotification::CreateFailed {
                        worker: id,
                        error: e.to_string(),
                    });
                    shutdown_workers(workers).await;
                    self.relay_pending(&mut notifications);
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                Some(notification) = notifications.recv() => self.relay(notification),
                _ = wait_for_quit(&mut quit) => break,
            }
        }

        shutdown_workers(workers).await;
        self.relay_pending(&mut notifications);
        info!(nodes = self.len(), "census stopped");
    }

    /// Log a notification and pass it on to subscribers.
    fn relay(&self, notification: WorkerNotification) {
        match notification {
            WorkerNotification::CreateFailed { .. } | WorkerNotification::StartFailed { .. } => {
                error!("{}", notification)
            }
            _ => info!("{}", notification),
        }
        // No subscribers is fine.
        let _ = self.events.send(notification);
    }

    fn relay_pending(&self, notifications: &mut mpsc::UnboundedReceiver<WorkerNotification>) {
        while let Ok(notification) = notifications.try_recv() {
            self.relay(notification);
        }
    }
}

impl fmt::Debug for Enumerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enumerator")
            .field("seeds", &self.seeds.len())
            .field("nodes", &self.len())
            .field("config", &self.config)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

/// Resolves once shutdown has been requested or the sender is gone.
async fn wait_for_quit(quit: &mut watch::Receiver<bool>) {
    let _ = quit.wait_for(|stop| *stop).await;
}

/// Signal every worker, then wait for all of them to exit.
async fn shutdown_workers(workers: Vec<WorkerHandle>) {
    let running = workers.iter().filter(|w| w.status.is_running()).count();
    info!(workers = workers.len(), running, "stopping census workers");

    let mut tasks = Vec::with_capacity(workers.len());
    for worker in workers {
        // A worker that already exited has dropped its receiver.
        let _ = worker.shutdown.send(());
        tasks.push(worker.task);
    }
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "census worker panicked");
        }
    }
}
