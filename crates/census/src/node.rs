//! Node records for the census.
//!
//! A [`Node`] is what we last learned about one participant of the p2p
//! network. Its address never changes; everything else lives behind the
//! node's own field lock and is only written by the worker holding the node's
//! [`Lease`].
//!
//! # Locking
//!
//! Two independent guards protect a node:
//!
//! - the **lease**, an atomic free/busy flag deciding which worker may poll it
//! - the **field lock**, a reader/writer lock over the recorded state
//!
//! The lease is always taken before the field lock and cleared only after the
//! field lock has been released. [`Lease::update`] holds the field lock for the
//! duration of one closure, so the two can never be acquired in the opposite
//! order.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Mutable state recorded for a node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeFields {
    /// Version string reported by the node's liveness check.
    pub version: String,
    /// How many connections away from our vantage points the node was found.
    /// Never computed by the engine; carried for external consumers.
    pub hops: u32,
    /// Whether the node answered the last time we checked it.
    pub online: bool,
    /// When the node was last successfully polled. `None` until the first
    /// successful poll, which makes a fresh record stale.
    pub last_checked: Option<Instant>,
    /// Addresses of the node's known neighbours.
    ///
    /// These are weak references: they are resolved through the census by
    /// address lookup and never keep the neighbour's record alive.
    pub connections: BTreeSet<String>,
}

/// What we know about one participant of the p2p network.
#[derive(Debug)]
pub struct Node {
    address: String,
    fields: RwLock<NodeFields>,
    busy: AtomicBool,
}

impl Node {
    /// Construct a node that has never been polled.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_fields(address, NodeFields::default())
    }

    pub fn with_fields(address: impl Into<String>, fields: NodeFields) -> Self {
        Self {
            address: address.into(),
            fields: RwLock::new(fields),
            busy: AtomicBool::new(false),
        }
    }

    /// `ip:port` of the node. This is the node's identity in the census.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn version(&self) -> String {
        self.fields.read().version.clone()
    }

    pub fn hops(&self) -> u32 {
        self.fields.read().hops
    }

    pub fn is_online(&self) -> bool {
        self.fields.read().online
    }

    pub fn last_checked(&self) -> Option<Instant> {
        self.fields.read().last_checked
    }

    /// Copy of all recorded fields, taken under one read lock.
    pub fn fields(&self) -> NodeFields {
        self.fields.read().clone()
    }

    /// Snapshot of the neighbour set.
    ///
    /// Taken under the field read lock, so a concurrent poll is observed
    /// either entirely or not at all.
    pub fn connections(&self) -> Vec<String> {
        self.fields.read().connections.iter().cloned().collect()
    }

    /// True if the node's last check is older than `d`.
    ///
    /// A node that has never been checked is always stale.
    pub fn is_stale(&self, d: Duration) -> bool {
        self.is_stale_at(d, Instant::now())
    }

    /// True iff `last_checked + d` is strictly before `now`.
    ///
    /// At the exact boundary (`now == last_checked + d`) the node is still
    /// fresh. A `d` too large to add to `last_checked` never expires.
    pub fn is_stale_at(&self, d: Duration, now: Instant) -> bool {
        match self.fields.read().last_checked {
            Some(checked) => checked.checked_add(d).is_some_and(|due| due < now),
            None => true,
        }
    }

    /// True while a worker holds this node's lease.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Attempt the free -> busy transition. Returns true iff this caller won.
    pub(crate) fn reserve(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// busy -> free. Only [`Lease`] calls this, exactly once per reservation.
    pub(crate) fn free(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Serializable view of the node for dashboards and reports.
    pub fn snapshot(&self) -> NodeSnapshot {
        let now = Instant::now();
        let fields = self.fields.read();
        NodeSnapshot {
            address: self.address.clone(),
            version: fields.version.clone(),
            hops: fields.hops,
            online: fields.online,
            checked_ago_ms: fields
                .last_checked
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            last_checked: fields.last_checked,
            connections: fields.connections.iter().cloned().collect(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Returns true if none of the nodes' last checks are older than `d`.
pub fn all_fresh(nodes: &[Arc<Node>], d: Duration) -> bool {
    nodes.iter().all(|n| !n.is_stale(d))
}

/// Exclusive right to poll one node and update its fields.
///
/// Acquiring a lease is the only way to mutate a node. The lease is returned
/// when the guard is dropped, on every exit path including unwinding.
#[derive(Debug)]
pub struct Lease {
    node: Arc<Node>,
}

impl Lease {
    /// Reserve `node`, or return `None` if another worker already holds it.
    ///
    /// Never blocks: contention is resolved by a single compare-and-swap.
    pub fn try_acquire(node: &Arc<Node>) -> Option<Lease> {
        if node.reserve() {
            Some(Lease {
                node: Arc::clone(node),
            })
        } else {
            None
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Run `f` with the node's field write lock held.
    ///
    /// Readers see the fields either before or after `f`, never in between.
    pub fn update<R>(&self, f: impl FnOnce(&mut NodeFields) -> R) -> R {
        let mut fields = self.node.fields.write();
        f(&mut fields)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.node.free();
    }
}

/// Point-in-time copy of a node, suitable for rendering or JSON output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub address: String,
    pub version: String,
    pub hops: u32,
    pub online: bool,
    /// Milliseconds since the last successful poll, if any.
    pub checked_ago_ms: Option<u64>,
    #[serde(skip)]
    pub last_checked: Option<Instant>,
    pub connections: Vec<String>,
}
