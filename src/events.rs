//! Structural change notifications.
//!
//! A [`GraphObserver`] registered on a [`Graph`](crate::graph::Graph) is
//! called synchronously whenever the graph's structure changes: after every
//! mutation batch (`on_graph_changed`) and around individual connection
//! changes. Observers receive the graph by reference and must not attempt
//! to mutate it.

use crate::graph::{Graph, SlotId};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Receives structural change notifications from a graph.
///
/// All methods default to no-ops, so an observer only implements the events
/// it cares about.
pub trait GraphObserver: Send + Sync {
    /// The graph's structure changed: a node or connection was added or
    /// removed, or a repair modified the slot graph.
    fn on_graph_changed(&self, graph: &Graph) {
        let _ = graph;
    }

    /// A connection from `source` to `target` was established.
    fn on_connected(&self, graph: &Graph, source: &SlotId, target: &SlotId) {
        let _ = (graph, source, target);
    }

    /// The connection from `source` to `target` was severed.
    fn on_disconnected(&self, graph: &Graph, source: &SlotId, target: &SlotId) {
        let _ = (graph, source, target);
    }
}

/// An observer that counts change notifications. Handy for asserting that an
/// operation did (or did not) touch the graph.
///
/// Clones share their counters, so a clone can be registered on the graph
/// while the original stays with the caller.
#[derive(Clone, Debug, Default)]
pub struct ChangeCounter {
    changed: Arc<AtomicUsize>,
    connected: Arc<AtomicUsize>,
    disconnected: Arc<AtomicUsize>,
}

impl ChangeCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn changed(&self) -> usize {
        self.changed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl GraphObserver for ChangeCounter {
    fn on_graph_changed(&self, _graph: &Graph) {
        self.changed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connected(&self, _graph: &Graph, _source: &SlotId, _target: &SlotId) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnected(&self, _graph: &Graph, _source: &SlotId, _target: &SlotId) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}
