//! The pipeline graph: nodes, slots, and the connections between them.
//!
//! Structurally the graph is a directed graph over *slots*, not nodes: every
//! slot of every node is a vertex, every node carries implicit internal
//! edges from each of its inputs to each of its outputs, and user-visible
//! connections are edges from an output slot of one node to an input slot of
//! another. This makes topological traversal, cycle detection, and
//! reachability questions uniform across both kinds of dependency.
//!
//! Invariants maintained at all times:
//!
//! - the slot graph is acyclic;
//! - every input slot has at most one incoming connection;
//! - every connection was approved by the graph's [`TypeOracle`];
//! - [`Graph::repair`] can always reconcile the slot graph with the nodes'
//!   current slot configurations.
//!
//! # Examples
//!
//! ```rust
//! use pipewright::graph::{Graph, SlotId};
//! # use pipewright::batch::Batch;
//! # use pipewright::node::{Node, NodeDeclaration, NodeStep, StepError};
//! # use pipewright::runner::StepContext;
//! # use pipewright::slot::{SlotDefinition, SlotSchema};
//! # use pipewright::types::NodeCategory;
//! # use std::sync::Arc;
//! # struct Noop;
//! # impl NodeStep for Noop {
//! #     fn process(&self, _: &Batch, _: &mut StepContext<'_>) -> Result<(), StepError> {
//! #         Ok(())
//! #     }
//! # }
//! # struct Decl(&'static str, SlotSchema);
//! # impl NodeDeclaration for Decl {
//! #     fn id(&self) -> &str {
//! #         self.0
//! #     }
//! #     fn category(&self) -> NodeCategory {
//! #         NodeCategory::Processor
//! #     }
//! #     fn slot_schema(&self) -> SlotSchema {
//! #         self.1.clone()
//! #     }
//! #     fn create_step(&self) -> Arc<dyn NodeStep> {
//! #         Arc::new(Noop)
//! #     }
//! # }
//!
//! let mut graph = Graph::default();
//! let reader = graph.insert(Node::from_declaration(Arc::new(Decl(
//!     "reader",
//!     SlotSchema::new(vec![], vec![SlotDefinition::output("Image", "image")]),
//! ))));
//! let blur = graph.insert(Node::from_declaration(Arc::new(Decl(
//!     "blur",
//!     SlotSchema::new(
//!         vec![SlotDefinition::input("Input", "image")],
//!         vec![SlotDefinition::output("Output", "image")],
//!     ),
//! ))));
//!
//! graph
//!     .connect(
//!         &SlotId::output(reader.clone(), "Image"),
//!         &SlotId::input(blur.clone(), "Input"),
//!     )
//!     .unwrap();
//!
//! assert_eq!(&*graph.traverse_nodes(), &[reader, blur]);
//! ```

mod serialization;

use crate::data::{StrictTypeOracle, TypeOracle};
use crate::events::GraphObserver;
use crate::node::Node;
use crate::slot::Slot;
use crate::types::{DataTypeId, Direction, NodeKey};
use crate::utils::{make_unique_key, sanitize_key};
use miette::Diagnostic;
use parking_lot::Mutex;
use petgraph::Direction as EdgeDirection;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Address of one slot in the graph: node key, direction, slot name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    pub node: NodeKey,
    pub direction: Direction,
    pub slot: String,
}

impl SlotId {
    pub fn input(node: impl Into<NodeKey>, slot: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            direction: Direction::Input,
            slot: slot.into(),
        }
    }

    pub fn output(node: impl Into<NodeKey>, slot: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            direction: Direction::Output,
            slot: slot.into(),
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.node, self.slot, self.direction)
    }
}

/// A user-visible connection between an output slot and an input slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotEdge {
    pub source: SlotId,
    pub target: SlotId,
    /// Whether a user may sever this connection. Engine-made connections
    /// (e.g. compartment plumbing) can be marked non-severable.
    pub user_severable: bool,
}

/// Edge weight of the slot graph.
#[derive(Clone, Copy, Debug)]
enum GraphEdge {
    /// Implicit dependency from an input slot to an output slot of the same
    /// node.
    Internal,
    /// A data connection between two nodes.
    Connection { user_severable: bool },
}

/// Errors from node insertion.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("a node with key '{key}' already exists")]
    #[diagnostic(
        code(pipewright::graph::duplicate_key),
        help("use Graph::insert to auto-generate a unique key")
    )]
    DuplicateKey { key: NodeKey },
}

/// Why a connection cannot be made.
#[derive(Debug, Error, Diagnostic)]
pub enum ConnectionError {
    #[error("slot {slot} is an {actual} slot, but an {expected} slot is required here")]
    #[diagnostic(code(pipewright::graph::wrong_direction))]
    WrongDirection {
        slot: SlotId,
        expected: Direction,
        actual: Direction,
    },

    #[error("target {target} already receives data from {existing}")]
    #[diagnostic(
        code(pipewright::graph::target_occupied),
        help("disconnect the existing source first; input slots accept at most one connection")
    )]
    TargetOccupied { target: SlotId, existing: SlotId },

    #[error(
        "type '{source_type}' of {source_slot} is not convertible to type '{target_type}' of {target}"
    )]
    #[diagnostic(code(pipewright::graph::incompatible_types))]
    IncompatibleTypes {
        source_slot: SlotId,
        target: SlotId,
        source_type: DataTypeId,
        target_type: DataTypeId,
    },

    #[error("connecting {source_slot} to {target} would close a cycle")]
    #[diagnostic(code(pipewright::graph::would_cycle))]
    WouldCycle { source_slot: SlotId, target: SlotId },
}

#[derive(Default)]
struct TraversalCache {
    slots: Option<Arc<Vec<SlotId>>>,
    nodes: Option<Arc<Vec<NodeKey>>>,
}

/// A directed, acyclic pipeline graph of nodes with typed data slots.
pub struct Graph {
    nodes: FxHashMap<NodeKey, Node>,
    node_order: Vec<NodeKey>,
    slot_graph: StableDiGraph<SlotId, GraphEdge>,
    slot_indices: FxHashMap<SlotId, NodeIndex>,
    oracle: Arc<dyn TypeOracle>,
    observers: Vec<Box<dyn GraphObserver>>,
    cache: Mutex<TraversalCache>,
}

impl Graph {
    #[must_use]
    pub fn new(oracle: Arc<dyn TypeOracle>) -> Self {
        Self {
            nodes: FxHashMap::default(),
            node_order: Vec::new(),
            slot_graph: StableDiGraph::new(),
            slot_indices: FxHashMap::default(),
            oracle,
            observers: Vec::new(),
            cache: Mutex::new(TraversalCache::default()),
        }
    }

    #[must_use]
    pub fn oracle(&self) -> &Arc<dyn TypeOracle> {
        &self.oracle
    }

    /// Registers an observer for structural change notifications.
    pub fn add_observer(&mut self, observer: Box<dyn GraphObserver>) {
        self.observers.push(observer);
    }

    // ================================================================
    // Node management
    // ================================================================

    /// Inserts a node under an auto-generated key derived from its display
    /// name (sanitized, with a `-2`, `-3`, ... suffix on collision).
    pub fn insert(&mut self, node: Node) -> NodeKey {
        let key = {
            let taken: BTreeSet<&str> = self.nodes.keys().map(NodeKey::as_str).collect();
            NodeKey::new(make_unique_key(&sanitize_key(node.name()), &taken))
        };
        match self.insert_with_key(key.clone(), node) {
            Ok(()) => key,
            Err(_) => unreachable!("freshly generated keys are unique"),
        }
    }

    /// Inserts a node under an explicit key.
    pub fn insert_with_key(&mut self, key: NodeKey, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&key) {
            return Err(GraphError::DuplicateKey { key });
        }
        debug!(key = %key, node = node.name(), "inserting node");
        let slotless = node.input_slots().is_empty() && node.output_slots().is_empty();
        self.nodes.insert(key.clone(), node);
        self.node_order.push(key);
        self.invalidate_cache();
        self.repair();
        // repair only notifies when it touched the slot graph
        if slotless {
            self.notify_changed();
        }
        Ok(())
    }

    /// Removes a node and every connection touching its slots, returning the
    /// node.
    ///
    /// # Panics
    ///
    /// Panics if no node with `key` exists; callers address nodes by keys
    /// the graph handed out, so an unknown key is a programmer error.
    pub fn remove(&mut self, key: &NodeKey) -> Node {
        let Some(node) = self.nodes.remove(key) else {
            panic!("no node '{key}' in graph")
        };
        self.node_order.retain(|k| k != key);
        let stale: Vec<NodeIndex> = self
            .slot_indices
            .iter()
            .filter(|(id, _)| id.node == *key)
            .map(|(_, &ix)| ix)
            .collect();
        for ix in stale {
            if let Some(id) = self.slot_graph.remove_node(ix) {
                self.slot_indices.remove(&id);
            }
        }
        debug!(key = %key, "removed node");
        self.invalidate_cache();
        self.notify_changed();
        node
    }

    /// Removes every node and connection.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.node_order.clear();
        self.slot_graph.clear();
        self.slot_indices.clear();
        self.invalidate_cache();
        self.notify_changed();
    }

    /// Returns the node stored under `key`.
    ///
    /// # Panics
    ///
    /// Panics if no node with `key` exists.
    #[must_use]
    pub fn node(&self, key: &NodeKey) -> &Node {
        self.nodes
            .get(key)
            .unwrap_or_else(|| panic!("no node '{key}' in graph"))
    }

    /// Mutable access to the node stored under `key`. After reconfiguring a
    /// node's slots, call [`Graph::repair`] to reconcile the slot graph.
    ///
    /// # Panics
    ///
    /// Panics if no node with `key` exists.
    pub fn node_mut(&mut self, key: &NodeKey) -> &mut Node {
        self.nodes
            .get_mut(key)
            .unwrap_or_else(|| panic!("no node '{key}' in graph"))
    }

    #[must_use]
    pub fn get_node(&self, key: &NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    #[must_use]
    pub fn contains_node(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Node keys in insertion order.
    pub fn node_keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.node_order.iter()
    }

    /// Nodes with their keys, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeKey, &Node)> {
        self.node_order.iter().map(|k| (k, &self.nodes[k]))
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_indices.len()
    }

    /// Resolves a slot id to the slot it addresses.
    ///
    /// # Panics
    ///
    /// Panics if the node or slot does not exist.
    #[must_use]
    pub fn slot(&self, id: &SlotId) -> &Slot {
        self.node(&id.node)
            .slot(id.direction, &id.slot)
            .unwrap_or_else(|| {
                panic!("no {} slot '{}' on node '{}'", id.direction, id.slot, id.node)
            })
    }

    #[must_use]
    pub fn get_slot(&self, id: &SlotId) -> Option<&Slot> {
        self.nodes.get(&id.node)?.slot(id.direction, &id.slot)
    }

    // ================================================================
    // Repair
    // ================================================================

    /// Reconciles the slot graph with the nodes' current slot
    /// configurations: prunes vertices of removed slots (severing their
    /// connections), adds vertices for new slots, and restores the internal
    /// input-to-output edges of every node.
    ///
    /// Idempotent; observers are notified only when something was actually
    /// modified.
    pub fn repair(&mut self) {
        let mut modified = false;

        let stale: Vec<NodeIndex> = self
            .slot_graph
            .node_indices()
            .filter(|&ix| {
                let id = &self.slot_graph[ix];
                match self.nodes.get(&id.node) {
                    None => true,
                    Some(node) => node.slot(id.direction, &id.slot).is_none(),
                }
            })
            .collect();
        for ix in stale {
            if let Some(id) = self.slot_graph.remove_node(ix) {
                self.slot_indices.remove(&id);
                modified = true;
            }
        }

        for key in &self.node_order {
            let node = &self.nodes[key];
            for slot in node.input_slots().iter().chain(node.output_slots()) {
                let id = SlotId {
                    node: key.clone(),
                    direction: slot.direction(),
                    slot: slot.name().to_string(),
                };
                if !self.slot_indices.contains_key(&id) {
                    let ix = self.slot_graph.add_node(id.clone());
                    self.slot_indices.insert(id, ix);
                    modified = true;
                }
            }
        }

        for key in &self.node_order {
            let node = &self.nodes[key];
            for input in node.input_slots() {
                let from = self.slot_indices[&SlotId::input(key.clone(), input.name())];
                for output in node.output_slots() {
                    let to = self.slot_indices[&SlotId::output(key.clone(), output.name())];
                    if self.slot_graph.find_edge(from, to).is_none() {
                        self.slot_graph.add_edge(from, to, GraphEdge::Internal);
                        modified = true;
                    }
                }
            }
        }

        if modified {
            debug!("repair modified the slot graph");
            self.invalidate_cache();
            self.notify_changed();
        }
    }

    // ================================================================
    // Connections
    // ================================================================

    /// Checks direction, target occupancy, and type compatibility, without
    /// the (more expensive) cycle check.
    ///
    /// # Panics
    ///
    /// Panics if either slot id does not resolve.
    pub fn can_connect_fast(
        &self,
        source: &SlotId,
        target: &SlotId,
    ) -> Result<(), ConnectionError> {
        let source_slot = self.slot(source);
        let target_slot = self.slot(target);
        if !source_slot.is_output() {
            return Err(ConnectionError::WrongDirection {
                slot: source.clone(),
                expected: Direction::Output,
                actual: source_slot.direction(),
            });
        }
        if !target_slot.is_input() {
            return Err(ConnectionError::WrongDirection {
                slot: target.clone(),
                expected: Direction::Input,
                actual: target_slot.direction(),
            });
        }
        if let Some(existing) = self.get_source(target) {
            return Err(ConnectionError::TargetOccupied {
                target: target.clone(),
                existing,
            });
        }
        if !self
            .oracle
            .is_convertible(source_slot.data_type(), target_slot.data_type())
        {
            return Err(ConnectionError::IncompatibleTypes {
                source_slot: source.clone(),
                target: target.clone(),
                source_type: source_slot.data_type().clone(),
                target_type: target_slot.data_type().clone(),
            });
        }
        Ok(())
    }

    /// Full connection check: [`Graph::can_connect_fast`] plus acyclicity.
    pub fn can_connect(&self, source: &SlotId, target: &SlotId) -> Result<(), ConnectionError> {
        self.can_connect_fast(source, target)?;
        let s = self.slot_indices[source];
        let t = self.slot_indices[target];
        // the new edge closes a cycle iff the source is reachable from the target
        if has_path_connecting(&self.slot_graph, t, s, None) {
            return Err(ConnectionError::WouldCycle {
                source_slot: source.clone(),
                target: target.clone(),
            });
        }
        Ok(())
    }

    /// Connects an output slot to an input slot as a user-severable
    /// connection.
    pub fn connect(&mut self, source: &SlotId, target: &SlotId) -> Result<(), ConnectionError> {
        self.connect_with(source, target, true)
    }

    /// As [`Graph::connect`], with explicit severability.
    pub fn connect_with(
        &mut self,
        source: &SlotId,
        target: &SlotId,
        user_severable: bool,
    ) -> Result<(), ConnectionError> {
        self.can_connect(source, target)?;
        let s = self.slot_indices[source];
        let t = self.slot_indices[target];
        self.slot_graph
            .add_edge(s, t, GraphEdge::Connection { user_severable });
        debug!(source = %source, target = %target, "connected");
        self.invalidate_cache();
        self.notify_changed();
        self.notify_connected(source, target);
        Ok(())
    }

    /// Severs the connection from `source` to `target`. Returns whether a
    /// connection was removed; `by_user` requests fail silently on
    /// non-severable connections.
    pub fn disconnect(&mut self, source: &SlotId, target: &SlotId, by_user: bool) -> bool {
        let (Some(&s), Some(&t)) = (self.slot_indices.get(source), self.slot_indices.get(target))
        else {
            return false;
        };
        let Some(edge) = self.slot_graph.find_edge(s, t) else {
            return false;
        };
        match self.slot_graph.edge_weight(edge) {
            Some(&GraphEdge::Connection { user_severable }) => {
                if by_user && !user_severable {
                    return false;
                }
            }
            _ => return false,
        }
        self.slot_graph.remove_edge(edge);
        debug!(source = %source, target = %target, "disconnected");
        self.invalidate_cache();
        self.notify_changed();
        self.notify_disconnected(source, target);
        true
    }

    /// Severs every connection touching `slot`. Returns the number of
    /// connections removed.
    pub fn disconnect_all(&mut self, slot: &SlotId, by_user: bool) -> usize {
        let pairs: Vec<(SlotId, SlotId)> = match slot.direction {
            Direction::Input => self
                .get_source(slot)
                .map(|src| vec![(src, slot.clone())])
                .unwrap_or_default(),
            Direction::Output => self
                .get_targets(slot)
                .into_iter()
                .map(|t| (slot.clone(), t))
                .collect(),
        };
        let mut severed = 0;
        for (s, t) in pairs {
            if self.disconnect(&s, &t, by_user) {
                severed += 1;
            }
        }
        severed
    }

    /// Whether a user may sever the connection from `source` to `target`.
    #[must_use]
    pub fn is_user_severable(&self, source: &SlotId, target: &SlotId) -> bool {
        let (Some(&s), Some(&t)) = (self.slot_indices.get(source), self.slot_indices.get(target))
        else {
            return false;
        };
        matches!(
            self.slot_graph
                .find_edge(s, t)
                .and_then(|e| self.slot_graph.edge_weight(e)),
            Some(&GraphEdge::Connection {
                user_severable: true
            })
        )
    }

    /// Whether a connection from `source` to `target` exists.
    #[must_use]
    pub fn contains_edge(&self, source: &SlotId, target: &SlotId) -> bool {
        let (Some(&s), Some(&t)) = (self.slot_indices.get(source), self.slot_indices.get(target))
        else {
            return false;
        };
        matches!(
            self.slot_graph
                .find_edge(s, t)
                .and_then(|e| self.slot_graph.edge_weight(e)),
            Some(&GraphEdge::Connection { .. })
        )
    }

    /// The unique source feeding `target`, if any. Returns `None` for
    /// output slots and unknown ids.
    #[must_use]
    pub fn get_source(&self, target: &SlotId) -> Option<SlotId> {
        if !target.direction.is_input() {
            return None;
        }
        let &ix = self.slot_indices.get(target)?;
        let mut sources = self
            .slot_graph
            .edges_directed(ix, EdgeDirection::Incoming)
            .filter(|e| matches!(e.weight(), GraphEdge::Connection { .. }))
            .map(|e| e.source());
        let first = sources.next()?;
        assert!(
            sources.next().is_none(),
            "input {target} has multiple sources"
        );
        Some(self.slot_graph[first].clone())
    }

    /// Every input slot fed by `source`, sorted. Empty for input slots and
    /// unknown ids.
    #[must_use]
    pub fn get_targets(&self, source: &SlotId) -> Vec<SlotId> {
        if !source.direction.is_output() {
            return Vec::new();
        }
        let Some(&ix) = self.slot_indices.get(source) else {
            return Vec::new();
        };
        let mut targets: Vec<SlotId> = self
            .slot_graph
            .edges_directed(ix, EdgeDirection::Outgoing)
            .filter(|e| matches!(e.weight(), GraphEdge::Connection { .. }))
            .map(|e| self.slot_graph[e.target()].clone())
            .collect();
        targets.sort();
        targets
    }

    /// Every output slot that could legally feed `target` right now, sorted.
    #[must_use]
    pub fn available_sources(&self, target: &SlotId) -> Vec<SlotId> {
        let mut sources: Vec<SlotId> = self
            .slot_indices
            .keys()
            .filter(|id| id.direction.is_output() && self.can_connect(id, target).is_ok())
            .cloned()
            .collect();
        sources.sort();
        sources
    }

    /// Every input slot `source` could legally feed right now, sorted.
    #[must_use]
    pub fn available_targets(&self, source: &SlotId) -> Vec<SlotId> {
        let mut targets: Vec<SlotId> = self
            .slot_indices
            .keys()
            .filter(|id| id.direction.is_input() && self.can_connect(source, id).is_ok())
            .cloned()
            .collect();
        targets.sort();
        targets
    }

    /// Every connection in the graph, sorted by source then target.
    #[must_use]
    pub fn slot_edges(&self) -> Vec<SlotEdge> {
        let mut edges: Vec<SlotEdge> = self
            .slot_graph
            .edge_references()
            .filter_map(|e| match e.weight() {
                GraphEdge::Connection { user_severable } => Some(SlotEdge {
                    source: self.slot_graph[e.source()].clone(),
                    target: self.slot_graph[e.target()].clone(),
                    user_severable: *user_severable,
                }),
                GraphEdge::Internal => None,
            })
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
        edges
    }

    // ================================================================
    // Traversal
    // ================================================================

    /// All slots in topological order (sources before consumers). Cached
    /// until the next structural mutation.
    ///
    /// # Panics
    ///
    /// Panics if the slot graph contains a cycle, which the connection
    /// checks make unreachable.
    #[must_use]
    pub fn traverse_slots(&self) -> Arc<Vec<SlotId>> {
        if let Some(cached) = self.cache.lock().slots.clone() {
            return cached;
        }
        let order = toposort(&self.slot_graph, None)
            .unwrap_or_else(|_| panic!("pipeline graph contains a cycle"));
        let slots: Arc<Vec<SlotId>> = Arc::new(
            order
                .into_iter()
                .map(|ix| self.slot_graph[ix].clone())
                .collect(),
        );
        self.cache.lock().slots = Some(Arc::clone(&slots));
        slots
    }

    /// All nodes in a valid execution order: each node appears at the first
    /// position one of its output slots appears in the slot traversal;
    /// nodes without output slots follow in insertion order. Cached until
    /// the next structural mutation.
    #[must_use]
    pub fn traverse_nodes(&self) -> Arc<Vec<NodeKey>> {
        if let Some(cached) = self.cache.lock().nodes.clone() {
            return cached;
        }
        let slots = self.traverse_slots();
        let mut seen: FxHashSet<NodeKey> = FxHashSet::default();
        let mut order: Vec<NodeKey> = Vec::with_capacity(self.nodes.len());
        for id in slots.iter() {
            if id.direction.is_output() && seen.insert(id.node.clone()) {
                order.push(id.node.clone());
            }
        }
        for key in &self.node_order {
            if seen.insert(key.clone()) {
                order.push(key.clone());
            }
        }
        let order = Arc::new(order);
        self.cache.lock().nodes = Some(Arc::clone(&order));
        order
    }

    /// Nodes that will not execute: disabled nodes, and nodes with a
    /// non-optional input that has no source or whose source node is itself
    /// deactivated. Keys in `externally_satisfied` are exempt (their inputs
    /// are filled from outside the graph).
    #[must_use]
    pub fn deactivated_nodes(
        &self,
        externally_satisfied: &FxHashSet<NodeKey>,
    ) -> FxHashSet<NodeKey> {
        let mut deactivated = FxHashSet::default();
        for key in self.traverse_nodes().iter() {
            if externally_satisfied.contains(key) {
                continue;
            }
            let node = self.node(key);
            if !node.is_enabled() {
                deactivated.insert(key.clone());
                continue;
            }
            let mut starved = false;
            for slot in node.input_slots() {
                if slot.is_optional() {
                    continue;
                }
                let id = SlotId::input(key.clone(), slot.name());
                match self.get_source(&id) {
                    None => {
                        starved = true;
                        break;
                    }
                    Some(src) => {
                        if deactivated.contains(&src.node) {
                            starved = true;
                            break;
                        }
                    }
                }
            }
            if starved {
                deactivated.insert(key.clone());
            }
        }
        deactivated
    }

    /// Every node upstream of `key` (transitively), in execution order.
    ///
    /// # Panics
    ///
    /// Panics if no node with `key` exists.
    #[must_use]
    pub fn predecessors(&self, key: &NodeKey) -> Vec<NodeKey> {
        let node = self.node(key);
        let mut stack: Vec<NodeIndex> = node
            .input_slots()
            .iter()
            .filter_map(|s| {
                self.slot_indices
                    .get(&SlotId::input(key.clone(), s.name()))
                    .copied()
            })
            .collect();
        let mut seen: FxHashSet<NodeIndex> = stack.iter().copied().collect();
        let mut upstream: FxHashSet<NodeKey> = FxHashSet::default();
        while let Some(ix) = stack.pop() {
            for edge in self.slot_graph.edges_directed(ix, EdgeDirection::Incoming) {
                let src = edge.source();
                if seen.insert(src) {
                    upstream.insert(self.slot_graph[src].node.clone());
                    stack.push(src);
                }
            }
        }
        upstream.remove(key);
        self.traverse_nodes()
            .iter()
            .filter(|k| upstream.contains(k))
            .cloned()
            .collect()
    }

    /// Structure-preserving copy: same keys, duplicated nodes (fresh UUIDs,
    /// no data rows), same connections. Observers are not copied.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        let mut copy = Self::new(Arc::clone(&self.oracle));
        for key in &self.node_order {
            let node = self.nodes[key].duplicate();
            if copy.insert_with_key(key.clone(), node).is_err() {
                unreachable!("source graph keys are unique");
            }
        }
        for edge in self.slot_edges() {
            if let Err(error) = copy.connect_with(&edge.source, &edge.target, edge.user_severable) {
                unreachable!("connection valid in the source graph: {error}");
            }
        }
        copy
    }

    // ================================================================
    // Internals
    // ================================================================

    fn invalidate_cache(&self) {
        let mut cache = self.cache.lock();
        cache.slots = None;
        cache.nodes = None;
    }

    fn notify_changed(&self) {
        for observer in &self.observers {
            observer.on_graph_changed(self);
        }
    }

    fn notify_connected(&self, source: &SlotId, target: &SlotId) {
        for observer in &self.observers {
            observer.on_connected(self, source, target);
        }
    }

    fn notify_disconnected(&self, source: &SlotId, target: &SlotId) {
        for observer in &self.observers {
            observer.on_disconnected(self, source, target);
        }
    }
}

impl Default for Graph {
    /// An empty graph with the [`StrictTypeOracle`].
    fn default() -> Self {
        Self::new(Arc::new(StrictTypeOracle))
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.node_order)
            .field("slots", &self.slot_indices.len())
            .field("connections", &self.slot_edges().len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
