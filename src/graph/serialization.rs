//! JSON projection of a pipeline graph.
//!
//! The persisted form carries topology and per-node settings only, never
//! data rows: a `nodes` object keyed by node key, and an `edges` array of
//! `{source-node, source-slot, target-node, target-slot}` records. Loading
//! is best-effort: instructions that cannot be applied (unknown declaration,
//! dangling edge endpoint, occupied target) are skipped with a warning so
//! one corrupt entry cannot take the rest of the file down.

use crate::data::TypeOracle;
use crate::graph::{Graph, SlotId};
use crate::node::{DeclarationRegistry, Node, NodeBehavior};
use crate::types::NodeKey;
use crate::utils::sanitize_key;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct NodeDocument {
    node_type: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    pass_through: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compartment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    work_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    behavior: Option<NodeBehavior>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct EdgeDocument {
    source_node: String,
    source_slot: String,
    target_node: String,
    target_slot: String,
}

impl Graph {
    /// Serializes topology and node settings to JSON. Data rows are never
    /// persisted. Node keys and edge node references are sanitized so the
    /// emitted keys survive a reload unchanged. Connections between slots
    /// of the same node are not emitted (none can exist while the
    /// acyclicity invariant holds).
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut nodes = Map::new();
        for (key, node) in self.nodes() {
            let doc = NodeDocument {
                node_type: node.declaration().id().to_string(),
                name: node.name().to_string(),
                description: node.description().to_string(),
                enabled: node.is_enabled(),
                pass_through: node.is_pass_through(),
                compartment: node.compartment().map(str::to_string),
                work_directory: node.work_directory().cloned(),
                behavior: Some(node.behavior().clone()),
            };
            match serde_json::to_value(&doc) {
                Ok(value) => {
                    nodes.insert(sanitize_key(key.as_str()), value);
                }
                Err(error) => {
                    warn!(node = %key, %error, "failed to serialize node settings, skipping");
                }
            }
        }

        let mut edges = Vec::new();
        for edge in self.slot_edges() {
            if edge.source.node == edge.target.node {
                continue;
            }
            edges.push(json!({
                "source-node": sanitize_key(edge.source.node.as_str()),
                "source-slot": edge.source.slot,
                "target-node": sanitize_key(edge.target.node.as_str()),
                "target-slot": edge.target.slot,
            }));
        }

        json!({
            "nodes": Value::Object(nodes),
            "edges": edges,
        })
    }

    /// Loads nodes and connections from a JSON document produced by
    /// [`Graph::to_json`], resolving node types through `registry`.
    ///
    /// Best-effort: entries that cannot be applied are skipped with a
    /// warning. Keys already present in the graph are reused (the stored
    /// settings are ignored for them); their edges still load.
    pub fn load_json(&mut self, json: &Value, registry: &dyn DeclarationRegistry) {
        let Some(nodes) = json.get("nodes").and_then(Value::as_object) else {
            warn!("graph document has no 'nodes' object, nothing to load");
            return;
        };

        for (raw_key, doc) in nodes {
            let key = NodeKey::new(sanitize_key(raw_key));
            if self.contains_node(&key) {
                continue;
            }
            let doc: NodeDocument = match serde_json::from_value(doc.clone()) {
                Ok(doc) => doc,
                Err(error) => {
                    warn!(node = %key, %error, "skipping malformed node entry");
                    continue;
                }
            };
            let Some(declaration) = registry.declaration_for(&doc.node_type) else {
                warn!(
                    node = %key,
                    node_type = %doc.node_type,
                    "skipping node with unknown type"
                );
                continue;
            };
            let mut node = Node::from_declaration(declaration);
            node.set_name(doc.name);
            node.set_description(doc.description);
            node.set_enabled(doc.enabled);
            node.set_pass_through(doc.pass_through);
            node.set_compartment(doc.compartment);
            node.set_work_directory(doc.work_directory);
            if let Some(behavior) = doc.behavior {
                node.set_behavior(behavior);
            }
            if let Err(error) = self.insert_with_key(key.clone(), node) {
                warn!(node = %key, %error, "skipping node that failed to insert");
            }
        }

        let Some(edges) = json.get("edges").and_then(Value::as_array) else {
            return;
        };
        for entry in edges {
            let doc: EdgeDocument = match serde_json::from_value(entry.clone()) {
                Ok(doc) => doc,
                Err(error) => {
                    warn!(%error, "skipping malformed edge entry");
                    continue;
                }
            };
            let source = SlotId::output(sanitize_key(&doc.source_node), doc.source_slot);
            let target = SlotId::input(sanitize_key(&doc.target_node), doc.target_slot);
            if self.get_slot(&source).is_none() {
                warn!(%source, "skipping edge with dangling source");
                continue;
            }
            if self.get_slot(&target).is_none() {
                warn!(%target, "skipping edge with dangling target");
                continue;
            }
            if self.contains_edge(&source, &target) {
                continue;
            }
            if let Err(error) = self.connect(&source, &target) {
                warn!(%source, %target, %error, "skipping edge that cannot be connected");
            }
        }
    }

    /// Builds a graph from a JSON document. Equivalent to [`Graph::load_json`]
    /// into an empty graph with the given oracle.
    #[must_use]
    pub fn from_json(
        json: &Value,
        registry: &dyn DeclarationRegistry,
        oracle: Arc<dyn TypeOracle>,
    ) -> Self {
        let mut graph = Self::new(oracle);
        graph.load_json(json, registry);
        graph
    }
}
