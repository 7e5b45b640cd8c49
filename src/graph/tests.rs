use super::*;
use crate::batch::Batch;
use crate::events::ChangeCounter;
use crate::node::{Node, NodeDeclaration, NodeStep, StepError};
use crate::runner::StepContext;
use crate::slot::{SlotDefinition, SlotSchema};
use crate::types::NodeCategory;

struct Noop;

impl NodeStep for Noop {
    fn process(&self, _batch: &Batch, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        Ok(())
    }
}

struct Decl {
    id: String,
    schema: SlotSchema,
}

impl NodeDeclaration for Decl {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Processor
    }

    fn slot_schema(&self) -> SlotSchema {
        self.schema.clone()
    }

    fn create_step(&self) -> Arc<dyn NodeStep> {
        Arc::new(Noop)
    }
}

fn node(id: &str, inputs: Vec<SlotDefinition>, outputs: Vec<SlotDefinition>) -> Node {
    Node::from_declaration(Arc::new(Decl {
        id: id.to_string(),
        schema: SlotSchema::new(inputs, outputs),
    }))
}

fn source(id: &str) -> Node {
    node(id, vec![], vec![SlotDefinition::output("Out", "image")])
}

fn processor(id: &str) -> Node {
    node(
        id,
        vec![SlotDefinition::input("In", "image")],
        vec![SlotDefinition::output("Out", "image")],
    )
}

fn sink(id: &str) -> Node {
    node(id, vec![SlotDefinition::input("In", "image")], vec![])
}

#[test]
fn insert_generates_unique_sanitized_keys() {
    let mut graph = Graph::default();
    let mut first = source("reader");
    first.set_name("My Reader");
    let mut second = source("reader");
    second.set_name("My Reader");
    assert_eq!(graph.insert(first), NodeKey::from("my-reader"));
    assert_eq!(graph.insert(second), NodeKey::from("my-reader-2"));
    assert_eq!(graph.node_count(), 2);
}

#[test]
fn insert_with_key_rejects_duplicates() {
    let mut graph = Graph::default();
    graph
        .insert_with_key(NodeKey::from("a"), source("reader"))
        .unwrap();
    let err = graph
        .insert_with_key(NodeKey::from("a"), source("reader"))
        .unwrap_err();
    assert!(matches!(err, GraphError::DuplicateKey { .. }));
}

#[test]
fn removed_key_is_reusable() {
    let mut graph = Graph::default();
    graph
        .insert_with_key(NodeKey::from("a"), source("reader"))
        .unwrap();
    graph.remove(&NodeKey::from("a"));
    assert!(graph
        .insert_with_key(NodeKey::from("a"), source("reader"))
        .is_ok());
}

#[test]
fn connect_and_query_endpoints() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(processor("blur"));
    let out = SlotId::output(a.clone(), "Out");
    let inp = SlotId::input(b.clone(), "In");
    graph.connect(&out, &inp).unwrap();

    assert_eq!(graph.get_source(&inp), Some(out.clone()));
    assert_eq!(graph.get_targets(&out), vec![inp.clone()]);
    assert!(graph.contains_edge(&out, &inp));
    assert!(graph.is_user_severable(&out, &inp));
}

#[test]
fn one_output_may_feed_many_inputs() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(sink("left"));
    let c = graph.insert(sink("right"));
    let out = SlotId::output(a, "Out");
    graph.connect(&out, &SlotId::input(b, "In")).unwrap();
    graph.connect(&out, &SlotId::input(c, "In")).unwrap();
    assert_eq!(graph.get_targets(&out).len(), 2);
}

#[test]
fn occupied_target_rejects_second_source() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(source("reader"));
    let c = graph.insert(sink("sink"));
    let inp = SlotId::input(c, "In");
    graph.connect(&SlotId::output(a, "Out"), &inp).unwrap();
    let err = graph
        .connect(&SlotId::output(b, "Out"), &inp)
        .unwrap_err();
    assert!(matches!(err, ConnectionError::TargetOccupied { .. }));
}

#[test]
fn incompatible_types_are_rejected() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(node(
        "table-sink",
        vec![SlotDefinition::input("In", "table")],
        vec![],
    ));
    let err = graph
        .connect(&SlotId::output(a, "Out"), &SlotId::input(b, "In"))
        .unwrap_err();
    assert!(matches!(err, ConnectionError::IncompatibleTypes { .. }));
}

#[test]
fn wrong_direction_is_rejected() {
    let mut graph = Graph::default();
    let a = graph.insert(processor("blur"));
    let b = graph.insert(processor("sharpen"));
    let err = graph
        .connect(
            &SlotId::input(a.clone(), "In"),
            &SlotId::input(b.clone(), "In"),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::WrongDirection {
            expected: Direction::Output,
            ..
        }
    ));
    let err = graph
        .connect(&SlotId::output(a, "Out"), &SlotId::output(b, "Out"))
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::WrongDirection {
            expected: Direction::Input,
            ..
        }
    ));
}

#[test]
fn connection_errors_carry_no_causal_source() {
    use std::error::Error as _;

    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(node(
        "table-sink",
        vec![SlotDefinition::input("In", "table")],
        vec![],
    ));
    let err = graph
        .connect(
            &SlotId::output(a.clone(), "Out"),
            &SlotId::input(b, "In"),
        )
        .unwrap_err();
    // the offending slots are rendered in the message, not chained as a cause
    assert!(err.to_string().contains("not convertible"));
    assert!(err.source().is_none());

    let c = graph.insert(processor("blur"));
    let d = graph.insert(processor("sharpen"));
    graph
        .connect(
            &SlotId::output(c.clone(), "Out"),
            &SlotId::input(d.clone(), "In"),
        )
        .unwrap();
    let err = graph
        .connect(&SlotId::output(d, "Out"), &SlotId::input(c, "In"))
        .unwrap_err();
    assert!(err.to_string().contains("would close a cycle"));
    assert!(err.source().is_none());
}

#[test]
fn cycles_are_rejected() {
    let mut graph = Graph::default();
    let a = graph.insert(processor("first"));
    let b = graph.insert(processor("second"));
    graph
        .connect(
            &SlotId::output(a.clone(), "Out"),
            &SlotId::input(b.clone(), "In"),
        )
        .unwrap();
    let err = graph
        .connect(&SlotId::output(b, "Out"), &SlotId::input(a, "In"))
        .unwrap_err();
    assert!(matches!(err, ConnectionError::WouldCycle { .. }));
}

#[test]
fn self_connection_is_a_cycle() {
    let mut graph = Graph::default();
    let a = graph.insert(processor("loop"));
    let err = graph
        .connect(
            &SlotId::output(a.clone(), "Out"),
            &SlotId::input(a, "In"),
        )
        .unwrap_err();
    assert!(matches!(err, ConnectionError::WouldCycle { .. }));
}

#[test]
fn failed_connect_leaves_graph_unchanged() {
    let mut graph = Graph::default();
    let a = graph.insert(processor("first"));
    let b = graph.insert(processor("second"));
    graph
        .connect(
            &SlotId::output(a.clone(), "Out"),
            &SlotId::input(b.clone(), "In"),
        )
        .unwrap();
    let edges_before = graph.slot_edges();
    let _ = graph.connect(&SlotId::output(b, "Out"), &SlotId::input(a, "In"));
    assert_eq!(graph.slot_edges(), edges_before);
}

#[test]
fn disconnect_respects_severability() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(sink("sink"));
    let out = SlotId::output(a, "Out");
    let inp = SlotId::input(b, "In");
    graph.connect_with(&out, &inp, false).unwrap();

    assert!(!graph.is_user_severable(&out, &inp));
    assert!(!graph.disconnect(&out, &inp, true));
    assert!(graph.contains_edge(&out, &inp));
    assert!(graph.disconnect(&out, &inp, false));
    assert!(!graph.contains_edge(&out, &inp));
}

#[test]
fn disconnect_all_severs_every_target() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(sink("left"));
    let c = graph.insert(sink("right"));
    let out = SlotId::output(a, "Out");
    graph.connect(&out, &SlotId::input(b, "In")).unwrap();
    graph.connect(&out, &SlotId::input(c, "In")).unwrap();
    assert_eq!(graph.disconnect_all(&out, false), 2);
    assert!(graph.get_targets(&out).is_empty());
}

#[test]
fn remove_severs_connections() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(processor("blur"));
    let c = graph.insert(sink("sink"));
    graph
        .connect(
            &SlotId::output(a, "Out"),
            &SlotId::input(b.clone(), "In"),
        )
        .unwrap();
    graph
        .connect(
            &SlotId::output(b.clone(), "Out"),
            &SlotId::input(c.clone(), "In"),
        )
        .unwrap();
    graph.remove(&b);
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.get_source(&SlotId::input(c, "In")), None);
}

#[test]
#[should_panic(expected = "no node")]
fn remove_unknown_key_panics() {
    let mut graph = Graph::default();
    graph.remove(&NodeKey::from("ghost"));
}

#[test]
fn traverse_nodes_orders_sources_first() {
    let mut graph = Graph::default();
    // inserted out of dependency order on purpose
    let c = graph.insert(sink("sink"));
    let b = graph.insert(processor("blur"));
    let a = graph.insert(source("reader"));
    graph
        .connect(
            &SlotId::output(a.clone(), "Out"),
            &SlotId::input(b.clone(), "In"),
        )
        .unwrap();
    graph
        .connect(
            &SlotId::output(b.clone(), "Out"),
            &SlotId::input(c.clone(), "In"),
        )
        .unwrap();
    let order = graph.traverse_nodes();
    let pos = |k: &NodeKey| order.iter().position(|x| x == k).unwrap();
    assert!(pos(&a) < pos(&b));
    assert!(pos(&b) < pos(&c));
}

#[test]
fn traversal_is_cached_until_mutation() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(sink("sink"));
    let first = graph.traverse_nodes();
    let second = graph.traverse_nodes();
    assert!(Arc::ptr_eq(&first, &second));
    graph
        .connect(&SlotId::output(a, "Out"), &SlotId::input(b, "In"))
        .unwrap();
    let third = graph.traverse_nodes();
    assert!(!Arc::ptr_eq(&second, &third));
}

#[test]
fn repair_is_idempotent() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(sink("sink"));
    graph
        .connect(&SlotId::output(a, "Out"), &SlotId::input(b, "In"))
        .unwrap();
    let counter = ChangeCounter::new();
    graph.add_observer(Box::new(counter.clone()));
    graph.repair();
    assert_eq!(counter.changed(), 0);
    graph.repair();
    assert_eq!(counter.changed(), 0);
}

#[test]
fn repair_prunes_removed_slots() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(processor("blur"));
    graph
        .connect(
            &SlotId::output(a.clone(), "Out"),
            &SlotId::input(b.clone(), "In"),
        )
        .unwrap();
    // drop the input slot from the node, then reconcile
    graph.node_mut(&b).configure_slots(SlotSchema::new(
        vec![],
        vec![SlotDefinition::output("Out", "image")],
    ));
    graph.repair();
    assert_eq!(graph.get_targets(&SlotId::output(a, "Out")), vec![]);
    assert_eq!(graph.slot_count(), 2);
}

#[test]
fn repair_adds_new_slots() {
    let mut graph = Graph::default();
    let a = graph.insert(processor("blur"));
    graph.node_mut(&a).configure_slots(SlotSchema::new(
        vec![
            SlotDefinition::input("In", "image"),
            SlotDefinition::input("Mask", "image").optional(),
        ],
        vec![SlotDefinition::output("Out", "image")],
    ));
    graph.repair();
    assert_eq!(graph.slot_count(), 3);
    assert!(graph.get_slot(&SlotId::input(a, "Mask")).is_some());
}

#[test]
fn deactivation_propagates_downstream() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(processor("blur"));
    let c = graph.insert(sink("sink"));
    graph
        .connect(
            &SlotId::output(a.clone(), "Out"),
            &SlotId::input(b.clone(), "In"),
        )
        .unwrap();
    graph
        .connect(
            &SlotId::output(b.clone(), "Out"),
            &SlotId::input(c.clone(), "In"),
        )
        .unwrap();
    graph.node_mut(&a).set_enabled(false);

    let deactivated = graph.deactivated_nodes(&FxHashSet::default());
    assert!(deactivated.contains(&a));
    assert!(deactivated.contains(&b));
    assert!(deactivated.contains(&c));
}

#[test]
fn sourceless_required_input_deactivates() {
    let mut graph = Graph::default();
    let b = graph.insert(processor("blur"));
    let deactivated = graph.deactivated_nodes(&FxHashSet::default());
    assert!(deactivated.contains(&b));
}

#[test]
fn optional_input_does_not_deactivate() {
    let mut graph = Graph::default();
    let b = graph.insert(node(
        "blur",
        vec![SlotDefinition::input("Mask", "image").optional()],
        vec![SlotDefinition::output("Out", "image")],
    ));
    assert!(graph.deactivated_nodes(&FxHashSet::default()).is_empty());
    let _ = b;
}

#[test]
fn externally_satisfied_nodes_stay_active() {
    let mut graph = Graph::default();
    let b = graph.insert(processor("blur"));
    let c = graph.insert(sink("sink"));
    graph
        .connect(
            &SlotId::output(b.clone(), "Out"),
            &SlotId::input(c.clone(), "In"),
        )
        .unwrap();
    let satisfied: FxHashSet<NodeKey> = [b].into_iter().collect();
    let deactivated = graph.deactivated_nodes(&satisfied);
    assert!(!deactivated.contains(&c));
    assert!(deactivated.is_empty());
}

#[test]
fn available_endpoints_respect_rules() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(source("reader"));
    let c = graph.insert(sink("sink"));
    let inp = SlotId::input(c, "In");

    let sources = graph.available_sources(&inp);
    assert_eq!(sources.len(), 2);

    graph
        .connect(&SlotId::output(a, "Out"), &inp)
        .unwrap();
    assert!(graph.available_sources(&inp).is_empty());
    assert!(graph.available_targets(&SlotId::output(b, "Out")).is_empty());
}

#[test]
fn predecessors_are_transitive_and_ordered() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(processor("blur"));
    let c = graph.insert(sink("sink"));
    graph
        .connect(
            &SlotId::output(a.clone(), "Out"),
            &SlotId::input(b.clone(), "In"),
        )
        .unwrap();
    graph
        .connect(
            &SlotId::output(b.clone(), "Out"),
            &SlotId::input(c.clone(), "In"),
        )
        .unwrap();
    assert_eq!(graph.predecessors(&c), vec![a.clone(), b]);
    assert_eq!(graph.predecessors(&a), vec![]);
}

#[test]
fn deep_copy_preserves_structure_with_fresh_uuids() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(sink("sink"));
    let out = SlotId::output(a.clone(), "Out");
    let inp = SlotId::input(b.clone(), "In");
    graph.connect_with(&out, &inp, false).unwrap();

    let copy = graph.deep_copy();
    assert_eq!(copy.node_count(), 2);
    assert_eq!(copy.get_source(&inp), Some(out.clone()));
    assert!(!copy.is_user_severable(&out, &inp));
    assert_ne!(copy.node(&a).uuid(), graph.node(&a).uuid());
}

#[test]
fn clear_removes_everything() {
    let mut graph = Graph::default();
    let a = graph.insert(source("reader"));
    let b = graph.insert(sink("sink"));
    graph
        .connect(&SlotId::output(a, "Out"), &SlotId::input(b, "In"))
        .unwrap();
    graph.clear();
    assert_eq!(graph.node_count(), 0);
    assert_eq!(graph.slot_count(), 0);
    assert!(graph.slot_edges().is_empty());
}

#[test]
fn observers_see_connection_events() {
    let mut graph = Graph::default();
    let counter = ChangeCounter::new();
    graph.add_observer(Box::new(counter.clone()));
    let a = graph.insert(source("reader"));
    let b = graph.insert(sink("sink"));
    let out = SlotId::output(a, "Out");
    let inp = SlotId::input(b, "In");
    graph.connect(&out, &inp).unwrap();
    graph.disconnect(&out, &inp, true);
    assert_eq!(counter.connected(), 1);
    assert_eq!(counter.disconnected(), 1);
    assert!(counter.changed() >= 4); // two inserts, one connect, one disconnect
}
