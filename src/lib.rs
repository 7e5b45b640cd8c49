//! # pipewright
//!
//! A pipeline graph engine for scientific image-analysis workflows: a
//! directed acyclic graph of processing nodes with typed, named data slots,
//! annotation-keyed data batching, and deterministic topological execution.
//!
//! The engine is deliberately domain-agnostic. Payloads are opaque JSON
//! values tagged with type tokens; the hosting application supplies the
//! node types (through [`node::NodeDeclaration`]) and the type-compatibility
//! rules (through [`data::TypeOracle`]).
//!
//! ## Core pieces
//!
//! - [`graph::Graph`] — nodes, slots, and connections, with connection
//!   rules (acyclicity, single source per input, type compatibility)
//!   enforced at mutation time and cached topological traversal.
//! - [`batch::BatchBuilder`] — groups input rows into data batches by
//!   shared annotation values.
//! - [`runner::GraphRunner`] — synchronous execution with cooperative
//!   cancellation and optional per-node batch parallelism.
//! - [`validation`] — advisory pre-run validity reports.
//! - JSON persistence of topology and settings via [`graph::Graph::to_json`]
//!   and [`graph::Graph::load_json`].
//!
//! ## Quick start
//!
//! ```rust
//! use pipewright::batch::Batch;
//! use pipewright::data::DataItem;
//! use pipewright::graph::{Graph, SlotId};
//! use pipewright::node::{Node, NodeDeclaration, NodeStep, StepError};
//! use pipewright::runner::{GraphRunner, RunStatus, StepContext};
//! use pipewright::slot::{SlotDefinition, SlotSchema};
//! use pipewright::types::NodeCategory;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! // A source node that emits two numbers.
//! struct EmitStep;
//!
//! impl NodeStep for EmitStep {
//!     fn process(&self, _batch: &Batch, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
//!         for n in [1, 2] {
//!             ctx.write("Numbers", DataItem::new("number", json!(n)), []);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! struct EmitDeclaration;
//!
//! impl NodeDeclaration for EmitDeclaration {
//!     fn id(&self) -> &str {
//!         "demo:emit"
//!     }
//!     fn category(&self) -> NodeCategory {
//!         NodeCategory::DataSource
//!     }
//!     fn slot_schema(&self) -> SlotSchema {
//!         SlotSchema::new(vec![], vec![SlotDefinition::output("Numbers", "number")])
//!     }
//!     fn create_step(&self) -> Arc<dyn NodeStep> {
//!         Arc::new(EmitStep)
//!     }
//! }
//!
//! // A node that doubles each incoming number.
//! struct DoubleStep;
//!
//! impl NodeStep for DoubleStep {
//!     fn process(&self, _batch: &Batch, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
//!         let numbers: Vec<i64> = ctx
//!             .batch_data("Input")
//!             .iter()
//!             .filter_map(|item| item.payload().as_i64())
//!             .collect();
//!         for n in numbers {
//!             ctx.write("Output", DataItem::new("number", json!(n * 2)), []);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! struct DoubleDeclaration;
//!
//! impl NodeDeclaration for DoubleDeclaration {
//!     fn id(&self) -> &str {
//!         "demo:double"
//!     }
//!     fn category(&self) -> NodeCategory {
//!         NodeCategory::Processor
//!     }
//!     fn slot_schema(&self) -> SlotSchema {
//!         SlotSchema::new(
//!             vec![SlotDefinition::input("Input", "number")],
//!             vec![SlotDefinition::output("Output", "number")],
//!         )
//!     }
//!     fn create_step(&self) -> Arc<dyn NodeStep> {
//!         Arc::new(DoubleStep)
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = Graph::default();
//! let emit = graph.insert(Node::from_declaration(Arc::new(EmitDeclaration)));
//! let double = graph.insert(Node::from_declaration(Arc::new(DoubleDeclaration)));
//! graph.connect(
//!     &SlotId::output(emit, "Numbers"),
//!     &SlotId::input(double.clone(), "Input"),
//! )?;
//!
//! let report = GraphRunner::new().run(&mut graph)?;
//! assert_eq!(report.status, RunStatus::Completed);
//!
//! let output = graph.slot(&SlotId::output(double, "Output"));
//! let values: Vec<i64> = output
//!     .rows()
//!     .iter()
//!     .filter_map(|row| row.data.payload().as_i64())
//!     .collect();
//! assert_eq!(values, vec![2, 4]);
//! # Ok(())
//! # }
//! ```

pub mod annotation;
pub mod batch;
pub mod data;
pub mod events;
pub mod graph;
pub mod node;
pub mod runner;
pub mod slot;
pub mod types;
pub mod utils;
pub mod validation;
