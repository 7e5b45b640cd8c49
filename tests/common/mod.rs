//! Shared fixtures for the integration tests: a configurable declaration,
//! a handful of reusable steps, a registry, and a widening type oracle.
#![allow(dead_code)]

use pipewright::annotation::Annotation;
use pipewright::batch::Batch;
use pipewright::data::{DataItem, TypeOracle};
use pipewright::node::{
    DeclarationRegistry, Node, NodeBehavior, NodeDeclaration, NodeStep, StepError,
};
use pipewright::runner::{CancellationToken, StepContext};
use pipewright::slot::{SlotDefinition, SlotSchema};
use pipewright::types::{DataTypeId, NodeCategory};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

pub fn ann(name: &str, value: &str) -> Annotation {
    Annotation::new(name, value)
}

pub fn item(data_type: &str, payload: impl Into<serde_json::Value>) -> DataItem {
    DataItem::new(data_type, payload.into())
}

/// Emits a fixed list of rows into one output slot.
pub struct EmitStep {
    pub slot: String,
    pub data_type: String,
    pub rows: Vec<(serde_json::Value, Vec<Annotation>)>,
}

impl NodeStep for EmitStep {
    fn process(&self, _batch: &Batch, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        for (payload, annotations) in &self.rows {
            ctx.write(
                self.slot.clone(),
                DataItem::new(self.data_type.clone(), payload.clone()),
                annotations.clone(),
            );
        }
        Ok(())
    }
}

/// Copies every batch row of `input` to `output` unchanged.
pub struct ForwardStep {
    pub input: String,
    pub output: String,
}

impl NodeStep for ForwardStep {
    fn process(&self, _batch: &Batch, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        let items: Vec<DataItem> = ctx
            .batch_data(&self.input)
            .into_iter()
            .cloned()
            .collect();
        for item in items {
            ctx.write(self.output.clone(), item, []);
        }
        Ok(())
    }
}

/// Writes one row per batch: the total number of batch rows across the
/// given input slots.
pub struct CountStep {
    pub inputs: Vec<String>,
    pub output: String,
    pub data_type: String,
}

impl NodeStep for CountStep {
    fn process(&self, batch: &Batch, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        let total: usize = self.inputs.iter().map(|s| batch.rows(s).count()).sum();
        ctx.write(
            self.output.clone(),
            DataItem::new(self.data_type.clone(), serde_json::json!(total)),
            [],
        );
        Ok(())
    }
}

/// Always fails.
pub struct FailStep;

impl NodeStep for FailStep {
    fn process(&self, _batch: &Batch, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        Err(StepError::failed("boom"))
    }
}

/// Cancels the run it is part of, then succeeds.
pub struct CancelStep {
    pub token: CancellationToken,
}

impl NodeStep for CancelStep {
    fn process(&self, _batch: &Batch, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        self.token.cancel();
        Ok(())
    }
}

/// Records the thread ids its batches ran on, and forwards a marker row.
pub struct ThreadRecordStep {
    pub input: String,
    pub output: String,
    pub threads: Arc<Mutex<HashSet<ThreadId>>>,
}

impl NodeStep for ThreadRecordStep {
    fn process(&self, _batch: &Batch, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        self.threads
            .lock()
            .map_err(|_| StepError::failed("thread set poisoned"))?
            .insert(std::thread::current().id());
        let items: Vec<DataItem> = ctx
            .batch_data(&self.input)
            .into_iter()
            .cloned()
            .collect();
        for item in items {
            ctx.write(self.output.clone(), item, []);
        }
        Ok(())
    }
}

/// A declaration assembled field by field, for building arbitrary test
/// nodes.
pub struct TestDeclaration {
    pub id: String,
    pub category: NodeCategory,
    pub schema: SlotSchema,
    pub behavior: NodeBehavior,
    pub parallel: bool,
    pub step: Arc<dyn NodeStep>,
}

impl TestDeclaration {
    pub fn new(id: &str, schema: SlotSchema, step: Arc<dyn NodeStep>) -> Self {
        Self {
            id: id.to_string(),
            category: NodeCategory::Processor,
            schema,
            behavior: NodeBehavior::merging(),
            parallel: false,
            step,
        }
    }

    pub fn with_behavior(mut self, behavior: NodeBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_category(mut self, category: NodeCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn into_node(self) -> Node {
        Node::from_declaration(Arc::new(self))
    }
}

impl NodeDeclaration for TestDeclaration {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> NodeCategory {
        self.category
    }

    fn slot_schema(&self) -> SlotSchema {
        self.schema.clone()
    }

    fn behavior(&self) -> NodeBehavior {
        self.behavior.clone()
    }

    fn create_step(&self) -> Arc<dyn NodeStep> {
        Arc::clone(&self.step)
    }

    fn supports_parallelization(&self) -> bool {
        self.parallel
    }
}

/// Emits the given annotated rows from a source node.
pub fn emitter(id: &str, slot: &str, data_type: &str, rows: Vec<(serde_json::Value, Vec<Annotation>)>) -> Node {
    TestDeclaration::new(
        id,
        SlotSchema::new(vec![], vec![SlotDefinition::output(slot, data_type)]),
        Arc::new(EmitStep {
            slot: slot.to_string(),
            data_type: data_type.to_string(),
            rows,
        }),
    )
    .with_category(NodeCategory::DataSource)
    .into_node()
}

/// A single-input, single-output forwarding processor.
pub fn forwarder(id: &str, data_type: &str) -> Node {
    TestDeclaration::new(
        id,
        SlotSchema::new(
            vec![SlotDefinition::input("In", data_type)],
            vec![SlotDefinition::output("Out", data_type)],
        ),
        Arc::new(ForwardStep {
            input: "In".to_string(),
            output: "Out".to_string(),
        }),
    )
    .into_node()
}

#[derive(Default)]
pub struct TestRegistry {
    declarations: HashMap<String, Arc<dyn NodeDeclaration>>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, declaration: Arc<dyn NodeDeclaration>) {
        self.declarations
            .insert(declaration.id().to_string(), declaration);
    }
}

impl DeclarationRegistry for TestRegistry {
    fn declaration_for(&self, id: &str) -> Option<Arc<dyn NodeDeclaration>> {
        self.declarations.get(id).map(Arc::clone)
    }
}

/// Accepts identical tokens plus the widening `mask -> image`.
pub struct WideningOracle;

impl TypeOracle for WideningOracle {
    fn is_convertible(&self, from: &DataTypeId, to: &DataTypeId) -> bool {
        from == to || (from.as_str() == "mask" && to.as_str() == "image")
    }
}
