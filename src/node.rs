//! Nodes, their declarations, and their execution steps.
//!
//! A [`Node`] is one processing unit in a pipeline graph. Its shape (slots,
//! category, default batching behavior) comes from a [`NodeDeclaration`]
//! registered by the hosting application; its work is a [`NodeStep`] invoked
//! once per data batch by the runner. How a node's input rows are grouped
//! into batches is a plain enum, [`NodeBehavior`], carried as data on the
//! node rather than baked into a type hierarchy.

use crate::batch::{Batch, BatchSettings};
use crate::runner::StepContext;
use crate::slot::{Slot, SlotSchema};
use crate::types::NodeCategory;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// A registered node type: stable id, category, default slot schema, and a
/// factory for the step that does the actual work.
pub trait NodeDeclaration: Send + Sync {
    /// Stable identifier persisted in saved graphs, e.g.
    /// `"acme:gaussian-blur"`.
    fn id(&self) -> &str;

    fn category(&self) -> NodeCategory;

    /// The slot configuration new nodes of this type start with.
    fn slot_schema(&self) -> SlotSchema;

    /// Default batching behavior for new nodes of this type.
    fn behavior(&self) -> NodeBehavior {
        NodeBehavior::Merging(BatchSettings::default())
    }

    fn create_step(&self) -> Arc<dyn NodeStep>;

    /// Whether the runner may execute this node's batches on multiple
    /// threads at once. Steps of parallel-capable declarations must not
    /// rely on batch execution order.
    fn supports_parallelization(&self) -> bool {
        false
    }
}

/// Resolves declaration ids when loading a serialized graph.
pub trait DeclarationRegistry: Send + Sync {
    fn declaration_for(&self, id: &str) -> Option<Arc<dyn NodeDeclaration>>;
}

/// The work of a node: invoked once per data batch.
///
/// Steps read input rows through the batch's row indices and write output
/// rows through the context; the runner appends buffered writes to the
/// node's output slots after the step returns.
pub trait NodeStep: Send + Sync {
    fn process(&self, batch: &Batch, ctx: &mut StepContext<'_>) -> Result<(), StepError>;
}

/// Errors raised by a [`NodeStep`].
#[derive(Debug, Error, Diagnostic)]
pub enum StepError {
    #[error("{0}")]
    #[diagnostic(code(pipewright::step::failed))]
    Failed(String),

    /// A batch did not carry a row the step requires.
    #[error("missing expected input: {what}")]
    #[diagnostic(code(pipewright::step::missing_input))]
    MissingInput { what: String },

    #[error(transparent)]
    #[diagnostic(code(pipewright::step::serde))]
    Serde(#[from] serde_json::Error),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn missing_input(what: impl Into<String>) -> Self {
        Self::MissingInput { what: what.into() }
    }
}

/// How a node's input rows are grouped into data batches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "settings", rename_all = "kebab-case")]
pub enum NodeBehavior {
    /// Annotation-keyed grouping, then each batch reduced to a single row
    /// per slot. A group holding more than one row for any slot is an error.
    Iterating(BatchSettings),
    /// Annotation-keyed grouping; batches may hold many rows per slot.
    Merging(BatchSettings),
    /// Positional 1:1 alignment: row `i` of every input slot forms batch
    /// `i`. All input slots must have equal row counts.
    SimpleIterating,
    /// No grouping: the step receives one batch holding every row of every
    /// input slot and manages iteration itself.
    Custom,
}

impl NodeBehavior {
    #[must_use]
    pub fn iterating() -> Self {
        Self::Iterating(BatchSettings::default())
    }

    #[must_use]
    pub fn merging() -> Self {
        Self::Merging(BatchSettings::default())
    }
}

/// One processing unit in a pipeline graph.
///
/// Carries identity (a UUID independent of the graph key), presentation
/// fields, execution flags, batching behavior, and the slots holding data
/// during a run. Nodes are created from a declaration and may afterwards be
/// reconfigured slot-wise via [`Node::configure_slots`].
pub struct Node {
    declaration: Arc<dyn NodeDeclaration>,
    uuid: Uuid,
    name: String,
    description: String,
    enabled: bool,
    pass_through: bool,
    compartment: Option<String>,
    work_directory: Option<PathBuf>,
    behavior: NodeBehavior,
    input_slots: Vec<Slot>,
    output_slots: Vec<Slot>,
    step: Arc<dyn NodeStep>,
}

impl Node {
    /// Builds a node with the declaration's default schema, behavior, and
    /// step. The display name starts as the declaration id.
    #[must_use]
    pub fn from_declaration(declaration: Arc<dyn NodeDeclaration>) -> Self {
        let schema = declaration.slot_schema();
        let behavior = declaration.behavior();
        let step = declaration.create_step();
        let name = declaration.id().to_string();
        let mut node = Self {
            declaration,
            uuid: Uuid::new_v4(),
            name,
            description: String::new(),
            enabled: true,
            pass_through: false,
            compartment: None,
            work_directory: None,
            behavior,
            input_slots: Vec::new(),
            output_slots: Vec::new(),
            step,
        };
        node.configure_slots(schema);
        node
    }

    #[must_use]
    pub fn declaration(&self) -> &Arc<dyn NodeDeclaration> {
        &self.declaration
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[must_use]
    pub fn is_pass_through(&self) -> bool {
        self.pass_through
    }

    pub fn set_pass_through(&mut self, pass_through: bool) {
        self.pass_through = pass_through;
    }

    #[must_use]
    pub fn compartment(&self) -> Option<&str> {
        self.compartment.as_deref()
    }

    pub fn set_compartment(&mut self, compartment: Option<String>) {
        self.compartment = compartment;
    }

    #[must_use]
    pub fn work_directory(&self) -> Option<&PathBuf> {
        self.work_directory.as_ref()
    }

    pub fn set_work_directory(&mut self, work_directory: Option<PathBuf>) {
        self.work_directory = work_directory;
    }

    #[must_use]
    pub fn behavior(&self) -> &NodeBehavior {
        &self.behavior
    }

    pub fn set_behavior(&mut self, behavior: NodeBehavior) {
        self.behavior = behavior;
    }

    /// Whether a user may delete this node. Internal nodes are engine-managed.
    #[must_use]
    pub fn can_user_delete(&self) -> bool {
        self.declaration.category() != NodeCategory::Internal
    }

    #[must_use]
    pub fn input_slots(&self) -> &[Slot] {
        &self.input_slots
    }

    #[must_use]
    pub fn output_slots(&self) -> &[Slot] {
        &self.output_slots
    }

    #[must_use]
    pub fn input_slot(&self, name: &str) -> Option<&Slot> {
        self.input_slots.iter().find(|s| s.name() == name)
    }

    pub fn input_slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.input_slots.iter_mut().find(|s| s.name() == name)
    }

    #[must_use]
    pub fn output_slot(&self, name: &str) -> Option<&Slot> {
        self.output_slots.iter().find(|s| s.name() == name)
    }

    pub fn output_slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.output_slots.iter_mut().find(|s| s.name() == name)
    }

    #[must_use]
    pub(crate) fn slot(&self, direction: crate::types::Direction, name: &str) -> Option<&Slot> {
        if direction.is_input() {
            self.input_slot(name)
        } else {
            self.output_slot(name)
        }
    }

    /// Replaces the slot configuration. Slots whose definition is unchanged
    /// keep their rows; added slots start empty; removed slots are dropped
    /// (the graph's `repair` then prunes their vertices and edges).
    pub fn configure_slots(&mut self, schema: SlotSchema) {
        let rebuild = |old: &mut Vec<Slot>, defs: &[crate::slot::SlotDefinition]| {
            let mut next = Vec::with_capacity(defs.len());
            for def in defs {
                match old.iter().position(|s| s.definition() == def) {
                    Some(ix) => next.push(old.swap_remove(ix)),
                    None => next.push(Slot::from_definition(def.clone())),
                }
            }
            *old = Vec::new();
            next
        };
        self.input_slots = rebuild(&mut self.input_slots, schema.inputs());
        self.output_slots = rebuild(&mut self.output_slots, schema.outputs());
    }

    /// Clears the rows of every slot on this node.
    pub fn clear_slots(&mut self) {
        for slot in &mut self.input_slots {
            slot.clear();
        }
        for slot in &mut self.output_slots {
            slot.clear();
        }
    }

    /// Deep copy with a fresh UUID, the current slot configuration (rows not
    /// copied), and a fresh step from the declaration.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        let inputs = self
            .input_slots
            .iter()
            .map(|s| Slot::from_definition(s.definition().clone()))
            .collect();
        let outputs = self
            .output_slots
            .iter()
            .map(|s| Slot::from_definition(s.definition().clone()))
            .collect();
        Self {
            declaration: Arc::clone(&self.declaration),
            uuid: Uuid::new_v4(),
            name: self.name.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            pass_through: self.pass_through,
            compartment: self.compartment.clone(),
            work_directory: self.work_directory.clone(),
            behavior: self.behavior.clone(),
            input_slots: inputs,
            output_slots: outputs,
            step: self.declaration.create_step(),
        }
    }

    #[must_use]
    pub fn step(&self) -> &Arc<dyn NodeStep> {
        &self.step
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("declaration", &self.declaration.id())
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("pass_through", &self.pass_through)
            .field("behavior", &self.behavior)
            .field("inputs", &self.input_slots.len())
            .field("outputs", &self.output_slots.len())
            .finish()
    }
}
