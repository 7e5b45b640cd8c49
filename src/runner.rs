//! Synchronous graph execution.
//!
//! The runner executes one node at a time in topological order: it clears
//! all slots, pulls each node's input rows from the connected sources,
//! groups them into data batches per the node's behavior, and invokes the
//! node's step once per batch. Step output is buffered in a
//! [`StepContext`] and appended to the node's output slots after the step
//! returns, tagged with the batch's merged annotations.
//!
//! Batches of a single node may run on multiple threads when the node's
//! declaration opts in and the config allows it; nodes themselves always
//! run strictly one after another. Cancellation is cooperative and checked
//! at batch boundaries.

use crate::annotation::{Annotation, AnnotationSet};
use crate::batch::{Batch, BatchBuilder, BatchError};
use crate::data::DataItem;
use crate::graph::{Graph, SlotId};
use crate::node::{Node, NodeBehavior, StepError};
use crate::slot::{Slot, SlotError, SlotRow};
use crate::types::NodeKey;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info};

/// Shared flag for cooperatively cancelling a run. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Execution settings.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Upper bound on threads used for the batches of one
    /// parallel-capable node. `1` disables batch parallelism.
    pub max_threads: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { max_threads: 1 }
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Summary of a finished (or cancelled) run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Nodes whose step ran (pass-through nodes included), in execution
    /// order.
    pub executed: Vec<NodeKey>,
    /// Deactivated nodes that were skipped.
    pub skipped: Vec<NodeKey>,
}

/// Errors that abort a run.
#[derive(Debug, Error, Diagnostic)]
pub enum RunError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Batch(#[from] BatchError),

    #[error("node '{node}' failed")]
    #[diagnostic(code(pipewright::run::step_failed))]
    Step {
        node: NodeKey,
        #[source]
        source: StepError,
    },

    #[error("node '{node}' produced a row its output slot rejected")]
    #[diagnostic(code(pipewright::run::output_rejected))]
    OutputRejected {
        node: NodeKey,
        #[source]
        source: SlotError,
    },
}

struct OutputRow {
    slot: String,
    item: DataItem,
    annotations: Vec<Annotation>,
}

/// What a [`NodeStep`](crate::node::NodeStep) sees while processing one
/// batch: read access to the node's input slots and the batch's row
/// indices, and a buffer for output rows.
///
/// Writes are applied to the node's output slots only after the step
/// returns successfully, tagged with the batch's merged annotations plus
/// whatever the step passed to [`StepContext::write`] (step annotations
/// win on name collisions).
pub struct StepContext<'a> {
    node_name: &'a str,
    inputs: &'a [Slot],
    batch: &'a Batch,
    outputs: Vec<OutputRow>,
}

impl<'a> StepContext<'a> {
    fn new(node_name: &'a str, inputs: &'a [Slot], batch: &'a Batch) -> Self {
        Self {
            node_name,
            inputs,
            batch,
            outputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn node_name(&self) -> &str {
        self.node_name
    }

    #[must_use]
    pub fn batch(&self) -> &Batch {
        self.batch
    }

    /// The input slot named `name`, with all of the node's pulled rows.
    /// Prefer [`StepContext::batch_data`] to stay within the batch.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Slot> {
        self.inputs.iter().find(|s| s.name() == name)
    }

    /// The data items this batch holds for the input slot `name`.
    #[must_use]
    pub fn batch_data(&self, name: &str) -> Vec<&DataItem> {
        match self.input(name) {
            Some(slot) => self.batch.rows(name).map(|row| slot.data(row)).collect(),
            None => Vec::new(),
        }
    }

    /// The single data item for `name`, if the batch holds exactly one row
    /// of that slot.
    #[must_use]
    pub fn single_data(&self, name: &str) -> Option<&DataItem> {
        let row = self.batch.single_row(name)?;
        Some(self.input(name)?.data(row))
    }

    /// Buffers one output row for the output slot `slot`.
    pub fn write(
        &mut self,
        slot: impl Into<String>,
        item: DataItem,
        annotations: impl IntoIterator<Item = Annotation>,
    ) {
        self.outputs.push(OutputRow {
            slot: slot.into(),
            item,
            annotations: annotations.into_iter().collect(),
        });
    }

    fn into_outputs(self) -> Vec<OutputRow> {
        self.outputs
    }
}

/// Executes a [`Graph`] synchronously, node by node.
#[derive(Debug, Default)]
pub struct GraphRunner {
    config: RunnerConfig,
    cancellation: CancellationToken,
}

impl GraphRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// A token that cancels this runner's current and future runs.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Runs the whole graph: clears all slots, skips deactivated nodes, and
    /// executes the rest in topological order.
    ///
    /// Batching and step errors abort the run; cancellation does not, it
    /// ends the run early with [`RunStatus::Cancelled`].
    pub fn run(&self, graph: &mut Graph) -> Result<RunReport, RunError> {
        let started_at = Utc::now();
        let keys: Vec<NodeKey> = graph.node_keys().cloned().collect();
        for key in &keys {
            graph.node_mut(key).clear_slots();
        }
        let deactivated = graph.deactivated_nodes(&FxHashSet::default());
        let order = graph.traverse_nodes();
        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut status = RunStatus::Completed;

        for key in order.iter() {
            if self.cancellation.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            if deactivated.contains(key) {
                debug!(node = %key, "skipping deactivated node");
                skipped.push(key.clone());
                continue;
            }
            Self::pull_inputs(graph, key);
            let node = graph.node(key);
            if node.is_pass_through() {
                Self::run_pass_through(graph, key);
                executed.push(key.clone());
                continue;
            }
            let batches = Self::build_batches(node)?;
            let parallel = node.declaration().supports_parallelization()
                && self.config.max_threads > 1
                && batches.len() > 1;
            debug!(node = %key, batches = batches.len(), parallel, "executing node");
            let cancelled = if parallel {
                self.run_batches_parallel(graph, key, &batches)?
            } else {
                self.run_batches_sequential(graph, key, &batches)?
            };
            executed.push(key.clone());
            if cancelled {
                status = RunStatus::Cancelled;
                break;
            }
        }

        info!(
            executed = executed.len(),
            skipped = skipped.len(),
            ?status,
            "run finished"
        );
        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            status,
            executed,
            skipped,
        })
    }

    /// Copies the rows of each connected source into the node's input slots.
    /// Convertibility was checked when the connection was made.
    fn pull_inputs(graph: &mut Graph, key: &NodeKey) {
        let pulled: Vec<(String, Vec<SlotRow>)> = graph
            .node(key)
            .input_slots()
            .iter()
            .map(|slot| {
                let id = SlotId::input(key.clone(), slot.name());
                let rows = match graph.get_source(&id) {
                    Some(source) => graph.slot(&source).rows().to_vec(),
                    None => Vec::new(),
                };
                (slot.name().to_string(), rows)
            })
            .collect();
        let node = graph.node_mut(key);
        for (name, rows) in pulled {
            if let Some(slot) = node.input_slot_mut(&name) {
                for row in rows {
                    slot.push_row(row);
                }
            }
        }
    }

    /// Copies input rows to output slots by position: first input to first
    /// output, and so on. Unpaired slots are left alone.
    fn run_pass_through(graph: &mut Graph, key: &NodeKey) {
        let node = graph.node(key);
        let pairs: Vec<(String, Vec<SlotRow>)> = node
            .input_slots()
            .iter()
            .zip(node.output_slots())
            .map(|(input, output)| (output.name().to_string(), input.rows().to_vec()))
            .collect();
        let node = graph.node_mut(key);
        for (name, rows) in pairs {
            if let Some(slot) = node.output_slot_mut(&name) {
                for row in rows {
                    slot.push_row(row);
                }
            }
        }
        debug!(node = %key, "pass-through forwarded inputs");
    }

    fn build_batches(node: &Node) -> Result<Vec<Batch>, RunError> {
        let slots: Vec<&Slot> = node.input_slots().iter().collect();
        let builder = BatchBuilder::new(node.name(), slots);
        let batches = match node.behavior() {
            NodeBehavior::Merging(settings) => builder.with_settings(settings.clone()).build()?,
            NodeBehavior::Iterating(settings) => builder
                .with_settings(settings.clone())
                .build_single_rows()?,
            NodeBehavior::SimpleIterating => builder.build_aligned()?,
            NodeBehavior::Custom => builder.build_merge_all(),
        };
        Ok(batches)
    }

    /// Runs batches one after another. Returns whether the run was
    /// cancelled mid-node.
    fn run_batches_sequential(
        &self,
        graph: &mut Graph,
        key: &NodeKey,
        batches: &[Batch],
    ) -> Result<bool, RunError> {
        for batch in batches {
            if self.cancellation.is_cancelled() {
                return Ok(true);
            }
            let outputs = {
                let node = graph.node(key);
                let step = Arc::clone(node.step());
                let mut ctx = StepContext::new(node.name(), node.input_slots(), batch);
                step.process(batch, &mut ctx)
                    .map_err(|source| RunError::Step {
                        node: key.clone(),
                        source,
                    })?;
                ctx.into_outputs()
            };
            Self::append_outputs(graph, key, batch.annotations(), outputs)?;
        }
        Ok(false)
    }

    /// Fans the batches of one node out over up to `max_threads` scoped
    /// worker threads. Outputs are appended in batch order after every
    /// worker finished, so slot contents stay deterministic.
    fn run_batches_parallel(
        &self,
        graph: &mut Graph,
        key: &NodeKey,
        batches: &[Batch],
    ) -> Result<bool, RunError> {
        type BatchOutcome = (usize, Result<Vec<OutputRow>, StepError>);
        let results: Mutex<Vec<BatchOutcome>> = Mutex::new(Vec::with_capacity(batches.len()));
        {
            let node = graph.node(key);
            let step = Arc::clone(node.step());
            let name = node.name();
            let inputs = node.input_slots();
            let workers = self.config.max_threads.min(batches.len());
            let chunk_len = batches.len().div_ceil(workers);
            std::thread::scope(|scope| {
                for (worker, chunk) in batches.chunks(chunk_len).enumerate() {
                    let step = Arc::clone(&step);
                    let token = self.cancellation.clone();
                    let results = &results;
                    scope.spawn(move || {
                        for (offset, batch) in chunk.iter().enumerate() {
                            if token.is_cancelled() {
                                break;
                            }
                            let mut ctx = StepContext::new(name, inputs, batch);
                            let outcome = step.process(batch, &mut ctx).map(|()| ctx.into_outputs());
                            results.lock().push((worker * chunk_len + offset, outcome));
                        }
                    });
                }
            });
        }
        let mut results = results.into_inner();
        results.sort_by_key(|(ix, _)| *ix);
        for (ix, outcome) in results {
            let outputs = outcome.map_err(|source| RunError::Step {
                node: key.clone(),
                source,
            })?;
            Self::append_outputs(graph, key, batches[ix].annotations(), outputs)?;
        }
        Ok(self.cancellation.is_cancelled())
    }

    /// Appends buffered step output to the node's output slots, merging the
    /// batch's annotations under the step's own.
    ///
    /// # Panics
    ///
    /// Panics if the step wrote to an output slot the node does not have.
    fn append_outputs(
        graph: &mut Graph,
        key: &NodeKey,
        batch_annotations: &AnnotationSet,
        outputs: Vec<OutputRow>,
    ) -> Result<(), RunError> {
        let oracle = Arc::clone(graph.oracle());
        let node = graph.node_mut(key);
        for out in outputs {
            let mut annotations = batch_annotations.clone();
            annotations.extend(out.annotations);
            let slot = node.output_slot_mut(&out.slot).unwrap_or_else(|| {
                panic!("node '{key}' has no output slot '{}'", out.slot)
            });
            slot.add_row(out.item, annotations, oracle.as_ref())
                .map_err(|source| RunError::OutputRejected {
                    node: key.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}
