//! Annotation-keyed data batching.
//!
//! Before a node executes, the rows of its input slots are grouped into
//! *data batches*: units of work whose rows belong together because they
//! carry the same values for a set of *reference columns* (annotation
//! names). The [`BatchBuilder`] derives the reference columns from a
//! [`MatchingStrategy`], groups rows by their values in those columns, and
//! applies the completeness policy.
//!
//! Grouping keys and group storage are ordered maps, so the emitted batch
//! list is identical across runs of the same inputs.
//!
//! # Examples
//!
//! ```rust
//! use pipewright::annotation::Annotation;
//! use pipewright::batch::BatchBuilder;
//! use pipewright::data::{DataItem, StrictTypeOracle};
//! use pipewright::slot::{Slot, SlotDefinition};
//! use serde_json::json;
//!
//! let mut images = Slot::from_definition(SlotDefinition::input("Image", "image"));
//! let mut masks = Slot::from_definition(SlotDefinition::input("Mask", "mask"));
//! for sample in ["A1", "B1"] {
//!     images
//!         .add_data(
//!             DataItem::new("image", json!(sample)),
//!             [Annotation::new("sample", sample)],
//!             &StrictTypeOracle,
//!         )
//!         .unwrap();
//!     masks
//!         .add_data(
//!             DataItem::new("mask", json!(sample)),
//!             [Annotation::new("sample", sample)],
//!             &StrictTypeOracle,
//!         )
//!         .unwrap();
//! }
//!
//! let batches = BatchBuilder::new("segment", [&images, &masks])
//!     .build()
//!     .unwrap();
//! assert_eq!(batches.len(), 2);
//! assert_eq!(batches[0].annotations().get("sample"), Some("A1"));
//! ```

use crate::annotation::AnnotationSet;
use crate::slot::Slot;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use thiserror::Error;

/// How the reference columns for grouping are derived from the input slots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchingStrategy {
    /// Annotation names present in *every* input slot.
    #[default]
    Intersection,
    /// Annotation names present in *any* input slot.
    Union,
    /// An explicit, user-chosen list of names.
    Custom(Vec<String>),
}

/// Settings controlling annotation-keyed grouping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BatchSettings {
    pub strategy: MatchingStrategy,
    /// Names removed from the reference columns after strategy derivation.
    pub ignored_columns: BTreeSet<String>,
    /// When true, groups missing rows from some slot are dropped with a
    /// warning instead of failing the run.
    pub skip_incomplete: bool,
}

/// Grouping key: reference column name to the value rows carry for it, or
/// `None` where the annotation is absent. Absent compares before present,
/// so batch order is stable.
pub type BatchKey = BTreeMap<String, Option<String>>;

/// One unit of work for a node step: per-slot row indices plus the merged
/// annotations of every contained row.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    rows: BTreeMap<String, BTreeSet<usize>>,
    annotations: AnnotationSet,
}

impl Batch {
    pub(crate) fn new(rows: BTreeMap<String, BTreeSet<usize>>, annotations: AnnotationSet) -> Self {
        Self { rows, annotations }
    }

    pub(crate) fn empty() -> Self {
        Self {
            rows: BTreeMap::new(),
            annotations: AnnotationSet::new(),
        }
    }

    /// Row indices per slot name.
    #[must_use]
    pub fn slot_rows(&self) -> &BTreeMap<String, BTreeSet<usize>> {
        &self.rows
    }

    /// Row indices this batch holds for `slot`, empty if the slot does not
    /// appear in the batch.
    pub fn rows(&self, slot: &str) -> impl Iterator<Item = usize> + '_ {
        self.rows.get(slot).into_iter().flatten().copied()
    }

    /// The single row index for `slot`, if the batch holds exactly one.
    #[must_use]
    pub fn single_row(&self, slot: &str) -> Option<usize> {
        let set = self.rows.get(slot)?;
        if set.len() == 1 {
            set.first().copied()
        } else {
            None
        }
    }

    /// Merged annotations of every row in the batch (newest-wins within the
    /// builder's slot order, then row order).
    #[must_use]
    pub fn annotations(&self) -> &AnnotationSet {
        &self.annotations
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.values().all(BTreeSet::is_empty)
    }
}

/// Errors raised while grouping rows into batches.
#[derive(Debug, Error, Diagnostic)]
pub enum BatchError {
    /// A group is missing rows from some input slot and the settings do not
    /// allow skipping.
    #[error("node '{node}': data batch {key} has no rows in input slot '{slot}'")]
    #[diagnostic(
        code(pipewright::batch::incomplete),
        help(
            "check the annotations of the incoming data, or enable skipping of incomplete batches"
        )
    )]
    IncompleteBatch {
        node: String,
        slot: String,
        key: String,
    },

    /// 1:1 aligned mode requires every input slot to hold the same number of
    /// rows.
    #[error(
        "node '{node}': input slot '{slot}' holds {actual} rows but aligned iteration expects {expected}"
    )]
    #[diagnostic(code(pipewright::batch::row_count_mismatch))]
    RowCountMismatch {
        node: String,
        slot: String,
        expected: usize,
        actual: usize,
    },

    /// A batch holds more than one row for a slot, so it cannot be reduced
    /// to single-row form.
    #[error(
        "node '{node}': unable to split data into batches, input slot '{slot}' contributes {rows} rows to one batch"
    )]
    #[diagnostic(
        code(pipewright::batch::ambiguous_rows),
        help("add a distinguishing annotation column, or switch the node to merging behavior")
    )]
    AmbiguousRows {
        node: String,
        slot: String,
        rows: usize,
    },
}

/// Groups the rows of a node's input slots into data batches.
pub struct BatchBuilder<'a> {
    node_name: &'a str,
    slots: Vec<&'a Slot>,
    settings: BatchSettings,
}

impl<'a> BatchBuilder<'a> {
    pub fn new(node_name: &'a str, slots: impl IntoIterator<Item = &'a Slot>) -> Self {
        Self {
            node_name,
            slots: slots.into_iter().collect(),
            settings: BatchSettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: BatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The annotation names rows are grouped by: the strategy-derived set
    /// minus the ignored columns.
    #[must_use]
    pub fn reference_columns(&self) -> BTreeSet<String> {
        let mut columns = match &self.settings.strategy {
            MatchingStrategy::Custom(names) => names.iter().cloned().collect(),
            MatchingStrategy::Union => {
                let mut all = BTreeSet::new();
                for slot in &self.slots {
                    all.extend(slot.annotation_columns());
                }
                all
            }
            MatchingStrategy::Intersection => {
                let mut iter = self.slots.iter();
                match iter.next() {
                    None => BTreeSet::new(),
                    Some(first) => {
                        let mut common = first.annotation_columns();
                        for slot in iter {
                            let columns = slot.annotation_columns();
                            common.retain(|c| columns.contains(c));
                        }
                        common
                    }
                }
            }
        };
        for ignored in &self.settings.ignored_columns {
            columns.remove(ignored);
        }
        columns
    }

    /// Groups rows by their values in the reference columns.
    ///
    /// A node with no input slots yields exactly one empty batch. A group in
    /// which some slot contributes no rows is incomplete: an error, unless
    /// the settings allow skipping, in which case it is dropped with a
    /// warning. Batches are emitted sorted by grouping key, so the result is
    /// deterministic.
    pub fn build(&self) -> Result<Vec<Batch>, BatchError> {
        if self.slots.is_empty() {
            return Ok(vec![Batch::empty()]);
        }
        let columns = self.reference_columns();
        let mut groups: BTreeMap<BatchKey, BTreeMap<String, BTreeSet<usize>>> = BTreeMap::new();
        for slot in &self.slots {
            for row in 0..slot.row_count() {
                let annotations = slot.annotations(row);
                let key: BatchKey = columns
                    .iter()
                    .map(|c| (c.clone(), annotations.get(c).map(str::to_string)))
                    .collect();
                groups
                    .entry(key)
                    .or_default()
                    .entry(slot.name().to_string())
                    .or_default()
                    .insert(row);
            }
        }

        let mut batches = Vec::with_capacity(groups.len());
        for (key, group) in groups {
            if let Some(missing) = self.slots.iter().find(|s| !group.contains_key(s.name())) {
                if self.settings.skip_incomplete {
                    tracing::warn!(
                        node = self.node_name,
                        slot = missing.name(),
                        key = %format_key(&key),
                        "skipping incomplete data batch"
                    );
                    continue;
                }
                return Err(BatchError::IncompleteBatch {
                    node: self.node_name.to_string(),
                    slot: missing.name().to_string(),
                    key: format_key(&key),
                });
            }
            let mut annotations = AnnotationSet::new();
            for slot in &self.slots {
                if let Some(rows) = group.get(slot.name()) {
                    for &row in rows {
                        annotations.merge_from(slot.annotations(row));
                    }
                }
            }
            batches.push(Batch::new(group, annotations));
        }
        Ok(batches)
    }

    /// As [`BatchBuilder::build`], then reduces every batch to one row per
    /// slot. A batch holding more than one row for any slot fails with
    /// [`BatchError::AmbiguousRows`].
    pub fn build_single_rows(&self) -> Result<Vec<Batch>, BatchError> {
        let batches = self.build()?;
        for batch in &batches {
            for (slot, rows) in batch.slot_rows() {
                if rows.len() > 1 {
                    return Err(BatchError::AmbiguousRows {
                        node: self.node_name.to_string(),
                        slot: slot.clone(),
                        rows: rows.len(),
                    });
                }
            }
        }
        Ok(batches)
    }

    /// Positional 1:1 alignment: row `i` of every slot forms batch `i`.
    /// Annotations are ignored for grouping but still merged onto each
    /// batch. All slots must hold the same number of rows.
    pub fn build_aligned(&self) -> Result<Vec<Batch>, BatchError> {
        if self.slots.is_empty() {
            return Ok(vec![Batch::empty()]);
        }
        let expected = self.slots[0].row_count();
        for slot in &self.slots[1..] {
            if slot.row_count() != expected {
                return Err(BatchError::RowCountMismatch {
                    node: self.node_name.to_string(),
                    slot: slot.name().to_string(),
                    expected,
                    actual: slot.row_count(),
                });
            }
        }
        let mut batches = Vec::with_capacity(expected);
        for row in 0..expected {
            let mut rows = BTreeMap::new();
            let mut annotations = AnnotationSet::new();
            for slot in &self.slots {
                rows.insert(slot.name().to_string(), BTreeSet::from([row]));
                annotations.merge_from(slot.annotations(row));
            }
            batches.push(Batch::new(rows, annotations));
        }
        Ok(batches)
    }

    /// No grouping: a single batch holding every row of every slot. A node
    /// with no input slots still yields one empty batch.
    #[must_use]
    pub fn build_merge_all(&self) -> Vec<Batch> {
        let mut rows = BTreeMap::new();
        let mut annotations = AnnotationSet::new();
        for slot in &self.slots {
            let all: BTreeSet<usize> = (0..slot.row_count()).collect();
            for row in &all {
                annotations.merge_from(slot.annotations(*row));
            }
            rows.insert(slot.name().to_string(), all);
        }
        vec![Batch::new(rows, annotations)]
    }
}

fn format_key(key: &BatchKey) -> String {
    let mut out = String::from("{");
    for (ix, (column, value)) in key.iter().enumerate() {
        if ix > 0 {
            out.push_str(", ");
        }
        match value {
            Some(v) => {
                let _ = write!(out, "{column}={v}");
            }
            None => {
                let _ = write!(out, "{column}=<absent>");
            }
        }
    }
    out.push('}');
    out
}
