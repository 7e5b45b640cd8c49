//! Typed data slots.
//!
//! A slot is the unit of data exchange between nodes: a named, directed,
//! typed table of rows, where each row is a [`DataItem`] plus its
//! [`AnnotationSet`]. Input slots receive rows pulled from their connected
//! source before a node executes; output slots collect what the node
//! produces.
//!
//! Appending a row checks the item's type token against the slot's declared
//! type through the graph's [`TypeOracle`]; rows that already passed a
//! connection-time check are transferred without re-checking.

use crate::annotation::{Annotation, AnnotationSet};
use crate::data::{DataItem, TypeOracle};
use crate::types::{DataTypeId, Direction};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Declared shape of one slot: name, direction, type token, optionality.
///
/// Optional input slots may stay unconnected without tripping validation or
/// deactivating their node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDefinition {
    pub name: String,
    pub direction: Direction,
    pub data_type: DataTypeId,
    #[serde(default)]
    pub optional: bool,
}

impl SlotDefinition {
    pub fn input(name: impl Into<String>, data_type: impl Into<DataTypeId>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Input,
            data_type: data_type.into(),
            optional: false,
        }
    }

    pub fn output(name: impl Into<String>, data_type: impl Into<DataTypeId>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Output,
            data_type: data_type.into(),
            optional: false,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// The full slot configuration of a node: its input and output definitions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSchema {
    inputs: Vec<SlotDefinition>,
    outputs: Vec<SlotDefinition>,
}

impl SlotSchema {
    /// Builds a schema from definition lists. Definitions whose direction
    /// contradicts the list they appear in are a programmer error.
    ///
    /// # Panics
    ///
    /// Panics if an entry of `inputs` is not an input definition, or an entry
    /// of `outputs` is not an output definition.
    #[must_use]
    pub fn new(inputs: Vec<SlotDefinition>, outputs: Vec<SlotDefinition>) -> Self {
        for def in &inputs {
            assert!(
                def.direction.is_input(),
                "slot '{}' listed as input but declared {}",
                def.name,
                def.direction
            );
        }
        for def in &outputs {
            assert!(
                def.direction.is_output(),
                "slot '{}' listed as output but declared {}",
                def.name,
                def.direction
            );
        }
        Self { inputs, outputs }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn inputs(&self) -> &[SlotDefinition] {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &[SlotDefinition] {
        &self.outputs
    }
}

/// One stored row: the data item plus the annotations it carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotRow {
    pub data: DataItem,
    pub annotations: AnnotationSet,
}

/// Errors raised when appending data to a slot.
#[derive(Debug, Error, Diagnostic)]
pub enum SlotError {
    /// The offered item's type token is not convertible to the slot's
    /// declared type.
    #[error("slot '{slot}' declares type '{declared}' but was offered '{offered}'")]
    #[diagnostic(
        code(pipewright::slot::incompatible_data),
        help("check the producing node's output type, or widen the oracle's conversion rules")
    )]
    IncompatibleData {
        slot: String,
        declared: DataTypeId,
        offered: DataTypeId,
    },
}

/// A named, directed, typed table of data rows.
#[derive(Clone, Debug)]
pub struct Slot {
    definition: SlotDefinition,
    rows: Vec<SlotRow>,
}

impl Slot {
    #[must_use]
    pub fn from_definition(definition: SlotDefinition) -> Self {
        Self {
            definition,
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn definition(&self) -> &SlotDefinition {
        &self.definition
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.definition.direction
    }

    #[must_use]
    pub fn data_type(&self) -> &DataTypeId {
        &self.definition.data_type
    }

    #[must_use]
    pub fn is_input(&self) -> bool {
        self.definition.direction.is_input()
    }

    #[must_use]
    pub fn is_output(&self) -> bool {
        self.definition.direction.is_output()
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.definition.optional
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn rows(&self) -> &[SlotRow] {
        &self.rows
    }

    /// Returns the data item stored at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds; row indices come from this slot's
    /// own batches, so an out-of-range index is a programmer error.
    #[must_use]
    pub fn data(&self, row: usize) -> &DataItem {
        &self
            .rows
            .get(row)
            .unwrap_or_else(|| panic!("slot '{}' has no row {row}", self.definition.name))
            .data
    }

    /// Returns the annotations of the row at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    #[must_use]
    pub fn annotations(&self, row: usize) -> &AnnotationSet {
        &self
            .rows
            .get(row)
            .unwrap_or_else(|| panic!("slot '{}' has no row {row}", self.definition.name))
            .annotations
    }

    /// The set of annotation names appearing on at least one row.
    #[must_use]
    pub fn annotation_columns(&self) -> BTreeSet<String> {
        let mut columns = BTreeSet::new();
        for row in &self.rows {
            columns.extend(row.annotations.names().map(str::to_string));
        }
        columns
    }

    /// Indices of every row whose annotations contain all of `annotations`
    /// with matching values. An empty query matches every row.
    #[must_use]
    pub fn find_rows_with_annotations(&self, annotations: &[Annotation]) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.annotations.contains_all(annotations))
            .map(|(ix, _)| ix)
            .collect()
    }

    /// Appends a row after checking the item's type token against the slot's
    /// declared type through `oracle`.
    pub fn add_data(
        &mut self,
        item: DataItem,
        annotations: impl IntoIterator<Item = Annotation>,
        oracle: &dyn TypeOracle,
    ) -> Result<(), SlotError> {
        self.add_row(item, annotations.into_iter().collect(), oracle)
    }

    /// As [`Slot::add_data`], with an already-built annotation set.
    pub fn add_row(
        &mut self,
        item: DataItem,
        annotations: AnnotationSet,
        oracle: &dyn TypeOracle,
    ) -> Result<(), SlotError> {
        if !oracle.is_convertible(item.type_id(), &self.definition.data_type) {
            return Err(SlotError::IncompatibleData {
                slot: self.definition.name.clone(),
                declared: self.definition.data_type.clone(),
                offered: item.type_id().clone(),
            });
        }
        self.rows.push(SlotRow {
            data: item,
            annotations,
        });
        Ok(())
    }

    /// Appends an already-checked row. Used for slot-to-slot transfers where
    /// convertibility was established when the connection was made.
    pub(crate) fn push_row(&mut self, row: SlotRow) {
        self.rows.push(row);
    }

    /// Drops every stored row. The slot's definition is unaffected.
    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
