//! Pre-run validity checks.
//!
//! Validation is advisory: it returns a [`ValidityReport`] describing what
//! would keep a run from producing results, it never mutates the graph and
//! never fails. The runner does not require a clean report; deactivated
//! nodes are simply skipped.

use crate::graph::{Graph, SlotId};
use crate::types::NodeKey;
use std::fmt;

/// What kind of problem an issue describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueKind {
    /// A required input slot has no incoming connection.
    UnconnectedInput,
    /// A node the checked node depends on is disabled.
    DisabledDependency,
}

/// One validity problem, attached to the node it was found on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidityIssue {
    pub node: NodeKey,
    /// The input slot concerned, for slot-level issues.
    pub slot: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

impl fmt::Display for ValidityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            Some(slot) => write!(f, "{} [{slot}]: {}", self.node, self.message),
            None => write!(f, "{}: {}", self.node, self.message),
        }
    }
}

/// The outcome of a validity check. Empty means valid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidityReport {
    issues: Vec<ValidityIssue>,
}

impl ValidityReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    #[must_use]
    pub fn issues(&self) -> &[ValidityIssue] {
        &self.issues
    }

    fn push(&mut self, issue: ValidityIssue) {
        self.issues.push(issue);
    }
}

impl Graph {
    /// Checks every enabled, non-pass-through node for required inputs
    /// without a source.
    #[must_use]
    pub fn report_validity(&self) -> ValidityReport {
        let mut report = ValidityReport::default();
        for (key, node) in self.nodes() {
            if !node.is_enabled() || node.is_pass_through() {
                continue;
            }
            self.check_inputs(key, &mut report);
        }
        report
    }

    /// Checks whether `key` could produce results: walks the node and its
    /// transitive predecessors in execution order and reports the first
    /// problem found. A disabled dependency yields a single issue rather
    /// than one per downstream node.
    ///
    /// # Panics
    ///
    /// Panics if no node with `key` exists.
    #[must_use]
    pub fn report_validity_for(&self, key: &NodeKey) -> ValidityReport {
        let mut report = ValidityReport::default();
        let mut scope = self.predecessors(key);
        scope.push(key.clone());
        for checked in &scope {
            let node = self.node(checked);
            if node.is_pass_through() {
                continue;
            }
            if !node.is_enabled() {
                report.push(ValidityIssue {
                    node: checked.clone(),
                    slot: None,
                    kind: IssueKind::DisabledDependency,
                    message: format!(
                        "node '{}' is disabled, so '{key}' cannot produce results",
                        node.name()
                    ),
                });
                return report;
            }
            let before = report.issues.len();
            self.check_inputs(checked, &mut report);
            if report.issues.len() > before {
                return report;
            }
        }
        report
    }

    fn check_inputs(&self, key: &NodeKey, report: &mut ValidityReport) {
        let node = self.node(key);
        for slot in node.input_slots() {
            if slot.is_optional() {
                continue;
            }
            let id = SlotId::input(key.clone(), slot.name());
            if self.get_source(&id).is_none() {
                report.push(ValidityIssue {
                    node: key.clone(),
                    slot: Some(slot.name().to_string()),
                    kind: IssueKind::UnconnectedInput,
                    message: format!("input slot '{}' has no incoming connection", slot.name()),
                });
            }
        }
    }
}
