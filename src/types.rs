//! Core identifier types for the pipeline graph engine.
//!
//! This module defines the small, widely-shared identity types: node keys,
//! slot direction, opaque data-type tokens, and node categories. These are
//! the vocabulary the rest of the crate is written in.
//!
//! # Examples
//!
//! ```rust
//! use pipewright::types::{DataTypeId, Direction, NodeKey};
//!
//! let key = NodeKey::from("blur-filter");
//! assert_eq!(key.as_str(), "blur-filter");
//!
//! let ty = DataTypeId::from("imagej-greyscale");
//! assert_eq!(ty.to_string(), "imagej-greyscale");
//!
//! assert!(Direction::Input.is_input());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique key of a node within its owning [`Graph`](crate::graph::Graph).
///
/// Keys are stable for the lifetime of the graph entry; removing a node frees
/// its key for reuse by later inserts. Auto-generated keys are derived from
/// the node's display name plus a disambiguating suffix (see
/// [`Graph::insert`](crate::graph::Graph::insert)).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Whether a slot consumes data (input) or produces it (output).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    #[must_use]
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input)
    }

    #[must_use]
    pub fn is_output(self) -> bool {
        matches!(self, Self::Output)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Opaque token identifying a data type.
///
/// The engine never inspects payloads; compatibility between tokens is
/// answered by a [`TypeOracle`](crate::data::TypeOracle) supplied by the
/// embedding application.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataTypeId(String);

impl DataTypeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataTypeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DataTypeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Broad grouping of a node declaration, used for presentation and for
/// deciding whether a user may delete a node. Irrelevant to execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeCategory {
    /// Produces data without pipeline inputs (readers, generators).
    DataSource,
    /// Transforms input rows into output rows.
    Processor,
    /// Converts between data types without changing content.
    Converter,
    /// Extracts measurements or summaries.
    Analysis,
    /// Manipulates row annotations.
    Annotation,
    /// Engine-managed nodes that users cannot remove.
    Internal,
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataSource => write!(f, "data source"),
            Self::Processor => write!(f, "processor"),
            Self::Converter => write!(f, "converter"),
            Self::Analysis => write!(f, "analysis"),
            Self::Annotation => write!(f, "annotation"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
