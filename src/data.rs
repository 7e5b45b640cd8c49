//! Data items and type compatibility.
//!
//! The engine never interprets payloads. A [`DataItem`] is a JSON payload
//! tagged with a [`DataTypeId`] token; whether one token may flow into a
//! slot declared with another token is answered by the application through
//! the [`TypeOracle`] trait. This keeps the type system of the hosting
//! application (image types, tables, ROI lists, ...) out of the engine
//! while still enforcing it at every connection and every appended row.

use crate::types::DataTypeId;
use serde::{Deserialize, Serialize};

/// An opaque unit of pipeline data: a payload tagged with its type token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    type_id: DataTypeId,
    payload: serde_json::Value,
}

impl DataItem {
    pub fn new(type_id: impl Into<DataTypeId>, payload: serde_json::Value) -> Self {
        Self {
            type_id: type_id.into(),
            payload,
        }
    }

    #[must_use]
    pub fn type_id(&self) -> &DataTypeId {
        &self.type_id
    }

    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// Answers type-compatibility questions for connections and appended rows.
///
/// Implementations must be reflexive (`is_convertible(t, t)` is always true
/// for any sane oracle) and cheap: the graph consults the oracle on every
/// connection attempt and every appended row.
pub trait TypeOracle: Send + Sync {
    /// Whether a value tagged `from` may be accepted where `to` is declared,
    /// possibly via a lossy or widening conversion.
    fn is_convertible(&self, from: &DataTypeId, to: &DataTypeId) -> bool;

    /// Whether the conversion from `from` to `to` is the identity (no
    /// transformation needed). Trivial implies convertible.
    fn is_trivial(&self, from: &DataTypeId, to: &DataTypeId) -> bool {
        from == to
    }
}

/// The default oracle: only identical tokens are compatible.
#[derive(Clone, Copy, Debug, Default)]
pub struct StrictTypeOracle;

impl TypeOracle for StrictTypeOracle {
    fn is_convertible(&self, from: &DataTypeId, to: &DataTypeId) -> bool {
        from == to
    }
}
