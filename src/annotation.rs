//! String annotations attached to data rows.
//!
//! Every row carried through a pipeline may be tagged with named string
//! annotations (sample id, well position, replicate number, ...). The
//! batching algorithm groups rows across slots by comparing annotation
//! values, so annotations are the join keys of the whole engine.
//!
//! [`AnnotationSet`] keeps at most one value per name and iterates in
//! name order, which keeps batch grouping and serialization deterministic.
//!
//! # Examples
//!
//! ```rust
//! use pipewright::annotation::{Annotation, AnnotationSet};
//!
//! let mut set = AnnotationSet::new();
//! set.insert(Annotation::new("sample", "A1"));
//! set.insert(Annotation::new("sample", "A2")); // newest wins
//!
//! assert_eq!(set.get("sample"), Some("A2"));
//! assert_eq!(set.len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single named annotation value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub value: String,
}

impl Annotation {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// A set of annotations, at most one value per name.
///
/// Inserting an annotation whose name is already present replaces the old
/// value (newest wins). Iteration order is always ascending by name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationSet {
    entries: BTreeMap<String, String>,
}

impl AnnotationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Inserts an annotation, replacing any previous value under the same
    /// name. Returns the replaced annotation, if any.
    pub fn insert(&mut self, annotation: Annotation) -> Option<Annotation> {
        self.entries
            .insert(annotation.name.clone(), annotation.value)
            .map(|old| Annotation::new(annotation.name, old))
    }

    /// Looks up the value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn contains_name(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Whether this set holds exactly `annotation`'s value under its name.
    #[must_use]
    pub fn contains(&self, annotation: &Annotation) -> bool {
        self.get(&annotation.name) == Some(annotation.value.as_str())
    }

    /// Whether every annotation in `annotations` is present with a matching
    /// value.
    pub fn contains_all<'a>(&self, annotations: impl IntoIterator<Item = &'a Annotation>) -> bool {
        annotations.into_iter().all(|a| self.contains(a))
    }

    /// Iterates `(name, value)` pairs in ascending name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterates annotation names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Copies every annotation from `other` into `self`; values from `other`
    /// win on name collisions.
    pub fn merge_from(&mut self, other: &AnnotationSet) {
        for (name, value) in &other.entries {
            self.entries.insert(name.clone(), value.clone());
        }
    }
}

impl FromIterator<Annotation> for AnnotationSet {
    fn from_iter<I: IntoIterator<Item = Annotation>>(iter: I) -> Self {
        let mut set = Self::new();
        for a in iter {
            set.insert(a);
        }
        set
    }
}

impl Extend<Annotation> for AnnotationSet {
    fn extend<I: IntoIterator<Item = Annotation>>(&mut self, iter: I) {
        for a in iter {
            self.insert(a);
        }
    }
}
