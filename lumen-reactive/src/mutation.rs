//! Path-addressed state mutations
//!
//! Mutations are the write side of the tracked model: each one names a
//! dotted path from a root value and an operation. Applying a mutation goes
//! through [`TrackedObject`] / [`TrackedList`], so exactly the tags that
//! track the touched state are dirtied, and writes that change nothing dirty
//! nothing.

use crate::model::{TrackedList, TrackedObject, Value};
use crate::revision::RevisionClock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while applying a mutation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Empty mutation path")]
    EmptyPath,

    #[error("Expected {expected} at `{path}`")]
    InvalidTarget { path: String, expected: &'static str },

    #[error("Index {index} out of bounds for `{path}` (len {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },
}

/// A single state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Write a property (or a list index when the last segment is numeric)
    Set {
        path: String,
        value: serde_json::Value,
    },
    Push {
        path: String,
        value: serde_json::Value,
    },
    Pop {
        path: String,
    },
    Insert {
        path: String,
        index: usize,
        value: serde_json::Value,
    },
    Remove {
        path: String,
        index: usize,
    },
    Swap {
        path: String,
        a: usize,
        b: usize,
    },
    Reverse {
        path: String,
    },
    Replace {
        path: String,
        values: Vec<serde_json::Value>,
    },
}

impl Mutation {
    pub fn path(&self) -> &str {
        match self {
            Mutation::Set { path, .. }
            | Mutation::Push { path, .. }
            | Mutation::Pop { path }
            | Mutation::Insert { path, .. }
            | Mutation::Remove { path, .. }
            | Mutation::Swap { path, .. }
            | Mutation::Reverse { path }
            | Mutation::Replace { path, .. } => path,
        }
    }

    /// Apply to the state rooted at `root`
    ///
    /// Returns whether anything was dirtied.
    pub fn apply(&self, root: &Value, clock: &Arc<RevisionClock>) -> Result<bool, MutationError> {
        let changed = match self {
            Mutation::Set { path, value } => {
                let (parent, last) = split_last(path)?;
                let target = resolve(root, parent)?;
                let value = Value::from_json(clock, value);
                match &target {
                    Value::Object(object) => object.set(last, value),
                    Value::List(list) => {
                        let index = parse_index(path, last)?;
                        let len = list.len();
                        list.set(index, value)
                            .ok_or_else(|| out_of_bounds(path, index, len))?
                    }
                    _ => return Err(invalid(path, "an object or list")),
                }
            }
            Mutation::Push { path, value } => {
                expect_list(root, path)?.push(Value::from_json(clock, value));
                true
            }
            Mutation::Pop { path } => expect_list(root, path)?.pop().is_some(),
            Mutation::Insert { path, index, value } => {
                let list = expect_list(root, path)?;
                let len = list.len();
                list.insert(*index, Value::from_json(clock, value))
                    .ok_or_else(|| out_of_bounds(path, *index, len))?;
                true
            }
            Mutation::Remove { path, index } => {
                let list = expect_list(root, path)?;
                let len = list.len();
                list.remove(*index)
                    .ok_or_else(|| out_of_bounds(path, *index, len))?;
                true
            }
            Mutation::Swap { path, a, b } => {
                let list = expect_list(root, path)?;
                let len = list.len();
                list.swap(*a, *b)
                    .ok_or_else(|| out_of_bounds(path, (*a).max(*b), len))?
            }
            Mutation::Reverse { path } => expect_list(root, path)?.reverse(),
            Mutation::Replace { path, values } => expect_list(root, path)?
                .replace(values.iter().map(|v| Value::from_json(clock, v)).collect()),
        };

        tracing::debug!(path = self.path(), changed, "mutation applied");
        Ok(changed)
    }
}

/// An ordered group of mutations applied together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationBatch {
    mutations: Vec<Mutation>,
}

impl MutationBatch {
    pub fn new(mutations: Vec<Mutation>) -> Self {
        MutationBatch { mutations }
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }

    /// Apply every mutation in order, stopping at the first error
    ///
    /// Returns how many mutations actually dirtied state.
    pub fn apply(&self, root: &Value, clock: &Arc<RevisionClock>) -> Result<usize, MutationError> {
        let mut dirtied = 0;
        for mutation in &self.mutations {
            if mutation.apply(root, clock)? {
                dirtied += 1;
            }
        }
        Ok(dirtied)
    }
}

/// Walk `path` from `root`
pub fn resolve(root: &Value, path: &str) -> Result<Value, MutationError> {
    let mut current = root.clone();
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match &current {
            Value::Object(object) if object.contains(segment) => object.get(segment),
            Value::List(list) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| list.get(index))
                .ok_or_else(|| MutationError::PathNotFound(path.to_string()))?,
            _ => return Err(MutationError::PathNotFound(path.to_string())),
        };
    }
    Ok(current)
}

fn split_last(path: &str) -> Result<(&str, &str), MutationError> {
    if path.is_empty() {
        return Err(MutationError::EmptyPath);
    }
    Ok(match path.rsplit_once('.') {
        Some((parent, last)) => (parent, last),
        None => ("", path),
    })
}

fn parse_index(path: &str, segment: &str) -> Result<usize, MutationError> {
    segment
        .parse::<usize>()
        .map_err(|_| invalid(path, "a numeric list index"))
}

fn expect_list(root: &Value, path: &str) -> Result<TrackedList, MutationError> {
    match resolve(root, path)? {
        Value::List(list) => Ok(list),
        _ => Err(invalid(path, "a list")),
    }
}

/// Resolve `path` to an object
pub fn expect_object(root: &Value, path: &str) -> Result<TrackedObject, MutationError> {
    match resolve(root, path)? {
        Value::Object(object) => Ok(object),
        _ => Err(invalid(path, "an object")),
    }
}

fn invalid(path: &str, expected: &'static str) -> MutationError {
    MutationError::InvalidTarget {
        path: path.to_string(),
        expected,
    }
}

fn out_of_bounds(path: &str, index: usize, len: usize) -> MutationError {
    MutationError::IndexOutOfBounds {
        path: path.to_string(),
        index,
        len,
    }
}
