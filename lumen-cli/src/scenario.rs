//! Scenario files
//!
//! A scenario describes initial state, the list to render from it and the
//! mutations to replay:
//!
//! ```yaml
//! state:
//!   todos:
//!     - { id: 1, title: Write }
//! list:
//!   path: todos
//!   key: id
//!   label: title
//!   empty: Nothing to do
//! steps:
//!   - { op: push, path: todos, value: { id: 2, title: Test } }
//!   - - { op: remove, path: todos, index: 0 }
//!     - { op: remove, path: todos, index: 0 }
//! ```

use anyhow::{Context, Result};
use lumen_reactive::{Mutation, MutationBatch, MutationError, RevisionClock, Value};
use lumen_runtime::KeyMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Scenario {
    #[serde(default)]
    pub state: serde_json::Value,
    pub list: ListSpec,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Which collection to iterate and how to render its items
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListSpec {
    /// Dotted path to the collection
    pub path: String,

    #[serde(default = "default_key")]
    pub key: KeyMode,

    /// Dotted path inside each item to print; the item itself when omitted
    #[serde(default)]
    pub label: Option<String>,

    /// Text shown while the collection is empty
    #[serde(default)]
    pub empty: Option<String>,
}

fn default_key() -> KeyMode {
    KeyMode::Index
}

/// One batch of mutations
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Step {
    Single(Mutation),
    Batch(MutationBatch),
}

impl Step {
    pub fn len(&self) -> usize {
        match self {
            Step::Single(_) => 1,
            Step::Batch(batch) => batch.len(),
        }
    }

    /// Returns how many mutations dirtied state
    pub fn apply(&self, root: &Value, clock: &Arc<RevisionClock>) -> Result<usize, MutationError> {
        match self {
            Step::Single(mutation) => mutation.apply(root, clock).map(usize::from),
            Step::Batch(batch) => batch.apply(root, clock),
        }
    }
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        if scenario.list.path.split('.').all(|s| s.is_empty()) {
            anyhow::bail!("list.path must name a collection");
        }
        Ok(scenario)
    }
}
