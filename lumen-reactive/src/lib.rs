//! Lumen reactive core
//!
//! This crate provides the invalidation layer of the lumen rendering
//! engine: a revision clock, a small algebra of tags built on it, and
//! lazily memoized references that recompute only when their tag says the
//! inputs moved.
//!
//! # Architecture
//!
//! There is no global dependency graph. Each reference owns a tag composed
//! bottom-up from the tags of whatever it reads:
//!
//! ```text
//! TrackedObject.set("b") ──dirty──▶ property tag "b"
//!                                        │ (installed into an UpdatableTag while computing)
//!                                        ▼
//!                 PropertyReference(a.b).tag = combine([tag(a), updatable])
//!                                        │
//!                                        ▼
//!                      snapshot check: tag.validate(last_revision)
//! ```
//!
//! Mutations dirty tags (data flows up); readers ask their tag whether a
//! snapshot is still current (control flows down).
//!
//! # Example
//!
//! ```rust
//! use lumen_reactive::prelude::*;
//! use serde_json::json;
//!
//! let clock = RevisionClock::shared();
//! let state = Value::from_json(&clock, &json!({"user": {"name": "Ada"}}));
//! let root = RootReference::new(&clock, state.clone());
//!
//! let name = get_path(&root, "user.name").unwrap();
//! assert_eq!(name.value(), Value::str("Ada"));
//!
//! // Second read is memoized
//! name.value();
//! assert_eq!(name.metrics().executions(), 1);
//!
//! // Writing through the model dirties exactly the tracked property
//! Mutation::Set { path: "user.name".into(), value: json!("Grace") }
//!     .apply(&state, &clock)
//!     .unwrap();
//! assert_eq!(name.value(), Value::str("Grace"));
//! ```

#![warn(missing_debug_implementations)]

pub mod memo;
pub mod metrics;
pub mod model;
pub mod mutation;
pub mod property;
pub mod reference;
pub mod revision;
pub mod tag;

pub use memo::{MemoEntry, MemoSlot};
pub use metrics::{ComputeMetrics, MetricsSnapshot};
pub use model::{OpaqueValue, TrackedList, TrackedObject, Value, ValueKind};
pub use mutation::{Mutation, MutationBatch, MutationError};
pub use property::{get_path, PathReference, PropertyReference, RootReference};
pub use reference::{map, CachedReference, ConstReference, RefHandle, Reference, WritableReference};
pub use revision::{Revision, RevisionClock};
pub use tag::{
    combine, constant_tag, volatile_tag, CombinatorTag, ConstantTag, DirtyableTag, Tag, TagRef,
    UpdatableTag, VolatileTag,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::model::{TrackedList, TrackedObject, Value, ValueKind};
    pub use crate::mutation::Mutation;
    pub use crate::property::{get_path, PathReference, RootReference};
    pub use crate::reference::{CachedReference, RefHandle, Reference, WritableReference};
    pub use crate::revision::{Revision, RevisionClock};
    pub use crate::tag::{combine, DirtyableTag, Tag, TagRef, UpdatableTag};
}
