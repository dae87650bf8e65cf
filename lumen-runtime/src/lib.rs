//! Lumen runtime - reconciliation on top of the reactive core
//!
//! This crate drives rendering from the tags built by `lumen-reactive`:
//!
//! - **Scheduler**: owns render roots, re-renders stale ones after each batch
//!   and stops runaway invalidation cascades
//! - **Batches**: begin/end signals that group mutations into one render
//! - **Keyed iteration**: diffs a source collection against the previous pass,
//!   reusing per-key state
//! - **Components**: lifecycle state machine driven by component managers
//!
//! ## Example
//!
//! ```rust
//! use lumen_reactive::{RevisionClock, Value, WritableReference};
//! use lumen_runtime::{Root, RenderContext, Scheduler, SchedulerConfig};
//! use lumen_types::NodeId;
//! use std::sync::Arc;
//!
//! let clock = RevisionClock::shared();
//! let scheduler = Scheduler::new(clock.clone(), SchedulerConfig::default());
//! let name = Arc::new(WritableReference::new(&clock, Value::str("Ada")));
//!
//! let source = name.clone();
//! let root = Root::from_fn(NodeId(0), move |_ctx: &mut RenderContext| {
//!     let _ = lumen_reactive::Reference::value(source.as_ref());
//!     Ok(())
//! });
//! scheduler.register_root(root).unwrap();
//! scheduler.render_roots().unwrap();
//! assert!(scheduler.is_valid());
//!
//! name.update(Value::str("Grace"));
//! assert!(scheduler.revalidate().unwrap());
//! ```

#![warn(missing_debug_implementations)]

pub mod batch;
pub mod bounds;
pub mod component;
pub mod config;
pub mod error;
pub mod iteration;
pub mod scheduler;

pub use batch::{BatchCallback, BatchQueue, BatchSignal, SubscriptionId};
pub use bounds::{fresh_node, Bounds, SimpleBounds};
pub use component::{
    ArgsSnapshot, CapturedArgs, ComponentInstance, ComponentItems, ComponentManager,
    ComponentRegistry, ComponentState, DirtyHandle, LifecycleState, ManagerCapabilities,
};
pub use config::{ConfigError, LumenConfig, SchedulerConfig};
pub use error::{RenderError, Result};
pub use iteration::{
    project, unique_keys, BlockDelegate, DiffOp, DiffSummary, ItemRefs, IterableReference,
    IterationItem, KeyDeduper, KeyMode, KeyedList, ListBlock, Memo, DUPLICATE_KEY_SEPARATOR,
};
pub use scheduler::{RenderContext, Root, RootRenderer, Scheduler};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::batch::{BatchQueue, BatchSignal};
    pub use crate::component::{
        CapturedArgs, ComponentInstance, ComponentItems, ComponentManager, ComponentRegistry,
        ComponentState, ManagerCapabilities,
    };
    pub use crate::error::{RenderError, Result};
    pub use crate::iteration::{BlockDelegate, IterableReference, KeyMode, ListBlock};
    pub use crate::scheduler::{RenderContext, Root, RootRenderer, Scheduler};
}
