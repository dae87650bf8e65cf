//! References: lazily evaluated, tag-backed values
//!
//! A reference pairs a value with the tag that says when the value may have
//! changed. [`CachedReference`] memoizes its computation and recomputes only
//! when its tag no longer validates the snapshot taken after the last run.

use crate::memo::MemoSlot;
use crate::metrics::ComputeMetrics;
use crate::revision::{Revision, RevisionClock};
use crate::tag::{constant_tag, DirtyableTag, Tag, TagRef};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// A value node carrying a tag
pub trait Reference<T>: Send + Sync {
    /// Tag reporting when the value may have changed
    fn tag(&self) -> TagRef;

    /// Current value
    fn value(&self) -> T;
}

/// Shared handle to any reference
pub type RefHandle<T> = Arc<dyn Reference<T>>;

type ComputeFn<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Reference to a value fixed at construction
#[derive(Debug, Clone)]
pub struct ConstReference<T> {
    value: T,
}

impl<T> ConstReference<T> {
    pub fn new(value: T) -> Self {
        ConstReference { value }
    }
}

impl<T: Clone + Send + Sync> Reference<T> for ConstReference<T> {
    fn tag(&self) -> TagRef {
        constant_tag()
    }

    fn value(&self) -> T {
        self.value.clone()
    }
}

/// Memoized reference backed by a compute closure
///
/// The closure must be a pure projection of upstream reference values. It
/// runs without any lock of this reference held, so it may read other
/// references freely.
pub struct CachedReference<T> {
    tag: TagRef,
    compute: ComputeFn<T>,
    memo: MemoSlot<T>,
    metrics: ComputeMetrics,
}

impl<T: Clone + Send + Sync> CachedReference<T> {
    pub fn new<F>(tag: TagRef, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::named("cached", tag, compute)
    }

    /// Create a reference whose metrics carry `name`
    pub fn named<F>(name: &'static str, tag: TagRef, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        CachedReference {
            tag,
            compute: Box::new(compute),
            memo: MemoSlot::new(),
            metrics: ComputeMetrics::new(name),
        }
    }

    /// Snapshot recorded after the last computation
    pub fn last_revision(&self) -> Option<Revision> {
        self.memo.revision()
    }

    /// Whether the next read would be answered from the memo
    pub fn is_fresh(&self) -> bool {
        self.memo
            .revision()
            .map(|rev| self.tag.validate(rev))
            .unwrap_or(false)
    }

    pub fn metrics(&self) -> &ComputeMetrics {
        &self.metrics
    }

    fn recompute(&self) -> T {
        let started = Instant::now();
        let value = (self.compute)();
        self.metrics.record_execution(started.elapsed());

        // Taken once, after compute: the computation may install inner tags.
        let revision = self.tag.value();
        self.memo.store(value.clone(), revision);
        value
    }
}

impl<T: Clone + Send + Sync> Reference<T> for CachedReference<T> {
    fn tag(&self) -> TagRef {
        self.tag.clone()
    }

    fn value(&self) -> T {
        match self.memo.get_valid(self.tag.as_ref()) {
            Some(value) => {
                self.metrics.record_hit();
                value
            }
            None => self.recompute(),
        }
    }
}

impl<T> fmt::Debug for CachedReference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedReference")
            .field("name", &self.metrics.name())
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// Derive a cached reference from `parent` through `f`
pub fn map<T, U, F>(parent: RefHandle<T>, f: F) -> CachedReference<U>
where
    T: 'static,
    U: Clone + Send + Sync,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    let tag = parent.tag();
    CachedReference::named("map", tag, move || f(parent.value()))
}

/// Reference whose value is replaced from outside
///
/// Writing a value equal to the current one leaves the tag untouched, so
/// nothing downstream recomputes.
#[derive(Debug)]
pub struct WritableReference<T> {
    tag: Arc<DirtyableTag>,
    value: RwLock<T>,
}

impl<T: Clone + PartialEq + Send + Sync> WritableReference<T> {
    pub fn new(clock: &Arc<RevisionClock>, value: T) -> Self {
        WritableReference {
            tag: DirtyableTag::shared(clock),
            value: RwLock::new(value),
        }
    }

    /// Replace the value; returns whether the tag was dirtied
    pub fn update(&self, value: T) -> bool {
        let mut current = self.value.write();
        if *current == value {
            return false;
        }
        *current = value;
        drop(current);
        self.tag.dirty();
        true
    }

    /// The dirtyable tag backing this reference
    pub fn dirtyable_tag(&self) -> &Arc<DirtyableTag> {
        &self.tag
    }
}

impl<T: Clone + PartialEq + Send + Sync> Reference<T> for WritableReference<T> {
    fn tag(&self) -> TagRef {
        self.tag.clone()
    }

    fn value(&self) -> T {
        self.value.read().clone()
    }
}
