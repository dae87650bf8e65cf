//! Tag algebra
//!
//! A tag answers two questions: "at which revision did anything I track last
//! change?" ([`Tag::value`]) and "is a snapshot taken at revision `r` still
//! current?" ([`Tag::validate`]). Tags compose bottom-up through [`combine`],
//! so dependency tracking never needs a global graph.
//!
//! ```text
//!  DirtyableTag ──┐
//!  UpdatableTag ──┼── combine ──▶ CombinatorTag ──▶ reference snapshot
//!  ConstantTag  ──┘   (max of children, computed on demand)
//! ```

use crate::revision::{Revision, RevisionClock};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared handle to any tag
pub type TagRef = Arc<dyn Tag>;

/// Capability reporting a monotonic revision
pub trait Tag: Send + Sync + fmt::Debug {
    /// Highest revision at which any tracked dependency last changed
    fn value(&self) -> Revision;

    /// True iff nothing tracked changed since `ticket` was captured
    ///
    /// A tag whose value is [`Revision::VOLATILE`] never validates.
    fn validate(&self, ticket: Revision) -> bool {
        let value = self.value();
        !value.is_volatile() && value == ticket
    }

    /// Whether the tag can never change
    fn is_constant(&self) -> bool {
        false
    }
}

/// Shared constant tag
pub static CONSTANT_TAG: Lazy<TagRef> = Lazy::new(|| Arc::new(ConstantTag));

/// Shared volatile tag
pub static VOLATILE_TAG: Lazy<TagRef> = Lazy::new(|| Arc::new(VolatileTag));

/// Handle to the shared constant tag
pub fn constant_tag() -> TagRef {
    CONSTANT_TAG.clone()
}

/// Handle to the shared volatile tag
pub fn volatile_tag() -> TagRef {
    VOLATILE_TAG.clone()
}

/// Identity comparison for tag handles (ignores vtable pointers)
pub fn same_tag(a: &TagRef, b: &TagRef) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Tag for values that never change
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantTag;

impl Tag for ConstantTag {
    fn value(&self) -> Revision {
        Revision::INITIAL
    }

    fn validate(&self, _ticket: Revision) -> bool {
        true
    }

    fn is_constant(&self) -> bool {
        true
    }
}

/// Tag for sources whose dependencies cannot be tracked
#[derive(Debug, Clone, Copy, Default)]
pub struct VolatileTag;

impl Tag for VolatileTag {
    fn value(&self) -> Revision {
        Revision::VOLATILE
    }

    fn validate(&self, _ticket: Revision) -> bool {
        false
    }
}

/// Leaf tag owned by a single writer
///
/// [`DirtyableTag::dirty`] advances the shared clock and records the new
/// revision as this tag's own.
#[derive(Debug)]
pub struct DirtyableTag {
    clock: Arc<RevisionClock>,
    revision: AtomicU64,
}

impl DirtyableTag {
    /// Create a tag whose revision is the clock's current value
    pub fn new(clock: &Arc<RevisionClock>) -> Self {
        DirtyableTag {
            clock: clock.clone(),
            revision: AtomicU64::new(clock.value().0),
        }
    }

    /// Create a shared tag
    pub fn shared(clock: &Arc<RevisionClock>) -> Arc<Self> {
        Arc::new(Self::new(clock))
    }

    /// Mark the tracked state as changed
    pub fn dirty(&self) -> Revision {
        let revision = self.clock.bump();
        self.revision.store(revision.0, Ordering::SeqCst);
        revision
    }

    /// The clock this tag advances
    pub fn clock(&self) -> &Arc<RevisionClock> {
        &self.clock
    }

    /// Record a revision already obtained from the clock
    ///
    /// Lets one mutation event dirty several tags with a single bump.
    pub(crate) fn record(&self, revision: Revision) {
        self.revision.fetch_max(revision.0, Ordering::SeqCst);
    }
}

impl Tag for DirtyableTag {
    fn value(&self) -> Revision {
        Revision(self.revision.load(Ordering::SeqCst))
    }
}

/// Tag delegating to a swappable inner tag
///
/// Swapping does not advance the clock. The tag reports the larger of the
/// inner tag's value and the clock value at the last swap, so installing an
/// older inner tag never makes the observed revision go backwards.
#[derive(Debug)]
pub struct UpdatableTag {
    clock: Arc<RevisionClock>,
    inner: RwLock<TagRef>,
    last_updated: AtomicU64,
}

impl UpdatableTag {
    pub fn new(clock: &Arc<RevisionClock>, inner: TagRef) -> Self {
        UpdatableTag {
            clock: clock.clone(),
            inner: RwLock::new(inner),
            last_updated: AtomicU64::new(Revision::INITIAL.0),
        }
    }

    /// Create a shared tag starting from the constant tag
    pub fn shared(clock: &Arc<RevisionClock>) -> Arc<Self> {
        Arc::new(Self::new(clock, constant_tag()))
    }

    /// Install a new inner tag
    pub fn update(&self, inner: TagRef) {
        let mut current = self.inner.write();
        if same_tag(&current, &inner) {
            return;
        }
        *current = inner;
        self.last_updated
            .fetch_max(self.clock.value().0, Ordering::SeqCst);
    }

    /// The currently installed inner tag
    pub fn inner(&self) -> TagRef {
        self.inner.read().clone()
    }
}

impl Tag for UpdatableTag {
    fn value(&self) -> Revision {
        let inner = self.inner.read().value();
        inner.max(Revision(self.last_updated.load(Ordering::SeqCst)))
    }
}

/// Tag whose value is the maximum of its children
///
/// Nothing is cached: children may be updatable tags whose inner tag changes
/// between calls.
#[derive(Debug)]
pub struct CombinatorTag {
    children: Vec<TagRef>,
}

impl CombinatorTag {
    pub fn new(children: Vec<TagRef>) -> Self {
        CombinatorTag { children }
    }

    pub fn children(&self) -> &[TagRef] {
        &self.children
    }
}

impl Tag for CombinatorTag {
    fn value(&self) -> Revision {
        self.children
            .iter()
            .map(|tag| tag.value())
            .max()
            .unwrap_or(Revision::INITIAL)
    }
}

/// Combine tags into one reporting the maximum of their values
pub fn combine<I>(tags: I) -> TagRef
where
    I: IntoIterator<Item = TagRef>,
{
    let mut children: Vec<TagRef> = tags.into_iter().filter(|t| !t.is_constant()).collect();
    match children.len() {
        0 => constant_tag(),
        1 => children.pop().unwrap_or_else(constant_tag),
        _ => Arc::new(CombinatorTag::new(children)),
    }
}
