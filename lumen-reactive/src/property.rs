//! Property-path references
//!
//! `a.b.c` is built from single-property steps (`a` → `a.b` → `a.b.c`), each
//! one a cached reference with its own tag:
//!
//! ```text
//! tag(a.b) = combine([tag(a), updatable(property tag of "b" on the value of a)])
//! ```
//!
//! The updatable inner tag is installed while computing, from the
//! classification of the parent value. Changing `c` therefore only
//! invalidates `a.b.c`; `a.b` merely re-validates its own unchanged tag.

use crate::metrics::ComputeMetrics;
use crate::model::{Value, ValueKind};
use crate::reference::{CachedReference, RefHandle, Reference};
use crate::revision::{Revision, RevisionClock};
use crate::tag::{combine, constant_tag, volatile_tag, TagRef, UpdatableTag};
use dashmap::DashMap;
use std::sync::{Arc, Weak};

/// Reference that can hand out cached child property references
///
/// Children hold their parent; the parent only remembers its children
/// weakly, so dropping the last handle to a path frees the whole chain.
pub trait PathReference: Reference<Value> {
    /// Reference to `property` of this reference's value
    ///
    /// While a child is alive, repeated calls with the same property return it.
    fn get(self: &Arc<Self>, property: &str) -> Arc<PropertyReference>;
}

/// Resolve a dotted path one step at a time
///
/// Returns `None` for an empty path.
pub fn get_path<R>(root: &Arc<R>, path: &str) -> Option<Arc<PropertyReference>>
where
    R: PathReference,
{
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let mut current = root.get(segments.next()?);
    for segment in segments {
        current = current.get(segment);
    }
    Some(current)
}

/// Read `property` from `parent`, installing the matching tag into `inner`
pub fn read_property(parent: &Value, property: &str, inner: &UpdatableTag) -> Value {
    match parent.kind() {
        ValueKind::KeyedMap => match parent.as_object() {
            Some(object) => {
                inner.update(object.property_tag(property));
                object.get(property)
            }
            None => Value::Null,
        },
        ValueKind::Sequence => match parent.as_list() {
            Some(list) => {
                inner.update(list.tag());
                if property == "length" {
                    Value::Number(list.len() as f64)
                } else {
                    property
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| list.get(index))
                        .unwrap_or(Value::Null)
                }
            }
            None => Value::Null,
        },
        ValueKind::Opaque => {
            inner.update(volatile_tag());
            Value::Null
        }
        ValueKind::Scalar => {
            inner.update(constant_tag());
            Value::Null
        }
    }
}

type ChildCache = DashMap<String, Weak<PropertyReference>>;

fn cached_child(
    children: &ChildCache,
    clock: &Arc<RevisionClock>,
    parent: RefHandle<Value>,
    property: &str,
) -> Arc<PropertyReference> {
    let mut slot = children.entry(property.to_string()).or_default();
    if let Some(child) = slot.upgrade() {
        return child;
    }
    let child = PropertyReference::new(clock, parent, property);
    *slot = Arc::downgrade(&child);
    child
}

/// Root of a property path over a fixed value
pub struct RootReference {
    clock: Arc<RevisionClock>,
    value: Value,
    children: ChildCache,
}

impl RootReference {
    pub fn new(clock: &Arc<RevisionClock>, value: Value) -> Arc<Self> {
        Arc::new(RootReference {
            clock: clock.clone(),
            value,
            children: DashMap::new(),
        })
    }
}

impl Reference<Value> for RootReference {
    fn tag(&self) -> TagRef {
        constant_tag()
    }

    fn value(&self) -> Value {
        self.value.clone()
    }
}

impl std::fmt::Debug for RootReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootReference")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl PathReference for RootReference {
    fn get(self: &Arc<Self>, property: &str) -> Arc<PropertyReference> {
        cached_child(&self.children, &self.clock, self.clone(), property)
    }
}

/// Cached reference reading one property of its parent's value
pub struct PropertyReference {
    clock: Arc<RevisionClock>,
    property: String,
    cached: CachedReference<Value>,
    children: ChildCache,
}

impl PropertyReference {
    pub fn new(
        clock: &Arc<RevisionClock>,
        parent: RefHandle<Value>,
        property: &str,
    ) -> Arc<Self> {
        let inner = UpdatableTag::shared(clock);
        let tag = combine([parent.tag(), inner.clone() as TagRef]);
        let name = property.to_string();
        let cached = CachedReference::named("property", tag, move || {
            read_property(&parent.value(), &name, &inner)
        });

        Arc::new(PropertyReference {
            clock: clock.clone(),
            property: property.to_string(),
            cached,
            children: DashMap::new(),
        })
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    /// Snapshot recorded after the last computation
    pub fn last_revision(&self) -> Option<Revision> {
        self.cached.last_revision()
    }

    pub fn metrics(&self) -> &ComputeMetrics {
        self.cached.metrics()
    }
}

impl Reference<Value> for PropertyReference {
    fn tag(&self) -> TagRef {
        self.cached.tag()
    }

    fn value(&self) -> Value {
        self.cached.value()
    }
}

impl PathReference for PropertyReference {
    fn get(self: &Arc<Self>, property: &str) -> Arc<PropertyReference> {
        cached_child(&self.children, &self.clock, self.clone(), property)
    }
}

impl std::fmt::Debug for PropertyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyReference")
            .field("property", &self.property)
            .field("last_revision", &self.last_revision())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OpaqueValue, TrackedList, TrackedObject};
    use crate::tag::Tag;
    use serde_json::json;

    fn state(clock: &Arc<RevisionClock>) -> Value {
        Value::from_json(clock, &json!({"a": {"b": 1, "c": 2}}))
    }

    #[test]
    fn test_reads_nested_property() {
        let clock = RevisionClock::shared();
        let root = RootReference::new(&clock, state(&clock));

        let b = get_path(&root, "a.b").unwrap();
        assert_eq!(b.value(), Value::from(1i64));
        assert_eq!(b.property(), "b");
    }

    #[test]
    fn test_children_are_shared() {
        let clock = RevisionClock::shared();
        let root = RootReference::new(&clock, state(&clock));

        let a1 = root.get("a");
        let a2 = root.get("a");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(Arc::ptr_eq(&a1.get("b"), &a2.get("b")));
    }

    #[test]
    fn test_dropping_the_last_handle_frees_the_chain() {
        let clock = RevisionClock::shared();
        let root = RootReference::new(&clock, state(&clock));
        let b = get_path(&root, "a.b").unwrap();
        assert_eq!(b.value(), Value::from(1i64));

        let weak_root = Arc::downgrade(&root);
        let weak_a = Arc::downgrade(&root.get("a"));
        let weak_b = Arc::downgrade(&b);
        drop(root);
        assert!(weak_root.upgrade().is_some());

        drop(b);
        assert!(weak_b.upgrade().is_none());
        assert!(weak_a.upgrade().is_none());
        assert!(weak_root.upgrade().is_none());
    }

    #[test]
    fn test_dropped_child_is_recreated() {
        let clock = RevisionClock::shared();
        let root = RootReference::new(&clock, state(&clock));
        let first = root.get("a");
        first.value();
        let weak = Arc::downgrade(&first);
        drop(first);

        let second = root.get("a");
        assert!(weak.upgrade().is_none());
        assert_eq!(second.metrics().executions(), 0);
        assert_eq!(second.value().kind(), ValueKind::KeyedMap);
    }

    #[test]
    fn test_property_isolation() {
        let clock = RevisionClock::shared();
        let value = state(&clock);
        let root = RootReference::new(&clock, value.clone());
        let b = get_path(&root, "a.b").unwrap();
        let c = get_path(&root, "a.c").unwrap();
        b.value();
        c.value();
        let c_snapshot = c.last_revision();

        let a = value.as_object().unwrap().get("a");
        a.as_object().unwrap().set("b", Value::from(10i64));

        assert!(!b.tag().validate(b.last_revision().unwrap()));
        assert!(c.tag().validate(c_snapshot.unwrap()));
        assert_eq!(b.value(), Value::from(10i64));
        assert_eq!(c.value(), Value::from(2i64));
        assert_eq!(c.last_revision(), c_snapshot);
        assert_eq!(c.metrics().executions(), 1);
        assert_eq!(b.metrics().executions(), 2);
    }

    #[test]
    fn test_deep_change_does_not_recompute_intermediate() {
        let clock = RevisionClock::shared();
        let value = Value::from_json(&clock, &json!({"a": {"b": {"c": 1}}}));
        let root = RootReference::new(&clock, value.clone());
        let ab = get_path(&root, "a.b").unwrap();
        let abc = ab.get("c");
        abc.value();

        let b = get_path(&root, "a.b").unwrap().value();
        b.as_object().unwrap().set("c", Value::from(2i64));

        assert_eq!(abc.value(), Value::from(2i64));
        assert_eq!(ab.metrics().executions(), 1);
    }

    #[test]
    fn test_replacing_intermediate_object() {
        let clock = RevisionClock::shared();
        let value = state(&clock);
        let root = RootReference::new(&clock, value.clone());
        let b = get_path(&root, "a.b").unwrap();
        assert_eq!(b.value(), Value::from(1i64));

        let replacement = TrackedObject::new(&clock);
        replacement.set("b", Value::from(99i64));
        value.as_object().unwrap().set("a", Value::Object(replacement));

        assert_eq!(b.value(), Value::from(99i64));
    }

    #[test]
    fn test_list_length_and_index() {
        let clock = RevisionClock::shared();
        let list = TrackedList::new(&clock, vec![Value::str("x")]);
        let obj = TrackedObject::new(&clock);
        obj.set("items", Value::List(list.clone()));
        let root = RootReference::new(&clock, Value::Object(obj));

        let length = get_path(&root, "items.length").unwrap();
        let first = get_path(&root, "items.0").unwrap();
        assert_eq!(length.value(), Value::from(1i64));
        assert_eq!(first.value(), Value::str("x"));

        list.insert(0, Value::str("y"));
        assert_eq!(length.value(), Value::from(2i64));
        assert_eq!(first.value(), Value::str("y"));
    }

    #[test]
    fn test_null_and_opaque_reads() {
        let clock = RevisionClock::shared();
        let obj = TrackedObject::new(&clock);
        obj.set("handle", Value::Opaque(OpaqueValue::new("ext")));
        let root = RootReference::new(&clock, Value::Object(obj));

        let missing = get_path(&root, "nothing.here").unwrap();
        assert!(missing.value().is_null());

        let through_opaque = get_path(&root, "handle.x").unwrap();
        assert!(through_opaque.value().is_null());
        through_opaque.value();
        assert_eq!(through_opaque.metrics().executions(), 2);
    }

    #[test]
    fn test_empty_path() {
        let clock = RevisionClock::shared();
        let root = RootReference::new(&clock, Value::Null);
        assert!(get_path(&root, "").is_none());
    }
}
