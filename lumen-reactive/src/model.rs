//! Tracked application state
//!
//! Values flowing through references are classified once into a
//! [`ValueKind`], and every tag-tracking decision dispatches on that
//! classification. Objects and lists carry their own tags: an object has one
//! tag per property plus a shape tag, a list has one structure tag that only
//! changes when its length or the value at some index changes.

use crate::revision::RevisionClock;
use crate::tag::{DirtyableTag, TagRef};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

fn next_identity() -> u64 {
    NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed)
}

/// Classification of a value for dependency tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Null, booleans, numbers and strings
    Scalar,
    /// A tracked list
    Sequence,
    /// A tracked object
    KeyedMap,
    /// An external handle whose reads cannot be tracked
    Opaque,
}

/// Dynamic value
///
/// Scalars compare by value; lists, objects and opaque handles compare by
/// identity.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    List(TrackedList),
    Object(TrackedObject),
    Opaque(OpaqueValue),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::Str(_) => ValueKind::Scalar,
            Value::List(_) => ValueKind::Sequence,
            Value::Object(_) => ValueKind::KeyedMap,
            Value::Opaque(_) => ValueKind::Opaque,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&TrackedObject> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&TrackedList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Identity of reference-like values
    pub fn identity(&self) -> Option<u64> {
        match self {
            Value::List(l) => Some(l.id()),
            Value::Object(o) => Some(o.id()),
            Value::Opaque(o) => Some(o.id()),
            _ => None,
        }
    }

    /// String used when this value serves as an iteration key
    ///
    /// Scalars key by their rendered value, everything else by identity.
    pub fn key_string(&self) -> String {
        match self.identity() {
            Some(id) => format!("#{id}"),
            None => self.to_string(),
        }
    }

    /// Build a tracked value from JSON
    pub fn from_json(clock: &Arc<RevisionClock>, json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::str(s),
            serde_json::Value::Array(items) => Value::List(TrackedList::new(
                clock,
                items.iter().map(|item| Value::from_json(clock, item)).collect(),
            )),
            serde_json::Value::Object(map) => Value::Object(TrackedObject::with_fields(
                clock,
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(clock, v))),
            )),
        }
    }

    /// Plain JSON view of the current state
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Opaque(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::List(l) => serde_json::Value::Array(l.snapshot().iter().map(Value::to_json).collect()),
            Value::Object(o) => serde_json::Value::Object(
                o.entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::List(l) => write!(f, "[list #{}]", l.id()),
            Value::Object(o) => write!(f, "[object #{}]", o.id()),
            Value::Opaque(o) => write!(f, "[opaque #{}]", o.id()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Object whose property reads and writes are tracked
#[derive(Clone)]
pub struct TrackedObject(Arc<ObjectInner>);

struct ObjectInner {
    id: u64,
    clock: Arc<RevisionClock>,
    fields: RwLock<BTreeMap<String, Value>>,
    property_tags: DashMap<String, Arc<DirtyableTag>>,
    shape: Arc<DirtyableTag>,
}

impl TrackedObject {
    pub fn new(clock: &Arc<RevisionClock>) -> Self {
        Self::with_fields(clock, std::iter::empty())
    }

    pub fn with_fields<I>(clock: &Arc<RevisionClock>, fields: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        TrackedObject(Arc::new(ObjectInner {
            id: next_identity(),
            clock: clock.clone(),
            fields: RwLock::new(fields.into_iter().collect()),
            property_tags: DashMap::new(),
            shape: DirtyableTag::shared(clock),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &TrackedObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Read a property; missing properties read as [`Value::Null`]
    pub fn get(&self, property: &str) -> Value {
        self.0
            .fields
            .read()
            .get(property)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn contains(&self, property: &str) -> bool {
        self.0.fields.read().contains_key(property)
    }

    /// Write a property; returns whether anything was dirtied
    pub fn set(&self, property: &str, value: Value) -> bool {
        {
            let mut fields = self.0.fields.write();
            if fields.get(property) == Some(&value) {
                return false;
            }
            fields.insert(property.to_string(), value);
        }
        self.dirty_property(property);
        true
    }

    /// Remove a property; returns whether it existed
    pub fn remove(&self, property: &str) -> bool {
        let removed = self.0.fields.write().remove(property).is_some();
        if removed {
            self.dirty_property(property);
        }
        removed
    }

    fn dirty_property(&self, property: &str) {
        let revision = self.0.clock.bump();
        if let Some(tag) = self.0.property_tags.get(property) {
            tag.record(revision);
        }
        self.0.shape.record(revision);
        tracing::trace!(object = self.0.id, property, %revision, "property dirtied");
    }

    /// Tag tracking one property
    pub fn property_tag(&self, property: &str) -> TagRef {
        self.0
            .property_tags
            .entry(property.to_string())
            .or_insert_with(|| DirtyableTag::shared(&self.0.clock))
            .value()
            .clone()
    }

    /// Tag dirtied by any write to this object
    pub fn shape_tag(&self) -> TagRef {
        self.0.shape.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.fields.read().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .fields
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clock(&self) -> &Arc<RevisionClock> {
        &self.0.clock
    }
}

impl fmt::Debug for TrackedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedObject")
            .field("id", &self.0.id)
            .field("keys", &self.keys())
            .finish()
    }
}

/// List whose structure is tracked
///
/// Only operations that change the length or which value occupies an index
/// dirty the structure tag. Mutating an element object in place does not.
#[derive(Clone)]
pub struct TrackedList(Arc<ListInner>);

struct ListInner {
    id: u64,
    items: RwLock<Vec<Value>>,
    tag: Arc<DirtyableTag>,
}

impl TrackedList {
    pub fn new(clock: &Arc<RevisionClock>, items: Vec<Value>) -> Self {
        TrackedList(Arc::new(ListInner {
            id: next_identity(),
            items: RwLock::new(items),
            tag: DirtyableTag::shared(clock),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &TrackedList) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Structure tag
    pub fn tag(&self) -> TagRef {
        self.0.tag.clone()
    }

    pub fn len(&self) -> usize {
        self.0.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.read().get(index).cloned()
    }

    /// Copy of the current elements
    pub fn snapshot(&self) -> Vec<Value> {
        self.0.items.read().clone()
    }

    fn dirty(&self) {
        let revision = self.0.tag.dirty();
        tracing::trace!(list = self.0.id, %revision, "list structure dirtied");
    }

    pub fn push(&self, value: Value) {
        self.0.items.write().push(value);
        self.dirty();
    }

    pub fn pop(&self) -> Option<Value> {
        let popped = self.0.items.write().pop();
        if popped.is_some() {
            self.dirty();
        }
        popped
    }

    /// Insert at `index`; `None` when `index > len`
    pub fn insert(&self, index: usize, value: Value) -> Option<()> {
        {
            let mut items = self.0.items.write();
            if index > items.len() {
                return None;
            }
            items.insert(index, value);
        }
        self.dirty();
        Some(())
    }

    /// Remove at `index`; `None` when out of bounds
    pub fn remove(&self, index: usize) -> Option<Value> {
        let removed = {
            let mut items = self.0.items.write();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.dirty();
        Some(removed)
    }

    /// Replace the value at `index`; `Some(changed)` or `None` when out of bounds
    pub fn set(&self, index: usize, value: Value) -> Option<bool> {
        {
            let mut items = self.0.items.write();
            let slot = items.get_mut(index)?;
            if *slot == value {
                return Some(false);
            }
            *slot = value;
        }
        self.dirty();
        Some(true)
    }

    /// Swap two elements; `Some(changed)` or `None` when out of bounds
    pub fn swap(&self, a: usize, b: usize) -> Option<bool> {
        {
            let mut items = self.0.items.write();
            if a >= items.len() || b >= items.len() {
                return None;
            }
            if a == b || items[a] == items[b] {
                return Some(false);
            }
            items.swap(a, b);
        }
        self.dirty();
        Some(true)
    }

    /// Reverse in place; returns whether the order changed
    pub fn reverse(&self) -> bool {
        {
            let mut items = self.0.items.write();
            if items.len() < 2 {
                return false;
            }
            items.reverse();
        }
        self.dirty();
        true
    }

    /// Replace every element; returns whether anything changed
    pub fn replace(&self, values: Vec<Value>) -> bool {
        {
            let mut items = self.0.items.write();
            if *items == values {
                return false;
            }
            *items = values;
        }
        self.dirty();
        true
    }
}

impl fmt::Debug for TrackedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedList")
            .field("id", &self.0.id)
            .field("len", &self.len())
            .finish()
    }
}

/// Handle to an external value that cannot be observed
#[derive(Clone)]
pub struct OpaqueValue {
    id: u64,
    inner: Arc<dyn Any + Send + Sync>,
}

impl OpaqueValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        OpaqueValue {
            id: next_identity(),
            inner: Arc::new(value),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueValue(#{})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Tag;
    use serde_json::json;

    #[test]
    fn test_classification() {
        let clock = RevisionClock::shared();
        assert_eq!(Value::Null.kind(), ValueKind::Scalar);
        assert_eq!(Value::from(3i64).kind(), ValueKind::Scalar);
        assert_eq!(Value::List(TrackedList::new(&clock, vec![])).kind(), ValueKind::Sequence);
        assert_eq!(Value::Object(TrackedObject::new(&clock)).kind(), ValueKind::KeyedMap);
        assert_eq!(Value::Opaque(OpaqueValue::new(5u8)).kind(), ValueKind::Opaque);
    }

    #[test]
    fn test_identity_equality() {
        let clock = RevisionClock::shared();
        let a = TrackedObject::new(&clock);
        let b = TrackedObject::new(&clock);

        assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
        assert_ne!(Value::Object(a), Value::Object(b));
        assert_eq!(Value::str("x"), Value::str("x"));
    }

    #[test]
    fn test_set_dirties_only_that_property() {
        let clock = RevisionClock::shared();
        let obj = TrackedObject::new(&clock);
        obj.set("b", Value::from(1i64));
        obj.set("c", Value::from(2i64));

        let b_tag = obj.property_tag("b");
        let c_tag = obj.property_tag("c");
        let (b_snap, c_snap) = (b_tag.value(), c_tag.value());

        let before = clock.value();
        assert!(obj.set("b", Value::from(3i64)));
        assert_eq!(clock.value(), before.next());
        assert!(!b_tag.validate(b_snap));
        assert!(c_tag.validate(c_snap));
    }

    #[test]
    fn test_equal_write_is_noop() {
        let clock = RevisionClock::shared();
        let obj = TrackedObject::new(&clock);
        obj.set("name", Value::str("A"));
        let before = clock.value();

        assert!(!obj.set("name", Value::str("A")));
        assert_eq!(clock.value(), before);
    }

    #[test]
    fn test_list_structure_tag_ignores_element_contents() {
        let clock = RevisionClock::shared();
        let item = TrackedObject::new(&clock);
        let list = TrackedList::new(&clock, vec![Value::Object(item.clone())]);
        let snapshot = list.tag().value();

        item.set("name", Value::str("changed"));
        assert!(list.tag().validate(snapshot));

        list.push(Value::Null);
        assert!(!list.tag().validate(snapshot));
    }

    #[test]
    fn test_list_operations() {
        let clock = RevisionClock::shared();
        let list = TrackedList::new(&clock, vec![Value::from(1i64), Value::from(2i64)]);

        assert_eq!(list.swap(0, 1), Some(true));
        assert_eq!(list.get(0), Some(Value::from(2i64)));
        assert_eq!(list.insert(5, Value::Null), None);
        assert_eq!(list.remove(9), None);
        assert_eq!(list.set(0, Value::from(2i64)), Some(false));
        assert!(list.reverse());
        assert_eq!(list.pop(), Some(Value::from(2i64)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_json_round_trip_shape() {
        let clock = RevisionClock::shared();
        let source = json!({"todos": [{"id": 1, "title": "A"}], "done": false});
        let value = Value::from_json(&clock, &source);

        let todos = value.as_object().unwrap().get("todos");
        assert_eq!(todos.kind(), ValueKind::Sequence);
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn test_key_string() {
        let clock = RevisionClock::shared();
        let obj = TrackedObject::new(&clock);

        assert_eq!(Value::from(2i64).key_string(), "2");
        assert_eq!(Value::from(2.5).key_string(), "2.5");
        assert_eq!(Value::str("k").key_string(), "k");
        assert_eq!(Value::Object(obj.clone()).key_string(), format!("#{}", obj.id()));
    }
}
