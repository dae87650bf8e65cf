//! Keyed iteration
//!
//! A list block renders one downstream item per element of a source value.
//! Each pass projects the source into keyed [`IterationItem`]s and the
//! [`KeyedList`] matches them against the previous pass by key:
//!
//! ```text
//! source ──project──▶ [IterationItem{key, value, memo}] ──sync──▶ KeyedList
//!                                                         ├─ Retain/Move (same state)
//!                                                         ├─ Insert      (create)
//!                                                         └─ Remove      (destroy)
//! ```
//!
//! Matching uses a key map, so a pass is linear in the number of items.

use crate::error::{RenderError, Result};
use crate::scheduler::RenderContext;
use hashbrown::{HashMap, HashSet};
use lumen_reactive::{
    combine, constant_tag, volatile_tag, CachedReference, ComputeMetrics, RefHandle, Reference,
    Revision, RevisionClock, TagRef, UpdatableTag, Value, ValueKind, WritableReference,
};
use lumen_types::ItemKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Separator between a duplicated key and its occurrence counter
pub const DUPLICATE_KEY_SEPARATOR: char = '\u{0}';

/// How keys are extracted from elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyMode {
    /// `@index`: the element's position
    Index,
    /// `@identity`: scalars by value, references by identity
    Identity,
    /// Dotted property path evaluated per element
    Path(String),
}

impl FromStr for KeyMode {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "@index" => Ok(KeyMode::Index),
            "@identity" => Ok(KeyMode::Identity),
            "" => Err(RenderError::InvalidKeyMode(s.to_string())),
            path if path.starts_with('@') => Err(RenderError::InvalidKeyMode(s.to_string())),
            path => Ok(KeyMode::Path(path.to_string())),
        }
    }
}

impl TryFrom<String> for KeyMode {
    type Error = RenderError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<KeyMode> for String {
    fn from(mode: KeyMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Index => f.write_str("@index"),
            KeyMode::Identity => f.write_str("@identity"),
            KeyMode::Path(path) => f.write_str(path),
        }
    }
}

/// Position information handed to an item alongside its value
#[derive(Debug, Clone, PartialEq)]
pub enum Memo {
    /// Index in a sequence
    Index(usize),
    /// Property name in a keyed map
    Key(String),
}

impl Memo {
    pub fn to_value(&self) -> Value {
        match self {
            Memo::Index(index) => Value::Number(*index as f64),
            Memo::Key(key) => Value::str(key),
        }
    }

    /// Argument name the memo is exposed under
    pub fn arg_name(&self) -> &'static str {
        match self {
            Memo::Index(_) => "index",
            Memo::Key(_) => "key",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterationItem {
    pub key: ItemKey,
    pub value: Value,
    pub memo: Memo,
}

/// Makes keys unique within one pass
///
/// The second and later occurrences of a key get `\0{n}` appended, counting
/// left to right from 1. The same input order always yields the same keys.
#[derive(Debug, Default)]
pub struct KeyDeduper {
    occurrences: HashMap<String, usize>,
    emitted: HashSet<String>,
}

impl KeyDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique(&mut self, raw: String) -> ItemKey {
        let mut n = self.occurrences.get(&raw).copied().unwrap_or(0);
        loop {
            let candidate = if n == 0 {
                raw.clone()
            } else {
                format!("{raw}{DUPLICATE_KEY_SEPARATOR}{n}")
            };
            n += 1;
            if self.emitted.insert(candidate.clone()) {
                if n > 1 {
                    trace!(key = %raw, occurrence = n - 1, "disambiguated duplicate key");
                }
                self.occurrences.insert(raw, n);
                return ItemKey::new(candidate);
            }
        }
    }
}

/// Unique keys for `raw` in order
pub fn unique_keys<I>(raw: I) -> Vec<ItemKey>
where
    I: IntoIterator<Item = String>,
{
    let mut deduper = KeyDeduper::new();
    raw.into_iter().map(|key| deduper.unique(key)).collect()
}

/// Read `path` from `value`, collecting the tags of every step
fn read_key_path(value: &Value, path: &str, tags: &mut Vec<TagRef>) -> Value {
    let mut current = value.clone();
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current.kind() {
            ValueKind::KeyedMap => match current.as_object() {
                Some(object) => {
                    tags.push(object.property_tag(segment));
                    object.get(segment)
                }
                None => Value::Null,
            },
            ValueKind::Sequence => match current.as_list() {
                Some(list) => {
                    tags.push(list.tag());
                    match segment {
                        "length" => Value::Number(list.len() as f64),
                        index => index
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| list.get(i))
                            .unwrap_or(Value::Null),
                    }
                }
                None => Value::Null,
            },
            ValueKind::Opaque => {
                tags.push(volatile_tag());
                Value::Null
            }
            ValueKind::Scalar => Value::Null,
        };
    }
    current
}

fn raw_key(mode: &KeyMode, position: usize, memo: &Memo, value: &Value, tags: &mut Vec<TagRef>) -> String {
    match mode {
        KeyMode::Index => position.to_string(),
        KeyMode::Identity => match memo {
            Memo::Key(name) => name.clone(),
            Memo::Index(_) => value.key_string(),
        },
        KeyMode::Path(path) => read_key_path(value, path, tags).key_string(),
    }
}

/// Project `source` into keyed items, installing its structure tag
pub fn project(source: &Value, mode: &KeyMode, structure: &UpdatableTag) -> Vec<IterationItem> {
    let mut tags = Vec::new();
    let entries: Vec<(Memo, Value)> = match source.kind() {
        ValueKind::Sequence => match source.as_list() {
            Some(list) => {
                tags.push(list.tag());
                list.snapshot()
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| (Memo::Index(i), value))
                    .collect()
            }
            None => Vec::new(),
        },
        ValueKind::KeyedMap => match source.as_object() {
            Some(object) => {
                tags.push(object.shape_tag());
                object
                    .entries()
                    .into_iter()
                    .map(|(name, value)| (Memo::Key(name), value))
                    .collect()
            }
            None => Vec::new(),
        },
        ValueKind::Opaque => {
            tags.push(volatile_tag());
            Vec::new()
        }
        ValueKind::Scalar => Vec::new(),
    };

    let mut deduper = KeyDeduper::new();
    let items = entries
        .into_iter()
        .enumerate()
        .map(|(position, (memo, value))| {
            let raw = raw_key(mode, position, &memo, &value, &mut tags);
            IterationItem {
                key: deduper.unique(raw),
                value,
                memo,
            }
        })
        .collect();

    structure.update(if tags.is_empty() {
        constant_tag()
    } else {
        combine(tags)
    });
    items
}

/// Reference producing the keyed items of a source value
///
/// Its tag is `combine([source.tag, structure])`, where `structure` only
/// follows what defines the item set: list membership, map shape and key
/// properties. Element contents changing does not invalidate it.
pub struct IterableReference {
    mode: KeyMode,
    structure: Arc<UpdatableTag>,
    cached: CachedReference<Vec<IterationItem>>,
}

impl IterableReference {
    pub fn new(clock: &Arc<RevisionClock>, source: RefHandle<Value>, mode: KeyMode) -> Self {
        let structure = UpdatableTag::shared(clock);
        let tag = combine([source.tag(), structure.clone() as TagRef]);
        let inner = structure.clone();
        let key_mode = mode.clone();
        let cached = CachedReference::named("iterable", tag, move || {
            project(&source.value(), &key_mode, &inner)
        });
        Self {
            mode,
            structure,
            cached,
        }
    }

    pub fn mode(&self) -> &KeyMode {
        &self.mode
    }

    pub fn structure_tag(&self) -> TagRef {
        self.structure.clone()
    }

    pub fn last_revision(&self) -> Option<Revision> {
        self.cached.last_revision()
    }

    pub fn metrics(&self) -> &ComputeMetrics {
        self.cached.metrics()
    }
}

impl Reference<Vec<IterationItem>> for IterableReference {
    fn tag(&self) -> TagRef {
        self.cached.tag()
    }

    fn value(&self) -> Vec<IterationItem> {
        self.cached.value()
    }
}

impl fmt::Debug for IterableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterableReference")
            .field("mode", &self.mode)
            .field("last_revision", &self.last_revision())
            .finish_non_exhaustive()
    }
}

/// References a downstream item reads its value and memo through
///
/// They outlive reorders; a retained item sees new values as writes.
#[derive(Debug, Clone)]
pub struct ItemRefs {
    key: ItemKey,
    value: Arc<WritableReference<Value>>,
    memo: Arc<WritableReference<Value>>,
    memo_name: &'static str,
}

impl ItemRefs {
    fn new(clock: &Arc<RevisionClock>, item: IterationItem) -> Self {
        Self {
            key: item.key,
            value: Arc::new(WritableReference::new(clock, item.value)),
            memo: Arc::new(WritableReference::new(clock, item.memo.to_value())),
            memo_name: item.memo.arg_name(),
        }
    }

    fn assign(&self, value: Value, memo: &Memo) {
        self.value.update(value);
        self.memo.update(memo.to_value());
    }

    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn value(&self) -> Value {
        self.value.value()
    }

    pub fn memo(&self) -> Value {
        self.memo.value()
    }

    pub fn value_ref(&self) -> RefHandle<Value> {
        self.value.clone()
    }

    pub fn memo_ref(&self) -> RefHandle<Value> {
        self.memo.clone()
    }

    /// `index` for sequences, `key` for maps
    pub fn memo_name(&self) -> &'static str {
        self.memo_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiffOp {
    Insert { key: ItemKey, at: usize },
    Retain { key: ItemKey, at: usize },
    Move { key: ItemKey, from: usize, to: usize },
    Remove { key: ItemKey, from: usize },
}

/// Operations applied by one [`KeyedList::sync`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub ops: Vec<DiffOp>,
}

impl DiffSummary {
    fn count(&self, f: impl Fn(&DiffOp) -> bool) -> usize {
        self.ops.iter().filter(|op| f(op)).count()
    }

    pub fn inserted(&self) -> usize {
        self.count(|op| matches!(op, DiffOp::Insert { .. }))
    }

    pub fn retained(&self) -> usize {
        self.count(|op| matches!(op, DiffOp::Retain { .. }))
    }

    pub fn moved(&self) -> usize {
        self.count(|op| matches!(op, DiffOp::Move { .. }))
    }

    pub fn removed(&self) -> usize {
        self.count(|op| matches!(op, DiffOp::Remove { .. }))
    }

    /// Nothing created, moved or destroyed
    pub fn is_stable(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, DiffOp::Retain { .. }))
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} ={} ~{} -{}",
            self.inserted(),
            self.retained(),
            self.moved(),
            self.removed()
        )
    }
}

/// Creates, updates and destroys what a list block renders
pub trait BlockDelegate {
    type Item;
    type Fallback;

    fn create_item(&mut self, ctx: &mut RenderContext, refs: &ItemRefs) -> Result<Self::Item>;

    fn update_item(
        &mut self,
        ctx: &mut RenderContext,
        refs: &ItemRefs,
        item: &mut Self::Item,
    ) -> Result<()>;

    fn destroy_item(&mut self, item: Self::Item) -> Result<()>;

    /// Block shown for an empty source; `None` renders nothing
    fn create_fallback(&mut self, _ctx: &mut RenderContext) -> Result<Option<Self::Fallback>> {
        Ok(None)
    }

    fn update_fallback(
        &mut self,
        _ctx: &mut RenderContext,
        _fallback: &mut Self::Fallback,
    ) -> Result<()> {
        Ok(())
    }

    fn destroy_fallback(&mut self, _fallback: Self::Fallback) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct Slot<S> {
    refs: ItemRefs,
    state: S,
}

/// Keyed items from the previous pass with their downstream state
#[derive(Debug)]
pub struct KeyedList<S> {
    slots: Vec<Slot<S>>,
}

impl<S> Default for KeyedList<S> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<S> KeyedList<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn keys(&self) -> Vec<ItemKey> {
        self.slots.iter().map(|s| s.refs.key.clone()).collect()
    }

    pub fn get(&self, key: &ItemKey) -> Option<(&ItemRefs, &S)> {
        self.slots
            .iter()
            .find(|s| &s.refs.key == key)
            .map(|s| (&s.refs, &s.state))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemRefs, &S)> {
        self.slots.iter().map(|s| (&s.refs, &s.state))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ItemRefs, &mut S)> {
        self.slots.iter_mut().map(|s| (&s.refs, &mut s.state))
    }

    /// Match `items` against the previous pass
    ///
    /// Unmatched previous items are destroyed before any new item is
    /// created. If a creation fails, the list keeps every item that still
    /// exists so the next pass can finish the job.
    pub fn sync<D>(
        &mut self,
        items: Vec<IterationItem>,
        ctx: &mut RenderContext,
        delegate: &mut D,
    ) -> Result<DiffSummary>
    where
        D: BlockDelegate<Item = S>,
    {
        let incoming: HashSet<ItemKey> = items.iter().map(|item| item.key.clone()).collect();
        let mut summary = DiffSummary::default();
        let mut failure: Option<RenderError> = None;

        let mut previous: HashMap<ItemKey, (usize, Slot<S>)> = HashMap::with_capacity(self.slots.len());
        for (from, slot) in std::mem::take(&mut self.slots).into_iter().enumerate() {
            if incoming.contains(&slot.refs.key) {
                previous.insert(slot.refs.key.clone(), (from, slot));
                continue;
            }
            summary.ops.push(DiffOp::Remove {
                key: slot.refs.key.clone(),
                from,
            });
            if let Err(err) = delegate.destroy_item(slot.state) {
                failure.get_or_insert(err);
            }
        }

        let mut next = Vec::with_capacity(items.len());
        let mut furthest = 0;
        for (at, item) in items.into_iter().enumerate() {
            if failure.is_some() {
                break;
            }
            match previous.remove(&item.key) {
                Some((from, slot)) => {
                    slot.refs.assign(item.value, &item.memo);
                    let key = slot.refs.key.clone();
                    if from < furthest {
                        summary.ops.push(DiffOp::Move { key, from, to: at });
                    } else {
                        furthest = from;
                        summary.ops.push(DiffOp::Retain { key, at });
                    }
                    next.push(slot);
                }
                None => {
                    let refs = ItemRefs::new(ctx.clock(), item);
                    match delegate.create_item(ctx, &refs) {
                        Ok(state) => {
                            summary.ops.push(DiffOp::Insert {
                                key: refs.key.clone(),
                                at,
                            });
                            next.push(Slot { refs, state });
                        }
                        Err(err) => failure = Some(err),
                    }
                }
            }
        }

        if !previous.is_empty() {
            let mut leftover: Vec<(usize, Slot<S>)> = previous.into_values().collect();
            leftover.sort_by_key(|(from, _)| *from);
            next.extend(leftover.into_iter().map(|(_, slot)| slot));
        }
        self.slots = next;

        match failure {
            Some(err) => Err(err),
            None => {
                trace!(diff = %summary, "synced keyed list");
                Ok(summary)
            }
        }
    }

    /// Destroy every item; returns the first error
    pub fn clear<D>(&mut self, delegate: &mut D) -> Result<()>
    where
        D: BlockDelegate<Item = S>,
    {
        let mut first_error = None;
        for slot in self.slots.drain(..) {
            if let Err(err) = delegate.destroy_item(slot.state) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Rendered iteration with an optional empty fallback
///
/// Switching between empty and populated always creates fresh items or a
/// fresh fallback; a fallback survives consecutive empty passes.
pub struct ListBlock<D: BlockDelegate> {
    iterable: IterableReference,
    list: KeyedList<D::Item>,
    fallback: Option<D::Fallback>,
    delegate: D,
    last_revision: Option<Revision>,
}

impl<D: BlockDelegate> ListBlock<D> {
    pub fn new(iterable: IterableReference, delegate: D) -> Self {
        Self {
            iterable,
            list: KeyedList::new(),
            fallback: None,
            delegate,
            last_revision: None,
        }
    }

    pub fn iterable(&self) -> &IterableReference {
        &self.iterable
    }

    pub fn list(&self) -> &KeyedList<D::Item> {
        &self.list
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn fallback(&self) -> Option<&D::Fallback> {
        self.fallback.as_ref()
    }

    pub fn is_showing_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn keys(&self) -> Vec<ItemKey> {
        self.list.keys()
    }

    /// Bring the block up to date
    ///
    /// Re-diffs only when the iterable's tag moved, then revalidates every
    /// live item. Returns the diff when one ran.
    pub fn revalidate(&mut self, ctx: &mut RenderContext) -> Result<Option<DiffSummary>> {
        let fresh = self
            .last_revision
            .map(|revision| self.iterable.tag().validate(revision))
            .unwrap_or(false);

        let summary = if fresh {
            None
        } else {
            let items = self.iterable.value();
            let revision = self.iterable.last_revision();
            let summary = self.reconcile(items, ctx)?;
            self.last_revision = revision;
            debug!(diff = %summary, fallback = self.is_showing_fallback(), "list block re-diffed");
            Some(summary)
        };

        for (refs, item) in self.list.iter_mut() {
            self.delegate.update_item(ctx, refs, item)?;
        }
        if let Some(fallback) = self.fallback.as_mut() {
            self.delegate.update_fallback(ctx, fallback)?;
        }
        Ok(summary)
    }

    fn reconcile(&mut self, items: Vec<IterationItem>, ctx: &mut RenderContext) -> Result<DiffSummary> {
        if items.is_empty() {
            let summary = self.list.sync(items, ctx, &mut self.delegate)?;
            if self.fallback.is_none() {
                self.fallback = self.delegate.create_fallback(ctx)?;
            }
            return Ok(summary);
        }

        if let Some(fallback) = self.fallback.take() {
            self.delegate.destroy_fallback(fallback)?;
        }
        self.list.sync(items, ctx, &mut self.delegate)
    }

    /// Destroy every item and the fallback
    pub fn teardown(&mut self) -> Result<()> {
        let result = self.list.clear(&mut self.delegate);
        if let Some(fallback) = self.fallback.take() {
            self.delegate.destroy_fallback(fallback)?;
        }
        self.last_revision = None;
        result
    }
}

impl<D: BlockDelegate> fmt::Debug for ListBlock<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListBlock")
            .field("iterable", &self.iterable)
            .field("items", &self.list.len())
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}
