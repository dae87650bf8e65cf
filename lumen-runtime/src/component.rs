//! Component instances and their managers
//!
//! A [`ComponentManager`] implements the lifecycle hooks; a
//! [`ComponentInstance`] drives one rendered component through them:
//!
//! ```text
//! Uninitialized ─create─▶ Created ─did_insert─▶ HasElement ─▶ InDom
//!                                                              │ ▲
//!                                                   revalidate ▼ │
//!                                                            Updating
//! any ─destroy─▶ Destroying ─▶ Destroyed
//! ```
//!
//! An instance re-renders when `combine([self tag, args tag, layout tag])`
//! no longer validates against the revision it last rendered at.

use crate::bounds::{fresh_node, Bounds, SimpleBounds};
use crate::error::{RenderError, Result};
use crate::iteration::{BlockDelegate, ItemRefs};
use crate::scheduler::RenderContext;
use hashbrown::HashMap;
use lumen_reactive::{
    combine, constant_tag, DirtyableTag, RefHandle, Revision, TagRef, Value,
};
use lumen_types::ComponentId;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

static NEXT_COMPONENT: AtomicU64 = AtomicU64::new(1);

/// State bucket a manager keeps for one instance
pub type ComponentState = Box<dyn Any + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LifecycleState {
    Uninitialized,
    Created,
    HasElement,
    InDom,
    Updating,
    Destroying,
    Destroyed,
}

impl LifecycleState {
    pub fn can_transition(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, to),
            (Uninitialized, Created)
                | (Created, HasElement)
                | (HasElement, InDom)
                | (InDom, Updating)
                | (Updating, InDom)
                | (Destroying, Destroyed)
        ) || (to == Destroying && !matches!(self, Destroying | Destroyed))
    }

    pub fn is_live(self) -> bool {
        matches!(self, LifecycleState::InDom | LifecycleState::Updating)
    }
}

/// Operations a manager declares it implements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerCapabilities {
    pub create_instance: bool,
    pub layout: bool,
    pub destructor: bool,
    pub update_hook: bool,
    pub element_hooks: bool,
}

impl ManagerCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// `create`, `layout` and `destructor`
    pub fn required() -> Self {
        Self::new()
            .with_create_instance()
            .with_layout()
            .with_destructor()
    }

    pub fn with_create_instance(mut self) -> Self {
        self.create_instance = true;
        self
    }

    pub fn with_layout(mut self) -> Self {
        self.layout = true;
        self
    }

    pub fn with_destructor(mut self) -> Self {
        self.destructor = true;
        self
    }

    pub fn with_update_hook(mut self) -> Self {
        self.update_hook = true;
        self
    }

    pub fn with_element_hooks(mut self) -> Self {
        self.element_hooks = true;
        self
    }

    pub fn missing_required(&self) -> Vec<&'static str> {
        [
            (self.create_instance, "create"),
            (self.layout, "layout"),
            (self.destructor, "destructor"),
        ]
        .into_iter()
        .filter(|(present, _)| !present)
        .map(|(_, name)| name)
        .collect()
    }
}

/// Lifecycle hooks of a component kind
pub trait ComponentManager: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> ManagerCapabilities;

    fn create(&self, args: &CapturedArgs, ctx: &mut RenderContext) -> anyhow::Result<ComponentState>;

    /// Render (or re-render) the nested layout
    fn layout(
        &self,
        state: &mut ComponentState,
        args: &CapturedArgs,
        ctx: &mut RenderContext,
    ) -> anyhow::Result<()>;

    /// Tag of whatever the layout reads beyond its arguments
    fn layout_tag(&self, _state: &ComponentState) -> TagRef {
        constant_tag()
    }

    /// Re-sync argument-derived properties; called when the args changed
    fn update(&self, _state: &mut ComponentState, _args: &CapturedArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn did_create_element(&self, _state: &mut ComponentState, _bounds: &dyn Bounds) -> anyhow::Result<()> {
        Ok(())
    }

    fn did_insert(&self, _state: &mut ComponentState, _bounds: &dyn Bounds) -> anyhow::Result<()> {
        Ok(())
    }

    fn did_update_layout(&self, _state: &mut ComponentState, _bounds: &dyn Bounds) -> anyhow::Result<()> {
        Ok(())
    }

    fn destroy(&self, state: &mut ComponentState) -> anyhow::Result<()>;
}

/// Managers by name
#[derive(Default)]
pub struct ComponentRegistry {
    managers: HashMap<String, Arc<dyn ComponentManager>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager, rejecting one missing required capabilities
    pub fn register(&mut self, manager: Arc<dyn ComponentManager>) -> Result<()> {
        let missing = manager.capabilities().missing_required();
        if !missing.is_empty() {
            return Err(RenderError::IncompleteManager {
                manager: manager.name().to_string(),
                missing,
            });
        }
        debug!(manager = manager.name(), "registered component manager");
        self.managers.insert(manager.name().to_string(), manager);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ComponentManager>> {
        self.managers
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::UnknownManager(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.managers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.managers.keys().collect();
        names.sort();
        f.debug_struct("ComponentRegistry")
            .field("managers", &names)
            .finish()
    }
}

/// Values of captured arguments at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct ArgsSnapshot {
    pub positional: Vec<Value>,
    pub named: BTreeMap<String, Value>,
}

/// Argument references captured at the invocation site
#[derive(Clone)]
pub struct CapturedArgs {
    positional: Vec<RefHandle<Value>>,
    named: BTreeMap<String, RefHandle<Value>>,
    tag: TagRef,
}

impl CapturedArgs {
    pub fn new() -> Self {
        Self {
            positional: Vec::new(),
            named: BTreeMap::new(),
            tag: constant_tag(),
        }
    }

    pub fn with_positional(mut self, reference: RefHandle<Value>) -> Self {
        self.positional.push(reference);
        self.retag();
        self
    }

    pub fn with_named(mut self, name: impl Into<String>, reference: RefHandle<Value>) -> Self {
        self.named.insert(name.into(), reference);
        self.retag();
        self
    }

    fn retag(&mut self) {
        self.tag = combine(
            self.positional
                .iter()
                .chain(self.named.values())
                .map(|r| r.tag()),
        );
    }

    /// Combined tag of every argument
    pub fn tag(&self) -> TagRef {
        self.tag.clone()
    }

    pub fn positional(&self, index: usize) -> Option<Value> {
        self.positional.get(index).map(|r| r.value())
    }

    pub fn named(&self, name: &str) -> Option<Value> {
        self.named.get(name).map(|r| r.value())
    }

    pub fn named_ref(&self, name: &str) -> Option<&RefHandle<Value>> {
        self.named.get(name)
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> ArgsSnapshot {
        ArgsSnapshot {
            positional: self.positional.iter().map(|r| r.value()).collect(),
            named: self
                .named
                .iter()
                .map(|(name, r)| (name.clone(), r.value()))
                .collect(),
        }
    }
}

impl Default for CapturedArgs {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CapturedArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedArgs")
            .field("positional", &self.positional.len())
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .field("tag", &self.tag)
            .finish()
    }
}

/// Lets a component (or anything it hands this to) schedule its own re-render
///
/// Dirtying after the component is destroyed does nothing.
#[derive(Debug, Clone)]
pub struct DirtyHandle {
    tag: Weak<DirtyableTag>,
}

impl DirtyHandle {
    /// Returns whether the component was still alive
    pub fn dirty(&self) -> bool {
        match self.tag.upgrade() {
            Some(tag) => {
                tag.dirty();
                true
            }
            None => false,
        }
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// One rendered component
pub struct ComponentInstance {
    id: ComponentId,
    manager: Arc<dyn ComponentManager>,
    capabilities: ManagerCapabilities,
    lifecycle: LifecycleState,
    state: Option<ComponentState>,
    args: CapturedArgs,
    self_tag: Option<Arc<DirtyableTag>>,
    tag: TagRef,
    last_seen: Revision,
    args_seen: Revision,
    bounds: Option<SimpleBounds>,
    cleanups: Vec<Cleanup>,
}

impl ComponentInstance {
    /// Create the instance and render its layout once
    pub fn create(
        manager: Arc<dyn ComponentManager>,
        args: CapturedArgs,
        ctx: &mut RenderContext,
    ) -> Result<Self> {
        let self_tag = DirtyableTag::shared(ctx.clock());
        let mut instance = Self {
            id: ComponentId(NEXT_COMPONENT.fetch_add(1, Ordering::Relaxed)),
            capabilities: manager.capabilities(),
            manager,
            lifecycle: LifecycleState::Uninitialized,
            state: None,
            args,
            tag: self_tag.clone(),
            self_tag: Some(self_tag),
            last_seen: Revision::ZERO,
            args_seen: Revision::ZERO,
            bounds: None,
            cleanups: Vec::new(),
        };

        let seen = instance.tag.value().max(instance.args.tag().value());
        let created = instance.manager.create(&instance.args, ctx);
        let mut state = instance.hook("create", created)?;
        instance.transition(LifecycleState::Created)?;

        let rendered = instance.manager.layout(&mut state, &instance.args, ctx);
        instance.hook("layout", rendered)?;

        let layout_tag = instance.manager.layout_tag(&state);
        if let Some(self_tag) = &instance.self_tag {
            instance.tag = combine([self_tag.clone() as TagRef, instance.args.tag(), layout_tag]);
        }
        instance.state = Some(state);
        instance.last_seen = seen;
        instance.args_seen = instance.args.tag().value();
        trace!(component = %instance.id, manager = instance.manager.name(), "created component");
        Ok(instance)
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn manager_name(&self) -> &str {
        self.manager.name()
    }

    pub fn args(&self) -> &CapturedArgs {
        &self.args
    }

    pub fn tag(&self) -> TagRef {
        self.tag.clone()
    }

    pub fn bounds(&self) -> Option<&SimpleBounds> {
        self.bounds.as_ref()
    }

    /// Revision of the last layout render
    pub fn last_seen(&self) -> Revision {
        self.last_seen
    }

    /// The manager's state bucket, if it is a `T`
    pub fn state<T: Any>(&self) -> Option<&T> {
        self.state.as_ref()?.downcast_ref::<T>()
    }

    fn hook<T>(&self, hook: &'static str, result: anyhow::Result<T>) -> Result<T> {
        result.map_err(|source| RenderError::Hook {
            component: self.id,
            hook,
            source,
        })
    }

    fn transition(&mut self, to: LifecycleState) -> Result<()> {
        if !self.lifecycle.can_transition(to) {
            return Err(RenderError::InvalidTransition {
                component: self.id,
                from: self.lifecycle,
                to,
            });
        }
        self.lifecycle = to;
        Ok(())
    }

    /// Record the instance's place in the render target and mark it live
    pub fn did_insert(&mut self, bounds: SimpleBounds) -> Result<()> {
        self.transition(LifecycleState::HasElement)?;
        self.bounds = Some(bounds);
        if self.capabilities.element_hooks {
            if let Some(state) = self.state.as_mut() {
                let result = self.manager.did_create_element(state, &bounds);
                self.hook("did_create_element", result)?;
            }
        }

        self.transition(LifecycleState::InDom)?;
        if self.capabilities.element_hooks {
            if let Some(state) = self.state.as_mut() {
                let result = self.manager.did_insert(state, &bounds);
                self.hook("did_insert", result)?;
            }
        }
        Ok(())
    }

    /// Whether the last render still reflects the component's inputs
    pub fn is_fresh(&self) -> bool {
        self.tag.validate(self.last_seen)
    }

    /// Re-render if stale; returns whether it did
    ///
    /// The args check runs before the layout and `did_update_layout` runs
    /// after it. A destroyed instance is left alone.
    pub fn revalidate(&mut self, ctx: &mut RenderContext) -> Result<bool> {
        if matches!(
            self.lifecycle,
            LifecycleState::Destroying | LifecycleState::Destroyed
        ) {
            return Ok(false);
        }
        if self.is_fresh() {
            return Ok(false);
        }

        self.transition(LifecycleState::Updating)?;
        let result = self.update(ctx);
        self.lifecycle = LifecycleState::InDom;
        result.map(|_| true)
    }

    fn update(&mut self, ctx: &mut RenderContext) -> Result<()> {
        let seen = self.tag.value();
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };
        let result = self.update_with(&mut state, ctx);
        self.state = Some(state);
        result?;

        self.last_seen = seen;
        trace!(component = %self.id, revision = %seen, "updated component");
        Ok(())
    }

    fn update_with(&mut self, state: &mut ComponentState, ctx: &mut RenderContext) -> Result<()> {
        let args_tag = self.args.tag();
        if !args_tag.validate(self.args_seen) {
            let args_revision = args_tag.value();
            if self.capabilities.update_hook {
                let result = self.manager.update(state, &self.args);
                self.hook("update", result)?;
            }
            self.args_seen = args_revision;
        }

        let result = self.manager.layout(state, &self.args, ctx);
        self.hook("layout", result)?;

        if self.capabilities.element_hooks {
            if let Some(bounds) = self.bounds {
                let result = self.manager.did_update_layout(state, &bounds);
                self.hook("did_update_layout", result)?;
            }
        }
        Ok(())
    }

    /// Schedule a re-render from inside the component
    pub fn mark_dirty(&self) -> Revision {
        match &self.self_tag {
            Some(tag) => tag.dirty(),
            None => self.last_seen,
        }
    }

    pub fn dirty_handle(&self) -> DirtyHandle {
        DirtyHandle {
            tag: self
                .self_tag
                .as_ref()
                .map(Arc::downgrade)
                .unwrap_or_default(),
        }
    }

    /// Run `cleanup` once when the instance is destroyed
    pub fn register_cleanup(&mut self, cleanup: impl FnOnce() + Send + 'static) {
        if self.lifecycle == LifecycleState::Destroyed {
            cleanup();
            return;
        }
        self.cleanups.push(Box::new(cleanup));
    }

    /// Tear the instance down; calling it again does nothing
    ///
    /// Cleanups run and the self tag is released even if the destructor
    /// hook fails; the hook error is returned afterwards.
    pub fn destroy(&mut self) -> Result<()> {
        if matches!(
            self.lifecycle,
            LifecycleState::Destroying | LifecycleState::Destroyed
        ) {
            return Ok(());
        }
        self.transition(LifecycleState::Destroying)?;

        let result = match self.state.as_mut() {
            Some(state) => self.manager.destroy(state),
            None => Ok(()),
        };
        for cleanup in self.cleanups.drain(..) {
            cleanup();
        }
        self.state = None;
        self.bounds = None;
        self.self_tag = None;
        self.tag = constant_tag();

        self.transition(LifecycleState::Destroyed)?;
        trace!(component = %self.id, "destroyed component");
        self.hook("destroy", result)
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("id", &self.id)
            .field("manager", &self.manager.name())
            .field("lifecycle", &self.lifecycle)
            .field("last_seen", &self.last_seen)
            .finish_non_exhaustive()
    }
}

/// List delegate mounting one component per item
///
/// Items get `item` plus `index` or `key` as named arguments. The fallback
/// component, if any, gets none.
#[derive(Clone)]
pub struct ComponentItems {
    item: Arc<dyn ComponentManager>,
    fallback: Option<Arc<dyn ComponentManager>>,
}

impl ComponentItems {
    pub fn new(registry: &ComponentRegistry, item: &str) -> Result<Self> {
        Ok(Self {
            item: registry.get(item)?,
            fallback: None,
        })
    }

    pub fn with_fallback(mut self, registry: &ComponentRegistry, fallback: &str) -> Result<Self> {
        self.fallback = Some(registry.get(fallback)?);
        Ok(self)
    }

    fn mount(
        manager: &Arc<dyn ComponentManager>,
        args: CapturedArgs,
        ctx: &mut RenderContext,
    ) -> Result<ComponentInstance> {
        let mut instance = ComponentInstance::create(manager.clone(), args, ctx)?;
        let bounds = SimpleBounds::single(ctx.target(), fresh_node());
        if let Err(err) = instance.did_insert(bounds) {
            if let Err(cleanup) = instance.destroy() {
                warn!(component = %instance.id(), error = %cleanup, "destroy failed after did_insert error");
            }
            return Err(err);
        }
        Ok(instance)
    }
}

impl BlockDelegate for ComponentItems {
    type Item = ComponentInstance;
    type Fallback = ComponentInstance;

    fn create_item(&mut self, ctx: &mut RenderContext, refs: &ItemRefs) -> Result<ComponentInstance> {
        let args = CapturedArgs::new()
            .with_named("item", refs.value_ref())
            .with_named(refs.memo_name(), refs.memo_ref());
        Self::mount(&self.item, args, ctx)
    }

    fn update_item(
        &mut self,
        ctx: &mut RenderContext,
        _refs: &ItemRefs,
        item: &mut ComponentInstance,
    ) -> Result<()> {
        item.revalidate(ctx).map(|_| ())
    }

    fn destroy_item(&mut self, mut item: ComponentInstance) -> Result<()> {
        item.destroy()
    }

    fn create_fallback(&mut self, ctx: &mut RenderContext) -> Result<Option<ComponentInstance>> {
        match &self.fallback {
            Some(manager) => Self::mount(manager, CapturedArgs::new(), ctx).map(Some),
            None => Ok(None),
        }
    }

    fn update_fallback(&mut self, ctx: &mut RenderContext, fallback: &mut ComponentInstance) -> Result<()> {
        fallback.revalidate(ctx).map(|_| ())
    }

    fn destroy_fallback(&mut self, mut fallback: ComponentInstance) -> Result<()> {
        fallback.destroy()
    }
}

impl fmt::Debug for ComponentItems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentItems")
            .field("item", &self.item.name())
            .field("fallback", &self.fallback.as_ref().map(|m| m.name()))
            .finish()
    }
}
