//! Components the scenario runner mounts
//!
//! `label` renders one line per list item; `fallback` renders the empty text.

use anyhow::anyhow;
use lumen_reactive::{
    constant_tag, PathReference, PropertyReference, RefHandle, Reference, RevisionClock, TagRef, Value,
};
use lumen_runtime::{CapturedArgs, ComponentManager, ComponentState, ManagerCapabilities, RenderContext};
use std::sync::Arc;

/// Prints the item, or a property path inside it
#[derive(Debug)]
pub struct LabelManager {
    label: Option<String>,
}

pub struct LabelState {
    source: RefHandle<Value>,
    pub text: String,
}

impl LabelManager {
    pub const NAME: &'static str = "label";

    pub fn new(label: Option<String>) -> Self {
        Self { label }
    }
}

fn label_reference(clock: &Arc<RevisionClock>, item: RefHandle<Value>, path: &str) -> RefHandle<Value> {
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let Some(first) = segments.next() else {
        return item;
    };
    let mut current: Arc<PropertyReference> = PropertyReference::new(clock, item, first);
    for segment in segments {
        current = current.get(segment);
    }
    current
}

fn label_state(state: &mut ComponentState) -> anyhow::Result<&mut LabelState> {
    state
        .downcast_mut::<LabelState>()
        .ok_or_else(|| anyhow!("label component state has the wrong type"))
}

impl ComponentManager for LabelManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> ManagerCapabilities {
        ManagerCapabilities::required()
    }

    fn create(&self, args: &CapturedArgs, ctx: &mut RenderContext) -> anyhow::Result<ComponentState> {
        let item = args
            .named_ref("item")
            .cloned()
            .ok_or_else(|| anyhow!("label component needs an `item` argument"))?;
        let source = match &self.label {
            Some(path) => label_reference(ctx.clock(), item, path),
            None => item,
        };
        Ok(Box::new(LabelState {
            source,
            text: String::new(),
        }))
    }

    fn layout(
        &self,
        state: &mut ComponentState,
        _args: &CapturedArgs,
        _ctx: &mut RenderContext,
    ) -> anyhow::Result<()> {
        let state = label_state(state)?;
        state.text = state.source.value().to_string();
        Ok(())
    }

    fn layout_tag(&self, state: &ComponentState) -> TagRef {
        match state.downcast_ref::<LabelState>() {
            Some(state) => state.source.tag(),
            None => constant_tag(),
        }
    }

    fn destroy(&self, _state: &mut ComponentState) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Shows fixed text while the list is empty
#[derive(Debug)]
pub struct FallbackManager {
    text: String,
}

impl FallbackManager {
    pub const NAME: &'static str = "fallback";

    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl ComponentManager for FallbackManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> ManagerCapabilities {
        ManagerCapabilities::required()
    }

    fn create(&self, _args: &CapturedArgs, _ctx: &mut RenderContext) -> anyhow::Result<ComponentState> {
        Ok(Box::new(self.text.clone()))
    }

    fn layout(
        &self,
        _state: &mut ComponentState,
        _args: &CapturedArgs,
        _ctx: &mut RenderContext,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn destroy(&self, _state: &mut ComponentState) -> anyhow::Result<()> {
        Ok(())
    }
}
