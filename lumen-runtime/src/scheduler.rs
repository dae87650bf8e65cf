//! Reconciliation scheduler
//!
//! Owns the live roots and re-renders the ones the revision clock says are
//! stale. A render may dirty state that it or another root observes, so a
//! call to [`Scheduler::render_roots`] loops until no root needs a render,
//! up to `max_reflush_passes` passes:
//!
//! ```text
//! render_roots
//!   └─ pass 1: render every stale root ──▶ clock moved during pass?
//!        └─ pass 2: render roots stale again ──▶ ...
//!             └─ pass N > max: destroy the roots still dirtying, InfiniteInvalidation
//! ```

use crate::batch::{BatchSignal, SubscriptionId};
use crate::config::SchedulerConfig;
use crate::error::{RenderError, Result};
use lumen_reactive::{Revision, RevisionClock};
use lumen_types::{NodeId, RootId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

static NEXT_ROOT: AtomicU64 = AtomicU64::new(1);

/// Per-render information handed to renderers, components and delegates
#[derive(Debug, Clone)]
pub struct RenderContext {
    clock: Arc<RevisionClock>,
    root: RootId,
    target: NodeId,
    pass: usize,
    revision: Revision,
}

impl RenderContext {
    pub fn new(clock: Arc<RevisionClock>, root: RootId, target: NodeId, pass: usize) -> Self {
        let revision = clock.value();
        Self {
            clock,
            root,
            target,
            pass,
            revision,
        }
    }

    pub fn clock(&self) -> &Arc<RevisionClock> {
        &self.clock
    }

    pub fn root(&self) -> RootId {
        self.root
    }

    /// Render-target node the root renders into
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// 1-based pass number within the current `render_roots` call
    pub fn pass(&self) -> usize {
        self.pass
    }

    /// Clock value when the render started
    pub fn revision(&self) -> Revision {
        self.revision
    }
}

/// Render closure of a root
pub trait RootRenderer: Send {
    fn render(&mut self, ctx: &mut RenderContext) -> Result<()>;

    /// Called once when the root is destroyed
    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> RootRenderer for F
where
    F: FnMut(&mut RenderContext) -> Result<()> + Send,
{
    fn render(&mut self, ctx: &mut RenderContext) -> Result<()> {
        self(ctx)
    }
}

/// A top-level render invocation
pub struct Root {
    id: RootId,
    target: NodeId,
    renderer: Mutex<Box<dyn RootRenderer>>,
    destroyed: AtomicBool,
    torn_down: AtomicBool,
    should_reflush: AtomicBool,
    last_revision: AtomicU64,
}

impl Root {
    pub fn new(target: NodeId, renderer: impl RootRenderer + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: RootId(NEXT_ROOT.fetch_add(1, Ordering::Relaxed)),
            target,
            renderer: Mutex::new(Box::new(renderer)),
            destroyed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            should_reflush: AtomicBool::new(false),
            last_revision: AtomicU64::new(Revision::ZERO.0),
        })
    }

    /// Root rendering through a closure
    pub fn from_fn<F>(target: NodeId, render: F) -> Arc<Self>
    where
        F: FnMut(&mut RenderContext) -> Result<()> + Send + 'static,
    {
        Self::new(target, render)
    }

    pub fn id(&self) -> RootId {
        self.id
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Clock value observed before the last render, `None` if never rendered
    pub fn last_revision(&self) -> Option<Revision> {
        match Revision(self.last_revision.load(Ordering::SeqCst)) {
            Revision::ZERO => None,
            revision => Some(revision),
        }
    }

    /// Whether the last render dirtied the clock
    pub fn should_reflush(&self) -> bool {
        self.should_reflush.load(Ordering::SeqCst)
    }

    fn needs_render(&self, clock: &RevisionClock) -> bool {
        if self.is_destroyed() {
            return false;
        }
        match self.last_revision() {
            None => true,
            Some(revision) => !clock.validate(revision) || self.should_reflush(),
        }
    }

    fn render(&self, clock: &Arc<RevisionClock>, pass: usize) -> Result<()> {
        let before = clock.value();
        self.last_revision.store(before.0, Ordering::SeqCst);
        self.should_reflush.store(false, Ordering::SeqCst);

        let mut ctx = RenderContext::new(clock.clone(), self.id, self.target, pass);
        trace!(root = %self.id, pass, revision = %before, "rendering root");
        let result = self.renderer.lock().render(&mut ctx);

        if clock.value() != before {
            self.should_reflush.store(true, Ordering::SeqCst);
        }
        result
    }

    fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    fn teardown(&self) -> Result<()> {
        self.mark_destroyed();
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(root = %self.id, "tearing down root");
        self.renderer.lock().teardown()
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("destroyed", &self.is_destroyed())
            .field("last_revision", &self.last_revision())
            .finish_non_exhaustive()
    }
}

struct SchedulerState {
    roots: Vec<Arc<Root>>,
    last_revision: Revision,
    destroyed: bool,
    subscription: Option<SubscriptionId>,
}

struct SchedulerInner {
    clock: Arc<RevisionClock>,
    config: SchedulerConfig,
    signal: Option<Arc<dyn BatchSignal>>,
    state: Mutex<SchedulerState>,
    rendering: AtomicBool,
}

/// Handle to a reconciliation scheduler
///
/// Clones share the same roots.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Clears the rendering flag when a `render_roots` call unwinds or returns
struct RenderingGuard<'a>(&'a AtomicBool);

impl Drop for RenderingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Scheduler {
    pub fn new(clock: Arc<RevisionClock>, config: SchedulerConfig) -> Self {
        Self::build(clock, config, None)
    }

    /// Scheduler that revalidates at the end of every batch of `signal`
    pub fn with_batch_signal(
        clock: Arc<RevisionClock>,
        config: SchedulerConfig,
        signal: Arc<dyn BatchSignal>,
    ) -> Self {
        Self::build(clock, config, Some(signal))
    }

    fn build(
        clock: Arc<RevisionClock>,
        config: SchedulerConfig,
        signal: Option<Arc<dyn BatchSignal>>,
    ) -> Self {
        let last_revision = clock.value();
        Self {
            inner: Arc::new(SchedulerInner {
                clock,
                config,
                signal,
                state: Mutex::new(SchedulerState {
                    roots: Vec::new(),
                    last_revision,
                    destroyed: false,
                    subscription: None,
                }),
                rendering: AtomicBool::new(false),
            }),
        }
    }

    pub fn clock(&self) -> &Arc<RevisionClock> {
        &self.inner.clock
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Snapshot taken at the end of the last `render_roots` call
    pub fn last_revision(&self) -> Revision {
        self.inner.state.lock().last_revision
    }

    /// Live roots in registration order
    pub fn roots(&self) -> Vec<RootId> {
        self.inner.state.lock().roots.iter().map(|r| r.id()).collect()
    }

    pub fn root(&self, id: RootId) -> Option<Arc<Root>> {
        self.inner
            .state
            .lock()
            .roots
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Add a root; it renders on the next pass
    pub fn register_root(&self, root: Arc<Root>) -> Result<RootId> {
        let id = root.id();
        let first = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return Err(RenderError::SchedulerShutdown);
            }
            if state.roots.iter().any(|r| r.id() == id) {
                return Err(RenderError::DuplicateRoot(id));
            }
            state.roots.push(root);
            state.last_revision = Revision::ZERO;
            state.roots.len() == 1
        };
        debug!(root = %id, "registered root");
        if first {
            self.subscribe();
        }
        Ok(id)
    }

    /// Remove a root without tearing it down
    pub fn deregister_root(&self, id: RootId) -> Result<Arc<Root>> {
        let (root, empty) = {
            let mut state = self.inner.state.lock();
            let index = state
                .roots
                .iter()
                .position(|r| r.id() == id)
                .ok_or(RenderError::UnknownRoot(id))?;
            let root = state.roots.remove(index);
            (root, state.roots.is_empty())
        };
        debug!(root = %id, "deregistered root");
        if empty {
            self.unsubscribe();
        }
        Ok(root)
    }

    /// Destroy a root and tear it down
    ///
    /// During a pass the root is skipped from then on and torn down when the
    /// pass ends.
    pub fn destroy_root(&self, id: RootId) -> Result<()> {
        let root = self.root(id).ok_or(RenderError::UnknownRoot(id))?;
        root.mark_destroyed();
        if self.inner.rendering.load(Ordering::SeqCst) {
            trace!(root = %id, "deferring teardown until end of pass");
            return Ok(());
        }
        self.deregister_root(id)?;
        root.teardown()
    }

    /// `true` iff shut down, empty, or nothing changed since the last render
    pub fn is_valid(&self) -> bool {
        let state = self.inner.state.lock();
        state.destroyed
            || state.roots.is_empty()
            || self.inner.clock.validate(state.last_revision)
    }

    /// Render the roots only if something changed; returns whether it did
    pub fn revalidate(&self) -> Result<bool> {
        if self.is_valid() {
            return Ok(false);
        }
        self.render_roots()?;
        Ok(true)
    }

    /// Render stale roots until quiescent
    ///
    /// Calls made from inside a render return immediately; the running loop
    /// sees whatever they would have rendered.
    pub fn render_roots(&self) -> Result<()> {
        if self.inner.rendering.swap(true, Ordering::SeqCst) {
            trace!("render_roots called while rendering; deferring to running loop");
            return Ok(());
        }
        let result = {
            let _guard = RenderingGuard(&self.inner.rendering);
            let result = self.run_passes();
            let clock = &self.inner.clock;
            let mut state = self.inner.state.lock();
            // Bystanders spared by the loop guard still owe a render
            let owed = matches!(result, Err(RenderError::InfiniteInvalidation { .. }))
                && state.roots.iter().any(|r| r.needs_render(clock));
            state.last_revision = if owed { Revision::ZERO } else { clock.value() };
            result
        };

        // A shutdown from another thread may have landed after the last sweep
        let swept = self.sweep_destroyed();
        match result {
            Err(err) => {
                if let Err(teardown) = swept {
                    warn!(error = %teardown, "teardown failed after render error");
                }
                Err(err)
            }
            Ok(()) => swept,
        }
    }

    fn run_passes(&self) -> Result<()> {
        let clock = &self.inner.clock;
        let max_passes = self.inner.config.max_reflush_passes;
        let mut pass = 0;

        loop {
            let pending: Vec<Arc<Root>> = {
                let state = self.inner.state.lock();
                if state.destroyed {
                    return Ok(());
                }
                state
                    .roots
                    .iter()
                    .filter(|r| r.needs_render(clock))
                    .cloned()
                    .collect()
            };
            if pending.is_empty() {
                if pass > 0 {
                    debug!(passes = pass, revision = %clock.value(), "roots settled");
                }
                return Ok(());
            }
            if pass >= max_passes {
                return Err(self.trip_guard(pass, pending));
            }

            pass += 1;
            debug!(pass, roots = pending.len(), revision = %clock.value(), "reconciliation pass");
            for root in &pending {
                if root.is_destroyed() {
                    continue;
                }
                if let Err(err) = root.render(clock, pass) {
                    warn!(root = %root.id(), pass, error = %err, "render failed; aborting pass");
                    if let Err(teardown) = self.sweep_destroyed() {
                        warn!(error = %teardown, "teardown failed after render error");
                    }
                    return Err(err);
                }
            }
            self.sweep_destroyed()?;
        }
    }

    /// Destroy the roots that kept dirtying during the final pass
    ///
    /// Roots that were only stale because of them stay registered. When no
    /// render dirtied (the clock moved elsewhere), every pending root goes.
    fn trip_guard(&self, passes: usize, pending: Vec<Arc<Root>>) -> RenderError {
        let (offending, bystanders): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|r| r.should_reflush());
        let victims = if offending.is_empty() { bystanders } else { offending };
        let roots: Vec<RootId> = victims.iter().map(|r| r.id()).collect();
        error!(passes, roots = ?roots, "infinite rendering invalidation detected");

        let empty = {
            let mut state = self.inner.state.lock();
            state.roots.retain(|r| !roots.contains(&r.id()));
            state.roots.is_empty()
        };
        for root in &victims {
            if let Err(err) = root.teardown() {
                warn!(root = %root.id(), error = %err, "teardown failed after loop guard");
            }
        }
        if empty {
            self.unsubscribe();
        }
        RenderError::InfiniteInvalidation { passes, roots }
    }

    /// Drop roots destroyed during a pass; returns the first teardown error
    fn sweep_destroyed(&self) -> Result<()> {
        let (removed, empty) = {
            let mut state = self.inner.state.lock();
            let (removed, kept): (Vec<_>, Vec<_>) =
                state.roots.drain(..).partition(|r| r.is_destroyed());
            state.roots = kept;
            (removed, state.roots.is_empty())
        };
        if removed.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        for root in removed {
            if let Err(err) = root.teardown() {
                first_error.get_or_insert(err);
            }
        }
        if empty {
            self.unsubscribe();
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Tear down every root and stop observing batches
    ///
    /// Called during a pass, the roots are only marked destroyed; the running
    /// loop tears them down once the current render returns.
    pub fn shutdown(&self) -> Result<()> {
        let deferred = self.inner.rendering.load(Ordering::SeqCst);
        let roots = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return Ok(());
            }
            state.destroyed = true;
            if deferred {
                state.roots.iter().for_each(|root| root.mark_destroyed());
                Vec::new()
            } else {
                std::mem::take(&mut state.roots)
            }
        };
        self.unsubscribe();
        if deferred {
            debug!("shutdown requested during a pass; deferring teardown");
            return Ok(());
        }
        debug!(roots = roots.len(), "shutting down scheduler");

        let mut first_error = None;
        for root in roots {
            if let Err(err) = root.teardown() {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn subscribe(&self) {
        let Some(signal) = &self.inner.signal else {
            return;
        };
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let id = signal.on_end_batch(Arc::new(move || match weak.upgrade() {
            Some(inner) => Scheduler { inner }.revalidate().map(|_| ()),
            None => Ok(()),
        }));
        let previous = self.inner.state.lock().subscription.replace(id);
        if let Some(previous) = previous {
            signal.unsubscribe(previous);
        }
        trace!(subscription = id, "observing batch boundaries");
    }

    fn unsubscribe(&self) {
        let Some(signal) = &self.inner.signal else {
            return;
        };
        if let Some(id) = self.inner.state.lock().subscription.take() {
            signal.unsubscribe(id);
            trace!(subscription = id, "stopped observing batch boundaries");
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Scheduler")
            .field("roots", &state.roots.len())
            .field("last_revision", &state.last_revision)
            .field("destroyed", &state.destroyed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchQueue;
    use lumen_reactive::{DirtyableTag, Tag};
    use std::sync::atomic::AtomicUsize;

    fn counting_root(count: &Arc<AtomicUsize>) -> Arc<Root> {
        let count = count.clone();
        Root::from_fn(NodeId(0), move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn scheduler() -> (Arc<RevisionClock>, Scheduler) {
        let clock = RevisionClock::shared();
        let scheduler = Scheduler::new(clock.clone(), SchedulerConfig::default());
        (clock, scheduler)
    }

    #[test]
    fn test_new_root_renders_once() {
        let (_, scheduler) = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.register_root(counting_root(&count)).unwrap();

        assert!(!scheduler.is_valid());
        scheduler.render_roots().unwrap();
        scheduler.render_roots().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_valid());
    }

    #[test]
    fn test_rerenders_after_dirty() {
        let (clock, scheduler) = scheduler();
        let tag = DirtyableTag::shared(&clock);
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.register_root(counting_root(&count)).unwrap();
        scheduler.render_roots().unwrap();

        tag.dirty();
        assert!(!scheduler.is_valid());
        assert!(scheduler.revalidate().unwrap());
        assert!(!scheduler.revalidate().unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_and_unknown_roots() {
        let (_, scheduler) = scheduler();
        let root = counting_root(&Arc::new(AtomicUsize::new(0)));
        let id = scheduler.register_root(root.clone()).unwrap();

        assert!(matches!(
            scheduler.register_root(root),
            Err(RenderError::DuplicateRoot(dup)) if dup == id
        ));
        scheduler.deregister_root(id).unwrap();
        assert!(matches!(
            scheduler.deregister_root(id),
            Err(RenderError::UnknownRoot(_))
        ));
        assert!(scheduler.is_valid());
    }

    #[test]
    fn test_roots_render_in_registration_order() {
        let (_, scheduler) = scheduler();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let order = order.clone();
            scheduler
                .register_root(Root::from_fn(NodeId(0), move |_| {
                    order.lock().push(name);
                    Ok(())
                }))
                .unwrap();
        }
        scheduler.render_roots().unwrap();
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_last_revision_is_monotonic_and_taken_before_render() {
        let (clock, scheduler) = scheduler();
        let tag = DirtyableTag::shared(&clock);
        let dirtied = Arc::new(AtomicBool::new(false));
        let flag = dirtied.clone();
        let writer = tag.clone();
        let root = Root::from_fn(NodeId(0), move |_| {
            if !flag.swap(true, Ordering::SeqCst) {
                writer.dirty();
            }
            Ok(())
        });
        scheduler.register_root(root.clone()).unwrap();
        let before = clock.value();

        scheduler.render_roots().unwrap();
        assert!(root.last_revision().unwrap() > before);
        assert_eq!(root.last_revision(), Some(tag.value()));
        assert!(!root.should_reflush());
    }

    #[test]
    fn test_destroy_during_render_is_deferred() {
        let (_, scheduler) = scheduler();
        let handle = scheduler.clone();
        let torn = Arc::new(AtomicUsize::new(0));

        struct SelfDestruct {
            scheduler: Scheduler,
            id: Arc<Mutex<Option<RootId>>>,
            torn: Arc<AtomicUsize>,
        }
        impl RootRenderer for SelfDestruct {
            fn render(&mut self, _ctx: &mut RenderContext) -> Result<()> {
                if let Some(id) = *self.id.lock() {
                    self.scheduler.destroy_root(id)?;
                }
                Ok(())
            }
            fn teardown(&mut self) -> Result<()> {
                self.torn.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let slot = Arc::new(Mutex::new(None));
        let root = Root::new(
            NodeId(0),
            SelfDestruct {
                scheduler: handle,
                id: slot.clone(),
                torn: torn.clone(),
            },
        );
        let id = scheduler.register_root(root.clone()).unwrap();
        *slot.lock() = Some(id);

        scheduler.render_roots().unwrap();
        assert!(root.is_destroyed());
        assert!(scheduler.roots().is_empty());
        assert_eq!(torn.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_render_is_noop() {
        let (_, scheduler) = scheduler();
        let handle = scheduler.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler
            .register_root(Root::from_fn(NodeId(0), move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                handle.render_roots()
            }))
            .unwrap();

        scheduler.render_roots().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_render_error_propagates_and_snapshot_advances() {
        let (_, scheduler) = scheduler();
        scheduler
            .register_root(Root::from_fn(NodeId(0), |_| {
                Err(anyhow::anyhow!("render failed").into())
            }))
            .unwrap();

        assert!(matches!(scheduler.render_roots(), Err(RenderError::Host(_))));
        assert!(scheduler.is_valid());
    }

    #[test]
    fn test_batch_subscription_follows_root_count() {
        let clock = RevisionClock::shared();
        let queue = BatchQueue::shared();
        let scheduler =
            Scheduler::with_batch_signal(clock.clone(), SchedulerConfig::default(), queue.clone());
        let count = Arc::new(AtomicUsize::new(0));

        let id = scheduler.register_root(counting_root(&count)).unwrap();
        assert_eq!(queue.subscriber_count(), 1);
        scheduler.register_root(counting_root(&count)).unwrap();
        assert_eq!(queue.subscriber_count(), 1);

        let tag = DirtyableTag::shared(&clock);
        queue.run(|| tag.dirty()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        scheduler.destroy_root(id).unwrap();
        assert_eq!(queue.subscriber_count(), 1);
        scheduler.shutdown().unwrap();
        assert_eq!(queue.subscriber_count(), 0);
        assert!(matches!(
            scheduler.register_root(counting_root(&count)),
            Err(RenderError::SchedulerShutdown)
        ));
    }
}
