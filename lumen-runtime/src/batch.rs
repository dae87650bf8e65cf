//! Batch boundaries
//!
//! Mutations are grouped into batches. Observers hear about the start and end
//! of the outermost batch; the scheduler uses the end to revalidate its roots.

use crate::error::Result;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

pub type SubscriptionId = u64;

pub type BatchCallback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Source of begin/end batch notifications
pub trait BatchSignal: Send + Sync {
    fn on_begin_batch(&self, callback: BatchCallback) -> SubscriptionId;

    fn on_end_batch(&self, callback: BatchCallback) -> SubscriptionId;

    /// Returns `false` when `id` was not subscribed
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Begin,
    End,
}

#[derive(Default)]
struct QueueState {
    next_id: SubscriptionId,
    depth: usize,
    subscribers: Vec<(SubscriptionId, Phase, BatchCallback)>,
}

/// In-process batch signal
///
/// Batches nest; only the outermost `begin`/`end` pair notifies.
#[derive(Default)]
pub struct BatchQueue {
    state: Mutex<QueueState>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn begin(&self) -> Result<()> {
        let callbacks = {
            let mut state = self.state.lock();
            state.depth += 1;
            if state.depth > 1 {
                return Ok(());
            }
            Self::callbacks(&state, Phase::Begin)
        };
        trace!("batch begin");
        Self::fire(callbacks)
    }

    /// Close a batch; returns the first callback error
    pub fn end(&self) -> Result<()> {
        let callbacks = {
            let mut state = self.state.lock();
            if state.depth == 0 {
                return Ok(());
            }
            state.depth -= 1;
            if state.depth > 0 {
                return Ok(());
            }
            Self::callbacks(&state, Phase::End)
        };
        trace!("batch end");
        Self::fire(callbacks)
    }

    /// Run `f` inside one batch
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        self.begin()?;
        let output = f();
        self.end()?;
        Ok(output)
    }

    fn callbacks(state: &QueueState, phase: Phase) -> Vec<BatchCallback> {
        state
            .subscribers
            .iter()
            .filter(|(_, p, _)| *p == phase)
            .map(|(_, _, cb)| cb.clone())
            .collect()
    }

    // Callbacks run without the lock held so they may subscribe or unsubscribe.
    fn fire(callbacks: Vec<BatchCallback>) -> Result<()> {
        let mut first_error = None;
        for callback in callbacks {
            if let Err(err) = callback() {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn subscribe(&self, phase: Phase, callback: BatchCallback) -> SubscriptionId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.push((id, phase, callback));
        id
    }
}

impl BatchSignal for BatchQueue {
    fn on_begin_batch(&self, callback: BatchCallback) -> SubscriptionId {
        self.subscribe(Phase::Begin, callback)
    }

    fn on_end_batch(&self, callback: BatchCallback) -> SubscriptionId {
        self.subscribe(Phase::End, callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub, _, _)| *sub != id);
        state.subscribers.len() != before
    }
}

impl fmt::Debug for BatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BatchQueue")
            .field("depth", &state.depth)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}
