//! Integration tests for the reconciliation scheduler

use lumen_reactive::prelude::*;
use anyhow::anyhow;
use lumen_runtime::{
    BatchQueue, RenderContext, RenderError, Root, RootRenderer, Scheduler, SchedulerConfig,
};
use lumen_types::NodeId;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Root whose every render bumps a counter until it reaches `depth`
fn cascading_root(clock: &Arc<RevisionClock>, depth: u64) -> (Arc<Root>, Arc<AtomicUsize>) {
    let counter = Arc::new(WritableReference::new(clock, 0u64));
    let renders = Arc::new(AtomicUsize::new(0));
    let count = renders.clone();
    let root = Root::from_fn(NodeId(0), move |_| {
        count.fetch_add(1, Ordering::SeqCst);
        let n = counter.value();
        if n < depth {
            counter.update(n + 1);
        }
        Ok(())
    });
    (root, renders)
}

fn scheduler(clock: &Arc<RevisionClock>) -> Scheduler {
    Scheduler::new(clock.clone(), SchedulerConfig::default())
}

#[test]
fn test_cascades_up_to_depth_nine_converge() {
    for depth in [0, 1, 5, 9] {
        let clock = RevisionClock::shared();
        let scheduler = scheduler(&clock);
        let (root, renders) = cascading_root(&clock, depth);
        scheduler.register_root(root.clone()).unwrap();

        scheduler.render_roots().unwrap();
        assert_eq!(renders.load(Ordering::SeqCst), depth as usize + 1);
        assert!(!root.is_destroyed());
        assert!(scheduler.is_valid());
    }
}

#[test]
fn test_cascades_of_depth_eleven_trip_the_guard() {
    for depth in [11, 50] {
        let clock = RevisionClock::shared();
        let scheduler = scheduler(&clock);
        let (root, renders) = cascading_root(&clock, depth);
        let id = scheduler.register_root(root.clone()).unwrap();

        match scheduler.render_roots() {
            Err(RenderError::InfiniteInvalidation { passes, roots }) => {
                assert_eq!(passes, 10);
                assert_eq!(roots, vec![id]);
            }
            other => panic!("expected InfiniteInvalidation, got {other:?}"),
        }
        assert_eq!(renders.load(Ordering::SeqCst), 10);
        assert!(root.is_destroyed());
        assert!(scheduler.roots().is_empty());
        assert!(scheduler.is_valid());
    }
}

#[test]
fn test_guard_follows_configuration() {
    let clock = RevisionClock::shared();
    let config = SchedulerConfig {
        max_reflush_passes: 3,
    };
    let scheduler = Scheduler::new(clock.clone(), config.clone());
    let (root, _) = cascading_root(&clock, 2);
    scheduler.register_root(root).unwrap();
    scheduler.render_roots().unwrap();

    let scheduler = Scheduler::new(clock.clone(), config);
    let (root, _) = cascading_root(&clock, 3);
    scheduler.register_root(root).unwrap();
    assert!(matches!(
        scheduler.render_roots(),
        Err(RenderError::InfiniteInvalidation { passes: 3, .. })
    ));
}

#[test]
fn test_sibling_cascade_is_observed_in_the_same_call() {
    let clock = RevisionClock::shared();
    let scheduler = scheduler(&clock);
    let shared = Arc::new(WritableReference::new(&clock, 0u64));
    let seen = Arc::new(AtomicUsize::new(0));

    let reader = shared.clone();
    let observed = seen.clone();
    scheduler
        .register_root(Root::from_fn(NodeId(1), move |_| {
            observed.store(reader.value() as usize, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

    let writer = shared.clone();
    scheduler
        .register_root(Root::from_fn(NodeId(2), move |_| {
            writer.update(7);
            Ok(())
        }))
        .unwrap();

    scheduler.render_roots().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 7);
}

#[test]
fn test_roots_registered_during_render_render_in_the_same_call() {
    let clock = RevisionClock::shared();
    let scheduler = scheduler(&clock);
    let child_renders = Arc::new(AtomicUsize::new(0));

    let handle = scheduler.clone();
    let count = child_renders.clone();
    let mut spawned = false;
    scheduler
        .register_root(Root::from_fn(NodeId(1), move |_| {
            if !spawned {
                spawned = true;
                let count = count.clone();
                handle.register_root(Root::from_fn(NodeId(2), move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))?;
            }
            Ok(())
        }))
        .unwrap();

    scheduler.render_roots().unwrap();
    assert_eq!(child_renders.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.roots().len(), 2);
}

#[test]
fn test_one_render_per_batch() {
    let clock = RevisionClock::shared();
    let queue = BatchQueue::shared();
    let scheduler =
        Scheduler::with_batch_signal(clock.clone(), SchedulerConfig::default(), queue.clone());
    let state = Value::from_json(&clock, &json!({"a": 1, "b": 2}));
    let renders = Arc::new(AtomicUsize::new(0));

    let count = renders.clone();
    scheduler
        .register_root(Root::from_fn(NodeId(0), move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
    queue.run(|| ()).unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    queue
        .run(|| {
            Mutation::Set { path: "a".into(), value: json!(10) }
                .apply(&state, &clock)
                .unwrap();
            Mutation::Set { path: "b".into(), value: json!(20) }
                .apply(&state, &clock)
                .unwrap();
        })
        .unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 2);

    queue.run(|| ()).unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}

#[test]
fn test_independent_schedulers_do_not_interfere() {
    let first_clock = RevisionClock::shared();
    let second_clock = RevisionClock::shared();
    let first = scheduler(&first_clock);
    let second = scheduler(&second_clock);
    let (root, _) = cascading_root(&first_clock, 0);
    first.register_root(root).unwrap();
    let (root, _) = cascading_root(&second_clock, 0);
    second.register_root(root).unwrap();
    first.render_roots().unwrap();
    second.render_roots().unwrap();

    DirtyableTag::shared(&first_clock).dirty();
    assert!(!first.is_valid());
    assert!(second.is_valid());
}

/// Renderer that optionally shuts its scheduler down and counts teardowns
struct Teardowns {
    scheduler: Option<Scheduler>,
    torn_down: Arc<AtomicUsize>,
}

impl RootRenderer for Teardowns {
    fn render(&mut self, _: &mut RenderContext) -> lumen_runtime::Result<()> {
        match &self.scheduler {
            Some(scheduler) => scheduler.shutdown(),
            None => Ok(()),
        }
    }

    fn teardown(&mut self) -> lumen_runtime::Result<()> {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_shutdown_from_inside_a_render_completes() {
    let clock = RevisionClock::shared();
    let scheduler = scheduler(&clock);
    let torn_down = Arc::new(AtomicUsize::new(0));
    scheduler
        .register_root(Root::new(
            NodeId(1),
            Teardowns {
                scheduler: Some(scheduler.clone()),
                torn_down: torn_down.clone(),
            },
        ))
        .unwrap();
    scheduler
        .register_root(Root::new(
            NodeId(2),
            Teardowns {
                scheduler: None,
                torn_down: torn_down.clone(),
            },
        ))
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let worker = scheduler.clone();
    thread::spawn(move || {
        let _ = tx.send(worker.render_roots());
    });
    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("render_roots did not return");

    assert!(result.is_ok());
    assert!(scheduler.is_shut_down());
    assert!(scheduler.roots().is_empty());
    assert_eq!(torn_down.load(Ordering::SeqCst), 2);
}

/// Renderer whose teardown always fails
struct FailingTeardown;

impl RootRenderer for FailingTeardown {
    fn render(&mut self, _: &mut RenderContext) -> lumen_runtime::Result<()> {
        Ok(())
    }

    fn teardown(&mut self) -> lumen_runtime::Result<()> {
        Err(RenderError::Host(anyhow!("teardown failed")))
    }
}

#[test]
fn test_render_error_wins_over_teardown_error() {
    let clock = RevisionClock::shared();
    let scheduler = scheduler(&clock);
    let victim = scheduler
        .register_root(Root::new(NodeId(1), FailingTeardown))
        .unwrap();
    let handle = scheduler.clone();
    let failing = scheduler
        .register_root(Root::from_fn(NodeId(2), move |_| {
            handle.destroy_root(victim)?;
            Err(RenderError::Host(anyhow!("render failed")))
        }))
        .unwrap();

    let err = scheduler.render_roots().unwrap_err();
    assert!(matches!(err, RenderError::Host(_)));
    assert_eq!(err.to_string(), "render failed");
    assert_eq!(scheduler.roots(), vec![failing]);
}

#[test]
fn test_loop_guard_spares_quiet_roots() {
    let clock = RevisionClock::shared();
    let scheduler = scheduler(&clock);
    let renders = Arc::new(AtomicUsize::new(0));
    let count = renders.clone();
    let quiet = Root::from_fn(NodeId(1), move |_| {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let quiet_id = scheduler.register_root(quiet.clone()).unwrap();
    let (cascade, _) = cascading_root(&clock, 50);
    let cascade_id = scheduler.register_root(cascade.clone()).unwrap();

    match scheduler.render_roots() {
        Err(RenderError::InfiniteInvalidation { roots, .. }) => {
            assert_eq!(roots, vec![cascade_id]);
        }
        other => panic!("expected InfiniteInvalidation, got {other:?}"),
    }
    assert!(cascade.is_destroyed());
    assert!(!quiet.is_destroyed());
    assert_eq!(scheduler.roots(), vec![quiet_id]);
    assert_eq!(renders.load(Ordering::SeqCst), 10);

    assert!(!scheduler.is_valid());
    assert!(scheduler.revalidate().unwrap());
    assert_eq!(renders.load(Ordering::SeqCst), 11);
    assert!(scheduler.is_valid());
}
