//! Replay a scenario and report what each batch rendered

use crate::components::{FallbackManager, LabelManager, LabelState};
use crate::scenario::Scenario;
use anyhow::{anyhow, Context, Result};
use lumen_reactive::{get_path, MetricsSnapshot, RevisionClock, RootReference, Value};
use lumen_runtime::{
    fresh_node, BatchQueue, ComponentItems, ComponentRegistry, DiffSummary, IterableReference,
    ListBlock, LumenConfig, RenderContext, Root, RootRenderer, Scheduler,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// One render of the scenario's root
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub pass: usize,
    pub revision: u64,
    pub rows: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffSummary>,
    /// Cumulative counters of the list's iterable reference
    pub iterable: MetricsSnapshot,
}

/// Every frame rendered while flushing one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub mutations: usize,
    pub dirtied: usize,
    pub frames: Vec<Frame>,
    /// Iterable reads during this step; absent when nothing rendered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterable: Option<MetricsSnapshot>,
}

impl StepReport {
    fn new(
        step: usize,
        mutations: usize,
        dirtied: usize,
        frames: Vec<Frame>,
        previous: &mut Option<MetricsSnapshot>,
    ) -> Self {
        let iterable = frames.last().map(|frame| match previous {
            Some(earlier) => frame.iterable.since(earlier),
            None => frame.iterable,
        });
        if let Some(frame) = frames.last() {
            *previous = Some(frame.iterable);
        }
        if let Some(metrics) = &iterable {
            debug!(step, %metrics, "iterable reads");
        }
        Self {
            step,
            mutations,
            dirtied,
            frames,
            iterable,
        }
    }
}

struct ListRenderer {
    block: ListBlock<ComponentItems>,
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl ListRenderer {
    fn snapshot(&self, ctx: &RenderContext, diff: Option<DiffSummary>) -> Frame {
        let rows = self
            .block
            .list()
            .iter()
            .map(|(_, item)| {
                item.state::<LabelState>()
                    .map(|state| state.text.clone())
                    .unwrap_or_default()
            })
            .collect();
        let fallback = self
            .block
            .fallback()
            .and_then(|fallback| fallback.state::<String>().cloned());
        Frame {
            pass: ctx.pass(),
            revision: ctx.revision().0,
            rows,
            fallback,
            diff,
            iterable: self.block.iterable().metrics().snapshot(),
        }
    }
}

impl RootRenderer for ListRenderer {
    fn render(&mut self, ctx: &mut RenderContext) -> lumen_runtime::Result<()> {
        let diff = self.block.revalidate(ctx)?;
        let frame = self.snapshot(ctx, diff);
        self.frames.lock().push(frame);
        Ok(())
    }

    fn teardown(&mut self) -> lumen_runtime::Result<()> {
        self.block.teardown()
    }
}

/// Render the scenario once, then once per step, each step in its own batch
pub fn execute(scenario: &Scenario, config: &LumenConfig) -> Result<Vec<StepReport>> {
    let clock = RevisionClock::shared();
    let state = Value::from_json(&clock, &scenario.state);
    let root = RootReference::new(&clock, state.clone());
    let source = get_path(&root, &scenario.list.path)
        .ok_or_else(|| anyhow!("list.path must name a collection"))?;

    let mut registry = ComponentRegistry::new();
    registry.register(Arc::new(LabelManager::new(scenario.list.label.clone())))?;
    let mut items = ComponentItems::new(&registry, LabelManager::NAME)?;
    if let Some(text) = &scenario.list.empty {
        registry.register(Arc::new(FallbackManager::new(text.clone())))?;
        items = items.with_fallback(&registry, FallbackManager::NAME)?;
    }

    let iterable = IterableReference::new(&clock, source, scenario.list.key.clone());
    let frames = Arc::new(Mutex::new(Vec::new()));
    let renderer = ListRenderer {
        block: ListBlock::new(iterable, items),
        frames: frames.clone(),
    };

    let queue = BatchQueue::shared();
    let scheduler = Scheduler::with_batch_signal(clock.clone(), config.scheduler.clone(), queue.clone());
    scheduler.register_root(Root::new(fresh_node(), renderer))?;

    let mut reports = Vec::with_capacity(scenario.steps.len() + 1);
    let mut metrics = None;
    queue.run(|| ()).context("Initial render failed")?;
    let rendered = std::mem::take(&mut *frames.lock());
    reports.push(StepReport::new(0, 0, 0, rendered, &mut metrics));

    for (index, step) in scenario.steps.iter().enumerate() {
        let number = index + 1;
        queue.begin()?;
        let applied = step.apply(&state, &clock);
        queue
            .end()
            .with_context(|| format!("Rendering step {number} failed"))?;
        let dirtied = applied.with_context(|| format!("Step {number} failed"))?;
        let rendered = std::mem::take(&mut *frames.lock());
        debug!(step = number, dirtied, frames = rendered.len(), "step flushed");
        reports.push(StepReport::new(number, step.len(), dirtied, rendered, &mut metrics));
    }

    scheduler.shutdown()?;
    info!(steps = scenario.steps.len(), revision = %clock.value(), "scenario complete");
    Ok(reports)
}

/// Human-readable report: the diffs of each step, then what it left on screen
pub fn format_reports(reports: &[StepReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let _ = writeln!(out, "# step {}", report.step);
        let diffs: Vec<&DiffSummary> = report.frames.iter().filter_map(|f| f.diff.as_ref()).collect();
        if diffs.is_empty() {
            out.push_str("[unchanged]\n");
        }
        for diff in diffs {
            let _ = writeln!(out, "[{diff}]");
        }

        match report.frames.last() {
            None => out.push_str("  (no render)\n"),
            Some(frame) => {
                for row in &frame.rows {
                    let _ = writeln!(out, "  - {row}");
                }
                if let Some(fallback) = &frame.fallback {
                    let _ = writeln!(out, "  ~ {fallback}");
                }
            }
        }
    }
    out
}

pub fn run_scenario(config_path: Option<&Path>, scenario_path: &Path, json: bool) -> Result<()> {
    let config = LumenConfig::load(config_path).context("Failed to load configuration")?;
    let scenario = Scenario::from_file(scenario_path)?;
    let reports = execute(&scenario, &config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print!("{}", format_reports(&reports));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TODOS: &str = r#"
state:
  todos:
    - { id: 1, title: Write }
    - { id: 2, title: Test }
list:
  path: todos
  key: id
  label: title
  empty: Nothing to do
steps:
  - { op: swap, path: todos, a: 0, b: 1 }
  - { op: push, path: todos, value: { id: 3, title: Ship } }
  - - { op: remove, path: todos, index: 0 }
    - { op: remove, path: todos, index: 0 }
    - { op: remove, path: todos, index: 0 }
"#;

    fn run(yaml: &str) -> Vec<StepReport> {
        let scenario = Scenario::from_yaml_str(yaml).unwrap();
        execute(&scenario, &LumenConfig::default()).unwrap()
    }

    #[test]
    fn test_todo_scenario_report() {
        let reports = run(TODOS);
        insta::assert_snapshot!(format_reports(&reports).trim_end(), @r"
        # step 0
        [+2 =0 ~0 -0]
          - Write
          - Test
        # step 1
        [+0 =1 ~1 -0]
          - Test
          - Write
        # step 2
        [+1 =2 ~0 -0]
          - Test
          - Write
          - Ship
        # step 3
        [+0 =0 ~0 -3]
          ~ Nothing to do
        ");
    }

    #[test]
    fn test_step_reports_count_mutations() {
        let reports = run(TODOS);
        assert_eq!(reports.len(), 4);
        assert_eq!(reports[0].mutations, 0);
        assert_eq!(reports[3].mutations, 3);
        assert_eq!(reports[3].dirtied, 3);
        assert!(reports.iter().all(|r| !r.frames.is_empty()));
    }

    #[test]
    fn test_label_change_rerenders_without_rediff() {
        let reports = run(
            r#"
state: { items: [ { name: a }, { name: b } ] }
list: { path: items, label: name }
steps:
  - { op: set, path: items.1.name, value: c }
"#,
        );
        let last = reports[1].frames.last().unwrap();
        assert_eq!(last.rows, vec!["a", "c"]);
        assert!(reports[1].frames.iter().all(|f| f.diff.is_none()));
    }

    #[test]
    fn test_step_metrics_count_iterable_reads() {
        let reports = run(TODOS);
        let initial = reports[0].iterable.unwrap();
        assert_eq!(initial.name, "iterable");
        assert_eq!(initial.executions, 1);

        // Two passes, one re-diff: the second pass finds the iterable fresh
        let swap = reports[1].iterable.unwrap();
        assert_eq!(reports[1].frames.len(), 2);
        assert_eq!(swap.executions, 1);
    }

    #[test]
    fn test_noop_step_renders_nothing() {
        let reports = run(
            r#"
state: { items: [1, 2] }
list: { path: items }
steps:
  - { op: set, path: items.0, value: 1 }
"#,
        );
        assert_eq!(reports[1].dirtied, 0);
        assert!(reports[1].frames.is_empty());
        assert!(reports[1].iterable.is_none());
        assert!(format_reports(&reports).contains("(no render)"));
    }

    #[test]
    fn test_failed_step_is_reported() {
        let scenario = Scenario::from_yaml_str(
            "state: { items: [] }\nlist: { path: items }\nsteps:\n  - { op: remove, path: items, index: 4 }\n",
        )
        .unwrap();
        let err = execute(&scenario, &LumenConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Step 1 failed"));
    }
}
