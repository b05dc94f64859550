//! Execution engine - applies a plan in dependency order
//!
//! Every step has prerequisites: a create, update or noop waits for the steps
//! of its target dependencies, a delete waits for the steps of the entries that
//! depended on it in the previous graph. Steps whose prerequisites are all done
//! run concurrently on the calling task, launched in plan order. A failed step
//! skips everything that waits on it, directly or transitively; unrelated
//! branches carry on.
//!
//! Step futures only return their outcome. The scheduling loop is the single
//! writer of the output graph, the error list and the progress callback.

use crate::context::{NoProgress, ProgressCallback, StepContext};
use crate::entry::{Entry, Graph};
use crate::error::{PlanError, StepError};
use crate::handler::Handler;
use crate::hydrate::HydratedGraph;
use crate::planner::{Plan, Step, hydrate_both, plan};
use crate::types::{Action, ApplyOptions, ApplySummary, StepOutcome, StepStatus};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of an apply pass
#[derive(Debug, Default)]
pub struct ApplyResult {
    /// Merged graph to persist as the next previous graph
    pub result: Graph,
    /// Per-entry failures, in completion order
    pub errors: Vec<StepError>,
    /// Terminal status of every step, in completion order
    pub outcomes: Vec<StepOutcome>,
}

impl ApplyResult {
    pub fn summary(&self) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for outcome in &self.outcomes {
            summary.add_status(&outcome.status);
        }
        summary
    }

    /// No step failed or was skipped
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.outcomes.iter().all(|o| o.status.is_success())
    }

    pub fn outcome(&self, entry_id: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.entry_id == entry_id)
    }
}

/// Plan and apply in one go
pub async fn deploy(
    target: Option<&Graph>,
    previous: Option<&Graph>,
    options: &ApplyOptions<'_>,
) -> Result<ApplyResult, PlanError> {
    let plan = plan(target, previous, &options.plan_options())?;
    apply(&plan, target, previous, options).await
}

/// Apply a plan without progress reporting
pub async fn apply(
    plan: &Plan,
    target: Option<&Graph>,
    previous: Option<&Graph>,
    options: &ApplyOptions<'_>,
) -> Result<ApplyResult, PlanError> {
    apply_with_progress(plan, target, previous, options, &mut NoProgress).await
}

/// Apply a plan, reporting progress to `progress`
///
/// Only structural and configuration problems are returned as `Err`, before
/// any handler runs. Handler failures end up in [`ApplyResult::errors`].
pub async fn apply_with_progress<P: ProgressCallback>(
    plan: &Plan,
    target: Option<&Graph>,
    previous: Option<&Graph>,
    options: &ApplyOptions<'_>,
    progress: &mut P,
) -> Result<ApplyResult, PlanError> {
    let (target_graph, previous_graph) = hydrate_both(target, previous)?;

    let mut handlers = Vec::with_capacity(plan.len());
    for step in &plan.steps {
        let entry = step.candidate.as_ref().or(step.current.as_ref());
        match entry {
            Some(entry) => handlers.push(options.handlers.require(entry)?),
            None => {
                return Err(PlanError::HandlerNotFound {
                    entry_type: String::new(),
                    entry_id: step.entry_id.clone(),
                });
            }
        }
    }

    let mut schedule = Schedule::new(plan, &target_graph, &previous_graph);
    let mut pass = Pass {
        output: previous.cloned().unwrap_or_default(),
        errors: Vec::new(),
        outcomes: Vec::new(),
    };
    let limit = options.max_concurrency.unwrap_or(usize::MAX);

    progress.on_apply_start(plan.len());
    log::debug!(
        "applying {} steps ({} changes, concurrency {})",
        plan.len(),
        plan.changes().count(),
        options
            .max_concurrency
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
    );

    let mut in_flight = FuturesUnordered::new();
    loop {
        while in_flight.len() < limit {
            let Some(index) = schedule.next_ready() else {
                break;
            };
            let step = &plan.steps[index];

            if options.cancel.is_cancelled() {
                let outcome = pass.skip(step, "apply cancelled".to_string());
                progress.on_step_complete(&outcome);
                let blocked = schedule.finish(index, false);
                pass.skip_blocked(plan, blocked, progress);
                continue;
            }

            let ctx = pass.context_for(step, &target_graph, options.cancel.clone());
            progress.on_step_start(step);
            if step.action.is_change() || options.force {
                log::info!("{} {} {}", step.action, step.entry_type(), step.entry_id);
            }

            let handler = handlers[index];
            let timeout = options.step_timeout;
            let force = options.force;
            let cancel = options.cancel.clone();
            in_flight.push(async move {
                let outcome = run_step(handler, step, &ctx, force, timeout, &cancel).await;
                (index, outcome)
            });
        }

        let Some((index, outcome)) = in_flight.next().await else {
            break;
        };
        let step = &plan.steps[index];
        let succeeded = outcome.is_ok();
        let reported = pass.record(step, outcome);
        progress.on_step_complete(&reported);

        let blocked = schedule.finish(index, succeeded);
        pass.skip_blocked(plan, blocked, progress);
    }

    let result = ApplyResult {
        result: pass.output,
        errors: pass.errors,
        outcomes: pass.outcomes,
    };
    let summary = result.summary();
    progress.on_apply_complete(&summary);
    log::debug!(
        "apply finished: {} changes, {} failed, {} skipped",
        summary.total_changes(),
        summary.failed,
        summary.skipped
    );
    Ok(result)
}

/// What a successful step did
#[derive(Debug)]
enum Applied {
    Created(Value),
    Updated(Value),
    Replaced(Value),
    Deleted,
    Unchanged,
}

/// Invoke the handler method for one step
///
/// With `force`, noop steps of a plan built without it still go through
/// `update` (or `replace`).
async fn run_step(
    handler: &dyn Handler,
    step: &Step,
    ctx: &StepContext,
    force: bool,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<Applied, StepError> {
    let id = step.entry_id.as_str();
    let action = match (step.action, &step.candidate, &step.current) {
        (Action::Noop, Some(_), Some(_)) if force => Action::Update,
        (action, _, _) => action,
    };
    match (action, &step.candidate, &step.current) {
        (Action::Noop, _, _) => Ok(Applied::Unchanged),
        (Action::Create, Some(candidate), _) => {
            let fut = handler.create(candidate, ctx);
            guarded(fut, id, Action::Create, timeout, cancel)
                .await
                .map(Applied::Created)
        }
        (Action::Update, Some(candidate), Some(current))
            if candidate.entry_type == current.entry_type
                && handler.can_update_in_place(candidate, current) =>
        {
            let fut = handler.update(candidate, current, ctx);
            guarded(fut, id, Action::Update, timeout, cancel)
                .await
                .map(Applied::Updated)
        }
        (Action::Update | Action::Replace, Some(candidate), Some(current)) => {
            log::debug!("{id}: in-place update refused, replacing");
            let fut = handler.replace(candidate, current, ctx);
            guarded(fut, id, Action::Replace, timeout, cancel)
                .await
                .map(Applied::Replaced)
        }
        (Action::Delete, _, Some(current)) => {
            let fut = handler.delete(current, ctx);
            guarded(fut, id, Action::Delete, timeout, cancel)
                .await
                .map(|()| Applied::Deleted)
        }
        (action, _, _) => Err(StepError::from_handler(
            id,
            action,
            anyhow::anyhow!("step is missing the entry it acts on"),
        )),
    }
}

/// Run a handler future under the step timeout and the pass cancellation
async fn guarded<T>(
    fut: impl Future<Output = anyhow::Result<T>>,
    entry_id: &str,
    action: Action,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<T, StepError> {
    let limited = async {
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(StepError::Timeout {
                        entry_id: entry_id.to_string(),
                        action,
                        timeout: limit,
                    });
                }
            },
            None => fut.await,
        };
        outcome.map_err(|e| StepError::from_handler(entry_id, action, e))
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StepError::Cancelled {
            entry_id: entry_id.to_string(),
            action,
        }),
        outcome = limited => outcome,
    }
}

/// Prerequisite bookkeeping over plan indices
struct Schedule {
    /// Unfinished prerequisites per step
    waiting: Vec<usize>,
    /// Steps that wait on each step
    unlocks: Vec<Vec<usize>>,
    done: Vec<bool>,
    /// Steps with nothing left to wait for, in plan order
    ready: BTreeSet<usize>,
}

impl Schedule {
    fn new(plan: &Plan, target: &HydratedGraph, previous: &HydratedGraph) -> Self {
        let index: HashMap<&str, usize> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.entry_id.as_str(), i))
            .collect();

        let mut waiting = vec![0; plan.len()];
        let mut unlocks = vec![Vec::new(); plan.len()];
        for (i, step) in plan.steps.iter().enumerate() {
            let prerequisites: &[String] = match step.action {
                Action::Delete => previous.get(&step.entry_id).map_or(&[], |n| n.dependents()),
                _ => target.get(&step.entry_id).map_or(&[], |n| n.dependencies()),
            };
            let mut seen = BTreeSet::new();
            for id in prerequisites {
                if let Some(&p) = index.get(id.as_str())
                    && p != i
                    && seen.insert(p)
                {
                    waiting[i] += 1;
                    unlocks[p].push(i);
                }
            }
        }

        let ready = (0..plan.len()).filter(|&i| waiting[i] == 0).collect();
        Self {
            waiting,
            unlocks,
            done: vec![false; plan.len()],
            ready,
        }
    }

    fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop_first()
    }

    /// Mark a step terminal
    ///
    /// On failure every step waiting on it, directly or transitively, is marked
    /// done too and returned as `(skipped, blocking)` pairs.
    fn finish(&mut self, index: usize, succeeded: bool) -> Vec<(usize, usize)> {
        self.done[index] = true;
        let mut skipped = Vec::new();
        let mut failed = vec![index];

        for &next in &self.unlocks[index] {
            if self.done[next] {
                continue;
            }
            self.waiting[next] -= 1;
            if succeeded && self.waiting[next] == 0 {
                self.ready.insert(next);
            }
        }
        if succeeded {
            return skipped;
        }

        while let Some(blocking) = failed.pop() {
            for &next in &self.unlocks[blocking] {
                if self.done[next] {
                    continue;
                }
                self.done[next] = true;
                self.ready.remove(&next);
                skipped.push((next, blocking));
                failed.push(next);
            }
        }
        skipped
    }
}

/// Output state owned by the scheduling loop
struct Pass {
    output: Graph,
    errors: Vec<StepError>,
    outcomes: Vec<StepOutcome>,
}

impl Pass {
    /// Context exposing the applied entries of the step's dependencies
    fn context_for(&self, step: &Step, target: &HydratedGraph, cancel: CancellationToken) -> StepContext {
        let dependencies: &[String] = match (&step.candidate, &step.current) {
            (Some(_), _) => target.get(&step.entry_id).map_or(&[], |n| n.dependencies()),
            (None, Some(current)) => &current.dependencies,
            (None, None) => &[],
        };
        let applied: Vec<Entry> = dependencies
            .iter()
            .filter_map(|id| self.output.get(id).cloned())
            .collect();
        StepContext::new(step.entry_id.clone(), step.action, applied, cancel)
    }

    /// Merge a finished step into the output graph
    fn record(&mut self, step: &Step, outcome: Result<Applied, StepError>) -> StepOutcome {
        let with_result = |result: Option<Value>| {
            step.candidate
                .clone()
                .map(|candidate| candidate.with_result(result))
        };

        let status = match outcome {
            Ok(applied) => {
                let (status, merged) = match applied {
                    Applied::Created(result) => (StepStatus::Created, with_result(Some(result))),
                    Applied::Updated(result) => (StepStatus::Updated, with_result(Some(result))),
                    Applied::Replaced(result) => (StepStatus::Replaced, with_result(Some(result))),
                    Applied::Unchanged => (
                        StepStatus::Unchanged,
                        with_result(step.current.as_ref().and_then(|c| c.result.clone())),
                    ),
                    Applied::Deleted => {
                        self.output.remove(&step.entry_id);
                        (StepStatus::Deleted, None)
                    }
                };
                if let Some(entry) = merged {
                    self.output.insert(entry);
                }
                if status.is_change() {
                    log::info!("{} {} done", step.action, step.entry_id);
                }
                status
            }
            Err(error) => {
                log::warn!("{error}");
                let status = StepStatus::Failed {
                    error: error.to_string(),
                };
                self.errors.push(error);
                status
            }
        };

        self.push_outcome(step, status)
    }

    fn skip(&mut self, step: &Step, reason: String) -> StepOutcome {
        log::debug!("skipping {}: {}", step.entry_id, reason);
        self.push_outcome(step, StepStatus::Skipped { reason })
    }

    /// Skip the steps blocked by a failed or skipped prerequisite
    fn skip_blocked<P: ProgressCallback>(&mut self, plan: &Plan, blocked: Vec<(usize, usize)>, progress: &mut P) {
        for (skipped, blocking) in blocked {
            let reason = format!("dependency {} did not complete", plan.steps[blocking].entry_id);
            let outcome = self.skip(&plan.steps[skipped], reason);
            progress.on_step_complete(&outcome);
        }
    }

    fn push_outcome(&mut self, step: &Step, status: StepStatus) -> StepOutcome {
        let outcome = StepOutcome {
            entry_id: step.entry_id.clone(),
            entry_type: step.entry_type().to_string(),
            action: step.action,
            status,
        };
        self.outcomes.push(outcome.clone());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerRegistry;
    use crate::planner::PlanOptions;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Handler recording every mutation as `action:id`
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail: HashSet<String>,
        delay: HashMap<String, Duration>,
        in_place: bool,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                in_place: true,
                ..Self::default()
            }
        }

        fn failing(mut self, id: &str) -> Self {
            self.fail.insert(id.to_string());
            self
        }

        fn slow(mut self, id: &str, delay: Duration) -> Self {
            self.delay.insert(id.to_string(), delay);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn run(&self, action: &str, id: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("{action}:{id}"));
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.delay.get(id) {
                tokio::time::sleep(*delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail.contains(id) {
                bail!("{action} of {id} rejected by provider");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Handler for Arc<Recorder> {
        fn can_update_in_place(&self, _candidate: &Entry, _current: &Entry) -> bool {
            self.in_place
        }

        async fn create(&self, candidate: &Entry, _ctx: &StepContext) -> Result<Value> {
            self.run("create", &candidate.entry_id).await?;
            Ok(json!({"value": 1}))
        }

        async fn update(&self, candidate: &Entry, _current: &Entry, _ctx: &StepContext) -> Result<Value> {
            self.run("update", &candidate.entry_id).await?;
            Ok(json!({"value": 2}))
        }

        async fn delete(&self, current: &Entry, _ctx: &StepContext) -> Result<()> {
            self.run("delete", &current.entry_id).await
        }
    }

    fn registry(recorder: &Arc<Recorder>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("T", Arc::clone(recorder)).unwrap();
        registry
    }

    fn entry(id: &str, deps: &[&str]) -> Entry {
        deps.iter()
            .fold(Entry::new("T", id, json!({})), |e, d| e.depends_on(*d))
    }

    fn graph(entries: &[(&str, &[&str])]) -> Graph {
        entries.iter().map(|(id, deps)| entry(id, deps)).collect()
    }

    fn chain() -> Graph {
        graph(&[("A", &[]), ("B", &["A"]), ("C", &["B"])])
    }

    #[tokio::test]
    async fn test_single_create_carries_result() {
        let recorder = Arc::new(Recorder::new());
        let registry = registry(&recorder);
        let target = graph(&[("A", &[])]);

        let applied = deploy(Some(&target), None, &ApplyOptions::new(&registry))
            .await
            .unwrap();

        assert!(applied.errors.is_empty());
        assert_eq!(applied.result.get("A").unwrap().result, Some(json!({"value": 1})));
        assert_eq!(applied.summary().created, 1);
    }

    #[tokio::test]
    async fn test_chain_create_and_delete_order() {
        let recorder = Arc::new(Recorder::new().slow("A", Duration::from_millis(5)));
        let registry = registry(&recorder);
        let options = ApplyOptions::new(&registry);

        let created = deploy(Some(&chain()), None, &options).await.unwrap();
        assert_eq!(recorder.calls(), ["create:A", "create:B", "create:C"]);

        recorder.calls.lock().unwrap().clear();
        let deleted = deploy(None, Some(&created.result), &options).await.unwrap();
        assert_eq!(recorder.calls(), ["delete:C", "delete:B", "delete:A"]);
        assert!(deleted.result.is_empty());
        assert!(deleted.is_success());
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let recorder = Arc::new(Recorder::new().failing("A"));
        let registry = registry(&recorder);
        let target = graph(&[("A", &[]), ("B", &["A"]), ("C", &["B"]), ("D", &[])]);

        let applied = deploy(Some(&target), None, &ApplyOptions::new(&registry))
            .await
            .unwrap();

        let calls = recorder.calls();
        assert!(calls.contains(&"create:A".to_string()));
        assert!(!calls.iter().any(|c| c.ends_with(":B") || c.ends_with(":C")));

        assert_eq!(applied.errors.len(), 1);
        assert_eq!(applied.errors[0].entry_id(), "A");
        assert!(matches!(applied.errors[0], StepError::Handler { .. }));

        assert!(!applied.result.contains("A"));
        assert!(!applied.result.contains("B"));
        assert_eq!(applied.result.get("D").unwrap().result, Some(json!({"value": 1})));

        let summary = applied.summary();
        assert_eq!((summary.created, summary.failed, summary.skipped), (1, 1, 2));
        assert!(matches!(
            applied.outcome("C").unwrap().status,
            StepStatus::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_round_trip_ends_empty() {
        let recorder = Arc::new(Recorder::new());
        let registry = registry(&recorder);
        let options = ApplyOptions::new(&registry);
        let target = graph(&[("A", &[]), ("B", &["A"]), ("X", &[])]);

        let first = deploy(Some(&target), None, &options).await.unwrap();
        let second = deploy(None, Some(&first.result), &options).await.unwrap();

        assert!(second.result.is_empty());
        assert!(second.errors.is_empty());
    }

    #[tokio::test]
    async fn test_noop_keeps_previous_result() {
        let recorder = Arc::new(Recorder::new());
        let registry = registry(&recorder);
        let options = ApplyOptions::new(&registry);

        let first = deploy(Some(&chain()), None, &options).await.unwrap();
        recorder.calls.lock().unwrap().clear();
        let second = deploy(Some(&chain()), Some(&first.result), &options).await.unwrap();

        assert!(recorder.calls().is_empty());
        assert_eq!(second.result, first.result);
        assert_eq!(second.summary().unchanged, 3);
    }

    #[tokio::test]
    async fn test_force_updates_equal_entries() {
        let recorder = Arc::new(Recorder::new());
        let registry = registry(&recorder);
        let previous: Graph = [entry("A", &[]).with_result(Some(json!({"value": 1})))]
            .into_iter()
            .collect();
        let target = graph(&[("A", &[])]);

        let applied = deploy(Some(&target), Some(&previous), &ApplyOptions::new(&registry).force(true))
            .await
            .unwrap();

        assert_eq!(recorder.calls(), ["update:A"]);
        assert_eq!(applied.result.get("A").unwrap().result, Some(json!({"value": 2})));
    }

    #[tokio::test]
    async fn test_force_on_apply_updates_noop_steps() {
        let recorder = Arc::new(Recorder::new());
        let registry = registry(&recorder);
        let previous: Graph = [entry("A", &[]).with_result(Some(json!({"value": 1})))]
            .into_iter()
            .collect();
        let target = graph(&[("A", &[])]);

        let unforced = plan(Some(&target), Some(&previous), &PlanOptions::new(&registry)).unwrap();
        assert_eq!(unforced.steps[0].action, Action::Noop);

        let applied = apply(
            &unforced,
            Some(&target),
            Some(&previous),
            &ApplyOptions::new(&registry).force(true),
        )
        .await
        .unwrap();

        assert_eq!(recorder.calls(), ["update:A"]);
        assert_eq!(applied.result.get("A").unwrap().result, Some(json!({"value": 2})));
        assert_eq!(applied.summary().updated, 1);
    }

    #[tokio::test]
    async fn test_type_change_goes_through_replace() {
        let recorder = Arc::new(Recorder::new());
        let mut registry = registry(&recorder);
        registry.register("U", Arc::clone(&recorder)).unwrap();
        let previous: Graph = [Entry::new("T", "A", json!({})).with_result(Some(json!({"value": 1})))]
            .into_iter()
            .collect();
        let target: Graph = [Entry::new("U", "A", json!({}))].into_iter().collect();

        let planned = plan(Some(&target), Some(&previous), &PlanOptions::new(&registry)).unwrap();
        assert_eq!(planned.steps.len(), 1);
        assert_eq!(planned.steps[0].action, Action::Update);

        let applied = apply(&planned, Some(&target), Some(&previous), &ApplyOptions::new(&registry))
            .await
            .unwrap();

        // the old resource still has a result, so the default replace refuses
        assert!(matches!(
            &applied.errors[..],
            [StepError::ReplaceNotSupported { entry_id }] if entry_id == "A"
        ));
        assert!(recorder.calls().is_empty());
        assert_eq!(applied.result.get("A"), previous.get("A"));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_entry() {
        let recorder = Arc::new(Recorder::new().failing("A"));
        let registry = registry(&recorder);
        let before = Entry::new("T", "A", json!({"size": 1})).with_result(Some(json!({"value": 1})));
        let previous: Graph = [before.clone()].into_iter().collect();
        let target: Graph = [Entry::new("T", "A", json!({"size": 2}))].into_iter().collect();

        let applied = deploy(Some(&target), Some(&previous), &ApplyOptions::new(&registry))
            .await
            .unwrap();

        assert_eq!(applied.errors.len(), 1);
        assert_eq!(applied.errors[0].action(), Action::Update);
        assert_eq!(applied.result.get("A"), Some(&before));
    }

    #[tokio::test]
    async fn test_replace_rejection_is_isolated() {
        let recorder = Arc::new(Recorder {
            in_place: false,
            ..Recorder::default()
        });
        let registry = registry(&recorder);
        let previous: Graph = [
            Entry::new("T", "db", json!({"engine": "pg14"})).with_result(Some(json!({"value": 1}))),
            Entry::new("T", "cache", json!({})).with_result(Some(json!({"value": 1}))),
        ]
        .into_iter()
        .collect();
        let target: Graph = [
            Entry::new("T", "db", json!({"engine": "pg16"})),
            Entry::new("T", "client", json!({})).depends_on("db"),
            Entry::new("T", "cache", json!({})),
            Entry::new("T", "worker", json!({})),
        ]
        .into_iter()
        .collect();

        let applied = deploy(Some(&target), Some(&previous), &ApplyOptions::new(&registry))
            .await
            .unwrap();

        assert_eq!(applied.errors.len(), 1);
        assert!(matches!(
            &applied.errors[0],
            StepError::ReplaceNotSupported { entry_id } if entry_id == "db"
        ));
        assert_eq!(applied.result.get("db"), previous.get("db"));
        assert!(!applied.result.contains("client"));
        assert!(applied.result.contains("worker"));
        assert!(applied.result.contains("cache"));
        assert_eq!(recorder.calls(), ["create:worker"]);
    }

    #[tokio::test]
    async fn test_delete_waits_for_dependent_delete() {
        let recorder = Arc::new(Recorder::new().failing("B"));
        let registry = registry(&recorder);
        let previous = chain();
        let target = graph(&[("C", &[])]);

        let applied = deploy(Some(&target), Some(&previous), &ApplyOptions::new(&registry))
            .await
            .unwrap();

        // C drops its dependency on B first, B's delete fails, A stays
        assert_eq!(recorder.calls(), ["update:C", "delete:B"]);
        assert_eq!(applied.errors.len(), 1);
        assert!(applied.result.contains("A"));
        assert!(applied.result.contains("B"));
        assert!(applied.result.get("C").unwrap().dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_context_exposes_dependency_results() {
        struct Cluster;
        struct Client {
            seen: Mutex<Option<Value>>,
        }

        #[async_trait]
        impl Handler for Cluster {
            async fn create(&self, _candidate: &Entry, _ctx: &StepContext) -> Result<Value> {
                Ok(json!({"secret_arn": "arn:secret:1"}))
            }
            async fn update(&self, c: &Entry, _current: &Entry, ctx: &StepContext) -> Result<Value> {
                self.create(c, ctx).await
            }
            async fn delete(&self, _current: &Entry, _ctx: &StepContext) -> Result<()> {
                Ok(())
            }
        }

        #[async_trait]
        impl Handler for Arc<Client> {
            async fn create(&self, _candidate: &Entry, ctx: &StepContext) -> Result<Value> {
                let secret = ctx.single_result_of_type("cluster")?.clone();
                *self.seen.lock().unwrap() = Some(secret.clone());
                Ok(json!({"secret": secret["secret_arn"]}))
            }
            async fn update(&self, c: &Entry, _current: &Entry, ctx: &StepContext) -> Result<Value> {
                self.create(c, ctx).await
            }
            async fn delete(&self, _current: &Entry, _ctx: &StepContext) -> Result<()> {
                Ok(())
            }
        }

        let client = Arc::new(Client {
            seen: Mutex::new(None),
        });
        let mut registry = HandlerRegistry::new();
        registry.register("cluster", Cluster).unwrap();
        registry.register("client", Arc::clone(&client)).unwrap();

        let target: Graph = [
            Entry::new("cluster", "c1", json!({})),
            Entry::new("client", "db", json!({})).depends_on("c1"),
        ]
        .into_iter()
        .collect();

        let applied = deploy(Some(&target), None, &ApplyOptions::new(&registry))
            .await
            .unwrap();

        assert!(applied.errors.is_empty());
        assert_eq!(
            *client.seen.lock().unwrap(),
            Some(json!({"secret_arn": "arn:secret:1"}))
        );
        assert_eq!(
            applied.result.get("db").unwrap().result,
            Some(json!({"secret": "arn:secret:1"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout() {
        let recorder = Arc::new(Recorder::new().slow("A", Duration::from_secs(600)));
        let registry = registry(&recorder);
        let target = graph(&[("A", &[]), ("B", &["A"]), ("D", &[])]);
        let options = ApplyOptions::new(&registry).step_timeout(Duration::from_secs(5));

        let applied = deploy(Some(&target), None, &options).await.unwrap();

        assert_eq!(applied.errors.len(), 1);
        assert!(matches!(
            &applied.errors[0],
            StepError::Timeout { entry_id, timeout, .. } if entry_id == "A" && *timeout == Duration::from_secs(5)
        ));
        assert!(applied.result.contains("D"));
        assert!(!applied.result.contains("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_concurrency() {
        let target = graph(&[("A", &[]), ("B", &[]), ("C", &[])]);

        let unbounded = Arc::new(
            Recorder::new()
                .slow("A", Duration::from_millis(10))
                .slow("B", Duration::from_millis(10))
                .slow("C", Duration::from_millis(10)),
        );
        let registry_a = registry(&unbounded);
        deploy(Some(&target), None, &ApplyOptions::new(&registry_a))
            .await
            .unwrap();
        assert_eq!(unbounded.peak.load(Ordering::SeqCst), 3);

        let bounded = Arc::new(
            Recorder::new()
                .slow("A", Duration::from_millis(10))
                .slow("B", Duration::from_millis(10))
                .slow("C", Duration::from_millis(10)),
        );
        let registry_b = registry(&bounded);
        deploy(Some(&target), None, &ApplyOptions::new(&registry_b).max_concurrency(1))
            .await
            .unwrap();
        assert_eq!(bounded.peak.load(Ordering::SeqCst), 1);
        assert_eq!(bounded.calls(), ["create:A", "create:B", "create:C"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let recorder = Arc::new(Recorder::new());
        let registry = registry(&recorder);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let applied = deploy(
            Some(&chain()),
            None,
            &ApplyOptions::new(&registry).cancel_token(cancel),
        )
        .await
        .unwrap();

        assert!(recorder.calls().is_empty());
        assert!(applied.result.is_empty());
        assert_eq!(applied.summary().skipped, 3);
        assert!(!applied.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_running_steps() {
        struct Canceller;

        #[async_trait]
        impl Handler for Canceller {
            async fn create(&self, _candidate: &Entry, ctx: &StepContext) -> Result<Value> {
                ctx.cancellation().cancel();
                Ok(json!({}))
            }
            async fn update(&self, c: &Entry, _current: &Entry, ctx: &StepContext) -> Result<Value> {
                self.create(c, ctx).await
            }
            async fn delete(&self, _current: &Entry, _ctx: &StepContext) -> Result<()> {
                Ok(())
            }
        }

        let recorder = Arc::new(Recorder::new().slow("a", Duration::from_secs(60)));
        let mut registry = registry(&recorder);
        registry.register("stop", Canceller).unwrap();
        let target: Graph = [
            entry("a", &[]),
            Entry::new("stop", "x", json!({})),
            entry("y", &["x"]),
        ]
        .into_iter()
        .collect();

        let applied = deploy(Some(&target), None, &ApplyOptions::new(&registry))
            .await
            .unwrap();

        assert_eq!(applied.errors.len(), 1);
        assert!(matches!(
            &applied.errors[0],
            StepError::Cancelled { entry_id, .. } if entry_id == "a"
        ));
        assert!(applied.result.contains("x"));
        assert!(matches!(
            applied.outcome("y").unwrap().status,
            StepStatus::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_target_is_fatal() {
        let recorder = Arc::new(Recorder::new());
        let registry = registry(&recorder);
        let target = graph(&[("A", &["B"]), ("B", &["A"])]);

        let err = deploy(Some(&target), None, &ApplyOptions::new(&registry))
            .await
            .unwrap_err();

        assert!(matches!(
            err.graph_error(),
            Some(crate::error::GraphError::CycleDetected { .. })
        ));
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_replace_without_live_result_creates() {
        let recorder = Arc::new(Recorder {
            in_place: false,
            ..Recorder::default()
        });
        let registry = registry(&recorder);
        let previous: Graph = [Entry::new("T", "A", json!({"v": 1}))].into_iter().collect();
        let target: Graph = [Entry::new("T", "A", json!({"v": 2}))].into_iter().collect();

        let applied = deploy(Some(&target), Some(&previous), &ApplyOptions::new(&registry))
            .await
            .unwrap();

        assert_eq!(recorder.calls(), ["create:A"]);
        assert_eq!(applied.summary().replaced, 1);
        assert!(applied.errors.is_empty());
    }
}
