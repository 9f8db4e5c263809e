//! The concurrent plan scheduler: runs independent plans in parallel (up to
//! a concurrency limit) while respecting `dependency` edges between them,
//! and the per-operation [`executor::Executor`] each worker uses to reconcile
//! one operation at a time within a plan.

pub mod executor;

use executor::Executor;
use polyester_core::Plan;
use polyester_operators::OpContext;
use polyester_result::{ApplyResult, PlanResult};
use polyester_state::StateStore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct SchedulerOpts {
    pub concurrency: usize,
    pub force: bool,
    pub dry_run: bool,
}

impl Default for SchedulerOpts {
    fn default() -> Self {
        Self {
            concurrency: num_cpus_fallback(),
            force: false,
            dry_run: false,
        }
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Runs every plan in `plans` to completion, honoring `depends_on` edges:
/// a plan only starts once every plan it depends on has finished. Plans
/// with no outstanding dependency run concurrently, up to
/// `opts.concurrency` at a time. Returns once every plan has produced a
/// result, in the order plans became ready (not necessarily `plans`'
/// input order).
pub async fn run(
    plans: Vec<Plan>,
    ctx: Arc<OpContext>,
    store: Arc<StateStore>,
    opts: SchedulerOpts,
    cancel: CancellationToken,
) -> ApplyResult {
    let concurrency = opts.concurrency.max(1);
    let force = opts.force;
    let dry_run = opts.dry_run;

    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    let mut by_name: HashMap<String, Plan> = HashMap::new();

    for plan in plans {
        in_degree.entry(plan.name.clone()).or_insert(0);
        for dep in &plan.depends_on {
            *in_degree.entry(plan.name.clone()).or_insert(0) += 1;
            dependents.entry(dep.clone()).or_default().push(plan.name.clone());
        }
        by_name.insert(plan.name.clone(), plan);
    }

    let mut ready: VecDeque<String> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(name, _)| name.clone())
        .collect();

    let mut results = Vec::with_capacity(by_name.len());
    let mut in_flight: JoinSet<PlanResult> = JoinSet::new();
    let mut remaining = by_name.len();

    while remaining > 0 {
        if cancel.is_cancelled() {
            break;
        }

        while in_flight.len() < concurrency {
            let Some(name) = ready.pop_front() else { break };
            let Some(plan) = by_name.remove(&name) else { continue };
            let ctx = Arc::clone(&ctx);
            let store = Arc::clone(&store);
            in_flight.spawn_blocking(move || run_plan(plan, &ctx, &store, force, dry_run));
        }

        let Some(joined) = in_flight.join_next().await else {
            break;
        };
        let plan_result = match joined {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("scheduler worker panicked: {e}");
                continue;
            }
        };

        remaining -= 1;
        let finished_name = plan_result.plan.clone();
        if let Some(deps) = dependents.get(&finished_name) {
            for dependent in deps {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.push_back(dependent.clone());
                    }
                }
            }
        }
        results.push(plan_result);
    }

    ApplyResult { plans: results }
}

fn run_plan(plan: Plan, ctx: &OpContext, store: &StateStore, force: bool, dry_run: bool) -> PlanResult {
    let executor = Executor {
        store,
        force,
        dry_run,
    };
    let subplan = (plan.name != polyester_core::plan::MAIN_PLAN).then_some(plan.name.as_str());
    let plan_ctx = ctx.for_subplan(subplan);

    // Dirtiness accumulates within a plan: once one operation is judged
    // dirty, every operation after it re-runs too, since its inputs may
    // depend on an effect the earlier operation just produced.
    let mut prior_dirty = false;
    let mut operations = Vec::new();
    for op in plan.real_ops() {
        let result = executor.execute(op, &plan_ctx, prior_dirty);
        prior_dirty |= result.dirty;
        operations.push(result);
    }
    PlanResult {
        plan: plan.name,
        operations,
    }
}

/// All plan names reachable from `roots` is not needed by the scheduler
/// itself (resolution already flattens the graph before scheduling), but
/// this helper is kept for callers that want to sanity-check a plan set
/// has no dangling dependency reference before calling `run`.
pub fn missing_dependencies(plans: &[Plan]) -> Vec<(String, String)> {
    let names: HashSet<&str> = plans.iter().map(|p| p.name.as_str()).collect();
    let mut missing = Vec::new();
    for plan in plans {
        for dep in &plan.depends_on {
            if !names.contains(dep.as_str()) {
                missing.push((plan.name.clone(), dep.clone()));
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyester_core::OperationRecord;
    use tempfile::tempdir;

    fn plan(name: &str, deps: &[&str], ops: Vec<OperationRecord>) -> Plan {
        Plan {
            name: name.to_string(),
            ops,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            sub_plans: Vec::new(),
        }
    }

    #[tokio::test]
    async fn independent_plans_all_complete() {
        let state_dir = tempdir().unwrap();
        let store = Arc::new(StateStore::new(state_dir.path()));
        let host = tempdir().unwrap();
        let plandir = tempdir().unwrap();
        let ctx = Arc::new(OpContext::new(host.path(), plandir.path()));

        let plans = vec![
            plan("a", &[], vec![OperationRecord::new("noop", serde_json::json!({}))]),
            plan("b", &[], vec![OperationRecord::new("noop", serde_json::json!({}))]),
        ];

        let result = run(plans, ctx, store, SchedulerOpts::default(), CancellationToken::new()).await;
        assert_eq!(result.plans.len(), 2);
        assert!(!result.any_failed());
    }

    #[tokio::test]
    async fn dependent_plan_runs_after_its_dependency() {
        let state_dir = tempdir().unwrap();
        let store = Arc::new(StateStore::new(state_dir.path()));
        let host = tempdir().unwrap();
        let plandir = tempdir().unwrap();
        let ctx = Arc::new(OpContext::new(host.path(), plandir.path()));

        let plans = vec![
            plan("app", &["db"], vec![OperationRecord::new("noop", serde_json::json!({}))]),
            plan("db", &[], vec![OperationRecord::new("noop", serde_json::json!({}))]),
        ];

        let result = run(plans, ctx, store, SchedulerOpts::default(), CancellationToken::new()).await;
        let db_idx = result.plans.iter().position(|p| p.plan == "db").unwrap();
        let app_idx = result.plans.iter().position(|p| p.plan == "app").unwrap();
        assert!(db_idx < app_idx);
    }

    #[test]
    fn missing_dependencies_are_reported() {
        let plans = vec![plan("a", &["ghost"], vec![])];
        assert_eq!(missing_dependencies(&plans), vec![("a".to_string(), "ghost".to_string())]);
    }
}
