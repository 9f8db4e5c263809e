//! Per-operation reconciliation: `get_state`, compare the stored prior
//! source state against the desired-or-current source state, `run` only if
//! drifted (or `force`d, or the plan is already dirty), then `get_state`
//! again and persist it.

use chrono::Utc;
use polyester_core::{OperationRecord, State};
use polyester_operators::OpContext;
use polyester_result::{Outcome, OperationResult};
use polyester_state::StateStore;

pub struct Executor<'a> {
    pub store: &'a StateStore,
    pub force: bool,
    pub dry_run: bool,
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        Self {
            store,
            force: false,
            dry_run: false,
        }
    }

    /// Executes one operation's full reconciliation cycle. `prior_dirty` is
    /// whether an earlier operation in the same plan was already judged
    /// dirty; once true it propagates, forcing this operation (and every
    /// one after it) to run too. Never returns an `Err`: operator/state-store
    /// failures are folded into `Outcome::Failed` so a scheduler worker can
    /// keep running independent plans after one operation fails, matching
    /// the executor's "partial failure is still a result" design.
    pub fn execute(&self, record: &OperationRecord, ctx: &OpContext, prior_dirty: bool) -> OperationResult {
        let started_at = Utc::now();

        let op = match polyester_operators::build(record) {
            Ok(op) => op,
            Err(e) => return failed(record, started_at, format!("failed to build operator: {e}")),
        };

        let prev = match self.store.load(&record.name, &record.args) {
            Ok(Some(p)) => p,
            Ok(None) => State::new(),
            Err(e) => return failed(record, started_at, format!("state load failed: {e}")),
        };

        let current = match op.get_state(ctx) {
            Ok(s) => s,
            Err(e) => return failed(record, started_at, format!("get_state failed: {e}")),
        };

        // Operators that can compute their desired state without a side
        // effect (e.g. `template`, which can render in-memory) are
        // preferred over the post-run `get_state` comparison, since the
        // latter requires performing `run` just to observe it.
        let goal_source = match op.as_desired_state() {
            Some(d) => match d.desired_state(ctx) {
                Ok(s) => s.source(),
                Err(e) => return failed(record, started_at, format!("desired_state failed: {e}")),
            },
            None => current.source(),
        };

        let prev_empty = prev.source().empty();
        let changed = prev.source().changed(&goal_source);
        let dirty = self.force || prior_dirty || prev_empty || changed;

        if !dirty {
            return OperationResult {
                op_name: record.name.clone(),
                plan: record.plan.clone(),
                outcome: Outcome::Unchanged,
                error: None,
                prev,
                current: current.clone(),
                final_state: current,
                dirty: false,
                changed,
                prev_empty,
                executed: false,
                started_at,
                finished_at: Utc::now(),
            };
        }

        if self.dry_run {
            return OperationResult {
                op_name: record.name.clone(),
                plan: record.plan.clone(),
                outcome: Outcome::Changed,
                error: None,
                prev,
                current: current.clone(),
                final_state: current,
                dirty: true,
                changed,
                prev_empty,
                executed: false,
                started_at,
                finished_at: Utc::now(),
            };
        }

        if let Err(e) = op.run(ctx) {
            return failed(record, started_at, format!("run failed: {e}"));
        }

        // A `get_state` that fails here means the effect of `run` can't be
        // observed, so the new state is deliberately not persisted: the next
        // apply sees the old (pre-run) state, stays "drifted", and retries
        // `run` rather than silently believing nothing changed.
        let final_state = match op.get_state(ctx) {
            Ok(s) => s,
            Err(e) => return failed(record, started_at, format!("post-run get_state failed: {e}")),
        };

        if let Err(e) = self.store.save(&record.name, &record.args, &final_state) {
            return failed(record, started_at, format!("state save failed: {e}"));
        }

        // Ran, but the observable target subset settled back to what it was
        // before: demote back to unchanged, unless the plan was already
        // dirty coming in (in which case this op must still report dirty so
        // downstream ops keep re-running).
        let target_unchanged = !final_state.target().empty() && !final_state.target().changed(&prev.target());
        let demoted = !prior_dirty && target_unchanged;

        OperationResult {
            op_name: record.name.clone(),
            plan: record.plan.clone(),
            outcome: if demoted { Outcome::Unchanged } else { Outcome::Changed },
            error: None,
            prev,
            current,
            final_state,
            dirty: !demoted,
            changed,
            prev_empty,
            executed: true,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

fn failed(record: &OperationRecord, started_at: chrono::DateTime<Utc>, error: String) -> OperationResult {
    OperationResult {
        op_name: record.name.clone(),
        plan: record.plan.clone(),
        outcome: Outcome::Failed,
        error: Some(error),
        prev: State::new(),
        current: State::new(),
        final_state: State::new(),
        dirty: false,
        changed: false,
        prev_empty: false,
        executed: false,
        started_at,
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn noop_operation_is_always_unchanged_after_first_run() {
        let state_dir = tempdir().unwrap();
        let store = StateStore::new(state_dir.path());
        let executor = Executor::new(&store);

        let host = tempdir().unwrap();
        let plandir = tempdir().unwrap();
        let ctx = OpContext::new(host.path(), plandir.path());

        let record = OperationRecord::new("noop", serde_json::json!({}));
        let first = executor.execute(&record, &ctx, false);
        assert_eq!(first.outcome, Outcome::Changed);

        let second = executor.execute(&record, &ctx, false);
        assert_eq!(second.outcome, Outcome::Unchanged);
    }

    #[test]
    fn unknown_operator_is_a_failed_outcome_not_a_panic() {
        let state_dir = tempdir().unwrap();
        let store = StateStore::new(state_dir.path());
        let executor = Executor::new(&store);
        let host = tempdir().unwrap();
        let plandir = tempdir().unwrap();
        let ctx = OpContext::new(host.path(), plandir.path());

        let record = OperationRecord::new("does-not-exist", serde_json::json!({}));
        let result = executor.execute(&record, &ctx, false);
        assert_eq!(result.outcome, Outcome::Failed);
        assert!(result.error.is_some());
    }

    #[test]
    fn dry_run_reports_changed_without_persisting_state() {
        let state_dir = tempdir().unwrap();
        let store = StateStore::new(state_dir.path());
        let mut executor = Executor::new(&store);
        executor.dry_run = true;
        let host = tempdir().unwrap();
        let plandir = tempdir().unwrap();
        let ctx = OpContext::new(host.path(), plandir.path());

        let record = OperationRecord::new("touch", serde_json::json!({"path": "a.txt"}));
        let result = executor.execute(&record, &ctx, false);
        assert_eq!(result.outcome, Outcome::Changed);
        assert!(!host.path().join("a.txt").exists());
        assert!(store.load(&record.name, &record.args).unwrap().is_none());
    }

    #[test]
    fn prior_dirty_forces_run_even_when_unchanged() {
        let state_dir = tempdir().unwrap();
        let store = StateStore::new(state_dir.path());
        let executor = Executor::new(&store);
        let host = tempdir().unwrap();
        let plandir = tempdir().unwrap();
        let ctx = OpContext::new(host.path(), plandir.path());

        let record = OperationRecord::new("noop", serde_json::json!({}));
        let first = executor.execute(&record, &ctx, false);
        assert_eq!(first.outcome, Outcome::Changed);

        // Normally this would settle to Unchanged; an upstream dirty plan
        // forces it to run (and report dirty) again.
        let second = executor.execute(&record, &ctx, true);
        assert_eq!(second.outcome, Outcome::Changed);
        assert!(second.dirty);
    }
}
