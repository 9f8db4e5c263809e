//! Apply result types: one [`OperationResult`] per executed operation,
//! rolled up into a [`PlanResult`] per plan and a top-level [`Result`] for
//! the whole apply, plus a human-readable text summary renderer.

use chrono::{DateTime, Utc};
use polyester_core::State;
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// `get_state` reported no drift; `run` was not called.
    Unchanged,
    /// `run` executed and state changed as a result.
    Changed,
    /// The operation failed; see `error`.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub op_name: String,
    pub plan: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// State loaded from the store before this operation ran (empty if
    /// this is the first time it's been seen).
    pub prev: State,
    /// State observed by the first `get_state` call, before `run`.
    pub current: State,
    /// State observed after `run` (equal to `current` when `run` was
    /// skipped: unchanged, dry-run, or failed before executing).
    pub final_state: State,
    /// Whether this operation was judged dirty and should propagate
    /// dirtiness to the operations after it in the same plan.
    pub dirty: bool,
    /// Whether `prev.source` differed from the desired-or-current source.
    pub changed: bool,
    /// Whether `prev.source` was empty (first run for this cache key).
    pub prev_empty: bool,
    /// Whether `run` was actually invoked (false for unchanged, dry-run,
    /// and build/get_state failures).
    pub executed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OperationResult {
    pub fn changed(&self) -> bool {
        matches!(self.outcome, Outcome::Changed)
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlanResult {
    pub plan: String,
    pub operations: Vec<OperationResult>,
}

impl PlanResult {
    pub fn any_changed(&self) -> bool {
        self.operations.iter().any(OperationResult::changed)
    }

    pub fn any_failed(&self) -> bool {
        self.operations.iter().any(OperationResult::failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApplyResult {
    pub plans: Vec<PlanResult>,
}

impl ApplyResult {
    pub fn any_changed(&self) -> bool {
        self.plans.iter().any(PlanResult::any_changed)
    }

    pub fn any_failed(&self) -> bool {
        self.plans.iter().any(PlanResult::any_failed)
    }

    pub fn changed_count(&self) -> usize {
        self.plans
            .iter()
            .flat_map(|p| &p.operations)
            .filter(|o| o.changed())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.plans
            .iter()
            .flat_map(|p| &p.operations)
            .filter(|o| o.failed())
            .count()
    }

    /// Renders a `terraform plan`-style summary: one line per operation,
    /// grouped by plan, with a final changed/failed/unchanged tally.
    pub fn text_summary(&self) -> String {
        let mut out = String::new();
        for plan in &self.plans {
            out.push_str(&format!("plan {}\n", plan.plan));
            for op in &plan.operations {
                let marker = match op.outcome {
                    Outcome::Unchanged => " ",
                    Outcome::Changed => "~",
                    Outcome::Failed => "!",
                };
                out.push_str(&format!("  {marker} {}", op.op_name));
                if let Some(err) = &op.error {
                    out.push_str(&format!(" ({err})"));
                }
                out.push('\n');
            }
        }
        out.push_str(&format!(
            "\n{} changed, {} failed, {} total\n",
            self.changed_count(),
            self.failed_count(),
            self.plans.iter().map(|p| p.operations.len()).sum::<usize>()
        ));
        out
    }

    /// Renders the state-changes report: a column table (plan, operation,
    /// whether the prior state was empty, whether prev→current changed,
    /// whether prev→final changed) over every changed operation, followed
    /// by a character-level diff of each one's prior vs current state.
    /// Plans with no changed operation are omitted entirely.
    pub fn state_changes_report(&self) -> String {
        let changed_ops: Vec<(&str, &OperationResult)> = self
            .plans
            .iter()
            .flat_map(|p| p.operations.iter().map(move |op| (p.plan.as_str(), op)))
            .filter(|(_, op)| op.changed())
            .collect();

        if changed_ops.is_empty() {
            return String::new();
        }

        let changed_plan_count = self
            .plans
            .iter()
            .filter(|p| p.operations.iter().any(OperationResult::changed))
            .count();

        let mut out = format!("state changes for {changed_plan_count} plan(s):\n");
        out.push_str(&render_table(&changed_ops));

        for (plan, op) in &changed_ops {
            out.push_str(&format!("\n{plan} {} -> state change:\n", op.op_name));
            out.push_str(&diff_states(&op.prev, &op.current));
        }
        out
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Aligned, whitespace-padded columns: PLAN, OPERATION, EMPTY,
/// PREV->CURR, PREV->FINAL.
fn render_table(rows: &[(&str, &OperationResult)]) -> String {
    let headers = ["PLAN", "OPERATION", "EMPTY", "PREV->CURR", "PREV->FINAL"];
    let cells: Vec<[String; 5]> = rows
        .iter()
        .map(|(plan, op)| {
            [
                plan.to_string(),
                op.op_name.clone(),
                bool_str(op.prev_empty).to_string(),
                bool_str(op.prev.source().changed(&op.current.source())).to_string(),
                bool_str(op.prev.source().changed(&op.final_state.source())).to_string(),
            ]
        })
        .collect();

    let mut widths: [usize; 5] = [0; 5];
    for (i, h) in headers.iter().enumerate() {
        widths[i] = h.len();
    }
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    for (i, h) in headers.iter().enumerate() {
        out.push_str(&format!("{:<width$}  ", h, width = widths[i]));
    }
    out.push('\n');
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            out.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
        }
        out.push('\n');
    }
    out
}

/// A unified-style `+`/`-`/` ` diff of two states' pretty-printed entries.
fn diff_states(prev: &State, current: &State) -> String {
    let before = serde_json::to_string_pretty(&prev.entries).unwrap_or_default();
    let after = serde_json::to_string_pretty(&current.entries).unwrap_or_default();
    let diff = TextDiff::from_lines(&before, &after);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        out.push_str(&format!("{sign}{change}"));
    }
    out
}
