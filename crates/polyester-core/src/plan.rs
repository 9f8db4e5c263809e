//! The plan graph: named groups of operations, with `dependency` markers
//! between them, resolved into an execution order by topological sort.

use crate::operation::OperationRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const MAIN_PLAN: &str = "main";

/// A named, ordered group of operations, as declared by a `plan` block in a
/// manifest's shell script (or the implicit top-level `main` plan).
/// Serialisable so `polyester apply --plan-file` can load a pre-compiled
/// plan set without re-running the manifest's shell scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub ops: Vec<OperationRecord>,
    /// Names of plans that must run to completion before this one starts,
    /// as declared by `dependency` markers within it.
    pub depends_on: Vec<String>,
    /// Names of plans declared with a `plan` marker inside this one, run
    /// transitively as part of resolving this plan rather than scheduled
    /// as independent, depended-upon units.
    pub sub_plans: Vec<String>,
}

impl Plan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ops: Vec::new(),
            depends_on: Vec::new(),
            sub_plans: Vec::new(),
        }
    }

    /// Operations with the `plan`/`dependency` marker entries stripped —
    /// the ones the scheduler actually executes.
    pub fn real_ops(&self) -> Vec<&OperationRecord> {
        self.ops.iter().filter(|op| !op.is_marker()).collect()
    }

    pub fn text_summary(&self) -> String {
        let mut out = format!("plan {} ({} ops)\n", self.name, self.real_ops().len());
        for op in self.real_ops() {
            out.push_str(&format!("  - {}\n", op.name));
        }
        out
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlanError {
    #[error("plan {0:?} depends on unknown plan {1:?}")]
    UnknownDependency(String, String),
    #[error("circular plan dependency: {0}")]
    Circular(String),
}

impl polyester_error::Categorized for PlanError {
    fn category(&self) -> polyester_error::ErrorCategory {
        polyester_error::ErrorCategory::User
    }
}

/// Resolves plans into a valid execution order: a topological sort over
/// `depends_on` edges (Kahn's algorithm), with the `main` plan always moved
/// to the tail regardless of where Kahn's algorithm would otherwise place
/// it, since `main` implicitly depends on everything declared above it in
/// the manifest.
pub fn resolve_order(plans: &[Plan]) -> Result<Vec<String>, PlanError> {
    let by_name: HashMap<&str, &Plan> = plans.iter().map(|p| (p.name.as_str(), p)).collect();

    for plan in plans {
        for dep in &plan.depends_on {
            if !by_name.contains_key(dep.as_str()) {
                return Err(PlanError::UnknownDependency(plan.name.clone(), dep.clone()));
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> = plans.iter().map(|p| (p.name.as_str(), 0)).collect();
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for plan in plans {
        for dep in &plan.depends_on {
            edges.entry(dep.as_str()).or_default().push(plan.name.as_str());
            *in_degree.get_mut(plan.name.as_str()).unwrap() += 1;
        }
    }

    let mut ready: Vec<&str> = plans
        .iter()
        .map(|p| p.name.as_str())
        .filter(|name| *name != MAIN_PLAN && in_degree[name] == 0)
        .collect();
    ready.sort_unstable();

    let mut order = Vec::with_capacity(plans.len());
    let mut visited: HashSet<&str> = HashSet::new();

    while let Some(name) = ready.pop() {
        if !visited.insert(name) {
            continue;
        }
        order.push(name.to_string());
        if let Some(next) = edges.get(name) {
            let mut newly_ready = Vec::new();
            for &dependent in next {
                if dependent == MAIN_PLAN {
                    continue;
                }
                let deg = in_degree.get_mut(dependent).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(dependent);
                }
            }
            newly_ready.sort_unstable();
            ready.extend(newly_ready);
        }
    }

    let non_main: Vec<&Plan> = plans.iter().filter(|p| p.name != MAIN_PLAN).collect();
    if order.len() != non_main.len() {
        let stuck: Vec<&str> = non_main
            .iter()
            .map(|p| p.name.as_str())
            .filter(|n| !visited.contains(n))
            .collect();
        return Err(PlanError::Circular(stuck.join(", ")));
    }

    if by_name.contains_key(MAIN_PLAN) {
        order.push(MAIN_PLAN.to_string());
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(name: &str, deps: &[&str]) -> Plan {
        Plan {
            name: name.to_string(),
            ops: Vec::new(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            sub_plans: Vec::new(),
        }
    }

    #[test]
    fn independent_plans_sort_by_name() {
        let plans = vec![plan("b", &[]), plan("a", &[])];
        let order = resolve_order(&plans).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn dependency_runs_before_dependent() {
        let plans = vec![plan("app", &["db"]), plan("db", &[])];
        let order = resolve_order(&plans).unwrap();
        assert_eq!(order, vec!["db", "app"]);
    }

    #[test]
    fn main_always_runs_last() {
        let plans = vec![plan(MAIN_PLAN, &[]), plan("setup", &[])];
        let order = resolve_order(&plans).unwrap();
        assert_eq!(order, vec!["setup", MAIN_PLAN]);
    }

    #[test]
    fn circular_dependency_is_rejected() {
        let plans = vec![plan("a", &["b"]), plan("b", &["a"])];
        let err = resolve_order(&plans).unwrap_err();
        assert!(matches!(err, PlanError::Circular(_)));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let plans = vec![plan("a", &["ghost"])];
        let err = resolve_order(&plans).unwrap_err();
        assert_eq!(err, PlanError::UnknownDependency("a".to_string(), "ghost".to_string()));
    }

    #[test]
    fn real_ops_strips_markers() {
        let mut p = Plan::new("x");
        p.ops.push(OperationRecord::new("plan", serde_json::json!({})));
        p.ops.push(OperationRecord::new("touch", serde_json::json!({"path": "/a"})));
        assert_eq!(p.real_ops().len(), 1);
    }
}
