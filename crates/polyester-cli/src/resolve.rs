//! Turns a loaded [`Manifest`] into the fully compiled, dependency-checked
//! set of [`Plan`]s the scheduler runs: compiles the root script, then
//! transitively compiles every sub-plan reachable through `plan`/
//! `dependency` markers, and validates the resulting graph is acyclic.

use polyester_compiler::{CompileError, Compiler};
use polyester_core::plan::MAIN_PLAN;
use polyester_core::{OperationRecord, Plan, PlanError};
use polyester_manifest::Manifest;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("manifest has no main script (polyester.sh)")]
    NoMainScript,
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("plan {0:?} references unknown sub-plan {1:?}")]
    UnknownPlan(String, String),
    #[error(transparent)]
    Graph(#[from] PlanError),
}

impl polyester_error::Categorized for ResolveError {
    fn category(&self) -> polyester_error::ErrorCategory {
        use polyester_error::{Categorized, ErrorCategory};
        match self {
            ResolveError::NoMainScript | ResolveError::UnknownPlan(..) => ErrorCategory::User,
            ResolveError::Compile(e) => e.category(),
            ResolveError::Graph(e) => e.category(),
        }
    }
}

/// Compiles `manifest`'s root script and every sub-plan it (transitively)
/// references, returning the plans in an order already validated to be
/// free of cycles and unknown dependency references.
pub fn compile_manifest(compiler: &Compiler, manifest: &Manifest) -> Result<Vec<Plan>, ResolveError> {
    let root_script = manifest.root_script.as_deref().ok_or(ResolveError::NoMainScript)?;

    let mut plans: BTreeMap<String, Plan> = BTreeMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    // (plan name, script source, this plan's own key prefix within `manifest.plans`)
    let mut queue: Vec<(String, Vec<u8>, String)> = vec![(MAIN_PLAN.to_string(), root_script.to_vec(), String::new())];

    while let Some((name, script_bytes, own_prefix)) = queue.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        let script = String::from_utf8_lossy(&script_bytes).into_owned();
        let records = compiler.compile(&name, &script)?;

        let mut plan = Plan::new(name.clone());
        let mut sub_plan_names = Vec::new();
        for record in &records {
            if record.name == "plan" {
                sub_plan_names.extend(marker_plan_names(record));
            } else if record.name == "dependency" {
                plan.depends_on.extend(marker_plan_names(record));
            }
        }
        plan.ops = records;

        let referenced: Vec<String> = sub_plan_names.iter().chain(plan.depends_on.iter()).cloned().collect();
        for sub_name in referenced {
            if seen.contains(&sub_name) {
                continue;
            }
            let (script_bytes, next_prefix) = lookup_sub_plan(manifest, &own_prefix, &sub_name)
                .ok_or_else(|| ResolveError::UnknownPlan(name.clone(), sub_name.clone()))?;
            queue.push((sub_name, script_bytes, next_prefix));
        }

        plan.sub_plans = sub_plan_names;
        plans.insert(name, plan);
    }

    let all: Vec<Plan> = plans.into_values().collect();
    let order = polyester_core::plan::resolve_order(&all)?;

    let mut by_name: BTreeMap<String, Plan> = all.into_iter().map(|p| (p.name.clone(), p)).collect();
    let ordered: Vec<Plan> = order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect();
    Ok(ordered)
}

/// Looks up a sub-plan's script under `manifest.plans`, preferring the
/// nested path relative to its declaring parent (`<prefix>/plans/<name>/plan.sh`)
/// and falling back to a top-level sub-plan (`<name>/plan.sh`).
fn lookup_sub_plan(manifest: &Manifest, parent_prefix: &str, name: &str) -> Option<(Vec<u8>, String)> {
    if !parent_prefix.is_empty() {
        let nested_key = format!("{parent_prefix}/plans/{name}/plan.sh");
        if let Some(bytes) = manifest.plans.get(&nested_key) {
            let prefix = nested_key.trim_end_matches("/plan.sh").to_string();
            return Some((bytes.clone(), prefix));
        }
    }
    let top_key = format!("{name}/plan.sh");
    manifest.plans.get(&top_key).map(|bytes| {
        let prefix = top_key.trim_end_matches("/plan.sh").to_string();
        (bytes.clone(), prefix)
    })
}

fn marker_plan_names(record: &OperationRecord) -> Vec<String> {
    record
        .args
        .get("plans")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Restricts `plans` to the named subset plus everything each named plan
/// transitively depends on, for `polyester apply [PLAN...]`'s optional
/// positional filter. An empty `names` means "run everything".
pub fn filter_plans(plans: Vec<Plan>, names: &[String]) -> Vec<Plan> {
    if names.is_empty() {
        return plans;
    }
    let by_name: BTreeMap<&str, &Plan> = plans.iter().map(|p| (p.name.as_str(), p)).collect();
    let mut keep: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = names.to_vec();
    stack.push(MAIN_PLAN.to_string());
    while let Some(name) = stack.pop() {
        if !keep.insert(name.clone()) {
            continue;
        }
        if let Some(plan) = by_name.get(name.as_str()) {
            stack.extend(plan.depends_on.iter().cloned());
        }
    }
    plans.into_iter().filter(|p| keep.contains(&p.name)).collect()
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
    fn filter_plans_keeps_transitive_dependencies() {
        let plans = vec![plan("app", &["db"]), plan("db", &[]), plan("unrelated", &[]), plan(MAIN_PLAN, &[])];
        let filtered = filter_plans(plans, &["app".to_string()]);
        let names: HashSet<&str> = filtered.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains("app"));
        assert!(names.contains("db"));
        assert!(!names.contains("unrelated"));
    }

    #[test]
    fn filter_plans_empty_names_keeps_everything() {
        let plans = vec![plan("a", &[]), plan("b", &[])];
        assert_eq!(filter_plans(plans.clone(), &[]).len(), plans.len());
    }

    #[test]
    fn missing_main_script_categorizes_as_user_error() {
        use polyester_error::Categorized;
        assert_eq!(ResolveError::NoMainScript.category(), polyester_error::ErrorCategory::User);
    }
}
