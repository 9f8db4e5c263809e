//! The operation record: the unit the compiler emits and the scheduler
//! consumes — an operator name plus its decoded argument object.

use serde::{Deserialize, Serialize};

/// One operation as read back from the compiler's YAML stream: an operator
/// name (`touch`, `copy`, `plan`, `dependency`, ...) paired with the
/// argument object that operator's `GetState`/`Run` will receive.
///
/// `args` is kept as a generic [`serde_json::Value`] rather than an enum of
/// per-operator structs: the compiler decodes operations before the
/// registry of operator argument shapes is necessarily loaded, and the
/// cache key is derived from this same generic value (see
/// [`crate::hash::cache_key`]), so there is no point the record needs to be
/// more strongly typed than this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    /// Name of the plan this operation was declared under, empty for the
    /// top-level "main" plan.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plan: String,
}

impl OperationRecord {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
            plan: String::new(),
        }
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }

    /// True for the two marker operators (`plan`, `dependency`) that exist
    /// purely to shape the plan graph and never reach the scheduler as real
    /// work.
    pub fn is_marker(&self) -> bool {
        self.name == "plan" || self.name == "dependency"
    }

    pub fn cache_key(&self) -> Result<String, serde_json::Error> {
        crate::hash::cache_key(&self.name, &self.args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_identified_by_name() {
        assert!(OperationRecord::new("plan", serde_json::json!({})).is_marker());
        assert!(OperationRecord::new("dependency", serde_json::json!({})).is_marker());
        assert!(!OperationRecord::new("touch", serde_json::json!({})).is_marker());
    }

    #[test]
    fn cache_key_is_stable() {
        let op = OperationRecord::new("touch", serde_json::json!({"path": "/tmp/a"}));
        assert_eq!(op.cache_key().unwrap(), op.cache_key().unwrap());
    }
}
