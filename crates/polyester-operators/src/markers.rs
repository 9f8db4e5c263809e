//! The `plan` and `dependency` marker operators. Neither does real work:
//! they exist so the compiler's linear op stream can carry plan-graph
//! structure, and the scheduler strips them via `OperationRecord::is_marker`
//! before either ever reaches `get_state`/`run`.

use crate::operator::{OpContext, OpError, Operator};
use polyester_core::State;

pub struct PlanMarker;

impl Operator for PlanMarker {
    fn name(&self) -> &'static str {
        "plan"
    }

    fn get_state(&self, _ctx: &OpContext) -> Result<State, OpError> {
        Ok(State::new())
    }

    fn run(&self, _ctx: &OpContext) -> Result<State, OpError> {
        Ok(State::new())
    }
}

pub struct DependencyMarker;

impl Operator for DependencyMarker {
    fn name(&self) -> &'static str {
        "dependency"
    }

    fn get_state(&self, _ctx: &OpContext) -> Result<State, OpError> {
        Ok(State::new())
    }

    fn run(&self, _ctx: &OpContext) -> Result<State, OpError> {
        Ok(State::new())
    }
}
