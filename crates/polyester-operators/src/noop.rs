//! The `noop` operator: declares no state and does nothing, used in tests
//! and as a dependency-graph anchor.

use crate::operator::{OpContext, OpError, Operator};
use polyester_core::{State, StateEntry};
use std::collections::BTreeMap;

pub struct Noop;

fn noop_state() -> State {
    let mut kv = BTreeMap::new();
    kv.insert("noop".to_string(), serde_json::json!("ok"));
    State::new().append([StateEntry::kv("noop", kv)])
}

impl Operator for Noop {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn get_state(&self, _ctx: &OpContext) -> Result<State, OpError> {
        Ok(noop_state())
    }

    fn run(&self, _ctx: &OpContext) -> Result<State, OpError> {
        Ok(noop_state())
    }
}
