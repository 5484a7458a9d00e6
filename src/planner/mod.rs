//! Planning and execution.
//!
//! This module compares declarations with stored state, turns the result
//! into an ordered plan and applies that plan against a provider.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{ApplyReport, DEFAULT_PARALLELISM, NodeOutcome, NodeStatus, PlanExecutor};
pub use plan::{ActionType, Plan, PlannedAction};
