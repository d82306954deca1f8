//! Scenario-to-plan decomposition and live-DOM plan refinement, spec.md §4.8.

mod adaptive;
mod generate;

pub use adaptive::AdaptivePlanner;
pub use generate::{Planner, PlannerError};
