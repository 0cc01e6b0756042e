//! Query planning and execution.
//!
//! This module contains:
//! - Operation planning (single native call vs. decomposed operations)
//! - The runner that executes plans and fills the result cache
//! - The in-memory join integrator
//! - Filter evaluation, sorting and pagination over records
//! - Result shaping back into attribute-named records

pub mod cache;
pub mod executor;
pub mod filter;
pub mod integrator;
pub mod planner;
pub mod rows;
pub mod runner;
pub mod shape;

pub use cache::{CacheBuilder, ResultCache};
pub use executor::QueryExecutor;
pub use filter::FilterEvaluator;
pub use integrator::integrate;
pub use planner::{Operation, OperationPlanner, Plan, PlanState};
pub use runner::OperationRunner;
pub use shape::Shaper;
