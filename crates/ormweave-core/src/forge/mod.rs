//! Query forging.
//!
//! - [`StageTwoForger`]: stage-one input to a validated, attribute-named query
//! - [`StageThreeForger`]: stage-two query to a column-named query with joins

mod stage_three;
mod stage_two;

pub use stage_three::StageThreeForger;
pub use stage_two::StageTwoForger;
