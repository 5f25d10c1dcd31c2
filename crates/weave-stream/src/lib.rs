pub mod projector;
pub mod reducer;

pub use projector::{project, project_with, NeverReveal, RevealPolicy, ToolNamePrefix};
pub use reducer::{reduce_decisions, try_reduce_decisions, DecisionReducer, StagedDecisionStream};
