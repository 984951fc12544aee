// Plan Module
// Immutable plan graph, structural validation and plan file loading

pub mod loader;
pub mod models;
pub mod validator;

// Re-export key types
pub use loader::PlanLoader;
pub use models::{AdviserObtainment, Plan, PlanNode};
pub use validator::PlanValidator;
