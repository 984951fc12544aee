// Execution Module
// Runtime model: statuses, plan/node execution records and outputs

pub mod models;
pub mod status;

// Re-export key types
pub use models::{
    Ambiance, ExecutableResponse, ExecutionOutput, InterruptEffect, Level, NodeExecution,
    OutputKind, PlanExecution,
};
pub use status::{aggregate_status, FailureInfo, FailureType, PlanStatus, Status};
