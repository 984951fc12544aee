pub mod api;
pub mod error;
pub mod handlers;

pub use api::RpcServer;
pub use error::{RpcError, RpcResult};
pub use handlers::{ExecutionHandler, ExecutionSummary, InterruptHandler};

// Re-export types needed by clients
pub use pipeline_engine::{
    Interrupt, InterruptState, InterruptType, NodeExecution, OrchestrationEvent, Plan,
    PlanExecution, PlanStatus, Status,
};
pub use pipeline_engine;
