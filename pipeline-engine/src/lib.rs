// Pipeline Engine Library
// Plan orchestration engine: node execution state machine, advisers,
// facilitators, wait/notify correlation and interrupts

pub mod adviser;
pub mod config;
pub mod delegate;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod facilitator;
pub mod interrupt;
pub mod plan;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod step;
pub mod store;
pub mod timeout;
pub mod waiter;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};

// Re-export engine types
pub use engine::{
    ConsistencyReport, DiscontinueMode, EngineBuilder, OrchestrationEngine, Registries,
};
pub use service::{OrchestrationService, ServiceBuilder};

// Re-export model types
pub use execution::{
    Ambiance, FailureInfo, FailureType, NodeExecution, PlanExecution, PlanStatus, Status,
};
pub use plan::{Plan, PlanLoader, PlanNode, PlanValidator};

// Re-export event types
pub use events::{
    progress_channel, ChannelObserver, OrchestrationEvent, ProgressReceiver, ProgressSender,
};

// Re-export interrupt types
pub use interrupt::{Interrupt, InterruptManager, InterruptState, InterruptType};

// Re-export collaborator types
pub use delegate::{TaskDispatcher, TaskHandler, TaskResult, TaskSpec};
pub use store::{ExecutionStore, InMemoryStore};
pub use waiter::{ResponseData, WaitNotifyEngine};
