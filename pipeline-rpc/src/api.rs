use crate::error::RpcResult;
use crate::handlers::{ExecutionHandler, InterruptHandler};
use pipeline_engine::{OrchestrationEngine, OrchestrationService, ServiceBuilder};

use tracing::info;

use std::sync::Arc;

pub struct RpcServer {
    service: OrchestrationService,
    execution_handler: ExecutionHandler,
    interrupt_handler: InterruptHandler,
}

impl RpcServer {
    /// Boot the engine described by `builder` and wire the handlers to it
    pub fn start(builder: ServiceBuilder) -> RpcResult<Self> {
        let service = builder.start()?;
        let execution_handler = ExecutionHandler::new(service.engine().clone());
        let interrupt_handler = InterruptHandler::new(service.interrupts().clone());
        info!("rpc server started");
        Ok(Self {
            service,
            execution_handler,
            interrupt_handler,
        })
    }

    pub fn engine(&self) -> &Arc<OrchestrationEngine> {
        self.service.engine()
    }

    pub fn execution_handler(&self) -> &ExecutionHandler {
        &self.execution_handler
    }

    pub fn interrupt_handler(&self) -> &InterruptHandler {
        &self.interrupt_handler
    }

    pub async fn shutdown(self) {
        self.service.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_engine::{InterruptState, PlanStatus};
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const GATE: &str = r#"
name: gate
startNodeId: approval
nodes:
  - uuid: approval
    stepType: signal
    facilitator: ASYNC
"#;

    #[tokio::test]
    async fn test_abort_through_interrupt_handler() {
        let server = RpcServer::start(ServiceBuilder::new()).unwrap();
        let plan = server.execution_handler().parse_from_str(GATE).unwrap();
        let execution = server
            .execution_handler()
            .start_execution(plan, Value::Null, "tester")
            .await
            .unwrap();

        server
            .interrupt_handler()
            .register("abort", &execution.uuid, BTreeMap::new(), "tester")
            .await
            .unwrap();

        // The service's interrupt loop applies it
        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            server
                .execution_handler()
                .wait_for_completion(&execution.uuid, Duration::from_millis(10)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(finished.status, PlanStatus::Aborted);

        let interrupts = server.interrupt_handler().list(&execution.uuid).await.unwrap();
        assert_eq!(interrupts[0].state, InterruptState::ProcessedSuccessfully);
        server.shutdown().await;
    }
}
