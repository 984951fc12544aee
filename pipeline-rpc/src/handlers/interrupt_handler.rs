use crate::error::{RpcError, RpcResult};
use pipeline_engine::{Interrupt, InterruptManager, InterruptType};

use serde_json::Value;

use std::collections::BTreeMap;
use std::sync::Arc;

pub struct InterruptHandler {
    manager: Arc<InterruptManager>,
}

impl InterruptHandler {
    pub fn new(manager: Arc<InterruptManager>) -> Self {
        Self { manager }
    }

    /// Parse an interrupt type name such as `abort`, `MARK_SUCCESS` or `mark-failed`
    pub fn parse_type(name: &str) -> RpcResult<InterruptType> {
        let normalized = name.trim().replace('-', "_").to_uppercase();
        serde_json::from_value(Value::String(normalized))
            .map_err(|_| RpcError::InvalidRequest(format!("unknown interrupt type '{}'", name)))
    }

    /// Register an interrupt; it is applied by the next processing pass
    pub async fn register(
        &self,
        interrupt_type: &str,
        target_id: &str,
        metadata: BTreeMap<String, String>,
        issued_by: &str,
    ) -> RpcResult<Interrupt> {
        let interrupt_type = Self::parse_type(interrupt_type)?;
        Ok(self
            .manager
            .register_interrupt(interrupt_type, target_id, metadata, issued_by)
            .await?)
    }

    pub async fn list(&self, plan_execution_id: &str) -> RpcResult<Vec<Interrupt>> {
        Ok(self.manager.interrupts_for(plan_execution_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type() {
        assert_eq!(InterruptHandler::parse_type("abort").unwrap(), InterruptType::Abort);
        assert_eq!(
            InterruptHandler::parse_type("mark-success").unwrap(),
            InterruptType::MarkSuccess
        );
        assert_eq!(
            InterruptHandler::parse_type("CUSTOM_FAILURE").unwrap(),
            InterruptType::CustomFailure
        );
        assert!(matches!(
            InterruptHandler::parse_type("explode"),
            Err(RpcError::InvalidRequest(_))
        ));
    }
}
