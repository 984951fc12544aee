use pipeline_engine::EngineError;

use thiserror::Error;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// Whether the request itself was at fault
    pub fn is_client_error(&self) -> bool {
        match self {
            RpcError::InvalidRequest(_) => true,
            RpcError::Engine(e) => matches!(
                e,
                EngineError::InvalidPlan(_)
                    | EngineError::UnregisteredType { .. }
                    | EngineError::NotFound { .. }
                    | EngineError::InterruptProcessing { .. }
            ),
            RpcError::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        let err: RpcError = EngineError::InvalidPlan("cycle".to_string()).into();
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "engine error: invalid plan: cycle");

        let err: RpcError = EngineError::Store("disk".to_string()).into();
        assert!(!err.is_client_error());
    }
}
