// Plan Loader
// Reads serialized plans from YAML or JSON files

use super::models::Plan;
use crate::error::{EngineError, EngineResult};

use std::fs;
use std::path::Path;

/// Loads plans from disk
pub struct PlanLoader;

impl PlanLoader {
    /// Load a plan file. JSON is valid YAML, so one parser covers both.
    pub fn from_file<P: AsRef<Path>>(path: P) -> EngineResult<Plan> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidPlan(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> EngineResult<Plan> {
        serde_yaml::from_str(content)
            .map_err(|e| EngineError::InvalidPlan(format!("failed to parse plan: {}", e)))
    }
}
