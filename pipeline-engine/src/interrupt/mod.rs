// Interrupt Module
// External control over running plans: abort, pause/resume, retry and
// forced statuses, applied asynchronously and recorded on the nodes they touch

pub mod manager;
pub mod models;

pub use manager::InterruptManager;
pub use models::{Interrupt, InterruptState, InterruptType};
