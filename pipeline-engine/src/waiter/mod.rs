// Wait/Notify Module
// Asynchronous callback correlation and the notify transport

pub mod engine;
pub mod models;
pub mod queue;

// Re-export key types
pub use engine::{NotifyCallback, WaitNotifyEngine};
pub use models::{
    NotifyOutcome, PendingNotify, ResponseData, ResponseMap, UnresolvedCorrelation, WaitInstance,
};
pub use queue::{notify_channel, DedupeWindow, NotifyConsumer, NotifyMessage, NotifyPublisher};
