pub mod execution_handler;
pub mod interrupt_handler;

pub use execution_handler::{ExecutionHandler, ExecutionSummary};
pub use interrupt_handler::InterruptHandler;
