pub mod error;
pub mod orchestrator;
pub mod step;
pub mod transaction;
