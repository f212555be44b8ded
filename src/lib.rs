pub mod config;
pub mod control;
mod error;
pub mod events;
pub mod failure_log;
pub mod fetch;
pub mod log;
pub mod orchestrator;
pub mod paths;
pub mod resolve;
pub mod runner;
pub mod sanitize;
pub mod store;

pub use error::{EngineError, Result};
