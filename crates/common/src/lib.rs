//! Shared types for the event log and snapshot stores.

pub mod logging;
pub mod types;

pub use logging::{Logger, TracingLogger, default_logger};
pub use types::AggregateId;
