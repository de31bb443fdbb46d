//! Fire-and-forget logging sink shared by the stores and the migration manager.

use std::sync::Arc;

use serde_json::Value;

/// A structured log sink.
///
/// Implementations must not block the caller and must not fail: a sink that
/// cannot deliver a message drops it.
pub trait Logger: Send + Sync {
    /// Records `message` with a JSON object of key/value fields.
    fn log(&self, message: &str, fields: &Value);
}

impl<F> Logger for F
where
    F: Fn(&str, &Value) + Send + Sync,
{
    fn log(&self, message: &str, fields: &Value) {
        self(message, fields)
    }
}

/// Default sink that forwards every message to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str, fields: &Value) {
        tracing::info!(%fields, "{message}");
    }
}

/// Returns the default shared logger.
pub fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}
