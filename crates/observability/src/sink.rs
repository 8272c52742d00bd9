use fmupool_core::DiagnosticSink;

/// Forwards pool diagnostics to `tracing` at `warn` level.
///
/// Use this when there is no dedicated log collaborator but diagnostics
/// should still end up next to the structured logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::warn!(target: "fmupool::diagnostics", "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_without_a_subscriber_is_harmless() {
        TracingSink.log("Failed simulation with index 0 (error: boom)");
    }
}
