//! Progress reporting for long-running waits.

/// Receives human-readable progress lines in the order they are emitted.
pub trait ProgressSink: Send + Sync {
    /// Records a single progress line.
    fn report_progress(&self, message: &str);
}

/// Sink that forwards progress to the `tracing` subscriber at `INFO`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report_progress(&self, message: &str) {
        tracing::info!(target: "ruslan::progress", "{message}");
    }
}

impl<T: ProgressSink + ?Sized> ProgressSink for &T {
    fn report_progress(&self, message: &str) {
        (**self).report_progress(message);
    }
}

impl<T: ProgressSink + ?Sized> ProgressSink for std::sync::Arc<T> {
    fn report_progress(&self, message: &str) {
        (**self).report_progress(message);
    }
}
