use async_trait::async_trait;

use crate::{ChartArtifact, Result, SignalRecord};

/// Delivery target for signal alerts (the chat channel in production).
///
/// Best effort: callers log failures and never retry.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn publish(&self, record: &SignalRecord, chart: Option<&ChartArtifact>) -> Result<()>;

    /// Plain status line, e.g. the periodic heartbeat.
    async fn notify(&self, text: &str) -> Result<()>;
}
