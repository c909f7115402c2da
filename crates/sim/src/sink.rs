use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use common::{ChartArtifact, Error, Result, SignalRecord, SignalSink};

/// One call to `publish`, as captured by `RecordingSink`.
#[derive(Debug, Clone)]
pub struct Published {
    pub record: SignalRecord,
    pub chart: Option<ChartArtifact>,
}

/// Sink that keeps everything in memory, for tests. `DATA_SOURCE=sim` only
/// swaps the market data; publications still go to Telegram.
#[derive(Default)]
pub struct RecordingSink {
    published: RwLock<Vec<Published>>,
    notes: RwLock<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `publish` fail (calls are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<Published> {
        self.published.read().await.clone()
    }

    pub async fn notes(&self) -> Vec<String> {
        self.notes.read().await.clone()
    }
}

#[async_trait]
impl SignalSink for RecordingSink {
    async fn publish(&self, record: &SignalRecord, chart: Option<&ChartArtifact>) -> Result<()> {
        info!(symbol = %record.symbol, indicator = %record.name, signal = record.signal, "Recorded publication");
        self.published.write().await.push(Published {
            record: record.clone(),
            chart: chart.cloned(),
        });
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Publish("recording sink set to fail".into()));
        }
        Ok(())
    }

    async fn notify(&self, text: &str) -> Result<()> {
        self.notes.write().await.push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Symbol;

    #[tokio::test]
    async fn failing_sink_still_records() {
        let sink = RecordingSink::new();
        sink.set_failing(true);
        let record = SignalRecord::quiet("EMA_Reversal", Symbol::parse("SPY").unwrap());
        assert!(sink.publish(&record, None).await.is_err());
        assert_eq!(sink.published().await.len(), 1);
    }
}
