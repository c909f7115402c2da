use async_trait::async_trait;
use teloxide::{prelude::*, types::InputFile};
use tracing::debug;

use common::{ChartArtifact, Error, Result, SignalRecord, SignalSink};

/// Posts alerts to one Telegram chat: the text first, then the chart as an
/// SVG document.
pub struct TelegramSink {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramSink {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl SignalSink for TelegramSink {
    async fn publish(&self, record: &SignalRecord, chart: Option<&ChartArtifact>) -> Result<()> {
        self.bot
            .send_message(self.chat_id, alert_text(record))
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        if let Some(chart) = chart {
            let file = InputFile::memory(chart.render_svg().into_bytes()).file_name(chart.file_name());
            self.bot
                .send_document(self.chat_id, file)
                .await
                .map_err(|e| Error::Publish(e.to_string()))?;
        }
        debug!(symbol = %record.symbol, indicator = %record.name, "Alert delivered to Telegram");
        Ok(())
    }

    async fn notify(&self, text: &str) -> Result<()> {
        self.bot
            .send_message(self.chat_id, text)
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;
        Ok(())
    }
}

/// `"<SYMBOL> : <indicator>"` header over the record's message.
fn alert_text(record: &SignalRecord) -> String {
    match &record.message {
        Some(message) => format!("{} : {}\n{message}", record.symbol, record.name),
        None => format!("{} : {}", record.symbol, record.name),
    }
}
