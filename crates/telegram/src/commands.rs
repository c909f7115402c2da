use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tracing::{info, warn};

use common::{DataSource, Error, OutcomeStatus, Result, SweepReport, Symbol};
use engine::{Inspection, Pipeline};

type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub pipeline: Arc<Pipeline>,
    pub data_source: DataSource,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "RibbonBot commands:")]
pub enum Command {
    #[command(description = "Track a ticker, e.g. /add AAPL")]
    Add(String),
    #[command(description = "Stop tracking a ticker")]
    Remove(String),
    #[command(description = "List tracked tickers")]
    List,
    #[command(description = "Publish the current ribbon for any ticker")]
    Check(String),
    #[command(description = "Run a sweep now")]
    Sweep,
    #[command(description = "Show the last sweep report")]
    Status,
    #[command(description = "Show this help")]
    Help,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Add(raw)].endpoint(handle_add))
        .branch(case![Command::Remove(raw)].endpoint(handle_remove))
        .branch(case![Command::List].endpoint(handle_list))
        .branch(case![Command::Check(raw)].endpoint(handle_check))
        .branch(case![Command::Sweep].endpoint(handle_sweep))
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Help].endpoint(handle_help));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_add(bot: Bot, msg: Message, raw: String, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match usage_or(&raw, "/add") {
        Some(usage) => usage,
        None => membership_reply(deps.pipeline.add(&raw).await, "added to"),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_remove(bot: Bot, msg: Message, raw: String, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match usage_or(&raw, "/remove") {
        Some(usage) => usage,
        None => membership_reply(deps.pipeline.remove(&raw).await, "removed from"),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_list(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match deps.pipeline.list().await {
        Ok(symbols) => list_reply(&symbols),
        Err(e) => format!("Could not read the ticker list: {e}"),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_check(bot: Bot, msg: Message, raw: String, deps: Arc<BotDeps>) -> HandlerResult {
    if let Some(usage) = usage_or(&raw, "/check") {
        bot.send_message(msg.chat.id, usage).await?;
        return Ok(());
    }
    let text = match deps.pipeline.inspect(&raw).await {
        Ok(inspection) => check_reply(&inspection),
        Err(e) if e.is_user_facing() => e.to_string(),
        Err(e) => format!("Check failed: {e}"),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_sweep(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    if deps.pipeline.is_busy() {
        bot.send_message(msg.chat.id, "A sweep is in progress; yours will run after it.")
            .await?;
    }
    let report = deps.pipeline.sweep().await;
    bot.send_message(msg.chat.id, report_reply(&report)).await?;
    Ok(())
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let last = match deps.pipeline.last_report().await {
        Some(report) => report_reply(&report),
        None => "No sweep has run yet.".to_string(),
    };
    let state = if deps.pipeline.is_busy() { "Running" } else { "Idle" };
    let text = format!(
        "RibbonBot Status\n\
         Scheduler: {state}\n\
         Data source: {}\n\
         {last}",
        deps.data_source
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

fn usage_or(raw: &str, command: &str) -> Option<String> {
    raw.trim()
        .is_empty()
        .then(|| format!("Usage: {command} <ticker>"))
}

fn membership_reply(result: Result<Symbol>, verb: &str) -> String {
    match result {
        Ok(symbol) => format!("Ticker {symbol} {verb} the list"),
        Err(e) if e.is_user_facing() => e.to_string(),
        Err(e) => format!("Registry update failed: {e}"),
    }
}

fn list_reply(symbols: &[Symbol]) -> String {
    if symbols.is_empty() {
        return "No tickers tracked yet. Use /add <ticker>.".to_string();
    }
    let joined = symbols
        .iter()
        .map(Symbol::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!("Tracked tickers ({}): {joined}", symbols.len())
}

fn check_reply(inspection: &Inspection) -> String {
    if !inspection.known {
        return Error::InvalidSymbol(inspection.symbol.to_string()).to_string();
    }
    format!(
        "Published {} record(s) for {} to the signal chat.",
        inspection.records.len(),
        inspection.symbol
    )
}

fn report_reply(report: &SweepReport) -> String {
    let mut text = report.summary();
    for outcome in &report.outcomes {
        match &outcome.status {
            OutcomeStatus::Ok { .. } => {}
            OutcomeStatus::FetchError { error } => {
                text.push_str(&format!("\n{}: {error}", outcome.symbol));
            }
            OutcomeStatus::ComputeError { error, fired, .. } if fired.is_empty() => {
                text.push_str(&format!("\n{}: {error}", outcome.symbol));
            }
            OutcomeStatus::ComputeError { error, fired, .. } => {
                text.push_str(&format!(
                    "\n{}: {error} (after {} fired)",
                    outcome.symbol,
                    fired.join(", ")
                ));
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_arguments() {
        assert_eq!(
            Command::parse("/add aapl", "ribbonbot").unwrap(),
            Command::Add("aapl".into())
        );
        assert_eq!(Command::parse("/list", "ribbonbot").unwrap(), Command::List);
        assert_eq!(
            Command::parse("/check ^GSPC", "ribbonbot").unwrap(),
            Command::Check("^GSPC".into())
        );
    }

    #[test]
    fn membership_errors_are_replied_verbatim() {
        let spy = Symbol::parse("SPY").unwrap();
        assert_eq!(
            membership_reply(Err(Error::AlreadyPresent(spy.clone())), "added to"),
            "Ticker SPY already present in the existing list"
        );
        assert_eq!(
            membership_reply(Ok(spy), "removed from"),
            "Ticker SPY removed from the list"
        );
        assert!(membership_reply(Err(Error::Http("boom".into())), "added to")
            .starts_with("Registry update failed"));
    }

    #[test]
    fn blank_argument_gets_usage() {
        assert_eq!(usage_or("  ", "/add").as_deref(), Some("Usage: /add <ticker>"));
        assert_eq!(usage_or("AAPL", "/add"), None);
    }

    #[test]
    fn check_of_an_unknown_symbol_says_so() {
        let nope = Symbol::parse("NOPE").unwrap();
        let inspection = Inspection {
            symbol: nope.clone(),
            known: false,
            records: vec![common::SignalRecord::quiet("EMA_Reversal", nope)],
        };
        assert_eq!(check_reply(&inspection), "Ticker NOPE is not a valid symbol");
    }

    #[test]
    fn check_of_a_known_symbol_counts_publications() {
        let spy = Symbol::parse("SPY").unwrap();
        let inspection = Inspection {
            symbol: spy.clone(),
            known: true,
            records: vec![common::SignalRecord::quiet("EMA_Reversal", spy)],
        };
        assert_eq!(
            check_reply(&inspection),
            "Published 1 record(s) for SPY to the signal chat."
        );
    }

    #[test]
    fn report_lists_failures_with_partial_signals() {
        let outcome = |symbol: &str, status| common::SymbolOutcome {
            symbol: Symbol::parse(symbol).unwrap(),
            status,
        };
        let report = SweepReport {
            id: uuid::Uuid::nil(),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            outcomes: vec![
                outcome("AAA", OutcomeStatus::Ok { fired: vec![], publish_failures: 0 }),
                outcome("BBB", OutcomeStatus::FetchError { error: "down".into() }),
                outcome(
                    "CCC",
                    OutcomeStatus::ComputeError {
                        error: "boom".into(),
                        fired: vec!["EMA_Reversal".into()],
                        publish_failures: 0,
                    },
                ),
            ],
        };
        let text = report_reply(&report);
        assert!(text.contains("1 signals, 2 failures"), "{text}");
        assert!(!text.contains("AAA:"));
        assert!(text.contains("\nBBB: down"));
        assert!(text.contains("\nCCC: boom (after EMA_Reversal fired)"));
    }

    #[test]
    fn list_reply_keeps_order() {
        let symbols = vec![Symbol::parse("MSFT").unwrap(), Symbol::parse("AAPL").unwrap()];
        assert_eq!(list_reply(&symbols), "Tracked tickers (2): MSFT, AAPL");
        assert!(list_reply(&[]).starts_with("No tickers"));
    }
}
