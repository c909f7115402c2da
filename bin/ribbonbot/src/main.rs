use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{Config, DataSource, MarketData};
use engine::{Pipeline, Scheduler, SweepSettings, YahooClient};
use indicators::{IndicatorFileConfig, IndicatorSet};
use sim::SimMarketData;
use store::{FileStore, KvStore, SignalStateStore, SymbolRegistry};
use telegram_ctrl::{start_bot, BotDeps, TelegramSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(data_source = %cfg.data_source, data_dir = %cfg.data_dir.display(), "RibbonBot starting");

    // ── Persistence ───────────────────────────────────────────────────────────
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("creating data dir {}", cfg.data_dir.display()))?;
    let kv: Arc<dyn KvStore> = Arc::new(FileStore::new(&cfg.data_dir));
    let registry = SymbolRegistry::new(kv.clone());
    let states = SignalStateStore::new(kv);

    // ── Market data (injected based on DATA_SOURCE) ───────────────────────────
    let market: Arc<dyn MarketData> = match cfg.data_source {
        DataSource::Yahoo => {
            info!("Using Yahoo chart API for market data");
            Arc::new(YahooClient::new())
        }
        DataSource::Sim => {
            info!("Using simulated market data");
            Arc::new(SimMarketData::new())
        }
    };

    // ── Indicators ────────────────────────────────────────────────────────────
    let indicator_file = IndicatorFileConfig::load_or_default(&cfg.indicator_config_path);
    let indicators = IndicatorSet::from_config(&indicator_file);

    // ── Pipeline ──────────────────────────────────────────────────────────────
    let bot = teloxide::Bot::new(cfg.telegram_token.clone());
    let sink = Arc::new(TelegramSink::new(bot.clone(), cfg.signal_chat_id));
    let pipeline = Arc::new(Pipeline::new(
        registry,
        states,
        indicators,
        market,
        sink,
        SweepSettings::from_config(&cfg),
    ));

    // ── Telegram commands ─────────────────────────────────────────────────────
    let bot_deps = BotDeps {
        pipeline: pipeline.clone(),
        data_source: cfg.data_source,
        allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
    };

    // ── Status API ────────────────────────────────────────────────────────────
    let api_state = api::AppState {
        pipeline: pipeline.clone(),
        data_source: cfg.data_source,
        dashboard_token: Arc::from(cfg.dashboard_token.as_str()),
    };

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    let scheduler = Scheduler::new(pipeline, cfg.loop_interval, cfg.heartbeat_interval).spawn();
    tokio::spawn(start_bot(bot, bot_deps));
    let port = cfg.dashboard_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "Status API stopped");
        }
    });

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown signal received. Waiting for the current sweep to finish.");
    scheduler.stop().await;
    info!("Exiting.");
    Ok(())
}
