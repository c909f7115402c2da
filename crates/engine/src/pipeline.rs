use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use common::{
    ChartArtifact, Config, Error, HistoricalSeries, HistoryRequest, MarketData, OutcomeStatus,
    Result, SignalRecord, SignalSink, SweepReport, Symbol, SymbolHandle, SymbolOutcome,
};
use indicators::IndicatorSet;
use store::{SignalStateStore, SymbolRegistry};

pub const HEARTBEAT_TEXT: &str = "I am still alive!";

/// Fetch window and limits applied to every symbol in a sweep.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub range_days: u32,
    pub interval_minutes: u32,
    pub timezone: String,
    pub fetch_timeout: Duration,
}

impl SweepSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            range_days: config.data_range_days,
            interval_minutes: config.data_interval_minutes,
            timezone: config.data_timezone.clone(),
            fetch_timeout: config.fetch_timeout,
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            range_days: 10,
            interval_minutes: 5,
            timezone: "America/New_York".into(),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of an on-demand check.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub symbol: Symbol,
    /// False when the provider does not know the symbol. Nothing was fetched
    /// and the records only carry the explanation.
    pub known: bool,
    pub records: Vec<SignalRecord>,
}

/// The sweep critical section.
///
/// Scheduled sweeps, on-demand checks and registry commands all go through
/// the registry mutex, so a command never races a sweep and overlapping
/// triggers queue up instead of interleaving.
pub struct Pipeline {
    registry: Mutex<SymbolRegistry>,
    states: SignalStateStore,
    indicators: IndicatorSet,
    market: Arc<dyn MarketData>,
    sink: Arc<dyn SignalSink>,
    settings: SweepSettings,
    last_report: RwLock<Option<SweepReport>>,
    /// Last persisted symbol list seen under the registry lock.
    tracked: RwLock<Option<Vec<Symbol>>>,
}

impl Pipeline {
    pub fn new(
        registry: SymbolRegistry,
        states: SignalStateStore,
        indicators: IndicatorSet,
        market: Arc<dyn MarketData>,
        sink: Arc<dyn SignalSink>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            states,
            indicators,
            market,
            sink,
            settings,
            last_report: RwLock::new(None),
            tracked: RwLock::new(None),
        }
    }

    /// One full pass over the registry. Never fails as a whole: every
    /// per-symbol problem is logged and recorded in the report.
    pub async fn sweep(&self) -> SweepReport {
        let mut registry = self.registry.lock().await;
        let id = uuid::Uuid::new_v4();
        let started_at = Utc::now();
        info!(sweep = %id, "Sweep started");

        match registry.sync().await {
            Ok(_) => {
                let symbols = registry.handles().iter().map(|h| h.symbol.clone()).collect();
                *self.tracked.write().await = Some(symbols);
            }
            Err(e) => {
                error!(sweep = %id, error = %e, "Registry sync failed; sweeping the previous symbol set")
            }
        }

        let today = self.today();
        let mut outcomes = Vec::with_capacity(registry.handles().len());
        for handle in registry.handles_mut() {
            let status = self.sweep_symbol(handle, today).await;
            outcomes.push(SymbolOutcome {
                symbol: handle.symbol.clone(),
                status,
            });
        }
        drop(registry);

        let report = SweepReport {
            id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            sweep = %id,
            symbols = report.outcomes.len(),
            signals = report.signals_fired(),
            failures = report.failures(),
            "Sweep finished"
        );
        *self.last_report.write().await = Some(report.clone());
        report
    }

    async fn sweep_symbol(&self, handle: &mut SymbolHandle, today: NaiveDate) -> OutcomeStatus {
        handle.series = None;
        match self.fetch(&handle.symbol, today).await {
            Ok(series) => handle.series = Some(series),
            Err(e) => {
                warn!(symbol = %handle.symbol, error = %e, "Fetch failed; skipping symbol");
                return OutcomeStatus::FetchError {
                    error: e.to_string(),
                };
            }
        }

        let mut fired = Vec::new();
        let mut publish_failures = 0;
        for indicator in self.indicators.iter() {
            let record = match indicator.compute(handle, &self.states).await {
                Ok(record) => record,
                Err(e) => {
                    error!(symbol = %handle.symbol, indicator = indicator.name(), error = %e, "Compute failed; skipping symbol");
                    return OutcomeStatus::ComputeError {
                        error: e.to_string(),
                        fired,
                        publish_failures,
                    };
                }
            };
            if !record.signal {
                continue;
            }

            let chart = match indicator.compute_and_render(handle) {
                Ok(chart) => chart,
                Err(e) => {
                    error!(symbol = %handle.symbol, indicator = indicator.name(), error = %e, "Render failed; skipping symbol");
                    return OutcomeStatus::ComputeError {
                        error: e.to_string(),
                        fired,
                        publish_failures,
                    };
                }
            };
            info!(
                symbol = %handle.symbol,
                indicator = indicator.name(),
                kind = ?record.kind,
                price = ?record.price,
                "Signal fired"
            );
            fired.push(indicator.name().to_string());
            if !self.deliver(&record, Some(&chart)).await {
                publish_failures += 1;
            }
        }

        OutcomeStatus::Ok {
            fired,
            publish_failures,
        }
    }

    /// Ad-hoc inspection of one symbol, tracked or not.
    ///
    /// Unknown symbols get a signal=false explanation without any fetch.
    /// Known symbols are fetched once and every indicator's record and chart
    /// is published whether or not its state changed.
    pub async fn inspect(&self, raw: &str) -> Result<Inspection> {
        let symbol = Symbol::parse(raw)?;
        let _guard = self.registry.lock().await;

        let exists = self.market.symbol_exists(&symbol).await.unwrap_or_else(|e| {
            warn!(symbol = %symbol, error = %e, "Existence check failed; treating as invalid");
            false
        });
        if !exists {
            let records: Vec<SignalRecord> = self
                .indicators
                .iter()
                .map(|ind| {
                    SignalRecord::quiet(ind.name(), symbol.clone())
                        .with_message(Error::InvalidSymbol(symbol.to_string()).to_string())
                })
                .collect();
            for record in &records {
                self.deliver(record, None).await;
            }
            return Ok(Inspection {
                symbol,
                known: false,
                records,
            });
        }

        let mut handle = SymbolHandle::new(symbol.clone());
        handle.series = Some(self.fetch(&symbol, self.today()).await?);

        let mut records = Vec::with_capacity(self.indicators.len());
        for indicator in self.indicators.iter() {
            let mut record = indicator.compute(&handle, &self.states).await?;
            let chart = indicator.compute_and_render(&handle)?;
            if record.message.is_none() {
                record = record.with_message(format!(
                    "No new transition for {symbol}; showing the current ribbon."
                ));
            }
            self.deliver(&record, Some(&chart)).await;
            records.push(record);
        }
        info!(symbol = %symbol, "On-demand check published");
        Ok(Inspection {
            symbol,
            known: true,
            records,
        })
    }

    pub async fn add(&self, raw: &str) -> Result<Symbol> {
        let mut registry = self.registry.lock().await;
        let symbol = registry.add(raw, self.market.as_ref()).await?;
        if let Some(list) = self.tracked.write().await.as_mut() {
            list.push(symbol.clone());
        }
        Ok(symbol)
    }

    pub async fn remove(&self, raw: &str) -> Result<Symbol> {
        let mut registry = self.registry.lock().await;
        let symbol = registry.remove(raw).await?;
        if let Some(list) = self.tracked.write().await.as_mut() {
            list.retain(|s| s != &symbol);
        }
        Ok(symbol)
    }

    pub async fn list(&self) -> Result<Vec<Symbol>> {
        let registry = self.registry.lock().await;
        let list = registry.list().await?;
        *self.tracked.write().await = Some(list.clone());
        Ok(list)
    }

    /// Tracked symbols without queueing behind a sweep.
    ///
    /// Serves the cached list when there is one. Otherwise reads the registry
    /// if it is idle; `None` means it is busy and nothing is cached yet.
    pub async fn tracked(&self) -> Result<Option<Vec<Symbol>>> {
        if let Some(list) = self.tracked.read().await.clone() {
            return Ok(Some(list));
        }
        let Ok(registry) = self.registry.try_lock() else {
            return Ok(None);
        };
        let list = registry.list().await?;
        *self.tracked.write().await = Some(list.clone());
        Ok(Some(list))
    }

    pub async fn last_report(&self) -> Option<SweepReport> {
        self.last_report.read().await.clone()
    }

    /// True while a sweep or command holds the critical section.
    pub fn is_busy(&self) -> bool {
        self.registry.try_lock().is_err()
    }

    pub async fn heartbeat(&self) {
        if let Err(e) = self.sink.notify(HEARTBEAT_TEXT).await {
            warn!(error = %e, "Heartbeat delivery failed");
        }
    }

    async fn fetch(&self, symbol: &Symbol, today: NaiveDate) -> Result<HistoricalSeries> {
        let s = &self.settings;
        let req = HistoryRequest::trailing(
            symbol.clone(),
            today,
            s.range_days,
            s.interval_minutes,
            s.timezone.clone(),
        );
        let series = tokio::time::timeout(s.fetch_timeout, self.market.fetch_history(&req))
            .await
            .map_err(|_| Error::FetchTimeout {
                symbol: symbol.clone(),
                after: s.fetch_timeout,
            })??;
        if series.is_empty() {
            return Err(Error::Fetch {
                symbol: symbol.clone(),
                reason: "provider returned an empty series".into(),
            });
        }
        Ok(series)
    }

    /// Today's date in the configured zone.
    fn today(&self) -> NaiveDate {
        let now = Utc::now();
        match common::parse_zone(&self.settings.timezone) {
            Ok(zone) => now.with_timezone(&zone).date_naive(),
            Err(_) => now.date_naive(),
        }
    }

    /// Best effort: a failed publish is logged and reported as `false`.
    async fn deliver(&self, record: &SignalRecord, chart: Option<&ChartArtifact>) -> bool {
        match self.sink.publish(record, chart).await {
            Ok(()) => true,
            Err(e) => {
                error!(symbol = %record.symbol, indicator = %record.name, error = %e, "Publish failed");
                false
            }
        }
    }
}
