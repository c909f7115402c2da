use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{Bar, Error, HistoricalSeries, HistoryRequest, MarketData, Result, Symbol};

/// Regular session length in minutes (09:30 to 16:00 exchange time).
const SESSION_MINUTES: u32 = 390;

/// Simulated market-data provider.
///
/// By default every well-formed symbol exists and yields a deterministic
/// synthetic intraday series. Individual symbols can be scripted with fixed
/// closes, marked unknown, made to fail, or delayed.
#[derive(Default)]
pub struct SimMarketData {
    scripted: RwLock<HashMap<Symbol, Vec<f64>>>,
    unknown: RwLock<HashSet<Symbol>>,
    failing: RwLock<HashSet<Symbol>>,
    delays: RwLock<HashMap<Symbol, Duration>>,
    fetches: AtomicUsize,
}

impl SimMarketData {
    pub fn new() -> Self {
        info!("SimMarketData initialized");
        Self::default()
    }

    /// Serve exactly these closes for `symbol`, one bar per interval.
    pub async fn script(&self, symbol: &str, closes: Vec<f64>) {
        self.scripted.write().await.insert(sym(symbol), closes);
    }

    /// `symbol_exists` answers false for `symbol`.
    pub async fn mark_unknown(&self, symbol: &str) {
        self.unknown.write().await.insert(sym(symbol));
    }

    /// Every fetch of `symbol` fails.
    pub async fn fail(&self, symbol: &str) {
        self.failing.write().await.insert(sym(symbol));
    }

    /// Every fetch of `symbol` sleeps for `delay` first.
    pub async fn delay(&self, symbol: &str, delay: Duration) {
        self.delays.write().await.insert(sym(symbol), delay);
    }

    /// Number of `fetch_history` calls so far, including failed ones.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketData for SimMarketData {
    async fn fetch_history(&self, req: &HistoryRequest) -> Result<HistoricalSeries> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = self.delays.read().await.get(&req.symbol).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.read().await.contains(&req.symbol) {
            return Err(Error::Fetch {
                symbol: req.symbol.clone(),
                reason: "simulated outage".into(),
            });
        }

        let zone = req.zone()?;
        let bars = match self.scripted.read().await.get(&req.symbol) {
            Some(closes) => scripted_bars(req, zone, closes),
            None => synthetic_bars(req, zone),
        };
        if bars.is_empty() {
            return Err(Error::Fetch {
                symbol: req.symbol.clone(),
                reason: format!("no data between {} and {}", req.start, req.end),
            });
        }

        debug!(symbol = %req.symbol, bars = bars.len(), "Simulated history served");
        Ok(HistoricalSeries {
            symbol: req.symbol.clone(),
            timezone: req.timezone.clone(),
            bars,
        })
    }

    async fn symbol_exists(&self, symbol: &Symbol) -> Result<bool> {
        Ok(!self.unknown.read().await.contains(symbol))
    }
}

fn sym(raw: &str) -> Symbol {
    Symbol::parse(raw).unwrap_or_else(|e| panic!("invalid simulated symbol: {e}"))
}

/// 09:30 local time in `zone`.
fn session_open(zone: Tz, date: NaiveDate) -> DateTime<FixedOffset> {
    let open = NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN);
    match date.and_time(open).and_local_timezone(zone).earliest() {
        Some(t) => t.fixed_offset(),
        None => common::zone_midnight(zone, date).fixed_offset(),
    }
}

fn bar(timestamp: DateTime<FixedOffset>, close: f64, prev: f64) -> Bar {
    Bar {
        timestamp,
        open: prev,
        high: prev.max(close),
        low: prev.min(close),
        close,
        volume: 1_000.0,
    }
}

fn scripted_bars(req: &HistoryRequest, zone: Tz, closes: &[f64]) -> Vec<Bar> {
    let t0 = session_open(zone, req.start);
    let step = chrono::Duration::minutes(i64::from(req.interval_minutes.max(1)));
    let mut prev = closes.first().copied().unwrap_or_default();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let b = bar(t0 + step * i as i32, close, prev);
            prev = close;
            b
        })
        .collect()
}

/// Weekday sessions in `[start, end)`, price a symbol-seeded drifting sine.
fn synthetic_bars(req: &HistoryRequest, zone: Tz) -> Vec<Bar> {
    let seed = req.symbol.as_str().bytes().map(u64::from).sum::<u64>();
    let base = 50.0 + (seed % 200) as f64;
    let phase = (seed % 17) as f64;
    let drift = ((seed % 7) as f64 - 3.0) * 0.01;

    let interval = req.interval_minutes.max(1);
    let per_session = (SESSION_MINUTES / interval).max(1);
    let step = chrono::Duration::minutes(i64::from(interval));

    let mut bars = Vec::new();
    let mut prev = base;
    let mut day = req.start;
    let mut i = 0usize;
    while day < req.end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            let open = session_open(zone, day);
            for k in 0..per_session {
                let x = i as f64;
                let close = base + 5.0 * (x / 40.0 + phase).sin() + drift * x;
                bars.push(bar(open + step * k as i32, close.max(0.01), prev));
                prev = close.max(0.01);
                i += 1;
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(symbol: &str, start: (i32, u32, u32), days: i64) -> HistoryRequest {
        let start = NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap();
        HistoryRequest {
            symbol: Symbol::parse(symbol).unwrap(),
            start,
            end: start + chrono::Duration::days(days),
            interval_minutes: 5,
            timezone: "America/New_York".into(),
        }
    }

    #[tokio::test]
    async fn synthetic_series_skips_weekends() {
        let sim = SimMarketData::new();
        // Mon 2024-03-04 through Sun 2024-03-10
        let series = sim.fetch_history(&request("SPY", (2024, 3, 4), 7)).await.unwrap();
        assert_eq!(series.len(), 5 * 78);
        assert_eq!(series.timezone, "America/New_York");
    }

    #[tokio::test]
    async fn sessions_open_at_local_time_across_dst() {
        let sim = SimMarketData::new();
        // Fri 2024-03-08 (EST) through Mon 2024-03-11 (EDT)
        let series = sim.fetch_history(&request("SPY", (2024, 3, 8), 4)).await.unwrap();
        assert_eq!(series.bars[0].timestamp.to_rfc3339(), "2024-03-08T09:30:00-05:00");
        assert_eq!(series.bars[78].timestamp.to_rfc3339(), "2024-03-11T09:30:00-04:00");
    }

    #[tokio::test]
    async fn unknown_zone_is_rejected() {
        let sim = SimMarketData::new();
        let mut req = request("SPY", (2024, 3, 4), 1);
        req.timezone = "Nowhere/Special".into();
        assert!(matches!(sim.fetch_history(&req).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn synthetic_series_is_deterministic() {
        let sim = SimMarketData::new();
        let req = request("AAPL", (2024, 3, 4), 3);
        let a = sim.fetch_history(&req).await.unwrap();
        let b = sim.fetch_history(&req).await.unwrap();
        assert_eq!(a.closes(), b.closes());
        assert_eq!(sim.fetch_count(), 2);
    }

    #[tokio::test]
    async fn weekend_only_window_is_a_fetch_error() {
        let sim = SimMarketData::new();
        let err = sim.fetch_history(&request("SPY", (2024, 3, 9), 2)).await.unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[tokio::test]
    async fn scripted_failures_and_unknowns() {
        let sim = SimMarketData::new();
        sim.fail("BAD").await;
        sim.mark_unknown("NOPE").await;
        sim.script("FIX", vec![1.0, 2.0, 3.0]).await;

        assert!(sim.fetch_history(&request("BAD", (2024, 3, 4), 1)).await.is_err());
        assert!(!sim.symbol_exists(&Symbol::parse("NOPE").unwrap()).await.unwrap());
        let fixed = sim.fetch_history(&request("FIX", (2024, 3, 9), 1)).await.unwrap();
        assert_eq!(fixed.closes(), vec![1.0, 2.0, 3.0]);
    }
}
