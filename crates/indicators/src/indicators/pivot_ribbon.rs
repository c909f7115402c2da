//! Saty-style pivot ribbon reversal detector.
//!
//! Three ribbon EMAs (fast / pivot / slow) define a bullish or bearish
//! "cloud"; two conviction EMAs define bullish or bearish conviction. A signal
//! fires whenever either classification differs from the last one persisted
//! for the symbol.

use async_trait::async_trait;
use tracing::debug;

use common::{
    Annotation, ChartArtifact, CloudBand, Error, HistoricalSeries, LineSeries, Result,
    SignalKind, SignalRecord, SymbolHandle, Tone,
};
use store::{SignalStateStore, StateMap};

use super::ema::ema_series;
use crate::Indicator;

pub const PIVOT_KEY: &str = "pivot_last_state";
pub const CONVICTION_KEY: &str = "conviction_last_state";

/// Bars shown by `compute_and_render`.
pub const CHART_WINDOW: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RibbonPeriods {
    pub fast: usize,
    pub pivot: usize,
    pub slow: usize,
    pub fast_conviction: usize,
    pub slow_conviction: usize,
    pub bias: usize,
}

impl Default for RibbonPeriods {
    fn default() -> Self {
        Self {
            fast: 8,
            pivot: 21,
            slow: 34,
            fast_conviction: 13,
            slow_conviction: 48,
            bias: 21,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotState {
    BullishCloud,
    BearishCloud,
}

impl PivotState {
    pub fn as_str(self) -> &'static str {
        match self {
            PivotState::BullishCloud => "bullish_cloud",
            PivotState::BearishCloud => "bearish_cloud",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bullish_cloud" => Some(PivotState::BullishCloud),
            "bearish_cloud" => Some(PivotState::BearishCloud),
            _ => None,
        }
    }

    /// `fast >= pivot >= slow` is bullish, `fast < pivot <= slow` is bearish.
    ///
    /// The two remaining orderings (`fast >= pivot < slow` and
    /// `fast < pivot > slow`) classify as nothing, and the caller carries the
    /// previous state forward. Kept as observed, though the gap may be
    /// unintended.
    pub fn classify(fast: f64, pivot: f64, slow: f64) -> Option<Self> {
        if fast >= pivot && pivot >= slow {
            Some(PivotState::BullishCloud)
        } else if fast < pivot && pivot <= slow {
            Some(PivotState::BearishCloud)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvictionState {
    Bullish,
    Bearish,
}

impl ConvictionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConvictionState::Bullish => "bullish",
            ConvictionState::Bearish => "bearish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bullish" => Some(ConvictionState::Bullish),
            "bearish" => Some(ConvictionState::Bearish),
            _ => None,
        }
    }

    /// Equal conviction EMAs classify as nothing.
    pub fn classify(fast_conviction: f64, slow_conviction: f64) -> Option<Self> {
        if fast_conviction > slow_conviction {
            Some(ConvictionState::Bullish)
        } else if fast_conviction < slow_conviction {
            Some(ConvictionState::Bearish)
        } else {
            None
        }
    }
}

/// All six EMAs over a close series, one value per bar.
#[derive(Debug, Clone)]
struct Ribbon {
    fast: Vec<f64>,
    pivot: Vec<f64>,
    slow: Vec<f64>,
    fast_conviction: Vec<f64>,
    slow_conviction: Vec<f64>,
    bias: Vec<f64>,
}

impl Ribbon {
    fn compute(closes: &[f64], p: &RibbonPeriods) -> Self {
        Self {
            fast: ema_series(closes, p.fast),
            pivot: ema_series(closes, p.pivot),
            slow: ema_series(closes, p.slow),
            fast_conviction: ema_series(closes, p.fast_conviction),
            slow_conviction: ema_series(closes, p.slow_conviction),
            bias: ema_series(closes, p.bias),
        }
    }

    fn at(&self, i: usize) -> RibbonSnapshot {
        RibbonSnapshot {
            fast: self.fast[i],
            pivot: self.pivot[i],
            slow: self.slow[i],
            fast_conviction: self.fast_conviction[i],
            slow_conviction: self.slow_conviction[i],
            bias: self.bias[i],
        }
    }
}

/// EMA values at a single bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RibbonSnapshot {
    pub fast: f64,
    pub pivot: f64,
    pub slow: f64,
    pub fast_conviction: f64,
    pub slow_conviction: f64,
    pub bias: f64,
}

/// Outcome of classifying one bar against the prior persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub pivot: Option<PivotState>,
    pub conviction: Option<ConvictionState>,
    pub changed: bool,
}

impl Decision {
    /// Classify `snap`, carrying prior states forward where a classification
    /// is undecided. A cold start (no prior) fires on the first decided bar.
    pub fn decide(
        snap: &RibbonSnapshot,
        prior_pivot: Option<PivotState>,
        prior_conviction: Option<ConvictionState>,
    ) -> Self {
        let pivot = PivotState::classify(snap.fast, snap.pivot, snap.slow).or(prior_pivot);
        let conviction =
            ConvictionState::classify(snap.fast_conviction, snap.slow_conviction).or(prior_conviction);
        Self {
            pivot,
            conviction,
            changed: pivot != prior_pivot || conviction != prior_conviction,
        }
    }

    pub fn kind(&self) -> SignalKind {
        if self.pivot == Some(PivotState::BullishCloud) {
            SignalKind::Buy
        } else {
            SignalKind::Sell
        }
    }

    fn to_state(self) -> StateMap {
        StateMap::from([
            (PIVOT_KEY.to_string(), self.pivot.map(|s| s.as_str().to_string())),
            (
                CONVICTION_KEY.to_string(),
                self.conviction.map(|s| s.as_str().to_string()),
            ),
        ])
    }
}

/// Pure result of `PivotRibbon::evaluate`: the record plus the state to
/// persist, present only when the record fired.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub record: SignalRecord,
    pub next_state: Option<StateMap>,
}

pub struct PivotRibbon {
    name: String,
    periods: RibbonPeriods,
}

impl PivotRibbon {
    pub const DEFAULT_NAME: &'static str = "EMA_Reversal";

    pub fn new(name: impl Into<String>, periods: RibbonPeriods) -> Self {
        Self {
            name: name.into(),
            periods,
        }
    }

    pub fn periods(&self) -> &RibbonPeriods {
        &self.periods
    }

    /// Classify the latest bar of `series` against `prior` without touching
    /// the state store.
    pub fn evaluate(&self, series: &HistoricalSeries, prior: &StateMap) -> Result<Evaluation> {
        let Some(last_bar) = series.last() else {
            return Err(self.compute_error(series, "series has no bars"));
        };
        let closes = series.closes();
        if closes.iter().any(|c| !c.is_finite()) {
            return Err(self.compute_error(series, "series contains non-finite closes"));
        }

        let ribbon = Ribbon::compute(&closes, &self.periods);
        let snap = ribbon.at(closes.len() - 1);

        let prior_pivot = prior_value(prior, PIVOT_KEY).and_then(PivotState::parse);
        let prior_conviction = prior_value(prior, CONVICTION_KEY).and_then(ConvictionState::parse);
        let decision = Decision::decide(&snap, prior_pivot, prior_conviction);

        debug!(
            symbol = %series.symbol,
            indicator = %self.name,
            ?prior_pivot,
            ?prior_conviction,
            pivot = ?decision.pivot,
            conviction = ?decision.conviction,
            changed = decision.changed,
            "Ribbon classified"
        );

        if !decision.changed {
            return Ok(Evaluation {
                record: SignalRecord::quiet(&self.name, series.symbol.clone()),
                next_state: None,
            });
        }

        let kind = decision.kind();
        let record = SignalRecord {
            signal: true,
            name: self.name.clone(),
            symbol: series.symbol.clone(),
            kind: Some(kind),
            price: Some(last_bar.close),
            timestamp: Some(last_bar.timestamp),
            message: Some(self.message(series, &decision, &snap)),
        };
        Ok(Evaluation {
            record,
            next_state: Some(decision.to_state()),
        })
    }

    fn message(&self, series: &HistoricalSeries, decision: &Decision, snap: &RibbonSnapshot) -> String {
        let p = &self.periods;
        let bar = series.last().map(|b| (b.close, b.timestamp.to_rfc3339()));
        let (close, timestamp) = bar.unwrap_or((f64::NAN, String::new()));
        let bias = if close >= snap.bias { "above" } else { "below" };
        format!(
            "Signal generated based on Saty Pivot Ribbon strategy indicating that a reversal occurred.\n\
             Stock: {symbol}\n\
             Price: {close:.2}\n\
             Timestamp: {timestamp}\n\
             Sentiment: {kind}\n\
             Pivot State {fast}ema, {pivot}ema, {slow}ema: {pivot_state}\n\
             Conviction State {fc}ema & {sc}ema: {conviction_state}\n\
             Bias: price {bias} the {bias_period}ema",
            symbol = series.symbol,
            kind = decision.kind(),
            fast = p.fast,
            pivot = p.pivot,
            slow = p.slow,
            pivot_state = decision.pivot.map_or("unknown", PivotState::as_str),
            fc = p.fast_conviction,
            sc = p.slow_conviction,
            conviction_state = decision.conviction.map_or("unknown", ConvictionState::as_str),
            bias_period = p.bias,
        )
    }

    /// Chart of the last `CHART_WINDOW` bars. EMAs are computed over the
    /// whole series and then cut, so the window shows settled values.
    pub fn render(&self, series: &HistoricalSeries) -> Result<ChartArtifact> {
        if series.is_empty() {
            return Err(self.compute_error(series, "series has no bars"));
        }
        let closes = series.closes();
        let ribbon = Ribbon::compute(&closes, &self.periods);
        let start = closes.len().saturating_sub(CHART_WINDOW);
        let window = |v: &[f64]| v[start..].to_vec();

        let x_labels = series.bars[start..]
            .iter()
            .map(|b| b.timestamp.format("%m-%d %H:%M").to_string())
            .collect();

        let p = &self.periods;
        let lines = vec![
            line("Close Price", "black", 0.3, window(&closes)),
            line(&format!("Fast EMA ({})", p.fast), "green", 1.0, window(&ribbon.fast)),
            line(&format!("Pivot EMA ({})", p.pivot), "blue", 1.0, window(&ribbon.pivot)),
            line(&format!("Slow EMA ({})", p.slow), "red", 1.0, window(&ribbon.slow)),
        ];

        let clouds = vec![
            CloudBand {
                upper: window(&ribbon.fast),
                lower: window(&ribbon.pivot),
                above_label: "Bullish Fast Cloud".into(),
                above_color: "green".into(),
                below_label: "Bearish Fast Cloud".into(),
                below_color: "red".into(),
            },
            CloudBand {
                upper: window(&ribbon.pivot),
                lower: window(&ribbon.slow),
                above_label: "Bullish Slow Cloud".into(),
                above_color: "blue".into(),
                below_label: "Bearish Slow Cloud".into(),
                below_color: "orange".into(),
            },
        ];

        Ok(ChartArtifact {
            title: format!("Saty Pivot Ribbon: {}", series.symbol),
            x_labels,
            lines,
            clouds,
            annotations: transitions(&ribbon, start),
        })
    }

    fn compute_error(&self, series: &HistoricalSeries, reason: &str) -> Error {
        Error::Compute {
            indicator: self.name.clone(),
            symbol: series.symbol.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Indicator for PivotRibbon {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compute(&self, handle: &SymbolHandle, states: &SignalStateStore) -> Result<SignalRecord> {
        let series = handle.series()?;
        let prior = states.read(&handle.symbol, &self.name).await;
        let evaluation = self.evaluate(series, &prior)?;
        if let Some(next) = evaluation.next_state {
            states.write(&handle.symbol, &self.name, next).await?;
        }
        Ok(evaluation.record)
    }

    fn compute_and_render(&self, handle: &SymbolHandle) -> Result<ChartArtifact> {
        self.render(handle.series()?)
    }
}

fn prior_value<'a>(prior: &'a StateMap, key: &str) -> Option<&'a str> {
    prior.get(key).and_then(|v| v.as_deref())
}

fn line(label: &str, color: &str, opacity: f64, values: Vec<f64>) -> LineSeries {
    LineSeries {
        label: label.to_string(),
        color: color.to_string(),
        opacity,
        values,
    }
}

/// Markers at every pivot and conviction change inside the window, walking
/// forward from an unknown state at the window start.
fn transitions(ribbon: &Ribbon, start: usize) -> Vec<Annotation> {
    let mut notes = Vec::new();
    let mut pivot_state = None;
    let mut conviction_state = None;

    for i in start..ribbon.fast.len() {
        let snap = ribbon.at(i);
        let index = i - start;

        if let Some(state) = PivotState::classify(snap.fast, snap.pivot, snap.slow) {
            if pivot_state != Some(state) {
                let (label, tone) = match state {
                    PivotState::BullishCloud => ("Bullish Clouds", Tone::Bullish),
                    PivotState::BearishCloud => ("Bearish Clouds", Tone::Bearish),
                };
                notes.push(Annotation {
                    index,
                    price: snap.slow,
                    label: label.into(),
                    tone,
                });
                pivot_state = Some(state);
            }
        }

        if let Some(state) = ConvictionState::classify(snap.fast_conviction, snap.slow_conviction) {
            if conviction_state != Some(state) {
                let (label, tone, price) = match state {
                    ConvictionState::Bullish => ("Bullish Conviction", Tone::Bullish, snap.slow),
                    ConvictionState::Bearish => ("Bearish Conviction", Tone::Bearish, snap.fast),
                };
                notes.push(Annotation {
                    index,
                    price,
                    label: label.into(),
                    tone,
                });
                conviction_state = Some(state);
            }
        }
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, FixedOffset};
    use common::{Bar, Symbol};
    use std::sync::Arc;
    use store::{KvStore, MemoryStore};

    fn series_from(closes: &[f64]) -> HistoricalSeries {
        let t0: DateTime<FixedOffset> = "2024-03-01T09:30:00-05:00".parse().unwrap();
        HistoricalSeries {
            symbol: Symbol::parse("TEST").unwrap(),
            timezone: "America/New_York".into(),
            bars: closes
                .iter()
                .enumerate()
                .map(|(i, &c)| Bar {
                    timestamp: t0 + Duration::minutes(5 * i as i64),
                    open: c,
                    high: c,
                    low: c,
                    close: c,
                    volume: 1_000.0,
                })
                .collect(),
        }
    }

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    fn falling(n: usize) -> Vec<f64> {
        (0..n).map(|i| 200.0 - i as f64 * 0.5).collect()
    }

    fn ribbon() -> PivotRibbon {
        PivotRibbon::new(PivotRibbon::DEFAULT_NAME, RibbonPeriods::default())
    }

    fn prior(pivot: Option<&str>, conviction: Option<&str>) -> StateMap {
        StateMap::from([
            (PIVOT_KEY.to_string(), pivot.map(str::to_string)),
            (CONVICTION_KEY.to_string(), conviction.map(str::to_string)),
        ])
    }

    fn snap(fast: f64, pivot: f64, slow: f64, fc: f64, sc: f64) -> RibbonSnapshot {
        RibbonSnapshot {
            fast,
            pivot,
            slow,
            fast_conviction: fc,
            slow_conviction: sc,
            bias: pivot,
        }
    }

    #[test]
    fn pivot_zones() {
        assert_eq!(PivotState::classify(3.0, 2.0, 1.0), Some(PivotState::BullishCloud));
        assert_eq!(PivotState::classify(2.0, 2.0, 2.0), Some(PivotState::BullishCloud));
        assert_eq!(PivotState::classify(1.0, 2.0, 3.0), Some(PivotState::BearishCloud));
        assert_eq!(PivotState::classify(1.0, 2.0, 2.0), Some(PivotState::BearishCloud));
        // undecided orderings
        assert_eq!(PivotState::classify(2.0, 1.0, 3.0), None);
        assert_eq!(PivotState::classify(1.0, 3.0, 2.0), None);
    }

    #[test]
    fn cold_start_rising_series_is_buy() {
        let eval = ribbon().evaluate(&series_from(&rising(120)), &StateMap::new()).unwrap();
        assert!(eval.record.signal);
        assert_eq!(eval.record.kind, Some(SignalKind::Buy));
        assert_eq!(eval.record.price, Some(100.0 + 119.0 * 0.5));
        assert!(eval.record.timestamp.is_some());
        assert_eq!(eval.next_state, Some(prior(Some("bullish_cloud"), Some("bullish"))));
    }

    #[test]
    fn cold_start_falling_series_is_sell() {
        let eval = ribbon().evaluate(&series_from(&falling(120)), &StateMap::new()).unwrap();
        assert!(eval.record.signal);
        assert_eq!(eval.record.kind, Some(SignalKind::Sell));
        assert_eq!(eval.next_state, Some(prior(Some("bearish_cloud"), Some("bearish"))));
    }

    #[test]
    fn unchanged_classification_is_quiet() {
        let eval = ribbon()
            .evaluate(&series_from(&rising(120)), &prior(Some("bullish_cloud"), Some("bullish")))
            .unwrap();
        assert_eq!(eval.record, SignalRecord::quiet("EMA_Reversal", Symbol::parse("TEST").unwrap()));
        assert!(eval.next_state.is_none());
    }

    #[test]
    fn conviction_change_alone_fires() {
        let d = Decision::decide(
            &snap(3.0, 2.0, 1.0, 1.0, 2.0),
            Some(PivotState::BullishCloud),
            Some(ConvictionState::Bullish),
        );
        assert!(d.changed);
        assert_eq!(d.conviction, Some(ConvictionState::Bearish));
        // kind follows the pivot cloud, not conviction
        assert_eq!(d.kind(), SignalKind::Buy);
    }

    #[test]
    fn undecided_pivot_carries_prior_forward() {
        // fast < pivot but pivot > slow: neither cloud
        let d = Decision::decide(
            &snap(2.0, 3.0, 1.0, 5.0, 4.0),
            Some(PivotState::BullishCloud),
            Some(ConvictionState::Bullish),
        );
        assert_eq!(d.pivot, Some(PivotState::BullishCloud));
        assert!(!d.changed);
    }

    #[test]
    fn undecided_on_cold_start_stays_unknown() {
        let d = Decision::decide(&snap(2.0, 3.0, 1.0, 4.0, 4.0), None, None);
        assert_eq!(d.pivot, None);
        assert_eq!(d.conviction, None);
        assert!(!d.changed);
    }

    #[test]
    fn unknown_persisted_values_count_as_no_prior() {
        let eval = ribbon()
            .evaluate(&series_from(&rising(60)), &prior(Some("sideways"), None))
            .unwrap();
        assert!(eval.record.signal);
    }

    #[test]
    fn empty_series_is_compute_error() {
        let err = ribbon().evaluate(&series_from(&[]), &StateMap::new()).unwrap_err();
        assert!(matches!(err, Error::Compute { .. }));
    }

    #[test]
    fn message_names_states_and_periods() {
        let eval = ribbon().evaluate(&series_from(&rising(120)), &StateMap::new()).unwrap();
        let msg = eval.record.message.unwrap();
        assert!(msg.contains("Stock: TEST"));
        assert!(msg.contains("Sentiment: Buy"));
        assert!(msg.contains("Pivot State 8ema, 21ema, 34ema: bullish_cloud"));
        assert!(msg.contains("Conviction State 13ema & 48ema: bullish"));
    }

    /// Memory store that counts writes.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        saves: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl KvStore for CountingStore {
        async fn load(&self, key: &str) -> Result<Option<String>> {
            self.inner.load(key).await
        }

        async fn save(&self, key: &str, value: &str) -> Result<()> {
            self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.save(key, value).await
        }
    }

    #[tokio::test]
    async fn compute_persists_only_on_transition() {
        let kv = Arc::new(CountingStore::default());
        let states = SignalStateStore::new(kv.clone());
        let mut handle = SymbolHandle::new(Symbol::parse("TEST").unwrap());
        handle.series = Some(series_from(&rising(120)));
        let indicator = ribbon();

        let first = indicator.compute(&handle, &states).await.unwrap();
        assert!(first.signal);
        let saved = kv.inner.raw("TEST").await.unwrap();
        assert_eq!(kv.saves.load(std::sync::atomic::Ordering::SeqCst), 1);

        let second = indicator.compute(&handle, &states).await.unwrap();
        assert!(!second.signal);
        assert_eq!(kv.saves.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(kv.inner.raw("TEST").await.unwrap(), saved);
    }

    #[tokio::test]
    async fn compute_without_series_errors() {
        let states = SignalStateStore::new(Arc::new(MemoryStore::new()));
        let handle = SymbolHandle::new(Symbol::parse("TEST").unwrap());
        assert!(ribbon().compute(&handle, &states).await.is_err());
    }

    #[test]
    fn render_uses_tail_window() {
        let series = series_from(&rising(200));
        let chart = ribbon().render(&series).unwrap();
        assert_eq!(chart.bar_count(), CHART_WINDOW);
        assert_eq!(chart.lines.len(), 4);
        assert_eq!(chart.clouds.len(), 2);
        assert!(chart.lines.iter().all(|l| l.values.len() == CHART_WINDOW));
        assert_eq!(chart.lines[0].values.last(), Some(&(100.0 + 199.0 * 0.5)));
    }

    #[test]
    fn render_short_series_uses_everything() {
        let chart = ribbon().render(&series_from(&rising(30))).unwrap();
        assert_eq!(chart.bar_count(), 30);
    }

    #[test]
    fn render_marks_every_transition_in_window() {
        // down, up, down: at least one bullish and one bearish cloud marker
        let mut closes = falling(60);
        let low = *closes.last().unwrap();
        closes.extend((1..=40).map(|i| low + i as f64 * 2.0));
        let high = *closes.last().unwrap();
        closes.extend((1..=40).map(|i| high - i as f64 * 2.0));

        let chart = ribbon().render(&series_from(&closes)).unwrap();
        let labels: Vec<&str> = chart.annotations.iter().map(|a| a.label.as_str()).collect();

        assert!(labels.contains(&"Bullish Clouds"));
        assert!(labels.contains(&"Bearish Clouds"));
        assert!(labels.contains(&"Bullish Conviction"));
        assert!(labels.contains(&"Bearish Conviction"));
        assert!(chart.annotations.iter().all(|a| a.index < chart.bar_count()));
    }

    #[test]
    fn render_is_independent_of_state() {
        let series = series_from(&rising(100));
        let a = ribbon().render(&series).unwrap();
        let b = ribbon().render(&series).unwrap();
        assert_eq!(a, b);
    }
}
