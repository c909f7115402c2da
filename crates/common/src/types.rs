use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A validated ticker symbol, e.g. "AAPL", "BRK-B" or "^GSPC".
///
/// Normalised to upper case. Only the characters market-data providers use in
/// tickers are accepted, which also keeps the symbol safe as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    const MAX_LEN: usize = 16;

    pub fn parse(raw: &str) -> Result<Self> {
        let normalised = raw.trim().to_uppercase();
        let valid_chars = normalised
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
        let valid_start = normalised
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '^');
        if normalised.len() > Self::MAX_LEN || !valid_start || !valid_chars {
            return Err(Error::InvalidSymbol(raw.trim().to_string()));
        }
        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One OHLC bar. Timestamps carry the series' time zone offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Time-indexed OHLC bars for one symbol, oldest first.
///
/// Replaced wholesale on every fetch; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalSeries {
    pub symbol: Symbol,
    /// IANA name of the zone the timestamps are expressed in.
    pub timezone: String,
    pub bars: Vec<Bar>,
}

impl HistoricalSeries {
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Parameters of a single history fetch. `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub symbol: Symbol,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub interval_minutes: u32,
    pub timezone: String,
}

impl HistoryRequest {
    /// Window `[today - range_days, today + 1)`.
    pub fn trailing(
        symbol: Symbol,
        today: NaiveDate,
        range_days: u32,
        interval_minutes: u32,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            symbol,
            start: today - chrono::Duration::days(i64::from(range_days)),
            end: today + chrono::Duration::days(1),
            interval_minutes,
            timezone: timezone.into(),
        }
    }

    /// Interval in the "5m" notation used by chart APIs.
    pub fn interval_label(&self) -> String {
        format!("{}m", self.interval_minutes)
    }

    pub fn zone(&self) -> Result<Tz> {
        parse_zone(&self.timezone)
    }
}

/// Resolve an IANA zone name such as "America/New_York".
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::Config(format!("unknown time zone '{name}'")))
}

/// Local midnight of `date` in `zone`. On a day whose midnight falls in a
/// DST gap, the first instant of the day.
pub fn zone_midnight(zone: Tz, date: NaiveDate) -> DateTime<Tz> {
    let mut t = date.and_time(NaiveTime::MIN);
    loop {
        if let Some(dt) = zone.from_local_datetime(&t).earliest() {
            return dt;
        }
        t += chrono::Duration::minutes(30);
    }
}

/// Live data handle for a tracked symbol. Created empty and unfetched.
#[derive(Debug, Clone)]
pub struct SymbolHandle {
    pub symbol: Symbol,
    pub series: Option<HistoricalSeries>,
}

impl SymbolHandle {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            series: None,
        }
    }

    /// The fetched series, or an error naming the symbol if none was fetched.
    pub fn series(&self) -> Result<&HistoricalSeries> {
        self.series
            .as_ref()
            .ok_or_else(|| Error::Other(format!("no history fetched for {}", self.symbol)))
    }
}

/// Direction of a fired signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Buy,
    Sell,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Buy => write!(f, "Buy"),
            SignalKind::Sell => write!(f, "Sell"),
        }
    }
}

/// Result of one indicator evaluation. Consumed immediately by publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal: bool,
    pub name: String,
    pub symbol: Symbol,
    pub kind: Option<SignalKind>,
    pub price: Option<f64>,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub message: Option<String>,
}

impl SignalRecord {
    /// A record with no transition: every optional field empty.
    pub fn quiet(name: impl Into<String>, symbol: Symbol) -> Self {
        Self {
            signal: false,
            name: name.into(),
            symbol,
            kind: None,
            price: None,
            timestamp: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Where market data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Yahoo,
    Sim,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Yahoo => write!(f, "yahoo"),
            DataSource::Sim => write!(f, "sim"),
        }
    }
}

/// What happened to one symbol during a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok {
        /// Names of indicators that fired.
        fired: Vec<String>,
        /// Publications the sink rejected.
        publish_failures: usize,
    },
    FetchError { error: String },
    /// An indicator failed. Indicators earlier in the set may already have
    /// fired and published; those are kept here.
    ComputeError {
        error: String,
        #[serde(default)]
        fired: Vec<String>,
        #[serde(default)]
        publish_failures: usize,
    },
}

impl OutcomeStatus {
    pub fn fired(&self) -> &[String] {
        match self {
            OutcomeStatus::Ok { fired, .. } | OutcomeStatus::ComputeError { fired, .. } => fired,
            OutcomeStatus::FetchError { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolOutcome {
    pub symbol: Symbol,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl SymbolOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, OutcomeStatus::Ok { .. })
    }
}

/// Structured result of one full sweep, one entry per symbol in list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<SymbolOutcome>,
}

impl SweepReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }

    pub fn signals_fired(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| o.status.fired().len())
            .sum()
    }

    /// One-line human summary, used for command replies and logs.
    pub fn summary(&self) -> String {
        format!(
            "Sweep {} finished at {}: {} symbols, {} signals, {} failures",
            self.id,
            self.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.outcomes.len(),
            self.signals_fired(),
            self.failures()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_trimmed_and_upper_cased() {
        let s = Symbol::parse("  msft ").unwrap();
        assert_eq!(s.as_str(), "MSFT");
    }

    #[test]
    fn symbol_accepts_index_and_class_tickers() {
        assert!(Symbol::parse("^GSPC").is_ok());
        assert!(Symbol::parse("BRK-B").is_ok());
        assert!(Symbol::parse("EURUSD=X").is_ok());
    }

    #[test]
    fn symbol_rejects_path_like_input() {
        assert!(matches!(Symbol::parse("../etc"), Err(Error::InvalidSymbol(_))));
        assert!(matches!(Symbol::parse(""), Err(Error::InvalidSymbol(_))));
        assert!(matches!(Symbol::parse("A_B"), Err(Error::InvalidSymbol(_))));
        assert!(matches!(Symbol::parse(".."), Err(Error::InvalidSymbol(_))));
    }

    #[test]
    fn trailing_window_spans_range_plus_tomorrow() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let req = HistoryRequest::trailing(Symbol::parse("SPY").unwrap(), today, 10, 5, "UTC");
        assert_eq!(req.start, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(req.end, NaiveDate::from_ymd_opt(2024, 3, 16).unwrap());
        assert_eq!(req.interval_label(), "5m");
    }

    #[test]
    fn signals_fired_counts_partial_compute_failures() {
        let outcome = |symbol: &str, status| SymbolOutcome {
            symbol: Symbol::parse(symbol).unwrap(),
            status,
        };
        let report = SweepReport {
            id: uuid::Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcomes: vec![
                outcome("AAA", OutcomeStatus::Ok { fired: vec!["A".into()], publish_failures: 0 }),
                outcome(
                    "BBB",
                    OutcomeStatus::ComputeError {
                        error: "boom".into(),
                        fired: vec!["A".into()],
                        publish_failures: 0,
                    },
                ),
                outcome("CCC", OutcomeStatus::FetchError { error: "down".into() }),
            ],
        };
        assert_eq!(report.signals_fired(), 2);
        assert_eq!(report.failures(), 2);

        let json = serde_json::to_value(&report.outcomes[1]).unwrap();
        assert_eq!(json["status"], "compute_error");
        assert_eq!(json["fired"], serde_json::json!(["A"]));
    }

    #[test]
    fn zone_midnight_follows_dst() {
        let ny = parse_zone("America/New_York").unwrap();
        let before = zone_midnight(ny, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        let after = zone_midnight(ny, NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
        assert_eq!(before.timestamp(), 1_709_355_600);
        assert_eq!(after.timestamp(), 1_710_216_000);
    }

    #[test]
    fn zone_midnight_skips_a_gap_at_midnight() {
        // Santiago springs forward at 00:00 local, so the day starts at 01:00.
        let scl = parse_zone("America/Santiago").unwrap();
        let day = zone_midnight(scl, NaiveDate::from_ymd_opt(2024, 9, 8).unwrap());
        assert_eq!(day.to_rfc3339(), "2024-09-08T01:00:00-03:00");
    }

    #[test]
    fn unknown_zone_is_a_config_error() {
        assert!(matches!(parse_zone("Mars/Olympus"), Err(Error::Config(_))));
    }
}
