use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use common::{
    zone_midnight, Bar, Error, HistoricalSeries, HistoryRequest, MarketData, Result, Symbol,
};

const BASE_URL: &str = "https://query1.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";

/// Client for Yahoo's public v8 chart API. No key required.
pub struct YahooClient {
    http: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: Client::builder()
                .use_rustls_tls()
                .user_agent(USER_AGENT)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    fn chart_url(&self, symbol: &Symbol) -> String {
        format!("{}/v8/finance/chart/{}", self.base_url, path_segment(symbol))
    }

    /// GET the chart endpoint. `Ok(None)` means Yahoo does not know the symbol.
    async fn chart(&self, symbol: &Symbol, query: &[(&str, String)]) -> Result<Option<ChartData>> {
        let resp = self
            .http
            .get(self.chart_url(symbol))
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::Fetch {
                symbol: symbol.clone(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let chart: ChartResponse = serde_json::from_str(&body)?;
        if let Some(err) = chart.chart.error {
            if err.code == "Not Found" {
                return Ok(None);
            }
            return Err(Error::Fetch {
                symbol: symbol.clone(),
                reason: format!("{}: {}", err.code, err.description),
            });
        }
        Ok(chart.chart.result.and_then(|r| r.into_iter().next()))
    }
}

impl Default for YahooClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketData for YahooClient {
    async fn fetch_history(&self, req: &HistoryRequest) -> Result<HistoricalSeries> {
        let zone = req.zone()?;
        let query = [
            ("period1", day_start_ts(zone, req.start).to_string()),
            ("period2", day_start_ts(zone, req.end).to_string()),
            ("interval", req.interval_label()),
            ("includePrePost", "false".to_string()),
        ];
        debug!(symbol = %req.symbol, start = %req.start, end = %req.end, "Fetching Yahoo history");

        let data = self.chart(&req.symbol, &query).await?.ok_or_else(|| Error::Fetch {
            symbol: req.symbol.clone(),
            reason: "symbol not found".into(),
        })?;
        let series = parse_series(&req.symbol, zone, data)?;
        debug!(symbol = %req.symbol, bars = series.len(), "Yahoo history received");
        Ok(series)
    }

    async fn symbol_exists(&self, symbol: &Symbol) -> Result<bool> {
        let query = [("range", "5d".to_string()), ("interval", "1d".to_string())];
        let data = self.chart(symbol, &query).await?;
        Ok(data.is_some_and(|d| d.timestamp.is_some_and(|t| !t.is_empty())))
    }
}

/// `^` and `=` appear in index and currency tickers.
fn path_segment(symbol: &Symbol) -> String {
    symbol.as_str().replace('^', "%5E").replace('=', "%3D")
}

/// Window bounds are local midnights in the requested zone.
fn day_start_ts(zone: Tz, date: NaiveDate) -> i64 {
    zone_midnight(zone, date).timestamp()
}

/// Turn one chart result into bars expressed in `zone`, whatever exchange the
/// symbol trades on. Rows without a close are dropped; an empty result is a
/// fetch failure.
fn parse_series(symbol: &Symbol, zone: Tz, data: ChartData) -> Result<HistoricalSeries> {
    let fetch_err = |reason: &str| Error::Fetch {
        symbol: symbol.clone(),
        reason: reason.to_string(),
    };

    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| fetch_err("no quote data"))?;

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(close) = quote.close.get(i).copied().flatten() else {
            continue;
        };
        let timestamp: DateTime<FixedOffset> = Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| fetch_err(&format!("invalid timestamp {ts}")))?
            .with_timezone(&zone)
            .fixed_offset();
        bars.push(Bar {
            timestamp,
            open: quote.open.get(i).copied().flatten().unwrap_or(close),
            high: quote.high.get(i).copied().flatten().unwrap_or(close),
            low: quote.low.get(i).copied().flatten().unwrap_or(close),
            close,
            volume: quote.volume.get(i).copied().flatten().unwrap_or(0.0),
        });
    }

    if bars.is_empty() {
        return Err(fetch_err("no bars in the requested window"));
    }
    Ok(HistoricalSeries {
        symbol: symbol.clone(),
        timezone: zone.name().to_string(),
        bars,
    })
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Deserialize, Default)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": { "symbol": "AAPL", "gmtoffset": -14400, "exchangeTimezoneName": "America/New_York" },
                "timestamp": [1710250200, 1710250500, 1710250800],
                "indicators": { "quote": [{
                    "open":   [170.0, null, 171.0],
                    "high":   [171.0, null, 172.0],
                    "low":    [169.5, null, 170.5],
                    "close":  [170.5, null, 171.5],
                    "volume": [1000, null, 1200]
                }]}
            }],
            "error": null
        }
    }"#;

    fn data(body: &str) -> ChartData {
        let resp: ChartResponse = serde_json::from_str(body).unwrap();
        resp.chart.result.unwrap().into_iter().next().unwrap()
    }

    fn ny() -> Tz {
        common::parse_zone("America/New_York").unwrap()
    }

    #[test]
    fn parses_bars_and_skips_null_closes() {
        let symbol = Symbol::parse("AAPL").unwrap();
        let series = parse_series(&symbol, ny(), data(BODY)).unwrap();
        assert_eq!(series.closes(), vec![170.5, 171.5]);
        assert_eq!(series.timezone, "America/New_York");
        let first = &series.bars[0];
        assert_eq!(first.timestamp.offset().local_minus_utc(), -14400);
        assert_eq!(first.timestamp.to_rfc3339(), "2024-03-12T09:30:00-04:00");
        assert_eq!(first.volume, 1000.0);
    }

    #[test]
    fn foreign_exchange_bars_use_the_requested_zone() {
        // London listing, exchange offset 0; asked for New York time.
        let body = BODY
            .replace("\"AAPL\"", "\"VOD.L\"")
            .replace("-14400", "0")
            .replace("America/New_York", "Europe/London");
        let symbol = Symbol::parse("VOD.L").unwrap();
        let series = parse_series(&symbol, ny(), data(&body)).unwrap();
        assert_eq!(series.timezone, "America/New_York");
        assert_eq!(series.bars[0].timestamp.to_rfc3339(), "2024-03-12T09:30:00-04:00");
    }

    #[test]
    fn offsets_follow_dst_within_one_window() {
        let body = BODY.replace(
            "[1710250200, 1710250500, 1710250800]",
            "[1709908200, 1710250500, 1710250800]",
        );
        let symbol = Symbol::parse("AAPL").unwrap();
        let series = parse_series(&symbol, ny(), data(&body)).unwrap();
        assert_eq!(series.bars[0].timestamp.to_rfc3339(), "2024-03-08T09:30:00-05:00");
        assert_eq!(series.bars[1].timestamp.to_rfc3339(), "2024-03-12T09:40:00-04:00");
    }

    #[test]
    fn window_bounds_are_zone_midnights() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 12).unwrap();
        assert_eq!(day_start_ts(ny(), day), 1_710_216_000);
        assert_eq!(day_start_ts(Tz::UTC, day), 1_710_201_600);
    }

    #[test]
    fn all_null_window_is_fetch_error() {
        let body = BODY.replace("[170.5, null, 171.5]", "[null, null, null]");
        let symbol = Symbol::parse("AAPL").unwrap();
        let err = parse_series(&symbol, ny(), data(&body)).unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[test]
    fn not_found_envelope_parses() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let resp: ChartResponse = serde_json::from_str(body).unwrap();
        assert!(resp.chart.result.is_none());
        assert_eq!(resp.chart.error.unwrap().code, "Not Found");
    }

    #[test]
    fn index_symbols_are_escaped() {
        let client = YahooClient::with_base_url("http://localhost");
        let url = client.chart_url(&Symbol::parse("^GSPC").unwrap());
        assert_eq!(url, "http://localhost/v8/finance/chart/%5EGSPC");
    }
}
