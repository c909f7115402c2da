use async_trait::async_trait;

use crate::{HistoricalSeries, HistoryRequest, Result, Symbol};

/// Abstraction over the market-data provider.
///
/// `YahooClient` implements this against the public chart API.
/// `SimMarketData` implements this for offline runs and tests.
///
/// Any failure is scoped to the symbol being queried; callers isolate it.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Fetch OHLC bars for `req.symbol` over `[req.start, req.end)`.
    /// An empty window is an error, not an empty series.
    async fn fetch_history(&self, req: &HistoryRequest) -> Result<HistoricalSeries>;

    /// Whether the provider knows this symbol at all.
    async fn symbol_exists(&self, symbol: &Symbol) -> Result<bool>;
}
