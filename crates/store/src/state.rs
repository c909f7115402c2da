use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use common::{Error, Result, Symbol};

use crate::KvStore;

/// Classification keys of one indicator, e.g. `pivot_last_state -> "bullish_cloud"`.
/// `None` means unknown / never classified.
pub type StateMap = BTreeMap<String, Option<String>>;

/// Everything persisted for one symbol, keyed by indicator name.
type SymbolRecord = BTreeMap<String, StateMap>;

/// Durable per-(symbol, indicator) cache of last-seen classifications.
///
/// One document per symbol. Every write rewrites that whole document, so
/// entries of other indicators on the same symbol are preserved. Indicators
/// must use disjoint names; concurrent writers to one symbol are not guarded.
#[derive(Clone)]
pub struct SignalStateStore {
    store: Arc<dyn KvStore>,
}

impl SignalStateStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Prior state for `indicator` on `symbol`. Empty when nothing was saved
    /// or the document is unreadable; corruption never reaches the caller.
    pub async fn read(&self, symbol: &Symbol, indicator: &str) -> StateMap {
        match self.load_record(symbol).await {
            Ok(mut record) => record.remove(indicator).unwrap_or_default(),
            Err(e) => {
                warn!(symbol = %symbol, indicator, error = %e, "Treating signal state as empty");
                StateMap::new()
            }
        }
    }

    /// Replace the entry for `indicator` and persist the symbol's full record.
    pub async fn write(&self, symbol: &Symbol, indicator: &str, state: StateMap) -> Result<()> {
        let mut record = match self.load_record(symbol).await {
            Ok(record) => record,
            Err(e @ Error::StateCorrupt { .. }) => {
                warn!(symbol = %symbol, error = %e, "Overwriting corrupt signal state");
                SymbolRecord::new()
            }
            Err(e) => return Err(e),
        };
        record.insert(indicator.to_string(), state);
        let text = serde_json::to_string(&record)?;
        self.store.save(symbol.as_str(), &text).await
    }

    async fn load_record(&self, symbol: &Symbol) -> Result<SymbolRecord> {
        let Some(text) = self.store.load(symbol.as_str()).await? else {
            return Ok(SymbolRecord::new());
        };
        serde_json::from_str(&text).map_err(|e| Error::StateCorrupt {
            key: symbol.to_string(),
            reason: e.to_string(),
        })
    }
}
