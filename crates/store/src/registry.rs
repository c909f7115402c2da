use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::{Error, MarketData, Result, Symbol, SymbolHandle};

use crate::KvStore;

/// Key of the registry document. Symbols cannot contain `_`, so no symbol's
/// state document can collide with it.
pub const REGISTRY_KEY: &str = "1_ticker_manager";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryRecord {
    #[serde(default)]
    ticker_list: Vec<Symbol>,
}

/// Symbols added to / dropped from the in-memory handle set by a `sync`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncDelta {
    pub added: Vec<Symbol>,
    pub removed: Vec<Symbol>,
}

/// Durable set of tracked symbols plus their live data handles.
///
/// `add`/`remove` only touch the persisted list. The handle set follows it on
/// the next `sync`, which the sweep calls before iterating.
pub struct SymbolRegistry {
    store: Arc<dyn KvStore>,
    handles: Vec<SymbolHandle>,
}

impl SymbolRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            handles: Vec::new(),
        }
    }

    /// Validate and append `raw`. Membership is checked first, then the
    /// provider; nothing is written unless both pass.
    pub async fn add(&mut self, raw: &str, market: &dyn MarketData) -> Result<Symbol> {
        let symbol = Symbol::parse(raw)?;
        let mut record = self.load().await?;
        if record.ticker_list.contains(&symbol) {
            return Err(Error::AlreadyPresent(symbol));
        }

        let exists = market.symbol_exists(&symbol).await.unwrap_or_else(|e| {
            warn!(symbol = %symbol, error = %e, "Existence check failed; treating as invalid");
            false
        });
        if !exists {
            return Err(Error::InvalidSymbol(symbol.to_string()));
        }

        record.ticker_list.push(symbol.clone());
        self.save(&record).await?;
        info!(symbol = %symbol, "Symbol added to registry");
        Ok(symbol)
    }

    pub async fn remove(&mut self, raw: &str) -> Result<Symbol> {
        let symbol = Symbol::parse(raw)?;
        let mut record = self.load().await?;
        let before = record.ticker_list.len();
        record.ticker_list.retain(|s| s != &symbol);
        if record.ticker_list.len() == before {
            return Err(Error::NotPresent(symbol));
        }

        self.save(&record).await?;
        info!(symbol = %symbol, "Symbol removed from registry");
        Ok(symbol)
    }

    /// Persisted symbols in insertion order.
    pub async fn list(&self) -> Result<Vec<Symbol>> {
        Ok(self.load().await?.ticker_list)
    }

    /// Make the handle set equal the persisted list, in list order.
    /// Existing handles are kept; new symbols get empty, unfetched handles.
    pub async fn sync(&mut self) -> Result<SyncDelta> {
        let listed = self.list().await?;
        let mut current: HashMap<Symbol, SymbolHandle> = self
            .handles
            .drain(..)
            .map(|h| (h.symbol.clone(), h))
            .collect();

        let mut delta = SyncDelta::default();
        for symbol in listed {
            let handle = current.remove(&symbol).unwrap_or_else(|| {
                delta.added.push(symbol.clone());
                SymbolHandle::new(symbol.clone())
            });
            // A duplicated entry in a hand-edited file yields a single handle.
            if !self.handles.iter().any(|h| h.symbol == handle.symbol) {
                self.handles.push(handle);
            }
        }
        delta.removed = current.into_keys().collect();
        delta.removed.sort();

        if !delta.added.is_empty() || !delta.removed.is_empty() {
            info!(added = ?delta.added, removed = ?delta.removed, "Registry synced");
        }
        Ok(delta)
    }

    pub fn handles(&self) -> &[SymbolHandle] {
        &self.handles
    }

    pub fn handles_mut(&mut self) -> &mut [SymbolHandle] {
        &mut self.handles
    }

    /// Missing document → empty list, created on the spot. Unreadable
    /// document → empty list with a warning.
    async fn load(&self) -> Result<RegistryRecord> {
        match self.store.load(REGISTRY_KEY).await? {
            Some(text) => Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(error = %e, "Registry document is unreadable; starting from an empty list");
                RegistryRecord::default()
            })),
            None => {
                let record = RegistryRecord::default();
                self.save(&record).await?;
                Ok(record)
            }
        }
    }

    async fn save(&self, record: &RegistryRecord) -> Result<()> {
        let text = serde_json::to_string(record)?;
        self.store.save(REGISTRY_KEY, &text).await
    }
}
