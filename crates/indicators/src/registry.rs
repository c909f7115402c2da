use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::config::{IndicatorConfig, IndicatorFileConfig};
use crate::indicators::{PivotRibbon, RibbonPeriods};
use crate::Indicator;

/// Ordered list of active indicators. Every symbol runs through all of them,
/// in registration order.
pub struct IndicatorSet {
    indicators: Vec<Box<dyn Indicator>>,
}

impl IndicatorSet {
    /// Panics on duplicate names, since two indicators would then share state.
    pub fn new(indicators: Vec<Box<dyn Indicator>>) -> Self {
        let mut seen = HashSet::new();
        for ind in &indicators {
            assert!(
                seen.insert(ind.name().to_string()),
                "Duplicate indicator name '{}'",
                ind.name()
            );
        }
        Self { indicators }
    }

    /// Build the set from config, exiting on unknown indicator types.
    pub fn from_config(file_cfg: &IndicatorFileConfig) -> Self {
        let indicators = file_cfg
            .indicators
            .iter()
            .map(|cfg| {
                let indicator = build_indicator(cfg).unwrap_or_else(|e| {
                    panic!("Unknown indicator type '{}': {e}", cfg.indicator_type)
                });
                info!(name = %indicator.name(), "Registered indicator");
                indicator
            })
            .collect();
        Self::new(indicators)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Indicator> {
        self.indicators.iter().map(|b| b.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.indicators.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }
}

impl Default for IndicatorSet {
    fn default() -> Self {
        Self::from_config(&IndicatorFileConfig::default())
    }
}

// ─── Indicator builders ───────────────────────────────────────────────────────

fn build_indicator(cfg: &IndicatorConfig) -> Result<Box<dyn Indicator>, String> {
    match cfg.indicator_type.as_str() {
        "pivot_ribbon" => {
            let d = RibbonPeriods::default();
            let periods = RibbonPeriods {
                fast: param_usize(&cfg.params, "fast", d.fast),
                pivot: param_usize(&cfg.params, "pivot", d.pivot),
                slow: param_usize(&cfg.params, "slow", d.slow),
                fast_conviction: param_usize(&cfg.params, "fast_conviction", d.fast_conviction),
                slow_conviction: param_usize(&cfg.params, "slow_conviction", d.slow_conviction),
                bias: param_usize(&cfg.params, "bias", d.bias),
            };
            let name = cfg
                .name
                .clone()
                .unwrap_or_else(|| PivotRibbon::DEFAULT_NAME.to_string());
            Ok(Box::new(PivotRibbon::new(name, periods)))
        }
        other => Err(format!("unknown type '{other}'")),
    }
}

fn param_usize(params: &HashMap<String, toml::Value>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_integer())
        .filter(|v| *v > 0)
        .map(|v| v as usize)
        .unwrap_or(default)
}
