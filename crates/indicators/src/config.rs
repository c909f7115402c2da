use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use tracing::info;

/// Top-level indicator config file (TOML).
///
/// Example `config/indicators.toml`:
/// ```toml
/// [[indicator]]
/// type = "pivot_ribbon"
/// name = "EMA_Reversal"
///
/// [indicator.params]
/// fast = 8
/// pivot = 21
/// slow = 34
/// fast_conviction = 13
/// slow_conviction = 48
/// bias = 21
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndicatorFileConfig {
    #[serde(rename = "indicator", default)]
    pub indicators: Vec<IndicatorConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndicatorConfig {
    /// Indicator type identifier. Only "pivot_ribbon" exists today.
    #[serde(rename = "type")]
    pub indicator_type: String,
    /// Name shown in alerts and used as the state namespace.
    /// Defaults to the type's standard name.
    #[serde(default)]
    pub name: Option<String>,
    /// Indicator-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl Default for IndicatorFileConfig {
    /// A single pivot ribbon with standard periods.
    fn default() -> Self {
        Self {
            indicators: vec![IndicatorConfig {
                indicator_type: "pivot_ribbon".to_string(),
                name: None,
                params: HashMap::new(),
            }],
        }
    }
}

impl IndicatorFileConfig {
    /// Load from a TOML file, falling back to the default set when the file
    /// does not exist. Exits process on any other error.
    pub fn load_or_default(path: &str) -> Self {
        if !Path::new(path).exists() {
            info!(path, "No indicator config file; using the default pivot ribbon");
            return Self::default();
        }
        let content = std::fs::read_to_string(path).unwrap_or_else(|e| {
            panic!("Failed to read indicator config at '{path}': {e}")
        });
        Self::parse(&content).unwrap_or_else(|e| {
            panic!("Failed to parse indicator config at '{path}': {e}")
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
