pub mod chart;
pub mod config;
pub mod error;
pub mod market;
pub mod sink;
pub mod types;

pub use chart::{Annotation, ChartArtifact, CloudBand, LineSeries, Tone};
pub use config::Config;
pub use error::{Error, Result};
pub use market::MarketData;
pub use sink::SignalSink;
pub use types::*;
