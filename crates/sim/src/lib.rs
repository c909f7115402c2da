//! Offline stand-ins for the market-data provider and the chat sink.
//!
//! `SimMarketData` backs `DATA_SOURCE=sim` runs and the engine tests.
//! `RecordingSink` captures everything the pipeline would have posted; it is
//! a test double only, and sim runs still publish to the signal chat.

pub mod market;
pub mod sink;

pub use market::SimMarketData;
pub use sink::{Published, RecordingSink};
