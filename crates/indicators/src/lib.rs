pub mod config;
pub mod indicators;
pub mod registry;

pub use config::{IndicatorConfig, IndicatorFileConfig};
pub use indicators::{PivotRibbon, RibbonPeriods};
pub use registry::IndicatorSet;

use async_trait::async_trait;

use common::{ChartArtifact, Result, SignalRecord, SymbolHandle};
use store::SignalStateStore;

/// All indicator implementations must satisfy this trait.
///
/// New indicators are added to an `IndicatorSet`; the scheduler never needs
/// to know about them individually.
#[async_trait]
pub trait Indicator: Send + Sync {
    /// Name used in alerts and as the state-store namespace. Must be unique
    /// within a set.
    fn name(&self) -> &str;

    /// Evaluate the handle's latest bar against the persisted prior state.
    /// Persists the new state only when the returned record fired.
    async fn compute(&self, handle: &SymbolHandle, states: &SignalStateStore) -> Result<SignalRecord>;

    /// Chart of the handle's recent history. Needs no prior `compute`.
    fn compute_and_render(&self, handle: &SymbolHandle) -> Result<ChartArtifact>;
}
