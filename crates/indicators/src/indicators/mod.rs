pub mod ema;
pub mod pivot_ribbon;

pub use ema::ema_series;
pub use pivot_ribbon::{ConvictionState, PivotRibbon, PivotState, RibbonPeriods};
