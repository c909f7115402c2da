pub mod lifecycle;
pub mod pipeline;
pub mod yahoo;

pub use lifecycle::{LoopHandle, Scheduler, SchedulerHandle};
pub use pipeline::{Inspection, Pipeline, SweepSettings, HEARTBEAT_TEXT};
pub use yahoo::YahooClient;
