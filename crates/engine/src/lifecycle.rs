use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::pipeline::Pipeline;

/// A running background loop that can be stopped on its own.
pub struct LoopHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            // tokio panics on a zero period
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(name, ?period, "Loop started");
            loop {
                // Stop is polled first: after a long tick both arms can be
                // ready at once and the pending stop must win. A tick body
                // already running is never cut short.
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => tick().await,
                }
            }
            info!(name, "Loop stopped");
        });
        Self { name, stop_tx, task }
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(name = self.name, error = %e, "Loop task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Handles to the periodic sweep and heartbeat loops.
pub struct SchedulerHandle {
    pub sweeps: LoopHandle,
    pub heartbeat: LoopHandle,
}

impl SchedulerHandle {
    pub async fn stop(self) {
        self.sweeps.stop().await;
        self.heartbeat.stop().await;
    }
}

/// Drives the pipeline on a fixed wall-clock interval, plus a heartbeat.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    loop_interval: Duration,
    heartbeat_interval: Duration,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, loop_interval: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            pipeline,
            loop_interval,
            heartbeat_interval,
        }
    }

    /// Start both loops. The first sweep and heartbeat run immediately.
    pub fn spawn(self) -> SchedulerHandle {
        let pipeline = self.pipeline.clone();
        let sweeps = LoopHandle::spawn("sweep", self.loop_interval, move || {
            let pipeline = pipeline.clone();
            async move {
                pipeline.sweep().await;
            }
        });

        let pipeline = self.pipeline;
        let heartbeat = LoopHandle::spawn("heartbeat", self.heartbeat_interval, move || {
            let pipeline = pipeline.clone();
            async move { pipeline.heartbeat().await }
        });

        SchedulerHandle { sweeps, heartbeat }
    }
}
