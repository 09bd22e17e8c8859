//! Prometheus metrics for the worker.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use reelpipe_queue::TaskDispatcher;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const TASKS_STARTED_TOTAL: &str = "reelpipe_tasks_started_total";
    pub const TASKS_COMPLETED_TOTAL: &str = "reelpipe_tasks_completed_total";
    pub const TASKS_FAILED_TOTAL: &str = "reelpipe_tasks_failed_total";
    pub const TASKS_REJECTED_BUSY_TOTAL: &str = "reelpipe_tasks_rejected_busy_total";
    pub const TASK_DURATION_SECONDS: &str = "reelpipe_task_duration_seconds";
    pub const QUEUE_DEPTH: &str = "reelpipe_queue_depth";
}

/// Install the recorder and serve `/metrics` on `port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))?;
    info!("Serving Prometheus metrics on {}", addr);
    Ok(())
}

pub fn record_task_started() {
    counter!(names::TASKS_STARTED_TOTAL).increment(1);
}

/// Record a finished attempt.
pub fn record_task_completed(strategy: &str, watermarked: bool, duration: Duration) {
    let labels = [
        ("strategy", strategy.to_string()),
        ("watermarked", watermarked.to_string()),
    ];
    counter!(names::TASKS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::TASK_DURATION_SECONDS, "outcome" => "completed").record(duration.as_secs_f64());
}

/// Record a failed attempt.
pub fn record_task_failed(stage: &str, kind: &str, duration: Duration) {
    let labels = [("stage", stage.to_string()), ("kind", kind.to_string())];
    counter!(names::TASKS_FAILED_TOTAL, &labels).increment(1);
    histogram!(names::TASK_DURATION_SECONDS, "outcome" => "failed").record(duration.as_secs_f64());
}

pub fn record_task_rejected_busy() {
    counter!(names::TASKS_REJECTED_BUSY_TOTAL).increment(1);
}

/// Poll the broker depth into a gauge until `shutdown` turns true.
pub fn spawn_depth_reporter(
    dispatcher: TaskDispatcher,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            match dispatcher.queue_depth().await {
                Ok(depth) => gauge!(names::QUEUE_DEPTH).set(depth as f64),
                Err(e) => warn!("Failed to read queue depth: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelpipe_queue::{LeasingBroker, MemoryTransport, SqsSettings};
    use std::sync::Arc;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_task_started();
        record_task_completed("combined_pass", true, Duration::from_secs(3));
        record_task_failed("downloading", "not_found", Duration::from_millis(20));
        record_task_rejected_busy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_depth_reporter_stops_on_shutdown() {
        let broker = Arc::new(LeasingBroker::new(
            MemoryTransport::new(),
            SqsSettings::default(),
            1,
        ));
        let (tx, rx) = watch::channel(false);
        let handle = spawn_depth_reporter(TaskDispatcher::new(broker), Duration::from_secs(15), rx);

        tokio::time::sleep(Duration::from_secs(40)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
