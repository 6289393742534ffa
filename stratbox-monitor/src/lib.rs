//! Execution monitor: per-process resource polling, edge-triggered threshold
//! alerts, and bounded timelines summarized on detach.

mod alerts;
mod monitor;
mod snapshot;
mod summary;

pub use alerts::{Alert, AlertCallback, AlertEngine, AlertThresholds, Metric};
pub use monitor::{ExecutionMonitor, MonitorError, MonitorHandle};
pub use snapshot::ResourceSnapshot;
pub use summary::{ExecutionSummary, MetricStats, Timeline};
