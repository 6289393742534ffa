//! Aggregated view of one execution's resource timeline

use crate::snapshot::ResourceSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use stratbox_common::SessionId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub peak: f64,
    pub average: f64,
}

/// Final report returned by `detach`. Serializes to JSON for export to an
/// external log aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub session_id: SessionId,
    pub total_duration_ms: u64,
    pub cpu_percent: MetricStats,
    pub memory_bytes: MetricStats,
    pub open_files: MetricStats,
    pub threads: MetricStats,
    pub connections: MetricStats,
    pub breach_count: u64,
    /// Set when the process vanished mid-poll and the timeline was finalized
    /// with whatever had been collected.
    pub process_unavailable: bool,
    pub snapshots: Vec<ResourceSnapshot>,
}

/// Bounded, timestamp-ordered snapshot sequence for one execution.
///
/// When the retention cap is reached the oldest entries are dropped so the
/// most recent window survives long-running executions.
pub struct Timeline {
    snapshots: VecDeque<ResourceSnapshot>,
    cap: usize,
    dropped: u64,
}

impl Timeline {
    pub fn new(cap: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            cap: cap.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, snapshot: ResourceSnapshot) {
        if self.snapshots.len() == self.cap {
            self.snapshots.pop_front();
            self.dropped += 1;
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn into_summary(
        self,
        session_id: SessionId,
        total_duration_ms: u64,
        breach_count: u64,
        process_unavailable: bool,
    ) -> ExecutionSummary {
        let snapshots: Vec<ResourceSnapshot> = self.snapshots.into();
        if self.dropped > 0 {
            tracing::debug!(
                session_id = %session_id,
                dropped = self.dropped,
                "timeline hit retention cap, oldest snapshots dropped"
            );
        }
        ExecutionSummary {
            session_id,
            total_duration_ms,
            cpu_percent: stats(&snapshots, |s| f64::from(s.cpu_percent)),
            memory_bytes: stats(&snapshots, |s| s.memory_bytes as f64),
            open_files: stats(&snapshots, |s| s.open_files as f64),
            threads: stats(&snapshots, |s| s.threads as f64),
            connections: stats(&snapshots, |s| s.connections as f64),
            breach_count,
            process_unavailable,
            snapshots,
        }
    }
}

fn stats(snapshots: &[ResourceSnapshot], read: impl Fn(&ResourceSnapshot) -> f64) -> MetricStats {
    if snapshots.is_empty() {
        return MetricStats::default();
    }
    let mut peak = f64::MIN;
    let mut sum = 0.0;
    for snapshot in snapshots {
        let value = read(snapshot);
        peak = peak.max(value);
        sum += value;
    }
    MetricStats {
        peak,
        average: sum / snapshots.len() as f64,
    }
}
