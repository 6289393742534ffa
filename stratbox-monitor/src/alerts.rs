//! Threshold alerting over resource snapshots.
//!
//! Alerts are edge-triggered: one firing per crossing, re-armed only after
//! the metric drops back under its threshold. A sustained breach produces a
//! single alert, not one per poll.

use crate::snapshot::ResourceSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CpuPercent,
    MemoryBytes,
    OpenFiles,
    Threads,
    Connections,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Metric::CpuPercent => "cpu_percent",
            Metric::MemoryBytes => "memory_bytes",
            Metric::OpenFiles => "open_files",
            Metric::Threads => "threads",
            Metric::Connections => "connections",
        };
        f.write_str(name)
    }
}

/// Caller-supplied ceilings; `None` disables alerting for that metric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub cpu_percent: Option<f32>,
    pub memory_bytes: Option<u64>,
    pub open_files: Option<u64>,
    pub threads: Option<u64>,
    pub connections: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub metric: Metric,
    pub value: f64,
    pub threshold: f64,
    pub at: DateTime<Utc>,
}

pub type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

/// Tracks which thresholds are currently breached so each crossing fires once.
pub struct AlertEngine {
    thresholds: AlertThresholds,
    callback: Option<AlertCallback>,
    breached: HashMap<Metric, bool>,
    fired: u64,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds, callback: Option<AlertCallback>) -> Self {
        Self {
            thresholds,
            callback,
            breached: HashMap::new(),
            fired: 0,
        }
    }

    /// Total number of alerts fired so far.
    pub fn breach_count(&self) -> u64 {
        self.fired
    }

    /// Evaluate one snapshot against every configured threshold.
    pub fn evaluate(&mut self, snapshot: &ResourceSnapshot) {
        let readings = [
            (Metric::CpuPercent, self.thresholds.cpu_percent.map(f64::from), f64::from(snapshot.cpu_percent)),
            (Metric::MemoryBytes, self.thresholds.memory_bytes.map(|v| v as f64), snapshot.memory_bytes as f64),
            (Metric::OpenFiles, self.thresholds.open_files.map(|v| v as f64), snapshot.open_files as f64),
            (Metric::Threads, self.thresholds.threads.map(|v| v as f64), snapshot.threads as f64),
            (Metric::Connections, self.thresholds.connections.map(|v| v as f64), snapshot.connections as f64),
        ];

        for (metric, threshold, value) in readings {
            let Some(threshold) = threshold else { continue };
            let over = value > threshold;
            let was_over = self.breached.insert(metric, over).unwrap_or(false);
            if over && !was_over {
                self.fired += 1;
                let alert = Alert {
                    metric,
                    value,
                    threshold,
                    at: snapshot.timestamp,
                };
                tracing::warn!(metric = %metric, value, threshold, "resource threshold crossed");
                if let Some(callback) = &self.callback {
                    callback(&alert);
                }
            }
        }
    }
}
