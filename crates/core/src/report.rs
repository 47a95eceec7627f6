use std::{collections::BTreeMap, time::Duration};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    config::ScanConfig,
    dedup::EventRecord,
    events::BusMetricsSnapshot,
    format::format_failure_summary,
    scope::Target,
    workers::ModuleStatsSnapshot,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Succeeded,
    /// Graph integrity was violated.
    Failed { reason: String },
    /// Cancelled from outside.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    Pending,
    Running,
    Finished(ScanOutcome),
}

impl ScanStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "PENDING",
            ScanStatus::Running => "RUNNING",
            ScanStatus::Finished(ScanOutcome::Succeeded) => "FINISHED",
            ScanStatus::Finished(ScanOutcome::Failed { .. }) => "FAILED",
            ScanStatus::Finished(ScanOutcome::Aborted) => "ABORTED",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ScanStatus::Finished(_))
    }
}

/// Payload of `SCAN` events; sinks upsert it by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanRecord {
    pub id: String,
    pub name: String,
    pub status: String,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub duration_seconds: Option<f64>,
    pub duration: Option<String>,
    pub target: Target,
    pub config: ScanConfig,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub scan_id: String,
    pub name: String,
    pub status: ScanStatus,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub duration: Duration,
    pub stats: BusMetricsSnapshot,
    pub module_stats: BTreeMap<String, ModuleStatsSnapshot>,
    /// Canonical event records in emission order.
    pub graph: Vec<EventRecord>,
}

impl ScanReport {
    pub fn succeeded(&self) -> bool {
        self.status == ScanStatus::Finished(ScanOutcome::Succeeded)
    }

    pub fn total_failures(&self) -> u64 {
        self.module_stats.values().map(|s| s.failed).sum()
    }

    pub fn failure_summary(&self) -> Option<String> {
        let summary = format_failure_summary(self);
        (!summary.is_empty()).then_some(summary)
    }

    pub fn events_of_type<'a>(&'a self, event_type: &'a str) -> impl Iterator<Item = &'a EventRecord> + 'a {
        self.graph
            .iter()
            .filter(move |r| r.event.event_type() == event_type)
    }

    pub fn find(&self, event_type: &str, data: &str) -> Option<&EventRecord> {
        self.graph
            .iter()
            .find(|r| r.event.event_type() == event_type && r.event.data_str() == Some(data))
    }
}
