//! `MetricReport` and the process-wide metrics store (§3, §4.5, §4.9).

use std::{collections::BTreeMap, sync::Arc, sync::RwLock};

use serde::{Deserialize, Serialize};

/// One record per `(binding, source kind, target kind)` triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricReport {
    /// `{binding-name}-{source-kind}-{target-kind}`.
    pub key: String,
    /// The binding this report belongs to.
    pub binding: String,
    /// The binding's source kind.
    pub source_kind: String,
    /// The binding's target kind.
    pub target_kind: String,
    /// Requests observed.
    pub request_count: u64,
    /// Sum of request payload bytes observed.
    pub request_volume: u64,
    /// Responses observed.
    pub response_count: u64,
    /// Sum of response payload bytes observed.
    pub response_volume: u64,
    /// Calls that returned an error.
    pub errors_count: u64,
}

impl MetricReport {
    /// Build an empty report for the given key triple.
    #[must_use]
    pub fn new(binding: &str, source_kind: &str, target_kind: &str) -> Self {
        Self {
            key: format!("{binding}-{source_kind}-{target_kind}"),
            binding: binding.to_string(),
            source_kind: source_kind.to_string(),
            target_kind: target_kind.to_string(),
            ..Default::default()
        }
    }
}

/// The process-wide, concurrently-readable metrics store.
///
/// Each update is a whole-record replacement under a short exclusive lock;
/// reads take a shared lock. There are no cross-report invariants, so
/// per-key locking granularity is unnecessary — a single `RwLock` over the
/// whole map is sufficient.
#[derive(Debug, Clone, Default)]
pub struct MetricsStore {
    reports: Arc<RwLock<BTreeMap<String, MetricReport>>>,
}

impl MetricsStore {
    /// Build an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record at `report.key` in full.
    pub fn put(&self, report: MetricReport) {
        let mut guard = self.reports.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.insert(report.key.clone(), report);
    }

    /// Add `delta`'s counters onto the existing record at `delta.key`,
    /// creating it first if absent. Used by the metrics middleware, which
    /// observes one call at a time and needs the stored report to reflect
    /// the running total across every call seen so far.
    pub fn accumulate(&self, delta: &MetricReport) {
        let mut guard = self.reports.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = guard
            .entry(delta.key.clone())
            .or_insert_with(|| MetricReport::new(&delta.binding, &delta.source_kind, &delta.target_kind));
        entry.request_count += delta.request_count;
        entry.request_volume += delta.request_volume;
        entry.response_count += delta.response_count;
        entry.response_volume += delta.response_volume;
        entry.errors_count += delta.errors_count;
    }

    /// Fetch a single report by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<MetricReport> {
        let guard = self.reports.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.get(key).cloned()
    }

    /// Snapshot every report, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MetricReport> {
        let guard = self.reports.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.values().cloned().collect()
    }
}
