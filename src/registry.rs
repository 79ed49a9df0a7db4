use crate::model::{RunResult, ScheduledReport};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

/// Shared report state for the driver loop: id -> report plus the in-flight
/// set, behind one mutex. Locks are short and never held across await points;
/// callers get clones and write back through `finish_run`.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    reports: HashMap<Uuid, ScheduledReport>,
    in_flight: HashSet<Uuid>,
}

impl Registry {
    pub fn new(reports: Vec<ScheduledReport>) -> Self {
        let registry = Self::default();
        registry.replace_all(reports);
        registry
    }

    /// Wholesale reload from disk. A report with a run in flight keeps its
    /// in-memory copy (the disk copy may be staler than the pending update),
    /// but one deleted from disk is dropped even mid-run so `finish_run`
    /// cannot resurrect it.
    pub fn replace_all(&self, reports: Vec<ScheduledReport>) {
        let mut inner = self.lock();
        let mut next: HashMap<Uuid, ScheduledReport> =
            reports.into_iter().map(|r| (r.id, r)).collect();
        for id in &inner.in_flight {
            if next.contains_key(id) {
                if let Some(current) = inner.reports.get(id) {
                    next.insert(*id, current.clone());
                }
            }
        }
        inner.reports = next;
    }

    pub fn snapshot(&self) -> Vec<ScheduledReport> {
        let inner = self.lock();
        let mut reports: Vec<_> = inner.reports.values().cloned().collect();
        reports.sort_by_key(|r| r.id);
        reports
    }

    /// Reports eligible to start now: enabled, due, and not already running.
    pub fn due_reports(&self, now: DateTime<Utc>) -> Vec<ScheduledReport> {
        let inner = self.lock();
        let mut due: Vec<_> = inner
            .reports
            .values()
            .filter(|r| r.is_due(now) && !inner.in_flight.contains(&r.id))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.id);
        due
    }

    /// Atomic check-and-set of the in-flight marker. Returns the report to
    /// run, or `None` when it is missing, disabled, or already running.
    pub fn try_begin_run(&self, id: Uuid) -> Option<ScheduledReport> {
        let mut inner = self.lock();
        if inner.in_flight.contains(&id) {
            return None;
        }
        let report = inner.reports.get(&id)?;
        if !report.is_enabled {
            return None;
        }
        let report = report.clone();
        inner.in_flight.insert(id);
        Some(report)
    }

    /// Applies the run outcome and clears the marker. The updated report is
    /// returned for persistence; it stays in memory even if the caller then
    /// fails to write it, so the report does not immediately re-fire.
    pub fn finish_run(
        &self,
        id: Uuid,
        result: RunResult,
        now: DateTime<Utc>,
    ) -> Option<ScheduledReport> {
        let mut inner = self.lock();
        inner.in_flight.remove(&id);
        let report = inner.reports.get_mut(&id)?;
        report.update_run_result(result, now);
        Some(report.clone())
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("registry lock poisoned")
    }
}
