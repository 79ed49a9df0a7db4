use crate::model::ScheduledReport;
use crate::scheduler;
use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Result of scanning the reports directory. A broken file never aborts the
/// load; it lands in `skipped` for the caller to log.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub reports: Vec<ScheduledReport>,
    pub skipped: Vec<String>,
}

pub fn load_reports(reports_dir: &Path) -> Result<LoadOutcome> {
    let mut outcome = LoadOutcome::default();
    let mut ids = HashSet::new();

    if !reports_dir.exists() {
        return Ok(outcome);
    }

    for entry in std::fs::read_dir(reports_dir).context("read reports dir")? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }

        let report = match read_report(&path) {
            Ok(report) => report,
            Err(err) => {
                outcome.skipped.push(format!("{}: {err:#}", path.display()));
                continue;
            }
        };

        if !ids.insert(report.id) {
            bail!("duplicate report id: {}", report.id);
        }
        outcome.reports.push(report);
    }

    outcome.reports.sort_by_key(|r| r.id);
    Ok(outcome)
}

pub fn load_report(reports_dir: &Path, id: Uuid) -> Result<ScheduledReport> {
    let path = report_path(reports_dir, id);
    if !path.exists() {
        bail!("report not found: {id}");
    }
    read_report(&path)
}

fn read_report(path: &Path) -> Result<ScheduledReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read report file {}", path.display()))?;
    let report: ScheduledReport =
        serde_json::from_str(&raw).with_context(|| format!("parse report file {}", path.display()))?;
    scheduler::validate(&report.schedule)
        .with_context(|| format!("invalid schedule for report {}", report.id))?;
    Ok(report)
}

/// Write-temp-then-rename so a crash mid-write never leaves a truncated
/// `{id}.json` behind.
pub fn save_report(reports_dir: &Path, report: &ScheduledReport) -> Result<()> {
    std::fs::create_dir_all(reports_dir)?;
    let path = report_path(reports_dir, report.id);
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(report)?;
    std::fs::write(&tmp, content).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

pub fn delete_report(reports_dir: &Path, id: Uuid) -> Result<()> {
    let path = report_path(reports_dir, id);
    if !path.exists() {
        bail!("report not found: {id}");
    }
    std::fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
    Ok(())
}

pub fn report_path(reports_dir: &Path, id: Uuid) -> PathBuf {
    reports_dir.join(format!("{id}.json"))
}
