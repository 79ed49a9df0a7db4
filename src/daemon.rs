use crate::logging;
use crate::model::{DaemonState, ReportView, RunRecord, RunResult, ScheduledReport};
use crate::paths::AppPaths;
use crate::registry::Registry;
use crate::runner::{self, Collaborators};
use crate::scheduler;
use crate::settings::Settings;
use crate::store;
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};
use uuid::Uuid;

pub async fn run_daemon(paths: AppPaths) -> Result<()> {
    paths.ensure_dirs()?;
    if let Some(pid) = read_pid(&paths.pid_file)? {
        if is_pid_running(pid) {
            return Err(anyhow!("daemon is already running with pid {pid}"));
        }
    }

    write_pid(&paths.pid_file)?;
    let _pid_guard = PidGuard {
        path: paths.pid_file.clone(),
    };

    let settings = Settings::load(&paths.settings_file)?;
    let collaborators = Collaborators::from_settings(&settings);

    logging::log_daemon(&paths.logs_dir, "INFO", "daemon started")?;
    logging::cleanup_old_logs(&paths.logs_dir, settings.log_retention_days)?;

    let (registry, mut last_reload_error) = match store::load_reports(&paths.reports_dir) {
        Ok(outcome) => {
            for skipped in &outcome.skipped {
                logging::log_daemon(&paths.logs_dir, "WARN", &format!("skipped: {skipped}"))?;
            }
            (Arc::new(Registry::new(outcome.reports)), None)
        }
        Err(err) => {
            let msg = format!("initial load failed: {err:#}");
            logging::log_daemon(&paths.logs_dir, "ERROR", &msg)?;
            (Arc::new(Registry::default()), Some(msg))
        }
    };

    let mut recent_runs: Vec<RunRecord> = Vec::new();
    let (tx_run, mut rx_run) = mpsc::channel::<RunRecord>(256);

    let (event_tx, event_rx) = std::sync::mpsc::channel();
    let watcher = setup_watcher(&paths.reports_dir, event_tx)?;

    let mut ticker = interval(Duration::from_secs(settings.scan_interval_secs));
    let mut cleanup_tick = interval(Duration::from_secs(3600));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if drain_watcher(&event_rx) {
                    match store::load_reports(&paths.reports_dir) {
                        Ok(outcome) => {
                            for skipped in &outcome.skipped {
                                logging::log_daemon(&paths.logs_dir, "WARN", &format!("skipped: {skipped}"))?;
                            }
                            registry.replace_all(outcome.reports);
                            last_reload_error = None;
                            logging::log_daemon(&paths.logs_dir, "INFO", "reports reloaded")?;
                        }
                        Err(err) => {
                            let msg = format!("reload failed: {err:#}");
                            last_reload_error = Some(msg.clone());
                            logging::log_daemon(&paths.logs_dir, "ERROR", &msg)?;
                        }
                    }
                }

                for report_id in collect_requests(&paths.requests_dir)? {
                    if let Some(report) = registry.try_begin_run(report_id) {
                        spawn_run(report, "manual", registry.clone(), collaborators.clone(), paths.clone(), settings.clone(), tx_run.clone());
                    }
                }

                let now = Utc::now();
                for report in registry.due_reports(now) {
                    // Second check under the lock; the due scan itself does
                    // not hold the in-flight marker.
                    if let Some(report) = registry.try_begin_run(report.id) {
                        spawn_run(report, "schedule", registry.clone(), collaborators.clone(), paths.clone(), settings.clone(), tx_run.clone());
                    }
                }

                while let Ok(record) = rx_run.try_recv() {
                    recent_runs.push(record);
                    if recent_runs.len() > 100 {
                        let drop_count = recent_runs.len() - 100;
                        recent_runs.drain(0..drop_count);
                    }
                }

                write_state(&paths, std::process::id(), &registry, &recent_runs, last_reload_error.clone())?;
            }
            _ = cleanup_tick.tick() => {
                logging::cleanup_old_logs(&paths.logs_dir, settings.log_retention_days)?;
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    drop(watcher);
    logging::log_daemon(&paths.logs_dir, "INFO", "daemon stopped")?;
    Ok(())
}

/// Used by the CLI when no daemon is live: one run, synchronously, with the
/// report updated and persisted the same way the loop would.
pub async fn run_report_inline(paths: &AppPaths, report_id: Uuid) -> Result<RunRecord> {
    let settings = Settings::load(&paths.settings_file)?;
    let collaborators = Collaborators::from_settings(&settings);
    let outcome = store::load_reports(&paths.reports_dir)?;
    let mut report = outcome
        .reports
        .into_iter()
        .find(|r| r.id == report_id)
        .ok_or_else(|| anyhow!("report not found: {report_id}"))?;
    if !report.is_enabled {
        return Err(anyhow!("report is disabled: {report_id}"));
    }

    let run_id = Uuid::new_v4();
    let result = execute_with_timeout(&report, &collaborators, settings.run_timeout_secs).await;
    let now = Utc::now();
    report.update_run_result(result.clone(), now);
    store::save_report(&paths.reports_dir, &report)?;
    if let Err(err) = runner::notify(
        &report,
        &result,
        settings.global_webhook_url.as_deref(),
        &collaborators.notifier,
    )
    .await
    {
        logging::log_run(
            &paths.logs_dir,
            "ERROR",
            &report.id.to_string(),
            &run_id.to_string(),
            &format!("event=notify-failed message={err:#}"),
        )?;
    }

    Ok(RunRecord {
        run_id,
        report_id: report.id,
        report_name: report.name,
        trigger: "manual-inline".to_string(),
        result,
    })
}

fn spawn_run(
    report: ScheduledReport,
    trigger: &'static str,
    registry: Arc<Registry>,
    collaborators: Collaborators,
    paths: AppPaths,
    settings: Settings,
    tx: mpsc::Sender<RunRecord>,
) {
    tokio::spawn(async move {
        let run_id = Uuid::new_v4();
        let report_id = report.id.to_string();
        let _ = logging::log_run(
            &paths.logs_dir,
            "INFO",
            &report_id,
            &run_id.to_string(),
            &format!("event=start trigger={trigger} report_type={}", report.report_type),
        );

        let result = execute_with_timeout(&report, &collaborators, settings.run_timeout_secs).await;
        let now = Utc::now();

        // Apply to memory first; a failed write must not lose the update or
        // the report would re-fire on the next tick.
        let updated = registry.finish_run(report.id, result.clone(), now);
        if let Some(updated) = &updated {
            if let Err(err) = store::save_report(&paths.reports_dir, updated) {
                let _ = logging::log_run(
                    &paths.logs_dir,
                    "ERROR",
                    &report_id,
                    &run_id.to_string(),
                    &format!("event=persist-failed message={err:#}"),
                );
            }
            if let Err(err) = runner::notify(
                updated,
                &result,
                settings.global_webhook_url.as_deref(),
                &collaborators.notifier,
            )
            .await
            {
                let _ = logging::log_run(
                    &paths.logs_dir,
                    "ERROR",
                    &report_id,
                    &run_id.to_string(),
                    &format!("event=notify-failed message={err:#}"),
                );
            }
        }

        let (level, event) = if result.success {
            ("INFO", "event=success".to_string())
        } else {
            (
                "ERROR",
                format!(
                    "event=failed message={}",
                    result.error.as_deref().unwrap_or("unknown")
                ),
            )
        };
        let _ = logging::log_run(&paths.logs_dir, level, &report_id, &run_id.to_string(), &event);

        let _ = tx
            .send(RunRecord {
                run_id,
                report_id: report.id,
                report_name: report.name.clone(),
                trigger: trigger.to_string(),
                result,
            })
            .await;
    });
}

async fn execute_with_timeout(
    report: &ScheduledReport,
    collaborators: &Collaborators,
    timeout_secs: u64,
) -> RunResult {
    let timeout = Duration::from_secs(timeout_secs.max(1));
    match tokio::time::timeout(timeout, runner::execute_run(report, collaborators)).await {
        Ok(result) => result,
        Err(_) => RunResult::failed(
            format!("run timed out after {}s", timeout.as_secs()),
            report.format,
            timeout.as_secs_f64(),
            Utc::now(),
        ),
    }
}

fn setup_watcher(
    reports_dir: &Path,
    event_tx: std::sync::mpsc::Sender<notify::Result<notify::Event>>,
) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = event_tx.send(res);
    })?;
    watcher.watch(reports_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn drain_watcher(event_rx: &std::sync::mpsc::Receiver<notify::Result<notify::Event>>) -> bool {
    let mut changed = false;
    while let Ok(event) = event_rx.try_recv() {
        if event.is_ok() {
            changed = true;
        }
    }
    changed
}

fn collect_requests(requests_dir: &Path) -> Result<Vec<Uuid>> {
    let mut requests = Vec::new();

    for entry in std::fs::read_dir(requests_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }

        let raw = std::fs::read_to_string(&path)?;
        #[derive(serde::Deserialize)]
        struct Req {
            report_id: Uuid,
        }
        if let Ok(req) = serde_json::from_str::<Req>(&raw) {
            requests.push(req.report_id);
        }
        let _ = std::fs::remove_file(path);
    }

    Ok(requests)
}

fn write_state(
    paths: &AppPaths,
    pid: u32,
    registry: &Registry,
    recent_runs: &[RunRecord],
    last_reload_error: Option<String>,
) -> Result<()> {
    let mut views = Vec::new();
    for report in registry.snapshot() {
        views.push(ReportView {
            id: report.id,
            name: report.name.clone(),
            report_type: report.report_type.clone(),
            is_enabled: report.is_enabled,
            schedule: scheduler::schedule_description(&report.schedule),
            next_run: report.next_run,
            last_run: report.last_run,
            last_run_result: report.last_run_result.clone(),
        });
    }

    let state = DaemonState {
        updated_at: Utc::now(),
        pid,
        running: true,
        last_reload_error,
        in_flight: registry.in_flight_count(),
        reports: views,
        recent_runs: recent_runs.to_vec(),
    };

    let content = serde_json::to_string_pretty(&state)?;
    std::fs::write(&paths.state_file, content)?;
    Ok(())
}

fn write_pid(path: &Path) -> Result<()> {
    let pid = std::process::id();
    let mut file = OpenOptions::new().create(true).truncate(true).write(true).open(path)?;
    file.write_all(pid.to_string().as_bytes())?;
    Ok(())
}

fn read_pid(path: &Path) -> Result<Option<i32>> {
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(path)?;
    let pid = s.trim().parse::<i32>().ok();
    Ok(pid)
}

fn is_pid_running(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

struct PidGuard {
    path: std::path::PathBuf,
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub fn daemon_running(paths: &AppPaths) -> Result<Option<i32>> {
    let Some(pid) = read_pid(&paths.pid_file)? else {
        return Ok(None);
    };

    if is_pid_running(pid) {
        Ok(Some(pid))
    } else {
        Ok(None)
    }
}

pub fn submit_run_request(paths: &AppPaths, report_id: Uuid) -> Result<()> {
    let req_id = Uuid::new_v4();
    let path = paths.requests_dir.join(format!("{req_id}.json"));
    let payload = serde_json::json!({ "report_id": report_id });
    std::fs::write(path, serde_json::to_vec(&payload)?).context("write run request")?;
    Ok(())
}
