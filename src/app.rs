use crate::cli::{Cli, Command};
use crate::daemon;
use crate::model::{DaemonState, ReportFormat, ScheduledReport};
use crate::paths::AppPaths;
use crate::scheduler;
use crate::store;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::process::Stdio;
use uuid::Uuid;

pub async fn run(cli: Cli) -> Result<()> {
    let paths = AppPaths::new(&cli.base_dir)?;
    paths.ensure_dirs()?;

    match cli.command {
        Command::Version => version(),
        Command::Start => start(&paths),
        Command::Stop => stop(&paths),
        Command::Status => status(&paths),
        Command::List => list(&paths),
        Command::Logs { report, tail } => logs(&paths, report.as_deref(), tail),
        Command::Add {
            name,
            report_type,
            display_name,
            format,
        } => add(&paths, name, report_type, display_name, &format),
        Command::Remove { report_id } => remove(&paths, report_id),
        Command::Enable { report_id } => set_enabled(&paths, report_id, true),
        Command::Disable { report_id } => set_enabled(&paths, report_id, false),
        Command::Run { report_id } => run_report(&paths, report_id).await,
        Command::Daemon => daemon::run_daemon(paths).await,
    }
}

fn version() -> Result<()> {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    Ok(())
}

fn start(paths: &AppPaths) -> Result<()> {
    if let Some(pid) = daemon::daemon_running(paths)? {
        println!("daemon is already running (pid={pid})");
        return Ok(());
    }

    let exe = std::env::current_exe().context("resolve current exe")?;
    let child = std::process::Command::new(exe)
        .arg("--base-dir")
        .arg(&paths.base_dir)
        .arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to spawn daemon")?;

    println!("daemon started (pid={})", child.id());
    Ok(())
}

fn stop(paths: &AppPaths) -> Result<()> {
    let Some(pid) = daemon::daemon_running(paths)? else {
        println!("daemon is not running");
        return Ok(());
    };

    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid),
        Some(nix::sys::signal::Signal::SIGINT),
    )
    .context("failed to send SIGINT")?;
    println!("stop signal sent to pid={pid}");
    Ok(())
}

fn status(paths: &AppPaths) -> Result<()> {
    if let Some(pid) = daemon::daemon_running(paths)? {
        println!("daemon: running (pid={pid})");
    } else {
        println!("daemon: stopped");
    }

    if paths.state_file.exists() {
        let state = read_state(paths)?;
        println!("updated_at: {}", state.updated_at.format("%Y-%m-%d %H:%M:%S"));
        println!("loaded_reports: {}", state.reports.len());
        println!("runs_in_flight: {}", state.in_flight);
        if let Some(err) = state.last_reload_error {
            println!("last_reload_error: {err}");
        }
    } else {
        println!("state: unavailable");
    }

    Ok(())
}

fn list(paths: &AppPaths) -> Result<()> {
    if paths.state_file.exists() {
        let state = read_state(paths)?;
        if state.reports.is_empty() {
            println!("no reports loaded");
            return Ok(());
        }
        for report in state.reports {
            let next = report
                .next_run
                .at()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            let last = report
                .last_run_result
                .as_ref()
                .map(|r| {
                    format!(
                        "{}({})",
                        r.status_label(),
                        r.completed_at.format("%m-%d %H:%M:%S")
                    )
                })
                .unwrap_or_else(|| "-".to_string());
            println!(
                "id={} enabled={} schedule={} next_run={} last={}",
                report.id, report.is_enabled, report.schedule, next, last
            );
        }
        return Ok(());
    }

    let outcome = store::load_reports(&paths.reports_dir)?;
    for skipped in &outcome.skipped {
        eprintln!("warning: {skipped}");
    }
    if outcome.reports.is_empty() {
        println!("no reports found in reports/");
        return Ok(());
    }
    let now = Utc::now();
    for mut report in outcome.reports {
        report.refresh_next_run(now);
        let next = report
            .next_run
            .at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "id={} enabled={} schedule={} next_run={}",
            report.id,
            report.is_enabled,
            scheduler::schedule_description(&report.schedule),
            next
        );
    }
    Ok(())
}

fn logs(paths: &AppPaths, report_id: Option<&str>, tail: usize) -> Result<()> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&paths.logs_dir)? {
        let entry = entry?;
        if entry.path().is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    if files.is_empty() {
        println!("no logs found");
        return Ok(());
    }

    let latest = files.last().expect("non-empty file list");
    let file = File::open(latest)?;
    let reader = BufReader::new(file);
    let mut lines: Vec<String> = reader.lines().collect::<std::result::Result<Vec<_>, _>>()?;

    if let Some(id) = report_id {
        lines.retain(|line| line.contains(&format!("report_id={id}")));
    }

    let start = lines.len().saturating_sub(tail);
    for line in &lines[start..] {
        println!("{line}");
    }

    Ok(())
}

fn add(
    paths: &AppPaths,
    name: String,
    report_type: String,
    display_name: Option<String>,
    format: &str,
) -> Result<()> {
    let format: ReportFormat = format.parse()?;
    let display_name = display_name.unwrap_or_else(|| name.clone());
    let report = ScheduledReport::new(name, report_type, display_name, format, Utc::now());
    scheduler::validate(&report.schedule)?;
    store::save_report(&paths.reports_dir, &report)?;
    println!(
        "created report id={} schedule={}",
        report.id,
        scheduler::schedule_description(&report.schedule)
    );
    Ok(())
}

fn remove(paths: &AppPaths, report_id: Uuid) -> Result<()> {
    store::delete_report(&paths.reports_dir, report_id)?;
    println!("removed report id={report_id}");
    Ok(())
}

fn set_enabled(paths: &AppPaths, report_id: Uuid, enabled: bool) -> Result<()> {
    let mut report = store::load_report(&paths.reports_dir, report_id)?;
    let now = Utc::now();
    report.is_enabled = enabled;
    report.refresh_next_run(now);
    report.mark_as_modified(now);
    store::save_report(&paths.reports_dir, &report)?;
    let next = report
        .next_run
        .at()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("report id={report_id} enabled={enabled} next_run={next}");
    Ok(())
}

async fn run_report(paths: &AppPaths, report_id: Uuid) -> Result<()> {
    if daemon::daemon_running(paths)?.is_some() {
        daemon::submit_run_request(paths, report_id)?;
        println!("run request submitted for report={report_id}");
        return Ok(());
    }

    let record = daemon::run_report_inline(paths, report_id).await?;
    println!(
        "report={} status={} records={} completed_at={}",
        record.report_id,
        record.result.status_label(),
        record
            .result
            .record_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string()),
        record.result.completed_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(error) = &record.result.error {
        println!("error: {error}");
    }
    Ok(())
}

fn read_state(paths: &AppPaths) -> Result<DaemonState> {
    let raw = std::fs::read_to_string(&paths.state_file)?;
    let state = serde_json::from_str(&raw).context("parse state file")?;
    Ok(state)
}
