use crate::scheduler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledReport {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub report_type: String,
    pub report_display_name: String,
    pub format: ReportFormat,
    #[serde(default)]
    pub filters: HashMap<String, String>,
    pub selected_columns: Option<Vec<String>>,
    pub schedule: ScheduleConfiguration,
    pub delivery: DeliveryConfiguration,
    pub notifications: NotificationConfiguration,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: NextRun,
    pub last_run_result: Option<RunResult>,
}

impl ScheduledReport {
    pub fn new(
        name: impl Into<String>,
        report_type: impl Into<String>,
        report_display_name: impl Into<String>,
        format: ReportFormat,
        now: DateTime<Utc>,
    ) -> Self {
        let mut report = Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            report_type: report_type.into(),
            report_display_name: report_display_name.into(),
            format,
            filters: HashMap::new(),
            selected_columns: None,
            schedule: ScheduleConfiguration::starting_at(now),
            delivery: DeliveryConfiguration::default(),
            notifications: NotificationConfiguration::default(),
            is_enabled: true,
            created: now,
            modified: now,
            last_run: None,
            next_run: NextRun::Exhausted,
            last_run_result: None,
        };
        report.refresh_next_run(now);
        report
    }

    pub fn mark_as_modified(&mut self, now: DateTime<Utc>) {
        self.modified = now;
    }

    /// Records one execution's outcome and advances the schedule. The only
    /// path that moves `next_run` after creation.
    pub fn update_run_result(&mut self, result: RunResult, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.last_run_result = Some(result);
        self.refresh_next_run(now);
        self.mark_as_modified(now);
    }

    pub fn refresh_next_run(&mut self, now: DateTime<Utc>) {
        self.next_run = if !self.is_enabled {
            NextRun::Disabled
        } else {
            match scheduler::calculate_next_run(&self.schedule, now) {
                Some(at) => NextRun::Scheduled { at },
                None => NextRun::Exhausted,
            }
        };
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_enabled
            && match self.next_run {
                NextRun::Scheduled { at } => at <= now,
                NextRun::Exhausted | NextRun::Disabled => false,
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Csv,
    Json,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Json => "json",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReportFormat::Csv => "CSV",
            ReportFormat::Json => "JSON",
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ReportFormat::Csv),
            "json" => Ok(ReportFormat::Json),
            other => Err(anyhow::anyhow!("unknown format: {other}")),
        }
    }
}

/// `Exhausted` means the recurrence produced no further instant (past the
/// end date or malformed rule); `Disabled` mirrors `is_enabled == false`.
/// Neither is ever due.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NextRun {
    Scheduled { at: DateTime<Utc> },
    Exhausted,
    Disabled,
}

impl NextRun {
    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            NextRun::Scheduled { at } => Some(*at),
            NextRun::Exhausted | NextRun::Disabled => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfiguration {
    pub frequency: Frequency,
    /// Wall-clock "HH:mm", interpreted in `time_zone`.
    pub time_of_day: String,
    /// IANA zone name; all recurrence math happens in it.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    /// 1..=7, Sunday = 1. Required for weekly.
    pub day_of_week: Option<u8>,
    /// 1..=31, clamped to short months. Required for monthly.
    pub day_of_month: Option<u8>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl ScheduleConfiguration {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            frequency: Frequency::Daily,
            time_of_day: "09:00".to_string(),
            time_zone: default_time_zone(),
            day_of_week: None,
            day_of_month: None,
            start_date: now,
            end_date: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfiguration {
    /// Named storage destination, resolved by the uploader.
    pub storage_config_name: String,
    pub folder_path: String,
    pub file_name_template: String,
    #[serde(default)]
    pub create_shareable_link: bool,
    pub link_expiration_days: Option<u32>,
}

impl Default for DeliveryConfiguration {
    fn default() -> Self {
        Self {
            storage_config_name: "default".to_string(),
            folder_path: "{reportType}".to_string(),
            file_name_template: "{reportName}_{date}_{time}.{extension}".to_string(),
            create_shareable_link: false,
            link_expiration_days: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_enabled")]
    pub use_global_webhook: bool,
    pub custom_webhook_url: Option<String>,
    /// `None` falls back to the built-in message template.
    pub message_template: Option<String>,
}

impl Default for NotificationConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            use_global_webhook: true,
            custom_webhook_url: None,
            message_template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub error: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub record_count: Option<u64>,
    pub format: ReportFormat,
    pub azure_link: Option<String>,
    pub link_expiration_days: Option<u32>,
    /// Elapsed seconds.
    pub run_duration: f64,
    pub completed_at: DateTime<Utc>,
}

impl RunResult {
    #[allow(clippy::too_many_arguments)]
    pub fn succeeded(
        file_name: String,
        file_size: u64,
        record_count: u64,
        format: ReportFormat,
        azure_link: Option<String>,
        link_expiration_days: Option<u32>,
        run_duration: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            success: true,
            error: None,
            file_name: Some(file_name),
            file_size: Some(file_size),
            record_count: Some(record_count),
            format,
            azure_link,
            link_expiration_days,
            run_duration,
            completed_at: now,
        }
    }

    pub fn failed(
        error: impl Into<String>,
        format: ReportFormat,
        run_duration: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            file_name: None,
            file_size: None,
            record_count: None,
            format,
            azure_link: None,
            link_expiration_days: None,
            run_duration,
            completed_at: now,
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.success { "Success" } else { "Failed" }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub report_id: Uuid,
    pub report_name: String,
    pub trigger: String,
    pub result: RunResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportView {
    pub id: Uuid,
    pub name: String,
    pub report_type: String,
    pub is_enabled: bool,
    pub schedule: String,
    pub next_run: NextRun,
    pub last_run: Option<DateTime<Utc>>,
    pub last_run_result: Option<RunResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub updated_at: DateTime<Utc>,
    pub pid: u32,
    pub running: bool,
    pub last_reload_error: Option<String>,
    pub in_flight: usize,
    pub reports: Vec<ReportView>,
    pub recent_runs: Vec<RunRecord>,
}

fn default_enabled() -> bool {
    true
}

fn default_time_zone() -> String {
    "UTC".to_string()
}
