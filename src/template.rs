use crate::model::{DeliveryConfiguration, NotificationConfiguration, ReportFormat, RunResult};
use chrono::{DateTime, Days, Utc};
use humansize::{DECIMAL, format_size};

pub const DEFAULT_MESSAGE_TEMPLATE: &str = "Scheduled report '{reportName}' finished: {status}. \
Records: {recordCount}, size: {fileSize}, format: {format}. \
Download: {azureLink} (expires: {expirationDate})";

/// Expands the closed `{placeholder}` set of `file_name_template`. Values are
/// substituted literally; unknown placeholders stay untouched and no
/// filesystem escaping is performed.
pub fn generate_file_name(
    cfg: &DeliveryConfiguration,
    report_name: &str,
    report_type: &str,
    format: ReportFormat,
    now: DateTime<Utc>,
) -> String {
    cfg.file_name_template
        .replace("{reportName}", &report_name.replace(' ', ""))
        .replace("{reportType}", report_type)
        .replace("{date}", &now.format("%Y-%m-%d").to_string())
        .replace("{time}", &now.format("%H-%M-%S").to_string())
        .replace("{extension}", format.extension())
}

pub fn generate_folder_path(cfg: &DeliveryConfiguration, report_type: &str) -> String {
    cfg.folder_path
        .replace("{reportType}", &report_type.to_lowercase())
}

pub fn generate_message(
    cfg: &NotificationConfiguration,
    report_name: &str,
    result: &RunResult,
    azure_link: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let template = cfg
        .message_template
        .as_deref()
        .unwrap_or(DEFAULT_MESSAGE_TEMPLATE);

    let record_count = result
        .record_count
        .map(|n| n.to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let file_size = result
        .file_size
        .map(|n| format_size(n, DECIMAL))
        .unwrap_or_else(|| "Unknown".to_string());

    let (link, expiration) = match azure_link {
        None => ("Not available".to_string(), "N/A".to_string()),
        Some(link) => {
            let expiration = match result.link_expiration_days {
                Some(days) => now
                    .checked_add_days(Days::new(u64::from(days)))
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "Never".to_string()),
                None => "Never".to_string(),
            };
            (link.to_string(), expiration)
        }
    };

    template
        .replace("{reportName}", report_name)
        .replace("{recordCount}", &record_count)
        .replace("{fileSize}", &file_size)
        .replace("{format}", result.format.label())
        .replace("{status}", result.status_label())
        .replace("{azureLink}", &link)
        .replace("{expirationDate}", &expiration)
}
