use crate::collaborators::{NotificationSender, ReportGenerator, StorageUploader};
use crate::model::{RunResult, ScheduledReport};
use crate::settings::Settings;
use crate::template;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn ReportGenerator>,
    pub uploader: Arc<dyn StorageUploader>,
    pub notifier: Arc<dyn NotificationSender>,
}

impl Collaborators {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            generator: Arc::new(crate::collaborators::CommandGenerator::new(
                settings.generators.clone(),
            )),
            uploader: Arc::new(crate::collaborators::FileStorageUploader::new(
                settings.storage.clone(),
            )),
            notifier: Arc::new(crate::collaborators::WebhookSender::new()),
        }
    }
}

/// Generate and deliver one report. Collaborator failures are captured into
/// a failed `RunResult`; this never returns an error past the driver.
pub async fn execute_run(report: &ScheduledReport, collaborators: &Collaborators) -> RunResult {
    let timer = std::time::Instant::now();
    let outcome = generate_and_deliver(report, collaborators).await;
    let duration = timer.elapsed().as_secs_f64();
    let now = Utc::now();

    match outcome {
        Ok(delivered) => RunResult::succeeded(
            delivered.file_name,
            delivered.file_size,
            delivered.record_count,
            report.format,
            delivered.link,
            report.delivery.link_expiration_days,
            duration,
            now,
        ),
        Err(err) => RunResult::failed(format!("{err:#}"), report.format, duration, now),
    }
}

struct Delivered {
    file_name: String,
    file_size: u64,
    record_count: u64,
    link: Option<String>,
}

async fn generate_and_deliver(
    report: &ScheduledReport,
    collaborators: &Collaborators,
) -> Result<Delivered> {
    let generated = collaborators
        .generator
        .generate(
            &report.report_type,
            &report.filters,
            report.selected_columns.as_deref(),
            report.format,
        )
        .await
        .context("generate")?;

    let now = Utc::now();
    let file_name = template::generate_file_name(
        &report.delivery,
        &report.name,
        &report.report_type,
        report.format,
        now,
    );
    let folder_path = template::generate_folder_path(&report.delivery, &report.report_type);

    let uploaded = collaborators
        .uploader
        .upload(
            &report.delivery.storage_config_name,
            &folder_path,
            &file_name,
            &generated.data,
            report.delivery.create_shareable_link,
            report.delivery.link_expiration_days,
        )
        .await
        .context("upload")?;

    Ok(Delivered {
        file_name,
        file_size: generated.data.len() as u64,
        record_count: generated.record_count,
        link: uploaded.link,
    })
}

/// Sends the completion notification when the report asks for one. Returns
/// `Ok(false)` when notifications are off or no webhook is resolvable.
pub async fn notify(
    report: &ScheduledReport,
    result: &RunResult,
    global_webhook_url: Option<&str>,
    notifier: &Arc<dyn NotificationSender>,
) -> Result<bool> {
    if !report.notifications.enabled {
        return Ok(false);
    }
    let webhook = match report.notifications.custom_webhook_url.as_deref() {
        Some(url) => Some(url),
        None if report.notifications.use_global_webhook => global_webhook_url,
        None => None,
    };
    let Some(webhook) = webhook else {
        return Ok(false);
    };

    let message = template::generate_message(
        &report.notifications,
        &report.name,
        result,
        result.azure_link.as_deref(),
        Utc::now(),
    );
    notifier
        .send(webhook, &message)
        .await
        .context("notification")?;
    Ok(true)
}
