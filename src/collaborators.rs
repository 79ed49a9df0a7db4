use crate::model::ReportFormat;
use crate::settings::{GeneratorCommand, StorageDestination};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug)]
pub struct GeneratedReport {
    pub data: Vec<u8>,
    pub record_count: u64,
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub link: Option<String>,
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(
        &self,
        report_type: &str,
        filters: &HashMap<String, String>,
        selected_columns: Option<&[String]>,
        format: ReportFormat,
    ) -> Result<GeneratedReport>;
}

#[async_trait]
pub trait StorageUploader: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn upload(
        &self,
        config_name: &str,
        folder_path: &str,
        file_name: &str,
        data: &[u8],
        create_link: bool,
        link_expiration_days: Option<u32>,
    ) -> Result<UploadOutcome>;
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, webhook_url: &str, message: &str) -> Result<()>;
}

/// Generator that spawns the command configured for the report type. Filters
/// arrive as environment variables, columns and format as arguments; the
/// report body is whatever the command prints to stdout.
pub struct CommandGenerator {
    commands: HashMap<String, GeneratorCommand>,
}

impl CommandGenerator {
    pub fn new(commands: HashMap<String, GeneratorCommand>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl ReportGenerator for CommandGenerator {
    async fn generate(
        &self,
        report_type: &str,
        filters: &HashMap<String, String>,
        selected_columns: Option<&[String]>,
        format: ReportFormat,
    ) -> Result<GeneratedReport> {
        let command_spec = self
            .commands
            .get(report_type)
            .ok_or_else(|| anyhow!("no generator configured for report type {report_type}"))?;

        let mut command = Command::new(&command_spec.program);
        command.args(&command_spec.args);
        command.arg("--format").arg(format.extension());
        if let Some(columns) = selected_columns {
            command.arg("--columns").arg(columns.join(","));
        }
        if let Some(working_dir) = &command_spec.working_dir {
            command.current_dir(working_dir);
        }
        command.envs(&command_spec.env);
        for (key, value) in filters {
            command.env(format!("REPORT_FILTER_{key}"), value);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let output = command
            .output()
            .await
            .with_context(|| format!("spawn generator for {report_type}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "generator for {report_type} exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let record_count = count_records(format, &output.stdout)?;
        Ok(GeneratedReport {
            data: output.stdout,
            record_count,
        })
    }
}

/// CSV: data rows, header excluded. JSON: top-level array length, or 1 for a
/// single object.
fn count_records(format: ReportFormat, data: &[u8]) -> Result<u64> {
    match format {
        ReportFormat::Csv => {
            let text = std::str::from_utf8(data).context("generator output is not UTF-8")?;
            let rows = text.lines().filter(|l| !l.trim().is_empty()).count();
            Ok(rows.saturating_sub(1) as u64)
        }
        ReportFormat::Json => {
            let value: serde_json::Value =
                serde_json::from_slice(data).context("generator output is not valid JSON")?;
            match value {
                serde_json::Value::Array(items) => Ok(items.len() as u64),
                _ => Ok(1),
            }
        }
    }
}

/// Uploader that resolves the config name against named local roots. Stands
/// in for a remote blob store; the shareable link comes from the
/// destination's `link_base_url` when configured, a `file://` URL otherwise.
pub struct FileStorageUploader {
    destinations: HashMap<String, StorageDestination>,
}

impl FileStorageUploader {
    pub fn new(destinations: HashMap<String, StorageDestination>) -> Self {
        Self { destinations }
    }
}

#[async_trait]
impl StorageUploader for FileStorageUploader {
    async fn upload(
        &self,
        config_name: &str,
        folder_path: &str,
        file_name: &str,
        data: &[u8],
        create_link: bool,
        _link_expiration_days: Option<u32>,
    ) -> Result<UploadOutcome> {
        let destination = self
            .destinations
            .get(config_name)
            .ok_or_else(|| anyhow!("no storage destination named {config_name}"))?;

        let folder = destination.root.join(folder_path.trim_start_matches('/'));
        tokio::fs::create_dir_all(&folder)
            .await
            .with_context(|| format!("create {}", folder.display()))?;

        let path = folder.join(file_name);
        let tmp = folder.join(format!("{file_name}.tmp"));
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("rename {}", tmp.display()))?;

        let link = if create_link {
            Some(shareable_link(destination, folder_path, file_name, &path))
        } else {
            None
        };
        Ok(UploadOutcome { link })
    }
}

fn shareable_link(
    destination: &StorageDestination,
    folder_path: &str,
    file_name: &str,
    path: &Path,
) -> String {
    match &destination.link_base_url {
        Some(base) => format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            folder_path.trim_matches('/'),
            file_name
        ),
        None => format!("file://{}", path.display()),
    }
}

/// Posts `{"text": message}` to the webhook, Teams-style.
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, webhook_url: &str, message: &str) -> Result<()> {
        let response = self
            .client
            .post(webhook_url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await
            .with_context(|| format!("post webhook {webhook_url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("webhook {webhook_url} responded with {status}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_record_count_excludes_header_and_blank_lines() {
        let data = b"id,name\n1,a\n2,b\n\n";
        assert_eq!(count_records(ReportFormat::Csv, data).unwrap(), 2);
        assert_eq!(count_records(ReportFormat::Csv, b"id,name\n").unwrap(), 0);
        assert_eq!(count_records(ReportFormat::Csv, b"").unwrap(), 0);
    }

    #[test]
    fn json_record_count_is_array_length() {
        assert_eq!(count_records(ReportFormat::Json, br#"[{"a":1},{"a":2}]"#).unwrap(), 2);
        assert_eq!(count_records(ReportFormat::Json, br#"{"a":1}"#).unwrap(), 1);
        assert!(count_records(ReportFormat::Json, b"not json").is_err());
    }

    #[tokio::test]
    async fn command_generator_captures_stdout_and_counts() {
        let mut commands = HashMap::new();
        commands.insert(
            "apps".to_string(),
            GeneratorCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "printf 'id,name\\n1,Safari\\n2,Xcode\\n'".to_string()],
                working_dir: None,
                env: HashMap::new(),
            },
        );
        let generator = CommandGenerator::new(commands);
        let report = generator
            .generate("apps", &HashMap::new(), None, ReportFormat::Csv)
            .await
            .unwrap();
        assert_eq!(report.record_count, 2);
        assert!(report.data.starts_with(b"id,name"));
    }

    #[tokio::test]
    async fn command_generator_reports_failures_with_stderr() {
        let mut commands = HashMap::new();
        commands.insert(
            "apps".to_string(),
            GeneratorCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo nope >&2; exit 3".to_string()],
                working_dir: None,
                env: HashMap::new(),
            },
        );
        let generator = CommandGenerator::new(commands);
        let err = generator
            .generate("apps", &HashMap::new(), None, ReportFormat::Csv)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn unknown_report_type_is_a_named_error() {
        let generator = CommandGenerator::new(HashMap::new());
        let err = generator
            .generate("devices", &HashMap::new(), None, ReportFormat::Csv)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("devices"));
    }

    #[tokio::test]
    async fn file_uploader_writes_and_links() {
        let dir = tempfile::tempdir().unwrap();
        let mut destinations = HashMap::new();
        destinations.insert(
            "default".to_string(),
            StorageDestination {
                root: dir.path().to_path_buf(),
                link_base_url: Some("https://files.example.test".to_string()),
            },
        );
        let uploader = FileStorageUploader::new(destinations);
        let outcome = uploader
            .upload("default", "apps", "r.csv", b"id\n1\n", true, Some(7))
            .await
            .unwrap();
        assert_eq!(outcome.link.as_deref(), Some("https://files.example.test/apps/r.csv"));
        let written = std::fs::read(dir.path().join("apps").join("r.csv")).unwrap();
        assert_eq!(written, b"id\n1\n");
    }

    #[tokio::test]
    async fn unknown_destination_is_an_error_and_no_link_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut destinations = HashMap::new();
        destinations.insert(
            "default".to_string(),
            StorageDestination {
                root: dir.path().to_path_buf(),
                link_base_url: None,
            },
        );
        let uploader = FileStorageUploader::new(destinations);
        assert!(
            uploader
                .upload("other", "apps", "r.csv", b"", false, None)
                .await
                .is_err()
        );
        let outcome = uploader
            .upload("default", "apps", "r.csv", b"", false, None)
            .await
            .unwrap();
        assert!(outcome.link.is_none());
    }
}
