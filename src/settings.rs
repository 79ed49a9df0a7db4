use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Daemon-wide settings, loaded from `settings.json` in the base dir.
/// Everything has a default so a missing file just means "defaults".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_log_retention")]
    pub log_retention_days: i64,
    pub global_webhook_url: Option<String>,
    /// Report type -> generator command. A report whose type has no entry
    /// here fails its runs with a named error.
    #[serde(default)]
    pub generators: HashMap<String, GeneratorCommand>,
    /// Storage config name -> local destination root.
    #[serde(default)]
    pub storage: HashMap<String, StorageDestination>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageDestination {
    pub root: PathBuf,
    pub link_base_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            run_timeout_secs: default_run_timeout(),
            log_retention_days: default_log_retention(),
            global_webhook_url: None,
            generators: HashMap::new(),
            storage: HashMap::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        let settings: Settings =
            serde_json::from_str(&raw).with_context(|| format!("parse settings {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            bail!("scan_interval_secs must be at least 1");
        }
        if self.run_timeout_secs == 0 {
            bail!("run_timeout_secs must be at least 1");
        }
        for (name, generator) in &self.generators {
            if generator.program.trim().is_empty() {
                bail!("generator {name}: program is required");
            }
        }
        Ok(())
    }
}

fn default_scan_interval() -> u64 {
    60
}

fn default_run_timeout() -> u64 {
    600
}

fn default_log_retention() -> i64 {
    30
}
