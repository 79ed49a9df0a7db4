use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "reportd", version, about = "scheduled report execution daemon")]
pub struct Cli {
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Version,
    /// Spawn the daemon in the background.
    Start,
    /// Signal a running daemon to stop.
    Stop,
    Status,
    /// List reports with schedules, next runs, and last results.
    List,
    Logs {
        #[arg(long)]
        report: Option<String>,
        #[arg(long, default_value_t = 50)]
        tail: usize,
    },
    /// Create a report with default schedule, delivery, and notifications.
    Add {
        name: String,
        #[arg(long)]
        report_type: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, default_value = "csv")]
        format: String,
    },
    Remove {
        report_id: Uuid,
    },
    Enable {
        report_id: Uuid,
    },
    Disable {
        report_id: Uuid,
    },
    /// Trigger one run now (through the daemon when it is live).
    Run {
        report_id: Uuid,
    },
    /// Run the scheduler loop in the foreground.
    Daemon,
}
