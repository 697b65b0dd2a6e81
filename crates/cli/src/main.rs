//! HomeOps call simulator
//!
//! Wires several call engines to in-memory backends and replays the
//! standard call scenarios:
//!
//! ```text
//! homeops-call-sim happy-path --talk-seconds 5
//! homeops-call-sim --ring-timeout-ms 3000 missed
//! homeops-call-sim --json-logs busy
//! homeops-call-sim credential-failure
//! ```

mod logging;
mod scenario;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use homeops_call_core::{CallConfig, CallHistoryEntry, CallRecord};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use logging::{parse_log_level, setup_logging, LoggingConfig};
use scenario::{Rig, ScenarioReport};

const DEFAULT_CONFIG_FILE: &str = "call-sim.toml";

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay call-session scenarios against in-memory backends", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "HOMEOPS_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Include file and line in log lines
    #[arg(long, global = true)]
    file_info: bool,

    /// Engine configuration file (.toml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the ring timeout (and the dial timeout unless set separately)
    #[arg(long, global = true)]
    ring_timeout_ms: Option<u64>,

    /// Override the connect timeout
    #[arg(long, global = true)]
    connect_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Caller dials, callee answers, both talk, caller hangs up
    HappyPath {
        /// How long the call stays connected
        #[arg(long, default_value = "5")]
        talk_seconds: u64,
    },
    /// Callee never answers and the ring timeout resolves the call
    Missed,
    /// A second caller reaches a callee that is already ringing
    Busy,
    /// Callee accepts but credential issuance fails
    CredentialFailure,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = parse_log_level(&cli.log_level)?;
    setup_logging(
        &LoggingConfig::new(level, "homeops-call-sim")
            .with_json(cli.json_logs)
            .with_file_info(cli.file_info),
    )?;

    let config = load_config(&cli)?;
    let rig = Rig::new(config);

    let report = match cli.command {
        Command::HappyPath { talk_seconds } => {
            scenario::happy_path(&rig, Duration::from_secs(talk_seconds)).await?
        }
        Command::Missed => scenario::missed(&rig).await?,
        Command::Busy => scenario::busy(&rig).await?,
        Command::CredentialFailure => scenario::credential_failure(&rig).await?,
    };

    print_report(&report);
    Ok(())
}

/// Explicit file, else the user config file if present, else environment
fn load_config(cli: &Cli) -> Result<CallConfig> {
    let default_file = dirs::config_dir().map(|dir| dir.join("homeops").join(DEFAULT_CONFIG_FILE));
    let mut config = match (&cli.config, default_file) {
        (Some(path), _) => read_config_file(path)?,
        (None, Some(path)) if path.exists() => read_config_file(&path)?,
        _ => CallConfig::from_env()?,
    };

    if let Some(ms) = cli.ring_timeout_ms {
        config.ring_timeout_ms = ms;
    }
    if let Some(ms) = cli.connect_timeout_ms {
        config.connect_timeout_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<CallConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let is_toml = path.extension().map_or(false, |ext| ext == "toml");
    let config = if is_toml {
        let config: CallConfig = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        config
    } else {
        CallConfig::from_json_str(&raw)?
    };
    Ok(config)
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Caller")]
    caller: String,
    #[tabled(rename = "Callee")]
    callee: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Answered")]
    answered: String,
    #[tabled(rename = "Ended")]
    ended: String,
}

impl From<&CallRecord> for RecordRow {
    fn from(record: &CallRecord) -> Self {
        Self {
            caller: record.caller_id.clone(),
            callee: record.callee_id.clone(),
            status: record.status.to_string(),
            answered: clock_time(record.answered_at),
            ended: clock_time(record.ended_at),
        }
    }
}

fn clock_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Client")]
    client: String,
    #[tabled(rename = "Caller")]
    caller: String,
    #[tabled(rename = "Callee")]
    callee: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Duration (s)")]
    duration: u64,
}

impl From<&(String, CallHistoryEntry)> for HistoryRow {
    fn from((client, entry): &(String, CallHistoryEntry)) -> Self {
        Self {
            client: client.clone(),
            caller: entry.caller_id.clone(),
            callee: entry.callee_id.clone(),
            outcome: entry.outcome.to_string(),
            duration: entry.duration_seconds,
        }
    }
}

fn print_report(report: &ScenarioReport) {
    println!("\n{} {}", "Scenario".bold(), report.name.cyan().bold());
    for note in &report.notes {
        println!("  {} {}", "•".dimmed(), note);
    }

    println!("\n{}", "Call records".bold());
    let records: Vec<RecordRow> = report.records.iter().map(RecordRow::from).collect();
    println!("{}", Table::new(records).with(Style::rounded()));

    println!("\n{}", "Call history".bold());
    if report.history.is_empty() {
        println!("  {}", "no history entries".yellow());
    } else {
        let rows: Vec<HistoryRow> = report.history.iter().map(HistoryRow::from).collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
}
