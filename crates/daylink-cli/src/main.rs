mod settings;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use daylink_core::model::{
    DEFAULT_SOURCE_DATE_FIELD, DEFAULT_SOURCE_LINK_FIELD, DEFAULT_TARGET_DATE_FIELD,
    DEFAULT_TARGET_LINK_FIELD,
};
use daylink_core::{reconcile, AmbiguityPolicy, Schema, DEFAULT_WINDOW_HOURS};
use daylink_notion::{NotionClient, DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT_SECS, MAX_PAGE_SIZE};
use serde_json::Value;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing_subscriber::EnvFilter;

use crate::settings::{RunOptions, Settings, MAX_WINDOW_HOURS};

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const EXIT_CONFIG: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "daylink")]
#[command(about = "Link recent wallet entries to the daily page of their accounting date")]
#[command(version)]
struct Cli {
    /// Only consider source records created within this many hours.
    #[arg(long, default_value_t = DEFAULT_WINDOW_HOURS, value_parser = clap::value_parser!(i64).range(1..=MAX_WINDOW_HOURS))]
    window_hours: i64,

    /// Fixed UTC offset used to turn timestamps into calendar days, e.g. +08:00.
    #[arg(long, value_parser = parse_offset, allow_hyphen_values = true)]
    day_offset: Option<UtcOffset>,

    #[arg(long, value_enum, default_value_t = OnAmbiguous::Link)]
    on_ambiguous: OnAmbiguous,

    #[arg(
        long,
        default_value_t = DEFAULT_PAGE_SIZE,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_PAGE_SIZE))
    )]
    page_size: u32,

    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: u64,

    /// Resolve everything but write nothing.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[arg(long, default_value = DEFAULT_SOURCE_DATE_FIELD)]
    source_date_property: String,

    #[arg(long, default_value = DEFAULT_SOURCE_LINK_FIELD)]
    source_link_property: String,

    #[arg(long, default_value = DEFAULT_TARGET_DATE_FIELD)]
    target_date_property: String,

    #[arg(long, default_value = DEFAULT_TARGET_LINK_FIELD)]
    target_link_property: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnAmbiguous {
    Link,
    Skip,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            window_hours: self.window_hours,
            day_offset: self.day_offset.unwrap_or(UtcOffset::UTC),
            on_ambiguous: match self.on_ambiguous {
                OnAmbiguous::Link => AmbiguityPolicy::Link,
                OnAmbiguous::Skip => AmbiguityPolicy::Skip,
            },
            page_size: self.page_size,
            timeout: Duration::from_secs(self.timeout_secs),
            dry_run: self.dry_run,
            schema: Schema {
                source_date_field: self.source_date_property.clone(),
                source_link_field: self.source_link_property.clone(),
                target_date_field: self.target_date_property.clone(),
                target_link_field: self.target_link_property.clone(),
            },
        }
    }
}

fn parse_offset(raw: &str) -> Result<UtcOffset, String> {
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(raw, format_description!("[offset_hour sign:mandatory]:[offset_minute]"))
        .map_err(|err| format!("expected an offset like +08:00 or -05:30 ({err})"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn run(cli: &Cli, settings: &Settings) -> Result<()> {
    let client = NotionClient::new(&settings.notion_config());
    let config = settings.reconcile_config();
    let report = reconcile(&client, &config, OffsetDateTime::now_utc())
        .context("reconciliation run did not complete")?;
    if cli.json {
        emit_json(serde_json::to_value(&report).context("failed to encode run report")?)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let settings = match Settings::from_env(cli.run_options()) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(&cli, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "run failed");
            ExitCode::FAILURE
        }
    }
}
