//! DataMapper - schema-driven record mapper
//!
//! CLI entry point for mapping runs and map/schema inspection.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use datamapper::cli::{Cli, Command, MapArgs};
use datamapper::config::Config;
use datamapper::context::RunSummary;
use datamapper::mapping::{FieldMap, compile};
use datamapper::pipeline::{MapRequest, resolve_schema_location, run_mapping};
use datamapper::schema::load_normalized;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("datamapper")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = level
        .and_then(|l| l.parse::<tracing::Level>().ok())
        .unwrap_or(tracing::Level::INFO);
    let log_file = fs::File::create(log_dir.join("datamapper.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli.log_level.clone().or_else(|| Config::load_log_level(cli.config.as_ref()));
    setup_logging(level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Some(Command::Map(args)) => cmd_map(config, args).await,
        Some(Command::Schema { location }) => cmd_schema(&config, &location).await,
        Some(Command::Check { map, schema }) => cmd_check(&config, map, schema).await,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Run the whole pipeline
async fn cmd_map(mut config: Config, args: MapArgs) -> Result<()> {
    config.apply_overrides(&args.overrides());
    let report = !args.no_report;
    let report_dir = config.log.report_dir.clone();
    let request = MapRequest {
        source: args.source,
        map: args.map,
        schema: args.schema,
    };

    let summary = run_mapping(config, &request, report)
        .await
        .context("Mapping run failed")?;

    print_summary(&summary);
    if report {
        println!(
            "  Report: {}",
            report_dir.join(&summary.run_id).join(datamapper::audit::REPORT_FILE).display()
        );
    }
    Ok(())
}

/// Print the normalized form of a schema
async fn cmd_schema(config: &Config, location: &str) -> Result<()> {
    let timeout = Duration::from_millis(config.orion.timeout_ms);
    let schema = load_normalized(location, timeout)
        .await
        .context(format!("Failed to normalize schema {}", location))?;

    println!("{}", serde_json::to_string_pretty(&schema.to_document())?);
    Ok(())
}

/// Compile a map and show what each field turned into
async fn cmd_check(config: &Config, map: PathBuf, schema: Option<String>) -> Result<()> {
    let field_map = FieldMap::load(&map, &config.mapping.entity_name_field)
        .context(format!("Failed to load map {}", map.display()))?;
    let location = resolve_schema_location(schema.as_deref(), &field_map, &config.mapping.schema_folder)?;
    let timeout = Duration::from_millis(config.orion.timeout_ms);
    let schema = load_normalized(&location, timeout)
        .await
        .context(format!("Failed to normalize schema {}", location))?;
    let compiled = compile(&field_map, &schema);

    println!("Map {} against {} ({})", map.display(), location, schema.entity_type().cyan());
    println!();
    for (name, extractor) in &compiled.fields {
        println!("{} {} <- {}", "✓".green(), name, extractor.describe());
    }
    match &compiled.identity {
        Some(identity) => println!(
            "{} id <- {}{}",
            "✓".green(),
            identity.extractor.describe(),
            if identity.is_id_prefix { " (prefix + row number)" } else { "" }
        ),
        None => println!("{} id <- source file name + row number", "⚠".yellow()),
    }
    for dropped in &compiled.dropped {
        println!("{} {}: {}", "✗".red(), dropped.name, dropped.reason);
    }

    println!();
    println!("{} fields compiled, {} keys dropped", compiled.fields.len(), compiled.dropped.len());
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Run {}", summary.run_id.cyan());
    println!("  Processed:  {}", summary.processed);
    println!("  Valid:      {}", summary.valid.to_string().green());
    println!("  Invalid:    {}", colored_count(summary.invalid));
    println!("  Unreadable: {}", colored_count(summary.unreadable));
    for (sink, tally) in &summary.sinks {
        println!(
            "  [{}] created {}, updated {}, skipped {}, failed {}",
            sink,
            tally.created,
            tally.updated,
            tally.skipped,
            colored_count(tally.failed)
        );
    }
}

fn colored_count(count: u64) -> colored::ColoredString {
    if count == 0 {
        count.to_string().normal()
    } else {
        count.to_string().red()
    }
}
