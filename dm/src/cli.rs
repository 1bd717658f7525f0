//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Overrides, UpdateMode, WriterKind};

/// DataMapper - schema-driven record mapper
#[derive(Parser)]
#[command(
    name = "dm",
    about = "Map CSV/JSON/GeoJSON records onto a target data model and upsert them",
    version,
    after_help = "Logs are written to: ~/.local/share/datamapper/logs/datamapper.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short, long, global = true, help = "Log level (overrides config)")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Map a source file and write entities to the active sinks
    Map(MapArgs),

    /// Normalize a schema and print its flattened form
    Schema {
        /// Schema path or URL
        #[arg(value_name = "PATH|URL")]
        location: String,
    },

    /// Compile a field map against its schema without reading rows
    Check {
        /// Field-map file
        #[arg(short, long)]
        map: PathBuf,

        /// Schema path or URL (default: the map's targetDataModel)
        #[arg(short, long)]
        schema: Option<String>,
    },
}

/// Arguments of `dm map`
#[derive(clap::Args, Debug, Clone)]
pub struct MapArgs {
    /// CSV, JSON or GeoJSON input
    #[arg(long)]
    pub source: PathBuf,

    /// Field-map file
    #[arg(short, long)]
    pub map: PathBuf,

    /// Schema path or URL (default: the map's targetDataModel)
    #[arg(short, long)]
    pub schema: Option<String>,

    /// Site segment of entity ids
    #[arg(long)]
    pub site: Option<String>,

    /// Service segment of entity ids
    #[arg(long)]
    pub service: Option<String>,

    /// Optional group segment of entity ids
    #[arg(long)]
    pub group: Option<String>,

    /// First row to process (1-based, inclusive)
    #[arg(long)]
    pub row_start: Option<u64>,

    /// Last row to process (inclusive)
    #[arg(long)]
    pub row_end: Option<u64>,

    /// Orion Context Broker base URL
    #[arg(long)]
    pub orion_url: Option<String>,

    /// APPEND or REPLACE
    #[arg(long)]
    pub update_mode: Option<UpdateMode>,

    /// Leave existing entities untouched
    #[arg(long)]
    pub skip_existing: bool,

    /// Output file of the file sink
    #[arg(short, long)]
    pub out_file: Option<PathBuf>,

    /// Active sinks, comma separated (orion,file)
    #[arg(short, long, value_delimiter = ',')]
    pub writers: Option<Vec<WriterKind>>,

    /// Do not write the JSONL audit report
    #[arg(long)]
    pub no_report: bool,
}

impl MapArgs {
    /// Flags that take priority over the config file
    pub fn overrides(&self) -> Overrides {
        Overrides {
            site: self.site.clone(),
            service: self.service.clone(),
            group: self.group.clone(),
            row_start: self.row_start,
            row_end: self.row_end,
            orion_url: self.orion_url.clone(),
            update_mode: self.update_mode,
            skip_existing: self.skip_existing,
            out_file: self.out_file.clone(),
            writers: self.writers.clone(),
        }
    }
}
