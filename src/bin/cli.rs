//! Binary entry point for the graph dedupe maintenance CLI.
#![forbid(unsafe_code)]

#[path = "cli/ui.rs"]
mod ui;

use std::error::Error;
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use graph_dedupe::{
    config::{
        minutes, parse_property_filters, validate_concurrency, window_minutes, DedupeConfig,
        EntityTypeSelection,
    },
    dedupe::{RunOptions, RunSummary, ScanParams, Scheduler},
    schema::{EntityTypeDescriptor, SchemaCatalog},
    store::{NoopReindexer, Reindexer, SqliteGraph},
    types::DedupeError,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ui::{ColorMode, Ui};

const EXIT_ERROR: i32 = 1;
const EXIT_TYPE_FAILED: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "graph-dedupe",
    version,
    about = "Find and remove duplicate vertices in a property graph",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "GRAPH_DEDUPE_CONFIG",
        value_name = "PATH",
        help = "Configuration file (TOML)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        value_name = "LEVEL",
        help = "Log filter, e.g. info or graph_dedupe=debug (defaults to RUST_LOG, then info)"
    )]
    log_level: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = ColorArg::Auto,
        help = "When to colour text output"
    )]
    color: ColorArg,

    #[arg(long, global = true, help = "Suppress progress output and decorations")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct RunCmd {
    #[arg(value_name = "DB", help = "SQLite graph file")]
    db_path: PathBuf,

    #[arg(long, value_name = "ID", help = "Named operator accountable for the run")]
    operator: String,

    #[arg(
        long = "type",
        value_name = "TYPE",
        action = ArgAction::Append,
        value_delimiter = ',',
        help = "Entity type to process (repeatable or comma-separated)"
    )]
    types: Vec<String>,

    #[arg(long, help = "Process every eligible configured type")]
    all: bool,

    #[arg(long, help = "Delete confirmed duplicates (default only reports)")]
    auto_fix: bool,

    #[arg(long, value_name = "N", help = "Skip deletion when more groups than this are confirmed")]
    max_fix: Option<usize>,

    #[arg(long, value_name = "N", help = "Minutes to wait between the two passes")]
    sleep_minutes: Option<u64>,

    #[arg(
        long,
        value_name = "N",
        help = "Only scan vertices created in the last N minutes (0 = no limit)"
    )]
    time_window_minutes: Option<u64>,

    #[arg(long, value_name = "NAME|VALUE,...", help = "Equality filters on candidate vertices")]
    filter: Option<String>,

    #[arg(long, help = "Enable the special tenant tie-break override")]
    special_tenant_rule: bool,

    #[arg(long, value_name = "N", help = "Number of entity types processed in parallel")]
    concurrency: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Detect duplicates and optionally delete confirmed ones")]
    Run(RunCmd),

    #[command(about = "List configured entity types")]
    Types,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

impl From<ColorArg> for ColorMode {
    fn from(color: ColorArg) -> Self {
        match color {
            ColorArg::Auto => ColorMode::Auto,
            ColorArg::Always => ColorMode::Always,
            ColorArg::Never => ColorMode::Never,
        }
    }
}

#[derive(Serialize)]
struct TypeListing<'a> {
    #[serde(flatten)]
    descriptor: &'a EntityTypeDescriptor,
    index_name: String,
    eligible: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    let ui = Ui::new(cli.color.into(), cli.quiet);
    let code = match execute(&cli, &ui) {
        Ok(code) => code,
        Err(err) => {
            ui.warn(&format!("error: {err}"));
            EXIT_ERROR
        }
    };
    process::exit(code);
}

fn init_tracing(level: Option<&str>) {
    let filter = level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn execute(cli: &Cli, ui: &Ui) -> Result<i32, Box<dyn Error>> {
    let config = DedupeConfig::load(cli.config.clone()).map_err(DedupeError::from)?;
    match &cli.command {
        Command::Types => {
            let eligible = config.catalog.eligible_types();
            let listing: Vec<TypeListing<'_>> = config
                .catalog
                .descriptors()
                .map(|descriptor| TypeListing {
                    descriptor,
                    index_name: descriptor.index_name(),
                    eligible: eligible.contains(&descriptor.name),
                })
                .collect();
            emit(cli.format, &listing, || print_types_text(ui, &listing))?;
            Ok(0)
        }
        Command::Run(cmd) => {
            let summary = run_dedupe(cmd, &config, ui)?;
            emit(cli.format, &summary, || ui.run_summary(&summary))?;
            Ok(if summary.has_failures() {
                EXIT_TYPE_FAILED
            } else {
                0
            })
        }
    }
}

fn run_dedupe(cmd: &RunCmd, config: &DedupeConfig, ui: &Ui) -> Result<RunSummary, Box<dyn Error>> {
    let operator = config.operator_policy.parse(&cmd.operator)?;
    let descriptors = EntityTypeSelection::from_args(cmd.all, &cmd.types)?.resolve(&config.catalog)?;
    let filters = match cmd.filter.as_deref() {
        Some(raw) => parse_property_filters(raw)?,
        None => Vec::new(),
    };
    let settings = &config.settings;
    let options = RunOptions {
        descriptors,
        auto_fix: cmd.auto_fix,
        max_records_to_fix: cmd.max_fix.unwrap_or(settings.max_records_to_fix),
        sleep_between_passes: cmd
            .sleep_minutes
            .map(minutes)
            .unwrap_or(settings.sleep_between_passes),
        scan: ScanParams {
            time_window: match cmd.time_window_minutes {
                Some(value) => window_minutes(value),
                None => settings.time_window,
            },
            filters,
            special_tenant_rule: cmd.special_tenant_rule,
        },
        concurrency: validate_concurrency(cmd.concurrency.unwrap_or(settings.concurrency))?,
        operator,
    };

    if !cmd.db_path.exists() {
        return Err(format!("database {} does not exist", cmd.db_path.display()).into());
    }
    let graph = SqliteGraph::open(&cmd.db_path, config.conventions.canonical_uri_property.clone())?;

    // Detection-only runs never delete, so they never reindex either.
    let reindexer: &dyn Reindexer = if options.auto_fix { &graph } else { &NoopReindexer };

    let progress = ui.scanning(format!(
        "Scanning {} entity type(s) in {}",
        options.descriptors.len(),
        cmd.db_path.display()
    ));
    let summary = Scheduler::new(&graph, reindexer, &config.conventions).run(&options)?;
    let elapsed = progress.finish();
    tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "dedupe.cli.finished");
    Ok(summary)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_types_text(ui: &Ui, listing: &[TypeListing<'_>]) {
    if listing.is_empty() {
        ui.warn("No entity types configured");
        return;
    }
    ui.entity_types(listing.iter().map(|entry| {
        let descriptor = entry.descriptor;
        let mut line = format!("{} keys=[{}]", descriptor.name, descriptor.key_properties.join(", "));
        if descriptor.is_dependent() {
            line.push_str(&format!(" dependent_on=[{}]", descriptor.dependent_on.join(", ")));
        }
        if !entry.eligible {
            line.push_str(" (not in --all)");
        }
        line
    }));
}
