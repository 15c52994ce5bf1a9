pub mod cli;
pub mod config;
pub mod enrich;
pub mod error;
pub mod io_utils;
pub mod logging;
pub mod numeric;
pub mod pipeline;
pub mod reference;
pub mod store;
pub mod table;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use crate::{
    cli::{Cli, Commands, InspectArgs, Settings},
    reference::{TARIFF_FILE_MARKER, locate_reference_files, read_reference_table},
    store::ConsumoStore,
};

pub fn run() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init_logging(
        config::parse_log_level(&cli.settings.log_level),
        Some(cli.settings.log_file.as_path()),
    );
    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => handle_run(&cli.settings),
        Commands::Truncate => handle_truncate(&cli.settings),
        Commands::Summary => handle_summary(&cli.settings),
        Commands::Inspect(args) => handle_inspect(&cli.settings, &args),
    }
}

fn handle_run(settings: &Settings) -> Result<()> {
    let config = settings.pipeline_config()?;
    let ignored = config::ignored_database_settings(|name| std::env::var_os(name).is_some());
    if !ignored.is_empty() {
        warn!(
            "Ignoring {} for the SQLite store at {:?}",
            ignored.join(", "),
            config.database.path()
        );
    }
    let report = pipeline::run(&config).context("Running consumos pipeline")?;
    if let Some(summary) = &report.summary {
        println!();
        print!("{summary}");
    }
    Ok(())
}

fn handle_truncate(settings: &Settings) -> Result<()> {
    let path = settings.database().path();
    let mut store =
        ConsumoStore::open(&path).with_context(|| format!("Opening database {path:?}"))?;
    store
        .truncate()
        .with_context(|| format!("Truncating consumos in {path:?}"))?;
    info!("Table 'consumos' emptied and stats reset in {path:?}");
    Ok(())
}

fn handle_summary(settings: &Settings) -> Result<()> {
    let path = settings.database().path();
    let store = ConsumoStore::open(&path).with_context(|| format!("Opening database {path:?}"))?;
    let summary = store
        .summary()
        .with_context(|| format!("Querying summary from {path:?}"))?;
    print!("{summary}");
    Ok(())
}

fn handle_inspect(settings: &Settings, args: &InspectArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(Some(settings.input_encoding.as_str()))?;
    let files = locate_reference_files(&settings.data_folder)
        .with_context(|| format!("Locating reference files in {:?}", settings.data_folder))?;
    info!(
        "Inspecting {TARIFF_FILE_MARKER} file {:?}",
        files.tariffs.display()
    );
    let preview = read_reference_table(&files.tariffs, encoding, Some(args.rows))
        .with_context(|| format!("Reading {:?}", files.tariffs))?;
    println!("Columns: {}", preview.headers.join(", "));
    table::print_table(&preview.headers, &preview.rows);
    Ok(())
}
