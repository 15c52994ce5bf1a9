use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load consumption datasets into SQLite with tariff enrichment",
    long_about = None
)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Enrich and load every dataset file in the data folder (default)
    Run,
    /// Empty the consumos table and reset the running statistics
    Truncate,
    /// Print aggregate tasa statistics for the loaded records
    Summary,
    /// Show the normalized columns and first rows of the tariff reference file
    Inspect(InspectArgs),
}

/// Runtime settings; every option can also be supplied through the
/// environment or a `.env` file.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Log verbosity (ERROR, WARN, INFO, DEBUG, TRACE)
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO", global = true)]
    pub log_level: String,
    /// File that receives a copy of every log line
    #[arg(long, env = "LOG_FILE", default_value = "pipeline.log", global = true)]
    pub log_file: PathBuf,
    /// Folder holding the reference files and dataset-* files
    #[arg(long, env = "DATA_FOLDER", default_value = "datasets", global = true)]
    pub data_folder: PathBuf,
    /// Rows per enrichment and load batch
    #[arg(
        long,
        env = "BATCH_SIZE",
        default_value_t = 1000,
        value_parser = parse_batch_size,
        global = true
    )]
    pub batch_size: usize,
    /// Character encoding of the input files
    #[arg(long, env = "INPUT_ENCODING", default_value = "utf-8", global = true)]
    pub input_encoding: String,
    /// Directory containing the SQLite database file
    #[arg(long, env = "DB_DIR", default_value = ".", global = true)]
    pub db_dir: PathBuf,
    /// Database name; the file is `<DB_DIR>/<DB_NAME>.sqlite3`
    #[arg(long, env = "DB_NAME", default_value = "consumos_db", global = true)]
    pub db_name: String,
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    /// Number of data rows to show
    #[arg(long, default_value_t = 5)]
    pub rows: usize,
}

fn parse_batch_size(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("batch size must be greater than zero".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(format!("invalid batch size '{value}': {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_rejects_zero_and_garbage() {
        assert_eq!(parse_batch_size("250"), Ok(250));
        assert!(parse_batch_size("0").is_err());
        assert!(parse_batch_size("many").is_err());
    }

    #[test]
    fn defaults_apply_without_arguments() {
        let cli = Cli::try_parse_from(["consumos-etl", "--data-folder", "input"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.settings.data_folder, PathBuf::from("input"));
        assert_eq!(cli.settings.db_name, "consumos_db");
    }

    #[test]
    fn global_settings_follow_subcommand() {
        let cli =
            Cli::try_parse_from(["consumos-etl", "inspect", "--rows", "3", "--batch-size", "10"])
                .unwrap();
        assert!(matches!(cli.command, Some(Commands::Inspect(InspectArgs { rows: 3 }))));
        assert_eq!(cli.settings.batch_size, 10);
    }
}
