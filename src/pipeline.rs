//! Pipeline driver: bootstrap the store, load reference data once, then
//! stream every `dataset-*` file through enrichment and loading.
//!
//! Failures before the first dataset file abort the run. A failure inside a
//! file is logged and the driver continues with the next file; rows from
//! batches committed before the failure stay loaded.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use log::{debug, error, info, warn};

use crate::{
    config::PipelineConfig,
    enrich::{self, EnrichedBatch, EnrichmentContext, RawBatch},
    error::EtlError,
    io_utils,
    reference::ReferenceData,
    store::{ConsumoStore, Summary},
    table::format_amount,
};

pub const DATASET_PREFIX: &str = "dataset-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Bootstrap,
    ReferenceLoad,
    StreamBatches,
    Summary,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Init => "init",
            Stage::Bootstrap => "bootstrap",
            Stage::ReferenceLoad => "reference load",
            Stage::StreamBatches => "stream batches",
            Stage::Summary => "summary",
            Stage::Done => "done",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub file: String,
    pub txt_id: String,
    pub batches: usize,
    pub rows_loaded: usize,
    pub tasa_sum: f64,
    pub rejected: usize,
    pub duplicates: usize,
}

impl FileReport {
    fn new(file: String, txt_id: String) -> Self {
        Self {
            file,
            txt_id,
            batches: 0,
            rows_loaded: 0,
            tasa_sum: 0.0,
            rejected: 0,
            duplicates: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub files: Vec<FileReport>,
    pub failed_files: Vec<String>,
    pub summary: Option<Summary>,
}

impl RunReport {
    pub fn rows_loaded(&self) -> usize {
        self.files.iter().map(|f| f.rows_loaded).sum()
    }
}

/// Runs the whole pipeline against the configured database file.
pub fn run(config: &PipelineConfig) -> Result<RunReport, EtlError> {
    info!("=== PIPELINE START ===");
    let mut stage = Stage::Init;
    let result = open_and_execute(config, &mut stage);
    match &result {
        Ok(report) => info!(
            "=== PIPELINE END ({} file(s) loaded, {} failed) ===",
            report.files.len(),
            report.failed_files.len()
        ),
        Err(err) => {
            error!("Pipeline failed during {stage}: {err}");
            info!("=== PIPELINE END (failed during {stage}) ===");
        }
    }
    result
}

fn open_and_execute(config: &PipelineConfig, stage: &mut Stage) -> Result<RunReport, EtlError> {
    ensure_data_folder(&config.data_folder)?;
    *stage = Stage::Bootstrap;
    let mut store = ConsumoStore::open(&config.database.path())?;
    execute_from_bootstrap(config, &mut store, stage)
}

/// Runs the folder check, bootstrap, reference loading, file streaming and
/// the summary query against an already opened store. `stage` tracks
/// progress for reporting.
pub fn execute(
    config: &PipelineConfig,
    store: &mut ConsumoStore,
    stage: &mut Stage,
) -> Result<RunReport, EtlError> {
    *stage = Stage::Init;
    ensure_data_folder(&config.data_folder)?;
    execute_from_bootstrap(config, store, stage)
}

fn execute_from_bootstrap(
    config: &PipelineConfig,
    store: &mut ConsumoStore,
    stage: &mut Stage,
) -> Result<RunReport, EtlError> {
    *stage = Stage::Bootstrap;
    store.bootstrap()?;

    *stage = Stage::ReferenceLoad;
    let reference = ReferenceData::load(&config.data_folder, config.encoding)?;
    let mut context = EnrichmentContext::new(reference);
    let files = list_dataset_files(&config.data_folder)?;
    info!("Found {} dataset file(s)", files.len());

    *stage = Stage::StreamBatches;
    let mut report = RunReport::default();
    for path in files {
        let name = file_name(&path);
        match process_file(&path, config, &mut context, store) {
            Ok(file_report) => report.files.push(file_report),
            Err(err) => {
                let err = EtlError::file_processing(name.clone(), err);
                error!("{err}");
                report.failed_files.push(name);
            }
        }
    }

    *stage = Stage::Summary;
    report.summary = match store.summary() {
        Ok(summary) => {
            info!("--- Final Summary ---");
            for row in summary.rows() {
                info!("{}: {}", row[0], row[1]);
            }
            Some(summary)
        }
        Err(err) => {
            error!("Error querying summary: {err}");
            None
        }
    };

    *stage = Stage::Done;
    Ok(report)
}

fn ensure_data_folder(dir: &Path) -> Result<(), EtlError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(EtlError::Configuration(format!(
            "Data folder {dir:?} does not exist; create it and add the reference and dataset files"
        )))
    }
}

/// Returns `dataset-*` files in lexicographic order.
pub fn list_dataset_files(dir: &Path) -> Result<Vec<PathBuf>, EtlError> {
    let files = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && file_name(path).starts_with(DATASET_PREFIX))
        .sorted()
        .collect_vec();
    if files.is_empty() {
        return Err(EtlError::Configuration(format!(
            "No {DATASET_PREFIX}* files found in {dir:?}"
        )));
    }
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn txt_id(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn process_file(
    path: &Path,
    config: &PipelineConfig,
    context: &mut EnrichmentContext,
    store: &mut ConsumoStore,
) -> Result<FileReport, EtlError> {
    let name = file_name(path);
    let delimiter = io_utils::detect_delimiter(path)?;
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter, true)?;
    let headers = io_utils::reader_headers(&mut reader, config.encoding)?;
    enrich::validate_headers(&headers, &txt_id(path))?;
    info!(
        "Reading {name} with delimiter '{}' and columns {:?}",
        io_utils::printable_delimiter(delimiter),
        headers
    );

    let mut report = FileReport::new(name, txt_id(path));
    let mut next_row = 1;
    let records = reader.into_byte_records();
    for chunk in &records.chunks(config.batch_size) {
        let rows = chunk
            .map(|record| {
                record
                    .map_err(EtlError::from)
                    .and_then(|r| io_utils::decode_record(&r, config.encoding))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let batch = RawBatch::new(headers.clone(), rows, next_row);
        next_row += batch.len();

        let enriched = context.enrich_batch(&batch, &report.txt_id)?;
        report.batches += 1;
        report.rejected += enriched.rejected.len();
        report.duplicates += enriched.duplicates;
        note_rejections(&report.file, &enriched);
        if enriched.is_empty() {
            continue;
        }

        let outcome = store.load_batch(&enriched)?;
        report.rows_loaded += outcome.rows;
        report.tasa_sum += outcome.tasa_sum;
        info!(
            "File: {} | batch rows: {} | file total: {} | file tasa sum: {}",
            report.file,
            outcome.rows,
            report.rows_loaded,
            format_amount(report.tasa_sum)
        );
    }

    info!(
        "File {} fully processed. Total rows: {}, tasa sum: {}",
        report.file,
        report.rows_loaded,
        format_amount(report.tasa_sum)
    );
    Ok(report)
}

fn note_rejections(file: &str, enriched: &EnrichedBatch) {
    if enriched.duplicates > 0 {
        debug!(
            "{file}: {} row(s) superseded by later rows with the same id",
            enriched.duplicates
        );
    }
    if enriched.rejected.is_empty() {
        return;
    }
    warn!(
        "{file}: {} row(s) dropped for missing id, destino, consumo or tasa",
        enriched.rejected.len()
    );
    for rejected in &enriched.rejected {
        debug!(
            "{file}: row {} ({:?}) rejected: {:?}",
            rejected.row_number, rejected.id, rejected.reason
        );
    }
}
