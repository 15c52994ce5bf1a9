//! Typed failures raised by the loader.
//!
//! Numeric coercion never produces an error: malformed numbers degrade to a
//! default value inside [`crate::numeric`]. Everything else that can stop a
//! batch, a file, or the whole run is one of the variants below.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing reference files: {}", .missing.join(", "))]
    MissingReferenceFile { missing: Vec<String> },

    #[error("missing required columns in {source_name}: {}", .columns.join(", "))]
    MissingColumn {
        source_name: String,
        columns: Vec<String>,
    },

    #[error("missing required columns in reference files: {}", format_reference_gaps(.gaps))]
    MissingReferenceColumns { gaps: Vec<(String, Vec<String>)> },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("failed to process {file}: {source}")]
    FileProcessing {
        file: String,
        #[source]
        source: Box<EtlError>,
    },
}

impl EtlError {
    pub fn file_processing(file: impl Into<String>, source: EtlError) -> Self {
        EtlError::FileProcessing {
            file: file.into(),
            source: Box::new(source),
        }
    }
}

fn format_reference_gaps(gaps: &[(String, Vec<String>)]) -> String {
    gaps.iter()
        .map(|(file, columns)| format!("{file}: [{}]", columns.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}
