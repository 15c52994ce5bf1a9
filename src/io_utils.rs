//! I/O utilities for reading delimited source files.
//!
//! All file reads in consumos-etl flow through this module. It provides:
//!
//! - **Delimiter sniffing**: dataset files are exported with `;`, `,` or tab
//!   separators; [`detect_delimiter`] picks one from the leading bytes.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **Reader construction**: `open_csv_reader` and `open_csv_reader_from_path`.
//! - **Header normalization**: trimmed, lower-cased column names.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};

use crate::error::EtlError;

pub const REFERENCE_DELIMITER: u8 = b',';
pub const SNIFF_SAMPLE_BYTES: usize = 2048;

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding, EtlError> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| EtlError::Configuration(format!("Unknown encoding '{value}'")))
    } else {
        Ok(UTF_8)
    }
}

/// Chooses between `;`, `,` and tab by counting occurrences in `sample`.
///
/// Semicolon wins over comma only when strictly more frequent; tab then wins
/// when strictly more frequent than whichever of the two was chosen.
pub fn sniff_delimiter(sample: &[u8]) -> u8 {
    let count = |needle: u8| sample.iter().filter(|&&b| b == needle).count();
    let mut delimiter = if count(b';') > count(b',') { b';' } else { b',' };
    if count(b'\t') > count(delimiter) {
        delimiter = b'\t';
    }
    delimiter
}

pub fn detect_delimiter(path: &Path) -> Result<u8, EtlError> {
    let file = File::open(path)?;
    let mut sample = Vec::with_capacity(SNIFF_SAMPLE_BYTES);
    file.take(SNIFF_SAMPLE_BYTES as u64).read_to_end(&mut sample)?;
    Ok(sniff_delimiter(&sample))
}

/// Builds a headed reader. With `flexible`, records may be shorter or longer
/// than the header row; missing trailing cells read as blank downstream.
pub fn open_csv_reader<R>(reader: R, delimiter: u8, flexible: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(flexible);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
    flexible: bool,
) -> Result<csv::Reader<BufReader<File>>, EtlError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(open_csv_reader(reader, delimiter, flexible))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String, EtlError> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(EtlError::Encoding(format!(
            "Failed to decode text with encoding {}",
            encoding.name()
        )))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> Result<Vec<String>, EtlError> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Reads the header row and returns it normalized.
pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>, EtlError>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    Ok(normalize_headers(&decode_record(&headers, encoding)?))
}

pub fn normalize_header(name: &str) -> String {
    name.trim_start_matches('\u{feff}').trim().to_lowercase()
}

pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    headers.iter().map(|h| normalize_header(h)).collect()
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
