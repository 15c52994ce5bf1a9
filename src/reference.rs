//! Reference data: tariffs per destination and yearly minimum/maximum bounds.
//!
//! The three reference tables live next to the dataset files and are located
//! by a case-insensitive substring of their file name. They are always comma
//! delimited. Loading either yields all three tables or fails; the pipeline
//! never runs with partial reference data.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use encoding_rs::Encoding;
use itertools::Itertools;
use log::{debug, info};

use crate::{
    error::EtlError,
    io_utils,
    numeric::{coerce_year, parse_optional_european, parse_percentage},
};

pub const TARIFF_FILE_MARKER: &str = "tarifa_por_destino";
pub const MINIMOS_FILE_MARKER: &str = "minimos";
pub const MAXIMOS_FILE_MARKER: &str = "maximos";

pub const DESTINO_COLUMN: &str = "destino";
pub const TARIFF_COLUMN: &str = "tarifa sobre consumo";
pub const YEAR_COLUMN: &str = "año";
pub const MINIMO_COLUMN: &str = "mínimo";
pub const MAXIMO_COLUMN: &str = "máximo";

/// Destination to tariff fraction (`0.125` for `12,5%`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TariffTable {
    rates: HashMap<String, f64>,
    mean_rate: f64,
}

impl TariffTable {
    /// Builds the table from `(destino, fraction)` pairs in file order.
    ///
    /// Later duplicates overwrite earlier ones, but every pair contributes to
    /// the mean used as the default for unknown destinations.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut rates = HashMap::new();
        let mut total = 0.0;
        let mut count = 0usize;
        for (destino, rate) in entries {
            total += rate;
            count += 1;
            rates.insert(destino.into(), rate);
        }
        let mean_rate = if count == 0 { 0.0 } else { total / count as f64 };
        Self { rates, mean_rate }
    }

    pub fn get(&self, destino: &str) -> Option<f64> {
        self.rates.get(destino).copied()
    }

    pub fn contains(&self, destino: &str) -> bool {
        self.rates.contains_key(destino)
    }

    pub(crate) fn insert(&mut self, destino: &str, rate: f64) {
        self.rates.insert(destino.to_string(), rate);
    }

    /// Mean of the tariffs read from the reference file.
    pub fn mean_rate(&self) -> f64 {
        self.mean_rate
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Year to bound value. Year `0` is an ordinary key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YearBoundTable {
    bounds: HashMap<i64, f64>,
}

impl YearBoundTable {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i64, f64)>,
    {
        Self {
            bounds: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, year: i64) -> Option<f64> {
        self.bounds.get(&year).copied()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceFiles {
    pub tariffs: PathBuf,
    pub minimos: PathBuf,
    pub maximos: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceData {
    pub tariffs: TariffTable,
    pub minimos: YearBoundTable,
    pub maximos: YearBoundTable,
}

/// A reference file read into memory with normalized headers.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Resolves a key and a value column, or lists whichever are absent.
    fn resolve(&self, key: &str, value: &str) -> Result<ColumnPair, Vec<String>> {
        match (self.column(key), self.column(value)) {
            (Some(key), Some(value)) => Ok(ColumnPair { key, value }),
            (key_idx, value_idx) => Err([(key, key_idx), (value, value_idx)]
                .into_iter()
                .filter(|(_, idx)| idx.is_none())
                .map(|(name, _)| name.to_string())
                .collect()),
        }
    }

    fn pairs(&self, columns: ColumnPair) -> impl Iterator<Item = (&str, &str)> {
        self.rows.iter().map(move |row| {
            let cell = |idx: usize| row.get(idx).map(String::as_str).unwrap_or("");
            (cell(columns.key), cell(columns.value))
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnPair {
    key: usize,
    value: usize,
}

pub fn locate_reference_files(dir: &Path) -> Result<ReferenceFiles, EtlError> {
    if !dir.is_dir() {
        return Err(EtlError::Configuration(format!(
            "Data folder {dir:?} does not exist"
        )));
    }
    let files = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .sorted()
        .collect_vec();

    let find = |marker: &str| {
        files
            .iter()
            .find(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().to_lowercase().contains(marker))
                    .unwrap_or(false)
            })
            .cloned()
    };

    let tariffs = find(TARIFF_FILE_MARKER);
    let minimos = find(MINIMOS_FILE_MARKER);
    let maximos = find(MAXIMOS_FILE_MARKER);

    match (tariffs, minimos, maximos) {
        (Some(tariffs), Some(minimos), Some(maximos)) => Ok(ReferenceFiles {
            tariffs,
            minimos,
            maximos,
        }),
        (tariffs, minimos, maximos) => {
            let mut missing = Vec::new();
            if tariffs.is_none() {
                missing.push(format!("{TARIFF_FILE_MARKER}.csv"));
            }
            if minimos.is_none() {
                missing.push(format!("{MINIMOS_FILE_MARKER}.csv"));
            }
            if maximos.is_none() {
                missing.push(format!("{MAXIMOS_FILE_MARKER}.csv"));
            }
            Err(EtlError::MissingReferenceFile { missing })
        }
    }
}

/// Reads a comma delimited reference file, keeping at most `limit` rows.
pub fn read_reference_table(
    path: &Path,
    encoding: &'static Encoding,
    limit: Option<usize>,
) -> Result<RawTable, EtlError> {
    let mut reader =
        io_utils::open_csv_reader_from_path(path, io_utils::REFERENCE_DELIMITER, false)?;
    let headers = io_utils::reader_headers(&mut reader, encoding)?;
    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    while limit.is_none_or(|max| rows.len() < max) && reader.read_byte_record(&mut record)? {
        rows.push(io_utils::decode_record(&record, encoding)?);
    }
    Ok(RawTable { headers, rows })
}

impl ReferenceData {
    pub fn load(dir: &Path, encoding: &'static Encoding) -> Result<Self, EtlError> {
        let files = locate_reference_files(dir)?;
        debug!("Reference files resolved: {files:?}");

        let tariffs = read_reference_table(&files.tariffs, encoding, None)?;
        let minimos = read_reference_table(&files.minimos, encoding, None)?;
        let maximos = read_reference_table(&files.maximos, encoding, None)?;

        let resolved = [
            (&files.tariffs, tariffs.resolve(DESTINO_COLUMN, TARIFF_COLUMN)),
            (&files.minimos, minimos.resolve(YEAR_COLUMN, MINIMO_COLUMN)),
            (&files.maximos, maximos.resolve(YEAR_COLUMN, MAXIMO_COLUMN)),
        ];
        let gaps = resolved
            .iter()
            .filter_map(|(path, columns)| {
                columns
                    .as_ref()
                    .err()
                    .map(|missing| (display_name(path), missing.clone()))
            })
            .collect_vec();
        let [(_, Ok(tariff_cols)), (_, Ok(minimo_cols)), (_, Ok(maximo_cols))] = resolved else {
            return Err(EtlError::MissingReferenceColumns { gaps });
        };

        let data = Self {
            tariffs: tariff_table(&tariffs, tariff_cols),
            minimos: year_bounds(&minimos, minimo_cols),
            maximos: year_bounds(&maximos, maximo_cols),
        };
        info!(
            "Reference data loaded: {} tariff(s), {} minimum year(s), {} maximum year(s)",
            data.tariffs.len(),
            data.minimos.len(),
            data.maximos.len()
        );
        Ok(data)
    }
}

fn tariff_table(table: &RawTable, columns: ColumnPair) -> TariffTable {
    TariffTable::from_entries(
        table
            .pairs(columns)
            .filter(|(destino, _)| !destino.trim().is_empty())
            .map(|(destino, rate)| (destino.trim().to_string(), parse_percentage(rate)))
            .collect_vec(),
    )
}

fn year_bounds(table: &RawTable, columns: ColumnPair) -> YearBoundTable {
    YearBoundTable::from_entries(table.pairs(columns).filter_map(|(year, value)| {
        parse_optional_european(value).map(|bound| (coerce_year(year), bound))
    }))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
