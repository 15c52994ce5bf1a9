//! Record enrichment: tariff lookup, yearly clamping, deduplication and
//! rejection of incomplete rows.
//!
//! A batch moves through these steps in order:
//!
//! 1. required columns are resolved once for the whole batch;
//! 2. cells are coerced into a typed [`RawRecord`];
//! 3. destinations missing from the tariff table receive the mean tariff,
//!    which stays in the [`EnrichmentContext`] for the rest of the run;
//! 4. `tasa = consumo * tarifa`, clamped by the year's minimum then maximum;
//! 5. the last row per `id` wins;
//! 6. rows without id, destino, consumo or a defined tasa are rejected.

use std::collections::HashMap;

use itertools::Itertools;
use log::{debug, warn};

use crate::{
    error::EtlError,
    numeric::{coerce_number, coerce_year, parse_optional_european},
    reference::{ReferenceData, TariffTable, YearBoundTable},
};

pub const REQUIRED_COLUMNS: [&str; 5] = ["id", "año", "destino", "estrato", "consumo"];

/// One bounded slice of a dataset file with normalized headers.
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// 1-based data row number of `rows[0]` within its file.
    pub first_row: usize,
}

impl RawBatch {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>, first_row: usize) -> Self {
        Self {
            headers,
            rows,
            first_row,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnLayout {
    id: usize,
    year: usize,
    destino: usize,
    estrato: usize,
    consumo: usize,
}

impl ColumnLayout {
    fn resolve(headers: &[String], source_name: &str) -> Result<Self, EtlError> {
        let position = |name: &str| headers.iter().position(|h| h == name);
        let missing = REQUIRED_COLUMNS
            .iter()
            .filter(|&&name| position(name).is_none())
            .map(|name| name.to_string())
            .collect_vec();
        if !missing.is_empty() {
            return Err(EtlError::MissingColumn {
                source_name: source_name.to_string(),
                columns: missing,
            });
        }
        let index = |name: &str| position(name).unwrap_or_default();
        Ok(Self {
            id: index("id"),
            year: index("año"),
            destino: index("destino"),
            estrato: index("estrato"),
            consumo: index("consumo"),
        })
    }
}

/// Checks that `headers` carry every required column, so a file is rejected
/// even when it holds no data rows.
pub fn validate_headers(headers: &[String], source_name: &str) -> Result<(), EtlError> {
    ColumnLayout::resolve(headers, source_name).map(|_| ())
}

/// A dataset row after type coercion. Blank cells stay absent.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub row_number: usize,
    pub id: Option<String>,
    pub year: i64,
    pub destino: Option<String>,
    pub estrato: f64,
    pub consumo: Option<f64>,
}

impl RawRecord {
    fn from_cells(cells: &[String], layout: ColumnLayout, row_number: usize) -> Self {
        let cell = |idx: usize| cells.get(idx).map(|c| c.trim()).unwrap_or("");
        let text = |idx: usize| Some(cell(idx)).filter(|c| !c.is_empty()).map(str::to_string);
        Self {
            row_number,
            id: text(layout.id),
            year: coerce_year(cell(layout.year)),
            destino: text(layout.destino),
            estrato: coerce_number(cell(layout.estrato)),
            consumo: parse_optional_european(cell(layout.consumo)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub id: String,
    pub txt_id: String,
    pub year: i64,
    pub destino: String,
    pub estrato: f64,
    pub consumo: f64,
    pub tarifa: f64,
    pub tasa: f64,
    pub minimo: Option<f64>,
    pub maximo: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingId,
    MissingDestino,
    MissingConsumo,
    UndefinedTasa,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub row_number: usize,
    pub id: Option<String>,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichedBatch {
    pub records: Vec<EnrichedRecord>,
    pub rejected: Vec<RejectedRow>,
    /// Rows discarded because a later row in the batch shares their id.
    pub duplicates: usize,
}

impl EnrichedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn tasa_sum(&self) -> f64 {
        self.records.iter().map(|r| r.tasa).sum()
    }
}

/// Applies the minimum bound, then the maximum bound. When a year's minimum
/// exceeds its maximum the maximum wins.
pub fn clamp_tasa(tasa: f64, minimo: Option<f64>, maximo: Option<f64>) -> f64 {
    let mut clamped = tasa;
    if let Some(min) = minimo {
        if min > clamped {
            clamped = min;
        }
    }
    if let Some(max) = maximo {
        if max < clamped {
            clamped = max;
        }
    }
    clamped
}

/// Lookup state shared by every batch of a run.
///
/// The tariff table grows as unknown destinations are met so that every row
/// with the same destination receives the same default tariff.
#[derive(Debug, Clone)]
pub struct EnrichmentContext {
    tariffs: TariffTable,
    minimos: YearBoundTable,
    maximos: YearBoundTable,
}

struct Candidate {
    record: RawRecord,
    tarifa: Option<f64>,
    tasa: Option<f64>,
    minimo: Option<f64>,
    maximo: Option<f64>,
}

impl EnrichmentContext {
    pub fn new(reference: ReferenceData) -> Self {
        Self {
            tariffs: reference.tariffs,
            minimos: reference.minimos,
            maximos: reference.maximos,
        }
    }

    pub fn tariffs(&self) -> &TariffTable {
        &self.tariffs
    }

    /// Registers the default tariff for each destination not seen before and
    /// returns the newly registered ones in order of appearance.
    fn register_unknown_destinos<'a, I>(&mut self, destinos: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unknown = destinos
            .into_iter()
            .filter(|destino| !self.tariffs.contains(destino))
            .unique()
            .map(str::to_string)
            .collect_vec();
        let default_rate = self.tariffs.mean_rate();
        for destino in &unknown {
            self.tariffs.insert(destino, default_rate);
        }
        unknown
    }

    pub fn enrich_batch(
        &mut self,
        batch: &RawBatch,
        txt_id: &str,
    ) -> Result<EnrichedBatch, EtlError> {
        let layout = ColumnLayout::resolve(&batch.headers, txt_id)?;

        let records = batch
            .rows
            .iter()
            .enumerate()
            .map(|(offset, cells)| RawRecord::from_cells(cells, layout, batch.first_row + offset))
            .collect_vec();

        let unknown =
            self.register_unknown_destinos(records.iter().filter_map(|r| r.destino.as_deref()));
        if !unknown.is_empty() {
            warn!(
                "Unknown destinations in {txt_id}: {:?}; assigning default tariff {:.4}",
                unknown,
                self.tariffs.mean_rate()
            );
        }

        let candidates = records
            .into_iter()
            .map(|record| self.price(record))
            .collect_vec();

        let (kept, duplicates) = keep_last_per_id(candidates);

        let mut enriched = EnrichedBatch {
            duplicates,
            ..EnrichedBatch::default()
        };
        for candidate in kept {
            match finalize(candidate, txt_id) {
                Ok(record) => enriched.records.push(record),
                Err(rejected) => enriched.rejected.push(rejected),
            }
        }
        debug!(
            "Enriched {} row(s) from {txt_id}: {} kept, {} duplicate(s), {} rejected",
            batch.len(),
            enriched.records.len(),
            enriched.duplicates,
            enriched.rejected.len()
        );
        Ok(enriched)
    }

    fn price(&self, record: RawRecord) -> Candidate {
        let tarifa = record
            .destino
            .as_deref()
            .and_then(|destino| self.tariffs.get(destino));
        let minimo = self.minimos.get(record.year);
        let maximo = self.maximos.get(record.year);
        let tasa = match (record.consumo, tarifa) {
            (Some(consumo), Some(tarifa)) => Some(clamp_tasa(consumo * tarifa, minimo, maximo)),
            _ => None,
        };
        Candidate {
            record,
            tarifa,
            tasa,
            minimo,
            maximo,
        }
    }
}

/// Drops every row whose id reappears later in the batch, preserving the
/// order of the survivors. Rows without an id are kept for rejection.
fn keep_last_per_id(candidates: Vec<Candidate>) -> (Vec<Candidate>, usize) {
    let mut last_seen: HashMap<String, usize> = HashMap::new();
    for (idx, candidate) in candidates.iter().enumerate() {
        if let Some(id) = &candidate.record.id {
            last_seen.insert(id.clone(), idx);
        }
    }
    let total = candidates.len();
    let kept = candidates
        .into_iter()
        .enumerate()
        .filter(|(idx, candidate)| match &candidate.record.id {
            Some(id) => last_seen.get(id) == Some(idx),
            None => true,
        })
        .map(|(_, candidate)| candidate)
        .collect_vec();
    let duplicates = total - kept.len();
    (kept, duplicates)
}

fn finalize(candidate: Candidate, txt_id: &str) -> Result<EnrichedRecord, RejectedRow> {
    let Candidate {
        record,
        tarifa,
        tasa,
        minimo,
        maximo,
    } = candidate;
    let reject = |reason| RejectedRow {
        row_number: record.row_number,
        id: record.id.clone(),
        reason,
    };
    let Some(id) = record.id.clone() else {
        return Err(reject(RejectReason::MissingId));
    };
    let Some(destino) = record.destino.clone() else {
        return Err(reject(RejectReason::MissingDestino));
    };
    let Some(consumo) = record.consumo else {
        return Err(reject(RejectReason::MissingConsumo));
    };
    let (Some(tarifa), Some(tasa)) = (tarifa, tasa.filter(|t| !t.is_nan())) else {
        return Err(reject(RejectReason::UndefinedTasa));
    };
    Ok(EnrichedRecord {
        id,
        txt_id: txt_id.to_string(),
        year: record.year,
        destino,
        estrato: record.estrato,
        consumo,
        tarifa,
        tasa,
        minimo,
        maximo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> EnrichmentContext {
        EnrichmentContext::new(ReferenceData {
            tariffs: TariffTable::from_entries([("RES", 0.1), ("COM", 0.2)]),
            minimos: YearBoundTable::from_entries([(2022, 5.0), (0, 1.0)]),
            maximos: YearBoundTable::from_entries([(2022, 50.0)]),
        })
    }

    fn batch(rows: &[&[&str]]) -> RawBatch {
        RawBatch::new(
            REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
            1,
        )
    }

    #[test]
    fn clamp_applies_minimum_before_maximum() {
        assert_eq!(clamp_tasa(2.0, Some(5.0), Some(50.0)), 5.0);
        assert_eq!(clamp_tasa(80.0, Some(5.0), Some(50.0)), 50.0);
        assert_eq!(clamp_tasa(20.0, None, None), 20.0);
        // Inverted bounds: the maximum is applied last.
        assert_eq!(clamp_tasa(1.0, Some(10.0), Some(3.0)), 3.0);
    }

    #[test]
    fn clamp_leaves_nan_untouched() {
        assert!(clamp_tasa(f64::NAN, Some(1.0), Some(2.0)).is_nan());
    }

    #[test]
    fn year_zero_is_a_real_bound_key() {
        let mut ctx = context();
        let out = ctx
            .enrich_batch(&batch(&[&["a", "sin año", "RES", "1", "2"]]), "dataset-x")
            .unwrap();
        assert_eq!(out.records[0].year, 0);
        assert_eq!(out.records[0].minimo, Some(1.0));
        assert_eq!(out.records[0].tasa, 1.0);
    }

    #[test]
    fn rows_are_rejected_with_reasons() {
        let mut ctx = context();
        let out = ctx
            .enrich_batch(
                &batch(&[
                    &["", "2022", "RES", "1", "10"],
                    &["b", "2022", "", "1", "10"],
                    &["c", "2022", "RES", "1", ""],
                    &["d", "2022", "RES", "1", "NaN"],
                ]),
                "dataset-x",
            )
            .unwrap();
        assert!(out.records.is_empty());
        let reasons = out.rejected.iter().map(|r| r.reason).collect_vec();
        assert_eq!(
            reasons,
            vec![
                RejectReason::MissingId,
                RejectReason::MissingDestino,
                RejectReason::MissingConsumo,
                RejectReason::UndefinedTasa,
            ]
        );
        assert_eq!(out.rejected[1].row_number, 2);
    }

    #[test]
    fn later_duplicate_replaces_earlier_even_when_rejected() {
        let mut ctx = context();
        let out = ctx
            .enrich_batch(
                &batch(&[&["x", "2022", "RES", "1", "100"], &["x", "2022", "RES", "1", ""]]),
                "dataset-x",
            )
            .unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.duplicates, 1);
        assert_eq!(out.rejected.len(), 1);
    }

    #[test]
    fn txt_id_is_attached_to_every_row() {
        let mut ctx = context();
        let out = ctx
            .enrich_batch(
                &batch(&[&["a", "2022", "RES", "1", "100"], &["b", "2022", "COM", "2", "100"]]),
                "dataset-2024",
            )
            .unwrap();
        assert!(out.records.iter().all(|r| r.txt_id == "dataset-2024"));
    }
}
