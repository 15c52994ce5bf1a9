//! SQLite persistence for enriched consumption records.
//!
//! `consumos` holds one row per record id; `stats` is a single row with a
//! running count and tasa sum that every committed batch increments. Each
//! batch is staged into a temporary table with multi-row inserts and moved
//! into `consumos` by one set-based upsert, all inside one transaction
//! together with the stats delta.

use std::{fmt, fs, path::Path, time::Duration};

use itertools::Itertools;
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, ToSql, params};

use crate::{enrich::EnrichedBatch, error::EtlError, table};

/// Rows per staging statement; 7 parameters each stays below SQLite's
/// historical limit of 999 bound parameters.
pub const STAGING_CHUNK_ROWS: usize = 128;

const CREATE_STATS: &str = r#"
    DROP TABLE IF EXISTS stats;
    CREATE TABLE stats (
        id INTEGER PRIMARY KEY DEFAULT 1,
        total_rows INTEGER NOT NULL DEFAULT 0,
        suma_tasa NUMERIC NOT NULL DEFAULT 0,
        CHECK (id = 1)
    );
    INSERT INTO stats (id, total_rows, suma_tasa) VALUES (1, 0, 0);
"#;

const CREATE_CONSUMOS: &str = r#"
    CREATE TABLE IF NOT EXISTS consumos (
        id TEXT PRIMARY KEY,
        txt_id TEXT,
        "año" INTEGER,
        destino TEXT,
        estrato REAL,
        consumo REAL,
        tasa REAL
    );
    CREATE INDEX IF NOT EXISTS idx_consumos_destino ON consumos(destino);
    CREATE INDEX IF NOT EXISTS idx_consumos_anio ON consumos("año");
"#;

const RESET_TABLES: &str = r#"
    DELETE FROM consumos;
    UPDATE stats SET total_rows = 0, suma_tasa = 0;
"#;

const CREATE_STAGING: &str = r#"
    CREATE TEMP TABLE staging_consumos (
        id TEXT,
        txt_id TEXT,
        "año" INTEGER,
        destino TEXT,
        estrato REAL,
        consumo REAL,
        tasa REAL
    );
"#;

const UPSERT_FROM_STAGING: &str = r#"
    INSERT INTO consumos (id, txt_id, "año", destino, estrato, consumo, tasa)
    SELECT id, txt_id, "año", destino, estrato, consumo, tasa
    FROM temp.staging_consumos
    WHERE true
    ON CONFLICT(id) DO UPDATE SET
        txt_id = excluded.txt_id,
        "año" = excluded."año",
        destino = excluded.destino,
        estrato = excluded.estrato,
        consumo = excluded.consumo,
        tasa = excluded.tasa
"#;

const UPDATE_STATS: &str = r#"
    UPDATE stats
    SET total_rows = total_rows + ?1,
        suma_tasa = suma_tasa + ?2
    WHERE id = 1
"#;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub total_rows: i64,
    pub suma_tasa: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadOutcome {
    pub rows: usize,
    pub tasa_sum: f64,
    pub stats_updated: bool,
}

/// A row as stored in `consumos`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredConsumo {
    pub id: String,
    pub txt_id: String,
    pub year: i64,
    pub destino: String,
    pub estrato: f64,
    pub consumo: f64,
    pub tasa: f64,
}

/// Aggregates over `consumos.tasa`; the optional fields are absent when the
/// table is empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: i64,
    pub average: Option<f64>,
    pub sum: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Summary {
    pub fn rows(&self) -> Vec<Vec<String>> {
        let amount = |value: Option<f64>| {
            value
                .map(table::format_amount)
                .unwrap_or_else(|| "n/a".to_string())
        };
        vec![
            vec!["Total rows".to_string(), self.count.to_string()],
            vec!["Average tasa".to_string(), amount(self.average)],
            vec!["Total tasa".to_string(), amount(self.sum)],
            vec!["Minimum tasa".to_string(), amount(self.min)],
            vec!["Maximum tasa".to_string(), amount(self.max)],
        ]
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Final Summary ---")?;
        let headers = vec!["metric".to_string(), "value".to_string()];
        write!(f, "{}", table::render_table(&headers, &self.rows()))
    }
}

pub struct ConsumoStore {
    conn: Connection,
}

impl ConsumoStore {
    pub fn open(path: &Path) -> Result<Self, EtlError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!("Opened store at {path:?} (journal mode {journal_mode})");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, EtlError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Recreates `stats` and either creates `consumos` or empties it.
    pub fn bootstrap(&mut self) -> Result<(), EtlError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(CREATE_STATS)?;
        info!("Table 'stats' created");
        if table_exists(&tx, "consumos")? {
            tx.execute_batch(RESET_TABLES)?;
            info!("Table 'consumos' emptied");
        } else {
            tx.execute_batch(CREATE_CONSUMOS)?;
            info!("Table 'consumos' created");
        }
        tx.commit()?;
        Ok(())
    }

    /// Upserts every record of `batch` and adds the batch to `stats`, all or
    /// nothing. A missing stats row is tolerated and only logged.
    pub fn load_batch(&mut self, batch: &EnrichedBatch) -> Result<LoadOutcome, EtlError> {
        if batch.is_empty() {
            return Ok(LoadOutcome {
                rows: 0,
                tasa_sum: 0.0,
                stats_updated: false,
            });
        }
        let rows = batch.len();
        let tasa_sum = batch.tasa_sum();

        let tx = self.conn.transaction()?;
        tx.execute_batch(CREATE_STAGING)?;
        for chunk in batch.records.chunks(STAGING_CHUNK_ROWS) {
            let mut stmt = tx.prepare_cached(&staging_insert_sql(chunk.len()))?;
            let values = chunk
                .iter()
                .flat_map(|r| {
                    [
                        &r.id as &dyn ToSql,
                        &r.txt_id,
                        &r.year,
                        &r.destino,
                        &r.estrato,
                        &r.consumo,
                        &r.tasa,
                    ]
                })
                .collect_vec();
            stmt.execute(values.as_slice())?;
        }
        tx.execute(UPSERT_FROM_STAGING, [])?;
        tx.execute_batch("DROP TABLE temp.staging_consumos;")?;

        let stats_updated = table_exists(&tx, "stats")?
            && tx.execute(UPDATE_STATS, params![rows as i64, tasa_sum])? > 0;
        if !stats_updated {
            warn!("Stats row not found; running totals were not updated");
        }
        tx.commit()?;

        Ok(LoadOutcome {
            rows,
            tasa_sum,
            stats_updated,
        })
    }

    pub fn stats(&self) -> Result<Option<Stats>, EtlError> {
        if !table_exists(&self.conn, "stats")? {
            return Ok(None);
        }
        let stats = self
            .conn
            .query_row(
                "SELECT total_rows, suma_tasa FROM stats WHERE id = 1",
                [],
                |row| {
                    Ok(Stats {
                        total_rows: row.get(0)?,
                        suma_tasa: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    pub fn summary(&self) -> Result<Summary, EtlError> {
        let summary = self.conn.query_row(
            "SELECT COUNT(*), AVG(tasa), SUM(tasa), MIN(tasa), MAX(tasa) FROM consumos",
            [],
            |row| {
                Ok(Summary {
                    count: row.get(0)?,
                    average: row.get(1)?,
                    sum: row.get(2)?,
                    min: row.get(3)?,
                    max: row.get(4)?,
                })
            },
        )?;
        Ok(summary)
    }

    pub fn get(&self, id: &str) -> Result<Option<StoredConsumo>, EtlError> {
        let stored = self
            .conn
            .query_row(
                r#"SELECT id, txt_id, "año", destino, estrato, consumo, tasa
                   FROM consumos WHERE id = ?1"#,
                params![id],
                |row| {
                    Ok(StoredConsumo {
                        id: row.get(0)?,
                        txt_id: row.get(1)?,
                        year: row.get(2)?,
                        destino: row.get(3)?,
                        estrato: row.get(4)?,
                        consumo: row.get(5)?,
                        tasa: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(stored)
    }

    /// Empties `consumos` and zeroes the stats row.
    pub fn truncate(&mut self) -> Result<(), EtlError> {
        let tx = self.conn.transaction()?;
        if !table_exists(&tx, "consumos")? {
            return Err(EtlError::Configuration(
                "Table 'consumos' does not exist; run the pipeline first".to_string(),
            ));
        }
        tx.execute("DELETE FROM consumos", [])?;
        if table_exists(&tx, "stats")? {
            tx.execute("UPDATE stats SET total_rows = 0, suma_tasa = 0", [])?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, EtlError> {
    let exists = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn staging_insert_sql(rows: usize) -> String {
    let placeholders = (0..rows).map(|_| "(?, ?, ?, ?, ?, ?, ?)").join(", ");
    format!(
        r#"INSERT INTO temp.staging_consumos (id, txt_id, "año", destino, estrato, consumo, tasa) VALUES {placeholders}"#
    )
}
