mod common;

use common::assert_close;
use consumos_etl::enrich::{EnrichedBatch, EnrichedRecord};
use consumos_etl::store::{ConsumoStore, STAGING_CHUNK_ROWS, Stats};

fn record(id: &str, consumo: f64, tasa: f64) -> EnrichedRecord {
    EnrichedRecord {
        id: id.to_string(),
        txt_id: "dataset-1".to_string(),
        year: 2022,
        destino: "RES".to_string(),
        estrato: 2.0,
        consumo,
        tarifa: 0.1,
        tasa,
        minimo: None,
        maximo: None,
    }
}

fn batch(records: Vec<EnrichedRecord>) -> EnrichedBatch {
    EnrichedBatch {
        records,
        ..EnrichedBatch::default()
    }
}

fn fresh_store() -> ConsumoStore {
    let mut store = ConsumoStore::open_in_memory().expect("open store");
    store.bootstrap().expect("bootstrap");
    store
}

fn count(store: &ConsumoStore) -> i64 {
    store
        .connection()
        .query_row("SELECT COUNT(*) FROM consumos", [], |row| row.get(0))
        .expect("count")
}

#[test]
fn load_batch_inserts_rows_and_updates_stats() {
    let mut store = fresh_store();
    let outcome = store
        .load_batch(&batch(vec![record("a", 100.0, 10.0), record("b", 50.0, 5.5)]))
        .expect("load");

    assert_eq!(outcome.rows, 2);
    assert!(outcome.stats_updated);
    assert_eq!(count(&store), 2);
    let stats = store.stats().unwrap().unwrap();
    assert_eq!(stats.total_rows, 2);
    assert_close(stats.suma_tasa, 15.5);

    let stored = store.get("b").unwrap().unwrap();
    assert_eq!(stored.txt_id, "dataset-1");
    assert_eq!(stored.year, 2022);
    assert_eq!(stored.consumo, 50.0);
}

#[test]
fn reloading_same_batch_upserts_rows_but_counts_stats_twice() {
    let mut store = fresh_store();
    let same = batch(vec![record("a", 100.0, 10.0), record("b", 50.0, 5.0)]);

    store.load_batch(&same).expect("first load");
    store.load_batch(&same).expect("second load");

    assert_eq!(count(&store), 2);
    assert_eq!(
        store.stats().unwrap(),
        Some(Stats {
            total_rows: 4,
            suma_tasa: 30.0
        })
    );
}

#[test]
fn conflicting_id_takes_incoming_values() {
    let mut store = fresh_store();
    store
        .load_batch(&batch(vec![record("a", 100.0, 10.0)]))
        .expect("first load");
    let mut newer = record("a", 300.0, 30.0);
    newer.txt_id = "dataset-2".to_string();
    newer.destino = "IND".to_string();
    store.load_batch(&batch(vec![newer])).expect("second load");

    let stored = store.get("a").unwrap().unwrap();
    assert_eq!(stored.txt_id, "dataset-2");
    assert_eq!(stored.destino, "IND");
    assert_eq!(stored.tasa, 30.0);
    assert_eq!(count(&store), 1);
}

#[test]
fn missing_stats_table_is_tolerated() {
    let mut store = fresh_store();
    store
        .connection()
        .execute_batch("DROP TABLE stats;")
        .expect("drop stats");

    let outcome = store
        .load_batch(&batch(vec![record("a", 100.0, 10.0)]))
        .expect("load without stats");
    assert!(!outcome.stats_updated);
    assert_eq!(count(&store), 1);
    assert_eq!(store.stats().unwrap(), None);
}

#[test]
fn missing_stats_row_is_tolerated() {
    let mut store = fresh_store();
    store
        .connection()
        .execute("DELETE FROM stats", [])
        .expect("delete stats row");

    let outcome = store
        .load_batch(&batch(vec![record("a", 100.0, 10.0)]))
        .expect("load without stats row");
    assert!(!outcome.stats_updated);
    assert_eq!(store.stats().unwrap(), None);
}

#[test]
fn failed_batch_leaves_rows_and_stats_untouched() {
    let mut store = fresh_store();
    store
        .connection()
        .execute_batch(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON consumos
             WHEN NEW.id = 'boom'
             BEGIN SELECT RAISE(ABORT, 'boom rejected'); END;",
        )
        .expect("create trigger");

    let result = store.load_batch(&batch(vec![
        record("a", 100.0, 10.0),
        record("boom", 1.0, 1.0),
    ]));
    assert!(result.is_err());
    assert_eq!(count(&store), 0);
    assert_eq!(
        store.stats().unwrap(),
        Some(Stats {
            total_rows: 0,
            suma_tasa: 0.0
        })
    );

    // The staging table was rolled back with the batch, so the next load works.
    store
        .load_batch(&batch(vec![record("a", 100.0, 10.0)]))
        .expect("load after failure");
    assert_eq!(count(&store), 1);
}

#[test]
fn batches_larger_than_one_staging_chunk_are_fully_loaded() {
    let mut store = fresh_store();
    let rows = STAGING_CHUNK_ROWS * 2 + 17;
    let records = (0..rows)
        .map(|i| record(&format!("id-{i}"), i as f64, 1.0))
        .collect();
    let outcome = store.load_batch(&batch(records)).expect("load");
    assert_eq!(outcome.rows, rows);
    assert_eq!(count(&store), rows as i64);
    assert_eq!(store.stats().unwrap().unwrap().total_rows, rows as i64);
}

#[test]
fn empty_batch_is_a_no_op() {
    let mut store = fresh_store();
    let outcome = store.load_batch(&EnrichedBatch::default()).expect("load");
    assert_eq!(outcome.rows, 0);
    assert_eq!(store.stats().unwrap().unwrap().total_rows, 0);
}

#[test]
fn bootstrap_resets_existing_tables() {
    let mut store = fresh_store();
    store
        .load_batch(&batch(vec![record("a", 100.0, 10.0)]))
        .expect("load");
    store.bootstrap().expect("second bootstrap");
    assert_eq!(count(&store), 0);
    assert_eq!(store.stats().unwrap().unwrap().total_rows, 0);
}

#[test]
fn truncate_empties_consumos_and_zeroes_stats() {
    let mut store = fresh_store();
    store
        .load_batch(&batch(vec![record("a", 100.0, 10.0), record("b", 1.0, 2.0)]))
        .expect("load");
    store.truncate().expect("truncate");
    assert_eq!(count(&store), 0);
    assert_eq!(
        store.stats().unwrap(),
        Some(Stats {
            total_rows: 0,
            suma_tasa: 0.0
        })
    );
}

#[test]
fn summary_aggregates_tasa() {
    let mut store = fresh_store();
    store
        .load_batch(&batch(vec![
            record("a", 1.0, 10.0),
            record("b", 1.0, 20.0),
            record("c", 1.0, 60.0),
        ]))
        .expect("load");
    let summary = store.summary().unwrap();
    assert_eq!(summary.count, 3);
    assert_eq!(summary.average, Some(30.0));
    assert_eq!(summary.sum, Some(90.0));
    assert_eq!(summary.min, Some(10.0));
    assert_eq!(summary.max, Some(60.0));
    assert!(summary.to_string().contains("90.00"));
}
