#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use consumos_etl::config::{DatabaseConfig, PipelineConfig};
use tempfile::{tempdir, TempDir};

pub const TARIFFS_CSV: &str = "Destino,Tarifa sobre consumo\nRES,10%\nCOM,\"20,5%\"\nIND,30%\n";
pub const MINIMOS_CSV: &str = "Año,Mínimo\n2022,5\n2023,\"1.000,5\"\n";
pub const MAXIMOS_CSV: &str = "Año,Máximo\n2022,500\n2023,2.000\n";

/// Mean of the fixture tariffs, used as the default for unknown destinations.
pub const MEAN_TARIFF: f64 = (0.10 + 0.205 + 0.30) / 3.0;

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Folder that holds reference and dataset files.
    pub fn data_folder(&self) -> PathBuf {
        let dir = self.path().join("datasets");
        std::fs::create_dir_all(&dir).expect("create data folder");
        dir
    }

    /// Writes `contents` into a file under the data folder and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.data_folder().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes the three standard reference tables.
    pub fn write_reference_files(&self) {
        self.write("tarifa_por_destino.csv", TARIFFS_CSV);
        self.write("minimos.csv", MINIMOS_CSV);
        self.write("maximos.csv", MAXIMOS_CSV);
    }

    pub fn config(&self, batch_size: usize) -> PipelineConfig {
        PipelineConfig {
            data_folder: self.data_folder(),
            batch_size,
            encoding: encoding_rs::UTF_8,
            database: DatabaseConfig {
                dir: self.path().join("db"),
                name: "consumos_test".to_string(),
            },
        }
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
