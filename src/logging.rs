//! Log setup: every line goes to stderr and, when it can be opened, to the
//! configured log file.

use std::{
    env,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::OnceLock,
};

use chrono::Local;
use env_logger::Target;
use log::{LevelFilter, warn};

static LOGGER: OnceLock<()> = OnceLock::new();

struct TeeWriter {
    file: File,
    console: io::Stderr,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.console.write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush()?;
        self.file.flush()
    }
}

pub fn init_logging(level: LevelFilter, log_file: Option<&Path>) {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("consumos_etl", level);
        }
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} | {} | {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        });

        let mut file_error = None;
        if let Some(path) = log_file {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    builder.target(Target::Pipe(Box::new(TeeWriter {
                        file,
                        console: io::stderr(),
                    })));
                }
                Err(err) => file_error = Some((path.to_path_buf(), err)),
            }
        }
        let _ = builder.try_init();

        if let Some((path, err)) = file_error {
            warn!("Cannot open log file {path:?}; logging to console only: {err}");
        }
    });
}
