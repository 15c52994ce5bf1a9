fn main() {
    if let Err(err) = consumos_etl::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
