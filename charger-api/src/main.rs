fn main() {
    if let Err(err) = charger_hub::app::run_api() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
