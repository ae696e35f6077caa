fn main() {
    if let Err(err) = charger_hub::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
