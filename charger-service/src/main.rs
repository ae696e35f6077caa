fn main() {
    if let Err(err) = charger_hub::app::run_service() {
        eprintln!("service startup failed: {err}");
        std::process::exit(1);
    }
}
