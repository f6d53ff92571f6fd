fn main() {
    if let Err(e) = shadowgate::app::run_cli() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
