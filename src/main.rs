use webbench::Webbench;

fn main() {
    if let Err(e) = Webbench::initialize().execute() {
        eprintln!("\n{}", e);
        std::process::exit(e.exit_code());
    }
}
