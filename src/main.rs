use std::process;

fn main() {
    if let Err(e) = cursus::run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
