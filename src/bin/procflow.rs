/// procflow CLI
///
/// Loads a procedure program, runs it against the configured database and
/// model host, and prints the final prompt value.

use procflow_core::cli;

fn main() {
    if let Err(e) = cli::run_cli() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
