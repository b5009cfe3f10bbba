mod errors;
mod repl;
mod statement;
mod storage;

use std::fs::OpenOptions;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "pagedb", version = VERSION, about = "Tiny paged B+ tree database.")]
struct Cli {
    /// Path to the database file. Created if it doesn't exist.
    database: Option<String>,
}

fn main() -> ExitCode {
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open("pagedb.log")
        .expect("Failed to open log file");

    tracing_subscriber::fmt()
        .with_writer(file)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let Some(database) = cli.database else {
        println!("Must supply a database filename.");
        return ExitCode::FAILURE;
    };

    match repl::run(&database) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
