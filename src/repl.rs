//! The read-eval-print loop: a plain, line-buffered prompt over stdin/stdout.
//!
//! Deliberately not a terminal UI — the engine's test harness drives this
//! loop over a piped stdin, so raw mode and cursor control have no place
//! here. `db > ` goes out, a line comes back, one of three things happens.
use std::io::{self, BufRead, Write};

use tracing::{error, info};

use crate::errors::Error;
use crate::statement::{parse_meta_command, prepare_statement, MetaCommand, PrepareResult, Statement};
use crate::storage::table::{self, ExecuteResult, Table};

const PROMPT: &str = "db > ";

pub fn run(path: &str) -> Result<(), Error> {
    info!(path, "opening database");
    let mut table = Table::open(path)?;

    let stdin = io::stdin();
    let mut out = io::stdout();

    loop {
        print!("{PROMPT}");
        out.flush()?;

        let mut line = String::new();
        let bytes_read = stdin.lock().read_line(&mut line)?;
        if bytes_read == 0 {
            break;
        }
        let input = line.trim_end_matches(['\n', '\r']);
        if input.is_empty() {
            continue;
        }

        if input.starts_with('.') {
            match parse_meta_command(input) {
                Some(MetaCommand::Exit) => {
                    table.close()?;
                    info!("closed database on .exit");
                    return Ok(());
                }
                Some(MetaCommand::PrintTree) => {
                    println!("Tree:");
                    print!("{}", table.print_tree()?);
                }
                Some(MetaCommand::PrintConstants) => {
                    println!("Constants:");
                    print!("{}", table::print_constants());
                }
                None => {
                    println!("Unrecognized command '{input}'");
                }
            }
            continue;
        }

        match prepare_statement(input) {
            PrepareResult::Success(Statement::Insert(row)) => match table.execute_insert(row) {
                Ok(ExecuteResult::Success) => {}
                Ok(ExecuteResult::DuplicateKey) => println!("Error: Duplicate key."),
                Err(e) => return fatal(table, e),
            },
            PrepareResult::Success(Statement::Select) => match table.execute_select() {
                Ok(rows) if rows.is_empty() => println!("DB is empty."),
                Ok(rows) => {
                    for row in rows {
                        println!("{row}");
                    }
                }
                Err(e) => return fatal(table, e),
            },
            PrepareResult::NegativeId => println!("ID must be positive."),
            PrepareResult::StringTooLong => println!("String is too long."),
            PrepareResult::SyntaxError => println!("Syntax error."),
            PrepareResult::UnrecognizedKeyword => {
                println!("Unrecognized keyword at start of '{input}'.")
            }
        }
    }

    table.close()
}

/// Corruption/I-O failures are fatal per the engine's error taxonomy: log
/// the diagnostic and unwind, rather than trying to keep the prompt alive
/// over a pager that might be in an inconsistent state.
fn fatal(mut table: Table, e: Error) -> Result<(), Error> {
    error!(error = %e, "fatal storage error, closing");
    let _ = table.close();
    Err(e)
}
