//! A simple CLI tool for verifying an exported vote ledger offline.
//! This uses the server's own chain walk, and is by definition compatible
//! with the output of `GET /auditor/chain/export`.

use std::fs::File;
use std::io::BufReader;

use chrono::{DateTime, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;

use votechain_backend::ledger::chain::{self, ChainFailure, ChainIntegrityBreach};
use votechain_backend::model::{api::chain::ChainExport, mongodb::Id};

const PROGRAM_NAME: &str = "chain-verifier";

const ABOUT_TEXT: &str = "Verify the integrity of an exported vote ledger.

EXIT CODES:
     0: Verification succeeded.
   255: Ran successfully, but verification failed.
 Other: Error.";

const EXPORT_PATH: &str = "EXPORT_PATH";

const EXPORT_PATH_HELP: &str = "The path to a JSON export of the ledger,\n\
as returned by `GET /auditor/chain/export`";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME).about(ABOUT_TEXT).arg(
        Arg::new(EXPORT_PATH)
            .help(EXPORT_PATH_HELP)
            .action(ArgAction::Set)
            .required(true),
    )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the JSON export.
    Format(String),
    /// An entry is timestamped before its predecessor, so the export is not
    /// in chain order.
    OutOfOrder { entry_id: Id },
    /// The chain does not link up.
    Verification(ChainIntegrityBreach),
}

/// What a successful verification found.
#[derive(Debug, Eq, PartialEq)]
struct Summary {
    entries: u64,
    first_entry_at: Option<DateTime<Utc>>,
    last_entry_at: Option<DateTime<Utc>>,
}

/// Run verification.
fn verify(path: &str) -> Result<Summary, Error> {
    // Load the file.
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let export: ChainExport =
        serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))?;

    // The walk assumes chain order, so check it first.
    for pair in export.entries.windows(2) {
        if pair[1].created_at < pair[0].created_at {
            return Err(Error::OutOfOrder {
                entry_id: *pair[1].id,
            });
        }
    }

    let verified_count = chain::verify_chain(&export.entries)
        .ensure_intact()
        .map_err(Error::Verification)?;

    Ok(Summary {
        entries: verified_count,
        first_entry_at: export.entries.first().map(|link| link.created_at),
        last_entry_at: export.entries.last().map(|link| link.created_at),
    })
}

/// Run verification, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let path: &String = args.get_one(EXPORT_PATH).unwrap(); // Required argument is guaranteed to be present.
    match verify(path) {
        Ok(summary) => {
            println!("Verification succeeded.");
            println!(
                "{} entr{} linked from genesis.",
                summary.entries,
                if summary.entries != 1 { "ies" } else { "y" }
            );
            if let (Some(first), Some(last)) = (summary.first_entry_at, summary.last_entry_at) {
                println!("First entry at {first}, last entry at {last}.");
            }
            0
        }
        Err(Error::IO(msg)) => {
            println!("IO error: {msg}");
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {msg}");
            1
        }
        Err(Error::OutOfOrder { entry_id }) => {
            println!("Export is not in chain order: entry {entry_id} predates its predecessor.");
            1
        }
        Err(Error::Verification(breach)) => {
            let msg = match breach.failure {
                ChainFailure::InvalidGenesis { entry_id } => {
                    format!("The first entry {entry_id} does not start from the genesis hash.")
                }
                ChainFailure::BrokenLink {
                    entry_id,
                    previous_entry_id,
                } => format!(
                    "Entry {entry_id} does not link to the preceding entry {previous_entry_id}."
                ),
            };
            println!("Verification failed: {msg}");
            println!("{} entries verified before the break.", breach.verified_count);
            255
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
