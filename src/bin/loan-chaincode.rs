use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process,
};

use clap::Parser;

use loan_ledger::{
    dispatch::{Dispatcher, Invocation, Response},
    ledger::{LedgerContext, LedgerError, MemoryLedger},
    ProposalContract,
};

/// Serve proposal contract invocations: one JSON invocation per stdin line,
/// one JSON response per stdout line, each in its own transaction.
#[derive(Parser)]
#[command(name = "loan-chaincode")]
#[command(version, about, long_about = None)]
struct Args {
    /// Ledger snapshot file, saved when input ends
    #[arg(long, env = "LOAN_LEDGER", default_value = "ledger.json")]
    ledger: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum ServeError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("stdio: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Default)]
struct Tally {
    served: usize,
    failed: usize,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), ServeError> {
    let mut ledger = MemoryLedger::load(&args.ledger)?;
    let revision = ledger.revision();
    let dispatcher = Dispatcher::new(ProposalContract::new());

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut tally = Tally::default();
    let outcome = serve(
        &dispatcher,
        &mut ledger,
        stdin.lock(),
        stdout.lock(),
        &mut tally,
    );

    if ledger.revision() != revision {
        ledger.save(&args.ledger)?;
    }
    eprintln!(
        "served {} invocations ({} failed) → {}",
        tally.served,
        tally.failed,
        args.ledger.display()
    );
    outcome
}

fn serve(
    dispatcher: &Dispatcher,
    ledger: &mut MemoryLedger,
    input: impl BufRead,
    mut output: impl Write,
    tally: &mut Tally,
) -> Result<(), ServeError> {
    for raw in input.lines() {
        let raw = raw?;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let mut tx = ledger.begin();
        let response = match serde_json::from_str::<Invocation>(line) {
            Ok(invocation) => dispatcher.handle(&mut tx, &invocation),
            Err(err) => Response::error(tx.tx_id(), format!("malformed invocation: {err}")),
        };
        tally.served += 1;
        if !response.is_ok() {
            tally.failed += 1;
        }
        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
    }
    output.flush()?;
    Ok(())
}
