use std::{path::PathBuf, process};

use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;

use loan_ledger::{
    contracts::{Amount, ContractError, ProposalContract},
    dispatch::{Dispatcher, Invocation},
    ledger::{LedgerContext, LedgerError, MemoryLedger, Transaction},
};

#[derive(Parser)]
#[command(name = "loanctl")]
#[command(version)]
#[command(
    about = "Manage loan proposals on a local ledger snapshot",
    long_about = None
)]
struct Cli {
    /// Ledger snapshot file (created on first write)
    #[arg(long, env = "LOAN_LEDGER", default_value = "ledger.json", global = true)]
    ledger: PathBuf,
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed Proposal0..Proposal2 with sample records
    Init,
    /// Create an unverified proposal (overwrites an existing key)
    Create {
        key: String,
        applicant: String,
        amount: Amount,
    },
    /// Show one proposal
    Get { key: String },
    /// List every proposal in world state
    #[clap(visible_alias = "ls")]
    List,
    /// Set the CIBIL and track record verification flags
    Verify {
        key: String,
        #[arg(long, action = ArgAction::Set, required = true)]
        cibil: bool,
        #[arg(long, action = ArgAction::Set, required = true)]
        track: bool,
    },
    /// Approve a proposal whose checks have both passed
    Approve { key: String },
    /// Show every version of a proposal, oldest first
    History { key: String },
    /// Call a contract function by name with string arguments
    Invoke {
        function: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List the registered contract functions
    Functions,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("{0}")]
    Rejected(String),
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let mut ledger = MemoryLedger::load(&cli.ledger)?;
    let revision = ledger.revision();
    let outcome = execute(cli, &mut ledger);
    // writes are durable one by one, so a half-finished command is saved too
    if ledger.revision() != revision {
        ledger.save(&cli.ledger)?;
    }
    outcome
}

fn execute(cli: &Cli, ledger: &mut MemoryLedger) -> Result<(), CliError> {
    let contract = ProposalContract::new();
    let mut tx = ledger.begin();
    match &cli.command {
        Commands::Init => {
            contract.init_ledger(&mut tx)?;
            committed(&tx, "seeded Proposal0..Proposal2");
        }
        Commands::Create {
            key,
            applicant,
            amount,
        } => {
            contract.create_proposal(&mut tx, key, applicant, *amount)?;
            committed(&tx, &format!("created {key}"));
        }
        Commands::Get { key } => print_json(&contract.query_proposal(&tx, key)?, cli.pretty)?,
        Commands::List => print_json(&contract.query_all_proposals(&tx)?, cli.pretty)?,
        Commands::Verify { key, cibil, track } => {
            contract.set_cibil_track(&mut tx, key, *cibil, *track)?;
            committed(&tx, &format!("updated verification of {key}"));
        }
        Commands::Approve { key } => {
            contract.approve_proposal(&mut tx, key)?;
            committed(&tx, &format!("approved {key}"));
        }
        Commands::History { key } => print_json(&contract.get_history(&tx, key)?, cli.pretty)?,
        Commands::Invoke { function, args } => {
            let invocation = Invocation::new(function.as_str(), args.iter().map(String::as_str));
            let response = Dispatcher::new(contract).handle(&mut tx, &invocation);
            print_json(&response, cli.pretty)?;
            if !response.is_ok() {
                return Err(CliError::Rejected(response.message));
            }
        }
        Commands::Functions => print_json(&Dispatcher::new(contract).metadata(), cli.pretty)?,
    }
    Ok(())
}

fn committed(tx: &Transaction<'_>, what: &str) {
    eprintln!("{what} (tx {})", tx.tx_id());
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), serde_json::Error> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{rendered}");
    Ok(())
}
