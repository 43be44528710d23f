//! Loan proposal chaincode.
//!
//! * [`ledger`] — the ledger context capability a host hands to the contract,
//!   plus [`ledger::MemoryLedger`], an in-process host with history and
//!   JSON snapshots.
//! * [`contracts`] — proposal records and the operations on them, including
//!   the two-flag approval gate.
//! * [`dispatch`] — named entry points so a host can route string-typed
//!   invocations to the contract, one transaction at a time.

pub mod contracts;
pub mod dispatch;
pub mod ledger;

pub use contracts::{ContractError, Proposal, ProposalContract, QueryResult};
pub use dispatch::{Dispatcher, Invocation, Response};
pub use ledger::{LedgerContext, LedgerError, MemoryLedger};
