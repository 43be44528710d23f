//! Loan proposal contract.
//!
//! Proposals live in world state as JSON objects keyed by a caller chosen
//! proposal number. Every operation takes the ledger context of the current
//! transaction and performs at most one read and one write per record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ledger::{LedgerContext, LedgerError, Scoped};

pub type ProposalKey = String;
pub type Amount = u64;

/// Key reported for failures of a whole-world-state scan.
pub const ALL_KEYS: &str = "*";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub applicant_name: String,
    pub loan_amount: Amount,
    pub is_approved: bool,
    #[serde(rename = "isCIBILVerified")]
    pub is_cibil_verified: bool,
    pub is_track_record_verified: bool,
}

impl Proposal {
    /// A fresh, unverified and unapproved proposal.
    pub fn new(applicant_name: impl Into<String>, loan_amount: Amount) -> Self {
        Self {
            applicant_name: applicant_name.into(),
            loan_amount,
            ..Self::default()
        }
    }

    /// Both the CIBIL check and the track record check have passed.
    pub fn verification_complete(&self) -> bool {
        self.is_cibil_verified && self.is_track_record_verified
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// One row of a world-state listing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryResult {
    #[serde(rename = "Key")]
    pub key: ProposalKey,
    #[serde(rename = "Record")]
    pub record: Proposal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Seed,
    Create,
    Get,
    ListAll,
    SetVerification,
    Approve,
    History,
}

impl Operation {
    /// Entry point name the operation is registered under.
    pub fn function_name(self) -> &'static str {
        match self {
            Operation::Seed => "InitLedger",
            Operation::Create => "CreateProposal",
            Operation::Get => "QueryProposal",
            Operation::ListAll => "QueryAllProposal",
            Operation::SetVerification => "SetCIBILTrack",
            Operation::Approve => "ApproveProposal",
            Operation::History => "GetHistoryOfProposal",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("{op}: failed to read {key} from world state: {source}")]
    StorageRead {
        op: Operation,
        key: ProposalKey,
        source: LedgerError,
    },
    #[error("{op}: failed to put {key} to world state: {source}")]
    StorageWrite {
        op: Operation,
        key: ProposalKey,
        source: LedgerError,
    },
    #[error("{op}: {key} does not exist")]
    NotFound { op: Operation, key: ProposalKey },
    #[error("{op}: stored value of {key} is not a valid proposal: {source}")]
    Deserialization {
        op: Operation,
        key: ProposalKey,
        source: serde_json::Error,
    },
    #[error("{op}: failed to encode proposal {key}: {source}")]
    Serialization {
        op: Operation,
        key: ProposalKey,
        source: serde_json::Error,
    },
    #[error("{op}: CIBIL or track record of {key} is not verified")]
    VerificationRequired { op: Operation, key: ProposalKey },
    #[error("{op}: failed to get history of {key}: {source}")]
    HistoryUnavailable {
        op: Operation,
        key: ProposalKey,
        source: LedgerError,
    },
}

impl ContractError {
    pub fn operation(&self) -> Operation {
        match self {
            ContractError::StorageRead { op, .. }
            | ContractError::StorageWrite { op, .. }
            | ContractError::NotFound { op, .. }
            | ContractError::Deserialization { op, .. }
            | ContractError::Serialization { op, .. }
            | ContractError::VerificationRequired { op, .. }
            | ContractError::HistoryUnavailable { op, .. } => *op,
        }
    }
}

fn seed_proposals() -> [Proposal; 3] {
    [
        Proposal::new("Akshay Kurhekar", 1_000),
        Proposal::new("Rama", 9_999),
        Proposal {
            applicant_name: "Krishna".into(),
            loan_amount: 108,
            is_approved: true,
            is_cibil_verified: true,
            is_track_record_verified: true,
        },
    ]
}

/// Stateless proposal service. All state lives behind the ledger context.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProposalContract;

impl ProposalContract {
    pub fn new() -> Self {
        Self
    }

    /// Write the sample proposals under `Proposal0`..`Proposal2`, replacing
    /// whatever is stored there. Stops at the first failed write; earlier
    /// writes of the batch stay in place.
    pub fn init_ledger(&self, ctx: &mut dyn LedgerContext) -> Result<(), ContractError> {
        for (idx, proposal) in seed_proposals().iter().enumerate() {
            put(ctx, Operation::Seed, &format!("Proposal{idx}"), proposal)?;
        }
        Ok(())
    }

    /// Store a new unverified proposal under `key`. An existing record at
    /// `key` is overwritten.
    pub fn create_proposal(
        &self,
        ctx: &mut dyn LedgerContext,
        key: &str,
        applicant_name: &str,
        loan_amount: Amount,
    ) -> Result<(), ContractError> {
        let proposal = Proposal::new(applicant_name, loan_amount);
        put(ctx, Operation::Create, key, &proposal)
    }

    pub fn query_proposal(
        &self,
        ctx: &dyn LedgerContext,
        key: &str,
    ) -> Result<Proposal, ContractError> {
        read(ctx, Operation::Get, key)
    }

    /// Every record in world state, in the host's key order.
    pub fn query_all_proposals(
        &self,
        ctx: &dyn LedgerContext,
    ) -> Result<Vec<QueryResult>, ContractError> {
        let op = Operation::ListAll;
        let read_failed = |source: LedgerError| ContractError::StorageRead {
            op,
            key: ALL_KEYS.to_string(),
            source,
        };
        let mut cursor = Scoped::new(ctx.get_state_by_range("", "").map_err(read_failed)?);
        let mut results = Vec::new();
        for entry in cursor.by_ref() {
            let entry = entry.map_err(read_failed)?;
            let record = Proposal::from_json(&entry.value).map_err(|source| {
                ContractError::Deserialization {
                    op,
                    key: entry.key.clone(),
                    source,
                }
            })?;
            results.push(QueryResult {
                key: entry.key,
                record,
            });
        }
        cursor.finish().map_err(read_failed)?;
        Ok(results)
    }

    /// Overwrite both verification flags. The approval flag is untouched.
    pub fn set_cibil_track(
        &self,
        ctx: &mut dyn LedgerContext,
        key: &str,
        cibil_verified: bool,
        track_record_verified: bool,
    ) -> Result<(), ContractError> {
        let op = Operation::SetVerification;
        let mut proposal = read(&*ctx, op, key)?;
        proposal.is_cibil_verified = cibil_verified;
        proposal.is_track_record_verified = track_record_verified;
        put(ctx, op, key, &proposal)
    }

    /// Mark the proposal approved once both verification flags are set.
    ///
    /// The approval is persisted: on success the stored record has
    /// `isApproved = true`. A rejected call leaves the record untouched.
    pub fn approve_proposal(
        &self,
        ctx: &mut dyn LedgerContext,
        key: &str,
    ) -> Result<(), ContractError> {
        let op = Operation::Approve;
        let mut proposal = read(&*ctx, op, key)?;
        if !proposal.verification_complete() {
            return Err(ContractError::VerificationRequired {
                op,
                key: key.to_string(),
            });
        }
        proposal.is_approved = true;
        put(ctx, op, key, &proposal)
    }

    /// Every version ever written to `key`, oldest first. A single malformed
    /// entry fails the whole call.
    pub fn get_history(
        &self,
        ctx: &dyn LedgerContext,
        key: &str,
    ) -> Result<Vec<Proposal>, ContractError> {
        let op = Operation::History;
        let unavailable = |source: LedgerError| ContractError::HistoryUnavailable {
            op,
            key: key.to_string(),
            source,
        };
        let mut cursor = Scoped::new(ctx.get_history_for_key(key).map_err(unavailable)?);
        let mut history = Vec::new();
        for entry in cursor.by_ref() {
            let entry = entry.map_err(unavailable)?;
            let proposal = Proposal::from_json(&entry.value).map_err(|source| {
                ContractError::Deserialization {
                    op,
                    key: key.to_string(),
                    source,
                }
            })?;
            history.push(proposal);
        }
        cursor.finish().map_err(unavailable)?;
        Ok(history)
    }
}

fn read(ctx: &dyn LedgerContext, op: Operation, key: &str) -> Result<Proposal, ContractError> {
    let bytes = ctx
        .get_state(key)
        .map_err(|source| ContractError::StorageRead {
            op,
            key: key.to_string(),
            source,
        })?
        .ok_or_else(|| ContractError::NotFound {
            op,
            key: key.to_string(),
        })?;
    Proposal::from_json(&bytes).map_err(|source| ContractError::Deserialization {
        op,
        key: key.to_string(),
        source,
    })
}

fn put(
    ctx: &mut dyn LedgerContext,
    op: Operation,
    key: &str,
    proposal: &Proposal,
) -> Result<(), ContractError> {
    let bytes = proposal
        .to_json()
        .map_err(|source| ContractError::Serialization {
            op,
            key: key.to_string(),
            source,
        })?;
    ctx.put_state(key, bytes)
        .map_err(|source| ContractError::StorageWrite {
            op,
            key: key.to_string(),
            source,
        })
}
