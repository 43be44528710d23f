//! Named entry points of the proposal contract.
//!
//! A host delivers each transaction as an [`Invocation`]: a function name and
//! its arguments as strings. The [`Dispatcher`] looks the name up in its
//! registry, parses the arguments, runs the contract against the
//! transaction's ledger context and reports a peer-style [`Response`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    contracts::{Amount, ContractError, Operation, ProposalContract},
    ledger::LedgerContext,
};

pub const STATUS_OK: u16 = 200;
pub const STATUS_ERROR: u16 = 500;

/// Lists the registered functions and their parameters.
pub const METADATA_FUNCTION: &str = "GetMetadata";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invocation {
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(
        function: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            function: function.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub status: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub tx_id: String,
}

impl Response {
    pub fn success(tx_id: impl Into<String>, payload: Value) -> Self {
        Self {
            status: STATUS_OK,
            message: String::new(),
            payload: (!payload.is_null()).then_some(payload),
            tx_id: tx_id.into(),
        }
    }

    pub fn error(tx_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR,
            message: message.into(),
            payload: None,
            tx_id: tx_id.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("function {0} not found")]
    UnknownFunction(String),
    #[error("{function}: expected {expected} arguments, got {actual}")]
    ArgumentCount {
        function: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid value {value:?} for {param}: expected {expected}")]
    InvalidArgument {
        param: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Handler =
    fn(&ProposalContract, &mut dyn LedgerContext, &[String]) -> Result<Value, DispatchError>;

#[derive(Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub params: &'static [&'static str],
    handler: Handler,
}

/// Stateless registry of contract entry points.
pub struct Dispatcher {
    contract: ProposalContract,
    functions: BTreeMap<&'static str, FunctionSpec>,
}

impl Dispatcher {
    /// A dispatcher with every proposal operation registered under its
    /// contract function name.
    pub fn new(contract: ProposalContract) -> Self {
        let mut dispatcher = Self::empty(contract);
        dispatcher.register(Operation::Seed.function_name(), &[], |contract, ctx, _| {
            contract.init_ledger(ctx)?;
            Ok(Value::Null)
        });
        dispatcher.register(
            Operation::Create.function_name(),
            &["proposalNumber", "applicantName", "loanAmount"],
            |contract, ctx, args| {
                let amount = parse_amount("loanAmount", &args[2])?;
                contract.create_proposal(ctx, &args[0], &args[1], amount)?;
                Ok(Value::Null)
            },
        );
        dispatcher.register(
            Operation::Get.function_name(),
            &["proposalNumber"],
            |contract, ctx, args| {
                let proposal = contract.query_proposal(&*ctx, &args[0])?;
                Ok(serde_json::to_value(proposal)?)
            },
        );
        dispatcher.register(Operation::ListAll.function_name(), &[], |contract, ctx, _| {
            let rows = contract.query_all_proposals(&*ctx)?;
            Ok(serde_json::to_value(rows)?)
        });
        dispatcher.register(
            Operation::SetVerification.function_name(),
            &["proposalNumber", "cibil", "track"],
            |contract, ctx, args| {
                let cibil = parse_flag("cibil", &args[1])?;
                let track = parse_flag("track", &args[2])?;
                contract.set_cibil_track(ctx, &args[0], cibil, track)?;
                Ok(Value::Null)
            },
        );
        dispatcher.register(
            Operation::Approve.function_name(),
            &["proposalNumber"],
            |contract, ctx, args| {
                contract.approve_proposal(ctx, &args[0])?;
                Ok(Value::Null)
            },
        );
        dispatcher.register(
            Operation::History.function_name(),
            &["proposalId"],
            |contract, ctx, args| {
                let history = contract.get_history(&*ctx, &args[0])?;
                Ok(serde_json::to_value(history)?)
            },
        );
        dispatcher
    }

    /// A dispatcher with nothing registered.
    pub fn empty(contract: ProposalContract) -> Self {
        Self {
            contract,
            functions: BTreeMap::new(),
        }
    }

    /// Register `handler` under `name`, replacing any earlier registration.
    /// The handler only runs with exactly `params.len()` arguments.
    pub fn register(
        &mut self,
        name: &'static str,
        params: &'static [&'static str],
        handler: Handler,
    ) {
        self.functions.insert(
            name,
            FunctionSpec {
                name,
                params,
                handler,
            },
        );
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionSpec> {
        self.functions.values()
    }

    pub fn metadata(&self) -> Value {
        let functions: Vec<Value> = self
            .functions()
            .map(|spec| json!({ "name": spec.name, "params": spec.params }))
            .collect();
        json!({
            "contract": "ProposalContract",
            "functions": functions,
        })
    }

    pub fn invoke(
        &self,
        ctx: &mut dyn LedgerContext,
        invocation: &Invocation,
    ) -> Result<Value, DispatchError> {
        if invocation.function == METADATA_FUNCTION {
            return Ok(self.metadata());
        }
        let spec = self
            .functions
            .get(invocation.function.as_str())
            .ok_or_else(|| DispatchError::UnknownFunction(invocation.function.clone()))?;
        if invocation.args.len() != spec.params.len() {
            return Err(DispatchError::ArgumentCount {
                function: invocation.function.clone(),
                expected: spec.params.len(),
                actual: invocation.args.len(),
            });
        }
        (spec.handler)(&self.contract, ctx, &invocation.args)
    }

    /// Run one invocation and fold the outcome into a response carrying the
    /// transaction id.
    pub fn handle(&self, ctx: &mut dyn LedgerContext, invocation: &Invocation) -> Response {
        let tx_id = ctx.tx_id().to_string();
        match self.invoke(ctx, invocation) {
            Ok(payload) => Response::success(tx_id, payload),
            Err(err) => Response::error(tx_id, err.to_string()),
        }
    }
}

fn parse_amount(param: &'static str, raw: &str) -> Result<Amount, DispatchError> {
    raw.trim()
        .parse()
        .map_err(|_| DispatchError::InvalidArgument {
            param,
            value: raw.to_string(),
            expected: "an unsigned integer",
        })
}

fn parse_flag(param: &'static str, raw: &str) -> Result<bool, DispatchError> {
    raw.trim()
        .parse()
        .map_err(|_| DispatchError::InvalidArgument {
            param,
            value: raw.to_string(),
            expected: "true or false",
        })
}
