use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

struct Sandbox {
    _root: TempDir,
    ledger: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let root = TempDir::new().expect("temp dir");
        let ledger = root.path().join("state").join("ledger.json");
        Self {
            _root: root,
            ledger,
        }
    }

    fn loanctl(&self) -> Command {
        let mut cmd = Command::cargo_bin("loanctl").expect("loanctl binary");
        cmd.env_remove("LOAN_LEDGER").arg("--ledger").arg(&self.ledger);
        cmd
    }

    fn chaincode(&self) -> Command {
        let mut cmd = Command::cargo_bin("loan-chaincode").expect("loan-chaincode binary");
        cmd.env("LOAN_LEDGER", &self.ledger);
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.loanctl().args(args).output().expect("run loanctl");
        assert!(output.status.success(), "loanctl {args:?} failed: {output:?}");
        serde_json::from_slice(&output.stdout).expect("json output")
    }

    fn ledger(&self) -> &Path {
        &self.ledger
    }
}

#[test]
fn create_verify_approve_round() {
    let sandbox = Sandbox::new();
    sandbox
        .loanctl()
        .args(["create", "P9", "Alice", "5000"])
        .assert()
        .success()
        .stderr(predicate::str::contains("created P9 (tx "));
    assert!(sandbox.ledger().exists());

    sandbox.loanctl().args(["get", "P9"]).assert().success().stdout(
        "{\"applicantName\":\"Alice\",\"loanAmount\":5000,\"isApproved\":false,\
         \"isCIBILVerified\":false,\"isTrackRecordVerified\":false}\n",
    );

    sandbox
        .loanctl()
        .args(["verify", "P9", "--cibil", "true", "--track", "true"])
        .assert()
        .success();
    let record = sandbox.json(&["get", "P9"]);
    assert_eq!(record["isCIBILVerified"], true);
    assert_eq!(record["isTrackRecordVerified"], true);

    sandbox.loanctl().args(["approve", "P9"]).assert().success();
    assert_eq!(sandbox.json(&["get", "P9"])["isApproved"], true);

    let history = sandbox.json(&["history", "P9"]);
    let approvals: Vec<bool> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["isApproved"].as_bool().unwrap())
        .collect();
    assert_eq!(approvals, vec![false, false, true]);
}

#[test]
fn unverified_approval_is_refused() {
    let sandbox = Sandbox::new();
    sandbox
        .loanctl()
        .args(["create", "P10", "Bob", "100"])
        .assert()
        .success();
    sandbox
        .loanctl()
        .args(["approve", "P10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "ApproveProposal: CIBIL or track record of P10 is not verified",
        ));
    assert_eq!(sandbox.json(&["get", "P10"])["isApproved"], false);
}

#[test]
fn reads_of_missing_records_fail_without_writing() {
    let sandbox = Sandbox::new();
    sandbox
        .loanctl()
        .args(["get", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost does not exist"));
    sandbox.loanctl().arg("list").assert().success().stdout("[]\n");
    assert!(predicate::path::missing().eval(sandbox.ledger()));
}

#[test]
fn init_then_list_shows_seed_records() {
    let sandbox = Sandbox::new();
    sandbox.loanctl().arg("init").assert().success();
    sandbox
        .loanctl()
        .args(["create", "P1", "Asha", "250"])
        .assert()
        .success();

    let rows = sandbox.json(&["ls"]);
    let keys: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["Key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["P1", "Proposal0", "Proposal1", "Proposal2"]);
    assert_eq!(rows[3]["Record"]["applicantName"], "Krishna");
    assert_eq!(rows[3]["Record"]["isApproved"], true);
}

#[test]
fn invoke_routes_string_arguments() {
    let sandbox = Sandbox::new();
    sandbox
        .loanctl()
        .args(["invoke", "CreateProposal", "P1", "Ann", "300"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":200"));

    let response = sandbox.json(&["invoke", "QueryProposal", "P1"]);
    assert_eq!(response["payload"]["loanAmount"], 300);

    sandbox
        .loanctl()
        .args(["invoke", "CreateProposal", "P2", "Ann", "-1"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"status\":500"))
        .stderr(predicate::str::contains("expected an unsigned integer"));

    sandbox
        .loanctl()
        .args(["invoke", "DeleteProposal", "P1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("function DeleteProposal not found"));
}

#[test]
fn functions_lists_entry_points() {
    let sandbox = Sandbox::new();
    sandbox
        .loanctl()
        .arg("functions")
        .assert()
        .success()
        .stdout(predicate::str::contains("SetCIBILTrack"))
        .stdout(predicate::str::contains("GetHistoryOfProposal"));
}

#[test]
fn chaincode_serves_one_response_per_line() {
    let sandbox = Sandbox::new();
    let input = [
        r#"{"function":"CreateProposal","args":["P9","Alice","5000"]}"#,
        "",
        r#"{"function":"ApproveProposal","args":["P9"]}"#,
        r#"{"function":"SetCIBILTrack","args":["P9","true","true"]}"#,
        r#"{"function":"ApproveProposal","args":["P9"]}"#,
        "this is not json",
        r#"{"function":"QueryProposal","args":["P9"]}"#,
    ]
    .join("\n");

    let output = sandbox
        .chaincode()
        .write_stdin(input)
        .output()
        .expect("run loan-chaincode");
    assert!(output.status.success(), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stderr).contains("served 6 invocations (2 failed)"));

    let responses: Vec<Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let statuses: Vec<u64> = responses
        .iter()
        .map(|r| r["status"].as_u64().unwrap())
        .collect();
    assert_eq!(statuses, vec![200, 500, 200, 200, 500, 200]);
    assert!(responses[4]["message"]
        .as_str()
        .unwrap()
        .starts_with("malformed invocation"));
    assert_eq!(responses[5]["payload"]["isApproved"], true);

    let transactions: Vec<&str> = responses
        .iter()
        .map(|r| r["tx_id"].as_str().unwrap())
        .collect();
    assert!(transactions.iter().all(|tx| tx.len() == 64));
    assert_ne!(transactions[0], transactions[2]);

    // the snapshot written by the host is readable by loanctl
    assert_eq!(sandbox.json(&["get", "P9"])["isApproved"], true);
}
