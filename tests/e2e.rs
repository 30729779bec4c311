use std::path::{Path, PathBuf};
use std::process::Command;

use custody_ledger::model::ProcessedTransaction;
use custody_ledger::{Amount, Ledger, SqliteLedger, TxStatus};
use tempfile::TempDir;

fn run(config: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_custody-ledger"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("TONCENTER_API_KEY")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Config pointing at a database inside `dir`, without a feed address.
fn write_config(dir: &TempDir) -> (PathBuf, String) {
    let url = format!("sqlite://{}", dir.path().join("custody.db").display());
    let path = dir.path().join("custody.toml");
    std::fs::write(&path, format!("[ledger]\ndatabase_url = \"{url}\"\n")).unwrap();
    (path, url)
}

async fn seed(url: &str) {
    let ledger = SqliteLedger::open(url, 1).await.unwrap();
    ledger
        .credit_if_new("tx1", 42, Amount::from_minor(150_000_000))
        .await
        .unwrap();
    ledger
        .record_transaction_once(&ProcessedTransaction {
            tx_hash: "tx2".to_string(),
            account: Some(42),
            amount: Amount::from_minor(50_000_000),
            status: TxStatus::AmountTooSmall,
        })
        .await
        .unwrap();
    ledger
        .record_transaction_once(&ProcessedTransaction {
            tx_hash: "tx3".to_string(),
            account: None,
            amount: Amount::from_units(5),
            status: TxStatus::Unattributed,
        })
        .await
        .unwrap();
    ledger.apply_delta(7, Amount::from_units(3)).await.unwrap();
    ledger.close().await;
}

#[tokio::test]
async fn exports_balances() {
    let dir = TempDir::new().unwrap();
    let (config, url) = write_config(&dir);
    seed(&url).await;

    let (stdout, stderr, success) = run(&config, &["balances"]);

    assert!(success);
    assert!(stderr.is_empty());
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, ["user_id,balance", "7,3.00", "42,0.15"]);
}

#[tokio::test]
async fn exports_transactions_by_status() {
    let dir = TempDir::new().unwrap();
    let (config, url) = write_config(&dir);
    seed(&url).await;

    let (stdout, _, success) = run(&config, &["transactions"]);
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        [
            "tx_hash,user_id,amount,status",
            "tx1,42,0.15,confirmed",
            "tx2,42,0.05,amount_too_small",
            "tx3,,5.00,unattributed"
        ]
    );

    let (stdout, _, success) = run(&config, &["transactions", "--status", "unattributed"]);
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, ["tx_hash,user_id,amount,status", "tx3,,5.00,unattributed"]);
}

#[test]
fn fresh_database_exports_nothing() {
    let dir = TempDir::new().unwrap();
    let (config, _) = write_config(&dir);

    let (stdout, stderr, success) = run(&config, &["balances"]);

    assert!(success);
    assert!(stderr.is_empty());
    assert!(stdout.is_empty());
}

#[test]
fn unknown_status_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (config, _) = write_config(&dir);

    let (_, stderr, success) = run(&config, &["transactions", "--status", "pending"]);

    assert!(!success);
    assert!(stderr.contains("unknown transaction status"));
}

#[test]
fn missing_config_fails() {
    let dir = TempDir::new().unwrap();

    let (stdout, stderr, success) = run(&dir.path().join("absent.toml"), &["balances"]);

    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("cannot read config"));
}

#[test]
fn run_refuses_incomplete_config() {
    let dir = TempDir::new().unwrap();
    let (config, _) = write_config(&dir);

    let (_, stderr, success) = run(&config, &["run"]);

    assert!(!success);
    assert!(stderr.contains("feed.address must be set"));
}
