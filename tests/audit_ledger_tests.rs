//! Audit ledger persistence tests - monthly files, resume and offline verification

use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use serde_json::json;

use payments_reliability::audit::{
    Actor, AuditFilter, AuditLedger, AuditRecord, IntegrityErrorKind, Resource, actions, load_entries,
    verify_directory,
};
use payments_reliability::config::AuditConfig;

fn persistent(dir: &Path) -> AuditConfig {
    AuditConfig {
        storage_dir: Some(dir.to_path_buf()),
        ..AuditConfig::default()
    }
}

fn record(provider: &str) -> AuditRecord {
    AuditRecord::new(
        actions::CONFIG_FORCED,
        Actor::user("ops-1"),
        Resource::new("provider", provider),
    )
    .with_details(json!({ "reason": "rotation" }))
}

fn only_file(dir: &Path) -> PathBuf {
    let files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|x| x == "jsonl"))
        .collect();
    assert_eq!(files.len(), 1, "expected a single monthly file");
    files.into_iter().next().unwrap()
}

#[test]
fn test_ledger_resumes_chain_after_restart() {
    let dir = tempfile::tempdir().unwrap();

    // First process writes three entries
    let last_hash = {
        let ledger = AuditLedger::open(&persistent(dir.path())).unwrap();
        ledger.log(record("mpesa"));
        ledger.log(record("paystack"));
        ledger.log(record("mtn_momo")).unwrap().hash
    };

    // Second process resumes and extends the chain
    let ledger = AuditLedger::open(&persistent(dir.path())).unwrap();
    assert_eq!(ledger.len(), 3);
    let next = ledger.log(record("intasend")).unwrap();
    assert_eq!(next.previous_hash, last_hash);

    let report = ledger.verify_integrity();
    assert!(report.valid, "{:?}", report.errors);
    assert_eq!(report.entries_checked, 4);

    let stats = ledger.get_stats();
    assert!(stats.persistent);
    assert_eq!(stats.write_failures, 0);
    assert_eq!(stats.last_hash, next.hash);
}

#[test]
fn test_files_verify_offline() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = AuditLedger::open(&persistent(dir.path())).unwrap();
    for provider in ["mpesa", "paystack", "airtel_money"] {
        ledger.log(record(provider));
    }

    let report = verify_directory(dir.path()).unwrap();

    assert!(report.valid);
    assert_eq!(report.entries_checked, 3);
    assert!(only_file(dir.path())
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("audit-"));
}

#[test]
fn test_edited_file_fails_offline_verification() {
    // GIVEN: a persisted chain
    let dir = tempfile::tempdir().unwrap();
    let ledger = AuditLedger::open(&persistent(dir.path())).unwrap();
    for provider in ["mpesa", "paystack", "airtel_money"] {
        ledger.log(record(provider));
    }
    drop(ledger);

    // WHEN: the second line's details are edited in place
    let path = only_file(dir.path());
    let contents = fs::read_to_string(&path).unwrap();
    let edited: Vec<String> = contents
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 1 {
                line.replace("\"rotation\"", "\"tampered\"")
            } else {
                line.to_string()
            }
        })
        .collect();
    fs::write(&path, edited.join("\n") + "\n").unwrap();

    // THEN: the edited entry fails its hash check
    let report = verify_directory(dir.path()).unwrap();
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, IntegrityErrorKind::HashMismatch);
}

#[test]
fn test_malformed_line_is_reported_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = AuditLedger::open(&persistent(dir.path())).unwrap();
    ledger.log(record("mpesa"));
    drop(ledger);

    let path = only_file(dir.path());
    let mut contents = fs::read_to_string(&path).unwrap();
    contents.push_str("{not json\n");
    fs::write(&path, contents).unwrap();

    let report = verify_directory(dir.path()).unwrap();
    assert!(!report.valid);
    assert_eq!(report.errors[0].kind, IntegrityErrorKind::Malformed);

    assert_eq!(load_entries(dir.path()).unwrap().len(), 1);
}

#[test]
fn test_export_from_reopened_ledger() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ledger = AuditLedger::open(&persistent(dir.path())).unwrap();
        ledger.log(record("mpesa"));
        ledger.log(
            AuditRecord::new(
                actions::SCALE_FORCED,
                Actor::user("ops-2"),
                Resource::new("instances", "auto_scaler"),
            )
            .with_details(json!({ "to": 4 })),
        );
    }

    let ledger = AuditLedger::open(&persistent(dir.path())).unwrap();
    let filter = AuditFilter {
        action: Some(actions::SCALE_FORCED.to_string()),
        ..AuditFilter::default()
    };

    let csv = ledger.export_to_csv(&filter).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("id,timestamp,action"));
    assert!(lines[1].contains("scaling.forced"));
    assert!(lines[1].contains("ops-2"));

    let json: serde_json::Value = serde_json::from_str(&ledger.export_to_json(&filter).unwrap()).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["details"]["to"], 4);
}

#[test]
fn test_unwritable_storage_falls_back_to_memory() {
    // A regular file where the directory should be
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "x").unwrap();

    let ledger = AuditLedger::new(&persistent(&blocker));
    assert!(ledger.log(record("mpesa")).is_some());
    assert_eq!(ledger.len(), 1);
    assert!(ledger.verify_integrity().valid);
}
