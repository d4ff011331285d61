//! Hash-chained audit ledger

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entry::{AuditLogEntry, AuditRecord, AuditResult};
use super::redact::{Redactor, truncate_ip};
use super::store::{self, FileSink, StoredLine};
use crate::config::AuditConfig;
use crate::{Error, Result};

/// Query over the ledger; every set field must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFilter {
    /// Exact action name
    pub action: Option<String>,
    /// Exact actor id
    pub actor_id: Option<String>,
    /// Exact resource type
    pub resource_type: Option<String>,
    /// Exact resource id
    pub resource_id: Option<String>,
    /// Exact result
    pub result: Option<AuditResult>,
    /// Exact tenant
    pub tenant_id: Option<String>,
    /// Inclusive lower bound on timestamp
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on timestamp
    pub until: Option<DateTime<Utc>>,
    /// Matches to skip (after newest-first ordering)
    pub offset: usize,
    /// Maximum matches to return
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.action.as_ref().is_none_or(|a| *a == entry.action)
            && self.actor_id.as_ref().is_none_or(|a| *a == entry.actor.id)
            && self.resource_type.as_ref().is_none_or(|r| *r == entry.resource.resource_type)
            && self.resource_id.as_ref().is_none_or(|r| *r == entry.resource.id)
            && self.result.is_none_or(|r| r == entry.result)
            && self
                .tenant_id
                .as_ref()
                .is_none_or(|t| entry.tenant_id.as_ref() == Some(t))
            && self.since.is_none_or(|s| entry.timestamp >= s)
            && self.until.is_none_or(|u| entry.timestamp <= u)
    }
}

/// Kind of chain violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityErrorKind {
    /// Stored hash does not match the entry content
    HashMismatch,
    /// `previous_hash` does not match the preceding entry
    BrokenLink,
    /// Stored line could not be parsed
    Malformed,
}

/// One chain violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityError {
    /// Entry id, or file location for malformed lines
    pub entry_id: String,
    /// Violation kind
    pub kind: IntegrityErrorKind,
    /// Human-readable detail
    pub message: String,
}

/// Result of walking the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// True when no violations were found
    pub valid: bool,
    /// Entries examined
    pub entries_checked: usize,
    /// Violations in chain order
    pub errors: Vec<IntegrityError>,
}

/// Incremental chain verifier shared by in-memory and on-disk checks
struct ChainVerifier {
    expected_previous: Option<String>,
    checked: usize,
    errors: Vec<IntegrityError>,
}

impl ChainVerifier {
    /// `anchor` is the expected `previous_hash` of the first entry; `None`
    /// accepts whatever the first entry links to.
    fn new(anchor: Option<String>) -> Self {
        Self {
            expected_previous: anchor,
            checked: 0,
            errors: Vec::new(),
        }
    }

    fn visit(&mut self, entry: &AuditLogEntry) {
        self.checked += 1;
        if !entry.hash_is_valid() {
            self.errors.push(IntegrityError {
                entry_id: entry.id.clone(),
                kind: IntegrityErrorKind::HashMismatch,
                message: "stored hash does not match entry content".to_string(),
            });
        }
        if let Some(expected) = &self.expected_previous
            && *expected != entry.previous_hash
        {
            self.errors.push(IntegrityError {
                entry_id: entry.id.clone(),
                kind: IntegrityErrorKind::BrokenLink,
                message: format!(
                    "previous_hash {} does not match preceding hash {}",
                    short(&entry.previous_hash),
                    short(expected)
                ),
            });
        }
        self.expected_previous = Some(entry.hash.clone());
    }

    fn malformed(&mut self, location: String, message: String) {
        self.checked += 1;
        self.errors.push(IntegrityError {
            entry_id: location,
            kind: IntegrityErrorKind::Malformed,
            message,
        });
    }

    fn finish(self) -> IntegrityReport {
        IntegrityReport {
            valid: self.errors.is_empty(),
            entries_checked: self.checked,
            errors: self.errors,
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Verify the files in a storage directory without loading them into memory
///
/// Files written by a ledger that has pruned entries start mid-chain, so the
/// first entry's link is accepted as the anchor.
///
/// # Errors
///
/// Returns an error if the directory or a file cannot be read.
pub fn verify_directory(dir: &Path) -> Result<IntegrityReport> {
    let mut verifier = ChainVerifier::new(None);
    store::for_each_line(dir, |line| match line {
        StoredLine::Entry(entry) => verifier.visit(&entry),
        StoredLine::Malformed { location, message } => verifier.malformed(location, message),
    })?;
    Ok(verifier.finish())
}

/// Ledger statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    /// Whether logging is enabled
    pub enabled: bool,
    /// Whether entries are written to disk
    pub persistent: bool,
    /// Entries currently retained
    pub total_entries: usize,
    /// Retained entries per action
    pub by_action: BTreeMap<String, usize>,
    /// Retained entries per result
    pub by_result: BTreeMap<AuditResult, usize>,
    /// Oldest retained timestamp
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Newest retained timestamp
    pub newest_entry: Option<DateTime<Utc>>,
    /// Hash at the head of the chain
    pub last_hash: String,
    /// Entries removed by retention since start
    pub pruned_total: u64,
    /// Entries that failed to persist since start
    pub write_failures: u64,
}

struct Writer {
    last_hash: String,
    sink: Option<FileSink>,
}

/// Append-only, tamper-evident audit log
///
/// Appends are serialized through a single writer lock so the chain order
/// is the append order. Reads take a snapshot under a shared lock.
pub struct AuditLedger {
    config: AuditConfig,
    redactor: Redactor,
    writer: Mutex<Writer>,
    entries: RwLock<VecDeque<AuditLogEntry>>,
    /// `previous_hash` of the oldest retained entry
    anchor: RwLock<String>,
    pruned_total: AtomicU64,
    write_failures: AtomicU64,
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("enabled", &self.config.enabled)
            .field("entries", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl AuditLedger {
    /// Create a ledger, loading existing entries when a storage directory is
    /// configured
    ///
    /// Storage problems degrade the ledger to memory-only with a warning.
    #[must_use]
    pub fn new(config: &AuditConfig) -> Self {
        match Self::open(config) {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!(error = %e, "Audit storage unavailable, keeping entries in memory only");
                Self::in_memory(config)
            }
        }
    }

    /// Memory-only ledger
    #[must_use]
    pub fn in_memory(config: &AuditConfig) -> Self {
        Self {
            config: config.clone(),
            redactor: Redactor::new(&config.sensitive_keys),
            writer: Mutex::new(Writer {
                last_hash: String::new(),
                sink: None,
            }),
            entries: RwLock::new(VecDeque::new()),
            anchor: RwLock::new(String::new()),
            pruned_total: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    /// Open a ledger, resuming the chain from the storage directory
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be created or read.
    pub fn open(config: &AuditConfig) -> Result<Self> {
        let ledger = Self::in_memory(config);
        let Some(dir) = &config.storage_dir else {
            return Ok(ledger);
        };

        let sink = FileSink::open(dir)?;
        let loaded = store::load_entries(dir)?;
        {
            let mut writer = ledger.writer.lock();
            if let Some(first) = loaded.first() {
                *ledger.anchor.write() = first.previous_hash.clone();
            }
            if let Some(last) = loaded.last() {
                writer.last_hash = last.hash.clone();
            }
            writer.sink = Some(sink);
        }
        info!(
            dir = %dir.display(),
            entries = loaded.len(),
            "Audit ledger resumed from storage"
        );
        *ledger.entries.write() = loaded.into();
        Ok(ledger)
    }

    /// Whether logging is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Append an action to the chain
    ///
    /// Returns the stored entry, or `None` when logging is disabled. Storage
    /// failures are logged and counted, never returned.
    pub fn log(&self, record: AuditRecord) -> Option<AuditLogEntry> {
        if !self.config.enabled {
            return None;
        }

        let AuditRecord {
            action,
            mut actor,
            resource,
            details,
            result,
            error_message,
            tenant_id,
        } = record;

        let details = if self.config.redact_sensitive {
            self.redactor.redact(details)
        } else {
            details
        };
        if self.config.truncate_ip {
            actor.ip = actor.ip.as_deref().map(truncate_ip);
        }

        let mut writer = self.writer.lock();
        let mut entry = AuditLogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            actor,
            resource,
            details,
            result,
            error_message,
            previous_hash: writer.last_hash.clone(),
            hash: String::new(),
            tenant_id,
        };
        entry.hash = entry.compute_hash();

        if let Some(sink) = writer.sink.as_mut()
            && let Err(e) = sink.append(&entry)
        {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!(entry_id = %entry.id, error = %e, "Failed to persist audit entry");
        }

        match serde_json::to_string(&entry) {
            Ok(ref json) => info!(audit = %json, "audit"),
            Err(ref e) => warn!(error = %e, "Failed to serialize audit entry"),
        }

        writer.last_hash.clone_from(&entry.hash);
        self.entries.write().push_back(entry.clone());
        Some(entry)
    }

    /// Entries matching `filter`, newest first
    #[must_use]
    pub fn get_entries(&self, filter: &AuditFilter) -> Vec<AuditLogEntry> {
        let entries = self.entries.read();
        let matching = entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .skip(filter.offset);
        match filter.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }

    /// Matching entries as a pretty-printed JSON array
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn export_to_json(&self, filter: &AuditFilter) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.get_entries(filter))?)
    }

    /// Matching entries as CSV with a header row
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn export_to_csv(&self, filter: &AuditFilter) -> Result<String> {
        entries_to_csv(&self.get_entries(filter))
    }

    /// Walk the retained chain from the anchor
    #[must_use]
    pub fn verify_integrity(&self) -> IntegrityReport {
        let anchor = self.anchor.read().clone();
        let entries = self.entries.read();
        let mut verifier = ChainVerifier::new(Some(anchor));
        for entry in entries.iter() {
            verifier.visit(entry);
        }
        let report = verifier.finish();
        if !report.valid {
            warn!(errors = report.errors.len(), "Audit chain verification failed");
        }
        report
    }

    /// Drop entries older than the retention period, then the oldest beyond
    /// `max_entries`
    ///
    /// The hash of the last dropped entry becomes the new anchor so the
    /// retained chain still verifies. Returns the number of entries removed.
    pub fn apply_retention_policy(&self) -> usize {
        let retention = ChronoDuration::from_std(self.config.retention)
            .unwrap_or_else(|_| ChronoDuration::days(365));
        let cutoff = Utc::now() - retention;

        let mut writer = self.writer.lock();
        let mut entries = self.entries.write();
        let mut last_removed: Option<AuditLogEntry> = None;
        let mut removed = 0usize;

        while entries.front().is_some_and(|e| e.timestamp < cutoff) {
            last_removed = entries.pop_front();
            removed += 1;
        }
        while entries.len() > self.config.max_entries {
            last_removed = entries.pop_front();
            removed += 1;
        }

        if let Some(entry) = last_removed {
            *self.anchor.write() = entry.hash;
        }
        drop(entries);

        if let Some(sink) = writer.sink.as_mut() {
            let files = sink.remove_expired(cutoff);
            if files > 0 {
                debug!(files, "Removed expired audit files");
            }
        }

        if removed > 0 {
            self.pruned_total.fetch_add(removed as u64, Ordering::Relaxed);
            info!(removed, "Applied audit retention policy");
        }
        removed
    }

    /// Retained entry count
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no entries are retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Ledger statistics
    #[must_use]
    pub fn get_stats(&self) -> AuditStats {
        let last_hash = self.writer.lock().last_hash.clone();
        let entries = self.entries.read();
        let mut by_action = BTreeMap::new();
        let mut by_result = BTreeMap::new();
        for entry in entries.iter() {
            *by_action.entry(entry.action.clone()).or_insert(0) += 1;
            *by_result.entry(entry.result).or_insert(0) += 1;
        }
        AuditStats {
            enabled: self.config.enabled,
            persistent: self.config.storage_dir.is_some(),
            total_entries: entries.len(),
            by_action,
            by_result,
            oldest_entry: entries.front().map(|e| e.timestamp),
            newest_entry: entries.back().map(|e| e.timestamp),
            last_hash,
            pruned_total: self.pruned_total.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn tamper<F: FnOnce(&mut AuditLogEntry)>(&self, index: usize, f: F) {
        if let Some(entry) = self.entries.write().get_mut(index) {
            f(entry);
        }
    }
}

/// Render entries as CSV with a header row
///
/// # Errors
///
/// Returns an error if a row cannot be written.
pub fn entries_to_csv(entries: &[AuditLogEntry]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record([
        "id",
        "timestamp",
        "action",
        "actor_id",
        "actor_type",
        "resource_type",
        "resource_id",
        "result",
        "error_message",
        "tenant_id",
        "details",
        "previous_hash",
        "hash",
    ])?;
    for e in entries {
        let actor_type = serde_json::to_value(e.actor.actor_type)?;
        wtr.write_record([
            e.id.as_str(),
            &e.timestamp.to_rfc3339(),
            &e.action,
            &e.actor.id,
            actor_type.as_str().unwrap_or_default(),
            &e.resource.resource_type,
            &e.resource.id,
            &e.result.to_string(),
            e.error_message.as_deref().unwrap_or_default(),
            e.tenant_id.as_deref().unwrap_or_default(),
            &serde_json::to_string(&e.details)?,
            &e.previous_hash,
            &e.hash,
        ])?;
    }
    let bytes = wtr.into_inner().map_err(|e| Error::Internal(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{Actor, Resource, actions};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn config() -> AuditConfig {
        AuditConfig::default()
    }

    fn record(action: &str, resource_id: &str) -> AuditRecord {
        AuditRecord::new(action, Actor::user("ops"), Resource::new("provider", resource_id))
    }

    #[test]
    fn concurrent_writers_never_fork_the_chain() {
        // GIVEN: one ledger shared by many writer threads
        let ledger = std::sync::Arc::new(AuditLedger::in_memory(&config()));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = std::sync::Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        ledger.log(record(actions::SCALE_FORCED, &format!("writer-{t}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // THEN: every entry is on one unbroken chain
        let report = ledger.verify_integrity();
        assert!(report.valid, "{:?}", report.errors);
        assert_eq!(report.entries_checked, 400);

        let entries = ledger.get_entries(&AuditFilter::default());
        let links: std::collections::HashSet<&str> =
            entries.iter().map(|e| e.previous_hash.as_str()).collect();
        assert_eq!(links.len(), 400);
    }

    #[test]
    fn entries_are_chained() {
        // GIVEN: a fresh ledger
        let ledger = AuditLedger::in_memory(&config());

        // WHEN: three actions are logged
        let a = ledger.log(record(actions::CONFIG_FORCED, "mpesa")).unwrap();
        let b = ledger.log(record(actions::CONFIG_REVERTED, "mpesa")).unwrap();
        let c = ledger.log(record(actions::SCALE_FORCED, "cluster")).unwrap();

        // THEN: each links to its predecessor and the chain verifies
        assert_eq!(a.previous_hash, "");
        assert_eq!(b.previous_hash, a.hash);
        assert_eq!(c.previous_hash, b.hash);
        let report = ledger.verify_integrity();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 3);
    }

    #[test]
    fn disabled_ledger_records_nothing() {
        let ledger = AuditLedger::in_memory(&AuditConfig {
            enabled: false,
            ..config()
        });
        assert!(ledger.log(record(actions::CONFIG_FORCED, "mpesa")).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn details_and_ip_are_redacted_before_hashing() {
        let ledger = AuditLedger::in_memory(&config());
        let entry = ledger
            .log(
                AuditRecord::new(
                    actions::CREDENTIALS_ACCESSED,
                    Actor::user("ops").with_ip("10.1.2.3"),
                    Resource::new("provider", "paystack"),
                )
                .with_details(json!({"secret_key": "sk_live", "reason": "rotation"})),
            )
            .unwrap();

        assert_eq!(entry.details["secret_key"], "[REDACTED]");
        assert_eq!(entry.details["reason"], "rotation");
        assert_eq!(entry.actor.ip.as_deref(), Some("10.1.2.0"));
        assert!(entry.hash_is_valid());
    }

    #[test]
    fn tampered_details_are_detected() {
        // GIVEN: a valid chain
        let ledger = AuditLedger::in_memory(&config());
        for id in ["a", "b", "c"] {
            ledger.log(record(actions::PAYMENT_INITIATED, id));
        }

        // WHEN: the middle entry's details are altered
        ledger.tamper(1, |e| e.details = json!({"amount": 1}));

        // THEN: exactly that entry fails its hash check
        let report = ledger.verify_integrity();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, IntegrityErrorKind::HashMismatch);
    }

    #[test]
    fn relinked_entry_is_a_broken_link() {
        let ledger = AuditLedger::in_memory(&config());
        for id in ["a", "b"] {
            ledger.log(record(actions::PAYMENT_INITIATED, id));
        }

        // Recompute the hash so only the link is wrong
        ledger.tamper(1, |e| {
            e.previous_hash = "f".repeat(64);
            e.hash = e.compute_hash();
        });

        let report = ledger.verify_integrity();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, IntegrityErrorKind::BrokenLink);
    }

    #[test]
    fn filter_returns_newest_first_with_paging() {
        let ledger = AuditLedger::in_memory(&config());
        for id in ["a", "b", "c", "d"] {
            ledger.log(record(actions::PAYMENT_INITIATED, id));
        }
        ledger.log(record(actions::SCALE_FORCED, "cluster"));

        let filter = AuditFilter {
            action: Some(actions::PAYMENT_INITIATED.to_string()),
            offset: 1,
            limit: Some(2),
            ..AuditFilter::default()
        };
        let ids: Vec<_> = ledger
            .get_entries(&filter)
            .into_iter()
            .map(|e| e.resource.id)
            .collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn filter_by_result_and_tenant() {
        let ledger = AuditLedger::in_memory(&config());
        ledger.log(record(actions::PAYMENT_INITIATED, "a").with_tenant("t1"));
        ledger.log(
            record(actions::PAYMENT_INITIATED, "b")
                .with_tenant("t1")
                .with_error("declined"),
        );
        ledger.log(record(actions::PAYMENT_INITIATED, "c").with_tenant("t2"));

        let failures = ledger.get_entries(&AuditFilter {
            tenant_id: Some("t1".to_string()),
            result: Some(AuditResult::Failure),
            ..AuditFilter::default()
        });
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].resource.id, "b");
    }

    #[test]
    fn retention_by_count_keeps_chain_verifiable() {
        // GIVEN: a ledger capped at 3 entries
        let ledger = AuditLedger::in_memory(&AuditConfig {
            max_entries: 3,
            ..config()
        });
        for id in ["a", "b", "c", "d", "e"] {
            ledger.log(record(actions::PAYMENT_INITIATED, id));
        }

        // WHEN: retention runs
        let removed = ledger.apply_retention_policy();

        // THEN: the oldest two are gone and the rest still verify
        assert_eq!(removed, 2);
        assert_eq!(ledger.len(), 3);
        assert!(ledger.verify_integrity().valid);
        assert_eq!(ledger.get_stats().pruned_total, 2);
    }

    #[test]
    fn retention_by_age_drops_everything_when_expired() {
        let ledger = AuditLedger::in_memory(&AuditConfig {
            retention: Duration::ZERO,
            ..config()
        });
        ledger.log(record(actions::PAYMENT_INITIATED, "a"));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(ledger.apply_retention_policy(), 1);
        assert!(ledger.is_empty());
        assert!(ledger.verify_integrity().valid);

        // New entries continue the chain from the pruned head
        ledger.log(record(actions::PAYMENT_INITIATED, "b"));
        assert!(ledger.verify_integrity().valid);
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let ledger = AuditLedger::in_memory(&config());
        ledger.log(record(actions::CONFIG_FORCED, "mpesa").with_details(json!({"timeout_ms": 20000})));

        let csv = ledger.export_to_csv(&AuditFilter::default()).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("id,timestamp,action,actor_id"));
        let row = lines.next().unwrap();
        assert!(row.contains("optimizer.config_forced"));
        assert!(row.contains("user"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn json_export_is_an_array() {
        let ledger = AuditLedger::in_memory(&config());
        ledger.log(record(actions::CONFIG_FORCED, "mpesa"));
        let json = ledger.export_to_json(&AuditFilter::default()).unwrap();
        let parsed: Vec<AuditLogEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn stats_count_by_action_and_result() {
        let ledger = AuditLedger::in_memory(&config());
        ledger.log(record(actions::CONFIG_FORCED, "mpesa"));
        ledger.log(record(actions::CONFIG_FORCED, "paystack").with_error("invalid"));
        ledger.log(record(actions::SCALE_FORCED, "cluster"));

        let stats = ledger.get_stats();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_action[actions::CONFIG_FORCED], 2);
        assert_eq!(stats.by_result[&AuditResult::Failure], 1);
        assert_eq!(stats.last_hash.len(), 64);
    }
}
