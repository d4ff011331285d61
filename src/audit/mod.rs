//! Tamper-evident audit ledger
//!
//! Every security- or money-relevant action is appended as an
//! [`AuditLogEntry`] whose SHA-256 hash covers its content and the hash of
//! the entry before it. Altering, removing or reordering an entry breaks the
//! chain, which [`AuditLedger::verify_integrity`] reports.
//!
//! Sensitive `details` keys are masked and actor IPs truncated before the
//! hash is computed, so the chain never commits to raw secrets.

mod entry;
mod ledger;
mod redact;
mod store;

pub use entry::{Actor, ActorType, AuditLogEntry, AuditRecord, AuditResult, Resource, actions};
pub use ledger::{
    AuditFilter, AuditLedger, AuditStats, IntegrityError, IntegrityErrorKind, IntegrityReport, entries_to_csv,
    verify_directory,
};
pub use redact::{REDACTED, Redactor, truncate_ip};
pub use store::load_entries;
