//! Audit entry types and hash computation

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Well-known audit action names
pub mod actions {
    /// A payment was initiated through a provider
    pub const PAYMENT_INITIATED: &str = "payment.initiated";
    /// A payment was refunded
    pub const PAYMENT_REFUNDED: &str = "payment.refunded";
    /// Provider credentials were read or rotated
    pub const CREDENTIALS_ACCESSED: &str = "credentials.accessed";
    /// An operator forced a provider's tuned config
    pub const CONFIG_FORCED: &str = "optimizer.config_forced";
    /// A provider's tuned config was reverted to its baseline
    pub const CONFIG_REVERTED: &str = "optimizer.config_reverted";
    /// An operator forced the instance count
    pub const SCALE_FORCED: &str = "scaling.forced";
    /// The auto-scaler changed the instance count
    pub const SCALE_APPLIED: &str = "scaling.applied";
    /// The auto-scaler configuration changed
    pub const SCALING_CONFIG_UPDATED: &str = "scaling.config_updated";
    /// The predictor scheduled maintenance
    pub const MAINTENANCE_SCHEDULED: &str = "maintenance.scheduled";
    /// An operator cancelled scheduled maintenance
    pub const MAINTENANCE_CANCELLED: &str = "maintenance.cancelled";
    /// An operator confirmed or rejected a prediction
    pub const PREDICTION_REVIEWED: &str = "prediction.reviewed";
}

/// Kind of principal behind an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// Human operator or end user
    User,
    /// This control plane acting on its own
    System,
    /// Another service
    Service,
    /// A client authenticated by API key
    ApiKey,
}

/// Who performed an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Principal id
    pub id: String,
    /// Principal kind
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    /// Client address (truncated when redaction is enabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Client user agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Actor {
    /// A control-plane component acting on its own
    pub fn system(component: impl Into<String>) -> Self {
        Self {
            id: component.into(),
            actor_type: ActorType::System,
            ip: None,
            user_agent: None,
        }
    }

    /// A human user
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            actor_type: ActorType::User,
            ip: None,
            user_agent: None,
        }
    }

    /// Attach a client address
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Attach a user agent
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// What an action was performed on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource kind (e.g. `provider`, `transaction`)
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource id
    pub id: String,
}

impl Resource {
    /// Build a resource reference
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

/// Outcome of an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    /// Action completed
    Success,
    /// Action failed
    Failure,
    /// Action accepted, completion unknown
    Pending,
}

impl std::fmt::Display for AuditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// An action to be appended to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    /// Action name, see [`actions`]
    pub action: String,
    /// Who performed it
    pub actor: Actor,
    /// What it was performed on
    pub resource: Resource,
    /// Free-form details (redacted before storage)
    pub details: Value,
    /// Outcome
    pub result: AuditResult,
    /// Failure description
    pub error_message: Option<String>,
    /// Tenant the action belongs to
    pub tenant_id: Option<String>,
}

impl AuditRecord {
    /// A successful action with no details
    pub fn new(action: impl Into<String>, actor: Actor, resource: Resource) -> Self {
        Self {
            action: action.into(),
            actor,
            resource,
            details: Value::Null,
            result: AuditResult::Success,
            error_message: None,
            tenant_id: None,
        }
    }

    /// Attach details
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Set the outcome
    #[must_use]
    pub fn with_result(mut self, result: AuditResult) -> Self {
        self.result = result;
        self
    }

    /// Mark as failed with a message
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.result = AuditResult::Failure;
        self.error_message = Some(message.into());
        self
    }

    /// Attach a tenant
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// A stored, hash-chained audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Entry id
    pub id: String,
    /// When the entry was appended
    pub timestamp: DateTime<Utc>,
    /// Action name
    pub action: String,
    /// Who performed the action
    pub actor: Actor,
    /// What the action was performed on
    pub resource: Resource,
    /// Redacted details
    pub details: Value,
    /// Outcome
    pub result: AuditResult,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Hash of the preceding entry (empty for the first)
    pub previous_hash: String,
    /// Hash of this entry
    pub hash: String,
    /// Tenant the action belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Fields covered by the hash, in canonical order
#[derive(Serialize)]
struct HashInput<'a> {
    id: &'a str,
    timestamp: String,
    action: &'a str,
    actor: &'a Actor,
    resource: &'a Resource,
    details: &'a Value,
    result: AuditResult,
    previous_hash: &'a str,
}

impl AuditLogEntry {
    /// Recompute the hash from the entry's content
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let input = HashInput {
            id: &self.id,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            action: &self.action,
            actor: &self.actor,
            resource: &self.resource,
            details: &self.details,
            result: self.result,
            previous_hash: &self.previous_hash,
        };
        let canonical = serde_json::to_string(&input).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether the stored hash matches the content
    #[must_use]
    pub fn hash_is_valid(&self) -> bool {
        self.hash == self.compute_hash()
    }
}
