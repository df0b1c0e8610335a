//! Shared data model: events, policies, canonical policies, and audit
//! records.

use std::collections::HashMap;

use caas_enc::CanonicalValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CaasError, CaasResult};

/// The kind of mutation a `ComplianceEvent` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "object.create")]
    ObjectCreate,
    #[serde(rename = "object.update")]
    ObjectUpdate,
    #[serde(rename = "object.delete")]
    ObjectDelete,
    #[serde(rename = "object.read")]
    ObjectRead,
    #[serde(rename = "policy.create")]
    PolicyCreate,
    #[serde(rename = "policy.update")]
    PolicyUpdate,
    #[serde(rename = "policy.delete")]
    PolicyDelete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ObjectCreate => "object.create",
            EventType::ObjectUpdate => "object.update",
            EventType::ObjectDelete => "object.delete",
            EventType::ObjectRead => "object.read",
            EventType::PolicyCreate => "policy.create",
            EventType::PolicyUpdate => "policy.update",
            EventType::PolicyDelete => "policy.delete",
        }
    }
}

/// An intercepted compliance-relevant mutation. Immutable once created;
/// `ComplianceEvent::new` is the only constructor and enforces the
/// non-empty-field invariant at intercept time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceEvent {
    pub event_id: String,
    pub event_type: EventType,
    /// RFC 3339 UTC instant, preserved verbatim (not reformatted) so that
    /// canonical encodings remain byte-stable regardless of the precision
    /// the caller supplied it at.
    pub timestamp: String,
    pub tenant_id: String,
    pub bucket: String,
    pub object_key: Option<String>,
    pub principal: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ComplianceEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: impl Into<String>,
        event_type: EventType,
        timestamp: impl Into<String>,
        tenant_id: impl Into<String>,
        bucket: impl Into<String>,
        object_key: Option<String>,
        principal: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> CaasResult<Self> {
        let event_id = event_id.into();
        let timestamp = timestamp.into();
        let tenant_id = tenant_id.into();
        let bucket = bucket.into();

        if event_id.is_empty() {
            return Err(CaasError::InvalidInput("event_id must not be empty".into()));
        }
        if timestamp.is_empty() {
            return Err(CaasError::InvalidInput("timestamp must not be empty".into()));
        }
        DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| CaasError::InvalidInput(format!("timestamp is not RFC 3339: {e}")))?;
        if tenant_id.is_empty() {
            return Err(CaasError::InvalidInput("tenant_id must not be empty".into()));
        }
        if bucket.is_empty() {
            return Err(CaasError::InvalidInput("bucket must not be empty".into()));
        }

        Ok(Self {
            event_id,
            event_type,
            timestamp,
            tenant_id,
            bucket,
            object_key,
            principal,
            metadata,
        })
    }
}

/// `Allow` or `Deny` for a policy statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// One statement within a `Policy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub sid: String,
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    pub principals: Vec<String>,
    pub conditions: HashMap<String, serde_json::Value>,
}

impl PolicyStatement {
    /// Builds the canonical ordered form of this statement per the
    /// canonicalization rules: `Sid, Effect, Actions, Resources`, then
    /// `Principals` only if non-empty, then `Conditions` only if non-empty.
    /// Actions/resources/principals are ASCII-lexicographically sorted;
    /// conditions are recursively key-sorted.
    pub fn canonical_value(&self) -> CanonicalValue {
        let mut actions = self.actions.clone();
        actions.sort();
        let mut resources = self.resources.clone();
        resources.sort();

        let mut fields = vec![
            ("Sid", CanonicalValue::string(self.sid.clone())),
            ("Effect", CanonicalValue::string(self.effect.as_str())),
            ("Actions", CanonicalValue::array_of_strings(actions)),
            ("Resources", CanonicalValue::array_of_strings(resources)),
        ];

        if !self.principals.is_empty() {
            let mut principals = self.principals.clone();
            principals.sort();
            fields.push(("Principals", CanonicalValue::array_of_strings(principals)));
        }

        if !self.conditions.is_empty() {
            let json = serde_json::Value::Object(
                self.conditions.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            );
            fields.push(("Conditions", CanonicalValue::from_json_sorted(&json)));
        }

        CanonicalValue::object(fields)
    }
}

/// A policy as supplied by a caller, before compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub version: String,
    pub name: String,
    pub statements: Vec<PolicyStatement>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Policy {
    /// Builds the canonical ordered form: top-level keys
    /// `PolicyId, Version, Name, Statements`, with statements sorted by
    /// `Sid` ASCII-lexicographically.
    pub fn canonical_value(&self) -> CanonicalValue {
        let mut statements = self.statements.clone();
        statements.sort_by(|a, b| a.sid.cmp(&b.sid));

        CanonicalValue::object(vec![
            ("PolicyId", CanonicalValue::string(self.policy_id.clone())),
            ("Version", CanonicalValue::string(self.version.clone())),
            ("Name", CanonicalValue::string(self.name.clone())),
            (
                "Statements",
                CanonicalValue::Array(statements.iter().map(PolicyStatement::canonical_value).collect()),
            ),
        ])
    }

    pub(crate) fn validate(&self) -> CaasResult<()> {
        if self.policy_id.is_empty() {
            return Err(CaasError::InvalidInput("policy_id must not be empty".into()));
        }
        if self.version.is_empty() {
            return Err(CaasError::InvalidInput("version must not be empty".into()));
        }
        if self.statements.is_empty() {
            return Err(CaasError::InvalidInput("statements must not be empty".into()));
        }
        Ok(())
    }
}

/// The immutable output of compiling a `Policy`: its canonical byte form and
/// the commitment hash over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalPolicy {
    pub policy_id: String,
    pub version: String,
    pub canonical_form: Vec<u8>,
    pub commitment_hash: String,
    pub created_at: DateTime<Utc>,
    pub policy: Policy,
}

/// An append-only ledger record. Mutable only during the append transaction
/// inside `AuditLedger::append`; every other observer sees a frozen value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: String,
    pub event_id: String,
    pub timestamp: String,
    pub event_type: EventType,
    pub tenant_id: String,
    pub bucket: String,
    pub object_key: Option<String>,
    pub policy_commitment: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub previous_hash: String,
    pub record_hash: String,
    /// Zero-based position in ledger append order. Not part of the
    /// canonical hash preimage (the cross-implementation-stable field list
    /// in the spec does not include it) — it exists purely so that an
    /// offline bundle verifier, which has no access to the live ledger, can
    /// tell whether two embedded records were truly adjacent in the
    /// original chain or merely placed next to each other in a bundle.
    pub sequence: u64,
}

impl AuditRecord {
    /// Canonical field-fixed layout per the spec: `record_id, event_id,
    /// timestamp, event_type, tenant_id, bucket, object_key,
    /// policy_commitment, metadata, previous_hash`, with `null` for absent
    /// optional fields and metadata keys sorted recursively.
    /// `record_hash` and `sequence` are excluded from their own preimage.
    pub fn canonical_value(&self) -> CanonicalValue {
        let metadata_json = serde_json::Value::Object(
            self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        );

        CanonicalValue::object(vec![
            ("record_id", CanonicalValue::string(self.record_id.clone())),
            ("event_id", CanonicalValue::string(self.event_id.clone())),
            ("timestamp", CanonicalValue::string(self.timestamp.clone())),
            ("event_type", CanonicalValue::string(self.event_type.as_str())),
            ("tenant_id", CanonicalValue::string(self.tenant_id.clone())),
            ("bucket", CanonicalValue::string(self.bucket.clone())),
            (
                "object_key",
                self.object_key.clone().map(CanonicalValue::string).unwrap_or(CanonicalValue::Null),
            ),
            (
                "policy_commitment",
                self.policy_commitment.clone().map(CanonicalValue::string).unwrap_or(CanonicalValue::Null),
            ),
            ("metadata", CanonicalValue::from_json_sorted(&metadata_json)),
            ("previous_hash", CanonicalValue::string(self.previous_hash.clone())),
        ])
    }

    pub fn compute_hash(&self) -> String {
        self.canonical_value().commitment_hash()
    }
}

/// Per-event criticality, used by the adaptive pipeline's
/// `by_criticality` selection tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

/// How much cryptographic material the adaptive pipeline attaches to a
/// given event's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fidelity {
    MetadataOnly,
    Chained,
    PolicyBound,
    MerkleProof,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_rejects_empty_required_fields() {
        let err = ComplianceEvent::new(
            "",
            EventType::ObjectCreate,
            "2024-01-01T00:00:00Z",
            "tenant-a",
            "bucket-a",
            None,
            None,
            HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, CaasError::InvalidInput("event_id must not be empty".into()));
    }

    #[test]
    fn event_rejects_non_rfc3339_timestamp() {
        let err = ComplianceEvent::new(
            "evt-1",
            EventType::ObjectCreate,
            "not-a-timestamp",
            "tenant-a",
            "bucket-a",
            None,
            None,
            HashMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CaasError::InvalidInput(_)));
    }

    #[test]
    fn policy_rejects_empty_statements() {
        let policy = Policy {
            policy_id: "p1".into(),
            version: "1.0".into(),
            name: "n".into(),
            statements: vec![],
            metadata: HashMap::new(),
        };
        assert!(policy.validate().is_err());
    }
}
