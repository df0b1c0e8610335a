//! Adaptive Pipeline (AAP): per-event fidelity selection and record
//! construction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use caas_enc::GENESIS_HASH;

use crate::error::CaasResult;
use crate::ledger::{AuditLedger, MerkleProof};
use crate::model::{AuditRecord, CanonicalPolicy, ComplianceEvent, Criticality, Fidelity};

/// Tenant/bucket/criticality fidelity overrides and the fallback default.
/// Precedence (highest first): per-event override, `by_bucket`, `by_tenant`,
/// `by_criticality`, then `default_fidelity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub by_tenant: HashMap<String, Fidelity>,
    pub by_bucket: HashMap<String, Fidelity>,
    pub by_criticality: HashMap<Criticality, Fidelity>,
    pub default_fidelity: Fidelity,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            by_tenant: HashMap::new(),
            by_bucket: HashMap::new(),
            by_criticality: HashMap::new(),
            default_fidelity: Fidelity::Chained,
        }
    }
}

/// The result of running one event through the pipeline.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub record: AuditRecord,
    pub fidelity: Fidelity,
    pub proof: Option<MerkleProof>,
}

/// Maps each event to a fidelity level and appends a correspondingly
/// populated record to the ledger. Every level still goes through the
/// ledger's single append path — `MetadataOnly` differs only in that the
/// record handed back to the caller has its contextual cryptographic
/// fields suppressed; the ledger's own chain invariants are unaffected.
pub struct AdaptivePipeline<'a> {
    ledger: &'a AuditLedger,
    config: RwLock<PipelineConfig>,
}

impl<'a> AdaptivePipeline<'a> {
    pub fn new(ledger: &'a AuditLedger, config: PipelineConfig) -> Self {
        Self { ledger, config: RwLock::new(config) }
    }

    pub async fn set_tenant_fidelity(&self, tenant_id: impl Into<String>, level: Fidelity) {
        self.config.write().await.by_tenant.insert(tenant_id.into(), level);
    }

    pub async fn set_bucket_fidelity(&self, bucket: impl Into<String>, level: Fidelity) {
        self.config.write().await.by_bucket.insert(bucket.into(), level);
    }

    pub async fn set_criticality_fidelity(&self, criticality: Criticality, level: Fidelity) {
        self.config.write().await.by_criticality.insert(criticality, level);
    }

    async fn select_fidelity(
        &self,
        event: &ComplianceEvent,
        criticality: Option<Criticality>,
        override_level: Option<Fidelity>,
    ) -> Fidelity {
        if let Some(level) = override_level {
            return level;
        }
        let config = self.config.read().await;
        if let Some(level) = config.by_bucket.get(&event.bucket) {
            return *level;
        }
        if let Some(level) = config.by_tenant.get(&event.tenant_id) {
            return *level;
        }
        if let Some(criticality) = criticality {
            if let Some(level) = config.by_criticality.get(&criticality) {
                return *level;
            }
        }
        config.default_fidelity
    }

    /// Builds a record from `event`, binds `policy`'s commitment when the
    /// selected fidelity calls for it, appends it to the ledger, and — for
    /// `MerkleProof` — attempts to fetch its inclusion proof (which may
    /// still be `None` if the covering batch hasn't closed yet).
    pub async fn process_event(
        &self,
        event: ComplianceEvent,
        policy: Option<&CanonicalPolicy>,
        criticality: Option<Criticality>,
        override_level: Option<Fidelity>,
    ) -> CaasResult<ProcessedEvent> {
        let fidelity = self.select_fidelity(&event, criticality, override_level).await;

        let bind_policy = matches!(fidelity, Fidelity::PolicyBound | Fidelity::MerkleProof);
        let policy_commitment =
            if bind_policy { policy.map(|p| p.commitment_hash.clone()) } else { None };

        let record = AuditRecord {
            record_id: Uuid::new_v4().to_string(),
            event_id: event.event_id,
            timestamp: event.timestamp,
            event_type: event.event_type,
            tenant_id: event.tenant_id,
            bucket: event.bucket,
            object_key: event.object_key,
            policy_commitment,
            metadata: event.metadata,
            previous_hash: String::new(),
            record_hash: String::new(),
            sequence: 0,
        };

        let stored = self.ledger.append(record).await?;

        let proof = if fidelity == Fidelity::MerkleProof {
            self.ledger.generate_inclusion_proof(&stored.record_id).await
        } else {
            None
        };

        let emitted = if fidelity == Fidelity::MetadataOnly {
            let mut redacted = stored.clone();
            redacted.previous_hash = GENESIS_HASH.to_string();
            redacted.policy_commitment = None;
            redacted
        } else {
            stored
        };

        Ok(ProcessedEvent { record: emitted, fidelity, proof })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerConfig;
    use crate::model::EventType;
    use std::collections::HashMap as StdHashMap;

    fn event(id: &str, tenant: &str, bucket: &str) -> ComplianceEvent {
        ComplianceEvent::new(
            id,
            EventType::ObjectCreate,
            "2024-01-01T00:00:00Z",
            tenant,
            bucket,
            None,
            None,
            StdHashMap::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn default_fidelity_is_chained() {
        let ledger = AuditLedger::default();
        let pipeline = AdaptivePipeline::new(&ledger, PipelineConfig::default());
        let processed = pipeline.process_event(event("e1", "tenant-a", "bucket-a"), None, None, None).await.unwrap();
        assert_eq!(processed.fidelity, Fidelity::Chained);
        assert_ne!(processed.record.previous_hash, GENESIS_HASH);
    }

    #[tokio::test]
    async fn metadata_only_redacts_the_emitted_record_but_not_the_ledger() {
        let ledger = AuditLedger::default();
        let pipeline = AdaptivePipeline::new(&ledger, PipelineConfig::default());
        pipeline.process_event(event("e0", "tenant-a", "bucket-a"), None, None, None).await.unwrap();

        let processed = pipeline
            .process_event(event("e1", "tenant-a", "bucket-a"), None, None, Some(Fidelity::MetadataOnly))
            .await
            .unwrap();

        assert_eq!(processed.record.previous_hash, GENESIS_HASH);
        let stored = ledger.get(&processed.record.record_id).await.unwrap();
        assert_ne!(stored.previous_hash, GENESIS_HASH);
        assert!(ledger.verify_chain_integrity().await);
    }

    #[tokio::test]
    async fn bucket_override_beats_tenant_and_criticality() {
        let ledger = AuditLedger::default();
        let pipeline = AdaptivePipeline::new(&ledger, PipelineConfig::default());
        pipeline.set_tenant_fidelity("tenant-a", Fidelity::MerkleProof).await;
        pipeline.set_bucket_fidelity("bucket-a", Fidelity::PolicyBound).await;
        pipeline.set_criticality_fidelity(Criticality::Critical, Fidelity::Chained).await;

        let processed = pipeline
            .process_event(event("e1", "tenant-a", "bucket-a"), None, Some(Criticality::Critical), None)
            .await
            .unwrap();
        assert_eq!(processed.fidelity, Fidelity::PolicyBound);
    }

    #[tokio::test]
    async fn explicit_override_beats_every_configured_tier() {
        let ledger = AuditLedger::default();
        let pipeline = AdaptivePipeline::new(&ledger, PipelineConfig::default());
        pipeline.set_bucket_fidelity("bucket-a", Fidelity::PolicyBound).await;

        let processed = pipeline
            .process_event(event("e1", "tenant-a", "bucket-a"), None, None, Some(Fidelity::MetadataOnly))
            .await
            .unwrap();
        assert_eq!(processed.fidelity, Fidelity::MetadataOnly);
    }

    #[tokio::test]
    async fn merkle_proof_fidelity_attaches_a_proof_once_the_batch_closes() {
        let ledger = AuditLedger::new(LedgerConfig { batch_size: 2 });
        let pipeline = AdaptivePipeline::new(&ledger, PipelineConfig::default());

        let first = pipeline
            .process_event(event("e0", "t", "b"), None, None, Some(Fidelity::MerkleProof))
            .await
            .unwrap();
        assert!(first.proof.is_none());

        let second = pipeline
            .process_event(event("e1", "t", "b"), None, None, Some(Fidelity::MerkleProof))
            .await
            .unwrap();
        assert!(second.proof.is_some());
        assert!(second.proof.unwrap().verify());
    }

    #[tokio::test]
    async fn chained_fidelity_never_binds_a_policy_commitment() {
        let ledger = AuditLedger::default();
        let pipeline = AdaptivePipeline::new(&ledger, PipelineConfig::default());
        let policy = CanonicalPolicy {
            policy_id: "p1".into(),
            version: "1.0".into(),
            canonical_form: vec![],
            commitment_hash: "a".repeat(64),
            created_at: chrono::Utc::now(),
            policy: crate::model::Policy {
                policy_id: "p1".into(),
                version: "1.0".into(),
                name: "n".into(),
                statements: vec![],
                metadata: StdHashMap::new(),
            },
        };

        let processed = pipeline
            .process_event(event("e1", "t", "b"), Some(&policy), None, Some(Fidelity::Chained))
            .await
            .unwrap();
        assert!(processed.record.policy_commitment.is_none());
    }
}
