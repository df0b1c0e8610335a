//! Verification API (ZCVI): builds self-contained proof bundles and
//! verifies them offline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{CaasError, CaasResult};
use crate::ledger::{AuditLedger, MerkleProof};
use crate::model::AuditRecord;
use crate::policy::PolicyCompiler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleType {
    Single,
    Batch,
    TimeRange,
    Tenant,
}

/// A policy commitment embedded in a bundle. `canonical_form` is `None`
/// when the bundle builder could not resolve the commitment hash back to a
/// known policy — the hash is still recorded verbatim so the bundle remains
/// self-describing, but `verify_bundle`'s policy check cannot recompute it
/// and the bundle fails that sub-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCommitmentEntry {
    pub policy_id: Option<String>,
    pub canonical_form: Option<Vec<u8>>,
    pub commitment_hash: String,
}

/// A self-contained, offline-verifiable artifact: the records it covers,
/// every policy commitment those records reference (dereferenced against
/// PAC at build time), any requested Merkle inclusion proofs, and an
/// optional caller-supplied external anchor blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceProofBundle {
    pub bundle_id: String,
    pub created_at: DateTime<Utc>,
    pub bundle_type: BundleType,
    pub records: Vec<AuditRecord>,
    /// Keyed by commitment hash rather than `policy_id`: a record only
    /// carries the hash, and an unresolved commitment has no known
    /// `policy_id` to key by.
    pub policy_commitments: HashMap<String, PolicyCommitmentEntry>,
    pub merkle_proofs: Option<HashMap<String, MerkleProof>>,
    pub external_anchor: Option<Vec<u8>>,
}

/// The outcome of `verify_bundle`: an overall verdict plus each sub-check,
/// so a caller can see exactly what failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleVerification {
    pub valid: bool,
    pub integrity_check: bool,
    pub chain_verification: bool,
    pub merkle_verification: bool,
    pub policy_verification: bool,
    pub errors: Vec<String>,
}

/// Builds and verifies `ComplianceProofBundle`s. Building touches the live
/// ledger and policy compiler; verifying never does.
pub struct VerificationApi<'a> {
    ledger: &'a AuditLedger,
    pac: &'a PolicyCompiler,
}

impl<'a> VerificationApi<'a> {
    pub fn new(ledger: &'a AuditLedger, pac: &'a PolicyCompiler) -> Self {
        Self { ledger, pac }
    }

    async fn dereference_policy_commitments(
        &self,
        records: &[AuditRecord],
    ) -> HashMap<String, PolicyCommitmentEntry> {
        let mut commitments = HashMap::new();
        for record in records {
            let Some(hash) = &record.policy_commitment else { continue };
            if commitments.contains_key(hash) {
                continue;
            }
            let entry = match self.pac.find_by_commitment(hash).await {
                Some(policy) => PolicyCommitmentEntry {
                    policy_id: Some(policy.policy_id),
                    canonical_form: Some(policy.canonical_form),
                    commitment_hash: hash.clone(),
                },
                None => PolicyCommitmentEntry { policy_id: None, canonical_form: None, commitment_hash: hash.clone() },
            };
            commitments.insert(hash.clone(), entry);
        }
        commitments
    }

    async fn merkle_proofs_for(&self, records: &[AuditRecord]) -> HashMap<String, MerkleProof> {
        let mut proofs = HashMap::new();
        for record in records {
            if let Some(proof) = self.ledger.generate_inclusion_proof(&record.record_id).await {
                proofs.insert(record.record_id.clone(), proof);
            }
        }
        proofs
    }

    /// Fails with `NotFound` if `record_id` is unknown.
    pub async fn create_single_record_bundle(
        &self,
        record_id: &str,
        include_merkle_proof: bool,
        external_anchor: Option<Vec<u8>>,
    ) -> CaasResult<ComplianceProofBundle> {
        let record = self.ledger.get(record_id).await?;
        let records = vec![record];
        let policy_commitments = self.dereference_policy_commitments(&records).await;
        let merkle_proofs = if include_merkle_proof {
            Some(self.merkle_proofs_for(&records).await)
        } else {
            None
        };

        Ok(ComplianceProofBundle {
            bundle_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            bundle_type: BundleType::Single,
            records,
            policy_commitments,
            merkle_proofs,
            external_anchor,
        })
    }

    /// Preserves the order of `record_ids`. Fails with `NotFound` if any id
    /// is unknown.
    pub async fn create_batch_bundle(
        &self,
        record_ids: &[String],
        external_anchor: Option<Vec<u8>>,
    ) -> CaasResult<ComplianceProofBundle> {
        let mut records = Vec::with_capacity(record_ids.len());
        for id in record_ids {
            records.push(self.ledger.get(id).await?);
        }
        let policy_commitments = self.dereference_policy_commitments(&records).await;
        let merkle_proofs = Some(self.merkle_proofs_for(&records).await);

        Ok(ComplianceProofBundle {
            bundle_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            bundle_type: BundleType::Batch,
            records,
            policy_commitments,
            merkle_proofs,
            external_anchor,
        })
    }

    /// Inclusive-exclusive `[from, to)` over record timestamps, optionally
    /// filtered to one tenant. `from`/`to` must be RFC 3339 instants.
    pub async fn create_time_range_bundle(
        &self,
        from: &str,
        to: &str,
        tenant_id: Option<&str>,
        external_anchor: Option<Vec<u8>>,
    ) -> CaasResult<ComplianceProofBundle> {
        let from = DateTime::parse_from_rfc3339(from)
            .map_err(|e| CaasError::InvalidInput(format!("`from` is not RFC 3339: {e}")))?
            .with_timezone(&Utc);
        let to = DateTime::parse_from_rfc3339(to)
            .map_err(|e| CaasError::InvalidInput(format!("`to` is not RFC 3339: {e}")))?
            .with_timezone(&Utc);

        let records: Vec<AuditRecord> = self
            .ledger
            .snapshot()
            .await
            .into_iter()
            .filter(|r| tenant_id.map(|t| r.tenant_id == t).unwrap_or(true))
            .filter(|r| {
                DateTime::parse_from_rfc3339(&r.timestamp)
                    .map(|ts| {
                        let ts = ts.with_timezone(&Utc);
                        ts >= from && ts < to
                    })
                    .unwrap_or(false)
            })
            .collect();

        let policy_commitments = self.dereference_policy_commitments(&records).await;
        let merkle_proofs = Some(self.merkle_proofs_for(&records).await);

        Ok(ComplianceProofBundle {
            bundle_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            bundle_type: BundleType::TimeRange,
            records,
            policy_commitments,
            merkle_proofs,
            external_anchor,
        })
    }

    /// All records for `tenant_id` in ledger order, or — when `limit` is
    /// given — the most recent `limit` records, most recent first.
    pub async fn create_tenant_bundle(
        &self,
        tenant_id: &str,
        limit: Option<usize>,
        external_anchor: Option<Vec<u8>>,
    ) -> CaasResult<ComplianceProofBundle> {
        let mut records: Vec<AuditRecord> =
            self.ledger.snapshot().await.into_iter().filter(|r| r.tenant_id == tenant_id).collect();

        if let Some(limit) = limit {
            let tail_start = records.len().saturating_sub(limit);
            records = records.split_off(tail_start);
            records.reverse();
        }

        let policy_commitments = self.dereference_policy_commitments(&records).await;
        let merkle_proofs = Some(self.merkle_proofs_for(&records).await);

        Ok(ComplianceProofBundle {
            bundle_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            bundle_type: BundleType::Tenant,
            records,
            policy_commitments,
            merkle_proofs,
            external_anchor,
        })
    }
}

/// Verifies a bundle with no access to the live ledger: recomputes every
/// record hash, re-checks chain links between embedded records that were
/// truly adjacent in the original ledger, re-walks every attached Merkle
/// proof, and recomputes every referenced policy commitment. Pure — never
/// mutates anything and never panics on a malformed bundle; a failure is
/// reported in `errors`, not as a thrown error.
pub fn verify_bundle(bundle: &ComplianceProofBundle) -> BundleVerification {
    let mut errors = Vec::new();

    let mut integrity_check = true;
    for record in &bundle.records {
        if record.compute_hash() != record.record_hash {
            integrity_check = false;
            errors.push(format!("record {}: recomputed hash does not match record_hash", record.record_id));
        }
    }

    let mut chain_verification = true;
    for pair in bundle.records.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        let truly_adjacent = curr.sequence == prev.sequence + 1;
        if truly_adjacent && curr.previous_hash != prev.record_hash {
            chain_verification = false;
            errors.push(format!(
                "record {}: previous_hash does not match preceding record {}'s record_hash",
                curr.record_id, prev.record_id
            ));
        }
    }

    let mut merkle_verification = true;
    if let Some(proofs) = &bundle.merkle_proofs {
        for record in &bundle.records {
            if let Some(proof) = proofs.get(&record.record_id) {
                if proof.leaf_hash != record.record_hash || !proof.verify() {
                    merkle_verification = false;
                    errors.push(format!("record {}: merkle proof failed to verify", record.record_id));
                }
            }
        }
    }

    let mut policy_verification = true;
    for record in &bundle.records {
        let Some(commitment) = &record.policy_commitment else { continue };
        match bundle.policy_commitments.get(commitment).and_then(|e| e.canonical_form.as_ref()) {
            Some(canonical_form) => {
                if caas_enc::sha256_hex(canonical_form) != *commitment {
                    policy_verification = false;
                    errors.push(format!("record {}: policy commitment hash mismatch", record.record_id));
                }
            }
            None => {
                policy_verification = false;
                errors.push(format!("record {}: policy commitment could not be resolved", record.record_id));
            }
        }
    }

    let valid = integrity_check && chain_verification && merkle_verification && policy_verification;
    if !valid {
        warn!(bundle_id = %bundle.bundle_id, ?errors, "bundle failed verification");
    }

    BundleVerification { valid, integrity_check, chain_verification, merkle_verification, policy_verification, errors }
}
