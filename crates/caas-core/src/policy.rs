//! Policy Compiler (PAC): canonicalizes policies and binds a commitment
//! hash to them.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CaasError, CaasResult};
use crate::model::{CanonicalPolicy, Policy};

struct PolicyStore {
    /// Latest compiled form per `policy_id`. A later compile of the same id
    /// overwrites the stored entry even if the version string repeats or
    /// regresses — see `versions` for the full compile history.
    latest: HashMap<String, CanonicalPolicy>,
    /// Version strings in compile order, duplicates permitted.
    versions: HashMap<String, Vec<String>>,
}

/// Compiles policies into their canonical, commitment-hashed form and
/// retains every version ever compiled for a given `policy_id`.
///
/// `get` always returns the latest compile for an id, regardless of
/// version — this implementation keys storage by `policy_id` alone, the
/// looser of the two designs the spec allows (the stricter
/// `(policy_id, version)` keying is not used here; see `DESIGN.md`).
pub struct PolicyCompiler {
    store: RwLock<PolicyStore>,
}

impl Default for PolicyCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyCompiler {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(PolicyStore { latest: HashMap::new(), versions: HashMap::new() }),
        }
    }

    /// Compiles `policy` into canonical form and stores it, overwriting any
    /// prior compile of the same `policy_id`. Fails only on a malformed
    /// policy (missing `policy_id`/`version`/`statements`).
    pub async fn compile(&self, policy: Policy) -> CaasResult<CanonicalPolicy> {
        policy.validate()?;

        let canonical_form = policy.canonical_value().to_canonical_bytes();
        let commitment_hash = caas_enc::sha256_hex(&canonical_form);

        let compiled = CanonicalPolicy {
            policy_id: policy.policy_id.clone(),
            version: policy.version.clone(),
            canonical_form,
            commitment_hash,
            created_at: Utc::now(),
            policy,
        };

        let mut store = self.store.write().await;
        store
            .versions
            .entry(compiled.policy_id.clone())
            .or_default()
            .push(compiled.version.clone());
        debug!(policy_id = %compiled.policy_id, version = %compiled.version, hash = %compiled.commitment_hash, "compiled policy");
        store.latest.insert(compiled.policy_id.clone(), compiled.clone());

        Ok(compiled)
    }

    /// Returns the most recently compiled form for `policy_id`.
    pub async fn get(&self, policy_id: &str) -> CaasResult<CanonicalPolicy> {
        self.store
            .read()
            .await
            .latest
            .get(policy_id)
            .cloned()
            .ok_or_else(|| CaasError::NotFound(format!("policy {policy_id}")))
    }

    /// Version strings compiled for `policy_id`, in compile order.
    pub async fn versions(&self, policy_id: &str) -> Vec<String> {
        self.store.read().await.versions.get(policy_id).cloned().unwrap_or_default()
    }

    /// True iff a policy is stored for `policy_id` and its commitment hash
    /// equals `claimed_hash`.
    pub async fn verify_commitment(&self, policy_id: &str, claimed_hash: &str) -> bool {
        self.store
            .read()
            .await
            .latest
            .get(policy_id)
            .map(|p| p.commitment_hash == claimed_hash)
            .unwrap_or(false)
    }

    /// Finds the stored `CanonicalPolicy` (across all policy ids) whose
    /// commitment hash equals `hash`. Used by the verification API to
    /// dereference an `AuditRecord.policy_commitment` hash back to the
    /// canonical policy body it binds, since records carry only the hash,
    /// not the originating `policy_id`.
    pub async fn find_by_commitment(&self, hash: &str) -> Option<CanonicalPolicy> {
        self.store.read().await.latest.values().find(|p| p.commitment_hash == hash).cloned()
    }
}
