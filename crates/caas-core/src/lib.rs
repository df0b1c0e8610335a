//! Compliance-as-a-Service audit substrate.
//!
//! Events flow: an interceptor (CEI) buffers and fans out incoming
//! `ComplianceEvent`s; an adaptive pipeline (AAP) picks a fidelity level per
//! event and appends a correspondingly populated `AuditRecord` to the
//! hash-chained ledger (CAL); policies are canonicalized and commitment-hashed
//! ahead of time by the policy compiler (PAC); and the verification API
//! (ZCVI) builds self-contained proof bundles from ledger state and verifies
//! them with no further ledger access.

mod error;
mod interceptor;
mod ledger;
mod model;
mod pipeline;
mod policy;
mod verify;

pub use error::{CaasError, CaasResult};
pub use interceptor::{EventFilter, EventInterceptor, Handler, InterceptorConfig};
pub use ledger::{AuditLedger, LedgerConfig, MerkleProof};
pub use model::{
    AuditRecord, CanonicalPolicy, ComplianceEvent, Criticality, Effect, EventType, Fidelity,
    Policy, PolicyStatement,
};
pub use pipeline::{AdaptivePipeline, PipelineConfig, ProcessedEvent};
pub use policy::PolicyCompiler;
pub use verify::{
    verify_bundle, BundleType, BundleVerification, ComplianceProofBundle, PolicyCommitmentEntry,
    VerificationApi,
};
