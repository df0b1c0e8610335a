//! Error types for the compliance audit substrate.

use thiserror::Error;

/// Flat error enum shared across the PAC, CAL, AAP, CEI, and ZCVI boundary.
/// Verification operations never construct one of these — a failed check is
/// reported as `false` or as an entry in a result struct's `errors` list,
/// never as an `Err`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaasError {
    /// A record, policy, or batch was asked for by an id that does not
    /// exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A policy or event was malformed at the boundary (missing a required
    /// field). The core rejects before mutating any state.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type CaasResult<T> = Result<T, CaasError>;
