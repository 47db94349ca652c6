//! Typed errors for the handful of failure kinds the caller must branch on.
//!
//! Everything else in the crate returns `anyhow::Result` and leans on
//! `.context()` chains; these variants exist only where §7 of the build
//! contract requires telling two failure kinds apart programmatically.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("signature verifier binary not found")]
    VerifierMissing,

    #[error("signature verification failed for {name}")]
    VerificationFailed { name: String },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("filesystem merge conflict at {path}")]
    MergeConflict { path: String },

    #[error("container runtime {stage} failed (status {status:?})")]
    RuntimeFailed {
        stage: &'static str,
        status: Option<i32>,
    },
}
