//! ---
//! ring_section: "01-core-runtime"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Shared primitives and utilities for the netring runtime."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use thiserror::Error;

/// Error kinds distinguished across the control plane.
///
/// The classification drives retry behaviour: `Transient` failures are logged
/// and retried on the next task cycle, `NotFound`/`Gone` flag a membership
/// state disagreement that requires re-registration, and `Fatal` aborts the
/// process during startup.
#[derive(Debug, Error)]
pub enum RingError {
    /// Malformed request or configuration; surfaced to the caller, never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The referenced member record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The referenced member record exists but was deregistered.
    #[error("gone: {0}")]
    Gone(String),
    /// Network timeout, unreachable peer, or temporarily unavailable store.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Unrecoverable condition (config parse failure, port bind failure).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl RingError {
    /// Whether the caller should retry on its next natural cycle.
    pub fn is_retriable(&self) -> bool {
        matches!(self, RingError::Transient(_))
    }

    /// Whether the member must re-register before retrying the operation.
    pub fn requires_reregistration(&self) -> bool {
        matches!(self, RingError::NotFound(_) | RingError::Gone(_))
    }
}
