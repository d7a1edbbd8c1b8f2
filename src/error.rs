//! Controller-side error taxonomy.
//!
//! Services return these; the web layer maps each kind to an HTTP status.

use crate::domain::{CheckStatus, CheckType};
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: bad check type, bad target, empty ids.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The addressed entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Missing or invalid bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// The queue was empty within the pop window. A control signal, not a
    /// failure; surfaces as 204 at the HTTP boundary.
    #[error("no tasks available")]
    NoTasks,

    /// No online agents to fan a check out to.
    #[error("no online agents available")]
    NoOnlineAgents,

    /// The agent lacks the capability for the task it popped.
    #[error("agent does not support check type: {0}")]
    CapabilityMismatch(CheckType),

    /// A check status change that violates the state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: CheckStatus, to: CheckStatus },

    /// Caller should retry later.
    #[error("temporarily unavailable: {0}")]
    Transient(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Short machine-readable code used in API error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_failed",
            Error::NotFound { .. } => "not_found",
            Error::Unauthorized => "unauthorized",
            Error::NoTasks => "no_tasks",
            Error::NoOnlineAgents => "no_online_agents",
            Error::CapabilityMismatch(_) => "capability_mismatch",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Transient(_) => "temporarily_unavailable",
            Error::Store(_) | Error::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
