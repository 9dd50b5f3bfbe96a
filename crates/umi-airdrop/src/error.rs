#![forbid(unsafe_code)]

use crate::attempt::ClaimPhase;
use crate::backend::PendingClaimConflict;

/// Terminal outcome of a failed claim.
///
/// Every collaborator failure is mapped to exactly one of these at the coordinator boundary.
/// Pending-claim conflicts never appear here: the coordinator resolves the first one itself and
/// reports a recurrence as [`ClaimError::ClaimFailed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// Token, wallet address or signer missing; nothing was sent anywhere.
    #[error("not ready: {0}")]
    NotReady(String),
    #[error("invalid voucher: {0}")]
    InvalidVoucher(String),
    /// The wallet (or its user) declined the transaction. The nonce has been released.
    #[error("transaction rejected by wallet (nonce {nonce})")]
    UserRejected { nonce: String },
    /// Non-retryable backend or chain failure; `reason` is passed through verbatim.
    #[error("claim failed while {phase}: {reason}")]
    ClaimFailed { phase: ClaimPhase, reason: String },
    #[error("confirmation for nonce {nonce} still pending after {attempts} attempts")]
    ConfirmationTimedOut { nonce: String, attempts: u32 },
}

impl ClaimError {
    pub fn failed(phase: ClaimPhase, reason: impl Into<String>) -> Self {
        Self::ClaimFailed {
            phase,
            reason: reason.into(),
        }
    }

    /// Terminal phase a run ends in when it fails with this error.
    pub fn terminal_phase(&self) -> ClaimPhase {
        match self {
            ClaimError::UserRejected { .. } => ClaimPhase::Cancelled,
            _ => ClaimPhase::Failed,
        }
    }
}

/// Errors from the backend claim service adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    /// Non-success HTTP status; `message` is the server's `error`/`message` text when present.
    #[error("http status {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("claim already pending")]
    PendingClaim(PendingClaimConflict),
}

impl BackendError {
    /// Human-readable reason suitable for surfacing to the user verbatim.
    pub fn reason(&self) -> String {
        match self {
            BackendError::HttpStatus { status, message } => {
                if message.is_empty() {
                    format!("http status {status}")
                } else {
                    message.clone()
                }
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// User or wallet declined to sign/send.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("signer unavailable: {0}")]
    Unavailable(String),
    #[error("invalid call arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("balance unavailable: {0}")]
    Unavailable(String),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}
