//! Backend claim service contract.
//!
//! The backend owns the "one outstanding voucher per user" record. Transports implement
//! [`ClaimBackend`]; the coordinator never looks at HTTP details, only at the structured results
//! defined here.
#![forbid(unsafe_code)]

pub mod mock_backend;

#[cfg(feature = "http")]
pub mod http_client;

use crate::error::BackendError;
use crate::voucher::IssuedVoucher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Legacy free-text marker the backend puts at the start of its conflict error message.
pub const CLAIM_PENDING_PREFIX: &str = "Claim already pending";

/// Structured error code for the same condition, preferred when the backend sends one.
pub const CLAIM_PENDING_CODE: &str = "CLAIM_PENDING";

/// "A voucher for this user already exists and has not settled."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClaimConflict {
    /// Nonce of the outstanding voucher, if the backend disclosed it.
    pub nonce: Option<String>,
    /// Server message, verbatim.
    pub message: String,
}

/// Server verdict on a confirm call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Settled,
    /// Transaction not yet observed; ask again later.
    Pending,
    /// Anything else. Carries the server-provided reason.
    Rejected(String),
}

#[async_trait]
pub trait ClaimBackend: Send + Sync {
    /// `POST /airdrop/request`. A pending conflict is reported as [`BackendError::PendingClaim`].
    async fn request_voucher(&self, user_token: &str) -> Result<IssuedVoucher, BackendError>;

    /// `POST /airdrop/cancel`: invalidate `nonce` so a new voucher can be issued.
    async fn cancel(&self, user_token: &str, nonce: &str) -> Result<(), BackendError>;

    /// `POST /airdrop/confirm`: report the on-chain transaction for `nonce`.
    async fn confirm(
        &self,
        user_token: &str,
        nonce: &str,
        transaction_id: &str,
    ) -> Result<ConfirmOutcome, BackendError>;
}

/// Error body shape shared by all airdrop endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub pending: Option<PendingRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PendingRef {
    #[serde(default, deserialize_with = "de_nonce_opt")]
    pub nonce: Option<String>,
}

impl ErrorBody {
    pub(crate) fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    /// `error`, then `message`, then empty.
    pub(crate) fn reason(&self) -> String {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .map(str::trim)
            .unwrap_or("")
            .to_string()
    }

    /// Recognises a pending-claim conflict: structured code first, message prefix as fallback.
    pub(crate) fn pending_conflict(&self) -> Option<PendingClaimConflict> {
        let reason = self.reason();
        let by_code = self
            .code
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(CLAIM_PENDING_CODE));
        let by_prefix = reason.starts_with(CLAIM_PENDING_PREFIX);
        if !by_code && !by_prefix {
            return None;
        }
        Some(PendingClaimConflict {
            nonce: self
                .pending
                .as_ref()
                .and_then(|p| p.nonce.clone())
                .filter(|n| !n.trim().is_empty()),
            message: reason,
        })
    }
}

fn de_nonce_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_detected_by_message_prefix() {
        let body = ErrorBody::parse(
            r#"{"error":"Claim already pending for this user","pending":{"nonce":"41"}}"#,
        );
        let conflict = body.pending_conflict().unwrap();
        assert_eq!(conflict.nonce.as_deref(), Some("41"));
        assert_eq!(conflict.message, "Claim already pending for this user");
    }

    #[test]
    fn conflict_detected_by_structured_code_with_numeric_nonce() {
        let body = ErrorBody::parse(
            r#"{"code":"CLAIM_PENDING","message":"outstanding voucher","pending":{"nonce":41}}"#,
        );
        let conflict = body.pending_conflict().unwrap();
        assert_eq!(conflict.nonce.as_deref(), Some("41"));
    }

    #[test]
    fn conflict_without_nonce_is_still_a_conflict() {
        let conflict = ErrorBody::parse(r#"{"error":"Claim already pending"}"#)
            .pending_conflict()
            .unwrap();
        assert_eq!(conflict.nonce, None);
    }

    #[test]
    fn other_errors_are_not_conflicts() {
        assert!(ErrorBody::parse(r#"{"error":"Not eligible"}"#)
            .pending_conflict()
            .is_none());
        assert!(ErrorBody::parse("<html>bad gateway</html>")
            .pending_conflict()
            .is_none());
    }

    #[test]
    fn reason_prefers_error_over_message() {
        let body = ErrorBody::parse(r#"{"error":"a","message":"b"}"#);
        assert_eq!(body.reason(), "a");
        let body = ErrorBody::parse(r#"{"message":"b"}"#);
        assert_eq!(body.reason(), "b");
        assert_eq!(ErrorBody::parse("").reason(), "");
    }
}
