//! Client-visible claim state machine and the transient per-run attempt record.
#![forbid(unsafe_code)]

use crate::voucher::ClaimVoucher;
use serde::Serialize;
use std::fmt;

/// Phase of one `claim()` run.
///
/// ```text
/// Idle -> Requesting -> (ConflictResolving -> Requesting)? -> AwaitingSignature
///      -> Confirming -> Settled | Failed | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPhase {
    Idle,
    Requesting,
    ConflictResolving,
    AwaitingSignature,
    Confirming,
    Settled,
    Failed,
    Cancelled,
}

impl ClaimPhase {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ClaimPhase::Settled | ClaimPhase::Failed | ClaimPhase::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ClaimPhase) -> bool {
        use ClaimPhase::*;
        match (self, next) {
            (Idle, Requesting) => true,
            (Requesting, ConflictResolving | AwaitingSignature | Failed) => true,
            (ConflictResolving, Requesting | Failed) => true,
            (AwaitingSignature, Confirming | Failed | Cancelled) => true,
            (Confirming, Settled | Failed) => true,
            _ => false,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ClaimPhase::Idle => "idle",
            ClaimPhase::Requesting => "requesting voucher",
            ClaimPhase::ConflictResolving => "cancelling pending claim",
            ClaimPhase::AwaitingSignature => "awaiting wallet signature",
            ClaimPhase::Confirming => "confirming claim",
            ClaimPhase::Settled => "settled",
            ClaimPhase::Failed => "failed",
            ClaimPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClaimAttemptStatus {
    Requesting,
    PendingConfirmation,
    Confirmed,
    Failed,
    Cancelled,
}

/// In-memory record of one coordination run. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimAttempt {
    pub voucher: ClaimVoucher,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub status: ClaimAttemptStatus,
}

impl ClaimAttempt {
    pub fn new(voucher: ClaimVoucher, signature: String) -> Self {
        Self {
            voucher,
            signature,
            transaction_id: None,
            status: ClaimAttemptStatus::Requesting,
        }
    }

    pub fn nonce(&self) -> &str {
        &self.voucher.nonce
    }

    pub fn mark_submitted(&mut self, transaction_id: String) {
        self.transaction_id = Some(transaction_id);
        self.status = ClaimAttemptStatus::PendingConfirmation;
    }

    pub fn finish(&mut self, phase: ClaimPhase) {
        self.status = match phase {
            ClaimPhase::Settled => ClaimAttemptStatus::Confirmed,
            ClaimPhase::Cancelled => ClaimAttemptStatus::Cancelled,
            _ => ClaimAttemptStatus::Failed,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ClaimPhase; 8] = [
        ClaimPhase::Idle,
        ClaimPhase::Requesting,
        ClaimPhase::ConflictResolving,
        ClaimPhase::AwaitingSignature,
        ClaimPhase::Confirming,
        ClaimPhase::Settled,
        ClaimPhase::Failed,
        ClaimPhase::Cancelled,
    ];

    #[test]
    fn terminal_phases_have_no_successors() {
        for from in ALL.into_iter().filter(|p| p.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn idle_only_leads_to_requesting() {
        let next: Vec<_> = ALL
            .into_iter()
            .filter(|p| ClaimPhase::Idle.can_transition_to(*p))
            .collect();
        assert_eq!(next, vec![ClaimPhase::Requesting]);
    }

    #[test]
    fn cancelled_only_reachable_from_signature() {
        for from in ALL {
            assert_eq!(
                from.can_transition_to(ClaimPhase::Cancelled),
                from == ClaimPhase::AwaitingSignature
            );
        }
    }

    #[test]
    fn attempt_status_follows_submission_and_outcome() {
        let voucher = ClaimVoucher {
            to: "0xabc".to_string(),
            amount: "1".to_string(),
            nonce: "7".to_string(),
            deadline: "1999999999".to_string(),
        };
        let mut attempt = ClaimAttempt::new(voucher, "0xsig".to_string());
        assert_eq!(attempt.status, ClaimAttemptStatus::Requesting);

        attempt.mark_submitted("0xtx".to_string());
        assert_eq!(attempt.status, ClaimAttemptStatus::PendingConfirmation);
        assert_eq!(attempt.transaction_id.as_deref(), Some("0xtx"));

        attempt.finish(ClaimPhase::Settled);
        assert_eq!(attempt.status, ClaimAttemptStatus::Confirmed);
    }
}
