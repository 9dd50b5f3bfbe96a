use umi_airdrop::{ClaimAttempt, ClaimError, ClaimObserver, ClaimPhase, ClaimResult};

/// User-facing line for a phase, if the phase warrants one.
pub fn phase_notice(phase: ClaimPhase) -> Option<&'static str> {
    match phase {
        ClaimPhase::Requesting => Some("Requesting a claim voucher..."),
        ClaimPhase::ConflictResolving => Some("Cancelling the previous pending claim..."),
        ClaimPhase::AwaitingSignature => Some("Confirm the claim transaction in your wallet..."),
        ClaimPhase::Confirming => Some("Waiting for the claim to settle..."),
        _ => None,
    }
}

pub fn outcome_notice(result: &Result<ClaimResult, ClaimError>) -> String {
    match result {
        Ok(r) => match &r.new_balance {
            Some(balance) => format!(
                "Claimed {} (tx {}). Balance: {balance}",
                r.amount, r.transaction_id
            ),
            None => format!("Claimed {} (tx {}).", r.amount, r.transaction_id),
        },
        Err(ClaimError::UserRejected { .. }) => "Claim cancelled in wallet.".to_string(),
        Err(ClaimError::ConfirmationTimedOut { .. }) => {
            "Claim submitted but not yet confirmed; check again later.".to_string()
        }
        Err(e) => format!("Claim failed: {e}"),
    }
}

/// Prints transient claim progress to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl ClaimObserver for ConsoleNotifier {
    fn on_phase(&self, phase: ClaimPhase, attempt: Option<&ClaimAttempt>) {
        if phase == ClaimPhase::Confirming {
            if let Some(tx) = attempt.and_then(|a| a.transaction_id.as_deref()) {
                eprintln!("Transaction sent: {tx}");
            }
        }
        if let Some(line) = phase_notice(phase) {
            eprintln!("{line}");
        }
    }

    fn on_finished(&self, result: &Result<ClaimResult, ClaimError>) {
        eprintln!("{}", outcome_notice(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umi_airdrop::TransactionId;

    #[test]
    fn only_working_phases_have_notices() {
        assert!(phase_notice(ClaimPhase::Idle).is_none());
        assert!(phase_notice(ClaimPhase::Settled).is_none());
        assert!(phase_notice(ClaimPhase::AwaitingSignature).is_some());
    }

    #[test]
    fn outcome_notices() {
        let ok = Ok(ClaimResult {
            amount: "500".to_string(),
            nonce: "7".to_string(),
            transaction_id: TransactionId("0xtx".to_string()),
            new_balance: Some("0.5".to_string()),
        });
        assert_eq!(outcome_notice(&ok), "Claimed 500 (tx 0xtx). Balance: 0.5");

        let rejected = Err(ClaimError::UserRejected {
            nonce: "7".to_string(),
        });
        assert_eq!(outcome_notice(&rejected), "Claim cancelled in wallet.");
    }
}
