//! Wallet capability that turns a voucher into an on-chain `claim` call.
#![forbid(unsafe_code)]

use crate::error::SignerError;
use crate::voucher::VoucherArgs;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Opaque transaction identifier returned by the wallet (a tx hash for EVM wallets).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Submits `claim(args, signature)` to the distributor contract.
    ///
    /// May wait on user interaction; a declined prompt is [`SignerError::Rejected`].
    async fn submit_claim(
        &self,
        args: &VoucherArgs,
        signature: &str,
    ) -> Result<TransactionId, SignerError>;
}

/// How [`MockWalletSigner`] answers submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockSignerBehavior {
    /// Accept and return a deterministic tx id.
    Approve,
    /// Accept and return this exact tx id.
    ApproveWith(String),
    Reject,
    Fail(String),
}

/// Recorded `submit_claim` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedClaim {
    pub args: VoucherArgs,
    pub signature: String,
}

/// In-memory wallet for tests and dry runs.
#[derive(Debug)]
pub struct MockWalletSigner {
    behavior: Mutex<MockSignerBehavior>,
    submitted: Mutex<Vec<SubmittedClaim>>,
}

impl MockWalletSigner {
    pub fn new(behavior: MockSignerBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: MockSignerBehavior) {
        *self.behavior.lock().expect("mutex poisoned") = behavior;
    }

    pub fn submitted(&self) -> Vec<SubmittedClaim> {
        self.submitted.lock().expect("mutex poisoned").clone()
    }

    /// Deterministic tx hash: `0x` + blake3(args || signature).
    pub fn make_tx_id(args: &VoucherArgs, signature: &str) -> TransactionId {
        let mut h = blake3::Hasher::new();
        for part in args.as_slice() {
            h.update(part.as_bytes());
            h.update(&[0u8]);
        }
        h.update(signature.as_bytes());
        TransactionId(format!("0x{}", hex::encode(h.finalize().as_bytes())))
    }
}

impl Default for MockWalletSigner {
    fn default() -> Self {
        Self::new(MockSignerBehavior::Approve)
    }
}

#[async_trait]
impl WalletSigner for MockWalletSigner {
    async fn submit_claim(
        &self,
        args: &VoucherArgs,
        signature: &str,
    ) -> Result<TransactionId, SignerError> {
        let behavior = self.behavior.lock().expect("mutex poisoned").clone();
        match behavior {
            MockSignerBehavior::Reject => {
                return Err(SignerError::Rejected("user rejected transaction".to_string()))
            }
            MockSignerBehavior::Fail(msg) => return Err(SignerError::Failed(msg)),
            MockSignerBehavior::Approve | MockSignerBehavior::ApproveWith(_) => {}
        }

        self.submitted
            .lock()
            .expect("mutex poisoned")
            .push(SubmittedClaim {
                args: args.clone(),
                signature: signature.to_string(),
            });

        Ok(match behavior {
            MockSignerBehavior::ApproveWith(tx) => TransactionId(tx),
            _ => Self::make_tx_id(args, signature),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> VoucherArgs {
        VoucherArgs([
            "0xabc".to_string(),
            "1".to_string(),
            "7".to_string(),
            "1999999999".to_string(),
        ])
    }

    #[tokio::test]
    async fn approve_records_submission_with_stable_tx_id() {
        let signer = MockWalletSigner::default();
        let tx1 = signer.submit_claim(&args(), "0xsig").await.unwrap();
        let tx2 = MockWalletSigner::make_tx_id(&args(), "0xsig");
        assert_eq!(tx1, tx2);
        assert!(tx1.as_str().starts_with("0x"));
        assert_eq!(tx1.as_str().len(), 2 + 64);
        assert_eq!(signer.submitted().len(), 1);
    }

    #[tokio::test]
    async fn reject_and_fail_record_nothing() {
        let signer = MockWalletSigner::new(MockSignerBehavior::Reject);
        assert!(matches!(
            signer.submit_claim(&args(), "0xsig").await,
            Err(SignerError::Rejected(_))
        ));
        signer.set_behavior(MockSignerBehavior::Fail("insufficient gas".to_string()));
        assert_eq!(
            signer.submit_claim(&args(), "0xsig").await,
            Err(SignerError::Failed("insufficient gas".to_string()))
        );
        assert!(signer.submitted().is_empty());
    }
}
