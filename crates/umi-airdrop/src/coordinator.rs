//! Voucher claim coordination: request, (re)issue, submit, confirm, refresh.
//!
//! One [`VoucherClaimCoordinator::claim`] call is one strictly sequential run. The only retry
//! paths are a single cancel-and-retry on a pending-claim conflict and confirmation polling while
//! the backend reports the transaction as pending. Everything else fails the run.
#![forbid(unsafe_code)]

use crate::attempt::{ClaimAttempt, ClaimPhase};
use crate::backend::{ClaimBackend, ConfirmOutcome};
use crate::balance::BalanceReader;
use crate::error::{BackendError, ClaimError, SignerError};
use crate::signer::{TransactionId, WalletSigner};
use crate::voucher::{IssuedVoucher, VoucherGrant};
use serde::{Deserialize, Serialize};
use std::cmp;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Confirmation polling bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPolicy {
    /// Delay between confirm calls while the backend answers "pending" (floored at
    /// [`MIN_CONFIRM_INTERVAL_MS`]).
    #[serde(default = "default_confirm_interval_ms")]
    pub confirm_interval_ms: u64,
    /// Maximum number of confirm calls per run (values below 1 are treated as 1).
    #[serde(default = "default_max_confirm_attempts")]
    pub max_confirm_attempts: u32,
    /// Optional wall-clock bound on the whole confirmation phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_timeout_ms: Option<u64>,
}

/// Lower bound on the confirm polling delay.
pub const MIN_CONFIRM_INTERVAL_MS: u64 = 100;

fn default_confirm_interval_ms() -> u64 {
    5_000
}

fn default_max_confirm_attempts() -> u32 {
    60
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            confirm_interval_ms: default_confirm_interval_ms(),
            max_confirm_attempts: default_max_confirm_attempts(),
            confirm_timeout_ms: None,
        }
    }
}

impl ClaimPolicy {
    pub fn confirm_interval(&self) -> Duration {
        Duration::from_millis(cmp::max(MIN_CONFIRM_INTERVAL_MS, self.confirm_interval_ms))
    }

    pub fn confirm_timeout(&self) -> Option<Duration> {
        self.confirm_timeout_ms.map(Duration::from_millis)
    }
}

/// A settled claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResult {
    /// Amount the backend reports as claimed, in base units.
    pub amount: String,
    pub nonce: String,
    pub transaction_id: TransactionId,
    /// Balance after settlement, if the balance reader answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<String>,
}

/// Receives phase transitions for transient user notifications.
pub trait ClaimObserver: Send + Sync {
    /// `attempt` is present once a voucher has been issued. From `Confirming` on it carries the
    /// transaction id, and on a terminal phase its status is final.
    fn on_phase(&self, _phase: ClaimPhase, _attempt: Option<&ClaimAttempt>) {}

    fn on_finished(&self, _result: &Result<ClaimResult, ClaimError>) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ClaimObserver for NoopObserver {}

/// Tracks the current phase and attempt of one run and reports every transition.
struct PhaseTracker<'a> {
    phase: ClaimPhase,
    attempt: Option<ClaimAttempt>,
    observer: &'a dyn ClaimObserver,
}

impl<'a> PhaseTracker<'a> {
    fn new(observer: &'a dyn ClaimObserver) -> Self {
        Self {
            phase: ClaimPhase::Idle,
            attempt: None,
            observer,
        }
    }

    fn track(&mut self, attempt: ClaimAttempt) {
        self.attempt = Some(attempt);
    }

    fn mark_submitted(&mut self, tx_id: &TransactionId) {
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.mark_submitted(tx_id.0.clone());
        }
    }

    fn enter(&mut self, next: ClaimPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal claim transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(from = %self.phase, to = %next, "claim phase");
        self.phase = next;
        if next.is_terminal() {
            if let Some(attempt) = self.attempt.as_mut() {
                attempt.finish(next);
            }
        }
        self.observer.on_phase(next, self.attempt.as_ref());
    }
}

#[derive(Clone)]
pub struct VoucherClaimCoordinator {
    backend: Arc<dyn ClaimBackend>,
    signer: Option<Arc<dyn WalletSigner>>,
    balances: Option<Arc<dyn BalanceReader>>,
    observer: Arc<dyn ClaimObserver>,
    policy: ClaimPolicy,
}

impl VoucherClaimCoordinator {
    pub fn new(backend: Arc<dyn ClaimBackend>, policy: ClaimPolicy) -> Self {
        Self {
            backend,
            signer: None,
            balances: None,
            observer: Arc::new(NoopObserver),
            policy,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn WalletSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_balance_reader(mut self, balances: Arc<dyn BalanceReader>) -> Self {
        self.balances = Some(balances);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ClaimObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn policy(&self) -> &ClaimPolicy {
        &self.policy
    }

    /// Runs one claim for `user_token`, paying out to `wallet_address`.
    ///
    /// Fails with [`ClaimError::NotReady`] before any network call when the token or address is
    /// blank or no signer is attached. Callers serialize runs per user (see
    /// [`ClaimControl`](crate::control::ClaimControl)).
    pub async fn claim(
        &self,
        user_token: &str,
        wallet_address: &str,
    ) -> Result<ClaimResult, ClaimError> {
        let result = self.run(user_token.trim(), wallet_address.trim()).await;
        match &result {
            Ok(r) => info!(
                nonce = %r.nonce,
                tx_id = %r.transaction_id,
                amount = %r.amount,
                "claim settled"
            ),
            Err(e) => warn!(error = %e, "claim did not settle"),
        }
        self.observer.on_finished(&result);
        result
    }

    async fn run(&self, user_token: &str, wallet_address: &str) -> Result<ClaimResult, ClaimError> {
        if user_token.is_empty() {
            return Err(ClaimError::NotReady("user is not signed in".to_string()));
        }
        if wallet_address.is_empty() {
            return Err(ClaimError::NotReady("wallet is not connected".to_string()));
        }
        let signer = self
            .signer
            .as_deref()
            .ok_or_else(|| ClaimError::NotReady("no wallet signer available".to_string()))?;

        let mut tracker = PhaseTracker::new(self.observer.as_ref());
        let result = self
            .drive(&mut tracker, signer, user_token, wallet_address)
            .await;
        if let Err(e) = &result {
            tracker.enter(e.terminal_phase());
        }
        result
    }

    async fn drive(
        &self,
        tracker: &mut PhaseTracker<'_>,
        signer: &dyn WalletSigner,
        user_token: &str,
        wallet_address: &str,
    ) -> Result<ClaimResult, ClaimError> {
        tracker.enter(ClaimPhase::Requesting);
        let issued = self.obtain_voucher(tracker, user_token).await?;
        let VoucherGrant {
            voucher,
            signature,
            claimed_amount,
        } = issued.validate().map_err(ClaimError::InvalidVoucher)?;

        if !voucher.to.eq_ignore_ascii_case(wallet_address) {
            warn!(
                voucher_to = %voucher.to,
                wallet = %wallet_address,
                "voucher recipient differs from connected wallet"
            );
        }

        let attempt = ClaimAttempt::new(voucher, signature);
        let nonce = attempt.nonce().to_string();
        let args = attempt.voucher.submission_args();
        let signature = attempt.signature.clone();
        info!(nonce = %nonce, amount = %attempt.voucher.amount, "voucher issued");
        tracker.track(attempt);

        tracker.enter(ClaimPhase::AwaitingSignature);
        let tx_id = match signer.submit_claim(&args, &signature).await {
            Ok(tx_id) => tx_id,
            Err(e) => {
                // Nothing reached the chain, so the nonce can be handed back.
                self.release_nonce(user_token, &nonce).await;
                return Err(match e {
                    SignerError::Rejected(_) => ClaimError::UserRejected { nonce },
                    other => ClaimError::failed(ClaimPhase::AwaitingSignature, other.to_string()),
                });
            }
        };
        tracker.mark_submitted(&tx_id);
        info!(nonce = %nonce, tx_id = %tx_id, "claim transaction submitted");

        tracker.enter(ClaimPhase::Confirming);
        self.await_settlement(user_token, &nonce, &tx_id).await?;
        tracker.enter(ClaimPhase::Settled);

        let new_balance = self.refresh_balance(user_token, wallet_address).await;
        Ok(ClaimResult {
            amount: claimed_amount,
            nonce,
            transaction_id: tx_id,
            new_balance,
        })
    }

    /// Requests a voucher, cancelling and retrying exactly once on a pending-claim conflict.
    async fn obtain_voucher(
        &self,
        tracker: &mut PhaseTracker<'_>,
        user_token: &str,
    ) -> Result<IssuedVoucher, ClaimError> {
        let mut conflict_resolved = false;
        loop {
            match self.backend.request_voucher(user_token).await {
                Ok(issued) => return Ok(issued),
                Err(BackendError::PendingClaim(conflict)) if !conflict_resolved => {
                    tracker.enter(ClaimPhase::ConflictResolving);
                    conflict_resolved = true;
                    let nonce = conflict.nonce.ok_or_else(|| {
                        ClaimError::failed(
                            ClaimPhase::ConflictResolving,
                            format!("{} (pending nonce not disclosed)", conflict.message),
                        )
                    })?;
                    warn!(nonce = %nonce, "pending claim found; cancelling before retry");
                    self.backend
                        .cancel(user_token, &nonce)
                        .await
                        .map_err(|e| ClaimError::failed(ClaimPhase::ConflictResolving, e.reason()))?;
                    tracker.enter(ClaimPhase::Requesting);
                }
                Err(BackendError::PendingClaim(conflict)) => {
                    return Err(ClaimError::failed(ClaimPhase::Requesting, conflict.message))
                }
                Err(BackendError::Decode(msg)) => return Err(ClaimError::InvalidVoucher(msg)),
                Err(e) => return Err(ClaimError::failed(ClaimPhase::Requesting, e.reason())),
            }
        }
    }

    /// Polls confirm until the backend settles, refuses, or the polling bound is hit.
    async fn await_settlement(
        &self,
        user_token: &str,
        nonce: &str,
        tx_id: &TransactionId,
    ) -> Result<(), ClaimError> {
        let max_attempts = cmp::max(1, self.policy.max_confirm_attempts);
        let interval = self.policy.confirm_interval();
        let deadline = self
            .policy
            .confirm_timeout()
            .map(|t| tokio::time::Instant::now() + t);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = self
                .backend
                .confirm(user_token, nonce, tx_id.as_str())
                .await
                .map_err(|e| ClaimError::failed(ClaimPhase::Confirming, e.reason()))?;
            match outcome {
                ConfirmOutcome::Settled => {
                    debug!(nonce, attempts, "confirmation accepted");
                    return Ok(());
                }
                ConfirmOutcome::Rejected(reason) => {
                    return Err(ClaimError::failed(ClaimPhase::Confirming, reason))
                }
                ConfirmOutcome::Pending => {}
            }

            let out_of_time =
                deadline.is_some_and(|d| tokio::time::Instant::now() + interval > d);
            if attempts >= max_attempts || out_of_time {
                // The transaction may still land; the voucher deadline frees the nonce otherwise.
                warn!(nonce, tx_id = %tx_id, attempts, "confirmation still pending; giving up");
                return Err(ClaimError::ConfirmationTimedOut {
                    nonce: nonce.to_string(),
                    attempts,
                });
            }
            debug!(nonce, attempts, delay_ms = interval.as_millis() as u64, "claim pending");
            tokio::time::sleep(interval).await;
        }
    }

    async fn release_nonce(&self, user_token: &str, nonce: &str) {
        match self.backend.cancel(user_token, nonce).await {
            Ok(()) => info!(nonce, "released voucher nonce"),
            Err(e) => warn!(nonce, error = %e, "failed to release voucher nonce"),
        }
    }

    async fn refresh_balance(&self, user_token: &str, wallet_address: &str) -> Option<String> {
        let reader = self.balances.as_ref()?;
        match reader.read_balance(user_token, wallet_address).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!(error = %e, "balance refresh failed after settled claim");
                None
            }
        }
    }
}
