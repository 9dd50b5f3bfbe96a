//! Deterministic in-memory backend claim service for tests and offline runs.
//!
//! Enforces the same "one outstanding voucher per user" rule as the production backend and keeps
//! a log of every call so tests can assert on ordering.
#![forbid(unsafe_code)]

use super::{ClaimBackend, ConfirmOutcome, PendingClaimConflict, CLAIM_PENDING_PREFIX};
use crate::error::BackendError;
use crate::voucher::{IssuedVoucher, RawVoucher};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    RequestVoucher {
        user: String,
    },
    Cancel {
        user: String,
        nonce: String,
    },
    Confirm {
        user: String,
        nonce: String,
        transaction_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoucherState {
    Outstanding,
    Cancelled,
    Confirmed,
}

#[derive(Debug, Clone)]
struct StoredVoucher {
    user: String,
    to: String,
    amount: String,
    deadline: u64,
    state: VoucherState,
}

#[derive(Debug)]
struct Inner {
    now_secs: u64,
    next_nonce: u64,
    users: HashMap<String, String>,
    vouchers: HashMap<String, StoredVoucher>,
    calls: Vec<BackendCall>,
    confirm_script: VecDeque<ConfirmOutcome>,
    voucher_override: Option<IssuedVoucher>,
    request_failure: Option<BackendError>,
    cancel_failure: Option<BackendError>,
    confirm_failure: Option<BackendError>,
    cancel_releases: bool,
    disclose_pending_nonce: bool,
    max_outstanding_per_user: usize,
}

#[derive(Debug)]
pub struct MockClaimBackend {
    amount: String,
    ttl_secs: u64,
    inner: Mutex<Inner>,
}

impl MockClaimBackend {
    pub fn new(amount: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            ttl_secs: 600,
            inner: Mutex::new(Inner {
                now_secs: 1_700_000_000, // deterministic default
                next_nonce: 1,
                users: HashMap::new(),
                vouchers: HashMap::new(),
                calls: Vec::new(),
                confirm_script: VecDeque::new(),
                voucher_override: None,
                request_failure: None,
                cancel_failure: None,
                confirm_failure: None,
                cancel_releases: true,
                disclose_pending_nonce: true,
                max_outstanding_per_user: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mutex poisoned")
    }

    /// Registers `user_token` with the wallet address vouchers are issued to.
    pub fn register_user(&self, user_token: &str, wallet_address: &str) {
        self.lock()
            .users
            .insert(user_token.to_string(), wallet_address.to_string());
    }

    /// Plants an outstanding voucher for `user_token` (as if a previous session never finished)
    /// and returns its nonce.
    pub fn seed_outstanding(&self, user_token: &str) -> String {
        let mut inner = self.lock();
        let to = inner.users.get(user_token).cloned().unwrap_or_default();
        self.issue(&mut inner, user_token, to)
    }

    /// Responses handed out by `confirm`, in order. Once drained, confirms settle.
    pub fn script_confirms(&self, outcomes: impl IntoIterator<Item = ConfirmOutcome>) {
        self.lock().confirm_script.extend(outcomes);
    }

    /// Every subsequent `request_voucher` returns this body instead of a real voucher.
    pub fn override_voucher(&self, issued: IssuedVoucher) {
        self.lock().voucher_override = Some(issued);
    }

    pub fn fail_requests(&self, err: BackendError) {
        self.lock().request_failure = Some(err);
    }

    pub fn fail_cancels(&self, err: BackendError) {
        self.lock().cancel_failure = Some(err);
    }

    /// Every subsequent `confirm` fails with `err` (transport or server outage).
    pub fn fail_confirms(&self, err: BackendError) {
        self.lock().confirm_failure = Some(err);
    }

    /// When false, cancel calls succeed but leave the voucher outstanding.
    pub fn set_cancel_releases(&self, releases: bool) {
        self.lock().cancel_releases = releases;
    }

    /// When false, conflict errors omit `pending.nonce`.
    pub fn set_disclose_pending_nonce(&self, disclose: bool) {
        self.lock().disclose_pending_nonce = disclose;
    }

    pub fn advance_clock(&self, secs: u64) {
        let mut inner = self.lock();
        inner.now_secs = inner.now_secs.saturating_add(secs);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Cancel { nonce, .. } => Some(nonce.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn confirm_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, BackendCall::Confirm { .. }))
            .count()
    }

    pub fn voucher_state(&self, nonce: &str) -> Option<VoucherState> {
        self.lock().vouchers.get(nonce).map(|v| v.state)
    }

    /// Largest number of simultaneously outstanding vouchers ever observed for one user.
    pub fn max_outstanding_per_user(&self) -> usize {
        self.lock().max_outstanding_per_user
    }

    pub fn outstanding_nonce(&self, user_token: &str) -> Option<String> {
        let inner = self.lock();
        Self::outstanding_for(&inner, user_token)
    }

    fn outstanding_for(inner: &Inner, user: &str) -> Option<String> {
        let mut nonces: Vec<(&String, &StoredVoucher)> = inner
            .vouchers
            .iter()
            .filter(|(_, v)| {
                v.user == user && v.state == VoucherState::Outstanding && v.deadline > inner.now_secs
            })
            .collect();
        nonces.sort_by_key(|(n, _)| n.parse::<u64>().unwrap_or(u64::MAX));
        nonces.first().map(|(n, _)| (*n).clone())
    }

    fn issue(&self, inner: &mut Inner, user: &str, to: String) -> String {
        let nonce = inner.next_nonce.to_string();
        inner.next_nonce = inner.next_nonce.saturating_add(1);
        let deadline = inner.now_secs.saturating_add(self.ttl_secs);
        inner.vouchers.insert(
            nonce.clone(),
            StoredVoucher {
                user: user.to_string(),
                to,
                amount: self.amount.clone(),
                deadline,
                state: VoucherState::Outstanding,
            },
        );

        let now = inner.now_secs;
        let outstanding = inner
            .vouchers
            .values()
            .filter(|v| v.user == user && v.state == VoucherState::Outstanding && v.deadline > now)
            .count();
        inner.max_outstanding_per_user = inner.max_outstanding_per_user.max(outstanding);
        nonce
    }

    fn sign(nonce: &str, v: &StoredVoucher) -> String {
        let mut h = blake3::Hasher::new();
        for part in [v.to.as_str(), v.amount.as_str(), nonce] {
            h.update(part.as_bytes());
            h.update(&[0u8]);
        }
        h.update(&v.deadline.to_be_bytes());
        format!("0x{}", hex::encode(h.finalize().as_bytes()))
    }
}

impl Default for MockClaimBackend {
    fn default() -> Self {
        Self::new("500000000000000000")
    }
}

#[async_trait]
impl ClaimBackend for MockClaimBackend {
    async fn request_voucher(&self, user_token: &str) -> Result<IssuedVoucher, BackendError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::RequestVoucher {
            user: user_token.to_string(),
        });

        if let Some(err) = inner.request_failure.clone() {
            return Err(err);
        }
        let to = inner
            .users
            .get(user_token)
            .cloned()
            .ok_or_else(|| BackendError::HttpStatus {
                status: 401,
                message: "Invalid token".to_string(),
            })?;

        if let Some(nonce) = Self::outstanding_for(&inner, user_token) {
            return Err(BackendError::PendingClaim(PendingClaimConflict {
                nonce: inner.disclose_pending_nonce.then_some(nonce),
                message: format!("{CLAIM_PENDING_PREFIX} for this user"),
            }));
        }

        let nonce = self.issue(&mut inner, user_token, to);
        if let Some(issued) = inner.voucher_override.clone() {
            return Ok(issued);
        }
        let stored = inner.vouchers.get(&nonce).cloned().ok_or_else(|| {
            BackendError::Network(format!("voucher {nonce} vanished"))
        })?;
        Ok(IssuedVoucher {
            voucher: Some(RawVoucher {
                to: Some(stored.to.clone()),
                amount: Some(stored.amount.clone()),
                nonce: Some(nonce.clone()),
                deadline: Some(stored.deadline.to_string()),
            }),
            signature: Some(Self::sign(&nonce, &stored)),
            claimed_amount: Some(stored.amount),
        })
    }

    async fn cancel(&self, user_token: &str, nonce: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::Cancel {
            user: user_token.to_string(),
            nonce: nonce.to_string(),
        });
        if let Some(err) = inner.cancel_failure.clone() {
            return Err(err);
        }
        if !inner.cancel_releases {
            return Ok(());
        }
        if let Some(v) = inner.vouchers.get_mut(nonce) {
            if v.user == user_token && v.state == VoucherState::Outstanding {
                v.state = VoucherState::Cancelled;
            }
        }
        Ok(())
    }

    async fn confirm(
        &self,
        user_token: &str,
        nonce: &str,
        transaction_id: &str,
    ) -> Result<ConfirmOutcome, BackendError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::Confirm {
            user: user_token.to_string(),
            nonce: nonce.to_string(),
            transaction_id: transaction_id.to_string(),
        });
        if let Some(err) = inner.confirm_failure.clone() {
            return Err(err);
        }

        match inner.vouchers.get(nonce) {
            Some(v) if v.user != user_token => {
                return Ok(ConfirmOutcome::Rejected("Nonce does not belong to user".to_string()))
            }
            Some(v) if v.state == VoucherState::Cancelled => {
                return Ok(ConfirmOutcome::Rejected("Voucher cancelled".to_string()))
            }
            Some(v) if v.state == VoucherState::Confirmed => return Ok(ConfirmOutcome::Settled),
            Some(_) => {}
            None => return Ok(ConfirmOutcome::Rejected("Unknown nonce".to_string())),
        }

        let outcome = inner
            .confirm_script
            .pop_front()
            .unwrap_or(ConfirmOutcome::Settled);
        if outcome == ConfirmOutcome::Settled {
            if let Some(v) = inner.vouchers.get_mut(nonce) {
                v.state = VoucherState::Confirmed;
            }
        }
        Ok(outcome)
    }
}
