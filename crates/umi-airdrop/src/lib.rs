//! Client-side coordination for the UMI token airdrop.
//!
//! A claim is a short conversation between three parties:
//! - the backend claim service, which issues signed vouchers and mirrors settlement,
//! - the user's wallet, which submits the voucher to the distributor contract,
//! - a balance source, read once the claim has settled.
//!
//! Each party is a trait ([`ClaimBackend`], [`WalletSigner`], [`BalanceReader`]) so the
//! [`VoucherClaimCoordinator`] can be driven by real transports or by the in-memory doubles in
//! [`backend::mock_backend`], [`signer`] and [`balance`].
#![forbid(unsafe_code)]

pub mod attempt;
pub mod backend;
pub mod balance;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod signer;
pub mod voucher;

pub use attempt::{ClaimAttempt, ClaimAttemptStatus, ClaimPhase};
pub use backend::{ClaimBackend, ConfirmOutcome, PendingClaimConflict};
pub use balance::BalanceReader;
pub use control::{ClaimControl, ClaimInFlight};
pub use coordinator::{
    ClaimObserver, ClaimPolicy, ClaimResult, NoopObserver, VoucherClaimCoordinator,
};
pub use error::{BackendError, BalanceError, ClaimError, SignerError};
pub use signer::{TransactionId, WalletSigner};
pub use voucher::{ClaimVoucher, VoucherArgs, VoucherGrant};
