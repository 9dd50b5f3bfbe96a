#![forbid(unsafe_code)]

use crate::error::BalanceError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Reads the user's token balance (as a display string) for `address`.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    async fn read_balance(&self, user_token: &str, address: &str) -> Result<String, BalanceError>;
}

/// Asks `primary` first and `fallback` only when the primary read fails.
///
/// The backend mirror is the primary source; a direct chain read is the usual fallback.
#[derive(Clone)]
pub struct FallbackBalanceReader {
    primary: Arc<dyn BalanceReader>,
    fallback: Arc<dyn BalanceReader>,
}

impl FallbackBalanceReader {
    pub fn new(primary: Arc<dyn BalanceReader>, fallback: Arc<dyn BalanceReader>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl BalanceReader for FallbackBalanceReader {
    async fn read_balance(&self, user_token: &str, address: &str) -> Result<String, BalanceError> {
        match self.primary.read_balance(user_token, address).await {
            Ok(balance) => Ok(balance),
            Err(e) => {
                warn!(error = %e, address, "primary balance read failed; falling back");
                self.fallback.read_balance(user_token, address).await
            }
        }
    }
}

/// Fixed answer balance reader for tests and offline runs.
#[derive(Debug, Default)]
pub struct StaticBalanceReader {
    balance: Option<String>,
    reads: AtomicUsize,
}

impl StaticBalanceReader {
    pub fn new(balance: impl Into<String>) -> Self {
        Self {
            balance: Some(balance.into()),
            reads: AtomicUsize::new(0),
        }
    }

    /// A reader whose every read fails.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceReader for StaticBalanceReader {
    async fn read_balance(&self, _user_token: &str, _address: &str) -> Result<String, BalanceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.balance
            .clone()
            .ok_or_else(|| BalanceError::Unavailable("no balance configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_used_only_when_primary_fails() {
        let primary = Arc::new(StaticBalanceReader::new("10"));
        let fallback = Arc::new(StaticBalanceReader::new("99"));
        let reader = FallbackBalanceReader::new(primary.clone(), fallback.clone());

        assert_eq!(reader.read_balance("t", "0xabc").await.unwrap(), "10");
        assert_eq!(fallback.reads(), 0);

        let reader =
            FallbackBalanceReader::new(Arc::new(StaticBalanceReader::unavailable()), fallback.clone());
        assert_eq!(reader.read_balance("t", "0xabc").await.unwrap(), "99");
        assert_eq!(fallback.reads(), 1);
    }

    #[tokio::test]
    async fn both_failing_surfaces_fallback_error() {
        let reader = FallbackBalanceReader::new(
            Arc::new(StaticBalanceReader::unavailable()),
            Arc::new(StaticBalanceReader::unavailable()),
        );
        assert!(matches!(
            reader.read_balance("t", "0xabc").await,
            Err(BalanceError::Unavailable(_))
        ));
    }
}
