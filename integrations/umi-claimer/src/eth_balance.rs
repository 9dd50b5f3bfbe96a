use crate::config::EthereumConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::prelude::*;
use ethers::utils::format_units;
use std::sync::Arc;
use umi_airdrop::{BalanceError, BalanceReader};

abigen!(
    UmiToken,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function decimals() external view returns (uint8)
    ]"#
);

/// Reads the UMI balance straight from the token contract.
#[derive(Clone)]
pub struct OnChainBalanceReader {
    token: UmiToken<Provider<Http>>,
}

impl OnChainBalanceReader {
    pub fn new(cfg: &EthereumConfig) -> Result<Self> {
        let rpc_url = cfg.rpc_url.clone();
        let provider = Provider::<Http>::try_from(rpc_url.clone())
            .with_context(|| format!("invalid ethereum rpc url: {rpc_url}"))?;

        let raw = cfg
            .token_address
            .as_deref()
            .ok_or_else(|| anyhow!("token_address is not configured"))?;
        let addr: Address = raw.trim().parse().context("invalid token_address")?;
        if addr == Address::zero() {
            return Err(anyhow!("token_address is zero"));
        }

        Ok(Self {
            token: UmiToken::new(addr, Arc::new(provider)),
        })
    }
}

/// Renders a raw token amount with the token's decimals, trimming trailing zeros.
pub fn format_balance(raw: U256, decimals: u8) -> Result<String, BalanceError> {
    let s = format_units(raw, u32::from(decimals))
        .map_err(|e| BalanceError::Unavailable(format!("format balance: {e}")))?;
    if !s.contains('.') {
        return Ok(s);
    }
    let s = s.trim_end_matches('0').trim_end_matches('.');
    Ok(s.to_string())
}

#[async_trait]
impl BalanceReader for OnChainBalanceReader {
    async fn read_balance(&self, _user_token: &str, address: &str) -> Result<String, BalanceError> {
        let account: Address = address
            .trim()
            .parse()
            .map_err(|e| BalanceError::Unavailable(format!("invalid address {address}: {e}")))?;
        let raw = self
            .token
            .balance_of(account)
            .call()
            .await
            .map_err(|e| BalanceError::Unavailable(format!("balanceOf: {e}")))?;
        let decimals = self
            .token
            .decimals()
            .call()
            .await
            .map_err(|e| BalanceError::Unavailable(format!("decimals: {e}")))?;
        format_balance(raw, decimals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_balance_trims_fraction() {
        let half = U256::from(500_000_000_000_000_000u64);
        assert_eq!(format_balance(half, 18).unwrap(), "0.5");
        let whole = U256::from(3_000_000_000_000_000_000u64);
        assert_eq!(format_balance(whole, 18).unwrap(), "3");
        assert_eq!(format_balance(U256::zero(), 18).unwrap(), "0");
        assert_eq!(format_balance(U256::from(42u64), 0).unwrap(), "42");
    }
}
