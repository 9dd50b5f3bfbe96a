use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use umi_airdrop::backend::http_client::BackendConfig;
use umi_airdrop::ClaimPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub ethereum: EthereumConfig,
    #[serde(default)]
    pub claim: ClaimPolicy,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EthereumConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Airdrop distributor contract receiving `claim(voucher, signature)`.
    pub distributor_address: String,
    /// UMI ERC-20 token, used for direct balance reads.
    #[serde(default)]
    pub token_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_path")]
    pub path: String,
}

fn default_session_path() -> String {
    ".umi-session.json".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_session_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Allowance for voucher issuance and wallet approval on top of confirmation polling.
const CLAIM_SETUP_MARGIN_MS: u64 = 10 * 60 * 1000;

impl AppConfig {
    /// Upper bound on one claim run; the per-session claim lease lasts this long.
    pub fn claim_lease_ms(&self) -> u64 {
        let interval_ms = u64::try_from(self.claim.confirm_interval().as_millis()).unwrap_or(u64::MAX);
        let mut polling = interval_ms.saturating_mul(u64::from(self.claim.max_confirm_attempts));
        if let Some(timeout) = self.claim.confirm_timeout_ms {
            polling = polling.min(timeout);
        }
        polling.saturating_add(CLAIM_SETUP_MARGIN_MS)
    }

    pub fn from_toml(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config file: {}", path.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("failed parsing config toml")?;

        // Env overrides (explicit) first.
        if let Ok(v) = env::var("UMI_BACKEND_URL") {
            if !v.trim().is_empty() {
                cfg.backend.base_url = v;
            }
        }
        if let Ok(v) = env::var("ETH_RPC_URL") {
            if !v.trim().is_empty() {
                cfg.ethereum.rpc_url = v;
            }
        }

        // Resolve env:VAR references.
        cfg.backend.base_url = resolve_env_ref(&cfg.backend.base_url)?;
        cfg.ethereum.rpc_url = resolve_env_ref(&cfg.ethereum.rpc_url)?;

        cfg.backend
            .validate()
            .map_err(|e| anyhow!("invalid backend config: {e}"))?;
        if cfg.claim.confirm_interval_ms == 0 {
            return Err(anyhow!("claim.confirm_interval_ms must be > 0"));
        }
        if cfg.claim.max_confirm_attempts == 0 {
            return Err(anyhow!("claim.max_confirm_attempts must be > 0"));
        }

        Ok(cfg)
    }
}

pub fn resolve_env_ref(value: &str) -> Result<String> {
    const PREFIX: &str = "env:";
    if let Some(var) = value.strip_prefix(PREFIX) {
        let var = var.trim();
        if var.is_empty() {
            return Err(anyhow!("invalid env ref: {value}"));
        }
        return env::var(var).with_context(|| format!("missing env var {var} for {value}"));
    }
    Ok(value.to_string())
}

pub fn required_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("missing required env var {name}"))
}
