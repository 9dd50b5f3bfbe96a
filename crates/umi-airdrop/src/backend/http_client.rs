//! HTTP adapter for the backend claim service.
//!
//! All calls carry `Authorization: Bearer <user token>`. Endpoint paths are configurable; the
//! defaults match the production backend.
#![forbid(unsafe_code)]

use super::{ClaimBackend, ConfirmOutcome, ErrorBody};
use crate::balance::BalanceReader;
use crate::error::{BackendError, BalanceError};
use crate::voucher::IssuedVoucher;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// HTTP binding configuration for the backend claim service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub endpoints: AirdropEndpoints,
    /// TCP/TLS connection timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout (includes connect, headers, body).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoints: AirdropEndpoints::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        if self.base_url.trim().is_empty() {
            return Err(BackendError::Config("backend.base_url is empty".to_string()));
        }
        Ok(())
    }
}

/// Endpoint paths (not full URLs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AirdropEndpoints {
    pub request_voucher: String,
    pub cancel_voucher: String,
    pub confirm_claim: String,
    /// Supports `{address}`.
    pub token_balance: String,
}

impl Default for AirdropEndpoints {
    fn default() -> Self {
        Self {
            request_voucher: "/airdrop/request".to_string(),
            cancel_voucher: "/airdrop/cancel".to_string(),
            confirm_claim: "/airdrop/confirm".to_string(),
            token_balance: "/users/token-balance/{address}".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    nonce: &'a str,
}

#[derive(Debug, Serialize)]
struct ConfirmRequest<'a> {
    nonce: &'a str,
    transaction_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ConfirmBody {
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    balance: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Async HTTP client for the airdrop endpoints.
#[derive(Debug, Clone)]
pub struct HttpClaimBackend {
    cfg: BackendConfig,
    client: reqwest::Client,
}

impl HttpClaimBackend {
    pub fn new(cfg: BackendConfig) -> Result<Self, BackendError> {
        cfg.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { cfg, client })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.cfg
    }

    fn join_url(&self, path: &str) -> String {
        let base = self.cfg.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        op: &'static str,
        path: &str,
        user_token: &str,
        body: &T,
    ) -> Result<(StatusCode, String), BackendError> {
        let url = self.join_url(path);
        debug!(op, %url, "airdrop request");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(user_token)
            .json(body)
            .send()
            .await
            .map_err(|e| map_send_error(&e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| map_send_error(&e))?;
        debug!(op, status = status.as_u16(), "airdrop response");
        Ok((status, text))
    }

    /// Token balance URL with `address` encoded as a single path segment.
    fn balance_url(&self, address: &str) -> Result<reqwest::Url, BackendError> {
        let raw = self.join_url(&self.cfg.endpoints.token_balance);
        let mut url = reqwest::Url::parse(&raw)
            .map_err(|e| BackendError::Config(format!("invalid balance url {raw}: {e}")))?;
        let segments: Vec<String> = url
            .path_segments()
            .map(|segs| segs.map(str::to_string).collect())
            .unwrap_or_default();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| BackendError::Config(format!("balance url has no path: {raw}")))?;
            path.clear();
            for seg in &segments {
                if seg == "{address}" || seg.eq_ignore_ascii_case("%7Baddress%7D") {
                    path.push(address);
                } else {
                    path.push(seg);
                }
            }
        }
        Ok(url)
    }

    /// `GET /users/token-balance/:address`.
    pub async fn token_balance(
        &self,
        user_token: &str,
        address: &str,
    ) -> Result<String, BackendError> {
        let url = self.balance_url(address)?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(user_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| map_send_error(&e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| map_send_error(&e))?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        parse_balance_body(&text)
    }
}

#[async_trait]
impl ClaimBackend for HttpClaimBackend {
    async fn request_voucher(&self, user_token: &str) -> Result<IssuedVoucher, BackendError> {
        let (status, text) = self
            .post_json(
                "request_voucher",
                &self.cfg.endpoints.request_voucher,
                user_token,
                &serde_json::json!({}),
            )
            .await?;
        if !status.is_success() {
            let body = ErrorBody::parse(&text);
            if let Some(conflict) = body.pending_conflict() {
                return Err(BackendError::PendingClaim(conflict));
            }
            return Err(BackendError::HttpStatus {
                status: status.as_u16(),
                message: body.reason(),
            });
        }
        serde_json::from_str(&text).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn cancel(&self, user_token: &str, nonce: &str) -> Result<(), BackendError> {
        let (status, text) = self
            .post_json(
                "cancel_voucher",
                &self.cfg.endpoints.cancel_voucher,
                user_token,
                &CancelRequest { nonce },
            )
            .await?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        Ok(())
    }

    async fn confirm(
        &self,
        user_token: &str,
        nonce: &str,
        transaction_id: &str,
    ) -> Result<ConfirmOutcome, BackendError> {
        let (status, text) = self
            .post_json(
                "confirm_claim",
                &self.cfg.endpoints.confirm_claim,
                user_token,
                &ConfirmRequest {
                    nonce,
                    transaction_id,
                },
            )
            .await?;
        Ok(confirm_outcome(status, &text))
    }
}

#[async_trait]
impl BalanceReader for HttpClaimBackend {
    async fn read_balance(&self, user_token: &str, address: &str) -> Result<String, BalanceError> {
        Ok(self.token_balance(user_token, address).await?)
    }
}

fn confirm_outcome(status: StatusCode, text: &str) -> ConfirmOutcome {
    if status == StatusCode::ACCEPTED {
        return ConfirmOutcome::Pending;
    }
    let body: ConfirmBody = serde_json::from_str(text).unwrap_or_default();
    if !status.is_success() {
        let reason = ErrorBody::parse(text).reason();
        return ConfirmOutcome::Rejected(if reason.is_empty() {
            format!("http status {}", status.as_u16())
        } else {
            reason
        });
    }
    if body
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("pending"))
    {
        return ConfirmOutcome::Pending;
    }
    match body.ok {
        Some(false) => ConfirmOutcome::Rejected(
            body.error
                .unwrap_or_else(|| "confirmation not accepted".to_string()),
        ),
        _ => ConfirmOutcome::Settled,
    }
}

fn parse_balance_body(text: &str) -> Result<String, BackendError> {
    let body: BalanceBody =
        serde_json::from_str(text).map_err(|e| BackendError::Decode(e.to_string()))?;
    if body.status.as_deref() != Some("success") {
        return Err(BackendError::Decode(body.error.unwrap_or_else(|| {
            format!(
                "unexpected balance status: {}",
                body.status.as_deref().unwrap_or("<none>")
            )
        })));
    }
    match body.balance {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(BackendError::Decode("missing balance".to_string())),
    }
}

fn status_error(status: StatusCode, text: &str) -> BackendError {
    BackendError::HttpStatus {
        status: status.as_u16(),
        message: ErrorBody::parse(text).reason(),
    }
}

fn map_send_error(err: &reqwest::Error) -> BackendError {
    if err.is_timeout() {
        return BackendError::Timeout;
    }
    if err.is_decode() {
        return BackendError::Decode(err.to_string());
    }
    BackendError::Network(err.to_string())
}
