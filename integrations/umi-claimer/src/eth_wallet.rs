use crate::config::EthereumConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::prelude::*;
use std::sync::Arc;
use tracing::{info, warn};
use umi_airdrop::{SignerError, TransactionId, VoucherArgs, WalletSigner};

abigen!(
    UmiDistributor,
    r#"[
        {
            "type": "function",
            "name": "claim",
            "stateMutability": "nonpayable",
            "inputs": [
                {
                    "name": "voucher",
                    "type": "tuple",
                    "components": [
                        { "name": "", "type": "address" },
                        { "name": "", "type": "uint256" },
                        { "name": "", "type": "uint256" },
                        { "name": "", "type": "uint256" }
                    ]
                },
                { "name": "signature", "type": "bytes" }
            ],
            "outputs": []
        }
    ]"#
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Submits distributor claims from a local key.
#[derive(Clone)]
pub struct EthWalletSigner {
    contract: UmiDistributor<SignerClient>,
    address: Address,
}

impl EthWalletSigner {
    pub fn new(cfg: &EthereumConfig, private_key: &str) -> Result<Self> {
        let rpc_url = cfg.rpc_url.clone();
        let provider = Provider::<Http>::try_from(rpc_url.clone())
            .with_context(|| format!("invalid ethereum rpc url: {rpc_url}"))?;

        let wallet: LocalWallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .context("failed parsing wallet private key")?
            .with_chain_id(cfg.chain_id);
        let address = wallet.address();

        let client = Arc::new(SignerMiddleware::new(provider, wallet));

        let distributor = parse_distributor_address(&cfg.distributor_address)?;
        let contract = UmiDistributor::new(distributor, client);
        Ok(Self { contract, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

pub fn parse_distributor_address(raw: &str) -> Result<Address> {
    let addr: Address = raw
        .trim()
        .parse()
        .context("invalid distributor_address")?;
    if addr == Address::zero() {
        return Err(anyhow!(
            "distributor_address is zero; deploy and update config"
        ));
    }
    Ok(addr)
}

/// Converts the ordered voucher arguments into the contract's tuple.
pub fn encode_voucher(args: &VoucherArgs) -> Result<(Address, U256, U256, U256), SignerError> {
    let to: Address = args
        .to()
        .parse()
        .map_err(|e| SignerError::InvalidArguments(format!("voucher.to {}: {e}", args.to())))?;
    let amount = parse_uint("amount", args.amount())?;
    let nonce = parse_uint("nonce", args.nonce())?;
    let deadline = parse_uint("deadline", args.deadline())?;
    Ok((to, amount, nonce, deadline))
}

fn parse_uint(field: &str, value: &str) -> Result<U256, SignerError> {
    U256::from_dec_str(value)
        .map_err(|e| SignerError::InvalidArguments(format!("voucher.{field} {value}: {e}")))
}

pub fn decode_signature(signature: &str) -> Result<Bytes, SignerError> {
    let raw = signature.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(raw)
        .map(Bytes::from)
        .map_err(|e| SignerError::InvalidArguments(format!("signature is not hex: {e}")))
}

/// Maps wallet/provider failures, recognising EIP-1193 user rejections.
pub fn classify_wallet_error(message: &str) -> SignerError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("4001") || lower.contains("user rejected") || lower.contains("user denied")
    {
        SignerError::Rejected(message.to_string())
    } else {
        SignerError::Failed(message.to_string())
    }
}

#[async_trait]
impl WalletSigner for EthWalletSigner {
    async fn submit_claim(
        &self,
        args: &VoucherArgs,
        signature: &str,
    ) -> Result<TransactionId, SignerError> {
        let voucher = encode_voucher(args)?;
        let signature = decode_signature(signature)?;

        let call = self.contract.claim(voucher, signature);
        let pending = call
            .send()
            .await
            .map_err(|e| classify_wallet_error(&e.to_string()))?;

        // Settlement is tracked by the backend confirm loop, not the receipt.
        let tx_hash = pending.tx_hash();
        info!(
            nonce = %args.nonce(),
            tx_hash = %format!("{tx_hash:#x}"),
            "claim transaction broadcast"
        );
        Ok(TransactionId(format!("{tx_hash:#x}")))
    }
}

/// Asks the operator before each submission; declining counts as a wallet rejection.
pub type ApprovalPrompt = Arc<dyn Fn(&VoucherArgs) -> bool + Send + Sync>;

pub struct ConfirmingSigner {
    inner: Arc<dyn WalletSigner>,
    approve: ApprovalPrompt,
}

impl ConfirmingSigner {
    pub fn new(inner: Arc<dyn WalletSigner>, approve: ApprovalPrompt) -> Self {
        Self { inner, approve }
    }

    /// Reads `y`/`yes` from stdin.
    pub fn stdin_prompt() -> ApprovalPrompt {
        Arc::new(|args: &VoucherArgs| {
            use std::io::{BufRead, Write};

            let mut out = std::io::stderr();
            let _ = write!(
                out,
                "Submit claim of {} (nonce {}) to {}? [y/N] ",
                args.amount(),
                args.nonce(),
                args.to()
            );
            let _ = out.flush();

            let mut line = String::new();
            if std::io::stdin().lock().read_line(&mut line).is_err() {
                return false;
            }
            matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        })
    }
}

#[async_trait]
impl WalletSigner for ConfirmingSigner {
    async fn submit_claim(
        &self,
        args: &VoucherArgs,
        signature: &str,
    ) -> Result<TransactionId, SignerError> {
        let approve = Arc::clone(&self.approve);
        let prompt_args = args.clone();
        let approved = tokio::task::spawn_blocking(move || approve(&prompt_args))
            .await
            .map_err(|e| SignerError::Unavailable(format!("approval prompt failed: {e}")))?;
        if !approved {
            warn!(nonce = %args.nonce(), "claim declined at prompt");
            return Err(SignerError::Rejected("user denied transaction".to_string()));
        }
        self.inner.submit_claim(args, signature).await
    }
}
