use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use umi_airdrop::backend::http_client::HttpClaimBackend;
use umi_airdrop::balance::FallbackBalanceReader;
use umi_airdrop::{BalanceReader, ClaimBackend, VoucherClaimCoordinator, WalletSigner};
use umi_claimer::config::{AppConfig, LoggingConfig};
use umi_claimer::eth_balance::OnChainBalanceReader;
use umi_claimer::eth_wallet::{ConfirmingSigner, EthWalletSigner};
use umi_claimer::notify::ConsoleNotifier;
use umi_claimer::session::{FileSessionStore, Session, SessionStore};

const PRIVATE_KEY_ENV: &str = "UMI_WALLET_PRIVATE_KEY";

#[derive(Parser, Debug)]
#[command(name = "umi-claimer")]
struct Args {
    #[arg(
        long,
        global = true,
        default_value = "integrations/umi-claimer/configs/worldchain_sepolia.toml"
    )]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Request a voucher, submit it from the wallet and wait for settlement.
    Claim {
        /// Skip the interactive approval prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Print the UMI balance for the session wallet (or `--address`).
    Balance {
        #[arg(long)]
        address: Option<String>,
    },
    /// Release an outstanding voucher nonce.
    Cancel {
        #[arg(long)]
        nonce: String,
    },
    /// Manage the stored user token and wallet address.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    Set {
        #[arg(long)]
        token: String,
        #[arg(long)]
        address: String,
    },
    Show,
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let cfg = AppConfig::from_toml(&args.config)?;
    init_logging(&cfg.logging);

    let store = FileSessionStore::new(&cfg.session.path);

    match args.command {
        Command::Claim { yes } => run_claim(&cfg, &store, yes).await,
        Command::Balance { address } => run_balance(&cfg, &store, address).await,
        Command::Cancel { nonce } => run_cancel(&cfg, &store, &nonce).await,
        Command::Session { action } => run_session(&store, action),
    }
}

async fn run_claim(cfg: &AppConfig, store: &FileSessionStore, yes: bool) -> Result<()> {
    let session = store.load()?;
    let (token, wallet) = session
        .credentials()
        .ok_or_else(|| anyhow!("no session; run `umi-claimer session set` first"))?;

    // One claim per session at a time, across processes.
    let Some(_lease) = store.try_lock_claim(cfg.claim_lease_ms())? else {
        bail!(
            "a claim is already in flight for this session (lease {})",
            store.lock_path().display()
        );
    };

    let backend = Arc::new(HttpClaimBackend::new(cfg.backend.clone())?);
    let mut coordinator = VoucherClaimCoordinator::new(backend.clone(), cfg.claim.clone())
        .with_balance_reader(build_balance_reader(cfg, backend))
        .with_observer(Arc::new(ConsoleNotifier));
    if let Some(signer) = build_signer(cfg, yes) {
        coordinator = coordinator.with_signer(signer);
    }

    info!(
        backend = %cfg.backend.base_url,
        chain_id = cfg.ethereum.chain_id,
        wallet = %wallet,
        "starting claim"
    );
    let result = coordinator.claim(token, wallet).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_balance(
    cfg: &AppConfig,
    store: &FileSessionStore,
    address: Option<String>,
) -> Result<()> {
    let session = store.load()?;
    let address = address
        .or_else(|| session.wallet_address.clone())
        .ok_or_else(|| anyhow!("no wallet address; pass --address or set a session"))?;
    let token = session.user_token.clone().unwrap_or_default();

    let backend = Arc::new(HttpClaimBackend::new(cfg.backend.clone())?);
    let reader = build_balance_reader(cfg, backend);
    let balance = reader.read_balance(&token, &address).await?;
    println!("{address}: {balance} UMI");
    Ok(())
}

async fn run_cancel(cfg: &AppConfig, store: &FileSessionStore, nonce: &str) -> Result<()> {
    let session = store.load()?;
    let token = session
        .user_token
        .as_deref()
        .ok_or_else(|| anyhow!("no session; run `umi-claimer session set` first"))?;

    let backend = HttpClaimBackend::new(cfg.backend.clone())?;
    backend.cancel(token, nonce).await?;
    println!("Cancelled voucher nonce {nonce}");
    Ok(())
}

fn run_session(store: &FileSessionStore, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::Set { token, address } => {
            store.save(&Session {
                user_token: Some(token),
                wallet_address: Some(address),
            })?;
            println!("Session saved to {}", store.path().display());
        }
        SessionAction::Show => {
            let session = store.load()?;
            let token = session
                .user_token
                .as_deref()
                .map(redact)
                .unwrap_or_else(|| "<none>".to_string());
            let wallet = session.wallet_address.as_deref().unwrap_or("<none>");
            println!("user_token={token} wallet_address={wallet}");
        }
        SessionAction::Clear => {
            store.clear()?;
            println!("Session cleared");
        }
    }
    Ok(())
}

/// `None` leaves the coordinator without a wallet, so claims end in NotReady.
fn build_signer(cfg: &AppConfig, yes: bool) -> Option<Arc<dyn WalletSigner>> {
    let private_key = match umi_claimer::config::required_env(PRIVATE_KEY_ENV) {
        Ok(k) => k,
        Err(e) => {
            warn!(error = %e, "no wallet key; running in skeleton mode");
            return None;
        }
    };
    let signer = match EthWalletSigner::new(&cfg.ethereum, &private_key) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "wallet unavailable; running in skeleton mode");
            return None;
        }
    };
    info!(address = %format!("{:#x}", signer.address()), "wallet ready");

    let signer: Arc<dyn WalletSigner> = Arc::new(signer);
    if yes {
        Some(signer)
    } else {
        Some(Arc::new(ConfirmingSigner::new(
            signer,
            ConfirmingSigner::stdin_prompt(),
        )))
    }
}

/// Backend mirror first, token contract as fallback when one is configured.
fn build_balance_reader(cfg: &AppConfig, backend: Arc<HttpClaimBackend>) -> Arc<dyn BalanceReader> {
    if cfg.ethereum.token_address.is_none() {
        return backend;
    }
    match OnChainBalanceReader::new(&cfg.ethereum) {
        Ok(chain) => Arc::new(FallbackBalanceReader::new(backend, Arc::new(chain))),
        Err(e) => {
            warn!(error = %e, "on-chain balance reader disabled");
            backend
        }
    }
}

fn redact(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{visible}…")
}

fn init_logging(cfg: &LoggingConfig) {
    // RUST_LOG wins over logging.level.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.level.clone()));

    if cfg.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
