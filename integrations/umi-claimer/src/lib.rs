//! UMI airdrop claimer: config, Ethereum wallet and balance adapters, and the local session
//! store behind the `umi-claimer` binary.

pub mod config;
pub mod eth_balance;
pub mod eth_wallet;
pub mod notify;
pub mod session;
