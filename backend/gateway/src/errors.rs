//! Error types for the gateway.
//!
//! One taxonomy for the whole crate: wallet transport failures, user
//! rejections, contract availability, on-chain reverts, and mirror-store
//! problems each get their own kind so call sites can react differently.

use thiserror::Error;

use crate::registry::ContractName;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// No wallet provider reachable at the configured endpoint.
    #[error("Wallet provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The wallet user declined the request (EIP-1193 code 4001).
    #[error("Request rejected in the wallet: {0}")]
    UserRejected(String),

    /// The session chain is not on the supported list. Advisory only;
    /// contract calls are never blocked on this.
    #[error("Unsupported network: chain id {0}")]
    UnsupportedNetwork(u64),

    /// No usable handle for the named contract on the current chain.
    #[error("{0} contract is not initialized")]
    ContractNotInitialized(ContractName),

    /// The transaction was mined with a failure status.
    #[error("Transaction {tx_hash} reverted on chain")]
    TransactionReverted { tx_hash: String },

    /// A mirror write failed after the chain write was confirmed.
    /// Never fatal to the operation that produced it.
    #[error("Mirror write failed: {0}")]
    MirrorWriteFailed(String),

    /// A precondition on operation input failed before any submission.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON-RPC error relayed from the provider.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// A provider response or contract return value had the wrong shape.
    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
