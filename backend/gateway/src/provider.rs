//! Wallet provider boundary.
//!
//! Everything that talks to the user's wallet goes through the
//! [`WalletProvider`] trait: a JSON-RPC `request` surface plus a change
//! feed for account and chain switches. Production uses
//! [`HttpWalletProvider`] against a wallet bridge endpoint; tests plug
//! in a scripted fake. Nothing else in the crate knows which one it is
//! talking to.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;
use crate::errors::{GatewayError, Result};

/// A change pushed by the wallet side.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// The account list changed. Empty means the wallet disconnected us.
    AccountsChanged(Vec<Address>),
    /// The wallet switched to another chain.
    ChainChanged(u64),
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Perform a single JSON-RPC request against the wallet.
    ///
    /// A `null` result is passed through as [`Value::Null`]; receipt
    /// polling depends on it.
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// Subscribe to account and chain change events.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

// ─────────────────────────────────────────────────────────
// JSON-RPC wire shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

// ─────────────────────────────────────────────────────────
// HTTP wallet bridge
// ─────────────────────────────────────────────────────────

/// Wallet provider speaking JSON-RPC over HTTP to a wallet bridge.
///
/// The bridge owns the keys and the approval UI; this side only submits
/// requests and surfaces what comes back.
pub struct HttpWalletProvider {
    client: Client,
    url: String,
    events: broadcast::Sender<ProviderEvent>,
}

impl HttpWalletProvider {
    /// Build a provider for the configured bridge endpoint.
    pub fn detect(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::ProviderUnavailable(e.to_string()))?;

        let (events, _) = broadcast::channel(16);
        Ok(Self {
            client,
            url: config.wallet_rpc_url.clone(),
            events,
        })
    }

    /// Poll the wallet for account and chain changes and re-broadcast
    /// them as [`ProviderEvent`]s. The first poll seeds the baseline
    /// without emitting.
    pub fn spawn_event_pump(provider: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_accounts: Option<Vec<Address>> = None;
            let mut last_chain: Option<u64> = None;

            loop {
                tokio::time::sleep(interval).await;

                match provider.poll_session_state().await {
                    Ok((accounts, chain_id)) => {
                        if last_accounts.as_ref() != Some(&accounts) {
                            if last_accounts.is_some() {
                                let _ = provider
                                    .events
                                    .send(ProviderEvent::AccountsChanged(accounts.clone()));
                            }
                            last_accounts = Some(accounts);
                        }
                        if last_chain != Some(chain_id) {
                            if last_chain.is_some() {
                                let _ = provider.events.send(ProviderEvent::ChainChanged(chain_id));
                            }
                            last_chain = Some(chain_id);
                        }
                    }
                    Err(e) => debug!("Session poll failed: {e}"),
                }
            }
        })
    }

    async fn poll_session_state(&self) -> Result<(Vec<Address>, u64)> {
        let accounts = accounts_from(&self.request("eth_accounts", json!([])).await?)?;
        let chain_id = quantity_to_u64(&self.request("eth_chainId", json!([])).await?)?;
        Ok((accounts, chain_id))
    }
}

#[async_trait]
impl WalletProvider for HttpWalletProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    GatewayError::ProviderUnavailable(e.to_string())
                } else {
                    GatewayError::Http(e)
                }
            })?;

        let reply: RpcReply = response.json().await?;

        if let Some(err) = reply.error {
            // EIP-1193: 4001 is the user pressing "reject"; 4900/4901
            // mean the provider lost its connection.
            return Err(match err.code {
                4001 => GatewayError::UserRejected(err.message),
                4900 | 4901 => GatewayError::ProviderUnavailable(err.message),
                code => GatewayError::Rpc {
                    code,
                    message: err.message,
                },
            });
        }

        Ok(reply.result)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

// ─────────────────────────────────────────────────────────
// Wire value helpers
// ─────────────────────────────────────────────────────────

/// Render a number as a JSON-RPC hex quantity (`0x...`).
pub fn to_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

/// Parse a JSON-RPC hex quantity into a `u64`.
pub fn quantity_to_u64(value: &Value) -> Result<u64> {
    let s = expect_hex_str(value)?;
    u64::from_str_radix(s, 16)
        .map_err(|e| GatewayError::Parse(format!("Bad hex quantity {value}: {e}")))
}

/// Parse a JSON-RPC hex quantity into a `U256`.
pub fn quantity_to_u256(value: &Value) -> Result<U256> {
    let s = expect_hex_str(value)?;
    U256::from_str_radix(s, 16)
        .map_err(|e| GatewayError::Parse(format!("Bad hex quantity {value}: {e}")))
}

/// Parse an account list response into addresses.
pub fn accounts_from(value: &Value) -> Result<Vec<Address>> {
    let list = value
        .as_array()
        .ok_or_else(|| GatewayError::Parse(format!("Expected account array, got {value}")))?;
    list.iter()
        .map(|v| {
            let s = v
                .as_str()
                .ok_or_else(|| GatewayError::Parse(format!("Expected account string, got {v}")))?;
            s.parse::<Address>()
                .map_err(|e| GatewayError::Parse(format!("Bad account address {s}: {e}")))
        })
        .collect()
}

/// Parse a 32-byte hash response.
pub fn hash_from(value: &Value) -> Result<B256> {
    let s = value
        .as_str()
        .ok_or_else(|| GatewayError::Parse(format!("Expected hash string, got {value}")))?;
    s.parse::<B256>()
        .map_err(|e| GatewayError::Parse(format!("Bad transaction hash {s}: {e}")))
}

/// Decode `0x`-prefixed byte data.
pub fn data_to_bytes(value: &Value) -> Result<Vec<u8>> {
    let s = value
        .as_str()
        .ok_or_else(|| GatewayError::Parse(format!("Expected data string, got {value}")))?;
    let hexpart = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(hexpart).map_err(|e| GatewayError::Parse(format!("Bad hex data {s}: {e}")))
}

/// Render bytes as `0x`-prefixed data.
pub fn bytes_to_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn expect_hex_str(value: &Value) -> Result<&str> {
    let s = value
        .as_str()
        .ok_or_else(|| GatewayError::Parse(format!("Expected hex quantity, got {value}")))?;
    let hexpart = s.strip_prefix("0x").unwrap_or(s);
    if hexpart.is_empty() {
        return Err(GatewayError::Parse(format!("Empty hex quantity {value}")));
    }
    Ok(hexpart)
}
