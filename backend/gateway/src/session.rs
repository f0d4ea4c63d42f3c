//! Wallet session lifecycle.
//!
//! One [`WalletSession`] owns the connection state: the active account,
//! the chain it sits on, and its native balance. State changes flow out
//! through a broadcast channel, and a [`SessionWatcher`] keeps the
//! snapshot honest when the wallet switches accounts or chains behind
//! our back. The session never initiates a provider-side disconnect;
//! `disconnect` is a local reset only.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::{GatewayError, Result};
use crate::notify::Notifier;
use crate::provider::{
    accounts_from, quantity_to_u256, quantity_to_u64, to_quantity, ProviderEvent, WalletProvider,
};

/// Networks the gateway knows by name. Connecting on anything else
/// still works; the user just gets an advisory notice.
pub const SUPPORTED_CHAINS: &[(u64, &str)] = &[
    (1, "Ethereum Mainnet"),
    (5, "Goerli Testnet"),
    (11155111, "Sepolia Testnet"),
    (137, "Polygon Mainnet"),
    (80001, "Mumbai Testnet"),
    (56, "BSC Mainnet"),
    (97, "BSC Testnet"),
    (31415926, "Sidra Chain"),
];

pub fn is_supported_chain(chain_id: u64) -> bool {
    SUPPORTED_CHAINS.iter().any(|(id, _)| *id == chain_id)
}

pub fn network_name(chain_id: u64) -> String {
    SUPPORTED_CHAINS
        .iter()
        .find(|(id, _)| *id == chain_id)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("Unknown Network (chain {chain_id})"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Immutable view of the session at one point in time. Operations take
/// a snapshot and work from it; they never reach into live state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub balance: Option<U256>,
    pub network_supported: bool,
}

impl SessionSnapshot {
    pub fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            account: None,
            chain_id: None,
            balance: None,
            network_supported: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected && self.account.is_some()
    }
}

pub struct WalletSession {
    provider: Arc<dyn WalletProvider>,
    notifier: Notifier,
    state: RwLock<SessionSnapshot>,
    changes: broadcast::Sender<SessionSnapshot>,
}

impl WalletSession {
    pub fn new(provider: Arc<dyn WalletProvider>, notifier: Notifier) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            provider,
            notifier,
            state: RwLock::new(SessionSnapshot::disconnected()),
            changes,
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.clone()
    }

    /// Subscribe to session changes. Every commit (connect, disconnect,
    /// account or chain switch) lands here exactly once.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.changes.subscribe()
    }

    /// Ask the wallet for account access and build a connected session.
    ///
    /// A wallet that answers with zero accounts leaves the session
    /// disconnected without an error. Any failure along the way rolls
    /// the state back to what it was before the attempt.
    pub async fn connect(&self) -> Result<SessionSnapshot> {
        let previous = self.snapshot().await;
        self.commit(SessionSnapshot {
            status: ConnectionStatus::Connecting,
            ..previous.clone()
        })
        .await;

        match self.connect_inner().await {
            Ok(Some(snapshot)) => {
                self.commit(snapshot.clone()).await;
                let chain_id = snapshot.chain_id.unwrap_or_default();
                self.notifier.info(
                    "Wallet Connected",
                    format!("Connected to {}", network_name(chain_id)),
                );
                if !snapshot.network_supported {
                    self.advise_unsupported(chain_id);
                }
                Ok(snapshot)
            }
            Ok(None) => {
                debug!("Wallet returned no accounts; staying disconnected");
                let snapshot = SessionSnapshot::disconnected();
                self.commit(snapshot.clone()).await;
                Ok(snapshot)
            }
            Err(e) => {
                self.commit(previous).await;
                self.notifier.error("Connection Failed", e.to_string());
                Err(e)
            }
        }
    }

    async fn connect_inner(&self) -> Result<Option<SessionSnapshot>> {
        let accounts =
            accounts_from(&self.provider.request("eth_requestAccounts", json!([])).await?)?;
        match accounts.first().copied() {
            Some(account) => self.read_session_for(account).await.map(Some),
            None => Ok(None),
        }
    }

    /// Re-read the session from the wallet without prompting for access.
    /// Used after account or chain changes; zero accounts means the
    /// wallet dropped us and the session resets.
    pub async fn refresh(&self) -> Result<SessionSnapshot> {
        match self.refresh_inner().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                self.notifier.error("Connection Failed", e.to_string());
                Err(e)
            }
        }
    }

    async fn refresh_inner(&self) -> Result<SessionSnapshot> {
        let accounts = accounts_from(&self.provider.request("eth_accounts", json!([])).await?)?;
        match accounts.first().copied() {
            Some(account) => {
                let snapshot = self.read_session_for(account).await?;
                self.commit(snapshot.clone()).await;
                if let (false, Some(chain_id)) = (snapshot.network_supported, snapshot.chain_id) {
                    self.advise_unsupported(chain_id);
                }
                Ok(snapshot)
            }
            None => {
                self.disconnect().await;
                Ok(self.snapshot().await)
            }
        }
    }

    async fn read_session_for(&self, account: Address) -> Result<SessionSnapshot> {
        let chain_id =
            quantity_to_u64(&self.provider.request("eth_chainId", json!([])).await?)?;
        let balance = quantity_to_u256(
            &self
                .provider
                .request("eth_getBalance", json!([account.to_string(), "latest"]))
                .await?,
        )?;

        Ok(SessionSnapshot {
            status: ConnectionStatus::Connected,
            account: Some(account),
            chain_id: Some(chain_id),
            balance: Some(balance),
            network_supported: is_supported_chain(chain_id),
        })
    }

    /// Local state reset. The wallet itself stays connected on its side;
    /// there is no provider call to undo an account grant.
    pub async fn disconnect(&self) {
        self.commit(SessionSnapshot::disconnected()).await;
        self.notifier
            .info("Wallet Disconnected", "Your wallet has been disconnected.");
    }

    /// Ask the wallet to switch chains. The resulting `ChainChanged`
    /// event updates the snapshot through the watcher.
    pub async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        let params = json!([{ "chainId": to_quantity(chain_id) }]);
        match self
            .provider
            .request("wallet_switchEthereumChain", params)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                self.notifier
                    .error("Network Switch Failed", e.to_string());
                Err(e)
            }
        }
    }

    /// React to provider-side changes until dropped. Holder keeps the
    /// returned guard alive for as long as the session should track the
    /// wallet; dropping it tears the task down.
    pub fn spawn_watcher(self: &Arc<Self>) -> SessionWatcher {
        let session = Arc::clone(self);
        let mut events = session.provider.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ProviderEvent::AccountsChanged(accounts)) => {
                        if accounts.is_empty() {
                            session.disconnect().await;
                        } else if session.snapshot().await.account != accounts.first().copied() {
                            let _ = session.refresh().await;
                        }
                    }
                    Ok(ProviderEvent::ChainChanged(_)) => {
                        let _ = session.refresh().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Session watcher lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        SessionWatcher { handle }
    }

    fn advise_unsupported(&self, chain_id: u64) {
        let advisory = GatewayError::UnsupportedNetwork(chain_id);
        self.notifier.error(
            "Unsupported Network",
            format!("{advisory}. Switch to a supported network for full functionality."),
        );
    }

    async fn commit(&self, snapshot: SessionSnapshot) {
        *self.state.write().await = snapshot.clone();
        let _ = self.changes.send(snapshot);
    }
}

/// Aborts the watch task when dropped.
pub struct SessionWatcher {
    handle: JoinHandle<()>,
}

impl Drop for SessionWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
