//! Configuration management for the gateway.
//!
//! Runtime settings come from environment variables. Contract addresses
//! are deliberately not compiled in: they differ per chain and per
//! deployment, so they live in a JSON file keyed by decimal chain id:
//!
//! ```json
//! {
//!   "31415926": {
//!     "reputation": "0x...",
//!     "webinar_nft": "0x...",
//!     "scholar_dao": "0x...",
//!     "zakat_pool": "0x...",
//!     "course_manager": "0x...",
//!     "edu_token": "0x..."
//!   }
//! }
//! ```
//!
//! Entries may be omitted; a missing entry simply leaves that contract
//! without a handle on that chain.

use std::collections::HashMap;

use serde::Deserialize;

use crate::errors::{GatewayError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint of the wallet bridge (the injected-provider
    /// equivalent for headless use).
    pub wallet_rpc_url: String,

    /// Path to the per-chain contract address file.
    pub deployments_file: String,

    /// SQLite URL for the mirror store.
    pub database_url: String,

    /// Port for the read-only mirror API.
    pub api_port: u16,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Seconds between receipt polls while waiting for confirmation.
    pub receipt_poll_secs: u64,

    /// Seconds between account/chain change polls in watch mode.
    pub session_poll_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `WALLET_RPC_URL`: wallet bridge endpoint (defaults to local node)
    /// - `DEPLOYMENTS_FILE`: contract address file (defaults to ./deployments.json)
    /// - `DATABASE_URL`: mirror store (defaults to sqlite:vlcp_mirror.db)
    /// - `API_PORT`: mirror API port (defaults to 3001)
    /// - `TIMEOUT_SECS`: request timeout (defaults to 30)
    /// - `RECEIPT_POLL_SECS`: receipt poll cadence (defaults to 2)
    /// - `SESSION_POLL_SECS`: session watch cadence (defaults to 5)
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            wallet_rpc_url: env_var("WALLET_RPC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),

            deployments_file: env_var("DEPLOYMENTS_FILE")
                .unwrap_or_else(|_| "deployments.json".to_string()),

            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:vlcp_mirror.db".to_string()),

            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| GatewayError::Config("Invalid API_PORT".to_string()))?,

            timeout_secs: env_var("TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| GatewayError::Config("Invalid TIMEOUT_SECS".to_string()))?,

            receipt_poll_secs: env_var("RECEIPT_POLL_SECS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .map_err(|_| GatewayError::Config("Invalid RECEIPT_POLL_SECS".to_string()))?,

            session_poll_secs: env_var("SESSION_POLL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| GatewayError::Config("Invalid SESSION_POLL_SECS".to_string()))?,
        })
    }

    /// Validate that the configuration is well-formed.
    pub fn validate(&self) -> Result<()> {
        if !self.wallet_rpc_url.starts_with("http") {
            return Err(GatewayError::Config(
                "WALLET_RPC_URL must be a valid HTTP(S) URL".to_string(),
            ));
        }

        if self.receipt_poll_secs == 0 {
            return Err(GatewayError::Config(
                "RECEIPT_POLL_SECS must be at least 1".to_string(),
            ));
        }

        if self.session_poll_secs == 0 {
            return Err(GatewayError::Config(
                "SESSION_POLL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| GatewayError::Config(format!("Missing required environment variable: {key}")))
}

// ─────────────────────────────────────────────────────────
// Per-chain contract deployments
// ─────────────────────────────────────────────────────────

/// Addresses of one chain's contract deployment. Raw strings here;
/// parsing happens when handles are built, so one bad entry never
/// poisons the rest of the chain's contracts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainDeployment {
    pub reputation: Option<String>,
    pub webinar_nft: Option<String>,
    pub scholar_dao: Option<String>,
    pub zakat_pool: Option<String>,
    pub course_manager: Option<String>,
    pub edu_token: Option<String>,
}

/// All known deployments, keyed by chain id.
#[derive(Debug, Clone, Default)]
pub struct Deployments {
    chains: HashMap<u64, ChainDeployment>,
}

impl Deployments {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse the deployments file.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Cannot read deployments file {path}: {e}"))
        })?;
        Self::from_json(&raw)
    }

    /// Parse deployments from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, ChainDeployment> = serde_json::from_str(raw)?;

        let mut chains = HashMap::with_capacity(parsed.len());
        for (key, deployment) in parsed {
            let chain_id: u64 = key.parse().map_err(|_| {
                GatewayError::Config(format!("Deployment key {key} is not a chain id"))
            })?;
            deployment.reject_credential_material(chain_id)?;
            chains.insert(chain_id, deployment);
        }
        Ok(Self { chains })
    }

    #[allow(dead_code)]
    pub fn insert(&mut self, chain_id: u64, deployment: ChainDeployment) {
        self.chains.insert(chain_id, deployment);
    }

    pub fn for_chain(&self, chain_id: u64) -> Option<&ChainDeployment> {
        self.chains.get(&chain_id)
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl ChainDeployment {
    fn entries(&self) -> [(&'static str, Option<&String>); 6] {
        [
            ("reputation", self.reputation.as_ref()),
            ("webinar_nft", self.webinar_nft.as_ref()),
            ("scholar_dao", self.scholar_dao.as_ref()),
            ("zakat_pool", self.zakat_pool.as_ref()),
            ("course_manager", self.course_manager.as_ref()),
            ("edu_token", self.edu_token.as_ref()),
        ]
    }

    /// Refuse values shaped like raw private keys. An address is 40 hex
    /// chars; a secp256k1 key is 64. Keys found in the address file are
    /// a leak to remove at the source, never data to carry forward.
    fn reject_credential_material(&self, chain_id: u64) -> Result<()> {
        for (name, value) in self.entries() {
            let Some(value) = value else { continue };
            let hexpart = value.strip_prefix("0x").unwrap_or(value);
            if hexpart.len() >= 64 && hexpart.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(GatewayError::Config(format!(
                    "Entry {name} for chain {chain_id} looks like a private key, \
                     not an address; remove it from the deployments file"
                )));
            }
        }
        Ok(())
    }
}
