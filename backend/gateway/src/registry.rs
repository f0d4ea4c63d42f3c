//! Contract registry and call plumbing.
//!
//! Logical contract names map to per-chain deployed addresses plus a
//! fixed signature set. Handles are built from a session snapshot, so
//! a disconnected session yields no handles at all, and one bad address
//! in the deployments file disables only that contract. Every write
//! goes through the wallet (`eth_sendTransaction`); the gateway never
//! holds keys or signs anything itself.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::abi::{self, AbiValue};
use crate::config::Deployments;
use crate::errors::{GatewayError, Result};
use crate::provider::{bytes_to_data, data_to_bytes, hash_from, WalletProvider};
use crate::session::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractName {
    Reputation,
    WebinarNft,
    ScholarDao,
    ZakatPool,
    CourseManager,
    EduToken,
}

impl ContractName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractName::Reputation => "Reputation",
            ContractName::WebinarNft => "WebinarNFT",
            ContractName::ScholarDao => "ScholarDAO",
            ContractName::ZakatPool => "ZakatPool",
            ContractName::CourseManager => "CourseManager",
            ContractName::EduToken => "EduToken",
        }
    }
}

impl fmt::Display for ContractName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────
// Signature sets
// ─────────────────────────────────────────────────────────

/// One method a contract exposes. `signature` is the canonical form
/// selectors derive from.
#[derive(Debug, Clone, Copy)]
pub struct Method {
    pub name: &'static str,
    pub signature: &'static str,
}

pub struct ContractAbi {
    pub methods: &'static [Method],
    /// Log signatures the contract emits. Receipt parsing takes the
    /// expected signature explicitly; this records the declared surface.
    #[allow(dead_code)]
    pub events: &'static [&'static str],
}

pub const REPUTATION_ABI: ContractAbi = ContractAbi {
    methods: &[
        Method { name: "award", signature: "award(address,uint256)" },
        Method { name: "getReputation", signature: "getReputation(address)" },
    ],
    events: &["ReputationAwarded(address,uint256)"],
};

pub const WEBINAR_NFT_ABI: ContractAbi = ContractAbi {
    methods: &[
        Method { name: "mintTicket", signature: "mintTicket(address,string)" },
        Method { name: "tokenURI", signature: "tokenURI(uint256)" },
        Method { name: "ownerOf", signature: "ownerOf(uint256)" },
        Method { name: "balanceOf", signature: "balanceOf(address)" },
    ],
    events: &[TRANSFER_EVENT],
};

pub const SCHOLAR_DAO_ABI: ContractAbi = ContractAbi {
    methods: &[
        Method { name: "verifyScholar", signature: "verifyScholar(address,string)" },
        Method { name: "revokeScholar", signature: "revokeScholar(address)" },
        Method { name: "isScholarVerified", signature: "isScholarVerified(address)" },
    ],
    events: &["ScholarVerified(address,string)", "ScholarRevoked(address)"],
};

pub const ZAKAT_POOL_ABI: ContractAbi = ContractAbi {
    methods: &[
        Method { name: "donate", signature: "donate(uint256)" },
        Method { name: "withdraw", signature: "withdraw(address,uint256)" },
        Method { name: "donations", signature: "donations(address)" },
        Method { name: "totalTokenDonations", signature: "totalTokenDonations()" },
    ],
    events: &["Donated(address,uint256)"],
};

pub const COURSE_MANAGER_ABI: ContractAbi = ContractAbi {
    methods: &[
        Method { name: "createCourse", signature: "createCourse(string,string,uint256)" },
        Method { name: "enroll", signature: "enroll(uint256)" },
        Method { name: "courses", signature: "courses(uint256)" },
        Method { name: "enrolledCourses", signature: "enrolledCourses(address,uint256)" },
    ],
    events: &[COURSE_CREATED_EVENT, ENROLLED_EVENT],
};

pub const EDU_TOKEN_ABI: ContractAbi = ContractAbi {
    methods: &[
        Method { name: "balanceOf", signature: "balanceOf(address)" },
        Method { name: "approve", signature: "approve(address,uint256)" },
        Method { name: "transfer", signature: "transfer(address,uint256)" },
        Method { name: "allowance", signature: "allowance(address,address)" },
    ],
    events: &[TRANSFER_EVENT],
};

/// Events the gateway extracts data from after confirmation.
pub const COURSE_CREATED_EVENT: &str = "CourseCreated(uint256,address)";
pub const ENROLLED_EVENT: &str = "Enrolled(address,uint256)";
pub const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";

fn abi_for(name: ContractName) -> &'static ContractAbi {
    match name {
        ContractName::Reputation => &REPUTATION_ABI,
        ContractName::WebinarNft => &WEBINAR_NFT_ABI,
        ContractName::ScholarDao => &SCHOLAR_DAO_ABI,
        ContractName::ZakatPool => &ZAKAT_POOL_ABI,
        ContractName::CourseManager => &COURSE_MANAGER_ABI,
        ContractName::EduToken => &EDU_TOKEN_ABI,
    }
}

// ─────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────

pub struct ContractRegistry {
    provider: Arc<dyn WalletProvider>,
    deployments: Deployments,
    receipt_poll: Duration,
}

/// Per-contract handles for one session snapshot. `None` means the
/// contract is unusable right now: session disconnected, chain unknown,
/// no deployment entry, or a malformed address.
#[derive(Default)]
pub struct ContractHandles {
    pub reputation: Option<ContractHandle>,
    pub webinar_nft: Option<ContractHandle>,
    pub scholar_dao: Option<ContractHandle>,
    pub zakat_pool: Option<ContractHandle>,
    pub course_manager: Option<ContractHandle>,
    pub edu_token: Option<ContractHandle>,
}

impl ContractRegistry {
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        deployments: Deployments,
        receipt_poll: Duration,
    ) -> Self {
        Self {
            provider,
            deployments,
            receipt_poll,
        }
    }

    /// Build handles for the snapshot's account and chain.
    pub fn handles(&self, snapshot: &SessionSnapshot) -> ContractHandles {
        if !snapshot.is_connected() {
            return ContractHandles::default();
        }
        let (Some(account), Some(chain_id)) = (snapshot.account, snapshot.chain_id) else {
            return ContractHandles::default();
        };
        let Some(book) = self.deployments.for_chain(chain_id) else {
            debug!("No contract deployments for chain {chain_id}");
            return ContractHandles::default();
        };

        ContractHandles {
            reputation: self.handle(ContractName::Reputation, book.reputation.as_deref(), account),
            webinar_nft: self.handle(ContractName::WebinarNft, book.webinar_nft.as_deref(), account),
            scholar_dao: self.handle(ContractName::ScholarDao, book.scholar_dao.as_deref(), account),
            zakat_pool: self.handle(ContractName::ZakatPool, book.zakat_pool.as_deref(), account),
            course_manager: self.handle(
                ContractName::CourseManager,
                book.course_manager.as_deref(),
                account,
            ),
            edu_token: self.handle(ContractName::EduToken, book.edu_token.as_deref(), account),
        }
    }

    fn handle(
        &self,
        name: ContractName,
        address: Option<&str>,
        caller: Address,
    ) -> Option<ContractHandle> {
        let raw = address?;
        match raw.parse::<Address>() {
            Ok(address) => Some(ContractHandle {
                name,
                address,
                abi: abi_for(name),
                provider: self.provider.clone(),
                caller,
                receipt_poll: self.receipt_poll,
            }),
            Err(e) => {
                warn!("Skipping {name}: bad deployment address {raw}: {e}");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────

/// A contract bound to a caller account. Reads go through `eth_call`,
/// writes through the wallet's `eth_sendTransaction`.
#[derive(Clone)]
pub struct ContractHandle {
    pub name: ContractName,
    pub address: Address,
    abi: &'static ContractAbi,
    provider: Arc<dyn WalletProvider>,
    caller: Address,
    receipt_poll: Duration,
}

impl ContractHandle {
    /// Look up a declared method. Calling anything outside the
    /// signature set is a programming error, not a runtime condition.
    fn method(&self, name: &str) -> &'static Method {
        self.abi
            .methods
            .iter()
            .find(|m| m.name == name)
            .unwrap_or_else(|| panic!("method {name} is not declared on {}", self.name))
    }

    /// Read-only contract call; returns the raw return data.
    pub async fn call(&self, method: &str, args: &[AbiValue]) -> Result<Vec<u8>> {
        let m = self.method(method);
        let data = abi::encode_call(m.signature, args);
        let params = json!([
            {
                "from": self.caller.to_string(),
                "to": self.address.to_string(),
                "data": bytes_to_data(&data),
            },
            "latest",
        ]);
        let value = self.provider.request("eth_call", params).await?;
        data_to_bytes(&value)
    }

    /// Submit a state-changing call through the wallet. Returns the
    /// transaction hash as soon as the wallet accepts it.
    pub async fn send(&self, method: &str, args: &[AbiValue]) -> Result<B256> {
        let m = self.method(method);
        let data = abi::encode_call(m.signature, args);
        let params = json!([{
            "from": self.caller.to_string(),
            "to": self.address.to_string(),
            "data": bytes_to_data(&data),
        }]);
        let value = self.provider.request("eth_sendTransaction", params).await?;
        let tx_hash = hash_from(&value)?;
        debug!("Submitted {}::{method} as {tx_hash}", self.name);
        Ok(tx_hash)
    }

    /// Poll until the transaction is mined. A receipt with a failure
    /// status becomes [`GatewayError::TransactionReverted`].
    pub async fn wait(&self, tx_hash: B256) -> Result<TxReceipt> {
        loop {
            let value = self
                .provider
                .request("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
                .await?;

            if !value.is_null() {
                let wire: WireReceipt = serde_json::from_value(value)?;
                let receipt = TxReceipt::from_wire(wire)?;
                if let Some(block) = receipt.block_number {
                    debug!("Transaction {tx_hash} mined in block {block}");
                }
                if !receipt.status {
                    return Err(GatewayError::TransactionReverted {
                        tx_hash: receipt.tx_hash.to_string(),
                    });
                }
                return Ok(receipt);
            }

            sleep(self.receipt_poll).await;
        }
    }
}

// ─────────────────────────────────────────────────────────
// Receipts
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireReceipt {
    status: Option<String>,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    #[serde(default)]
    logs: Vec<WireLog>,
}

#[derive(Debug, Deserialize)]
struct WireLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub status: bool,
    pub block_number: Option<u64>,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

impl TxReceipt {
    fn from_wire(wire: WireReceipt) -> Result<Self> {
        let tx_hash = wire
            .transaction_hash
            .parse::<B256>()
            .map_err(|e| GatewayError::Parse(format!("Bad receipt hash: {e}")))?;

        // Missing status (pre-Byzantium chains) counts as success.
        let status = match wire.status.as_deref() {
            None => true,
            Some(s) => parse_hex_u64(s)? != 0,
        };

        let block_number = match wire.block_number.as_deref() {
            None => None,
            Some(s) => Some(parse_hex_u64(s)?),
        };

        let logs = wire
            .logs
            .into_iter()
            .map(|log| {
                Ok(LogEntry {
                    address: log
                        .address
                        .parse::<Address>()
                        .map_err(|e| GatewayError::Parse(format!("Bad log address: {e}")))?,
                    topics: log
                        .topics
                        .iter()
                        .map(|t| {
                            t.parse::<B256>()
                                .map_err(|e| GatewayError::Parse(format!("Bad log topic: {e}")))
                        })
                        .collect::<Result<Vec<_>>>()?,
                    data: {
                        let hexpart = log.data.strip_prefix("0x").unwrap_or(&log.data);
                        hex::decode(hexpart)
                            .map_err(|e| GatewayError::Parse(format!("Bad log data: {e}")))?
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tx_hash,
            status,
            block_number,
            logs,
        })
    }

    /// First data word of the named event emitted by `emitter`.
    pub fn event_data_word(&self, emitter: Address, event_signature: &str) -> Option<U256> {
        self.find_log(emitter, event_signature)
            .and_then(|log| abi::word_at(&log.data, 0).ok())
    }

    /// Indexed argument of the named event, zero-based after the
    /// signature topic.
    pub fn event_topic_word(
        &self,
        emitter: Address,
        event_signature: &str,
        index: usize,
    ) -> Option<U256> {
        self.find_log(emitter, event_signature)
            .and_then(|log| log.topics.get(index + 1))
            .map(|t| U256::from_be_slice(t.as_slice()))
    }

    fn find_log(&self, emitter: Address, event_signature: &str) -> Option<&LogEntry> {
        let topic = abi::event_topic(event_signature);
        self.logs
            .iter()
            .find(|log| log.address == emitter && log.topics.first() == Some(&topic))
    }
}

fn parse_hex_u64(s: &str) -> Result<u64> {
    let hexpart = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(hexpart, 16)
        .map_err(|e| GatewayError::Parse(format!("Bad hex value {s}: {e}")))
}
