//! Test fixtures: an in-memory wallet provider that executes contract
//! calls against plain maps, plus pool/context builders shared across
//! the service tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::abi;
use crate::config::{ChainDeployment, Deployments};
use crate::context::GatewayContext;
use crate::errors::{GatewayError, Result};
use crate::notify::{Notice, Notifier};
use crate::provider::{bytes_to_data, to_quantity, ProviderEvent, WalletProvider};
use crate::registry::{ContractRegistry, COURSE_CREATED_EVENT, ENROLLED_EVENT, TRANSFER_EVENT};
use crate::session::WalletSession;

pub const ACCOUNT_A: Address = Address::repeat_byte(0xaa);
pub const ACCOUNT_B: Address = Address::repeat_byte(0xbb);

pub const REPUTATION_ADDR: Address = Address::repeat_byte(0x11);
pub const WEBINAR_NFT_ADDR: Address = Address::repeat_byte(0x22);
pub const SCHOLAR_DAO_ADDR: Address = Address::repeat_byte(0x33);
pub const ZAKAT_POOL_ADDR: Address = Address::repeat_byte(0x44);
pub const COURSE_MANAGER_ADDR: Address = Address::repeat_byte(0x55);
pub const EDU_TOKEN_ADDR: Address = Address::repeat_byte(0x66);

pub const TEST_CHAIN: u64 = 31415926;

/// Deployments covering all six contracts on the test chain.
pub fn test_deployments() -> Deployments {
    let mut deployments = Deployments::new();
    deployments.insert(
        TEST_CHAIN,
        ChainDeployment {
            reputation: Some(REPUTATION_ADDR.to_string()),
            webinar_nft: Some(WEBINAR_NFT_ADDR.to_string()),
            scholar_dao: Some(SCHOLAR_DAO_ADDR.to_string()),
            zakat_pool: Some(ZAKAT_POOL_ADDR.to_string()),
            course_manager: Some(COURSE_MANAGER_ADDR.to_string()),
            edu_token: Some(EDU_TOKEN_ADDR.to_string()),
        },
    );
    deployments
}

/// Fresh in-memory mirror with migrations applied. One connection, so
/// every query sees the same database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

/// A ready-to-use context over a fresh fake provider and mirror.
pub async fn test_context() -> (Arc<GatewayContext>, Arc<FakeProvider>) {
    let fake = FakeProvider::online();
    let notifier = Notifier::default();
    let provider: Arc<dyn WalletProvider> = fake.clone();
    let session = Arc::new(WalletSession::new(provider.clone(), notifier.clone()));
    let registry = ContractRegistry::new(provider, test_deployments(), Duration::from_millis(1));
    let pool = test_pool().await;
    let ctx = Arc::new(GatewayContext {
        session,
        registry,
        pool,
        notifier,
    });
    (ctx, fake)
}

pub fn drain_notices(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        out.push(notice);
    }
    out
}

// ─────────────────────────────────────────────────────────
// Fake wallet provider
// ─────────────────────────────────────────────────────────

/// Signatures the fake can execute; anything else falls through to a
/// zero word on reads and a plain receipt on writes.
const KNOWN_SIGNATURES: &[&str] = &[
    "award(address,uint256)",
    "getReputation(address)",
    "verifyScholar(address,string)",
    "revokeScholar(address)",
    "isScholarVerified(address)",
    "donate(uint256)",
    "withdraw(address,uint256)",
    "donations(address)",
    "totalTokenDonations()",
    "createCourse(string,string,uint256)",
    "enroll(uint256)",
    "mintTicket(address,string)",
    "balanceOf(address)",
    "approve(address,uint256)",
    "transfer(address,uint256)",
    "allowance(address,address)",
];

enum FakeFailure {
    Reject(String),
    Revert,
}

#[derive(Default)]
struct FakeState {
    accounts: Vec<Address>,
    chain_id: u64,
    balances: HashMap<Address, U256>,
    reputation: HashMap<Address, U256>,
    verified: HashMap<Address, bool>,
    token_balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    donations: HashMap<Address, U256>,
    total_donations: U256,
    nft_balances: HashMap<Address, u64>,
    next_course_id: u64,
    next_token_id: u64,
    next_tx: u64,
    receipts: HashMap<String, Value>,
    fail_next: HashMap<String, VecDeque<FakeFailure>>,
    omit_event: HashSet<String>,
    calls: Vec<(String, String)>,
    sent_ops: Vec<String>,
}

/// Wallet provider double. Contract writes execute against in-memory
/// maps and produce a wire-shaped receipt immediately, so `wait()`
/// resolves on its first poll.
pub struct FakeProvider {
    state: Mutex<FakeState>,
    events: broadcast::Sender<ProviderEvent>,
}

impl FakeProvider {
    /// A provider with one unlocked account on the test chain.
    pub fn online() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            state: Mutex::new(FakeState {
                accounts: vec![ACCOUNT_A],
                chain_id: TEST_CHAIN,
                next_course_id: 1,
                next_token_id: 1,
                next_tx: 1,
                ..FakeState::default()
            }),
            events,
        })
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.lock().accounts = accounts;
    }

    pub fn set_chain(&self, chain_id: u64) {
        self.lock().chain_id = chain_id;
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.lock().balances.insert(address, balance);
    }

    pub fn set_reputation(&self, address: Address, points: U256) {
        self.lock().reputation.insert(address, points);
    }

    pub fn reputation_of(&self, address: Address) -> U256 {
        self.lock().reputation.get(&address).copied().unwrap_or_default()
    }

    pub fn scholar_verified(&self, address: Address) -> bool {
        self.lock().verified.get(&address).copied().unwrap_or(false)
    }

    pub fn set_token_balance(&self, address: Address, balance: U256) {
        self.lock().token_balances.insert(address, balance);
    }

    pub fn set_donation(&self, address: Address, amount: U256) {
        self.lock().donations.insert(address, amount);
    }

    pub fn donation_of(&self, address: Address) -> U256 {
        self.lock().donations.get(&address).copied().unwrap_or_default()
    }

    pub fn set_total_donations(&self, total: U256) {
        self.lock().total_donations = total;
    }

    pub fn total_donations(&self) -> U256 {
        self.lock().total_donations
    }

    pub fn allowance_of(&self, owner: Address, spender: Address) -> U256 {
        self.lock()
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    /// Fail the next occurrence of `op` (an RPC method or a contract
    /// method name) as a wallet-side rejection.
    pub fn reject_next(&self, op: &str, msg: &str) {
        self.lock()
            .fail_next
            .entry(op.to_string())
            .or_default()
            .push_back(FakeFailure::Reject(msg.to_string()));
    }

    /// Let the next occurrence of `op` submit, then mine it with a
    /// failure status.
    pub fn revert_next(&self, op: &str) {
        self.lock()
            .fail_next
            .entry(op.to_string())
            .or_default()
            .push_back(FakeFailure::Revert);
    }

    /// Drop the event log from the next receipt `op` produces.
    pub fn omit_next_event(&self, op: &str) {
        self.lock().omit_event.insert(op.to_string());
    }

    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    /// Every request seen, in order, as (method, params).
    pub fn calls(&self) -> Vec<(String, String)> {
        self.lock().calls.clone()
    }

    /// Contract method names submitted via eth_sendTransaction, in
    /// order. Rejected submissions never appear here.
    pub fn sent_ops(&self) -> Vec<String> {
        self.lock().sent_ops.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl WalletProvider for FakeProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut state = self.lock();
        state.calls.push((method.to_string(), params.to_string()));

        let op = match method {
            "eth_call" | "eth_sendTransaction" => op_for(&params),
            other => other.to_string(),
        };
        let reverted = match state.take_failure(&op) {
            Some(FakeFailure::Reject(msg)) => return Err(GatewayError::UserRejected(msg)),
            Some(FakeFailure::Revert) => true,
            None => false,
        };

        match method {
            "eth_requestAccounts" | "eth_accounts" => Ok(json!(state
                .accounts
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>())),
            "eth_chainId" => Ok(json!(to_quantity(state.chain_id))),
            "eth_getBalance" => {
                let address = param_address(&params, 0);
                let balance = state.balances.get(&address).copied().unwrap_or_default();
                Ok(json!(format!("0x{balance:x}")))
            }
            "wallet_switchEthereumChain" => {
                let raw = params[0]["chainId"].as_str().unwrap_or("0x0");
                let hexpart = raw.trim_start_matches("0x");
                state.chain_id = u64::from_str_radix(hexpart, 16).unwrap_or(state.chain_id);
                Ok(Value::Null)
            }
            "eth_call" => {
                let out = state.execute_call(&params);
                Ok(json!(bytes_to_data(&out)))
            }
            "eth_sendTransaction" => {
                let hash = state.execute_send(&op, &params, reverted);
                Ok(json!(hash.to_string()))
            }
            "eth_getTransactionReceipt" => {
                let hash = params[0].as_str().unwrap_or_default();
                Ok(state.receipts.get(hash).cloned().unwrap_or(Value::Null))
            }
            other => Err(GatewayError::Rpc {
                code: -32601,
                message: format!("Method {other} not found"),
            }),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

impl FakeState {
    fn take_failure(&mut self, op: &str) -> Option<FakeFailure> {
        self.fail_next.get_mut(op).and_then(|queue| queue.pop_front())
    }

    fn execute_call(&self, params: &Value) -> Vec<u8> {
        let to = tx_address(params, "to");
        let data = tx_data(params);

        let word = match (to, op_for(params).as_str()) {
            (a, "getReputation") if a == REPUTATION_ADDR => self
                .reputation
                .get(&addr_arg(&data, 0))
                .copied()
                .unwrap_or_default(),
            (a, "isScholarVerified") if a == SCHOLAR_DAO_ADDR => {
                let verified = self.verified.get(&addr_arg(&data, 0)).copied();
                U256::from(verified.unwrap_or(false) as u64)
            }
            (a, "donations") if a == ZAKAT_POOL_ADDR => self
                .donations
                .get(&addr_arg(&data, 0))
                .copied()
                .unwrap_or_default(),
            (a, "totalTokenDonations") if a == ZAKAT_POOL_ADDR => self.total_donations,
            (a, "balanceOf") if a == EDU_TOKEN_ADDR => self
                .token_balances
                .get(&addr_arg(&data, 0))
                .copied()
                .unwrap_or_default(),
            (a, "balanceOf") if a == WEBINAR_NFT_ADDR => U256::from(
                self.nft_balances
                    .get(&addr_arg(&data, 0))
                    .copied()
                    .unwrap_or(0),
            ),
            (a, "allowance") if a == EDU_TOKEN_ADDR => self
                .allowances
                .get(&(addr_arg(&data, 0), addr_arg(&data, 1)))
                .copied()
                .unwrap_or_default(),
            _ => U256::ZERO,
        };
        word.to_be_bytes::<32>().to_vec()
    }

    fn execute_send(&mut self, op: &str, params: &Value, reverted: bool) -> B256 {
        let from = tx_address(params, "from");
        let to = tx_address(params, "to");
        let data = tx_data(params);

        self.sent_ops.push(op.to_string());
        let mut logs = Vec::new();
        if !reverted {
            self.apply_effect(op, from, to, &data, &mut logs);
        }
        if self.omit_event.remove(op) {
            logs.clear();
        }

        let n = self.next_tx;
        self.next_tx += 1;
        let tx_hash = B256::from(U256::from(n));

        let receipt = json!({
            "transactionHash": tx_hash.to_string(),
            "status": if reverted { "0x0" } else { "0x1" },
            "blockNumber": to_quantity(n),
            "logs": logs,
        });
        self.receipts.insert(tx_hash.to_string(), receipt);
        tx_hash
    }

    fn apply_effect(
        &mut self,
        op: &str,
        from: Address,
        to: Address,
        data: &[u8],
        logs: &mut Vec<Value>,
    ) {
        match (to, op) {
            (a, "award") if a == REPUTATION_ADDR => {
                let target = addr_arg(data, 0);
                let amount = word_arg(data, 1);
                let entry = self.reputation.entry(target).or_default();
                *entry = entry.saturating_add(amount);
            }
            (a, "verifyScholar") if a == SCHOLAR_DAO_ADDR => {
                self.verified.insert(addr_arg(data, 0), true);
            }
            (a, "revokeScholar") if a == SCHOLAR_DAO_ADDR => {
                self.verified.insert(addr_arg(data, 0), false);
            }
            (a, "approve") if a == EDU_TOKEN_ADDR => {
                self.allowances
                    .insert((from, addr_arg(data, 0)), word_arg(data, 1));
            }
            (a, "donate") if a == ZAKAT_POOL_ADDR => {
                let amount = word_arg(data, 0);
                let entry = self.donations.entry(from).or_default();
                *entry = entry.saturating_add(amount);
                self.total_donations = self.total_donations.saturating_add(amount);
                let balance = self.token_balances.entry(from).or_default();
                *balance = balance.saturating_sub(amount);
            }
            (a, "withdraw") if a == ZAKAT_POOL_ADDR => {
                let amount = word_arg(data, 1);
                self.total_donations = self.total_donations.saturating_sub(amount);
            }
            (a, "createCourse") if a == COURSE_MANAGER_ADDR => {
                let id = self.next_course_id;
                self.next_course_id += 1;
                let mut event_data = U256::from(id).to_be_bytes::<32>().to_vec();
                event_data.extend_from_slice(&address_word(from));
                logs.push(json!({
                    "address": COURSE_MANAGER_ADDR.to_string(),
                    "topics": [abi::event_topic(COURSE_CREATED_EVENT).to_string()],
                    "data": bytes_to_data(&event_data),
                }));
            }
            (a, "enroll") if a == COURSE_MANAGER_ADDR => {
                let mut event_data = address_word(from).to_vec();
                event_data.extend_from_slice(&word_arg(data, 0).to_be_bytes::<32>());
                logs.push(json!({
                    "address": COURSE_MANAGER_ADDR.to_string(),
                    "topics": [abi::event_topic(ENROLLED_EVENT).to_string()],
                    "data": bytes_to_data(&event_data),
                }));
            }
            (a, "mintTicket") if a == WEBINAR_NFT_ADDR => {
                let recipient = addr_arg(data, 0);
                let id = self.next_token_id;
                self.next_token_id += 1;
                *self.nft_balances.entry(recipient).or_default() += 1;
                logs.push(json!({
                    "address": WEBINAR_NFT_ADDR.to_string(),
                    "topics": [
                        abi::event_topic(TRANSFER_EVENT).to_string(),
                        B256::ZERO.to_string(),
                        B256::from(U256::from_be_slice(recipient.as_slice())).to_string(),
                        B256::from(U256::from(id)).to_string(),
                    ],
                    "data": "0x",
                }));
            }
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────
// Wire helpers
// ─────────────────────────────────────────────────────────

fn op_for(params: &Value) -> String {
    let data = params[0]["data"].as_str().unwrap_or_default();
    let bytes = hex::decode(data.trim_start_matches("0x")).unwrap_or_default();
    if bytes.len() < 4 {
        return "unknown".to_string();
    }
    for signature in KNOWN_SIGNATURES {
        if bytes[..4] == abi::selector(signature) {
            let name = &signature[..signature.find('(').unwrap_or(signature.len())];
            return name.to_string();
        }
    }
    "unknown".to_string()
}

fn param_address(params: &Value, index: usize) -> Address {
    params[index]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Address::ZERO)
}

fn tx_address(params: &Value, field: &str) -> Address {
    params[0][field]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Address::ZERO)
}

fn tx_data(params: &Value) -> Vec<u8> {
    let raw = params[0]["data"].as_str().unwrap_or_default();
    hex::decode(raw.trim_start_matches("0x")).unwrap_or_default()
}

fn word_arg(data: &[u8], index: usize) -> U256 {
    let start = 4 + index * 32;
    U256::from_be_slice(&data[start..start + 32])
}

fn addr_arg(data: &[u8], index: usize) -> Address {
    let start = 4 + index * 32;
    Address::from_slice(&data[start + 12..start + 32])
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}
