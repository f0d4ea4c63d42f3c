//! On-chain reputation points.
//!
//! Reads the caller's total from the Reputation contract and mirrors it
//! into the profiles table; awards go through the wallet and the new
//! total is re-read once the transaction confirms.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use tokio::sync::RwLock;

use crate::abi::{self, AbiValue};
use crate::context::{GatewayContext, InFlight};
use crate::db;
use crate::errors::{GatewayError, Result};
use crate::registry::{ContractName, TxReceipt};

pub struct ReputationService {
    ctx: Arc<GatewayContext>,
    busy: AtomicBool,
    points: RwLock<i64>,
}

impl ReputationService {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            busy: AtomicBool::new(false),
            points: RwLock::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Last total read from the chain.
    #[allow(dead_code)]
    pub async fn points(&self) -> i64 {
        *self.points.read().await
    }

    /// Re-read the caller's total from the chain and mirror it. A
    /// missing session or contract handle is a quiet no-op so callers
    /// can refresh opportunistically.
    pub async fn refresh(&self) -> Result<i64> {
        let _busy = InFlight::begin(&self.busy);
        match self.refresh_inner().await {
            Ok(points) => Ok(points),
            Err(e) => {
                self.ctx.notifier.failure("Failed to Load Reputation", &e);
                Err(e)
            }
        }
    }

    async fn refresh_inner(&self) -> Result<i64> {
        let snapshot = self.ctx.session.snapshot().await;
        let Some(account) = snapshot.account else {
            return Ok(*self.points.read().await);
        };
        let Some(reputation) = self.ctx.registry.handles(&snapshot).reputation else {
            return Ok(*self.points.read().await);
        };

        let data = reputation
            .call("getReputation", &[AbiValue::Address(account)])
            .await?;
        let total = u64::try_from(abi::decode_uint(&data)?)
            .ok()
            .and_then(|v| i64::try_from(v).ok())
            .ok_or_else(|| {
                GatewayError::Parse("Reputation total out of range".to_string())
            })?;

        *self.points.write().await = total;

        let wallet = db::wallet_key(&account);
        if let Err(e) = db::set_reputation(&self.ctx.pool, &wallet, total).await {
            self.ctx.mirror_failure("reputation points", &e);
        }

        Ok(total)
    }

    /// Award points to a wallet. The contract enforces who may award;
    /// an unauthorized caller surfaces as a revert.
    pub async fn award(&self, target: Address, amount: u64) -> Result<TxReceipt> {
        let _busy = InFlight::begin(&self.busy);
        match self.award_inner(target, amount).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.ctx.notifier.failure("Transaction Failed", &e);
                Err(e)
            }
        }
    }

    async fn award_inner(&self, target: Address, amount: u64) -> Result<TxReceipt> {
        if amount == 0 {
            return Err(GatewayError::InvalidInput(
                "Award amount must be greater than zero".to_string(),
            ));
        }

        let snapshot = self.ctx.session.snapshot().await;
        let reputation = self
            .ctx
            .registry
            .handles(&snapshot)
            .reputation
            .ok_or(GatewayError::ContractNotInitialized(
                ContractName::Reputation,
            ))?;

        let tx_hash = reputation
            .send(
                "award",
                &[
                    AbiValue::Address(target),
                    AbiValue::Uint(U256::from(amount)),
                ],
            )
            .await?;
        self.ctx.notifier.info(
            "Transaction Submitted",
            "Reputation award transaction submitted to blockchain",
        );

        let receipt = reputation.wait(tx_hash).await?;
        self.ctx.notifier.info(
            "Reputation Awarded",
            format!("Successfully awarded {amount} reputation points"),
        );

        // Awarding yourself changes the number on screen, so re-read it.
        if snapshot.account == Some(target) {
            if let Err(e) = self.refresh_inner().await {
                self.ctx.notifier.failure("Failed to Load Reputation", &e);
            }
        }

        Ok(receipt)
    }
}
