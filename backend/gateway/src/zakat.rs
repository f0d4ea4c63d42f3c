//! Zakat donation pool.
//!
//! Donations are EDU token transfers into the pool contract, so every
//! donation is a two-step write: approve the pool for the amount, then
//! call donate once the approval confirms. Confirmed donations land in
//! the zakat_donations mirror table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::abi::{self, AbiValue};
use crate::context::{GatewayContext, InFlight};
use crate::db::{self, NewDonation};
use crate::errors::{GatewayError, Result};
use crate::registry::{ContractName, TxReceipt};
use crate::units::{format_edu, parse_edu};

/// Pool totals and the caller's token balance, in display units.
#[derive(Debug, Clone, Serialize)]
pub struct ZakatSummary {
    pub user_donations: String,
    pub total_donations: String,
    pub token_balance: String,
}

impl Default for ZakatSummary {
    fn default() -> Self {
        Self {
            user_donations: "0".to_string(),
            total_donations: "0".to_string(),
            token_balance: "0".to_string(),
        }
    }
}

pub struct ZakatService {
    ctx: Arc<GatewayContext>,
    busy: AtomicBool,
    summary: RwLock<ZakatSummary>,
}

impl ZakatService {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            busy: AtomicBool::new(false),
            summary: RwLock::new(ZakatSummary::default()),
        }
    }

    #[allow(dead_code)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Last refreshed pool and balance figures.
    #[allow(dead_code)]
    pub async fn summary(&self) -> ZakatSummary {
        self.summary.read().await.clone()
    }

    /// Re-read the caller's donations, the pool total, and the caller's
    /// token balance. Quiet no-op while the session or either contract
    /// is unavailable.
    pub async fn refresh(&self) -> Result<ZakatSummary> {
        let _busy = InFlight::begin(&self.busy);
        match self.refresh_inner().await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.ctx.notifier.failure("Failed to Load Data", &e);
                Err(e)
            }
        }
    }

    async fn refresh_inner(&self) -> Result<ZakatSummary> {
        let snapshot = self.ctx.session.snapshot().await;
        let handles = self.ctx.registry.handles(&snapshot);
        let (Some(account), Some(zakat_pool), Some(edu_token)) =
            (snapshot.account, handles.zakat_pool, handles.edu_token)
        else {
            return Ok(self.summary.read().await.clone());
        };

        let donated = zakat_pool
            .call("donations", &[AbiValue::Address(account)])
            .await?;
        let total = zakat_pool.call("totalTokenDonations", &[]).await?;
        let balance = edu_token
            .call("balanceOf", &[AbiValue::Address(account)])
            .await?;

        let summary = ZakatSummary {
            user_donations: format_edu(abi::decode_uint(&donated)?),
            total_donations: format_edu(abi::decode_uint(&total)?),
            token_balance: format_edu(abi::decode_uint(&balance)?),
        };

        *self.summary.write().await = summary.clone();
        Ok(summary)
    }

    /// Donate EDU tokens to the pool. `amount` is in display units
    /// ("5" or "2.5"); the approval for the pool is submitted first and
    /// the donation only goes out once the approval confirms.
    pub async fn donate(&self, amount: &str) -> Result<TxReceipt> {
        let _busy = InFlight::begin(&self.busy);
        match self.donate_inner(amount).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.ctx.notifier.failure("Donation Failed", &e);
                Err(e)
            }
        }
    }

    async fn donate_inner(&self, amount: &str) -> Result<TxReceipt> {
        let wei = parse_edu(amount)?;
        if wei.is_zero() {
            return Err(GatewayError::InvalidInput(
                "Donation amount must be greater than zero".to_string(),
            ));
        }

        let snapshot = self.ctx.session.snapshot().await;
        let handles = self.ctx.registry.handles(&snapshot);
        let (Some(account), Some(zakat_pool), Some(edu_token)) =
            (snapshot.account, handles.zakat_pool, handles.edu_token)
        else {
            return Err(GatewayError::ContractNotInitialized(
                ContractName::ZakatPool,
            ));
        };

        self.ctx
            .approve_spend(&edu_token, zakat_pool.address, wei)
            .await?;

        let donate_tx = zakat_pool.send("donate", &[AbiValue::Uint(wei)]).await?;
        self.ctx.notifier.info(
            "Donation Submitted",
            "Donation transaction submitted to blockchain",
        );
        let receipt = zakat_pool.wait(donate_tx).await?;

        if let Err(e) = self.mirror_donation(&account, amount, &receipt).await {
            self.ctx.mirror_failure("donation row", &e);
        }

        self.ctx.notifier.info(
            "Donation Successful",
            format!("Successfully donated {amount} EDU tokens"),
        );

        if let Err(e) = self.refresh_inner().await {
            self.ctx.notifier.failure("Failed to Load Data", &e);
        }

        Ok(receipt)
    }

    async fn mirror_donation(
        &self,
        account: &Address,
        amount: &str,
        receipt: &TxReceipt,
    ) -> Result<()> {
        let donor_id = db::ensure_profile(&self.ctx.pool, &db::wallet_key(account)).await?;
        db::insert_donation(
            &self.ctx.pool,
            &NewDonation {
                donor_id,
                amount_wei: parse_edu(amount)?.to_string(),
                amount_display: amount.parse().unwrap_or(0.0),
                transaction_hash: receipt.tx_hash.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    /// Withdraw pooled tokens to a recipient. The pool contract decides
    /// who may withdraw; an unauthorized caller surfaces as a revert.
    pub async fn withdraw(&self, to: Address, amount: &str) -> Result<TxReceipt> {
        let _busy = InFlight::begin(&self.busy);
        match self.withdraw_inner(to, amount).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.ctx.notifier.failure("Withdrawal Failed", &e);
                Err(e)
            }
        }
    }

    async fn withdraw_inner(&self, to: Address, amount: &str) -> Result<TxReceipt> {
        let wei = parse_edu(amount)?;
        if wei.is_zero() {
            return Err(GatewayError::InvalidInput(
                "Withdrawal amount must be greater than zero".to_string(),
            ));
        }

        let snapshot = self.ctx.session.snapshot().await;
        let zakat_pool = self
            .ctx
            .registry
            .handles(&snapshot)
            .zakat_pool
            .ok_or(GatewayError::ContractNotInitialized(
                ContractName::ZakatPool,
            ))?;

        let tx_hash = zakat_pool
            .send("withdraw", &[AbiValue::Address(to), AbiValue::Uint(wei)])
            .await?;
        self.ctx.notifier.info(
            "Withdrawal Submitted",
            "Withdrawal transaction submitted",
        );

        let receipt = zakat_pool.wait(tx_hash).await?;
        self.ctx.notifier.info(
            "Withdrawal Successful",
            format!("Successfully withdrew {amount} EDU tokens"),
        );

        if let Err(e) = self.refresh_inner().await {
            self.ctx.notifier.failure("Failed to Load Data", &e);
        }

        Ok(receipt)
    }
}
