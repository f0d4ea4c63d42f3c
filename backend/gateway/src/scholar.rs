//! Scholar verification through the ScholarDAO contract.
//!
//! Verification and revocation are DAO-gated on chain; the gateway
//! submits them as-is and mirrors the outcome. Each confirmed
//! verification also lands as a row in scholar_verifications so the
//! mirror keeps a history, not just the current flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::abi::{self, AbiValue};
use crate::context::{GatewayContext, InFlight};
use crate::db::{self, NewVerification};
use crate::errors::{GatewayError, Result};
use crate::registry::{ContractName, TxReceipt};

pub struct ScholarService {
    ctx: Arc<GatewayContext>,
    busy: AtomicBool,
    verified: RwLock<bool>,
}

impl ScholarService {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            busy: AtomicBool::new(false),
            verified: RwLock::new(false),
        }
    }

    #[allow(dead_code)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Last verification flag read for the session account.
    #[allow(dead_code)]
    pub async fn is_verified(&self) -> bool {
        *self.verified.read().await
    }

    /// Re-read the session account's verification flag and mirror it.
    /// Quiet no-op while the session or contract is unavailable.
    pub async fn check(&self) -> Result<bool> {
        let _busy = InFlight::begin(&self.busy);
        match self.check_inner().await {
            Ok(verified) => Ok(verified),
            Err(e) => {
                self.ctx.notifier.failure("Verification Check Failed", &e);
                Err(e)
            }
        }
    }

    async fn check_inner(&self) -> Result<bool> {
        let snapshot = self.ctx.session.snapshot().await;
        let Some(account) = snapshot.account else {
            return Ok(*self.verified.read().await);
        };
        let Some(scholar_dao) = self.ctx.registry.handles(&snapshot).scholar_dao else {
            return Ok(*self.verified.read().await);
        };

        let data = scholar_dao
            .call("isScholarVerified", &[AbiValue::Address(account)])
            .await?;
        let verified = abi::decode_bool(&data)?;

        *self.verified.write().await = verified;

        let wallet = db::wallet_key(&account);
        if let Err(e) = db::set_scholar_flag(&self.ctx.pool, &wallet, verified).await {
            self.ctx.mirror_failure("scholar flag", &e);
        }

        Ok(verified)
    }

    /// Verify a scholar with supporting metadata (credentials,
    /// institution). DAO membership is enforced by the contract.
    pub async fn verify(&self, scholar: Address, metadata: &str) -> Result<TxReceipt> {
        let _busy = InFlight::begin(&self.busy);
        match self.verify_inner(scholar, metadata).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.ctx.notifier.failure("Verification Failed", &e);
                Err(e)
            }
        }
    }

    async fn verify_inner(&self, scholar: Address, metadata: &str) -> Result<TxReceipt> {
        if metadata.trim().is_empty() {
            return Err(GatewayError::InvalidInput(
                "Verification metadata must not be empty".to_string(),
            ));
        }

        let snapshot = self.ctx.session.snapshot().await;
        let scholar_dao = self
            .ctx
            .registry
            .handles(&snapshot)
            .scholar_dao
            .ok_or(GatewayError::ContractNotInitialized(
                ContractName::ScholarDao,
            ))?;

        let tx_hash = scholar_dao
            .send(
                "verifyScholar",
                &[
                    AbiValue::Address(scholar),
                    AbiValue::Str(metadata.to_string()),
                ],
            )
            .await?;
        self.ctx.notifier.info(
            "Transaction Submitted",
            "Scholar verification transaction submitted",
        );

        let receipt = scholar_dao.wait(tx_hash).await?;

        let verifier = snapshot.account.map(|a| db::wallet_key(&a));
        if let Err(e) = self
            .mirror_verification(&scholar, verifier, metadata, &receipt)
            .await
        {
            self.ctx.mirror_failure("verification row", &e);
        }

        self.ctx.notifier.info(
            "Scholar Verified",
            "Scholar successfully verified on blockchain",
        );

        if snapshot.account == Some(scholar) {
            if let Err(e) = self.check_inner().await {
                self.ctx.notifier.failure("Verification Check Failed", &e);
            }
        }

        Ok(receipt)
    }

    async fn mirror_verification(
        &self,
        scholar: &Address,
        verifier: Option<String>,
        metadata: &str,
        receipt: &TxReceipt,
    ) -> Result<()> {
        let scholar_id = db::ensure_profile(&self.ctx.pool, &db::wallet_key(scholar)).await?;
        db::insert_verification(
            &self.ctx.pool,
            &NewVerification {
                scholar_id,
                verifier_address: verifier.unwrap_or_default(),
                metadata: metadata.to_string(),
                transaction_hash: receipt.tx_hash.to_string(),
                verified_at: Utc::now().to_rfc3339(),
            },
        )
        .await?;
        Ok(())
    }

    /// Revoke a scholar's verification.
    pub async fn revoke(&self, scholar: Address) -> Result<TxReceipt> {
        let _busy = InFlight::begin(&self.busy);
        match self.revoke_inner(scholar).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.ctx.notifier.failure("Revocation Failed", &e);
                Err(e)
            }
        }
    }

    async fn revoke_inner(&self, scholar: Address) -> Result<TxReceipt> {
        let snapshot = self.ctx.session.snapshot().await;
        let scholar_dao = self
            .ctx
            .registry
            .handles(&snapshot)
            .scholar_dao
            .ok_or(GatewayError::ContractNotInitialized(
                ContractName::ScholarDao,
            ))?;

        let tx_hash = scholar_dao
            .send("revokeScholar", &[AbiValue::Address(scholar)])
            .await?;
        self.ctx.notifier.info(
            "Transaction Submitted",
            "Scholar revocation transaction submitted",
        );

        let receipt = scholar_dao.wait(tx_hash).await?;

        let wallet = db::wallet_key(&scholar);
        if let Err(e) = db::set_scholar_flag(&self.ctx.pool, &wallet, false).await {
            self.ctx.mirror_failure("scholar flag", &e);
        }

        self.ctx.notifier.info(
            "Scholar Revoked",
            "Scholar verification successfully revoked",
        );

        if snapshot.account == Some(scholar) {
            if let Err(e) = self.check_inner().await {
                self.ctx.notifier.failure("Verification Check Failed", &e);
            }
        }

        Ok(receipt)
    }
}
