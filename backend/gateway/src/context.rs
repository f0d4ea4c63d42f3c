//! Shared plumbing for the domain services.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use sqlx::SqlitePool;
use tracing::error;

use crate::abi::AbiValue;
use crate::errors::{GatewayError, Result};
use crate::notify::Notifier;
use crate::registry::{ContractHandle, ContractHandles, ContractRegistry, TxReceipt};
use crate::session::WalletSession;

/// Everything a domain service needs: the session for snapshots, the
/// registry for handles, the mirror pool, and the notifier.
pub struct GatewayContext {
    pub session: Arc<WalletSession>,
    pub registry: ContractRegistry,
    pub pool: SqlitePool,
    pub notifier: Notifier,
}

impl GatewayContext {
    /// Handles for the current session snapshot. All `None` while
    /// disconnected.
    pub async fn handles(&self) -> ContractHandles {
        self.registry.handles(&self.session.snapshot().await)
    }

    /// Record a failed mirror write. The chain write already succeeded,
    /// so the surrounding operation carries on; chain state is
    /// authoritative and the mirror catches up on the next refresh.
    pub fn mirror_failure(&self, what: &str, err: &GatewayError) {
        error!(
            "{}",
            GatewayError::MirrorWriteFailed(format!("{what}: {err}"))
        );
    }

    /// Approve `spender` for `wei` of EDU and wait for the approval to
    /// confirm. Every pay-with-EDU flow goes through here, so the
    /// approve-then-act ordering lives in one place: the follow-up call
    /// must not be submitted unless this returns Ok.
    pub async fn approve_spend(
        &self,
        edu_token: &ContractHandle,
        spender: Address,
        wei: U256,
    ) -> Result<TxReceipt> {
        let approve_tx = edu_token
            .send(
                "approve",
                &[AbiValue::Address(spender), AbiValue::Uint(wei)],
            )
            .await?;
        self.notifier.info(
            "Approval Submitted",
            "Token approval transaction submitted",
        );
        edu_token.wait(approve_tx).await
    }
}

/// Marks a service busy for the guard's lifetime. Cleared on drop, so
/// early returns and panics cannot leave the flag stuck.
pub(crate) struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlight<'a> {
    pub(crate) fn begin(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
