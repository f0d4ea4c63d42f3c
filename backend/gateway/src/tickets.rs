//! Webinar ticket NFTs.
//!
//! Tickets are ERC-721 mints; the token id assigned by the contract
//! comes back as the third indexed argument of the Transfer event.
//! Ticket metadata (title, date) lives only in the mirror; the chain
//! stores the owner and the metadata URI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use chrono::DateTime;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::abi::{self, AbiValue};
use crate::context::{GatewayContext, InFlight};
use crate::db::{self, NewNft, NftRecord};
use crate::errors::{GatewayError, Result};
use crate::registry::{ContractName, TxReceipt, TRANSFER_EVENT};

pub struct TicketService {
    ctx: Arc<GatewayContext>,
    busy: AtomicBool,
    tickets: RwLock<Vec<NftRecord>>,
}

impl TicketService {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            busy: AtomicBool::new(false),
            tickets: RwLock::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Last loaded ticket listing.
    #[allow(dead_code)]
    pub async fn tickets(&self) -> Vec<NftRecord> {
        self.tickets.read().await.clone()
    }

    /// Reload the caller's tickets. The on-chain balance is read as an
    /// existence check; the metadata itself comes from the mirror.
    /// Quiet no-op while the session or contract is unavailable.
    pub async fn refresh(&self) -> Result<Vec<NftRecord>> {
        let _busy = InFlight::begin(&self.busy);
        match self.refresh_inner().await {
            Ok(tickets) => Ok(tickets),
            Err(e) => {
                self.ctx.notifier.failure("Failed to Load NFTs", &e);
                Err(e)
            }
        }
    }

    async fn refresh_inner(&self) -> Result<Vec<NftRecord>> {
        let snapshot = self.ctx.session.snapshot().await;
        let (Some(account), Some(webinar_nft)) = (
            snapshot.account,
            self.ctx.registry.handles(&snapshot).webinar_nft,
        ) else {
            return Ok(self.tickets.read().await.clone());
        };

        let data = webinar_nft
            .call("balanceOf", &[AbiValue::Address(account)])
            .await?;
        let on_chain = abi::decode_uint(&data)?;
        debug!("Wallet holds {on_chain} webinar tickets on chain");

        let tickets = db::list_nfts_for(&self.ctx.pool, &db::wallet_key(&account)).await?;
        *self.tickets.write().await = tickets.clone();
        Ok(tickets)
    }

    /// Mint a webinar ticket to `to`. `date` must be RFC 3339; it is
    /// stored in the mirror, not on chain.
    pub async fn mint(
        &self,
        to: Address,
        title: &str,
        date: &str,
        metadata_uri: &str,
    ) -> Result<TxReceipt> {
        let _busy = InFlight::begin(&self.busy);
        match self.mint_inner(to, title, date, metadata_uri).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.ctx.notifier.failure("Minting Failed", &e);
                Err(e)
            }
        }
    }

    async fn mint_inner(
        &self,
        to: Address,
        title: &str,
        date: &str,
        metadata_uri: &str,
    ) -> Result<TxReceipt> {
        if title.trim().is_empty() {
            return Err(GatewayError::InvalidInput(
                "Webinar title must not be empty".to_string(),
            ));
        }
        let date = DateTime::parse_from_rfc3339(date)
            .map_err(|e| {
                GatewayError::InvalidInput(format!("Webinar date must be RFC 3339: {e}"))
            })?
            .to_rfc3339();

        let snapshot = self.ctx.session.snapshot().await;
        let webinar_nft = self
            .ctx
            .registry
            .handles(&snapshot)
            .webinar_nft
            .ok_or(GatewayError::ContractNotInitialized(
                ContractName::WebinarNft,
            ))?;

        let tx_hash = webinar_nft
            .send(
                "mintTicket",
                &[
                    AbiValue::Address(to),
                    AbiValue::Str(metadata_uri.to_string()),
                ],
            )
            .await?;
        self.ctx.notifier.info(
            "Transaction Submitted",
            "NFT minting transaction submitted to blockchain",
        );

        let receipt = webinar_nft.wait(tx_hash).await?;

        // tokenId is the third argument of Transfer(from, to, tokenId).
        let token_id = receipt
            .event_topic_word(webinar_nft.address, TRANSFER_EVENT, 2)
            .and_then(|word| u64::try_from(word).ok())
            .and_then(|id| i64::try_from(id).ok());

        match token_id {
            Some(token_id) => {
                if let Err(e) = self
                    .mirror_ticket(&to, token_id, title, &date, metadata_uri, &receipt)
                    .await
                {
                    self.ctx.mirror_failure("webinar NFT row", &e);
                }
            }
            None => warn!(
                "Mint receipt {} carried no Transfer event; ticket not mirrored",
                receipt.tx_hash
            ),
        }

        self.ctx.notifier.info(
            "NFT Minted",
            "Webinar ticket NFT successfully minted",
        );

        if let Err(e) = self.refresh_inner().await {
            self.ctx.notifier.failure("Failed to Load NFTs", &e);
        }

        Ok(receipt)
    }

    async fn mirror_ticket(
        &self,
        owner: &Address,
        token_id: i64,
        title: &str,
        date: &str,
        metadata_uri: &str,
        receipt: &TxReceipt,
    ) -> Result<()> {
        let owner_id = db::ensure_profile(&self.ctx.pool, &db::wallet_key(owner)).await?;
        db::insert_nft(
            &self.ctx.pool,
            &NewNft {
                token_id,
                owner_id,
                webinar_title: title.to_string(),
                webinar_date: date.to_string(),
                metadata_uri: metadata_uri.to_string(),
                transaction_hash: receipt.tx_hash.to_string(),
            },
        )
        .await?;
        Ok(())
    }
}
