//! Course catalog and enrollment.
//!
//! Course listings are served from the mirror; creation and enrollment
//! are chain writes. The course id assigned by the contract comes back
//! in the CourseCreated event and is mirrored alongside the listing so
//! later enrollments can reference it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use tokio::sync::RwLock;

use crate::abi::AbiValue;
use crate::context::{GatewayContext, InFlight};
use crate::db::{self, CourseRecord, NewCourse};
use crate::errors::{GatewayError, Result};
use crate::registry::{ContractName, TxReceipt, COURSE_CREATED_EVENT};
use crate::units::parse_edu;

pub struct CourseService {
    ctx: Arc<GatewayContext>,
    busy: AtomicBool,
    courses: RwLock<Vec<CourseRecord>>,
}

impl CourseService {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            busy: AtomicBool::new(false),
            courses: RwLock::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Last loaded course listing.
    #[allow(dead_code)]
    pub async fn courses(&self) -> Vec<CourseRecord> {
        self.courses.read().await.clone()
    }

    /// Reload the active-course listing from the mirror. Quiet no-op
    /// while the contract is unavailable.
    pub async fn refresh(&self) -> Result<Vec<CourseRecord>> {
        let _busy = InFlight::begin(&self.busy);
        match self.refresh_inner().await {
            Ok(courses) => Ok(courses),
            Err(e) => {
                self.ctx.notifier.failure("Failed to Load Courses", &e);
                Err(e)
            }
        }
    }

    async fn refresh_inner(&self) -> Result<Vec<CourseRecord>> {
        // Listings come from the mirror, but only make sense once the
        // contract is reachable for the follow-up actions.
        if self.ctx.handles().await.course_manager.is_none() {
            return Ok(self.courses.read().await.clone());
        }

        let courses = db::list_active_courses(&self.ctx.pool).await?;
        *self.courses.write().await = courses.clone();
        Ok(courses)
    }

    /// Create a course on chain and mirror the listing. The price is in
    /// display units; the contract stores it in smallest units.
    pub async fn create(
        &self,
        title: &str,
        description: &str,
        ipfs_hash: &str,
        price: &str,
    ) -> Result<TxReceipt> {
        let _busy = InFlight::begin(&self.busy);
        match self.create_inner(title, description, ipfs_hash, price).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.ctx.notifier.failure("Course Creation Failed", &e);
                Err(e)
            }
        }
    }

    async fn create_inner(
        &self,
        title: &str,
        description: &str,
        ipfs_hash: &str,
        price: &str,
    ) -> Result<TxReceipt> {
        if title.trim().is_empty() {
            return Err(GatewayError::InvalidInput(
                "Course title must not be empty".to_string(),
            ));
        }
        let wei = parse_edu(price)?;

        let snapshot = self.ctx.session.snapshot().await;
        let handles = self.ctx.registry.handles(&snapshot);
        let (Some(account), Some(course_manager)) = (snapshot.account, handles.course_manager)
        else {
            return Err(GatewayError::ContractNotInitialized(
                ContractName::CourseManager,
            ));
        };

        let tx_hash = course_manager
            .send(
                "createCourse",
                &[
                    AbiValue::Str(title.to_string()),
                    AbiValue::Str(ipfs_hash.to_string()),
                    AbiValue::Uint(wei),
                ],
            )
            .await?;
        self.ctx.notifier.info(
            "Transaction Submitted",
            "Course creation transaction submitted",
        );

        let receipt = course_manager.wait(tx_hash).await?;

        // The id the contract assigned, if the event made it into the
        // receipt. A listing without one is still usable from the mirror.
        let contract_course_id = receipt
            .event_data_word(course_manager.address, COURSE_CREATED_EVENT)
            .and_then(|word| u64::try_from(word).ok())
            .and_then(|id| i64::try_from(id).ok());

        if let Err(e) = self
            .mirror_course(&account, contract_course_id, title, description, ipfs_hash, wei, price)
            .await
        {
            self.ctx.mirror_failure("course row", &e);
        }

        self.ctx.notifier.info(
            "Course Created",
            "Course successfully created on blockchain",
        );

        if let Err(e) = self.refresh_inner().await {
            self.ctx.notifier.failure("Failed to Load Courses", &e);
        }

        Ok(receipt)
    }

    #[allow(clippy::too_many_arguments)]
    async fn mirror_course(
        &self,
        account: &Address,
        contract_course_id: Option<i64>,
        title: &str,
        description: &str,
        ipfs_hash: &str,
        wei: U256,
        price: &str,
    ) -> Result<()> {
        let instructor_id = db::ensure_profile(&self.ctx.pool, &db::wallet_key(account)).await?;
        db::insert_course(
            &self.ctx.pool,
            &NewCourse {
                contract_course_id,
                instructor_id,
                title: title.to_string(),
                description: (!description.trim().is_empty()).then(|| description.to_string()),
                ipfs_hash: ipfs_hash.to_string(),
                price_wei: wei.to_string(),
                price_display: price.parse().unwrap_or(0.0),
            },
        )
        .await?;
        Ok(())
    }

    /// Enroll in a course, paying its price in EDU. `price_wei` is the
    /// mirrored price in smallest units, exactly as listed.
    pub async fn enroll(&self, course_id: i64, price_wei: &str) -> Result<TxReceipt> {
        let _busy = InFlight::begin(&self.busy);
        match self.enroll_inner(course_id, price_wei).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.ctx.notifier.failure("Enrollment Failed", &e);
                Err(e)
            }
        }
    }

    async fn enroll_inner(&self, course_id: i64, price_wei: &str) -> Result<TxReceipt> {
        let course_id_word = u64::try_from(course_id).map_err(|_| {
            GatewayError::InvalidInput("Course id must not be negative".to_string())
        })?;
        let wei = U256::from_str_radix(price_wei, 10).map_err(|_| {
            GatewayError::InvalidInput(
                "Course price must be an integer amount in smallest units".to_string(),
            )
        })?;

        let snapshot = self.ctx.session.snapshot().await;
        let handles = self.ctx.registry.handles(&snapshot);
        let (Some(account), Some(course_manager), Some(edu_token)) =
            (snapshot.account, handles.course_manager, handles.edu_token)
        else {
            return Err(GatewayError::ContractNotInitialized(
                ContractName::CourseManager,
            ));
        };

        self.ctx
            .approve_spend(&edu_token, course_manager.address, wei)
            .await?;

        let enroll_tx = course_manager
            .send("enroll", &[AbiValue::Uint(U256::from(course_id_word))])
            .await?;
        self.ctx.notifier.info(
            "Enrollment Submitted",
            "Course enrollment transaction submitted",
        );

        let receipt = course_manager.wait(enroll_tx).await?;

        if let Err(e) = self.mirror_enrollment(&account, course_id, &receipt).await {
            self.ctx.mirror_failure("enrollment row", &e);
        }

        self.ctx
            .notifier
            .info("Enrollment Successful", "Successfully enrolled in course");

        if let Err(e) = self.refresh_inner().await {
            self.ctx.notifier.failure("Failed to Load Courses", &e);
        }

        Ok(receipt)
    }

    async fn mirror_enrollment(
        &self,
        account: &Address,
        course_id: i64,
        receipt: &TxReceipt,
    ) -> Result<()> {
        let student_id = db::ensure_profile(&self.ctx.pool, &db::wallet_key(account)).await?;
        db::insert_enrollment(
            &self.ctx.pool,
            course_id,
            student_id,
            &receipt.tx_hash.to_string(),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        drain_notices, test_context, ACCOUNT_A, COURSE_MANAGER_ADDR,
    };

    #[tokio::test]
    async fn test_create_course_mirrors_listing_with_contract_id() {
        let (ctx, fake) = test_context().await;
        ctx.session.connect().await.unwrap();
        let service = CourseService::new(ctx.clone());
        let mut notices = ctx.notifier.subscribe();

        service
            .create("Tajweed Basics", "Recitation rules", "QmTajweed", "1.5")
            .await
            .unwrap();

        assert_eq!(fake.sent_ops(), vec!["createCourse"]);

        let courses = db::list_active_courses(&ctx.pool).await.unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].title, "Tajweed Basics");
        assert_eq!(courses[0].contract_course_id, Some(1));
        assert_eq!(courses[0].price_wei, parse_edu("1.5").unwrap().to_string());
        assert_eq!(courses[0].price_display, 1.5);
        assert!(courses[0].blockchain_created);

        let titles: Vec<_> = drain_notices(&mut notices)
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(titles, vec!["Transaction Submitted", "Course Created"]);
        assert_eq!(service.courses().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_requires_title() {
        let (ctx, fake) = test_context().await;
        ctx.session.connect().await.unwrap();
        let service = CourseService::new(ctx.clone());

        let err = service.create("", "", "QmX", "1").await.unwrap_err();

        assert!(matches!(err, GatewayError::InvalidInput(_)));
        assert!(fake.sent_ops().is_empty());
    }

    #[tokio::test]
    async fn test_create_without_event_stores_null_contract_id() {
        let (ctx, fake) = test_context().await;
        ctx.session.connect().await.unwrap();
        let service = CourseService::new(ctx.clone());

        fake.omit_next_event("createCourse");
        service.create("Fiqh 101", "", "QmFiqh", "0").await.unwrap();

        let courses = db::list_active_courses(&ctx.pool).await.unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].contract_course_id, None);
        assert_eq!(courses[0].description, None);
    }

    #[tokio::test]
    async fn test_enroll_approves_the_manager_then_enrolls() {
        let (ctx, fake) = test_context().await;
        fake.set_token_balance(ACCOUNT_A, parse_edu("10").unwrap());
        ctx.session.connect().await.unwrap();
        let service = CourseService::new(ctx.clone());

        service.enroll(7, "1000").await.unwrap();

        assert_eq!(fake.sent_ops(), vec!["approve", "enroll"]);
        assert_eq!(
            fake.allowance_of(ACCOUNT_A, COURSE_MANAGER_ADDR),
            U256::from(1000u64)
        );

        let rows = db::list_enrollments_for(&ctx.pool, &db::wallet_key(&ACCOUNT_A))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].course_id, 7);
    }

    #[tokio::test]
    async fn test_rejected_approve_leaves_no_enrollment() {
        let (ctx, fake) = test_context().await;
        ctx.session.connect().await.unwrap();
        let service = CourseService::new(ctx.clone());

        fake.reject_next("approve", "User rejected the request");
        let err = service.enroll(7, "1000").await.unwrap_err();

        assert!(matches!(err, GatewayError::UserRejected(_)));
        assert!(fake.sent_ops().is_empty());
        let rows = db::list_enrollments_for(&ctx.pool, &db::wallet_key(&ACCOUNT_A))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_enroll_rejects_non_integer_price() {
        let (ctx, fake) = test_context().await;
        ctx.session.connect().await.unwrap();
        let service = CourseService::new(ctx.clone());

        let err = service.enroll(7, "1.5").await.unwrap_err();

        assert!(matches!(err, GatewayError::InvalidInput(_)));
        assert!(fake.sent_ops().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_is_quiet_when_disconnected() {
        let (ctx, _fake) = test_context().await;
        let service = CourseService::new(ctx.clone());
        let mut notices = ctx.notifier.subscribe();

        let courses = service.refresh().await.unwrap();

        assert!(courses.is_empty());
        assert!(drain_notices(&mut notices).is_empty());
    }
}
