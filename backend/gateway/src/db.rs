//! Mirror store: migrations, queries, and profile management.
//!
//! The mirror holds a relational copy of confirmed on-chain activity so
//! the read API never has to touch the chain. Chain state stays
//! authoritative: rows are only written after a transaction confirms,
//! and a failed write here never fails the operation that produced it.
//!
//! Wallet addresses are stored in lowercase hex so lookups are
//! case-insensitive regardless of how the caller checksums them.

use alloy_primitives::Address;
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use tracing::info;

use crate::errors::Result;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Canonical storage key for a wallet address.
pub fn wallet_key(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

// ─────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProfileRecord {
    pub id: i64,
    pub wallet_address: String,
    pub display_name: Option<String>,
    pub reputation_points: i64,
    pub is_verified_scholar: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CourseRecord {
    pub id: i64,
    pub contract_course_id: Option<i64>,
    pub instructor_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub ipfs_hash: Option<String>,
    pub price_wei: String,
    pub price_display: f64,
    pub is_active: bool,
    pub blockchain_created: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EnrollmentRecord {
    pub id: i64,
    pub course_id: i64,
    pub student_id: i64,
    pub transaction_hash: Option<String>,
    pub enrolled_at: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct VerificationRecord {
    pub id: i64,
    pub scholar_id: i64,
    pub verifier_address: String,
    pub metadata: Option<String>,
    pub verification_status: String,
    pub transaction_hash: Option<String>,
    pub verified_at: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct NftRecord {
    pub id: i64,
    pub token_id: i64,
    pub owner_id: i64,
    pub webinar_title: String,
    pub webinar_date: Option<String>,
    pub metadata_uri: Option<String>,
    pub transaction_hash: Option<String>,
    pub minted_at: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DonationRecord {
    pub id: i64,
    pub donor_id: i64,
    pub amount_wei: String,
    pub amount_display: f64,
    pub transaction_hash: Option<String>,
    pub donated_at: i64,
}

// ─────────────────────────────────────────────────────────
// Insert payloads
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub contract_course_id: Option<i64>,
    pub instructor_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub ipfs_hash: String,
    pub price_wei: String,
    pub price_display: f64,
}

#[derive(Debug, Clone)]
pub struct NewVerification {
    pub scholar_id: i64,
    pub verifier_address: String,
    pub metadata: String,
    pub transaction_hash: String,
    pub verified_at: String,
}

#[derive(Debug, Clone)]
pub struct NewNft {
    pub token_id: i64,
    pub owner_id: i64,
    pub webinar_title: String,
    pub webinar_date: String,
    pub metadata_uri: String,
    pub transaction_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewDonation {
    pub donor_id: i64,
    pub amount_wei: String,
    pub amount_display: f64,
    pub transaction_hash: String,
}

// ─────────────────────────────────────────────────────────
// Profiles
// ─────────────────────────────────────────────────────────

/// Get-or-create the profile row for a wallet and return its id.
pub async fn ensure_profile(pool: &SqlitePool, wallet: &str) -> Result<i64> {
    sqlx::query("INSERT OR IGNORE INTO profiles (wallet_address) VALUES (?1)")
        .bind(wallet)
        .execute(pool)
        .await?;

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM profiles WHERE wallet_address = ?1")
        .bind(wallet)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn get_profile(pool: &SqlitePool, wallet: &str) -> Result<Option<ProfileRecord>> {
    let row = sqlx::query_as::<_, ProfileRecord>(
        r#"
        SELECT id, wallet_address, display_name, reputation_points,
               is_verified_scholar, created_at, updated_at
        FROM   profiles
        WHERE  wallet_address = ?1
        "#,
    )
    .bind(wallet)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Overwrite the mirrored reputation total for a wallet.
pub async fn set_reputation(pool: &SqlitePool, wallet: &str, points: i64) -> Result<()> {
    ensure_profile(pool, wallet).await?;
    sqlx::query(
        r#"
        UPDATE profiles
        SET    reputation_points = ?1, updated_at = strftime('%s', 'now')
        WHERE  wallet_address = ?2
        "#,
    )
    .bind(points)
    .bind(wallet)
    .execute(pool)
    .await?;
    Ok(())
}

/// Overwrite the mirrored scholar-verification flag for a wallet.
pub async fn set_scholar_flag(pool: &SqlitePool, wallet: &str, verified: bool) -> Result<()> {
    ensure_profile(pool, wallet).await?;
    sqlx::query(
        r#"
        UPDATE profiles
        SET    is_verified_scholar = ?1, updated_at = strftime('%s', 'now')
        WHERE  wallet_address = ?2
        "#,
    )
    .bind(verified)
    .bind(wallet)
    .execute(pool)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Scholar verifications
// ─────────────────────────────────────────────────────────

pub async fn insert_verification(pool: &SqlitePool, new: &NewVerification) -> Result<i64> {
    let res = sqlx::query(
        r#"
        INSERT INTO scholar_verifications
            (scholar_id, verifier_address, metadata, verification_status,
             transaction_hash, verified_at)
        VALUES (?1, ?2, ?3, 'verified', ?4, ?5)
        "#,
    )
    .bind(new.scholar_id)
    .bind(&new.verifier_address)
    .bind(&new.metadata)
    .bind(&new.transaction_hash)
    .bind(&new.verified_at)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn list_verifications_for(
    pool: &SqlitePool,
    wallet: &str,
) -> Result<Vec<VerificationRecord>> {
    let rows = sqlx::query_as::<_, VerificationRecord>(
        r#"
        SELECT v.id, v.scholar_id, v.verifier_address, v.metadata,
               v.verification_status, v.transaction_hash, v.verified_at, v.created_at
        FROM   scholar_verifications v
        JOIN   profiles p ON p.id = v.scholar_id
        WHERE  p.wallet_address = ?1
        ORDER  BY v.created_at DESC, v.id DESC
        "#,
    )
    .bind(wallet)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Courses and enrollments
// ─────────────────────────────────────────────────────────

pub async fn insert_course(pool: &SqlitePool, new: &NewCourse) -> Result<i64> {
    let res = sqlx::query(
        r#"
        INSERT INTO courses
            (contract_course_id, instructor_id, title, description, ipfs_hash,
             price_wei, price_display, is_active, blockchain_created)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, 1)
        "#,
    )
    .bind(new.contract_course_id)
    .bind(new.instructor_id)
    .bind(&new.title)
    .bind(&new.description)
    .bind(&new.ipfs_hash)
    .bind(&new.price_wei)
    .bind(new.price_display)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

/// Active courses, newest first.
pub async fn list_active_courses(pool: &SqlitePool) -> Result<Vec<CourseRecord>> {
    let rows = sqlx::query_as::<_, CourseRecord>(
        r#"
        SELECT id, contract_course_id, instructor_id, title, description, ipfs_hash,
               price_wei, price_display, is_active, blockchain_created,
               created_at, updated_at
        FROM   courses
        WHERE  is_active = 1
        ORDER  BY created_at DESC, id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert_enrollment(
    pool: &SqlitePool,
    course_id: i64,
    student_id: i64,
    transaction_hash: &str,
) -> Result<i64> {
    let res = sqlx::query(
        r#"
        INSERT INTO course_enrollments (course_id, student_id, transaction_hash)
        VALUES (?1, ?2, ?3)
        "#,
    )
    .bind(course_id)
    .bind(student_id)
    .bind(transaction_hash)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn list_enrollments_for(pool: &SqlitePool, wallet: &str) -> Result<Vec<EnrollmentRecord>> {
    let rows = sqlx::query_as::<_, EnrollmentRecord>(
        r#"
        SELECT e.id, e.course_id, e.student_id, e.transaction_hash, e.enrolled_at
        FROM   course_enrollments e
        JOIN   profiles p ON p.id = e.student_id
        WHERE  p.wallet_address = ?1
        ORDER  BY e.enrolled_at DESC, e.id DESC
        "#,
    )
    .bind(wallet)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Webinar NFTs
// ─────────────────────────────────────────────────────────

pub async fn insert_nft(pool: &SqlitePool, new: &NewNft) -> Result<i64> {
    let res = sqlx::query(
        r#"
        INSERT INTO webinar_nfts
            (token_id, owner_id, webinar_title, webinar_date, metadata_uri,
             transaction_hash)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(new.token_id)
    .bind(new.owner_id)
    .bind(&new.webinar_title)
    .bind(&new.webinar_date)
    .bind(&new.metadata_uri)
    .bind(&new.transaction_hash)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn list_nfts_for(pool: &SqlitePool, wallet: &str) -> Result<Vec<NftRecord>> {
    let rows = sqlx::query_as::<_, NftRecord>(
        r#"
        SELECT n.id, n.token_id, n.owner_id, n.webinar_title, n.webinar_date,
               n.metadata_uri, n.transaction_hash, n.minted_at
        FROM   webinar_nfts n
        JOIN   profiles p ON p.id = n.owner_id
        WHERE  p.wallet_address = ?1
        ORDER  BY n.minted_at DESC, n.id DESC
        "#,
    )
    .bind(wallet)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Zakat donations
// ─────────────────────────────────────────────────────────

pub async fn insert_donation(pool: &SqlitePool, new: &NewDonation) -> Result<i64> {
    let res = sqlx::query(
        r#"
        INSERT INTO zakat_donations (donor_id, amount_wei, amount_display, transaction_hash)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(new.donor_id)
    .bind(&new.amount_wei)
    .bind(new.amount_display)
    .bind(&new.transaction_hash)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn list_donations_for(pool: &SqlitePool, wallet: &str) -> Result<Vec<DonationRecord>> {
    let rows = sqlx::query_as::<_, DonationRecord>(
        r#"
        SELECT d.id, d.donor_id, d.amount_wei, d.amount_display,
               d.transaction_hash, d.donated_at
        FROM   zakat_donations d
        JOIN   profiles p ON p.id = d.donor_id
        WHERE  p.wallet_address = ?1
        ORDER  BY d.donated_at DESC, d.id DESC
        "#,
    )
    .bind(wallet)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_pool;

    #[test]
    fn test_wallet_key_is_lowercase() {
        let addr = "0xAbCd000000000000000000000000000000000001"
            .parse::<Address>()
            .unwrap();
        assert_eq!(
            wallet_key(&addr),
            "0xabcd000000000000000000000000000000000001"
        );
    }

    #[tokio::test]
    async fn test_ensure_profile_is_idempotent() {
        let pool = test_pool().await;

        let first = ensure_profile(&pool, "0xaa").await.unwrap();
        let second = ensure_profile(&pool, "0xaa").await.unwrap();
        assert_eq!(first, second);

        let other = ensure_profile(&pool, "0xbb").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_reputation_overwrites() {
        let pool = test_pool().await;

        set_reputation(&pool, "0xaa", 100).await.unwrap();
        set_reputation(&pool, "0xaa", 150).await.unwrap();

        let profile = get_profile(&pool, "0xaa").await.unwrap().unwrap();
        assert_eq!(profile.reputation_points, 150);
        assert!(!profile.is_verified_scholar);
    }

    #[tokio::test]
    async fn test_scholar_flag_roundtrip() {
        let pool = test_pool().await;

        set_scholar_flag(&pool, "0xaa", true).await.unwrap();
        assert!(
            get_profile(&pool, "0xaa")
                .await
                .unwrap()
                .unwrap()
                .is_verified_scholar
        );

        set_scholar_flag(&pool, "0xaa", false).await.unwrap();
        assert!(
            !get_profile(&pool, "0xaa")
                .await
                .unwrap()
                .unwrap()
                .is_verified_scholar
        );
    }

    #[tokio::test]
    async fn test_active_course_filter() {
        let pool = test_pool().await;
        let instructor = ensure_profile(&pool, "0xaa").await.unwrap();

        let course_id = insert_course(
            &pool,
            &NewCourse {
                contract_course_id: Some(1),
                instructor_id: instructor,
                title: "Fiqh of Transactions".to_string(),
                description: Some("Muamalat basics".to_string()),
                ipfs_hash: "QmHash1".to_string(),
                price_wei: "1000000000000000000".to_string(),
                price_display: 1.0,
            },
        )
        .await
        .unwrap();

        sqlx::query("UPDATE courses SET is_active = 0 WHERE id = ?1")
            .bind(course_id)
            .execute(&pool)
            .await
            .unwrap();

        insert_course(
            &pool,
            &NewCourse {
                contract_course_id: Some(2),
                instructor_id: instructor,
                title: "Tajweed Essentials".to_string(),
                description: None,
                ipfs_hash: "QmHash2".to_string(),
                price_wei: "500000000000000000".to_string(),
                price_display: 0.5,
            },
        )
        .await
        .unwrap();

        let active = list_active_courses(&pool).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "Tajweed Essentials");
        assert!(active[0].blockchain_created);
    }

    #[tokio::test]
    async fn test_enrollment_listing() {
        let pool = test_pool().await;
        let student = ensure_profile(&pool, "0xaa").await.unwrap();

        insert_enrollment(&pool, 7, student, "0xhash").await.unwrap();

        let rows = list_enrollments_for(&pool, "0xaa").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].course_id, 7);
        assert!(list_enrollments_for(&pool, "0xbb").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nft_listing_scoped_to_owner() {
        let pool = test_pool().await;
        let owner_a = ensure_profile(&pool, "0xaa").await.unwrap();
        let owner_b = ensure_profile(&pool, "0xbb").await.unwrap();

        for (owner, token, title) in [
            (owner_a, 1, "Usul al-Fiqh Webinar"),
            (owner_b, 2, "Seerah Webinar"),
        ] {
            insert_nft(
                &pool,
                &NewNft {
                    token_id: token,
                    owner_id: owner,
                    webinar_title: title.to_string(),
                    webinar_date: "2025-03-01T18:00:00Z".to_string(),
                    metadata_uri: format!("ipfs://meta/{token}"),
                    transaction_hash: format!("0x{token:064x}"),
                },
            )
            .await
            .unwrap();
        }

        let nfts = list_nfts_for(&pool, "0xaa").await.unwrap();
        assert_eq!(nfts.len(), 1);
        assert_eq!(nfts[0].token_id, 1);
        assert_eq!(nfts[0].webinar_title, "Usul al-Fiqh Webinar");
    }

    #[tokio::test]
    async fn test_donation_listing() {
        let pool = test_pool().await;
        let donor = ensure_profile(&pool, "0xaa").await.unwrap();

        insert_donation(
            &pool,
            &NewDonation {
                donor_id: donor,
                amount_wei: "2500000000000000000".to_string(),
                amount_display: 2.5,
                transaction_hash: "0xdeed".to_string(),
            },
        )
        .await
        .unwrap();

        let donations = list_donations_for(&pool, "0xaa").await.unwrap();
        assert_eq!(donations.len(), 1);
        assert_eq!(donations[0].amount_wei, "2500000000000000000");
        assert_eq!(donations[0].amount_display, 2.5);
    }

    #[tokio::test]
    async fn test_verification_listing() {
        let pool = test_pool().await;
        let scholar = ensure_profile(&pool, "0xaa").await.unwrap();

        insert_verification(
            &pool,
            &NewVerification {
                scholar_id: scholar,
                verifier_address: "0xbb".to_string(),
                metadata: "ijazah:QmCert".to_string(),
                transaction_hash: "0xfeed".to_string(),
                verified_at: "2025-02-01T00:00:00+00:00".to_string(),
            },
        )
        .await
        .unwrap();

        let rows = list_verifications_for(&pool, "0xaa").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].verification_status, "verified");
        assert_eq!(rows[0].verifier_address, "0xbb");
    }
}
