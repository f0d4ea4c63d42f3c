//! Axum REST API over the mirror.
//!
//! Read-only: chain writes go through the wallet, never through HTTP.
//! Every endpoint serves from the relational mirror, so responses are
//! fast and available even while the wallet session is down.

use std::sync::Arc;

use alloy_primitives::Address;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct CoursesResponse {
    pub count: usize,
    pub courses: Vec<db::CourseRecord>,
}

#[derive(Serialize)]
pub struct VerificationsResponse {
    pub wallet: String,
    pub count: usize,
    pub verifications: Vec<db::VerificationRecord>,
}

#[derive(Serialize)]
pub struct NftsResponse {
    pub wallet: String,
    pub count: usize,
    pub nfts: Vec<db::NftRecord>,
}

#[derive(Serialize)]
pub struct DonationsResponse {
    pub wallet: String,
    pub count: usize,
    pub donations: Vec<db::DonationRecord>,
}

#[derive(Serialize)]
pub struct EnrollmentsResponse {
    pub wallet: String,
    pub count: usize,
    pub enrollments: Vec<db::EnrollmentRecord>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Parse a path segment as an address and normalize it to the mirror's
/// lowercase key form.
fn wallet_from_path(raw: &str) -> Result<String, axum::response::Response> {
    match raw.parse::<Address>() {
        Ok(address) => Ok(db::wallet_key(&address)),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!(ErrorResponse {
                error: format!("{raw} is not a valid address: {e}"),
            })),
        )
            .into_response()),
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /courses`
///
/// Active course listings, newest first.
pub async fn get_courses(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match db::list_active_courses(&state.pool).await {
        Ok(courses) => {
            let count = courses.len();
            (
                StatusCode::OK,
                Json(serde_json::json!(CoursesResponse { count, courses })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!(ErrorResponse {
                error: e.to_string()
            })),
        )
            .into_response(),
    }
}

/// `GET /profiles/:address`
///
/// The mirrored profile for a wallet: display name, reputation points,
/// scholar flag.
pub async fn get_profile(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let wallet = match wallet_from_path(&address) {
        Ok(wallet) => wallet,
        Err(response) => return response,
    };

    match db::get_profile(&state.pool, &wallet).await {
        Ok(Some(profile)) => (StatusCode::OK, Json(serde_json::json!(profile))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!(ErrorResponse {
                error: format!("No profile for {wallet}"),
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!(ErrorResponse {
                error: e.to_string()
            })),
        )
            .into_response(),
    }
}

/// `GET /profiles/:address/verifications`
pub async fn get_verifications(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let wallet = match wallet_from_path(&address) {
        Ok(wallet) => wallet,
        Err(response) => return response,
    };

    match db::list_verifications_for(&state.pool, &wallet).await {
        Ok(verifications) => {
            let count = verifications.len();
            (
                StatusCode::OK,
                Json(serde_json::json!(VerificationsResponse {
                    wallet,
                    count,
                    verifications,
                })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!(ErrorResponse {
                error: e.to_string()
            })),
        )
            .into_response(),
    }
}

/// `GET /profiles/:address/nfts`
pub async fn get_nfts(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let wallet = match wallet_from_path(&address) {
        Ok(wallet) => wallet,
        Err(response) => return response,
    };

    match db::list_nfts_for(&state.pool, &wallet).await {
        Ok(nfts) => {
            let count = nfts.len();
            (
                StatusCode::OK,
                Json(serde_json::json!(NftsResponse { wallet, count, nfts })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!(ErrorResponse {
                error: e.to_string()
            })),
        )
            .into_response(),
    }
}

/// `GET /profiles/:address/donations`
pub async fn get_donations(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let wallet = match wallet_from_path(&address) {
        Ok(wallet) => wallet,
        Err(response) => return response,
    };

    match db::list_donations_for(&state.pool, &wallet).await {
        Ok(donations) => {
            let count = donations.len();
            (
                StatusCode::OK,
                Json(serde_json::json!(DonationsResponse {
                    wallet,
                    count,
                    donations,
                })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!(ErrorResponse {
                error: e.to_string()
            })),
        )
            .into_response(),
    }
}

/// `GET /profiles/:address/enrollments`
pub async fn get_enrollments(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let wallet = match wallet_from_path(&address) {
        Ok(wallet) => wallet,
        Err(response) => return response,
    };

    match db::list_enrollments_for(&state.pool, &wallet).await {
        Ok(enrollments) => {
            let count = enrollments.len();
            (
                StatusCode::OK,
                Json(serde_json::json!(EnrollmentsResponse {
                    wallet,
                    count,
                    enrollments,
                })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!(ErrorResponse {
                error: e.to_string()
            })),
        )
            .into_response(),
    }
}
