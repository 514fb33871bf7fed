//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::{auth, state::AppState};
use amibuddy_core::domain::{format_duration, Account, HistoryRecord, Locale, UsageQuota};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        list_history_handler,
        get_quota_handler,
        get_profile_handler,
        update_profile_handler,
    ),
    components(
        schemas(
            auth::SignupRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            HistoryEntry,
            QuotaResponse,
            ProfileResponse,
            UpdateProfileRequest,
        )
    ),
    tags(
        (name = "AmiBuddy API", description = "Accounts, lesson history and quota for the homework buddy. Lessons themselves run over the /ws WebSocket.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// One completed lesson, newest first.
#[derive(Serialize, ToSchema)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub character_id: String,
    pub character_name: String,
    pub homework_image_url: String,
    pub description: String,
    pub topics: Vec<String>,
    pub difficulty: String,
    pub score: Option<u8>,
    pub feedback: Option<String>,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub sticker: Option<String>,
    pub duration_seconds: u64,
    /// `HH:MM:SS`
    pub duration: String,
    pub reward_card_url: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl From<HistoryRecord> for HistoryEntry {
    fn from(record: HistoryRecord) -> Self {
        Self {
            id: record.id,
            character_id: record.character_id,
            character_name: record.character_name,
            homework_image_url: record.homework_image_url,
            description: record.description,
            topics: record.topics,
            difficulty: record.difficulty,
            score: record.score,
            feedback: record.feedback,
            strengths: record.strengths,
            improvements: record.improvements,
            sticker: record.sticker,
            duration: format_duration(record.duration_seconds),
            duration_seconds: record.duration_seconds,
            reward_card_url: record.reward_card_url,
            completed_at: record.completed_at,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct QuotaResponse {
    pub homework_count: u32,
    pub is_premium: bool,
    pub free_limit: u32,
    /// `None` for premium accounts.
    pub remaining: Option<u32>,
}

impl QuotaResponse {
    fn new(quota: UsageQuota, free_limit: u32) -> Self {
        Self {
            homework_count: quota.homework_count,
            is_premium: quota.is_premium,
            free_limit,
            remaining: (!quota.is_premium)
                .then(|| free_limit.saturating_sub(quota.homework_count)),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub locale: String,
}

impl From<Account> for ProfileResponse {
    fn from(account: Account) -> Self {
        Self {
            user_id: account.user_id,
            email: account.email,
            display_name: account.display_name,
            locale: account.locale.code().to_string(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    /// `en` or `ja`
    pub locale: String,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// List the signed-in user's completed lessons.
#[utoipa::path(
    get,
    path = "/history",
    responses(
        (status = 200, description = "Completed lessons, newest first", body = [HistoryEntry]),
        (status = 401, description = "Not signed in"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_history_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let records = app_state.history.list_history(user_id).await.map_err(|e| {
        error!("Failed to list history: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to list history".to_string(),
        )
    })?;

    let entries: Vec<HistoryEntry> = records.into_iter().map(HistoryEntry::from).collect();
    Ok(Json(entries))
}

/// How many homeworks the user has analyzed and how many free ones remain.
#[utoipa::path(
    get,
    path = "/quota",
    responses(
        (status = 200, description = "Current usage", body = QuotaResponse),
        (status = 401, description = "Not signed in"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_quota_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let quota = app_state.quota.get_quota(user_id).await.map_err(|e| {
        error!("Failed to read quota: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to read quota".to_string(),
        )
    })?;
    Ok(Json(QuotaResponse::new(
        quota,
        app_state.config.free_homework_limit,
    )))
}

#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "The signed-in user's profile", body = ProfileResponse),
        (status = 401, description = "Not signed in"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let account = app_state.accounts.get_account(user_id).await.map_err(|e| {
        error!("Failed to load profile: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to load profile".to_string(),
        )
    })?;
    Ok(Json(ProfileResponse::from(account)))
}

/// Change the name the buddy uses and the lesson language.
#[utoipa::path(
    put,
    path = "/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = ProfileResponse),
        (status = 400, description = "Unknown locale"),
        (status = 401, description = "Not signed in"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn update_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let locale = req
        .locale
        .parse::<Locale>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let account = app_state
        .accounts
        .update_profile(user_id, display_name, locale)
        .await
        .map_err(|e| {
            error!("Failed to update profile: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update profile".to_string(),
            )
        })?;
    Ok(Json(ProfileResponse::from(account)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_accounts_see_remaining_homeworks() {
        let quota = UsageQuota {
            homework_count: 3,
            is_premium: false,
        };
        assert_eq!(QuotaResponse::new(quota, 5).remaining, Some(2));

        let over = UsageQuota {
            homework_count: 7,
            is_premium: false,
        };
        assert_eq!(QuotaResponse::new(over, 5).remaining, Some(0));
    }

    #[test]
    fn premium_has_no_remaining_count() {
        let quota = UsageQuota {
            homework_count: 40,
            is_premium: true,
        };
        assert_eq!(QuotaResponse::new(quota, 5).remaining, None);
    }

    #[test]
    fn history_entry_formats_duration() {
        let record = HistoryRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            character_id: "c1".to_string(),
            character_name: "Ami".to_string(),
            homework_image_url: "https://media.test/a.jpg".to_string(),
            description: "Counting apples".to_string(),
            topics: vec!["math".to_string()],
            difficulty: "easy".to_string(),
            score: None,
            feedback: None,
            strengths: Vec::new(),
            improvements: Vec::new(),
            sticker: None,
            duration_seconds: 3725,
            reward_card_url: None,
            completed_at: Utc::now(),
        };
        let entry = HistoryEntry::from(record);
        assert_eq!(entry.duration, "01:02:05");
        assert_eq!(entry.duration_seconds, 3725);
    }
}
