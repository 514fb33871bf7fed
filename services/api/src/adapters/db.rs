//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter. It implements the `QuotaStore`,
//! `HistoryRepository` and `AccountRepository` ports from the `core` crate and
//! handles all interactions with the PostgreSQL database using `sqlx`.

use amibuddy_core::domain::{Account, HistoryRecord, Locale, UsageQuota, UserCredentials};
use amibuddy_core::ports::{
    AccountRepository, HistoryRepository, PortError, PortResult, QuotaStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter backed by a Postgres connection pool.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(what: String) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        other => PortError::Unexpected(other.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct AccountRecord {
    user_id: Uuid,
    email: Option<String>,
    display_name: Option<String>,
    locale: String,
}
impl AccountRecord {
    fn to_domain(self) -> Account {
        Account {
            user_id: self.user_id,
            email: self.email,
            display_name: self.display_name,
            // Rows written before a locale was chosen fall back to the default.
            locale: self.locale.parse().unwrap_or_default(),
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct QuotaRecord {
    homework_count: i32,
    is_premium: bool,
}
impl QuotaRecord {
    fn to_domain(self) -> UsageQuota {
        UsageQuota {
            homework_count: u32::try_from(self.homework_count).unwrap_or(0),
            is_premium: self.is_premium,
        }
    }
}

#[derive(FromRow)]
struct HistoryRow {
    id: Uuid,
    user_id: Uuid,
    character_id: String,
    character_name: String,
    homework_image_url: String,
    description: String,
    topics: Vec<String>,
    difficulty: String,
    score: Option<i16>,
    feedback: Option<String>,
    strengths: Vec<String>,
    improvements: Vec<String>,
    sticker: Option<String>,
    duration_seconds: i64,
    reward_card_url: Option<String>,
    completed_at: DateTime<Utc>,
}
impl HistoryRow {
    fn to_domain(self) -> HistoryRecord {
        HistoryRecord {
            id: self.id,
            user_id: self.user_id,
            character_id: self.character_id,
            character_name: self.character_name,
            homework_image_url: self.homework_image_url,
            description: self.description,
            topics: self.topics,
            difficulty: self.difficulty,
            score: self.score.map(|s| s.clamp(0, 100) as u8),
            feedback: self.feedback,
            strengths: self.strengths,
            improvements: self.improvements,
            sticker: self.sticker,
            duration_seconds: u64::try_from(self.duration_seconds).unwrap_or(0),
            reward_card_url: self.reward_card_url,
            completed_at: self.completed_at,
        }
    }
}

const ACCOUNT_COLUMNS: &str = "user_id, email, display_name, locale";

const HISTORY_COLUMNS: &str = "id, user_id, character_id, character_name, homework_image_url, \
     description, topics, difficulty, score, feedback, strengths, improvements, sticker, \
     duration_seconds, reward_card_url, completed_at";

//=========================================================================================
// `QuotaStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuotaStore for DbAdapter {
    async fn get_quota(&self, user_id: Uuid) -> PortResult<UsageQuota> {
        let record = sqlx::query_as::<_, QuotaRecord>(
            "SELECT homework_count, is_premium FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("User {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn increment_homework_count(&self, user_id: Uuid) -> PortResult<UsageQuota> {
        // The increment happens in SQL so two lessons finishing together both count.
        let record = sqlx::query_as::<_, QuotaRecord>(
            "UPDATE users SET homework_count = homework_count + 1 WHERE user_id = $1 \
             RETURNING homework_count, is_premium",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("User {} not found", user_id)))?;
        Ok(record.to_domain())
    }
}

//=========================================================================================
// `HistoryRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl HistoryRepository for DbAdapter {
    async fn save_history(&self, record: &HistoryRecord) -> PortResult<()> {
        sqlx::query(&format!(
            "INSERT INTO homework_history ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            HISTORY_COLUMNS
        ))
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.character_id)
        .bind(&record.character_name)
        .bind(&record.homework_image_url)
        .bind(&record.description)
        .bind(&record.topics)
        .bind(&record.difficulty)
        .bind(record.score.map(i16::from))
        .bind(&record.feedback)
        .bind(&record.strengths)
        .bind(&record.improvements)
        .bind(&record.sticker)
        .bind(i64::try_from(record.duration_seconds).unwrap_or(i64::MAX))
        .bind(&record.reward_card_url)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn list_history(&self, user_id: Uuid) -> PortResult<Vec<HistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {} FROM homework_history WHERE user_id = $1 ORDER BY completed_at DESC",
            HISTORY_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(rows.into_iter().map(|r| r.to_domain()).collect())
    }
}

//=========================================================================================
// `AccountRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountRepository for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        display_name: Option<&str>,
        locale: Locale,
    ) -> PortResult<Account> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "INSERT INTO users (user_id, email, hashed_password, display_name, locale) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .bind(display_name)
        .bind(locale.code())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("User {} not found", email)))?;
        Ok(record.to_domain())
    }

    async fn get_account(&self, user_id: Uuid) -> PortResult<Account> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {} FROM users WHERE user_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("User {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
        locale: Locale,
    ) -> PortResult<Account> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "UPDATE users SET display_name = $2, locale = $3 WHERE user_id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .bind(display_name)
        .bind(locale.code())
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("User {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        user_id.ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
