//! crates/amibuddy_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the lesson controller's collaborators.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Account, AudioClip, CharacterRef, ConversationTurn, HistoryRecord, HomeworkAnalysis,
    HomeworkReview, ImageRef, Locale, RewardCard, UsageQuota, UserContext, UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// The collaborator is not configured (e.g. a missing API key).
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    /// The user refused access to a device or storage location.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// An exclusive resource is already held.
    #[error("Resource busy: {0}")]
    Busy(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// AI Collaborators
//=========================================================================================

#[async_trait]
pub trait HomeworkAnalysisService: Send + Sync {
    /// Describes the homework shown on the image for a child.
    async fn analyze_homework(&self, image: &ImageRef, locale: Locale)
        -> PortResult<HomeworkAnalysis>;
}

#[async_trait]
pub trait HomeworkReviewService: Send + Sync {
    /// Grades a photo of the finished homework against the original description.
    async fn review_homework(
        &self,
        image: &ImageRef,
        original_description: &str,
        locale: Locale,
    ) -> PortResult<HomeworkReview>;
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribes a recorded question into text.
    async fn transcribe(&self, clip: &AudioClip, locale: Locale) -> PortResult<String>;
}

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Answers a question about the homework, given the conversation so far.
    async fn reply(
        &self,
        question: &str,
        homework_context: &str,
        prior_log: &[ConversationTurn],
        locale: Locale,
    ) -> PortResult<String>;
}

//=========================================================================================
// Voice and Microphone
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Played,
    /// The platform refused to autoplay; the user has to trigger a replay.
    Blocked,
}

#[async_trait]
pub trait VoicePlayer: Send + Sync {
    /// Synthesizes `text` and plays it to the user.
    async fn speak(&self, text: &str, locale: Locale) -> PortResult<PlaybackOutcome>;
}

#[async_trait]
pub trait AudioRecorder: Send + Sync {
    /// Acquires the microphone. Only one recording may be active at a time.
    async fn start_recording(&self) -> PortResult<Box<dyn ActiveRecording>>;
}

/// A held microphone. Dropping it without stopping must release the device.
#[async_trait]
pub trait ActiveRecording: Send {
    /// Stops the recording, releases the device and returns the captured audio.
    async fn stop_and_unload(self: Box<Self>) -> PortResult<AudioClip>;
}

//=========================================================================================
// Persistence
//=========================================================================================

#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn get_quota(&self, user_id: Uuid) -> PortResult<UsageQuota>;

    /// Adds one analyzed homework to the user's counter and returns the new value.
    async fn increment_homework_count(&self, user_id: Uuid) -> PortResult<UsageQuota>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn save_history(&self, record: &HistoryRecord) -> PortResult<()>;

    /// Completed lessons, newest first.
    async fn list_history(&self, user_id: Uuid) -> PortResult<Vec<HistoryRecord>>;
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Copies an image into durable storage and returns its permanent reference.
    async fn store_image(&self, user_id: Uuid, image: &ImageRef) -> PortResult<ImageRef>;
}

#[async_trait]
pub trait RewardCardService: Send + Sync {
    async fn issue_card(
        &self,
        user_id: Uuid,
        review: Option<&HomeworkReview>,
    ) -> PortResult<RewardCard>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        display_name: Option<&str>,
        locale: Locale,
    ) -> PortResult<Account>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn get_account(&self, user_id: Uuid) -> PortResult<Account>;

    async fn update_profile(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
        locale: Locale,
    ) -> PortResult<Account>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}

//=========================================================================================
// Side Channels
//=========================================================================================

/// Long-term learning memory. Calls are fire-and-forget; failures never reach the user.
#[async_trait]
pub trait LearningMemoryService: Send + Sync {
    async fn remember_homework(
        &self,
        user: &UserContext,
        character: &CharacterRef,
        analysis: &HomeworkAnalysis,
    ) -> PortResult<()>;

    async fn remember_exchange(
        &self,
        user: &UserContext,
        character: &CharacterRef,
        question: &str,
        answer: &str,
        homework_context: &str,
    ) -> PortResult<()>;
}

/// Source of randomness for message selection, injectable for deterministic tests.
pub trait RandomSource: Send + Sync {
    /// Returns an index in `0..len`. `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}
