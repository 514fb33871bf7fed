//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and how a lesson's collaborators are
//! assembled for one WebSocket connection.

use crate::adapters::tts::SpeechSynthesizer;
use crate::config::Config;
use amibuddy_core::controller::{LessonCollaborators, LessonPolicy};
use amibuddy_core::ports::{
    AccountRepository, AudioRecorder, BlobStorage, ConversationService, HistoryRepository,
    HomeworkAnalysisService, HomeworkReviewService, LearningMemoryService, QuotaStore,
    RandomSource, RewardCardService, TranscriptionService, VoicePlayer,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: Arc<dyn AccountRepository>,
    pub history: Arc<dyn HistoryRepository>,
    pub quota: Arc<dyn QuotaStore>,
    pub analysis: Arc<dyn HomeworkAnalysisService>,
    pub review: Arc<dyn HomeworkReviewService>,
    pub transcription: Arc<dyn TranscriptionService>,
    pub conversation: Arc<dyn ConversationService>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub blobs: Arc<dyn BlobStorage>,
    pub reward_cards: Arc<dyn RewardCardService>,
    pub memory: Arc<dyn LearningMemoryService>,
    pub random: Arc<dyn RandomSource>,
}

impl AppState {
    /// The voice and the microphone belong to the connection; everything else is shared.
    pub fn lesson_collaborators(
        &self,
        voice: Arc<dyn VoicePlayer>,
        recorder: Arc<dyn AudioRecorder>,
    ) -> LessonCollaborators {
        LessonCollaborators {
            analysis: self.analysis.clone(),
            review: self.review.clone(),
            transcription: self.transcription.clone(),
            conversation: self.conversation.clone(),
            voice,
            recorder,
            quota: self.quota.clone(),
            history: self.history.clone(),
            blobs: self.blobs.clone(),
            reward_cards: self.reward_cards.clone(),
            memory: self.memory.clone(),
            random: self.random.clone(),
        }
    }

    pub fn lesson_policy(&self) -> LessonPolicy {
        LessonPolicy {
            free_homework_limit: self.config.free_homework_limit,
        }
    }
}
