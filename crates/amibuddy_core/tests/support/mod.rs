//! In-memory collaborators for driving the lesson controller in tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use amibuddy_core::domain::RewardCard;
use amibuddy_core::ports::{
    ActiveRecording, AudioRecorder, BlobStorage, ConversationService, HistoryRepository,
    HomeworkAnalysisService, HomeworkReviewService, LearningMemoryService, PlaybackOutcome,
    QuotaStore, RandomSource, RewardCardService, TranscriptionService, VoicePlayer,
};
use amibuddy_core::{
    AudioClip, AudioFormat, CharacterRef, ConversationTurn, HistoryRecord, HomeworkAnalysis,
    HomeworkReview, ImageRef, LessonCollaborators, LessonPolicy, LessonSessionController, Locale,
    PortError, PortResult, UsageQuota, UserContext,
};
use async_trait::async_trait;
use uuid::Uuid;

pub fn cat_analysis() -> HomeworkAnalysis {
    HomeworkAnalysis {
        description: "A cat drawing".to_string(),
        topics: vec!["animals".to_string()],
        difficulty: "easy".to_string(),
    }
}

pub fn gold_review() -> HomeworkReview {
    HomeworkReview {
        score: 95,
        feedback: "Beautiful handwriting!".to_string(),
        strengths: vec!["neat letters".to_string()],
        improvements: vec!["write a little bigger".to_string()],
        sticker: "🌟".to_string(),
    }
}

//=========================================================================================
// AI collaborators
//=========================================================================================

#[derive(Default)]
pub struct FakeAnalysis {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl HomeworkAnalysisService for FakeAnalysis {
    async fn analyze_homework(
        &self,
        _image: &ImageRef,
        _locale: Locale,
    ) -> PortResult<HomeworkAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("vision service down".to_string()));
        }
        Ok(cat_analysis())
    }
}

#[derive(Default)]
pub struct FakeReview {
    pub fail: AtomicBool,
    pub descriptions: Mutex<Vec<String>>,
}

#[async_trait]
impl HomeworkReviewService for FakeReview {
    async fn review_homework(
        &self,
        _image: &ImageRef,
        original_description: &str,
        _locale: Locale,
    ) -> PortResult<HomeworkReview> {
        self.descriptions
            .lock()
            .unwrap()
            .push(original_description.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("review timed out".to_string()));
        }
        Ok(gold_review())
    }
}

/// Returns the configured transcript, or fails when none is set.
#[derive(Default)]
pub struct FakeTranscription {
    pub transcript: Mutex<Option<String>>,
}

#[async_trait]
impl TranscriptionService for FakeTranscription {
    async fn transcribe(&self, _clip: &AudioClip, _locale: Locale) -> PortResult<String> {
        self.transcript
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PortError::Unexpected("speech service down".to_string()))
    }
}

/// Returns the configured answer, or fails when none is set.
#[derive(Default)]
pub struct FakeConversation {
    pub answer: Mutex<Option<String>>,
    pub prior_logs: Mutex<Vec<Vec<ConversationTurn>>>,
    pub contexts: Mutex<Vec<String>>,
}

#[async_trait]
impl ConversationService for FakeConversation {
    async fn reply(
        &self,
        _question: &str,
        homework_context: &str,
        prior_log: &[ConversationTurn],
        _locale: Locale,
    ) -> PortResult<String> {
        self.prior_logs.lock().unwrap().push(prior_log.to_vec());
        self.contexts
            .lock()
            .unwrap()
            .push(homework_context.to_string());
        self.answer
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PortError::Unexpected("chat service down".to_string()))
    }
}

//=========================================================================================
// Voice and microphone
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceMode {
    #[default]
    Play,
    Block,
    Fail,
}

#[derive(Default)]
pub struct FakeVoice {
    pub mode: Mutex<VoiceMode>,
    pub spoken: Mutex<Vec<String>>,
}

impl FakeVoice {
    pub fn set_mode(&self, mode: VoiceMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoicePlayer for FakeVoice {
    async fn speak(&self, text: &str, _locale: Locale) -> PortResult<PlaybackOutcome> {
        self.spoken.lock().unwrap().push(text.to_string());
        match *self.mode.lock().unwrap() {
            VoiceMode::Play => Ok(PlaybackOutcome::Played),
            VoiceMode::Block => Ok(PlaybackOutcome::Blocked),
            VoiceMode::Fail => Err(PortError::Unexpected("tts quota exceeded".to_string())),
        }
    }
}

#[derive(Default)]
pub struct FakeRecorder {
    pub active: Arc<AtomicBool>,
    pub deny: AtomicBool,
    pub fail_stop: Arc<AtomicBool>,
    pub acquisitions: AtomicUsize,
}

impl FakeRecorder {
    pub fn is_held(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioRecorder for FakeRecorder {
    async fn start_recording(&self) -> PortResult<Box<dyn ActiveRecording>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(PortError::PermissionDenied("microphone".to_string()));
        }
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(PortError::Busy("microphone".to_string()));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRecording {
            active: self.active.clone(),
            fail_stop: self.fail_stop.clone(),
        }))
    }
}

pub struct FakeRecording {
    active: Arc<AtomicBool>,
    fail_stop: Arc<AtomicBool>,
}

#[async_trait]
impl ActiveRecording for FakeRecording {
    async fn stop_and_unload(self: Box<Self>) -> PortResult<AudioClip> {
        self.active.store(false, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("recorder crashed".to_string()));
        }
        Ok(AudioClip {
            data: vec![0, 1, 2, 3],
            format: AudioFormat::Pcm16 { sample_rate: 48_000 },
        })
    }
}

impl Drop for FakeRecording {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

//=========================================================================================
// Persistence
//=========================================================================================

#[derive(Default)]
pub struct FakeQuota {
    pub quota: Mutex<UsageQuota>,
    pub fail_get: AtomicBool,
    pub fail_increment: AtomicBool,
    pub gets: AtomicUsize,
}

impl FakeQuota {
    pub fn set(&self, homework_count: u32, is_premium: bool) {
        *self.quota.lock().unwrap() = UsageQuota {
            homework_count,
            is_premium,
        };
    }

    pub fn current(&self) -> UsageQuota {
        *self.quota.lock().unwrap()
    }
}

#[async_trait]
impl QuotaStore for FakeQuota {
    async fn get_quota(&self, _user_id: Uuid) -> PortResult<UsageQuota> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(PortError::NotFound("user document".to_string()));
        }
        Ok(self.current())
    }

    async fn increment_homework_count(&self, _user_id: Uuid) -> PortResult<UsageQuota> {
        if self.fail_increment.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("write rejected".to_string()));
        }
        let mut quota = self.quota.lock().unwrap();
        quota.homework_count += 1;
        Ok(*quota)
    }
}

#[derive(Default)]
pub struct FakeHistory {
    pub records: Mutex<Vec<HistoryRecord>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl HistoryRepository for FakeHistory {
    async fn save_history(&self, record: &HistoryRecord) -> PortResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("database offline".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn list_history(&self, user_id: Uuid) -> PortResult<Vec<HistoryRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeBlobs {
    pub stored: Mutex<Vec<ImageRef>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl BlobStorage for FakeBlobs {
    async fn store_image(&self, user_id: Uuid, image: &ImageRef) -> PortResult<ImageRef> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("bucket unavailable".to_string()));
        }
        let mut stored = self.stored.lock().unwrap();
        stored.push(image.clone());
        Ok(ImageRef::new(format!(
            "https://media.test/{}/{}.jpg",
            user_id,
            stored.len()
        )))
    }
}

#[derive(Default)]
pub struct FakeRewardCards {
    pub fail: AtomicBool,
}

#[async_trait]
impl RewardCardService for FakeRewardCards {
    async fn issue_card(
        &self,
        _user_id: Uuid,
        review: Option<&HomeworkReview>,
    ) -> PortResult<RewardCard> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("card printer jammed".to_string()));
        }
        let tier = if review.is_some() { "gold" } else { "participation" };
        Ok(RewardCard {
            url: format!("https://cards.test/{}.png", tier),
        })
    }
}

#[derive(Default)]
pub struct FakeMemory {
    pub homeworks: AtomicUsize,
    pub exchanges: AtomicUsize,
}

#[async_trait]
impl LearningMemoryService for FakeMemory {
    async fn remember_homework(
        &self,
        _user: &UserContext,
        _character: &CharacterRef,
        _analysis: &HomeworkAnalysis,
    ) -> PortResult<()> {
        self.homeworks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remember_exchange(
        &self,
        _user: &UserContext,
        _character: &CharacterRef,
        _question: &str,
        _answer: &str,
        _homework_context: &str,
    ) -> PortResult<()> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Err(PortError::Unavailable("memory service disabled".to_string()))
    }
}

pub struct FixedRandom(pub usize);

impl RandomSource for FixedRandom {
    fn pick(&self, _len: usize) -> usize {
        self.0
    }
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct Harness {
    pub user_id: Uuid,
    pub analysis: Arc<FakeAnalysis>,
    pub review: Arc<FakeReview>,
    pub transcription: Arc<FakeTranscription>,
    pub conversation: Arc<FakeConversation>,
    pub voice: Arc<FakeVoice>,
    pub recorder: Arc<FakeRecorder>,
    pub quota: Arc<FakeQuota>,
    pub history: Arc<FakeHistory>,
    pub blobs: Arc<FakeBlobs>,
    pub reward_cards: Arc<FakeRewardCards>,
    pub memory: Arc<FakeMemory>,
    pub random_index: usize,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            analysis: Arc::default(),
            review: Arc::default(),
            transcription: Arc::default(),
            conversation: Arc::default(),
            voice: Arc::default(),
            recorder: Arc::default(),
            quota: Arc::default(),
            history: Arc::default(),
            blobs: Arc::default(),
            reward_cards: Arc::default(),
            memory: Arc::default(),
            random_index: 0,
        }
    }

    pub fn collaborators(&self) -> LessonCollaborators {
        LessonCollaborators {
            analysis: self.analysis.clone(),
            review: self.review.clone(),
            transcription: self.transcription.clone(),
            conversation: self.conversation.clone(),
            voice: self.voice.clone(),
            recorder: self.recorder.clone(),
            quota: self.quota.clone(),
            history: self.history.clone(),
            blobs: self.blobs.clone(),
            reward_cards: self.reward_cards.clone(),
            memory: self.memory.clone(),
            random: Arc::new(FixedRandom(self.random_index)),
        }
    }

    pub fn controller(&self) -> LessonSessionController {
        self.controller_for(None, Locale::English)
    }

    pub fn controller_for(
        &self,
        display_name: Option<&str>,
        locale: Locale,
    ) -> LessonSessionController {
        LessonSessionController::new(
            UserContext {
                user_id: self.user_id,
                display_name: display_name.map(str::to_string),
                locale,
            },
            CharacterRef {
                id: "char-42".to_string(),
                name: "Ami".to_string(),
            },
            LessonPolicy::default(),
            self.collaborators(),
        )
    }

    pub fn answer_with(&self, transcript: &str, answer: &str) {
        *self.transcription.transcript.lock().unwrap() = Some(transcript.to_string());
        *self.conversation.answer.lock().unwrap() = Some(answer.to_string());
    }
}

/// Lets detached tasks on the current-thread test runtime run to completion.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
