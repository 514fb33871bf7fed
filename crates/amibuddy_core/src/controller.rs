//! crates/amibuddy_core/src/controller.rs
//!
//! The lesson session state machine. It owns one `LessonSession` from the moment a
//! homework image is supplied until the user returns home, sequencing the calls to
//! the collaborator ports. Every method takes `&mut self`, so at most one
//! collaborator call is in flight per lesson.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::domain::{
    format_duration, CharacterRef, HistoryRecord, HomeworkAnalysis, HomeworkReview, ImageRef,
    LessonSession, UsageQuota, UserContext,
};
use crate::error::{LessonError, LessonStage};
use crate::phrases;
use crate::ports::{
    ActiveRecording, AudioRecorder, BlobStorage, ConversationService, HistoryRepository,
    HomeworkAnalysisService, HomeworkReviewService, LearningMemoryService, PlaybackOutcome,
    PortError, QuotaStore, RandomSource, RewardCardService, TranscriptionService, VoicePlayer,
};

pub const DEFAULT_FREE_HOMEWORK_LIMIT: u32 = 5;

//=========================================================================================
// States and Outcomes
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LessonState {
    Idle,
    Uploading,
    Analyzing,
    Ready,
    Recording,
    Transcribing,
    Responding,
    Finished,
    ReviewPending,
    Reviewing,
    Reviewed,
    Saved,
}

impl LessonState {
    pub fn as_str(self) -> &'static str {
        match self {
            LessonState::Idle => "idle",
            LessonState::Uploading => "uploading",
            LessonState::Analyzing => "analyzing",
            LessonState::Ready => "ready",
            LessonState::Recording => "recording",
            LessonState::Transcribing => "transcribing",
            LessonState::Responding => "responding",
            LessonState::Finished => "finished",
            LessonState::ReviewPending => "review_pending",
            LessonState::Reviewing => "reviewing",
            LessonState::Reviewed => "reviewed",
            LessonState::Saved => "saved",
        }
    }
}

impl fmt::Display for LessonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of the last voice playback. It never gates a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Played,
    Blocked,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Analyzed(HomeworkAnalysis),
    /// The free quota is used up; the user should be offered the upgrade instead.
    UpgradeRequired { quota: UsageQuota, free_limit: u32 },
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    /// The transcription failed and the placeholder question was used.
    pub used_placeholder_question: bool,
}

/// What the completion modal shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishSummary {
    pub message: String,
    pub elapsed_seconds: u64,
    pub duration_display: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStep {
    ImageUpload,
    RewardCard,
    History,
    Quota,
}

#[derive(Debug)]
pub struct SaveFailure {
    pub step: SaveStep,
    pub error: PortError,
}

/// Outcome of the best-effort persistence when the user returns home.
#[derive(Debug)]
pub struct SaveReport {
    pub record: HistoryRecord,
    pub history_saved: bool,
    pub quota: Option<UsageQuota>,
    pub failures: Vec<SaveFailure>,
}

//=========================================================================================
// Collaborators
//=========================================================================================

/// Every external service the controller talks to.
#[derive(Clone)]
pub struct LessonCollaborators {
    pub analysis: Arc<dyn HomeworkAnalysisService>,
    pub review: Arc<dyn HomeworkReviewService>,
    pub transcription: Arc<dyn TranscriptionService>,
    pub conversation: Arc<dyn ConversationService>,
    pub voice: Arc<dyn VoicePlayer>,
    pub recorder: Arc<dyn AudioRecorder>,
    pub quota: Arc<dyn QuotaStore>,
    pub history: Arc<dyn HistoryRepository>,
    pub blobs: Arc<dyn BlobStorage>,
    pub reward_cards: Arc<dyn RewardCardService>,
    pub memory: Arc<dyn LearningMemoryService>,
    pub random: Arc<dyn RandomSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LessonPolicy {
    pub free_homework_limit: u32,
}

impl Default for LessonPolicy {
    fn default() -> Self {
        Self {
            free_homework_limit: DEFAULT_FREE_HOMEWORK_LIMIT,
        }
    }
}

//=========================================================================================
// The Controller
//=========================================================================================

pub struct LessonSessionController {
    user: UserContext,
    character: CharacterRef,
    policy: LessonPolicy,
    ports: LessonCollaborators,
    state: LessonState,
    state_tx: watch::Sender<LessonState>,
    session: Option<LessonSession>,
    quota: Option<UsageQuota>,
    recording: Option<Box<dyn ActiveRecording>>,
    playback: PlaybackStatus,
    last_spoken: Option<String>,
}

impl LessonSessionController {
    pub fn new(
        user: UserContext,
        character: CharacterRef,
        policy: LessonPolicy,
        ports: LessonCollaborators,
    ) -> Self {
        let (state_tx, _) = watch::channel(LessonState::Idle);
        Self {
            user,
            character,
            policy,
            ports,
            state: LessonState::Idle,
            state_tx,
            session: None,
            quota: None,
            recording: None,
            playback: PlaybackStatus::Idle,
            last_spoken: None,
        }
    }

    pub fn state(&self) -> LessonState {
        self.state
    }

    /// Follows every state change, including the intermediate ones.
    pub fn subscribe(&self) -> watch::Receiver<LessonState> {
        self.state_tx.subscribe()
    }

    pub fn session(&self) -> Option<&LessonSession> {
        self.session.as_ref()
    }

    pub fn user(&self) -> &UserContext {
        &self.user
    }

    pub fn policy(&self) -> LessonPolicy {
        self.policy
    }

    pub fn cached_quota(&self) -> Option<UsageQuota> {
        self.quota
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.playback
    }

    /// Whether a manual replay button should be offered.
    pub fn replay_available(&self) -> bool {
        self.last_spoken.is_some()
    }

    //-------------------------------------------------------------------------------------
    // Upload and analysis
    //-------------------------------------------------------------------------------------

    /// Starts a lesson for `image`, unless the free quota is used up.
    pub async fn begin_upload(&mut self, image: ImageRef) -> Result<UploadOutcome, LessonError> {
        self.require(&[LessonState::Idle, LessonState::Saved], "begin_upload")?;

        let was_cached = self.quota.is_some();
        let mut quota = self.load_quota().await;
        let free_limit = self.policy.free_homework_limit;
        if !quota.allows_new_homework(free_limit) && was_cached {
            // The user may have upgraded since the quota was cached.
            quota = self.reload_quota(quota).await;
        }
        if !quota.allows_new_homework(free_limit) {
            info!(
                "User {} reached the free limit ({} of {}); offering upgrade.",
                self.user.user_id, quota.homework_count, free_limit
            );
            return Ok(UploadOutcome::UpgradeRequired { quota, free_limit });
        }

        self.session = Some(LessonSession::new(self.character.clone(), image.clone()));
        self.set_state(LessonState::Uploading);
        // The image goes to the analysis service directly; nothing is uploaded first.
        self.set_state(LessonState::Analyzing);

        let analysis = match self
            .ports
            .analysis
            .analyze_homework(&image, self.user.locale)
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => {
                error!("Homework analysis failed for {}: {}", image, e);
                self.session = None;
                self.set_state(LessonState::Idle);
                return Err(LessonError::collaborator(LessonStage::Analysis, e));
            }
        };

        self.session_mut()?.set_analysis(analysis.clone())?;
        info!(
            "Homework analyzed: {} topic(s), difficulty '{}'.",
            analysis.topics.len(),
            analysis.difficulty
        );
        self.spawn_homework_memory(&analysis);
        self.speak(&analysis.description).await;
        self.set_state(LessonState::Ready);

        Ok(UploadOutcome::Analyzed(analysis))
    }

    //-------------------------------------------------------------------------------------
    // Recording, transcription and replies
    //-------------------------------------------------------------------------------------

    pub async fn start_recording(&mut self) -> Result<(), LessonError> {
        self.require(&[LessonState::Ready], "start_recording")?;

        match self.ports.recorder.start_recording().await {
            Ok(handle) => {
                self.recording = Some(handle);
                self.set_state(LessonState::Recording);
                Ok(())
            }
            Err(e) => {
                warn!("Could not start recording: {}", e);
                Err(LessonError::Resource(e))
            }
        }
    }

    /// Releases the microphone without asking anything.
    pub async fn cancel_recording(&mut self) -> Result<(), LessonError> {
        self.require(&[LessonState::Recording], "cancel_recording")?;

        if let Some(handle) = self.recording.take() {
            if let Err(e) = handle.stop_and_unload().await {
                warn!("Failed to release the recorder cleanly: {}", e);
            }
        }
        self.set_state(LessonState::Ready);
        Ok(())
    }

    /// Stops the recording, transcribes it and asks the buddy for an answer.
    pub async fn stop_recording(&mut self) -> Result<Exchange, LessonError> {
        self.require(&[LessonState::Recording], "stop_recording")?;
        let handle = self.recording.take().ok_or(LessonError::InvalidTransition {
            state: self.state,
            action: "stop_recording",
        })?;
        let locale = self.user.locale;

        self.set_state(LessonState::Transcribing);
        let clip = match handle.stop_and_unload().await {
            Ok(clip) => clip,
            Err(e) => {
                error!("Failed to stop the recording: {}", e);
                self.set_state(LessonState::Ready);
                return Err(LessonError::collaborator(LessonStage::Recording, e));
            }
        };

        let (question, used_placeholder_question) =
            match self.ports.transcription.transcribe(&clip, locale).await {
                Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), false),
                Ok(_) => {
                    warn!("Transcription came back empty; using the placeholder question.");
                    (phrases::placeholder_question(locale).to_string(), true)
                }
                Err(e) => {
                    warn!("Transcription failed, using the placeholder question: {}", e);
                    (phrases::placeholder_question(locale).to_string(), true)
                }
            };
        info!("Transcribed question: '{}'", question);

        let (context, prior_log) = {
            let session = self.session_mut()?;
            let context = session.homework_context().to_string();
            let prior_log = session.conversation().to_vec();
            session.push_question(question.clone());
            (context, prior_log)
        };

        self.set_state(LessonState::Responding);
        let answer = match self
            .ports
            .conversation
            .reply(&question, &context, &prior_log, locale)
            .await
        {
            Ok(answer) if answer.trim().is_empty() => phrases::reply_fallback(locale).to_string(),
            Ok(answer) => answer.trim().to_string(),
            Err(e) => {
                error!("Conversation reply failed: {}", e);
                if let Some(session) = self.session.as_mut() {
                    session.retract_question();
                }
                self.set_state(LessonState::Ready);
                return Err(LessonError::collaborator(LessonStage::Conversation, e));
            }
        };
        info!("Generated answer: '{}'", answer);

        self.session_mut()?.push_answer(answer.clone());
        self.spawn_exchange_memory(&question, &answer, &context);
        self.speak(&answer).await;
        self.set_state(LessonState::Ready);

        Ok(Exchange {
            question,
            answer,
            used_placeholder_question,
        })
    }

    //-------------------------------------------------------------------------------------
    // Finishing and review
    //-------------------------------------------------------------------------------------

    /// Ends the lesson. Calling it again once finished does nothing and returns `None`.
    pub async fn finish(&mut self) -> Result<Option<FinishSummary>, LessonError> {
        if self.session.as_ref().is_some_and(|s| s.is_finished()) {
            debug!("Lesson already finished; ignoring.");
            return Ok(None);
        }
        self.require(&[LessonState::Ready], "finish")?;

        let elapsed_seconds = {
            let session = self.session_mut()?;
            session.finish();
            session.elapsed_seconds()
        };

        let options = phrases::encouragements(self.user.locale);
        let index = self.ports.random.pick(options.len()).min(options.len() - 1);
        let message = options[index].to_string();

        self.speak(&message).await;
        self.set_state(LessonState::Finished);
        info!("Lesson finished after {} seconds.", elapsed_seconds);

        Ok(Some(FinishSummary {
            message,
            elapsed_seconds,
            duration_display: format_duration(elapsed_seconds),
        }))
    }

    pub fn begin_review(&mut self) -> Result<(), LessonError> {
        self.require(
            &[LessonState::Finished, LessonState::Reviewed],
            "begin_review",
        )?;
        self.set_state(LessonState::ReviewPending);
        Ok(())
    }

    /// Reviews a photo of the completed homework.
    pub async fn submit_review(&mut self, image: ImageRef) -> Result<HomeworkReview, LessonError> {
        self.require(&[LessonState::ReviewPending], "submit_review")?;
        let description = self.session_ref()?.homework_context().to_string();

        self.set_state(LessonState::Reviewing);
        let review = match self
            .ports
            .review
            .review_homework(&image, &description, self.user.locale)
            .await
        {
            Ok(review) => review,
            Err(e) => {
                error!("Homework review failed for {}: {}", image, e);
                self.set_state(LessonState::ReviewPending);
                return Err(LessonError::collaborator(LessonStage::Review, e));
            }
        };

        let session = self.session_mut()?;
        session.attach_review(review)?;
        let review = session
            .review()
            .cloned()
            .ok_or(LessonError::NoActiveSession)?;
        info!("Homework reviewed with score {}.", review.score);

        self.speak(&review.feedback).await;
        self.set_state(LessonState::Reviewed);
        Ok(review)
    }

    //-------------------------------------------------------------------------------------
    // Returning home
    //-------------------------------------------------------------------------------------

    /// Persists the finished lesson and discards it. Persistence is best-effort: every
    /// failure is logged and reported, and the lesson still ends up `Saved`.
    pub async fn return_home(&mut self) -> Result<SaveReport, LessonError> {
        self.require(
            &[
                LessonState::Finished,
                LessonState::ReviewPending,
                LessonState::Reviewed,
            ],
            "return_home",
        )?;
        let session = self.session.take().ok_or(LessonError::NoActiveSession)?;
        let user_id = self.user.user_id;
        let mut failures = Vec::new();

        let image_url = if session.homework_image.needs_upload() {
            match self
                .ports
                .blobs
                .store_image(user_id, &session.homework_image)
                .await
            {
                Ok(stored) => stored.as_str().to_string(),
                Err(e) => {
                    error!("Failed to upload homework image {}: {}", session.homework_image, e);
                    failures.push(SaveFailure {
                        step: SaveStep::ImageUpload,
                        error: e,
                    });
                    String::new()
                }
            }
        } else {
            session.homework_image.as_str().to_string()
        };

        let card = match self
            .ports
            .reward_cards
            .issue_card(user_id, session.review())
            .await
        {
            Ok(card) => Some(card),
            Err(e) => {
                warn!("Failed to issue a reward card: {}", e);
                failures.push(SaveFailure {
                    step: SaveStep::RewardCard,
                    error: e,
                });
                None
            }
        };

        let record = HistoryRecord::from_session(user_id, &session, image_url, card.as_ref());
        let history_saved = match self.ports.history.save_history(&record).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save lesson history for user {}: {}", user_id, e);
                failures.push(SaveFailure {
                    step: SaveStep::History,
                    error: e,
                });
                false
            }
        };

        let quota = match self.ports.quota.increment_homework_count(user_id).await {
            Ok(quota) => {
                self.quota = Some(quota);
                Some(quota)
            }
            Err(e) => {
                error!("Failed to increment homework count for user {}: {}", user_id, e);
                failures.push(SaveFailure {
                    step: SaveStep::Quota,
                    error: e,
                });
                // Keep the local gate honest even though the store missed the update.
                if let Some(cached) = self.quota.as_mut() {
                    cached.homework_count = cached.homework_count.saturating_add(1);
                }
                None
            }
        };

        self.set_state(LessonState::Saved);
        info!(
            "Lesson {} saved ({} failure(s)).",
            session.id,
            failures.len()
        );

        Ok(SaveReport {
            record,
            history_saved,
            quota,
            failures,
        })
    }

    //-------------------------------------------------------------------------------------
    // Voice and timer
    //-------------------------------------------------------------------------------------

    /// Plays the last spoken line again, e.g. after the platform blocked autoplay.
    pub async fn replay(&mut self) -> Result<PlaybackStatus, LessonError> {
        let line = self.last_spoken.clone().ok_or(LessonError::NothingToReplay)?;
        match self.ports.voice.speak(&line, self.user.locale).await {
            Ok(outcome) => {
                self.playback = playback_status(outcome);
                Ok(self.playback)
            }
            Err(e) => {
                self.playback = PlaybackStatus::Failed;
                Err(LessonError::collaborator(LessonStage::Playback, e))
            }
        }
    }

    /// Records that the client could not autoplay the last line.
    pub fn mark_playback_blocked(&mut self) {
        if self.last_spoken.is_some() {
            info!("Autoplay blocked on the client; replay is available.");
            self.playback = PlaybackStatus::Blocked;
        }
    }

    /// Advances the lesson timer. Returns the elapsed seconds while it is running.
    pub fn tick(&mut self, seconds: u64) -> Option<u64> {
        let session = self.session.as_mut()?;
        if !session.timer_running() {
            return None;
        }
        session.tick(seconds);
        Some(session.elapsed_seconds())
    }

    //-------------------------------------------------------------------------------------
    // Helpers
    //-------------------------------------------------------------------------------------

    fn require(&self, allowed: &[LessonState], action: &'static str) -> Result<(), LessonError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(LessonError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    fn set_state(&mut self, next: LessonState) {
        if self.state != next {
            debug!("Lesson state {} -> {}", self.state, next);
            self.state = next;
            self.state_tx.send_replace(next);
        }
    }

    fn session_ref(&self) -> Result<&LessonSession, LessonError> {
        self.session.as_ref().ok_or(LessonError::NoActiveSession)
    }

    fn session_mut(&mut self) -> Result<&mut LessonSession, LessonError> {
        self.session.as_mut().ok_or(LessonError::NoActiveSession)
    }

    async fn load_quota(&mut self) -> UsageQuota {
        if let Some(quota) = self.quota {
            return quota;
        }
        let quota = match self.ports.quota.get_quota(self.user.user_id).await {
            Ok(quota) => quota,
            Err(e) => {
                warn!(
                    "Could not load quota for user {}, treating it as empty: {}",
                    self.user.user_id, e
                );
                UsageQuota::default()
            }
        };
        self.quota = Some(quota);
        quota
    }

    /// Re-reads the stored quota. The cached count never goes down, so a locally counted
    /// homework whose increment failed still counts; the premium flag follows the store.
    async fn reload_quota(&mut self, cached: UsageQuota) -> UsageQuota {
        let quota = match self.ports.quota.get_quota(self.user.user_id).await {
            Ok(stored) => UsageQuota {
                homework_count: stored.homework_count.max(cached.homework_count),
                is_premium: stored.is_premium,
            },
            Err(e) => {
                warn!(
                    "Could not refresh quota for user {}, keeping the cached one: {}",
                    self.user.user_id, e
                );
                cached
            }
        };
        self.quota = Some(quota);
        quota
    }

    /// Personalizes and plays `text`. The outcome is recorded but never fails the caller.
    async fn speak(&mut self, text: &str) -> PlaybackStatus {
        let line = phrases::personalize(self.user.display_name.as_deref(), text, self.user.locale);
        self.last_spoken = Some(line.clone());
        self.playback = match self.ports.voice.speak(&line, self.user.locale).await {
            Ok(outcome) => playback_status(outcome),
            Err(e) => {
                warn!("Voice playback failed: {}", e);
                PlaybackStatus::Failed
            }
        };
        if self.playback == PlaybackStatus::Blocked {
            info!("Autoplay blocked; the user can replay manually.");
        }
        self.playback
    }

    fn spawn_homework_memory(&self, analysis: &HomeworkAnalysis) {
        let memory = self.ports.memory.clone();
        let user = self.user.clone();
        let character = self.character.clone();
        let analysis = analysis.clone();
        tokio::spawn(async move {
            if let Err(e) = memory.remember_homework(&user, &character, &analysis).await {
                warn!("Failed to store homework memory: {}", e);
            }
        });
    }

    fn spawn_exchange_memory(&self, question: &str, answer: &str, context: &str) {
        let memory = self.ports.memory.clone();
        let user = self.user.clone();
        let character = self.character.clone();
        let (question, answer, context) =
            (question.to_string(), answer.to_string(), context.to_string());
        tokio::spawn(async move {
            if let Err(e) = memory
                .remember_exchange(&user, &character, &question, &answer, &context)
                .await
            {
                warn!("Failed to store conversation memory: {}", e);
            }
        });
    }
}

fn playback_status(outcome: PlaybackOutcome) -> PlaybackStatus {
    match outcome {
        PlaybackOutcome::Played => PlaybackStatus::Played,
        PlaybackOutcome::Blocked => PlaybackStatus::Blocked,
    }
}
