//! crates/amibuddy_core/src/domain.rs
//!
//! Defines the pure, core data structures for the lesson backend.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Identity and Locale
//=========================================================================================

/// The display language of a user. Every collaborator call receives it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    #[default]
    English,
    Japanese,
}

impl Locale {
    pub fn code(self) -> &'static str {
        match self {
            Locale::English => "en",
            Locale::Japanese => "ja",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported locale: {0}")]
pub struct UnknownLocale(pub String);

impl FromStr for Locale {
    type Err = UnknownLocale;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "en-us" | "en-gb" | "english" => Ok(Locale::English),
            // Older clients still send "jp".
            "ja" | "jp" | "ja-jp" | "japanese" => Ok(Locale::Japanese),
            other => Err(UnknownLocale(other.to_string())),
        }
    }
}

/// The signed-in user a lesson runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub locale: Locale,
}

/// The buddy character created before the lesson started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterRef {
    pub id: String,
    pub name: String,
}

// Represents a user - used throughout the service
#[derive(Debug, Clone)]
pub struct Account {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub locale: Locale,
}

impl Account {
    pub fn user_context(&self) -> UserContext {
        UserContext {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            locale: self.locale,
        }
    }
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

//=========================================================================================
// Images and Audio
//=========================================================================================

/// An opaque reference to an image: a local path, a `blob:`/`data:` URI or a remote URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the reference only lives on the uploading device or inside the
    /// request itself and has to be copied to durable storage before it is recorded.
    pub fn needs_upload(&self) -> bool {
        let lower = self.0.trim().to_ascii_lowercase();
        !(lower.starts_with("http://") || lower.starts_with("https://"))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // data: URIs can be megabytes long
        if self.0.starts_with("data:") {
            write!(f, "data:<{} bytes>", self.0.len())
        } else {
            f.write_str(&self.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFormat {
    /// Little-endian 16-bit mono samples streamed straight from the client.
    Pcm16 { sample_rate: u32 },
    /// An already-encoded container such as `audio/webm` or `audio/mp4`.
    Encoded { mime: String },
}

/// A finished microphone recording.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

impl AudioClip {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

//=========================================================================================
// Collaborator Results
//=========================================================================================

/// What the vision model understood about a homework photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeworkAnalysis {
    pub description: String,
    pub topics: Vec<String>,
    pub difficulty: String,
}

/// Feedback on a photo of the finished homework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeworkReview {
    pub score: u8,
    pub feedback: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub sticker: String,
}

impl HomeworkReview {
    pub const MAX_SCORE: u8 = 100;

    pub fn with_clamped_score(mut self) -> Self {
        self.score = self.score.min(Self::MAX_SCORE);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationRole {
    User,
    Assistant,
}

impl ConversationRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationRole::User => "user",
            ConversationRole::Assistant => "assistant",
        }
    }
}

/// One entry of the lesson's spoken conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: ConversationRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::Assistant,
            content: content.into(),
        }
    }
}

//=========================================================================================
// Lesson Timer
//=========================================================================================

/// Counts lesson seconds while running. Once stopped it never runs again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LessonTimer {
    elapsed_seconds: u64,
    running: bool,
    stopped: bool,
}

impl LessonTimer {
    pub fn start(&mut self) {
        if !self.stopped {
            self.running = true;
        }
    }

    /// Returns `true` only for the call that actually stopped a running timer.
    pub fn stop(&mut self) -> bool {
        let was_running = self.running;
        self.running = false;
        self.stopped = true;
        was_running
    }

    pub fn tick(&mut self, seconds: u64) {
        if self.running {
            self.elapsed_seconds = self.elapsed_seconds.saturating_add(seconds);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn display(&self) -> String {
        format_duration(self.elapsed_seconds)
    }
}

/// Formats seconds as `HH:MM:SS`.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

//=========================================================================================
// Lesson Session
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("The homework of this session has already been analyzed")]
    AlreadyAnalyzed,
    #[error("The homework has not been analyzed yet")]
    NotAnalyzed,
    #[error("A review can only be attached after the lesson is finished")]
    NotFinished,
    #[error("The lesson is already finished")]
    AlreadyFinished,
}

/// One homework-tutoring interaction, from image upload to completion.
#[derive(Debug, Clone)]
pub struct LessonSession {
    pub id: Uuid,
    pub character: CharacterRef,
    pub homework_image: ImageRef,
    pub started_at: DateTime<Utc>,
    analysis: Option<HomeworkAnalysis>,
    conversation: Vec<ConversationTurn>,
    timer: LessonTimer,
    finished: bool,
    review: Option<HomeworkReview>,
}

impl LessonSession {
    pub fn new(character: CharacterRef, homework_image: ImageRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            character,
            homework_image,
            started_at: Utc::now(),
            analysis: None,
            conversation: Vec::new(),
            timer: LessonTimer::default(),
            finished: false,
            review: None,
        }
    }

    pub fn analysis(&self) -> Option<&HomeworkAnalysis> {
        self.analysis.as_ref()
    }

    pub fn conversation(&self) -> &[ConversationTurn] {
        &self.conversation
    }

    pub fn review(&self) -> Option<&HomeworkReview> {
        self.review.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn timer(&self) -> &LessonTimer {
        &self.timer
    }

    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.timer.elapsed_seconds()
    }

    /// The analysis description, or an empty context before analysis.
    pub fn homework_context(&self) -> &str {
        self.analysis
            .as_ref()
            .map(|a| a.description.as_str())
            .unwrap_or_default()
    }

    /// Records the analysis and starts the lesson timer. Only the first call succeeds.
    pub fn set_analysis(&mut self, analysis: HomeworkAnalysis) -> Result<(), SessionError> {
        if self.analysis.is_some() {
            return Err(SessionError::AlreadyAnalyzed);
        }
        if self.finished {
            return Err(SessionError::AlreadyFinished);
        }
        self.analysis = Some(analysis);
        self.timer.start();
        Ok(())
    }

    pub fn push_question(&mut self, text: impl Into<String>) {
        self.conversation.push(ConversationTurn::user(text));
    }

    pub fn push_answer(&mut self, text: impl Into<String>) {
        self.conversation.push(ConversationTurn::assistant(text));
    }

    /// Drops a trailing question whose answer never arrived.
    pub fn retract_question(&mut self) -> Option<ConversationTurn> {
        match self.conversation.last() {
            Some(turn) if turn.role == ConversationRole::User => self.conversation.pop(),
            _ => None,
        }
    }

    /// Marks the lesson finished and freezes the timer. Returns `false` when it was
    /// already finished.
    pub fn finish(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.timer.stop();
        true
    }

    pub fn attach_review(&mut self, review: HomeworkReview) -> Result<(), SessionError> {
        if !self.finished {
            return Err(SessionError::NotFinished);
        }
        self.review = Some(review.with_clamped_score());
        Ok(())
    }

    pub fn tick(&mut self, seconds: u64) {
        self.timer.tick(seconds);
    }
}

//=========================================================================================
// Quota, History and Rewards
//=========================================================================================

/// Per-user counter of analyzed homeworks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageQuota {
    pub homework_count: u32,
    pub is_premium: bool,
}

impl UsageQuota {
    pub fn allows_new_homework(&self, free_limit: u32) -> bool {
        self.is_premium || self.homework_count < free_limit
    }
}

/// A collectible card image handed out when a lesson completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardCard {
    pub url: String,
}

/// The durable summary of a completed lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub user_id: Uuid,
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
    pub reward_card_url: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Combines the session's analysis, its review (if any) and timing into a record.
    pub fn from_session(
        user_id: Uuid,
        session: &LessonSession,
        homework_image_url: String,
        reward_card: Option<&RewardCard>,
    ) -> Self {
        let analysis = session.analysis();
        let review = session.review();
        Self {
            id: Uuid::new_v4(),
            user_id,
            character_id: session.character.id.clone(),
            character_name: session.character.name.clone(),
            homework_image_url,
            description: analysis.map(|a| a.description.clone()).unwrap_or_default(),
            topics: analysis.map(|a| a.topics.clone()).unwrap_or_default(),
            difficulty: analysis.map(|a| a.difficulty.clone()).unwrap_or_default(),
            score: review.map(|r| r.score),
            feedback: review.map(|r| r.feedback.clone()),
            strengths: review.map(|r| r.strengths.clone()).unwrap_or_default(),
            improvements: review.map(|r| r.improvements.clone()).unwrap_or_default(),
            sticker: review.map(|r| r.sticker.clone()),
            duration_seconds: session.elapsed_seconds(),
            reward_card_url: reward_card.map(|c| c.url.clone()),
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_analysis() -> HomeworkAnalysis {
        HomeworkAnalysis {
            description: "A cat drawing".to_string(),
            topics: vec!["animals".to_string()],
            difficulty: "easy".to_string(),
        }
    }

    fn session() -> LessonSession {
        LessonSession::new(
            CharacterRef {
                id: "char-1".to_string(),
                name: "Ami".to_string(),
            },
            ImageRef::new("file:///tmp/homework.jpg"),
        )
    }

    #[test]
    fn formats_duration_as_hours_minutes_seconds() {
        assert_eq!(format_duration(125), "00:02:05");
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(3 * 3600 + 61), "03:01:01");
    }

    #[test]
    fn parses_locale_codes() {
        assert_eq!("en".parse::<Locale>(), Ok(Locale::English));
        assert_eq!("JP".parse::<Locale>(), Ok(Locale::Japanese));
        assert_eq!("ja-JP".parse::<Locale>(), Ok(Locale::Japanese));
        assert!("fr".parse::<Locale>().is_err());
    }

    #[test]
    fn only_remote_urls_skip_upload() {
        assert!(!ImageRef::new("https://cdn.example.com/a.png").needs_upload());
        assert!(ImageRef::new("blob:http://localhost/1234").needs_upload());
        assert!(ImageRef::new("data:image/png;base64,AAAA").needs_upload());
        assert!(ImageRef::new("/var/mobile/photo.jpg").needs_upload());
    }

    #[test]
    fn analysis_is_set_once_and_starts_timer() {
        let mut session = session();
        assert!(!session.timer_running());

        session.set_analysis(cat_analysis()).unwrap();
        assert!(session.timer_running());

        let second = session.set_analysis(cat_analysis());
        assert_eq!(second, Err(SessionError::AlreadyAnalyzed));
    }

    #[test]
    fn timer_only_advances_while_running() {
        let mut session = session();
        session.tick(10);
        assert_eq!(session.elapsed_seconds(), 0);

        session.set_analysis(cat_analysis()).unwrap();
        session.tick(125);
        assert!(session.finish());
        session.tick(30);

        assert_eq!(session.elapsed_seconds(), 125);
        assert!(!session.timer_running());
        assert!(!session.finish());
    }

    #[test]
    fn stopped_timer_cannot_restart() {
        let mut timer = LessonTimer::default();
        timer.start();
        assert!(timer.stop());
        timer.start();
        assert!(!timer.is_running());
        assert!(!timer.stop());
    }

    #[test]
    fn review_requires_finished_lesson() {
        let mut session = session();
        session.set_analysis(cat_analysis()).unwrap();
        let review = HomeworkReview {
            score: 120,
            feedback: "Nice".to_string(),
            strengths: vec![],
            improvements: vec![],
            sticker: "🌟".to_string(),
        };

        assert_eq!(
            session.attach_review(review.clone()),
            Err(SessionError::NotFinished)
        );
        session.finish();
        session.attach_review(review).unwrap();
        assert_eq!(session.review().map(|r| r.score), Some(100));
    }

    #[test]
    fn retract_only_removes_a_trailing_question() {
        let mut session = session();
        session.push_question("Q1");
        session.push_answer("A1");
        assert!(session.retract_question().is_none());

        session.push_question("Q2");
        assert_eq!(session.retract_question(), Some(ConversationTurn::user("Q2")));
        assert_eq!(session.conversation().len(), 2);
    }

    #[test]
    fn quota_gate_respects_premium() {
        let free = UsageQuota {
            homework_count: 5,
            is_premium: false,
        };
        let premium = UsageQuota {
            homework_count: 5,
            is_premium: true,
        };
        assert!(!free.allows_new_homework(5));
        assert!(premium.allows_new_homework(5));
        assert!(UsageQuota::default().allows_new_homework(5));
    }

    #[test]
    fn history_record_without_review_leaves_review_fields_empty() {
        let mut session = session();
        session.set_analysis(cat_analysis()).unwrap();
        session.tick(42);
        session.finish();

        let record =
            HistoryRecord::from_session(Uuid::nil(), &session, "https://x/y.jpg".into(), None);
        assert_eq!(record.description, "A cat drawing");
        assert_eq!(record.duration_seconds, 42);
        assert_eq!(record.score, None);
        assert!(record.strengths.is_empty());
        assert_eq!(record.reward_card_url, None);
    }
}
