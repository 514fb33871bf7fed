pub mod controller;
pub mod domain;
pub mod error;
pub mod phrases;
pub mod ports;

pub use controller::{
    Exchange, FinishSummary, LessonCollaborators, LessonPolicy, LessonSessionController,
    LessonState, PlaybackStatus, SaveReport, SaveStep, UploadOutcome,
};
pub use domain::{
    Account, AudioClip, AudioFormat, CharacterRef, ConversationRole, ConversationTurn,
    HistoryRecord, HomeworkAnalysis, HomeworkReview, ImageRef, LessonSession, Locale, UsageQuota,
    UserContext,
};
pub use error::{LessonError, LessonStage};
pub use ports::{PortError, PortResult};
