//! crates/amibuddy_core/src/error.rs
//!
//! Errors surfaced by the lesson controller.

use std::fmt;

use crate::controller::LessonState;
use crate::domain::{Locale, SessionError};
use crate::phrases::{self, FailureNotice};
use crate::ports::PortError;

/// The collaborator step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonStage {
    Analysis,
    Recording,
    Transcription,
    Conversation,
    Review,
    Playback,
}

impl fmt::Display for LessonStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LessonStage::Analysis => "Homework analysis",
            LessonStage::Recording => "Recording",
            LessonStage::Transcription => "Transcription",
            LessonStage::Conversation => "Conversation reply",
            LessonStage::Review => "Homework review",
            LessonStage::Playback => "Voice playback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LessonError {
    /// The requested action does not apply to the current state.
    #[error("'{action}' is not allowed while the lesson is {state}")]
    InvalidTransition {
        state: LessonState,
        action: &'static str,
    },

    #[error("No lesson is in progress")]
    NoActiveSession,

    #[error("Nothing has been spoken yet")]
    NothingToReplay,

    #[error(transparent)]
    Session(#[from] SessionError),

    /// A remote service call failed. The controller is already back in a stable state.
    #[error("{stage} failed: {source}")]
    Collaborator {
        stage: LessonStage,
        #[source]
        source: PortError,
    },

    /// The microphone could not be acquired.
    #[error("Could not acquire the microphone: {0}")]
    Resource(#[source] PortError),
}

impl LessonError {
    pub(crate) fn collaborator(stage: LessonStage, source: PortError) -> Self {
        LessonError::Collaborator { stage, source }
    }

    /// The banner text shown to the child for this error.
    pub fn user_message(&self, locale: Locale) -> &'static str {
        let notice = match self {
            LessonError::InvalidTransition { .. }
            | LessonError::NoActiveSession
            | LessonError::Session(_) => FailureNotice::NotNow,
            LessonError::NothingToReplay => FailureNotice::Playback,
            LessonError::Resource(_) => FailureNotice::Recording,
            LessonError::Collaborator {
                source: PortError::Unavailable(_),
                ..
            } => FailureNotice::Configuration,
            LessonError::Collaborator { stage, .. } => match stage {
                LessonStage::Analysis => FailureNotice::Analysis,
                LessonStage::Recording => FailureNotice::Recording,
                LessonStage::Transcription | LessonStage::Conversation => {
                    FailureNotice::VoiceProcessing
                }
                LessonStage::Review => FailureNotice::Review,
                LessonStage::Playback => FailureNotice::Playback,
            },
        };
        phrases::failure_message(notice, locale)
    }
}
