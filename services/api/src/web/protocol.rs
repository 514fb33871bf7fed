//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the lesson client and the API server.

use amibuddy_core::controller::{Exchange, FinishSummary, SaveReport, SaveStep};
use amibuddy_core::domain::{format_duration, HomeworkAnalysis, HomeworkReview};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================
// NOTE: Recorded question audio is sent as raw Binary frames, not as part of this enum.
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a lesson with the chosen buddy. This must be the first message on the connection.
    Init {
        character_id: String,
        character_name: String,
        /// Sample rate of raw PCM16 frames. Ignored when `audio_mime` is set.
        #[serde(default)]
        sample_rate: Option<u32>,
        /// Container type when the client records compressed audio instead of PCM.
        #[serde(default)]
        audio_mime: Option<String>,
    },

    /// A photo of the homework, as a `data:` URI or a URL.
    SubmitHomework { image: String },

    StartRecording,
    StopRecording,
    CancelRecording,
    FinishLesson,
    BeginReview,

    /// A photo of the completed homework.
    SubmitReview { image: String },

    ReturnHome,

    /// Asks for the last line to be spoken again.
    Replay,

    /// The client could not autoplay the last audio frame.
    PlaybackBlocked,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================
// NOTE: The buddy's voice is sent as raw Binary frames, not as part of this enum.
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the lesson was initialized.
    LessonReady {
        character_name: String,
        locale: String,
    },

    /// Every controller state change, including the intermediate ones.
    StateChanged { state: String },

    /// The free quota is used up; the client should show the upgrade screen.
    UpgradeRequired {
        homework_count: u32,
        free_limit: u32,
        message: String,
    },

    AnalysisReady {
        description: String,
        topics: Vec<String>,
        difficulty: String,
    },

    Exchange {
        question: String,
        answer: String,
        used_placeholder_question: bool,
    },

    Timer {
        elapsed_seconds: u64,
        display: String,
    },

    LessonFinished {
        message: String,
        elapsed_seconds: u64,
        duration: String,
    },

    ReviewReady {
        score: u8,
        feedback: String,
        strengths: Vec<String>,
        improvements: Vec<String>,
        sticker: String,
    },

    /// The lesson was persisted (possibly partially) and discarded.
    Saved {
        history_saved: bool,
        homework_count: Option<u32>,
        reward_card_url: Option<String>,
        failed_steps: Vec<String>,
    },

    /// The last line can be replayed manually.
    ReplayAvailable,

    /// A localized message the client shows in a banner.
    Error { message: String },
}

impl ServerMessage {
    pub fn analysis_ready(analysis: &HomeworkAnalysis) -> Self {
        ServerMessage::AnalysisReady {
            description: analysis.description.clone(),
            topics: analysis.topics.clone(),
            difficulty: analysis.difficulty.clone(),
        }
    }

    pub fn exchange(exchange: Exchange) -> Self {
        ServerMessage::Exchange {
            question: exchange.question,
            answer: exchange.answer,
            used_placeholder_question: exchange.used_placeholder_question,
        }
    }

    pub fn timer(elapsed_seconds: u64) -> Self {
        ServerMessage::Timer {
            elapsed_seconds,
            display: format_duration(elapsed_seconds),
        }
    }

    pub fn finished(summary: FinishSummary) -> Self {
        ServerMessage::LessonFinished {
            message: summary.message,
            elapsed_seconds: summary.elapsed_seconds,
            duration: summary.duration_display,
        }
    }

    pub fn review_ready(review: HomeworkReview) -> Self {
        ServerMessage::ReviewReady {
            score: review.score,
            feedback: review.feedback,
            strengths: review.strengths,
            improvements: review.improvements,
            sticker: review.sticker,
        }
    }

    pub fn saved(report: &SaveReport) -> Self {
        ServerMessage::Saved {
            history_saved: report.history_saved,
            homework_count: report.quota.map(|q| q.homework_count),
            reward_card_url: report.record.reward_card_url.clone(),
            failed_steps: report
                .failures
                .iter()
                .map(|f| save_step_name(f.step).to_string())
                .collect(),
        }
    }
}

fn save_step_name(step: SaveStep) -> &'static str {
    match step {
        SaveStep::ImageUpload => "image_upload",
        SaveStep::RewardCard => "reward_card",
        SaveStep::History => "history",
        SaveStep::Quota => "quota",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_are_tagged_by_type() {
        let init: ClientMessage = serde_json::from_value(json!({
            "type": "init",
            "character_id": "c1",
            "character_name": "Ami"
        }))
        .unwrap();
        assert_eq!(
            init,
            ClientMessage::Init {
                character_id: "c1".to_string(),
                character_name: "Ami".to_string(),
                sample_rate: None,
                audio_mime: None,
            }
        );

        let submit: ClientMessage = serde_json::from_value(json!({
            "type": "submit_homework",
            "image": "data:image/png;base64,aGVsbG8="
        }))
        .unwrap();
        assert!(matches!(submit, ClientMessage::SubmitHomework { .. }));

        let blocked: ClientMessage =
            serde_json::from_str(r#"{"type":"playback_blocked"}"#).unwrap();
        assert_eq!(blocked, ClientMessage::PlaybackBlocked);
    }

    #[test]
    fn unknown_client_message_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn timer_message_carries_display() {
        let value = serde_json::to_value(ServerMessage::timer(125)).unwrap();
        assert_eq!(
            value,
            json!({"type": "timer", "elapsed_seconds": 125, "display": "00:02:05"})
        );
    }

    #[test]
    fn state_change_serializes_snake_case() {
        let value = serde_json::to_value(ServerMessage::StateChanged {
            state: "review_pending".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "state_changed", "state": "review_pending"}));
        assert_eq!(
            serde_json::to_value(ServerMessage::ReplayAvailable).unwrap(),
            json!({"type": "replay_available"})
        );
    }
}
