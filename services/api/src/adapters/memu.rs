//! services/api/src/adapters/memu.rs
//!
//! Implements the `LearningMemoryService` port against the MemU memory API. The
//! service is optional: without an API key every call is a no-op, and a
//! `402 Payment Required` answer is treated as "memory is switched off".

use amibuddy_core::domain::{CharacterRef, HomeworkAnalysis, Locale, UserContext};
use amibuddy_core::ports::{LearningMemoryService, PortError, PortResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

pub const MEMU_BASE_URL: &str = "https://api.memu.so";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryMessage {
    pub role: &'static str,
    pub content: String,
}

impl MemoryMessage {
    fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct MemorizeRequest<'a> {
    conversation: &'a [MemoryMessage],
    user_id: String,
    agent_id: &'a str,
}

struct Labels {
    session_start: &'static str,
    homework: &'static str,
    topics: &'static str,
    difficulty: &'static str,
    context: &'static str,
    timestamp: &'static str,
}

fn labels(locale: Locale) -> Labels {
    match locale {
        Locale::English => Labels {
            session_start: "Homework session started",
            homework: "Homework",
            topics: "Topics",
            difficulty: "Difficulty",
            context: "Homework context",
            timestamp: "Time",
        },
        Locale::Japanese => Labels {
            session_start: "宿題セッション開始",
            homework: "宿題の内容",
            topics: "トピック",
            difficulty: "難易度",
            context: "宿題コンテキスト",
            timestamp: "日時",
        },
    }
}

fn timestamp_line(locale: Locale) -> String {
    format!(
        "{}: {}",
        labels(locale).timestamp,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// The memory transcript stored when a homework is analyzed.
pub fn homework_conversation(
    character: &CharacterRef,
    analysis: &HomeworkAnalysis,
    locale: Locale,
) -> Vec<MemoryMessage> {
    let l = labels(locale);
    vec![
        MemoryMessage::new("system", format!("Character: {}", character.name)),
        MemoryMessage::new("user", l.session_start),
        MemoryMessage::new("assistant", format!("{}: {}", l.homework, analysis.description)),
        MemoryMessage::new(
            "assistant",
            format!("{}: {}", l.topics, analysis.topics.join(", ")),
        ),
        MemoryMessage::new(
            "assistant",
            format!("{}: {}", l.difficulty, analysis.difficulty),
        ),
        MemoryMessage::new("assistant", timestamp_line(locale)),
    ]
}

/// The memory transcript stored for one answered question.
pub fn exchange_conversation(
    character: &CharacterRef,
    question: &str,
    answer: &str,
    homework_context: &str,
    locale: Locale,
) -> Vec<MemoryMessage> {
    let mut conversation = vec![MemoryMessage::new(
        "system",
        format!("Character: {}", character.name),
    )];
    if !homework_context.trim().is_empty() {
        conversation.push(MemoryMessage::new(
            "system",
            format!("{}: {}", labels(locale).context, homework_context),
        ));
    }
    conversation.push(MemoryMessage::new("user", question));
    conversation.push(MemoryMessage::new("assistant", answer));
    conversation.push(MemoryMessage::new("system", timestamp_line(locale)));
    conversation
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct MemUAdapter {
    http: reqwest::Client,
    api_key: Option<String>,
    agent_id: String,
    base_url: String,
}

impl MemUAdapter {
    pub fn new(http: reqwest::Client, api_key: Option<String>, agent_id: String) -> Self {
        Self {
            http,
            api_key,
            agent_id,
            base_url: MEMU_BASE_URL.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn memorize(&self, user: &UserContext, conversation: &[MemoryMessage]) -> PortResult<()> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("MemU API key not configured; skipping memorization.");
            return Ok(());
        };

        let body = MemorizeRequest {
            conversation,
            user_id: user.user_id.to_string(),
            agent_id: &self.agent_id,
        };
        let response = self
            .http
            .post(format!("{}/api/v3/memory/memorize", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            debug!("MemU plan does not allow memorization; skipping.");
            return Ok(());
        }
        if !status.is_success() {
            return Err(PortError::Unexpected(format!(
                "MemU memorize returned HTTP {}",
                status
            )));
        }
        debug!("MemU stored {} message(s) for user {}.", conversation.len(), user.user_id);
        Ok(())
    }
}

#[async_trait]
impl LearningMemoryService for MemUAdapter {
    async fn remember_homework(
        &self,
        user: &UserContext,
        character: &CharacterRef,
        analysis: &HomeworkAnalysis,
    ) -> PortResult<()> {
        let conversation = homework_conversation(character, analysis, user.locale);
        self.memorize(user, &conversation).await
    }

    async fn remember_exchange(
        &self,
        user: &UserContext,
        character: &CharacterRef,
        question: &str,
        answer: &str,
        homework_context: &str,
    ) -> PortResult<()> {
        let conversation =
            exchange_conversation(character, question, answer, homework_context, user.locale);
        self.memorize(user, &conversation).await
    }
}
