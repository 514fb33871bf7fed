//! services/api/src/adapters/chat_llm.rs
//!
//! This module contains the adapter for the buddy's conversational replies.
//! It implements the `ConversationService` port from the `core` crate.

use amibuddy_core::domain::{ConversationRole, ConversationTurn, Locale};
use amibuddy_core::ports::{ConversationService, PortError, PortResult};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

const TUTOR_PROMPT_JA: &str = "あなたは子供の宿題を手伝う優しい先生です。
宿題の内容: {context}

子供の質問に対して、わかりやすく、優しく答えてください。
答えは2-3文で簡潔にしてください。";

const TUTOR_PROMPT_EN: &str = "You are a gentle teacher helping a child with their homework.
Homework: {context}

Answer the child's question kindly and in a way that is easy to understand.
Keep your answer to 2-3 short sentences.";

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 512;

fn system_prompt(homework_context: &str, locale: Locale) -> String {
    let template = match locale {
        Locale::English => TUTOR_PROMPT_EN,
        Locale::Japanese => TUTOR_PROMPT_JA,
    };
    template.replace("{context}", homework_context)
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ConversationService` using an OpenAI chat model.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn turn_message(turn: &ConversationTurn) -> PortResult<ChatCompletionRequestMessage> {
        let message = match turn.role {
            ConversationRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(turn.content.clone())
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ConversationRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(turn.content.clone())
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        };
        Ok(message)
    }
}

//=========================================================================================
// `ConversationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ConversationService for OpenAiChatAdapter {
    /// Answers the child's question with the homework and the earlier exchanges as context.
    async fn reply(
        &self,
        question: &str,
        homework_context: &str,
        prior_log: &[ConversationTurn],
        locale: Locale,
    ) -> PortResult<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(prior_log.len() + 2);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt(homework_context, locale))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        );
        for turn in prior_log {
            messages.push(Self::turn_message(turn)?);
        }
        messages.push(Self::turn_message(&ConversationTurn::user(question))?);

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(MAX_TOKENS)
            .temperature(TEMPERATURE)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        // An empty answer is allowed here; the controller substitutes its own apology.
        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_homework_context() {
        let prompt = system_prompt("Count the apples", Locale::English);
        assert!(prompt.contains("Homework: Count the apples"));
        assert!(prompt.contains("2-3 short sentences"));

        let prompt = system_prompt("りんごをかぞえる", Locale::Japanese);
        assert!(prompt.contains("宿題の内容: りんごをかぞえる"));
    }
}
