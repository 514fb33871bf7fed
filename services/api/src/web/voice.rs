//! services/api/src/web/voice.rs
//!
//! Plays the buddy's voice by synthesizing speech and pushing it to the client as a
//! binary WebSocket frame. Whether the client managed to autoplay it is reported back
//! separately with a `playback_blocked` message.

use std::sync::Arc;

use amibuddy_core::domain::Locale;
use amibuddy_core::ports::{PlaybackOutcome, PortError, PortResult, VoicePlayer};
use async_trait::async_trait;
use axum::extract::ws::Message;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::adapters::tts::SpeechSynthesizer;

pub struct WsVoicePlayer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    outbound: UnboundedSender<Message>,
}

impl WsVoicePlayer {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, outbound: UnboundedSender<Message>) -> Self {
        Self {
            synthesizer,
            outbound,
        }
    }
}

#[async_trait]
impl VoicePlayer for WsVoicePlayer {
    async fn speak(&self, text: &str, locale: Locale) -> PortResult<PlaybackOutcome> {
        let audio = self.synthesizer.synthesize(text, locale).await?;
        debug!("Sending {} byte(s) of speech to the client.", audio.len());
        self.outbound
            .send(Message::Binary(audio.into()))
            .map_err(|_| PortError::Unexpected("The client has disconnected".to_string()))?;
        Ok(PlaybackOutcome::Played)
    }
}
