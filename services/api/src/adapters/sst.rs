//! services/api/src/adapters/sst.rs
//!
//! This module contains the adapter for OpenAI's Speech-to-Text (Whisper) service.
//! It implements the `TranscriptionService` port from the `core` crate.

use amibuddy_core::domain::{AudioClip, AudioFormat, Locale};
use amibuddy_core::ports::{PortError, PortResult, TranscriptionService};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::audio::{AudioInput, CreateTranscriptionRequest},
    Client,
};
use async_trait::async_trait;
use hound::{WavSpec, WavWriter};
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `TranscriptionService` port using the OpenAI Whisper API.
#[derive(Clone)]
pub struct OpenAiSstAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiSstAdapter {
    /// Creates a new `OpenAiSstAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

/// Wraps little-endian mono PCM16 samples in a WAV container.
pub fn pcm16_to_wav(pcm_data: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for chunk in pcm_data.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// File name Whisper should see for an already-encoded clip; it sniffs the format from it.
fn upload_name(mime: &str) -> &'static str {
    let subtype = mime
        .split(';')
        .next()
        .unwrap_or(mime)
        .trim()
        .rsplit('/')
        .next()
        .unwrap_or("");
    match subtype {
        "webm" => "question.webm",
        "ogg" => "question.ogg",
        "mpeg" | "mp3" => "question.mp3",
        "wav" | "x-wav" | "wave" => "question.wav",
        _ => "question.m4a",
    }
}

//=========================================================================================
// `TranscriptionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TranscriptionService for OpenAiSstAdapter {
    /// Transcribes a recorded question using the configured Whisper model.
    async fn transcribe(&self, clip: &AudioClip, locale: Locale) -> PortResult<String> {
        if clip.is_empty() {
            debug!("Empty recording; nothing to transcribe.");
            return Ok(String::new());
        }

        let input = match &clip.format {
            AudioFormat::Pcm16 { sample_rate } => {
                let wav_data = pcm16_to_wav(&clip.data, *sample_rate)
                    .map_err(|e| PortError::Unexpected(format!("Failed to encode WAV: {}", e)))?;
                AudioInput::from_vec_u8("question.wav".into(), wav_data)
            }
            AudioFormat::Encoded { mime } => {
                AudioInput::from_vec_u8(upload_name(mime).into(), clip.data.clone())
            }
        };

        let request = CreateTranscriptionRequest {
            file: input,
            model: self.model.clone(),
            language: Some(locale.code().to_string()),
            ..Default::default()
        };

        let response = self
            .client
            .audio()
            .transcription()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_is_wrapped_in_wav_header() {
        let pcm: Vec<u8> = [0i16, 1000, -1000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let wav = pcm16_to_wav(&pcm, 16_000).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 1000, -1000]);
    }

    #[test]
    fn encoded_clips_keep_their_container() {
        assert_eq!(upload_name("audio/webm;codecs=opus"), "question.webm");
        assert_eq!(upload_name("audio/mpeg"), "question.mp3");
        assert_eq!(upload_name("audio/mp4"), "question.m4a");
    }
}
