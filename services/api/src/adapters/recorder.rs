//! services/api/src/adapters/recorder.rs
//!
//! The lesson's microphone lives in the client. Captured audio arrives over the
//! WebSocket as binary frames; this recorder collects them while a recording is
//! held and hands the clip to the controller when it is stopped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use amibuddy_core::domain::{AudioClip, AudioFormat};
use amibuddy_core::ports::{ActiveRecording, AudioRecorder, PortError, PortResult};
use async_trait::async_trait;
use tracing::debug;

/// Upper bound for one question, roughly two minutes of 48 kHz PCM16.
pub const MAX_CLIP_BYTES: usize = 12 * 1024 * 1024;

#[derive(Default)]
struct Capture {
    active: bool,
    generation: u64,
    buffer: Vec<u8>,
}

/// One recorder per WebSocket connection.
#[derive(Clone)]
pub struct FrameRecorder {
    capture: Arc<Mutex<Capture>>,
    format: AudioFormat,
}

impl FrameRecorder {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            capture: Arc::new(Mutex::new(Capture::default())),
            format,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Capture> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_recording(&self) -> bool {
        self.lock().active
    }

    /// Appends a frame from the client. Frames outside a recording are dropped.
    pub fn push_frame(&self, data: &[u8]) -> bool {
        let mut capture = self.lock();
        if !capture.active {
            return false;
        }
        if capture.buffer.len() + data.len() > MAX_CLIP_BYTES {
            debug!("Recording reached its size limit; dropping frame.");
            return false;
        }
        capture.buffer.extend_from_slice(data);
        true
    }
}

#[async_trait]
impl AudioRecorder for FrameRecorder {
    async fn start_recording(&self) -> PortResult<Box<dyn ActiveRecording>> {
        let mut capture = self.lock();
        if capture.active {
            return Err(PortError::Busy("microphone".to_string()));
        }
        capture.active = true;
        capture.generation += 1;
        capture.buffer.clear();

        Ok(Box::new(FrameRecording {
            capture: self.capture.clone(),
            format: self.format.clone(),
            generation: capture.generation,
            released: false,
        }))
    }
}

struct FrameRecording {
    capture: Arc<Mutex<Capture>>,
    format: AudioFormat,
    generation: u64,
    released: bool,
}

impl FrameRecording {
    /// Ends the recording and takes whatever was captured.
    fn release(&mut self) -> Vec<u8> {
        self.released = true;
        let mut capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        if capture.generation != self.generation {
            return Vec::new();
        }
        capture.active = false;
        std::mem::take(&mut capture.buffer)
    }
}

#[async_trait]
impl ActiveRecording for FrameRecording {
    async fn stop_and_unload(self: Box<Self>) -> PortResult<AudioClip> {
        let mut recording = self;
        let data = recording.release();
        debug!("Recording stopped with {} byte(s).", data.len());
        Ok(AudioClip {
            data,
            format: recording.format.clone(),
        })
    }
}

impl Drop for FrameRecording {
    fn drop(&mut self) {
        if !self.released {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> FrameRecorder {
        FrameRecorder::new(AudioFormat::Pcm16 { sample_rate: 48_000 })
    }

    #[tokio::test]
    async fn frames_are_collected_only_while_recording() {
        let recorder = recorder();
        assert!(!recorder.push_frame(&[9, 9]));

        let handle = recorder.start_recording().await.unwrap();
        assert!(recorder.push_frame(&[1, 2]));
        assert!(recorder.push_frame(&[3, 4]));
        let clip = handle.stop_and_unload().await.unwrap();

        assert_eq!(clip.data, vec![1, 2, 3, 4]);
        assert_eq!(clip.format, AudioFormat::Pcm16 { sample_rate: 48_000 });
        assert!(!recorder.is_recording());
        assert!(!recorder.push_frame(&[5, 6]));
    }

    #[tokio::test]
    async fn second_recording_is_busy() {
        let recorder = recorder();
        let _held = recorder.start_recording().await.unwrap();

        let err = recorder.start_recording().await.err().unwrap();

        assert!(matches!(err, PortError::Busy(_)));
    }

    #[tokio::test]
    async fn dropping_the_handle_releases_the_microphone() {
        let recorder = recorder();
        let handle = recorder.start_recording().await.unwrap();
        recorder.push_frame(&[1, 2]);
        drop(handle);

        assert!(!recorder.is_recording());
        let handle = recorder.start_recording().await.unwrap();
        let clip = handle.stop_and_unload().await.unwrap();
        assert!(clip.data.is_empty());
    }
}
