//! The narrow engine capability set: `transcribe`, `synthesize`,
//! `detect_speech`.
//!
//! Engines may be shared by reference across connections, so every
//! implementation must be safe under concurrent invocation (interior state
//! behind locks).

use aria_domain::Result;

/// Synthesized audio ready for the client: base64 payload plus its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub audio: String,
    pub format: String,
}

/// Automatic speech recognition.
#[async_trait::async_trait]
pub trait AsrEngine: Send + Sync {
    /// Transcribe mono f32 PCM samples into text.
    async fn transcribe(&self, samples: &[f32]) -> Result<String>;
}

/// Text-to-speech synthesis.
#[async_trait::async_trait]
pub trait TtsEngine: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioPayload>;
}

/// Events produced by the server-side voice activity detector.
#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    /// Speech onset. The hub tells the client to pause playback.
    SpeechStart,
    /// A full utterance ended; carries the buffered samples.
    SpeechEnd(Vec<f32>),
}

/// Voice activity detection over a continuous sample stream.
pub trait VadEngine: Send + Sync {
    /// Feed one chunk of samples; returns zero or more detection events.
    fn detect_speech(&self, chunk: &[f32]) -> Vec<VadEvent>;

    /// Adjust the runtime thresholds (adaptive policy). Engines without
    /// tunable thresholds may ignore this.
    fn set_thresholds(&self, prob_threshold: f32, db_threshold: i32);

    /// Drop any buffered detection state.
    fn reset(&self);
}
