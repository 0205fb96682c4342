//! OpenAI-compatible Whisper ASR adapter.
//!
//! Samples arrive as mono f32 PCM; they are packed into an in-memory WAV
//! and posted to the endpoint's `audio/transcriptions` route.

use aria_domain::config::AsrConfig;
use aria_domain::{Error, Result};

use crate::traits::AsrEngine;

/// Sample rate the client microphone path delivers.
pub const SAMPLE_RATE: u32 = 16_000;

pub struct OpenAiWhisperAsr {
    base_url: String,
    api_key: String,
    model: String,
    language: Option<String>,
    client: reqwest::Client,
}

impl OpenAiWhisperAsr {
    pub fn new(config: &AsrConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        tracing::info!(model = %config.model, base_url = %config.base_url, "whisper ASR ready");
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl AsrEngine for OpenAiWhisperAsr {
    async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let wav = pcm_to_wav(samples, SAMPLE_RATE);

        let file_part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Http(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone());
        if let Some(lang) = &self.language {
            form = form.text("language", lang.clone());
        }

        let url = format!("{}/audio/transcriptions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Engine(format!(
                "transcription failed: HTTP {} - {}",
                status.as_u16(),
                body
            )));
        }

        let value: serde_json::Value = serde_json::from_str(&body)?;
        value
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Engine("transcription response missing text".into()))
    }
}

/// Pack clamped f32 samples into a 16-bit mono WAV container.
pub fn pcm_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * 2;
    let mut wav = Vec::with_capacity(44 + data_len as usize);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());

    for sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let pcm16 = (clamped * 32767.0) as i16;
        wav.extend_from_slice(&pcm16.to_le_bytes());
    }

    wav
}
