//! OpenAI-compatible TTS adapter (`audio/speech` route).

use base64::Engine as _;

use aria_domain::config::TtsConfig;
use aria_domain::{Error, Result};

use crate::traits::{AudioPayload, TtsEngine};

pub struct OpenAiTts {
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        tracing::info!(model = %config.model, voice = %config.voice, "TTS engine ready");
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl TtsEngine for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<AudioPayload> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "response_format": "mp3",
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::Engine(format!(
                "synthesis failed: HTTP {} - {}",
                status.as_u16(),
                detail
            )));
        }

        let bytes = resp.bytes().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(AudioPayload {
            audio: base64::engine::general_purpose::STANDARD.encode(&bytes),
            format: "mp3".into(),
        })
    }
}
