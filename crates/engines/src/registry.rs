//! Engine registry: config kind tags resolved to constructors.
//!
//! No inheritance: each kind maps to a concrete type implementing the
//! narrow capability trait.

use std::sync::Arc;

use aria_domain::config::{AsrConfig, TtsConfig, VadConfig};
use aria_domain::{Error, Result};

use crate::energy::EnergyVad;
use crate::http_tts::OpenAiTts;
use crate::traits::{AsrEngine, TtsEngine, VadEngine};
use crate::whisper::OpenAiWhisperAsr;

pub fn build_asr(config: &AsrConfig) -> Result<Arc<dyn AsrEngine>> {
    match config.kind.as_str() {
        "openai_whisper" => Ok(Arc::new(OpenAiWhisperAsr::new(config)?)),
        other => Err(Error::Engine(format!("unknown ASR kind: {other}"))),
    }
}

pub fn build_tts(config: &TtsConfig) -> Result<Arc<dyn TtsEngine>> {
    match config.kind.as_str() {
        "openai_tts" => Ok(Arc::new(OpenAiTts::new(config)?)),
        other => Err(Error::Engine(format!("unknown TTS kind: {other}"))),
    }
}

pub fn build_vad(config: &VadConfig) -> Result<Arc<dyn VadEngine>> {
    match config.kind.as_str() {
        "energy" => Ok(Arc::new(EnergyVad::new(config))),
        other => Err(Error::Engine(format!("unknown VAD kind: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_construct() {
        assert!(build_asr(&AsrConfig::default()).is_ok());
        assert!(build_tts(&TtsConfig::default()).is_ok());
        assert!(build_vad(&VadConfig::default()).is_ok());
    }

    #[test]
    fn unknown_kind_is_an_engine_error() {
        let mut config = AsrConfig::default();
        config.kind = "parakeet".into();
        let err = build_asr(&config).err().unwrap();
        assert!(matches!(err, Error::Engine(_)));
    }
}
