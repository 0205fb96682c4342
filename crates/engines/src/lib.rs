//! Engine adapters: ASR, TTS and VAD behind narrow interfaces, plus the
//! registry that turns config kind tags into engine instances.

pub mod adaptive;
pub mod energy;
pub mod http_tts;
pub mod registry;
pub mod traits;
pub mod whisper;

pub use adaptive::AdaptiveVad;
pub use registry::{build_asr, build_tts, build_vad};
pub use traits::{AsrEngine, AudioPayload, TtsEngine, VadEngine, VadEvent};
