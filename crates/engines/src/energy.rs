//! Energy-gate VAD: RMS→dB threshold with hit/miss hysteresis.
//!
//! Each chunk is scored once; `required_hits` consecutive speech chunks open
//! an utterance, `required_misses` consecutive quiet chunks close it and
//! flush the buffered samples. A small pre-roll keeps the onset syllable.

use parking_lot::Mutex;

use aria_domain::config::VadConfig;

use crate::traits::{VadEngine, VadEvent};

/// Chunks of pre-roll kept before a detected onset.
const PRE_ROLL_CHUNKS: usize = 4;

struct State {
    prob_threshold: f32,
    db_threshold: i32,
    speaking: bool,
    hits: u32,
    misses: u32,
    buffer: Vec<f32>,
    pre_roll: Vec<Vec<f32>>,
}

pub struct EnergyVad {
    required_hits: u32,
    required_misses: u32,
    state: Mutex<State>,
}

impl EnergyVad {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            required_hits: config.required_hits.max(1),
            required_misses: config.required_misses.max(1),
            state: Mutex::new(State {
                prob_threshold: config.prob_threshold,
                db_threshold: config.db_threshold,
                speaking: false,
                hits: 0,
                misses: 0,
                buffer: Vec::new(),
                pre_roll: Vec::new(),
            }),
        }
    }

    /// Score one chunk: (pseudo-probability, level in offset dB).
    fn score(chunk: &[f32]) -> (f32, f32) {
        if chunk.is_empty() {
            return (0.0, 0.0);
        }
        let rms = (chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32).sqrt();
        // Offset so typical speech lands in the configured 0..100 range.
        let db = 20.0 * (rms + 1e-7).log10() + 100.0;
        let prob = (rms * 10.0).min(1.0);
        (prob, db)
    }
}

impl VadEngine for EnergyVad {
    fn detect_speech(&self, chunk: &[f32]) -> Vec<VadEvent> {
        let mut state = self.state.lock();
        let mut events = Vec::new();

        let (prob, db) = Self::score(chunk);
        let is_speech = prob >= state.prob_threshold && db >= state.db_threshold as f32;

        if state.speaking {
            state.buffer.extend_from_slice(chunk);
            if is_speech {
                state.misses = 0;
            } else {
                state.misses += 1;
                if state.misses >= self.required_misses {
                    let utterance = std::mem::take(&mut state.buffer);
                    state.speaking = false;
                    state.misses = 0;
                    state.hits = 0;
                    events.push(VadEvent::SpeechEnd(utterance));
                }
            }
        } else if is_speech {
            state.hits += 1;
            state.pre_roll.push(chunk.to_vec());
            if state.hits >= self.required_hits {
                state.speaking = true;
                state.hits = 0;
                let pre_roll = std::mem::take(&mut state.pre_roll);
                state.buffer = pre_roll.into_iter().flatten().collect();
                events.push(VadEvent::SpeechStart);
            }
        } else {
            state.hits = 0;
            state.pre_roll.push(chunk.to_vec());
            if state.pre_roll.len() > PRE_ROLL_CHUNKS {
                state.pre_roll.remove(0);
            }
        }

        events
    }

    fn set_thresholds(&self, prob_threshold: f32, db_threshold: i32) {
        let mut state = self.state.lock();
        state.prob_threshold = prob_threshold;
        state.db_threshold = db_threshold;
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.speaking = false;
        state.hits = 0;
        state.misses = 0;
        state.buffer.clear();
        state.pre_roll.clear();
    }
}
