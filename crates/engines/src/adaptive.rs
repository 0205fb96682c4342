//! Adaptive VAD policy: raise detection thresholds while the UI reports
//! background advertisement audio, snap back to base on stop.
//!
//! Only runtime parameters change; the `VadEngine` interface is untouched.

use std::sync::Arc;

use parking_lot::Mutex;

use aria_domain::config::VadConfig;

use crate::traits::VadEngine;

pub struct AdaptiveVad {
    engine: Arc<dyn VadEngine>,
    base_prob: f32,
    base_db: i32,
    adaptive_factor: f32,
    min_ratio: f32,
    max_ratio: f32,
    playing: Mutex<bool>,
}

impl AdaptiveVad {
    pub fn new(engine: Arc<dyn VadEngine>, config: &VadConfig) -> Self {
        Self {
            engine,
            base_prob: config.prob_threshold,
            base_db: config.db_threshold,
            adaptive_factor: config.adaptive.adaptive_factor,
            min_ratio: config.adaptive.min_threshold_ratio,
            max_ratio: config.adaptive.max_threshold_ratio,
            playing: Mutex::new(false),
        }
    }

    /// Raised thresholds for a given playback volume in `[0, 1]`.
    ///
    /// The result is clamped to the configured ratio band and never falls
    /// below the base thresholds, so loud playback can only make detection
    /// stricter.
    fn raised_thresholds(&self, volume: f32) -> (f32, i32) {
        let volume = volume.clamp(0.0, 1.0);
        let volume_factor = 1.0 + volume * self.adaptive_factor;

        let prob = (self.base_prob * volume_factor)
            .clamp(self.base_prob * self.min_ratio, self.base_prob * self.max_ratio)
            .max(self.base_prob);

        let db_adjustment = volume * 15.0;
        let db = (self.base_db as f32 + db_adjustment)
            .min(self.base_db as f32 * self.max_ratio)
            .max(self.base_db as f32);

        (prob, db as i32)
    }

    /// The UI reported playback started (or its volume changed).
    pub fn playback_started(&self, volume: f32) {
        *self.playing.lock() = true;
        let (prob, db) = self.raised_thresholds(volume);
        self.engine.set_thresholds(prob, db);
        tracing::info!(
            prob_threshold = prob,
            db_threshold = db,
            "adaptive VAD thresholds raised for playback"
        );
    }

    /// The UI reported playback stopped; thresholds snap back to base.
    pub fn playback_stopped(&self) {
        *self.playing.lock() = false;
        self.engine.set_thresholds(self.base_prob, self.base_db);
        tracing::info!("adaptive VAD thresholds restored to base");
    }

    /// Reset to base thresholds and clear detection state.
    pub fn reset(&self) {
        *self.playing.lock() = false;
        self.engine.set_thresholds(self.base_prob, self.base_db);
        self.engine.reset();
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.lock()
    }
}
