//! Load cell to grams, and grams to "is the bottle on the holder?".

use tracing::{debug, info, warn};

use crate::config::{ScaleConfig, WeightConfig};
use crate::store::{KvStore, Value};

pub const KEY_TARE_OFFSET: &str = "tare_offset";

/// Raw load-cell access.  `None` means the converter had no sample ready.
pub trait LoadCell {
    fn read_counts(&mut self) -> Option<i64>;
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

pub struct WeightSampler<C: LoadCell> {
    cell: C,
    calibration_factor: f32,
    tare_samples: u32,
    offset: i64,
    last_good_g: f32,
}

impl<C: LoadCell> WeightSampler<C> {
    /// Load the persisted tare offset, or tare now and persist it if the
    /// store has none (first boot).
    pub fn new(cell: C, cfg: &ScaleConfig, store: &mut impl KvStore) -> Self {
        let mut sampler = Self {
            cell,
            calibration_factor: cfg.calibration_factor,
            tare_samples: cfg.tare_samples,
            offset: 0,
            last_good_g: 0.0,
        };

        match store.get(KEY_TARE_OFFSET) {
            Some(_) => {
                sampler.offset = store.get_i64(KEY_TARE_OFFSET, 0);
                info!(offset = sampler.offset, "tare offset loaded");
            }
            None => {
                info!("no stored tare offset, taring");
                sampler.tare(store);
            }
        }
        sampler
    }

    /// Current weight in grams.  A failed read yields the last good value.
    pub fn read_weight(&mut self) -> f32 {
        match self.cell.read_counts() {
            Some(counts) => {
                self.last_good_g = (counts - self.offset) as f32 / self.calibration_factor;
                self.last_good_g
            }
            None => self.last_good_g,
        }
    }

    #[cfg(test)]
    pub fn last_weight(&self) -> f32 {
        self.last_good_g
    }

    #[cfg(test)]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Re-zero against whatever is on the platform now and persist the new
    /// offset.  Returns false (offset unchanged) if the cell never answered.
    pub fn tare(&mut self, store: &mut impl KvStore) -> bool {
        let wanted = self.tare_samples.max(1);
        let mut sum: i64 = 0;
        let mut got: i64 = 0;
        // Allow a few misses per wanted sample before giving up.
        for _ in 0..wanted * 4 {
            if let Some(c) = self.cell.read_counts() {
                sum += c;
                got += 1;
                if got >= i64::from(wanted) {
                    break;
                }
            }
        }

        if got == 0 {
            warn!("tare failed: load cell not responding");
            return false;
        }

        self.offset = sum / got;
        self.last_good_g = 0.0;
        store.put(KEY_TARE_OFFSET, Value::Int(self.offset));
        info!(offset = self.offset, samples = got, "tare complete");
        true
    }
}

// ---------------------------------------------------------------------------
// Bottle detector
// ---------------------------------------------------------------------------

/// Threshold with an optional hysteresis band above it and N-sample
/// confirmation.  With zero hysteresis and one sample this is a plain
/// `weight >= threshold` test.
#[derive(Debug, Clone)]
pub struct BottleDetector {
    threshold_g: f32,
    hysteresis_g: f32,
    confirm_samples: u32,
    present: bool,
    streak: u32,
}

impl BottleDetector {
    pub fn new(cfg: &WeightConfig) -> Self {
        Self {
            threshold_g: cfg.presence_threshold_g,
            hysteresis_g: cfg.hysteresis_g,
            confirm_samples: cfg.confirm_samples.max(1),
            present: false,
            streak: 0,
        }
    }

    /// Seed the decision from a single reading, skipping confirmation.
    pub fn reset(&mut self, weight_g: f32) {
        self.present = weight_g >= self.threshold_g;
        self.streak = 0;
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn update(&mut self, weight_g: f32) -> bool {
        let candidate = if self.present {
            weight_g >= self.threshold_g
        } else {
            weight_g >= self.threshold_g + self.hysteresis_g
        };

        if candidate == self.present {
            self.streak = 0;
            return self.present;
        }

        self.streak += 1;
        if self.streak >= self.confirm_samples {
            self.present = candidate;
            self.streak = 0;
            debug!(present = self.present, weight_g, "bottle presence changed");
        }
        self.present
    }
}

// ===========================================================================
// Tests
// ===========================================================================
