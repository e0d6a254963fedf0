//! Persisted hydration totals: baseline weight, today's intake and the day
//! index they belong to.  Every mutation writes all three fields in one
//! store commit.

use tracing::{debug, info, warn};

use crate::store::{KvStore, Value};

pub const KEY_BASELINE: &str = "baseline_weight";
pub const KEY_DAILY_TOTAL: &str = "daily_total";
pub const KEY_LAST_DAY: &str = "last_day";

#[derive(Debug)]
pub struct Ledger<S: KvStore> {
    store: S,
    baseline_g: Option<f32>,
    daily_total_ml: f32,
    last_day: i64,
}

impl<S: KvStore> Ledger<S> {
    pub fn load(store: S) -> Self {
        let baseline_g = match store.get(KEY_BASELINE) {
            Some(Value::Float(v)) => Some(v),
            Some(Value::Int(v)) => Some(v as f32),
            None => None,
        };
        let daily_total_ml = store.get_f32(KEY_DAILY_TOTAL, 0.0).max(0.0);
        let last_day = store.get_i64(KEY_LAST_DAY, -1);
        debug!(?baseline_g, daily_total_ml, last_day, "ledger loaded");
        Self {
            store,
            baseline_g,
            daily_total_ml,
            last_day,
        }
    }

    pub fn baseline(&self) -> Option<f32> {
        self.baseline_g
    }

    pub fn daily_total(&self) -> f32 {
        self.daily_total_ml
    }

    pub fn last_day(&self) -> i64 {
        self.last_day
    }

    /// Credit a drink and move the baseline.  Returns the new total, or
    /// `None` if the amount was rejected.
    pub fn record_drink(&mut self, amount_ml: f32, new_baseline_g: f32) -> Option<f32> {
        if !amount_ml.is_finite() || amount_ml < 0.0 {
            warn!(amount_ml, "rejecting negative drink amount");
            return None;
        }
        self.daily_total_ml += amount_ml;
        self.baseline_g = Some(new_baseline_g);
        self.commit();
        info!(amount_ml, total_ml = self.daily_total_ml, "drink recorded");
        Some(self.daily_total_ml)
    }

    pub fn set_baseline(&mut self, baseline_g: Option<f32>) {
        self.baseline_g = baseline_g;
        self.commit();
    }

    /// Zero the total for `new_day`.  Returns false if `new_day` is already
    /// the current day.
    pub fn rollover_day(&mut self, new_day: i64) -> bool {
        if new_day == self.last_day {
            return false;
        }
        info!(
            from = self.last_day,
            to = new_day,
            total_ml = self.daily_total_ml,
            "day rollover"
        );
        self.last_day = new_day;
        self.daily_total_ml = 0.0;
        self.commit();
        true
    }

    fn commit(&mut self) {
        self.store.put_all(&[
            (KEY_BASELINE, self.baseline_g.map(Value::Float)),
            (KEY_DAILY_TOTAL, Some(Value::Float(self.daily_total_ml))),
            (KEY_LAST_DAY, Some(Value::Int(self.last_day))),
        ]);
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Shared with the sampler's tare calibration.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

// ===========================================================================
// Tests
// ===========================================================================
