//! Simulated bottle holder for local development.
//!
//! Models a user who lifts the bottle, drinks and puts it back, refills it
//! when it runs low, and occasionally wanders off with it.  Readings carry
//! HX711-style electronic noise and the odd spike.

use std::fmt;
use std::time::Duration;

use crate::config::SimConfig;
use crate::scale::LoadCell;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured user behaviours selectable via `sim.scenario`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Drinks every 20-ish minutes, refills when low.  Low noise.
    Typical,
    /// Rarely drinks, so the reminder cycle gets exercised.
    Forgetful,
    /// Like typical, but sometimes carries the bottle away for minutes at a
    /// time, long enough to trip the missing alarm.
    Wanderer,
    /// Typical behaviour on a cheap, noisy cell with frequent spikes.
    Noisy,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "forgetful" => Self::Forgetful,
            "wanderer" => Self::Wanderer,
            "noisy" => Self::Noisy,
            _ => Self::Typical,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Typical => write!(f, "typical"),
            Self::Forgetful => write!(f, "forgetful"),
            Self::Wanderer => write!(f, "wanderer"),
            Self::Noisy => write!(f, "noisy"),
        }
    }
}

struct Profile {
    /// Mean time the bottle rests between drinks (seconds).
    rest_mean_s: f64,
    /// Mean sip size (grams).
    sip_mean_g: f64,
    /// Chance that a lift turns into a long absence.
    wander_prob: f32,
    noise_sigma_g: f64,
    spike_prob: f32,
    spike_sigma_g: f64,
}

impl Profile {
    fn for_scenario(s: Scenario) -> Self {
        match s {
            Scenario::Typical => Self {
                rest_mean_s: 1200.0,
                sip_mean_g: 90.0,
                wander_prob: 0.0,
                noise_sigma_g: 0.4,
                spike_prob: 0.001,
                spike_sigma_g: 30.0,
            },
            Scenario::Forgetful => Self {
                rest_mean_s: 5400.0,
                sip_mean_g: 60.0,
                wander_prob: 0.0,
                noise_sigma_g: 0.4,
                spike_prob: 0.001,
                spike_sigma_g: 30.0,
            },
            Scenario::Wanderer => Self {
                rest_mean_s: 900.0,
                sip_mean_g: 80.0,
                wander_prob: 0.3,
                noise_sigma_g: 0.4,
                spike_prob: 0.001,
                spike_sigma_g: 30.0,
            },
            Scenario::Noisy => Self {
                rest_mean_s: 1200.0,
                sip_mean_g: 90.0,
                wander_prob: 0.0,
                noise_sigma_g: 3.0,
                spike_prob: 0.02,
                spike_sigma_g: 120.0,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Raw counts the simulated converter reports for an empty platform.
const ZERO_COUNTS: f64 = 84_000.0;
/// Weight of the empty bottle.
const EMPTY_BOTTLE_G: f64 = 180.0;
/// The user refills once less than this much water is left.
const REFILL_BELOW_G: f64 = 150.0;
/// Platform is empty for this long after power-on, so first-boot tare sees
/// nothing on it.
const BOOT_EMPTY_S: f64 = 3.0;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Resting { ticks_left: u64 },
    Lifted { ticks_left: u64 },
}

pub struct SimLoadCell {
    scenario: Scenario,
    profile: Profile,
    tick_s: f64,
    calibration_factor: f64,
    capacity_g: f64,
    water_g: f64,
    phase: Phase,
}

impl SimLoadCell {
    /// `tick` is the interval at which `read_counts` will be called; the
    /// simulated user's timing is expressed in those ticks.
    pub fn new(cfg: &SimConfig, calibration_factor: f32, tick: Duration) -> Self {
        let scenario = Scenario::from_str_lossy(&cfg.scenario);
        let tick_s = tick.as_secs_f64().max(0.001);
        let capacity_g = (f64::from(cfg.bottle_full_g) - EMPTY_BOTTLE_G).max(100.0);
        Self {
            scenario,
            profile: Profile::for_scenario(scenario),
            tick_s,
            calibration_factor: f64::from(calibration_factor),
            capacity_g,
            water_g: capacity_g,
            phase: Phase::Lifted {
                ticks_left: (BOOT_EMPTY_S / tick_s).ceil() as u64,
            },
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    fn ticks(&self, secs: f64) -> u64 {
        (secs.max(0.0) / self.tick_s).ceil() as u64
    }

    /// True weight on the platform, before noise.
    pub fn true_weight_g(&self) -> f64 {
        match self.phase {
            Phase::Resting { .. } => EMPTY_BOTTLE_G + self.water_g,
            Phase::Lifted { .. } => 0.0,
        }
    }

    fn advance(&mut self) {
        self.phase = match self.phase {
            Phase::Resting { ticks_left: 0 } => {
                let p = &self.profile;
                let away_s = if fastrand::f32() < p.wander_prob {
                    gaussian(300.0, 60.0).max(200.0)
                } else {
                    gaussian(6.0, 2.0).max(2.0)
                };
                let sip = gaussian(p.sip_mean_g, p.sip_mean_g * 0.3).max(5.0);
                self.water_g = (self.water_g - sip).max(0.0);
                if self.water_g < REFILL_BELOW_G {
                    self.water_g = self.capacity_g;
                }
                Phase::Lifted {
                    ticks_left: self.ticks(away_s),
                }
            }
            Phase::Resting { ticks_left } => Phase::Resting {
                ticks_left: ticks_left - 1,
            },
            Phase::Lifted { ticks_left: 0 } => {
                let rest = gaussian(self.profile.rest_mean_s, self.profile.rest_mean_s * 0.25);
                Phase::Resting {
                    ticks_left: self.ticks(rest.max(30.0)),
                }
            }
            Phase::Lifted { ticks_left } => Phase::Lifted {
                ticks_left: ticks_left - 1,
            },
        };
    }
}

impl LoadCell for SimLoadCell {
    fn read_counts(&mut self) -> Option<i64> {
        self.advance();

        let noise = gaussian(0.0, self.profile.noise_sigma_g);
        let spike = if fastrand::f32() < self.profile.spike_prob {
            gaussian(0.0, self.profile.spike_sigma_g)
        } else {
            0.0
        };
        let grams = self.true_weight_g() + noise + spike;
        let counts = ZERO_COUNTS + grams * self.calibration_factor;

        // HX711 output is 24-bit signed.
        Some(counts.round().clamp(-8_388_608.0, 8_388_607.0) as i64)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(scenario: &str) -> SimLoadCell {
        let cfg = SimConfig {
            scenario: scenario.into(),
            bottle_full_g: 1000.0,
        };
        SimLoadCell::new(&cfg, 350.3, Duration::from_millis(100))
    }

    fn grams(sim: &mut SimLoadCell) -> f64 {
        let c = sim.read_counts().unwrap() as f64;
        (c - ZERO_COUNTS) / 350.3
    }

    #[test]
    fn platform_starts_empty() {
        let mut s = sim("typical");
        for _ in 0..20 {
            s.read_counts();
            assert_eq!(s.true_weight_g(), 0.0);
        }
        assert!(grams(&mut s) < 200.0);
    }

    #[test]
    fn bottle_arrives_full_after_boot() {
        let mut s = sim("typical");
        for _ in 0..40 {
            s.read_counts();
        }
        assert_eq!(s.true_weight_g(), 1000.0);
    }

    #[test]
    fn water_never_negative_and_refills() {
        let mut s = sim("wanderer");
        for _ in 0..200_000 {
            s.read_counts();
            assert!(s.water_g >= 0.0);
            assert!(s.water_g <= s.capacity_g);
        }
    }

    #[test]
    fn readings_within_hx711_range() {
        let mut s = sim("noisy");
        for _ in 0..2000 {
            let c = s.read_counts().unwrap();
            assert!((-8_388_608..=8_388_607).contains(&c));
        }
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("FORGETFUL"), Scenario::Forgetful);
        assert_eq!(Scenario::from_str_lossy("wanderer"), Scenario::Wanderer);
        assert_eq!(Scenario::from_str_lossy("Noisy"), Scenario::Noisy);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Typical);
        assert_eq!(Scenario::Wanderer.to_string(), "wanderer");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let sum: f64 = (0..n).map(|_| approx_std_normal()).sum();
        let mean = sum / n as f64;
        assert!(mean.abs() < 0.15, "mean should be near zero: {mean}");
    }
}
