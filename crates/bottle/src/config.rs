//! TOML config file loading and validation for the bottle.
//!
//! Every field has a default, so an empty (or missing) file yields the
//! stock configuration.  Validation reports every violation at once.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::actuator::Color;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scale: ScaleConfig,
    pub weight: WeightConfig,
    pub timing: TimingConfig,
    pub alerts: AlertConfig,
    pub schedule: ScheduleConfig,
    pub sim: SimConfig,
    pub pins: PinConfig,
}

/// Load-cell conversion and the control-loop cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Raw counts per gram.  Negative if the cell is mounted inverted.
    pub calibration_factor: f32,
    /// Number of reads averaged when taring.
    pub tare_samples: u32,
    /// Control-loop tick period.
    pub tick_ms: u64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            calibration_factor: 350.3,
            tare_samples: 10,
            tick_ms: 100,
        }
    }
}

/// Thresholds that turn grams into bottle / drink / refill decisions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Below this the bottle is considered lifted.
    pub presence_threshold_g: f32,
    /// Extra margin above the threshold required to count as "back".
    pub hysteresis_g: f32,
    /// Consecutive agreeing samples before the presence decision flips.
    pub confirm_samples: u32,
    pub drink_min_delta_g: f32,
    pub refill_min_delta_g: f32,
    /// If set, a boot weight this far from the stored baseline replaces it.
    pub boot_rebase_delta_g: Option<f32>,
    /// Re-read delay that confirms a proactive drink isn't a transient.
    pub drink_confirm_delay_ms: u64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            presence_threshold_g: 80.0,
            hysteresis_g: 0.0,
            confirm_samples: 1,
            drink_min_delta_g: 50.0,
            refill_min_delta_g: 100.0,
            boot_rebase_delta_g: None,
            drink_confirm_delay_ms: 400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Interval clock: how often hydration compliance is checked.
    pub check_interval_ms: u64,
    /// How long to wait for a presence reply before snoozing.
    pub presence_timeout_ms: u64,
    /// Visual-only phase of a reminder before the buzzer joins.
    pub pre_alert_ms: u64,
    /// Presence re-check cadence while a reminder is sounding.
    pub away_check_interval_ms: u64,
    /// Bottle absence before the missing alarm.
    pub missing_timeout_ms: u64,
    /// Settling delay after the bottle is put back.
    pub stabilization_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 30 * 60 * 1000,
            presence_timeout_ms: 10_000,
            pre_alert_ms: 10_000,
            away_check_interval_ms: 60_000,
            missing_timeout_ms: 3 * 60 * 1000,
            stabilization_ms: 2_000,
        }
    }
}

impl TimingConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }

    pub fn pre_alert(&self) -> Duration {
        Duration::from_millis(self.pre_alert_ms)
    }

    pub fn away_check_interval(&self) -> Duration {
        Duration::from_millis(self.away_check_interval_ms)
    }

    pub fn missing_timeout(&self) -> Duration {
        Duration::from_millis(self.missing_timeout_ms)
    }

    pub fn stabilization(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }
}

/// Actuation patterns and the color strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Half-cycle of every blink pattern.
    pub blink_interval_ms: u64,
    /// Buzzer on-time at the start of each "on" phase of a reminder.
    pub buzzer_pulse_ms: u64,
    /// Missing alarm stays visual-only for this long.
    pub missing_buzzer_delay_ms: u64,
    /// If set, the reminder buzzer falls silent after this long (LED keeps blinking).
    pub active_buzzer_window_ms: Option<u64>,
    /// How long the drink / refill confirmation color is shown.
    pub confirm_ms: u64,
    /// Rainbow animation on boot, if set.
    pub boot_animation_ms: Option<u64>,
    pub reminder_color: Color,
    pub missing_color: Color,
    pub drink_color: Color,
    pub refill_color: Color,
    pub idle_color: Color,
    pub sleep_color: Color,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            blink_interval_ms: 500,
            buzzer_pulse_ms: 250,
            missing_buzzer_delay_ms: 5_000,
            active_buzzer_window_ms: None,
            confirm_ms: 2_000,
            boot_animation_ms: None,
            reminder_color: Color::Red,
            missing_color: Color::Red,
            drink_color: Color::Green,
            refill_color: Color::Blue,
            idle_color: Color::Purple,
            sleep_color: Color::Off,
        }
    }
}

impl AlertConfig {
    pub fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.blink_interval_ms)
    }

    pub fn buzzer_pulse(&self) -> Duration {
        Duration::from_millis(self.buzzer_pulse_ms)
    }

    pub fn missing_buzzer_delay(&self) -> Duration {
        Duration::from_millis(self.missing_buzzer_delay_ms)
    }

    pub fn active_buzzer_window(&self) -> Option<Duration> {
        self.active_buzzer_window_ms.map(Duration::from_millis)
    }

    pub fn confirm(&self) -> Duration {
        Duration::from_millis(self.confirm_ms)
    }
}

/// Sleep window and wall-clock synchronisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local hour (0-23) the quiet period starts.
    pub sleep_start_hour: u8,
    /// Local hour (0-23) the quiet period ends.  May be smaller than the
    /// start hour for windows that wrap past midnight.
    pub sleep_end_hour: u8,
    /// Local time = UTC epoch + this offset.
    pub utc_offset_sec: i32,
    /// Time request cadence until the first sync.
    pub time_request_interval_ms: u64,
    /// Give up asking after this long and run unsynced.
    pub time_sync_timeout_ms: u64,
    /// Re-sync cadence once synced, to correct drift.
    pub time_resync_interval_ms: u64,
    /// How often sleep / day-change state is pushed into the machine.
    pub refresh_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sleep_start_hour: 23,
            sleep_end_hour: 10,
            utc_offset_sec: 19_800,
            time_request_interval_ms: 5_000,
            time_sync_timeout_ms: 60_000,
            time_resync_interval_ms: 60 * 60 * 1000,
            refresh_interval_ms: 1_000,
        }
    }
}

/// Simulated bottle, used when no load-cell hardware is compiled in.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub scenario: String,
    pub bottle_full_g: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            scenario: "typical".into(),
            bottle_full_g: 1000.0,
        }
    }
}

/// BCM pin numbers, used only with the `gpio` feature.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub hx711_dout: u8,
    pub hx711_sck: u8,
    pub led: u8,
    pub buzzer: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub rgb_common_anode: bool,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            hx711_dout: 5,
            hx711_sck: 6,
            led: 17,
            buzzer: 27,
            red: 22,
            green: 23,
            blue: 24,
            rgb_common_anode: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// UTC offsets in use worldwide span -12:00 to +14:00.
const MAX_UTC_OFFSET_SEC: i32 = 14 * 3600;

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_scale(&mut errors);
        self.validate_weight(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_alerts(&mut errors);
        self.validate_schedule(&mut errors);
        self.validate_pins(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_scale(&self, errors: &mut Vec<String>) {
        let s = &self.scale;
        if !s.calibration_factor.is_finite() || s.calibration_factor == 0.0 {
            errors.push(format!(
                "scale: calibration_factor must be finite and non-zero, got {}",
                s.calibration_factor
            ));
        }
        if s.tare_samples == 0 {
            errors.push("scale: tare_samples must be positive".into());
        }
        if s.tick_ms == 0 {
            errors.push("scale: tick_ms must be positive".into());
        }
    }

    fn validate_weight(&self, errors: &mut Vec<String>) {
        let w = &self.weight;
        if w.presence_threshold_g <= 0.0 {
            errors.push(format!(
                "weight: presence_threshold_g must be positive, got {}",
                w.presence_threshold_g
            ));
        }
        if w.hysteresis_g < 0.0 {
            errors.push(format!(
                "weight: hysteresis_g must not be negative, got {}",
                w.hysteresis_g
            ));
        }
        if w.confirm_samples == 0 {
            errors.push("weight: confirm_samples must be at least 1".into());
        }
        if w.drink_min_delta_g <= 0.0 {
            errors.push(format!(
                "weight: drink_min_delta_g must be positive, got {}",
                w.drink_min_delta_g
            ));
        }
        if w.refill_min_delta_g <= 0.0 {
            errors.push(format!(
                "weight: refill_min_delta_g must be positive, got {}",
                w.refill_min_delta_g
            ));
        }
        if let Some(d) = w.boot_rebase_delta_g {
            if d <= 0.0 {
                errors.push(format!(
                    "weight: boot_rebase_delta_g must be positive when set, got {d}"
                ));
            }
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let t = &self.timing;
        for (name, v) in [
            ("check_interval_ms", t.check_interval_ms),
            ("presence_timeout_ms", t.presence_timeout_ms),
            ("pre_alert_ms", t.pre_alert_ms),
            ("away_check_interval_ms", t.away_check_interval_ms),
            ("missing_timeout_ms", t.missing_timeout_ms),
            ("stabilization_ms", t.stabilization_ms),
        ] {
            if v == 0 {
                errors.push(format!("timing: {name} must be positive"));
            }
        }
    }

    fn validate_alerts(&self, errors: &mut Vec<String>) {
        let a = &self.alerts;
        if a.blink_interval_ms == 0 {
            errors.push("alerts: blink_interval_ms must be positive".into());
        }
        if a.buzzer_pulse_ms == 0 {
            errors.push("alerts: buzzer_pulse_ms must be positive".into());
        } else if a.buzzer_pulse_ms > a.blink_interval_ms {
            errors.push(format!(
                "alerts: buzzer_pulse_ms ({}) exceeds blink_interval_ms ({})",
                a.buzzer_pulse_ms, a.blink_interval_ms
            ));
        }
        // Visual first, audible second.
        if a.missing_buzzer_delay_ms == 0 {
            errors.push("alerts: missing_buzzer_delay_ms must be positive".into());
        }
        if let Some(0) = a.active_buzzer_window_ms {
            errors.push("alerts: active_buzzer_window_ms must be positive when set".into());
        }
        if a.confirm_ms == 0 {
            errors.push("alerts: confirm_ms must be positive".into());
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        let s = &self.schedule;
        if s.sleep_start_hour > 23 {
            errors.push(format!(
                "schedule: sleep_start_hour {} out of range [0, 23]",
                s.sleep_start_hour
            ));
        }
        if s.sleep_end_hour > 23 {
            errors.push(format!(
                "schedule: sleep_end_hour {} out of range [0, 23]",
                s.sleep_end_hour
            ));
        }
        if s.utc_offset_sec.abs() > MAX_UTC_OFFSET_SEC {
            errors.push(format!(
                "schedule: utc_offset_sec {} out of range [-{MAX_UTC_OFFSET_SEC}, {MAX_UTC_OFFSET_SEC}]",
                s.utc_offset_sec
            ));
        }
        for (name, v) in [
            ("time_request_interval_ms", s.time_request_interval_ms),
            ("time_sync_timeout_ms", s.time_sync_timeout_ms),
            ("time_resync_interval_ms", s.time_resync_interval_ms),
            ("refresh_interval_ms", s.refresh_interval_ms),
        ] {
            if v == 0 {
                errors.push(format!("schedule: {name} must be positive"));
            }
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let p = &self.pins;
        let all = [
            ("hx711_dout", p.hx711_dout),
            ("hx711_sck", p.hx711_sck),
            ("led", p.led),
            ("buzzer", p.buzzer),
            ("red", p.red),
            ("green", p.green),
            ("blue", p.blue),
        ];
        for (i, (name, pin)) in all.iter().enumerate() {
            if *pin > 27 {
                errors.push(format!("pins: {name} = {pin} is not a BCM GPIO (0-27)"));
            }
            if let Some((other, _)) = all[..i].iter().find(|(_, q)| q == pin) {
                errors.push(format!("pins: {name} and {other} both use GPIO {pin}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Like [`load`], but a missing file yields the defaults.
pub fn load_or_default(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        load(path)
    } else {
        tracing::warn!(path, "config file not found, using defaults");
        Ok(Config::default())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_empty_config_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.weight.presence_threshold_g, 80.0);
        assert_eq!(cfg.timing.check_interval_ms, 1_800_000);
        assert_eq!(cfg.alerts.reminder_color, Color::Red);
        cfg.validate().unwrap();
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[weight]
drink_min_delta_g = 30.0
hysteresis_g = 8.0
confirm_samples = 3
boot_rebase_delta_g = 100.0

[alerts]
reminder_color = "orange"
boot_animation_ms = 3000

[schedule]
sleep_start_hour = 22
sleep_end_hour = 7
utc_offset_sec = 3600
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.weight.drink_min_delta_g, 30.0);
        assert_eq!(cfg.weight.confirm_samples, 3);
        assert_eq!(cfg.weight.boot_rebase_delta_g, Some(100.0));
        // Untouched fields keep their defaults.
        assert_eq!(cfg.weight.refill_min_delta_g, 100.0);
        assert_eq!(cfg.alerts.reminder_color, Color::Orange);
        assert_eq!(cfg.alerts.boot_animation_ms, Some(3000));
        assert_eq!(cfg.schedule.sleep_end_hour, 7);
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_color_fails_to_parse() {
        let toml_str = r#"
[alerts]
reminder_color = "chartreuse"
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn duration_accessors() {
        let cfg = Config::default();
        assert_eq!(cfg.timing.stabilization(), Duration::from_secs(2));
        assert_eq!(cfg.alerts.blink_interval(), Duration::from_millis(500));
        assert_eq!(cfg.alerts.active_buzzer_window(), None);
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn zero_calibration_rejected() {
        let mut cfg = Config::default();
        cfg.scale.calibration_factor = 0.0;
        assert_validation_err(&cfg, "calibration_factor must be finite and non-zero");
    }

    #[test]
    fn negative_calibration_accepted() {
        let mut cfg = Config::default();
        cfg.scale.calibration_factor = -350.3;
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_threshold_rejected() {
        let mut cfg = Config::default();
        cfg.weight.presence_threshold_g = 0.0;
        assert_validation_err(&cfg, "presence_threshold_g must be positive");
    }

    #[test]
    fn zero_confirm_samples_rejected() {
        let mut cfg = Config::default();
        cfg.weight.confirm_samples = 0;
        assert_validation_err(&cfg, "confirm_samples must be at least 1");
    }

    #[test]
    fn negative_drink_delta_rejected() {
        let mut cfg = Config::default();
        cfg.weight.drink_min_delta_g = -5.0;
        assert_validation_err(&cfg, "drink_min_delta_g must be positive");
    }

    #[test]
    fn zero_timing_rejected() {
        let mut cfg = Config::default();
        cfg.timing.stabilization_ms = 0;
        assert_validation_err(&cfg, "stabilization_ms must be positive");
    }

    #[test]
    fn buzzer_pulse_longer_than_blink_rejected() {
        let mut cfg = Config::default();
        cfg.alerts.buzzer_pulse_ms = 900;
        assert_validation_err(&cfg, "buzzer_pulse_ms (900) exceeds blink_interval_ms (500)");
    }

    #[test]
    fn audible_before_visual_rejected() {
        let mut cfg = Config::default();
        cfg.alerts.missing_buzzer_delay_ms = 0;
        assert_validation_err(&cfg, "missing_buzzer_delay_ms must be positive");
    }

    #[test]
    fn sleep_hour_out_of_range() {
        let mut cfg = Config::default();
        cfg.schedule.sleep_start_hour = 24;
        assert_validation_err(&cfg, "sleep_start_hour 24 out of range");
    }

    #[test]
    fn utc_offset_out_of_range() {
        let mut cfg = Config::default();
        cfg.schedule.utc_offset_sec = 15 * 3600;
        assert_validation_err(&cfg, "utc_offset_sec");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.scale.tick_ms = 0;
        cfg.weight.refill_min_delta_g = 0.0;
        cfg.alerts.confirm_ms = 0;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "got: {msg}");
        assert!(msg.contains("tick_ms"));
        assert!(msg.contains("refill_min_delta_g"));
        assert!(msg.contains("confirm_ms"));
    }

    #[test]
    fn duplicate_pins_rejected() {
        let mut cfg = Config::default();
        cfg.pins.buzzer = cfg.pins.led;
        assert_validation_err(&cfg, "buzzer and led both use GPIO 17");
    }

    #[test]
    fn pin_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.pins.blue = 40;
        assert_validation_err(&cfg, "blue = 40 is not a BCM GPIO");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_or_default("/nonexistent/bottle.toml").unwrap();
        assert_eq!(cfg.scale.tick_ms, 100);
    }
}
