//! Alert levels and the LED / buzzer / RGB patterns that express them.
//!
//! The driver is stateless about *why* a level is active; the state machine
//! decides the level, the driver renders it on every tick.

use std::fmt;
use std::time::{Duration, Instant};

use hydration_protocol::Message;
use tracing::debug;

use crate::actuator::{Actuators, Color, Rgb};
use crate::config::AlertConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    None,
    /// Reminder, visual only.
    PreAlert,
    /// Reminder with buzzer.
    Active,
    /// Bottle has been gone too long.
    Missing,
    /// Timed confirmation color after a drink or refill.
    Success,
}

impl AlertLevel {
    fn is_reminder(self) -> bool {
        matches!(self, Self::PreAlert | Self::Active)
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::PreAlert => "pre_alert",
            Self::Active => "active",
            Self::Missing => "missing",
            Self::Success => "success",
        };
        f.write_str(s)
    }
}

/// Hue advance per second of the boot rainbow.
const RAINBOW_DEG_PER_SEC: u128 = 360;

pub struct AlertDriver<A: Actuators> {
    out: A,
    cfg: AlertConfig,
    level: AlertLevel,
    entered_at: Instant,
    success_color: Color,
    sleeping: bool,
    boot_until: Option<Instant>,
    /// Passive color last written while idle; `None` forces a rewrite.
    passive_shown: Option<Rgb>,
}

impl<A: Actuators> AlertDriver<A> {
    pub fn new(mut out: A, cfg: AlertConfig, now: Instant) -> Self {
        out.stop_all();
        Self {
            out,
            cfg,
            level: AlertLevel::None,
            entered_at: now,
            success_color: Color::Off,
            sleeping: false,
            boot_until: None,
            passive_shown: None,
        }
    }

    pub fn level(&self) -> AlertLevel {
        self.level
    }

    /// Switch level.  Re-setting the current level is a no-op; any other
    /// change silences every output before the new pattern starts.
    ///
    /// Returns `AlertStopped` when a reminder ends without escalating.
    pub fn set_level(&mut self, level: AlertLevel, now: Instant) -> Option<Message> {
        if level == self.level {
            return None;
        }
        let prev = self.level;
        debug!(from = %prev, to = %level, "alert level");

        self.out.stop_all();
        self.level = level;
        self.entered_at = now;
        self.passive_shown = None;
        self.render(now);

        (prev.is_reminder() && !level.is_reminder()).then_some(Message::AlertStopped)
    }

    /// Show `color` solid for the configured confirmation time, then fall
    /// back to idle.
    pub fn confirm(&mut self, color: Color, now: Instant) -> Option<Message> {
        self.success_color = color;
        if self.level == AlertLevel::Success {
            self.entered_at = now;
            self.render(now);
            return None;
        }
        self.set_level(AlertLevel::Success, now)
    }

    pub fn confirm_drink(&mut self, now: Instant) -> Option<Message> {
        self.confirm(self.cfg.drink_color, now)
    }

    pub fn confirm_refill(&mut self, now: Instant) -> Option<Message> {
        self.confirm(self.cfg.refill_color, now)
    }

    /// Selects the idle vs. sleep passive color.
    pub fn set_sleeping(&mut self, sleeping: bool) {
        self.sleeping = sleeping;
    }

    pub fn start_boot_animation(&mut self, now: Instant) {
        if let Some(ms) = self.cfg.boot_animation_ms {
            self.boot_until = Some(now + Duration::from_millis(ms));
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if self.level == AlertLevel::Success
            && now.saturating_duration_since(self.entered_at) >= self.cfg.confirm()
        {
            self.set_level(AlertLevel::None, now);
            return;
        }
        self.render(now);
    }

    /// Direct output access for hardware diagnostics.  Whatever is written
    /// here holds until the pattern next changes.
    pub fn actuators_mut(&mut self) -> &mut A {
        &mut self.out
    }

    pub fn actuators(&self) -> &A {
        &self.out
    }

    fn render(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.entered_at);
        let blink_ms = self.cfg.blink_interval_ms.max(1) as u128;
        let in_half = elapsed.as_millis() % blink_ms;
        let on_phase = (elapsed.as_millis() / blink_ms) % 2 == 0;

        match self.level {
            AlertLevel::None => self.render_passive(now),
            AlertLevel::PreAlert => {
                self.blink(on_phase, self.cfg.reminder_color);
                self.out.set_buzzer(false);
            }
            AlertLevel::Active => {
                self.blink(on_phase, self.cfg.reminder_color);
                let in_window = self
                    .cfg
                    .active_buzzer_window()
                    .map_or(true, |w| elapsed < w);
                let pulse = on_phase && in_half < self.cfg.buzzer_pulse().as_millis();
                self.out.set_buzzer(in_window && pulse);
            }
            AlertLevel::Missing => {
                self.blink(on_phase, self.cfg.missing_color);
                let audible = elapsed >= self.cfg.missing_buzzer_delay();
                self.out.set_buzzer(audible && on_phase);
            }
            AlertLevel::Success => {
                self.out.set_led(false);
                self.out.set_buzzer(false);
                self.out.set_rgb(self.success_color.rgb());
            }
        }
    }

    fn blink(&mut self, on: bool, color: Color) {
        self.out.set_led(on);
        self.out.set_rgb(if on { color.rgb() } else { Rgb::OFF });
    }

    fn render_passive(&mut self, now: Instant) {
        let want = match self.boot_until {
            Some(until) if now < until => {
                let ms = until.saturating_duration_since(now).as_millis();
                Rgb::from_hue(((ms * RAINBOW_DEG_PER_SEC / 1000) % 360) as u16)
            }
            Some(_) => {
                self.boot_until = None;
                self.passive_color()
            }
            None => self.passive_color(),
        };
        if self.passive_shown != Some(want) {
            self.out.set_rgb(want);
            self.passive_shown = Some(want);
        }
    }

    fn passive_color(&self) -> Rgb {
        if self.sleeping {
            self.cfg.sleep_color.rgb()
        } else {
            self.cfg.idle_color.rgb()
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
