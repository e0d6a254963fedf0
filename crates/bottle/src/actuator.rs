//! LED, buzzer and RGB outputs.  The `gpio` feature gates the real rppal
//! driver; without it, a mock implementation logs state changes.

use serde::Deserialize;

#[cfg(feature = "gpio")]
use anyhow::Result;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Colors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn is_off(&self) -> bool {
        *self == Self::OFF
    }

    /// Fully saturated color for `hue` degrees (0-359).
    pub fn from_hue(hue: u16) -> Self {
        let hue = hue % 360;
        let sector = hue / 60;
        let frac = (hue % 60) as u32;
        let rise = (255 * frac / 60) as u8;
        let fall = 255 - rise;
        match sector {
            0 => Self::new(255, rise, 0),
            1 => Self::new(fall, 255, 0),
            2 => Self::new(0, 255, rise),
            3 => Self::new(0, fall, 255),
            4 => Self::new(rise, 0, 255),
            _ => Self::new(255, 0, fall),
        }
    }
}

/// Named palette.  The numeric code is what `SetRgb` carries on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Off,
    Red,
    Green,
    Blue,
    White,
    Orange,
    Yellow,
    Purple,
    Cyan,
}

impl Color {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Off,
            1 => Self::Red,
            2 => Self::Green,
            3 => Self::Blue,
            4 => Self::White,
            5 => Self::Orange,
            6 => Self::Yellow,
            7 => Self::Purple,
            8 => Self::Cyan,
            _ => return None,
        })
    }

    pub fn rgb(self) -> Rgb {
        match self {
            Self::Off => Rgb::OFF,
            Self::Red => Rgb::new(255, 0, 0),
            Self::Green => Rgb::new(0, 255, 0),
            Self::Blue => Rgb::new(0, 0, 255),
            Self::White => Rgb::new(255, 255, 255),
            Self::Orange => Rgb::new(255, 90, 0),
            Self::Yellow => Rgb::new(255, 200, 0),
            Self::Purple => Rgb::new(128, 0, 255),
            Self::Cyan => Rgb::new(0, 255, 255),
        }
    }
}

// ---------------------------------------------------------------------------
// Output seam
// ---------------------------------------------------------------------------

pub trait Actuators {
    fn set_led(&mut self, on: bool);
    fn set_buzzer(&mut self, on: bool);
    fn set_rgb(&mut self, color: Rgb);

    fn stop_all(&mut self) {
        self.set_led(false);
        self.set_buzzer(false);
        self.set_rgb(Rgb::OFF);
    }
}

// ---------------------------------------------------------------------------
// Mock outputs (development and tests; no hardware, logs changes)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockActuators {
    pub led: bool,
    pub buzzer: bool,
    pub rgb: Rgb,
    /// Number of times the buzzer was switched on.
    pub buzzer_onsets: u32,
}

impl MockActuators {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actuators for MockActuators {
    fn set_led(&mut self, on: bool) {
        if self.led != on {
            tracing::trace!(on, "[mock-gpio] led");
        }
        self.led = on;
    }

    fn set_buzzer(&mut self, on: bool) {
        if on && !self.buzzer {
            self.buzzer_onsets += 1;
            tracing::trace!("[mock-gpio] buzzer on");
        }
        self.buzzer = on;
    }

    fn set_rgb(&mut self, color: Rgb) {
        if self.rgb != color {
            tracing::trace!(r = color.r, g = color.g, b = color.b, "[mock-gpio] rgb");
        }
        self.rgb = color;
    }
}

// ---------------------------------------------------------------------------
// Real GPIO outputs (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

/// BCM pin assignment for the bottle holder.
#[cfg(feature = "gpio")]
#[derive(Debug, Clone, Copy)]
pub struct Pins {
    pub led: u8,
    pub buzzer: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    /// Common-anode RGB LEDs light up when the pin is driven low.
    pub rgb_common_anode: bool,
}

#[cfg(feature = "gpio")]
pub struct GpioActuators {
    led: OutputPin,
    buzzer: OutputPin,
    red: OutputPin,
    green: OutputPin,
    blue: OutputPin,
    common_anode: bool,
}

/// Software PWM carrier for the RGB channels.
#[cfg(feature = "gpio")]
const PWM_FREQUENCY_HZ: f64 = 200.0;

#[cfg(feature = "gpio")]
impl GpioActuators {
    pub fn new(pins: Pins) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut out = Self {
            led: gpio.get(pins.led)?.into_output_low(),
            buzzer: gpio.get(pins.buzzer)?.into_output_low(),
            red: gpio.get(pins.red)?.into_output(),
            green: gpio.get(pins.green)?.into_output(),
            blue: gpio.get(pins.blue)?.into_output(),
            common_anode: pins.rgb_common_anode,
        };
        // Fail-safe: everything dark and silent at startup.
        out.stop_all();
        tracing::info!(?pins, "gpio actuators initialised");
        Ok(out)
    }

    fn drive(pin: &mut OutputPin, level: u8, common_anode: bool) {
        let mut duty = f64::from(level) / 255.0;
        if common_anode {
            duty = 1.0 - duty;
        }
        if let Err(e) = pin.set_pwm_frequency(PWM_FREQUENCY_HZ, duty) {
            tracing::warn!("rgb pwm update failed: {e}");
        }
    }
}

#[cfg(feature = "gpio")]
impl Actuators for GpioActuators {
    fn set_led(&mut self, on: bool) {
        if on {
            self.led.set_high()
        } else {
            self.led.set_low()
        }
    }

    fn set_buzzer(&mut self, on: bool) {
        if on {
            self.buzzer.set_high()
        } else {
            self.buzzer.set_low()
        }
    }

    fn set_rgb(&mut self, color: Rgb) {
        Self::drive(&mut self.red, color.r, self.common_anode);
        Self::drive(&mut self.green, color.g, self.common_anode);
        Self::drive(&mut self.blue, color.b, self.common_anode);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_codes_round_trip() {
        for code in 0..=8 {
            assert!(Color::from_code(code).is_some(), "code {code} unmapped");
        }
        assert_eq!(Color::from_code(9), None);
        assert_eq!(Color::from_code(1), Some(Color::Red));
    }

    #[test]
    fn off_is_black() {
        assert!(Color::Off.rgb().is_off());
        assert!(!Color::Purple.rgb().is_off());
    }

    #[test]
    fn hue_wheel_primaries() {
        assert_eq!(Rgb::from_hue(0), Rgb::new(255, 0, 0));
        assert_eq!(Rgb::from_hue(120), Rgb::new(0, 255, 0));
        assert_eq!(Rgb::from_hue(240), Rgb::new(0, 0, 255));
        assert_eq!(Rgb::from_hue(360), Rgb::from_hue(0));
    }

    #[test]
    fn stop_all_clears_mock() {
        let mut m = MockActuators::new();
        m.set_led(true);
        m.set_buzzer(true);
        m.set_rgb(Color::Cyan.rgb());
        m.stop_all();
        assert!(!m.led);
        assert!(!m.buzzer);
        assert!(m.rgb.is_off());
    }

    #[test]
    fn buzzer_onsets_count_edges_only() {
        let mut m = MockActuators::new();
        m.set_buzzer(true);
        m.set_buzzer(true);
        m.set_buzzer(false);
        m.set_buzzer(true);
        assert_eq!(m.buzzer_onsets, 2);
    }
}
