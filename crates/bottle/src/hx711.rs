//! HX711 24-bit load-cell ADC, bit-banged over two GPIO lines.
//!
//! Channel A at gain 128: 24 data clocks followed by one extra clock that
//! selects the gain for the next conversion.

use rppal::gpio::{Gpio, InputPin, Level, OutputPin};
use std::time::{Duration, Instant};

use crate::scale::LoadCell;

// ── Protocol constants ──────────────────────────────────────────────────────

const DATA_BITS: u32 = 24;
/// Extra clocks after the data bits: 1 = channel A, gain 128.
const GAIN_128_PULSES: u32 = 1;
/// PD_SCK must stay high for less than 60 µs or the chip powers down.
const CLOCK_HALF_PERIOD: Duration = Duration::from_micros(1);

/// Busy-wait; a scheduler sleep can overshoot the 60 µs limit.
fn spin(d: Duration) {
    let start = Instant::now();
    while start.elapsed() < d {
        std::hint::spin_loop();
    }
}

/// Sign-extend a 24-bit two's complement value.
fn sign_extend_24(raw: u32) -> i64 {
    let raw = raw & 0x00FF_FFFF;
    if raw & 0x0080_0000 != 0 {
        i64::from(raw) - 0x0100_0000
    } else {
        i64::from(raw)
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

pub struct Hx711 {
    dout: InputPin,
    sck: OutputPin,
}

impl Hx711 {
    pub fn new(dout_pin: u8, sck_pin: u8) -> anyhow::Result<Self> {
        let gpio = Gpio::new()?;
        let dout = gpio.get(dout_pin)?.into_input();
        let sck = gpio.get(sck_pin)?.into_output_low();
        tracing::info!(dout_pin, sck_pin, "hx711 initialised");
        Ok(Self { dout, sck })
    }

    fn pulse(&mut self) {
        self.sck.set_high();
        spin(CLOCK_HALF_PERIOD);
        self.sck.set_low();
        spin(CLOCK_HALF_PERIOD);
    }
}

impl LoadCell for Hx711 {
    fn read_counts(&mut self) -> Option<i64> {
        // DOUT goes low once a conversion is ready.
        if self.dout.read() == Level::High {
            return None;
        }

        let mut raw: u32 = 0;
        for _ in 0..DATA_BITS {
            self.sck.set_high();
            spin(CLOCK_HALF_PERIOD);
            raw = (raw << 1) | u32::from(self.dout.read() == Level::High);
            self.sck.set_low();
            spin(CLOCK_HALF_PERIOD);
        }
        for _ in 0..GAIN_128_PULSES {
            self.pulse();
        }

        Some(sign_extend_24(raw))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
