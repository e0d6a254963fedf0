//! TOML config file loading, validation, and database seeding for bottles
//! and the presence probe.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::db::{Db, DeviceConfig};

/// Daily goal used when a device entry leaves it out.
pub const DEFAULT_DAILY_GOAL_ML: f32 = 2000.0;

/// Largest offset any real time zone uses.
const MAX_UTC_OFFSET_SEC: i32 = 14 * 3600;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub presence: PresenceConfig,
    /// Offset the bottles use for their local day; the gateway files daily
    /// totals under the same calendar day.
    #[serde(default = "default_utc_offset_sec")]
    pub utc_offset_sec: i32,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    pub device_id: String,
    pub name: String,
    pub daily_goal_ml: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMode {
    /// Always answer with `home`.
    Static,
    /// Run `command` every `poll_sec`; non-empty successful output means home.
    Command,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub mode: PresenceMode,
    pub home: bool,
    /// Program and arguments, e.g. `["hcitool", "rssi", "AA:BB:CC:DD:EE:FF"]`.
    pub command: Vec<String>,
    pub poll_sec: u64,
    pub timeout_sec: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            mode: PresenceMode::Static,
            home: true,
            command: Vec::new(),
            poll_sec: 10,
            timeout_sec: 5,
        }
    }
}

fn default_utc_offset_sec() -> i32 {
    19_800
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            presence: PresenceConfig::default(),
            utc_offset_sec: default_utc_offset_sec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_devices(&mut errors);
        self.validate_presence(&mut errors);

        if self.utc_offset_sec.abs() > MAX_UTC_OFFSET_SEC {
            errors.push(format!(
                "utc_offset_sec {} out of range [-{MAX_UTC_OFFSET_SEC}, {MAX_UTC_OFFSET_SEC}]",
                self.utc_offset_sec
            ));
        }

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

    fn validate_devices(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, d) in self.devices.iter().enumerate() {
            let ctx = || {
                if d.device_id.is_empty() {
                    format!("devices[{i}]")
                } else {
                    format!("device '{}'", d.device_id)
                }
            };

            // ── Identity ────────────────────────────────────────
            if d.device_id.trim().is_empty() {
                errors.push(format!("{}: device_id is empty", ctx()));
            } else if d.device_id.contains(['/', '+', '#']) {
                errors.push(format!(
                    "{}: device_id must not contain '/', '+' or '#'",
                    ctx()
                ));
            } else if !seen_ids.insert(&d.device_id) {
                errors.push(format!("{}: duplicate device_id", ctx()));
            }

            if d.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }

            if let Some(goal) = d.daily_goal_ml {
                if !(goal.is_finite() && goal > 0.0) {
                    errors.push(format!(
                        "{}: daily_goal_ml must be positive, got {goal}",
                        ctx()
                    ));
                }
            }
        }
    }

    fn validate_presence(&self, errors: &mut Vec<String>) {
        let p = &self.presence;

        if p.mode == PresenceMode::Command
            && p.command.first().map_or(true, |c| c.trim().is_empty())
        {
            errors.push("presence: command mode needs a non-empty command".into());
        }
        if p.poll_sec == 0 {
            errors.push("presence: poll_sec must be positive".into());
        }
        if p.timeout_sec == 0 {
            errors.push("presence: timeout_sec must be positive".into());
        } else if p.poll_sec > 0 && p.timeout_sec > p.poll_sec {
            errors.push(format!(
                "presence: timeout_sec ({}) exceeds poll_sec ({})",
                p.timeout_sec, p.poll_sec
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
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

/// Upsert all configured devices into the database.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    for d in &config.devices {
        db.upsert_device(&DeviceConfig {
            device_id: d.device_id.clone(),
            name: d.name.clone(),
            daily_goal_ml: f64::from(d.daily_goal_ml.unwrap_or(DEFAULT_DAILY_GOAL_ML)),
        })
        .await
        .with_context(|| format!("failed to upsert device '{}'", d.device_id))?;
    }

    tracing::info!(devices = config.devices.len(), "config applied");

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
