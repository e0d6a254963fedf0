use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub presence: PresenceState,
    pub devices: HashMap<String, DeviceState>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct PresenceState {
    pub home: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked: Option<OffsetDateTime>,
}

/// What the bottle last reported about its alert outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Idle,
    Missing,
    Reminder,
}

#[derive(Clone, Serialize)]
pub struct DeviceState {
    pub name: Option<String>,
    pub daily_goal_ml: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
    pub weight_g: Option<f32>,
    pub daily_total_ml: Option<f32>,
    pub last_drink_ml: Option<f32>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_drink_at: Option<OffsetDateTime>,
    pub alert: AlertState,
}

impl DeviceState {
    fn unseen() -> Self {
        Self {
            name: None,
            daily_goal_ml: None,
            last_seen: None,
            weight_g: None,
            daily_total_ml: None,
            last_drink_ml: None,
            last_drink_at: None,
            alert: AlertState::Idle,
        }
    }
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub device_id: Option<String>,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Drink,
    Total,
    Weight,
    Alert,
    Command,
    Presence,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub presence: PresenceState,
    pub devices: HashMap<String, DeviceState>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    /// `devices` are the configured (device_id, name, daily goal) triples;
    /// bottles that report without being configured are added on first
    /// contact.
    pub fn new(devices: &[(String, String, f64)], home: bool) -> Self {
        let devices = devices
            .iter()
            .map(|(id, name, goal)| {
                let mut d = DeviceState::unseen();
                d.name = Some(name.clone());
                d.daily_goal_ml = Some(*goal);
                (id.clone(), d)
            })
            .collect();

        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            presence: PresenceState {
                home,
                last_checked: None,
            },
            devices,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    fn touch(&mut self, device_id: &str, now: OffsetDateTime) -> &mut DeviceState {
        let d = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(DeviceState::unseen);
        d.last_seen = Some(now);
        d
    }

    /// Any packet from a bottle, including bare requests.
    pub fn record_seen(&mut self, device_id: &str) {
        self.touch(device_id, OffsetDateTime::now_utc());
    }

    pub fn record_drink(&mut self, device_id: &str, amount_ml: f32) {
        let now = OffsetDateTime::now_utc();
        let d = self.touch(device_id, now);
        d.last_drink_ml = Some(amount_ml);
        d.last_drink_at = Some(now);
        self.push_event(
            Some(device_id),
            EventKind::Drink,
            format!("drank {amount_ml:.0} ml"),
        );
    }

    pub fn record_total(&mut self, device_id: &str, total_ml: f32) {
        let d = self.touch(device_id, OffsetDateTime::now_utc());
        d.daily_total_ml = Some(total_ml);
        let progress = d
            .daily_goal_ml
            .map(|goal| format!(" ({:.0}% of goal)", f64::from(total_ml) / goal * 100.0))
            .unwrap_or_default();
        self.push_event(
            Some(device_id),
            EventKind::Total,
            format!("daily total {total_ml:.0} ml{progress}"),
        );
    }

    pub fn record_weight(&mut self, device_id: &str, grams: f32) {
        self.touch(device_id, OffsetDateTime::now_utc()).weight_g = Some(grams);
        self.push_event(
            Some(device_id),
            EventKind::Weight,
            format!("weight {grams:.1} g"),
        );
    }

    pub fn record_alert(&mut self, device_id: &str, alert: AlertState, detail: &str) {
        self.touch(device_id, OffsetDateTime::now_utc()).alert = alert;
        self.push_event(Some(device_id), EventKind::Alert, detail.to_string());
    }

    pub fn record_command(&mut self, device_id: &str, detail: String) {
        self.push_event(Some(device_id), EventKind::Command, detail);
    }

    /// Only state changes are logged as events.
    pub fn record_presence(&mut self, home: bool) {
        let changed = self.presence.home != home;
        self.presence.home = home;
        self.presence.last_checked = Some(OffsetDateTime::now_utc());
        if changed {
            let detail = if home { "user is home" } else { "user is away" };
            self.push_event(None, EventKind::Presence, detail.to_string());
        }
    }

    /// Record an error event.
    pub fn record_error(&mut self, device_id: Option<&str>, detail: String) {
        self.push_event(device_id, EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(None, EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            presence: self.presence.clone(),
            devices: self.devices.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, device_id: Option<&str>, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            device_id: device_id.map(str::to_string),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
