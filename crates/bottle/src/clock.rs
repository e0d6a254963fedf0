//! Wall-clock time as reported by the gateway, projected forward with the
//! monotonic clock.  Until the first sync the hour and day are unknown,
//! which reads as "awake" and "same day".

use std::time::{Duration, Instant};

use hydration_protocol::Message;
use tracing::{info, warn};

use crate::config::ScheduleConfig;

const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy)]
struct Sync {
    epoch_secs: u32,
    at: Instant,
}

pub struct ScheduleClock {
    sleep_start: u8,
    sleep_end: u8,
    utc_offset_sec: i64,
    request_interval: Duration,
    sync_timeout: Duration,
    resync_interval: Duration,
    started: Instant,
    synced: Option<Sync>,
    last_request: Option<Instant>,
    gave_up: bool,
}

impl ScheduleClock {
    pub fn new(cfg: &ScheduleConfig, now: Instant) -> Self {
        Self {
            sleep_start: cfg.sleep_start_hour,
            sleep_end: cfg.sleep_end_hour,
            utc_offset_sec: i64::from(cfg.utc_offset_sec),
            request_interval: Duration::from_millis(cfg.time_request_interval_ms),
            sync_timeout: Duration::from_millis(cfg.time_sync_timeout_ms),
            resync_interval: Duration::from_millis(cfg.time_resync_interval_ms),
            started: now,
            synced: None,
            last_request: None,
            gave_up: false,
        }
    }

    pub fn set_time(&mut self, epoch_secs: u32, now: Instant) {
        if self.synced.is_none() {
            info!(epoch_secs, "clock synced");
        }
        self.synced = Some(Sync { epoch_secs, at: now });
        self.gave_up = false;
    }

    pub fn is_synced(&self) -> bool {
        self.synced.is_some()
    }

    fn local_secs(&self, now: Instant) -> Option<i64> {
        self.synced.map(|s| {
            let elapsed = now.saturating_duration_since(s.at).as_secs() as i64;
            i64::from(s.epoch_secs) + elapsed + self.utc_offset_sec
        })
    }

    pub fn current_hour(&self, now: Instant) -> Option<u8> {
        self.local_secs(now)
            .map(|t| (t.rem_euclid(SECS_PER_DAY) / 3600) as u8)
    }

    /// Days since the epoch in local time.
    pub fn current_day(&self, now: Instant) -> Option<i64> {
        self.local_secs(now).map(|t| t.div_euclid(SECS_PER_DAY))
    }

    pub fn is_sleep_time(&self, now: Instant) -> bool {
        self.current_hour(now)
            .is_some_and(|h| in_window(h, self.sleep_start, self.sleep_end))
    }

    /// Time request to send this tick, if any.
    ///
    /// Unsynced: every `request_interval` until `sync_timeout`, then at the
    /// resync cadence.  Synced: every `resync_interval` from the last sync.
    pub fn poll(&mut self, now: Instant) -> Option<Message> {
        let cadence = match self.synced {
            Some(_) => self.resync_interval,
            None if self.gave_up => self.resync_interval,
            None if now.saturating_duration_since(self.started) >= self.sync_timeout => {
                warn!("no time reply, running unsynced");
                self.gave_up = true;
                self.resync_interval
            }
            None => self.request_interval,
        };

        let since = [self.last_request, self.synced.map(|s| s.at)]
            .into_iter()
            .flatten()
            .max();
        let due = since.map_or(true, |t| now.saturating_duration_since(t) >= cadence);
        if due {
            self.last_request = Some(now);
            Some(Message::RequestTime)
        } else {
            None
        }
    }
}

/// `[start, end)` on a 24-hour dial; wraps past midnight when `end < start`.
fn in_window(hour: u8, start: u8, end: u8) -> bool {
    if start == end {
        false
    } else if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

// ===========================================================================
// Tests
// ===========================================================================
