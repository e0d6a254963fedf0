//! "Is the user home?" as an asynchronous question to the gateway.

use std::time::{Duration, Instant};

use hydration_protocol::Message;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Unknown,
    Home,
    Away,
}

#[derive(Debug)]
pub struct PresenceOracle {
    status: PresenceStatus,
    requested_at: Option<Instant>,
    timeout: Duration,
    ever_replied: bool,
}

impl PresenceOracle {
    pub fn new(timeout: Duration) -> Self {
        Self {
            status: PresenceStatus::Unknown,
            requested_at: None,
            timeout,
            ever_replied: false,
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> PresenceStatus {
        self.status
    }

    /// Home, or no answer has ever come back (assume home at boot).
    pub fn assume_home(&self) -> bool {
        match self.status {
            PresenceStatus::Home => true,
            PresenceStatus::Away => false,
            PresenceStatus::Unknown => !self.ever_replied,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.requested_at.is_some()
    }

    /// Start a request; the status is unknown until a reply or timeout.
    pub fn request(&mut self, now: Instant) -> Message {
        debug!("presence requested");
        self.requested_at = Some(now);
        self.status = PresenceStatus::Unknown;
        Message::RequestPresence
    }

    pub fn reply(&mut self, is_home: bool, now: Instant) -> PresenceStatus {
        if let Some(at) = self.requested_at.take() {
            debug!(
                rtt_ms = now.saturating_duration_since(at).as_millis() as u64,
                is_home,
                "presence reply"
            );
        }
        self.ever_replied = true;
        self.status = if is_home {
            PresenceStatus::Home
        } else {
            PresenceStatus::Away
        };
        self.status
    }

    /// Expire an outstanding request.  Returns true exactly once per
    /// expired request.  The status then reads Away, unless the gateway has
    /// never answered at all: it stays Unknown so [`Self::assume_home`]
    /// holds.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        match self.requested_at {
            Some(at) if now.saturating_duration_since(at) >= self.timeout => {
                self.requested_at = None;
                if self.ever_replied {
                    info!("presence reply timed out, treating as away");
                    self.status = PresenceStatus::Away;
                } else {
                    info!("presence never answered, assuming home");
                    self.status = PresenceStatus::Unknown;
                }
                true
            }
            _ => false,
        }
    }

    /// Forget an outstanding request without changing the status.
    pub fn cancel(&mut self) {
        self.requested_at = None;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
