//! Point-to-point link to the gateway.
//!
//! Inbound packets land in a single-slot [`Mailbox`] that the control loop
//! drains once per tick; a newer packet overwrites an unread one.  Outbound
//! sends are fire-and-forget.

use std::sync::{Arc, Mutex, MutexGuard};

use hydration_protocol::Message;
use rumqttc::{AsyncClient, QoS};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Inbound mailbox
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Slot {
    packet: Option<Vec<u8>>,
    dropped: u64,
}

/// Receiving end, owned by the control loop.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Arc<Mutex<Slot>>,
}

/// Delivering end, handed to the transport task.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    slot: Arc<Mutex<Slot>>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    // The slot holds plain data; a panic mid-write cannot leave it invalid.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> MailboxSender {
        MailboxSender {
            slot: Arc::clone(&self.slot),
        }
    }

    pub fn take(&self) -> Option<Vec<u8>> {
        lock(&self.slot).packet.take()
    }

    /// Packets overwritten before they were read.
    pub fn dropped(&self) -> u64 {
        lock(&self.slot).dropped
    }
}

impl MailboxSender {
    pub fn deliver(&self, packet: Vec<u8>) {
        let mut slot = lock(&self.slot);
        if slot.packet.replace(packet).is_some() {
            slot.dropped += 1;
            debug!(dropped = slot.dropped, "mailbox overwrite");
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

pub trait Link {
    /// Best effort; failures are logged, never returned.
    fn send(&mut self, msg: &Message);
}

/// Publishes encoded packets on the device's uplink topic.
pub struct MqttLink {
    client: AsyncClient,
    topic: String,
}

impl MqttLink {
    pub fn new(client: AsyncClient, device_id: &str) -> Self {
        Self {
            client,
            topic: hydration_protocol::topic::uplink(device_id),
        }
    }
}

impl Link for MqttLink {
    fn send(&mut self, msg: &Message) {
        let payload = msg.encode().to_vec();
        match self
            .client
            .try_publish(&self.topic, QoS::AtMostOnce, false, payload)
        {
            Ok(()) => debug!(?msg, "sent"),
            Err(e) => warn!(?msg, "send failed: {e}"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
