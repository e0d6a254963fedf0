//! Bottle link handling: decoding uplink packets, answering time and
//! presence queries, and recording telemetry.

use anyhow::{Context, Result};
use hydration_protocol::{topic, Message};
use rumqttc::{AsyncClient, QoS};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::db::{day_key, Db};
use crate::state::{AlertState, SharedState};

// ---------------------------------------------------------------------------
// Downlink
// ---------------------------------------------------------------------------

/// Sends packets to one bottle.  Implemented over MQTT in production and by
/// a recorder in tests.
pub trait Downlink: Send + Sync + 'static {
    fn send(&self, device_id: &str, msg: &Message) -> Result<()>;
}

pub struct MqttDownlink {
    client: AsyncClient,
}

impl MqttDownlink {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl Downlink for MqttDownlink {
    fn send(&self, device_id: &str, msg: &Message) -> Result<()> {
        let topic = topic::downlink(device_id);
        // Non-blocking: the caller may be the task that drains the queue.
        self.client
            .try_publish(&topic, QoS::AtMostOnce, false, msg.encode().to_vec())
            .with_context(|| format!("publish to {topic} failed"))?;
        debug!(device = %device_id, ?msg, "downlink");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Current wall clock as the epoch seconds carried by `ReportTime`.
pub(crate) fn now_epoch() -> u32 {
    let secs = OffsetDateTime::now_utc().unix_timestamp();
    secs.clamp(0, i64::from(u32::MAX)) as u32
}

/// The packet a bottle expects back for `msg`, if any.
pub(crate) fn reply_for(msg: &Message, now_epoch: u32, home: bool) -> Option<Message> {
    match msg {
        Message::RequestTime => Some(Message::ReportTime(now_epoch)),
        Message::RequestPresence => Some(Message::ReportPresence(home)),
        _ => None,
    }
}

/// Column value stored in `alert_events.kind`.
pub(crate) fn alert_kind(msg: &Message) -> Option<(&'static str, AlertState)> {
    match msg {
        Message::AlertMissing => Some(("missing", AlertState::Missing)),
        Message::AlertReplaced => Some(("replaced", AlertState::Idle)),
        Message::AlertReminderStarted => Some(("reminder_started", AlertState::Reminder)),
        Message::AlertStopped => Some(("stopped", AlertState::Idle)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Uplink handling
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Uplink {
    pub db: Db,
    pub state: SharedState,
    pub utc_offset_sec: i32,
}

impl Uplink {
    /// Decode a raw packet from `topic` and handle it.  Returns the
    /// addressed reply, if one is due.
    pub async fn handle_packet(&self, topic: &str, payload: &[u8]) -> Option<(String, Message)> {
        let device_id = match topic::parse_uplink(topic) {
            Some(id) => id,
            None => {
                debug!(%topic, "unhandled topic");
                return None;
            }
        };

        match Message::decode(payload) {
            Ok(msg) => self
                .handle(device_id, msg)
                .await
                .map(|reply| (device_id.to_string(), reply)),
            Err(e) => {
                warn!(device = %device_id, len = payload.len(), "dropping malformed packet: {e}");
                let mut st = self.state.write().await;
                st.record_error(Some(device_id), format!("malformed packet: {e}"));
                None
            }
        }
    }

    /// Record one decoded message.  Storage failures are logged; the reply
    /// is still produced.
    pub async fn handle(&self, device_id: &str, msg: Message) -> Option<Message> {
        let now = OffsetDateTime::now_utc();

        if let Err(e) = self.record(device_id, &msg, now).await {
            warn!(device = %device_id, ?msg, "db write failed: {e:#}");
            let mut st = self.state.write().await;
            st.record_error(Some(device_id), format!("db write failed: {e}"));
        }

        let mut st = self.state.write().await;
        match msg {
            Message::DrinkDetected(ml) => {
                info!(device = %device_id, amount_ml = ml, "drink");
                st.record_drink(device_id, ml);
            }
            Message::DailyTotal(ml) => {
                info!(device = %device_id, total_ml = ml, "daily total");
                st.record_total(device_id, ml);
            }
            Message::ReportWeight(g) => {
                debug!(device = %device_id, grams = g, "weight");
                st.record_weight(device_id, g);
            }
            Message::RequestTime | Message::RequestPresence => st.record_seen(device_id),
            other => match alert_kind(&other) {
                Some((kind, alert)) => {
                    info!(device = %device_id, kind, "alert");
                    st.record_alert(device_id, alert, kind);
                }
                None => {
                    debug!(device = %device_id, ?other, "ignoring message not meant for the gateway");
                    return None;
                }
            },
        }

        let reply = reply_for(&msg, now_epoch(), st.presence.home);
        if let Some(r) = &reply {
            debug!(device = %device_id, ?r, "reply");
        }
        reply
    }

    async fn record(&self, device_id: &str, msg: &Message, now: OffsetDateTime) -> Result<()> {
        let ts = now.unix_timestamp();
        match *msg {
            Message::DrinkDetected(ml) => self.db.insert_drink(ts, device_id, f64::from(ml)).await,
            Message::DailyTotal(ml) => {
                let day = day_key(now, self.utc_offset_sec);
                self.db
                    .set_daily_total(&day, device_id, f64::from(ml), ts)
                    .await
            }
            _ => match alert_kind(msg) {
                Some((kind, _)) => self.db.insert_alert(ts, device_id, kind).await,
                None => Ok(()),
            },
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
