//! MQTT topic layout for the point-to-point link.

/// Subscription filter the gateway uses to hear every bottle.
pub const UPLINK_FILTER: &str = "link/+/up";

/// Bottle → gateway topic for `device_id`.
pub fn uplink(device_id: &str) -> String {
    format!("link/{device_id}/up")
}

/// Gateway → bottle topic for `device_id`.
pub fn downlink(device_id: &str) -> String {
    format!("link/{device_id}/down")
}

/// Extract device_id from "link/<device_id>/up".
pub fn parse_uplink(topic: &str) -> Option<&str> {
    parse(topic, "up")
}

/// Extract device_id from "link/<device_id>/down".
pub fn parse_downlink(topic: &str) -> Option<&str> {
    parse(topic, "down")
}

fn parse<'a>(topic: &'a str, direction: &str) -> Option<&'a str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "link" && !parts[1].is_empty() && parts[2] == direction {
        Some(parts[1])
    } else {
        None
    }
}
