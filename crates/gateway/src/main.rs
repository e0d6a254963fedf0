mod config;
mod db;
mod mqtt;
mod presence;
mod state;
mod web;

use anyhow::Result;
use hydration_protocol::topic;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use mqtt::{Downlink, MqttDownlink, Uplink};
use state::SystemState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:hydration.db?mode=rwc".to_string());
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (seed devices) ──────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "gateway.toml".to_string());
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;

    // The DB is the source of truth; it also keeps devices dropped from the
    // file so their history stays reachable.
    let devices = db.load_devices().await?;
    if devices.is_empty() {
        warn!("no devices configured; bottles will be added on first contact");
    }
    let known: Vec<(String, String, f64)> = devices
        .iter()
        .map(|d| (d.device_id.clone(), d.name.clone(), d.daily_goal_ml))
        .collect();
    info!(devices = known.len(), "db ready");

    // ── Shared state (ephemeral, for the API) ───────────────────────
    let shared = Arc::new(RwLock::new(SystemState::new(&known, cfg.presence.home)));
    shared
        .write()
        .await
        .record_system("gateway started".to_string());

    // ── Presence ────────────────────────────────────────────────────
    tokio::spawn(presence::run(cfg.presence.clone(), Arc::clone(&shared)));

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("hydration-gateway", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);
    let downlink: Arc<dyn Downlink> = Arc::new(MqttDownlink::new(client.clone()));

    // ── Web server ──────────────────────────────────────────────────
    let app = web::AppState {
        shared: Arc::clone(&shared),
        db: db.clone(),
        downlink: Arc::clone(&downlink),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app, web_port).await {
            error!("web server stopped: {e:#}");
        }
    });

    // ── Link loop ───────────────────────────────────────────────────
    let uplink = Uplink {
        db,
        state: Arc::clone(&shared),
        utc_offset_sec: cfg.utc_offset_sec,
    };

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                if let Some((device_id, reply)) = uplink.handle_packet(&p.topic, &p.payload).await
                {
                    if let Err(e) = downlink.send(&device_id, &reply) {
                        warn!(device = %device_id, ?reply, "reply failed: {e:#}");
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(filter = topic::UPLINK_FILTER, "mqtt connected");
                // Non-blocking: this loop is the one draining the request queue.
                if let Err(e) = client.try_subscribe(topic::UPLINK_FILTER, QoS::AtMostOnce) {
                    warn!("subscribe failed: {e}");
                }
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_error(None, format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
