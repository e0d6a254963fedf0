mod actuator;
mod alert;
mod clock;
mod config;
mod device;
#[cfg(feature = "gpio")]
mod hx711;
mod ledger;
mod link;
mod machine;
mod presence;
mod scale;
#[cfg(feature = "sim")]
mod sim;
mod store;

#[cfg(not(any(feature = "sim", feature = "gpio")))]
compile_error!("enable the `sim` or `gpio` feature to provide a load cell");

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use alert::AlertDriver;
use clock::ScheduleClock;
use device::Device;
use ledger::Ledger;
use link::{Mailbox, MailboxSender, MqttLink};
use machine::HydrationStateMachine;
use scale::WeightSampler;
use store::FileStore;

#[tokio::main(flavor = "current_thread")]
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
    let device_id = env::var("DEVICE_ID").unwrap_or_else(|_| "bottle-1".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "bottle.toml".to_string());
    let store_path =
        env::var("STORE_PATH").unwrap_or_else(|_| "bottle-state.json".to_string());

    let cfg = config::load_or_default(&config_path)?;
    let mut store = FileStore::open(&store_path)
        .with_context(|| format!("failed to open store: {store_path}"))?;

    // ── Hardware ────────────────────────────────────────────────────
    let tick = Duration::from_millis(cfg.scale.tick_ms);

    #[cfg(feature = "gpio")]
    let (cell, outputs) = {
        let p = &cfg.pins;
        let cell = hx711::Hx711::new(p.hx711_dout, p.hx711_sck)?;
        let outputs = actuator::GpioActuators::new(actuator::Pins {
            led: p.led,
            buzzer: p.buzzer,
            red: p.red,
            green: p.green,
            blue: p.blue,
            rgb_common_anode: p.rgb_common_anode,
        })?;
        (cell, outputs)
    };

    #[cfg(not(feature = "gpio"))]
    let (cell, outputs) = {
        let cell = sim::SimLoadCell::new(&cfg.sim, cfg.scale.calibration_factor, tick);
        info!(scenario = %cell.scenario(), "using simulated load cell");
        (cell, actuator::MockActuators::new())
    };

    // ── Core ────────────────────────────────────────────────────────
    let now = Instant::now().into_std();
    let sampler = WeightSampler::new(cell, &cfg.scale, &mut store);
    let ledger = Ledger::load(store);
    let alerts = AlertDriver::new(outputs, cfg.alerts.clone(), now);
    let machine = HydrationStateMachine::new(&cfg, ledger, alerts, now);
    let clock = ScheduleClock::new(&cfg.schedule, now);

    // ── MQTT ────────────────────────────────────────────────────────
    let client_id = format!("hydration-bottle-{device_id}");
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, eventloop) = AsyncClient::new(mqttoptions, 10);

    let mailbox = Mailbox::new();
    let downlink = hydration_protocol::topic::downlink(&device_id);
    tokio::spawn(run_mqtt(
        eventloop,
        client.clone(),
        downlink,
        mailbox.sender(),
    ));

    let link = MqttLink::new(client, &device_id);
    let mut device = Device::new(
        sampler,
        machine,
        clock,
        link,
        mailbox,
        Duration::from_millis(cfg.schedule.refresh_interval_ms),
    );
    device.start(now);
    info!(device = %device_id, tick_ms = cfg.scale.tick_ms, "bottle started");

    // ── Control loop ────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            t = ticker.tick() => device.tick(t.into_std()),
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("signal handler failed: {e}");
                }
                break;
            }
        }
    }

    device.shutdown();
    Ok(())
}

/// Keep the connection alive and feed downlink packets into the mailbox.
async fn run_mqtt(
    mut eventloop: rumqttc::EventLoop,
    client: AsyncClient,
    downlink: String,
    mailbox: MailboxSender,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(topic = %downlink, "mqtt connected");
                // Non-blocking: this task is the one draining the request queue.
                if let Err(e) = client.try_subscribe(&downlink, QoS::AtMostOnce) {
                    warn!("subscribe failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) if p.topic == downlink => {
                mailbox.deliver(p.payload.to_vec());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. retrying...");
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
