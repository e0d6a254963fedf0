//! Per-tick orchestration: inbound routing, schedule refresh, sampling, the
//! state machine, and outbound flushing.

use std::time::{Duration, Instant};

use hydration_protocol::Message;
use tracing::{debug, info, warn};

use crate::actuator::{Actuators, Color};
use crate::clock::ScheduleClock;
use crate::link::{Link, Mailbox};
use crate::machine::HydrationStateMachine;
use crate::scale::{LoadCell, WeightSampler};
use crate::store::KvStore;

pub struct Device<C: LoadCell, A: Actuators, S: KvStore, L: Link> {
    sampler: WeightSampler<C>,
    machine: HydrationStateMachine<A, S>,
    clock: ScheduleClock,
    link: L,
    mailbox: Mailbox,
    refresh_interval: Duration,
    last_refresh: Option<Instant>,
}

impl<C: LoadCell, A: Actuators, S: KvStore, L: Link> Device<C, A, S, L> {
    pub fn new(
        sampler: WeightSampler<C>,
        machine: HydrationStateMachine<A, S>,
        clock: ScheduleClock,
        link: L,
        mailbox: Mailbox,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            sampler,
            machine,
            clock,
            link,
            mailbox,
            refresh_interval,
            last_refresh: None,
        }
    }

    /// Boot: settle the baseline against the current weight and announce
    /// the stored total so the gateway can resync.
    pub fn start(&mut self, now: Instant) {
        let weight = self.sampler.read_weight();
        self.machine.begin(weight, now);
        self.machine.alerts_mut().start_boot_animation(now);
        let total = self.machine.ledger().daily_total();
        self.link.send(&Message::DailyTotal(total));
    }

    pub fn tick(&mut self, now: Instant) {
        if let Some(bytes) = self.mailbox.take() {
            match Message::decode(&bytes) {
                Ok(msg) => self.route(msg, now),
                Err(e) => warn!(len = bytes.len(), "dropping malformed packet: {e}"),
            }
        }

        if let Some(req) = self.clock.poll(now) {
            self.link.send(&req);
        }

        let due = self
            .last_refresh
            .map_or(true, |t| now.saturating_duration_since(t) >= self.refresh_interval);
        if due {
            self.last_refresh = Some(now);
            self.machine
                .set_sleeping(self.clock.is_sleep_time(now), now);
            if let Some(day) = self.clock.current_day(now) {
                self.machine.check_day(day);
            }
        }

        let weight = self.sampler.read_weight();
        self.machine.update(weight, now);

        for msg in self.machine.take_outbox() {
            self.link.send(&msg);
        }
    }

    fn route(&mut self, msg: Message, now: Instant) {
        debug!(?msg, "inbound");
        match msg {
            Message::ReportTime(epoch) => {
                self.clock.set_time(epoch, now);
                // Apply sleep / day state on this tick.
                self.last_refresh = None;
            }
            Message::ReportPresence(home) => self.machine.handle_presence(home, now),
            Message::SetLed(on) => self.machine.alerts_mut().actuators_mut().set_led(on),
            Message::SetBuzzer(on) => self.machine.alerts_mut().actuators_mut().set_buzzer(on),
            Message::SetRgb(code) => match Color::from_code(code) {
                Some(color) => self
                    .machine
                    .alerts_mut()
                    .actuators_mut()
                    .set_rgb(color.rgb()),
                None => warn!(code, "unknown color code"),
            },
            Message::Tare => {
                let store = self.machine.ledger_mut().store_mut();
                if self.sampler.tare(store) {
                    info!("tared on request");
                }
            }
            Message::GetWeight => {
                let grams = self.machine.last_weight();
                self.link.send(&Message::ReportWeight(grams));
            }
            Message::RequestDailyTotal => {
                let total = self.machine.ledger().daily_total();
                self.link.send(&Message::DailyTotal(total));
            }
            other => debug!(?other, "ignoring message not meant for the bottle"),
        }
    }

    /// Leave the outputs dark and silent.
    pub fn shutdown(&mut self) {
        self.machine.alerts_mut().actuators_mut().stop_all();
        info!(
            total_ml = self.machine.ledger().daily_total(),
            dropped_packets = self.mailbox.dropped(),
            "device stopped"
        );
    }

    pub fn machine(&self) -> &HydrationStateMachine<A, S> {
        &self.machine
    }

    pub fn clock(&self) -> &ScheduleClock {
        &self.clock
    }

    pub fn link(&self) -> &L {
        &self.link
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::MockActuators;
    use crate::alert::AlertDriver;
    use crate::config::Config;
    use crate::ledger::Ledger;
    use crate::link::MailboxSender;
    use crate::machine::StateKind;
    use crate::scale::KEY_TARE_OFFSET;
    use crate::store::{MemoryStore, Value};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts set from the test; 1 count = 1 gram.
    #[derive(Clone, Default)]
    struct FakeCell(Rc<Cell<i64>>);

    impl LoadCell for FakeCell {
        fn read_counts(&mut self) -> Option<i64> {
            Some(self.0.get())
        }
    }

    #[derive(Default)]
    struct RecordingLink(Vec<Message>);

    impl Link for RecordingLink {
        fn send(&mut self, msg: &Message) {
            self.0.push(*msg);
        }
    }

    type TestDevice = Device<FakeCell, MockActuators, MemoryStore, RecordingLink>;

    /// 2024-01-01T12:00:00Z, 17:30 at the default +05:30 offset.
    const AFTERNOON_UTC: u32 = 1_704_110_400;

    fn device(grams: i64) -> (TestDevice, FakeCell, MailboxSender, Instant) {
        let t0 = Instant::now();
        let mut cfg = Config::default();
        cfg.scale.calibration_factor = 1.0;

        let cell = FakeCell::default();
        cell.0.set(grams);
        let mut store = MemoryStore::new();
        store.put(KEY_TARE_OFFSET, Value::Int(0));
        let sampler = WeightSampler::new(cell.clone(), &cfg.scale, &mut store);
        let ledger = Ledger::load(store);
        let alerts = AlertDriver::new(MockActuators::new(), cfg.alerts.clone(), t0);
        let machine = HydrationStateMachine::new(&cfg, ledger, alerts, t0);
        let clock = ScheduleClock::new(&cfg.schedule, t0);
        let mailbox = Mailbox::new();
        let tx = mailbox.sender();

        let mut dev = Device::new(
            sampler,
            machine,
            clock,
            RecordingLink::default(),
            mailbox,
            Duration::from_millis(cfg.schedule.refresh_interval_ms),
        );
        dev.start(t0);
        (dev, cell, tx, t0)
    }

    fn sent(dev: &TestDevice) -> &[Message] {
        &dev.link().0
    }

    #[test]
    fn start_announces_total_and_requests_time() {
        let (mut dev, _, _, t0) = device(1000);
        assert_eq!(sent(&dev), &[Message::DailyTotal(0.0)]);
        dev.tick(t0);
        assert_eq!(sent(&dev)[1], Message::RequestTime);
        assert_eq!(dev.machine().ledger().baseline(), Some(1000.0));
    }

    #[test]
    fn time_reply_applies_sleep_and_day() {
        let (mut dev, _, tx, t0) = device(1000);
        // 02:00 local.
        let night = AFTERNOON_UTC + 8 * 3600 + 30 * 60;
        tx.deliver(Message::ReportTime(night).encode().to_vec());
        dev.tick(t0);
        assert!(dev.clock().is_synced());
        assert!(dev.machine().is_sleeping());
        assert_eq!(dev.machine().ledger().last_day(), 19_724);
        assert!(sent(&dev).contains(&Message::DailyTotal(0.0)));
    }

    #[test]
    fn afternoon_is_awake() {
        let (mut dev, _, tx, t0) = device(1000);
        tx.deliver(Message::ReportTime(AFTERNOON_UTC).encode().to_vec());
        dev.tick(t0);
        assert!(!dev.machine().is_sleeping());
    }

    #[test]
    fn get_weight_replies_with_grams() {
        let (mut dev, _, tx, t0) = device(742);
        dev.tick(t0);
        tx.deliver(Message::GetWeight.encode().to_vec());
        dev.tick(t0 + Duration::from_millis(100));
        assert!(sent(&dev).contains(&Message::ReportWeight(742.0)));
    }

    #[test]
    fn daily_total_request_is_answered() {
        let (mut dev, _, tx, t0) = device(1000);
        tx.deliver(Message::RequestDailyTotal.encode().to_vec());
        dev.tick(t0);
        let totals = sent(&dev)
            .iter()
            .filter(|m| matches!(m, Message::DailyTotal(_)))
            .count();
        assert_eq!(totals, 2);
    }

    #[test]
    fn diagnostics_drive_outputs() {
        let (mut dev, _, tx, t0) = device(1000);
        dev.tick(t0);
        tx.deliver(Message::SetRgb(8).encode().to_vec());
        dev.tick(t0 + Duration::from_millis(100));
        tx.deliver(Message::SetLed(true).encode().to_vec());
        dev.tick(t0 + Duration::from_millis(200));
        let out = dev.machine().alerts().actuators();
        assert_eq!(out.rgb, Color::Cyan.rgb());
        assert!(out.led);
    }

    #[test]
    fn tare_rezeroes_and_persists() {
        let (mut dev, cell, tx, t0) = device(0);
        cell.0.set(25);
        tx.deliver(Message::Tare.encode().to_vec());
        dev.tick(t0);
        assert_eq!(dev.machine().last_weight(), 0.0);
        let store = dev.machine().ledger().store();
        assert_eq!(store.get_i64(KEY_TARE_OFFSET, 0), 25);
    }

    #[test]
    fn malformed_and_foreign_packets_are_ignored() {
        let (mut dev, _, tx, t0) = device(1000);
        tx.deliver(vec![1, 0x99, 0, 0, 0, 0]);
        dev.tick(t0);
        tx.deliver(Message::AlertMissing.encode().to_vec());
        dev.tick(t0 + Duration::from_millis(100));
        assert_eq!(dev.machine().state_kind(), StateKind::Monitoring);
    }

    #[test]
    fn drink_is_flushed_to_link() {
        let (mut dev, cell, _, t0) = device(1000);
        let mut t = t0;
        for grams in [0, 0, 0, 930, 930, 930, 930] {
            cell.0.set(grams);
            dev.tick(t);
            t += Duration::from_secs(1);
        }
        assert!(sent(&dev).contains(&Message::DrinkDetected(70.0)));
        assert!(sent(&dev).contains(&Message::DailyTotal(70.0)));
    }
}
