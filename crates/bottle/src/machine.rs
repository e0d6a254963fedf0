//! The hydration state machine.
//!
//! Fuses weight samples, elapsed time, the sleep schedule and presence
//! replies into alert levels, ledger updates and outbound notifications.
//!
//! ```text
//!   Monitoring ──interval, awake──▶ WaitingForPresence ──home──▶ ReminderPre
//!       ▲   ▲                            │ away / timeout            │ pre-alert elapsed
//!       │   └──────── snooze ────────────┘                           ▼
//!       │                                                     ReminderActive
//!       │                                                            │
//!       │        (any of the above) ──bottle lifted──▶ RemovedDrinking
//!       │                                               │          │ missing timeout
//!       │                                               │          ▼
//!   Stabilizing ◀────────────── bottle back ────────────┴──── MissingAlert
//! ```
//!
//! The machine never blocks.  Timers live in the state variants and are
//! compared against the `now` passed to every call.

use std::fmt;
use std::time::{Duration, Instant};

use hydration_protocol::Message;
use tracing::{debug, info};

use crate::actuator::Actuators;
use crate::alert::{AlertDriver, AlertLevel};
use crate::config::{Config, TimingConfig, WeightConfig};
use crate::ledger::Ledger;
use crate::presence::PresenceOracle;
use crate::scale::BottleDetector;
use crate::store::KvStore;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Monitoring {
        /// A proactive-drink candidate is re-read at this deadline.
        confirm_at: Option<Instant>,
    },
    WaitingForPresence,
    ReminderPre {
        since: Instant,
    },
    ReminderActive {
        last_check: Instant,
    },
    RemovedDrinking {
        since: Instant,
    },
    MissingAlert,
    Stabilizing {
        since: Instant,
    },
}

/// Copyable state tag for logging and status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Monitoring,
    WaitingForPresence,
    ReminderPre,
    ReminderActive,
    RemovedDrinking,
    MissingAlert,
    Stabilizing,
}

impl State {
    fn kind(&self) -> StateKind {
        match self {
            Self::Monitoring { .. } => StateKind::Monitoring,
            Self::WaitingForPresence => StateKind::WaitingForPresence,
            Self::ReminderPre { .. } => StateKind::ReminderPre,
            Self::ReminderActive { .. } => StateKind::ReminderActive,
            Self::RemovedDrinking { .. } => StateKind::RemovedDrinking,
            Self::MissingAlert => StateKind::MissingAlert,
            Self::Stabilizing { .. } => StateKind::Stabilizing,
        }
    }

    const MONITORING: State = State::Monitoring { confirm_at: None };
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Monitoring => "monitoring",
            Self::WaitingForPresence => "waiting_for_presence",
            Self::ReminderPre => "reminder_pre",
            Self::ReminderActive => "reminder_active",
            Self::RemovedDrinking => "removed_drinking",
            Self::MissingAlert => "missing_alert",
            Self::Stabilizing => "stabilizing",
        };
        f.write_str(s)
    }
}

pub struct HydrationStateMachine<A: Actuators, S: KvStore> {
    weight: WeightConfig,
    timing: TimingConfig,
    state: State,
    ledger: Ledger<S>,
    alerts: AlertDriver<A>,
    presence: PresenceOracle,
    detector: BottleDetector,
    interval_start: Instant,
    sleeping: bool,
    last_weight_g: f32,
    outbox: Vec<Message>,
}

impl<A: Actuators, S: KvStore> HydrationStateMachine<A, S> {
    pub fn new(cfg: &Config, ledger: Ledger<S>, alerts: AlertDriver<A>, now: Instant) -> Self {
        Self {
            weight: cfg.weight.clone(),
            timing: cfg.timing.clone(),
            state: State::MONITORING,
            ledger,
            alerts,
            presence: PresenceOracle::new(cfg.timing.presence_timeout()),
            detector: BottleDetector::new(&cfg.weight),
            interval_start: now,
            sleeping: false,
            last_weight_g: 0.0,
            outbox: Vec::new(),
        }
    }

    /// Reconcile the stored baseline with what is on the holder at boot.
    pub fn begin(&mut self, initial_weight_g: f32, now: Instant) {
        self.last_weight_g = initial_weight_g;
        self.detector.reset(initial_weight_g);
        self.state = State::MONITORING;
        self.interval_start = now;

        let present = self.detector.is_present();
        match (present, self.ledger.baseline()) {
            (false, Some(_)) => {
                info!(weight_g = initial_weight_g, "no bottle at boot, clearing baseline");
                self.ledger.set_baseline(None);
            }
            (false, None) => {}
            (true, None) => {
                info!(weight_g = initial_weight_g, "bottle at boot, baseline set");
                self.ledger.set_baseline(Some(initial_weight_g));
            }
            (true, Some(b)) => {
                if let Some(delta) = self.weight.boot_rebase_delta_g {
                    if (initial_weight_g - b).abs() >= delta {
                        info!(
                            stored_g = b,
                            weight_g = initial_weight_g,
                            "boot weight far from stored baseline, rebasing"
                        );
                        self.ledger.set_baseline(Some(initial_weight_g));
                    }
                }
            }
        }
        info!(
            present,
            baseline_g = ?self.ledger.baseline(),
            total_ml = self.ledger.daily_total(),
            "state machine started"
        );
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state_kind(&self) -> StateKind {
        self.state.kind()
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger<S> {
        &mut self.ledger
    }

    pub fn alerts(&self) -> &AlertDriver<A> {
        &self.alerts
    }

    pub fn alerts_mut(&mut self) -> &mut AlertDriver<A> {
        &mut self.alerts
    }

    pub fn presence(&self) -> &PresenceOracle {
        &self.presence
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    pub fn bottle_present(&self) -> bool {
        self.detector.is_present()
    }

    pub fn last_weight(&self) -> f32 {
        self.last_weight_g
    }

    /// Drain notifications produced since the last call.
    pub fn take_outbox(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    /// Advance one tick with a fresh weight sample.
    pub fn update(&mut self, weight_g: f32, now: Instant) {
        self.last_weight_g = weight_g;
        let present = self.detector.update(weight_g);
        let prev = self.state.kind();

        let next = match self.state {
            _ if !present && self.state.kind().counts_as_docked() => {
                self.presence.cancel();
                self.set_alert(AlertLevel::None, now);
                State::RemovedDrinking { since: now }
            }
            State::Monitoring { confirm_at } => self.monitoring(confirm_at, weight_g, now),
            State::WaitingForPresence => {
                if !self.presence.poll_timeout(now) {
                    State::WaitingForPresence
                } else if self.presence.assume_home() && !self.sleeping {
                    // Gateway has never answered; remind rather than go quiet.
                    self.start_reminder(now)
                } else {
                    self.snooze(now)
                }
            }
            State::ReminderPre { since } => {
                if elapsed(since, now) >= self.timing.pre_alert() {
                    info!("reminder escalating");
                    self.set_alert(AlertLevel::Active, now);
                    State::ReminderActive { last_check: now }
                } else {
                    State::ReminderPre { since }
                }
            }
            State::ReminderActive { last_check } => {
                // A timed-out away-check leaves the reminder sounding.
                self.presence.poll_timeout(now);
                if elapsed(last_check, now) >= self.timing.away_check_interval()
                    && !self.presence.is_pending()
                {
                    let req = self.presence.request(now);
                    self.outbox.push(req);
                    State::ReminderActive { last_check: now }
                } else {
                    State::ReminderActive { last_check }
                }
            }
            State::RemovedDrinking { since } => {
                if present {
                    State::Stabilizing { since: now }
                } else if elapsed(since, now) >= self.timing.missing_timeout() {
                    info!("bottle missing");
                    self.set_alert(AlertLevel::Missing, now);
                    self.outbox.push(Message::AlertMissing);
                    State::MissingAlert
                } else {
                    State::RemovedDrinking { since }
                }
            }
            State::MissingAlert => {
                if present {
                    info!("bottle replaced");
                    self.set_alert(AlertLevel::None, now);
                    self.outbox.push(Message::AlertReplaced);
                    State::Stabilizing { since: now }
                } else {
                    State::MissingAlert
                }
            }
            State::Stabilizing { since } => {
                if !present {
                    State::RemovedDrinking { since: now }
                } else if elapsed(since, now) >= self.timing.stabilization() {
                    self.evaluate(weight_g, now);
                    State::MONITORING
                } else {
                    State::Stabilizing { since }
                }
            }
        };

        self.state = next;
        if self.state.kind() != prev {
            debug!(from = %prev, to = %self.state.kind(), weight_g, "state");
        }
        self.alerts.tick(now);
    }

    /// Apply the schedule's sleep flag.  Going to sleep silences a reminder
    /// (or an outstanding presence question) immediately.
    pub fn set_sleeping(&mut self, sleeping: bool, now: Instant) {
        if sleeping == self.sleeping {
            return;
        }
        info!(sleeping, "sleep mode");
        self.sleeping = sleeping;
        self.alerts.set_sleeping(sleeping);

        if sleeping {
            match self.state {
                State::Monitoring { confirm_at: Some(_) } => {
                    debug!("pending drink re-read dropped for sleep");
                    self.state = State::MONITORING;
                }
                State::WaitingForPresence => {
                    self.presence.cancel();
                    self.state = State::MONITORING;
                }
                State::ReminderPre { .. } | State::ReminderActive { .. } => {
                    self.presence.cancel();
                    self.set_alert(AlertLevel::None, now);
                    self.state = State::MONITORING;
                }
                _ => {}
            }
        }
    }

    /// Zero the total on a new local day.
    pub fn check_day(&mut self, day: i64) {
        if self.ledger.rollover_day(day) {
            self.outbox.push(Message::DailyTotal(0.0));
        }
    }

    pub fn handle_presence(&mut self, is_home: bool, now: Instant) {
        self.presence.reply(is_home, now);

        match self.state {
            State::WaitingForPresence => {
                if is_home && !self.sleeping {
                    info!("user home");
                    self.state = self.start_reminder(now);
                } else {
                    self.state = self.snooze(now);
                }
            }
            State::ReminderPre { .. } | State::ReminderActive { .. } => {
                if !is_home {
                    info!("user away, reminder stopped");
                    self.set_alert(AlertLevel::None, now);
                    self.state = self.snooze(now);
                }
            }
            _ => debug!(state = %self.state.kind(), is_home, "presence reply ignored"),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn monitoring(&mut self, confirm_at: Option<Instant>, weight_g: f32, now: Instant) -> State {
        if let Some(deadline) = confirm_at {
            if now < deadline {
                return State::Monitoring { confirm_at };
            }
            if let Some(drop) = self.qualifying_drop(weight_g) {
                self.credit_drink(drop, weight_g, now);
                return State::MONITORING;
            }
            debug!(weight_g, "drop did not hold on re-read");
            return self.ask_presence(now);
        }

        // Deferred while asleep: no credit, no question, interval kept.
        if self.sleeping || elapsed(self.interval_start, now) < self.timing.check_interval() {
            return State::MONITORING;
        }
        if self.qualifying_drop(weight_g).is_some() {
            let delay = Duration::from_millis(self.weight.drink_confirm_delay_ms);
            return State::Monitoring {
                confirm_at: Some(now + delay),
            };
        }
        self.ask_presence(now)
    }

    /// Interval elapsed with no drink: ask whether to remind.
    fn ask_presence(&mut self, now: Instant) -> State {
        let req = self.presence.request(now);
        self.outbox.push(req);
        State::WaitingForPresence
    }

    fn qualifying_drop(&self, weight_g: f32) -> Option<f32> {
        let baseline = self.ledger.baseline()?;
        let drop = baseline - weight_g;
        (drop >= self.weight.drink_min_delta_g).then_some(drop)
    }

    fn start_reminder(&mut self, now: Instant) -> State {
        info!("reminder started");
        self.set_alert(AlertLevel::PreAlert, now);
        self.outbox.push(Message::AlertReminderStarted);
        State::ReminderPre { since: now }
    }

    fn snooze(&mut self, now: Instant) -> State {
        debug!("snoozed");
        self.interval_start = now;
        State::MONITORING
    }

    fn credit_drink(&mut self, amount_ml: f32, weight_g: f32, now: Instant) {
        if let Some(total) = self.ledger.record_drink(amount_ml, weight_g) {
            self.outbox.push(Message::DrinkDetected(amount_ml));
            self.outbox.push(Message::DailyTotal(total));
            if let Some(m) = self.alerts.confirm_drink(now) {
                self.outbox.push(m);
            }
        }
        self.interval_start = now;
    }

    /// Compare the settled weight against the baseline.
    fn evaluate(&mut self, weight_g: f32, now: Instant) {
        let Some(baseline) = self.ledger.baseline() else {
            info!(weight_g, "first placement, baseline set");
            self.ledger.set_baseline(Some(weight_g));
            self.interval_start = now;
            return;
        };

        let diff = baseline - weight_g;
        if diff >= self.weight.drink_min_delta_g {
            self.credit_drink(diff, weight_g, now);
        } else if diff <= -self.weight.refill_min_delta_g {
            info!(from_g = baseline, to_g = weight_g, "refill");
            self.ledger.set_baseline(Some(weight_g));
            self.interval_start = now;
            if let Some(m) = self.alerts.confirm_refill(now) {
                self.outbox.push(m);
            }
        } else {
            debug!(diff, "change below thresholds");
        }
    }

    fn set_alert(&mut self, level: AlertLevel, now: Instant) {
        if let Some(m) = self.alerts.set_level(level, now) {
            self.outbox.push(m);
        }
    }
}

impl StateKind {
    /// States in which lifting the bottle starts an absence.
    fn counts_as_docked(self) -> bool {
        matches!(
            self,
            Self::Monitoring | Self::WaitingForPresence | Self::ReminderPre | Self::ReminderActive
        )
    }
}

fn elapsed(since: Instant, now: Instant) -> Duration {
    now.saturating_duration_since(since)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::MockActuators;
    use crate::store::MemoryStore;

    type Machine = HydrationStateMachine<MockActuators, MemoryStore>;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn mins(n: u64) -> Duration {
        Duration::from_secs(n * 60)
    }

    fn machine_with(cfg: &Config, boot_weight: f32) -> (Machine, Instant) {
        let t0 = Instant::now();
        let ledger = Ledger::load(MemoryStore::new());
        let alerts = AlertDriver::new(MockActuators::new(), cfg.alerts.clone(), t0);
        let mut m = HydrationStateMachine::new(cfg, ledger, alerts, t0);
        m.begin(boot_weight, t0);
        (m, t0)
    }

    fn machine() -> (Machine, Instant) {
        machine_with(&Config::default(), 1000.0)
    }

    /// Feed `weight` once per second from `from` up to and including `to`.
    fn hold(m: &mut Machine, weight: f32, from: Instant, to: Instant) -> Vec<Message> {
        let mut out = Vec::new();
        let mut t = from;
        while t <= to {
            m.update(weight, t);
            out.extend(m.take_outbox());
            t += secs(1);
        }
        out
    }

    /// Lift, put back at `weight`, and let it settle.  Returns the instant
    /// after stabilization and everything sent.
    fn lift_and_replace(m: &mut Machine, weight: f32, at: Instant) -> (Instant, Vec<Message>) {
        let mut out = hold(m, 0.0, at, at + secs(5));
        let back = at + secs(6);
        out.extend(hold(m, weight, back, back + secs(3)));
        (back + secs(3), out)
    }

    fn count(msgs: &[Message], want: &Message) -> usize {
        msgs.iter().filter(|m| *m == want).count()
    }

    /// Drive to WaitingForPresence at the first interval.
    fn reach_waiting(m: &mut Machine, t0: Instant) -> Instant {
        let at = t0 + mins(30);
        m.update(1000.0, at);
        assert_eq!(m.state_kind(), StateKind::WaitingForPresence);
        assert_eq!(m.take_outbox(), vec![Message::RequestPresence]);
        at
    }

    fn reach_active(m: &mut Machine, t0: Instant) -> Instant {
        let at = reach_waiting(m, t0);
        m.handle_presence(true, at + secs(1));
        assert_eq!(m.state_kind(), StateKind::ReminderPre);
        let active_at = at + secs(11);
        m.update(1000.0, active_at);
        assert_eq!(m.state_kind(), StateKind::ReminderActive);
        m.take_outbox();
        active_at
    }

    // -- Boot -------------------------------------------------------------

    #[test]
    fn boot_with_bottle_sets_missing_baseline() {
        let (m, _) = machine();
        assert_eq!(m.ledger().baseline(), Some(1000.0));
        assert_eq!(m.state_kind(), StateKind::Monitoring);
    }

    #[test]
    fn boot_without_bottle_clears_baseline() {
        let t0 = Instant::now();
        let cfg = Config::default();
        let mut ledger = Ledger::load(MemoryStore::new());
        ledger.set_baseline(Some(900.0));
        let alerts = AlertDriver::new(MockActuators::new(), cfg.alerts.clone(), t0);
        let mut m = HydrationStateMachine::new(&cfg, ledger, alerts, t0);
        m.begin(3.0, t0);
        assert_eq!(m.ledger().baseline(), None);
        assert!(!m.bottle_present());
    }

    #[test]
    fn boot_rebase_only_beyond_delta() {
        let t0 = Instant::now();
        let mut cfg = Config::default();
        cfg.weight.boot_rebase_delta_g = Some(100.0);

        for (boot, expected) in [(960.0, 1000.0), (700.0, 700.0)] {
            let mut ledger = Ledger::load(MemoryStore::new());
            ledger.set_baseline(Some(1000.0));
            let alerts = AlertDriver::new(MockActuators::new(), cfg.alerts.clone(), t0);
            let mut m = HydrationStateMachine::new(&cfg, ledger, alerts, t0);
            m.begin(boot, t0);
            assert_eq!(m.ledger().baseline(), Some(expected), "boot weight {boot}");
        }
    }

    // -- Bottle presence --------------------------------------------------

    #[test]
    fn weights_at_or_above_threshold_never_remove() {
        let (mut m, t0) = machine();
        let weights = [1000.0, 80.0, 81.5, 400.0, 80.0, 999.0];
        let mut t = t0;
        for i in 0..7200 {
            m.update(weights[i % weights.len()], t);
            assert_ne!(m.state_kind(), StateKind::RemovedDrinking, "tick {i}");
            assert_ne!(m.state_kind(), StateKind::MissingAlert);
            m.take_outbox();
            t += secs(1);
        }
    }

    #[test]
    fn exactly_one_missing_alert_per_absence() {
        let (mut m, t0) = machine();
        let out = hold(&mut m, 0.0, t0 + secs(1), t0 + mins(10));
        assert_eq!(m.state_kind(), StateKind::MissingAlert);
        assert_eq!(count(&out, &Message::AlertMissing), 1);

        let back = t0 + mins(10) + secs(1);
        let out = hold(&mut m, 1000.0, back, back + secs(3));
        assert_eq!(count(&out, &Message::AlertReplaced), 1);
        assert_eq!(m.state_kind(), StateKind::Monitoring);

        let gone = back + secs(4);
        let out = hold(&mut m, 0.0, gone, gone + mins(4));
        assert_eq!(count(&out, &Message::AlertMissing), 1);
    }

    #[test]
    fn missing_alert_is_visual_first() {
        let (mut m, t0) = machine();
        hold(&mut m, 0.0, t0 + secs(1), t0 + secs(181));
        assert_eq!(m.state_kind(), StateKind::MissingAlert);
        assert_eq!(m.alerts().level(), AlertLevel::Missing);
        assert!(!m.alerts().actuators().buzzer);
    }

    #[test]
    fn short_lift_returns_without_alert() {
        let (mut m, t0) = machine();
        let (_, out) = lift_and_replace(&mut m, 1000.0, t0 + secs(1));
        assert!(out.is_empty(), "unexpected {out:?}");
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        assert_eq!(m.ledger().baseline(), Some(1000.0));
    }

    #[test]
    fn lifted_again_while_stabilizing() {
        let (mut m, t0) = machine();
        hold(&mut m, 0.0, t0 + secs(1), t0 + secs(2));
        m.update(1000.0, t0 + secs(3));
        assert_eq!(m.state_kind(), StateKind::Stabilizing);
        m.update(0.0, t0 + secs(4));
        assert_eq!(m.state_kind(), StateKind::RemovedDrinking);
    }

    // -- Drink / refill ---------------------------------------------------

    #[test]
    fn drink_after_lift_is_credited() {
        let (mut m, t0) = machine();
        let (_, out) = lift_and_replace(&mut m, 930.0, t0 + secs(1));
        assert_eq!(
            out,
            vec![Message::DrinkDetected(70.0), Message::DailyTotal(70.0)]
        );
        assert_eq!(m.ledger().daily_total(), 70.0);
        assert_eq!(m.ledger().baseline(), Some(930.0));
        assert_eq!(m.alerts().level(), AlertLevel::Success);
    }

    #[test]
    fn refill_moves_baseline_only() {
        let (mut m, t0) = machine();
        let (t, _) = lift_and_replace(&mut m, 930.0, t0 + secs(1));
        let (_, out) = lift_and_replace(&mut m, 1200.0, t + secs(1));
        assert!(out.is_empty(), "unexpected {out:?}");
        assert_eq!(m.ledger().daily_total(), 70.0);
        assert_eq!(m.ledger().baseline(), Some(1200.0));
    }

    #[test]
    fn sips_accumulate_against_baseline() {
        let (mut m, t0) = machine();
        let (t, out) = lift_and_replace(&mut m, 980.0, t0 + secs(1));
        assert!(out.is_empty());
        assert_eq!(m.ledger().baseline(), Some(1000.0));
        let (_, out) = lift_and_replace(&mut m, 940.0, t + secs(1));
        assert_eq!(count(&out, &Message::DrinkDetected(60.0)), 1);
    }

    #[test]
    fn first_placement_sets_baseline_without_credit() {
        let (mut m, t0) = machine_with(&Config::default(), 0.0);
        assert_eq!(m.ledger().baseline(), None);
        let (_, out) = lift_and_replace(&mut m, 850.0, t0 + secs(1));
        assert!(out.is_empty());
        assert_eq!(m.ledger().baseline(), Some(850.0));
        assert_eq!(m.ledger().daily_total(), 0.0);
    }

    #[test]
    fn drink_resets_interval() {
        let (mut m, t0) = machine();
        let (t, _) = lift_and_replace(&mut m, 930.0, t0 + mins(20));
        let out = hold(&mut m, 930.0, t, t0 + mins(35));
        assert_eq!(count(&out, &Message::RequestPresence), 0);
    }

    #[test]
    fn proactive_drink_confirmed_on_reread() {
        let (mut m, t0) = machine();
        let at = t0 + mins(30);
        m.update(900.0, at);
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        assert!(m.take_outbox().is_empty());
        m.update(900.0, at + Duration::from_millis(400));
        assert_eq!(
            m.take_outbox(),
            vec![Message::DrinkDetected(100.0), Message::DailyTotal(100.0)]
        );
        assert_eq!(m.ledger().baseline(), Some(900.0));
    }

    #[test]
    fn proactive_transient_asks_presence() {
        let (mut m, t0) = machine();
        let at = t0 + mins(30);
        m.update(900.0, at);
        m.update(1000.0, at + Duration::from_millis(400));
        assert_eq!(m.take_outbox(), vec![Message::RequestPresence]);
        assert_eq!(m.ledger().daily_total(), 0.0);
    }

    // -- Reminder cycle ---------------------------------------------------

    #[test]
    fn home_reply_starts_reminder_then_escalates() {
        let (mut m, t0) = machine();
        let at = reach_waiting(&mut m, t0);
        m.handle_presence(true, at + secs(1));
        assert_eq!(m.take_outbox(), vec![Message::AlertReminderStarted]);
        assert_eq!(m.alerts().level(), AlertLevel::PreAlert);

        m.update(1000.0, at + secs(10));
        assert_eq!(m.state_kind(), StateKind::ReminderPre);
        m.update(1000.0, at + secs(11));
        assert_eq!(m.state_kind(), StateKind::ReminderActive);
        assert_eq!(m.alerts().level(), AlertLevel::Active);
        assert!(m.take_outbox().is_empty(), "escalation sends nothing");
    }

    #[test]
    fn away_reply_snoozes() {
        let (mut m, t0) = machine();
        let at = reach_waiting(&mut m, t0);
        m.handle_presence(false, at + secs(2));
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        let out = hold(&mut m, 1000.0, at + secs(3), at + mins(29));
        assert_eq!(count(&out, &Message::RequestPresence), 0);
    }

    #[test]
    fn presence_timeout_snoozes_exactly_once() {
        let (mut m, t0) = machine();
        // The gateway has answered before, so silence now means away.
        m.handle_presence(false, t0 + secs(1));
        let at = reach_waiting(&mut m, t0);
        let out = hold(&mut m, 1000.0, at + secs(1), at + secs(15));
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        assert!(out.is_empty());

        // Next request only after a full interval from the snooze.
        let out = hold(&mut m, 1000.0, at + secs(16), at + mins(30) + secs(5));
        assert_eq!(count(&out, &Message::RequestPresence), 0);
        let out = hold(&mut m, 1000.0, at + mins(30) + secs(6), at + mins(30) + secs(12));
        assert_eq!(count(&out, &Message::RequestPresence), 1);
    }

    #[test]
    fn unanswered_gateway_at_boot_still_reminds() {
        let (mut m, t0) = machine();
        let at = reach_waiting(&mut m, t0);
        let out = hold(&mut m, 1000.0, at + secs(1), at + secs(15));
        assert_eq!(m.state_kind(), StateKind::ReminderPre);
        assert_eq!(out, vec![Message::AlertReminderStarted]);
        assert_eq!(m.alerts().level(), AlertLevel::PreAlert);

        // Once any reply has arrived, the same silence snoozes.
        m.handle_presence(false, at + secs(16));
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        m.take_outbox();
        let again = at + secs(16) + mins(30);
        m.update(1000.0, again);
        assert_eq!(m.take_outbox(), vec![Message::RequestPresence]);
        let out = hold(&mut m, 1000.0, again + secs(1), again + secs(15));
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        assert!(out.is_empty(), "unexpected {out:?}");
    }

    #[test]
    fn active_reminder_rechecks_presence() {
        let (mut m, t0) = machine();
        let active_at = reach_active(&mut m, t0);
        let out = hold(&mut m, 1000.0, active_at + secs(1), active_at + secs(60));
        assert_eq!(count(&out, &Message::RequestPresence), 1);
        assert_eq!(m.state_kind(), StateKind::ReminderActive);

        m.handle_presence(false, active_at + secs(61));
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        assert_eq!(m.take_outbox(), vec![Message::AlertStopped]);
        assert!(!m.alerts().actuators().buzzer);
    }

    #[test]
    fn away_check_timeout_keeps_alerting() {
        let (mut m, t0) = machine();
        let active_at = reach_active(&mut m, t0);
        hold(&mut m, 1000.0, active_at + secs(1), active_at + secs(90));
        assert_eq!(m.state_kind(), StateKind::ReminderActive);
        assert_eq!(m.alerts().level(), AlertLevel::Active);
    }

    #[test]
    fn lifting_during_reminder_stops_it() {
        let (mut m, t0) = machine();
        let active_at = reach_active(&mut m, t0);
        m.update(0.0, active_at + secs(1));
        assert_eq!(m.state_kind(), StateKind::RemovedDrinking);
        assert_eq!(m.take_outbox(), vec![Message::AlertStopped]);
        assert_eq!(m.alerts().level(), AlertLevel::None);
    }

    #[test]
    fn presence_reply_in_monitoring_is_ignored() {
        let (mut m, t0) = machine();
        m.handle_presence(true, t0 + secs(1));
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        assert!(m.take_outbox().is_empty());
    }

    // -- Sleep / day ------------------------------------------------------

    #[test]
    fn interval_while_asleep_sends_nothing() {
        let (mut m, t0) = machine();
        m.set_sleeping(true, t0);
        let out = hold(&mut m, 1000.0, t0 + secs(1), t0 + mins(45));
        assert!(out.is_empty(), "unexpected {out:?}");
        assert_eq!(m.state_kind(), StateKind::Monitoring);

        // Deferred check runs on the first awake tick.
        let wake = t0 + mins(45) + secs(1);
        m.set_sleeping(false, wake);
        m.update(1000.0, wake);
        assert_eq!(m.take_outbox(), vec![Message::RequestPresence]);
    }

    #[test]
    fn drop_while_asleep_is_credited_after_waking() {
        let (mut m, t0) = machine();
        m.set_sleeping(true, t0);
        let asleep = t0 + mins(30);
        m.update(900.0, asleep);
        m.update(900.0, asleep + Duration::from_millis(400));
        m.update(900.0, asleep + secs(5));
        assert!(m.take_outbox().is_empty());
        assert_eq!(m.ledger().daily_total(), 0.0);
        assert_eq!(m.ledger().baseline(), Some(1000.0));
        assert_ne!(m.alerts().level(), AlertLevel::Success);

        let wake = asleep + secs(6);
        m.set_sleeping(false, wake);
        m.update(900.0, wake);
        m.update(900.0, wake + Duration::from_millis(400));
        assert_eq!(
            m.take_outbox(),
            vec![Message::DrinkDetected(100.0), Message::DailyTotal(100.0)]
        );
        assert_eq!(m.ledger().daily_total(), 100.0);
    }

    #[test]
    fn sleep_drops_pending_drink_reread() {
        let (mut m, t0) = machine();
        let at = t0 + mins(30);
        m.update(900.0, at);
        m.set_sleeping(true, at + Duration::from_millis(100));
        m.update(900.0, at + Duration::from_millis(400));
        assert!(m.take_outbox().is_empty());
        assert_eq!(m.ledger().daily_total(), 0.0);
    }

    #[test]
    fn sleep_silences_active_reminder_same_tick() {
        let (mut m, t0) = machine();
        let active_at = reach_active(&mut m, t0);
        m.update(1000.0, active_at);
        m.set_sleeping(true, active_at);
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        assert!(!m.alerts().actuators().led);
        assert!(!m.alerts().actuators().buzzer);
        assert_eq!(m.take_outbox(), vec![Message::AlertStopped]);
    }

    #[test]
    fn sleep_drops_pending_presence_question() {
        let (mut m, t0) = machine();
        let at = reach_waiting(&mut m, t0);
        m.set_sleeping(true, at + secs(1));
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        assert!(!m.presence().is_pending());
        m.handle_presence(true, at + secs(2));
        assert_eq!(m.state_kind(), StateKind::Monitoring);
        assert!(m.take_outbox().is_empty());
    }

    #[test]
    fn day_rollover_zeroes_and_reports_once() {
        let (mut m, t0) = machine();
        m.check_day(19_700);
        m.take_outbox();
        lift_and_replace(&mut m, 930.0, t0 + secs(1));
        m.take_outbox();

        m.check_day(19_700);
        assert!(m.take_outbox().is_empty());
        assert_eq!(m.ledger().daily_total(), 70.0);

        m.check_day(19_701);
        assert_eq!(m.take_outbox(), vec![Message::DailyTotal(0.0)]);
        assert_eq!(m.ledger().daily_total(), 0.0);
        m.check_day(19_701);
        assert!(m.take_outbox().is_empty());
    }
}
